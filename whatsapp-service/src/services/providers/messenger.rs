use super::{
    MessagingProvider, OutboundDocument, ProviderError, ProviderResponse,
};
use crate::config::MessengerConfig;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Facebook Messenger Send API provider.
///
/// Messenger has no first-class document attachment for generated files, so
/// this provider is text-only; the caller falls back to a notification
/// message with the invoice summary.
pub struct MessengerProvider {
    config: MessengerConfig,
    client: Client,
}

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    messaging_type: &'a str,
    recipient: Recipient<'a>,
    message: MessageBody<'a>,
}

#[derive(Debug, Serialize)]
struct Recipient<'a> {
    id: &'a str,
}

#[derive(Debug, Serialize)]
struct MessageBody<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    #[serde(default)]
    message_id: Option<String>,
}

impl MessengerProvider {
    pub fn new(config: MessengerConfig) -> Self {
        Self {
            config,
            client: Client::new(),
        }
    }

    fn messages_url(&self) -> String {
        let page = if self.config.page_id.is_empty() {
            "me"
        } else {
            &self.config.page_id
        };
        format!(
            "{}/{}/{}/messages",
            self.config.api_base_url, self.config.api_version, page
        )
    }
}

#[async_trait]
impl MessagingProvider for MessengerProvider {
    async fn send_text(
        &self,
        _phone_number_id: Option<&str>,
        to: &str,
        body: &str,
    ) -> Result<ProviderResponse, ProviderError> {
        if !self.config.enabled {
            return Err(ProviderError::NotEnabled(
                "Messenger provider is not enabled".to_string(),
            ));
        }
        if to.is_empty() {
            return Err(ProviderError::InvalidRecipient(
                "Recipient id is empty".to_string(),
            ));
        }

        let request = SendRequest {
            messaging_type: "RESPONSE",
            recipient: Recipient { id: to },
            message: MessageBody { text: body },
        };

        let response = self
            .client
            .post(self.messages_url())
            .query(&[("access_token", &self.config.access_token)])
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                ProviderError::Connection(format!("Failed to connect to Messenger API: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::SendFailed(format!(
                "Messenger API returned status {}: {}",
                status, body
            )));
        }

        let sent: SendResponse = response.json().await.map_err(|e| {
            ProviderError::SendFailed(format!("Failed to parse Messenger response: {}", e))
        })?;

        tracing::info!(to = %to, "Messenger text sent");

        Ok(ProviderResponse::success(sent.message_id))
    }

    async fn send_document(
        &self,
        _phone_number_id: Option<&str>,
        _to: &str,
        _document: &OutboundDocument,
    ) -> Result<ProviderResponse, ProviderError> {
        Err(ProviderError::Unsupported(
            "Messenger does not support document attachments".to_string(),
        ))
    }

    fn supports_documents(&self) -> bool {
        false
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }
}

/// Mock Messenger provider for testing.
pub struct MockMessengerProvider {
    enabled: bool,
    send_count: AtomicU64,
    sent_texts: Mutex<Vec<(String, String)>>,
}

impl MockMessengerProvider {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            send_count: AtomicU64::new(0),
            sent_texts: Mutex::new(Vec::new()),
        }
    }

    pub fn send_count(&self) -> u64 {
        self.send_count.load(Ordering::SeqCst)
    }

    pub fn sent_texts(&self) -> Vec<(String, String)> {
        self.sent_texts.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessagingProvider for MockMessengerProvider {
    async fn send_text(
        &self,
        _phone_number_id: Option<&str>,
        to: &str,
        body: &str,
    ) -> Result<ProviderResponse, ProviderError> {
        if !self.enabled {
            return Err(ProviderError::NotEnabled(
                "Mock Messenger provider is not enabled".to_string(),
            ));
        }

        self.send_count.fetch_add(1, Ordering::SeqCst);
        self.sent_texts
            .lock()
            .unwrap()
            .push((to.to_string(), body.to_string()));

        tracing::info!(
            to = %to,
            body_length = %body.len(),
            "[MOCK] Messenger text would be sent"
        );

        Ok(ProviderResponse::success(Some(format!(
            "mock-msgr-{}",
            self.send_count.load(Ordering::SeqCst)
        ))))
    }

    async fn send_document(
        &self,
        _phone_number_id: Option<&str>,
        _to: &str,
        _document: &OutboundDocument,
    ) -> Result<ProviderResponse, ProviderError> {
        Err(ProviderError::Unsupported(
            "Messenger does not support document attachments".to_string(),
        ))
    }

    fn supports_documents(&self) -> bool {
        false
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }
}
