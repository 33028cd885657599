use super::{
    MessagingProvider, OutboundDocument, ProviderError, ProviderResponse,
};
use crate::config::WhatsAppConfig;
use async_trait::async_trait;
use reqwest::multipart;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// WhatsApp Cloud API provider (Meta Graph API).
///
/// Documents go out in two steps: upload the bytes to the `/media` endpoint,
/// then send a document message referencing the returned media id.
pub struct WhatsAppProvider {
    config: WhatsAppConfig,
    client: Client,
}

#[derive(Debug, Serialize)]
struct TextMessageRequest<'a> {
    messaging_product: &'a str,
    to: &'a str,
    #[serde(rename = "type")]
    message_type: &'a str,
    text: TextBody<'a>,
}

#[derive(Debug, Serialize)]
struct TextBody<'a> {
    body: &'a str,
}

#[derive(Debug, Serialize)]
struct DocumentMessageRequest<'a> {
    messaging_product: &'a str,
    to: &'a str,
    #[serde(rename = "type")]
    message_type: &'a str,
    document: DocumentBody<'a>,
}

#[derive(Debug, Serialize)]
struct DocumentBody<'a> {
    id: &'a str,
    filename: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    caption: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct MediaUploadResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct SendMessageResponse {
    #[serde(default)]
    messages: Vec<SentMessageId>,
}

#[derive(Debug, Deserialize)]
struct SentMessageId {
    id: String,
}

impl WhatsAppProvider {
    pub fn new(config: WhatsAppConfig) -> Self {
        Self {
            config,
            client: Client::new(),
        }
    }

    fn messages_url(&self, phone_number_id: &str) -> String {
        format!(
            "{}/{}/{}/messages",
            self.config.api_base_url, self.config.api_version, phone_number_id
        )
    }

    fn sender_id<'a>(&'a self, phone_number_id: Option<&'a str>) -> Result<&'a str, ProviderError> {
        phone_number_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                ProviderError::Configuration(
                    "WhatsApp send requires a phone_number_id".to_string(),
                )
            })
    }

    async fn upload_media(
        &self,
        phone_number_id: &str,
        document: &OutboundDocument,
    ) -> Result<String, ProviderError> {
        let url = format!(
            "{}/{}/{}/media",
            self.config.api_base_url, self.config.api_version, phone_number_id
        );

        let part = multipart::Part::bytes(document.bytes.clone())
            .file_name(document.filename.clone())
            .mime_str(&document.mime_type)
            .map_err(|e| {
                ProviderError::Configuration(format!("Invalid document MIME type: {}", e))
            })?;

        let form = multipart::Form::new()
            .text("messaging_product", "whatsapp")
            .text("type", document.mime_type.clone())
            .part("file", part);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.access_token)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                ProviderError::Connection(format!("Failed to connect to WhatsApp API: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::SendFailed(format!(
                "WhatsApp media upload returned status {}: {}",
                status, body
            )));
        }

        let upload: MediaUploadResponse = response.json().await.map_err(|e| {
            ProviderError::SendFailed(format!("Failed to parse media upload response: {}", e))
        })?;

        Ok(upload.id)
    }

    async fn post_message<T: Serialize>(
        &self,
        phone_number_id: &str,
        request: &T,
    ) -> Result<ProviderResponse, ProviderError> {
        let response = self
            .client
            .post(self.messages_url(phone_number_id))
            .bearer_auth(&self.config.access_token)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                ProviderError::Connection(format!("Failed to connect to WhatsApp API: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::SendFailed(format!(
                "WhatsApp API returned status {}: {}",
                status, body
            )));
        }

        let sent: SendMessageResponse = response.json().await.map_err(|e| {
            ProviderError::SendFailed(format!("Failed to parse WhatsApp response: {}", e))
        })?;

        Ok(ProviderResponse::success(
            sent.messages.into_iter().next().map(|m| m.id),
        ))
    }
}

#[async_trait]
impl MessagingProvider for WhatsAppProvider {
    async fn send_text(
        &self,
        phone_number_id: Option<&str>,
        to: &str,
        body: &str,
    ) -> Result<ProviderResponse, ProviderError> {
        if !self.config.enabled {
            return Err(ProviderError::NotEnabled(
                "WhatsApp provider is not enabled".to_string(),
            ));
        }
        if to.is_empty() {
            return Err(ProviderError::InvalidRecipient(
                "Recipient phone is empty".to_string(),
            ));
        }

        let sender = self.sender_id(phone_number_id)?;

        let request = TextMessageRequest {
            messaging_product: "whatsapp",
            to,
            message_type: "text",
            text: TextBody { body },
        };

        let response = self.post_message(sender, &request).await?;

        tracing::info!(to = %to, "WhatsApp text sent");

        Ok(response)
    }

    async fn send_document(
        &self,
        phone_number_id: Option<&str>,
        to: &str,
        document: &OutboundDocument,
    ) -> Result<ProviderResponse, ProviderError> {
        if !self.config.enabled {
            return Err(ProviderError::NotEnabled(
                "WhatsApp provider is not enabled".to_string(),
            ));
        }

        let sender = self.sender_id(phone_number_id)?;
        let media_id = self.upload_media(sender, document).await?;

        let request = DocumentMessageRequest {
            messaging_product: "whatsapp",
            to,
            message_type: "document",
            document: DocumentBody {
                id: &media_id,
                filename: &document.filename,
                caption: document.caption.as_deref(),
            },
        };

        let response = self.post_message(sender, &request).await?;

        tracing::info!(
            to = %to,
            filename = %document.filename,
            media_id = %media_id,
            "WhatsApp document sent"
        );

        Ok(response)
    }

    fn supports_documents(&self) -> bool {
        true
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }
}

/// Mock WhatsApp provider for testing. Records outbound texts so tests can
/// assert on reply content.
pub struct MockWhatsAppProvider {
    enabled: bool,
    send_count: AtomicU64,
    document_count: AtomicU64,
    sent_texts: Mutex<Vec<(String, String)>>,
}

impl MockWhatsAppProvider {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            send_count: AtomicU64::new(0),
            document_count: AtomicU64::new(0),
            sent_texts: Mutex::new(Vec::new()),
        }
    }

    pub fn send_count(&self) -> u64 {
        self.send_count.load(Ordering::SeqCst)
    }

    pub fn document_count(&self) -> u64 {
        self.document_count.load(Ordering::SeqCst)
    }

    pub fn sent_texts(&self) -> Vec<(String, String)> {
        self.sent_texts.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessagingProvider for MockWhatsAppProvider {
    async fn send_text(
        &self,
        _phone_number_id: Option<&str>,
        to: &str,
        body: &str,
    ) -> Result<ProviderResponse, ProviderError> {
        if !self.enabled {
            return Err(ProviderError::NotEnabled(
                "Mock WhatsApp provider is not enabled".to_string(),
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
            "[MOCK] WhatsApp text would be sent"
        );

        Ok(ProviderResponse::success(Some(format!(
            "mock-wa-{}",
            self.send_count.load(Ordering::SeqCst)
        ))))
    }

    async fn send_document(
        &self,
        _phone_number_id: Option<&str>,
        to: &str,
        document: &OutboundDocument,
    ) -> Result<ProviderResponse, ProviderError> {
        if !self.enabled {
            return Err(ProviderError::NotEnabled(
                "Mock WhatsApp provider is not enabled".to_string(),
            ));
        }

        self.document_count.fetch_add(1, Ordering::SeqCst);

        tracing::info!(
            to = %to,
            filename = %document.filename,
            bytes = %document.bytes.len(),
            "[MOCK] WhatsApp document would be sent"
        );

        Ok(ProviderResponse::success(Some(format!(
            "mock-wa-doc-{}",
            self.document_count.load(Ordering::SeqCst)
        ))))
    }

    fn supports_documents(&self) -> bool {
        true
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_records_sent_texts() {
        let provider = MockWhatsAppProvider::new(true);

        provider
            .send_text(Some("123"), "+420777123456", "Ahoj")
            .await
            .unwrap();
        provider
            .send_text(Some("123"), "+420777123456", "Faktura")
            .await
            .unwrap();

        assert_eq!(provider.send_count(), 2);
        let texts = provider.sent_texts();
        assert_eq!(texts[0].1, "Ahoj");
        assert_eq!(texts[1].1, "Faktura");
    }

    #[tokio::test]
    async fn disabled_mock_refuses_to_send() {
        let provider = MockWhatsAppProvider::new(false);
        let result = provider.send_text(Some("123"), "+420777123456", "x").await;
        assert!(matches!(result, Err(ProviderError::NotEnabled(_))));
    }
}
