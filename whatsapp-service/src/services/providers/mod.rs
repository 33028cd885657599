pub mod messenger;
pub mod whatsapp;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

pub use messenger::{MessengerProvider, MockMessengerProvider};
pub use whatsapp::{MockWhatsAppProvider, WhatsAppProvider};

/// Meta messaging channel the message arrived on, and replies go back on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    WhatsApp,
    Messenger,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::WhatsApp => "whatsapp",
            Channel::Messenger => "messenger",
        }
    }

    /// Map the webhook `messaging_product` discriminator to a channel.
    pub fn from_messaging_product(product: &str) -> Option<Self> {
        match product {
            "whatsapp" => Some(Channel::WhatsApp),
            "messenger" | "instagram" => Some(Channel::Messenger),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Provider not enabled: {0}")]
    NotEnabled(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Send error: {0}")]
    SendFailed(String),

    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    pub provider_id: Option<String>,
    pub success: bool,
    pub message: Option<String>,
}

impl ProviderResponse {
    pub fn success(provider_id: Option<String>) -> Self {
        Self {
            provider_id,
            success: true,
            message: None,
        }
    }

    pub fn failure(message: String) -> Self {
        Self {
            provider_id: None,
            success: false,
            message: Some(message),
        }
    }
}

/// An outbound document attachment.
#[derive(Debug, Clone)]
pub struct OutboundDocument {
    pub filename: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
    pub caption: Option<String>,
}

/// Outbound messaging seam for one channel.
///
/// `phone_number_id` is the sending identity for channels that multiplex
/// several numbers behind one token (WhatsApp); Messenger ignores it.
#[async_trait]
pub trait MessagingProvider: Send + Sync {
    async fn send_text(
        &self,
        phone_number_id: Option<&str>,
        to: &str,
        body: &str,
    ) -> Result<ProviderResponse, ProviderError>;

    async fn send_document(
        &self,
        phone_number_id: Option<&str>,
        to: &str,
        document: &OutboundDocument,
    ) -> Result<ProviderResponse, ProviderError>;

    fn supports_documents(&self) -> bool;

    fn is_enabled(&self) -> bool;
}

/// Routes outbound sends to the provider for the message's channel.
#[derive(Clone)]
pub struct MessageGateway {
    whatsapp: Arc<dyn MessagingProvider>,
    messenger: Arc<dyn MessagingProvider>,
}

impl MessageGateway {
    pub fn new(whatsapp: Arc<dyn MessagingProvider>, messenger: Arc<dyn MessagingProvider>) -> Self {
        Self {
            whatsapp,
            messenger,
        }
    }

    pub fn provider(&self, channel: Channel) -> &dyn MessagingProvider {
        match channel {
            Channel::WhatsApp => self.whatsapp.as_ref(),
            Channel::Messenger => self.messenger.as_ref(),
        }
    }
}
