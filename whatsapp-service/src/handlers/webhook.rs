//! Meta webhook endpoint: subscription handshake, signature verification,
//! payload fan-out, and outbound delivery.
//!
//! Once the signature checks out, the endpoint always answers 200 with
//! `{"success": true}` so Meta never retries a payload we already looked at;
//! per-message failures are logged and counted instead.

use crate::models::{CreatedInvoice, Organization};
use crate::services::flow::{handle_incoming_message, FlowSettings, InboundMessage};
use crate::services::metrics::{OUTBOUND_SENDS_TOTAL, WEBHOOK_MESSAGES_TOTAL};
use crate::services::providers::{Channel, OutboundDocument};
use crate::services::totals::format_currency;
use crate::startup::AppState;
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use service_core::error::AppError;
use service_core::utils::verify_meta_signature;
use std::collections::HashMap;
use tracing::{error, info, instrument, warn};

const SIGNATURE_HEADER: &str = "x-hub-signature-256";

const MSG_DOCUMENT_FAILED: &str = "⚠️ Fakturu se nepodařilo odeslat jako dokument. \
    Je uložená a zkusíme to znovu.";
const MSG_TURN_FAILED: &str = "⚠️ Něco se pokazilo, zpráva nebyla zpracována. \
    Zkus to prosím znovu.";

// -----------------------------------------------------------------------------
// Subscription handshake
// -----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct VerifyParams {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

/// GET side of the webhook: Meta's subscription handshake. Echo the
/// challenge when the verify token matches.
#[instrument(skip(state, params))]
pub async fn verify_webhook(
    State(state): State<AppState>,
    Query(params): Query<VerifyParams>,
) -> impl IntoResponse {
    let token_ok = params.verify_token.as_deref()
        == Some(state.config.whatsapp.verify_token.as_str())
        && !state.config.whatsapp.verify_token.is_empty();

    if params.mode.as_deref() == Some("subscribe") && token_ok {
        info!("Webhook subscription verified");
        (StatusCode::OK, params.challenge.unwrap_or_default())
    } else {
        warn!("Webhook subscription verification failed");
        (StatusCode::FORBIDDEN, String::new())
    }
}

// -----------------------------------------------------------------------------
// Payload shapes
// -----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub entry: Vec<WebhookEntry>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookEntry {
    /// Business-account id; the routing fallback for Messenger events.
    pub id: Option<String>,
    #[serde(default)]
    pub changes: Vec<WebhookChange>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookChange {
    pub value: Option<ChangeValue>,
}

#[derive(Debug, Deserialize)]
pub struct ChangeValue {
    #[serde(default = "default_messaging_product")]
    pub messaging_product: String,
    pub metadata: Option<ChangeMetadata>,
    #[serde(default)]
    pub messages: Vec<RawMessage>,
}

fn default_messaging_product() -> String {
    "whatsapp".to_string()
}

#[derive(Debug, Deserialize)]
pub struct ChangeMetadata {
    pub phone_number_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RawMessage {
    pub from: Option<FromField>,
    pub id: String,
    #[serde(rename = "type")]
    pub message_type: Option<String>,
    pub text: Option<TextField>,
}

/// `from` is a bare phone string on WhatsApp and an actor object on
/// Messenger-shaped events.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum FromField {
    Phone(String),
    Actor { id: String },
}

impl FromField {
    fn sender_id(&self) -> &str {
        match self {
            FromField::Phone(phone) => phone,
            FromField::Actor { id } => id,
        }
    }
}

/// `text` is usually `{"body": "..."}` but some relays flatten it to a
/// plain string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum TextField {
    Structured { body: String },
    Plain(String),
}

impl TextField {
    fn body(&self) -> &str {
        match self {
            TextField::Structured { body } => body,
            TextField::Plain(text) => text,
        }
    }
}

/// A message pulled out of the payload, with its routing identifiers.
#[derive(Debug)]
pub struct ExtractedMessage {
    pub business_account_id: Option<String>,
    pub message: InboundMessage,
}

/// Flatten the nested entry/changes/messages payload into a message list.
/// Non-text messages (images, reactions, status updates) are skipped.
pub fn extract_messages(payload: &WebhookPayload) -> Vec<ExtractedMessage> {
    let mut out = Vec::new();

    for entry in &payload.entry {
        for change in &entry.changes {
            let Some(value) = &change.value else { continue };
            let Some(channel) = Channel::from_messaging_product(&value.messaging_product) else {
                continue;
            };
            let phone_number_id = value
                .metadata
                .as_ref()
                .and_then(|m| m.phone_number_id.clone());

            for raw in &value.messages {
                if let Some(kind) = &raw.message_type {
                    if kind != "text" {
                        continue;
                    }
                }
                let Some(text) = &raw.text else { continue };
                let Some(from) = &raw.from else { continue };

                let sender = match channel {
                    Channel::WhatsApp => normalize_phone(from.sender_id()),
                    Channel::Messenger => from.sender_id().to_string(),
                };

                out.push(ExtractedMessage {
                    business_account_id: entry.id.clone(),
                    message: InboundMessage {
                        channel,
                        phone_number_id: phone_number_id.clone(),
                        from: sender,
                        message_id: raw.id.clone(),
                        text: text.body().to_string(),
                    },
                });
            }
        }
    }

    out
}

/// Canonical sender phone: digits only, with a leading `+`. Conversation
/// identity depends on this being stable across deliveries.
pub fn normalize_phone(raw: &str) -> String {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    format!("+{}", digits)
}

// -----------------------------------------------------------------------------
// POST handler
// -----------------------------------------------------------------------------

/// POST side of the webhook: verify the payload signature, then process
/// every text message it carries.
#[instrument(skip(state, headers, body))]
pub async fn receive_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    if !verify_meta_signature(&state.config.whatsapp.app_secret, &body, signature) {
        warn!("Webhook signature verification failed");
        return Err(AppError::Forbidden(anyhow::anyhow!(
            "Invalid webhook signature"
        )));
    }

    let payload: WebhookPayload = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(error = %e, "Unparseable webhook payload, acknowledging anyway");
            return Ok((StatusCode::OK, Json(json!({"success": true}))));
        }
    };

    let messages = extract_messages(&payload);
    info!(count = messages.len(), "Webhook messages extracted");

    // Routing lookups repeat across messages in one payload; memoize per
    // request.
    let mut org_cache: HashMap<String, Option<Organization>> = HashMap::new();

    for extracted in messages {
        let msg = &extracted.message;
        let routing_key = msg
            .phone_number_id
            .clone()
            .or_else(|| extracted.business_account_id.clone())
            .unwrap_or_default();

        let org = match org_cache.get(&routing_key) {
            Some(cached) => cached.clone(),
            None => {
                let resolved = state
                    .db
                    .find_organization_by_routing(
                        msg.phone_number_id.as_deref(),
                        extracted.business_account_id.as_deref(),
                    )
                    .await
                    .unwrap_or_else(|e| {
                        error!(error = %e, "Organization routing lookup failed");
                        None
                    });
                org_cache.insert(routing_key.clone(), resolved.clone());
                resolved
            }
        };

        let Some(org) = org else {
            warn!(
                routing_key = %routing_key,
                message_id = %msg.message_id,
                "No organization for inbound message, dropping"
            );
            WEBHOOK_MESSAGES_TOTAL
                .with_label_values(&[msg.channel.as_str(), "unrouted"])
                .inc();
            continue;
        };

        let settings = FlowSettings {
            messages_per_minute: state.config.rate_limit.messages_per_minute,
        };

        match handle_incoming_message(
            &state.db,
            state.renderer.as_ref(),
            &settings,
            &org,
            msg,
        )
        .await
        {
            Ok(outcome) => {
                deliver_outcome(&state, msg, outcome.replies, outcome.invoice).await;
            }
            Err(e) => {
                error!(
                    message_id = %msg.message_id,
                    error = %e,
                    "Conversation turn failed"
                );
                WEBHOOK_MESSAGES_TOTAL
                    .with_label_values(&[msg.channel.as_str(), "failed"])
                    .inc();
                // The turn rolled back; tell the sender something went wrong.
                let provider = state.gateway.provider(msg.channel);
                if let Err(e) = provider
                    .send_text(msg.phone_number_id.as_deref(), &msg.from, MSG_TURN_FAILED)
                    .await
                {
                    error!(to = %msg.from, error = %e, "Failure notice delivery failed");
                }
            }
        }
    }

    Ok((StatusCode::OK, Json(json!({"success": true}))))
}

/// Deliver the turn's replies and, when an invoice was confirmed, its
/// document. Runs after the turn transaction committed; failures here are
/// logged and the invoice stays in draft.
async fn deliver_outcome(
    state: &AppState,
    msg: &InboundMessage,
    replies: Vec<String>,
    invoice: Option<CreatedInvoice>,
) {
    let provider = state.gateway.provider(msg.channel);
    let phone_number_id = msg.phone_number_id.as_deref();

    for reply in &replies {
        match provider.send_text(phone_number_id, &msg.from, reply).await {
            Ok(_) => {
                OUTBOUND_SENDS_TOTAL
                    .with_label_values(&[msg.channel.as_str(), "text", "ok"])
                    .inc();
            }
            Err(e) => {
                error!(to = %msg.from, error = %e, "Reply delivery failed");
                OUTBOUND_SENDS_TOTAL
                    .with_label_values(&[msg.channel.as_str(), "text", "error"])
                    .inc();
            }
        }
    }

    let Some(invoice) = invoice else { return };

    if !provider.supports_documents() {
        // Text-only channel: the confirmation reply already carries the
        // summary; the invoice stays draft until another path delivers it.
        let note = format!(
            "📄 Faktura {} je uložena ({}).",
            invoice.invoice_number,
            format_currency(invoice.total, &invoice.currency)
        );
        if let Err(e) = provider.send_text(phone_number_id, &msg.from, &note).await {
            error!(to = %msg.from, error = %e, "Invoice note delivery failed");
        }
        return;
    }

    let document = OutboundDocument {
        filename: format!("{}.html", invoice.invoice_number),
        mime_type: "text/html".to_string(),
        bytes: invoice.document.clone(),
        caption: Some(format!(
            "Faktura {} | {}",
            invoice.invoice_number,
            format_currency(invoice.total, &invoice.currency)
        )),
    };

    match provider
        .send_document(phone_number_id, &msg.from, &document)
        .await
    {
        Ok(_) => {
            OUTBOUND_SENDS_TOTAL
                .with_label_values(&[msg.channel.as_str(), "document", "ok"])
                .inc();
            if let Err(e) = state.db.mark_invoice_sent(invoice.invoice_id).await {
                error!(
                    invoice_id = %invoice.invoice_id,
                    error = %e,
                    "Failed to mark invoice sent after delivery"
                );
            }
        }
        Err(e) => {
            error!(
                invoice_id = %invoice.invoice_id,
                error = %e,
                "Invoice document delivery failed"
            );
            OUTBOUND_SENDS_TOTAL
                .with_label_values(&[msg.channel.as_str(), "document", "error"])
                .inc();
            if let Err(e) = provider
                .send_text(phone_number_id, &msg.from, MSG_DOCUMENT_FAILED)
                .await
            {
                error!(to = %msg.from, error = %e, "Failure notice delivery failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_whatsapp_text_message() {
        let payload: WebhookPayload = serde_json::from_value(serde_json::json!({
            "object": "whatsapp_business_account",
            "entry": [{
                "id": "BA-1",
                "changes": [{
                    "field": "messages",
                    "value": {
                        "messaging_product": "whatsapp",
                        "metadata": {
                            "display_phone_number": "420111222333",
                            "phone_number_id": "PNID-1"
                        },
                        "messages": [{
                            "from": "420777123456",
                            "id": "wamid.abc",
                            "timestamp": "1736935200",
                            "type": "text",
                            "text": { "body": "faktura" }
                        }]
                    }
                }]
            }]
        }))
        .unwrap();

        let messages = extract_messages(&payload);
        assert_eq!(messages.len(), 1);

        let msg = &messages[0].message;
        assert_eq!(msg.channel, Channel::WhatsApp);
        assert_eq!(msg.from, "+420777123456");
        assert_eq!(msg.message_id, "wamid.abc");
        assert_eq!(msg.text, "faktura");
        assert_eq!(msg.phone_number_id.as_deref(), Some("PNID-1"));
        assert_eq!(messages[0].business_account_id.as_deref(), Some("BA-1"));
    }

    #[test]
    fn extracts_messenger_actor_and_plain_text() {
        let payload: WebhookPayload = serde_json::from_value(serde_json::json!({
            "entry": [{
                "id": "PAGE-9",
                "changes": [{
                    "value": {
                        "messaging_product": "messenger",
                        "messages": [{
                            "from": { "id": "psid-42" },
                            "id": "m_1",
                            "text": "faktura"
                        }]
                    }
                }]
            }]
        }))
        .unwrap();

        let messages = extract_messages(&payload);
        assert_eq!(messages.len(), 1);

        let msg = &messages[0].message;
        assert_eq!(msg.channel, Channel::Messenger);
        assert_eq!(msg.from, "psid-42");
        assert_eq!(msg.text, "faktura");
        assert_eq!(msg.phone_number_id, None);
    }

    #[test]
    fn skips_non_text_messages_and_unknown_products() {
        let payload: WebhookPayload = serde_json::from_value(serde_json::json!({
            "entry": [{
                "id": "BA-1",
                "changes": [
                    {
                        "value": {
                            "messaging_product": "whatsapp",
                            "metadata": { "phone_number_id": "PNID-1" },
                            "messages": [{
                                "from": "420777123456",
                                "id": "wamid.img",
                                "type": "image"
                            }]
                        }
                    },
                    {
                        "value": {
                            "messaging_product": "telegram",
                            "messages": [{
                                "from": "123",
                                "id": "t_1",
                                "type": "text",
                                "text": { "body": "hi" }
                            }]
                        }
                    }
                ]
            }]
        }))
        .unwrap();

        assert!(extract_messages(&payload).is_empty());
    }

    #[test]
    fn empty_payload_extracts_nothing() {
        let payload: WebhookPayload = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(extract_messages(&payload).is_empty());
    }

    #[test]
    fn normalize_phone_canonicalizes() {
        assert_eq!(normalize_phone("420777123456"), "+420777123456");
        assert_eq!(normalize_phone("+420 777 123 456"), "+420777123456");
        assert_eq!(normalize_phone("(420) 777-123-456"), "+420777123456");
    }
}
