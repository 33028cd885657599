//! Persisted conversation state for the invoice-creation wizard.
//!
//! The draft data lives in a JSONB `context` column serialized from
//! [`ConversationState`], a tagged union with one variant per wizard state.
//! Each variant carries only the fields that state can legitimately hold, so
//! a loaded row either validates into a coherent state or fails outright.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Reference to the client selected during the wizard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientRef {
    pub client_id: Uuid,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
}

/// A line item accumulated during the wizard, not yet persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftItem {
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub vat_rate: Decimal,
    pub unit: String,
}

/// Wizard state machine: `idle -> awaiting_client -> awaiting_items ->
/// awaiting_dates -> confirm -> (idle)`, with a global cancel back to idle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConversationState {
    Idle,
    AwaitingClient,
    AwaitingItems {
        client: ClientRef,
        items: Vec<DraftItem>,
    },
    AwaitingDates {
        client: ClientRef,
        items: Vec<DraftItem>,
    },
    Confirm {
        client: ClientRef,
        items: Vec<DraftItem>,
        issue_date: NaiveDate,
        due_date: NaiveDate,
    },
}

impl ConversationState {
    /// State name as stored in the `state` column.
    pub fn name(&self) -> &'static str {
        match self {
            ConversationState::Idle => "idle",
            ConversationState::AwaitingClient => "awaiting_client",
            ConversationState::AwaitingItems { .. } => "awaiting_items",
            ConversationState::AwaitingDates { .. } => "awaiting_dates",
            ConversationState::Confirm { .. } => "confirm",
        }
    }
}

impl Default for ConversationState {
    fn default() -> Self {
        ConversationState::Idle
    }
}

/// Raw conversation row; `context` is decoded on demand.
#[derive(Debug, Clone, FromRow)]
pub struct ConversationRow {
    pub conversation_id: Uuid,
    pub organization_id: Uuid,
    pub whatsapp_phone: String,
    pub state: String,
    pub context: serde_json::Value,
    pub last_message_id: Option<String>,
    pub timeout_at: Option<DateTime<Utc>>,
    pub updated_utc: DateTime<Utc>,
}

impl ConversationRow {
    /// Validate the persisted context blob into a proper state variant.
    pub fn decode_state(&self) -> Result<ConversationState, serde_json::Error> {
        serde_json::from_value(self.context.clone())
    }
}
