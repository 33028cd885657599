//! Invoice model for whatsapp-service.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Invoice status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Sent,
    Paid,
    Cancelled,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Sent => "sent",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "sent" => InvoiceStatus::Sent,
            "paid" => InvoiceStatus::Paid,
            "cancelled" => InvoiceStatus::Cancelled,
            _ => InvoiceStatus::Draft,
        }
    }
}

/// Invoice document.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Invoice {
    pub invoice_id: Uuid,
    pub organization_id: Uuid,
    pub client_id: Uuid,
    pub invoice_number: String,
    pub variable_symbol: String,
    pub status: String,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub currency: String,
    pub subtotal: Decimal,
    pub vat_amount: Decimal,
    pub total: Decimal,
    pub created_via: String,
    pub notes: Option<String>,
    pub document_path: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

/// Immutable invoice line, persisted at flow completion.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct InvoiceItem {
    pub invoice_item_id: Uuid,
    pub invoice_id: Uuid,
    pub position: i32,
    pub description: String,
    pub quantity: Decimal,
    pub unit: String,
    pub unit_price: Decimal,
    pub vat_rate: Decimal,
    pub subtotal: Decimal,
    pub vat_amount: Decimal,
    pub total: Decimal,
    pub created_utc: DateTime<Utc>,
}

/// Result of a confirmed conversation turn, handed to the webhook dispatcher
/// for document delivery.
#[derive(Debug, Clone)]
pub struct CreatedInvoice {
    pub invoice_id: Uuid,
    pub invoice_number: String,
    pub variable_symbol: String,
    pub client_name: String,
    pub total: Decimal,
    pub currency: String,
    pub document_path: String,
    pub document: Vec<u8>,
}
