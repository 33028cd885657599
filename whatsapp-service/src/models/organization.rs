//! Organization model (read-only input to the conversational core).

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Invoicing-relevant slice of an organization.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Organization {
    pub organization_id: Uuid,
    pub name: String,
    pub ico: String,
    pub dic: Option<String>,
    pub is_vat_payer: bool,
    pub address_street: String,
    pub address_city: String,
    pub address_zip: String,
    pub address_country: String,
    pub default_currency: String,
    pub default_vat_rate: Decimal,
    pub invoice_prefix: String,
    pub whatsapp_phone_id: Option<String>,
    pub whatsapp_business_account_id: Option<String>,
}

impl Organization {
    /// VAT registration may be implied by a DIC even if the flag is unset.
    pub fn charges_vat(&self) -> bool {
        self.is_vat_payer || self.dic.is_some()
    }
}
