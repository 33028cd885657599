//! Client model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A billed party, scoped to its owning organization.
///
/// `ico` is nullable: clients created ad hoc through the chat flow carry only
/// a name and a city.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Client {
    pub client_id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub ico: Option<String>,
    pub address_city: Option<String>,
    pub created_utc: DateTime<Utc>,
}
