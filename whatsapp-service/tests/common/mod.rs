//! Shared fixtures for integration tests.
//!
//! Tests run against the database named by `DATABASE_URL` and skip
//! themselves when it is not set.
#![allow(dead_code)]

use rust_decimal::Decimal;
use uuid::Uuid;
use whatsapp_service::models::Organization;
use whatsapp_service::services::flow::{
    handle_incoming_message, FlowSettings, InboundMessage, TurnOutcome,
};
use whatsapp_service::services::providers::Channel;
use whatsapp_service::services::renderer::MockRenderer;
use whatsapp_service::services::Database;

pub async fn test_db() -> Option<Database> {
    let Ok(url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set, skipping integration test");
        return None;
    };

    let db = Database::new(&url, 5, 1)
        .await
        .expect("failed to connect to test database");
    db.run_migrations()
        .await
        .expect("failed to run migrations");
    Some(db)
}

/// Insert a throwaway organization with unique routing ids.
pub async fn create_org(db: &Database, is_vat_payer: bool) -> Organization {
    let tag = &Uuid::new_v4().simple().to_string()[..12];

    sqlx::query_as::<_, Organization>(
        r#"
        INSERT INTO organizations (
            name, ico, dic, is_vat_payer, address_street, address_city,
            address_zip, whatsapp_phone_id, whatsapp_business_account_id
        )
        VALUES ($1, '87654321', $2, $3, 'Dlouhá 12', 'Praha', '110 00', $4, $5)
        RETURNING organization_id, name, ico, dic, is_vat_payer, address_street,
                  address_city, address_zip, address_country, default_currency,
                  default_vat_rate, invoice_prefix, whatsapp_phone_id,
                  whatsapp_business_account_id
        "#,
    )
    .bind(format!("Test Org {}", tag))
    .bind(is_vat_payer.then(|| "CZ87654321".to_string()))
    .bind(is_vat_payer)
    .bind(format!("pnid-{}", tag))
    .bind(format!("ba-{}", tag))
    .fetch_one(db.pool())
    .await
    .expect("failed to create test organization")
}

pub fn unique_phone() -> String {
    let digits = Uuid::new_v4().as_u128() % 1_000_000_000;
    format!("+420{:09}", digits)
}

/// Drive one turn through the engine with a fresh message id.
pub async fn send(db: &Database, org: &Organization, phone: &str, text: &str) -> TurnOutcome {
    send_with_id(db, org, phone, &format!("wamid.{}", Uuid::new_v4()), text).await
}

pub async fn send_with_id(
    db: &Database,
    org: &Organization,
    phone: &str,
    message_id: &str,
    text: &str,
) -> TurnOutcome {
    let settings = FlowSettings {
        messages_per_minute: 1000,
    };
    let msg = InboundMessage {
        channel: Channel::WhatsApp,
        phone_number_id: org.whatsapp_phone_id.clone(),
        from: phone.to_string(),
        message_id: message_id.to_string(),
        text: text.to_string(),
    };

    handle_incoming_message(db, &MockRenderer, &settings, org, &msg)
        .await
        .expect("turn failed")
}

/// Variant with an explicit per-minute ceiling, for rate-limit tests.
pub async fn send_with_limit(
    db: &Database,
    org: &Organization,
    phone: &str,
    messages_per_minute: i64,
    text: &str,
) -> TurnOutcome {
    let settings = FlowSettings {
        messages_per_minute,
    };
    let msg = InboundMessage {
        channel: Channel::WhatsApp,
        phone_number_id: org.whatsapp_phone_id.clone(),
        from: phone.to_string(),
        message_id: format!("wamid.{}", Uuid::new_v4()),
        text: text.to_string(),
    };

    handle_incoming_message(db, &MockRenderer, &settings, org, &msg)
        .await
        .expect("turn failed")
}

pub fn dec(s: &str) -> Decimal {
    s.parse().unwrap()
}
