//! End-to-end tests for the conversational invoice flow.
//!
//! These talk to the database at `DATABASE_URL` and skip when it is unset.

mod common;

use common::*;
use whatsapp_service::models::InvoiceStatus;

#[tokio::test]
async fn full_wizard_creates_invoice() {
    let Some(db) = test_db().await else { return };
    let org = create_org(&db, true).await;
    let phone = unique_phone();

    let outcome = send(&db, &org, &phone, "faktura").await;
    assert!(outcome.replies[0].contains("IČO"));

    let outcome = send(&db, &org, &phone, "12345678").await;
    assert!(outcome.replies[0].contains("Klient 12345678"));
    assert!(outcome.replies[0].contains("popis|množství|cena"));

    let outcome = send(&db, &org, &phone, "Konzultace|2|500").await;
    assert!(outcome.replies[0].contains("1. Konzultace"));
    assert!(outcome.replies[0].contains("1 210,00 CZK"));

    let outcome = send(&db, &org, &phone, "hotovo").await;
    assert!(outcome.replies[0].contains("datum vystavení"));

    let outcome = send(&db, &org, &phone, "2025-01-15").await;
    assert!(outcome.replies[0].contains("2025-01-15"));
    assert!(outcome.replies[0].contains("2025-01-29"));
    assert!(outcome.replies[0].contains("'ano'"));

    let outcome = send(&db, &org, &phone, "ano").await;
    let invoice = outcome.invoice.expect("invoice should be created");

    assert_eq!(invoice.invoice_number, "2025-00001");
    assert_eq!(invoice.variable_symbol, "0202500001");
    assert_eq!(invoice.total, dec("1210.00"));
    assert!(outcome.replies[0].contains("2025-00001"));

    // The persisted row carries the draft status until document delivery.
    let stored = db.get_invoice(invoice.invoice_id).await.unwrap();
    assert_eq!(InvoiceStatus::from_string(&stored.status), InvoiceStatus::Draft);
    assert_eq!(stored.subtotal, dec("1000.00"));
    assert_eq!(stored.vat_amount, dec("210.00"));
    assert_eq!(stored.total, dec("1210.00"));
    assert_eq!(stored.created_via, "whatsapp");
    assert!(stored.document_path.is_some());

    let items = db.get_invoice_items(invoice.invoice_id).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].position, 1);
    assert_eq!(items[0].description, "Konzultace");
    assert_eq!(items[0].quantity, dec("2"));
    assert_eq!(items[0].total, dec("1210.00"));

    // Exactly one audit entry, carrying channel and sender phone.
    let changes: serde_json::Value = sqlx::query_scalar(
        "SELECT changes FROM audit_log WHERE entity_type = 'invoice' AND entity_id = $1",
    )
    .bind(invoice.invoice_id)
    .fetch_one(db.pool())
    .await
    .unwrap();
    assert_eq!(changes["created_via"], "whatsapp");
    assert_eq!(changes["whatsapp_phone"], phone.as_str());

    // Conversation ends back in idle.
    let state: String = sqlx::query_scalar(
        "SELECT state FROM wa_conversations WHERE organization_id = $1 AND whatsapp_phone = $2",
    )
    .bind(org.organization_id)
    .bind(&phone)
    .fetch_one(db.pool())
    .await
    .unwrap();
    assert_eq!(state, "idle");
}

#[tokio::test]
async fn duplicate_message_id_is_absorbed() {
    let Some(db) = test_db().await else { return };
    let org = create_org(&db, true).await;
    let phone = unique_phone();

    let first = send_with_id(&db, &org, &phone, "wamid.dup-test-1", "faktura").await;
    assert!(!first.replies.is_empty());

    let second = send_with_id(&db, &org, &phone, "wamid.dup-test-1", "faktura").await;
    assert!(second.replies.is_empty());
    assert!(second.invoice.is_none());

    // The duplicate must not have advanced the state machine twice.
    let state: String = sqlx::query_scalar(
        "SELECT state FROM wa_conversations WHERE organization_id = $1 AND whatsapp_phone = $2",
    )
    .bind(org.organization_id)
    .bind(&phone)
    .fetch_one(db.pool())
    .await
    .unwrap();
    assert_eq!(state, "awaiting_client");
}

#[tokio::test]
async fn cancel_resets_mid_flow() {
    let Some(db) = test_db().await else { return };
    let org = create_org(&db, true).await;
    let phone = unique_phone();

    send(&db, &org, &phone, "faktura").await;
    send(&db, &org, &phone, "12345678").await;
    send(&db, &org, &phone, "Práce|1|100").await;

    let outcome = send(&db, &org, &phone, "zrušit").await;
    assert!(outcome.replies[0].contains("zrušen"));

    let state: String = sqlx::query_scalar(
        "SELECT state FROM wa_conversations WHERE organization_id = $1 AND whatsapp_phone = $2",
    )
    .bind(org.organization_id)
    .bind(&phone)
    .fetch_one(db.pool())
    .await
    .unwrap();
    assert_eq!(state, "idle");
}

#[tokio::test]
async fn cancel_is_acknowledged_from_idle() {
    let Some(db) = test_db().await else { return };
    let org = create_org(&db, true).await;
    let phone = unique_phone();

    let outcome = send(&db, &org, &phone, "zrušit").await;
    assert!(outcome.replies[0].contains("zrušen"));

    let state: String = sqlx::query_scalar(
        "SELECT state FROM wa_conversations WHERE organization_id = $1 AND whatsapp_phone = $2",
    )
    .bind(org.organization_id)
    .bind(&phone)
    .fetch_one(db.pool())
    .await
    .unwrap();
    assert_eq!(state, "idle");
}

#[tokio::test]
async fn rate_limit_throttles_over_ceiling() {
    let Some(db) = test_db().await else { return };
    let org = create_org(&db, true).await;
    let phone = unique_phone();

    let first = send_with_limit(&db, &org, &phone, 2, "ahoj").await;
    assert!(!first.replies[0].contains("Příliš mnoho"));

    let second = send_with_limit(&db, &org, &phone, 2, "ahoj").await;
    assert!(!second.replies[0].contains("Příliš mnoho"));

    let third = send_with_limit(&db, &org, &phone, 2, "ahoj").await;
    assert!(third.replies[0].contains("Příliš mnoho zpráv"));
}

#[tokio::test]
async fn rejecting_confirmation_keeps_items() {
    let Some(db) = test_db().await else { return };
    let org = create_org(&db, true).await;
    let phone = unique_phone();

    send(&db, &org, &phone, "faktura").await;
    send(&db, &org, &phone, "12345678").await;
    send(&db, &org, &phone, "Konzultace|2|500").await;
    send(&db, &org, &phone, "hotovo").await;
    send(&db, &org, &phone, "2025-01-15").await;

    let outcome = send(&db, &org, &phone, "ne").await;
    assert!(outcome.replies[0].contains("upravit položky"));
    assert!(outcome.invoice.is_none());

    // The earlier item survives; closing again goes straight to dates.
    let outcome = send(&db, &org, &phone, "hotovo").await;
    assert!(outcome.replies[0].contains("datum vystavení"));
}

#[tokio::test]
async fn new_client_via_keyword_lines() {
    let Some(db) = test_db().await else { return };
    let org = create_org(&db, true).await;
    let phone = unique_phone();

    send(&db, &org, &phone, "faktura").await;
    let outcome = send(&db, &org, &phone, "nový\nJan Novák\nBrno").await;
    assert!(outcome.replies[0].contains("Jan Novák"));

    let city: Option<String> = sqlx::query_scalar(
        "SELECT address_city FROM clients WHERE organization_id = $1 AND name = 'Jan Novák'",
    )
    .bind(org.organization_id)
    .fetch_one(db.pool())
    .await
    .unwrap();
    assert_eq!(city.as_deref(), Some("Brno"));
}

#[tokio::test]
async fn non_vat_payer_invoice_has_zero_vat() {
    let Some(db) = test_db().await else { return };
    let org = create_org(&db, false).await;
    let phone = unique_phone();

    send(&db, &org, &phone, "faktura").await;
    send(&db, &org, &phone, "12345678").await;
    send(&db, &org, &phone, "Konzultace|2|500").await;
    send(&db, &org, &phone, "hotovo").await;
    send(&db, &org, &phone, "2025-03-01|2025-03-31").await;

    let outcome = send(&db, &org, &phone, "ano").await;
    let invoice = outcome.invoice.expect("invoice should be created");

    assert_eq!(invoice.total, dec("1000.00"));

    let vat: rust_decimal::Decimal =
        sqlx::query_scalar("SELECT vat_amount FROM invoices WHERE invoice_id = $1")
            .bind(invoice.invoice_id)
            .fetch_one(db.pool())
            .await
            .unwrap();
    assert_eq!(vat, dec("0.00"));
}

#[tokio::test]
async fn sequences_are_per_organization() {
    let Some(db) = test_db().await else { return };
    let org_a = create_org(&db, true).await;
    let org_b = create_org(&db, true).await;

    for org in [&org_a, &org_b] {
        let phone = unique_phone();
        send(&db, org, &phone, "faktura").await;
        send(&db, org, &phone, "12345678").await;
        send(&db, org, &phone, "Práce|1|100").await;
        send(&db, org, &phone, "hotovo").await;
        send(&db, org, &phone, "2025-06-01").await;
        let outcome = send(&db, org, &phone, "ano").await;
        let invoice = outcome.invoice.expect("invoice should be created");
        // Each fresh organization starts its own 2025 sequence at 1.
        assert_eq!(invoice.invoice_number, "2025-00001");
    }
}

#[tokio::test]
async fn invalid_input_replies_without_losing_state() {
    let Some(db) = test_db().await else { return };
    let org = create_org(&db, true).await;
    let phone = unique_phone();

    send(&db, &org, &phone, "faktura").await;

    let outcome = send(&db, &org, &phone, "tohle není ičo").await;
    assert!(outcome.replies[0].contains("IČO"));

    send(&db, &org, &phone, "12345678").await;

    let outcome = send(&db, &org, &phone, "špatný řádek").await;
    assert!(outcome.replies[0].contains("popis|množství|cena"));

    let outcome = send(&db, &org, &phone, "hotovo").await;
    assert!(outcome.replies[0].contains("alespoň jednu položku"));

    // The turn above failed validation only; real input still works.
    let outcome = send(&db, &org, &phone, "Konzultace|2|500").await;
    assert!(outcome.replies[0].contains("1. Konzultace"));
}

#[tokio::test]
async fn second_invoice_same_year_increments_sequence() {
    let Some(db) = test_db().await else { return };
    let org = create_org(&db, true).await;
    let phone = unique_phone();

    for expected in ["2025-00001", "2025-00002"] {
        send(&db, &org, &phone, "faktura").await;
        send(&db, &org, &phone, "12345678").await;
        send(&db, &org, &phone, "Práce|1|100").await;
        send(&db, &org, &phone, "hotovo").await;
        send(&db, &org, &phone, "2025-06-01").await;
        let outcome = send(&db, &org, &phone, "ano").await;
        assert_eq!(outcome.invoice.unwrap().invoice_number, expected);
    }
}

#[tokio::test]
async fn idle_trigger_is_substring_and_case_insensitive() {
    let Some(db) = test_db().await else { return };
    let org = create_org(&db, true).await;
    let phone = unique_phone();

    let outcome = send(&db, &org, &phone, "ahoj").await;
    assert!(outcome.replies[0].contains("Vítej"));

    let outcome = send(&db, &org, &phone, "Nová FAKTURA prosím").await;
    assert!(outcome.replies[0].contains("IČO"));
}

#[tokio::test]
async fn sequence_year_follows_issue_date() {
    let Some(db) = test_db().await else { return };
    let org = create_org(&db, true).await;
    let phone = unique_phone();

    send(&db, &org, &phone, "faktura").await;
    send(&db, &org, &phone, "12345678").await;
    send(&db, &org, &phone, "Práce|1|100").await;
    send(&db, &org, &phone, "hotovo").await;
    send(&db, &org, &phone, "2024-12-31").await;
    let outcome = send(&db, &org, &phone, "ano").await;

    let invoice = outcome.invoice.unwrap();
    assert!(invoice.invoice_number.starts_with("2024-"));
    assert_eq!(
        whatsapp_service::services::numbering::parse_invoice_number(&invoice.invoice_number)
            .unwrap()
            .0,
        2024
    );
}
