//! Conversational invoice-creation engine.
//!
//! One inbound message is one turn. A turn runs inside a single database
//! transaction: dedup marker, rate-limit accounting, the conversation row
//! lock, the state transition, and (on confirmation) the invoice rows all
//! commit or roll back together. Recoverable input problems are handled
//! before any failing statement reaches the database, so they turn into chat
//! replies instead of aborting the transaction.
//!
//! The wizard speaks Czech:
//! `faktura` starts it, then client (IČO or `nový` + name + city), then
//! `popis|množství|cena` item lines closed with `hotovo`, then issue/due
//! dates, then `ano`/`ne`.

use crate::models::{
    ClientRef, ConversationState, CreatedInvoice, DraftItem, Organization,
};
use crate::services::database::{Database, NewInvoice};
use crate::services::metrics::{
    INVOICES_CREATED_TOTAL, TURN_DURATION, WEBHOOK_MESSAGES_TOTAL,
};
use crate::services::numbering::{format_invoice_number, next_sequence, variable_symbol};
use crate::services::providers::Channel;
use crate::services::renderer::{DocumentRenderer, InvoiceDocumentData};
use crate::services::totals::{calculate_invoice_totals, format_currency};
use chrono::{Datelike, Days, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::{Acquire, PgConnection};
use tracing::{info, instrument, warn};

const MSG_GREETING: &str = "👋 Vítej v BussApp! Napiš 'faktura' pro zahájení.";
const MSG_CANCELLED: &str = "❌ Proces zrušen. Napiš \"faktura\" pro začátek.";
const MSG_THROTTLED: &str = "⚠️ Příliš mnoho zpráv. Zkus to za chvíli.";
const MSG_CLIENT_PROMPT: &str = "Komu fakturujeme? Zadej IČO (8 číslic), nebo napiš \
    'nový' a na další řádky jméno a město.";
const MSG_CLIENT_INVALID: &str = "To nevypadá jako IČO ani nový klient. Zadej IČO \
    (8 číslic), nebo napiš 'nový' a na další řádky jméno a město.";
const MSG_NEW_CLIENT_NEEDS_NAME: &str = "Napiš 'nový' a na další řádek jméno klienta \
    (a případně město na třetí řádek).";
const MSG_CLIENT_SAVE_FAILED: &str = "Klienta se nepodařilo uložit. Zkus to prosím znovu.";
const MSG_ITEMS_PROMPT: &str = "Přidej položky ve formátu popis|množství|cena (každou \
    na nový řádek). Až budeš hotov, napiš 'hotovo'.";
const MSG_NEED_ITEM: &str = "Přidej alespoň jednu položku před dokončením.";
const MSG_DATES_PROMPT: &str = "Skvělé! Zadej datum vystavení (YYYY-MM-DD), případně \
    i splatnost: YYYY-MM-DD|YYYY-MM-DD. Bez splatnosti platí 14 dní.";
const MSG_CONFIRM_PROMPT: &str = "Odpověz 'ano' pro odeslání faktury nebo 'ne' pro \
    úpravu položek.";
const MSG_EDIT_ITEMS: &str = "OK, můžeš upravit položky. Přidej další řádky \
    popis|množství|cena, nebo napiš 'hotovo'.";

const ERR_ITEM_FORMAT: &str = "Formát položek: popis|množství|cena";
const ERR_ITEM_DESCRIPTION: &str = "Popis položky je povinný";
const ERR_ITEM_QUANTITY: &str = "Množství musí být kladné číslo";
const ERR_ITEM_PRICE: &str = "Cena musí být kladné číslo";
const ERR_DATE_FORMAT: &str = "Datum musí být ve formátu YYYY-MM-DD";
const ERR_DATE_INVALID: &str = "Datum je neplatné";
const ERR_DATE_ORDER: &str = "Datum splatnosti nesmí předcházet datu vystavení";

static ICO_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{8}$").expect("ICO regex is valid"));
static ISO_DATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("date regex is valid"));

const DEFAULT_DUE_DAYS: u64 = 14;

/// A normalized inbound chat message, channel-agnostic.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub channel: Channel,
    /// Sending identity for the reply (WhatsApp phone-number id).
    pub phone_number_id: Option<String>,
    /// Sender phone (WhatsApp) or page-scoped user id (Messenger).
    pub from: String,
    pub message_id: String,
    pub text: String,
}

/// What the webhook dispatcher sends back after a turn.
#[derive(Debug, Default)]
pub struct TurnOutcome {
    pub replies: Vec<String>,
    pub invoice: Option<CreatedInvoice>,
}

/// Tunables the engine reads per turn.
#[derive(Debug, Clone)]
pub struct FlowSettings {
    pub messages_per_minute: i64,
}

/// Process one inbound message for its organization.
///
/// Returns the replies to deliver; delivery happens outside the transaction
/// so a slow or failing provider never holds the conversation lock.
#[instrument(
    skip(db, renderer, settings, org, msg),
    fields(organization_id = %org.organization_id, channel = msg.channel.as_str())
)]
pub async fn handle_incoming_message(
    db: &Database,
    renderer: &dyn DocumentRenderer,
    settings: &FlowSettings,
    org: &Organization,
    msg: &InboundMessage,
) -> Result<TurnOutcome, AppError> {
    let timer = TURN_DURATION
        .with_label_values(&[msg.channel.as_str()])
        .start_timer();

    let text = msg.text.trim();
    if text.is_empty() {
        timer.observe_duration();
        return Ok(TurnOutcome::default());
    }

    let mut tx = db.pool().begin().await.map_err(|e| {
        AppError::DatabaseError(anyhow::anyhow!("Failed to begin turn transaction: {}", e))
    })?;

    if !db.insert_message_marker(&mut tx, &msg.message_id).await? {
        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit turn: {}", e))
        })?;
        WEBHOOK_MESSAGES_TOTAL
            .with_label_values(&[msg.channel.as_str(), "duplicate"])
            .inc();
        info!(message_id = %msg.message_id, "Duplicate delivery absorbed");
        timer.observe_duration();
        return Ok(TurnOutcome::default());
    }

    if !db
        .check_rate_limit(&mut tx, &msg.from, settings.messages_per_minute)
        .await?
    {
        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit turn: {}", e))
        })?;
        WEBHOOK_MESSAGES_TOTAL
            .with_label_values(&[msg.channel.as_str(), "throttled"])
            .inc();
        timer.observe_duration();
        return Ok(TurnOutcome {
            replies: vec![MSG_THROTTLED.to_string()],
            invoice: None,
        });
    }

    let conversation = db
        .lock_or_create_conversation(&mut tx, org.organization_id, &msg.from)
        .await?;

    let state = match conversation.decode_state() {
        Ok(state) => state,
        Err(e) => {
            warn!(
                conversation_id = %conversation.conversation_id,
                error = %e,
                "Unreadable conversation context, resetting to idle"
            );
            ConversationState::Idle
        }
    };

    let mut outcome = TurnOutcome::default();

    let next_state = if is_cancel(text) {
        outcome.replies.push(MSG_CANCELLED.to_string());
        ConversationState::Idle
    } else {
        advance(db, renderer, org, msg, &mut tx, state, text, &mut outcome).await?
    };

    db.update_conversation(
        &mut tx,
        conversation.conversation_id,
        &next_state,
        &msg.message_id,
    )
    .await?;

    tx.commit()
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to commit turn: {}", e)))?;

    WEBHOOK_MESSAGES_TOTAL
        .with_label_values(&[msg.channel.as_str(), "processed"])
        .inc();
    timer.observe_duration();

    Ok(outcome)
}

/// One state-machine step. Pure input handling happens before any statement
/// that could fail, so user mistakes never poison the transaction.
#[allow(clippy::too_many_arguments)]
async fn advance(
    db: &Database,
    renderer: &dyn DocumentRenderer,
    org: &Organization,
    msg: &InboundMessage,
    tx: &mut PgConnection,
    state: ConversationState,
    text: &str,
    outcome: &mut TurnOutcome,
) -> Result<ConversationState, AppError> {
    match state {
        ConversationState::Idle => {
            if text.to_lowercase().contains("faktura") {
                outcome.replies.push(MSG_CLIENT_PROMPT.to_string());
                Ok(ConversationState::AwaitingClient)
            } else {
                outcome.replies.push(MSG_GREETING.to_string());
                Ok(ConversationState::Idle)
            }
        }

        ConversationState::AwaitingClient => {
            let input = match parse_client_input(text) {
                Ok(input) => input,
                Err(problem) => {
                    outcome.replies.push(problem);
                    return Ok(ConversationState::AwaitingClient);
                }
            };

            // Savepoint: a failed client write rolls back to here and turns
            // into a reply, leaving the rest of the turn committable.
            let mut sp = (&mut *tx).begin().await.map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to open savepoint: {}", e))
            })?;

            let (result, greeting) = match &input {
                ClientInput::Ico(ico) => (
                    db.get_or_create_client_by_ico(&mut sp, org.organization_id, ico)
                        .await,
                    "Klient",
                ),
                ClientInput::New { name, city } => (
                    db.insert_client(&mut sp, org.organization_id, name, None, city.as_deref())
                        .await,
                    "Nový klient",
                ),
            };

            match result {
                Ok(client) => {
                    sp.commit().await.map_err(|e| {
                        AppError::DatabaseError(anyhow::anyhow!(
                            "Failed to commit savepoint: {}",
                            e
                        ))
                    })?;

                    outcome.replies.push(format!(
                        "{}: {}. {}",
                        greeting, client.name, MSG_ITEMS_PROMPT
                    ));
                    Ok(ConversationState::AwaitingItems {
                        client: ClientRef {
                            client_id: client.client_id,
                            name: client.name,
                            city: client.address_city,
                        },
                        items: Vec::new(),
                    })
                }
                Err(e) => {
                    warn!(error = %e, "Client lookup/creation failed, re-prompting");
                    sp.rollback().await.ok();
                    outcome.replies.push(MSG_CLIENT_SAVE_FAILED.to_string());
                    Ok(ConversationState::AwaitingClient)
                }
            }
        }

        ConversationState::AwaitingItems { client, mut items } => {
            if text.eq_ignore_ascii_case("hotovo") {
                if items.is_empty() {
                    outcome.replies.push(MSG_NEED_ITEM.to_string());
                    return Ok(ConversationState::AwaitingItems { client, items });
                }
                outcome.replies.push(MSG_DATES_PROMPT.to_string());
                return Ok(ConversationState::AwaitingDates { client, items });
            }

            match parse_items(text, org.default_vat_rate) {
                Ok(new_items) => {
                    items.extend(new_items);
                    let summary = format_items_summary(
                        &items,
                        &org.default_currency,
                        org.charges_vat(),
                    );
                    outcome.replies.push(format!(
                        "{}\nPřidej další položky, nebo napiš 'hotovo'.",
                        summary
                    ));
                }
                Err(problem) => outcome.replies.push(problem),
            }
            Ok(ConversationState::AwaitingItems { client, items })
        }

        ConversationState::AwaitingDates { client, items } => match parse_dates(text) {
            Ok((issue_date, due_date)) => {
                let totals = calculate_invoice_totals(&items, org.charges_vat());
                outcome.replies.push(format!(
                    "Shrnutí faktury:\nKlient: {}\n{}\nVystavení: {}, splatnost: {}\nCelkem: {}\n{}",
                    client.name,
                    format_items_summary(&items, &org.default_currency, org.charges_vat()),
                    issue_date.format("%Y-%m-%d"),
                    due_date.format("%Y-%m-%d"),
                    format_currency(totals.total, &org.default_currency),
                    MSG_CONFIRM_PROMPT
                ));
                Ok(ConversationState::Confirm {
                    client,
                    items,
                    issue_date,
                    due_date,
                })
            }
            Err(problem) => {
                outcome.replies.push(problem);
                Ok(ConversationState::AwaitingDates { client, items })
            }
        },

        ConversationState::Confirm {
            client,
            items,
            issue_date,
            due_date,
        } => {
            if is_affirmative(text) {
                let created = create_invoice(
                    db, renderer, org, msg, tx, &client, &items, issue_date, due_date,
                )
                .await?;

                outcome.replies.push(format!(
                    "✅ Faktura {} vytvořena!\nCelkem: {}\nVariabilní symbol: {}",
                    created.invoice_number,
                    format_currency(created.total, &created.currency),
                    created.variable_symbol
                ));
                outcome.invoice = Some(created);
                Ok(ConversationState::Idle)
            } else if is_negative(text) {
                outcome.replies.push(MSG_EDIT_ITEMS.to_string());
                Ok(ConversationState::AwaitingItems { client, items })
            } else {
                outcome.replies.push(MSG_CONFIRM_PROMPT.to_string());
                Ok(ConversationState::Confirm {
                    client,
                    items,
                    issue_date,
                    due_date,
                })
            }
        }
    }
}

/// Allocate the number, persist invoice and items, render and store the
/// document, and write the audit trail. Runs on the turn transaction; any
/// error rolls the whole turn back.
#[allow(clippy::too_many_arguments)]
async fn create_invoice(
    db: &Database,
    renderer: &dyn DocumentRenderer,
    org: &Organization,
    msg: &InboundMessage,
    tx: &mut PgConnection,
    client: &ClientRef,
    items: &[DraftItem],
    issue_date: NaiveDate,
    due_date: NaiveDate,
) -> Result<CreatedInvoice, AppError> {
    let channel = msg.channel;
    let totals = calculate_invoice_totals(items, org.charges_vat());
    let year = issue_date.year();

    let seq = next_sequence(tx, org.organization_id, year).await?;
    let invoice_number = format_invoice_number(&org.invoice_prefix, year, seq);
    let variable_symbol = variable_symbol(&invoice_number)?;

    let invoice_id = db
        .insert_invoice(
            tx,
            &NewInvoice {
                organization_id: org.organization_id,
                client_id: client.client_id,
                invoice_number: invoice_number.clone(),
                variable_symbol: variable_symbol.clone(),
                issue_date,
                due_date,
                currency: org.default_currency.clone(),
                subtotal: totals.subtotal,
                vat_amount: totals.vat_amount,
                total: totals.total,
                created_via: channel.as_str().to_string(),
            },
        )
        .await?;

    db.insert_invoice_items(tx, invoice_id, &totals.items).await?;

    let client_record = db.get_client(tx, client.client_id).await?;
    let rendered = renderer
        .render_and_store(&InvoiceDocumentData {
            organization: org.clone(),
            client: client_record,
            invoice_number: invoice_number.clone(),
            variable_symbol: variable_symbol.clone(),
            issue_date,
            due_date,
            currency: org.default_currency.clone(),
            items: totals.items.clone(),
            subtotal: totals.subtotal,
            vat_amount: totals.vat_amount,
            total: totals.total,
        })
        .await?;

    db.set_invoice_document(tx, invoice_id, &rendered.path).await?;

    db.insert_audit_log(
        tx,
        org.organization_id,
        "invoice",
        invoice_id,
        "created",
        serde_json::json!({
            "invoice_number": invoice_number,
            "total": totals.total,
            "currency": org.default_currency,
            "created_via": channel.as_str(),
            "whatsapp_phone": msg.from,
        }),
    )
    .await?;

    INVOICES_CREATED_TOTAL
        .with_label_values(&[channel.as_str()])
        .inc();

    info!(
        invoice_number = %invoice_number,
        total = %totals.total,
        "Invoice created via chat flow"
    );

    Ok(CreatedInvoice {
        invoice_id,
        invoice_number,
        variable_symbol,
        client_name: client.name.clone(),
        total: totals.total,
        currency: org.default_currency.clone(),
        document_path: rendered.path,
        document: rendered.bytes,
    })
}

// -----------------------------------------------------------------------------
// Input parsing (pure)
// -----------------------------------------------------------------------------

#[derive(Debug)]
enum ClientInput {
    Ico(String),
    New { name: String, city: Option<String> },
}

fn parse_client_input(text: &str) -> Result<ClientInput, String> {
    let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());
    let first = lines.next().ok_or_else(|| MSG_CLIENT_INVALID.to_string())?;

    if ICO_RE.is_match(first) {
        return Ok(ClientInput::Ico(first.to_string()));
    }

    let keyword = first.to_lowercase();
    if keyword == "nový" || keyword == "novy" {
        let name = lines
            .next()
            .ok_or_else(|| MSG_NEW_CLIENT_NEEDS_NAME.to_string())?;
        let city = lines.next().map(str::to_string);
        return Ok(ClientInput::New {
            name: name.to_string(),
            city,
        });
    }

    Err(MSG_CLIENT_INVALID.to_string())
}

/// Parse a decimal accepting the Czech comma separator.
fn parse_decimal(raw: &str) -> Option<Decimal> {
    raw.trim().replace(',', ".").parse().ok()
}

/// Parse pipe-delimited item lines: `popis|množství|cena[|DPH]`.
///
/// All-or-nothing per message: one malformed line rejects the whole batch so
/// the sender can resend it corrected.
pub fn parse_items(text: &str, default_vat_rate: Decimal) -> Result<Vec<DraftItem>, String> {
    let mut items = Vec::new();

    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let parts: Vec<&str> = line.split('|').map(str::trim).collect();
        if parts.len() < 3 || parts.len() > 4 {
            return Err(ERR_ITEM_FORMAT.to_string());
        }

        let description = parts[0];
        if description.is_empty() {
            return Err(ERR_ITEM_DESCRIPTION.to_string());
        }
        if description.chars().count() > 500 {
            return Err("Popis položky je příliš dlouhý (max 500 znaků)".to_string());
        }

        let quantity = parse_decimal(parts[1]).filter(|q| *q > Decimal::ZERO);
        let Some(quantity) = quantity else {
            return Err(ERR_ITEM_QUANTITY.to_string());
        };

        let unit_price = parse_decimal(parts[2]).filter(|p| *p > Decimal::ZERO);
        let Some(unit_price) = unit_price else {
            return Err(ERR_ITEM_PRICE.to_string());
        };

        let vat_rate = match parts.get(3) {
            Some(raw) => parse_decimal(raw)
                .filter(|r| *r >= Decimal::ZERO && *r <= Decimal::from(100))
                .ok_or_else(|| "Sazba DPH musí být mezi 0 a 100 %".to_string())?,
            None => default_vat_rate,
        };

        items.push(DraftItem {
            description: description.to_string(),
            quantity,
            unit_price,
            vat_rate,
            unit: "ks".to_string(),
        });
    }

    if items.is_empty() {
        return Err(ERR_ITEM_FORMAT.to_string());
    }

    Ok(items)
}

fn parse_one_date(raw: &str) -> Result<NaiveDate, String> {
    if !ISO_DATE_RE.is_match(raw) {
        return Err(ERR_DATE_FORMAT.to_string());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| ERR_DATE_INVALID.to_string())
}

/// Parse `YYYY-MM-DD` or `YYYY-MM-DD|YYYY-MM-DD`; a missing due date
/// defaults to issue + 14 days.
pub fn parse_dates(text: &str) -> Result<(NaiveDate, NaiveDate), String> {
    let parts: Vec<&str> = text.split('|').map(str::trim).collect();

    match parts.as_slice() {
        [issue] => {
            let issue_date = parse_one_date(issue)?;
            let due_date = issue_date
                .checked_add_days(Days::new(DEFAULT_DUE_DAYS))
                .ok_or_else(|| ERR_DATE_INVALID.to_string())?;
            Ok((issue_date, due_date))
        }
        [issue, due] => {
            let issue_date = parse_one_date(issue)?;
            let due_date = parse_one_date(due)?;
            if due_date < issue_date {
                return Err(ERR_DATE_ORDER.to_string());
            }
            Ok((issue_date, due_date))
        }
        _ => Err(ERR_DATE_FORMAT.to_string()),
    }
}

fn normalize_keyword(text: &str) -> String {
    text.trim().to_lowercase()
}

pub fn is_cancel(text: &str) -> bool {
    matches!(normalize_keyword(text).as_str(), "zrušit" | "zrusit" | "cancel")
}

pub fn is_affirmative(text: &str) -> bool {
    matches!(normalize_keyword(text).as_str(), "ano" | "jo" | "yes")
}

pub fn is_negative(text: &str) -> bool {
    matches!(normalize_keyword(text).as_str(), "ne" | "no")
}

/// Numbered item list with a running total, sent back after each batch.
pub fn format_items_summary(items: &[DraftItem], currency: &str, charges_vat: bool) -> String {
    let totals = calculate_invoice_totals(items, charges_vat);

    let mut lines: Vec<String> = totals
        .items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            format!(
                "{}. {} ({} {} x {}) = {}",
                i + 1,
                item.description,
                item.quantity,
                item.unit,
                format_currency(item.unit_price, currency),
                format_currency(item.total, currency),
            )
        })
        .collect();

    if charges_vat {
        lines.push(format!(
            "Mezisoučet: {} + DPH {} = {}",
            format_currency(totals.subtotal, currency),
            format_currency(totals.vat_amount, currency),
            format_currency(totals.total, currency),
        ));
    } else {
        lines.push(format!(
            "Mezisoučet: {}",
            format_currency(totals.total, currency)
        ));
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn parses_single_item_line() {
        let items = parse_items("Konzultace|2|500", dec("21")).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].description, "Konzultace");
        assert_eq!(items[0].quantity, dec("2"));
        assert_eq!(items[0].unit_price, dec("500"));
        assert_eq!(items[0].vat_rate, dec("21"));
        assert_eq!(items[0].unit, "ks");
    }

    #[test]
    fn parses_multiple_lines_with_explicit_vat() {
        let items = parse_items("Práce|1|1000|12\nMateriál|3,5|99,90", dec("21")).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].vat_rate, dec("12"));
        assert_eq!(items[1].quantity, dec("3.5"));
        assert_eq!(items[1].unit_price, dec("99.90"));
        assert_eq!(items[1].vat_rate, dec("21"));
    }

    #[test]
    fn item_parsing_is_all_or_nothing() {
        let result = parse_items("Dobrá|1|100\nŠpatná|0|100", dec("21"));
        assert_eq!(result.unwrap_err(), ERR_ITEM_QUANTITY);
    }

    #[test]
    fn rejects_malformed_item_lines() {
        assert_eq!(parse_items("jen popis", dec("21")).unwrap_err(), ERR_ITEM_FORMAT);
        assert_eq!(
            parse_items("a|b|c|d|e", dec("21")).unwrap_err(),
            ERR_ITEM_FORMAT
        );
        assert_eq!(parse_items("", dec("21")).unwrap_err(), ERR_ITEM_FORMAT);
        assert_eq!(
            parse_items("|2|500", dec("21")).unwrap_err(),
            ERR_ITEM_DESCRIPTION
        );
        assert_eq!(
            parse_items("x|dva|500", dec("21")).unwrap_err(),
            ERR_ITEM_QUANTITY
        );
        assert_eq!(
            parse_items("x|2|-5", dec("21")).unwrap_err(),
            ERR_ITEM_PRICE
        );
    }

    #[test]
    fn single_date_defaults_due_to_fourteen_days() {
        let (issue, due) = parse_dates("2025-01-15").unwrap();
        assert_eq!(issue, NaiveDate::from_ymd_opt(2025, 1, 15).unwrap());
        assert_eq!(due, NaiveDate::from_ymd_opt(2025, 1, 29).unwrap());
    }

    #[test]
    fn explicit_due_date_is_honored() {
        let (issue, due) = parse_dates("2025-01-15|2025-02-28").unwrap();
        assert_eq!(issue, NaiveDate::from_ymd_opt(2025, 1, 15).unwrap());
        assert_eq!(due, NaiveDate::from_ymd_opt(2025, 2, 28).unwrap());
    }

    #[test]
    fn rejects_bad_dates() {
        assert_eq!(parse_dates("15.1.2025").unwrap_err(), ERR_DATE_FORMAT);
        assert_eq!(parse_dates("2025-13-40").unwrap_err(), ERR_DATE_INVALID);
        assert_eq!(
            parse_dates("2025-01-15|2025-01-10").unwrap_err(),
            ERR_DATE_ORDER
        );
        assert_eq!(parse_dates("a|b|c").unwrap_err(), ERR_DATE_FORMAT);
    }

    #[test]
    fn due_date_may_equal_issue_date() {
        let (issue, due) = parse_dates("2025-01-15|2025-01-15").unwrap();
        assert_eq!(issue, due);
    }

    #[test]
    fn cancel_keywords_with_and_without_diacritics() {
        assert!(is_cancel("zrušit"));
        assert!(is_cancel("zrusit"));
        assert!(is_cancel("  CANCEL  "));
        assert!(is_cancel("Zrušit"));
        assert!(!is_cancel("zrušit prosím"));
    }

    #[test]
    fn confirmation_keywords() {
        assert!(is_affirmative("ano"));
        assert!(is_affirmative("Jo"));
        assert!(is_affirmative("YES"));
        assert!(!is_affirmative("ano!"));

        assert!(is_negative("ne"));
        assert!(is_negative("No"));
        assert!(!is_negative("nevím"));
    }

    #[test]
    fn client_input_accepts_ico() {
        match parse_client_input("12345678").unwrap() {
            ClientInput::Ico(ico) => assert_eq!(ico, "12345678"),
            _ => panic!("expected ICO"),
        }
    }

    #[test]
    fn client_input_accepts_new_client_lines() {
        match parse_client_input("nový\nJan Novák\nPraha").unwrap() {
            ClientInput::New { name, city } => {
                assert_eq!(name, "Jan Novák");
                assert_eq!(city.as_deref(), Some("Praha"));
            }
            _ => panic!("expected new client"),
        }

        match parse_client_input("NOVY\nFirma s.r.o.").unwrap() {
            ClientInput::New { name, city } => {
                assert_eq!(name, "Firma s.r.o.");
                assert_eq!(city, None);
            }
            _ => panic!("expected new client"),
        }
    }

    #[test]
    fn client_input_rejects_garbage() {
        assert_eq!(
            parse_client_input("1234567").unwrap_err(),
            MSG_CLIENT_INVALID
        );
        assert_eq!(
            parse_client_input("123456789").unwrap_err(),
            MSG_CLIENT_INVALID
        );
        assert_eq!(
            parse_client_input("nový").unwrap_err(),
            MSG_NEW_CLIENT_NEEDS_NAME
        );
    }

    #[test]
    fn items_summary_shows_running_total() {
        let items = parse_items("Konzultace|2|500", dec("21")).unwrap();
        let summary = format_items_summary(&items, "CZK", true);

        assert!(summary.contains("1. Konzultace"));
        assert!(summary.contains("1 210,00 CZK"));
        assert!(summary.contains("DPH"));
    }

    #[test]
    fn items_summary_hides_vat_for_non_payer() {
        let items = parse_items("Konzultace|2|500", dec("21")).unwrap();
        let summary = format_items_summary(&items, "CZK", false);

        assert!(summary.contains("1 000,00 CZK"));
        assert!(!summary.contains("DPH"));
    }
}
