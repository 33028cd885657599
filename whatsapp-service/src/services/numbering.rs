//! Invoice numbering and payment variable symbols.
//!
//! Sequences are allocated per (organization, year) with a single upsert
//! statement so concurrent invoice creation never hands out the same number.

use once_cell::sync::Lazy;
use regex::Regex;
use service_core::error::AppError;
use sqlx::PgConnection;
use uuid::Uuid;

/// Matches the `YYYY-NNNNN` core of an invoice number, wherever the prefix
/// put it.
static NUMBER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{4})-(\d{5})").expect("invoice number regex is valid"));

/// Atomically increment and return the sequence for (organization, year).
///
/// Runs on the caller's transaction; the upsert increments-or-initializes in
/// one statement to avoid lost updates under concurrency.
pub async fn next_sequence(
    conn: &mut PgConnection,
    organization_id: Uuid,
    year: i32,
) -> Result<i64, AppError> {
    let seq: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO invoice_counters (organization_id, year, last_seq)
        VALUES ($1, $2, 1)
        ON CONFLICT (organization_id, year)
        DO UPDATE SET last_seq = invoice_counters.last_seq + 1,
                      updated_utc = NOW()
        RETURNING last_seq
        "#,
    )
    .bind(organization_id)
    .bind(year)
    .fetch_one(conn)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to allocate sequence: {}", e)))?;

    Ok(seq)
}

/// Format an invoice number: `{prefix}{year}-{seq:05}`.
///
/// `("", 2025, 1)` -> `2025-00001`; `("FV-", 2025, 123)` -> `FV-2025-00123`.
pub fn format_invoice_number(prefix: &str, year: i32, seq: i64) -> String {
    format!("{}{}-{:05}", prefix, year, seq)
}

/// Derive the bank-transfer variable symbol from an invoice number.
///
/// Concatenates the 4-digit year and 5-digit sequence and left-pads to
/// 10 digits: `2025-00001` -> `0202500001`.
pub fn variable_symbol(invoice_number: &str) -> Result<String, AppError> {
    let caps = NUMBER_RE.captures(invoice_number).ok_or_else(|| {
        AppError::InvalidFormat(format!("Invalid invoice number format: {}", invoice_number))
    })?;

    let vs = format!("{}{}", &caps[1], &caps[2]);
    Ok(format!("{:0>10}", vs))
}

/// Recover (year, seq) from a formatted invoice number.
pub fn parse_invoice_number(invoice_number: &str) -> Result<(i32, i64), AppError> {
    let caps = NUMBER_RE.captures(invoice_number).ok_or_else(|| {
        AppError::InvalidFormat(format!("Invalid invoice number format: {}", invoice_number))
    })?;

    let year: i32 = caps[1]
        .parse()
        .map_err(|_| AppError::InvalidFormat(format!("Invalid year in: {}", invoice_number)))?;
    let seq: i64 = caps[2]
        .parse()
        .map_err(|_| AppError::InvalidFormat(format!("Invalid sequence in: {}", invoice_number)))?;

    Ok((year, seq))
}
