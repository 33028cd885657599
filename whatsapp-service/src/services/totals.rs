//! Invoice totals engine.
//!
//! Rounding is half-up to 2 decimal places and is applied per item before
//! summation. Invoice-level figures are sums of already-rounded item values;
//! re-rounding only the final sum would drift from the persisted per-item
//! amounts.

use crate::models::DraftItem;
use rust_decimal::{Decimal, RoundingStrategy};

/// A line item with computed amounts.
#[derive(Debug, Clone, PartialEq)]
pub struct CalculatedItem {
    pub description: String,
    pub quantity: Decimal,
    pub unit: String,
    pub unit_price: Decimal,
    pub vat_rate: Decimal,
    pub subtotal: Decimal,
    pub vat_amount: Decimal,
    pub total: Decimal,
}

/// Invoice-level breakdown.
#[derive(Debug, Clone, PartialEq)]
pub struct InvoiceTotals {
    pub subtotal: Decimal,
    pub vat_amount: Decimal,
    pub total: Decimal,
    pub items: Vec<CalculatedItem>,
}

/// Round to 2 decimal places, half-up (currency rounding).
pub fn round_currency(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

fn calculate_item(item: &DraftItem, effective_vat_rate: Decimal) -> CalculatedItem {
    let subtotal = round_currency(item.quantity * item.unit_price);
    let vat_amount = round_currency(subtotal * effective_vat_rate / Decimal::from(100));
    let total = round_currency(subtotal + vat_amount);

    CalculatedItem {
        description: item.description.clone(),
        quantity: item.quantity,
        unit: item.unit.clone(),
        unit_price: item.unit_price,
        vat_rate: effective_vat_rate,
        subtotal,
        vat_amount,
        total,
    }
}

/// Compute the invoice breakdown for an ordered item list.
///
/// A non-VAT-payer organization forces every effective VAT rate to zero,
/// regardless of the rate carried by the item.
pub fn calculate_invoice_totals(items: &[DraftItem], is_vat_payer: bool) -> InvoiceTotals {
    let calculated: Vec<CalculatedItem> = items
        .iter()
        .map(|item| {
            let effective_rate = if is_vat_payer {
                item.vat_rate
            } else {
                Decimal::ZERO
            };
            calculate_item(item, effective_rate)
        })
        .collect();

    let subtotal = calculated.iter().map(|i| i.subtotal).sum();
    let vat_amount = calculated.iter().map(|i| i.vat_amount).sum();
    let total = calculated.iter().map(|i| i.total).sum();

    InvoiceTotals {
        subtotal,
        vat_amount,
        total,
        items: calculated,
    }
}

/// Validate a draft item, returning human-readable problems.
///
/// Used as a pre-check by callers that assemble items outside the chat
/// grammar; the conversation engine validates at parse time instead.
pub fn validate_item(item: &DraftItem) -> Vec<String> {
    let mut errors = Vec::new();

    if item.quantity <= Decimal::ZERO {
        errors.push("Množství musí být kladné číslo".to_string());
    }
    if item.quantity > Decimal::from(999_999) {
        errors.push("Množství je příliš velké".to_string());
    }
    if item.unit_price <= Decimal::ZERO {
        errors.push("Jednotková cena musí být kladné číslo".to_string());
    }
    if item.unit_price > Decimal::from(9_999_999) {
        errors.push("Jednotková cena je příliš velká".to_string());
    }
    if item.vat_rate < Decimal::ZERO || item.vat_rate > Decimal::from(100) {
        errors.push("Sazba DPH musí být mezi 0 a 100 %".to_string());
    }
    if item.description.trim().is_empty() {
        errors.push("Popis položky je povinný".to_string());
    }
    if item.description.chars().count() > 500 {
        errors.push("Popis položky je příliš dlouhý (max 500 znaků)".to_string());
    }

    errors
}

/// Format an amount in the Czech style: `1 210,00 CZK`.
pub fn format_currency(amount: Decimal, currency: &str) -> String {
    let rounded = round_currency(amount);
    let negative = rounded.is_sign_negative();
    let plain = rounded.abs().to_string();

    let (int_part, frac_part) = match plain.split_once('.') {
        Some((i, f)) => (i.to_string(), format!("{:0<2}", f)),
        None => (plain, "00".to_string()),
    };

    let mut grouped = String::new();
    let digits: Vec<char> = int_part.chars().collect();
    for (i, c) in digits.iter().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(' ');
        }
        grouped.push(*c);
    }

    let sign = if negative { "-" } else { "" };
    format!("{}{},{} {}", sign, grouped, frac_part, currency)
}
