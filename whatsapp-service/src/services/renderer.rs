//! Invoice document rendering and storage.
//!
//! The chat flow renders an HTML invoice document at confirmation time and
//! persists it under `{storage_dir}/{organization_id}/{year}/`. Rendering is
//! behind a trait so tests can swap in a mock and skip the filesystem.

use crate::models::{Client, Organization};
use crate::services::numbering::parse_invoice_number;
use crate::services::totals::{format_currency, CalculatedItem};
use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use service_core::error::AppError;
use std::path::PathBuf;
use tracing::{info, instrument};

/// Everything needed to render one invoice document.
#[derive(Debug, Clone)]
pub struct InvoiceDocumentData {
    pub organization: Organization,
    pub client: Client,
    pub invoice_number: String,
    pub variable_symbol: String,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub currency: String,
    pub items: Vec<CalculatedItem>,
    pub subtotal: Decimal,
    pub vat_amount: Decimal,
    pub total: Decimal,
}

/// A rendered document plus where it was stored.
#[derive(Debug, Clone)]
pub struct RenderedDocument {
    pub bytes: Vec<u8>,
    pub path: String,
    pub filename: String,
    pub mime_type: String,
}

#[async_trait]
pub trait DocumentRenderer: Send + Sync {
    /// Render the document and persist it to durable storage.
    async fn render_and_store(
        &self,
        data: &InvoiceDocumentData,
    ) -> Result<RenderedDocument, AppError>;
}

/// Renders a self-contained HTML invoice and writes it to local disk.
pub struct HtmlRenderer {
    storage_dir: PathBuf,
}

impl HtmlRenderer {
    pub fn new(storage_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage_dir: storage_dir.into(),
        }
    }

    fn render_html(data: &InvoiceDocumentData) -> String {
        let org = &data.organization;
        let charges_vat = org.charges_vat();

        let mut rows = String::new();
        for (index, item) in data.items.iter().enumerate() {
            rows.push_str(&format!(
                "<tr><td>{}</td><td>{}</td><td class=\"num\">{} {}</td>\
                 <td class=\"num\">{}</td><td class=\"num\">{} %</td>\
                 <td class=\"num\">{}</td></tr>\n",
                index + 1,
                escape_html(&item.description),
                item.quantity,
                escape_html(&item.unit),
                format_currency(item.unit_price, &data.currency),
                item.vat_rate,
                format_currency(item.total, &data.currency),
            ));
        }

        let dic_line = match &org.dic {
            Some(dic) => format!("<br>DIČ: {}", escape_html(dic)),
            None => String::new(),
        };
        let client_ico_line = match &data.client.ico {
            Some(ico) => format!("<br>IČO: {}", escape_html(ico)),
            None => String::new(),
        };
        let client_city_line = match &data.client.address_city {
            Some(city) => format!("<br>{}", escape_html(city)),
            None => String::new(),
        };

        let vat_block = if charges_vat {
            format!(
                "<tr><td>Základ daně</td><td class=\"num\">{}</td></tr>\n\
                 <tr><td>DPH</td><td class=\"num\">{}</td></tr>\n",
                format_currency(data.subtotal, &data.currency),
                format_currency(data.vat_amount, &data.currency),
            )
        } else {
            "<tr><td colspan=\"2\">Dodavatel není plátcem DPH.</td></tr>\n".to_string()
        };

        format!(
            r#"<!DOCTYPE html>
<html lang="cs">
<head>
<meta charset="utf-8">
<title>Faktura {number}</title>
<style>
body {{ font-family: sans-serif; margin: 2em; color: #222; }}
h1 {{ font-size: 1.4em; }}
table {{ border-collapse: collapse; width: 100%; margin-top: 1em; }}
th, td {{ border: 1px solid #ccc; padding: 0.4em 0.6em; text-align: left; }}
td.num {{ text-align: right; }}
.total {{ font-size: 1.2em; font-weight: bold; }}
.parties {{ display: flex; gap: 4em; }}
</style>
</head>
<body>
<h1>Faktura {number}</h1>
<div class="parties">
<div>
<h2>Dodavatel</h2>
<p>{org_name}<br>{street}<br>{zip} {city}<br>IČO: {org_ico}{dic_line}</p>
</div>
<div>
<h2>Odběratel</h2>
<p>{client_name}{client_ico_line}{client_city_line}</p>
</div>
</div>
<p>Datum vystavení: {issue_date}<br>
Datum splatnosti: {due_date}<br>
Variabilní symbol: {variable_symbol}</p>
<table>
<thead><tr><th>#</th><th>Popis</th><th>Množství</th><th>Cena/j.</th><th>DPH</th><th>Celkem</th></tr></thead>
<tbody>
{rows}</tbody>
</table>
<table>
{vat_block}<tr class="total"><td>Celkem k úhradě</td><td class="num">{grand_total}</td></tr>
</table>
</body>
</html>
"#,
            number = escape_html(&data.invoice_number),
            org_name = escape_html(&org.name),
            street = escape_html(&org.address_street),
            zip = escape_html(&org.address_zip),
            city = escape_html(&org.address_city),
            org_ico = escape_html(&org.ico),
            dic_line = dic_line,
            client_name = escape_html(&data.client.name),
            client_ico_line = client_ico_line,
            client_city_line = client_city_line,
            issue_date = data.issue_date.format("%d.%m.%Y"),
            due_date = data.due_date.format("%d.%m.%Y"),
            variable_symbol = escape_html(&data.variable_symbol),
            rows = rows,
            vat_block = vat_block,
            grand_total = format_currency(data.total, &data.currency),
        )
    }
}

#[async_trait]
impl DocumentRenderer for HtmlRenderer {
    #[instrument(skip(self, data), fields(invoice_number = %data.invoice_number))]
    async fn render_and_store(
        &self,
        data: &InvoiceDocumentData,
    ) -> Result<RenderedDocument, AppError> {
        let html = Self::render_html(data);
        let bytes = html.into_bytes();

        let (year, _) = parse_invoice_number(&data.invoice_number)?;
        let filename = format!("{}.html", data.invoice_number);

        let dir = self
            .storage_dir
            .join(data.organization.organization_id.to_string())
            .join(year.to_string());
        tokio::fs::create_dir_all(&dir).await?;

        let full_path = dir.join(&filename);
        tokio::fs::write(&full_path, &bytes).await?;

        let path = full_path.to_string_lossy().into_owned();

        info!(path = %path, bytes = bytes.len(), "Invoice document stored");

        Ok(RenderedDocument {
            bytes,
            path,
            filename,
            mime_type: "text/html".to_string(),
        })
    }
}

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Mock renderer for tests; never touches the filesystem.
pub struct MockRenderer;

#[async_trait]
impl DocumentRenderer for MockRenderer {
    async fn render_and_store(
        &self,
        data: &InvoiceDocumentData,
    ) -> Result<RenderedDocument, AppError> {
        Ok(RenderedDocument {
            bytes: format!("mock document for {}", data.invoice_number).into_bytes(),
            path: format!("/tmp/mock/{}.html", data.invoice_number),
            filename: format!("{}.html", data.invoice_number),
            mime_type: "text/html".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn sample_data(is_vat_payer: bool) -> InvoiceDocumentData {
        let org_id = Uuid::new_v4();
        InvoiceDocumentData {
            organization: Organization {
                organization_id: org_id,
                name: "Živnostník s.r.o.".to_string(),
                ico: "87654321".to_string(),
                dic: is_vat_payer.then(|| "CZ87654321".to_string()),
                is_vat_payer,
                address_street: "Dlouhá 12".to_string(),
                address_city: "Praha".to_string(),
                address_zip: "110 00".to_string(),
                address_country: "CZ".to_string(),
                default_currency: "CZK".to_string(),
                default_vat_rate: dec("21"),
                invoice_prefix: String::new(),
                whatsapp_phone_id: None,
                whatsapp_business_account_id: None,
            },
            client: Client {
                client_id: Uuid::new_v4(),
                organization_id: org_id,
                name: "Jan <Novák>".to_string(),
                ico: Some("12345678".to_string()),
                address_city: Some("Brno".to_string()),
                created_utc: chrono::Utc::now(),
            },
            invoice_number: "2025-00001".to_string(),
            variable_symbol: "0202500001".to_string(),
            issue_date: NaiveDate::from_ymd_opt(2025, 1, 15).unwrap(),
            due_date: NaiveDate::from_ymd_opt(2025, 1, 29).unwrap(),
            currency: "CZK".to_string(),
            items: vec![CalculatedItem {
                description: "Konzultace".to_string(),
                quantity: dec("2"),
                unit: "ks".to_string(),
                unit_price: dec("500"),
                vat_rate: dec("21"),
                subtotal: dec("1000.00"),
                vat_amount: dec("210.00"),
                total: dec("1210.00"),
            }],
            subtotal: dec("1000.00"),
            vat_amount: dec("210.00"),
            total: dec("1210.00"),
        }
    }

    #[test]
    fn html_contains_invoice_facts() {
        let html = HtmlRenderer::render_html(&sample_data(true));

        assert!(html.contains("Faktura 2025-00001"));
        assert!(html.contains("0202500001"));
        assert!(html.contains("Konzultace"));
        assert!(html.contains("1 210,00 CZK"));
        assert!(html.contains("15.01.2025"));
        assert!(html.contains("DIČ: CZ87654321"));
    }

    #[test]
    fn html_escapes_user_supplied_text() {
        let html = HtmlRenderer::render_html(&sample_data(true));
        assert!(html.contains("Jan &lt;Novák&gt;"));
        assert!(!html.contains("Jan <Novák>"));
    }

    #[test]
    fn non_vat_payer_gets_disclaimer_instead_of_vat_lines() {
        let html = HtmlRenderer::render_html(&sample_data(false));
        assert!(html.contains("není plátcem DPH"));
        assert!(!html.contains("Základ daně"));
    }

    #[tokio::test]
    async fn renderer_writes_under_org_and_year() {
        let dir = std::env::temp_dir().join(format!("invoices-test-{}", Uuid::new_v4()));
        let renderer = HtmlRenderer::new(&dir);
        let data = sample_data(true);

        let rendered = renderer.render_and_store(&data).await.unwrap();

        assert!(rendered.path.contains(&data.organization.organization_id.to_string()));
        assert!(rendered.path.contains("2025"));
        assert!(rendered.path.ends_with("2025-00001.html"));

        let on_disk = tokio::fs::read(&rendered.path).await.unwrap();
        assert_eq!(on_disk, rendered.bytes);

        tokio::fs::remove_dir_all(&dir).await.ok();
    }
}
