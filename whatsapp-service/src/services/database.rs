//! Database service for whatsapp-service.
//!
//! Turn-scoped operations take a `&mut PgConnection` so they run on the
//! caller's transaction; the conversation row lock acquired there serializes
//! concurrent turns for the same (organization, phone).

use crate::models::{
    Client, ConversationRow, ConversationState, Invoice, InvoiceItem, InvoiceStatus, Organization,
};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::totals::CalculatedItem;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::PgConnection;
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

const CONVERSATION_COLUMNS: &str = "conversation_id, organization_id, whatsapp_phone, state, \
     context, last_message_id, timeout_at, updated_utc";

const ORGANIZATION_COLUMNS: &str = "organization_id, name, ico, dic, is_vat_payer, \
     address_street, address_city, address_zip, address_country, default_currency, \
     default_vat_rate, invoice_prefix, whatsapp_phone_id, whatsapp_business_account_id";

const INVOICE_COLUMNS: &str = "invoice_id, organization_id, client_id, invoice_number, \
     variable_symbol, status, issue_date, due_date, currency, subtotal, vat_amount, total, \
     created_via, notes, document_path, sent_at, created_utc";

/// Fields for a new invoice row, inserted in `draft` status.
#[derive(Debug, Clone)]
pub struct NewInvoice {
    pub organization_id: Uuid,
    pub client_id: Uuid,
    pub invoice_number: String,
    pub variable_symbol: String,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub currency: String,
    pub subtotal: Decimal,
    pub vat_amount: Decimal,
    pub total: Decimal,
    pub created_via: String,
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "whatsapp-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Organization Routing
    // -------------------------------------------------------------------------

    /// Resolve the organization owning an inbound message, first by the
    /// WhatsApp phone-number id, then by the Messenger business-account id.
    #[instrument(skip(self))]
    pub async fn find_organization_by_routing(
        &self,
        phone_number_id: Option<&str>,
        business_account_id: Option<&str>,
    ) -> Result<Option<Organization>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_organization"])
            .start_timer();

        if let Some(phone_id) = phone_number_id {
            let org = sqlx::query_as::<_, Organization>(&format!(
                "SELECT {ORGANIZATION_COLUMNS} FROM organizations WHERE whatsapp_phone_id = $1 LIMIT 1"
            ))
            .bind(phone_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to resolve organization: {}", e))
            })?;

            if org.is_some() {
                timer.observe_duration();
                return Ok(org);
            }
        }

        if let Some(business_id) = business_account_id {
            let org = sqlx::query_as::<_, Organization>(&format!(
                "SELECT {ORGANIZATION_COLUMNS} FROM organizations \
                 WHERE whatsapp_business_account_id = $1 LIMIT 1"
            ))
            .bind(business_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to resolve organization: {}", e))
            })?;

            timer.observe_duration();
            return Ok(org);
        }

        timer.observe_duration();
        Ok(None)
    }

    // -------------------------------------------------------------------------
    // Dedup Markers & Rate Limits
    // -------------------------------------------------------------------------

    /// Record a processed message id. Returns `false` when the id was already
    /// present, signalling a duplicate delivery to absorb.
    pub async fn insert_message_marker(
        &self,
        conn: &mut PgConnection,
        message_id: &str,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            "INSERT INTO wa_message_cache (message_id) VALUES ($1) ON CONFLICT DO NOTHING",
        )
        .bind(message_id)
        .execute(conn)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to insert dedup marker: {}", e))
        })?;

        Ok(result.rows_affected() > 0)
    }

    /// Count one message for the sender's current minute bucket and check the
    /// trailing-window total against the ceiling. Returns whether the sender
    /// is still admitted.
    pub async fn check_rate_limit(
        &self,
        conn: &mut PgConnection,
        phone: &str,
        per_minute_ceiling: i64,
    ) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["check_rate_limit"])
            .start_timer();

        sqlx::query(
            r#"
            INSERT INTO wa_rate_limits (whatsapp_phone, window_start, message_count)
            VALUES ($1, date_trunc('minute', NOW()), 1)
            ON CONFLICT (whatsapp_phone, window_start)
            DO UPDATE SET message_count = wa_rate_limits.message_count + 1,
                          updated_utc = NOW()
            "#,
        )
        .bind(phone)
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to count rate-limit unit: {}", e))
        })?;

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(message_count), 0)::bigint
            FROM wa_rate_limits
            WHERE whatsapp_phone = $1
              AND window_start >= date_trunc('minute', NOW() - interval '1 minute')
            "#,
        )
        .bind(phone)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to sum rate-limit window: {}", e))
        })?;

        timer.observe_duration();

        Ok(total <= per_minute_ceiling)
    }

    // -------------------------------------------------------------------------
    // Conversation Store
    // -------------------------------------------------------------------------

    /// Load the conversation for (organization, phone) under an exclusive row
    /// lock, creating it lazily in the idle state on first contact. The lock
    /// is held until the surrounding transaction ends.
    #[instrument(skip(self, conn), fields(organization_id = %organization_id))]
    pub async fn lock_or_create_conversation(
        &self,
        conn: &mut PgConnection,
        organization_id: Uuid,
        phone: &str,
    ) -> Result<ConversationRow, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["lock_conversation"])
            .start_timer();

        let existing = sqlx::query_as::<_, ConversationRow>(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM wa_conversations \
             WHERE organization_id = $1 AND whatsapp_phone = $2 FOR UPDATE"
        ))
        .bind(organization_id)
        .bind(phone)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to lock conversation: {}", e))
        })?;

        if let Some(row) = existing {
            timer.observe_duration();
            return Ok(row);
        }

        let idle = serde_json::to_value(ConversationState::Idle)
            .map_err(|e| AppError::InternalError(anyhow::anyhow!(e)))?;

        let row = sqlx::query_as::<_, ConversationRow>(&format!(
            "INSERT INTO wa_conversations (organization_id, whatsapp_phone, state, context) \
             VALUES ($1, $2, 'idle', $3) \
             RETURNING {CONVERSATION_COLUMNS}"
        ))
        .bind(organization_id)
        .bind(phone)
        .bind(idle)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to create conversation: {}", e))
        })?;

        timer.observe_duration();

        info!(conversation_id = %row.conversation_id, "Conversation created");

        Ok(row)
    }

    /// Persist the outcome of a turn: new state/context, the processed
    /// message id, and a cleared timeout marker.
    pub async fn update_conversation(
        &self,
        conn: &mut PgConnection,
        conversation_id: Uuid,
        state: &ConversationState,
        last_message_id: &str,
    ) -> Result<(), AppError> {
        let context = serde_json::to_value(state)
            .map_err(|e| AppError::InternalError(anyhow::anyhow!(e)))?;

        sqlx::query(
            r#"
            UPDATE wa_conversations
            SET state = $2, context = $3, last_message_id = $4,
                timeout_at = NULL, updated_utc = NOW()
            WHERE conversation_id = $1
            "#,
        )
        .bind(conversation_id)
        .bind(state.name())
        .bind(context)
        .bind(last_message_id)
        .execute(conn)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to update conversation: {}", e))
        })?;

        Ok(())
    }

    // -------------------------------------------------------------------------
    // Client Operations
    // -------------------------------------------------------------------------

    /// Look up a client by ICO within the organization, creating a
    /// placeholder record when none exists yet.
    #[instrument(skip(self, conn), fields(organization_id = %organization_id))]
    pub async fn get_or_create_client_by_ico(
        &self,
        conn: &mut PgConnection,
        organization_id: Uuid,
        ico: &str,
    ) -> Result<Client, AppError> {
        let existing = sqlx::query_as::<_, Client>(
            "SELECT client_id, organization_id, name, ico, address_city, created_utc \
             FROM clients WHERE organization_id = $1 AND ico = $2 LIMIT 1",
        )
        .bind(organization_id)
        .bind(ico)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to look up client: {}", e)))?;

        if let Some(client) = existing {
            return Ok(client);
        }

        let placeholder_name = format!("Klient {}", ico);
        self.insert_client(conn, organization_id, &placeholder_name, Some(ico), None)
            .await
    }

    /// Fetch a client by id.
    pub async fn get_client(
        &self,
        conn: &mut PgConnection,
        client_id: Uuid,
    ) -> Result<Client, AppError> {
        sqlx::query_as::<_, Client>(
            "SELECT client_id, organization_id, name, ico, address_city, created_utc \
             FROM clients WHERE client_id = $1",
        )
        .bind(client_id)
        .fetch_optional(conn)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to fetch client: {}", e)))?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Client not found: {}", client_id)))
    }

    /// Insert a client record.
    pub async fn insert_client(
        &self,
        conn: &mut PgConnection,
        organization_id: Uuid,
        name: &str,
        ico: Option<&str>,
        city: Option<&str>,
    ) -> Result<Client, AppError> {
        let client = sqlx::query_as::<_, Client>(
            r#"
            INSERT INTO clients (organization_id, name, ico, address_city)
            VALUES ($1, $2, $3, $4)
            RETURNING client_id, organization_id, name, ico, address_city, created_utc
            "#,
        )
        .bind(organization_id)
        .bind(name)
        .bind(ico)
        .bind(city)
        .fetch_one(conn)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to create client: {}", e)))?;

        info!(client_id = %client.client_id, "Client created");

        Ok(client)
    }

    // -------------------------------------------------------------------------
    // Invoice Operations
    // -------------------------------------------------------------------------

    /// Insert a draft invoice and return its id.
    #[instrument(skip(self, conn, input), fields(organization_id = %input.organization_id))]
    pub async fn insert_invoice(
        &self,
        conn: &mut PgConnection,
        input: &NewInvoice,
    ) -> Result<Uuid, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_invoice"])
            .start_timer();

        let invoice_id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO invoices (
                organization_id, client_id, invoice_number, variable_symbol,
                status, issue_date, due_date, currency, subtotal, vat_amount, total,
                created_via
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING invoice_id
            "#,
        )
        .bind(input.organization_id)
        .bind(input.client_id)
        .bind(&input.invoice_number)
        .bind(&input.variable_symbol)
        .bind(InvoiceStatus::Draft.as_str())
        .bind(input.issue_date)
        .bind(input.due_date)
        .bind(&input.currency)
        .bind(input.subtotal)
        .bind(input.vat_amount)
        .bind(input.total)
        .bind(&input.created_via)
        .fetch_one(conn)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to create invoice: {}", e)))?;

        timer.observe_duration();

        info!(invoice_id = %invoice_id, invoice_number = %input.invoice_number, "Invoice created");

        Ok(invoice_id)
    }

    /// Insert the ordered, pre-computed invoice lines.
    pub async fn insert_invoice_items(
        &self,
        conn: &mut PgConnection,
        invoice_id: Uuid,
        items: &[CalculatedItem],
    ) -> Result<(), AppError> {
        for (index, item) in items.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO invoice_items (
                    invoice_id, position, description, quantity, unit,
                    unit_price, vat_rate, subtotal, vat_amount, total
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                "#,
            )
            .bind(invoice_id)
            .bind(index as i32 + 1)
            .bind(&item.description)
            .bind(item.quantity)
            .bind(&item.unit)
            .bind(item.unit_price)
            .bind(item.vat_rate)
            .bind(item.subtotal)
            .bind(item.vat_amount)
            .bind(item.total)
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to insert invoice item: {}", e))
            })?;
        }

        Ok(())
    }

    /// Record the stored document path on the invoice.
    pub async fn set_invoice_document(
        &self,
        conn: &mut PgConnection,
        invoice_id: Uuid,
        document_path: &str,
    ) -> Result<(), AppError> {
        sqlx::query("UPDATE invoices SET document_path = $2 WHERE invoice_id = $1")
            .bind(invoice_id)
            .bind(document_path)
            .execute(conn)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to set document path: {}", e))
            })?;

        Ok(())
    }

    /// Promote an invoice to `sent` after confirmed document delivery.
    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn mark_invoice_sent(&self, invoice_id: Uuid) -> Result<(), AppError> {
        sqlx::query("UPDATE invoices SET status = $2, sent_at = NOW() WHERE invoice_id = $1")
            .bind(invoice_id)
            .bind(InvoiceStatus::Sent.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to mark invoice sent: {}", e))
            })?;

        info!(invoice_id = %invoice_id, "Invoice marked sent");

        Ok(())
    }

    /// Fetch an invoice by id.
    pub async fn get_invoice(&self, invoice_id: Uuid) -> Result<Invoice, AppError> {
        sqlx::query_as::<_, Invoice>(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices WHERE invoice_id = $1"
        ))
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to fetch invoice: {}", e)))?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found: {}", invoice_id)))
    }

    /// Fetch the lines of an invoice in display order.
    pub async fn get_invoice_items(&self, invoice_id: Uuid) -> Result<Vec<InvoiceItem>, AppError> {
        sqlx::query_as::<_, InvoiceItem>(
            "SELECT invoice_item_id, invoice_id, position, description, quantity, unit, \
             unit_price, vat_rate, subtotal, vat_amount, total, created_utc \
             FROM invoice_items WHERE invoice_id = $1 ORDER BY position",
        )
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to fetch invoice items: {}", e))
        })
    }

    // -------------------------------------------------------------------------
    // Audit Log
    // -------------------------------------------------------------------------

    /// Append an audit-log entry.
    pub async fn insert_audit_log(
        &self,
        conn: &mut PgConnection,
        organization_id: Uuid,
        entity_type: &str,
        entity_id: Uuid,
        action: &str,
        changes: serde_json::Value,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO audit_log (organization_id, user_id, entity_type, entity_id, action, changes)
            VALUES ($1, NULL, $2, $3, $4, $5)
            "#,
        )
        .bind(organization_id)
        .bind(entity_type)
        .bind(entity_id)
        .bind(action)
        .bind(changes)
        .execute(conn)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to write audit log: {}", e))
        })?;

        Ok(())
    }
}
