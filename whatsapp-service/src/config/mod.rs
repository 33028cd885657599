use serde::Deserialize;
use service_core::config as core_config;
use service_core::config::get_env;
use service_core::error::AppError;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub database: DatabaseConfig,
    pub whatsapp: WhatsAppConfig,
    pub messenger: MessengerConfig,
    pub rate_limit: RateLimitConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WhatsAppConfig {
    pub api_base_url: String,
    pub api_version: String,
    pub access_token: String,
    /// Meta app secret; signs webhook payloads.
    pub app_secret: String,
    /// Token echoed back during the webhook subscription handshake.
    pub verify_token: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessengerConfig {
    pub api_base_url: String,
    pub api_version: String,
    pub access_token: String,
    pub page_id: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub messages_per_minute: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub document_dir: String,
}

impl ServiceConfig {
    pub fn load() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;
        let is_prod = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string()) == "prod";

        Ok(ServiceConfig {
            common: common_config,
            database: DatabaseConfig {
                url: get_env("DATABASE_URL", None, is_prod)?,
                max_connections: get_env("DATABASE_MAX_CONNECTIONS", Some("10"), is_prod)?
                    .parse()
                    .unwrap_or(10),
                min_connections: get_env("DATABASE_MIN_CONNECTIONS", Some("1"), is_prod)?
                    .parse()
                    .unwrap_or(1),
            },
            whatsapp: WhatsAppConfig {
                api_base_url: get_env(
                    "WHATSAPP_API_BASE_URL",
                    Some("https://graph.facebook.com"),
                    is_prod,
                )?,
                api_version: get_env("WHATSAPP_API_VERSION", Some("v19.0"), is_prod)?,
                access_token: get_env("WHATSAPP_ACCESS_TOKEN", Some(""), is_prod)?,
                app_secret: get_env("WHATSAPP_APP_SECRET", Some(""), is_prod)?,
                verify_token: get_env("WHATSAPP_VERIFY_TOKEN", Some(""), is_prod)?,
                enabled: env::var("WHATSAPP_ENABLED")
                    .unwrap_or_else(|_| "false".to_string())
                    .parse()
                    .unwrap_or(false),
            },
            messenger: MessengerConfig {
                api_base_url: get_env(
                    "MESSENGER_API_BASE_URL",
                    Some("https://graph.facebook.com"),
                    is_prod,
                )?,
                api_version: get_env("MESSENGER_API_VERSION", Some("v19.0"), is_prod)?,
                access_token: get_env("MESSENGER_ACCESS_TOKEN", Some(""), is_prod)?,
                page_id: get_env("MESSENGER_PAGE_ID", Some(""), is_prod)?,
                enabled: env::var("MESSENGER_ENABLED")
                    .unwrap_or_else(|_| "false".to_string())
                    .parse()
                    .unwrap_or(false),
            },
            rate_limit: RateLimitConfig {
                messages_per_minute: get_env("RATE_LIMIT_MESSAGES_PER_MINUTE", Some("10"), is_prod)?
                    .parse()
                    .unwrap_or(10),
            },
            storage: StorageConfig {
                document_dir: get_env("DOCUMENT_STORAGE_DIR", Some("./data/invoices"), is_prod)?,
            },
        })
    }
}
