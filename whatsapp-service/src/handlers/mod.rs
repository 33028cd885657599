//! HTTP handlers for whatsapp-service.

pub mod health;
pub mod webhook;

pub use health::{health_check, metrics_endpoint, readiness_check};
pub use webhook::{receive_webhook, verify_webhook};
