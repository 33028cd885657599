//! Prometheus metrics for whatsapp-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, HistogramVec, TextEncoder,
};

/// Inbound webhook messages by channel and outcome.
pub static WEBHOOK_MESSAGES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "whatsapp_webhook_messages_total",
        "Inbound webhook messages by outcome",
        &["channel", "outcome"] // processed, duplicate, throttled, failed
    )
    .expect("Failed to register webhook_messages_total")
});

/// Invoices created through the conversational flow.
pub static INVOICES_CREATED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "whatsapp_invoices_created_total",
        "Invoices created via the chat flow by channel",
        &["channel"]
    )
    .expect("Failed to register invoices_created_total")
});

/// Outbound provider sends by channel, kind and status.
pub static OUTBOUND_SENDS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "whatsapp_outbound_sends_total",
        "Outbound messages by kind and status",
        &["channel", "kind", "status"] // kind: text, document
    )
    .expect("Failed to register outbound_sends_total")
});

/// Database query duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "whatsapp_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register db_query_duration")
});

/// Full conversation-turn duration histogram.
pub static TURN_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "whatsapp_turn_duration_seconds",
        "Conversation turn duration in seconds",
        &["channel"],
        vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .expect("Failed to register turn_duration")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&WEBHOOK_MESSAGES_TOTAL);
    Lazy::force(&INVOICES_CREATED_TOTAL);
    Lazy::force(&OUTBOUND_SENDS_TOTAL);
    Lazy::force(&DB_QUERY_DURATION);
    Lazy::force(&TURN_DURATION);
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}
