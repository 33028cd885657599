use service_core::observability::init_tracing;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use whatsapp_service::config::ServiceConfig;
use whatsapp_service::services::metrics::init_metrics;
use whatsapp_service::services::providers::{
    MessageGateway, MessagingProvider, MessengerProvider, MockMessengerProvider,
    MockWhatsAppProvider, WhatsAppProvider,
};
use whatsapp_service::services::{Database, DocumentRenderer, HtmlRenderer};
use whatsapp_service::startup::{build_router, AppState};

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    init_tracing("whatsapp-service", "info");
    init_metrics();

    let config = ServiceConfig::load().map_err(|e| {
        tracing::error!("Failed to load configuration: {}", e);
        std::io::Error::other(format!("Configuration error: {}", e))
    })?;

    let db = Database::new(
        &config.database.url,
        config.database.max_connections,
        config.database.min_connections,
    )
    .await
    .map_err(|e| {
        tracing::error!("Failed to connect to PostgreSQL: {}", e);
        std::io::Error::other(format!("Database connection error: {}", e))
    })?;

    db.run_migrations().await.map_err(|e| {
        tracing::error!("Failed to run migrations: {}", e);
        std::io::Error::other(format!("Migration error: {}", e))
    })?;

    let whatsapp: Arc<dyn MessagingProvider> =
        if config.whatsapp.enabled && !config.whatsapp.access_token.is_empty() {
            tracing::info!("WhatsApp Cloud API provider initialized");
            Arc::new(WhatsAppProvider::new(config.whatsapp.clone()))
        } else {
            tracing::info!("WhatsApp provider disabled, using mock");
            Arc::new(MockWhatsAppProvider::new(true))
        };

    let messenger: Arc<dyn MessagingProvider> =
        if config.messenger.enabled && !config.messenger.access_token.is_empty() {
            tracing::info!("Messenger provider initialized");
            Arc::new(MessengerProvider::new(config.messenger.clone()))
        } else {
            tracing::info!("Messenger provider disabled, using mock");
            Arc::new(MockMessengerProvider::new(true))
        };

    let renderer: Arc<dyn DocumentRenderer> =
        Arc::new(HtmlRenderer::new(config.storage.document_dir.clone()));

    let state = AppState {
        config: config.clone(),
        db,
        gateway: MessageGateway::new(whatsapp, messenger),
        renderer,
    };

    let router = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        tracing::error!("Failed to bind listener to {}: {}", addr, e);
        e
    })?;
    tracing::info!("whatsapp-service listening on port {}", config.common.port);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
}
