//! PostPilot Billing Service
//!
//! Webhook intake, idempotent event processing, and subscription lifecycle
//! handling for PostPilot.

use std::sync::Arc;

use clap::Parser;
use tower_http::trace::TraceLayer;

use postpilot_billing::billing::{AccountDirectory, DirectoryBillingHandler, PlanCatalog};
use postpilot_billing::handlers::{status_router, ServiceState};
use postpilot_billing::webhook::{
    webhook_router, EventProcessor, InMemoryIdempotencyStore, LoggingUpdateHandler, WebhookConfig,
    WebhookState,
};

/// PostPilot Billing Service
#[derive(Parser, Debug)]
#[command(name = "pp-billing")]
#[command(author = "PostPilot Team <eng@postpilot.app>")]
#[command(version)]
#[command(about = "Webhook event-integrity service for PostPilot billing")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Host to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> postpilot_billing::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = if args.verbose { "debug" } else { "info" };

    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = WebhookConfig::from_env()?;
    tracing::info!(?config, "Configuration loaded");

    let store = Arc::new(InMemoryIdempotencyStore::new());
    let directory = Arc::new(AccountDirectory::new());
    let catalog = PlanCatalog::from_env();
    if catalog.is_empty() {
        tracing::warn!("No Stripe price IDs configured; all subscriptions will map to free tier");
    }

    let billing_handler = Arc::new(DirectoryBillingHandler::new(directory, catalog));
    let metrics = Arc::new(ServiceState::new());

    let (processor, processor_handle) = EventProcessor::new(
        billing_handler,
        store.clone(),
        metrics.clone(),
        config.clone(),
    );
    tokio::spawn(async move { processor_handle.run().await });

    let webhook_state = Arc::new(WebhookState::new(
        config,
        store,
        processor,
        Arc::new(LoggingUpdateHandler),
        metrics.clone(),
    ));

    let app = webhook_router(webhook_state)
        .merge(status_router(metrics))
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("PostPilot billing service listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install ctrl-c handler");
        return;
    }
    tracing::info!("Shutdown signal received");
}
