//! PaidIn HTTP Server
//!
//! Axum server exposing the payment pipeline: wallet funding, swaps,
//! payouts, bank linking, invoicing, provider webhooks and admin tooling.

mod config;
mod handlers;
mod state;

use std::sync::Arc;

use anyhow::Context;
use axum::{
    Router,
    routing::{delete, get, post},
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use paidin_core::{MemoryPaymentStore, PaymentStore, SecretBox};
use paidin_pipeline::{JobQueue, Lane, MemoryBroker, Pipeline, Providers, WorkerConfig};
use paidin_providers::{
    BreezClient, BreezConfig, InvoicingBackend, PlaidApi, PlaidClient, PlaidConfig,
    SandboxProviders, StrikeClient, StripeClient, WebhookVerifier,
};

use crate::config::{Config, QueueSetting};
use crate::handlers::{
    create_invoice, create_payout, create_swap, failed_jobs, fund_wallet, health_check,
    invoice_status, list_webhooks, payment_status, plaid_exchange, plaid_link_token,
    plaid_remove_account, provider_webhook, replay_webhook, sync_wallet, transaction_history,
    wallet_balance,
};
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    tracing::debug!(?config, "Loaded configuration");

    let secrets = SecretBox::new(&config.encryption_key).context("invalid PAIDIN_ENCRYPTION_KEY")?;
    let store: Arc<dyn PaymentStore> = Arc::new(MemoryPaymentStore::new());

    // Providers
    let (providers, plaid) = if config.sandbox {
        tracing::warn!("⚠ Sandbox mode - no real money moves");
        let sandbox = SandboxProviders::new(store.clone(), &secrets);
        (Providers::sandbox(&sandbox), sandbox.plaid.clone() as Arc<dyn PlaidApi>)
    } else {
        let plaid: Arc<dyn PlaidApi> = Arc::new(
            PlaidClient::new(PlaidConfig::from_env()?, store.clone(), secrets.clone())
                .context("failed to build Plaid client")?,
        );
        let providers = Providers {
            plaid: plaid.clone(),
            stripe: Arc::new(StripeClient::from_env().context("failed to build Stripe client")?),
            strike: Arc::new(StrikeClient::from_env().context("failed to build Strike client")?),
            breez: Arc::new(
                BreezClient::new(BreezConfig::from_env()?, store.clone(), secrets.clone())
                    .context("failed to build Breez client")?,
            ),
        };
        tracing::info!("✓ Live providers configured");
        (providers, plaid)
    };

    // Invoicing
    let invoicing = match InvoicingBackend::from_env()? {
        Some(backend) => {
            let service = backend.build()?;
            tracing::info!("✓ Invoicing via {}", service.provider());
            Some(service)
        }
        None => {
            tracing::warn!("⚠ Invoicing not configured - /api/invoices disabled");
            tracing::warn!("  Set INVOICING_PROVIDER in .env");
            None
        }
    };

    // Job queue
    let queue = match &config.queue {
        QueueSetting::Memory => JobQueue::new(Arc::new(MemoryBroker::new())),
        QueueSetting::Redis(url) => redis_queue(url).await,
        QueueSetting::Disabled => JobQueue::disabled(),
    }
    .with_funding_delay(config.funding_delay);

    let pipeline = Pipeline::new(store, providers, queue, WebhookVerifier::from_env());

    let workers = pipeline
        .workers(WorkerConfig::default())
        .map(|pool| Arc::new(pool).spawn(&Lane::ALL));
    if workers.is_some() {
        tracing::info!("✓ Workers started on {} lanes", Lane::ALL.len());
    }

    // Build application state
    let state = AppState {
        pipeline,
        plaid,
        invoicing,
        admin_token: config.admin_token.as_deref().map(Arc::from),
    };
    if state.admin_token.is_none() {
        tracing::warn!("⚠ PAIDIN_ADMIN_TOKEN not set - admin routes closed");
    }

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;

    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("🚀 paidin-server running on http://{}", config.bind_addr);
    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("  Queue: {}", config.queue_mode());

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(workers) = workers {
        tracing::info!("Stopping workers");
        workers.shutdown().await;
    }

    Ok(())
}

/// Build the router over shared state
pub fn app(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health
        .route("/health", get(health_check))

        // Money movement
        .route("/api/wallets/fund", post(fund_wallet))
        .route("/api/wallets/balance", get(wallet_balance))
        .route("/api/swaps", post(create_swap))
        .route("/api/payouts", post(create_payout))
        .route("/api/payments/{payment_intent_id}", get(payment_status))
        .route("/api/transactions", get(transaction_history))

        // Bank linking
        .route("/api/plaid/link-token", post(plaid_link_token))
        .route("/api/plaid/exchange", post(plaid_exchange))
        .route("/api/plaid/accounts/{id}", delete(plaid_remove_account))

        // Invoicing
        .route("/api/invoices", post(create_invoice))
        .route("/api/invoices/{id}", get(invoice_status))

        // Provider callbacks
        .route("/webhooks/{provider}", post(provider_webhook))

        // Admin
        .route("/admin/webhooks", get(list_webhooks))
        .route("/admin/webhooks/{provider}/{event_id}/replay", post(replay_webhook))
        .route("/admin/jobs/{lane}/failed", get(failed_jobs))
        .route("/admin/wallets/{id}/sync", post(sync_wallet))

        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(feature = "redis")]
async fn redis_queue(url: &str) -> JobQueue {
    match paidin_pipeline::RedisBroker::connect(url, None).await {
        Ok(broker) => JobQueue::new(Arc::new(broker)),
        Err(e) => {
            tracing::warn!(error = %e, "⚠ Redis unavailable - running without a job queue");
            JobQueue::disabled()
        }
    }
}

#[cfg(not(feature = "redis"))]
#[allow(clippy::unused_async)]
async fn redis_queue(_url: &str) -> JobQueue {
    tracing::warn!("⚠ QUEUE_URL points at Redis but the redis feature is off");
    JobQueue::disabled()
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}
