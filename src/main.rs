//! x402 facilitator HTTP entrypoint.
//!
//! Endpoints:
//! - `POST /verify` – Verify a payment envelope against its requirements
//! - `POST /settle` – Submit a verified payment on-chain
//! - `GET /receipt` – Settlement status of a submitted transaction
//! - `GET /permitnonce` – Current EIP-2612 nonce of an owner
//! - `GET /markup` – Markup charged for cross-chain sends
//! - `GET /supported` – Configured (scheme, network) pairs
//!
//! Environment:
//! - `.env` values loaded at startup
//! - `CONFIG` (or `--config`) points at the JSON configuration
//! - `RUST_LOG` filters logs, `OTEL_*` variables enable OTLP export

use axum::Router;
use axum::http::Method;
use dotenvy::dotenv;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::task::TaskTracker;
use tower_http::cors;

use sx402::chain::ChainRegistry;
use sx402::config::Config;
use sx402::facilitator_local::FacilitatorLocal;
use sx402::handlers;
use sx402::scheme::SchemeRegistry;
use sx402::tracker::{ReceiptStore, SettlementTracker};
use sx402::util::{SigDown, Telemetry};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    let telemetry = Telemetry::init()?;

    let config = Config::load()?;

    let chain_registry = ChainRegistry::from_config(config.chains(), config.signer()).await?;
    let scheme_registry = SchemeRegistry::build(config.schemes());
    for scheme in scheme_registry.values() {
        if chain_registry.by_network(&scheme.network).is_none() {
            tracing::warn!(scheme = %scheme.name, network = %scheme.network, "Scheme configured for a network without a chain; it will not be offered");
        }
    }

    let sig_down = SigDown::try_new()?;
    let task_tracker = TaskTracker::new();

    let receipts = ReceiptStore::new();
    SettlementTracker::new(receipts.clone(), chain_registry.clone(), config.tracker())
        .spawn(&task_tracker, sig_down.cancellation_token());
    task_tracker.close();

    let facilitator = FacilitatorLocal::new(scheme_registry, chain_registry, receipts);
    let axum_state = Arc::new(facilitator);

    let http_endpoints = Router::new()
        .merge(handlers::routes().with_state(axum_state))
        .layer(telemetry.http_tracing())
        .layer(
            cors::CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers(cors::Any),
        );

    let addr = SocketAddr::new(config.host(), config.port());
    tracing::info!("Starting server at http://{}", addr);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    let axum_cancellation_token = sig_down.cancellation_token();
    let axum_graceful_shutdown = async move { axum_cancellation_token.cancelled().await };
    axum::serve(listener, http_endpoints)
        .with_graceful_shutdown(axum_graceful_shutdown)
        .await?;

    sig_down.recv().await;
    task_tracker.wait().await;
    tracing::info!("Stopped");

    Ok(())
}
