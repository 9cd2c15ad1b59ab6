pub mod adapters;
pub mod cli;
pub mod config;
pub mod custody;
pub mod db;
pub mod domain;
pub mod error;
pub mod handlers;
pub mod ledger;
pub mod middleware;
pub mod ports;
pub mod services;
pub mod startup;
pub mod validation;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::custody::CustodyClient;
use crate::services::AuthorizationOrchestrator;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: AuthorizationOrchestrator,
    pub custody: CustodyClient,
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/payments", post(handlers::payments::create_payment))
        .route("/payments/sign", post(handlers::payments::sign_payment))
        .route("/payments/pending", get(handlers::payments::list_pending))
        .route("/payments/incoming", post(handlers::payments::record_incoming))
        .route("/payments/:id", get(handlers::payments::get_transaction))
        .route("/accounts/:id/wallet", get(handlers::wallet::wallet_status))
        .route("/accounts/:id/overview", get(handlers::wallet::account_overview))
        .route("/ws", get(handlers::ws::ws_handler))
        .layer(axum::middleware::from_fn(
            middleware::request_logger::request_logger_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
