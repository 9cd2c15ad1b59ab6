pub mod auth;
pub mod payments;
pub mod wallet;
pub mod ws;

use axum::{extract::State, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};

use crate::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
    pub custody_circuit: String,
    pub required_signatures: u32,
    pub settlements_in_flight: usize,
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let custody_circuit = state.custody.circuit_state();
    let status = if custody_circuit == "closed" {
        "healthy"
    } else {
        "degraded"
    };

    Json(HealthStatus {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        custody_circuit,
        required_signatures: state.orchestrator.policy().required_signatures,
        settlements_in_flight: state.orchestrator.in_flight_settlements(),
    })
}
