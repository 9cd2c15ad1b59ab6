use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use super::auth::ActingUser;
use crate::error::AppError;
use crate::services::{CreatePaymentRequest, IncomingPaymentRequest, SignAction};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SignPaymentBody {
    pub transaction_id: Uuid,
    pub action: SignAction,
}

#[derive(Debug, Deserialize)]
pub struct PendingQuery {
    pub account_id: String,
}

pub async fn create_payment(
    State(state): State<AppState>,
    ActingUser(user_id): ActingUser,
    Json(payload): Json<CreatePaymentRequest>,
) -> Result<impl IntoResponse, AppError> {
    let receipt = state.orchestrator.create_payment(&user_id, payload).await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

pub async fn sign_payment(
    State(state): State<AppState>,
    ActingUser(user_id): ActingUser,
    Json(payload): Json<SignPaymentBody>,
) -> Result<impl IntoResponse, AppError> {
    let receipt = state
        .orchestrator
        .sign_payment(payload.transaction_id, &user_id, payload.action)
        .await?;
    Ok(Json(receipt))
}

pub async fn list_pending(
    State(state): State<AppState>,
    ActingUser(user_id): ActingUser,
    Query(query): Query<PendingQuery>,
) -> Result<impl IntoResponse, AppError> {
    let pending = state
        .orchestrator
        .list_pending_for(&user_id, &query.account_id)
        .await?;
    Ok(Json(pending))
}

pub async fn record_incoming(
    State(state): State<AppState>,
    ActingUser(user_id): ActingUser,
    Json(payload): Json<IncomingPaymentRequest>,
) -> Result<impl IntoResponse, AppError> {
    let tx = state.orchestrator.record_incoming(&user_id, payload).await?;
    Ok((StatusCode::CREATED, Json(tx)))
}

pub async fn get_transaction(
    State(state): State<AppState>,
    ActingUser(user_id): ActingUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let details = state.orchestrator.get_transaction(&user_id, id).await?;
    Ok(Json(details))
}
