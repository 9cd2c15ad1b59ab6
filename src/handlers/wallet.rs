use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};

use super::auth::ActingUser;
use crate::error::AppError;
use crate::AppState;

pub async fn wallet_status(
    State(state): State<AppState>,
    ActingUser(user_id): ActingUser,
    Path(account_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let wallet = state.orchestrator.wallet_status(&user_id, &account_id).await?;
    Ok(Json(wallet))
}

/// Balances, pending count and latest activity of one account.
pub async fn account_overview(
    State(state): State<AppState>,
    ActingUser(user_id): ActingUser,
    Path(account_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let overview = state.orchestrator.account_overview(&user_id, &account_id).await?;
    Ok(Json(overview))
}
