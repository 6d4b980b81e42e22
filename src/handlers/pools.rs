// src/handlers/pools.rs

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{common::error::AppError, config::AppState, middleware::owner::OwnerContext};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListPoolsParams {
    // Só pools que este consumidor poderia consumir
    pub consumer: Option<Uuid>,
    pub product: Option<String>,
}

pub async fn list_pools(
    State(app_state): State<AppState>,
    ctx: OwnerContext,
    Query(params): Query<ListPoolsParams>,
) -> Result<impl IntoResponse, AppError> {
    let pools = app_state
        .entitler_service
        .list_available_pools(&ctx, params.consumer, params.product.as_deref())
        .await?;
    Ok((StatusCode::OK, Json(pools)))
}

pub async fn get_pool(
    State(app_state): State<AppState>,
    ctx: OwnerContext,
    Path(pool_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let pool = app_state.entitler_service.get_pool(&ctx, pool_id).await?;
    Ok((StatusCode::OK, Json(pool)))
}

// Apaga o pool e revoga (em cascata) tudo que dependia dele
pub async fn delete_pool(
    State(app_state): State<AppState>,
    ctx: OwnerContext,
    Path(pool_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let report = app_state.revocation_service.delete_pool(&ctx, pool_id).await?;
    Ok((StatusCode::OK, Json(report)))
}
