// src/handlers/owners.rs

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use validator::Validate;

use crate::{
    common::error::AppError,
    config::AppState,
    middleware::owner::OwnerContext,
    models::JobKind,
};

// ---
// Payloads
// ---
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateOwnerPayload {
    #[validate(length(min = 1, max = 255, message = "A chave do owner é obrigatória."))]
    pub key: String,
    #[validate(length(min = 1, message = "O nome de exibição é obrigatório."))]
    pub display_name: String,
    pub parent_key: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetParentPayload {
    pub parent_key: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkUpstreamPayload {
    pub upstream_consumer_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteOwnerParams {
    // Padrão: apaga também as assinaturas do catálogo hospedado
    pub cascade_subscriptions: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshParams {
    pub lazy_regen: Option<bool>,
    pub auto_create_owner: Option<bool>,
}

// ---
// Handlers
// ---
pub async fn create_owner(
    State(app_state): State<AppState>,
    Json(payload): Json<CreateOwnerPayload>,
) -> Result<impl IntoResponse, AppError> {
    // 1. Validar o payload
    payload.validate()?;

    // 2. Chamar o serviço
    let owner = app_state
        .owner_service
        .create(&payload.key, &payload.display_name, payload.parent_key.as_deref())
        .await?;

    // 3. Responder com sucesso
    Ok((StatusCode::CREATED, Json(owner)))
}

pub async fn list_owners(State(app_state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let owners = app_state.owner_service.list().await?;
    Ok((StatusCode::OK, Json(owners)))
}

pub async fn get_owner(
    State(app_state): State<AppState>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let owner = app_state.owner_service.get(&key).await?;
    Ok((StatusCode::OK, Json(owner)))
}

pub async fn delete_owner(
    State(app_state): State<AppState>,
    Path(key): Path<String>,
    Query(params): Query<DeleteOwnerParams>,
) -> Result<impl IntoResponse, AppError> {
    let deletion = app_state
        .owner_service
        .delete(&key, params.cascade_subscriptions.unwrap_or(true))
        .await?;
    Ok((StatusCode::OK, Json(deletion)))
}

pub async fn set_parent(
    State(app_state): State<AppState>,
    Path(key): Path<String>,
    Json(payload): Json<SetParentPayload>,
) -> Result<impl IntoResponse, AppError> {
    let owner = app_state
        .owner_service
        .set_parent(&key, payload.parent_key.as_deref())
        .await?;
    Ok((StatusCode::OK, Json(owner)))
}

pub async fn link_upstream(
    State(app_state): State<AppState>,
    Path(key): Path<String>,
    Json(payload): Json<LinkUpstreamPayload>,
) -> Result<impl IntoResponse, AppError> {
    let owner = app_state
        .owner_service
        .link_upstream(&key, payload.upstream_consumer_id.as_deref())
        .await?;
    Ok((StatusCode::OK, Json(owner)))
}

// A refresh sempre roda como job: responde 202 com o status inicial
pub async fn refresh_pools(
    State(app_state): State<AppState>,
    Path(key): Path<String>,
    Query(params): Query<RefreshParams>,
) -> Result<impl IntoResponse, AppError> {
    let job = app_state
        .job_service
        .submit(JobKind::RefreshPools {
            owner_key: key,
            lazy_regen: params.lazy_regen.unwrap_or(app_state.config.lazy_regen_default),
            auto_create_owner: params.auto_create_owner.unwrap_or(false),
        })
        .await?;
    Ok((StatusCode::ACCEPTED, Json(job)))
}

pub async fn list_events(
    State(app_state): State<AppState>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let events = app_state.owner_service.list_events(&OwnerContext::new(key)).await?;
    Ok((StatusCode::OK, Json(events)))
}
