// src/handlers/consumers.rs

use std::collections::{BTreeMap, BTreeSet};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::{
    common::error::AppError,
    config::AppState,
    middleware::owner::OwnerContext,
    models::ConsumerType,
    services::NewConsumer,
};

// ---
// Payloads
// ---
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RegisterConsumerPayload {
    #[validate(length(min = 1, message = "O nome do consumidor é obrigatório."))]
    pub name: String,
    // Se não vier, assume "system"
    pub consumer_type: Option<ConsumerType>,
    pub username: Option<String>,
    #[serde(default)]
    pub facts: BTreeMap<String, String>,
    #[serde(default)]
    pub installed_product_ids: BTreeSet<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateFactsPayload {
    pub facts: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuestIdsPayload {
    pub guest_ids: BTreeSet<String>,
}

// Exatamente um entre poolId e productId
fn validate_bind_target(payload: &BindPayload) -> Result<(), ValidationError> {
    if payload.pool_id.is_some() == payload.product_id.is_some() {
        let mut err = ValidationError::new("bind_target");
        err.message = Some("Informe 'poolId' ou 'productId' (apenas um).".into());
        return Err(err);
    }
    Ok(())
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
#[validate(schema(function = "validate_bind_target"))]
pub struct BindPayload {
    pub pool_id: Option<Uuid>,
    pub product_id: Option<String>,
    #[validate(range(min = 1, message = "A quantidade deve ser no mínimo 1."))]
    pub quantity: Option<i64>,
    pub lazy_regen: Option<bool>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AdjustQuantityPayload {
    #[validate(range(min = 1, message = "A quantidade deve ser no mínimo 1."))]
    pub quantity: i64,
}

// ---
// Consumidores
// ---
pub async fn register_consumer(
    State(app_state): State<AppState>,
    ctx: OwnerContext,
    Json(payload): Json<RegisterConsumerPayload>,
) -> Result<impl IntoResponse, AppError> {
    // 1. Validar o payload
    payload.validate()?;

    // 2. Registrar
    let consumer = app_state
        .consumer_service
        .register(
            &ctx,
            NewConsumer {
                name: payload.name,
                consumer_type: payload.consumer_type.unwrap_or(ConsumerType::System),
                username: payload.username,
                facts: payload.facts,
                installed_product_ids: payload.installed_product_ids,
            },
        )
        .await?;

    // 3. Responder
    Ok((StatusCode::CREATED, Json(consumer)))
}

pub async fn list_consumers(
    State(app_state): State<AppState>,
    ctx: OwnerContext,
) -> Result<impl IntoResponse, AppError> {
    let consumers = app_state.consumer_service.list(&ctx).await?;
    Ok((StatusCode::OK, Json(consumers)))
}

pub async fn get_consumer(
    State(app_state): State<AppState>,
    ctx: OwnerContext,
    Path(consumer_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let consumer = app_state.consumer_service.get(&ctx, consumer_id).await?;
    Ok((StatusCode::OK, Json(consumer)))
}

pub async fn unregister_consumer(
    State(app_state): State<AppState>,
    ctx: OwnerContext,
    Path(consumer_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let report = app_state.consumer_service.unregister(&ctx, consumer_id).await?;
    Ok((StatusCode::OK, Json(report)))
}

pub async fn update_facts(
    State(app_state): State<AppState>,
    ctx: OwnerContext,
    Path(consumer_id): Path<Uuid>,
    Json(payload): Json<UpdateFactsPayload>,
) -> Result<impl IntoResponse, AppError> {
    let consumer = app_state
        .consumer_service
        .update_facts(&ctx, consumer_id, payload.facts)
        .await?;
    Ok((StatusCode::OK, Json(consumer)))
}

pub async fn update_guest_ids(
    State(app_state): State<AppState>,
    ctx: OwnerContext,
    Path(host_id): Path<Uuid>,
    Json(payload): Json<GuestIdsPayload>,
) -> Result<impl IntoResponse, AppError> {
    let report = app_state
        .consumer_service
        .update_guest_ids(&ctx, host_id, payload.guest_ids)
        .await?;
    Ok((StatusCode::OK, Json(report)))
}

// ---
// Entitlements
// ---
pub async fn list_entitlements(
    State(app_state): State<AppState>,
    ctx: OwnerContext,
    Path(consumer_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let entitlements = app_state
        .consumer_service
        .list_entitlements(&ctx, consumer_id)
        .await?;
    Ok((StatusCode::OK, Json(entitlements)))
}

pub async fn bind(
    State(app_state): State<AppState>,
    ctx: OwnerContext,
    Path(consumer_id): Path<Uuid>,
    Json(payload): Json<BindPayload>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let entitlement = match (payload.pool_id, payload.product_id.as_deref()) {
        (Some(pool_id), _) => {
            app_state
                .entitler_service
                .bind_by_pool(
                    &ctx,
                    consumer_id,
                    pool_id,
                    payload.quantity.unwrap_or(1),
                    payload.lazy_regen,
                )
                .await?
        }
        (None, Some(product_id)) => {
            app_state
                .entitler_service
                .bind_by_product(&ctx, consumer_id, product_id, payload.quantity, payload.lazy_regen)
                .await?
        }
        (None, None) => {
            return Err(AppError::Validation("Informe 'poolId' ou 'productId'.".to_string()));
        }
    };

    Ok((StatusCode::CREATED, Json(entitlement)))
}

pub async fn revoke_all(
    State(app_state): State<AppState>,
    ctx: OwnerContext,
    Path(consumer_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let report = app_state.revocation_service.revoke_all(&ctx, consumer_id).await?;
    Ok((StatusCode::OK, Json(report)))
}

pub async fn unbind(
    State(app_state): State<AppState>,
    ctx: OwnerContext,
    Path(entitlement_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let report = app_state
        .revocation_service
        .revoke_entitlement(&ctx, entitlement_id)
        .await?;
    Ok((StatusCode::OK, Json(report)))
}

pub async fn adjust_quantity(
    State(app_state): State<AppState>,
    ctx: OwnerContext,
    Path(entitlement_id): Path<Uuid>,
    Json(payload): Json<AdjustQuantityPayload>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    let entitlement = app_state
        .entitler_service
        .adjust_quantity(&ctx, entitlement_id, payload.quantity)
        .await?;
    Ok((StatusCode::OK, Json(entitlement)))
}
