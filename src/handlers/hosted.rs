// src/handlers/hosted.rs
//
// Administração do catálogo hospedado (assinaturas e produtos que a
// refresh lê). Nada aqui mexe em pools: é preciso disparar uma refresh.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use crate::{
    adapters::SubscriptionStore,
    common::error::AppError,
    config::AppState,
    models::{Product, Subscription},
};

pub async fn put_product(
    State(app_state): State<AppState>,
    Path(product_id): Path<String>,
    Json(mut product): Json<Product>,
) -> Result<impl IntoResponse, AppError> {
    // O id da rota manda
    product.id = product_id;
    let product = app_state.hosted.put_product(product).await?;
    Ok((StatusCode::OK, Json(product)))
}

pub async fn list_products(State(app_state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let products = app_state.hosted.list_products().await?;
    Ok((StatusCode::OK, Json(products)))
}

pub async fn put_subscription(
    State(app_state): State<AppState>,
    Path(subscription_id): Path<String>,
    Json(mut subscription): Json<Subscription>,
) -> Result<impl IntoResponse, AppError> {
    subscription.id = subscription_id;
    if subscription.end_date <= subscription.start_date {
        return Err(AppError::Validation(
            "A data final da assinatura deve ser posterior à inicial.".to_string(),
        ));
    }
    let subscription = app_state.hosted.upsert_subscription(subscription).await?;
    Ok((StatusCode::OK, Json(subscription)))
}

pub async fn list_subscriptions(
    State(app_state): State<AppState>,
    Path(owner_key): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let subscriptions = app_state.hosted.list_subscriptions(&owner_key).await?;
    Ok((StatusCode::OK, Json(subscriptions)))
}

pub async fn delete_subscription(
    State(app_state): State<AppState>,
    Path(subscription_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    if !app_state.hosted.delete_subscription(&subscription_id).await? {
        return Err(AppError::not_found("Assinatura", subscription_id));
    }
    Ok(StatusCode::NO_CONTENT)
}
