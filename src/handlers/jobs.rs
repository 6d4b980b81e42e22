// src/handlers/jobs.rs

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    common::error::AppError,
    config::AppState,
    middleware::owner::OwnerContext,
    models::{JobKind, JobStatus},
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegenParams {
    pub lazy_regen: Option<bool>,
}

// Jobs de outro owner são tratados como inexistentes
async fn owned_job(app_state: &AppState, ctx: &OwnerContext, job_id: Uuid) -> Result<JobStatus, AppError> {
    let job = app_state.job_service.poll(job_id).await?;
    if !ctx.owns(job.kind.owner_key()) {
        return Err(AppError::not_found("Job", job_id));
    }
    Ok(job)
}

pub async fn list_jobs(
    State(app_state): State<AppState>,
    ctx: OwnerContext,
) -> Result<impl IntoResponse, AppError> {
    let jobs = app_state.job_service.list(&ctx.owner_key).await;
    Ok((StatusCode::OK, Json(jobs)))
}

pub async fn get_job(
    State(app_state): State<AppState>,
    ctx: OwnerContext,
    Path(job_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let job = owned_job(&app_state, &ctx, job_id).await?;
    Ok((StatusCode::OK, Json(job)))
}

pub async fn cancel_job(
    State(app_state): State<AppState>,
    ctx: OwnerContext,
    Path(job_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    owned_job(&app_state, &ctx, job_id).await?;
    let job = app_state.job_service.cancel(job_id).await?;
    Ok((StatusCode::OK, Json(job)))
}

pub async fn regen_certificates(
    State(app_state): State<AppState>,
    ctx: OwnerContext,
    Query(params): Query<RegenParams>,
) -> Result<impl IntoResponse, AppError> {
    let job = app_state
        .job_service
        .submit(JobKind::RegenEntitlementCertificates {
            owner_key: ctx.owner_key,
            lazy_regen: params.lazy_regen.unwrap_or(app_state.config.lazy_regen_default),
        })
        .await?;
    Ok((StatusCode::ACCEPTED, Json(job)))
}

pub async fn autoheal(
    State(app_state): State<AppState>,
    ctx: OwnerContext,
) -> Result<impl IntoResponse, AppError> {
    let job = app_state
        .job_service
        .submit(JobKind::Autoheal { owner_key: ctx.owner_key })
        .await?;
    Ok((StatusCode::ACCEPTED, Json(job)))
}
