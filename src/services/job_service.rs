// src/services/job_service.rs

use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    adapters::CertificateService,
    common::{clock::Clock, error::AppError, locks::KeyedLocks},
    db::EntitlementStore,
    middleware::owner::OwnerContext,
    models::{JobKind, JobState, JobStatus},
    services::{
        entitler_service::EntitlerService,
        refresh_service::{RefreshOptions, RefreshService},
    },
};

// O que de fato executa cada tipo de job
#[derive(Clone)]
pub struct JobRunner {
    pub refresh: RefreshService,
    pub entitler: EntitlerService,
    pub certificates: Arc<dyn CertificateService>,
    pub store: Arc<dyn EntitlementStore>,
}

impl JobRunner {
    async fn run(&self, kind: &JobKind) -> Result<serde_json::Value, AppError> {
        let ctx = OwnerContext::new(kind.owner_key());
        match kind {
            JobKind::RefreshPools { lazy_regen, auto_create_owner, .. } => {
                let options = RefreshOptions {
                    lazy_regen: *lazy_regen,
                    auto_create_owner: *auto_create_owner,
                };
                let report = self.refresh.refresh_pools(&ctx, options).await?;
                Ok(serde_json::to_value(report).map_err(anyhow::Error::from)?)
            }
            JobKind::RegenEntitlementCertificates { lazy_regen, .. } => {
                let ids: Vec<Uuid> = self
                    .store
                    .list_entitlements_by_owner(&ctx.owner_key)
                    .await?
                    .into_iter()
                    .map(|e| e.id)
                    .collect();
                self.certificates.regenerate(&ids, *lazy_regen).await?;
                Ok(serde_json::json!({ "regenerated": ids.len(), "lazy": lazy_regen }))
            }
            JobKind::Autoheal { .. } => {
                let report = self.entitler.autoheal(&ctx).await?;
                Ok(serde_json::to_value(report).map_err(anyhow::Error::from)?)
            }
        }
    }
}

// ---
// Fachada de jobs assíncronos
// ---
// `submit` devolve na hora um job em CREATED. A execução anda por
// QUEUED (esperando o lock do owner) -> RUNNING -> FINISHED | FAILED.
// Só jobs ainda não iniciados podem ser cancelados.
#[derive(Clone)]
pub struct JobService {
    jobs: Arc<RwLock<HashMap<Uuid, JobStatus>>>,
    runner: JobRunner,
    owner_locks: Arc<KeyedLocks<String>>,
    clock: Arc<dyn Clock>,
    poll_interval: Duration,
}

impl JobService {
    pub fn new(runner: JobRunner, clock: Arc<dyn Clock>, poll_interval: Duration) -> Self {
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            runner,
            owner_locks: Arc::new(KeyedLocks::new()),
            clock,
            poll_interval,
        }
    }

    // Aplica a transição se ela for válida; `false` se o job já está noutro estado
    async fn transition(
        &self,
        job_id: Uuid,
        next: JobState,
        result: Option<serde_json::Value>,
        error: Option<String>,
    ) -> bool {
        let mut jobs = self.jobs.write().await;
        let Some(job) = jobs.get_mut(&job_id) else {
            return false;
        };
        if !job.state.can_transition_to(next) {
            tracing::debug!("Job {}: transição {:?} -> {:?} recusada", job_id, job.state, next);
            return false;
        }
        job.previous_state = Some(job.state);
        job.state = next;
        job.updated_at = self.clock.now();
        if result.is_some() {
            job.result = result;
        }
        if error.is_some() {
            job.error = error;
        }
        tracing::info!("Job {} ({}) -> {:?}", job_id, job.kind.name(), next);
        true
    }

    // --- SUBMIT ---
    pub async fn submit(&self, kind: JobKind) -> Result<JobStatus, AppError> {
        let now = self.clock.now();
        let status = JobStatus {
            id: Uuid::new_v4(),
            kind,
            state: JobState::Created,
            previous_state: None,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        };
        self.jobs.write().await.insert(status.id, status.clone());

        // Supervisor: se a tarefa de execução morrer, o job vira ABORTED
        let service = self.clone();
        let job_id = status.id;
        tokio::spawn(async move {
            let worker = service.clone();
            let handle = tokio::spawn(async move { worker.execute(job_id).await });
            if let Err(join_error) = handle.await {
                tracing::error!("Job {} abortado: {}", job_id, join_error);
                service
                    .transition(job_id, JobState::Aborted, None, Some(join_error.to_string()))
                    .await;
            }
        });

        tracing::info!("🚀 Job {} ({}) submetido", status.id, status.kind.name());
        Ok(status)
    }

    async fn execute(&self, job_id: Uuid) {
        let Some(kind) = self.jobs.read().await.get(&job_id).map(|j| j.kind.clone()) else {
            return;
        };

        // 1. Fila: espera o lock do owner
        if !self.transition(job_id, JobState::Queued, None, None).await {
            return;
        }
        let _guard = self.owner_locks.lock(&kind.owner_key().to_string()).await;

        // 2. Cancelado enquanto esperava?
        if !self.transition(job_id, JobState::Running, None, None).await {
            return;
        }

        // 3. Executa
        match self.runner.run(&kind).await {
            Ok(result) => {
                self.transition(job_id, JobState::Finished, Some(result), None).await;
            }
            Err(e) => {
                tracing::warn!("Job {} falhou: {}", job_id, e);
                let error = serde_json::json!({ "error": e.kind(), "retryable": e.is_retryable() });
                self.transition(job_id, JobState::Failed, Some(error), Some(e.to_string())).await;
            }
        }
    }

    // --- POLL ---
    pub async fn poll(&self, job_id: Uuid) -> Result<JobStatus, AppError> {
        self.jobs
            .read()
            .await
            .get(&job_id)
            .cloned()
            .ok_or_else(|| AppError::not_found("Job", job_id))
    }

    /// Espera (dormindo entre consultas) até o job chegar a um estado terminal.
    pub async fn wait_for(&self, job_id: Uuid, timeout: Duration) -> Result<JobStatus, AppError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let status = self.poll(job_id).await?;
            if status.state.is_terminal() {
                return Ok(status);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(status);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    // --- CANCEL ---
    pub async fn cancel(&self, job_id: Uuid) -> Result<JobStatus, AppError> {
        let current = self.poll(job_id).await?;
        if !self.transition(job_id, JobState::Cancelled, None, None).await {
            return Err(AppError::Conflict(format!(
                "job {} está em {:?} e não pode mais ser cancelado",
                job_id, current.state
            )));
        }
        self.poll(job_id).await
    }

    pub async fn list(&self, owner_key: &str) -> Vec<JobStatus> {
        let mut jobs: Vec<JobStatus> = self
            .jobs
            .read()
            .await
            .values()
            .filter(|j| j.kind.owner_key() == owner_key)
            .cloned()
            .collect();
        jobs.sort_by_key(|j| (j.created_at, j.id));
        jobs
    }
}
