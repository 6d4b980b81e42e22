// src/services/revocation_service.rs

use std::{
    collections::{HashSet, VecDeque},
    sync::Arc,
};

use serde::Serialize;
use uuid::Uuid;

use crate::{
    common::{clock::Clock, error::AppError},
    db::EntitlementStore,
    middleware::owner::OwnerContext,
    models::{Consumer, Pool, PoolEvent, PoolEventType, PoolKey},
    services::{
        host_pools::{sync_host_pool, HostPoolSync},
        pool_computer::host_limited_master,
    },
};

// Profundidade legítima é 1 (entitlement -> sub-pool -> entitlements).
const MAX_CASCADE_DEPTH: usize = 16;

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RevocationReport {
    pub revoked_entitlements: Vec<Uuid>,
    pub deleted_pools: Vec<Uuid>,
}

impl RevocationReport {
    fn merge(&mut self, other: RevocationReport) {
        self.revoked_entitlements.extend(other.revoked_entitlements);
        self.deleted_pools.extend(other.deleted_pools);
    }
}

// Passos da cascata. `path` = pools derivados já atravessados até aqui.
enum Step {
    Revoke { entitlement_id: Uuid, path: Vec<Uuid> },
    Drain { pool_id: Uuid, path: Vec<Uuid>, attempt: u32 },
    Delete { pool_id: Uuid, path: Vec<Uuid>, attempt: u32 },
}

#[derive(Clone)]
pub struct RevocationService {
    store: Arc<dyn EntitlementStore>,
    clock: Arc<dyn Clock>,
    max_conflict_retries: u32,
}

impl RevocationService {
    pub fn new(store: Arc<dyn EntitlementStore>, clock: Arc<dyn Clock>, max_conflict_retries: u32) -> Self {
        Self { store, clock, max_conflict_retries }
    }

    async fn owned_consumer(&self, ctx: &OwnerContext, consumer_id: Uuid) -> Result<Consumer, AppError> {
        self.store
            .find_consumer(consumer_id)
            .await?
            .filter(|c| ctx.owns(&c.owner_key))
            .ok_or_else(|| AppError::not_found("Consumidor", consumer_id))
    }

    // --- UNBIND ---
    pub async fn revoke_entitlement(
        &self,
        ctx: &OwnerContext,
        entitlement_id: Uuid,
    ) -> Result<RevocationReport, AppError> {
        self.store
            .find_entitlement(entitlement_id)
            .await?
            .filter(|e| ctx.owns(&e.owner_key))
            .ok_or_else(|| AppError::not_found("Entitlement", entitlement_id))?;

        self.cascade(vec![Step::Revoke { entitlement_id, path: Vec::new() }]).await
    }

    // --- UNBIND ALL ---
    pub async fn revoke_all(
        &self,
        ctx: &OwnerContext,
        consumer_id: Uuid,
    ) -> Result<RevocationReport, AppError> {
        self.owned_consumer(ctx, consumer_id).await?;

        let roots = self
            .store
            .list_entitlements_by_consumer(consumer_id)
            .await?
            .into_iter()
            .map(|e| Step::Revoke { entitlement_id: e.id, path: Vec::new() })
            .collect();
        self.cascade(roots).await
    }

    // --- DELETE CONSUMER ---
    pub async fn delete_consumer(
        &self,
        ctx: &OwnerContext,
        consumer_id: Uuid,
    ) -> Result<RevocationReport, AppError> {
        let consumer = self.owned_consumer(ctx, consumer_id).await?;

        // 1. Entitlements do consumidor (os pools que eles originaram caem em cascata)
        let mut roots: Vec<Step> = self
            .store
            .list_entitlements_by_consumer(consumer.id)
            .await?
            .into_iter()
            .map(|e| Step::Revoke { entitlement_id: e.id, path: Vec::new() })
            .collect();

        // 2. Pools restritos a ele (pools de host)
        for pool in self.store.list_pools_restricted_to(consumer.id).await? {
            roots.push(Step::Drain { pool_id: pool.id, path: vec![pool.id], attempt: 0 });
        }

        let report = self.cascade(roots).await?;

        // 3. O registro em si
        self.store.delete_consumer(consumer.id).await?;
        tracing::info!(
            "Consumidor {} removido ({} entitlements revogados, {} pools apagados)",
            consumer.id,
            report.revoked_entitlements.len(),
            report.deleted_pools.len()
        );
        Ok(report)
    }

    // --- DELETE POOL ---
    pub async fn delete_pool(
        &self,
        ctx: &OwnerContext,
        pool_id: Uuid,
    ) -> Result<RevocationReport, AppError> {
        self.store
            .find_pool(pool_id)
            .await?
            .filter(|p| ctx.owns(&p.owner_key))
            .ok_or_else(|| AppError::not_found("Pool", pool_id))?;

        self.cascade(vec![Step::Drain { pool_id, path: vec![pool_id], attempt: 0 }]).await
    }

    // --- CONVIDADOS PERDIDOS ---
    // Revoga o que os convidados listados tiram dos pools restritos ao host.
    pub async fn revoke_guest_access(
        &self,
        ctx: &OwnerContext,
        host_id: Uuid,
        lost_guest_ids: &[String],
    ) -> Result<RevocationReport, AppError> {
        if lost_guest_ids.is_empty() {
            return Ok(RevocationReport::default());
        }

        let host_pools: HashSet<Uuid> = self
            .store
            .list_pools_restricted_to(host_id)
            .await?
            .into_iter()
            .map(|p| p.id)
            .collect();
        if host_pools.is_empty() {
            return Ok(RevocationReport::default());
        }

        let mut report = RevocationReport::default();
        for guest_uuid in lost_guest_ids {
            let mut roots = Vec::new();
            for guest in self.store.find_guests_by_virt_uuid(&ctx.owner_key, guest_uuid).await? {
                for ent in self.store.list_entitlements_by_consumer(guest.id).await? {
                    if host_pools.contains(&ent.pool_id) {
                        roots.push(Step::Revoke { entitlement_id: ent.id, path: Vec::new() });
                    }
                }
            }
            if !roots.is_empty() {
                tracing::info!("Convidado {} perdeu o acesso ao host {}", guest_uuid, host_id);
                report.merge(self.cascade(roots).await?);
            }
        }
        Ok(report)
    }

    // ---
    // Cascata em largura
    // ---
    async fn cascade(&self, roots: Vec<Step>) -> Result<RevocationReport, AppError> {
        let mut report = RevocationReport::default();
        let mut queue: VecDeque<Step> = roots.into();
        let mut seen_entitlements: HashSet<Uuid> = HashSet::new();
        let mut drained_pools: HashSet<Uuid> = HashSet::new();

        while let Some(step) = queue.pop_front() {
            match step {
                Step::Revoke { entitlement_id, path } => {
                    if !seen_entitlements.insert(entitlement_id) {
                        continue;
                    }
                    self.revoke_one(entitlement_id, path, &drained_pools, &mut queue, &mut report)
                        .await?;
                }
                Step::Drain { pool_id, path, attempt } => {
                    if attempt == 0 && !drained_pools.insert(pool_id) {
                        continue;
                    }
                    if path.len() > MAX_CASCADE_DEPTH {
                        return Err(AppError::InvariantViolation(format!(
                            "cascata de revogação passou de {} níveis no pool {}",
                            MAX_CASCADE_DEPTH, pool_id
                        )));
                    }
                    for ent in self.store.list_entitlements_by_pool(pool_id).await? {
                        // Numa nova tentativa, entitlements novos precisam passar de novo
                        if attempt > 0 {
                            seen_entitlements.remove(&ent.id);
                        }
                        queue.push_back(Step::Revoke { entitlement_id: ent.id, path: path.clone() });
                    }
                    queue.push_back(Step::Delete { pool_id, path, attempt });
                }
                Step::Delete { pool_id, path, attempt } => {
                    let Some(pool) = self.store.find_pool(pool_id).await? else {
                        continue;
                    };
                    match self.store.delete_pool(pool_id).await {
                        Ok(()) => self.pool_deleted(&pool, &mut report).await?,
                        Err(AppError::NotFound(_)) => {}
                        // Um bind entrou no meio: drena de novo
                        Err(AppError::Conflict(_)) if attempt < self.max_conflict_retries => {
                            queue.push_back(Step::Drain { pool_id, path, attempt: attempt + 1 });
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
        }

        Ok(report)
    }

    async fn revoke_one(
        &self,
        entitlement_id: Uuid,
        path: Vec<Uuid>,
        drained_pools: &HashSet<Uuid>,
        queue: &mut VecDeque<Step>,
        report: &mut RevocationReport,
    ) -> Result<(), AppError> {
        // 1. Libera a quantidade (atômico no store)
        let Some((ent, pool)) = self.store.release(entitlement_id).await? else {
            return Ok(());
        };
        self.store
            .record_event(
                PoolEvent::new(&ent.owner_key, PoolEventType::EntitlementRevoked, pool.id, self.clock.now())
                    .with_entitlement(ent.id, ent.consumer_id, -ent.quantity),
            )
            .await?;
        report.revoked_entitlements.push(ent.id);
        tracing::info!(
            "Entitlement {} revogado (pool {}, consumo agora {})",
            ent.id,
            pool.id,
            pool.consumed
        );

        // 2. Pool marcado para exclusão que zerou
        if pool.pending_delete && pool.consumed == 0 && !drained_pools.contains(&pool.id) {
            match self.store.delete_pool(pool.id).await {
                Ok(()) => self.pool_deleted(&pool, report).await?,
                Err(AppError::Conflict(_)) | Err(AppError::NotFound(_)) => {
                    tracing::debug!("Pool {} pendente não pôde ser apagado agora", pool.id);
                }
                Err(e) => return Err(e),
            }
        }

        // 3. Sub-pool originado por este entitlement
        if let Some(derived) = self
            .store
            .find_pool_by_key(&PoolKey::SourceEntitlement(ent.id))
            .await?
        {
            if path.contains(&derived.id) {
                return Err(AppError::InvariantViolation(format!(
                    "ciclo na cascata de revogação: pool {} já visitado",
                    derived.id
                )));
            }
            let mut next = path.clone();
            next.push(derived.id);
            queue.push_back(Step::Drain { pool_id: derived.id, path: next, attempt: 0 });
        }

        // 4. Pool do host encolhe ou some junto com o master
        if host_limited_master(&pool).is_some() {
            let sync = sync_host_pool(
                self.store.as_ref(),
                self.clock.as_ref(),
                self.max_conflict_retries,
                ent.consumer_id,
                &pool,
                false,
            )
            .await?;
            if let HostPoolSync::Orphaned(Some(host_pool)) = sync {
                let mut next = path;
                next.push(host_pool.id);
                queue.push_back(Step::Drain { pool_id: host_pool.id, path: next, attempt: 0 });
            }
        }

        Ok(())
    }

    async fn pool_deleted(&self, pool: &Pool, report: &mut RevocationReport) -> Result<(), AppError> {
        self.store
            .record_event(PoolEvent::new(
                &pool.owner_key,
                PoolEventType::PoolDeleted,
                pool.id,
                self.clock.now(),
            ))
            .await?;
        report.deleted_pools.push(pool.id);
        tracing::info!("🗑️ Pool {} ({}) apagado", pool.id, pool.product_id);
        Ok(())
    }
}
