// src/services/refresh_service.rs

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use serde::Serialize;
use uuid::Uuid;

use crate::{
    adapters::{CertificateService, ProductCatalog, SubscriptionStore},
    common::{
        clock::Clock,
        error::AppError,
        locks::KeyedLocks,
        retry::with_conflict_retries,
    },
    db::EntitlementStore,
    middleware::owner::OwnerContext,
    models::{Owner, Pool, PoolEvent, PoolEventType, PoolKey, PoolKind, Subscription},
    services::pool_computer::{compute_pools, PoolChanges, PoolSpec},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedSubscription {
    pub subscription_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshReport {
    pub owner_key: String,
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub flagged: usize,
    pub skipped: Vec<SkippedSubscription>,
}

impl RefreshReport {
    /// Número de mutações aplicadas (zero numa segunda refresh sem mudanças).
    pub fn mutations(&self) -> usize {
        self.created + self.updated + self.deleted + self.flagged
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RefreshOptions {
    pub lazy_regen: bool,
    pub auto_create_owner: bool,
}

#[derive(Clone)]
pub struct RefreshService {
    store: Arc<dyn EntitlementStore>,
    subscriptions: Arc<dyn SubscriptionStore>,
    catalog: Arc<dyn ProductCatalog>,
    certificates: Arc<dyn CertificateService>,
    clock: Arc<dyn Clock>,
    // Refreshes do mesmo owner nunca rodam juntas
    owner_locks: Arc<KeyedLocks<String>>,
    max_conflict_retries: u32,
}

impl RefreshService {
    pub fn new(
        store: Arc<dyn EntitlementStore>,
        subscriptions: Arc<dyn SubscriptionStore>,
        catalog: Arc<dyn ProductCatalog>,
        certificates: Arc<dyn CertificateService>,
        clock: Arc<dyn Clock>,
        owner_locks: Arc<KeyedLocks<String>>,
        max_conflict_retries: u32,
    ) -> Self {
        Self {
            store,
            subscriptions,
            catalog,
            certificates,
            clock,
            owner_locks,
            max_conflict_retries,
        }
    }

    // --- REFRESH POOLS ---
    pub async fn refresh_pools(
        &self,
        ctx: &OwnerContext,
        options: RefreshOptions,
    ) -> Result<RefreshReport, AppError> {
        let _guard = self.owner_locks.lock(&ctx.owner_key).await;
        let now = self.clock.now();
        let mut report = RefreshReport { owner_key: ctx.owner_key.clone(), ..Default::default() };

        // 1. Owner
        if self.store.find_owner(&ctx.owner_key).await?.is_none() {
            if !options.auto_create_owner {
                return Err(AppError::not_found("Owner", &ctx.owner_key));
            }
            match self.store.create_owner(Owner::new(&ctx.owner_key, &ctx.owner_key, now)).await {
                Ok(_) => tracing::info!("✅ Owner {} criado pela refresh", ctx.owner_key),
                // Criado por outra chamada no meio do caminho
                Err(AppError::Conflict(_)) => {}
                Err(e) => return Err(e),
            }
        }

        // 2. Assinaturas (upstream fora do ar aborta tudo)
        let subscriptions = self.subscriptions.list_subscriptions(&ctx.owner_key).await?;

        // 3. Pools desejados
        let mut desired: HashMap<PoolKey, PoolSpec> = HashMap::new();
        // Assinaturas vigentes, inclusive as ignoradas por estarem malformadas
        let mut live: HashSet<&str> = HashSet::new();
        let mut skipped: HashSet<&str> = HashSet::new();
        for subscription in &subscriptions {
            if subscription.is_expired(now) {
                tracing::debug!("Assinatura {} vencida; sem pools desejados", subscription.id);
                continue;
            }
            live.insert(subscription.id.as_str());
            match self.desired_pools(subscription).await {
                Ok(specs) => {
                    for spec in specs {
                        desired.insert(spec.key(), spec);
                    }
                }
                Err(AppError::Validation(reason)) | Err(AppError::NotFound(reason)) => {
                    tracing::warn!("Assinatura {} ignorada: {}", subscription.id, reason);
                    skipped.insert(subscription.id.as_str());
                    report.skipped.push(SkippedSubscription {
                        subscription_id: subscription.id.clone(),
                        reason,
                    });
                }
                Err(e) => return Err(e),
            }
        }

        // 4. Diferença contra os pools existentes
        for pool in self.store.list_pools(&ctx.owner_key).await? {
            // Assinatura malformada: os pools dela ficam como estão
            if pool.subscription_id.as_deref().is_some_and(|id| skipped.contains(id)) {
                tracing::debug!("Pool {} mantido: assinatura ignorada nesta refresh", pool.id);
                continue;
            }

            // Sub-pools seguem a assinatura de origem, sem entrar no cálculo
            if matches!(pool.kind, PoolKind::PersonRestricted { .. } | PoolKind::HostRestricted { .. }) {
                let orphaned = pool
                    .subscription_id
                    .as_deref()
                    .is_some_and(|id| !live.contains(id));
                if orphaned != pool.pending_delete {
                    self.set_pending_delete(&pool, orphaned, &mut report).await?;
                }
                continue;
            }

            let Some(key) = pool.key() else {
                continue;
            };

            match desired.remove(&key) {
                Some(spec) => {
                    if let Some(changes) = self.update_pool(pool.id, &spec).await? {
                        report.updated += 1;
                        self.follow_changes(ctx, &spec, pool.id, changes, options.lazy_regen)
                            .await?;
                    }
                }
                None => self.retire_pool(pool, &mut report).await?,
            }
        }

        // 5. O que sobrou é novo
        for (_, spec) in desired {
            let (pool, created) = self
                .store
                .insert_pool_unique(spec.to_pool(&ctx.owner_key, now))
                .await?;
            if created {
                self.record(&pool, PoolEventType::PoolCreated, None).await?;
                tracing::info!(
                    "✅ Pool {} criado ({} {}, quantidade {})",
                    pool.id,
                    pool.kind.sub_key(),
                    pool.product_id,
                    pool.quantity
                );
                report.created += 1;
            }
        }

        tracing::info!(
            "🔄 Refresh de {}: {} criados, {} atualizados, {} apagados, {} marcados, {} ignorados",
            ctx.owner_key,
            report.created,
            report.updated,
            report.deleted,
            report.flagged,
            report.skipped.len()
        );
        Ok(report)
    }

    async fn desired_pools(&self, subscription: &Subscription) -> Result<Vec<PoolSpec>, AppError> {
        let product = self
            .catalog
            .get_product(&subscription.owner_key, &subscription.product_id)
            .await?
            .ok_or_else(|| AppError::not_found("Produto", &subscription.product_id))?;

        let derived = match &subscription.derived_product_id {
            Some(id) => Some(
                self.catalog
                    .get_product(&subscription.owner_key, id)
                    .await?
                    .ok_or_else(|| AppError::not_found("Produto derivado", id))?,
            ),
            None => None,
        };

        compute_pools(subscription, &product, derived.as_ref())
    }

    // Aplica a spec com CAS; `None` se nada mudou
    async fn update_pool(&self, pool_id: Uuid, spec: &PoolSpec) -> Result<Option<PoolChanges>, AppError> {
        let outcome = with_conflict_retries(self.max_conflict_retries, "refresh do pool", || async {
            let Some(mut pool) = self.store.find_pool(pool_id).await? else {
                return Ok(None);
            };
            let changes = spec.apply_to(&mut pool);
            if !changes.any() {
                return Ok(None);
            }
            pool.updated_at = self.clock.now();
            let updated = self.store.update_pool(&pool).await?;
            Ok(Some((updated, changes)))
        })
        .await?;

        let Some((pool, changes)) = outcome else {
            return Ok(None);
        };

        self.record(&pool, PoolEventType::PoolUpdated, None).await?;
        if changes.quantity && pool.available().is_some_and(|free| free < 0) {
            // Nunca revoga à força: o pool só fica bloqueado para novos binds
            tracing::warn!(
                "Pool {} com consumo {} acima da nova quantidade {}",
                pool.id,
                pool.consumed,
                pool.quantity
            );
        }
        tracing::debug!("Pool {} atualizado: {:?}", pool.id, changes);
        Ok(Some(changes))
    }

    // Entitlements (e sub-pools da mesma assinatura) acompanham datas e produtos
    async fn follow_changes(
        &self,
        ctx: &OwnerContext,
        spec: &PoolSpec,
        pool_id: Uuid,
        changes: PoolChanges,
        lazy_regen: bool,
    ) -> Result<(), AppError> {
        if !changes.dates && !changes.products {
            return Ok(());
        }

        let mut regenerate = self
            .store
            .update_entitlement_dates(pool_id, spec.start_date, spec.end_date)
            .await?;
        if changes.products {
            regenerate = self
                .store
                .list_entitlements_by_pool(pool_id)
                .await?
                .into_iter()
                .map(|e| e.id)
                .collect();
        }

        if changes.dates && spec.kind == PoolKind::Master {
            for derived in self.store.list_pools(&ctx.owner_key).await? {
                let is_restricted = matches!(
                    derived.kind,
                    PoolKind::PersonRestricted { .. } | PoolKind::HostRestricted { .. }
                );
                if !is_restricted || derived.subscription_id.as_deref() != Some(&spec.subscription_id) {
                    continue;
                }
                self.move_dates(derived.id, spec).await?;
                regenerate.extend(
                    self.store
                        .update_entitlement_dates(derived.id, spec.start_date, spec.end_date)
                        .await?,
                );
            }
        }

        if !regenerate.is_empty() {
            tracing::info!(
                "{} certificado(s) a regenerar após mudança no pool {}",
                regenerate.len(),
                pool_id
            );
            self.certificates.regenerate(&regenerate, lazy_regen).await?;
        }
        Ok(())
    }

    async fn move_dates(&self, pool_id: Uuid, spec: &PoolSpec) -> Result<(), AppError> {
        let moved = with_conflict_retries(self.max_conflict_retries, "datas do sub-pool", || async {
            let Some(mut pool) = self.store.find_pool(pool_id).await? else {
                return Ok(None);
            };
            if pool.start_date == spec.start_date && pool.end_date == spec.end_date {
                return Ok(None);
            }
            pool.start_date = spec.start_date;
            pool.end_date = spec.end_date;
            pool.updated_at = self.clock.now();
            self.store.update_pool(&pool).await.map(Some)
        })
        .await?;

        if let Some(pool) = moved {
            self.record(&pool, PoolEventType::PoolUpdated, Some("datas da assinatura")).await?;
        }
        Ok(())
    }

    // Pool sem assinatura: apaga se ninguém consome, senão marca
    async fn retire_pool(&self, pool: Pool, report: &mut RefreshReport) -> Result<(), AppError> {
        if pool.consumed == 0 {
            match self.store.delete_pool(pool.id).await {
                Ok(()) => {
                    self.record(&pool, PoolEventType::PoolDeleted, None).await?;
                    tracing::info!("🗑️ Pool {} apagado (assinatura removida)", pool.id);
                    report.deleted += 1;
                    return Ok(());
                }
                // Um bind chegou antes: cai para a marcação
                Err(AppError::Conflict(_)) => {}
                Err(AppError::NotFound(_)) => return Ok(()),
                Err(e) => return Err(e),
            }
        }

        if pool.pending_delete {
            return Ok(());
        }
        self.set_pending_delete(&pool, true, report).await
    }

    // Marca (ou desmarca) o pool com CAS; sem efeito se já está no estado pedido
    async fn set_pending_delete(
        &self,
        pool: &Pool,
        flag: bool,
        report: &mut RefreshReport,
    ) -> Result<(), AppError> {
        let changed = with_conflict_retries(self.max_conflict_retries, "marcação do pool", || async {
            let Some(mut current) = self.store.find_pool(pool.id).await? else {
                return Ok(None);
            };
            if current.pending_delete == flag {
                return Ok(None);
            }
            current.pending_delete = flag;
            current.updated_at = self.clock.now();
            self.store.update_pool(&current).await.map(Some)
        })
        .await?;

        let Some(changed) = changed else {
            return Ok(());
        };
        if flag {
            self.record(&changed, PoolEventType::PoolFlaggedForDelete, None).await?;
            tracing::warn!(
                "Pool {} marcado para exclusão; ainda há {} unidade(s) consumida(s)",
                changed.id,
                changed.consumed
            );
            report.flagged += 1;
        } else {
            self.record(&changed, PoolEventType::PoolUpdated, Some("assinatura de volta")).await?;
            tracing::info!("🔄 Pool {} voltou a aceitar binds", changed.id);
            report.updated += 1;
        }
        Ok(())
    }

    async fn record(&self, pool: &Pool, event_type: PoolEventType, notes: Option<&str>) -> Result<(), AppError> {
        let mut event = PoolEvent::new(&pool.owner_key, event_type, pool.id, self.clock.now());
        if let Some(notes) = notes {
            event = event.with_notes(notes);
        }
        self.store.record_event(event).await
    }
}
