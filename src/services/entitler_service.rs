// src/services/entitler_service.rs

use std::{collections::BTreeSet, sync::Arc};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    adapters::{CertificateService, Eligibility, EligibilityPolicy, ProductCatalog},
    common::{
        clock::Clock,
        error::{AppError, BindFailure},
        retry::with_conflict_retries,
    },
    db::EntitlementStore,
    middleware::owner::OwnerContext,
    models::{
        attrs, Consumer, ConsumerType, Entitlement, Pool, PoolEvent, PoolEventType, Product,
    },
    services::{
        host_pools::{sync_host_pool, HostPoolSync},
        pool_computer::{allows_multi_entitlement, host_limited_master, person_pool},
        pool_selector::{round_to_multiple, SelectionPolicy},
        revocation_service::RevocationService,
    },
};

#[derive(Debug, Clone, Copy)]
pub struct BindSettings {
    pub max_conflict_retries: u32,
    pub lazy_regen_default: bool,
    pub selection: SelectionPolicy,
}

impl Default for BindSettings {
    fn default() -> Self {
        Self {
            max_conflict_retries: 5,
            lazy_regen_default: true,
            selection: SelectionPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnresolvedProduct {
    pub consumer_id: Uuid,
    pub product_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AutohealReport {
    pub consumers_checked: usize,
    pub bound: Vec<Uuid>,
    pub unresolved: Vec<UnresolvedProduct>,
}

// Resultado interno de um consumo bem-sucedido, antes dos efeitos colaterais
struct Bound {
    entitlement: Entitlement,
    pool: Pool,
    consumer: Consumer,
    restricted_product: Option<Product>,
}

fn instance_multiplier(pool: &Pool) -> Result<Option<i64>, AppError> {
    let Some(raw) = pool.attribute(attrs::INSTANCE_MULTIPLIER) else {
        return Ok(None);
    };
    match raw.trim().parse::<i64>() {
        Ok(n) if n >= 1 => Ok(Some(n)),
        _ => Err(AppError::Validation(format!(
            "instance_multiplier inválido no pool {}: '{}'",
            pool.id, raw
        ))),
    }
}

// Quem "é" o consumidor para pools restritos a um usuário
fn consumer_username(consumer: &Consumer) -> Option<&str> {
    match (&consumer.username, consumer.consumer_type) {
        (Some(username), _) => Some(username.as_str()),
        (None, ConsumerType::Person) => Some(consumer.name.as_str()),
        (None, _) => None,
    }
}

#[derive(Clone)]
pub struct EntitlerService {
    store: Arc<dyn EntitlementStore>,
    catalog: Arc<dyn ProductCatalog>,
    certificates: Arc<dyn CertificateService>,
    policy: Arc<dyn EligibilityPolicy>,
    revocation: RevocationService,
    clock: Arc<dyn Clock>,
    settings: BindSettings,
}

impl EntitlerService {
    pub fn new(
        store: Arc<dyn EntitlementStore>,
        catalog: Arc<dyn ProductCatalog>,
        certificates: Arc<dyn CertificateService>,
        policy: Arc<dyn EligibilityPolicy>,
        revocation: RevocationService,
        clock: Arc<dyn Clock>,
        settings: BindSettings,
    ) -> Self {
        Self { store, catalog, certificates, policy, revocation, clock, settings }
    }

    async fn owned_consumer(&self, ctx: &OwnerContext, consumer_id: Uuid) -> Result<Consumer, AppError> {
        self.store
            .find_consumer(consumer_id)
            .await?
            .filter(|c| ctx.owns(&c.owner_key))
            .ok_or_else(|| AppError::not_found("Consumidor", consumer_id))
    }

    async fn owned_pool(&self, ctx: &OwnerContext, pool_id: Uuid) -> Result<Pool, AppError> {
        self.store
            .find_pool(pool_id)
            .await?
            .filter(|p| ctx.owns(&p.owner_key))
            .ok_or_else(|| AppError::not_found("Pool", pool_id))
    }

    pub async fn get_pool(&self, ctx: &OwnerContext, pool_id: Uuid) -> Result<Pool, AppError> {
        self.owned_pool(ctx, pool_id).await
    }

    // ---
    // Checagens antes do consumo (falham fechado)
    // ---
    pub async fn check_bind(
        &self,
        consumer: &Consumer,
        pool: &Pool,
        quantity: i64,
        existing: &[Entitlement],
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        // 1. Vigência
        if pool.pending_delete {
            return Err(BindFailure::PendingDelete.into());
        }
        if !pool.is_current(now) {
            return Err(BindFailure::PoolNotCurrent {
                start: pool.start_date.to_rfc3339(),
                end: pool.end_date.to_rfc3339(),
            }
            .into());
        }

        // 2. Tipo de consumidor exigido
        if let Some(required) = pool.attribute(attrs::REQUIRES_CONSUMER_TYPE) {
            if required != consumer.consumer_type.as_str() {
                return Err(BindFailure::ConsumerTypeMismatch {
                    required: required.to_string(),
                    actual: consumer.consumer_type.as_str().to_string(),
                }
                .into());
            }
        }

        // 3. Capacidade
        if quantity < 1 {
            return Err(AppError::Validation(format!(
                "quantidade deve ser >= 1 (recebido {})",
                quantity
            )));
        }
        if let Some(available) = pool.available() {
            if quantity > available {
                return Err(BindFailure::InsufficientQuantity {
                    requested: quantity,
                    available: available.max(0),
                }
                .into());
            }
        }

        // 4. Múltiplo do instance_multiplier
        if let Some(multiplier) = instance_multiplier(pool)? {
            if quantity % multiplier != 0 {
                return Err(AppError::Validation(format!(
                    "quantidade {} não é múltiplo de instance_multiplier {}",
                    quantity, multiplier
                )));
            }
        }

        // 5. Mesmo produto vindo de outro pool
        if !allows_multi_entitlement(pool) {
            let duplicated = existing.iter().any(|e| {
                e.product_id == pool.product_id && e.pool_id != pool.id && e.is_active(now)
            });
            if duplicated {
                return Err(BindFailure::AlreadyHasProduct { product_id: pool.product_id.clone() }.into());
            }
        }

        // 6. Pool de um usuário específico
        if let Some(username) = pool.restricted_to_username.as_deref() {
            if consumer_username(consumer) != Some(username) {
                return Err(BindFailure::RestrictedToUser { username: username.to_string() }.into());
            }
        }

        // 7. Pool restrito a um host: associação ao vivo, nunca cópia
        if let Some(host_ref) = pool.attribute(attrs::REQUIRES_HOST) {
            let host = match Uuid::parse_str(host_ref) {
                Ok(host_id) => self.store.find_consumer(host_id).await?,
                Err(_) => None,
            };
            let belongs = match (host, consumer.virt_uuid()) {
                (Some(host), Some(uuid)) if consumer.is_guest() => {
                    host.guest_ids.iter().any(|g| g.eq_ignore_ascii_case(uuid))
                }
                _ => false,
            };
            if !belongs {
                return Err(BindFailure::HostMismatch.into());
            }
        }

        // 8. Política plugável
        match self.policy.check_eligibility(consumer, pool) {
            Eligibility::Allow => Ok(()),
            Eligibility::Deny(failure) => Err(failure.into()),
        }
    }

    // Produto do sub-pool de pessoa, resolvido antes de consumir
    async fn restricted_product_for(
        &self,
        pool: &Pool,
        consumer: &Consumer,
    ) -> Result<Option<Product>, AppError> {
        let Some(product_id) = pool.attribute(attrs::USER_RESTRICTED_PRODUCT) else {
            return Ok(None);
        };
        if consumer.consumer_type != ConsumerType::Person {
            return Ok(None);
        }
        let product = self
            .catalog
            .get_product(&pool.owner_key, product_id)
            .await?
            .ok_or_else(|| AppError::not_found("Produto", product_id))?;
        Ok(Some(product))
    }

    async fn try_bind(
        &self,
        ctx: &OwnerContext,
        consumer_id: Uuid,
        pool_id: Uuid,
        quantity: i64,
    ) -> Result<Bound, AppError> {
        let now = self.clock.now();

        // 1. Leitura fresca de pool e consumidor a cada tentativa
        let pool = self.owned_pool(ctx, pool_id).await?;
        let consumer = self.owned_consumer(ctx, consumer_id).await?;
        let existing = self.store.list_entitlements_by_consumer(consumer.id).await?;

        // 2. Checagens
        self.check_bind(&consumer, &pool, quantity, &existing, now).await?;
        let restricted_product = self.restricted_product_for(&pool, &consumer).await?;

        // 3. Consumo atômico, guardado pela versão lida
        let entitlement = Entitlement {
            id: Uuid::new_v4(),
            owner_key: pool.owner_key.clone(),
            consumer_id: consumer.id,
            pool_id: pool.id,
            product_id: pool.product_id.clone(),
            quantity,
            start_date: pool.start_date,
            end_date: pool.end_date,
            dirty: false,
            certificate_serial: 0,
            created_at: now,
            updated_at: now,
        };
        let exclusive = !allows_multi_entitlement(&pool);
        let pool = self.store.consume(pool.id, pool.version, entitlement.clone(), exclusive).await?;

        Ok(Bound { entitlement, pool, consumer, restricted_product })
    }

    // --- BIND POR POOL ---
    pub async fn bind_by_pool(
        &self,
        ctx: &OwnerContext,
        consumer_id: Uuid,
        pool_id: Uuid,
        quantity: i64,
        lazy_regen: Option<bool>,
    ) -> Result<Entitlement, AppError> {
        let lazy = lazy_regen.unwrap_or(self.settings.lazy_regen_default);

        let bound = with_conflict_retries(self.settings.max_conflict_retries, "bind", || {
            self.try_bind(ctx, consumer_id, pool_id, quantity)
        })
        .await?;

        tracing::info!(
            "✅ Consumidor {} consumiu {} de {} (pool {}, consumo {}/{})",
            bound.consumer.id,
            bound.entitlement.quantity,
            bound.pool.product_id,
            bound.pool.id,
            bound.pool.consumed,
            bound.pool.quantity
        );

        // Efeitos colaterais; se algum falhar, o consumo é desfeito
        if let Err(e) = self.after_bind(ctx, &bound, lazy).await {
            tracing::warn!("Desfazendo bind {} após falha: {}", bound.entitlement.id, e);
            if let Err(undo) = self.revocation.revoke_entitlement(ctx, bound.entitlement.id).await {
                tracing::error!("Falha ao desfazer bind {}: {}", bound.entitlement.id, undo);
            }
            return Err(e);
        }

        Ok(bound.entitlement)
    }

    async fn after_bind(&self, ctx: &OwnerContext, bound: &Bound, lazy: bool) -> Result<(), AppError> {
        let ent = &bound.entitlement;

        // 1. Histórico
        self.store
            .record_event(
                PoolEvent::new(&ent.owner_key, PoolEventType::EntitlementCreated, ent.pool_id, ent.created_at)
                    .with_entitlement(ent.id, ent.consumer_id, ent.quantity),
            )
            .await?;

        // 2. Sub-pool da pessoa
        if let Some(product) = &bound.restricted_product {
            self.ensure_person_pool(bound, product).await?;
        }

        // 3. Pool restrito ao host
        if host_limited_master(&bound.pool).is_some()
            && bound.consumer.is_physical_host()
            && !bound.consumer.guest_ids.is_empty()
        {
            sync_host_pool(
                self.store.as_ref(),
                self.clock.as_ref(),
                self.settings.max_conflict_retries,
                bound.consumer.id,
                &bound.pool,
                true,
            )
            .await?;
        }

        // 4. Certificado
        self.certificates.regenerate(&[ent.id], lazy).await
    }

    async fn ensure_person_pool(
        &self,
        bound: &Bound,
        product: &Product,
    ) -> Result<(), AppError> {
        let username = consumer_username(&bound.consumer).unwrap_or(&bound.consumer.name);

        // Um sub-pool por entitlement de origem; a chave única torna a criação idempotente
        let candidate = person_pool(&bound.pool, &bound.entitlement, &bound.consumer, product, self.clock.now());
        let (pool, created) = self.store.insert_pool_unique(candidate).await?;
        if created {
            self.store
                .record_event(
                    PoolEvent::new(&pool.owner_key, PoolEventType::PoolCreated, pool.id, self.clock.now())
                        .with_notes(format!("originado pelo entitlement {}", bound.entitlement.id)),
                )
                .await?;
            tracing::info!("✅ Sub-pool ilimitado de {} criado para {}", product.id, username);
        } else {
            tracing::debug!("Sub-pool do entitlement {} já existia", bound.entitlement.id);
        }
        Ok(())
    }

    // --- AUTOBIND ---
    fn autobind_quantity(pool: &Pool, requested: Option<i64>) -> Result<i64, AppError> {
        let quantity = requested.unwrap_or(1);
        match instance_multiplier(pool)? {
            Some(multiplier) => round_to_multiple(quantity, multiplier),
            None => Ok(quantity),
        }
    }

    pub async fn bind_by_product(
        &self,
        ctx: &OwnerContext,
        consumer_id: Uuid,
        product_id: &str,
        quantity: Option<i64>,
        lazy_regen: Option<bool>,
    ) -> Result<Entitlement, AppError> {
        let consumer = self.owned_consumer(ctx, consumer_id).await?;
        let existing = self.store.list_entitlements_by_consumer(consumer.id).await?;
        let now = self.clock.now();

        // 1. Candidatos que passam nas checagens
        let mut eligible: Vec<(Pool, i64)> = Vec::new();
        for pool in self.store.list_pools(&ctx.owner_key).await? {
            if !pool.provides(product_id) {
                continue;
            }
            let Ok(wanted) = Self::autobind_quantity(&pool, quantity) else {
                continue;
            };
            match self.check_bind(&consumer, &pool, wanted, &existing, now).await {
                Ok(()) => eligible.push((pool, wanted)),
                Err(AppError::Capacity(_)) | Err(AppError::Validation(_)) => {
                    tracing::debug!("Pool {} descartado para {}", pool.id, product_id);
                }
                Err(e) => return Err(e),
            }
        }

        // 2. Melhor primeiro
        eligible.sort_by(|a, b| self.settings.selection.compare(&a.0, &b.0));

        // 3. Tenta em ordem; o estado pode ter mudado desde a checagem
        for (pool, wanted) in eligible {
            match self.bind_by_pool(ctx, consumer.id, pool.id, wanted, lazy_regen).await {
                Ok(ent) => return Ok(ent),
                Err(AppError::Capacity(failure)) => {
                    tracing::debug!("Autobind no pool {} falhou: {}", pool.id, failure);
                }
                Err(e) => return Err(e),
            }
        }

        Err(BindFailure::NoPoolAvailable { product_id: product_id.to_string() }.into())
    }

    // --- AJUSTE DE QUANTIDADE ---
    pub async fn adjust_quantity(
        &self,
        ctx: &OwnerContext,
        entitlement_id: Uuid,
        quantity: i64,
    ) -> Result<Entitlement, AppError> {
        if quantity < 1 {
            return Err(AppError::Validation(format!(
                "quantidade deve ser >= 1 (recebido {})",
                quantity
            )));
        }

        let (before, ent, pool) = with_conflict_retries(
            self.settings.max_conflict_retries,
            "ajuste de quantidade",
            || async {
                let ent = self
                    .store
                    .find_entitlement(entitlement_id)
                    .await?
                    .filter(|e| ctx.owns(&e.owner_key))
                    .ok_or_else(|| AppError::not_found("Entitlement", entitlement_id))?;
                let pool = self.store.find_pool(ent.pool_id).await?.ok_or_else(|| {
                    AppError::InvariantViolation(format!("entitlement {} sem pool", ent.id))
                })?;
                if ent.quantity == quantity {
                    return Ok((ent.quantity, ent, pool));
                }

                if let Some(multiplier) = instance_multiplier(&pool)? {
                    if quantity % multiplier != 0 {
                        return Err(AppError::Validation(format!(
                            "quantidade {} não é múltiplo de instance_multiplier {}",
                            quantity, multiplier
                        )));
                    }
                }
                let delta = quantity - ent.quantity;
                if let Some(available) = pool.available() {
                    if delta > available {
                        return Err(BindFailure::InsufficientQuantity {
                            requested: delta,
                            available: available.max(0),
                        }
                        .into());
                    }
                }

                let (changed, pool) = self
                    .store
                    .change_entitlement_quantity(ent.id, quantity, pool.version)
                    .await?;
                Ok((ent.quantity, changed, pool))
            },
        )
        .await?;

        if before == ent.quantity {
            return Ok(ent);
        }

        self.store
            .record_event(
                PoolEvent::new(&ent.owner_key, PoolEventType::EntitlementChanged, pool.id, self.clock.now())
                    .with_entitlement(ent.id, ent.consumer_id, ent.quantity - before),
            )
            .await?;
        tracing::info!("Entitlement {} ajustado: {} -> {}", ent.id, before, ent.quantity);

        if host_limited_master(&pool).is_some() {
            sync_host_pool(
                self.store.as_ref(),
                self.clock.as_ref(),
                self.settings.max_conflict_retries,
                ent.consumer_id,
                &pool,
                false,
            )
            .await?;
        }
        self.certificates
            .regenerate(&[ent.id], self.settings.lazy_regen_default)
            .await?;
        Ok(ent)
    }

    // --- LISTAGEM DE POOLS DISPONÍVEIS ---
    pub async fn list_available_pools(
        &self,
        ctx: &OwnerContext,
        consumer_id: Option<Uuid>,
        product_id: Option<&str>,
    ) -> Result<Vec<Pool>, AppError> {
        self.store
            .find_owner(&ctx.owner_key)
            .await?
            .ok_or_else(|| AppError::not_found("Owner", &ctx.owner_key))?;
        let now = self.clock.now();

        // Vencidos, futuros e pendentes de exclusão nunca aparecem
        let pools: Vec<Pool> = self
            .store
            .list_pools(&ctx.owner_key)
            .await?
            .into_iter()
            .filter(|p| p.is_current(now) && !p.pending_delete)
            .filter(|p| product_id.is_none_or(|id| p.provides(id)))
            .collect();

        let Some(consumer_id) = consumer_id else {
            return Ok(pools);
        };

        // Com consumidor: só o que ele poderia consumir (esgotado ainda aparece)
        let consumer = self.owned_consumer(ctx, consumer_id).await?;
        let existing = self.store.list_entitlements_by_consumer(consumer.id).await?;
        let mut listed = Vec::new();
        for pool in pools {
            let Ok(wanted) = Self::autobind_quantity(&pool, None) else {
                continue;
            };
            match self.check_bind(&consumer, &pool, wanted, &existing, now).await {
                Ok(()) | Err(AppError::Capacity(BindFailure::InsufficientQuantity { .. })) => {
                    listed.push(pool)
                }
                Err(AppError::Capacity(_)) | Err(AppError::Validation(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(listed)
    }

    // --- POOLS DE HOST ---
    /// Garante os pools restritos de um host para cada master com virt_limit que ele consome.
    pub async fn ensure_host_pools(&self, ctx: &OwnerContext, host_id: Uuid) -> Result<Vec<Pool>, AppError> {
        let host = self.owned_consumer(ctx, host_id).await?;
        if !host.is_physical_host() || host.guest_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut masters = BTreeSet::new();
        for ent in self.store.list_entitlements_by_consumer(host.id).await? {
            masters.insert(ent.pool_id);
        }

        let mut pools = Vec::new();
        for pool_id in masters {
            let Some(master) = self.store.find_pool(pool_id).await? else {
                continue;
            };
            let sync = sync_host_pool(
                self.store.as_ref(),
                self.clock.as_ref(),
                self.settings.max_conflict_retries,
                host.id,
                &master,
                true,
            )
            .await?;
            match sync {
                HostPoolSync::Created(p) | HostPoolSync::Resized(p) | HostPoolSync::Unchanged(p) => {
                    pools.push(p)
                }
                HostPoolSync::Skipped | HostPoolSync::Orphaned(_) => {}
            }
        }
        Ok(pools)
    }

    // --- AUTOHEAL ---
    // Para cada consumidor, faz autobind de todo produto instalado ainda descoberto.
    pub async fn autoheal(&self, ctx: &OwnerContext) -> Result<AutohealReport, AppError> {
        let mut report = AutohealReport::default();
        let now = self.clock.now();

        for consumer in self.store.list_consumers(&ctx.owner_key).await? {
            report.consumers_checked += 1;

            let mut covered: BTreeSet<String> = BTreeSet::new();
            for ent in self.store.list_entitlements_by_consumer(consumer.id).await? {
                if !ent.is_active(now) {
                    continue;
                }
                if let Some(pool) = self.store.find_pool(ent.pool_id).await? {
                    covered.insert(pool.product_id.clone());
                    covered.extend(pool.provided_product_ids.iter().cloned());
                }
            }

            for product_id in &consumer.installed_product_ids {
                if covered.contains(product_id) {
                    continue;
                }
                match self.bind_by_product(ctx, consumer.id, product_id, None, None).await {
                    Ok(ent) => {
                        if let Some(pool) = self.store.find_pool(ent.pool_id).await? {
                            covered.insert(pool.product_id.clone());
                            covered.extend(pool.provided_product_ids.iter().cloned());
                        }
                        report.bound.push(ent.id);
                    }
                    Err(AppError::Capacity(failure)) => report.unresolved.push(UnresolvedProduct {
                        consumer_id: consumer.id,
                        product_id: product_id.clone(),
                        reason: failure.to_string(),
                    }),
                    Err(e) => return Err(e),
                }
            }
        }

        tracing::info!(
            "Autoheal de {}: {} consumidores, {} binds, {} produtos sem cobertura",
            ctx.owner_key,
            report.consumers_checked,
            report.bound.len(),
            report.unresolved.len()
        );
        Ok(report)
    }
}
