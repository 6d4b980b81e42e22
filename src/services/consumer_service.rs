// src/services/consumer_service.rs

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use serde::Serialize;
use uuid::Uuid;

use crate::{
    common::{clock::Clock, error::AppError, locks::KeyedLocks},
    db::EntitlementStore,
    middleware::owner::OwnerContext,
    models::{Consumer, ConsumerType, Entitlement, Pool},
    services::{
        entitler_service::EntitlerService,
        revocation_service::{RevocationReport, RevocationService},
    },
};

#[derive(Debug, Clone)]
pub struct NewConsumer {
    pub name: String,
    pub consumer_type: ConsumerType,
    pub username: Option<String>,
    pub facts: BTreeMap<String, String>,
    pub installed_product_ids: BTreeSet<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuestUpdateReport {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    // Convidados que vieram de outro host ("o último relato vence")
    pub migrated: Vec<String>,
    pub revocation: RevocationReport,
    pub host_pools: Vec<Uuid>,
}

fn normalize_guest_id(id: &str) -> String {
    id.trim().to_ascii_lowercase()
}

#[derive(Clone)]
pub struct ConsumerService {
    store: Arc<dyn EntitlementStore>,
    entitler: EntitlerService,
    revocation: RevocationService,
    clock: Arc<dyn Clock>,
    // Relatos de convidados do mesmo owner são serializados
    guest_locks: Arc<KeyedLocks<String>>,
}

impl ConsumerService {
    pub fn new(
        store: Arc<dyn EntitlementStore>,
        entitler: EntitlerService,
        revocation: RevocationService,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            entitler,
            revocation,
            clock,
            guest_locks: Arc::new(KeyedLocks::new()),
        }
    }

    // --- REGISTER ---
    pub async fn register(&self, ctx: &OwnerContext, new: NewConsumer) -> Result<Consumer, AppError> {
        if new.name.trim().is_empty() {
            return Err(AppError::Validation("nome do consumidor é obrigatório".to_string()));
        }
        self.store
            .find_owner(&ctx.owner_key)
            .await?
            .ok_or_else(|| AppError::not_found("Owner", &ctx.owner_key))?;

        let mut consumer = Consumer::new(&ctx.owner_key, &new.name, new.consumer_type, self.clock.now());
        consumer.username = new.username;
        consumer.facts = new.facts;
        consumer.installed_product_ids = new.installed_product_ids;

        let created = self.store.create_consumer(consumer).await?;
        tracing::info!(
            "✅ Consumidor {} ({}) registrado em {}",
            created.id,
            created.consumer_type.as_str(),
            ctx.owner_key
        );
        Ok(created)
    }

    pub async fn get(&self, ctx: &OwnerContext, consumer_id: Uuid) -> Result<Consumer, AppError> {
        self.store
            .find_consumer(consumer_id)
            .await?
            .filter(|c| ctx.owns(&c.owner_key))
            .ok_or_else(|| AppError::not_found("Consumidor", consumer_id))
    }

    pub async fn list(&self, ctx: &OwnerContext) -> Result<Vec<Consumer>, AppError> {
        self.store.list_consumers(&ctx.owner_key).await
    }

    pub async fn list_entitlements(
        &self,
        ctx: &OwnerContext,
        consumer_id: Uuid,
    ) -> Result<Vec<Entitlement>, AppError> {
        let consumer = self.get(ctx, consumer_id).await?;
        self.store.list_entitlements_by_consumer(consumer.id).await
    }

    pub async fn update_facts(
        &self,
        ctx: &OwnerContext,
        consumer_id: Uuid,
        facts: BTreeMap<String, String>,
    ) -> Result<Consumer, AppError> {
        // Mesmo lock do relato de convidados: a gravação é do registro inteiro
        let _guard = self.guest_locks.lock(&ctx.owner_key).await;

        let mut consumer = self.get(ctx, consumer_id).await?;
        consumer.facts = facts;
        consumer.updated_at = self.clock.now();
        self.store.update_consumer(&consumer).await
    }

    // --- UNREGISTER ---
    pub async fn unregister(&self, ctx: &OwnerContext, consumer_id: Uuid) -> Result<RevocationReport, AppError> {
        self.revocation.delete_consumer(ctx, consumer_id).await
    }

    // ---
    // Relato de convidados de um host
    // ---
    // A lista recebida substitui a anterior. Convidados que somem perdem o que
    // tiravam dos pools deste host; convidados que aparecem aqui saem da lista
    // de qualquer outro host.
    pub async fn update_guest_ids(
        &self,
        ctx: &OwnerContext,
        host_id: Uuid,
        guest_ids: BTreeSet<String>,
    ) -> Result<GuestUpdateReport, AppError> {
        let _guard = self.guest_locks.lock(&ctx.owner_key).await;

        let mut host = self.get(ctx, host_id).await?;
        let reported: BTreeSet<String> = guest_ids.iter().map(|g| normalize_guest_id(g)).collect();
        let previous: BTreeSet<String> = host.guest_ids.iter().map(|g| normalize_guest_id(g)).collect();

        let mut report = GuestUpdateReport {
            added: reported.difference(&previous).cloned().collect(),
            removed: previous.difference(&reported).cloned().collect(),
            ..Default::default()
        };

        // 1. O último relato vence: tira o convidado dos outros hosts
        for guest in &report.added {
            for mut other in self.store.find_hosts_of_guest(&ctx.owner_key, guest).await? {
                if other.id == host.id {
                    continue;
                }
                other.guest_ids.retain(|g| normalize_guest_id(g) != *guest);
                other.updated_at = self.clock.now();
                self.store.update_consumer(&other).await?;
                tracing::info!("Convidado {} migrou do host {} para {}", guest, other.id, host.id);

                let revoked = self
                    .revocation
                    .revoke_guest_access(ctx, other.id, std::slice::from_ref(guest))
                    .await?;
                report.revocation.revoked_entitlements.extend(revoked.revoked_entitlements);
                report.revocation.deleted_pools.extend(revoked.deleted_pools);
                report.migrated.push(guest.clone());
            }
        }

        // 2. Grava a nova lista
        host.guest_ids = reported;
        host.updated_at = self.clock.now();
        let host = self.store.update_consumer(&host).await?;

        // 3. Convidados que sumiram deste host
        let revoked = self.revocation.revoke_guest_access(ctx, host.id, &report.removed).await?;
        report.revocation.revoked_entitlements.extend(revoked.revoked_entitlements);
        report.revocation.deleted_pools.extend(revoked.deleted_pools);

        // 4. Pools do host para quem agora tem convidados
        report.host_pools = self
            .entitler
            .ensure_host_pools(ctx, host.id)
            .await?
            .into_iter()
            .map(|p: Pool| p.id)
            .collect();

        tracing::info!(
            "Host {} relatou {} convidado(s): +{} -{} ({} revogados)",
            host.id,
            host.guest_ids.len(),
            report.added.len(),
            report.removed.len(),
            report.revocation.revoked_entitlements.len()
        );
        Ok(report)
    }
}
