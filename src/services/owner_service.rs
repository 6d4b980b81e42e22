// src/services/owner_service.rs

use std::sync::Arc;

use serde::Serialize;

use crate::{
    adapters::SubscriptionStore,
    common::{clock::Clock, error::AppError},
    db::EntitlementStore,
    middleware::owner::OwnerContext,
    models::{Owner, PoolEvent},
    services::revocation_service::{RevocationReport, RevocationService},
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerDeletion {
    pub owner_key: String,
    pub consumers_deleted: usize,
    pub subscriptions_deleted: usize,
    pub revocation: RevocationReport,
}

#[derive(Clone)]
pub struct OwnerService {
    store: Arc<dyn EntitlementStore>,
    subscriptions: Arc<dyn SubscriptionStore>,
    revocation: RevocationService,
    clock: Arc<dyn Clock>,
}

impl OwnerService {
    pub fn new(
        store: Arc<dyn EntitlementStore>,
        subscriptions: Arc<dyn SubscriptionStore>,
        revocation: RevocationService,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { store, subscriptions, revocation, clock }
    }

    // --- CREATE ---
    pub async fn create(
        &self,
        key: &str,
        display_name: &str,
        parent_key: Option<&str>,
    ) -> Result<Owner, AppError> {
        let key = key.trim();
        if key.is_empty() {
            return Err(AppError::Validation("a chave do owner é obrigatória".to_string()));
        }
        if let Some(parent) = parent_key {
            self.get(parent).await?;
        }

        let mut owner = Owner::new(key, display_name, self.clock.now());
        owner.parent_key = parent_key.map(str::to_string);
        let created = self.store.create_owner(owner).await?;
        tracing::info!("✅ Owner {} criado", created.key);
        Ok(created)
    }

    pub async fn get(&self, key: &str) -> Result<Owner, AppError> {
        self.store
            .find_owner(key)
            .await?
            .ok_or_else(|| AppError::not_found("Owner", key))
    }

    pub async fn list(&self) -> Result<Vec<Owner>, AppError> {
        self.store.list_owners().await
    }

    // --- PARENT ---
    // A árvore de owners não pode ter ciclos.
    pub async fn set_parent(&self, key: &str, parent_key: Option<&str>) -> Result<Owner, AppError> {
        let mut owner = self.get(key).await?;

        if let Some(parent) = parent_key {
            let total = self.store.list_owners().await?.len();
            let mut cursor = Some(parent.to_string());
            let mut steps = 0;
            while let Some(current) = cursor {
                if current == key {
                    return Err(AppError::Validation(format!(
                        "'{}' não pode ser pai de '{}': formaria um ciclo",
                        parent, key
                    )));
                }
                steps += 1;
                if steps > total {
                    return Err(AppError::InvariantViolation(format!(
                        "a hierarquia acima de '{}' já contém um ciclo",
                        parent
                    )));
                }
                cursor = self.get(&current).await?.parent_key;
            }
        }

        owner.parent_key = parent_key.map(str::to_string);
        owner.updated_at = self.clock.now();
        self.store.update_owner(&owner).await
    }

    /// Registra o consumidor upstream quando um manifesto é importado.
    pub async fn link_upstream(&self, key: &str, upstream_consumer_id: Option<&str>) -> Result<Owner, AppError> {
        let mut owner = self.get(key).await?;
        owner.upstream_consumer_id = upstream_consumer_id.map(str::to_string);
        owner.updated_at = self.clock.now();
        self.store.update_owner(&owner).await
    }

    pub async fn list_events(&self, ctx: &OwnerContext) -> Result<Vec<PoolEvent>, AppError> {
        self.get(&ctx.owner_key).await?;
        self.store.list_events(&ctx.owner_key).await
    }

    // --- DELETE ---
    pub async fn delete(&self, key: &str, cascade_subscriptions: bool) -> Result<OwnerDeletion, AppError> {
        let owner = self.get(key).await?;
        let ctx = OwnerContext::new(&owner.key);
        let mut deletion = OwnerDeletion { owner_key: owner.key.clone(), ..Default::default() };

        // 1. Consumidores (e tudo que os entitlements deles originaram)
        for consumer in self.store.list_consumers(&owner.key).await? {
            let report = self.revocation.delete_consumer(&ctx, consumer.id).await?;
            deletion.revocation.revoked_entitlements.extend(report.revoked_entitlements);
            deletion.revocation.deleted_pools.extend(report.deleted_pools);
            deletion.consumers_deleted += 1;
        }

        // 2. Pools restantes
        for pool in self.store.list_pools(&owner.key).await? {
            let report = match self.revocation.delete_pool(&ctx, pool.id).await {
                Ok(report) => report,
                // Já caiu na cascata de outro pool
                Err(AppError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            };
            deletion.revocation.revoked_entitlements.extend(report.revoked_entitlements);
            deletion.revocation.deleted_pools.extend(report.deleted_pools);
        }

        // 3. Assinaturas, a menos que suprimido
        if cascade_subscriptions {
            deletion.subscriptions_deleted =
                self.subscriptions.delete_subscriptions_for_owner(&owner.key).await?;
        }

        // 4. Filhos ficam sem pai
        for mut child in self.store.list_owners().await? {
            if child.parent_key.as_deref() == Some(owner.key.as_str()) {
                tracing::warn!("Owner {} perdeu o pai {}", child.key, owner.key);
                child.parent_key = None;
                child.updated_at = self.clock.now();
                self.store.update_owner(&child).await?;
            }
        }

        self.store.delete_owner(&owner.key).await?;
        tracing::info!(
            "🗑️ Owner {} removido ({} consumidores, {} pools, {} assinaturas)",
            owner.key,
            deletion.consumers_deleted,
            deletion.revocation.deleted_pools.len(),
            deletion.subscriptions_deleted
        );
        Ok(deletion)
    }
}
