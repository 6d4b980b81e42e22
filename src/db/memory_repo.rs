// src/db/memory_repo.rs

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    common::error::{AppError, BindFailure},
    db::store::EntitlementStore,
    models::{Consumer, Entitlement, Owner, Pool, PoolEvent, PoolKey},
};

#[derive(Default)]
struct MemoryState {
    owners: BTreeMap<String, Owner>,
    consumers: HashMap<Uuid, Consumer>,
    pools: HashMap<Uuid, Pool>,
    pool_keys: HashMap<PoolKey, Uuid>,
    entitlements: HashMap<Uuid, Entitlement>,
    events: Vec<PoolEvent>,
}

impl MemoryState {
    fn pool_mut(&mut self, id: Uuid) -> Result<&mut Pool, AppError> {
        self.pools
            .get_mut(&id)
            .ok_or_else(|| AppError::not_found("Pool", id))
    }
}

// ---
// Repositório em memória
// ---
// Um único RwLock: cada operação composta (contador + entitlement) é atômica
// porque roda inteira sob o lock de escrita.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn sorted_pools(mut pools: Vec<Pool>) -> Vec<Pool> {
    pools.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
    pools
}

fn sorted_entitlements(mut ents: Vec<Entitlement>) -> Vec<Entitlement> {
    ents.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
    ents
}

fn stale(pool_id: Uuid, expected: i64, actual: i64) -> AppError {
    AppError::Conflict(format!(
        "pool {} mudou (versão esperada {}, atual {})",
        pool_id, expected, actual
    ))
}

#[async_trait]
impl EntitlementStore for MemoryStore {
    // --- Owners ---

    async fn create_owner(&self, owner: Owner) -> Result<Owner, AppError> {
        let mut state = self.state.write().await;
        if state.owners.contains_key(&owner.key) {
            return Err(AppError::Conflict(format!("owner '{}' já existe", owner.key)));
        }
        state.owners.insert(owner.key.clone(), owner.clone());
        Ok(owner)
    }

    async fn find_owner(&self, key: &str) -> Result<Option<Owner>, AppError> {
        Ok(self.state.read().await.owners.get(key).cloned())
    }

    async fn list_owners(&self) -> Result<Vec<Owner>, AppError> {
        Ok(self.state.read().await.owners.values().cloned().collect())
    }

    async fn update_owner(&self, owner: &Owner) -> Result<Owner, AppError> {
        let mut state = self.state.write().await;
        match state.owners.get_mut(&owner.key) {
            Some(stored) => {
                *stored = owner.clone();
                Ok(stored.clone())
            }
            None => Err(AppError::not_found("Owner", &owner.key)),
        }
    }

    async fn delete_owner(&self, key: &str) -> Result<(), AppError> {
        self.state.write().await.owners.remove(key);
        Ok(())
    }

    // --- Consumidores ---

    async fn create_consumer(&self, consumer: Consumer) -> Result<Consumer, AppError> {
        let mut state = self.state.write().await;
        if !state.owners.contains_key(&consumer.owner_key) {
            return Err(AppError::not_found("Owner", &consumer.owner_key));
        }
        state.consumers.insert(consumer.id, consumer.clone());
        Ok(consumer)
    }

    async fn find_consumer(&self, id: Uuid) -> Result<Option<Consumer>, AppError> {
        Ok(self.state.read().await.consumers.get(&id).cloned())
    }

    async fn list_consumers(&self, owner_key: &str) -> Result<Vec<Consumer>, AppError> {
        let state = self.state.read().await;
        let mut consumers: Vec<Consumer> = state
            .consumers
            .values()
            .filter(|c| c.owner_key == owner_key)
            .cloned()
            .collect();
        consumers.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        Ok(consumers)
    }

    async fn update_consumer(&self, consumer: &Consumer) -> Result<Consumer, AppError> {
        let mut state = self.state.write().await;
        match state.consumers.get_mut(&consumer.id) {
            Some(stored) => {
                *stored = consumer.clone();
                Ok(stored.clone())
            }
            None => Err(AppError::not_found("Consumidor", consumer.id)),
        }
    }

    async fn delete_consumer(&self, id: Uuid) -> Result<(), AppError> {
        let mut state = self.state.write().await;
        if state.entitlements.values().any(|e| e.consumer_id == id) {
            return Err(AppError::Conflict(format!(
                "consumidor {} ainda possui entitlements",
                id
            )));
        }
        state.consumers.remove(&id);
        Ok(())
    }

    async fn find_hosts_of_guest(
        &self,
        owner_key: &str,
        guest_uuid: &str,
    ) -> Result<Vec<Consumer>, AppError> {
        let state = self.state.read().await;
        Ok(state
            .consumers
            .values()
            .filter(|c| c.owner_key == owner_key && c.guest_ids.contains(guest_uuid))
            .cloned()
            .collect())
    }

    async fn find_guests_by_virt_uuid(
        &self,
        owner_key: &str,
        virt_uuid: &str,
    ) -> Result<Vec<Consumer>, AppError> {
        let state = self.state.read().await;
        Ok(state
            .consumers
            .values()
            .filter(|c| {
                c.owner_key == owner_key
                    && c.virt_uuid().is_some_and(|u| u.eq_ignore_ascii_case(virt_uuid))
            })
            .cloned()
            .collect())
    }

    // --- Pools ---

    async fn find_pool(&self, id: Uuid) -> Result<Option<Pool>, AppError> {
        Ok(self.state.read().await.pools.get(&id).cloned())
    }

    async fn find_pool_by_key(&self, key: &PoolKey) -> Result<Option<Pool>, AppError> {
        let state = self.state.read().await;
        Ok(state
            .pool_keys
            .get(key)
            .and_then(|id| state.pools.get(id))
            .cloned())
    }

    async fn list_pools(&self, owner_key: &str) -> Result<Vec<Pool>, AppError> {
        let state = self.state.read().await;
        Ok(sorted_pools(
            state
                .pools
                .values()
                .filter(|p| p.owner_key == owner_key)
                .cloned()
                .collect(),
        ))
    }

    async fn list_pools_restricted_to(&self, consumer_id: Uuid) -> Result<Vec<Pool>, AppError> {
        let state = self.state.read().await;
        Ok(sorted_pools(
            state
                .pools
                .values()
                .filter(|p| p.restricted_to_consumer() == Some(consumer_id))
                .cloned()
                .collect(),
        ))
    }

    async fn insert_pool_unique(&self, pool: Pool) -> Result<(Pool, bool), AppError> {
        let mut state = self.state.write().await;
        if let Some(key) = pool.key() {
            if let Some(existing) = state.pool_keys.get(&key).and_then(|id| state.pools.get(id)) {
                return Ok((existing.clone(), false));
            }
            state.pool_keys.insert(key, pool.id);
        }
        state.pools.insert(pool.id, pool.clone());
        Ok((pool, true))
    }

    async fn update_pool(&self, pool: &Pool) -> Result<Pool, AppError> {
        let mut state = self.state.write().await;
        let stored = state.pool_mut(pool.id)?;
        if stored.version != pool.version {
            return Err(stale(pool.id, pool.version, stored.version));
        }
        let consumed = stored.consumed;
        *stored = pool.clone();
        stored.consumed = consumed;
        stored.version += 1;
        Ok(stored.clone())
    }

    async fn delete_pool(&self, id: Uuid) -> Result<(), AppError> {
        let mut state = self.state.write().await;
        if state.entitlements.values().any(|e| e.pool_id == id) {
            return Err(AppError::Conflict(format!("pool {} ainda possui entitlements", id)));
        }
        if let Some(pool) = state.pools.remove(&id) {
            if let Some(key) = pool.key() {
                state.pool_keys.remove(&key);
            }
        }
        Ok(())
    }

    // --- Entitlements ---

    async fn find_entitlement(&self, id: Uuid) -> Result<Option<Entitlement>, AppError> {
        Ok(self.state.read().await.entitlements.get(&id).cloned())
    }

    async fn list_entitlements_by_consumer(
        &self,
        consumer_id: Uuid,
    ) -> Result<Vec<Entitlement>, AppError> {
        let state = self.state.read().await;
        Ok(sorted_entitlements(
            state
                .entitlements
                .values()
                .filter(|e| e.consumer_id == consumer_id)
                .cloned()
                .collect(),
        ))
    }

    async fn list_entitlements_by_pool(&self, pool_id: Uuid) -> Result<Vec<Entitlement>, AppError> {
        let state = self.state.read().await;
        Ok(sorted_entitlements(
            state
                .entitlements
                .values()
                .filter(|e| e.pool_id == pool_id)
                .cloned()
                .collect(),
        ))
    }

    async fn list_entitlements_by_owner(
        &self,
        owner_key: &str,
    ) -> Result<Vec<Entitlement>, AppError> {
        let state = self.state.read().await;
        Ok(sorted_entitlements(
            state
                .entitlements
                .values()
                .filter(|e| e.owner_key == owner_key)
                .cloned()
                .collect(),
        ))
    }

    async fn consume(
        &self,
        pool_id: Uuid,
        expected_version: i64,
        entitlement: Entitlement,
        exclusive_product: bool,
    ) -> Result<Pool, AppError> {
        let mut state = self.state.write().await;
        if !state.consumers.contains_key(&entitlement.consumer_id) {
            return Err(AppError::not_found("Consumidor", entitlement.consumer_id));
        }
        if exclusive_product {
            let now = entitlement.created_at;
            let duplicated = state.entitlements.values().any(|e| {
                e.consumer_id == entitlement.consumer_id
                    && e.product_id == entitlement.product_id
                    && e.pool_id != pool_id
                    && e.is_active(now)
            });
            if duplicated {
                return Err(BindFailure::AlreadyHasProduct {
                    product_id: entitlement.product_id.clone(),
                }
                .into());
            }
        }
        let pool = state.pool_mut(pool_id)?;
        if pool.version != expected_version {
            return Err(stale(pool_id, expected_version, pool.version));
        }
        pool.consumed += entitlement.quantity;
        pool.version += 1;
        pool.updated_at = entitlement.created_at;
        let updated = pool.clone();
        state.entitlements.insert(entitlement.id, entitlement);
        Ok(updated)
    }

    async fn release(&self, entitlement_id: Uuid) -> Result<Option<(Entitlement, Pool)>, AppError> {
        let mut state = self.state.write().await;
        let Some(entitlement) = state.entitlements.get(&entitlement_id).cloned() else {
            return Ok(None);
        };

        // Valida antes de mutar qualquer coisa
        let remaining = match state.pools.get(&entitlement.pool_id) {
            Some(pool) => pool.consumed - entitlement.quantity,
            None => {
                return Err(AppError::InvariantViolation(format!(
                    "entitlement {} aponta para pool inexistente {}",
                    entitlement.id, entitlement.pool_id
                )));
            }
        };
        if remaining < 0 {
            return Err(AppError::InvariantViolation(format!(
                "consumo negativo no pool {}",
                entitlement.pool_id
            )));
        }

        state.entitlements.remove(&entitlement_id);
        let pool = state.pool_mut(entitlement.pool_id)?;
        pool.consumed = remaining;
        pool.version += 1;
        let updated = pool.clone();
        Ok(Some((entitlement, updated)))
    }

    async fn change_entitlement_quantity(
        &self,
        entitlement_id: Uuid,
        quantity: i64,
        expected_version: i64,
    ) -> Result<(Entitlement, Pool), AppError> {
        let mut state = self.state.write().await;
        let (pool_id, previous) = match state.entitlements.get(&entitlement_id) {
            Some(e) => (e.pool_id, e.quantity),
            None => return Err(AppError::not_found("Entitlement", entitlement_id)),
        };
        let pool = state.pool_mut(pool_id)?;
        if pool.version != expected_version {
            return Err(stale(pool_id, expected_version, pool.version));
        }
        pool.consumed += quantity - previous;
        pool.version += 1;
        let updated_pool = pool.clone();

        let entitlement = state
            .entitlements
            .get_mut(&entitlement_id)
            .ok_or_else(|| AppError::not_found("Entitlement", entitlement_id))?;
        entitlement.quantity = quantity;
        Ok((entitlement.clone(), updated_pool))
    }

    async fn update_entitlement_dates(
        &self,
        pool_id: Uuid,
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, AppError> {
        let mut state = self.state.write().await;
        let mut changed = Vec::new();
        for ent in state.entitlements.values_mut().filter(|e| e.pool_id == pool_id) {
            if ent.start_date != start_date || ent.end_date != end_date {
                ent.start_date = start_date;
                ent.end_date = end_date;
                changed.push(ent.id);
            }
        }
        Ok(changed)
    }

    async fn mark_certificates(
        &self,
        entitlement_ids: &[Uuid],
        dirty: bool,
    ) -> Result<(), AppError> {
        let mut state = self.state.write().await;
        for id in entitlement_ids {
            if let Some(ent) = state.entitlements.get_mut(id) {
                ent.dirty = dirty;
                if !dirty {
                    ent.certificate_serial += 1;
                }
            }
        }
        Ok(())
    }

    // --- Histórico ---

    async fn record_event(&self, event: PoolEvent) -> Result<(), AppError> {
        self.state.write().await.events.push(event);
        Ok(())
    }

    async fn list_events(&self, owner_key: &str) -> Result<Vec<PoolEvent>, AppError> {
        let state = self.state.read().await;
        Ok(state
            .events
            .iter()
            .filter(|e| e.owner_key == owner_key)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};

    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::models::{ConsumerType, PoolKind};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap()
    }

    fn master_pool(subscription_id: &str, quantity: i64) -> Pool {
        Pool {
            id: Uuid::new_v4(),
            owner_key: "acme".to_string(),
            subscription_id: Some(subscription_id.to_string()),
            kind: PoolKind::Master,
            product_id: "P1".to_string(),
            product_name: "Produto 1".to_string(),
            provided_product_ids: BTreeSet::new(),
            quantity,
            consumed: 0,
            start_date: now() - Duration::days(1),
            end_date: now() + Duration::days(30),
            attributes: BTreeMap::new(),
            restricted_to_username: None,
            pending_delete: false,
            subscription_modified: Some(now()),
            version: 0,
            created_at: now(),
            updated_at: now(),
        }
    }

    fn entitlement(consumer_id: Uuid, pool: &Pool, quantity: i64) -> Entitlement {
        Entitlement {
            id: Uuid::new_v4(),
            owner_key: pool.owner_key.clone(),
            consumer_id,
            pool_id: pool.id,
            product_id: pool.product_id.clone(),
            quantity,
            start_date: pool.start_date,
            end_date: pool.end_date,
            dirty: false,
            certificate_serial: 0,
            created_at: now(),
            updated_at: now(),
        }
    }

    async fn seeded() -> (MemoryStore, Consumer, Pool) {
        let store = MemoryStore::new();
        store.create_owner(Owner::new("acme", "Acme", now())).await.unwrap();
        let consumer = store
            .create_consumer(Consumer::new("acme", "web", ConsumerType::System, now()))
            .await
            .unwrap();
        let (pool, _) = store.insert_pool_unique(master_pool("sub-1", 10)).await.unwrap();
        (store, consumer, pool)
    }

    #[tokio::test]
    async fn consume_with_a_stale_version_is_a_conflict() {
        let (store, consumer, pool) = seeded().await;
        store.consume(pool.id, pool.version, entitlement(consumer.id, &pool, 2), true).await.unwrap();

        let err = store
            .consume(pool.id, pool.version, entitlement(consumer.id, &pool, 2), true)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Conflict(_)));
        let stored = store.find_pool(pool.id).await.unwrap().unwrap();
        assert_eq!(stored.consumed, 2);
        assert_eq!(stored.version, pool.version + 1);
    }

    #[tokio::test]
    async fn exclusive_consume_refuses_the_same_product_from_another_pool() {
        let (store, consumer, pool) = seeded().await;
        let (other, _) = store.insert_pool_unique(master_pool("sub-2", 10)).await.unwrap();
        store.consume(pool.id, pool.version, entitlement(consumer.id, &pool, 1), true).await.unwrap();

        let err = store
            .consume(other.id, other.version, entitlement(consumer.id, &other, 1), true)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Capacity(BindFailure::AlreadyHasProduct { .. })));
        assert_eq!(store.find_pool(other.id).await.unwrap().unwrap().consumed, 0);

        // Sem exclusividade (multi-entitlement) o mesmo pedido passa
        store.consume(other.id, other.version, entitlement(consumer.id, &other, 1), false).await.unwrap();
    }

    #[tokio::test]
    async fn release_gives_the_quantity_back() {
        let (store, consumer, pool) = seeded().await;
        let ent = entitlement(consumer.id, &pool, 3);
        store.consume(pool.id, pool.version, ent.clone(), true).await.unwrap();

        let (released, after) = store.release(ent.id).await.unwrap().unwrap();

        assert_eq!(released.id, ent.id);
        assert_eq!(after.consumed, 0);
        assert!(store.release(ent.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn pool_with_entitlements_cannot_be_deleted() {
        let (store, consumer, pool) = seeded().await;
        store.consume(pool.id, pool.version, entitlement(consumer.id, &pool, 1), true).await.unwrap();

        let err = store.delete_pool(pool.id).await.unwrap_err();

        assert!(matches!(err, AppError::Conflict(_)));
        assert!(store.find_pool(pool.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn insert_pool_unique_returns_the_existing_pool() {
        let (store, _, pool) = seeded().await;

        let (existing, created) = store.insert_pool_unique(master_pool("sub-1", 99)).await.unwrap();

        assert!(!created);
        assert_eq!(existing.id, pool.id);
        assert_eq!(store.list_pools("acme").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn update_pool_keeps_the_stored_consumption() {
        let (store, consumer, pool) = seeded().await;
        let after_consume = store
            .consume(pool.id, pool.version, entitlement(consumer.id, &pool, 4), true)
            .await
            .unwrap();

        let mut changed = after_consume.clone();
        changed.quantity = 20;
        changed.consumed = 0;
        let updated = store.update_pool(&changed).await.unwrap();

        assert_eq!(updated.quantity, 20);
        assert_eq!(updated.consumed, 4);
        assert!(matches!(store.update_pool(&changed).await, Err(AppError::Conflict(_))));
    }
}
