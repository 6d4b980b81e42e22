// tests/common/mod.rs
#![allow(dead_code)]

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use chrono::{DateTime, Duration, TimeZone, Utc};
use uuid::Uuid;

use entitlement_backend::{
    adapters::SubscriptionStore,
    common::clock::FixedClock,
    config::{AppConfig, AppState},
    middleware::owner::OwnerContext,
    models::{
        consumer::{FACT_IS_GUEST, FACT_VIRT_UUID},
        Consumer, ConsumerType, Entitlement, Pool, PoolKind, Product, Subscription,
    },
    services::{NewConsumer, RefreshOptions, RefreshReport},
};

pub const OWNER: &str = "acme";

pub fn start_of_test() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2030, 6, 1, 12, 0, 0).unwrap()
}

pub struct TestApp {
    pub state: AppState,
    pub clock: Arc<FixedClock>,
}

impl TestApp {
    /// Estado em memória com o owner `acme` já criado.
    pub async fn new() -> Self {
        let app = Self::empty();
        app.state
            .owner_service
            .create(OWNER, "Acme Corp", None)
            .await
            .unwrap();
        app
    }

    pub fn empty() -> Self {
        let clock = Arc::new(FixedClock::new(start_of_test()));
        let state = AppState::in_memory(AppConfig::default(), clock.clone());
        Self { state, clock }
    }

    pub fn ctx(&self) -> OwnerContext {
        OwnerContext::new(OWNER)
    }

    // --- Catálogo hospedado ---

    pub async fn product(&self, product: Product) {
        self.state.hosted.put_product(product).await.unwrap();
    }

    pub fn subscription(&self, id: &str, product_id: &str, quantity: i64) -> Subscription {
        let now = self.clock_now();
        Subscription {
            id: id.to_string(),
            owner_key: OWNER.to_string(),
            product_id: product_id.to_string(),
            derived_product_id: None,
            quantity,
            start_date: now - Duration::days(30),
            end_date: now + Duration::days(365),
            provided_product_ids: BTreeSet::new(),
            derived_provided_product_ids: None,
            attributes: BTreeMap::new(),
            contract_number: None,
            last_modified: now,
        }
    }

    pub async fn put_subscription(&self, subscription: Subscription) {
        self.state.hosted.upsert_subscription(subscription).await.unwrap();
    }

    pub async fn refresh(&self) -> RefreshReport {
        self.state
            .refresh_service
            .refresh_pools(&self.ctx(), RefreshOptions { lazy_regen: true, auto_create_owner: false })
            .await
            .unwrap()
    }

    pub fn clock_now(&self) -> DateTime<Utc> {
        use entitlement_backend::common::clock::Clock;
        self.clock.now()
    }

    // --- Consumidores ---

    pub async fn register(&self, name: &str, consumer_type: ConsumerType) -> Consumer {
        self.register_with(name, consumer_type, None, BTreeMap::new()).await
    }

    pub async fn register_with(
        &self,
        name: &str,
        consumer_type: ConsumerType,
        username: Option<&str>,
        facts: BTreeMap<String, String>,
    ) -> Consumer {
        self.state
            .consumer_service
            .register(
                &self.ctx(),
                NewConsumer {
                    name: name.to_string(),
                    consumer_type,
                    username: username.map(str::to_string),
                    facts,
                    installed_product_ids: BTreeSet::new(),
                },
            )
            .await
            .unwrap()
    }

    pub async fn register_guest(&self, name: &str, virt_uuid: &str) -> Consumer {
        let facts = BTreeMap::from([
            (FACT_IS_GUEST.to_string(), "true".to_string()),
            (FACT_VIRT_UUID.to_string(), virt_uuid.to_string()),
        ]);
        self.register_with(name, ConsumerType::System, None, facts).await
    }

    // --- Leituras ---

    pub async fn pools(&self) -> Vec<Pool> {
        self.state.store.list_pools(OWNER).await.unwrap()
    }

    pub async fn pool_of(&self, subscription_id: &str, kind: PoolKind) -> Pool {
        self.pools()
            .await
            .into_iter()
            .find(|p| p.subscription_id.as_deref() == Some(subscription_id) && p.kind == kind)
            .unwrap_or_else(|| panic!("nenhum pool {:?} para {}", kind, subscription_id))
    }

    pub async fn pool(&self, id: Uuid) -> Option<Pool> {
        self.state.store.find_pool(id).await.unwrap()
    }

    pub async fn entitlements_of(&self, consumer_id: Uuid) -> Vec<Entitlement> {
        self.state
            .store
            .list_entitlements_by_consumer(consumer_id)
            .await
            .unwrap()
    }

    pub async fn bind(&self, consumer_id: Uuid, pool_id: Uuid, quantity: i64) -> Entitlement {
        self.state
            .entitler_service
            .bind_by_pool(&self.ctx(), consumer_id, pool_id, quantity, None)
            .await
            .unwrap()
    }

    /// consumed == soma dos entitlements vivos, e nunca negativo.
    pub async fn assert_consumption_consistent(&self) {
        for pool in self.pools().await {
            let sum: i64 = self
                .state
                .store
                .list_entitlements_by_pool(pool.id)
                .await
                .unwrap()
                .iter()
                .map(|e| e.quantity)
                .sum();
            assert_eq!(pool.consumed, sum, "consumo divergente no pool {}", pool.id);
            assert!(pool.consumed >= 0, "consumo negativo no pool {}", pool.id);
        }
    }

    /// Além da consistência, nenhum pool limitado passa da quantidade.
    pub async fn assert_within_capacity(&self) {
        self.assert_consumption_consistent().await;
        for pool in self.pools().await {
            if !pool.is_unlimited() {
                assert!(pool.consumed <= pool.quantity, "pool {} acima da capacidade", pool.id);
            }
        }
    }
}
