// src/adapters/subscription_store.rs

use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    adapters::product_catalog::ProductCatalog,
    common::error::AppError,
    models::{Product, Subscription},
};

// ---
// Sistema de registro das assinaturas
// ---
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn list_subscriptions(&self, owner_key: &str) -> Result<Vec<Subscription>, AppError>;
    async fn get_subscription(&self, id: &str) -> Result<Option<Subscription>, AppError>;
    async fn upsert_subscription(&self, subscription: Subscription)
        -> Result<Subscription, AppError>;
    /// Retorna `true` se a assinatura existia.
    async fn delete_subscription(&self, id: &str) -> Result<bool, AppError>;
    async fn delete_subscriptions_for_owner(&self, owner_key: &str) -> Result<usize, AppError>;
}

#[derive(Default)]
struct HostedState {
    subscriptions: BTreeMap<String, Subscription>,
    products: BTreeMap<String, Product>,
}

// ---
// Catálogo "hospedado" em memória
// ---
// Faz o papel de assinaturas e de catálogo ao mesmo tempo. Pode ser
// desligado com `set_available(false)` para simular o upstream fora do ar.
pub struct HostedCatalog {
    state: RwLock<HostedState>,
    available: AtomicBool,
}

impl Default for HostedCatalog {
    fn default() -> Self {
        Self {
            state: RwLock::new(HostedState::default()),
            available: AtomicBool::new(true),
        }
    }
}

impl HostedCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> Result<(), AppError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(AppError::UpstreamUnavailable(
                "catálogo hospedado indisponível".to_string(),
            ))
        }
    }

    pub async fn put_product(&self, product: Product) -> Result<Product, AppError> {
        if product.multiplier < 1 {
            return Err(AppError::Validation(format!(
                "multiplicador do produto '{}' deve ser >= 1",
                product.id
            )));
        }
        self.ensure_available()?;
        let mut state = self.state.write().await;
        state.products.insert(product.id.clone(), product.clone());
        Ok(product)
    }

    pub async fn list_products(&self) -> Result<Vec<Product>, AppError> {
        self.ensure_available()?;
        Ok(self.state.read().await.products.values().cloned().collect())
    }
}

#[async_trait]
impl SubscriptionStore for HostedCatalog {
    async fn list_subscriptions(&self, owner_key: &str) -> Result<Vec<Subscription>, AppError> {
        self.ensure_available()?;
        let state = self.state.read().await;
        Ok(state
            .subscriptions
            .values()
            .filter(|s| s.owner_key == owner_key)
            .cloned()
            .collect())
    }

    async fn get_subscription(&self, id: &str) -> Result<Option<Subscription>, AppError> {
        self.ensure_available()?;
        Ok(self.state.read().await.subscriptions.get(id).cloned())
    }

    async fn upsert_subscription(
        &self,
        subscription: Subscription,
    ) -> Result<Subscription, AppError> {
        self.ensure_available()?;
        let mut state = self.state.write().await;
        state
            .subscriptions
            .insert(subscription.id.clone(), subscription.clone());
        Ok(subscription)
    }

    async fn delete_subscription(&self, id: &str) -> Result<bool, AppError> {
        self.ensure_available()?;
        Ok(self.state.write().await.subscriptions.remove(id).is_some())
    }

    async fn delete_subscriptions_for_owner(&self, owner_key: &str) -> Result<usize, AppError> {
        self.ensure_available()?;
        let mut state = self.state.write().await;
        let before = state.subscriptions.len();
        state.subscriptions.retain(|_, s| s.owner_key != owner_key);
        Ok(before - state.subscriptions.len())
    }
}

#[async_trait]
impl ProductCatalog for HostedCatalog {
    // O catálogo hospedado é global: o owner não restringe a busca
    async fn get_product(
        &self,
        _owner_key: &str,
        product_id: &str,
    ) -> Result<Option<Product>, AppError> {
        self.ensure_available()?;
        Ok(self.state.read().await.products.get(product_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use std::collections::{BTreeMap, BTreeSet};

    fn subscription(id: &str, owner: &str) -> Subscription {
        let now = Utc::now();
        Subscription {
            id: id.into(),
            owner_key: owner.into(),
            product_id: "P1".into(),
            derived_product_id: None,
            quantity: 10,
            start_date: now - Duration::days(1),
            end_date: now + Duration::days(30),
            provided_product_ids: BTreeSet::new(),
            derived_provided_product_ids: None,
            attributes: BTreeMap::new(),
            contract_number: None,
            last_modified: now,
        }
    }

    #[tokio::test]
    async fn subscriptions_are_listed_per_owner() {
        let hosted = HostedCatalog::new();
        hosted.upsert_subscription(subscription("s1", "acme")).await.unwrap();
        hosted.upsert_subscription(subscription("s2", "other")).await.unwrap();

        let acme = hosted.list_subscriptions("acme").await.unwrap();
        assert_eq!(acme.len(), 1);
        assert_eq!(hosted.delete_subscriptions_for_owner("acme").await.unwrap(), 1);
        assert!(hosted.get_subscription("s1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unavailable_catalog_is_retryable() {
        let hosted = HostedCatalog::new();
        hosted.set_available(false);
        let err = hosted.list_subscriptions("acme").await.unwrap_err();
        assert!(err.is_retryable());
        assert!(matches!(err, AppError::UpstreamUnavailable(_)));
    }
}
