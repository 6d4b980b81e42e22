// src/adapters/certificates.rs

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::{common::error::AppError, db::EntitlementStore};

#[async_trait]
pub trait CertificateService: Send + Sync {
    /// `lazy = true` apenas agenda; `false` regenera agora.
    async fn regenerate(&self, entitlement_ids: &[Uuid], lazy: bool) -> Result<(), AppError>;
}

// Não emite certificados de verdade: mantém a contabilidade no próprio store
// (flag `dirty` e serial do certificado).
pub struct StoreCertificateService {
    store: Arc<dyn EntitlementStore>,
}

impl StoreCertificateService {
    pub fn new(store: Arc<dyn EntitlementStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl CertificateService for StoreCertificateService {
    async fn regenerate(&self, entitlement_ids: &[Uuid], lazy: bool) -> Result<(), AppError> {
        if entitlement_ids.is_empty() {
            return Ok(());
        }
        self.store.mark_certificates(entitlement_ids, lazy).await?;
        tracing::debug!(
            "Certificados de {} entitlement(s) {}",
            entitlement_ids.len(),
            if lazy { "marcados para regeneração" } else { "regenerados" }
        );
        Ok(())
    }
}
