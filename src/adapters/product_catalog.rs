// src/adapters/product_catalog.rs

use async_trait::async_trait;

use crate::{common::error::AppError, models::Product};

// Catálogo de produtos. `Ok(None)` = produto desconhecido; erro = catálogo fora do ar.
#[async_trait]
pub trait ProductCatalog: Send + Sync {
    async fn get_product(&self, owner_key: &str, product_id: &str)
        -> Result<Option<Product>, AppError>;
}
