// src/models/product.rs

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

// ---
// Nomes de atributos com significado para o motor
// ---
pub mod attrs {
    pub const VIRT_LIMIT: &str = "virt_limit";
    pub const VIRT_ONLY: &str = "virt_only";
    pub const POOL_DERIVED: &str = "pool_derived";
    pub const REQUIRES_HOST: &str = "requires_host";
    pub const REQUIRES_CONSUMER_TYPE: &str = "requires_consumer_type";
    pub const USER_LICENSE: &str = "user_license";
    pub const USER_LICENSE_PRODUCT: &str = "user_license_product";
    pub const USER_RESTRICTED_PRODUCT: &str = "user_restricted_product";
    pub const INSTANCE_MULTIPLIER: &str = "instance_multiplier";
    pub const MULTI_ENTITLEMENT: &str = "multi-entitlement";

    pub const UNLIMITED: &str = "unlimited";
}

// ---
// Produto do catálogo
// ---
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: String,
    pub name: String,
    // Sempre >= 1; escala a quantidade do pool
    pub multiplier: i64,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub provided_product_ids: BTreeSet<String>,
    #[serde(default)]
    pub content_ids: Vec<String>,
}

impl Product {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            multiplier: 1,
            attributes: BTreeMap::new(),
            provided_product_ids: BTreeSet::new(),
            content_ids: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, name: &str, value: &str) -> Self {
        self.attributes.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_multiplier(mut self, multiplier: i64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

/// "yes"/"true"/"1" ligam uma flag; qualquer outra coisa desliga.
pub fn is_truthy(value: Option<&str>) -> bool {
    matches!(
        value.map(|v| v.trim().to_ascii_lowercase()).as_deref(),
        Some("yes" | "true" | "1")
    )
}
