// src/models/subscription.rs

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---
// Assinatura (vem do sistema de registro externo)
// ---
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: String,
    pub owner_key: String,
    pub product_id: String,
    // Produto usado pelos pools derivados (bônus de virtualização), se houver
    pub derived_product_id: Option<String>,
    pub quantity: i64,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    #[serde(default)]
    pub provided_product_ids: BTreeSet<String>,
    pub derived_provided_product_ids: Option<BTreeSet<String>>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    pub contract_number: Option<String>,
    // Marcador de alteração: muda sempre que a assinatura muda
    pub last_modified: DateTime<Utc>,
}

impl Subscription {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.end_date <= now
    }
}
