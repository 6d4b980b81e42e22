// src/models/owner.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// ---
// Owner (a "Organização")
// ---
// A chave é o identificador externo e imutável.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Owner {
    pub key: String,
    pub display_name: String,
    pub parent_key: Option<String>,
    // Preenchido quando um manifesto é importado
    pub upstream_consumer_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Owner {
    pub fn new(key: &str, display_name: &str, now: DateTime<Utc>) -> Self {
        Self {
            key: key.to_string(),
            display_name: display_name.to_string(),
            parent_key: None,
            upstream_consumer_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}
