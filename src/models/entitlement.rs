// src/models/entitlement.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ---
// Entitlement (o "direito" de um consumidor sobre parte de um pool)
// ---
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Entitlement {
    pub id: Uuid,
    pub owner_key: String,
    pub consumer_id: Uuid,
    pub pool_id: Uuid,
    // Cópia do produto do pool, usada na checagem de multi-entitlement
    pub product_id: String,
    pub quantity: i64,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    // Certificado pendente de regeneração
    pub dirty: bool,
    pub certificate_serial: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entitlement {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.start_date <= now && now < self.end_date
    }
}
