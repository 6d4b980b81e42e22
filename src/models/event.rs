// src/models/event.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "pool_event_type", rename_all = "SCREAMING_SNAKE_CASE")] // Banco
#[serde(rename_all = "SCREAMING_SNAKE_CASE")] // JSON
pub enum PoolEventType {
    PoolCreated,
    PoolUpdated,
    PoolFlaggedForDelete,
    PoolDeleted,
    EntitlementCreated,
    EntitlementChanged,
    EntitlementRevoked,
}

// ---
// Histórico de movimentações de pools (livro-razão)
// ---
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PoolEvent {
    pub id: Uuid,
    pub owner_key: String,
    pub event_type: PoolEventType,
    pub pool_id: Uuid,
    pub entitlement_id: Option<Uuid>,
    pub consumer_id: Option<Uuid>,
    // Variação no consumo do pool (+ no bind, - na revogação)
    pub quantity_delta: i64,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl PoolEvent {
    pub fn new(owner_key: &str, event_type: PoolEventType, pool_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_key: owner_key.to_string(),
            event_type,
            pool_id,
            entitlement_id: None,
            consumer_id: None,
            quantity_delta: 0,
            notes: None,
            created_at: now,
        }
    }

    pub fn with_entitlement(mut self, entitlement_id: Uuid, consumer_id: Uuid, delta: i64) -> Self {
        self.entitlement_id = Some(entitlement_id);
        self.consumer_id = Some(consumer_id);
        self.quantity_delta = delta;
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}
