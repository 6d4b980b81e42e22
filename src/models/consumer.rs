// src/models/consumer.rs

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

pub const FACT_IS_GUEST: &str = "virt.is_guest";
pub const FACT_VIRT_UUID: &str = "virt.uuid";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "consumer_type", rename_all = "lowercase")] // Banco
#[serde(rename_all = "lowercase")] // JSON
pub enum ConsumerType {
    System,
    Person,
    Hypervisor,
    // Distribuidor (consome para exportar manifestos)
    Candlepin,
}

impl ConsumerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsumerType::System => "system",
            ConsumerType::Person => "person",
            ConsumerType::Hypervisor => "hypervisor",
            ConsumerType::Candlepin => "candlepin",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "system" => Some(ConsumerType::System),
            "person" => Some(ConsumerType::Person),
            "hypervisor" => Some(ConsumerType::Hypervisor),
            "candlepin" => Some(ConsumerType::Candlepin),
            _ => None,
        }
    }
}

// ---
// Consumidor (sistema, pessoa ou hypervisor registrado)
// ---
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Consumer {
    pub id: Uuid,
    pub owner_key: String,
    pub name: String,
    pub consumer_type: ConsumerType,
    pub username: Option<String>,
    #[serde(default)]
    #[sqlx(json)]
    pub facts: BTreeMap<String, String>,
    // UUIDs de convidados informados por este host
    #[serde(default)]
    #[sqlx(json)]
    pub guest_ids: BTreeSet<String>,
    #[serde(default)]
    #[sqlx(json)]
    pub installed_product_ids: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Consumer {
    pub fn new(owner_key: &str, name: &str, consumer_type: ConsumerType, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_key: owner_key.to_string(),
            name: name.to_string(),
            consumer_type,
            username: None,
            facts: BTreeMap::new(),
            guest_ids: BTreeSet::new(),
            installed_product_ids: BTreeSet::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn fact(&self, name: &str) -> Option<&str> {
        self.facts.get(name).map(String::as_str)
    }

    pub fn is_guest(&self) -> bool {
        self.fact(FACT_IS_GUEST)
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    pub fn virt_uuid(&self) -> Option<&str> {
        self.fact(FACT_VIRT_UUID)
    }

    /// Host físico: não é convidado e não é uma pessoa/distribuidor.
    pub fn is_physical_host(&self) -> bool {
        !self.is_guest()
            && matches!(self.consumer_type, ConsumerType::System | ConsumerType::Hypervisor)
    }
}
