// src/models/pool.rs

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::product::attrs;

/// Quantidade que representa "ilimitado".
pub const UNLIMITED: i64 = -1;

// ---
// Tipo do pool
// ---
// Decidido uma única vez (na refresh ou no bind que cria o sub-pool).
// `Master` e `VirtBonus` nascem de assinaturas; os restritos nascem de binds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PoolKind {
    Master,
    VirtBonus,
    #[serde(rename_all = "camelCase")]
    PersonRestricted { source_entitlement_id: Uuid },
    #[serde(rename_all = "camelCase")]
    HostRestricted { host_id: Uuid },
    // Pool criado diretamente, sem assinatura
    Custom,
}

impl PoolKind {
    pub fn sub_key(&self) -> &'static str {
        match self {
            PoolKind::Master => "master",
            PoolKind::VirtBonus | PoolKind::HostRestricted { .. } => "derived",
            PoolKind::PersonRestricted { .. } => "bonus",
            PoolKind::Custom => "custom",
        }
    }

    pub fn is_derived(&self) -> bool {
        !matches!(self, PoolKind::Master | PoolKind::Custom)
    }
}

// ---
// Chave de unicidade
// ---
// Dois binds concorrentes que tentam criar o mesmo sub-pool colidem aqui.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PoolKey {
    Subscription { subscription_id: String, sub_key: &'static str },
    SourceEntitlement(Uuid),
    Host { host_id: Uuid, subscription_id: String },
}

impl std::fmt::Display for PoolKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PoolKey::Subscription { subscription_id, sub_key } => {
                write!(f, "sub:{}:{}", subscription_id, sub_key)
            }
            PoolKey::SourceEntitlement(id) => write!(f, "ent:{}", id),
            PoolKey::Host { host_id, subscription_id } => {
                write!(f, "host:{}:{}", host_id, subscription_id)
            }
        }
    }
}

// ---
// Pool (capacidade consumível)
// ---
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pool {
    pub id: Uuid,
    pub owner_key: String,
    pub subscription_id: Option<String>,
    pub kind: PoolKind,
    pub product_id: String,
    pub product_name: String,
    #[serde(default)]
    pub provided_product_ids: BTreeSet<String>,
    // -1 = ilimitado
    pub quantity: i64,
    pub consumed: i64,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    pub restricted_to_username: Option<String>,
    // A assinatura sumiu mas ainda há consumo: apagado quando `consumed` chegar a zero
    pub pending_delete: bool,
    pub subscription_modified: Option<DateTime<Utc>>,
    // Versão para o controle otimista de concorrência
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Pool {
    pub fn is_unlimited(&self) -> bool {
        self.quantity == UNLIMITED
    }

    /// Quantidade livre; `None` quando o pool é ilimitado.
    /// Pode ser negativa se a quantidade foi reduzida abaixo do consumo.
    pub fn available(&self) -> Option<i64> {
        if self.is_unlimited() {
            None
        } else {
            Some(self.quantity - self.consumed)
        }
    }

    pub fn is_current(&self, now: DateTime<Utc>) -> bool {
        self.start_date <= now && now < self.end_date
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.end_date <= now
    }

    pub fn provides(&self, product_id: &str) -> bool {
        self.product_id == product_id || self.provided_product_ids.contains(product_id)
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn source_entitlement_id(&self) -> Option<Uuid> {
        match self.kind {
            PoolKind::PersonRestricted { source_entitlement_id } => Some(source_entitlement_id),
            _ => None,
        }
    }

    pub fn restricted_to_consumer(&self) -> Option<Uuid> {
        match self.kind {
            PoolKind::HostRestricted { host_id } => Some(host_id),
            _ => None,
        }
    }

    pub fn virt_limit(&self) -> Option<&str> {
        self.attribute(attrs::VIRT_LIMIT)
    }

    pub fn key(&self) -> Option<PoolKey> {
        match (&self.kind, &self.subscription_id) {
            (PoolKind::PersonRestricted { source_entitlement_id }, _) => {
                Some(PoolKey::SourceEntitlement(*source_entitlement_id))
            }
            (PoolKind::HostRestricted { host_id }, Some(sub_id)) => Some(PoolKey::Host {
                host_id: *host_id,
                subscription_id: sub_id.clone(),
            }),
            (PoolKind::Master | PoolKind::VirtBonus, Some(sub_id)) => Some(PoolKey::Subscription {
                subscription_id: sub_id.clone(),
                sub_key: self.kind.sub_key(),
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn pool(kind: PoolKind, quantity: i64, consumed: i64) -> Pool {
        let now = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        Pool {
            id: Uuid::new_v4(),
            owner_key: "acme".into(),
            subscription_id: Some("sub-1".into()),
            kind,
            product_id: "P1".into(),
            product_name: "Product 1".into(),
            provided_product_ids: ["P9".to_string()].into_iter().collect(),
            quantity,
            consumed,
            start_date: now - Duration::days(1),
            end_date: now + Duration::days(1),
            attributes: BTreeMap::new(),
            restricted_to_username: None,
            pending_delete: false,
            subscription_modified: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn unlimited_pools_have_no_available_count() {
        assert_eq!(pool(PoolKind::Master, UNLIMITED, 4).available(), None);
        assert_eq!(pool(PoolKind::Master, 10, 4).available(), Some(6));
        assert_eq!(pool(PoolKind::Master, 2, 4).available(), Some(-2));
    }

    #[test]
    fn provides_covers_provided_products() {
        let p = pool(PoolKind::Master, 10, 0);
        assert!(p.provides("P1"));
        assert!(p.provides("P9"));
        assert!(!p.provides("P2"));
    }

    #[test]
    fn keys_follow_the_kind() {
        let master = pool(PoolKind::Master, 10, 0);
        let bonus = pool(PoolKind::VirtBonus, 30, 0);
        assert_ne!(master.key(), bonus.key());

        let host = Uuid::new_v4();
        let restricted = pool(PoolKind::HostRestricted { host_id: host }, 3, 0);
        assert_eq!(
            restricted.key(),
            Some(PoolKey::Host { host_id: host, subscription_id: "sub-1".into() })
        );
        assert_eq!(restricted.restricted_to_consumer(), Some(host));

        let mut custom = pool(PoolKind::Custom, 1, 0);
        custom.subscription_id = None;
        assert_eq!(custom.key(), None);
    }
}
