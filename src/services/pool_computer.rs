// src/services/pool_computer.rs

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    common::error::AppError,
    models::{
        attrs, product::is_truthy, Consumer, Entitlement, Pool, PoolKey, PoolKind, Product,
        Subscription, UNLIMITED,
    },
};

// ---
// Valor do atributo virt_limit
// ---
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VirtLimit {
    None,
    Unlimited,
    Count(i64),
}

impl VirtLimit {
    pub fn parse(value: Option<&str>) -> Result<Self, AppError> {
        let Some(raw) = value.map(str::trim) else {
            return Ok(VirtLimit::None);
        };
        if raw.eq_ignore_ascii_case(attrs::UNLIMITED) {
            return Ok(VirtLimit::Unlimited);
        }
        match raw.parse::<i64>() {
            Ok(0) => Ok(VirtLimit::None),
            Ok(n) if n > 0 => Ok(VirtLimit::Count(n)),
            _ => Err(AppError::Validation(format!(
                "virt_limit inválido: '{}' (esperado inteiro >= 0 ou 'unlimited')",
                raw
            ))),
        }
    }
}

// ---
// Especificação de um pool desejado
// ---
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSpec {
    pub subscription_id: String,
    pub kind: PoolKind,
    pub product_id: String,
    pub product_name: String,
    pub provided_product_ids: BTreeSet<String>,
    pub quantity: i64,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub attributes: BTreeMap<String, String>,
    pub subscription_modified: DateTime<Utc>,
}

/// O que mudou ao aplicar uma spec num pool existente.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolChanges {
    pub quantity: bool,
    pub dates: bool,
    pub products: bool,
    pub attributes: bool,
    pub revived: bool,
    pub marker: bool,
}

impl PoolChanges {
    pub fn any(&self) -> bool {
        self.quantity || self.dates || self.products || self.attributes || self.revived || self.marker
    }
}

impl PoolSpec {
    pub fn key(&self) -> PoolKey {
        PoolKey::Subscription {
            subscription_id: self.subscription_id.clone(),
            sub_key: self.kind.sub_key(),
        }
    }

    pub fn to_pool(&self, owner_key: &str, now: DateTime<Utc>) -> Pool {
        Pool {
            id: Uuid::new_v4(),
            owner_key: owner_key.to_string(),
            subscription_id: Some(self.subscription_id.clone()),
            kind: self.kind,
            product_id: self.product_id.clone(),
            product_name: self.product_name.clone(),
            provided_product_ids: self.provided_product_ids.clone(),
            quantity: self.quantity,
            consumed: 0,
            start_date: self.start_date,
            end_date: self.end_date,
            attributes: self.attributes.clone(),
            restricted_to_username: None,
            pending_delete: false,
            subscription_modified: Some(self.subscription_modified),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Copia a spec para `pool` (nunca mexe em `consumed`) e diz o que mudou.
    pub fn apply_to(&self, pool: &mut Pool) -> PoolChanges {
        let mut changes = PoolChanges::default();

        if pool.quantity != self.quantity {
            pool.quantity = self.quantity;
            changes.quantity = true;
        }
        if pool.start_date != self.start_date || pool.end_date != self.end_date {
            pool.start_date = self.start_date;
            pool.end_date = self.end_date;
            changes.dates = true;
        }
        if pool.product_id != self.product_id
            || pool.product_name != self.product_name
            || pool.provided_product_ids != self.provided_product_ids
        {
            pool.product_id = self.product_id.clone();
            pool.product_name = self.product_name.clone();
            pool.provided_product_ids = self.provided_product_ids.clone();
            changes.products = true;
        }
        if pool.attributes != self.attributes {
            pool.attributes = self.attributes.clone();
            changes.attributes = true;
        }
        if pool.pending_delete {
            pool.pending_delete = false;
            changes.revived = true;
        }
        if pool.subscription_modified != Some(self.subscription_modified) {
            pool.subscription_modified = Some(self.subscription_modified);
            changes.marker = true;
        }
        changes
    }
}

fn merged_attributes(product: &Product, subscription: &Subscription) -> BTreeMap<String, String> {
    let mut attributes = product.attributes.clone();
    attributes.extend(subscription.attributes.clone());
    attributes
}

// ---
// Cálculo dos pools de uma assinatura (função pura)
// ---
// `derived_product` é o produto de `subscription.derived_product_id`, quando houver.
pub fn compute_pools(
    subscription: &Subscription,
    product: &Product,
    derived_product: Option<&Product>,
) -> Result<Vec<PoolSpec>, AppError> {
    // 1. Quantidade base
    if subscription.quantity < 1 {
        return Err(AppError::Validation(format!(
            "assinatura '{}' com quantidade {} (deve ser >= 1)",
            subscription.id, subscription.quantity
        )));
    }
    if product.multiplier < 1 {
        return Err(AppError::Validation(format!(
            "produto '{}' com multiplicador {} (deve ser >= 1)",
            product.id, product.multiplier
        )));
    }
    let base = subscription
        .quantity
        .checked_mul(product.multiplier)
        .ok_or_else(|| {
            AppError::Validation(format!("quantidade da assinatura '{}' estoura", subscription.id))
        })?;

    let virt_limit = VirtLimit::parse(product.attribute(attrs::VIRT_LIMIT))?;

    // 2. Pool master
    let mut master_attributes = merged_attributes(product, subscription);
    if virt_limit == VirtLimit::Unlimited {
        master_attributes.insert(attrs::VIRT_ONLY.to_string(), "false".to_string());
    }

    // Licença por usuário: o sub-pool só nasce no bind de uma pessoa
    if product.attribute(attrs::USER_LICENSE).is_some() {
        let Some(restricted) = product.attribute(attrs::USER_LICENSE_PRODUCT) else {
            return Err(AppError::Validation(format!(
                "produto '{}' tem user_license sem user_license_product",
                product.id
            )));
        };
        master_attributes.insert(
            attrs::USER_RESTRICTED_PRODUCT.to_string(),
            restricted.to_string(),
        );
    }

    let master = PoolSpec {
        subscription_id: subscription.id.clone(),
        kind: PoolKind::Master,
        product_id: product.id.clone(),
        product_name: product.name.clone(),
        provided_product_ids: subscription.provided_product_ids.clone(),
        quantity: base,
        start_date: subscription.start_date,
        end_date: subscription.end_date,
        attributes: master_attributes,
        subscription_modified: subscription.last_modified,
    };

    // 3. Pool bônus de virtualização
    let bonus_quantity = match virt_limit {
        VirtLimit::None => return Ok(vec![master]),
        VirtLimit::Unlimited => UNLIMITED,
        VirtLimit::Count(n) => base.checked_mul(n).ok_or_else(|| {
            AppError::Validation(format!("pool bônus da assinatura '{}' estoura", subscription.id))
        })?,
    };

    let bonus_product = derived_product.unwrap_or(product);
    let mut bonus_attributes = merged_attributes(bonus_product, subscription);
    bonus_attributes.insert(attrs::VIRT_ONLY.to_string(), "true".to_string());
    bonus_attributes.insert(attrs::POOL_DERIVED.to_string(), "true".to_string());
    bonus_attributes.remove(attrs::USER_RESTRICTED_PRODUCT);

    let bonus = PoolSpec {
        subscription_id: subscription.id.clone(),
        kind: PoolKind::VirtBonus,
        product_id: bonus_product.id.clone(),
        product_name: bonus_product.name.clone(),
        provided_product_ids: subscription
            .derived_provided_product_ids
            .clone()
            .unwrap_or_else(|| subscription.provided_product_ids.clone()),
        quantity: bonus_quantity,
        start_date: subscription.start_date,
        end_date: subscription.end_date,
        attributes: bonus_attributes,
        subscription_modified: subscription.last_modified,
    };

    Ok(vec![master, bonus])
}

// ---
// Sub-pools criados no bind
// ---

/// Pool ilimitado do produto restrito, amarrado ao entitlement da pessoa.
pub fn person_pool(
    master: &Pool,
    source: &Entitlement,
    person: &Consumer,
    restricted_product: &Product,
    now: DateTime<Utc>,
) -> Pool {
    let mut attributes = restricted_product.attributes.clone();
    attributes.insert(attrs::POOL_DERIVED.to_string(), "true".to_string());

    Pool {
        id: Uuid::new_v4(),
        owner_key: master.owner_key.clone(),
        subscription_id: master.subscription_id.clone(),
        kind: PoolKind::PersonRestricted { source_entitlement_id: source.id },
        product_id: restricted_product.id.clone(),
        product_name: restricted_product.name.clone(),
        provided_product_ids: restricted_product.provided_product_ids.clone(),
        quantity: UNLIMITED,
        consumed: 0,
        start_date: master.start_date,
        end_date: master.end_date,
        attributes,
        restricted_to_username: Some(
            person.username.clone().unwrap_or_else(|| person.name.clone()),
        ),
        pending_delete: false,
        subscription_modified: master.subscription_modified,
        version: 0,
        created_at: now,
        updated_at: now,
    }
}

/// Tamanho do pool de um host: N vezes o que ele consome do master.
pub fn host_pool_quantity(virt_limit: VirtLimit, host_quantity: i64) -> Option<i64> {
    match virt_limit {
        VirtLimit::Count(n) if host_quantity > 0 => host_quantity.checked_mul(n),
        _ => None,
    }
}

/// Cópia do pool bônus restrita aos convidados de um host.
pub fn host_pool(bonus: &Pool, host_id: Uuid, quantity: i64, now: DateTime<Utc>) -> Pool {
    let mut attributes = bonus.attributes.clone();
    attributes.insert(attrs::REQUIRES_HOST.to_string(), host_id.to_string());
    attributes.insert(attrs::VIRT_ONLY.to_string(), "true".to_string());
    attributes.insert(attrs::POOL_DERIVED.to_string(), "true".to_string());

    Pool {
        id: Uuid::new_v4(),
        owner_key: bonus.owner_key.clone(),
        subscription_id: bonus.subscription_id.clone(),
        kind: PoolKind::HostRestricted { host_id },
        product_id: bonus.product_id.clone(),
        product_name: bonus.product_name.clone(),
        provided_product_ids: bonus.provided_product_ids.clone(),
        quantity,
        consumed: 0,
        start_date: bonus.start_date,
        end_date: bonus.end_date,
        attributes,
        restricted_to_username: None,
        pending_delete: false,
        subscription_modified: bonus.subscription_modified,
        version: 0,
        created_at: now,
        updated_at: now,
    }
}

/// Master com virt_limit numérico: o único tipo que gera pools por host.
pub fn host_limited_master(pool: &Pool) -> Option<VirtLimit> {
    if pool.kind != PoolKind::Master {
        return None;
    }
    match VirtLimit::parse(pool.virt_limit()) {
        Ok(limit @ VirtLimit::Count(_)) => Some(limit),
        _ => None,
    }
}

pub fn allows_multi_entitlement(pool: &Pool) -> bool {
    is_truthy(pool.attribute(attrs::MULTI_ENTITLEMENT))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 6, 1, 12, 0, 0).unwrap()
    }

    fn subscription(product_id: &str, quantity: i64) -> Subscription {
        Subscription {
            id: "sub-1".into(),
            owner_key: "acme".into(),
            product_id: product_id.into(),
            derived_product_id: None,
            quantity,
            start_date: now() - Duration::days(10),
            end_date: now() + Duration::days(355),
            provided_product_ids: ["37060".to_string()].into_iter().collect(),
            derived_provided_product_ids: None,
            attributes: BTreeMap::new(),
            contract_number: Some("C-1".into()),
            last_modified: now(),
        }
    }

    #[test]
    fn plain_product_yields_only_the_master_pool() {
        let pools = compute_pools(&subscription("P1", 10), &Product::new("P1", "Plain"), None).unwrap();
        assert_eq!(pools.len(), 1);
        assert_eq!(pools[0].kind, PoolKind::Master);
        assert_eq!(pools[0].quantity, 10);
        assert_eq!(pools[0].kind.sub_key(), "master");
        assert!(pools[0].provided_product_ids.contains("37060"));
    }

    #[test]
    fn multiplier_scales_the_base_quantity() {
        let product = Product::new("P1", "Sockets").with_multiplier(2);
        let pools = compute_pools(&subscription("P1", 10), &product, None).unwrap();
        assert_eq!(pools[0].quantity, 20);
    }

    #[test]
    fn numeric_virt_limit_adds_a_bonus_pool() {
        let product = Product::new("P2", "Virt").with_attribute(attrs::VIRT_LIMIT, "3");
        let pools = compute_pools(&subscription("P2", 10), &product, None).unwrap();
        assert_eq!(pools.len(), 2);

        let bonus = &pools[1];
        assert_eq!(bonus.kind, PoolKind::VirtBonus);
        assert_eq!(bonus.quantity, 30);
        assert_eq!(bonus.kind.sub_key(), "derived");
        assert_eq!(bonus.attributes.get(attrs::VIRT_ONLY).map(String::as_str), Some("true"));
        assert_eq!(pools[0].quantity, 10);
    }

    #[test]
    fn unlimited_virt_limit_makes_an_unlimited_bonus() {
        let product = Product::new("P2", "Virt").with_attribute(attrs::VIRT_LIMIT, "unlimited");
        let pools = compute_pools(&subscription("P2", 10), &product, None).unwrap();
        assert_eq!(pools[0].attributes.get(attrs::VIRT_ONLY).map(String::as_str), Some("false"));
        assert_eq!(pools[1].quantity, UNLIMITED);
    }

    #[test]
    fn zero_virt_limit_is_the_same_as_absent() {
        let product = Product::new("P2", "Virt").with_attribute(attrs::VIRT_LIMIT, "0");
        let pools = compute_pools(&subscription("P2", 10), &product, None).unwrap();
        assert_eq!(pools.len(), 1);
    }

    #[test]
    fn malformed_virt_limit_is_a_validation_error() {
        let product = Product::new("P2", "Virt").with_attribute(attrs::VIRT_LIMIT, "lots");
        let err = compute_pools(&subscription("P2", 10), &product, None).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn bonus_pool_prefers_derived_product_data() {
        let mut sub = subscription("P2", 4);
        sub.derived_product_id = Some("D1".into());
        sub.derived_provided_product_ids = Some(["69".to_string()].into_iter().collect());
        let product = Product::new("P2", "Virt").with_attribute(attrs::VIRT_LIMIT, "2");
        let derived = Product::new("D1", "Guest edition");

        let pools = compute_pools(&sub, &product, Some(&derived)).unwrap();
        assert_eq!(pools[1].product_id, "D1");
        assert_eq!(pools[1].quantity, 8);
        assert!(pools[1].provided_product_ids.contains("69"));
        assert!(!pools[1].provided_product_ids.contains("37060"));
    }

    #[test]
    fn user_license_marks_the_master_pool() {
        let product = Product::new("P3", "Per user")
            .with_attribute(attrs::USER_LICENSE, "unlimited")
            .with_attribute(attrs::USER_LICENSE_PRODUCT, "P4")
            .with_attribute(attrs::REQUIRES_CONSUMER_TYPE, "person");
        let pools = compute_pools(&subscription("P3", 5), &product, None).unwrap();
        assert_eq!(pools.len(), 1);
        assert_eq!(
            pools[0].attributes.get(attrs::USER_RESTRICTED_PRODUCT).map(String::as_str),
            Some("P4")
        );
    }

    #[test]
    fn subscription_attributes_override_product_ones() {
        let mut sub = subscription("P1", 1);
        sub.attributes.insert("support_level".into(), "premium".into());
        let product = Product::new("P1", "Plain").with_attribute("support_level", "standard");
        let pools = compute_pools(&sub, &product, None).unwrap();
        assert_eq!(pools[0].attributes.get("support_level").map(String::as_str), Some("premium"));
    }

    #[test]
    fn applying_the_same_spec_twice_changes_nothing() {
        let product = Product::new("P1", "Plain");
        let spec = compute_pools(&subscription("P1", 10), &product, None).unwrap().remove(0);
        let mut pool = spec.to_pool("acme", now());
        pool.consumed = 7;

        assert!(!spec.apply_to(&mut pool).any());

        let mut smaller = spec.clone();
        smaller.quantity = 5;
        let changes = smaller.apply_to(&mut pool);
        assert!(changes.quantity && !changes.dates);
        assert_eq!(pool.quantity, 5);
        assert_eq!(pool.consumed, 7);
    }

    #[test]
    fn host_pool_quantity_follows_the_host_consumption() {
        assert_eq!(host_pool_quantity(VirtLimit::Count(4), 2), Some(8));
        assert_eq!(host_pool_quantity(VirtLimit::Count(4), 0), None);
        assert_eq!(host_pool_quantity(VirtLimit::Unlimited, 2), None);
    }
}
