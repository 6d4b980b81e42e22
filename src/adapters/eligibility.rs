// src/adapters/eligibility.rs

use crate::{
    common::error::BindFailure,
    models::{attrs, product::is_truthy, Consumer, ConsumerType, Pool},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Eligibility {
    Allow,
    Deny(BindFailure),
}

// ---
// Política de elegibilidade plugável
// ---
// Chamada pelo Entitler depois das checagens embutidas. Os atributos do
// produto chegam pela cópia guardada no pool.
pub trait EligibilityPolicy: Send + Sync {
    fn check_eligibility(&self, consumer: &Consumer, pool: &Pool) -> Eligibility;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct StandardEligibilityPolicy;

impl EligibilityPolicy for StandardEligibilityPolicy {
    fn check_eligibility(&self, consumer: &Consumer, pool: &Pool) -> Eligibility {
        // Pools só para convidados
        if is_truthy(pool.attribute(attrs::VIRT_ONLY)) && !consumer.is_guest() {
            return Eligibility::Deny(BindFailure::VirtOnly);
        }

        // Sem tipo exigido, pessoas não consomem (o pool é de sistemas)
        if pool.attribute(attrs::REQUIRES_CONSUMER_TYPE).is_none()
            && consumer.consumer_type == ConsumerType::Person
        {
            return Eligibility::Deny(BindFailure::ConsumerTypeMismatch {
                required: ConsumerType::System.as_str().to_string(),
                actual: consumer.consumer_type.as_str().to_string(),
            });
        }

        // Distribuidores não levam pools derivados
        if consumer.consumer_type == ConsumerType::Candlepin
            && is_truthy(pool.attribute(attrs::POOL_DERIVED))
        {
            return Eligibility::Deny(BindFailure::PolicyDenied(
                "pools derivados não podem ser exportados por distribuidores".to_string(),
            ));
        }

        Eligibility::Allow
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{consumer::FACT_IS_GUEST, PoolKind};
    use chrono::{Duration, Utc};
    use std::collections::{BTreeMap, BTreeSet};
    use uuid::Uuid;

    fn pool(attributes: &[(&str, &str)]) -> Pool {
        let now = Utc::now();
        Pool {
            id: Uuid::new_v4(),
            owner_key: "acme".into(),
            subscription_id: Some("s1".into()),
            kind: PoolKind::VirtBonus,
            product_id: "P2".into(),
            product_name: "P2".into(),
            provided_product_ids: BTreeSet::new(),
            quantity: 30,
            consumed: 0,
            start_date: now - Duration::days(1),
            end_date: now + Duration::days(1),
            attributes: attributes
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
            restricted_to_username: None,
            pending_delete: false,
            subscription_modified: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn virt_only_pools_need_a_guest() {
        let policy = StandardEligibilityPolicy;
        let bonus = pool(&[(attrs::VIRT_ONLY, "true")]);

        let host = Consumer::new("acme", "host", ConsumerType::System, Utc::now());
        assert_eq!(
            policy.check_eligibility(&host, &bonus),
            Eligibility::Deny(BindFailure::VirtOnly)
        );

        let mut guest = Consumer::new("acme", "guest", ConsumerType::System, Utc::now());
        guest.facts.insert(FACT_IS_GUEST.into(), "true".into());
        assert_eq!(policy.check_eligibility(&guest, &bonus), Eligibility::Allow);
    }

    #[test]
    fn people_only_consume_person_pools() {
        let policy = StandardEligibilityPolicy;
        let person = Consumer::new("acme", "alice", ConsumerType::Person, Utc::now());
        assert!(matches!(
            policy.check_eligibility(&person, &pool(&[])),
            Eligibility::Deny(BindFailure::ConsumerTypeMismatch { .. })
        ));
        assert_eq!(
            policy.check_eligibility(&person, &pool(&[(attrs::REQUIRES_CONSUMER_TYPE, "person")])),
            Eligibility::Allow
        );
    }

    #[test]
    fn distributors_skip_derived_pools() {
        let policy = StandardEligibilityPolicy;
        let distributor = Consumer::new("acme", "dist", ConsumerType::Candlepin, Utc::now());
        assert!(matches!(
            policy.check_eligibility(&distributor, &pool(&[(attrs::POOL_DERIVED, "true")])),
            Eligibility::Deny(BindFailure::PolicyDenied(_))
        ));
    }
}
