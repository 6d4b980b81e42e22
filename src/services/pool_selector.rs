// src/services/pool_selector.rs

use std::cmp::Ordering;

use crate::{common::error::AppError, models::Pool};

// ---
// Critério de desempate do autobind
// ---
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionPolicy {
    // Pools ilimitados vão para o fim da fila, independente da data
    pub unlimited_last: bool,
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        Self { unlimited_last: true }
    }
}

impl SelectionPolicy {
    pub fn compare(&self, a: &Pool, b: &Pool) -> Ordering {
        let unlimited_rank = |p: &Pool| if self.unlimited_last && p.is_unlimited() { 1 } else { 0 };
        // Ilimitado conta como "o maior livre possível"
        let free = |p: &Pool| p.available().unwrap_or(i64::MAX);

        unlimited_rank(a)
            .cmp(&unlimited_rank(b))
            .then_with(|| a.end_date.cmp(&b.end_date))
            .then_with(|| free(b).cmp(&free(a)))
            .then_with(|| a.id.cmp(&b.id))
    }

    /// Ordena os candidatos do melhor para o pior.
    pub fn rank(&self, candidates: &mut [Pool]) {
        candidates.sort_by(|a, b| self.compare(a, b));
    }
}

/// Arredonda `quantity` para cima até o próximo múltiplo de `multiplier`.
pub fn round_to_multiple(quantity: i64, multiplier: i64) -> Result<i64, AppError> {
    if multiplier < 1 {
        return Err(AppError::Validation(format!(
            "instance_multiplier inválido: {}",
            multiplier
        )));
    }
    let remainder = quantity % multiplier;
    if remainder == 0 {
        return Ok(quantity);
    }
    quantity
        .checked_add(multiplier - remainder)
        .ok_or_else(|| AppError::Validation("quantidade estoura".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PoolKind, UNLIMITED};
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use std::collections::{BTreeMap, BTreeSet};
    use uuid::Uuid;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap()
    }

    fn pool(name: &str, quantity: i64, consumed: i64, ends_in_days: i64) -> Pool {
        Pool {
            id: Uuid::new_v4(),
            owner_key: "acme".into(),
            subscription_id: Some(name.into()),
            kind: PoolKind::Master,
            product_id: "P1".into(),
            product_name: name.into(),
            provided_product_ids: BTreeSet::new(),
            quantity,
            consumed,
            start_date: now() - Duration::days(1),
            end_date: now() + Duration::days(ends_in_days),
            attributes: BTreeMap::new(),
            restricted_to_username: None,
            pending_delete: false,
            subscription_modified: None,
            version: 0,
            created_at: now(),
            updated_at: now(),
        }
    }

    fn names(pools: &[Pool]) -> Vec<&str> {
        pools.iter().map(|p| p.product_name.as_str()).collect()
    }

    #[test]
    fn soonest_expiring_pool_wins() {
        let mut pools = vec![pool("late", 10, 0, 300), pool("soon", 10, 0, 30)];
        SelectionPolicy::default().rank(&mut pools);
        assert_eq!(names(&pools), vec!["soon", "late"]);
    }

    #[test]
    fn ties_go_to_the_larger_free_quantity() {
        let mut pools = vec![pool("small", 10, 8, 30), pool("large", 10, 1, 30)];
        SelectionPolicy::default().rank(&mut pools);
        assert_eq!(names(&pools), vec!["large", "small"]);
    }

    #[test]
    fn unlimited_pools_come_last_when_configured() {
        let mut pools = vec![pool("unlimited", UNLIMITED, 0, 10), pool("finite", 5, 0, 300)];
        SelectionPolicy { unlimited_last: true }.rank(&mut pools);
        assert_eq!(names(&pools), vec!["finite", "unlimited"]);

        SelectionPolicy { unlimited_last: false }.rank(&mut pools);
        assert_eq!(names(&pools), vec!["unlimited", "finite"]);
    }

    #[test]
    fn quantities_round_up_to_the_multiplier() {
        assert_eq!(round_to_multiple(1, 2).unwrap(), 2);
        assert_eq!(round_to_multiple(4, 2).unwrap(), 4);
        assert_eq!(round_to_multiple(5, 1).unwrap(), 5);
        assert!(round_to_multiple(5, 0).is_err());
    }
}
