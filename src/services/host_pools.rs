// src/services/host_pools.rs

use uuid::Uuid;

use crate::{
    common::{clock::Clock, error::AppError, retry::with_conflict_retries},
    db::EntitlementStore,
    models::{Pool, PoolEvent, PoolEventType, PoolKey, PoolKind},
    services::pool_computer::{host_limited_master, host_pool, host_pool_quantity},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostPoolSync {
    // Master sem virt_limit numérico, sem assinatura ou sem pool bônus
    Skipped,
    Unchanged(Pool),
    Created(Pool),
    Resized(Pool),
    // O host não consome mais o master: o pool (se existir) deve ser revogado e apagado
    Orphaned(Option<Pool>),
}

// ---
// Pool bônus restrito a um host
// ---
// Tamanho = virt_limit x (quantidade que o host consome do master).
// Com `create = false` só redimensiona ou aponta o órfão, nunca cria.
pub async fn sync_host_pool(
    store: &dyn EntitlementStore,
    clock: &dyn Clock,
    max_retries: u32,
    host_id: Uuid,
    master: &Pool,
    create: bool,
) -> Result<HostPoolSync, AppError> {
    let Some(limit) = host_limited_master(master) else {
        return Ok(HostPoolSync::Skipped);
    };
    let Some(subscription_id) = master.subscription_id.clone() else {
        return Ok(HostPoolSync::Skipped);
    };
    let key = PoolKey::Host { host_id, subscription_id: subscription_id.clone() };

    with_conflict_retries(max_retries, "pool do host", || async {
        // Pool lido antes do consumo: um resize concorrente derruba o CAS abaixo
        let existing = store.find_pool_by_key(&key).await?;
        let host_quantity = host_consumption(store, master.id, host_id).await?;
        let Some(desired) = host_pool_quantity(limit, host_quantity) else {
            return Ok(HostPoolSync::Orphaned(existing));
        };

        match existing {
            Some(existing) if existing.quantity == desired => Ok(HostPoolSync::Unchanged(existing)),
            Some(mut existing) => {
                let previous = existing.quantity;
                existing.quantity = desired;
                existing.updated_at = clock.now();
                let updated = store.update_pool(&existing).await?;
                store
                    .record_event(
                        PoolEvent::new(&updated.owner_key, PoolEventType::PoolUpdated, updated.id, clock.now())
                            .with_notes(format!("pool do host: {} -> {}", previous, desired)),
                    )
                    .await?;
                tracing::debug!("Pool do host {} redimensionado: {} -> {}", host_id, previous, desired);
                Ok(HostPoolSync::Resized(updated))
            }
            None if !create => Ok(HostPoolSync::Skipped),
            None => {
                let bonus_key = PoolKey::Subscription {
                    subscription_id: subscription_id.clone(),
                    sub_key: PoolKind::VirtBonus.sub_key(),
                };
                let Some(bonus) = store.find_pool_by_key(&bonus_key).await? else {
                    tracing::warn!(
                        "Assinatura {} sem pool bônus; pool do host {} não criado",
                        subscription_id,
                        host_id
                    );
                    return Ok(HostPoolSync::Skipped);
                };

                let candidate = host_pool(&bonus, host_id, desired, clock.now());
                let (pool, created) = store.insert_pool_unique(candidate).await?;
                if !created {
                    // Outro bind criou primeiro; o próximo giro ajusta o tamanho
                    return if pool.quantity == desired {
                        Ok(HostPoolSync::Unchanged(pool))
                    } else {
                        Err(AppError::Conflict(format!("pool do host {} mudou", host_id)))
                    };
                }

                store
                    .record_event(PoolEvent::new(
                        &pool.owner_key,
                        PoolEventType::PoolCreated,
                        pool.id,
                        clock.now(),
                    ))
                    .await?;
                tracing::info!("✅ Pool restrito ao host {} criado ({} unidades)", host_id, desired);
                Ok(HostPoolSync::Created(pool))
            }
        }
    })
    .await
}

async fn host_consumption(
    store: &dyn EntitlementStore,
    master_id: Uuid,
    host_id: Uuid,
) -> Result<i64, AppError> {
    Ok(store
        .list_entitlements_by_pool(master_id)
        .await?
        .iter()
        .filter(|e| e.consumer_id == host_id)
        .map(|e| e.quantity)
        .sum())
}
