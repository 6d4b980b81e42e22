// tests/concurrency_test.rs

mod common;

use std::collections::{BTreeMap, BTreeSet};

use common::{TestApp, OWNER};
use entitlement_backend::{
    common::error::{AppError, BindFailure},
    middleware::owner::OwnerContext,
    models::{attrs, ConsumerType, Consumer, Pool, PoolKind, Product},
};
use uuid::Uuid;

const ROUNDS: usize = 20;

async fn virt_limited_app() -> (TestApp, Pool) {
    let app = TestApp::new().await;
    app.product(Product::new("P2", "Produto 2").with_attribute(attrs::VIRT_LIMIT, "3"))
        .await;
    app.put_subscription(app.subscription("sub-2", "P2", 10)).await;
    app.refresh().await;
    let master = app.pool_of("sub-2", PoolKind::Master).await;
    (app, master)
}

async fn host_with_guest(app: &TestApp, name: &str, guest: &str) -> Consumer {
    let host = app.register(name, ConsumerType::System).await;
    app.state
        .consumer_service
        .update_guest_ids(&app.ctx(), host.id, BTreeSet::from([guest.to_string()]))
        .await
        .unwrap();
    host
}

async fn host_pools_of(app: &TestApp, host_id: Uuid) -> Vec<Pool> {
    app.pools()
        .await
        .into_iter()
        .filter(|p| p.kind == PoolKind::HostRestricted { host_id })
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_binds_by_one_host_share_a_single_host_pool() {
    for round in 0..ROUNDS {
        let (app, master) = virt_limited_app().await;
        let host = host_with_guest(&app, "hypervisor", "g-1").await;
        let (host_id, master_id) = (host.id, master.id);

        let binds = (0..2).map(|_| {
            let entitler = app.state.entitler_service.clone();
            tokio::spawn(async move {
                entitler
                    .bind_by_pool(&OwnerContext::new(OWNER), host_id, master_id, 2, None)
                    .await
            })
        });
        for bind in binds.collect::<Vec<_>>() {
            bind.await.unwrap().unwrap();
        }

        let pools = host_pools_of(&app, host.id).await;
        assert_eq!(pools.len(), 1, "rodada {}: um pool por host e assinatura", round);
        assert_eq!(pools[0].quantity, 12, "rodada {}: 3 x (2 + 2)", round);
        app.assert_consumption_consistent().await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_binds_by_two_hosts_create_one_pool_each() {
    for round in 0..ROUNDS {
        let (app, master) = virt_limited_app().await;
        let first = host_with_guest(&app, "hypervisor-1", "g-1").await;
        let second = host_with_guest(&app, "hypervisor-2", "g-2").await;
        let master_id = master.id;

        let binds = [first.id, second.id].map(|host_id| {
            let entitler = app.state.entitler_service.clone();
            tokio::spawn(async move {
                entitler
                    .bind_by_pool(&OwnerContext::new(OWNER), host_id, master_id, 2, None)
                    .await
            })
        });
        for bind in binds {
            bind.await.unwrap().unwrap();
        }

        for host in [&first, &second] {
            let pools = host_pools_of(&app, host.id).await;
            assert_eq!(pools.len(), 1, "rodada {}: host {}", round, host.name);
            assert_eq!(pools[0].quantity, 6);
            assert_eq!(pools[0].subscription_id.as_deref(), Some("sub-2"));
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn same_product_from_two_pools_at_once_admits_one_bind() {
    for round in 0..ROUNDS {
        let app = TestApp::new().await;
        app.product(Product::new("P1", "Produto 1")).await;
        app.put_subscription(app.subscription("sub-a", "P1", 10)).await;
        app.put_subscription(app.subscription("sub-b", "P1", 10)).await;
        app.refresh().await;
        let pool_a = app.pool_of("sub-a", PoolKind::Master).await;
        let pool_b = app.pool_of("sub-b", PoolKind::Master).await;
        let system = app.register(&format!("web-{}", round), ConsumerType::System).await;
        let system_id = system.id;

        let binds = [pool_a.id, pool_b.id].map(|pool_id| {
            let entitler = app.state.entitler_service.clone();
            tokio::spawn(async move {
                entitler
                    .bind_by_pool(&OwnerContext::new(OWNER), system_id, pool_id, 1, None)
                    .await
            })
        });
        let mut results = Vec::new();
        for bind in binds {
            results.push(bind.await.unwrap());
        }

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1, "rodada {}", round);
        let lost = results.iter().find_map(|r| r.as_ref().err()).unwrap();
        assert!(
            matches!(lost, AppError::Capacity(BindFailure::AlreadyHasProduct { .. })),
            "rodada {}: veio {:?}",
            round,
            lost
        );
        assert_eq!(app.entitlements_of(system.id).await.len(), 1);
        app.assert_consumption_consistent().await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn facts_update_never_brings_back_a_dropped_guest() {
    for round in 0..ROUNDS {
        let (app, _) = virt_limited_app().await;
        let host_id = host_with_guest(&app, "hypervisor", "g-1").await.id;

        let facts = {
            let consumers = app.state.consumer_service.clone();
            tokio::spawn(async move {
                consumers
                    .update_facts(
                        &OwnerContext::new(OWNER),
                        host_id,
                        BTreeMap::from([("cpu.cpu_socket(s)".to_string(), "4".to_string())]),
                    )
                    .await
            })
        };
        let guests = {
            let consumers = app.state.consumer_service.clone();
            tokio::spawn(async move {
                consumers
                    .update_guest_ids(&OwnerContext::new(OWNER), host_id, BTreeSet::new())
                    .await
            })
        };
        facts.await.unwrap().unwrap();
        guests.await.unwrap().unwrap();

        let stored = app.state.consumer_service.get(&app.ctx(), host_id).await.unwrap();
        assert!(stored.guest_ids.is_empty(), "rodada {}: convidado voltou", round);
        assert_eq!(stored.fact("cpu.cpu_socket(s)"), Some("4"));
    }
}
