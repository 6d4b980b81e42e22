// tests/bind_test.rs

mod common;

use std::sync::Arc;

use chrono::Duration;

use common::TestApp;
use entitlement_backend::{
    common::error::{AppError, BindFailure},
    middleware::owner::OwnerContext,
    models::{attrs, ConsumerType, PoolKind, Product},
};

async fn app_with_p1(quantity: i64) -> (TestApp, uuid::Uuid) {
    let app = TestApp::new().await;
    app.product(Product::new("P1", "Produto 1")).await;
    app.put_subscription(app.subscription("sub-1", "P1", quantity)).await;
    app.refresh().await;
    let pool = app.pool_of("sub-1", PoolKind::Master).await;
    (app, pool.id)
}

#[tokio::test]
async fn overbooking_is_rejected_and_leaves_the_counter_alone() {
    let (app, pool_id) = app_with_p1(10).await;
    let c1 = app.register("c1", ConsumerType::System).await;

    app.bind(c1.id, pool_id, 1).await;
    assert_eq!(app.pool(pool_id).await.unwrap().consumed, 1);

    let c2 = app.register("c2", ConsumerType::System).await;
    let err = app
        .state
        .entitler_service
        .bind_by_pool(&app.ctx(), c2.id, pool_id, 10, None)
        .await
        .unwrap_err();

    match err {
        AppError::Capacity(BindFailure::InsufficientQuantity { requested, available }) => {
            assert_eq!(requested, 10);
            assert_eq!(available, 9);
        }
        other => panic!("esperava falta de capacidade, veio {:?}", other),
    }
    assert_eq!(app.pool(pool_id).await.unwrap().consumed, 1);
    app.assert_within_capacity().await;
}

#[tokio::test]
async fn exhausted_pool_rejects_binds_but_allows_unbinds() {
    let (app, pool_id) = app_with_p1(2).await;
    let c1 = app.register("c1", ConsumerType::System).await;
    let c2 = app.register("c2", ConsumerType::System).await;

    let ent = app.bind(c1.id, pool_id, 2).await;
    let err = app
        .state
        .entitler_service
        .bind_by_pool(&app.ctx(), c2.id, pool_id, 1, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Capacity(BindFailure::InsufficientQuantity { .. })));

    app.state.revocation_service.revoke_entitlement(&app.ctx(), ent.id).await.unwrap();
    assert_eq!(app.pool(pool_id).await.unwrap().consumed, 0);
    app.bind(c2.id, pool_id, 1).await;
    app.assert_within_capacity().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_binds_never_overbook() {
    for round in 0..20 {
        let (app, pool_id) = app_with_p1(10).await;
        let a = app.register(&format!("a-{}", round), ConsumerType::System).await;
        let b = app.register(&format!("b-{}", round), ConsumerType::System).await;
        let entitler = Arc::new(app.state.entitler_service.clone());

        let first = {
            let entitler = entitler.clone();
            tokio::spawn(async move {
                entitler
                    .bind_by_pool(&OwnerContext::new(common::OWNER), a.id, pool_id, 6, None)
                    .await
            })
        };
        let second = {
            let entitler = entitler.clone();
            tokio::spawn(async move {
                entitler
                    .bind_by_pool(&OwnerContext::new(common::OWNER), b.id, pool_id, 6, None)
                    .await
            })
        };
        let results = [first.await.unwrap(), second.await.unwrap()];

        let won = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(won, 1, "rodada {}: exatamente um bind deve vencer", round);
        let lost = results.iter().find_map(|r| r.as_ref().err()).unwrap();
        assert!(
            matches!(lost, AppError::Capacity(BindFailure::InsufficientQuantity { .. })),
            "rodada {}: perdedor deveria falhar por capacidade, veio {:?}",
            round,
            lost
        );
        assert_eq!(app.pool(pool_id).await.unwrap().consumed, 6);
        app.assert_within_capacity().await;
    }
}

#[tokio::test]
async fn virt_only_pools_are_for_guests() {
    let app = TestApp::new().await;
    app.product(Product::new("P2", "Produto 2").with_attribute(attrs::VIRT_LIMIT, "3"))
        .await;
    app.put_subscription(app.subscription("sub-2", "P2", 10)).await;
    app.refresh().await;
    let bonus = app.pool_of("sub-2", PoolKind::VirtBonus).await;

    let physical = app.register("metal", ConsumerType::System).await;
    let err = app
        .state
        .entitler_service
        .bind_by_pool(&app.ctx(), physical.id, bonus.id, 1, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Capacity(BindFailure::VirtOnly)));

    let guest = app.register_guest("vm", "4C4C4544-0001").await;
    app.bind(guest.id, bonus.id, 1).await;
    assert_eq!(app.pool(bonus.id).await.unwrap().consumed, 1);
}

#[tokio::test]
async fn people_cannot_take_system_pools() {
    let (app, pool_id) = app_with_p1(10).await;
    let person = app.register("maria", ConsumerType::Person).await;

    let err = app
        .state
        .entitler_service
        .bind_by_pool(&app.ctx(), person.id, pool_id, 1, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Capacity(BindFailure::ConsumerTypeMismatch { .. })));
}

#[tokio::test]
async fn required_consumer_type_is_enforced() {
    let app = TestApp::new().await;
    app.product(
        Product::new("HV", "Hypervisor").with_attribute(attrs::REQUIRES_CONSUMER_TYPE, "hypervisor"),
    )
    .await;
    app.put_subscription(app.subscription("sub-hv", "HV", 5)).await;
    app.refresh().await;
    let pool = app.pool_of("sub-hv", PoolKind::Master).await;

    let system = app.register("web", ConsumerType::System).await;
    let err = app
        .state
        .entitler_service
        .bind_by_pool(&app.ctx(), system.id, pool.id, 1, None)
        .await
        .unwrap_err();
    match err {
        AppError::Capacity(BindFailure::ConsumerTypeMismatch { required, actual }) => {
            assert_eq!(required, "hypervisor");
            assert_eq!(actual, "system");
        }
        other => panic!("esperava tipo incompatível, veio {:?}", other),
    }

    let hypervisor = app.register("esx", ConsumerType::Hypervisor).await;
    app.bind(hypervisor.id, pool.id, 1).await;
}

#[tokio::test]
async fn autobind_prefers_the_pool_that_ends_first() {
    let app = TestApp::new().await;
    app.product(Product::new("P1", "Produto 1")).await;
    let long = app.subscription("sub-long", "P1", 10);
    let mut short = app.subscription("sub-short", "P1", 10);
    short.end_date = app.clock_now() + Duration::days(100);
    app.put_subscription(long).await;
    app.put_subscription(short).await;
    app.refresh().await;
    let short_pool = app.pool_of("sub-short", PoolKind::Master).await;

    let system = app.register("web", ConsumerType::System).await;
    let ent = app
        .state
        .entitler_service
        .bind_by_product(&app.ctx(), system.id, "P1", None, None)
        .await
        .unwrap();

    assert_eq!(ent.pool_id, short_pool.id);
    assert_eq!(ent.quantity, 1);
}

#[tokio::test]
async fn autobind_without_candidates_reports_no_pool() {
    let (app, _) = app_with_p1(10).await;
    let system = app.register("web", ConsumerType::System).await;

    let err = app
        .state
        .entitler_service
        .bind_by_product(&app.ctx(), system.id, "NAO-EXISTE", None, None)
        .await
        .unwrap_err();

    match err {
        AppError::Capacity(BindFailure::NoPoolAvailable { product_id }) => {
            assert_eq!(product_id, "NAO-EXISTE")
        }
        other => panic!("esperava nenhum pool, veio {:?}", other),
    }
}

#[tokio::test]
async fn instance_multiplier_rounds_autobind_and_rejects_odd_manual_binds() {
    let app = TestApp::new().await;
    app.product(Product::new("P1", "Produto 1").with_attribute(attrs::INSTANCE_MULTIPLIER, "2"))
        .await;
    app.put_subscription(app.subscription("sub-1", "P1", 10)).await;
    app.refresh().await;
    let pool = app.pool_of("sub-1", PoolKind::Master).await;
    let system = app.register("web", ConsumerType::System).await;

    let err = app
        .state
        .entitler_service
        .bind_by_pool(&app.ctx(), system.id, pool.id, 3, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    let ent = app
        .state
        .entitler_service
        .bind_by_product(&app.ctx(), system.id, "P1", Some(1), None)
        .await
        .unwrap();
    assert_eq!(ent.quantity, 2);
}

#[tokio::test]
async fn same_product_from_a_second_pool_needs_multi_entitlement() {
    let app = TestApp::new().await;
    app.product(Product::new("P1", "Produto 1")).await;
    app.put_subscription(app.subscription("sub-a", "P1", 10)).await;
    app.put_subscription(app.subscription("sub-b", "P1", 10)).await;
    app.refresh().await;
    let a = app.pool_of("sub-a", PoolKind::Master).await;
    let b = app.pool_of("sub-b", PoolKind::Master).await;
    let system = app.register("web", ConsumerType::System).await;

    app.bind(system.id, a.id, 1).await;
    // O mesmo pool de novo é permitido
    app.bind(system.id, a.id, 1).await;

    let err = app
        .state
        .entitler_service
        .bind_by_pool(&app.ctx(), system.id, b.id, 1, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Capacity(BindFailure::AlreadyHasProduct { .. })));
}

#[tokio::test]
async fn multi_entitlement_products_stack_across_pools() {
    let app = TestApp::new().await;
    app.product(Product::new("P1", "Produto 1").with_attribute(attrs::MULTI_ENTITLEMENT, "yes"))
        .await;
    app.put_subscription(app.subscription("sub-a", "P1", 10)).await;
    app.put_subscription(app.subscription("sub-b", "P1", 10)).await;
    app.refresh().await;
    let a = app.pool_of("sub-a", PoolKind::Master).await;
    let b = app.pool_of("sub-b", PoolKind::Master).await;
    let system = app.register("web", ConsumerType::System).await;

    app.bind(system.id, a.id, 1).await;
    app.bind(system.id, b.id, 1).await;
    assert_eq!(app.entitlements_of(system.id).await.len(), 2);
}

#[tokio::test]
async fn adjusting_quantity_respects_capacity() {
    let (app, pool_id) = app_with_p1(10).await;
    let system = app.register("web", ConsumerType::System).await;
    let ent = app.bind(system.id, pool_id, 2).await;

    let grown = app
        .state
        .entitler_service
        .adjust_quantity(&app.ctx(), ent.id, 5)
        .await
        .unwrap();
    assert_eq!(grown.quantity, 5);
    assert_eq!(app.pool(pool_id).await.unwrap().consumed, 5);

    let err = app
        .state
        .entitler_service
        .adjust_quantity(&app.ctx(), ent.id, 20)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Capacity(BindFailure::InsufficientQuantity { .. })));

    app.state
        .entitler_service
        .adjust_quantity(&app.ctx(), ent.id, 1)
        .await
        .unwrap();
    assert_eq!(app.pool(pool_id).await.unwrap().consumed, 1);
    app.assert_within_capacity().await;
}

#[tokio::test]
async fn listing_for_a_consumer_keeps_exhausted_pools_but_drops_ineligible_ones() {
    let app = TestApp::new().await;
    app.product(Product::new("P2", "Produto 2").with_attribute(attrs::VIRT_LIMIT, "3"))
        .await;
    app.put_subscription(app.subscription("sub-2", "P2", 1)).await;
    app.refresh().await;
    let master = app.pool_of("sub-2", PoolKind::Master).await;

    let first = app.register("metal-1", ConsumerType::System).await;
    app.bind(first.id, master.id, 1).await;

    let second = app.register("metal-2", ConsumerType::System).await;
    let listed = app
        .state
        .entitler_service
        .list_available_pools(&app.ctx(), Some(second.id), None)
        .await
        .unwrap();

    // Master esgotado aparece; o bônus (só convidados) não
    let ids: Vec<_> = listed.iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![master.id]);
}

#[tokio::test]
async fn pools_of_other_owners_do_not_exist() {
    let (app, pool_id) = app_with_p1(10).await;
    app.state.owner_service.create("outra", "Outra", None).await.unwrap();

    let err = app
        .state
        .entitler_service
        .get_pool(&OwnerContext::new("outra"), pool_id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}
