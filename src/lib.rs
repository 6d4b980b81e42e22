// src/lib.rs

use axum::{
    middleware as axum_middleware,
    routing::{delete, get, post, put},
    Router,
};

pub mod adapters;
pub mod common;
pub mod config;
pub mod db;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;

use crate::{config::AppState, middleware::owner::owner_guard};

/// Monta o router completo da API.
pub fn app(app_state: AppState) -> Router {
    // Rotas por chave de owner na URL (administração)
    let owner_routes = Router::new()
        .route(
            "/",
            post(handlers::owners::create_owner).get(handlers::owners::list_owners),
        )
        .route(
            "/{key}",
            get(handlers::owners::get_owner).delete(handlers::owners::delete_owner),
        )
        .route("/{key}/parent", put(handlers::owners::set_parent))
        .route("/{key}/upstream", put(handlers::owners::link_upstream))
        .route("/{key}/refresh", post(handlers::owners::refresh_pools))
        .route("/{key}/events", get(handlers::owners::list_events));

    // Rotas com escopo pelo cabeçalho X-Owner-Key
    let scoped_routes = Router::new()
        .route("/pools", get(handlers::pools::list_pools))
        .route(
            "/pools/{id}",
            get(handlers::pools::get_pool).delete(handlers::pools::delete_pool),
        )
        .route(
            "/consumers",
            post(handlers::consumers::register_consumer).get(handlers::consumers::list_consumers),
        )
        .route(
            "/consumers/{id}",
            get(handlers::consumers::get_consumer).delete(handlers::consumers::unregister_consumer),
        )
        .route("/consumers/{id}/facts", put(handlers::consumers::update_facts))
        .route("/consumers/{id}/guests", put(handlers::consumers::update_guest_ids))
        .route(
            "/consumers/{id}/entitlements",
            get(handlers::consumers::list_entitlements)
                .post(handlers::consumers::bind)
                .delete(handlers::consumers::revoke_all),
        )
        .route("/entitlements/{id}", delete(handlers::consumers::unbind))
        .route("/entitlements/{id}/quantity", put(handlers::consumers::adjust_quantity))
        .route("/jobs", get(handlers::jobs::list_jobs))
        .route(
            "/jobs/{id}",
            get(handlers::jobs::get_job).delete(handlers::jobs::cancel_job),
        )
        .route("/jobs/regen-certificates", post(handlers::jobs::regen_certificates))
        .route("/jobs/autoheal", post(handlers::jobs::autoheal))
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            owner_guard,
        ));

    let hosted_routes = Router::new()
        .route("/products", get(handlers::hosted::list_products))
        .route("/products/{id}", put(handlers::hosted::put_product))
        .route(
            "/subscriptions/{id}",
            put(handlers::hosted::put_subscription).delete(handlers::hosted::delete_subscription),
        )
        .route("/owners/{key}/subscriptions", get(handlers::hosted::list_subscriptions));

    // Combina tudo no router principal
    Router::new()
        .route("/api/health", get(|| async { "OK" }))
        .nest("/api/owners", owner_routes)
        .nest("/api/hosted", hosted_routes)
        .nest("/api", scoped_routes)
        .with_state(app_state)
}
