// src/main.rs

use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use entitlement_backend::{app, config::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Inicializa o logger (RUST_LOG manda; padrão: info)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .compact()
        .init();

    // Se a configuração falhar, a aplicação não deve iniciar.
    // As migrações rodam dentro do AppState::new quando há banco.
    let app_state = AppState::new().await?;
    let addr = app_state.config.bind_addr.clone();

    let router = app(app_state);

    // Inicia o servidor
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("🚀 Servidor escutando em {}", listener.local_addr()?);
    axum::serve(listener, router).await?;
    Ok(())
}
