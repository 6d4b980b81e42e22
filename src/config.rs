// src/config.rs

use std::{env, str::FromStr, sync::Arc, time::Duration};

use sqlx::postgres::PgPoolOptions;

use crate::{
    adapters::{
        CertificateService, EligibilityPolicy, HostedCatalog, ProductCatalog,
        StandardEligibilityPolicy, StoreCertificateService, SubscriptionStore,
    },
    common::{
        clock::{Clock, SystemClock},
        locks::KeyedLocks,
    },
    db::{EntitlementStore, MemoryStore, PgStore},
    services::{
        pool_selector::SelectionPolicy, BindSettings, ConsumerService, EntitlerService,
        JobRunner, JobService, OwnerService, RefreshService, RevocationService,
    },
};

// ---
// Configuração (variáveis de ambiente, com .env opcional)
// ---
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    // Sem DATABASE_URL, tudo fica em memória
    pub database_url: Option<String>,
    pub bind_addr: String,
    pub db_max_connections: u32,
    pub max_conflict_retries: u32,
    pub autobind_unlimited_last: bool,
    pub lazy_regen_default: bool,
    pub job_poll_interval: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            bind_addr: "0.0.0.0:3000".to_string(),
            db_max_connections: 5,
            max_conflict_retries: 5,
            autobind_unlimited_last: true,
            lazy_regen_default: true,
            job_poll_interval: Duration::from_millis(100),
        }
    }
}

fn parse_var<T: FromStr>(name: &str, default: T) -> anyhow::Result<T> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("{} inválida: '{}'", name, raw)),
        Err(_) => Ok(default),
    }
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        Ok(Self {
            database_url: env::var("DATABASE_URL").ok().filter(|url| !url.trim().is_empty()),
            bind_addr: env::var("BIND_ADDR").unwrap_or(defaults.bind_addr),
            db_max_connections: parse_var("DB_MAX_CONNECTIONS", defaults.db_max_connections)?,
            max_conflict_retries: parse_var("MAX_CONFLICT_RETRIES", defaults.max_conflict_retries)?,
            autobind_unlimited_last: parse_var(
                "AUTOBIND_UNLIMITED_LAST",
                defaults.autobind_unlimited_last,
            )?,
            lazy_regen_default: parse_var("LAZY_REGEN_DEFAULT", defaults.lazy_regen_default)?,
            job_poll_interval: Duration::from_millis(parse_var("JOB_POLL_INTERVAL_MS", 100u64)?),
        })
    }

    pub fn bind_settings(&self) -> BindSettings {
        BindSettings {
            max_conflict_retries: self.max_conflict_retries,
            lazy_regen_default: self.lazy_regen_default,
            selection: SelectionPolicy { unlimited_last: self.autobind_unlimited_last },
        }
    }
}

// ---
// Estado compartilhado da aplicação
// ---
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub clock: Arc<dyn Clock>,
    pub store: Arc<dyn EntitlementStore>,
    // Catálogo hospedado: fonte das assinaturas e dos produtos
    pub hosted: Arc<HostedCatalog>,
    pub owner_service: OwnerService,
    pub consumer_service: ConsumerService,
    pub refresh_service: RefreshService,
    pub entitler_service: EntitlerService,
    pub revocation_service: RevocationService,
    pub job_service: JobService,
}

impl AppState {
    pub async fn new() -> anyhow::Result<Self> {
        let config = AppConfig::from_env()?;

        let store: Arc<dyn EntitlementStore> = match &config.database_url {
            Some(database_url) => {
                // Conecta ao banco de dados, usando '?' para propagar erros
                let db_pool = PgPoolOptions::new()
                    .max_connections(config.db_max_connections)
                    .acquire_timeout(Duration::from_secs(3))
                    .connect(database_url)
                    .await?;
                tracing::info!("✅ Conexão com o banco de dados estabelecida com sucesso!");

                sqlx::migrate!().run(&db_pool).await?;
                tracing::info!("✅ Migrações do banco de dados executadas com sucesso!");

                Arc::new(PgStore::new(db_pool))
            }
            None => {
                tracing::warn!("DATABASE_URL não definida; usando armazenamento em memória");
                Arc::new(MemoryStore::new())
            }
        };

        Ok(Self::assemble(config, store, Arc::new(SystemClock)))
    }

    /// Estado todo em memória (usado pelos testes).
    pub fn in_memory(config: AppConfig, clock: Arc<dyn Clock>) -> Self {
        Self::assemble(config, Arc::new(MemoryStore::new()), clock)
    }

    // --- Monta o gráfico de dependências ---
    fn assemble(config: AppConfig, store: Arc<dyn EntitlementStore>, clock: Arc<dyn Clock>) -> Self {
        let hosted = Arc::new(HostedCatalog::new());
        let subscriptions: Arc<dyn SubscriptionStore> = hosted.clone();
        let catalog: Arc<dyn ProductCatalog> = hosted.clone();
        let certificates: Arc<dyn CertificateService> =
            Arc::new(StoreCertificateService::new(store.clone()));
        let policy: Arc<dyn EligibilityPolicy> = Arc::new(StandardEligibilityPolicy);

        let revocation_service =
            RevocationService::new(store.clone(), clock.clone(), config.max_conflict_retries);
        let entitler_service = EntitlerService::new(
            store.clone(),
            catalog.clone(),
            certificates.clone(),
            policy,
            revocation_service.clone(),
            clock.clone(),
            config.bind_settings(),
        );
        let refresh_service = RefreshService::new(
            store.clone(),
            subscriptions.clone(),
            catalog,
            certificates.clone(),
            clock.clone(),
            Arc::new(KeyedLocks::new()),
            config.max_conflict_retries,
        );
        let consumer_service = ConsumerService::new(
            store.clone(),
            entitler_service.clone(),
            revocation_service.clone(),
            clock.clone(),
        );
        let owner_service = OwnerService::new(
            store.clone(),
            subscriptions,
            revocation_service.clone(),
            clock.clone(),
        );
        let job_service = JobService::new(
            JobRunner {
                refresh: refresh_service.clone(),
                entitler: entitler_service.clone(),
                certificates,
                store: store.clone(),
            },
            clock.clone(),
            config.job_poll_interval,
        );

        Self {
            config,
            clock,
            store,
            hosted,
            owner_service,
            consumer_service,
            refresh_service,
            entitler_service,
            revocation_service,
            job_service,
        }
    }
}
