// src/db/store.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    common::error::AppError,
    models::{Consumer, Entitlement, Owner, Pool, PoolEvent, PoolKey},
};

// ---
// Contrato de persistência
// ---
// Todas as mutações de `consumed` passam por `consume`, `release` e
// `change_entitlement_quantity`. Elas alteram o contador e o entitlement juntos
// (ou nada) e incrementam `version`, que é a guarda otimista usada pelos serviços.
#[async_trait]
pub trait EntitlementStore: Send + Sync {
    // --- Owners ---
    async fn create_owner(&self, owner: Owner) -> Result<Owner, AppError>;
    async fn find_owner(&self, key: &str) -> Result<Option<Owner>, AppError>;
    async fn list_owners(&self) -> Result<Vec<Owner>, AppError>;
    async fn update_owner(&self, owner: &Owner) -> Result<Owner, AppError>;
    async fn delete_owner(&self, key: &str) -> Result<(), AppError>;

    // --- Consumidores ---
    async fn create_consumer(&self, consumer: Consumer) -> Result<Consumer, AppError>;
    async fn find_consumer(&self, id: Uuid) -> Result<Option<Consumer>, AppError>;
    async fn list_consumers(&self, owner_key: &str) -> Result<Vec<Consumer>, AppError>;
    async fn update_consumer(&self, consumer: &Consumer) -> Result<Consumer, AppError>;
    /// Recusa (Conflict) enquanto o consumidor ainda tiver entitlements.
    async fn delete_consumer(&self, id: Uuid) -> Result<(), AppError>;
    /// Hosts do owner cuja lista de convidados contém `guest_uuid`.
    async fn find_hosts_of_guest(
        &self,
        owner_key: &str,
        guest_uuid: &str,
    ) -> Result<Vec<Consumer>, AppError>;
    /// Consumidores do owner cujo fato `virt.uuid` é `virt_uuid`.
    async fn find_guests_by_virt_uuid(
        &self,
        owner_key: &str,
        virt_uuid: &str,
    ) -> Result<Vec<Consumer>, AppError>;

    // --- Pools ---
    async fn find_pool(&self, id: Uuid) -> Result<Option<Pool>, AppError>;
    async fn find_pool_by_key(&self, key: &PoolKey) -> Result<Option<Pool>, AppError>;
    async fn list_pools(&self, owner_key: &str) -> Result<Vec<Pool>, AppError>;
    async fn list_pools_restricted_to(&self, consumer_id: Uuid) -> Result<Vec<Pool>, AppError>;
    /// Insere o pool, a menos que já exista um com a mesma chave de unicidade.
    /// Retorna o pool vencedor e `true` se foi esta chamada que o criou.
    async fn insert_pool_unique(&self, pool: Pool) -> Result<(Pool, bool), AppError>;
    /// Compare-and-swap em `pool.version`. Nunca altera `consumed`.
    async fn update_pool(&self, pool: &Pool) -> Result<Pool, AppError>;
    /// Recusa (Conflict) enquanto houver entitlements no pool.
    async fn delete_pool(&self, id: Uuid) -> Result<(), AppError>;

    // --- Entitlements ---
    async fn find_entitlement(&self, id: Uuid) -> Result<Option<Entitlement>, AppError>;
    async fn list_entitlements_by_consumer(
        &self,
        consumer_id: Uuid,
    ) -> Result<Vec<Entitlement>, AppError>;
    async fn list_entitlements_by_pool(&self, pool_id: Uuid) -> Result<Vec<Entitlement>, AppError>;
    async fn list_entitlements_by_owner(
        &self,
        owner_key: &str,
    ) -> Result<Vec<Entitlement>, AppError>;
    /// `consumed += entitlement.quantity` e grava o entitlement, se a versão bater.
    /// Com `exclusive_product`, recusa (`ALREADY_HAS_PRODUCT`) se o consumidor já
    /// tem o mesmo produto ativo vindo de outro pool; a checagem roda na mesma
    /// unidade atômica da gravação.
    async fn consume(
        &self,
        pool_id: Uuid,
        expected_version: i64,
        entitlement: Entitlement,
        exclusive_product: bool,
    ) -> Result<Pool, AppError>;
    /// Apaga o entitlement e devolve a quantidade ao pool.
    /// `None` se o entitlement já não existia.
    async fn release(&self, entitlement_id: Uuid) -> Result<Option<(Entitlement, Pool)>, AppError>;
    async fn change_entitlement_quantity(
        &self,
        entitlement_id: Uuid,
        quantity: i64,
        expected_version: i64,
    ) -> Result<(Entitlement, Pool), AppError>;
    /// Acompanha a mudança de datas do pool; retorna os ids alterados.
    async fn update_entitlement_dates(
        &self,
        pool_id: Uuid,
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, AppError>;
    /// `dirty = true` marca para regeneração; `false` conta como regenerado
    /// (o serial do certificado é incrementado).
    async fn mark_certificates(&self, entitlement_ids: &[Uuid], dirty: bool)
        -> Result<(), AppError>;

    // --- Histórico ---
    async fn record_event(&self, event: PoolEvent) -> Result<(), AppError>;
    async fn list_events(&self, owner_key: &str) -> Result<Vec<PoolEvent>, AppError>;
}
