// src/db/pg_repo.rs

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{types::Json, FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::{
    common::error::{AppError, BindFailure},
    db::store::EntitlementStore,
    models::{Consumer, Entitlement, Owner, Pool, PoolEvent, PoolKey, PoolKind},
};

// ---
// Linha da tabela 'pools'
// ---
// O `kind` é guardado "achatado" (texto + ids) e remontado no `TryFrom`.
#[derive(Debug, FromRow)]
struct PoolRow {
    id: Uuid,
    owner_key: String,
    subscription_id: Option<String>,
    kind: String,
    source_entitlement_id: Option<Uuid>,
    restricted_to_consumer: Option<Uuid>,
    product_id: String,
    product_name: String,
    provided_product_ids: Json<BTreeSet<String>>,
    quantity: i64,
    consumed: i64,
    start_date: DateTime<Utc>,
    end_date: DateTime<Utc>,
    attributes: Json<BTreeMap<String, String>>,
    restricted_to_username: Option<String>,
    pending_delete: bool,
    subscription_modified: Option<DateTime<Utc>>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn kind_to_db(kind: &PoolKind) -> &'static str {
    match kind {
        PoolKind::Master => "MASTER",
        PoolKind::VirtBonus => "VIRT_BONUS",
        PoolKind::PersonRestricted { .. } => "PERSON_RESTRICTED",
        PoolKind::HostRestricted { .. } => "HOST_RESTRICTED",
        PoolKind::Custom => "CUSTOM",
    }
}

impl TryFrom<PoolRow> for Pool {
    type Error = AppError;

    fn try_from(row: PoolRow) -> Result<Self, Self::Error> {
        let corrupt = |what: &str| {
            AppError::InvariantViolation(format!("pool {} com {} inválido", row.id, what))
        };
        let kind = match row.kind.as_str() {
            "MASTER" => PoolKind::Master,
            "VIRT_BONUS" => PoolKind::VirtBonus,
            "PERSON_RESTRICTED" => PoolKind::PersonRestricted {
                source_entitlement_id: row
                    .source_entitlement_id
                    .ok_or_else(|| corrupt("source_entitlement_id"))?,
            },
            "HOST_RESTRICTED" => PoolKind::HostRestricted {
                host_id: row
                    .restricted_to_consumer
                    .ok_or_else(|| corrupt("restricted_to_consumer"))?,
            },
            "CUSTOM" => PoolKind::Custom,
            _ => return Err(corrupt("kind")),
        };

        Ok(Pool {
            id: row.id,
            owner_key: row.owner_key,
            subscription_id: row.subscription_id,
            kind,
            product_id: row.product_id,
            product_name: row.product_name,
            provided_product_ids: row.provided_product_ids.0,
            quantity: row.quantity,
            consumed: row.consumed,
            start_date: row.start_date,
            end_date: row.end_date,
            attributes: row.attributes.0,
            restricted_to_username: row.restricted_to_username,
            pending_delete: row.pending_delete,
            subscription_modified: row.subscription_modified,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn into_pools(rows: Vec<PoolRow>) -> Result<Vec<Pool>, AppError> {
    rows.into_iter().map(Pool::try_from).collect()
}

// ---
// Repositório PostgreSQL
// ---
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // Distingue "não existe" de "versão velha" depois de um UPDATE que não casou
    async fn stale_or_missing(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        pool_id: Uuid,
        expected_version: i64,
    ) -> AppError {
        let current: Result<Option<(i64,)>, sqlx::Error> =
            sqlx::query_as("SELECT version FROM pools WHERE id = $1")
                .bind(pool_id)
                .fetch_optional(&mut **tx)
                .await;
        match current {
            Ok(Some((version,))) => AppError::Conflict(format!(
                "pool {} mudou (versão esperada {}, atual {})",
                pool_id, expected_version, version
            )),
            Ok(None) => AppError::not_found("Pool", pool_id),
            Err(e) => e.into(),
        }
    }
}

#[async_trait]
impl EntitlementStore for PgStore {
    // --- Owners ---

    async fn create_owner(&self, owner: Owner) -> Result<Owner, AppError> {
        sqlx::query_as::<_, Owner>(
            r#"
            INSERT INTO owners (key, display_name, parent_key, upstream_consumer_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(&owner.key)
        .bind(&owner.display_name)
        .bind(&owner.parent_key)
        .bind(&owner.upstream_consumer_id)
        .bind(owner.created_at)
        .bind(owner.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            // Converte violação de chave única num conflito amigável
            if let Some(db_err) = e.as_database_error() {
                if db_err.is_unique_violation() {
                    return AppError::Conflict(format!("owner '{}' já existe", owner.key));
                }
            }
            e.into()
        })
    }

    async fn find_owner(&self, key: &str) -> Result<Option<Owner>, AppError> {
        let owner = sqlx::query_as::<_, Owner>("SELECT * FROM owners WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(owner)
    }

    async fn list_owners(&self) -> Result<Vec<Owner>, AppError> {
        let owners = sqlx::query_as::<_, Owner>("SELECT * FROM owners ORDER BY key ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(owners)
    }

    async fn update_owner(&self, owner: &Owner) -> Result<Owner, AppError> {
        sqlx::query_as::<_, Owner>(
            r#"
            UPDATE owners
            SET display_name = $2, parent_key = $3, upstream_consumer_id = $4, updated_at = $5
            WHERE key = $1
            RETURNING *
            "#,
        )
        .bind(&owner.key)
        .bind(&owner.display_name)
        .bind(&owner.parent_key)
        .bind(&owner.upstream_consumer_id)
        .bind(owner.updated_at)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::not_found("Owner", &owner.key))
    }

    async fn delete_owner(&self, key: &str) -> Result<(), AppError> {
        sqlx::query("DELETE FROM owners WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // --- Consumidores ---

    async fn create_consumer(&self, consumer: Consumer) -> Result<Consumer, AppError> {
        let created = sqlx::query_as::<_, Consumer>(
            r#"
            INSERT INTO consumers (id, owner_key, name, consumer_type, username, facts, guest_ids,
                                   installed_product_ids, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING *
            "#,
        )
        .bind(consumer.id)
        .bind(&consumer.owner_key)
        .bind(&consumer.name)
        .bind(consumer.consumer_type)
        .bind(&consumer.username)
        .bind(Json(&consumer.facts))
        .bind(Json(&consumer.guest_ids))
        .bind(Json(&consumer.installed_product_ids))
        .bind(consumer.created_at)
        .bind(consumer.updated_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(created)
    }

    async fn find_consumer(&self, id: Uuid) -> Result<Option<Consumer>, AppError> {
        let consumer = sqlx::query_as::<_, Consumer>("SELECT * FROM consumers WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(consumer)
    }

    async fn list_consumers(&self, owner_key: &str) -> Result<Vec<Consumer>, AppError> {
        let consumers = sqlx::query_as::<_, Consumer>(
            "SELECT * FROM consumers WHERE owner_key = $1 ORDER BY created_at, id",
        )
        .bind(owner_key)
        .fetch_all(&self.pool)
        .await?;
        Ok(consumers)
    }

    async fn update_consumer(&self, consumer: &Consumer) -> Result<Consumer, AppError> {
        sqlx::query_as::<_, Consumer>(
            r#"
            UPDATE consumers
            SET name = $2, username = $3, facts = $4, guest_ids = $5,
                installed_product_ids = $6, updated_at = $7
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(consumer.id)
        .bind(&consumer.name)
        .bind(&consumer.username)
        .bind(Json(&consumer.facts))
        .bind(Json(&consumer.guest_ids))
        .bind(Json(&consumer.installed_product_ids))
        .bind(consumer.updated_at)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::not_found("Consumidor", consumer.id))
    }

    async fn delete_consumer(&self, id: Uuid) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        let (has_entitlements,): (bool,) =
            sqlx::query_as("SELECT EXISTS (SELECT 1 FROM entitlements WHERE consumer_id = $1)")
                .bind(id)
                .fetch_one(&mut *tx)
                .await?;
        if has_entitlements {
            return Err(AppError::Conflict(format!(
                "consumidor {} ainda possui entitlements",
                id
            )));
        }

        sqlx::query("DELETE FROM consumers WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn find_hosts_of_guest(
        &self,
        owner_key: &str,
        guest_uuid: &str,
    ) -> Result<Vec<Consumer>, AppError> {
        let hosts = sqlx::query_as::<_, Consumer>(
            r#"
            SELECT * FROM consumers
            WHERE owner_key = $1 AND guest_ids @> jsonb_build_array($2::text)
            "#,
        )
        .bind(owner_key)
        .bind(guest_uuid)
        .fetch_all(&self.pool)
        .await?;
        Ok(hosts)
    }

    async fn find_guests_by_virt_uuid(
        &self,
        owner_key: &str,
        virt_uuid: &str,
    ) -> Result<Vec<Consumer>, AppError> {
        let guests = sqlx::query_as::<_, Consumer>(
            "SELECT * FROM consumers WHERE owner_key = $1 AND lower(facts ->> 'virt.uuid') = lower($2)",
        )
        .bind(owner_key)
        .bind(virt_uuid)
        .fetch_all(&self.pool)
        .await?;
        Ok(guests)
    }

    // --- Pools ---

    async fn find_pool(&self, id: Uuid) -> Result<Option<Pool>, AppError> {
        sqlx::query_as::<_, PoolRow>("SELECT * FROM pools WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Pool::try_from)
            .transpose()
    }

    async fn find_pool_by_key(&self, key: &PoolKey) -> Result<Option<Pool>, AppError> {
        sqlx::query_as::<_, PoolRow>("SELECT * FROM pools WHERE pool_key = $1")
            .bind(key.to_string())
            .fetch_optional(&self.pool)
            .await?
            .map(Pool::try_from)
            .transpose()
    }

    async fn list_pools(&self, owner_key: &str) -> Result<Vec<Pool>, AppError> {
        let rows = sqlx::query_as::<_, PoolRow>(
            "SELECT * FROM pools WHERE owner_key = $1 ORDER BY created_at, id",
        )
        .bind(owner_key)
        .fetch_all(&self.pool)
        .await?;
        into_pools(rows)
    }

    async fn list_pools_restricted_to(&self, consumer_id: Uuid) -> Result<Vec<Pool>, AppError> {
        let rows = sqlx::query_as::<_, PoolRow>(
            "SELECT * FROM pools WHERE restricted_to_consumer = $1 ORDER BY created_at, id",
        )
        .bind(consumer_id)
        .fetch_all(&self.pool)
        .await?;
        into_pools(rows)
    }

    async fn insert_pool_unique(&self, pool: Pool) -> Result<(Pool, bool), AppError> {
        let key = pool.key().map(|k| k.to_string());

        // ON CONFLICT DO NOTHING: o perdedor de uma corrida não recebe linha de volta
        let inserted = sqlx::query_as::<_, PoolRow>(
            r#"
            INSERT INTO pools (id, owner_key, subscription_id, kind, source_entitlement_id,
                               restricted_to_consumer, pool_key, product_id, product_name,
                               provided_product_ids, quantity, consumed, start_date, end_date,
                               attributes, restricted_to_username, pending_delete,
                               subscription_modified, version, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17,
                    $18, $19, $20, $21)
            ON CONFLICT (pool_key) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(pool.id)
        .bind(&pool.owner_key)
        .bind(&pool.subscription_id)
        .bind(kind_to_db(&pool.kind))
        .bind(pool.source_entitlement_id())
        .bind(pool.restricted_to_consumer())
        .bind(&key)
        .bind(&pool.product_id)
        .bind(&pool.product_name)
        .bind(Json(&pool.provided_product_ids))
        .bind(pool.quantity)
        .bind(pool.consumed)
        .bind(pool.start_date)
        .bind(pool.end_date)
        .bind(Json(&pool.attributes))
        .bind(&pool.restricted_to_username)
        .bind(pool.pending_delete)
        .bind(pool.subscription_modified)
        .bind(pool.version)
        .bind(pool.created_at)
        .bind(pool.updated_at)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = inserted {
            return Ok((Pool::try_from(row)?, true));
        }

        let existing = match pool.key() {
            Some(key) => self.find_pool_by_key(&key).await?,
            None => None,
        };
        existing
            .map(|p| (p, false))
            .ok_or_else(|| AppError::Conflict(format!("pool {} não pôde ser criado", pool.id)))
    }

    async fn update_pool(&self, pool: &Pool) -> Result<Pool, AppError> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query_as::<_, PoolRow>(
            r#"
            UPDATE pools
            SET subscription_id = $2, product_id = $3, product_name = $4,
                provided_product_ids = $5, quantity = $6, start_date = $7, end_date = $8,
                attributes = $9, restricted_to_username = $10, pending_delete = $11,
                subscription_modified = $12, updated_at = $13, version = version + 1
            WHERE id = $1 AND version = $14
            RETURNING *
            "#,
        )
        .bind(pool.id)
        .bind(&pool.subscription_id)
        .bind(&pool.product_id)
        .bind(&pool.product_name)
        .bind(Json(&pool.provided_product_ids))
        .bind(pool.quantity)
        .bind(pool.start_date)
        .bind(pool.end_date)
        .bind(Json(&pool.attributes))
        .bind(&pool.restricted_to_username)
        .bind(pool.pending_delete)
        .bind(pool.subscription_modified)
        .bind(pool.updated_at)
        .bind(pool.version)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = updated else {
            return Err(self.stale_or_missing(&mut tx, pool.id, pool.version).await);
        };

        tx.commit().await?;
        Pool::try_from(row)
    }

    async fn delete_pool(&self, id: Uuid) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        // Trava a linha do pool: um `consume` concorrente espera por nós
        sqlx::query("SELECT id FROM pools WHERE id = $1 FOR UPDATE")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let (has_entitlements,): (bool,) =
            sqlx::query_as("SELECT EXISTS (SELECT 1 FROM entitlements WHERE pool_id = $1)")
                .bind(id)
                .fetch_one(&mut *tx)
                .await?;
        if has_entitlements {
            return Err(AppError::Conflict(format!("pool {} ainda possui entitlements", id)));
        }

        sqlx::query("DELETE FROM pools WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    // --- Entitlements ---

    async fn find_entitlement(&self, id: Uuid) -> Result<Option<Entitlement>, AppError> {
        let ent = sqlx::query_as::<_, Entitlement>("SELECT * FROM entitlements WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(ent)
    }

    async fn list_entitlements_by_consumer(
        &self,
        consumer_id: Uuid,
    ) -> Result<Vec<Entitlement>, AppError> {
        let ents = sqlx::query_as::<_, Entitlement>(
            "SELECT * FROM entitlements WHERE consumer_id = $1 ORDER BY created_at, id",
        )
        .bind(consumer_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ents)
    }

    async fn list_entitlements_by_pool(&self, pool_id: Uuid) -> Result<Vec<Entitlement>, AppError> {
        let ents = sqlx::query_as::<_, Entitlement>(
            "SELECT * FROM entitlements WHERE pool_id = $1 ORDER BY created_at, id",
        )
        .bind(pool_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ents)
    }

    async fn list_entitlements_by_owner(
        &self,
        owner_key: &str,
    ) -> Result<Vec<Entitlement>, AppError> {
        let ents = sqlx::query_as::<_, Entitlement>(
            "SELECT * FROM entitlements WHERE owner_key = $1 ORDER BY created_at, id",
        )
        .bind(owner_key)
        .fetch_all(&self.pool)
        .await?;
        Ok(ents)
    }

    async fn consume(
        &self,
        pool_id: Uuid,
        expected_version: i64,
        entitlement: Entitlement,
        exclusive_product: bool,
    ) -> Result<Pool, AppError> {
        // 1. Inicia a transação: contador e entitlement mudam juntos
        let mut tx = self.pool.begin().await?;

        // Trava a linha do consumidor: binds do mesmo consumidor entram em fila
        let locked = sqlx::query_scalar::<_, Uuid>("SELECT id FROM consumers WHERE id = $1 FOR UPDATE")
            .bind(entitlement.consumer_id)
            .fetch_optional(&mut *tx)
            .await?;
        if locked.is_none() {
            return Err(AppError::not_found("Consumidor", entitlement.consumer_id));
        }

        if exclusive_product {
            let duplicated: bool = sqlx::query_scalar(
                r#"
                SELECT EXISTS (
                    SELECT 1 FROM entitlements
                    WHERE consumer_id = $1 AND product_id = $2 AND pool_id <> $3
                      AND start_date <= $4 AND end_date > $4
                )
                "#,
            )
            .bind(entitlement.consumer_id)
            .bind(&entitlement.product_id)
            .bind(pool_id)
            .bind(entitlement.created_at)
            .fetch_one(&mut *tx)
            .await?;
            if duplicated {
                return Err(BindFailure::AlreadyHasProduct {
                    product_id: entitlement.product_id.clone(),
                }
                .into());
            }
        }

        // 2. Incrementa o consumo, só se ninguém mexeu no pool desde a leitura
        let updated = sqlx::query_as::<_, PoolRow>(
            r#"
            UPDATE pools
            SET consumed = consumed + $1, version = version + 1, updated_at = $2
            WHERE id = $3 AND version = $4
            RETURNING *
            "#,
        )
        .bind(entitlement.quantity)
        .bind(entitlement.created_at)
        .bind(pool_id)
        .bind(expected_version)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = updated else {
            return Err(self.stale_or_missing(&mut tx, pool_id, expected_version).await);
        };

        // 3. Grava o entitlement
        sqlx::query(
            r#"
            INSERT INTO entitlements (id, owner_key, consumer_id, pool_id, product_id, quantity,
                                      start_date, end_date, dirty, certificate_serial,
                                      created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(entitlement.id)
        .bind(&entitlement.owner_key)
        .bind(entitlement.consumer_id)
        .bind(entitlement.pool_id)
        .bind(&entitlement.product_id)
        .bind(entitlement.quantity)
        .bind(entitlement.start_date)
        .bind(entitlement.end_date)
        .bind(entitlement.dirty)
        .bind(entitlement.certificate_serial)
        .bind(entitlement.created_at)
        .bind(entitlement.updated_at)
        .execute(&mut *tx)
        .await?;

        // 4. Commit
        tx.commit().await?;
        Pool::try_from(row)
    }

    async fn release(&self, entitlement_id: Uuid) -> Result<Option<(Entitlement, Pool)>, AppError> {
        let mut tx = self.pool.begin().await?;

        let deleted = sqlx::query_as::<_, Entitlement>(
            "DELETE FROM entitlements WHERE id = $1 RETURNING *",
        )
        .bind(entitlement_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(entitlement) = deleted else {
            return Ok(None);
        };

        // A CHECK (consumed >= 0) da tabela barra qualquer contador negativo
        let row = sqlx::query_as::<_, PoolRow>(
            r#"
            UPDATE pools
            SET consumed = consumed - $1, version = version + 1
            WHERE id = $2
            RETURNING *
            "#,
        )
        .bind(entitlement.quantity)
        .bind(entitlement.pool_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| {
            AppError::InvariantViolation(format!(
                "entitlement {} aponta para pool inexistente {}",
                entitlement.id, entitlement.pool_id
            ))
        })?;

        tx.commit().await?;
        Ok(Some((entitlement, Pool::try_from(row)?)))
    }

    async fn change_entitlement_quantity(
        &self,
        entitlement_id: Uuid,
        quantity: i64,
        expected_version: i64,
    ) -> Result<(Entitlement, Pool), AppError> {
        let mut tx = self.pool.begin().await?;

        let current = sqlx::query_as::<_, Entitlement>(
            "SELECT * FROM entitlements WHERE id = $1 FOR UPDATE",
        )
        .bind(entitlement_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::not_found("Entitlement", entitlement_id))?;

        let updated = sqlx::query_as::<_, PoolRow>(
            r#"
            UPDATE pools
            SET consumed = consumed + $1, version = version + 1
            WHERE id = $2 AND version = $3
            RETURNING *
            "#,
        )
        .bind(quantity - current.quantity)
        .bind(current.pool_id)
        .bind(expected_version)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = updated else {
            return Err(self
                .stale_or_missing(&mut tx, current.pool_id, expected_version)
                .await);
        };

        let entitlement = sqlx::query_as::<_, Entitlement>(
            "UPDATE entitlements SET quantity = $2 WHERE id = $1 RETURNING *",
        )
        .bind(entitlement_id)
        .bind(quantity)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok((entitlement, Pool::try_from(row)?))
    }

    async fn update_entitlement_dates(
        &self,
        pool_id: Uuid,
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, AppError> {
        let changed: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            UPDATE entitlements
            SET start_date = $2, end_date = $3
            WHERE pool_id = $1 AND (start_date <> $2 OR end_date <> $3)
            RETURNING id
            "#,
        )
        .bind(pool_id)
        .bind(start_date)
        .bind(end_date)
        .fetch_all(&self.pool)
        .await?;
        Ok(changed.into_iter().map(|(id,)| id).collect())
    }

    async fn mark_certificates(
        &self,
        entitlement_ids: &[Uuid],
        dirty: bool,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE entitlements
            SET dirty = $2,
                certificate_serial = certificate_serial + CASE WHEN $2 THEN 0 ELSE 1 END
            WHERE id = ANY($1)
            "#,
        )
        .bind(entitlement_ids)
        .bind(dirty)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // --- Histórico ---

    async fn record_event(&self, event: PoolEvent) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO pool_events (id, owner_key, event_type, pool_id, entitlement_id,
                                     consumer_id, quantity_delta, notes, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(event.id)
        .bind(&event.owner_key)
        .bind(event.event_type)
        .bind(event.pool_id)
        .bind(event.entitlement_id)
        .bind(event.consumer_id)
        .bind(event.quantity_delta)
        .bind(&event.notes)
        .bind(event.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_events(&self, owner_key: &str) -> Result<Vec<PoolEvent>, AppError> {
        let events = sqlx::query_as::<_, PoolEvent>(
            "SELECT * FROM pool_events WHERE owner_key = $1 ORDER BY created_at, id",
        )
        .bind(owner_key)
        .fetch_all(&self.pool)
        .await?;
        Ok(events)
    }
}
