use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::debug;
use uuid::Uuid;

use mailrotor_core::{SmtpConfig, SmtpConfigInput, SmtpConfigPatch};
use mailrotor_store::error::StoreError;
use mailrotor_store::store::RelayStore;

use crate::config::PostgresConfig;
use crate::migrations;
use crate::row::{COLUMNS, RelayRow, signed, signed_opt};

/// Selection order, matching `mailrotor_core::cmp_selection_order`.
const ORDER_BY: &str = "ORDER BY is_primary DESC, priority DESC, created_at ASC";

/// PostgreSQL-backed implementation of [`RelayStore`].
///
/// Uses `sqlx::PgPool` for connection pooling. Counter updates are a single
/// `UPDATE .. RETURNING` whose window arithmetic runs inside the database, so
/// concurrent senders serialize on the row lock instead of racing in the
/// application. Writes that may move the primary flag run in a transaction
/// that clears the flag elsewhere first; a partial unique index rejects any
/// second primary.
pub struct PostgresRelayStore {
    pool: PgPool,
    config: Arc<PostgresConfig>,
}

impl PostgresRelayStore {
    /// Create a new `PostgresRelayStore` from the provided configuration.
    ///
    /// Connects to `PostgreSQL`, creates the connection pool, and runs
    /// migrations to ensure the relays table exists.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Connection`] if pool creation fails, or
    /// [`StoreError::Backend`] if migrations fail.
    pub async fn new(config: PostgresConfig) -> Result<Self, StoreError> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(config.pool_size)
            .connect(&config.url)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        Self::from_pool(pool, config).await
    }

    /// Create a `PostgresRelayStore` from an existing pool and config.
    ///
    /// Runs migrations on creation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if migrations fail.
    pub async fn from_pool(pool: PgPool, config: PostgresConfig) -> Result<Self, StoreError> {
        migrations::run_migrations(&pool, &config)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        debug!(table = %config.relays_table(), "relay table ready");

        Ok(Self {
            pool,
            config: Arc::new(config),
        })
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>, StoreError> {
        self.pool.begin().await.map_err(backend_error)
    }

    async fn select(&self, filter: &str) -> Result<Vec<SmtpConfig>, StoreError> {
        let table = self.config.relays_table();
        let query = format!("SELECT {COLUMNS} FROM {table} {filter} {ORDER_BY}");

        let rows: Vec<RelayRow> = sqlx::query_as(&query)
            .fetch_all(&self.pool)
            .await
            .map_err(backend_error)?;

        rows.into_iter().map(SmtpConfig::try_from).collect()
    }

    /// Take a transaction-scoped advisory lock on `key`.
    async fn advisory_lock(
        tx: &mut Transaction<'static, Postgres>,
        key: &str,
    ) -> Result<(), StoreError> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(key)
            .execute(&mut **tx)
            .await
            .map_err(backend_error)?;
        Ok(())
    }

    /// Serialize writers that promote a relay to primary.
    ///
    /// Must be taken before any row lock in the transaction, and before
    /// [`clear_primary`](Self::clear_primary): under READ COMMITTED the
    /// clearing `UPDATE` only sees primaries committed before it starts.
    async fn lock_primary(
        &self,
        tx: &mut Transaction<'static, Postgres>,
    ) -> Result<(), StoreError> {
        let key = format!("{}:primary", self.config.relays_table());
        Self::advisory_lock(tx, &key).await
    }

    /// Remove the primary flag from every relay except `keep`.
    ///
    /// Callers hold [`lock_primary`](Self::lock_primary).
    async fn clear_primary(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        keep: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let table = self.config.relays_table();
        let query = format!(
            "UPDATE {table} SET is_primary = FALSE, updated_at = $2 \
             WHERE is_primary AND id <> $1"
        );

        sqlx::query(&query)
            .bind(keep)
            .bind(now)
            .execute(&mut **tx)
            .await
            .map_err(backend_error)?;
        Ok(())
    }

    async fn insert_row(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        relay: &SmtpConfig,
    ) -> Result<(), StoreError> {
        let table = self.config.relays_table();
        let query = format!(
            "INSERT INTO {table} ({COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, \
                     $12, $13, $14, $15, $16, $17, $18, $19, $20, $21)"
        );

        sqlx::query(&query)
            .bind(relay.id)
            .bind(&relay.provider)
            .bind(&relay.provider_name)
            .bind(&relay.host)
            .bind(i32::from(relay.port))
            .bind(relay.secure)
            .bind(&relay.username)
            .bind(&relay.password)
            .bind(&relay.from_email)
            .bind(&relay.from_name)
            .bind(relay.is_active)
            .bind(relay.is_primary)
            .bind(relay.priority)
            .bind(signed_opt("daily_limit", relay.daily_limit)?)
            .bind(signed_opt("hourly_limit", relay.hourly_limit)?)
            .bind(signed("emails_sent_today", relay.emails_sent_today)?)
            .bind(signed("emails_sent_this_hour", relay.emails_sent_this_hour)?)
            .bind(relay.last_reset_at)
            .bind(relay.daily_reset_on)
            .bind(relay.created_at)
            .bind(relay.updated_at)
            .execute(&mut **tx)
            .await
            .map_err(backend_error)?;
        Ok(())
    }

    /// Write the editable fields of `relay`. Counters are left to
    /// [`RelayStore::record_send`] and [`RelayStore::reset_counters`].
    async fn write_settings(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        relay: &SmtpConfig,
    ) -> Result<SmtpConfig, StoreError> {
        let table = self.config.relays_table();
        let query = format!(
            "UPDATE {table} \
             SET provider = $2, provider_name = $3, host = $4, port = $5, secure = $6, \
                 username = $7, password = $8, from_email = $9, from_name = $10, \
                 is_active = $11, is_primary = $12, priority = $13, \
                 daily_limit = $14, hourly_limit = $15, updated_at = $16 \
             WHERE id = $1 \
             RETURNING {COLUMNS}"
        );

        let row: RelayRow = sqlx::query_as(&query)
            .bind(relay.id)
            .bind(&relay.provider)
            .bind(&relay.provider_name)
            .bind(&relay.host)
            .bind(i32::from(relay.port))
            .bind(relay.secure)
            .bind(&relay.username)
            .bind(&relay.password)
            .bind(&relay.from_email)
            .bind(&relay.from_name)
            .bind(relay.is_active)
            .bind(relay.is_primary)
            .bind(relay.priority)
            .bind(signed_opt("daily_limit", relay.daily_limit)?)
            .bind(signed_opt("hourly_limit", relay.hourly_limit)?)
            .bind(relay.updated_at)
            .fetch_one(&mut **tx)
            .await
            .map_err(backend_error)?;

        SmtpConfig::try_from(row)
    }
}

/// Map a `sqlx` error, surfacing unique violations as conflicts.
fn backend_error(e: sqlx::Error) -> StoreError {
    if let Some(db) = e.as_database_error()
        && db.is_unique_violation()
    {
        return StoreError::Conflict(db.message().to_owned());
    }
    StoreError::Backend(e.to_string())
}

#[async_trait]
impl RelayStore for PostgresRelayStore {
    async fn get(&self, id: Uuid) -> Result<Option<SmtpConfig>, StoreError> {
        let table = self.config.relays_table();
        let query = format!("SELECT {COLUMNS} FROM {table} WHERE id = $1");

        let row: Option<RelayRow> = sqlx::query_as(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend_error)?;

        row.map(SmtpConfig::try_from).transpose()
    }

    async fn list(&self) -> Result<Vec<SmtpConfig>, StoreError> {
        self.select("").await
    }

    async fn list_active(&self) -> Result<Vec<SmtpConfig>, StoreError> {
        self.select("WHERE is_active").await
    }

    async fn insert(&self, relay: &SmtpConfig) -> Result<(), StoreError> {
        let mut tx = self.begin().await?;
        if relay.is_primary {
            self.lock_primary(&mut tx).await?;
            self.clear_primary(&mut tx, relay.id, relay.updated_at)
                .await?;
        }
        self.insert_row(&mut tx, relay).await?;
        tx.commit().await.map_err(backend_error)
    }

    async fn upsert(
        &self,
        input: &SmtpConfigInput,
        now: DateTime<Utc>,
    ) -> Result<SmtpConfig, StoreError> {
        let table = self.config.relays_table();
        let mut tx = self.begin().await?;

        if input.is_primary {
            self.lock_primary(&mut tx).await?;
        }

        // Serialize upserts of the same account so two first-time upserts
        // cannot both insert.
        let account_key = format!(
            "{table}:{}:{}:{}",
            input.host.to_ascii_lowercase(),
            input.port,
            input.username.as_deref().unwrap_or_default()
        );
        Self::advisory_lock(&mut tx, &account_key).await?;

        let select = format!(
            "SELECT {COLUMNS} FROM {table} \
             WHERE lower(host) = lower($1) AND port = $2 \
               AND username IS NOT DISTINCT FROM $3 \
             ORDER BY created_at ASC, id ASC LIMIT 1 FOR UPDATE"
        );
        let existing: Option<RelayRow> = sqlx::query_as(&select)
            .bind(&input.host)
            .bind(i32::from(input.port))
            .bind(&input.username)
            .fetch_optional(&mut *tx)
            .await
            .map_err(backend_error)?;

        let relay = match existing {
            Some(row) => {
                let mut relay = SmtpConfig::try_from(row)?;
                input.apply_to(&mut relay, now);
                if relay.is_primary {
                    self.clear_primary(&mut tx, relay.id, now).await?;
                }
                self.write_settings(&mut tx, &relay).await?
            }
            None => {
                let relay = SmtpConfig::from_input(input.clone(), now);
                if relay.is_primary {
                    self.clear_primary(&mut tx, relay.id, now).await?;
                }
                self.insert_row(&mut tx, &relay).await?;
                relay
            }
        };

        tx.commit().await.map_err(backend_error)?;
        Ok(relay)
    }

    async fn update(
        &self,
        id: Uuid,
        patch: &SmtpConfigPatch,
        now: DateTime<Utc>,
    ) -> Result<SmtpConfig, StoreError> {
        let table = self.config.relays_table();
        let mut tx = self.begin().await?;

        if patch.sets_primary() {
            self.lock_primary(&mut tx).await?;
        }

        let select = format!("SELECT {COLUMNS} FROM {table} WHERE id = $1 FOR UPDATE");
        let row: Option<RelayRow> = sqlx::query_as(&select)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(backend_error)?;
        let mut relay = SmtpConfig::try_from(row.ok_or(StoreError::NotFound(id))?)?;

        patch.apply(&mut relay, now);
        if patch.sets_primary() {
            self.clear_primary(&mut tx, id, now).await?;
        }
        let relay = self.write_settings(&mut tx, &relay).await?;

        tx.commit().await.map_err(backend_error)?;
        Ok(relay)
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        let table = self.config.relays_table();
        let query = format!("DELETE FROM {table} WHERE id = $1");

        let result = sqlx::query(&query)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(backend_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn record_send(&self, id: Uuid, now: DateTime<Utc>) -> Result<SmtpConfig, StoreError> {
        let table = self.config.relays_table();

        // Every SET expression reads the pre-update row, so the hourly and
        // daily windows are judged independently against the stored markers.
        let query = format!(
            "UPDATE {table} SET \
                 emails_sent_this_hour = CASE \
                     WHEN $2::timestamptz - last_reset_at >= INTERVAL '1 hour' THEN 1 \
                     ELSE emails_sent_this_hour + 1 END, \
                 last_reset_at = CASE \
                     WHEN $2::timestamptz - last_reset_at >= INTERVAL '1 hour' THEN $2::timestamptz \
                     ELSE last_reset_at END, \
                 emails_sent_today = CASE \
                     WHEN ($2::timestamptz AT TIME ZONE 'UTC')::date <> daily_reset_on THEN 1 \
                     ELSE emails_sent_today + 1 END, \
                 daily_reset_on = ($2::timestamptz AT TIME ZONE 'UTC')::date, \
                 updated_at = $2::timestamptz \
             WHERE id = $1 \
             RETURNING {COLUMNS}"
        );

        let row: Option<RelayRow> = sqlx::query_as(&query)
            .bind(id)
            .bind(now)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend_error)?;

        SmtpConfig::try_from(row.ok_or(StoreError::NotFound(id))?)
    }

    async fn reset_counters(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<SmtpConfig, StoreError> {
        let table = self.config.relays_table();
        let query = format!(
            "UPDATE {table} SET \
                 emails_sent_this_hour = 0, \
                 emails_sent_today = 0, \
                 last_reset_at = $2::timestamptz, \
                 daily_reset_on = ($2::timestamptz AT TIME ZONE 'UTC')::date, \
                 updated_at = $2::timestamptz \
             WHERE id = $1 \
             RETURNING {COLUMNS}"
        );

        let row: Option<RelayRow> = sqlx::query_as(&query)
            .bind(id)
            .bind(now)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend_error)?;

        SmtpConfig::try_from(row.ok_or(StoreError::NotFound(id))?)
    }

    async fn primary(&self) -> Result<Option<SmtpConfig>, StoreError> {
        let table = self.config.relays_table();
        let query = format!("SELECT {COLUMNS} FROM {table} WHERE is_primary LIMIT 1");

        let row: Option<RelayRow> = sqlx::query_as(&query)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend_error)?;

        row.map(SmtpConfig::try_from).transpose()
    }
}

#[cfg(all(test, feature = "integration"))]
mod integration_tests {
    use super::*;

    fn test_config() -> PostgresConfig {
        PostgresConfig {
            url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost:5432/mailrotor_test".to_string()),
            table_prefix: format!("test_{}_", Uuid::new_v4().simple()),
            ..PostgresConfig::default()
        }
    }

    #[tokio::test]
    async fn store_conformance() {
        let store = PostgresRelayStore::new(test_config())
            .await
            .expect("pool creation should succeed");
        mailrotor_store::testing::run_store_conformance_tests(&store)
            .await
            .expect("conformance tests should pass");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_sends_are_all_counted() {
        let store = Arc::new(
            PostgresRelayStore::new(test_config())
                .await
                .expect("pool creation should succeed"),
        );
        let now = Utc::now();
        let relay = SmtpConfig::from_input(
            SmtpConfigInput::new("custom", "Busy", "busy.test"),
            now,
        );
        store.insert(&relay).await.expect("insert should succeed");

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                for _ in 0..5 {
                    store
                        .record_send(relay.id, now)
                        .await
                        .expect("record_send should succeed");
                }
            }));
        }
        for h in handles {
            h.await.expect("task should not panic");
        }

        let stored = store.get(relay.id).await.unwrap().unwrap();
        assert_eq!(stored.emails_sent_this_hour, 80);
        assert_eq!(stored.emails_sent_today, 80);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_promotions_all_succeed() {
        let store = Arc::new(
            PostgresRelayStore::new(test_config())
                .await
                .expect("pool creation should succeed"),
        );
        let now = Utc::now();

        let mut ids = Vec::new();
        for i in 0..16 {
            let relay = SmtpConfig::from_input(
                SmtpConfigInput::new("custom", format!("R{i}"), format!("r{i}.test")),
                now,
            );
            store.insert(&relay).await.expect("insert should succeed");
            ids.push(relay.id);
        }

        let promote = SmtpConfigPatch {
            is_primary: Some(true),
            ..SmtpConfigPatch::default()
        };
        for _ in 0..5 {
            let mut handles = Vec::new();
            for &id in &ids {
                let store = Arc::clone(&store);
                let promote = promote.clone();
                handles.push(tokio::spawn(async move {
                    store.update(id, &promote, Utc::now()).await
                }));
            }
            // Inserts and upserts of new primaries race the updates.
            for i in 0..4 {
                let store = Arc::clone(&store);
                handles.push(tokio::spawn(async move {
                    let input =
                        SmtpConfigInput::new("custom", "Late", format!("late{i}.test")).primary();
                    store.upsert(&input, Utc::now()).await
                }));
            }
            for h in handles {
                h.await
                    .expect("task should not panic")
                    .expect("promotion should not conflict");
            }
        }

        let primaries = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .filter(|r| r.is_primary)
            .count();
        assert_eq!(primaries, 1);
    }

    #[tokio::test]
    async fn second_primary_row_is_rejected_by_index() {
        let config = test_config();
        let table = config.relays_table();
        let store = PostgresRelayStore::new(config)
            .await
            .expect("pool creation should succeed");

        let a = SmtpConfig::from_input(
            SmtpConfigInput::new("custom", "A", "a.test").primary(),
            Utc::now(),
        );
        store.insert(&a).await.unwrap();

        let b = SmtpConfig::from_input(SmtpConfigInput::new("custom", "B", "b.test"), Utc::now());
        store.insert(&b).await.unwrap();

        // Bypass the store's write path to hit the index directly.
        let result = sqlx::query(&format!("UPDATE {table} SET is_primary = TRUE WHERE id = $1"))
            .bind(b.id)
            .execute(&store.pool)
            .await;
        assert!(result.is_err(), "partial unique index should reject a second primary");
    }
}
