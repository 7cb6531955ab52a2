use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use mailrotor_core::{SmtpConfig, SmtpConfigInput, SmtpConfigPatch};

use crate::error::StoreError;

/// Trait for persisting relay configurations and their send counters.
///
/// Implementations must be `Send + Sync` and safe for concurrent access.
/// Every method is a single atomic operation from the caller's point of
/// view: no caller ever observes two primary relays, and concurrent
/// [`record_send`](RelayStore::record_send) calls on one relay never lose a
/// count.
#[async_trait]
pub trait RelayStore: Send + Sync {
    /// Get a relay by id. Returns `None` if it does not exist.
    async fn get(&self, id: Uuid) -> Result<Option<SmtpConfig>, StoreError>;

    /// All relays in selection order (primary first, then priority
    /// descending, then oldest first).
    async fn list(&self) -> Result<Vec<SmtpConfig>, StoreError>;

    /// Active relays in selection order.
    async fn list_active(&self) -> Result<Vec<SmtpConfig>, StoreError>;

    /// Insert a new relay.
    ///
    /// If `relay.is_primary` is set, every other relay loses the flag in the
    /// same operation. Fails with [`StoreError::Conflict`] if the id exists.
    async fn insert(&self, relay: &SmtpConfig) -> Result<(), StoreError>;

    /// Insert a relay, or replace the editable fields of the relay connecting
    /// as the same account (host, port, username). When several relays share
    /// the account, the oldest (by `created_at`, then id) is updated.
    /// Counters, id and creation time of an existing relay are kept. Primary
    /// exclusivity applies.
    async fn upsert(
        &self,
        input: &SmtpConfigInput,
        now: DateTime<Utc>,
    ) -> Result<SmtpConfig, StoreError>;

    /// Apply a partial update. Primary exclusivity applies.
    ///
    /// Fails with [`StoreError::NotFound`] if the relay does not exist.
    async fn update(
        &self,
        id: Uuid,
        patch: &SmtpConfigPatch,
        now: DateTime<Utc>,
    ) -> Result<SmtpConfig, StoreError>;

    /// Delete a relay. Returns `true` if it existed.
    async fn delete(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Atomically count one email sent at `now`, rolling the hourly and daily
    /// windows over when they have elapsed. Returns the updated relay.
    ///
    /// Fails with [`StoreError::NotFound`] if the relay does not exist.
    async fn record_send(&self, id: Uuid, now: DateTime<Utc>) -> Result<SmtpConfig, StoreError>;

    /// Zero both counters and restart both windows at `now`.
    ///
    /// Fails with [`StoreError::NotFound`] if the relay does not exist.
    async fn reset_counters(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<SmtpConfig, StoreError>;

    /// The relay holding the primary flag, if any.
    ///
    /// The default implementation scans [`list`](RelayStore::list).
    async fn primary(&self) -> Result<Option<SmtpConfig>, StoreError> {
        let relays = self.list().await?;
        Ok(relays.into_iter().find(|r| r.is_primary))
    }
}
