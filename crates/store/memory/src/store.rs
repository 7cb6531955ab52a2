use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use mailrotor_core::{SmtpConfig, SmtpConfigInput, SmtpConfigPatch, cmp_selection_order};
use mailrotor_store::error::StoreError;
use mailrotor_store::store::RelayStore;

/// In-memory [`RelayStore`] backed by a [`DashMap`].
///
/// Counter updates mutate a single entry under its shard lock, so concurrent
/// sends on one relay are never lost. The primary flag is not stored on the
/// rows: a single slot holds the primary relay's id and is stamped onto
/// every relay handed out, so readers can never see two primaries. Writes
/// that add, remove or re-flag relays hold the slot for writing.
#[derive(Debug, Default)]
pub struct MemoryRelayStore {
    relays: DashMap<Uuid, SmtpConfig>,
    primary: RwLock<Option<Uuid>>,
}

impl MemoryRelayStore {
    /// Create a new, empty in-memory relay store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamp the primary flag from the slot onto a stored relay.
    fn materialize(mut relay: SmtpConfig, primary: Option<Uuid>) -> SmtpConfig {
        relay.is_primary = primary == Some(relay.id);
        relay
    }

    async fn snapshot(&self, active_only: bool) -> Vec<SmtpConfig> {
        let primary = *self.primary.read().await;
        let mut relays: Vec<SmtpConfig> = self
            .relays
            .iter()
            .filter(|entry| !active_only || entry.is_active)
            .map(|entry| Self::materialize(entry.value().clone(), primary))
            .collect();
        relays.sort_by(cmp_selection_order);
        relays
    }
}

/// Move the primary slot after a write that set `is_primary` to `wanted`.
fn retarget_primary(slot: &mut Option<Uuid>, id: Uuid, wanted: Option<bool>) {
    match wanted {
        Some(true) => *slot = Some(id),
        Some(false) if *slot == Some(id) => *slot = None,
        _ => {}
    }
}

#[async_trait]
impl RelayStore for MemoryRelayStore {
    async fn get(&self, id: Uuid) -> Result<Option<SmtpConfig>, StoreError> {
        let primary = *self.primary.read().await;
        Ok(self
            .relays
            .get(&id)
            .map(|entry| Self::materialize(entry.value().clone(), primary)))
    }

    async fn list(&self) -> Result<Vec<SmtpConfig>, StoreError> {
        Ok(self.snapshot(false).await)
    }

    async fn list_active(&self) -> Result<Vec<SmtpConfig>, StoreError> {
        Ok(self.snapshot(true).await)
    }

    async fn insert(&self, relay: &SmtpConfig) -> Result<(), StoreError> {
        let mut primary = self.primary.write().await;

        match self.relays.entry(relay.id) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(StoreError::Conflict(format!(
                    "relay {} already exists",
                    relay.id
                )));
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                let mut stored = relay.clone();
                stored.is_primary = false;
                vacant.insert(stored);
            }
        }

        if relay.is_primary {
            *primary = Some(relay.id);
        }
        Ok(())
    }

    async fn upsert(
        &self,
        input: &SmtpConfigInput,
        now: DateTime<Utc>,
    ) -> Result<SmtpConfig, StoreError> {
        let mut primary = self.primary.write().await;

        // Several relays may share an account; the oldest one is updated.
        let existing = self
            .relays
            .iter()
            .filter(|entry| entry.same_account(&input.host, input.port, input.username.as_deref()))
            .map(|entry| (entry.created_at, *entry.key()))
            .min()
            .map(|(_, id)| id);

        let relay = match existing {
            Some(id) => {
                let mut entry = self.relays.get_mut(&id).ok_or(StoreError::NotFound(id))?;
                let stored = entry.value_mut();
                input.apply_to(stored, now);
                stored.is_primary = false;
                stored.clone()
            }
            None => {
                let mut relay = SmtpConfig::from_input(input.clone(), now);
                relay.is_primary = false;
                self.relays.insert(relay.id, relay.clone());
                relay
            }
        };

        retarget_primary(&mut primary, relay.id, Some(input.is_primary));
        Ok(Self::materialize(relay, *primary))
    }

    async fn update(
        &self,
        id: Uuid,
        patch: &SmtpConfigPatch,
        now: DateTime<Utc>,
    ) -> Result<SmtpConfig, StoreError> {
        let mut primary = self.primary.write().await;

        let relay = {
            let mut entry = self.relays.get_mut(&id).ok_or(StoreError::NotFound(id))?;
            let stored = entry.value_mut();
            patch.apply(stored, now);
            stored.is_primary = false;
            stored.clone()
        };

        retarget_primary(&mut primary, id, patch.is_primary);
        Ok(Self::materialize(relay, *primary))
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut primary = self.primary.write().await;
        let existed = self.relays.remove(&id).is_some();
        if *primary == Some(id) {
            *primary = None;
        }
        Ok(existed)
    }

    async fn record_send(&self, id: Uuid, now: DateTime<Utc>) -> Result<SmtpConfig, StoreError> {
        let relay = {
            let mut entry = self.relays.get_mut(&id).ok_or(StoreError::NotFound(id))?;
            entry.value_mut().record_send(now);
            entry.value().clone()
        };
        let primary = *self.primary.read().await;
        Ok(Self::materialize(relay, primary))
    }

    async fn reset_counters(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<SmtpConfig, StoreError> {
        let relay = {
            let mut entry = self.relays.get_mut(&id).ok_or(StoreError::NotFound(id))?;
            entry.value_mut().reset_counters(now);
            entry.value().clone()
        };
        let primary = *self.primary.read().await;
        Ok(Self::materialize(relay, primary))
    }

    async fn primary(&self) -> Result<Option<SmtpConfig>, StoreError> {
        let primary = *self.primary.read().await;
        Ok(primary.and_then(|id| {
            self.relays
                .get(&id)
                .map(|entry| Self::materialize(entry.value().clone(), Some(id)))
        }))
    }
}
