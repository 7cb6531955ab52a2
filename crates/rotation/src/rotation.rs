use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use mailrotor_core::{RelayUsage, SmtpConfig, SmtpConfigInput, SmtpConfigPatch};
use mailrotor_store::RelayStore;

use crate::error::RotationError;

/// Selects outbound SMTP relays and manages the relay set.
///
/// Each operation reads the clock once and delegates to an `*_at` variant
/// taking the instant explicitly. Counter and primary-flag writes are single
/// store operations; the service never reads a relay, modifies it and writes
/// it back.
#[derive(Clone)]
pub struct SmtpRotation {
    store: Arc<dyn RelayStore>,
}

impl std::fmt::Debug for SmtpRotation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpRotation").finish_non_exhaustive()
    }
}

impl SmtpRotation {
    pub fn new(store: Arc<dyn RelayStore>) -> Self {
        Self { store }
    }

    /// The underlying relay store.
    pub fn store(&self) -> &Arc<dyn RelayStore> {
        &self.store
    }

    // -- counters ----------------------------------------------------------

    /// Count one email sent through relay `id`.
    ///
    /// # Errors
    ///
    /// [`RotationError::NotFound`] if the relay does not exist.
    pub async fn increment_emails_sent(&self, id: Uuid) -> Result<(), RotationError> {
        self.increment_emails_sent_at(id, Utc::now()).await?;
        Ok(())
    }

    /// Count one email sent through relay `id` at `now`, returning the
    /// relay with its updated counters.
    ///
    /// # Errors
    ///
    /// [`RotationError::NotFound`] if the relay does not exist.
    pub async fn increment_emails_sent_at(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<SmtpConfig, RotationError> {
        let relay = self.store.record_send(id, now).await?;
        debug!(
            relay_id = %id,
            hourly = relay.emails_sent_this_hour,
            daily = relay.emails_sent_today,
            "email counted"
        );
        Ok(relay)
    }

    /// Zero both counters of relay `id`.
    ///
    /// # Errors
    ///
    /// [`RotationError::NotFound`] if the relay does not exist.
    pub async fn reset_counters(&self, id: Uuid) -> Result<SmtpConfig, RotationError> {
        self.reset_counters_at(id, Utc::now()).await
    }

    /// Zero both counters of relay `id` and restart both windows at `now`.
    ///
    /// # Errors
    ///
    /// [`RotationError::NotFound`] if the relay does not exist.
    pub async fn reset_counters_at(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<SmtpConfig, RotationError> {
        let relay = self.store.reset_counters(id, now).await?;
        info!(relay_id = %id, "relay counters reset");
        Ok(relay)
    }

    // -- selection ---------------------------------------------------------

    /// Returns `true` if relay `id` exists, is active and has quota left.
    ///
    /// # Errors
    ///
    /// Store failures propagate. A missing relay is `Ok(false)`.
    pub async fn is_smtp_config_available(&self, id: Uuid) -> Result<bool, RotationError> {
        self.is_smtp_config_available_at(id, Utc::now()).await
    }

    /// Availability of relay `id` at `now`.
    ///
    /// # Errors
    ///
    /// Store failures propagate. A missing relay is `Ok(false)`.
    pub async fn is_smtp_config_available_at(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, RotationError> {
        let available = self
            .store
            .get(id)
            .await?
            .is_some_and(|relay| relay.is_available_at(&now));
        debug!(relay_id = %id, available, "availability checked");
        Ok(available)
    }

    /// The relay that should carry the next email, or `None` when every
    /// active relay has spent its quota.
    ///
    /// # Errors
    ///
    /// Store failures propagate.
    pub async fn get_next_available_smtp_config(
        &self,
    ) -> Result<Option<SmtpConfig>, RotationError> {
        self.get_next_available_smtp_config_at(Utc::now()).await
    }

    /// The relay that should carry an email sent at `now`.
    ///
    /// Active relays are tried primary first, then by descending priority,
    /// then oldest first.
    ///
    /// # Errors
    ///
    /// Store failures propagate.
    pub async fn get_next_available_smtp_config_at(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Option<SmtpConfig>, RotationError> {
        let candidates = self.store.list_active().await?;
        let considered = candidates.len();
        let selected = candidates
            .into_iter()
            .find(|relay| relay.is_available_at(&now));

        match &selected {
            Some(relay) => info!(
                relay_id = %relay.id,
                provider = %relay.provider_name,
                primary = relay.is_primary,
                "smtp relay selected"
            ),
            None => warn!(considered, "no smtp relay available"),
        }
        Ok(selected)
    }

    /// Like [`get_next_available_smtp_config`](Self::get_next_available_smtp_config),
    /// but treats "no relay" as an error.
    ///
    /// # Errors
    ///
    /// [`RotationError::NoRelayAvailable`] when no relay can take the email.
    pub async fn require_next_available_smtp_config(&self) -> Result<SmtpConfig, RotationError> {
        self.require_next_available_smtp_config_at(Utc::now()).await
    }

    /// Fallible selection at `now`.
    ///
    /// # Errors
    ///
    /// [`RotationError::NoRelayAvailable`] when no relay can take the email.
    pub async fn require_next_available_smtp_config_at(
        &self,
        now: DateTime<Utc>,
    ) -> Result<SmtpConfig, RotationError> {
        self.get_next_available_smtp_config_at(now)
            .await?
            .ok_or(RotationError::NoRelayAvailable)
    }

    // -- configuration -----------------------------------------------------

    /// Create a relay. If it is marked primary, every other relay loses the
    /// flag in the same store operation.
    ///
    /// # Errors
    ///
    /// [`RotationError::Validation`] for an invalid payload.
    pub async fn create_smtp_config(
        &self,
        input: SmtpConfigInput,
    ) -> Result<SmtpConfig, RotationError> {
        self.create_smtp_config_at(input, Utc::now()).await
    }

    /// Create a relay stamped with `now`.
    ///
    /// # Errors
    ///
    /// [`RotationError::Validation`] for an invalid payload.
    pub async fn create_smtp_config_at(
        &self,
        input: SmtpConfigInput,
        now: DateTime<Utc>,
    ) -> Result<SmtpConfig, RotationError> {
        input.validate()?;
        let relay = SmtpConfig::from_input(input, now);
        self.store.insert(&relay).await?;
        info!(
            relay_id = %relay.id,
            provider = %relay.provider_name,
            primary = relay.is_primary,
            "smtp config created"
        );
        Ok(relay)
    }

    /// Create a relay, or update the relay connecting as the same account
    /// (host, port and username). The existing relay keeps its id and
    /// counters.
    ///
    /// # Errors
    ///
    /// [`RotationError::Validation`] for an invalid payload.
    pub async fn upsert_smtp_config(
        &self,
        input: SmtpConfigInput,
    ) -> Result<SmtpConfig, RotationError> {
        self.upsert_smtp_config_at(input, Utc::now()).await
    }

    /// Upsert stamped with `now`.
    ///
    /// # Errors
    ///
    /// [`RotationError::Validation`] for an invalid payload.
    pub async fn upsert_smtp_config_at(
        &self,
        input: SmtpConfigInput,
        now: DateTime<Utc>,
    ) -> Result<SmtpConfig, RotationError> {
        input.validate()?;
        let relay = self.store.upsert(&input, now).await?;
        info!(
            relay_id = %relay.id,
            provider = %relay.provider_name,
            primary = relay.is_primary,
            "smtp config upserted"
        );
        Ok(relay)
    }

    /// Apply a partial update to relay `id`.
    ///
    /// # Errors
    ///
    /// [`RotationError::Validation`] for an invalid patch,
    /// [`RotationError::NotFound`] if the relay does not exist.
    pub async fn update_smtp_config(
        &self,
        id: Uuid,
        patch: SmtpConfigPatch,
    ) -> Result<SmtpConfig, RotationError> {
        self.update_smtp_config_at(id, patch, Utc::now()).await
    }

    /// Partial update stamped with `now`.
    ///
    /// # Errors
    ///
    /// [`RotationError::Validation`] for an invalid patch,
    /// [`RotationError::NotFound`] if the relay does not exist.
    pub async fn update_smtp_config_at(
        &self,
        id: Uuid,
        patch: SmtpConfigPatch,
        now: DateTime<Utc>,
    ) -> Result<SmtpConfig, RotationError> {
        patch.validate()?;
        let relay = self.store.update(id, &patch, now).await?;
        info!(relay_id = %id, primary = relay.is_primary, "smtp config updated");
        Ok(relay)
    }

    /// Fetch relay `id`.
    ///
    /// # Errors
    ///
    /// [`RotationError::NotFound`] if the relay does not exist.
    pub async fn get_smtp_config(&self, id: Uuid) -> Result<SmtpConfig, RotationError> {
        self.store.get(id).await?.ok_or(RotationError::NotFound(id))
    }

    /// All relays in selection order.
    ///
    /// # Errors
    ///
    /// Store failures propagate.
    pub async fn list_smtp_configs(&self) -> Result<Vec<SmtpConfig>, RotationError> {
        Ok(self.store.list().await?)
    }

    /// The primary relay, if one is designated.
    ///
    /// # Errors
    ///
    /// Store failures propagate.
    pub async fn get_primary_smtp_config(&self) -> Result<Option<SmtpConfig>, RotationError> {
        Ok(self.store.primary().await?)
    }

    /// Delete relay `id`.
    ///
    /// # Errors
    ///
    /// [`RotationError::NotFound`] if the relay does not exist.
    pub async fn delete_smtp_config(&self, id: Uuid) -> Result<(), RotationError> {
        if !self.store.delete(id).await? {
            return Err(RotationError::NotFound(id));
        }
        info!(relay_id = %id, "smtp config deleted");
        Ok(())
    }

    // -- reporting ---------------------------------------------------------

    /// Quota usage of relay `id`.
    ///
    /// # Errors
    ///
    /// [`RotationError::NotFound`] if the relay does not exist.
    pub async fn usage(&self, id: Uuid) -> Result<RelayUsage, RotationError> {
        self.usage_at(id, Utc::now()).await
    }

    /// Quota usage of relay `id` at `now`.
    ///
    /// # Errors
    ///
    /// [`RotationError::NotFound`] if the relay does not exist.
    pub async fn usage_at(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<RelayUsage, RotationError> {
        Ok(self.get_smtp_config(id).await?.usage_at(&now))
    }

    /// Quota usage of every relay, in selection order.
    ///
    /// # Errors
    ///
    /// Store failures propagate.
    pub async fn usage_report(&self) -> Result<Vec<RelayUsage>, RotationError> {
        self.usage_report_at(Utc::now()).await
    }

    /// Quota usage of every relay at `now`.
    ///
    /// # Errors
    ///
    /// Store failures propagate.
    pub async fn usage_report_at(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<RelayUsage>, RotationError> {
        let relays = self.store.list().await?;
        Ok(relays.iter().map(|relay| relay.usage_at(&now)).collect())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};
    use mailrotor_store_memory::MemoryRelayStore;

    use super::*;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, 12, 0, 0).unwrap()
    }

    fn rotation() -> SmtpRotation {
        SmtpRotation::new(Arc::new(MemoryRelayStore::new()))
    }

    fn input(name: &str) -> SmtpConfigInput {
        SmtpConfigInput::new("custom", name, format!("smtp.{name}.test"))
    }

    /// Insert a relay with pre-set counters, bypassing the payload path.
    async fn seed(
        rotation: &SmtpRotation,
        input: SmtpConfigInput,
        hourly: u32,
        last_reset_at: DateTime<Utc>,
    ) -> SmtpConfig {
        let mut relay = SmtpConfig::from_input(input, last_reset_at);
        relay.emails_sent_this_hour = hourly;
        relay.emails_sent_today = hourly;
        rotation.store().insert(&relay).await.unwrap();
        relay
    }

    #[tokio::test]
    async fn hourly_limit_is_reached_on_the_nth_send() {
        let rotation = rotation();
        let relay = rotation
            .create_smtp_config_at(input("capped").with_limits(Some(3), None), base())
            .await
            .unwrap();

        for i in 0..3 {
            assert!(
                rotation
                    .is_smtp_config_available_at(relay.id, base())
                    .await
                    .unwrap(),
                "available before send {}",
                i + 1
            );
            rotation
                .increment_emails_sent_at(relay.id, base() + Duration::minutes(i))
                .await
                .unwrap();
        }

        assert!(
            !rotation
                .is_smtp_config_available_at(relay.id, base() + Duration::minutes(5))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn nineteen_plus_one_reaches_limit_of_twenty() {
        let rotation = rotation();
        let start = base() - Duration::minutes(10);
        let relay = seed(
            &rotation,
            input("twenty").with_limits(Some(20), None),
            19,
            start,
        )
        .await;

        let updated = rotation
            .increment_emails_sent_at(relay.id, base())
            .await
            .unwrap();

        assert_eq!(updated.emails_sent_this_hour, 20);
        assert_eq!(updated.last_reset_at, start);
        assert!(
            !rotation
                .is_smtp_config_available_at(relay.id, base())
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn send_after_ninety_minutes_restarts_hourly_window() {
        let rotation = rotation();
        let start = base() - Duration::minutes(90);
        let relay = seed(
            &rotation,
            input("rested").with_limits(Some(20), None),
            20,
            start,
        )
        .await;

        let updated = rotation
            .increment_emails_sent_at(relay.id, base())
            .await
            .unwrap();

        assert_eq!(updated.emails_sent_this_hour, 1);
        assert_eq!(updated.last_reset_at, base());
        assert!(
            rotation
                .is_smtp_config_available_at(relay.id, base())
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn day_boundary_resets_daily_counter_independently() {
        let rotation = rotation();
        let before_midnight = Utc.with_ymd_and_hms(2026, 3, 14, 23, 50, 0).unwrap();
        let after_midnight = Utc.with_ymd_and_hms(2026, 3, 15, 0, 10, 0).unwrap();

        let mut relay = SmtpConfig::from_input(input("nightly"), before_midnight);
        relay.emails_sent_this_hour = 7;
        relay.emails_sent_today = 480;
        rotation.store().insert(&relay).await.unwrap();

        let updated = rotation
            .increment_emails_sent_at(relay.id, after_midnight)
            .await
            .unwrap();

        assert_eq!(updated.emails_sent_today, 1);
        assert_eq!(updated.emails_sent_this_hour, 8, "hour window still open");
        assert_eq!(updated.daily_reset_on, after_midnight.date_naive());

        let again = rotation
            .increment_emails_sent_at(relay.id, after_midnight + Duration::minutes(5))
            .await
            .unwrap();
        assert_eq!(again.emails_sent_today, 2, "day resets only once");
    }

    #[tokio::test]
    async fn increment_unknown_relay_is_not_found() {
        let rotation = rotation();
        let id = Uuid::new_v4();
        let err = rotation.increment_emails_sent(id).await.unwrap_err();
        assert!(matches!(err, RotationError::NotFound(got) if got == id));
    }

    #[tokio::test]
    async fn unknown_or_inactive_relay_is_unavailable() {
        let rotation = rotation();
        assert!(
            !rotation
                .is_smtp_config_available(Uuid::new_v4())
                .await
                .unwrap()
        );

        let off = rotation
            .create_smtp_config(input("off").inactive())
            .await
            .unwrap();
        assert!(!rotation.is_smtp_config_available(off.id).await.unwrap());
    }

    #[tokio::test]
    async fn daily_limit_blocks_until_next_utc_day() {
        let rotation = rotation();
        let mut relay = SmtpConfig::from_input(input("daily").with_limits(None, Some(2)), base());
        relay.emails_sent_today = 2;
        rotation.store().insert(&relay).await.unwrap();

        let later_today = base() + Duration::hours(3);
        assert!(
            !rotation
                .is_smtp_config_available_at(relay.id, later_today)
                .await
                .unwrap()
        );

        let tomorrow = Utc.with_ymd_and_hms(2026, 3, 15, 0, 0, 1).unwrap();
        assert!(
            rotation
                .is_smtp_config_available_at(relay.id, tomorrow)
                .await
                .unwrap(),
            "an exhausted relay is not stranded once its window elapses"
        );
    }

    #[tokio::test]
    async fn inactive_relay_is_never_selected() {
        let rotation = rotation();
        rotation
            .create_smtp_config_at(input("sleeping").primary().inactive(), base())
            .await
            .unwrap();
        let awake = rotation
            .create_smtp_config_at(input("awake"), base())
            .await
            .unwrap();

        let next = rotation
            .get_next_available_smtp_config_at(base())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(next.id, awake.id);
    }

    #[tokio::test]
    async fn primary_under_quota_wins() {
        let rotation = rotation();
        rotation
            .create_smtp_config_at(input("high").with_priority(100), base())
            .await
            .unwrap();
        let primary = rotation
            .create_smtp_config_at(input("main").primary(), base())
            .await
            .unwrap();

        let next = rotation
            .require_next_available_smtp_config_at(base())
            .await
            .unwrap();
        assert_eq!(next.id, primary.id);
        assert!(next.is_primary);
    }

    #[tokio::test]
    async fn exhausted_primary_falls_back_to_priority_order() {
        let rotation = rotation();
        let primary = seed(
            &rotation,
            input("main").primary().with_limits(Some(5), None),
            5,
            base() - Duration::minutes(1),
        )
        .await;
        rotation
            .create_smtp_config_at(input("low").with_priority(1), base())
            .await
            .unwrap();
        let high = rotation
            .create_smtp_config_at(input("high").with_priority(10), base())
            .await
            .unwrap();

        let next = rotation
            .get_next_available_smtp_config_at(base())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(next.id, high.id);
        assert_ne!(next.id, primary.id);
    }

    #[tokio::test]
    async fn equal_priority_prefers_oldest() {
        let rotation = rotation();
        let first = rotation
            .create_smtp_config_at(input("first"), base())
            .await
            .unwrap();
        rotation
            .create_smtp_config_at(input("second"), base() + Duration::seconds(1))
            .await
            .unwrap();

        let next = rotation
            .get_next_available_smtp_config_at(base())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(next.id, first.id);
    }

    #[tokio::test]
    async fn all_inactive_yields_none_or_error() {
        let rotation = rotation();
        rotation
            .create_smtp_config(input("a").inactive())
            .await
            .unwrap();
        rotation
            .create_smtp_config(input("b").inactive())
            .await
            .unwrap();

        assert!(
            rotation
                .get_next_available_smtp_config()
                .await
                .unwrap()
                .is_none()
        );
        assert!(matches!(
            rotation.require_next_available_smtp_config().await,
            Err(RotationError::NoRelayAvailable)
        ));
    }

    #[tokio::test]
    async fn setting_primary_moves_the_flag() {
        let rotation = rotation();
        let a = rotation
            .create_smtp_config(input("a").primary())
            .await
            .unwrap();
        rotation.create_smtp_config(input("b")).await.unwrap();
        let c = rotation.create_smtp_config(input("c")).await.unwrap();

        let patch = SmtpConfigPatch {
            is_primary: Some(true),
            ..SmtpConfigPatch::default()
        };
        let updated = rotation.update_smtp_config(c.id, patch).await.unwrap();
        assert!(updated.is_primary);

        let primaries: Vec<Uuid> = rotation
            .list_smtp_configs()
            .await
            .unwrap()
            .into_iter()
            .filter(|r| r.is_primary)
            .map(|r| r.id)
            .collect();
        assert_eq!(primaries, vec![c.id]);
        assert!(!rotation.get_smtp_config(a.id).await.unwrap().is_primary);
        assert_eq!(
            rotation.get_primary_smtp_config().await.unwrap().map(|r| r.id),
            Some(c.id)
        );
    }

    #[tokio::test]
    async fn creating_second_primary_demotes_inactive_primary_too() {
        let rotation = rotation();
        let old = rotation
            .create_smtp_config(input("old").primary().inactive())
            .await
            .unwrap();
        let new = rotation
            .create_smtp_config(input("new").primary())
            .await
            .unwrap();

        assert!(!rotation.get_smtp_config(old.id).await.unwrap().is_primary);
        assert!(rotation.get_smtp_config(new.id).await.unwrap().is_primary);
    }

    #[tokio::test]
    async fn update_unknown_relay_is_not_found() {
        let rotation = rotation();
        let err = rotation
            .update_smtp_config(Uuid::new_v4(), SmtpConfigPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RotationError::NotFound(_)));
    }

    #[tokio::test]
    async fn invalid_payloads_are_rejected_before_storage() {
        let rotation = rotation();
        let err = rotation
            .create_smtp_config(SmtpConfigInput::new("custom", "blank", ""))
            .await
            .unwrap_err();
        assert!(matches!(err, RotationError::Validation(_)));

        let err = rotation
            .upsert_smtp_config(input("zero").with_limits(Some(0), None))
            .await
            .unwrap_err();
        assert!(matches!(err, RotationError::Validation(_)));
        assert!(rotation.list_smtp_configs().await.unwrap().is_empty());

        let relay = rotation.create_smtp_config(input("ok")).await.unwrap();
        let patch = SmtpConfigPatch {
            port: Some(0),
            ..SmtpConfigPatch::default()
        };
        let err = rotation
            .update_smtp_config(relay.id, patch)
            .await
            .unwrap_err();
        assert!(matches!(err, RotationError::Validation(_)));
    }

    #[tokio::test]
    async fn upsert_keeps_identity_and_counters() {
        let rotation = rotation();
        let first = rotation
            .upsert_smtp_config_at(input("acct").with_credentials("bot", "pw1"), base())
            .await
            .unwrap();
        rotation
            .increment_emails_sent_at(first.id, base())
            .await
            .unwrap();

        let second = rotation
            .upsert_smtp_config_at(
                input("acct")
                    .with_credentials("bot", "pw2")
                    .with_priority(4),
                base() + Duration::minutes(1),
            )
            .await
            .unwrap();

        assert_eq!(second.id, first.id);
        assert_eq!(second.priority, 4);
        assert_eq!(second.emails_sent_this_hour, 1);
        assert_eq!(second.created_at, first.created_at);
        assert_eq!(rotation.list_smtp_configs().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delete_then_get_is_not_found() {
        let rotation = rotation();
        let relay = rotation.create_smtp_config(input("gone")).await.unwrap();

        rotation.delete_smtp_config(relay.id).await.unwrap();
        assert!(matches!(
            rotation.get_smtp_config(relay.id).await,
            Err(RotationError::NotFound(_))
        ));
        assert!(matches!(
            rotation.delete_smtp_config(relay.id).await,
            Err(RotationError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn reset_makes_exhausted_relay_available() {
        let rotation = rotation();
        let relay = seed(
            &rotation,
            input("spent").with_limits(Some(1), Some(1)),
            1,
            base(),
        )
        .await;
        assert!(
            !rotation
                .is_smtp_config_available_at(relay.id, base())
                .await
                .unwrap()
        );

        let reset = rotation.reset_counters_at(relay.id, base()).await.unwrap();
        assert_eq!(reset.emails_sent_this_hour, 0);
        assert_eq!(reset.emails_sent_today, 0);
        assert!(
            rotation
                .is_smtp_config_available_at(relay.id, base())
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn usage_reports_remaining_quota() {
        let rotation = rotation();
        let relay = seed(
            &rotation,
            input("metered").with_limits(Some(20), Some(500)),
            19,
            base() - Duration::minutes(10),
        )
        .await;
        rotation
            .create_smtp_config_at(input("free"), base())
            .await
            .unwrap();

        let usage = rotation.usage_at(relay.id, base()).await.unwrap();
        assert_eq!(usage.hourly.used, 19);
        assert_eq!(usage.hourly.remaining, Some(1));
        assert_eq!(usage.hourly.resets_at, Some(base() + Duration::minutes(50)));
        assert_eq!(usage.daily.remaining, Some(481));
        assert!(usage.available);

        let report = rotation.usage_report_at(base()).await.unwrap();
        assert_eq!(report.len(), 2);
        assert!(report.iter().any(|u| u.hourly.limit.is_none()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_increments_are_all_counted() {
        let rotation = rotation();
        let relay = rotation.create_smtp_config(input("hot")).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..50 {
            let rotation = rotation.clone();
            handles.push(tokio::spawn(async move {
                rotation.increment_emails_sent(relay.id).await
            }));
        }
        for h in handles {
            h.await.expect("task should not panic").unwrap();
        }

        let stored = rotation.get_smtp_config(relay.id).await.unwrap();
        assert_eq!(stored.emails_sent_this_hour, 50);
    }
}
