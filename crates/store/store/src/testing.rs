use chrono::{DateTime, Duration, TimeZone, Utc};
use uuid::Uuid;

use mailrotor_core::{SmtpConfig, SmtpConfigInput, SmtpConfigPatch};

use crate::error::StoreError;
use crate::store::RelayStore;

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 14, 12, 0, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

fn relay(name: &str, host: &str) -> SmtpConfig {
    SmtpConfig::from_input(SmtpConfigInput::new("custom", name, host), base_time())
}

/// Run the full relay store conformance test suite.
///
/// Call this from your backend's test module with a store instance. The
/// tests tolerate relays left behind by earlier tests in the same run.
///
/// # Errors
///
/// Returns an error if any store operation fails unexpectedly.
pub async fn run_store_conformance_tests(store: &dyn RelayStore) -> Result<(), StoreError> {
    test_get_missing(store).await?;
    test_insert_and_get(store).await?;
    test_insert_duplicate_conflicts(store).await?;
    test_primary_exclusive_on_insert(store).await?;
    test_primary_exclusive_on_update(store).await?;
    test_update_partial(store).await?;
    test_update_missing(store).await?;
    test_list_order_and_active_filter(store).await?;
    test_record_send_within_hour(store).await?;
    test_record_send_after_hour(store).await?;
    test_record_send_across_day(store).await?;
    test_record_send_missing(store).await?;
    test_reset_counters(store).await?;
    test_upsert_matches_account(store).await?;
    test_upsert_prefers_oldest_duplicate(store).await?;
    test_delete(store).await?;
    Ok(())
}

async fn primaries(store: &dyn RelayStore) -> Result<Vec<Uuid>, StoreError> {
    Ok(store
        .list()
        .await?
        .into_iter()
        .filter(|r| r.is_primary)
        .map(|r| r.id)
        .collect())
}

async fn test_get_missing(store: &dyn RelayStore) -> Result<(), StoreError> {
    let found = store.get(Uuid::new_v4()).await?;
    assert!(found.is_none(), "get on missing relay should return None");
    Ok(())
}

async fn test_insert_and_get(store: &dyn RelayStore) -> Result<(), StoreError> {
    let input = SmtpConfigInput::new("sendgrid", "Insert Get", "insert-get.test")
        .with_port(465)
        .with_credentials("apikey", "pw")
        .with_sender("team@insert-get.test", Some("Team".into()))
        .with_priority(7)
        .with_limits(Some(20), Some(500));
    let relay = SmtpConfig::from_input(input, base_time());
    store.insert(&relay).await?;

    let stored = store.get(relay.id).await?.expect("inserted relay should exist");
    assert_eq!(stored.provider, "sendgrid");
    assert_eq!(stored.host, "insert-get.test");
    assert_eq!(stored.port, 465);
    assert_eq!(stored.username.as_deref(), Some("apikey"));
    assert_eq!(stored.password.as_deref(), Some("pw"));
    assert_eq!(stored.from_name.as_deref(), Some("Team"));
    assert_eq!(stored.priority, 7);
    assert_eq!(stored.hourly_limit, Some(20));
    assert_eq!(stored.daily_limit, Some(500));
    assert_eq!(stored.emails_sent_this_hour, 0);
    assert_eq!(stored.last_reset_at, base_time());
    assert_eq!(stored.daily_reset_on, base_time().date_naive());
    Ok(())
}

async fn test_insert_duplicate_conflicts(store: &dyn RelayStore) -> Result<(), StoreError> {
    let relay = relay("Duplicate", "duplicate.test");
    store.insert(&relay).await?;
    let result = store.insert(&relay).await;
    assert!(
        matches!(result, Err(StoreError::Conflict(_))),
        "inserting an existing id should conflict"
    );
    Ok(())
}

async fn test_primary_exclusive_on_insert(store: &dyn RelayStore) -> Result<(), StoreError> {
    let mut a = relay("Primary A", "primary-a.test");
    a.is_primary = true;
    store.insert(&a).await?;
    assert_eq!(primaries(store).await?, vec![a.id]);

    let mut c = relay("Primary C", "primary-c.test");
    c.is_primary = true;
    store.insert(&c).await?;
    assert_eq!(
        primaries(store).await?,
        vec![c.id],
        "only the newest primary should keep the flag"
    );

    let a = store.get(a.id).await?.expect("relay A should exist");
    assert!(!a.is_primary);
    Ok(())
}

async fn test_primary_exclusive_on_update(store: &dyn RelayStore) -> Result<(), StoreError> {
    let b = relay("Primary B", "primary-b.test");
    store.insert(&b).await?;

    let patch = SmtpConfigPatch {
        is_primary: Some(true),
        ..SmtpConfigPatch::default()
    };
    let updated = store.update(b.id, &patch, base_time()).await?;
    assert!(updated.is_primary);
    assert_eq!(primaries(store).await?, vec![b.id]);

    let primary = store.primary().await?.expect("a primary should exist");
    assert_eq!(primary.id, b.id);

    let patch = SmtpConfigPatch {
        is_primary: Some(false),
        ..SmtpConfigPatch::default()
    };
    store.update(b.id, &patch, base_time()).await?;
    assert!(primaries(store).await?.is_empty(), "no primary after unset");
    Ok(())
}

async fn test_update_partial(store: &dyn RelayStore) -> Result<(), StoreError> {
    let input = SmtpConfigInput::new("custom", "Partial", "partial.test")
        .with_credentials("user", "pw")
        .with_limits(Some(10), Some(100));
    let relay = SmtpConfig::from_input(input, base_time());
    store.insert(&relay).await?;

    let later = base_time() + Duration::minutes(3);
    let patch = SmtpConfigPatch {
        hourly_limit: Some(None),
        priority: Some(42),
        is_active: Some(false),
        ..SmtpConfigPatch::default()
    };
    let updated = store.update(relay.id, &patch, later).await?;
    assert_eq!(updated.hourly_limit, None);
    assert_eq!(updated.daily_limit, Some(100));
    assert_eq!(updated.priority, 42);
    assert!(!updated.is_active);
    assert_eq!(updated.username.as_deref(), Some("user"));
    assert_eq!(updated.updated_at, later);

    let stored = store.get(relay.id).await?.expect("relay should exist");
    assert_eq!(stored.priority, 42);
    Ok(())
}

async fn test_update_missing(store: &dyn RelayStore) -> Result<(), StoreError> {
    let missing = Uuid::new_v4();
    let result = store
        .update(missing, &SmtpConfigPatch::default(), base_time())
        .await;
    assert!(
        matches!(result, Err(StoreError::NotFound(id)) if id == missing),
        "update on missing relay should fail with NotFound"
    );
    Ok(())
}

async fn test_list_order_and_active_filter(store: &dyn RelayStore) -> Result<(), StoreError> {
    let mut low = relay("Order Low", "order-low.test");
    low.priority = 50;
    let mut high = relay("Order High", "order-high.test");
    high.priority = 100;
    let mut tie = relay("Order Tie", "order-tie.test");
    tie.priority = 50;
    tie.created_at = base_time() + Duration::seconds(1);
    let mut off = relay("Order Off", "order-off.test");
    off.priority = 1_000;
    off.is_active = false;

    for r in [&tie, &low, &off, &high] {
        store.insert(r).await?;
    }

    let ours = [low.id, high.id, tie.id, off.id];
    let active: Vec<Uuid> = store
        .list_active()
        .await?
        .into_iter()
        .map(|r| r.id)
        .filter(|id| ours.contains(id))
        .collect();
    assert_eq!(
        active,
        vec![high.id, low.id, tie.id],
        "active relays ordered by priority then age, inactive excluded"
    );

    let all: Vec<Uuid> = store
        .list()
        .await?
        .into_iter()
        .map(|r| r.id)
        .filter(|id| ours.contains(id))
        .collect();
    assert_eq!(all, vec![off.id, high.id, low.id, tie.id]);
    Ok(())
}

async fn test_record_send_within_hour(store: &dyn RelayStore) -> Result<(), StoreError> {
    let mut r = relay("Within Hour", "within-hour.test");
    r.hourly_limit = Some(20);
    r.emails_sent_this_hour = 19;
    r.emails_sent_today = 40;
    store.insert(&r).await?;

    let now = base_time() + Duration::minutes(10);
    let updated = store.record_send(r.id, now).await?;
    assert_eq!(updated.emails_sent_this_hour, 20);
    assert_eq!(updated.emails_sent_today, 41);
    assert_eq!(updated.last_reset_at, base_time(), "window start unchanged");
    assert!(!updated.is_available_at(&now));
    Ok(())
}

async fn test_record_send_after_hour(store: &dyn RelayStore) -> Result<(), StoreError> {
    let mut r = relay("After Hour", "after-hour.test");
    r.hourly_limit = Some(20);
    r.emails_sent_this_hour = 20;
    r.emails_sent_today = 20;
    store.insert(&r).await?;

    let now = base_time() + Duration::minutes(90);
    let updated = store.record_send(r.id, now).await?;
    assert_eq!(updated.emails_sent_this_hour, 1);
    assert_eq!(updated.last_reset_at, now);
    assert_eq!(updated.emails_sent_today, 21);
    assert!(updated.is_available_at(&now));
    Ok(())
}

async fn test_record_send_across_day(store: &dyn RelayStore) -> Result<(), StoreError> {
    let late = Utc
        .with_ymd_and_hms(2026, 3, 14, 23, 50, 0)
        .single()
        .unwrap_or_else(Utc::now);
    let mut r = SmtpConfig::from_input(
        SmtpConfigInput::new("custom", "Across Day", "across-day.test"),
        late,
    );
    r.emails_sent_this_hour = 3;
    r.emails_sent_today = 300;
    store.insert(&r).await?;

    let now = late + Duration::minutes(15);
    let updated = store.record_send(r.id, now).await?;
    assert_eq!(updated.emails_sent_today, 1, "daily counter restarts");
    assert_eq!(updated.daily_reset_on, now.date_naive());
    assert_eq!(updated.emails_sent_this_hour, 4, "hourly window still open");

    let updated = store.record_send(r.id, now + Duration::minutes(5)).await?;
    assert_eq!(updated.emails_sent_today, 2, "day resets only once");
    Ok(())
}

async fn test_record_send_missing(store: &dyn RelayStore) -> Result<(), StoreError> {
    let missing = Uuid::new_v4();
    let result = store.record_send(missing, base_time()).await;
    assert!(
        matches!(result, Err(StoreError::NotFound(id)) if id == missing),
        "record_send on missing relay should fail with NotFound"
    );
    Ok(())
}

async fn test_reset_counters(store: &dyn RelayStore) -> Result<(), StoreError> {
    let r = relay("Reset", "reset.test");
    store.insert(&r).await?;
    store.record_send(r.id, base_time()).await?;
    store.record_send(r.id, base_time()).await?;

    let later = base_time() + Duration::minutes(30);
    let reset = store.reset_counters(r.id, later).await?;
    assert_eq!(reset.emails_sent_this_hour, 0);
    assert_eq!(reset.emails_sent_today, 0);
    assert_eq!(reset.last_reset_at, later);

    let result = store.reset_counters(Uuid::new_v4(), later).await;
    assert!(matches!(result, Err(StoreError::NotFound(_))));
    Ok(())
}

async fn test_upsert_matches_account(store: &dyn RelayStore) -> Result<(), StoreError> {
    let input = SmtpConfigInput::new("custom", "Upsert", "upsert.test")
        .with_credentials("mailer", "pw");
    let first = store.upsert(&input, base_time()).await?;
    store.record_send(first.id, base_time()).await?;

    let renamed = SmtpConfigInput::new("custom", "Upsert Renamed", "UPSERT.test")
        .with_credentials("mailer", "pw2")
        .with_priority(3);
    let second = store.upsert(&renamed, base_time()).await?;
    assert_eq!(second.id, first.id, "same account should update in place");
    assert_eq!(second.provider_name, "Upsert Renamed");
    assert_eq!(second.priority, 3);
    assert_eq!(second.emails_sent_this_hour, 1, "counters preserved");

    let other_user = SmtpConfigInput::new("custom", "Upsert Other", "upsert.test")
        .with_credentials("someone-else", "pw");
    let third = store.upsert(&other_user, base_time()).await?;
    assert_ne!(third.id, first.id, "different username is a different relay");

    let primary = SmtpConfigInput::new("custom", "Upsert Primary", "upsert.test")
        .with_credentials("mailer", "pw")
        .primary();
    let promoted = store.upsert(&primary, base_time()).await?;
    assert_eq!(promoted.id, first.id);
    assert_eq!(primaries(store).await?, vec![first.id]);
    Ok(())
}

async fn test_upsert_prefers_oldest_duplicate(store: &dyn RelayStore) -> Result<(), StoreError> {
    let account = || {
        SmtpConfigInput::new("custom", "Shared", "shared-account.test")
            .with_credentials("shared", "pw")
    };
    let mut newer = SmtpConfig::from_input(account(), base_time() + Duration::minutes(5));
    newer.provider_name = "Shared Newer".into();
    let mut older = SmtpConfig::from_input(account(), base_time());
    older.provider_name = "Shared Older".into();
    store.insert(&newer).await?;
    store.insert(&older).await?;

    let updated = store
        .upsert(&account().with_priority(9), base_time() + Duration::minutes(10))
        .await?;
    assert_eq!(updated.id, older.id, "upsert should update the oldest duplicate");
    assert_eq!(updated.priority, 9);

    let newer = store.get(newer.id).await?.expect("newer duplicate should exist");
    assert_eq!(newer.priority, 0, "newer duplicate is left alone");
    Ok(())
}

async fn test_delete(store: &dyn RelayStore) -> Result<(), StoreError> {
    let r = relay("Delete", "delete.test");
    store.insert(&r).await?;
    assert!(store.delete(r.id).await?, "delete should report existing relay");
    assert!(store.get(r.id).await?.is_none(), "get after delete is None");
    assert!(!store.delete(r.id).await?, "second delete reports missing");
    Ok(())
}
