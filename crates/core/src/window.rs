use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// Length of the hourly send window.
#[must_use]
pub fn hourly_window() -> Duration {
    Duration::hours(1)
}

/// Start of the UTC day following `now`.
fn next_utc_midnight(now: &DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive().and_time(NaiveTime::MIN).and_utc() + Duration::days(1)
}

/// Send counters of a single relay together with the windows they count in.
///
/// The hourly window opens at `last_reset_at` and lasts one hour. The daily
/// window is the UTC calendar day `daily_reset_on`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendCounters {
    pub emails_sent_this_hour: u32,
    pub emails_sent_today: u32,
    pub last_reset_at: DateTime<Utc>,
    pub daily_reset_on: NaiveDate,
}

impl SendCounters {
    /// Zeroed counters whose windows both open at `now`.
    #[must_use]
    pub fn fresh(now: DateTime<Utc>) -> Self {
        Self {
            emails_sent_this_hour: 0,
            emails_sent_today: 0,
            last_reset_at: now,
            daily_reset_on: now.date_naive(),
        }
    }

    /// Returns `true` once at least an hour has passed since `last_reset_at`.
    #[must_use]
    pub fn hour_rolled_over(&self, now: &DateTime<Utc>) -> bool {
        now.signed_duration_since(self.last_reset_at) >= hourly_window()
    }

    /// Returns `true` when `now` falls on a different UTC date than the daily window.
    #[must_use]
    pub fn day_rolled_over(&self, now: &DateTime<Utc>) -> bool {
        now.date_naive() != self.daily_reset_on
    }

    /// Counters after one more email sent at `now`.
    ///
    /// A rolled-over window restarts at 1 for the email being counted; the
    /// hourly and daily windows are evaluated independently.
    #[must_use]
    pub fn record_send(self, now: DateTime<Utc>) -> Self {
        let (emails_sent_this_hour, last_reset_at) = if self.hour_rolled_over(&now) {
            (1, now)
        } else {
            (self.emails_sent_this_hour.saturating_add(1), self.last_reset_at)
        };

        let (emails_sent_today, daily_reset_on) = if self.day_rolled_over(&now) {
            (1, now.date_naive())
        } else {
            (self.emails_sent_today.saturating_add(1), self.daily_reset_on)
        };

        Self {
            emails_sent_this_hour,
            emails_sent_today,
            last_reset_at,
            daily_reset_on,
        }
    }

    /// Hourly count as seen at `now`; an elapsed window counts as zero.
    #[must_use]
    pub fn hourly_count_at(&self, now: &DateTime<Utc>) -> u32 {
        if self.hour_rolled_over(now) {
            0
        } else {
            self.emails_sent_this_hour
        }
    }

    /// Daily count as seen at `now`; a previous day counts as zero.
    #[must_use]
    pub fn daily_count_at(&self, now: &DateTime<Utc>) -> u32 {
        if self.day_rolled_over(now) {
            0
        } else {
            self.emails_sent_today
        }
    }

    /// Returns `true` if neither window has reached its limit at `now`.
    ///
    /// A `None` limit never blocks.
    #[must_use]
    pub fn within_limits(
        &self,
        hourly_limit: Option<u32>,
        daily_limit: Option<u32>,
        now: &DateTime<Utc>,
    ) -> bool {
        let hourly_ok = hourly_limit.is_none_or(|limit| self.hourly_count_at(now) < limit);
        let daily_ok = daily_limit.is_none_or(|limit| self.daily_count_at(now) < limit);
        hourly_ok && daily_ok
    }
}

/// Usage of one quota window at a given instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowUsage {
    /// Emails counted in the current window.
    pub used: u32,
    /// Configured cap, `None` when unlimited.
    pub limit: Option<u32>,
    /// Emails left before the cap, `None` when unlimited.
    pub remaining: Option<u32>,
    /// When the current window closes. `None` when no window is open (the
    /// next send opens one).
    pub resets_at: Option<DateTime<Utc>>,
}

impl WindowUsage {
    fn new(used: u32, limit: Option<u32>, resets_at: Option<DateTime<Utc>>) -> Self {
        Self {
            used,
            limit,
            remaining: limit.map(|l| l.saturating_sub(used)),
            resets_at,
        }
    }

    /// Returns `true` if the window has reached its cap.
    #[must_use]
    pub fn exhausted(&self) -> bool {
        self.remaining == Some(0)
    }
}

/// Quota usage snapshot of a relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayUsage {
    pub id: uuid::Uuid,
    pub provider_name: String,
    pub is_active: bool,
    pub is_primary: bool,
    pub available: bool,
    pub hourly: WindowUsage,
    pub daily: WindowUsage,
    pub observed_at: DateTime<Utc>,
}

impl RelayUsage {
    pub(crate) fn hourly_window_usage(
        counters: &SendCounters,
        limit: Option<u32>,
        now: &DateTime<Utc>,
    ) -> WindowUsage {
        let resets_at = if counters.hour_rolled_over(now) {
            None
        } else {
            Some(counters.last_reset_at + hourly_window())
        };
        WindowUsage::new(counters.hourly_count_at(now), limit, resets_at)
    }

    pub(crate) fn daily_window_usage(
        counters: &SendCounters,
        limit: Option<u32>,
        now: &DateTime<Utc>,
    ) -> WindowUsage {
        WindowUsage::new(
            counters.daily_count_at(now),
            limit,
            Some(next_utc_midnight(now)),
        )
    }
}
