use std::cmp::Ordering;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::payload::SmtpConfigInput;
use crate::window::{RelayUsage, SendCounters};

/// A configured outbound SMTP relay together with its send counters.
#[derive(Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    /// Unique identifier (UUID-v4, assigned on creation).
    pub id: Uuid,

    /// Provider kind (e.g. `"sendgrid"`, `"gmail"`, `"custom"`).
    pub provider: String,

    /// Human-readable relay name.
    pub provider_name: String,

    /// SMTP server hostname.
    pub host: String,

    /// SMTP server port.
    pub port: u16,

    /// Whether the connection uses TLS.
    pub secure: bool,

    /// Optional SMTP username for authentication.
    pub username: Option<String>,

    /// Optional SMTP password. Never serialized.
    #[serde(default, skip_serializing)]
    pub password: Option<String>,

    /// Sender address used for mail carried by this relay.
    pub from_email: Option<String>,

    /// Sender display name.
    pub from_name: Option<String>,

    /// Whether the relay takes part in selection.
    pub is_active: bool,

    /// Whether the relay is the preferred one. At most one relay holds it.
    pub is_primary: bool,

    /// Selection priority among non-primary relays; higher goes first.
    pub priority: i32,

    /// Maximum emails per UTC day, `None` for unlimited.
    pub daily_limit: Option<u32>,

    /// Maximum emails per hourly window, `None` for unlimited.
    pub hourly_limit: Option<u32>,

    pub emails_sent_today: u32,

    pub emails_sent_this_hour: u32,

    /// Start of the current hourly window.
    pub last_reset_at: DateTime<Utc>,

    /// UTC date the daily counter belongs to.
    pub daily_reset_on: NaiveDate,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl std::fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("id", &self.id)
            .field("provider", &self.provider)
            .field("provider_name", &self.provider_name)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("secure", &self.secure)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("from_email", &self.from_email)
            .field("from_name", &self.from_name)
            .field("is_active", &self.is_active)
            .field("is_primary", &self.is_primary)
            .field("priority", &self.priority)
            .field("daily_limit", &self.daily_limit)
            .field("hourly_limit", &self.hourly_limit)
            .field("emails_sent_today", &self.emails_sent_today)
            .field("emails_sent_this_hour", &self.emails_sent_this_hour)
            .field("last_reset_at", &self.last_reset_at)
            .field("daily_reset_on", &self.daily_reset_on)
            .finish_non_exhaustive()
    }
}

impl SmtpConfig {
    /// Build a new relay from a create payload, with fresh counters.
    #[must_use]
    pub fn from_input(input: SmtpConfigInput, now: DateTime<Utc>) -> Self {
        let counters = SendCounters::fresh(now);
        Self {
            id: Uuid::new_v4(),
            provider: input.provider,
            provider_name: input.provider_name,
            host: input.host,
            port: input.port,
            secure: input.secure,
            username: input.username,
            password: input.password,
            from_email: input.from_email,
            from_name: input.from_name,
            is_active: input.is_active,
            is_primary: input.is_primary,
            priority: input.priority,
            daily_limit: input.daily_limit,
            hourly_limit: input.hourly_limit,
            emails_sent_today: counters.emails_sent_today,
            emails_sent_this_hour: counters.emails_sent_this_hour,
            last_reset_at: counters.last_reset_at,
            daily_reset_on: counters.daily_reset_on,
            created_at: now,
            updated_at: now,
        }
    }

    /// The relay's counters and window markers.
    #[must_use]
    pub fn counters(&self) -> SendCounters {
        SendCounters {
            emails_sent_this_hour: self.emails_sent_this_hour,
            emails_sent_today: self.emails_sent_today,
            last_reset_at: self.last_reset_at,
            daily_reset_on: self.daily_reset_on,
        }
    }

    /// Overwrite the counters and window markers.
    pub fn set_counters(&mut self, counters: SendCounters) {
        self.emails_sent_this_hour = counters.emails_sent_this_hour;
        self.emails_sent_today = counters.emails_sent_today;
        self.last_reset_at = counters.last_reset_at;
        self.daily_reset_on = counters.daily_reset_on;
    }

    /// Count one email sent through this relay at `now`.
    pub fn record_send(&mut self, now: DateTime<Utc>) {
        self.set_counters(self.counters().record_send(now));
        self.updated_at = now;
    }

    /// Zero both counters and open new windows at `now`.
    pub fn reset_counters(&mut self, now: DateTime<Utc>) {
        self.set_counters(SendCounters::fresh(now));
        self.updated_at = now;
    }

    /// Returns `true` if the relay may carry an email at `now`: it is active
    /// and neither quota window is exhausted.
    #[must_use]
    pub fn is_available_at(&self, now: &DateTime<Utc>) -> bool {
        self.is_active
            && self
                .counters()
                .within_limits(self.hourly_limit, self.daily_limit, now)
    }

    /// Quota usage snapshot at `now`.
    #[must_use]
    pub fn usage_at(&self, now: &DateTime<Utc>) -> RelayUsage {
        let counters = self.counters();
        RelayUsage {
            id: self.id,
            provider_name: self.provider_name.clone(),
            is_active: self.is_active,
            is_primary: self.is_primary,
            available: self.is_available_at(now),
            hourly: RelayUsage::hourly_window_usage(&counters, self.hourly_limit, now),
            daily: RelayUsage::daily_window_usage(&counters, self.daily_limit, now),
            observed_at: *now,
        }
    }

    /// Returns `true` if this relay connects as the same account: same host
    /// (case-insensitive), port and username.
    #[must_use]
    pub fn same_account(&self, host: &str, port: u16, username: Option<&str>) -> bool {
        self.host.eq_ignore_ascii_case(host)
            && self.port == port
            && self.username.as_deref() == username
    }
}

/// Selection order: primary first, then higher priority, then oldest.
#[must_use]
pub fn cmp_selection_order(a: &SmtpConfig, b: &SmtpConfig) -> Ordering {
    b.is_primary
        .cmp(&a.is_primary)
        .then_with(|| b.priority.cmp(&a.priority))
        .then_with(|| a.created_at.cmp(&b.created_at))
}
