use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};

use crate::error::ValidationError;
use crate::relay::SmtpConfig;

/// Payload for creating or upserting a relay.
///
/// # Examples
///
/// ```
/// use mailrotor_core::SmtpConfigInput;
///
/// let input = SmtpConfigInput::new("sendgrid", "SendGrid EU", "smtp.sendgrid.net")
///     .with_credentials("apikey", "secret")
///     .with_limits(Some(20), Some(500))
///     .primary();
/// assert_eq!(input.port, 587);
/// assert!(input.is_primary);
/// assert!(input.validate().is_ok());
/// ```
#[derive(Clone, Deserialize)]
pub struct SmtpConfigInput {
    pub provider: String,

    pub provider_name: String,

    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_true")]
    pub secure: bool,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default)]
    pub from_email: Option<String>,

    #[serde(default)]
    pub from_name: Option<String>,

    #[serde(default = "default_true")]
    pub is_active: bool,

    #[serde(default)]
    pub is_primary: bool,

    #[serde(default)]
    pub priority: i32,

    #[serde(default)]
    pub daily_limit: Option<u32>,

    #[serde(default)]
    pub hourly_limit: Option<u32>,
}

fn default_port() -> u16 {
    587
}

fn default_true() -> bool {
    true
}

impl std::fmt::Debug for SmtpConfigInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpConfigInput")
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
            .finish()
    }
}

impl SmtpConfigInput {
    /// Create an active, non-primary, unlimited relay payload on port 587.
    pub fn new(
        provider: impl Into<String>,
        provider_name: impl Into<String>,
        host: impl Into<String>,
    ) -> Self {
        Self {
            provider: provider.into(),
            provider_name: provider_name.into(),
            host: host.into(),
            port: default_port(),
            secure: true,
            username: None,
            password: None,
            from_email: None,
            from_name: None,
            is_active: true,
            is_primary: false,
            priority: 0,
            daily_limit: None,
            hourly_limit: None,
        }
    }

    /// Set SMTP authentication credentials.
    #[must_use]
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set the hourly and daily caps.
    #[must_use]
    pub fn with_limits(mut self, hourly: Option<u32>, daily: Option<u32>) -> Self {
        self.hourly_limit = hourly;
        self.daily_limit = daily;
        self
    }

    /// Set the sender identity.
    #[must_use]
    pub fn with_sender(mut self, email: impl Into<String>, name: Option<String>) -> Self {
        self.from_email = Some(email.into());
        self.from_name = name;
        self
    }

    /// Mark the relay as the primary one.
    #[must_use]
    pub fn primary(mut self) -> Self {
        self.is_primary = true;
        self
    }

    /// Mark the relay as inactive.
    #[must_use]
    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    /// Check field constraints.
    pub fn validate(&self) -> Result<(), ValidationError> {
        require_non_empty("provider", &self.provider)?;
        require_non_empty("host", &self.host)?;
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        require_positive("hourly_limit", self.hourly_limit)?;
        require_positive("daily_limit", self.daily_limit)?;
        Ok(())
    }

    /// Replace the editable fields of `relay` with this payload, keeping its
    /// id, counters and creation time.
    pub fn apply_to(&self, relay: &mut SmtpConfig, now: DateTime<Utc>) {
        relay.provider.clone_from(&self.provider);
        relay.provider_name.clone_from(&self.provider_name);
        relay.host.clone_from(&self.host);
        relay.port = self.port;
        relay.secure = self.secure;
        relay.username.clone_from(&self.username);
        relay.password.clone_from(&self.password);
        relay.from_email.clone_from(&self.from_email);
        relay.from_name.clone_from(&self.from_name);
        relay.is_active = self.is_active;
        relay.is_primary = self.is_primary;
        relay.priority = self.priority;
        relay.daily_limit = self.daily_limit;
        relay.hourly_limit = self.hourly_limit;
        relay.updated_at = now;
    }
}

/// Partial update of a relay. Absent fields are left unchanged; nullable
/// fields given as `null` are cleared.
#[derive(Clone, Default, Deserialize)]
pub struct SmtpConfigPatch {
    #[serde(default)]
    pub provider: Option<String>,

    #[serde(default)]
    pub provider_name: Option<String>,

    #[serde(default)]
    pub host: Option<String>,

    #[serde(default)]
    pub port: Option<u16>,

    #[serde(default)]
    pub secure: Option<bool>,

    #[serde(default, deserialize_with = "double_option")]
    pub username: Option<Option<String>>,

    #[serde(default, deserialize_with = "double_option")]
    pub password: Option<Option<String>>,

    #[serde(default, deserialize_with = "double_option")]
    pub from_email: Option<Option<String>>,

    #[serde(default, deserialize_with = "double_option")]
    pub from_name: Option<Option<String>>,

    #[serde(default)]
    pub is_active: Option<bool>,

    #[serde(default)]
    pub is_primary: Option<bool>,

    #[serde(default)]
    pub priority: Option<i32>,

    #[serde(default, deserialize_with = "double_option")]
    pub daily_limit: Option<Option<u32>>,

    #[serde(default, deserialize_with = "double_option")]
    pub hourly_limit: Option<Option<u32>>,
}

/// Maps a present field (including `null`) to `Some`, so that `Option<Option<T>>`
/// tells "absent" apart from "cleared".
fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl std::fmt::Debug for SmtpConfigPatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpConfigPatch")
            .field("provider", &self.provider)
            .field("provider_name", &self.provider_name)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("secure", &self.secure)
            .field("username", &self.username)
            .field(
                "password",
                &self
                    .password
                    .as_ref()
                    .map(|p| p.as_ref().map(|_| "[REDACTED]")),
            )
            .field("from_email", &self.from_email)
            .field("from_name", &self.from_name)
            .field("is_active", &self.is_active)
            .field("is_primary", &self.is_primary)
            .field("priority", &self.priority)
            .field("daily_limit", &self.daily_limit)
            .field("hourly_limit", &self.hourly_limit)
            .finish()
    }
}

impl SmtpConfigPatch {
    /// Returns `true` if applying this patch makes the relay primary.
    #[must_use]
    pub fn sets_primary(&self) -> bool {
        self.is_primary == Some(true)
    }

    /// Check constraints of the fields that are present.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(provider) = &self.provider {
            require_non_empty("provider", provider)?;
        }
        if let Some(host) = &self.host {
            require_non_empty("host", host)?;
        }
        if self.port == Some(0) {
            return Err(ValidationError::InvalidPort);
        }
        if let Some(limit) = self.hourly_limit {
            require_positive("hourly_limit", limit)?;
        }
        if let Some(limit) = self.daily_limit {
            require_positive("daily_limit", limit)?;
        }
        Ok(())
    }

    /// Apply the present fields to `relay`.
    pub fn apply(&self, relay: &mut SmtpConfig, now: DateTime<Utc>) {
        if let Some(v) = &self.provider {
            relay.provider.clone_from(v);
        }
        if let Some(v) = &self.provider_name {
            relay.provider_name.clone_from(v);
        }
        if let Some(v) = &self.host {
            relay.host.clone_from(v);
        }
        if let Some(v) = self.port {
            relay.port = v;
        }
        if let Some(v) = self.secure {
            relay.secure = v;
        }
        if let Some(v) = &self.username {
            relay.username.clone_from(v);
        }
        if let Some(v) = &self.password {
            relay.password.clone_from(v);
        }
        if let Some(v) = &self.from_email {
            relay.from_email.clone_from(v);
        }
        if let Some(v) = &self.from_name {
            relay.from_name.clone_from(v);
        }
        if let Some(v) = self.is_active {
            relay.is_active = v;
        }
        if let Some(v) = self.is_primary {
            relay.is_primary = v;
        }
        if let Some(v) = self.priority {
            relay.priority = v;
        }
        if let Some(v) = self.daily_limit {
            relay.daily_limit = v;
        }
        if let Some(v) = self.hourly_limit {
            relay.hourly_limit = v;
        }
        relay.updated_at = now;
    }
}

fn require_non_empty(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::Empty { field });
    }
    Ok(())
}

fn require_positive(field: &'static str, limit: Option<u32>) -> Result<(), ValidationError> {
    if limit == Some(0) {
        return Err(ValidationError::ZeroLimit { field });
    }
    Ok(())
}
