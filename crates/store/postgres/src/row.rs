use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use mailrotor_core::SmtpConfig;
use mailrotor_store::error::StoreError;

/// Column list shared by every `SELECT` and `RETURNING` clause.
pub(crate) const COLUMNS: &str = "id, provider, provider_name, host, port, secure, \
     username, password, from_email, from_name, is_active, is_primary, priority, \
     daily_limit, hourly_limit, emails_sent_today, emails_sent_this_hour, \
     last_reset_at, daily_reset_on, created_at, updated_at";

/// A relay as stored in `PostgreSQL` (integer columns are `INTEGER`).
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct RelayRow {
    id: Uuid,
    provider: String,
    provider_name: String,
    host: String,
    port: i32,
    secure: bool,
    username: Option<String>,
    password: Option<String>,
    from_email: Option<String>,
    from_name: Option<String>,
    is_active: bool,
    is_primary: bool,
    priority: i32,
    daily_limit: Option<i32>,
    hourly_limit: Option<i32>,
    emails_sent_today: i32,
    emails_sent_this_hour: i32,
    last_reset_at: DateTime<Utc>,
    daily_reset_on: NaiveDate,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn unsigned<T: TryFrom<i32>>(field: &str, value: i32) -> Result<T, StoreError> {
    T::try_from(value)
        .map_err(|_| StoreError::Serialization(format!("{field} out of range: {value}")))
}

/// Convert an unsigned counter or limit to its `INTEGER` column value.
pub(crate) fn signed(field: &str, value: u32) -> Result<i32, StoreError> {
    i32::try_from(value)
        .map_err(|_| StoreError::Serialization(format!("{field} out of range: {value}")))
}

/// Convert an optional limit to its nullable `INTEGER` column value.
pub(crate) fn signed_opt(field: &str, value: Option<u32>) -> Result<Option<i32>, StoreError> {
    value.map(|v| signed(field, v)).transpose()
}

impl TryFrom<RelayRow> for SmtpConfig {
    type Error = StoreError;

    fn try_from(row: RelayRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            provider: row.provider,
            provider_name: row.provider_name,
            host: row.host,
            port: unsigned("port", row.port)?,
            secure: row.secure,
            username: row.username,
            password: row.password,
            from_email: row.from_email,
            from_name: row.from_name,
            is_active: row.is_active,
            is_primary: row.is_primary,
            priority: row.priority,
            daily_limit: row
                .daily_limit
                .map(|v| unsigned("daily_limit", v))
                .transpose()?,
            hourly_limit: row
                .hourly_limit
                .map(|v| unsigned("hourly_limit", v))
                .transpose()?,
            emails_sent_today: unsigned("emails_sent_today", row.emails_sent_today)?,
            emails_sent_this_hour: unsigned("emails_sent_this_hour", row.emails_sent_this_hour)?,
            last_reset_at: row.last_reset_at,
            daily_reset_on: row.daily_reset_on,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
