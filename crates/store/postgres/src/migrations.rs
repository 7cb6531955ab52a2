use sqlx::PgPool;

use crate::config::PostgresConfig;

/// Run database migrations, creating the relays table and its indexes if they
/// do not exist.
///
/// The partial unique index on `is_primary` makes a second primary relay a
/// constraint violation, backing up the transactional write path.
///
/// # Errors
///
/// Returns a [`sqlx::Error`] if any DDL statement fails.
pub async fn run_migrations(pool: &PgPool, config: &PostgresConfig) -> Result<(), sqlx::Error> {
    let table = config.relays_table();
    let one_primary = config.index_name("one_primary");
    let selection = config.index_name("selection");

    let create_table = format!(
        "CREATE TABLE IF NOT EXISTS {table} (
            id UUID PRIMARY KEY,
            provider TEXT NOT NULL,
            provider_name TEXT NOT NULL,
            host TEXT NOT NULL,
            port INTEGER NOT NULL,
            secure BOOLEAN NOT NULL DEFAULT TRUE,
            username TEXT,
            password TEXT,
            from_email TEXT,
            from_name TEXT,
            is_active BOOLEAN NOT NULL DEFAULT TRUE,
            is_primary BOOLEAN NOT NULL DEFAULT FALSE,
            priority INTEGER NOT NULL DEFAULT 0,
            daily_limit INTEGER,
            hourly_limit INTEGER,
            emails_sent_today INTEGER NOT NULL DEFAULT 0,
            emails_sent_this_hour INTEGER NOT NULL DEFAULT 0,
            last_reset_at TIMESTAMPTZ NOT NULL,
            daily_reset_on DATE NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        )"
    );

    let create_one_primary = format!(
        "CREATE UNIQUE INDEX IF NOT EXISTS {one_primary} ON {table} (is_primary) WHERE is_primary"
    );

    let create_selection = format!(
        "CREATE INDEX IF NOT EXISTS {selection} \
         ON {table} (is_active, is_primary DESC, priority DESC, created_at)"
    );

    sqlx::query(&create_table).execute(pool).await?;
    sqlx::query(&create_one_primary).execute(pool).await?;
    sqlx::query(&create_selection).execute(pool).await?;

    Ok(())
}
