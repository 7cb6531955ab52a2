mod config;
mod migrations;
mod row;
mod store;

pub use config::PostgresConfig;
pub use migrations::run_migrations;
pub use store::PostgresRelayStore;
