use clap::Subcommand;
use mailrotor_core::{RelayUsage, SmtpConfig, SmtpConfigInput, SmtpConfigPatch, WindowUsage};
use mailrotor_rotation::SmtpRotation;
use uuid::Uuid;

use crate::OutputFormat;

#[derive(Subcommand, Debug)]
pub enum RelaysCommand {
    /// List relays in selection order.
    List,
    /// Get a relay by ID.
    Get {
        /// Relay ID.
        id: Uuid,
    },
    /// Create a relay.
    Create {
        /// JSON data (string or @file path).
        #[arg(long)]
        data: String,
    },
    /// Create a relay, or update the one using the same host, port and username.
    Upsert {
        /// JSON data (string or @file path).
        #[arg(long)]
        data: String,
    },
    /// Update a relay. Absent fields are kept; `null` clears optional fields.
    Update {
        /// Relay ID.
        id: Uuid,
        /// JSON data (string or @file path).
        #[arg(long)]
        data: String,
    },
    /// Delete a relay.
    Delete {
        /// Relay ID.
        id: Uuid,
    },
    /// Show the relay that would carry the next email.
    Next,
    /// Check whether a relay can take an email now.
    Available {
        /// Relay ID.
        id: Uuid,
    },
    /// Count one email sent through a relay.
    RecordSend {
        /// Relay ID.
        id: Uuid,
    },
    /// Zero a relay's hourly and daily counters.
    Reset {
        /// Relay ID.
        id: Uuid,
    },
    /// Show quota usage for one relay, or all relays.
    Usage {
        /// Relay ID.
        id: Option<Uuid>,
    },
}

fn parse_json_data(input: &str) -> anyhow::Result<serde_json::Value> {
    if let Some(path) = input.strip_prefix('@') {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    } else {
        Ok(serde_json::from_str(input)?)
    }
}

pub async fn run(
    rotation: &SmtpRotation,
    command: &RelaysCommand,
    format: &OutputFormat,
) -> anyhow::Result<()> {
    match command {
        RelaysCommand::List => run_list(rotation, format).await,
        RelaysCommand::Get { id } => {
            let relay = rotation.get_smtp_config(*id).await?;
            print_relay(&relay, format)
        }
        RelaysCommand::Create { data } => {
            let input: SmtpConfigInput = serde_json::from_value(parse_json_data(data)?)?;
            let relay = rotation.create_smtp_config(input).await?;
            print_written("Created", &relay, format)
        }
        RelaysCommand::Upsert { data } => {
            let input: SmtpConfigInput = serde_json::from_value(parse_json_data(data)?)?;
            let relay = rotation.upsert_smtp_config(input).await?;
            print_written("Upserted", &relay, format)
        }
        RelaysCommand::Update { id, data } => {
            let patch: SmtpConfigPatch = serde_json::from_value(parse_json_data(data)?)?;
            let relay = rotation.update_smtp_config(*id, patch).await?;
            print_written("Updated", &relay, format)
        }
        RelaysCommand::Delete { id } => {
            rotation.delete_smtp_config(*id).await?;
            println!("Relay '{id}' deleted.");
            Ok(())
        }
        RelaysCommand::Next => {
            let relay = rotation.require_next_available_smtp_config().await?;
            print_relay(&relay, format)
        }
        RelaysCommand::Available { id } => {
            let available = rotation.is_smtp_config_available(*id).await?;
            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::json!({ "id": id, "available": available }));
                }
                OutputFormat::Text => {
                    let verdict = if available { "available" } else { "unavailable" };
                    println!("Relay '{id}' is {verdict}.");
                }
            }
            Ok(())
        }
        RelaysCommand::RecordSend { id } => {
            rotation.increment_emails_sent(*id).await?;
            let usage = rotation.usage(*id).await?;
            print_usage(&usage, format)
        }
        RelaysCommand::Reset { id } => {
            rotation.reset_counters(*id).await?;
            println!("Counters of relay '{id}' reset.");
            Ok(())
        }
        RelaysCommand::Usage { id: Some(id) } => {
            let usage = rotation.usage(*id).await?;
            print_usage(&usage, format)
        }
        RelaysCommand::Usage { id: None } => run_usage_report(rotation, format).await,
    }
}

async fn run_list(rotation: &SmtpRotation, format: &OutputFormat) -> anyhow::Result<()> {
    let relays = rotation.list_smtp_configs().await?;
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&relays)?);
        }
        OutputFormat::Text => {
            println!("{} relays:", relays.len());
            for r in &relays {
                let enabled = if r.is_active { "ON " } else { "OFF" };
                let primary = if r.is_primary { " *" } else { "" };
                println!(
                    "  [{enabled}] {id} | {name}{primary} | {host}:{port} | prio {prio} | \
                     hour {hour}/{hour_limit} | day {day}/{day_limit}",
                    id = r.id,
                    name = r.provider_name,
                    host = r.host,
                    port = r.port,
                    prio = r.priority,
                    hour = r.emails_sent_this_hour,
                    hour_limit = limit_label(r.hourly_limit),
                    day = r.emails_sent_today,
                    day_limit = limit_label(r.daily_limit),
                );
            }
        }
    }
    Ok(())
}

async fn run_usage_report(rotation: &SmtpRotation, format: &OutputFormat) -> anyhow::Result<()> {
    let report = rotation.usage_report().await?;
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Text => {
            println!("{} relays:", report.len());
            for u in &report {
                let state = if u.available { "OK  " } else { "FULL" };
                println!(
                    "  [{state}] {id} | {name} | hour {hour} | day {day}",
                    id = u.id,
                    name = u.provider_name,
                    hour = window_label(&u.hourly),
                    day = window_label(&u.daily),
                );
            }
        }
    }
    Ok(())
}

fn print_relay(relay: &SmtpConfig, format: &OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(relay)?);
        }
        OutputFormat::Text => {
            println!("ID:        {}", relay.id);
            println!("Provider:  {} ({})", relay.provider_name, relay.provider);
            println!("Host:      {}:{}", relay.host, relay.port);
            println!("Secure:    {}", relay.secure);
            if let Some(username) = &relay.username {
                println!("Username:  {username}");
            }
            if let Some(from) = &relay.from_email {
                println!("From:      {from}");
            }
            println!("Active:    {}", relay.is_active);
            println!("Primary:   {}", relay.is_primary);
            println!("Priority:  {}", relay.priority);
            println!(
                "Hourly:    {}/{}",
                relay.emails_sent_this_hour,
                limit_label(relay.hourly_limit)
            );
            println!(
                "Daily:     {}/{}",
                relay.emails_sent_today,
                limit_label(relay.daily_limit)
            );
        }
    }
    Ok(())
}

fn print_written(verb: &str, relay: &SmtpConfig, format: &OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(relay)?);
        }
        OutputFormat::Text => {
            println!("{verb} relay: {}", relay.id);
        }
    }
    Ok(())
}

fn print_usage(usage: &RelayUsage, format: &OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(usage)?);
        }
        OutputFormat::Text => {
            println!("Relay Usage: {} ({})", usage.provider_name, usage.id);
            println!("  Available: {}", usage.available);
            println!("  Hourly:    {}", window_label(&usage.hourly));
            println!("  Daily:     {}", window_label(&usage.daily));
        }
    }
    Ok(())
}

fn limit_label(limit: Option<u32>) -> String {
    limit.map_or_else(|| "unlimited".to_owned(), |l| l.to_string())
}

fn window_label(window: &WindowUsage) -> String {
    let mut label = format!("{}/{}", window.used, limit_label(window.limit));
    if let Some(resets_at) = window.resets_at {
        label.push_str(&format!(" (resets {})", resets_at.format("%Y-%m-%d %H:%M UTC")));
    }
    label
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use mailrotor_store_memory::MemoryRelayStore;

    use super::*;

    fn rotation() -> SmtpRotation {
        SmtpRotation::new(Arc::new(MemoryRelayStore::new()))
    }

    #[test]
    fn parse_inline_json() {
        let value = parse_json_data(r#"{"host": "smtp.test"}"#).unwrap();
        assert_eq!(value["host"], "smtp.test");
    }

    #[test]
    fn parse_json_from_file() {
        let path = std::env::temp_dir().join(format!("mailrotor-{}.json", Uuid::new_v4()));
        std::fs::write(&path, r#"{"priority": 3}"#).unwrap();

        let value = parse_json_data(&format!("@{}", path.display())).unwrap();
        assert_eq!(value["priority"], 3);

        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn parse_rejects_invalid_json() {
        assert!(parse_json_data("{not json").is_err());
        assert!(parse_json_data("@/nonexistent/relay.json").is_err());
    }

    #[test]
    fn labels() {
        assert_eq!(limit_label(None), "unlimited");
        assert_eq!(limit_label(Some(20)), "20");
    }

    #[tokio::test]
    async fn create_then_next_and_usage() {
        let rotation = rotation();
        let create = RelaysCommand::Create {
            data: r#"{"provider": "custom", "provider_name": "Main", "host": "smtp.main.test",
                      "is_primary": true, "hourly_limit": 1}"#
                .to_owned(),
        };
        run(&rotation, &create, &OutputFormat::Text).await.unwrap();

        let relay = rotation
            .get_primary_smtp_config()
            .await
            .unwrap()
            .expect("created relay is primary");

        run(&rotation, &RelaysCommand::Next, &OutputFormat::Json)
            .await
            .unwrap();
        run(
            &rotation,
            &RelaysCommand::RecordSend { id: relay.id },
            &OutputFormat::Text,
        )
        .await
        .unwrap();

        let err = run(&rotation, &RelaysCommand::Next, &OutputFormat::Text)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "no smtp relay available");

        run(
            &rotation,
            &RelaysCommand::Usage { id: None },
            &OutputFormat::Text,
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn update_with_null_clears_limit() {
        let rotation = rotation();
        let relay = rotation
            .create_smtp_config(
                SmtpConfigInput::new("custom", "Capped", "smtp.capped.test")
                    .with_limits(Some(5), Some(50)),
            )
            .await
            .unwrap();

        let update = RelaysCommand::Update {
            id: relay.id,
            data: r#"{"hourly_limit": null, "priority": 2}"#.to_owned(),
        };
        run(&rotation, &update, &OutputFormat::Text).await.unwrap();

        let stored = rotation.get_smtp_config(relay.id).await.unwrap();
        assert_eq!(stored.hourly_limit, None);
        assert_eq!(stored.daily_limit, Some(50));
        assert_eq!(stored.priority, 2);
    }

    #[tokio::test]
    async fn delete_unknown_relay_fails() {
        let rotation = rotation();
        let result = run(
            &rotation,
            &RelaysCommand::Delete { id: Uuid::new_v4() },
            &OutputFormat::Text,
        )
        .await;
        assert!(result.is_err());
    }
}
