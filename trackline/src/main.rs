//! trackline - CLI for the local event queue
//!
//! This tool provides commands for:
//! - Checking delivery configuration and queue status
//! - Recording events from scripts
//! - Inspecting, flushing and clearing pending events
//! - Running a periodic flush loop in the foreground
//!
//! Uses XDG Base Directory specification for file locations:
//! - Database: $XDG_DATA_HOME/trackline/events.db (~/.local/share/trackline/events.db)
//! - Config: $XDG_CONFIG_HOME/trackline/config.toml (~/.config/trackline/config.toml)
//! - Logs: $XDG_STATE_HOME/trackline/ (~/.local/state/trackline/)

mod drain_lock;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use trackline_core::{Config, Database, FlushMode, FlushOutcome, Payload, Properties, Tracker};

#[derive(Parser)]
#[command(name = "trackline")]
#[command(about = "Inspect and drain the trackline event queue")]
#[command(version)]
struct Args {
    /// Write debug logs to the state directory
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show delivery configuration and queue status
    Status,

    /// Record a custom event
    Track {
        /// Event name
        name: String,

        /// Event property as key=value (value parsed as JSON when possible)
        #[arg(short = 'p', long = "property", value_parser = parse_property)]
        properties: Vec<(String, Value)>,
    },

    /// List pending events
    Pending {
        /// Print one JSON object per event
        #[arg(long)]
        json: bool,
    },

    /// Deliver pending events now
    Flush,

    /// Delete all pending events
    Clear {
        /// Confirm deletion
        #[arg(long)]
        yes: bool,
    },

    /// Flush periodically until interrupted
    Watch {
        /// Seconds between passes (default: from config)
        #[arg(long)]
        period: Option<u64>,
    },
}

fn parse_property(raw: &str) -> std::result::Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got {:?}", raw))?;
    if key.is_empty() {
        return Err("property key must not be empty".to_string());
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load().context("failed to load configuration")?;

    let _log_guard = if args.verbose {
        let guard = trackline_core::logging::init(&config.logging)
            .context("failed to initialize logging")?;
        Some(guard)
    } else {
        None
    };

    match args.command {
        Command::Status => cmd_status(&config),
        Command::Track { name, properties } => cmd_track(&config, &name, properties).await,
        Command::Pending { json } => cmd_pending(&config, json),
        Command::Flush => cmd_flush(&config).await,
        Command::Clear { yes } => cmd_clear(&config, yes),
        Command::Watch { period } => cmd_watch(&config, period).await,
    }
}

/// Open the event database, or `None` if nothing has been recorded yet.
fn open_existing_db(config: &Config) -> Result<Option<Database>> {
    let db_path = config.resolved_database_path();
    if !db_path.exists() {
        return Ok(None);
    }
    let db = Database::open(&db_path).context("failed to open database")?;
    db.migrate().context("failed to run database migrations")?;
    Ok(Some(db))
}

fn require_delivery(config: &Config) -> Result<()> {
    config
        .flush
        .validate()
        .context("delivery is not configured (run 'trackline status' for details)")?;
    Ok(())
}

fn cmd_status(config: &Config) -> Result<()> {
    println!("Trackline Configuration");
    println!("=======================");
    println!();

    let flush = &config.flush;
    println!(
        "Base URL:        {}",
        flush.base_url.as_deref().unwrap_or("<not set>")
    );
    println!(
        "Project Token:   {}",
        flush.project_token.as_deref().unwrap_or("<not set>")
    );
    println!(
        "Authorization:   {}",
        if flush.authorization.is_some() {
            "<set>"
        } else {
            "<not set>"
        }
    );
    println!("Flush Mode:      {}", flush.flush_mode);
    println!("Flush Period:    {}s", flush.flush_period_secs);
    println!("Max Tries:       {}", flush.max_tries);
    println!("Timeout:         {}s", flush.timeout_secs);
    println!(
        "Database:        {}",
        config.resolved_database_path().display()
    );

    println!();
    match flush.validate() {
        Ok(()) => println!("Status: Ready to deliver"),
        Err(e) => {
            println!("Status: Not ready ({})", e);
            println!();
            println!("Configure delivery in {}:", Config::config_path().display());
            println!();
            println!("  [flush]");
            println!("  base_url = \"https://api.example.com\"");
            println!("  project_token = \"your-project-token\"");
            println!("  authorization = \"Token your-api-key\"");
        }
    }

    let pending = match open_existing_db(config)? {
        Some(db) => db.count()?,
        None => 0,
    };
    println!("Pending Events:  {}", pending);

    Ok(())
}

/// Config for commands that only enqueue.
///
/// Draining is left to `flush` and `watch`, which hold the drain lock.
fn enqueue_only(config: &Config) -> Config {
    let mut config = config.clone();
    config.flush.flush_mode = FlushMode::Manual;
    config
}

async fn cmd_track(config: &Config, name: &str, properties: Vec<(String, Value)>) -> Result<()> {
    require_delivery(config)?;

    let properties: Properties = properties.into_iter().collect();
    let tracker =
        Tracker::from_config(&enqueue_only(config)).context("failed to start tracker")?;

    let id = tracker.track_event(name, properties);
    tracker.shutdown().await;

    match id {
        Some(id) => {
            println!("Stored event {} ({})", id, name);
            Ok(())
        }
        None => anyhow::bail!("event was not stored (see logs for details)"),
    }
}

fn cmd_pending(config: &Config, json: bool) -> Result<()> {
    let Some(db) = open_existing_db(config)? else {
        if !json {
            println!("No pending events.");
        }
        return Ok(());
    };

    let records = db.all().context("failed to read pending events")?;
    if records.is_empty() && !json {
        println!("No pending events.");
        return Ok(());
    }

    for record in &records {
        if json {
            let payload = match &record.payload {
                Payload::Properties(props) => Value::Object(props.clone()),
                Payload::Malformed(raw) => Value::String(raw.clone()),
            };
            let line = serde_json::json!({
                "id": record.id,
                "event_type": record.event_type,
                "attempt_count": record.attempt_count,
                "created_at": record.created_at.to_rfc3339(),
                "payload": payload,
            });
            println!("{}", line);
        } else {
            let name = record
                .payload
                .properties()
                .and_then(|p| p.get("event_type"))
                .and_then(Value::as_str)
                .unwrap_or("-");
            let malformed = if record.payload.properties().is_none() {
                "  (malformed)"
            } else {
                ""
            };
            println!(
                "{:>6}  {:<16} {:<24} attempts={}  {}{}",
                record.id.0,
                record.event_type.as_str(),
                name,
                record.attempt_count,
                record
                    .created_at
                    .with_timezone(&chrono::Local)
                    .format("%Y-%m-%d %H:%M:%S"),
                malformed
            );
        }
    }

    if !json {
        println!();
        println!("{} pending event(s)", records.len());
    }
    Ok(())
}

fn print_outcome(outcome: &FlushOutcome) {
    if outcome.offline {
        println!("Network unreachable; nothing was sent.");
        return;
    }
    println!("Flush complete:");
    println!("  Delivered:       {}", outcome.delivered);
    println!("  Pending:         {}", outcome.pending);
    println!("  Dropped:         {}", outcome.dropped());
    if outcome.store_errors > 0 {
        println!("  Store errors:    {}", outcome.store_errors);
    }
}

async fn cmd_flush(config: &Config) -> Result<()> {
    require_delivery(config)?;

    let db_path = config.resolved_database_path();
    let _lock = drain_lock::acquire(&db_path)?;

    let mut config = config.clone();
    config.flush.flush_mode = FlushMode::Manual;
    let tracker = Tracker::from_config(&config).context("failed to start tracker")?;

    let outcome = tracker.flush_data().await;
    tracker.shutdown().await;

    match outcome {
        Some(outcome) => print_outcome(&outcome),
        None => println!("A flush was already in progress."),
    }
    Ok(())
}

fn cmd_clear(config: &Config, yes: bool) -> Result<()> {
    let Some(db) = open_existing_db(config)? else {
        println!("No pending events.");
        return Ok(());
    };

    if !yes {
        let count = db.count()?;
        println!(
            "{} pending event(s) would be deleted. Re-run with --yes to confirm.",
            count
        );
        return Ok(());
    }

    let removed = db.clear().context("failed to clear pending events")?;
    tracing::info!(removed, "Cleared pending events");
    println!("Deleted {} pending event(s).", removed);
    Ok(())
}

async fn cmd_watch(config: &Config, period: Option<u64>) -> Result<()> {
    require_delivery(config)?;

    let db_path = config.resolved_database_path();
    let _lock = drain_lock::acquire(&db_path)?;

    let mut config = config.clone();
    config.flush.flush_mode = FlushMode::Periodic;
    if let Some(period) = period {
        config.flush.flush_period_secs = period.max(1);
    }
    let tracker = Tracker::from_config(&config).context("failed to start tracker")?;

    let running = Arc::new(AtomicBool::new(true));
    let handler_flag = Arc::clone(&running);
    ctrlc::set_handler(move || handler_flag.store(false, Ordering::SeqCst))
        .context("failed to install Ctrl-C handler")?;

    println!(
        "Flushing every {}s. Press Ctrl-C to stop.",
        config.flush.flush_period_secs
    );

    let mut outcomes = tracker.subscribe();
    let mut poll = tokio::time::interval(Duration::from_millis(250));

    while running.load(Ordering::SeqCst) {
        tokio::select! {
            changed = outcomes.changed() => {
                if changed.is_err() {
                    break;
                }
                let latest = *outcomes.borrow_and_update();
                if let Some(outcome) = latest {
                    println!();
                    println!("[{}]", chrono::Local::now().format("%H:%M:%S"));
                    print_outcome(&outcome);
                }
            }
            _ = poll.tick() => {}
        }
    }

    println!();
    println!("Stopping...");
    tracker.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_property() {
        assert_eq!(
            parse_property("plan=pro").unwrap(),
            ("plan".to_string(), Value::String("pro".to_string()))
        );
        assert_eq!(
            parse_property("count=3").unwrap(),
            ("count".to_string(), serde_json::json!(3))
        );
        assert_eq!(
            parse_property("query=a=b").unwrap(),
            ("query".to_string(), Value::String("a=b".to_string()))
        );
        assert!(parse_property("novalue").is_err());
        assert!(parse_property("=x").is_err());
    }

    #[test]
    fn test_enqueue_only_never_drains() {
        for mode in [
            FlushMode::Immediate,
            FlushMode::Periodic,
            FlushMode::AppClose,
            FlushMode::Manual,
        ] {
            let mut config = Config::default();
            config.flush.flush_mode = mode;
            assert_eq!(enqueue_only(&config).flush.flush_mode, FlushMode::Manual);
        }
    }
}
