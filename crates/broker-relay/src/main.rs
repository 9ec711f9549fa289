//! relayd: demo front-end for the broker relay.
//!
//! Usage: relayd [--topic <name>] [--strategy reliable|fast] [--outage-ms <ms>]
//!
//! Reads `key<TAB>json` lines from stdin, enqueues each one durably and
//! delivers them through an in-process broker. On EOF the backlog is drained
//! before shutting down; Ctrl-C shuts down immediately, leaving any backlog in
//! the queue database for the next run.

use anyhow::Context;
use broker_relay::{
    DeliveryError, DeliveryListener, DeliveryStrategyKind, InMemoryBroker, JsonSerializer,
    LoggingListener, Pipeline,
};
use clap::{Parser, ValueEnum};
use relay_config_and_utils::{init_logging, LogFormat, LogSettings, Paths, RelayConfig};
use relay_queue_store::QueueStore;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StrategyArg {
    Reliable,
    Fast,
}

impl From<StrategyArg> for DeliveryStrategyKind {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Reliable => DeliveryStrategyKind::Reliable,
            StrategyArg::Fast => DeliveryStrategyKind::Fast,
        }
    }
}

/// relayd: durable relay from stdin to a broker topic.
#[derive(Parser, Debug)]
#[command(name = "relayd")]
#[command(about = "Durable, health-gated relay of key/value records to a broker")]
struct Args {
    /// Destination topic.
    #[arg(long, default_value = "events")]
    topic: String,

    /// Delivery strategy.
    #[arg(long, value_enum, default_value = "reliable")]
    strategy: StrategyArg,

    /// Base directory for config, queue database and logs (default: ~/.relay).
    #[arg(long, env = "RELAY_HOME")]
    base_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error). Overrides the config file.
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON log lines on stderr.
    #[arg(long)]
    json_logs: bool,

    /// Keep the in-process broker unreachable for this long after start.
    #[arg(long, default_value = "0")]
    outage_ms: u64,
}

/// Reports each outcome at info level so deliveries show up by default.
struct ConsoleListener;

impl DeliveryListener for ConsoleListener {
    fn on_send_success(&self, topic: &str, offset: Option<u64>) {
        info!(topic = %topic, offset = ?offset, "Delivered");
    }

    fn on_send_fail(&self, topic: &str, message: &str, cause: &DeliveryError) {
        warn!(topic = %topic, record = %message, error = %cause, "Not delivered");
    }
}

fn parse_line(line: &str) -> anyhow::Result<(String, Value)> {
    let (key, json) = line
        .split_once('\t')
        .context("expected `key<TAB>json`")?;
    let value = serde_json::from_str(json).context("value is not valid JSON")?;
    Ok((key.to_string(), value))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let paths = match &args.base_dir {
        Some(dir) => Paths::with_base_dir(dir.clone()),
        None => Paths::new()?,
    };
    paths.ensure_dirs()?;

    let mut config = RelayConfig::load(&paths)?;
    if let Some(level) = &args.log_level {
        config.log_level = level.clone();
    }
    if args.json_logs {
        config.log_format = LogFormat::Json;
    }

    let mut log_settings = LogSettings::new("relayd", &config.log_level);
    log_settings.format = config.log_format;
    log_settings.log_file = Some(paths.logs_dir().join("relayd.jsonl"));
    init_logging(&log_settings)?;

    let db_path = config.queue_database_file(&paths);
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store = Arc::new(
        QueueStore::open(&db_path)
            .with_context(|| format!("opening queue database {}", db_path.display()))?,
    );

    let broker = InMemoryBroker::new();
    if args.outage_ms > 0 {
        broker.set_reachable(false);
        let recovering = broker.clone();
        let outage = Duration::from_millis(args.outage_ms);
        tokio::spawn(async move {
            tokio::time::sleep(outage).await;
            info!("Simulated broker outage over");
            recovering.set_reachable(true);
        });
    }

    let pipeline: Pipeline<Value> = Pipeline::builder()
        .topic(args.topic.as_str())
        .queue_store(store)
        .broker(Arc::new(broker.clone()))
        .serializer(JsonSerializer)
        .listener(Arc::new(LoggingListener))
        .listener(Arc::new(ConsoleListener))
        .delivery_strategy(args.strategy.into())
        .config(config)
        .build()?;

    info!(
        topic = %pipeline.topic(),
        strategy = ?pipeline.strategy_kind(),
        database = %db_path.display(),
        backlog = pipeline.pending()?,
        "relayd ready, reading key<TAB>json lines from stdin"
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    info!("stdin closed, draining backlog");
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match parse_line(&line) {
                    Ok((key, value)) => {
                        let index = pipeline.enqueue(key, value)?;
                        info!(index, "Enqueued");
                    }
                    Err(e) => warn!(error = %format!("{e:#}"), "Skipping input line"),
                }
            }
            _ = &mut ctrl_c => {
                info!("Received shutdown signal, exiting...");
                interrupted = true;
                break;
            }
        }
    }

    while !interrupted && pipeline.pending()? > 0 {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(50)) => {}
            _ = &mut ctrl_c => {
                info!("Received shutdown signal, exiting...");
                interrupted = true;
            }
        }
    }

    let outcome = pipeline.shutdown().await;
    info!(delivered = broker.records().len(), outcome = ?outcome, "relayd stopped");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_line_splits_key_and_json() {
        let (key, value) = parse_line("user-1\t{\"clicks\": 3}").unwrap();
        assert_eq!(key, "user-1");
        assert_eq!(value, serde_json::json!({ "clicks": 3 }));
    }

    #[test]
    fn parse_line_rejects_bad_input() {
        assert!(parse_line("no tab here").is_err());
        assert!(parse_line("k\t{ broken").is_err());
    }

    #[test]
    fn args_parse_strategy() {
        let args = Args::parse_from(["relayd", "--topic", "clicks", "--strategy", "fast"]);
        assert_eq!(args.topic, "clicks");
        assert_eq!(DeliveryStrategyKind::from(args.strategy), DeliveryStrategyKind::Fast);
        assert!(!args.json_logs);
    }
}
