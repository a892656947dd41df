use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tether_core::app::{Checker, ConsumerLoop, GroupSession, Producer};
use tether_core::config::TetherConfig;
use tether_core::domain::{Event, IdRange, MemberName, StartCursor};
use tether_core::impls::{InMemoryStreamLog, RedisStreamLog};
use tether_core::ports::StreamLog;
use tether_core::typed::Handler;

mod demo;

use demo::{RandomReject, random_events};

#[derive(Parser)]
#[command(name = "tether", about = "At-least-once consumer-group delivery over Redis Streams")]
#[command(version, propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Redis URL
    #[arg(long, global = true)]
    broker: Option<String>,

    #[arg(long, global = true)]
    stream: Option<String>,

    #[arg(long, global = true)]
    group: Option<String>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Append random events
    Produce {
        /// Number of events to send
        #[arg(long)]
        count: Option<u64>,

        /// Delay between two events (e.g. 200ms)
        #[arg(long, value_parser = parse_duration)]
        pace: Option<Duration>,

        #[arg(long)]
        max_len: Option<usize>,

        /// Drop entries older than this (e.g. 5s)
        #[arg(long, value_parser = parse_duration)]
        max_age: Option<Duration>,
    },
    /// Join the group and process new entries
    Consume {
        #[arg(long, conflicts_with = "unique")]
        member: Option<String>,

        /// Use a generated, process-unique member name
        #[arg(long)]
        unique: bool,

        /// new-only | backlog
        #[arg(long)]
        start: Option<StartCursor>,

        /// Share of messages the handler rejects (0.0 - 1.0)
        #[arg(long, default_value_t = 0.2, value_parser = parse_rate)]
        reject_rate: f64,
    },
    /// Reclaim and reprocess idle pending entries
    Check {
        #[arg(long)]
        member: Option<String>,

        #[arg(long, value_parser = parse_duration)]
        min_idle: Option<Duration>,

        #[arg(long, value_parser = parse_duration)]
        interval: Option<Duration>,

        #[arg(long, default_value_t = 0.2, value_parser = parse_rate)]
        reject_rate: f64,
    },
    /// Run producer, consumer and checker together against an in-memory log
    Demo {
        /// How long to run
        #[arg(long, default_value = "30s", value_parser = parse_duration)]
        duration: Duration,

        #[arg(long, default_value = "3s", value_parser = parse_duration)]
        min_idle: Duration,

        #[arg(long, default_value_t = 0.2, value_parser = parse_rate)]
        reject_rate: f64,
    },
}

fn parse_duration(s: &str) -> Result<Duration, humantime_serde::re::humantime::DurationError> {
    humantime_serde::re::humantime::parse_duration(s)
}

fn parse_rate(s: &str) -> Result<f64, String> {
    let rate: f64 = s.parse().map_err(|e| format!("{e}"))?;
    // NaN も弾く
    if !(0.0..=1.0).contains(&rate) {
        return Err(format!("{s} is not between 0.0 and 1.0"));
    }
    Ok(rate)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = load_config(&cli)?;
    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received; stopping");
                cancel.cancel();
            }
        }
    });

    match cli.command {
        Commands::Produce {
            count,
            pace,
            max_len,
            max_age,
        } => {
            let mut settings = config.producer.clone();
            if let Some(count) = count {
                settings = settings.with_count(count);
            }
            if let Some(pace) = pace {
                settings = settings.with_pace(pace);
            }
            if max_len.is_some() {
                settings = settings.with_max_len(max_len);
            }
            if max_age.is_some() {
                settings = settings.with_max_age(max_age);
            }
            let config = config.with_producer(settings.clone());
            config.validate()?;
            let log = connect(&config).await?;
            let producer = Producer::<Event>::new(log, config.stream.clone(), settings.retention());
            let events = random_events().take(usize::try_from(settings.count)?);
            let sent = producer.run(events, settings.pace, &cancel).await?;
            println!("sent {sent} events to {}", config.stream);
        }
        Commands::Consume {
            member,
            unique,
            start,
            reject_rate,
        } => {
            let mut settings = config.consumer.clone();
            if let Some(member) = member {
                settings = settings.with_member(member);
            }
            if unique {
                settings = settings.with_member(MemberName::generate("consumer"));
            }
            if let Some(start) = start {
                settings = settings.with_start(start);
            }
            let config = config.with_consumer(settings.clone());
            config.validate()?;
            let log = connect(&config).await?;
            let session = GroupSession::join(log, config.group_ref(), &settings).await?;
            let handler: Arc<dyn Handler<Event>> = Arc::new(RandomReject::new(reject_rate));
            let report = ConsumerLoop::new(session, handler, config.poison)
                .run(cancel)
                .await?;
            println!("last seen: {}", serde_json::to_string(&report.seen)?);
            println!("counts: {}", serde_json::to_string(&report.counts)?);
        }
        Commands::Check {
            member,
            min_idle,
            interval,
            reject_rate,
        } => {
            let mut settings = config.checker.clone();
            if let Some(member) = member {
                settings = settings.with_member(member);
            }
            if let Some(min_idle) = min_idle {
                settings = settings.with_min_idle(min_idle);
            }
            if let Some(interval) = interval {
                settings = settings.with_interval(interval);
            }
            let config = config.with_checker(settings.clone());
            config.validate()?;
            let log = connect(&config).await?;
            let handler: Arc<dyn Handler<Event>> = Arc::new(RandomReject::new(reject_rate));
            let counts = Checker::new(log, config.group_ref(), &settings, handler, config.poison)
                .run(cancel)
                .await;
            println!("counts: {}", serde_json::to_string(&counts)?);
        }
        Commands::Demo {
            duration,
            min_idle,
            reject_rate,
        } => run_demo(&config, duration, min_idle, reject_rate, cancel).await?,
    }

    Ok(())
}

fn load_config(cli: &Cli) -> Result<TetherConfig> {
    let mut config = match &cli.config {
        Some(path) => TetherConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => TetherConfig::default(),
    };
    if let Some(broker) = &cli.broker {
        config = config.with_broker(broker.clone());
    }
    if let Some(stream) = &cli.stream {
        config = config.with_stream(stream.clone());
    }
    if let Some(group) = &cli.group {
        config = config.with_group(group.clone());
    }
    config.validate()?;
    Ok(config)
}

async fn connect(config: &TetherConfig) -> Result<Arc<dyn StreamLog>> {
    let log = RedisStreamLog::connect(&config.broker)
        .await
        .with_context(|| format!("connecting to {}", config.broker))?;
    Ok(Arc::new(log))
}

/// All three roles in one process. Rejected events show up again through the checker.
async fn run_demo(
    config: &TetherConfig,
    duration: Duration,
    min_idle: Duration,
    reject_rate: f64,
    cancel: CancellationToken,
) -> Result<()> {
    let log: Arc<dyn StreamLog> = Arc::new(InMemoryStreamLog::new());
    let group = config.group_ref();

    let session = GroupSession::join(log.clone(), group.clone(), &config.consumer).await?;
    let consumer = ConsumerLoop::<Event>::new(
        session,
        Arc::new(RandomReject::new(reject_rate)),
        config.poison,
    );
    let checker = Checker::<Event>::new(
        log.clone(),
        group,
        &config.checker.clone().with_min_idle(min_idle),
        Arc::new(RandomReject::new(reject_rate)),
        config.poison,
    );

    let consumer_task = tokio::spawn(consumer.run(cancel.clone()));
    let checker_task = tokio::spawn(checker.run(cancel.clone()));

    let producer = Producer::<Event>::new(
        log.clone(),
        config.stream.clone(),
        config.producer.retention(),
    );
    let deadline = tokio::time::sleep(duration);
    tokio::pin!(deadline);
    tokio::select! {
        sent = producer.run(random_events(), config.producer.pace, &cancel) => {
            let sent = sent?;
            info!(sent, "producer stopped");
        }
        _ = &mut deadline => info!("demo finished"),
    }
    cancel.cancel();

    let report = consumer_task.await??;
    let checked = checker_task.await?;
    let pending = log
        .list_pending(&config.stream, &config.group, IdRange::full(), usize::MAX)
        .await?;
    if !pending.is_empty() {
        warn!(count = pending.len(), "entries still pending at shutdown");
    }
    println!("consumer: {}", serde_json::to_string(&report.counts)?);
    println!("checker:  {}", serde_json::to_string(&checked)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reject_rate_must_be_a_share() {
        assert_eq!(parse_rate("0.25"), Ok(0.25));
        assert_eq!(parse_rate("1"), Ok(1.0));
        assert!(parse_rate("NaN").is_err());
        assert!(parse_rate("inf").is_err());
        assert!(parse_rate("-0.1").is_err());
        assert!(parse_rate("1.5").is_err());
        assert!(parse_rate("often").is_err());
    }

    #[test]
    fn cli_rejects_nan_reject_rate() {
        let parsed = Cli::try_parse_from(["tether", "consume", "--reject-rate", "NaN"]);
        assert!(parsed.is_err());

        let parsed = Cli::try_parse_from(["tether", "check", "--reject-rate", "0.5"]).unwrap();
        assert!(matches!(parsed.command, Commands::Check { reject_rate, .. } if reject_rate == 0.5));
    }
}
