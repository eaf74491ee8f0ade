//! # hm-link
//!
//! Read telemetry from and send commands to an HM-series micro-inverter
//! through an nRF24L01+ transceiver attached to a Linux host.
//!
//! ```text
//! hm-link [--config PATH] poll
//! hm-link [--config PATH] on | off
//! hm-link [--config PATH] limit <LIMIT> [--relative] [--persist]
//! ```

use std::future::Future;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio::time::{interval, Duration};
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use hm_link::config::{Config, LoggingConfig, OutputFormat};
use hm_link::hm::protocol::Command;
use hm_link::link::{LinkSession, StatusFlags, SystemClock};
use hm_link::radio::linux;
use hm_link::telemetry::TelemetrySample;

/// Configuration file used when `--config` is not given
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// File name prefix of the daily log files
const LOG_FILE_PREFIX: &str = "hm-link.log";

#[derive(Parser, Debug)]
#[command(version, about = "HM-series micro-inverter radio link", long_about = None)]
struct CliArgs {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
enum CliCommand {
    /// Request telemetry periodically until Ctrl+C
    Poll,
    /// Switch the inverter output on
    On,
    /// Switch the inverter output off
    Off,
    /// Set the output power limit
    Limit {
        /// Watts, or percent with --relative
        limit: u16,
        /// Interpret the limit as a percentage of rated power
        #[arg(long)]
        relative: bool,
        /// Keep the limit across an inverter power cycle
        #[arg(long)]
        persist: bool,
    },
}

type Session = LinkSession<linux::LinuxNrf24, SystemClock>;

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    let config = Config::load(&args.config)
        .with_context(|| format!("Failed to load configuration from {}", args.config.display()))?;
    let _guard = init_tracing(&config.logging)?;

    info!("hm-link v{} starting...", env!("CARGO_PKG_VERSION"));

    let radio = linux::open(&config.radio).context("Failed to open transceiver")?;
    let mut session = LinkSession::new(
        radio,
        SystemClock::new(),
        config.identity()?,
        config.link_config()?,
    )?;

    match args.command {
        CliCommand::Poll => poll(&mut session, &config).await,
        CliCommand::On => switch(&mut session, Command::On),
        CliCommand::Off => switch(&mut session, Command::Off),
        CliCommand::Limit {
            limit,
            relative,
            persist,
        } => {
            if relative && limit > 100 {
                bail!("Relative limit must be at most 100%, got {}", limit);
            }
            session.set_power_limit(limit, relative, persist)?;
            println!("Power limit sent");
            Ok(())
        }
    }
}

/// Install the stderr subscriber, plus a daily-rolling file when configured
///
/// `RUST_LOG` takes precedence over the configured level. The returned guard
/// must live until exit so buffered file output is flushed.
fn init_tracing(logging: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let (file_layer, guard) = match &logging.directory {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir))?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_writer(writer).with_ansi(false)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    Ok(guard)
}

/// Print one sample per interval until Ctrl+C
async fn poll(session: &mut Session, config: &Config) -> Result<()> {
    info!(
        "Polling inverter {} every {}s",
        session.inverter().serial(),
        config.polling.interval_s
    );
    info!("Press Ctrl+C to exit");

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
    };

    let samples = run_until(Duration::from_secs(config.polling.interval_s), shutdown, || {
        let fetched = tokio::task::block_in_place(|| session.fetch_telemetry());
        let (record, status) = match fetched {
            Ok(result) => result,
            Err(e) => {
                error!("Telemetry fetch failed: {}", e);
                return Ok(());
            }
        };

        let sample = TelemetrySample::new(session.inverter(), &record, status, Utc::now());
        match config.polling.format {
            OutputFormat::Text => println!("{}", sample),
            OutputFormat::Json => println!("{}", sample.to_json_line()?),
        }
        Ok(())
    })
    .await?;

    info!("Received Ctrl+C, shutting down...");
    info!("Total samples: {}", samples);
    Ok(())
}

/// Call `on_tick` once per `period` until `shutdown` completes
///
/// The shutdown future is created once and polled first on every pass, so a
/// signal arriving while `on_tick` blocks is handled on the next pass.
///
/// # Returns
///
/// * `Result<u64>` - Number of completed ticks
async fn run_until<S, F>(period: Duration, shutdown: S, mut on_tick: F) -> Result<u64>
where
    S: Future<Output = ()>,
    F: FnMut() -> Result<()>,
{
    let mut ticker = interval(period);
    tokio::pin!(shutdown);
    let mut ticks: u64 = 0;

    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown => break,

            _ = ticker.tick() => {
                on_tick()?;
                ticks += 1;
            }
        }
    }

    Ok(ticks)
}

fn switch(session: &mut Session, command: Command) -> Result<()> {
    let status = session.send_command(command, None, 0)?;
    println!("{:?}: {}", command, status);

    if status.contains(StatusFlags::COMMAND_UNACKNOWLEDGED) {
        warn!("Inverter did not confirm {:?}", command);
        bail!("{:?} not acknowledged", command);
    }
    Ok(())
}
