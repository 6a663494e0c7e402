//! Shared plumbing for the probe binaries: logging setup, configuration,
//! and the connect → exchange → close sequence.

use std::path::PathBuf;

use color_eyre::Result;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use crate::config::ProbeConfig;
use crate::correlator::{run_exchange, CloseReason, Command, Outcome};
use crate::mqtt::{MqttTransport, Session, SessionStatus};

/// Flags every probe accepts
#[derive(Debug, Clone, clap::Args)]
pub struct CommonArgs {
    /// Configuration file (default: <config dir>/twinprobe/config.toml)
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Seconds to listen for responses after publishing
    #[arg(long, short = 'w')]
    pub wait: Option<u64>,

    /// Debug logging
    #[arg(long, short = 'v')]
    pub verbose: bool,
}

pub fn setup(args: &CommonArgs) -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env(if args.verbose { Level::DEBUG } else { Level::INFO });
    Ok(())
}

fn setup_logging_env(level: Level) {
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}

pub async fn load_config(args: &CommonArgs) -> Result<ProbeConfig> {
    let mut config = ProbeConfig::load(args.config.as_deref()).await?;
    if let Some(wait) = args.wait {
        config.exchange.window_secs = wait;
    }
    Ok(config)
}

/// Runs one probe: builds the command from the loaded configuration,
/// exchanges it with the broker, prints what came back.
///
/// The session is closed whether or not the exchange succeeded.
pub async fn run<F>(args: &CommonArgs, build: F) -> Result<()>
where
    F: FnOnce(&ProbeConfig) -> crate::error::Result<Command>,
{
    let config = load_config(args).await?;
    let command = build(&config)?;
    let qos = config.exchange.qos()?;

    println!(
        "MQTT {} - {}",
        config.bus.endpoint(),
        config.bus.username.as_deref().unwrap_or("<anonymous>")
    );

    let mut session = Session::connect(&MqttTransport, &config.bus).await?;

    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupted, closing collection window");
                cancel.cancel();
            }
        })
    };

    let result = run_exchange(
        &mut session,
        command,
        qos,
        config.exchange.window(),
        &cancel,
    )
    .await;

    let status = session.status();
    if let Err(e) = session.close().await {
        warn!("Session did not close cleanly: {}", e);
    }
    interrupt.abort();

    let outcome = result?;
    print_outcome(&outcome);
    print_session(&status);
    Ok(())
}

pub fn print_outcome(outcome: &Outcome) {
    println!(
        "{} to {} via {}: {} responses",
        outcome.operation,
        outcome.target,
        outcome.publish_topic,
        outcome.entries.len()
    );
    for entry in &outcome.entries {
        println!("[+{:>6.3}s] {}", entry.offset.as_secs_f64(), entry.message.render());
    }

    for entry in &outcome.malformed {
        println!(
            "[+{:>6.3}s] {} (not decoded: {})",
            entry.offset.as_secs_f64(),
            entry.message.render(),
            entry.reason
        );
    }

    let responders = outcome.responders();
    if !responders.is_empty() {
        println!("Pong from: {}", responders.join(", "));
    }

    let stats = outcome.stats;
    if stats.malformed + stats.duplicates + stats.late > 0 {
        println!(
            "Dropped: {} malformed, {} duplicate, {} late",
            stats.malformed, stats.duplicates, stats.late
        );
    }

    match outcome.close_reason {
        CloseReason::ConnectionLost => println!(
            "Connection lost: {}",
            outcome.connection_error.as_deref().unwrap_or("unknown")
        ),
        CloseReason::Cancelled => println!("Interrupted before the window elapsed"),
        CloseReason::Elapsed | CloseReason::Closed => {}
    }
}

pub fn print_session(status: &SessionStatus) {
    println!(
        "Sent {}, received {} messages{}",
        status.messages_sent,
        status.messages_received,
        status
            .last_activity
            .map(|at| format!(", last activity {}", at.format("%H:%M:%S%.3f")))
            .unwrap_or_default()
    );
}
