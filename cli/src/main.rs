// deskbridge — desktop companion link from the command line
//
// Drives every transport operation against a real companion and owns the
// persisted configuration and outbox.

mod config;
mod pairing;

use anyhow::{Context, Result};
use chrono::{NaiveDateTime, TimeZone, Utc};
use clap::{Parser, Subcommand};
use colored::*;
use deskbridge_core::message::protocol::abbrev;
use deskbridge_core::message::types::{EPOCH_TASKS_SINCE, TASKS_SINCE_FORMAT};
use deskbridge_core::{
    ConnectionManager, DiscoveryReply, DomainStore, HandshakeOutcome, Outbox, QueueReason,
    SendOutcome, SharedKeyCrypto, TracingObserver, TransportEvent, TransportObserver,
};
use std::net::IpAddr;
use std::sync::Arc;
use tracing::debug;

#[derive(Parser)]
#[command(name = "deskbridge")]
#[command(about = "DeskBridge — signed command link to your desktop companion", long_about = None)]
#[command(version)]
struct Cli {
    /// Debug logging (overrides RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Companion address for this run only
    #[arg(long, global = true)]
    peer: Option<IpAddr>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a command once, no queueing
    Send { command: String },
    /// Send a data command, queueing it if the companion is unreachable
    Queue { command: String },
    /// Measure a PING/PONG round trip
    Ping,
    /// Check whether the companion answers
    Reachable,
    /// Ask the watchdog to start the companion server
    Wake,
    /// Start or stop the companion server
    Toggle {
        /// The server is currently running (so stop it)
        #[arg(long)]
        running: bool,
    },
    /// Look for companions on the local network
    Discover,
    /// Ask the companion for everything changed since a point in time
    Handshake {
        /// Tasks cutoff, e.g. 2024-03-01T10:15:00
        #[arg(long)]
        since: Option<String>,
    },
    /// List the companion's shared files
    Files,
    /// Inspect or replay queued commands
    Outbox {
        #[command(subcommand)]
        action: OutboxAction,
    },
    /// Watch the companion and replay the outbox on reconnect (Ctrl-C to stop)
    Monitor,
    /// Import a pairing payload from the companion
    Pair { payload: String },
    /// Configure settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum OutboxAction {
    Status,
    Flush,
    Clear,
}

#[derive(Subcommand)]
enum ConfigAction {
    Set { key: String, value: String },
    Get { key: String },
    List,
}

/// Domain state the CLI keeps: just the chat sync cursor
struct CliStore {
    last_chat_sync_ms: i64,
}

impl DomainStore for CliStore {
    fn last_chat_sync_ms(&self) -> i64 {
        self.last_chat_sync_ms
    }

    fn on_file_list(&self, listing: &str) {
        debug!("File listing received ({} bytes)", listing.len());
    }
}

/// Prints connection changes while the monitor runs
struct ConsoleObserver;

impl TransportObserver for ConsoleObserver {
    fn on_event(&self, event: &TransportEvent) {
        match event {
            TransportEvent::ReachabilityChanged { reachable: true } => {
                println!("{} Companion reachable", "●".green())
            }
            TransportEvent::ReachabilityChanged { reachable: false } => {
                println!("{} Companion unreachable", "●".red())
            }
            TransportEvent::FlushCompleted(report) => println!(
                "{} Replayed {} queued command(s), {} left",
                "↻".bright_cyan(),
                report.delivered,
                report.remaining
            ),
            _ => {}
        }
        TracingObserver.on_event(event);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Send { command } => cmd_send(cli.peer, command).await,
        Commands::Queue { command } => cmd_queue(cli.peer, command).await,
        Commands::Ping => cmd_ping(cli.peer).await,
        Commands::Reachable => cmd_reachable(cli.peer).await,
        Commands::Wake => cmd_wake(cli.peer).await,
        Commands::Toggle { running } => cmd_toggle(cli.peer, running).await,
        Commands::Discover => cmd_discover(cli.peer).await,
        Commands::Handshake { since } => cmd_handshake(cli.peer, since).await,
        Commands::Files => cmd_files(cli.peer).await,
        Commands::Outbox { action } => cmd_outbox(cli.peer, action).await,
        Commands::Monitor => cmd_monitor(cli.peer).await,
        Commands::Pair { payload } => cmd_pair(payload),
        Commands::Config { action } => cmd_config(action),
    }
}

fn connect(peer: Option<IpAddr>) -> Result<ConnectionManager> {
    let config = config::Config::load()?;
    let mut transport = config.transport.clone();
    if let Some(ip) = peer {
        transport.peer_ip = ip;
    }

    let crypto = SharedKeyCrypto::from_secrets(&config.cipher_secret, &config.mac_secret)
        .with_encryption(config.encryption);
    let outbox_path = config.outbox_path()?;
    let outbox = Outbox::persistent(&outbox_path)
        .with_context(|| format!("Failed to open outbox at {}", outbox_path.display()))?;
    let store = CliStore {
        last_chat_sync_ms: config.last_chat_sync_ms,
    };

    Ok(
        ConnectionManager::udp(transport, Arc::new(crypto), Arc::new(store))
            .with_outbox(Arc::new(outbox)),
    )
}

async fn cmd_send(peer: Option<IpAddr>, command: String) -> Result<()> {
    let manager = connect(peer)?;
    manager
        .send_command_sync(&command)
        .await
        .context("Send failed")?;
    println!("{} Sent to {}: {}", "✓".green(), manager.peer_ip(), abbrev(&command));
    Ok(())
}

async fn cmd_queue(peer: Option<IpAddr>, command: String) -> Result<()> {
    let manager = connect(peer)?;
    let outcome = manager
        .send_data_command(command.clone())
        .await
        .context("Send task failed")?;

    match outcome {
        SendOutcome::Sent => println!("{} Sent: {}", "✓".green(), abbrev(&command)),
        SendOutcome::Queued(reason) => {
            let why = match reason {
                QueueReason::Unreachable => "companion unreachable",
                QueueReason::SendFailed => "send failed",
            };
            println!(
                "{} Queued ({}), {} pending",
                "…".yellow(),
                why,
                manager.pending_count()
            );
        }
        SendOutcome::Dropped(e) => anyhow::bail!("Command dropped: {}", e),
    }
    Ok(())
}

async fn cmd_ping(peer: Option<IpAddr>) -> Result<()> {
    let manager = connect(peer)?;
    match manager.test_connection().await {
        Ok(rtt) => {
            println!(
                "{} PONG from {} in {} ms",
                "✓".green(),
                manager.peer_ip(),
                rtt.as_millis()
            );
            Ok(())
        }
        Err(e) => anyhow::bail!("No answer from {}: {}", manager.peer_ip(), e),
    }
}

async fn cmd_reachable(peer: Option<IpAddr>) -> Result<()> {
    let manager = connect(peer)?;
    if manager.is_server_reachable().await {
        println!("{} {} is reachable", "●".green(), manager.peer_ip());
    } else {
        println!("{} {} is unreachable", "●".red(), manager.peer_ip());
    }
    Ok(())
}

async fn cmd_wake(peer: Option<IpAddr>) -> Result<()> {
    let manager = connect(peer)?;
    manager
        .wake_up_watchdog()
        .await
        .context("Watchdog task failed")?
        .context("Watchdog command failed")?;
    println!("{} Wake-up sent to {}", "✓".green(), manager.peer_ip());
    Ok(())
}

async fn cmd_toggle(peer: Option<IpAddr>, running: bool) -> Result<()> {
    let manager = connect(peer)?;
    manager
        .toggle_server_state(running)
        .await
        .context("Watchdog task failed")?
        .context("Watchdog command failed")?;
    let action = if running { "Stop" } else { "Start" };
    println!("{} {} request sent to {}", "✓".green(), action, manager.peer_ip());
    Ok(())
}

async fn cmd_discover(peer: Option<IpAddr>) -> Result<()> {
    let manager = connect(peer)?;
    println!("{}", "Searching the local network...".bold());
    let found = manager
        .discover_peers()
        .await
        .context("Discovery task failed")?;

    if found.is_empty() {
        println!("  No companions found.");
        return Ok(());
    }

    let mut found: Vec<_> = found.into_iter().collect();
    found.sort();
    for (ip, reply) in &found {
        let status = match reply {
            DiscoveryReply::ServerActive => "server running".green(),
            DiscoveryReply::IpFound => "server stopped".yellow(),
        };
        println!("  {} {} ({})", "•".bright_cyan(), ip, status);
    }

    if !found.iter().any(|(ip, _)| *ip == manager.peer_ip()) {
        println!();
        println!(
            "Use one with: {}",
            format!("deskbridge config set peer_ip {}", found[0].0).bright_green()
        );
    }
    Ok(())
}

async fn cmd_handshake(peer: Option<IpAddr>, since: Option<String>) -> Result<()> {
    let tasks_since = match since {
        Some(text) => NaiveDateTime::parse_from_str(&text, TASKS_SINCE_FORMAT)
            .with_context(|| format!("Expected {}, got {}", TASKS_SINCE_FORMAT, text))?
            .format(TASKS_SINCE_FORMAT)
            .to_string(),
        None => EPOCH_TASKS_SINCE.to_string(),
    };

    let manager = connect(peer)?;
    match manager
        .perform_handshake(&tasks_since)
        .await
        .context("Handshake task failed")?
    {
        HandshakeOutcome::Sent => {
            println!("{} Handshake sent (tasks since {})", "✓".green(), tasks_since)
        }
        HandshakeOutcome::Skipped => {
            println!("{} Companion unreachable, handshake skipped", "✗".red())
        }
        HandshakeOutcome::Failed(e) => anyhow::bail!("Handshake failed: {}", e),
    }
    Ok(())
}

async fn cmd_files(peer: Option<IpAddr>) -> Result<()> {
    let manager = connect(peer)?;
    let listing = manager
        .fetch_file_list()
        .await
        .context("File list request failed")?;

    if listing.is_empty() {
        println!("No shared files.");
    } else {
        println!("{}", "Shared files".bold());
        println!("{}", listing);
    }
    Ok(())
}

async fn cmd_outbox(peer: Option<IpAddr>, action: OutboxAction) -> Result<()> {
    let manager = connect(peer)?;

    match action {
        OutboxAction::Status => {
            let entries = manager.outbox().entries();
            println!("{} ({} pending)", "Outbox".bold(), entries.len());
            for entry in entries {
                let queued = Utc
                    .timestamp_millis_opt(entry.enqueued_at as i64)
                    .single()
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "?".to_string());
                println!(
                    "  #{:<6} {}  attempts: {}  {}",
                    entry.seq,
                    queued.dimmed(),
                    entry.attempts,
                    abbrev(&entry.command)
                );
            }
        }
        OutboxAction::Flush => {
            let report = manager
                .flush_outbox()
                .await
                .context("Flush task failed")?;
            if report.skipped {
                println!("Another flush is already running.");
            } else if let Some(failure) = report.failure {
                println!(
                    "{} Delivered {}, stopped at the first failure: {} ({} left)",
                    "✗".red(),
                    report.delivered,
                    failure,
                    report.remaining
                );
            } else {
                println!("{} Delivered {}", "✓".green(), report.delivered);
            }
            if report.discarded > 0 {
                println!(
                    "{} Discarded {} command(s) too large to send",
                    "!".yellow(),
                    report.discarded
                );
            }
        }
        OutboxAction::Clear => {
            let removed = manager.outbox().clear().context("Failed to clear outbox")?;
            println!("{} Removed {} queued command(s)", "✓".green(), removed);
        }
    }
    Ok(())
}

async fn cmd_monitor(peer: Option<IpAddr>) -> Result<()> {
    let manager = connect(peer)?.with_observer(Arc::new(ConsoleObserver));
    println!(
        "{} Monitoring {} every {} ms, {} queued. Ctrl-C to stop.",
        "→".bright_cyan(),
        manager.peer_ip(),
        manager.config().monitor_interval_ms,
        manager.pending_count()
    );

    manager.start_monitor();
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    manager.shutdown().await;
    println!("Stopped.");
    Ok(())
}

fn cmd_pair(payload: String) -> Result<()> {
    let payload = pairing::PairingPayload::parse(&payload)?;
    let mut config = config::Config::load()?;
    let ip = payload.ip;
    let hostname = payload.hostname.clone();
    payload.apply(&mut config);
    config.save()?;

    println!(
        "{} Paired with {} ({})",
        "✓".green(),
        ip.to_string().bright_cyan(),
        hostname.unwrap_or_else(|| "unknown host".to_string())
    );
    Ok(())
}

fn cmd_config(action: ConfigAction) -> Result<()> {
    let mut config = config::Config::load()?;

    match action {
        ConfigAction::Set { key, value } => {
            config.set(&key, &value)?;
            config.save()?;
            println!(
                "{} Set {} = {}",
                "✓".green(),
                key.bright_cyan(),
                config::display_value(&key, &value)
            );
        }
        ConfigAction::Get { key } => match config.get(&key) {
            Some(value) => println!("{}", value),
            None => anyhow::bail!("Unknown or unset config key: {}", key),
        },
        ConfigAction::List => {
            println!("{}", "Configuration".bold());
            for (key, value) in config.list() {
                println!("  {:<20} {}", key.bright_cyan(), value);
            }
            println!();
            println!("File: {}", config::Config::config_file()?.display());
        }
    }
    Ok(())
}
