//! Command-line surface for the LAN file sharer.
//!
//! `main` only installs the tracing subscriber and calls [`run`]; all
//! argument parsing and subcommand logic lives here so it can be
//! exercised by `tests/` without spawning a real process.

use std::{io::Write, net::IpAddr, path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use lan_file_sharer_common::AppConfig;
use lan_file_sharer_discovery as discovery;
use lan_file_sharer_entities::ServiceRecord;
use lfs_receiver::ReceiverEngine;
use lfs_sender::{ChannelSubscriber, SenderEvent, SenderSession};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const DEFAULT_PORT: u16 = 8080;
const DISCOVERY_WAIT: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "lan-file-sharer", version, about = "Send and receive files over the LAN")]
pub struct Cli {
    /// Raise the tracing level to `debug` regardless of `RUST_LOG`.
    #[arg(long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Advertise this host and wait for an incoming transfer.
    Receive {
        #[arg(short, long)]
        port: Option<u16>,
        #[arg(short, long)]
        outdir: Option<PathBuf>,
    },
    /// Discover a peer and send it one or more files.
    Send {
        #[arg(short, long)]
        port: Option<u16>,
        files: Vec<PathBuf>,
    },
    /// Inspect or edit the persisted local configuration.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    Show,
    SetOutDir { dir: PathBuf },
    ClearOutDir,
}

/// Runs the parsed CLI to completion. Returns `Ok(())` on clean shutdown;
/// any `Err` should translate to a non-zero process exit.
pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Receive { port, outdir } => run_receive(port, outdir).await,
        Command::Send { port, files } => run_send(port, files).await,
        Command::Config { action } => run_config(action),
    }
}

async fn run_receive(port: Option<u16>, outdir: Option<PathBuf>) -> Result<()> {
    let config = AppConfig::load().unwrap_or_default();
    let port = port.or(config.default_port).unwrap_or(DEFAULT_PORT);
    let outdir = outdir.unwrap_or_else(|| config.get_default_out_dir());

    let (engine, mut pending_asks) = ReceiverEngine::new(outdir, Vec::new());
    let router = engine.router();

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("failed to bind receiver server on port {port}"))?;
    let local_addr = listener.local_addr()?;
    info!(port = local_addr.port(), "receiver listening");

    let cancel = CancellationToken::new();
    let server_cancel = cancel.clone();
    let server_task = tokio::spawn(async move {
        let server = axum::serve(listener, router);
        tokio::select! {
            result = server => { if let Err(e) = result { warn!(error = %e, "receiver server stopped with error"); } }
            _ = server_cancel.cancelled() => {}
        }
    });

    let record = ServiceRecord {
        name: discovery::instance_name(),
        service_type: discovery::SERVICE_TYPE.trim_end_matches('.').to_string(),
        domain: "local".to_string(),
        address: local_address(),
        port: local_addr.port(),
    };
    let announce_cancel = cancel.clone();
    let announce_task = tokio::spawn(async move {
        if let Err(e) = discovery::announce(&record, announce_cancel).await {
            warn!(error = %e, "mDNS announce failed");
        }
    });

    println!("Waiting for an incoming transfer on port {}...", local_addr.port());
    while let Some(ask) = pending_asks.recv().await {
        let file_count = lan_file_sharer_entities::leaves(&ask.files).len();
        println!("Incoming transfer offering {file_count} file(s). Accept? [y/N] ");
        std::io::stdout().flush().ok();

        if prompt_yes_no() {
            engine.accept().await?;
            println!("Accepted. Receiving...");
        } else {
            engine.reject().await?;
            println!("Rejected.");
        }
    }

    cancel.cancel();
    let _ = server_task.await;
    let _ = announce_task.await;
    Ok(())
}

fn prompt_yes_no() -> bool {
    let mut line = String::new();
    if std::io::stdin().read_line(&mut line).is_err() {
        return false;
    }
    matches!(line.trim().to_lowercase().as_str(), "y" | "yes")
}

fn local_address() -> IpAddr {
    "0.0.0.0".parse().expect("static literal parses")
}

async fn run_send(_port: Option<u16>, files: Vec<PathBuf>) -> Result<()> {
    if files.is_empty() {
        anyhow::bail!("no files given to send");
    }

    let cancel = CancellationToken::new();
    let mut browse_rx = discovery::browse(discovery::SERVICE_TYPE, cancel.clone())
        .context("failed to start mDNS browse")?;
    println!("Looking for a receiver on the LAN...");
    let peers = discovery::wait_for_first_peer(&mut browse_rx, DISCOVERY_WAIT)
        .await
        .context("no receiver found on the LAN")?;
    let peer = peers.first().context("browse returned no peers")?.clone();
    println!("Found receiver `{}` at {}", peer.name, peer.base_url());

    let session = SenderSession::new();
    let (tx, mut rx) = mpsc::channel(16);
    session.subscribe("cli", Arc::new(ChannelSubscriber(tx)));

    let progress_task = tokio::spawn(async move {
        let bar = ProgressBar::new(0);
        if let Ok(style) = ProgressStyle::with_template("{msg} [{bar:40}] {pos}/{len}") {
            bar.set_style(style);
        }
        while let Some(event) = rx.recv().await {
            match event {
                SenderEvent::TransferStarted { file_count, total_bytes } => {
                    bar.set_length(file_count as u64);
                    bar.set_message(format!("sending {total_bytes} bytes across {file_count} file(s)"));
                }
                SenderEvent::FileSent { relative_path } => {
                    bar.inc(1);
                    bar.set_message(format!("sent {relative_path}"));
                }
                SenderEvent::TransferComplete => bar.finish_with_message("transfer complete"),
                SenderEvent::Rejected => bar.finish_with_message("receiver rejected the transfer"),
                SenderEvent::Error(e) => bar.abandon_with_message(format!("error: {e}")),
            }
        }
    });

    let result = session.run(&peer, &files, cancel.clone()).await;
    cancel.cancel();
    let _ = progress_task.await;
    result.context("transfer failed")
}

fn run_config(action: ConfigAction) -> Result<()> {
    let mut config = AppConfig::load().unwrap_or_default();
    match action {
        ConfigAction::Show => {
            println!("default_out_dir = {:?}", config.default_out_dir);
            println!("default_port = {:?}", config.default_port);
            println!("profile_name = {:?}", config.profile_name);
        }
        ConfigAction::SetOutDir { dir } => {
            config.set_default_out_dir(dir)?;
            println!("Default output directory updated.");
        }
        ConfigAction::ClearOutDir => {
            config.clear_default_out_dir()?;
            println!("Default output directory cleared.");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_receive_with_options() {
        let cli = Cli::parse_from(["lan-file-sharer", "receive", "-p", "9090", "-o", "/tmp/out"]);
        match cli.command {
            Command::Receive { port, outdir } => {
                assert_eq!(port, Some(9090));
                assert_eq!(outdir, Some(PathBuf::from("/tmp/out")));
            }
            _ => panic!("expected Receive"),
        }
    }

    #[test]
    fn parses_send_with_files() {
        let cli = Cli::parse_from(["lan-file-sharer", "send", "a.txt", "b.txt"]);
        match cli.command {
            Command::Send { files, .. } => {
                assert_eq!(files, vec![PathBuf::from("a.txt"), PathBuf::from("b.txt")]);
            }
            _ => panic!("expected Send"),
        }
    }

    #[test]
    fn parses_config_subcommands() {
        let cli = Cli::parse_from(["lan-file-sharer", "config", "show"]);
        assert!(matches!(cli.command, Command::Config { action: ConfigAction::Show }));
    }
}
