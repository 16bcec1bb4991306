// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! rfcomm-chat terminal client

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rfcomm_chat::bluetooth::{Adapter, BluezAdapter, RemoteEndpoint};
use rfcomm_chat::{Attempt, Config, ConnectionState, Session, SessionEvent};

#[derive(Parser)]
#[command(name = "rfcomm-chat")]
#[command(version)]
#[command(about = "Text chat with one nearby device over Bluetooth RFCOMM")]
struct Cli {
    /// Configuration file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Give up waiting for a connection after this many seconds
    #[arg(long, global = true)]
    timeout: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Wait for a peer to connect
    Listen,
    /// Connect to a listening peer
    Connect {
        /// Bluetooth address, e.g. 00:11:22:33:44:55
        address: String,
        #[arg(long)]
        name: Option<String>,
    },
    /// List paired devices
    Devices {
        /// Also scan for nearby devices for this many seconds
        #[arg(long)]
        scan: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging; stdout carries the chat itself.
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("rfcomm_chat=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    info!("Starting rfcomm-chat v{}", env!("CARGO_PKG_VERSION"));

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(secs) = cli.timeout {
        config.connection.connect_timeout_secs = Some(secs);
    }
    info!("Configuration loaded");

    let adapter =
        BluezAdapter::new(config.bluetooth.adapter.as_deref(), config.bluez_options()).await?;
    adapter.ensure_powered().await?;

    match cli.command {
        Commands::Devices { scan } => list_devices(&adapter, scan).await,
        Commands::Listen => {
            let session = Session::new(adapter, config.session_options());
            let events = take_events(&session)?;
            let attempt = session.listen()?;
            chat(session, events, attempt).await
        }
        Commands::Connect { address, name } => {
            let mut remote = RemoteEndpoint::new(address);
            if let Some(name) = name {
                remote = remote.with_name(name);
            }
            let session = Session::new(adapter, config.session_options());
            let events = take_events(&session)?;
            let attempt = session.connect(remote)?;
            chat(session, events, attempt).await
        }
    }
}

fn take_events<A: Adapter>(
    session: &Session<A>,
) -> Result<mpsc::UnboundedReceiver<SessionEvent>> {
    session
        .take_event_receiver()
        .ok_or_else(|| anyhow!("Session events already taken"))
}

async fn list_devices(adapter: &BluezAdapter, scan: Option<u64>) -> Result<()> {
    let paired = adapter.paired_devices().await?;
    if paired.is_empty() {
        println!("No paired devices found");
    }
    for device in &paired {
        println!("paired  {}  {}", device.address, device.name);
    }

    let Some(secs) = scan else {
        return Ok(());
    };

    let mut found = adapter.start_discovery().await?;
    let deadline = tokio::time::sleep(Duration::from_secs(secs));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            device = found.recv() => match device {
                Some(device) => println!(
                    "nearby  {}  {}",
                    device.address,
                    device.name.as_deref().unwrap_or("(unknown)")
                ),
                None => break,
            },
            _ = &mut deadline => break,
        }
    }

    adapter.cancel_discovery().await
}

async fn chat<A: Adapter>(
    session: Session<A>,
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
    attempt: Attempt,
) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    // Writes can block on a slow peer; keep them off the input loop.
    let (outbox, mut outgoing) = mpsc::unbounded_channel::<String>();
    let sender = session.clone();
    let sending = tokio::spawn(async move {
        while let Some(line) = outgoing.recv().await {
            if let Err(e) = sender.send(&line).await {
                warn!("Send failed: {:#}", e);
            }
        }
    });

    let mut outcome = Ok(());
    loop {
        tokio::select! {
            Some(event) = events.recv() => match event {
                SessionEvent::StateChanged(state) => {
                    println!("* {}", state);
                    if let Some(end) = chat_outcome(state) {
                        outcome = end;
                        break;
                    }
                }
                SessionEvent::MessageReceived(message) => {
                    println!(
                        "[{}] {}: {}",
                        message.timestamp.format("%H:%M:%S"),
                        message.sender,
                        message.content
                    );
                }
            },
            line = lines.next_line() => match line? {
                Some(line) if line.trim() == "/quit" => {
                    attempt.cancel();
                    session.disconnect();
                    break;
                }
                Some(line) => {
                    let _ = outbox.send(line);
                }
                None => {
                    attempt.cancel();
                    session.disconnect();
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                attempt.cancel();
                session.disconnect();
                break;
            }
        }
    }

    // Stopping the session above abandons any blocked write.
    drop(outbox);
    sending.abort();

    info!("rfcomm-chat stopped");
    outcome
}

/// Whether `state` ends the chat, and with which exit result.
fn chat_outcome(state: ConnectionState) -> Option<Result<()>> {
    if state.is_failure() {
        return Some(Err(anyhow!("{}", state)));
    }
    (state == ConnectionState::Disconnected).then(|| Ok(()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_attempt_exits_with_error() {
        let err = chat_outcome(ConnectionState::ClientConnectionFailed)
            .unwrap()
            .unwrap_err();
        assert_eq!(err.to_string(), "Client connection has failed");
        assert!(chat_outcome(ConnectionState::ServerConnectionFailed)
            .unwrap()
            .is_err());
    }

    #[test]
    fn test_disconnect_exits_cleanly() {
        assert!(chat_outcome(ConnectionState::Disconnected).unwrap().is_ok());
        assert!(chat_outcome(ConnectionState::ServerConnected).is_none());
        assert!(chat_outcome(ConnectionState::ClientConnecting).is_none());
    }
}
