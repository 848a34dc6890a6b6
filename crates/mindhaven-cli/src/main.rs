mod console;

use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand, ValueEnum};
use mindhaven_common::{AppointmentId, Identity};
use mindhaven_config::{AppConfig, ConfigLoader};
use mindhaven_realtime::{
    ChannelHandle, ConnectionState, OutboundMessage, ParticipantRole, SendError, SessionManager,
    WsTransport,
};
use mindhaven_stores::{StoreDispatcher, Stores};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::console::ConsoleDispatcher;

#[derive(Parser)]
#[command(
    name = "mindhaven",
    version,
    about = "MindHaven - realtime session channel client"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Open a channel and chat from stdin
    Connect {
        /// Identity of the signed-in user
        #[arg(long)]
        user: String,

        /// Backend host, overrides the config file
        #[arg(long)]
        host: Option<String>,
    },

    /// Send a single video call event and exit
    CallEvent {
        #[arg(long)]
        user: String,

        #[arg(long)]
        appointment: String,

        #[arg(long, value_enum)]
        role: RoleArg,

        #[arg(long, value_enum)]
        event: EventArg,

        /// Call length in seconds, required for call_ended
        #[arg(long)]
        duration: Option<u64>,

        #[arg(long)]
        host: Option<String>,
    },

    /// Print the resolved configuration
    Config,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RoleArg {
    User,
    Mentor,
}

impl From<RoleArg> for ParticipantRole {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::User => ParticipantRole::User,
            RoleArg::Mentor => ParticipantRole::Mentor,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum EventArg {
    #[value(name = "user_joined")]
    UserJoined,
    #[value(name = "call_ended")]
    CallEnded,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_loader = ConfigLoader::new();
    let config = config_loader.load()?;

    let level = cli
        .log_level
        .clone()
        .or_else(|| config.log_level.clone())
        .unwrap_or_else(|| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level)))
        .init();

    match cli.command {
        Commands::Connect { user, host } => {
            let identity = parse_identity(&user)?;
            run_connect(with_host(config, host), identity).await?;
        }
        Commands::CallEvent {
            user,
            appointment,
            role,
            event,
            duration,
            host,
        } => {
            let identity = parse_identity(&user)?;
            let message = call_event_message(&appointment, role, event, duration)?;
            run_call_event(with_host(config, host), identity, message).await?;
        }
        Commands::Config => {
            println!("Config directory: {}", config_loader.config_dir().display());
            print!("{}", serde_yaml::to_string(&config)?);
        }
    }

    Ok(())
}

fn parse_identity(raw: &str) -> Result<Identity> {
    Identity::parse(raw).ok_or_else(|| anyhow!("--user cannot be empty"))
}

fn with_host(mut config: AppConfig, host: Option<String>) -> AppConfig {
    if let Some(host) = host {
        config.realtime.host = host;
    }
    config
}

fn call_event_message(
    appointment: &str,
    role: RoleArg,
    event: EventArg,
    duration: Option<u64>,
) -> Result<OutboundMessage> {
    let appointment = appointment.trim();
    if appointment.is_empty() {
        bail!("--appointment cannot be empty");
    }
    let appointment = AppointmentId::from(appointment);
    Ok(match event {
        EventArg::UserJoined => OutboundMessage::call_joined(appointment, role.into()),
        EventArg::CallEnded => {
            let duration = duration.context("--duration is required for call_ended")?;
            OutboundMessage::call_ended(appointment, role.into(), duration)
        }
    })
}

fn session_manager(config: &AppConfig, stores: &Arc<Stores>) -> SessionManager {
    let dispatcher = ConsoleDispatcher::new(StoreDispatcher::new(Arc::clone(stores)));
    SessionManager::new(
        config.realtime.clone(),
        Arc::new(WsTransport::new()),
        Arc::new(dispatcher),
    )
}

async fn activate(manager: &mut SessionManager, identity: Identity) -> Result<ChannelHandle> {
    manager
        .activate(Some(identity))
        .await?
        .ok_or_else(|| anyhow!("no channel was opened"))
}

async fn run_connect(config: AppConfig, identity: Identity) -> Result<()> {
    let stores = Arc::new(Stores::new());
    let mut manager = session_manager(&config, &stores);
    let handle = activate(&mut manager, identity.clone()).await?;
    let mut state = handle.watch_state();

    println!("Type '/to <peer>' to pick a recipient, then type messages. '/quit' exits.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if line == "/quit" {
                    break;
                }
                if let Some(peer) = line.strip_prefix("/to ") {
                    let peer = Identity::parse(peer);
                    match &peer {
                        Some(p) => println!("Now chatting with {p}"),
                        None => println!("Usage: /to <peer>"),
                    }
                    stores.conversation.set_current_chat(peer)?;
                    continue;
                }

                let Some(peer) = stores.conversation.current_chat()? else {
                    println!("Pick a recipient first with '/to <peer>'");
                    continue;
                };
                match manager.send(&OutboundMessage::chat(identity.clone(), peer, line)) {
                    Ok(()) => {}
                    Err(SendError::NotOpen) => println!("Not connected, message not sent"),
                    Err(e) => return Err(e.into()),
                }
            }
            changed = state.changed() => {
                if changed.is_err() || state.borrow_and_update().is_closed() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("received ctrl-c, shutting down");
                break;
            }
        }
    }

    manager.deactivate().await;
    Ok(())
}

async fn run_call_event(
    config: AppConfig,
    identity: Identity,
    message: OutboundMessage,
) -> Result<()> {
    let stores = Arc::new(Stores::new());
    let mut manager = session_manager(&config, &stores);
    let handle = activate(&mut manager, identity).await?;

    let settled = handle
        .watch_state()
        .wait_for(|s| s.is_open() || s.is_closed())
        .await
        .map(|s| s.clone())
        .map_err(|_| anyhow!("channel stopped unexpectedly"))?;
    if let ConnectionState::Closed(reason) = settled {
        bail!("could not open the channel ({reason:?})");
    }

    handle.send(&message)?;
    println!("Call event sent");
    manager.deactivate().await;
    Ok(())
}
