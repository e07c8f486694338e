#![forbid(unsafe_code)]

//! `notice-relay-ctl` — administrative CLI companion for `notice-relay`.
//!
//! Talks to the dashboard backend directly with the same configuration and
//! credentials as the client: sends broadcasts, inspects acknowledgment
//! status and message history, and acknowledges messages by id.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;

use notice_relay::backend::client::BackendClient;
use notice_relay::models::acknowledgment::AckMethod;
use notice_relay::models::message::{MessageId, NewBroadcast, Priority};
use notice_relay::{AppError, GlobalConfig, Result};

#[derive(Debug, Parser)]
#[command(
    name = "notice-relay-ctl",
    about = "Administrative CLI for dashboard notices",
    version,
    long_about = None
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

/// Acknowledgment method accepted on the command line.
#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum CtlAckMethod {
    /// Explicit acknowledgment.
    Button,
    /// Implicit acknowledgment after the presentation timer.
    TimerExpired,
}

impl From<CtlAckMethod> for AckMethod {
    fn from(method: CtlAckMethod) -> Self {
        match method {
            CtlAckMethod::Button => Self::Button,
            CtlAckMethod::TimerExpired => Self::TimerExpired,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Send a broadcast to one or more roles.
    Broadcast {
        /// Message text.
        message: String,
        /// Short label shown as the heading.
        #[arg(long)]
        title: Option<String>,
        /// Recipient role; repeat for several roles.
        #[arg(long = "role", required = true)]
        roles: Vec<String>,
        /// Presentation priority: low, normal, high or urgent.
        #[arg(long, default_value = "normal")]
        priority: Priority,
    },

    /// Show acknowledgment status of a message.
    Status {
        /// Message id.
        id: MessageId,
    },

    /// Deactivate a message so new sessions no longer receive it.
    Deactivate {
        /// Message id.
        id: MessageId,
    },

    /// List message history.
    History,

    /// List messages the current user has not acknowledged.
    Pending,

    /// Acknowledge a message as the current user.
    Ack {
        /// Message id.
        id: MessageId,
        /// Acknowledgment method to record.
        #[arg(long, value_enum, default_value_t = CtlAckMethod::Button)]
        method: CtlAckMethod,
    },

    /// Show the authenticated user.
    Whoami,
}

fn main() {
    let args = Cli::parse();

    let outcome = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))
        .and_then(|runtime| runtime.block_on(run(args)));

    if let Err(err) = outcome {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

async fn run(args: Cli) -> Result<()> {
    let mut config = GlobalConfig::load_from_path(&args.config)?;
    config.load_credentials().await?;
    let client = BackendClient::new(&config.backend, config.credentials.clone())?;

    match args.command {
        Command::Broadcast {
            message,
            title,
            roles,
            priority,
        } => {
            let broadcast = NewBroadcast {
                title,
                message,
                target_roles: roles,
                priority,
            };
            match client.create_broadcast(&broadcast).await? {
                Some(created) => print_json(&created)?,
                None => println!("OK"),
            }
        }
        Command::Status { id } => {
            let status = client.message_status(id).await?;
            print_json(&status)?;
            println!(
                "{}/{} acknowledged ({:.0}%)",
                status.acknowledged_count,
                status.total_recipients,
                status.completion_ratio() * 100.0
            );
        }
        Command::Deactivate { id } => {
            client.deactivate_message(id).await?;
            println!("message {id} deactivated");
        }
        Command::History => print_json(&client.message_history().await?)?,
        Command::Pending => print_json(&client.unacknowledged_messages().await?)?,
        Command::Ack { id, method } => {
            client.acknowledge_message(id, method.into()).await?;
            println!("message {id} acknowledged");
        }
        Command::Whoami => print_json(&client.current_user().await?)?,
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
