#![forbid(unsafe_code)]

//! `notice-relay` — terminal client for dashboard notices.
//!
//! Loads configuration and credentials, resolves the signed-in user,
//! connects the push channel and runs the blocking acknowledgment session
//! against the terminal.

use std::io::Stdout;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use notice_relay::backend::client::BackendClient;
use notice_relay::backend::AckBackend;
use notice_relay::console::{render_status, LineAction, TerminalPresenter};
use notice_relay::models::acknowledgment::AckMethod;
use notice_relay::realtime::{
    spawn_reconnect_sync, LagCallback, MessageCallback, PushChannel, RealtimeListener,
    WsPushChannel,
};
use notice_relay::workflow::{MessageSession, Presenter, SessionHandle};
use notice_relay::{AppError, GlobalConfig, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "notice-relay", about = "Terminal client for dashboard notices", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

type Console = TerminalPresenter<Stdout>;

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("notice-relay bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = GlobalConfig::load_from_path(&args.config)?;
    config.load_credentials().await?;
    info!("configuration loaded");

    let client = Arc::new(BackendClient::new(&config.backend, config.credentials.clone())?);

    // ── Resolve identity ────────────────────────────────
    let user = match config.user.clone() {
        Some(user) => user,
        None => client.current_user().await?,
    };
    info!(user_id = %user.id, role = %user.role, "signed in");

    // ── Start the session ───────────────────────────────
    let ct = CancellationToken::new();
    let console = Arc::new(Console::new(std::io::stdout()));
    let backend: Arc<dyn AckBackend> = client.clone();
    let presenter: Arc<dyn Presenter> = console.clone();
    let (session, session_task) =
        MessageSession::spawn(config.delivery.clone(), backend, presenter, ct.clone());
    session.set_user(Some(user.clone()))?;

    // ── Push channel ────────────────────────────────────
    let (user_tx, user_rx) = watch::channel(Some(user));
    let hub = PushChannel::default();

    let inbound = session.clone();
    let callback: MessageCallback = Arc::new(move |payload| {
        if let Err(err) = inbound.add_message(payload) {
            warn!(%err, "dropping push message");
        }
    });
    let resync = session.clone();
    let on_lagged: LagCallback = Arc::new(move |_skipped| {
        if let Err(err) = resync.request_backfill() {
            warn!(%err, "backfill after lag not requested");
        }
    });
    let listener = RealtimeListener::new(hub.clone(), user_rx, callback)
        .on_lagged(on_lagged)
        .spawn(&ct);
    let reconnect_task = spawn_reconnect_sync(hub.watch_status(), session.clone(), ct.clone());
    let socket_task = WsPushChannel::new(config.backend.socket_url.clone(), hub, &config.channel)
        .with_tokens(Arc::clone(client.tokens()))
        .spawn(ct.clone());

    let input_task = spawn_input(console, session, ct.clone());
    info!("notice-relay ready");

    // ── Wait for shutdown ───────────────────────────────
    tokio::select! {
        () = shutdown_signal() => info!("shutdown signal received"),
        () = ct.cancelled() => info!("quit requested"),
    }
    ct.cancel();

    listener.shutdown().await;
    let _ = tokio::join!(session_task, reconnect_task, socket_task, input_task);
    drop(user_tx);
    info!("notice-relay shut down");

    Ok(())
}

/// Read user input from stdin and forward it to the session.
fn spawn_input(console: Arc<Console>, session: SessionHandle, ct: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let line = tokio::select! {
                () = ct.cancelled() => break,
                line = lines.next_line() => line,
            };
            let line = match line {
                Ok(Some(line)) => line,
                Ok(None) => {
                    info!("stdin closed; notices can no longer be acknowledged here");
                    break;
                }
                Err(err) => {
                    warn!(%err, "stdin read failed");
                    break;
                }
            };

            match console.handle_line(&line).await {
                LineAction::Acknowledge => {
                    if let Err(err) = session.acknowledge(AckMethod::Button) {
                        warn!(%err, "acknowledgment not delivered");
                        break;
                    }
                }
                LineAction::Status => match session.snapshot().await {
                    Ok(snapshot) => console.write(&render_status(&snapshot)).await,
                    Err(err) => {
                        warn!(%err, "status unavailable");
                        break;
                    }
                },
                LineAction::Quit => {
                    ct.cancel();
                    break;
                }
                LineAction::RetryAnswered(_) | LineAction::Unknown(_) => {}
            }
        }
    })
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // Logs go to stderr so they do not interleave with rendered notices.
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
