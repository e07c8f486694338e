//! Session-owning event loop for notice delivery.
//!
//! [`MessageSession`] owns the [`AckWorkflow`], the
//! [`PresentationController`] and the connection flag. Every mutation
//! arrives as a command on one channel and is handled to completion before
//! the next one, so queue reads and removals never interleave.
//!
//! Network calls, the retry question and timers run in spawned tasks that
//! report back through the same channel. Their results carry the identity
//! generation they were started under and are dropped when it is stale.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::backend::AckBackend;
use crate::config::DeliveryConfig;
use crate::delivery::dedup::Admission;
use crate::models::acknowledgment::AckMethod;
use crate::models::message::{MessageId, MessagePayload};
use crate::models::user::SessionUser;
use crate::policy::routing::{DeliveryRoute, PresentationController};
use crate::{AppError, Result};

use super::presenter::Presenter;
use super::state::{AckRequest, AckWorkflow, WorkflowState};

/// Point-in-time view of a session, published after every command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Workflow state.
    pub state: WorkflowState,
    /// Message presenting or submitting.
    pub current_id: Option<MessageId>,
    /// Waiting message ids in presentation order.
    pub queued_ids: Vec<MessageId>,
    /// Distinct ids admitted this session.
    pub seen_count: usize,
    /// Route of the current identity.
    pub route: DeliveryRoute,
    /// Whether the push channel is connected.
    pub connected: bool,
    /// Number of promotions to the blocking surface this session.
    pub presented_total: u64,
    /// Error of the last failed acknowledgment of the current message.
    pub last_error: Option<String>,
}

impl SessionSnapshot {
    /// Number of waiting messages.
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.queued_ids.len()
    }
}

enum Command {
    Incoming(MessagePayload),
    Acknowledge {
        method: AckMethod,
        expected: Option<MessageId>,
    },
    SetUser(Option<SessionUser>),
    ChannelConnected,
    ChannelDisconnected,
    Resync,
    Snapshot(oneshot::Sender<SessionSnapshot>),
    AckFinished {
        generation: u64,
        message_id: MessageId,
        result: Result<()>,
    },
    RetryDecided {
        generation: u64,
        message_id: MessageId,
        retry: bool,
    },
    RetryDue {
        generation: u64,
        message_id: MessageId,
    },
    BackfillFinished {
        generation: u64,
        result: Result<Vec<MessagePayload>>,
    },
    CooldownElapsed {
        generation: u64,
    },
    PresentationExpired {
        generation: u64,
        message_id: MessageId,
    },
}

/// Cloneable handle to a running [`MessageSession`].
///
/// This is the only way to reach the session's queue and state machine.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<Command>,
    snapshots: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    /// Offer an incoming message; routed by the current identity's role.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidState` if the session has ended.
    pub fn add_message(&self, payload: MessagePayload) -> Result<()> {
        self.send(Command::Incoming(payload))
    }

    /// Acknowledge the message currently presented.
    ///
    /// Ignored when nothing is presenting or a submission is in flight.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidState` if the session has ended.
    pub fn acknowledge(&self, method: AckMethod) -> Result<()> {
        self.send(Command::Acknowledge {
            method,
            expected: None,
        })
    }

    /// Acknowledge `message_id`, but only if it is still the current message.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidState` if the session has ended.
    pub fn acknowledge_message(&self, message_id: MessageId, method: AckMethod) -> Result<()> {
        self.send(Command::Acknowledge {
            method,
            expected: Some(message_id),
        })
    }

    /// Replace the authenticated identity (login, logout, role change).
    ///
    /// A different identity ends the previous delivery session: the queue,
    /// seen ids and current message are dropped.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidState` if the session has ended.
    pub fn set_user(&self, user: Option<SessionUser>) -> Result<()> {
        self.send(Command::SetUser(user))
    }

    /// Report that the push channel (re)connected; triggers a backfill.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidState` if the session has ended.
    pub fn channel_connected(&self) -> Result<()> {
        self.send(Command::ChannelConnected)
    }

    /// Report that the push channel dropped.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidState` if the session has ended.
    pub fn channel_disconnected(&self) -> Result<()> {
        self.send(Command::ChannelDisconnected)
    }

    /// Fetch unacknowledged messages again without a reconnect, e.g. after
    /// push frames were lost. Ignored while disconnected.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidState` if the session has ended.
    pub fn request_backfill(&self) -> Result<()> {
        self.send(Command::Resync)
    }

    /// Snapshot taken after every command queued before this call.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidState` if the session has ended.
    pub async fn snapshot(&self) -> Result<SessionSnapshot> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(Command::Snapshot(reply_tx))?;
        reply_rx
            .await
            .map_err(|_| AppError::InvalidState("session ended before replying".into()))
    }

    /// Receiver that observes every published snapshot.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }

    fn send(&self, command: Command) -> Result<()> {
        self.tx
            .send(command)
            .map_err(|_| AppError::InvalidState("message session has ended".into()))
    }
}

/// Session controller owning the queue, seen ids and state machine.
pub struct MessageSession {
    config: DeliveryConfig,
    backend: Arc<dyn AckBackend>,
    presenter: Arc<dyn Presenter>,
    controller: PresentationController,
    workflow: AckWorkflow,
    generation: u64,
    connected: bool,
    presented_total: u64,
    commands: mpsc::WeakUnboundedSender<Command>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    cancel: CancellationToken,
}

impl MessageSession {
    /// Spawn the session loop and return a handle to it.
    ///
    /// The loop runs until `cancel` fires or every handle is dropped. The
    /// session starts with no identity; call [`SessionHandle::set_user`].
    #[must_use]
    pub fn spawn(
        config: DeliveryConfig,
        backend: Arc<dyn AckBackend>,
        presenter: Arc<dyn Presenter>,
        cancel: CancellationToken,
    ) -> (SessionHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::default());

        let session = Self {
            config,
            backend,
            presenter,
            controller: PresentationController::default(),
            workflow: AckWorkflow::new(),
            generation: 0,
            connected: false,
            presented_total: 0,
            commands: tx.downgrade(),
            snapshot_tx,
            cancel,
        };

        let task = tokio::spawn(session.run(rx).instrument(info_span!("message_session")));
        (
            SessionHandle {
                tx,
                snapshots: snapshot_rx,
            },
            task,
        )
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        loop {
            let command = tokio::select! {
                () = self.cancel.cancelled() => {
                    info!("message session cancelled");
                    break;
                }
                maybe = rx.recv() => {
                    if let Some(command) = maybe { command } else {
                        info!("all session handles dropped");
                        break;
                    }
                }
            };

            self.handle(command).await;
            self.advance().await;
            self.snapshot_tx.send_replace(self.snapshot());
        }

        if let Some(abandoned) = self.workflow.reset() {
            info!(message_id = abandoned.id, "session ended with message unacknowledged");
        }
        self.snapshot_tx.send_replace(self.snapshot());
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Incoming(payload) => self.on_incoming(payload).await,
            Command::Acknowledge { method, expected } => {
                if expected.is_some() && expected != self.workflow.current_id() {
                    debug!(?expected, "acknowledgment for a message that is no longer current");
                    return;
                }
                if self.workflow.state() == WorkflowState::Presenting {
                    self.workflow.clear_failures();
                }
                self.submit(method);
            }
            Command::SetUser(user) => self.on_user_changed(user).await,
            Command::ChannelConnected => {
                info!("push channel connected");
                self.connected = true;
                self.start_backfill();
            }
            Command::ChannelDisconnected => {
                info!("push channel disconnected; delivery resumes on reconnect");
                self.connected = false;
            }
            Command::Resync => {
                if self.connected {
                    info!("resynchronising with the backend");
                    self.start_backfill();
                } else {
                    debug!("resync skipped while disconnected");
                }
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            Command::AckFinished {
                generation,
                message_id,
                result,
            } => {
                if self.is_current_generation(generation) {
                    self.on_ack_finished(message_id, result).await;
                }
            }
            Command::RetryDecided {
                generation,
                message_id,
                retry,
            } => {
                if self.is_current_generation(generation) {
                    self.on_retry_decided(message_id, retry);
                }
            }
            Command::RetryDue {
                generation,
                message_id,
            } => {
                if self.is_current_generation(generation) && self.is_presenting(message_id) {
                    let method = self.workflow.last_method().unwrap_or(AckMethod::Button);
                    self.submit(method);
                }
            }
            Command::BackfillFinished { generation, result } => {
                if self.is_current_generation(generation) {
                    self.on_backfill_finished(result);
                }
            }
            Command::CooldownElapsed { generation } => {
                if self.is_current_generation(generation) {
                    self.workflow.end_cooldown();
                }
            }
            Command::PresentationExpired {
                generation,
                message_id,
            } => {
                if self.is_current_generation(generation) && self.is_presenting(message_id) {
                    info!(message_id, "presentation timer expired");
                    self.submit(AckMethod::TimerExpired);
                }
            }
        }
    }

    async fn on_incoming(&mut self, payload: MessagePayload) {
        match self.controller.route() {
            DeliveryRoute::Queue => match self.workflow.admit(payload) {
                Admission::Queued(_) | Admission::Malformed => {}
                Admission::Duplicate(id) => debug!(message_id = id, "duplicate delivery ignored"),
                Admission::Inactive(id) => debug!(message_id = id, "inactive message ignored"),
            },
            DeliveryRoute::Refresh => {
                debug!(message_id = ?payload.id, "refreshing message views");
                self.presenter.refresh_message_views().await;
            }
            DeliveryRoute::Ignore => {
                debug!(message_id = ?payload.id, "no delivery route for current identity");
            }
        }
    }

    async fn on_user_changed(&mut self, user: Option<SessionUser>) {
        if !self.controller.set_user(user) {
            return;
        }

        self.generation += 1;
        if let Some(abandoned) = self.workflow.reset() {
            self.presenter.dismiss(abandoned.id).await;
        }
        if self.connected {
            self.start_backfill();
        }
    }

    async fn on_ack_finished(&mut self, message_id: MessageId, result: Result<()>) {
        match result {
            Ok(()) => match self.workflow.complete_submit(message_id) {
                Ok(message) => {
                    self.presenter.dismiss(message.id).await;
                    self.schedule_cooldown();
                }
                Err(err) => warn!(message_id, %err, "unexpected acknowledgment result"),
            },
            Err(error) => {
                if let Err(err) = self.workflow.fail_submit(message_id, &error) {
                    warn!(message_id, %err, "unexpected acknowledgment failure");
                    return;
                }
                if self.retry_prompt_allowed() {
                    self.ask_retry(error);
                } else {
                    info!(
                        message_id,
                        failures = self.workflow.failures(),
                        "retry prompt limit reached; message stays presented"
                    );
                }
            }
        }
    }

    fn on_retry_decided(&mut self, message_id: MessageId, retry: bool) {
        if !self.is_presenting(message_id) {
            debug!(message_id, "retry decision for a message that is no longer presenting");
            return;
        }

        if retry {
            let generation = self.generation;
            let delay = self.config.retry_delay();
            debug!(message_id, ?delay, "retrying acknowledgment");
            self.spawn_report(async move {
                tokio::time::sleep(delay).await;
                Command::RetryDue {
                    generation,
                    message_id,
                }
            });
        } else {
            info!(message_id, "retry declined; message stays presented");
        }
    }

    fn on_backfill_finished(&mut self, result: Result<Vec<MessagePayload>>) {
        let payloads = match result {
            Ok(payloads) => payloads,
            Err(err) => {
                warn!(%err, "backfill failed; will retry on next reconnect");
                return;
            }
        };

        if !self.controller.blocking_enabled() {
            return;
        }

        let total = payloads.len();
        let queued = payloads
            .into_iter()
            .map(|payload| self.workflow.admit(payload))
            .filter(|admission| admission.is_queued())
            .count();
        info!(total, queued, "backfill merged");
    }

    /// `Idle → Presenting` if possible, then render.
    async fn advance(&mut self) {
        if !self.controller.blocking_enabled() {
            return;
        }
        let Some(message) = self.workflow.try_promote().cloned() else {
            return;
        };

        self.presented_total += 1;
        self.presenter.present(&message).await;

        if let Some(after) = self.config.auto_acknowledge_after() {
            let generation = self.generation;
            let message_id = message.id;
            self.spawn_report(async move {
                tokio::time::sleep(after).await;
                Command::PresentationExpired {
                    generation,
                    message_id,
                }
            });
        }
    }

    fn submit(&mut self, method: AckMethod) {
        match self.workflow.begin_submit(method) {
            Ok(request) => self.spawn_submission(request),
            Err(err) => debug!(%err, "acknowledgment not submitted"),
        }
    }

    fn spawn_submission(&self, request: AckRequest) {
        info!(
            message_id = request.message_id,
            method = request.method.as_str(),
            attempt = request.attempt,
            "submitting acknowledgment"
        );
        let backend = Arc::clone(&self.backend);
        let generation = self.generation;
        self.spawn_report(async move {
            let result = backend.acknowledge(request.message_id, request.method).await;
            Command::AckFinished {
                generation,
                message_id: request.message_id,
                result,
            }
        });
    }

    fn ask_retry(&self, error: AppError) {
        let Some(message) = self.workflow.current().cloned() else {
            return;
        };
        let presenter = Arc::clone(&self.presenter);
        let generation = self.generation;
        self.spawn_report(async move {
            let retry = presenter.confirm_retry(&message, &error).await;
            Command::RetryDecided {
                generation,
                message_id: message.id,
                retry,
            }
        });
    }

    fn start_backfill(&self) {
        if !self.controller.blocking_enabled() {
            return;
        }
        debug!("fetching unacknowledged messages");
        let backend = Arc::clone(&self.backend);
        let generation = self.generation;
        self.spawn_report(async move {
            let result = backend.fetch_unacknowledged().await;
            Command::BackfillFinished { generation, result }
        });
    }

    fn schedule_cooldown(&mut self) {
        let delay = self.config.post_ack_delay();
        if delay.is_zero() {
            self.workflow.end_cooldown();
            return;
        }
        let generation = self.generation;
        self.spawn_report(async move {
            tokio::time::sleep(delay).await;
            Command::CooldownElapsed { generation }
        });
    }

    fn retry_prompt_allowed(&self) -> bool {
        self.config
            .max_retry_prompts
            .is_none_or(|max| self.workflow.failures() <= max)
    }

    fn is_current_generation(&self, generation: u64) -> bool {
        if generation == self.generation {
            true
        } else {
            debug!(generation, current = self.generation, "dropping stale result");
            false
        }
    }

    fn is_presenting(&self, message_id: MessageId) -> bool {
        self.workflow.state() == WorkflowState::Presenting
            && self.workflow.current_id() == Some(message_id)
    }

    /// Run `work` in its own task and feed its command back into the loop.
    fn spawn_report<F>(&self, work: F)
    where
        F: Future<Output = Command> + Send + 'static,
    {
        let commands = self.commands.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let command = tokio::select! {
                () = cancel.cancelled() => return,
                command = work => command,
            };
            if let Some(tx) = commands.upgrade() {
                let _ = tx.send(command);
            }
        });
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.workflow.state(),
            current_id: self.workflow.current_id(),
            queued_ids: self.workflow.inbox().queued_ids(),
            seen_count: self.workflow.inbox().seen_count(),
            route: self.controller.route(),
            connected: self.connected,
            presented_total: self.presented_total,
            last_error: self.workflow.last_error().map(str::to_owned),
        }
    }
}
