//! Terminal rendering of the blocking notice surface.
//!
//! [`TerminalPresenter`] prints each promoted notice as a framed block and
//! reads the user's answers line by line from whatever drives
//! [`TerminalPresenter::handle_line`] (stdin in the binary, strings in
//! tests).

use std::io::Write;

use tokio::sync::{oneshot, Mutex};
use tracing::{debug, warn};

use crate::models::message::{Message, MessageId, Priority};
use crate::workflow::presenter::{Presenter, PresenterFuture};
use crate::workflow::SessionSnapshot;
use crate::AppError;

/// What the caller should do with a line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineAction {
    /// Acknowledge the presented notice.
    Acknowledge,
    /// A pending retry question was answered.
    RetryAnswered(bool),
    /// Print the session status.
    Status,
    /// Leave the client.
    Quit,
    /// Input not understood; help was printed.
    Unknown(String),
}

/// Marker shown before the heading.
#[must_use]
pub fn priority_marker(priority: Priority) -> &'static str {
    match priority {
        Priority::Urgent => "[!!! URGENT]",
        Priority::High => "[! HIGH]",
        Priority::Normal => "[NOTICE]",
        Priority::Low => "[FYI]",
    }
}

/// Render a notice as a framed terminal block.
#[must_use]
pub fn render_notice(message: &Message) -> String {
    let heading = format!("{} {}", priority_marker(message.priority), message.heading());
    let rule = "=".repeat(heading.chars().count().clamp(24, 72));

    let mut block = format!("\n{rule}\n{heading}\n{rule}\n");
    let mut byline = format!("from {} ({})", message.sender.name, message.sender.role);
    if let Some(created_at) = message.created_at {
        byline.push_str(&format!(" at {}", created_at.format("%Y-%m-%d %H:%M UTC")));
    }
    block.push_str(&byline);
    block.push_str("\n\n");
    block.push_str(message.body.trim_end());
    block.push_str(&format!(
        "\n\n{rule}\npress Enter to acknowledge (message #{})\n",
        message.id
    ));
    block
}

/// One-line summary of a session snapshot for the `status` command.
#[must_use]
pub fn render_status(snapshot: &SessionSnapshot) -> String {
    let current = snapshot
        .current_id
        .map_or_else(|| "none".to_owned(), |id| format!("#{id}"));
    let mut line = format!(
        "state={} current={current} queued={} seen={} route={} connected={} presented={}",
        snapshot.state,
        snapshot.queue_len(),
        snapshot.seen_count,
        snapshot.route.as_str(),
        snapshot.connected,
        snapshot.presented_total,
    );
    if let Some(err) = &snapshot.last_error {
        line.push_str(&format!(" last_error=\"{err}\""));
    }
    line.push('\n');
    line
}

/// [`Presenter`] writing to a terminal-like sink.
pub struct TerminalPresenter<W> {
    out: Mutex<W>,
    current: Mutex<Option<MessageId>>,
    pending_retry: Mutex<Option<oneshot::Sender<bool>>>,
}

impl<W: Write + Send> TerminalPresenter<W> {
    /// Presenter writing to `out`.
    #[must_use]
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
            current: Mutex::new(None),
            pending_retry: Mutex::new(None),
        }
    }

    /// Message currently shown, if any.
    pub async fn current(&self) -> Option<MessageId> {
        *self.current.lock().await
    }

    /// Whether a retry question is waiting for an answer.
    pub async fn awaiting_retry_answer(&self) -> bool {
        self.pending_retry.lock().await.is_some()
    }

    /// Interpret one line of user input.
    ///
    /// While a retry question is pending, the line answers it (`y`, `yes` or
    /// an empty line retries, anything else declines).
    pub async fn handle_line(&self, line: &str) -> LineAction {
        let input = line.trim().to_ascii_lowercase();

        if let Some(answer_tx) = self.pending_retry.lock().await.take() {
            let retry = matches!(input.as_str(), "" | "y" | "yes" | "r" | "retry");
            if answer_tx.send(retry).is_err() {
                debug!("retry question was withdrawn before the answer");
            }
            return LineAction::RetryAnswered(retry);
        }

        match input.as_str() {
            "" | "a" | "ack" | "ok" => LineAction::Acknowledge,
            "s" | "status" => LineAction::Status,
            "q" | "quit" | "exit" => LineAction::Quit,
            _ => {
                self.write("commands: <Enter>/ack, status, quit\n").await;
                LineAction::Unknown(input)
            }
        }
    }

    /// Drop an unanswered retry question; the asking side sees a decline.
    async fn withdraw_retry_question(&self) {
        if self.pending_retry.lock().await.take().is_some() {
            debug!("retry question withdrawn");
        }
    }

    /// Write raw text to the sink.
    pub async fn write(&self, text: &str) {
        let mut out = self.out.lock().await;
        if let Err(err) = out.write_all(text.as_bytes()).and_then(|()| out.flush()) {
            warn!(%err, "terminal write failed");
        }
    }

    /// Give back the sink (tests inspect what was written).
    #[must_use]
    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }
}

impl<W: Write + Send> Presenter for TerminalPresenter<W> {
    fn present<'a>(&'a self, message: &'a Message) -> PresenterFuture<'a, ()> {
        Box::pin(async move {
            self.withdraw_retry_question().await;
            *self.current.lock().await = Some(message.id);
            self.write(&render_notice(message)).await;
        })
    }

    fn dismiss(&self, message_id: MessageId) -> PresenterFuture<'_, ()> {
        Box::pin(async move {
            self.withdraw_retry_question().await;
            let mut current = self.current.lock().await;
            if *current == Some(message_id) {
                *current = None;
                drop(current);
                self.write(&format!("message #{message_id} acknowledged\n"))
                    .await;
            }
        })
    }

    fn confirm_retry<'a>(
        &'a self,
        message: &'a Message,
        error: &'a AppError,
    ) -> PresenterFuture<'a, bool> {
        Box::pin(async move {
            let (answer_tx, answer_rx) = oneshot::channel();
            *self.pending_retry.lock().await = Some(answer_tx);
            self.write(&format!(
                "could not acknowledge message #{}: {error}\nretry? [Y/n] ",
                message.id
            ))
            .await;
            // A dropped sender (presenter torn down) counts as a decline.
            answer_rx.await.unwrap_or(false)
        })
    }

    fn refresh_message_views(&self) -> PresenterFuture<'_, ()> {
        Box::pin(async move {
            self.write("new message activity; message list refreshed\n")
                .await;
        })
    }
}
