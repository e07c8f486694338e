//! Rendering seam for the blocking acknowledgment surface.
//!
//! The [`Presenter`] trait decouples the session loop from whatever shows
//! notices to the user (terminal, desktop shell, test double).

use std::future::Future;
use std::pin::Pin;

use crate::models::message::{Message, MessageId};
use crate::AppError;

/// Boxed future returned by [`Presenter`] methods.
pub type PresenterFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Surface that renders notices and asks the user for decisions.
///
/// `present`, `dismiss` and `refresh_message_views` are awaited inside the
/// session loop and must return promptly; `confirm_retry` runs in its own
/// task and may wait on the user for as long as it takes.
pub trait Presenter: Send + Sync {
    /// Show `message` blocking until it is dismissed.
    fn present<'a>(&'a self, message: &'a Message) -> PresenterFuture<'a, ()>;

    /// Remove the blocking surface for an acknowledged or abandoned message.
    fn dismiss(&self, message_id: MessageId) -> PresenterFuture<'_, ()>;

    /// Tell the user an acknowledgment failed and ask whether to retry.
    ///
    /// Resolves to `true` when the user wants another attempt.
    fn confirm_retry<'a>(
        &'a self,
        message: &'a Message,
        error: &'a AppError,
    ) -> PresenterFuture<'a, bool>;

    /// Invalidate cached message-list views (non-blocking roles).
    fn refresh_message_views(&self) -> PresenterFuture<'_, ()>;
}
