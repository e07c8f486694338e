//! Backend REST API access.
//!
//! The [`AckBackend`] trait is the slice of the API the delivery session
//! depends on; [`client::BackendClient`] implements it over HTTP together
//! with the administrative endpoints.

pub mod auth;
pub mod client;

use std::future::Future;
use std::pin::Pin;

use crate::models::acknowledgment::AckMethod;
use crate::models::message::{MessageId, MessagePayload};
use crate::Result;

/// Boxed future returned by [`AckBackend`] methods.
pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Backend operations used by the acknowledgment workflow.
pub trait AckBackend: Send + Sync {
    /// Messages the current user has not acknowledged yet.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Http`](crate::AppError::Http) or
    /// [`AppError::Unauthorized`](crate::AppError::Unauthorized) when the
    /// request fails.
    fn fetch_unacknowledged(&self) -> BackendFuture<'_, Vec<MessagePayload>>;

    /// Record the current user's acknowledgment of `message_id`.
    ///
    /// Idempotent on the backend: re-submitting is safe.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Http`](crate::AppError::Http) on transport or
    /// server failure and [`AppError::NotFound`](crate::AppError::NotFound)
    /// for an unknown message.
    fn acknowledge(&self, message_id: MessageId, method: AckMethod) -> BackendFuture<'_, ()>;
}
