//! Worker-side platform capability consumed by the pipeline.
//!
//! The controller never speaks the chat platform's wire protocol; it
//! drives each session's worker through this narrow interface. The
//! flow-control methods are part of the contract: when a session's
//! event channel fills, the worker is told to pause polling until the
//! pipeline drains.

pub mod http;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;

use crate::models::worker::Worker;
use crate::Result;

/// Boxed future alias for object-safe async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Receipt returned by a successful outbound send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendReceipt {
    /// Platform message id of the forwarded copy.
    pub forwarded_msg_id: i64,
}

/// Interface between the controller and the worker holding a platform
/// session.
///
/// Implementations classify failures into
/// [`AppError::PlatformTransient`](crate::AppError::PlatformTransient)
/// (retried with backoff) and
/// [`AppError::PlatformPermanent`](crate::AppError::PlatformPermanent)
/// (surfaced immediately).
pub trait PlatformClient: Send + Sync {
    /// Start a platform session on the worker from its auth blob.
    ///
    /// # Errors
    ///
    /// `PlatformPermanent` when the platform rejects the credentials;
    /// `PlatformTransient` for connectivity failures.
    fn start_session(&self, session_id: &str, auth_blob: Bytes) -> BoxFuture<'_, Result<()>>;

    /// Stop a running session on the worker.
    ///
    /// # Errors
    ///
    /// `PlatformTransient` for connectivity failures.
    fn stop_session(&self, session_id: &str) -> BoxFuture<'_, Result<()>>;

    /// Send a rendered message into a destination chat.
    ///
    /// # Errors
    ///
    /// `PlatformTransient`/`PlatformPermanent` per failure class.
    fn send(&self, destination_chat_id: i64, payload: &str) -> BoxFuture<'_, Result<SendReceipt>>;

    /// Edit a previously forwarded message in place.
    ///
    /// # Errors
    ///
    /// `PlatformTransient`/`PlatformPermanent` per failure class.
    fn edit(
        &self,
        destination_chat_id: i64,
        forwarded_msg_id: i64,
        payload: &str,
    ) -> BoxFuture<'_, Result<()>>;

    /// Delete a previously forwarded message.
    ///
    /// # Errors
    ///
    /// `PlatformTransient`/`PlatformPermanent` per failure class.
    fn delete(&self, destination_chat_id: i64, forwarded_msg_id: i64) -> BoxFuture<'_, Result<()>>;

    /// Flow control: stop polling platform updates for a session.
    ///
    /// # Errors
    ///
    /// `PlatformTransient` for connectivity failures.
    fn pause_updates(&self, session_id: &str) -> BoxFuture<'_, Result<()>>;

    /// Flow control: resume polling platform updates for a session.
    ///
    /// # Errors
    ///
    /// `PlatformTransient` for connectivity failures.
    fn resume_updates(&self, session_id: &str) -> BoxFuture<'_, Result<()>>;
}

/// Resolves the client used to reach a given worker.
///
/// Production wires the HTTP provider; tests substitute recording
/// fakes.
pub trait ClientProvider: Send + Sync {
    /// A client bound to `worker`'s address and auth token.
    fn client_for(&self, worker: &Worker) -> Arc<dyn PlatformClient>;
}
