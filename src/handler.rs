//! Handler contracts.
//!
//! A handler is bound to exactly one message type, expressed through the
//! associated type on each trait. Handler instances are owned by the
//! registry; the dispatch core resolves one per invocation and never caches
//! instances across calls, so transient (factory-registered) handlers may
//! carry per-call state.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::message::{Notification, Request, ResponseStream, StreamRequest};

/// Business logic bound to one request type.
///
/// Errors returned here are business failures: the mediator offers them to
/// registered exception handlers before propagating them unchanged.
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    /// Request type this handler services.
    type Request: Request;

    /// Handle the request and produce its response.
    ///
    /// The cancellation signal is the caller's; observe it at suspension
    /// points and abort cooperatively. No partial-result rollback is
    /// attempted on cancellation.
    async fn handle(
        &self,
        request: Arc<Self::Request>,
        cancel: CancellationToken,
    ) -> anyhow::Result<<Self::Request as Request>::Response>;
}

/// Business logic producing a lazy response sequence for one stream request
/// type.
pub trait StreamRequestHandler: Send + Sync + 'static {
    /// Stream request type this handler services.
    type Request: StreamRequest;

    /// Open the response sequence. Production should stop promptly once the
    /// cancellation signal fires; the mediator additionally truncates the
    /// outermost stream on cancellation.
    fn handle(
        &self,
        request: Arc<Self::Request>,
        cancel: CancellationToken,
    ) -> ResponseStream<<Self::Request as StreamRequest>::Item>;
}

/// An observer of one notification type. Many handlers may be registered for
/// the same notification.
#[async_trait]
pub trait NotificationHandler: Send + Sync + 'static {
    /// Notification type this handler observes.
    type Notification: Notification;

    /// Observe the notification. Failure semantics depend on the configured
    /// publisher strategy (fail-fast for sequential, aggregated for
    /// concurrent).
    async fn handle(
        &self,
        notification: Arc<Self::Notification>,
        cancel: CancellationToken,
    ) -> anyhow::Result<()>;
}
