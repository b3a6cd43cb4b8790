//! sluice: in-process message dispatch.
//!
//! A mediator decouples message producers from the code that services them.
//! Callers hand a message to the [`Mediator`]; it resolves the registered
//! handler(s) for the message's concrete type and runs them, with an
//! interception pipeline around single-handler dispatch.
//!
//! Three message shapes are supported:
//!
//! - [`Request`]: one handler, one typed response, wrapped by
//!   [behaviors](PipelineBehavior), pre/post-processors, and typed
//!   [exception recovery](ExceptionHandler).
//! - [`Notification`]: zero or more handlers, no response, fanned out by a
//!   pluggable [`NotificationPublisher`].
//! - [`StreamRequest`]: one handler producing a lazy [`ResponseStream`] of
//!   items.
//!
//! All wiring happens up front on the [`MediatorBuilder`]; the built mediator
//! is an immutable, cheaply cloneable handle.
//!
//! ```
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use sluice::{CancellationToken, Mediator, Request, RequestHandler};
//!
//! struct Ping {
//!     label: &'static str,
//! }
//!
//! impl Request for Ping {
//!     type Response = String;
//! }
//!
//! struct PingHandler;
//!
//! #[async_trait]
//! impl RequestHandler for PingHandler {
//!     type Request = Ping;
//!
//!     async fn handle(
//!         &self,
//!         request: Arc<Ping>,
//!         _cancel: CancellationToken,
//!     ) -> anyhow::Result<String> {
//!         Ok(format!("{} pong", request.label))
//!     }
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> sluice::Result<()> {
//! let mediator = Mediator::builder()
//!     .register_request_handler(PingHandler)
//!     .build()?;
//!
//! let response = mediator.send(Ping { label: "ping" }).await?;
//! assert_eq!(response, "ping pong");
//! # Ok(())
//! # }
//! ```

pub mod behaviors;
mod config;
mod error;
mod handler;
mod mediator;
mod message;
mod pipeline;
mod publish;
mod recovery;
mod registry;
mod strategy;

pub use config::{ExceptionActionStrategy, MediatorConfig};
pub use error::{Error, Result};
pub use handler::{NotificationHandler, RequestHandler, StreamRequestHandler};
pub use mediator::{Mediator, MediatorBuilder};
pub use message::{Notification, Request, ResponseStream, StreamRequest};
pub use pipeline::{
    Next, PipelineBehavior, PostProcessor, PreProcessor, StreamBehavior, StreamNext,
};
pub use publish::{
    ConcurrentPublisher, NotificationExecutor, NotificationPublisher, SequentialPublisher,
};
pub use recovery::{ExceptionAction, ExceptionHandler, ExceptionState};
pub use strategy::{BoxedItemStream, BoxedMessage, BoxedNotification, BoxedResponse};

// Cancellation rides on the same token type the async ecosystem uses, so
// callers can wire mediator dispatch into an existing shutdown tree.
pub use tokio_util::sync::CancellationToken;
