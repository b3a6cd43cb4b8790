//! Message contracts.
//!
//! Three message shapes flow through the mediator: requests with a typed
//! response, notifications (fan-out, no response), and streaming requests
//! whose response is a lazy sequence. A message's runtime type is fixed at
//! creation and never reinterpreted as a different shape.

use std::pin::Pin;

use futures_util::Stream;

/// A request expecting a typed response from exactly one handler.
///
/// Requests that carry no meaningful response use `type Response = ()`. The
/// unit type is a concrete, always-equal singleton, which lets both request
/// shapes share a single dispatch path.
pub trait Request: Send + Sync + 'static {
    /// Response produced by the bound handler.
    type Response: Send + 'static;
}

/// A notification observed by zero or more handlers. Produces no response.
pub trait Notification: Send + Sync + 'static {}

/// A request whose response is a lazy sequence of items rather than a single
/// value.
pub trait StreamRequest: Send + Sync + 'static {
    /// Item type emitted by the response sequence.
    type Item: Send + 'static;
}

/// Lazy response sequence produced by a stream handler.
///
/// Failures reach the consumer as terminal `Err` items: a partially consumed
/// stream cannot be retroactively replaced by a single substituted value.
pub type ResponseStream<T> = Pin<Box<dyn Stream<Item = anyhow::Result<T>> + Send>>;
