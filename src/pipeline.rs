//! Pipeline contracts: behaviors wrapping the handler invocation, and the
//! pre/post-processor hooks that run outside the behavior chain.
//!
//! A behavior receives the request and a [`Next`] continuation representing
//! the rest of the chain. Consuming the continuation enforces the invocation
//! contract statically: a behavior can forward at most once, and skipping the
//! call (dropping `next`) is a deliberate short-circuit.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::message::{Request, ResponseStream, StreamRequest};

/// Continuation for the remainder of a value pipeline. The final link invokes
/// the handler itself.
pub struct Next<Resp> {
    inner: Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, anyhow::Result<Resp>> + Send>,
}

impl<Resp> Next<Resp> {
    pub(crate) fn new<F, Fut>(f: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<Resp>> + Send + 'static,
    {
        Self {
            inner: Box::new(move |cancel| Box::pin(f(cancel))),
        }
    }

    /// Invoke the rest of the chain. Consumes the continuation, so a behavior
    /// cannot re-enter the handler.
    pub async fn run(self, cancel: CancellationToken) -> anyhow::Result<Resp> {
        (self.inner)(cancel).await
    }
}

/// Continuation for the remainder of a stream pipeline.
pub struct StreamNext<T> {
    inner: Box<dyn FnOnce(CancellationToken) -> ResponseStream<T> + Send>,
}

impl<T> StreamNext<T> {
    pub(crate) fn new<F>(f: F) -> Self
    where
        F: FnOnce(CancellationToken) -> ResponseStream<T> + Send + 'static,
    {
        Self { inner: Box::new(f) }
    }

    /// Open the rest of the chain's response sequence. Consumes the
    /// continuation.
    pub fn run(self, cancel: CancellationToken) -> ResponseStream<T> {
        (self.inner)(cancel)
    }
}

/// An interceptor wrapping the handler invocation for one request type.
///
/// Behaviors compose in registration order: the first-registered behavior is
/// the outermost wrapper. Each behavior decides independently whether and
/// when to invoke `next`, so a behavior may short-circuit (e.g. return a
/// cached value) without the handler ever running.
#[async_trait]
pub trait PipelineBehavior<R: Request>: Send + Sync {
    /// Perform any additional work and await `next` as necessary. The value
    /// returned becomes the response observed by the wrapping layer.
    async fn handle(
        &self,
        request: Arc<R>,
        next: Next<R::Response>,
        cancel: CancellationToken,
    ) -> anyhow::Result<R::Response>;
}

/// An interceptor wrapping a sequence-producing continuation for one stream
/// request type. May transform, filter, or prepend/append emitted items.
pub trait StreamBehavior<R: StreamRequest>: Send + Sync {
    /// Wrap the rest of the stream chain.
    fn handle(
        &self,
        request: Arc<R>,
        next: StreamNext<R::Item>,
        cancel: CancellationToken,
    ) -> ResponseStream<R::Item>;
}

/// A hook invoked before the handler (and before the behavior chain) for one
/// request type. Observes the request without replacing it; a failure here
/// aborts the dispatch before the handler runs and goes to exception
/// recovery.
#[async_trait]
pub trait PreProcessor<R: Request>: Send + Sync {
    async fn process(&self, request: &R, cancel: &CancellationToken) -> anyhow::Result<()>;
}

/// A hook invoked after a successful handler invocation for one request type.
/// Observes request and response; side effects are fine, replacing the
/// response is not.
#[async_trait]
pub trait PostProcessor<R: Request>: Send + Sync {
    async fn process(
        &self,
        request: &R,
        response: &R::Response,
        cancel: &CancellationToken,
    ) -> anyhow::Result<()>;
}
