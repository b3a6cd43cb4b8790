//! Per-request-type dispatch strategies.
//!
//! A strategy snapshots nothing: it re-reads the registry's behavior and
//! processor lists on every call, so it carries only the request's type name.
//! What makes it worth caching is the monomorphized code path behind it: the
//! first dispatch of a request type builds the strategy, later dispatches
//! reuse it through a lock-free map lookup.
//!
//! The erased entries at the bottom are the bridge for dynamically-typed call
//! sites: each one closes over a concrete request type at registration time
//! and runs the identical typed pipeline after a single downcast.

use std::any::{Any, TypeId, type_name};
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

use dashmap::DashMap;
use futures_util::future::BoxFuture;
use futures_util::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::ExceptionActionStrategy;
use crate::error::{Error, Result};
use crate::handler::RequestHandler;
use crate::mediator::Shared;
use crate::message::{Notification, Request, ResponseStream, StreamRequest};
use crate::pipeline::{Next, StreamNext};
use crate::publish::NotificationStrategy;
use crate::recovery::ExceptionState;

// ============================================================================
// Strategy Cache
// ============================================================================

/// Lock-free cache of built strategies, keyed by the message's `TypeId`.
pub(crate) struct StrategyCache {
    entries: DashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl StrategyCache {
    pub(crate) fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Fetch the cached strategy for `key`, building it on first use.
    ///
    /// Strategies are stateless, so the benign races here are harmless: two
    /// first dispatchers may both build, and the (impossible in practice)
    /// downcast miss falls back to an equivalent fresh instance.
    pub(crate) fn get_or_build<T>(&self, key: TypeId, build: impl FnOnce() -> T) -> Arc<T>
    where
        T: Send + Sync + 'static,
    {
        if let Some(entry) = self.entries.get(&key) {
            if let Ok(existing) = Arc::clone(entry.value()).downcast::<T>() {
                return existing;
            }
        }
        let built = Arc::new(build());
        self.entries
            .insert(key, Arc::clone(&built) as Arc<dyn Any + Send + Sync>);
        built
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn clear(&self) {
        self.entries.clear();
    }
}

// ============================================================================
// Request Strategy
// ============================================================================

/// Dispatch pipeline for one request type: pre-processors, the behavior
/// chain around the handler, post-processors, and exception recovery.
pub(crate) struct RequestStrategy<R: Request> {
    request_type: &'static str,
    _marker: PhantomData<fn(R) -> R::Response>,
}

impl<R: Request> RequestStrategy<R> {
    pub(crate) fn new() -> Self {
        Self {
            request_type: type_name::<R>(),
            _marker: PhantomData,
        }
    }

    pub(crate) async fn execute(
        &self,
        shared: &Arc<Shared>,
        request: Arc<R>,
        cancel: CancellationToken,
    ) -> Result<R::Response> {
        if let Err(error) = self.run_pre(shared, &request, &cancel).await {
            return self.recover(shared, &request, error, &cancel).await;
        }

        // A missing handler is a wiring defect, not a business failure. It is
        // reported after the pre-processing hooks and never offered to
        // recovery.
        let Some(handler) = shared.registry.request_handler::<R>() else {
            return Err(Error::HandlerNotFound {
                request: self.request_type,
            });
        };

        match self.run_chain(shared, handler, &request, cancel.clone()).await {
            Ok(response) => {
                for processor in shared.registry.post_processors::<R>() {
                    if let Err(error) = processor.process(&request, &response, &cancel).await {
                        return self.recover(shared, &request, error, &cancel).await;
                    }
                }
                Ok(response)
            }
            Err(error) => self.recover(shared, &request, error, &cancel).await,
        }
    }

    async fn run_pre(
        &self,
        shared: &Arc<Shared>,
        request: &Arc<R>,
        cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        for processor in shared.registry.pre_processors::<R>() {
            processor.process(request, cancel).await?;
        }
        Ok(())
    }

    /// Fold the behavior chain around the handler. Registration order is
    /// nesting order: the first-registered behavior is the outermost wrapper,
    /// so the fold walks the list in reverse, innermost link first.
    async fn run_chain(
        &self,
        shared: &Arc<Shared>,
        handler: Arc<dyn RequestHandler<Request = R>>,
        request: &Arc<R>,
        cancel: CancellationToken,
    ) -> anyhow::Result<R::Response> {
        let inner_request = Arc::clone(request);
        let mut next = Next::new(move |cancel| async move {
            handler.handle(inner_request, cancel).await
        });
        for behavior in shared.registry.behaviors::<R>().into_iter().rev() {
            let layer_request = Arc::clone(request);
            let rest = next;
            next = Next::new(move |cancel| async move {
                behavior.handle(layer_request, rest, cancel).await
            });
        }
        next.run(cancel).await
    }

    /// Offer a business failure to the registered recovery hooks. Matching
    /// exception handlers run in registration order until one records a
    /// substitute response; exception actions observe the failure according
    /// to the configured strategy. Action failures are logged and swallowed,
    /// a failing exception handler replaces the propagating error.
    async fn recover(
        &self,
        shared: &Arc<Shared>,
        request: &Arc<R>,
        error: anyhow::Error,
        cancel: &CancellationToken,
    ) -> Result<R::Response> {
        if shared.config.exception_action_strategy == ExceptionActionStrategy::AllExceptions {
            self.run_actions(shared, request, &error, cancel).await;
        }

        let mut state = ExceptionState::new();
        for handler in shared.registry.exception_handlers::<R>() {
            if !handler.matches(&error) {
                continue;
            }
            handler.handle(request, &error, &mut state, cancel).await?;
            if state.is_handled() {
                break;
            }
        }

        if let Some(response) = state.into_response() {
            debug!(request = self.request_type, "dispatch failure recovered");
            return Ok(response);
        }

        if shared.config.exception_action_strategy == ExceptionActionStrategy::UnhandledOnly {
            self.run_actions(shared, request, &error, cancel).await;
        }
        Err(Error::Handler(error))
    }

    async fn run_actions(
        &self,
        shared: &Arc<Shared>,
        request: &Arc<R>,
        error: &anyhow::Error,
        cancel: &CancellationToken,
    ) {
        for action in shared.registry.exception_actions::<R>() {
            if !action.matches(error) {
                continue;
            }
            if let Err(action_error) = action.execute(request, error, cancel).await {
                warn!(
                    request = self.request_type,
                    error = %action_error,
                    "exception action failed"
                );
            }
        }
    }
}

// ============================================================================
// Stream Strategy
// ============================================================================

/// Dispatch pipeline for one stream request type. Opening the stream is
/// synchronous; work happens as the caller polls.
pub(crate) struct StreamStrategy<R: StreamRequest> {
    request_type: &'static str,
    _marker: PhantomData<fn(R) -> R::Item>,
}

impl<R: StreamRequest> StreamStrategy<R> {
    pub(crate) fn new() -> Self {
        Self {
            request_type: type_name::<R>(),
            _marker: PhantomData,
        }
    }

    pub(crate) fn open(
        &self,
        shared: &Arc<Shared>,
        request: Arc<R>,
        cancel: CancellationToken,
    ) -> Result<ResponseStream<R::Item>> {
        let Some(handler) = shared.registry.stream_handler::<R>() else {
            return Err(Error::HandlerNotFound {
                request: self.request_type,
            });
        };

        let inner_request = Arc::clone(&request);
        let mut next = StreamNext::new(move |cancel| handler.handle(inner_request, cancel));
        for behavior in shared.registry.stream_behaviors::<R>().into_iter().rev() {
            let layer_request = Arc::clone(&request);
            let rest = next;
            next = StreamNext::new(move |cancel| behavior.handle(layer_request, rest, cancel));
        }

        // Truncate at the outermost layer once the token fires, whether or
        // not inner layers observe it themselves.
        let stream = next.run(cancel.clone());
        Ok(Box::pin(stream.take_until(cancel.cancelled_owned())))
    }
}

// ============================================================================
// Erased Dispatch Entries
// ============================================================================

/// A request with its static type stripped for a dynamic call site.
pub type BoxedMessage = Box<dyn Any + Send>;

/// A response with its static type stripped. Downcast it to the response
/// type associated with the request that produced it.
pub type BoxedResponse = Box<dyn Any + Send>;

/// A notification with its static type stripped.
pub type BoxedNotification = Box<dyn Any + Send + Sync>;

/// Item sequence from an erased stream dispatch.
pub type BoxedItemStream = Pin<Box<dyn Stream<Item = anyhow::Result<BoxedResponse>> + Send>>;

/// Erased send path for one request type, monomorphized at registration.
pub(crate) struct ErasedSend {
    run: Box<
        dyn Fn(Arc<Shared>, BoxedMessage, CancellationToken) -> BoxFuture<'static, Result<BoxedResponse>>
            + Send
            + Sync,
    >,
}

impl ErasedSend {
    pub(crate) fn for_request<R: Request>() -> Self {
        Self {
            run: Box::new(|shared, message, cancel| {
                Box::pin(async move {
                    let request = message.downcast::<R>().map_err(|_| Error::ContractViolation {
                        type_name: type_name::<R>().to_string(),
                        reason: "boxed message does not match its dispatch entry",
                    })?;
                    let strategy = shared
                        .strategies
                        .get_or_build(TypeId::of::<R>(), RequestStrategy::<R>::new);
                    let response = strategy.execute(&shared, Arc::from(request), cancel).await?;
                    Ok(Box::new(response) as BoxedResponse)
                })
            }),
        }
    }

    pub(crate) fn call(
        &self,
        shared: Arc<Shared>,
        message: BoxedMessage,
        cancel: CancellationToken,
    ) -> BoxFuture<'static, Result<BoxedResponse>> {
        (self.run)(shared, message, cancel)
    }
}

/// Erased stream-open path for one stream request type.
pub(crate) struct ErasedStream {
    open: Box<
        dyn Fn(Arc<Shared>, BoxedMessage, CancellationToken) -> Result<BoxedItemStream>
            + Send
            + Sync,
    >,
}

impl ErasedStream {
    pub(crate) fn for_request<R: StreamRequest>() -> Self {
        Self {
            open: Box::new(|shared, message, cancel| {
                let request = message.downcast::<R>().map_err(|_| Error::ContractViolation {
                    type_name: type_name::<R>().to_string(),
                    reason: "boxed message does not match its dispatch entry",
                })?;
                let strategy = shared
                    .stream_strategies
                    .get_or_build(TypeId::of::<R>(), StreamStrategy::<R>::new);
                let stream = strategy.open(&shared, Arc::from(request), cancel)?;
                Ok(Box::pin(stream.map(|item| item.map(|value| Box::new(value) as BoxedResponse)))
                    as BoxedItemStream)
            }),
        }
    }

    pub(crate) fn call(
        &self,
        shared: Arc<Shared>,
        message: BoxedMessage,
        cancel: CancellationToken,
    ) -> Result<BoxedItemStream> {
        (self.open)(shared, message, cancel)
    }
}

/// Erased publish path for one notification type.
pub(crate) struct ErasedPublish {
    publish: Box<
        dyn Fn(Arc<Shared>, BoxedNotification, CancellationToken) -> BoxFuture<'static, Result<()>>
            + Send
            + Sync,
    >,
}

impl ErasedPublish {
    pub(crate) fn for_notification<N: Notification>() -> Self {
        Self {
            publish: Box::new(|shared, notification, cancel| {
                Box::pin(async move {
                    let notification =
                        notification
                            .downcast::<N>()
                            .map_err(|_| Error::ContractViolation {
                                type_name: type_name::<N>().to_string(),
                                reason: "boxed notification does not match its dispatch entry",
                            })?;
                    let strategy = shared
                        .notification_strategies
                        .get_or_build(TypeId::of::<N>(), NotificationStrategy::<N>::new);
                    strategy
                        .publish(&shared, Arc::from(notification), cancel)
                        .await
                })
            }),
        }
    }

    pub(crate) fn call(
        &self,
        shared: Arc<Shared>,
        notification: BoxedNotification,
        cancel: CancellationToken,
    ) -> BoxFuture<'static, Result<()>> {
        (self.publish)(shared, notification, cancel)
    }
}
