//! The mediator façade and its builder.
//!
//! A [`Mediator`] is a cheaply cloneable handle over immutable shared state:
//! the registry, the configuration, the notification publisher, and the
//! strategy caches. All registration happens up front through
//! [`MediatorBuilder`]; once built, dispatch is lock-free apart from the
//! strategy cache's sharded map.

use std::any::TypeId;
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::MediatorConfig;
use crate::error::{Error, Result};
use crate::handler::{NotificationHandler, RequestHandler, StreamRequestHandler};
use crate::message::{Notification, Request, ResponseStream, StreamRequest};
use crate::pipeline::{PipelineBehavior, PostProcessor, PreProcessor, StreamBehavior};
use crate::publish::{NotificationPublisher, NotificationStrategy, SequentialPublisher};
use crate::recovery::{ExceptionAction, ExceptionHandler};
use crate::registry::Registry;
use crate::strategy::{
    BoxedItemStream, BoxedMessage, BoxedNotification, BoxedResponse, RequestStrategy,
    StrategyCache, StreamStrategy,
};

/// Immutable per-mediator state shared by every clone of the handle.
pub(crate) struct Shared {
    pub(crate) registry: Registry,
    pub(crate) config: MediatorConfig,
    pub(crate) publisher: Arc<dyn NotificationPublisher>,
    pub(crate) strategies: StrategyCache,
    pub(crate) stream_strategies: StrategyCache,
    pub(crate) notification_strategies: StrategyCache,
}

/// In-process dispatch façade. Clone freely; clones share registrations and
/// caches.
#[derive(Clone)]
pub struct Mediator {
    shared: Arc<Shared>,
}

impl Mediator {
    /// Start registering parts for a new mediator.
    pub fn builder() -> MediatorBuilder {
        MediatorBuilder::new()
    }

    /// Dispatch a request to its handler and await the typed response.
    pub async fn send<R: Request>(&self, request: R) -> Result<R::Response> {
        self.send_with(request, CancellationToken::new()).await
    }

    /// [`send`](Self::send) with a caller-supplied cancellation signal.
    pub async fn send_with<R: Request>(
        &self,
        request: R,
        cancel: CancellationToken,
    ) -> Result<R::Response> {
        let strategy = self
            .shared
            .strategies
            .get_or_build(TypeId::of::<R>(), RequestStrategy::<R>::new);
        strategy.execute(&self.shared, Arc::new(request), cancel).await
    }

    /// Dispatch a request whose static type the call site does not know. The
    /// runtime type must have been named by some registration, otherwise the
    /// dispatch fails with a contract violation.
    pub async fn send_boxed(&self, request: BoxedMessage) -> Result<BoxedResponse> {
        self.send_boxed_with(request, CancellationToken::new()).await
    }

    /// [`send_boxed`](Self::send_boxed) with a caller-supplied cancellation
    /// signal.
    pub async fn send_boxed_with(
        &self,
        request: BoxedMessage,
        cancel: CancellationToken,
    ) -> Result<BoxedResponse> {
        // Identity of the boxed value, not of the box.
        let type_id = (*request).type_id();
        let Some(entry) = self.shared.registry.erased_sender(type_id) else {
            return Err(Self::unknown_type(type_id));
        };
        entry.call(Arc::clone(&self.shared), request, cancel).await
    }

    /// Publish a notification to every registered handler for its type.
    /// Publishing with zero handlers is a no-op, not an error.
    pub async fn publish<N: Notification>(&self, notification: N) -> Result<()> {
        self.publish_with(notification, CancellationToken::new()).await
    }

    /// [`publish`](Self::publish) with a caller-supplied cancellation signal.
    pub async fn publish_with<N: Notification>(
        &self,
        notification: N,
        cancel: CancellationToken,
    ) -> Result<()> {
        let strategy = self
            .shared
            .notification_strategies
            .get_or_build(TypeId::of::<N>(), NotificationStrategy::<N>::new);
        strategy
            .publish(&self.shared, Arc::new(notification), cancel)
            .await
    }

    /// Publish a notification whose static type the call site does not know.
    pub async fn publish_boxed(&self, notification: BoxedNotification) -> Result<()> {
        self.publish_boxed_with(notification, CancellationToken::new())
            .await
    }

    /// [`publish_boxed`](Self::publish_boxed) with a caller-supplied
    /// cancellation signal.
    pub async fn publish_boxed_with(
        &self,
        notification: BoxedNotification,
        cancel: CancellationToken,
    ) -> Result<()> {
        let type_id = (*notification).type_id();
        let Some(entry) = self.shared.registry.erased_publisher(type_id) else {
            return Err(Self::unknown_type(type_id));
        };
        entry
            .call(Arc::clone(&self.shared), notification, cancel)
            .await
    }

    /// Open the response sequence for a stream request. Opening is
    /// synchronous; the handler's work happens as the stream is polled.
    pub fn stream<R: StreamRequest>(&self, request: R) -> Result<ResponseStream<R::Item>> {
        self.stream_with(request, CancellationToken::new())
    }

    /// [`stream`](Self::stream) with a caller-supplied cancellation signal.
    /// The sequence ends early once the signal fires.
    pub fn stream_with<R: StreamRequest>(
        &self,
        request: R,
        cancel: CancellationToken,
    ) -> Result<ResponseStream<R::Item>> {
        let strategy = self
            .shared
            .stream_strategies
            .get_or_build(TypeId::of::<R>(), StreamStrategy::<R>::new);
        strategy.open(&self.shared, Arc::new(request), cancel)
    }

    /// Open a response sequence for a stream request whose static type the
    /// call site does not know.
    pub fn stream_boxed(&self, request: BoxedMessage) -> Result<BoxedItemStream> {
        self.stream_boxed_with(request, CancellationToken::new())
    }

    /// [`stream_boxed`](Self::stream_boxed) with a caller-supplied
    /// cancellation signal.
    pub fn stream_boxed_with(
        &self,
        request: BoxedMessage,
        cancel: CancellationToken,
    ) -> Result<BoxedItemStream> {
        let type_id = (*request).type_id();
        let Some(entry) = self.shared.registry.erased_streamer(type_id) else {
            return Err(Self::unknown_type(type_id));
        };
        entry.call(Arc::clone(&self.shared), request, cancel)
    }

    /// Number of strategies built so far, across all three message shapes.
    pub fn cached_strategies(&self) -> usize {
        self.shared.strategies.len()
            + self.shared.stream_strategies.len()
            + self.shared.notification_strategies.len()
    }

    /// Drop every cached strategy. Later dispatches rebuild on first use;
    /// in-flight dispatches keep the instance they already hold.
    pub fn clear_strategy_cache(&self) {
        self.shared.strategies.clear();
        self.shared.stream_strategies.clear();
        self.shared.notification_strategies.clear();
    }

    fn unknown_type(type_id: TypeId) -> Error {
        Error::ContractViolation {
            type_name: format!("{type_id:?}"),
            reason: "type implements no registered message-shape contract",
        }
    }
}

/// Collects registrations, then seals them into a [`Mediator`].
///
/// The build phase is bounded by
/// [`MediatorConfig::registration_timeout`], measured from builder
/// creation to [`build`](Self::build).
pub struct MediatorBuilder {
    registry: Registry,
    config: MediatorConfig,
    publisher: Arc<dyn NotificationPublisher>,
    started: Instant,
}

impl Default for MediatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MediatorBuilder {
    pub fn new() -> Self {
        Self {
            registry: Registry::new(),
            config: MediatorConfig::default(),
            publisher: Arc::new(SequentialPublisher),
            started: Instant::now(),
        }
    }

    /// Replace the default configuration.
    pub fn with_config(mut self, config: MediatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the default [`SequentialPublisher`] notification publisher.
    pub fn with_publisher(mut self, publisher: impl NotificationPublisher + 'static) -> Self {
        self.publisher = Arc::new(publisher);
        self
    }

    /// Register a shared request handler instance. Registering a second
    /// handler for the same request type replaces the first with a warning.
    pub fn register_request_handler<H: RequestHandler>(mut self, handler: H) -> Self {
        self.registry.register_request_handler(handler);
        self
    }

    /// Register a transient request handler: the factory builds a fresh
    /// instance for every dispatch.
    pub fn register_request_handler_factory<H, F>(mut self, factory: F) -> Self
    where
        H: RequestHandler,
        F: Fn() -> H + Send + Sync + 'static,
    {
        self.registry.register_request_handler_factory(factory);
        self
    }

    /// Register a shared stream handler instance.
    pub fn register_stream_handler<H: StreamRequestHandler>(mut self, handler: H) -> Self {
        self.registry.register_stream_handler(handler);
        self
    }

    /// Register a transient stream handler.
    pub fn register_stream_handler_factory<H, F>(mut self, factory: F) -> Self
    where
        H: StreamRequestHandler,
        F: Fn() -> H + Send + Sync + 'static,
    {
        self.registry.register_stream_handler_factory(factory);
        self
    }

    /// Register a pipeline behavior for one request type. The first
    /// registered behavior becomes the outermost wrapper.
    pub fn register_behavior<R, B>(mut self, behavior: B) -> Self
    where
        R: Request,
        B: PipelineBehavior<R> + 'static,
    {
        self.registry.register_behavior::<R, B>(behavior);
        self
    }

    /// Register a stream behavior for one stream request type.
    pub fn register_stream_behavior<R, B>(mut self, behavior: B) -> Self
    where
        R: StreamRequest,
        B: StreamBehavior<R> + 'static,
    {
        self.registry.register_stream_behavior::<R, B>(behavior);
        self
    }

    /// Register a pre-processor for one request type.
    pub fn register_pre_processor<R, P>(mut self, processor: P) -> Self
    where
        R: Request,
        P: PreProcessor<R> + 'static,
    {
        self.registry.register_pre_processor::<R, P>(processor);
        self
    }

    /// Register a post-processor for one request type.
    pub fn register_post_processor<R, P>(mut self, processor: P) -> Self
    where
        R: Request,
        P: PostProcessor<R> + 'static,
    {
        self.registry.register_post_processor::<R, P>(processor);
        self
    }

    /// Register a recovery hook for one (request type, error type) pair.
    pub fn register_exception_handler<R, E, H>(mut self, handler: H) -> Self
    where
        R: Request,
        E: std::error::Error + Send + Sync + 'static,
        H: ExceptionHandler<R, E> + 'static,
    {
        self.registry.register_exception_handler::<R, E, H>(handler);
        self
    }

    /// Register a failure observer for one (request type, error type) pair.
    pub fn register_exception_action<R, E, A>(mut self, action: A) -> Self
    where
        R: Request,
        E: std::error::Error + Send + Sync + 'static,
        A: ExceptionAction<R, E> + 'static,
    {
        self.registry.register_exception_action::<R, E, A>(action);
        self
    }

    /// Register a notification handler with no priority tag. Untagged
    /// handlers run after tagged ones, in registration order.
    pub fn register_notification_handler<H: NotificationHandler>(mut self, handler: H) -> Self {
        self.registry.register_notification_handler(handler, None);
        self
    }

    /// Register a notification handler with an explicit priority. Lower
    /// values run first.
    pub fn register_notification_handler_with_priority<H: NotificationHandler>(
        mut self,
        handler: H,
        priority: i32,
    ) -> Self {
        self.registry
            .register_notification_handler(handler, Some(priority));
        self
    }

    /// Seal the registrations into a dispatch-ready [`Mediator`].
    pub fn build(self) -> Result<Mediator> {
        let elapsed = self.started.elapsed();
        if elapsed > self.config.registration_timeout {
            return Err(Error::RegistrationTimeout {
                elapsed,
                limit: self.config.registration_timeout,
            });
        }
        debug!(?elapsed, "mediator built");
        Ok(Mediator {
            shared: Arc::new(Shared {
                registry: self.registry,
                config: self.config,
                publisher: self.publisher,
                strategies: StrategyCache::new(),
                stream_strategies: StrategyCache::new(),
                notification_strategies: StrategyCache::new(),
            }),
        })
    }
}
