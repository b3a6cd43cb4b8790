//! Registration of handlers, behaviors, processors, and recovery hooks.
//!
//! The registry is the boundary with the surrounding composition code: it
//! owns every registered part and answers the dispatch core's per-call
//! resolution queries. It never performs discovery itself: everything is
//! registered explicitly through the builder, and the registry is immutable
//! once the mediator is built.
//!
//! Alongside each typed slot, registration records an erased dispatch entry
//! (monomorphized at registration time) so the dynamically-typed call sites
//! can run the identical typed pipeline without any runtime type inspection
//! beyond a `TypeId` lookup.

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use crate::handler::{NotificationHandler, RequestHandler, StreamRequestHandler};
use crate::message::{Notification, Request, StreamRequest};
use crate::pipeline::{PipelineBehavior, PostProcessor, PreProcessor, StreamBehavior};
use crate::recovery::{
    ExceptionAction, ExceptionActionList, ExceptionHandler, ExceptionHandlerList,
    TypedExceptionAction, TypedExceptionHandler,
};
use crate::strategy::{ErasedPublish, ErasedSend, ErasedStream};

type AnySlot = Box<dyn Any + Send + Sync>;

/// Produces a handler for one invocation. Shared registrations hand out the
/// same instance; factory registrations build a fresh transient instance per
/// dispatch. Only the provider is stored; resolved instances are never
/// cached across calls.
struct RequestProvider<R: Request>(Box<dyn Fn() -> Arc<dyn RequestHandler<Request = R>> + Send + Sync>);

struct StreamProvider<R: StreamRequest>(
    Box<dyn Fn() -> Arc<dyn StreamRequestHandler<Request = R>> + Send + Sync>,
);

/// One registered notification handler, with the metadata the fan-out
/// orchestrator orders by.
pub(crate) struct NotificationEntry<N: Notification> {
    pub handler: Arc<dyn NotificationHandler<Notification = N>>,
    /// Identity of the concrete handler type, used to drop duplicate
    /// registrations of the same handler.
    pub handler_type: TypeId,
    pub handler_name: &'static str,
    /// Explicit priority tag; lower runs first, untagged sorts last.
    pub priority: Option<i32>,
    /// Discovery order, the stable tie-break.
    pub index: usize,
}

impl<N: Notification> Clone for NotificationEntry<N> {
    fn clone(&self) -> Self {
        Self {
            handler: Arc::clone(&self.handler),
            handler_type: self.handler_type,
            handler_name: self.handler_name,
            priority: self.priority,
            index: self.index,
        }
    }
}

/// Registered parts, keyed by the message type they apply to.
#[derive(Default)]
pub(crate) struct Registry {
    request_handlers: HashMap<TypeId, AnySlot>,
    stream_handlers: HashMap<TypeId, AnySlot>,
    behaviors: HashMap<TypeId, AnySlot>,
    stream_behaviors: HashMap<TypeId, AnySlot>,
    pre_processors: HashMap<TypeId, AnySlot>,
    post_processors: HashMap<TypeId, AnySlot>,
    exception_handlers: HashMap<TypeId, AnySlot>,
    exception_actions: HashMap<TypeId, AnySlot>,
    notification_handlers: HashMap<TypeId, AnySlot>,
    erased_senders: HashMap<TypeId, ErasedSend>,
    erased_streamers: HashMap<TypeId, ErasedStream>,
    erased_publishers: HashMap<TypeId, ErasedPublish>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    pub(crate) fn register_request_handler<H: RequestHandler>(&mut self, handler: H) {
        let shared: Arc<dyn RequestHandler<Request = H::Request>> = Arc::new(handler);
        self.insert_request_provider::<H::Request>(Box::new(move || Arc::clone(&shared)));
    }

    pub(crate) fn register_request_handler_factory<H, F>(&mut self, factory: F)
    where
        H: RequestHandler,
        F: Fn() -> H + Send + Sync + 'static,
    {
        self.insert_request_provider::<H::Request>(Box::new(move || Arc::new(factory())));
    }

    fn insert_request_provider<R: Request>(
        &mut self,
        provider: Box<dyn Fn() -> Arc<dyn RequestHandler<Request = R>> + Send + Sync>,
    ) {
        self.ensure_request_contract::<R>();
        let replaced = self
            .request_handlers
            .insert(TypeId::of::<R>(), Box::new(RequestProvider::<R>(provider)));
        if replaced.is_some() {
            warn!(request = type_name::<R>(), "replaced existing request handler");
        }
    }

    pub(crate) fn register_stream_handler<H: StreamRequestHandler>(&mut self, handler: H) {
        let shared: Arc<dyn StreamRequestHandler<Request = H::Request>> = Arc::new(handler);
        self.insert_stream_provider::<H::Request>(Box::new(move || Arc::clone(&shared)));
    }

    pub(crate) fn register_stream_handler_factory<H, F>(&mut self, factory: F)
    where
        H: StreamRequestHandler,
        F: Fn() -> H + Send + Sync + 'static,
    {
        self.insert_stream_provider::<H::Request>(Box::new(move || Arc::new(factory())));
    }

    fn insert_stream_provider<R: StreamRequest>(
        &mut self,
        provider: Box<dyn Fn() -> Arc<dyn StreamRequestHandler<Request = R>> + Send + Sync>,
    ) {
        self.ensure_stream_contract::<R>();
        let replaced = self
            .stream_handlers
            .insert(TypeId::of::<R>(), Box::new(StreamProvider::<R>(provider)));
        if replaced.is_some() {
            warn!(request = type_name::<R>(), "replaced existing stream handler");
        }
    }

    pub(crate) fn register_behavior<R, B>(&mut self, behavior: B)
    where
        R: Request,
        B: PipelineBehavior<R> + 'static,
    {
        self.ensure_request_contract::<R>();
        push_to(
            &mut self.behaviors,
            TypeId::of::<R>(),
            Vec::<Arc<dyn PipelineBehavior<R>>>::new,
            |list| list.push(Arc::new(behavior)),
        );
    }

    pub(crate) fn register_stream_behavior<R, B>(&mut self, behavior: B)
    where
        R: StreamRequest,
        B: StreamBehavior<R> + 'static,
    {
        self.ensure_stream_contract::<R>();
        push_to(
            &mut self.stream_behaviors,
            TypeId::of::<R>(),
            Vec::<Arc<dyn StreamBehavior<R>>>::new,
            |list| list.push(Arc::new(behavior)),
        );
    }

    pub(crate) fn register_pre_processor<R, P>(&mut self, processor: P)
    where
        R: Request,
        P: PreProcessor<R> + 'static,
    {
        self.ensure_request_contract::<R>();
        push_to(
            &mut self.pre_processors,
            TypeId::of::<R>(),
            Vec::<Arc<dyn PreProcessor<R>>>::new,
            |list| list.push(Arc::new(processor)),
        );
    }

    pub(crate) fn register_post_processor<R, P>(&mut self, processor: P)
    where
        R: Request,
        P: PostProcessor<R> + 'static,
    {
        self.ensure_request_contract::<R>();
        push_to(
            &mut self.post_processors,
            TypeId::of::<R>(),
            Vec::<Arc<dyn PostProcessor<R>>>::new,
            |list| list.push(Arc::new(processor)),
        );
    }

    pub(crate) fn register_exception_handler<R, E, H>(&mut self, handler: H)
    where
        R: Request,
        E: std::error::Error + Send + Sync + 'static,
        H: ExceptionHandler<R, E> + 'static,
    {
        self.ensure_request_contract::<R>();
        push_to(
            &mut self.exception_handlers,
            TypeId::of::<R>(),
            ExceptionHandlerList::<R>::new,
            |list| list.push(Arc::new(TypedExceptionHandler::<H, E>::new(handler))),
        );
    }

    pub(crate) fn register_exception_action<R, E, A>(&mut self, action: A)
    where
        R: Request,
        E: std::error::Error + Send + Sync + 'static,
        A: ExceptionAction<R, E> + 'static,
    {
        self.ensure_request_contract::<R>();
        push_to(
            &mut self.exception_actions,
            TypeId::of::<R>(),
            ExceptionActionList::<R>::new,
            |list| list.push(Arc::new(TypedExceptionAction::<A, E>::new(action))),
        );
    }

    pub(crate) fn register_notification_handler<H: NotificationHandler>(
        &mut self,
        handler: H,
        priority: Option<i32>,
    ) {
        self.ensure_notification_contract::<H::Notification>();
        let handler_type = TypeId::of::<H>();
        let handler_name = type_name::<H>();
        push_to(
            &mut self.notification_handlers,
            TypeId::of::<H::Notification>(),
            Vec::<NotificationEntry<H::Notification>>::new,
            |list| {
                let index = list.len();
                list.push(NotificationEntry {
                    handler: Arc::new(handler),
                    handler_type,
                    handler_name,
                    priority,
                    index,
                });
            },
        );
    }

    /// Record the erased dispatch entry for a request type. Called by every
    /// request-keyed registration so the boxed call site can tell "known type
    /// without a handler" (HandlerNotFound) apart from "type that implements
    /// no message-shape contract" (ContractViolation).
    fn ensure_request_contract<R: Request>(&mut self) {
        self.erased_senders
            .entry(TypeId::of::<R>())
            .or_insert_with(ErasedSend::for_request::<R>);
    }

    fn ensure_stream_contract<R: StreamRequest>(&mut self) {
        self.erased_streamers
            .entry(TypeId::of::<R>())
            .or_insert_with(ErasedStream::for_request::<R>);
    }

    fn ensure_notification_contract<N: Notification>(&mut self) {
        self.erased_publishers
            .entry(TypeId::of::<N>())
            .or_insert_with(ErasedPublish::for_notification::<N>);
    }

    // ------------------------------------------------------------------
    // Resolution (queried per dispatch)
    // ------------------------------------------------------------------

    pub(crate) fn request_handler<R: Request>(
        &self,
    ) -> Option<Arc<dyn RequestHandler<Request = R>>> {
        let slot = self.request_handlers.get(&TypeId::of::<R>())?;
        let provider = slot.downcast_ref::<RequestProvider<R>>()?;
        Some((provider.0)())
    }

    pub(crate) fn stream_handler<R: StreamRequest>(
        &self,
    ) -> Option<Arc<dyn StreamRequestHandler<Request = R>>> {
        let slot = self.stream_handlers.get(&TypeId::of::<R>())?;
        let provider = slot.downcast_ref::<StreamProvider<R>>()?;
        Some((provider.0)())
    }

    pub(crate) fn behaviors<R: Request>(&self) -> Vec<Arc<dyn PipelineBehavior<R>>> {
        list(&self.behaviors, TypeId::of::<R>())
    }

    pub(crate) fn stream_behaviors<R: StreamRequest>(&self) -> Vec<Arc<dyn StreamBehavior<R>>> {
        list(&self.stream_behaviors, TypeId::of::<R>())
    }

    pub(crate) fn pre_processors<R: Request>(&self) -> Vec<Arc<dyn PreProcessor<R>>> {
        list(&self.pre_processors, TypeId::of::<R>())
    }

    pub(crate) fn post_processors<R: Request>(&self) -> Vec<Arc<dyn PostProcessor<R>>> {
        list(&self.post_processors, TypeId::of::<R>())
    }

    pub(crate) fn exception_handlers<R: Request>(&self) -> ExceptionHandlerList<R> {
        list(&self.exception_handlers, TypeId::of::<R>())
    }

    pub(crate) fn exception_actions<R: Request>(&self) -> ExceptionActionList<R> {
        list(&self.exception_actions, TypeId::of::<R>())
    }

    pub(crate) fn notification_entries<N: Notification>(&self) -> Vec<NotificationEntry<N>> {
        list(&self.notification_handlers, TypeId::of::<N>())
    }

    pub(crate) fn erased_sender(&self, type_id: TypeId) -> Option<&ErasedSend> {
        self.erased_senders.get(&type_id)
    }

    pub(crate) fn erased_streamer(&self, type_id: TypeId) -> Option<&ErasedStream> {
        self.erased_streamers.get(&type_id)
    }

    pub(crate) fn erased_publisher(&self, type_id: TypeId) -> Option<&ErasedPublish> {
        self.erased_publishers.get(&type_id)
    }
}

/// Append to a typed list slot, creating it on first use.
fn push_to<T: Any + Send + Sync>(
    map: &mut HashMap<TypeId, AnySlot>,
    key: TypeId,
    init: impl FnOnce() -> T,
    push: impl FnOnce(&mut T),
) {
    let slot = map.entry(key).or_insert_with(|| Box::new(init()));
    // The slot type is derived from the same message type as the key, so the
    // downcast cannot miss.
    if let Some(slot) = slot.downcast_mut::<T>() {
        push(slot);
    }
}

/// Clone out a typed list slot; absent slots resolve to the empty list.
fn list<T: Any + Clone + Default>(map: &HashMap<TypeId, AnySlot>, key: TypeId) -> T {
    map.get(&key)
        .and_then(|slot| slot.downcast_ref::<T>())
        .cloned()
        .unwrap_or_default()
}
