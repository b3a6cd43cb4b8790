//! Typed exception recovery.
//!
//! When a dispatch fails with a business error, registered exception handlers
//! for the request type get a chance to convert the failure into a response.
//! Handlers and actions declare the concrete error type they care about; the
//! propagating error is matched by downcast, so only the original error type
//! (not wrappers) triggers them.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::message::Request;

/// Per-dispatch scratch record threaded through matching exception handlers.
///
/// Once any handler records a response, remaining handlers for that error are
/// skipped and the response is returned instead of propagating the error.
pub struct ExceptionState<Resp> {
    handled: bool,
    response: Option<Resp>,
}

impl<Resp> ExceptionState<Resp> {
    pub(crate) fn new() -> Self {
        Self {
            handled: false,
            response: None,
        }
    }

    /// Record a substitute response and mark the error handled.
    pub fn set_handled(&mut self, response: Resp) {
        self.handled = true;
        self.response = Some(response);
    }

    /// Whether a previous handler already recovered this error.
    #[inline]
    pub fn is_handled(&self) -> bool {
        self.handled
    }

    pub(crate) fn into_response(self) -> Option<Resp> {
        if self.handled { self.response } else { None }
    }
}

/// Recovery hook for one (request type, error type) pair. May substitute a
/// response for the failure via [`ExceptionState::set_handled`].
#[async_trait]
pub trait ExceptionHandler<R, E>: Send + Sync
where
    R: Request,
    E: std::error::Error + Send + Sync + 'static,
{
    async fn handle(
        &self,
        request: &R,
        error: &E,
        state: &mut ExceptionState<R::Response>,
        cancel: &CancellationToken,
    ) -> anyhow::Result<()>;
}

/// Side-effect-only observer for one (request type, error type) pair. Runs
/// when the error propagates; cannot substitute a response.
#[async_trait]
pub trait ExceptionAction<R, E>: Send + Sync
where
    R: Request,
    E: std::error::Error + Send + Sync + 'static,
{
    async fn execute(
        &self,
        request: &R,
        error: &E,
        cancel: &CancellationToken,
    ) -> anyhow::Result<()>;
}

// ============================================================================
// Erased adapters (registry storage)
// ============================================================================

/// Registry-facing view of an exception handler: matches against the erased
/// propagating error and downcasts before invoking the typed hook.
#[async_trait]
pub(crate) trait ErasedExceptionHandler<R: Request>: Send + Sync {
    fn matches(&self, error: &anyhow::Error) -> bool;

    async fn handle(
        &self,
        request: &R,
        error: &anyhow::Error,
        state: &mut ExceptionState<R::Response>,
        cancel: &CancellationToken,
    ) -> anyhow::Result<()>;
}

/// Registry-facing view of an exception action.
#[async_trait]
pub(crate) trait ErasedExceptionAction<R: Request>: Send + Sync {
    fn matches(&self, error: &anyhow::Error) -> bool;

    async fn execute(
        &self,
        request: &R,
        error: &anyhow::Error,
        cancel: &CancellationToken,
    ) -> anyhow::Result<()>;
}

pub(crate) struct TypedExceptionHandler<H, E> {
    inner: H,
    _marker: PhantomData<fn(E)>,
}

impl<H, E> TypedExceptionHandler<H, E> {
    pub(crate) fn new(inner: H) -> Self {
        Self {
            inner,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<R, E, H> ErasedExceptionHandler<R> for TypedExceptionHandler<H, E>
where
    R: Request,
    E: std::error::Error + Send + Sync + 'static,
    H: ExceptionHandler<R, E>,
{
    fn matches(&self, error: &anyhow::Error) -> bool {
        error.downcast_ref::<E>().is_some()
    }

    async fn handle(
        &self,
        request: &R,
        error: &anyhow::Error,
        state: &mut ExceptionState<R::Response>,
        cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        match error.downcast_ref::<E>() {
            Some(error) => self.inner.handle(request, error, state, cancel).await,
            None => Ok(()),
        }
    }
}

pub(crate) struct TypedExceptionAction<A, E> {
    inner: A,
    _marker: PhantomData<fn(E)>,
}

impl<A, E> TypedExceptionAction<A, E> {
    pub(crate) fn new(inner: A) -> Self {
        Self {
            inner,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<R, E, A> ErasedExceptionAction<R> for TypedExceptionAction<A, E>
where
    R: Request,
    E: std::error::Error + Send + Sync + 'static,
    A: ExceptionAction<R, E>,
{
    fn matches(&self, error: &anyhow::Error) -> bool {
        error.downcast_ref::<E>().is_some()
    }

    async fn execute(
        &self,
        request: &R,
        error: &anyhow::Error,
        cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        match error.downcast_ref::<E>() {
            Some(error) => self.inner.execute(request, error, cancel).await,
            None => Ok(()),
        }
    }
}

/// Erased handler/action lists are shared between the registry and the
/// dispatch strategies.
pub(crate) type ExceptionHandlerList<R> = Vec<Arc<dyn ErasedExceptionHandler<R>>>;
pub(crate) type ExceptionActionList<R> = Vec<Arc<dyn ErasedExceptionAction<R>>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_starts_unhandled() {
        let state: ExceptionState<String> = ExceptionState::new();
        assert!(!state.is_handled());
        assert!(state.into_response().is_none());
    }

    #[test]
    fn test_set_handled_records_response() {
        let mut state = ExceptionState::new();
        state.set_handled("fallback".to_string());
        assert!(state.is_handled());
        assert_eq!(state.into_response().as_deref(), Some("fallback"));
    }
}
