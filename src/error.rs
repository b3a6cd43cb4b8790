//! Unified error handling for sluice.
//!
//! Structural errors (missing handler, unrecognized message type, registration
//! deadline) indicate a configuration defect and are always fatal to the
//! current dispatch. Business errors raised by handlers, behaviors, and
//! processors ride through transparently and keep their identity so callers
//! (and typed exception handlers) can downcast to the original type.

use std::time::Duration;

use thiserror::Error;

// ============================================================================
// Dispatch Errors
// ============================================================================

/// Errors surfaced by the mediator to the caller.
#[derive(Debug, Error)]
pub enum Error {
    /// A resolvable message type with no bound handler. Never recoverable
    /// through exception handlers.
    #[error("no handler registered for request type {request}")]
    HandlerNotFound {
        /// Type name of the request that failed to resolve.
        request: &'static str,
    },

    /// A message whose type implements no registered message-shape contract,
    /// or a registration constraint violation.
    #[error("contract violation for {type_name}: {reason}")]
    ContractViolation {
        /// Best-available identity of the offending type. Boxed messages only
        /// carry a `TypeId`, so this may be its debug rendering.
        type_name: String,
        reason: &'static str,
    },

    /// The one-time registration/build phase exceeded its configured bound.
    #[error("registration took {elapsed:?}, exceeding the {limit:?} bound")]
    RegistrationTimeout { elapsed: Duration, limit: Duration },

    /// A business failure raised by a handler, behavior, or processor,
    /// carried unchanged. Use [`Error::downcast_ref`] to reach the original
    /// concrete error.
    #[error(transparent)]
    Handler(#[from] anyhow::Error),

    /// Aggregate failure from a concurrent notification publish. Surfaced
    /// only after every handler has settled.
    #[error("{} of {} notification handlers failed", .failures.len(), .total)]
    Fanout {
        failures: Vec<anyhow::Error>,
        total: usize,
    },
}

impl Error {
    /// Get a static error code string for metrics/log labeling.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::HandlerNotFound { .. } => "handler_not_found",
            Self::ContractViolation { .. } => "contract_violation",
            Self::RegistrationTimeout { .. } => "registration_timeout",
            Self::Handler(_) => "handler_error",
            Self::Fanout { .. } => "fanout_error",
        }
    }

    /// Reach the original business error behind a [`Error::Handler`] carrier.
    ///
    /// Returns `None` for structural errors and fan-out aggregates.
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: std::fmt::Display + std::fmt::Debug + Send + Sync + 'static,
    {
        match self {
            Self::Handler(inner) => inner.downcast_ref::<E>(),
            _ => None,
        }
    }

    /// True when the failure is a propagated business error rather than a
    /// structural defect.
    #[inline]
    pub fn is_business(&self) -> bool {
        matches!(self, Self::Handler(_))
    }
}

/// Result type for dispatch operations.
pub type Result<T> = std::result::Result<T, Error>;
