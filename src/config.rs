//! Dispatch configuration.
//!
//! All configuration is explicit and structural: policies are attached at
//! registration time through the builder, never inferred from the message
//! types themselves, and every mediator instance owns its own settings.

use std::time::Duration;

/// When exception actions run relative to exception-handler recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExceptionActionStrategy {
    /// Actions run only when no exception handler recovers the failure.
    #[default]
    UnhandledOnly,
    /// Actions run for every failure, even ones a handler recovers.
    AllExceptions,
}

/// Settings owned by one mediator instance.
#[derive(Debug, Clone)]
pub struct MediatorConfig {
    /// Bound on the one-time registration/build phase, measured from builder
    /// creation to `build()`. Exceeding it fails the build with
    /// [`crate::Error::RegistrationTimeout`]. This is a start-up concern
    /// only; per-call dispatch is never timed by the core.
    pub registration_timeout: Duration,

    /// When exception actions run. See [`ExceptionActionStrategy`].
    pub exception_action_strategy: ExceptionActionStrategy,
}

impl Default for MediatorConfig {
    fn default() -> Self {
        Self {
            registration_timeout: Duration::from_secs(15),
            exception_action_strategy: ExceptionActionStrategy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MediatorConfig::default();
        assert_eq!(config.registration_timeout, Duration::from_secs(15));
        assert_eq!(
            config.exception_action_strategy,
            ExceptionActionStrategy::UnhandledOnly
        );
    }
}
