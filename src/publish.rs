//! Notification fan-out.
//!
//! Publishing resolves every handler registered for the notification type,
//! orders them, wraps each in a one-shot executor, and hands the batch to the
//! mediator's publisher. The publisher owns the concurrency decision; the
//! fan-out core only prepares the batch.

use std::collections::HashSet;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::{BoxFuture, join_all};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Error, Result};
use crate::mediator::Shared;
use crate::message::Notification;
use crate::registry::NotificationEntry;

// ============================================================================
// Executors and Publishers
// ============================================================================

/// One notification handler invocation, prepared but not yet started. The
/// publisher decides when (and how concurrently) to run it.
pub struct NotificationExecutor {
    pub(crate) handler_name: &'static str,
    pub(crate) callback: Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, anyhow::Result<()>> + Send>,
}

impl NotificationExecutor {
    /// Type name of the handler behind this executor, for logging.
    pub fn handler_name(&self) -> &'static str {
        self.handler_name
    }

    /// Run the handler. Consumes the executor.
    pub async fn invoke(self, cancel: CancellationToken) -> anyhow::Result<()> {
        (self.callback)(cancel).await
    }
}

/// Concurrency policy for running a batch of notification executors. One
/// publisher instance serves the whole mediator.
#[async_trait]
pub trait NotificationPublisher: Send + Sync {
    /// Run the batch. Executors arrive already ordered.
    async fn publish(
        &self,
        executors: Vec<NotificationExecutor>,
        cancel: CancellationToken,
    ) -> Result<()>;
}

/// Runs handlers one at a time in order, stopping at the first failure.
/// Handlers after the failing one never run. This is the default publisher.
#[derive(Debug, Default)]
pub struct SequentialPublisher;

#[async_trait]
impl NotificationPublisher for SequentialPublisher {
    async fn publish(
        &self,
        executors: Vec<NotificationExecutor>,
        cancel: CancellationToken,
    ) -> Result<()> {
        for executor in executors {
            executor.invoke(cancel.clone()).await?;
        }
        Ok(())
    }
}

/// Starts every handler at once and waits for all of them to settle. Failures
/// are collected and surfaced together, so one failing handler never hides
/// the others or cuts them short.
#[derive(Debug, Default)]
pub struct ConcurrentPublisher;

#[async_trait]
impl NotificationPublisher for ConcurrentPublisher {
    async fn publish(
        &self,
        executors: Vec<NotificationExecutor>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let total = executors.len();
        let invocations = executors
            .into_iter()
            .map(|executor| executor.invoke(cancel.clone()));
        let failures: Vec<anyhow::Error> = join_all(invocations)
            .await
            .into_iter()
            .filter_map(|outcome| outcome.err())
            .collect();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::Fanout { failures, total })
        }
    }
}

// ============================================================================
// Fan-out Strategy
// ============================================================================

/// Drop duplicate registrations of the same handler type (keeping the
/// latest), then order by priority tag with untagged handlers last.
/// Registration order breaks ties.
pub(crate) fn prioritize<N: Notification>(
    entries: Vec<NotificationEntry<N>>,
) -> Vec<NotificationEntry<N>> {
    let mut seen = HashSet::new();
    let mut kept: Vec<NotificationEntry<N>> = entries
        .into_iter()
        .rev()
        .filter(|entry| seen.insert(entry.handler_type))
        .collect();
    kept.sort_by_key(|entry| (entry.priority.map_or(i64::MAX, i64::from), entry.index));
    kept
}

/// Fan-out pipeline for one notification type.
pub(crate) struct NotificationStrategy<N: Notification> {
    notification_type: &'static str,
    _marker: PhantomData<fn(N)>,
}

impl<N: Notification> NotificationStrategy<N> {
    pub(crate) fn new() -> Self {
        Self {
            notification_type: std::any::type_name::<N>(),
            _marker: PhantomData,
        }
    }

    pub(crate) async fn publish(
        &self,
        shared: &Arc<Shared>,
        notification: Arc<N>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let entries = prioritize(shared.registry.notification_entries::<N>());
        if entries.is_empty() {
            debug!(
                notification = self.notification_type,
                "published with no handlers registered"
            );
            return Ok(());
        }

        let executors = entries
            .into_iter()
            .map(|entry| {
                let notification = Arc::clone(&notification);
                NotificationExecutor {
                    handler_name: entry.handler_name,
                    callback: Box::new(move |cancel| {
                        Box::pin(async move { entry.handler.handle(notification, cancel).await })
                    }),
                }
            })
            .collect();

        shared.publisher.publish(executors, cancel).await
    }
}
