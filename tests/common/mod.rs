//! Shared fixtures for the integration tests: a small message vocabulary,
//! handlers with observable side effects, and an append-only log the tests
//! assert ordering against.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use sluice::{
    CancellationToken, Next, Notification, NotificationHandler, PipelineBehavior, Request,
    RequestHandler, ResponseStream, StreamRequest, StreamRequestHandler,
};
use thiserror::Error;

/// Install the log subscriber once per test binary. Later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Append-only event log shared between fixtures and assertions.
pub type Log = Arc<Mutex<Vec<String>>>;

pub fn new_log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn record(log: &Log, entry: impl Into<String>) {
    log.lock().push(entry.into());
}

pub fn entries(log: &Log) -> Vec<String> {
    log.lock().clone()
}

/// Business error raised by the failing fixtures.
#[derive(Debug, Error)]
#[error("chaos: {0}")]
pub struct ChaosError(pub &'static str);

/// Unrelated error type, for non-matching recovery assertions.
#[derive(Debug, Error)]
#[error("mishap: {0}")]
pub struct MishapError(pub &'static str);

// ============================================================================
// Requests
// ============================================================================

pub struct Ping {
    pub label: String,
}

impl Ping {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
        }
    }
}

impl Request for Ping {
    type Response = String;
}

pub struct PingHandler;

#[async_trait]
impl RequestHandler for PingHandler {
    type Request = Ping;

    async fn handle(&self, request: Arc<Ping>, _cancel: CancellationToken) -> anyhow::Result<String> {
        Ok(format!("{} pong", request.label))
    }
}

/// Handler that records its invocation before responding.
pub struct RecordingPingHandler {
    pub log: Log,
}

#[async_trait]
impl RequestHandler for RecordingPingHandler {
    type Request = Ping;

    async fn handle(&self, request: Arc<Ping>, _cancel: CancellationToken) -> anyhow::Result<String> {
        record(&self.log, "handler");
        Ok(format!("{} pong", request.label))
    }
}

/// Handler that always fails with [`ChaosError`].
pub struct FailingPingHandler;

#[async_trait]
impl RequestHandler for FailingPingHandler {
    type Request = Ping;

    async fn handle(&self, _request: Arc<Ping>, _cancel: CancellationToken) -> anyhow::Result<String> {
        Err(anyhow::Error::new(ChaosError("handler blew up")))
    }
}

/// Behavior that logs around the rest of the chain.
pub struct LoggingBehavior {
    pub name: &'static str,
    pub log: Log,
}

#[async_trait]
impl PipelineBehavior<Ping> for LoggingBehavior {
    async fn handle(
        &self,
        _request: Arc<Ping>,
        next: Next<String>,
        cancel: CancellationToken,
    ) -> anyhow::Result<String> {
        record(&self.log, format!("{}:before", self.name));
        let response = next.run(cancel).await;
        record(&self.log, format!("{}:after", self.name));
        response
    }
}

// ============================================================================
// Notifications
// ============================================================================

pub struct Pinged {
    pub label: String,
}

impl Pinged {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
        }
    }
}

impl Notification for Pinged {}

/// Observer that appends its name to the log.
pub struct RecordingObserver {
    pub name: &'static str,
    pub log: Log,
}

#[async_trait]
impl NotificationHandler for RecordingObserver {
    type Notification = Pinged;

    async fn handle(&self, _: Arc<Pinged>, _cancel: CancellationToken) -> anyhow::Result<()> {
        record(&self.log, self.name);
        Ok(())
    }
}

/// Observer that records itself, then fails.
pub struct FailingObserver {
    pub name: &'static str,
    pub log: Log,
}

#[async_trait]
impl NotificationHandler for FailingObserver {
    type Notification = Pinged;

    async fn handle(&self, _: Arc<Pinged>, _cancel: CancellationToken) -> anyhow::Result<()> {
        record(&self.log, self.name);
        Err(anyhow::Error::new(ChaosError("observer blew up")))
    }
}

// ============================================================================
// Stream requests
// ============================================================================

pub struct Countdown {
    pub from: u32,
}

impl StreamRequest for Countdown {
    type Item = u32;
}

/// Emits `from, from-1, .., 1`. Flips `opened` when the sequence body first
/// runs, which is at first poll, not at open.
pub struct CountdownHandler {
    pub opened: Arc<AtomicBool>,
}

impl StreamRequestHandler for CountdownHandler {
    type Request = Countdown;

    fn handle(&self, request: Arc<Countdown>, _cancel: CancellationToken) -> ResponseStream<u32> {
        let opened = Arc::clone(&self.opened);
        Box::pin(async_stream::stream! {
            opened.store(true, Ordering::SeqCst);
            for value in (1..=request.from).rev() {
                yield Ok(value);
            }
        })
    }
}

/// Counts handler constructions, for transient-registration assertions.
pub struct CountingFactory {
    pub built: Arc<AtomicUsize>,
}

impl CountingFactory {
    pub fn new() -> Self {
        Self {
            built: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn make(&self) -> impl Fn() -> PingHandler + Send + Sync + 'static {
        let built = Arc::clone(&self.built);
        move || {
            built.fetch_add(1, Ordering::SeqCst);
            PingHandler
        }
    }
}
