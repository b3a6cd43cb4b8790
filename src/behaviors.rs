//! Stock pipeline behaviors.
//!
//! Both behaviors here are generic over the request type, so one instance
//! serves any request. Behaviors are registered per request type; register
//! with a turbofish, e.g.
//! `builder.register_behavior::<MyRequest, _>(ExecutionLogging)`.

use std::any::type_name;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::message::Request;
use crate::pipeline::{Next, PipelineBehavior};

/// Logs the start, outcome, and elapsed time of every dispatch it wraps.
#[derive(Debug, Default)]
pub struct ExecutionLogging;

#[async_trait]
impl<R: Request> PipelineBehavior<R> for ExecutionLogging {
    async fn handle(
        &self,
        _request: Arc<R>,
        next: Next<R::Response>,
        cancel: CancellationToken,
    ) -> anyhow::Result<R::Response> {
        let request_type = type_name::<R>();
        debug!(request = request_type, "dispatch started");
        let started = Instant::now();
        let result = next.run(cancel).await;
        let elapsed = started.elapsed();
        match &result {
            Ok(_) => debug!(request = request_type, ?elapsed, "dispatch completed"),
            Err(error) => warn!(request = request_type, ?elapsed, %error, "dispatch failed"),
        }
        result
    }
}

/// Warns when a wrapped dispatch exceeds a latency threshold. Passive
/// otherwise; the response flows through untouched.
#[derive(Debug)]
pub struct SlowRequestCheck {
    threshold: Duration,
}

impl SlowRequestCheck {
    pub fn new(threshold: Duration) -> Self {
        Self { threshold }
    }
}

#[async_trait]
impl<R: Request> PipelineBehavior<R> for SlowRequestCheck {
    async fn handle(
        &self,
        _request: Arc<R>,
        next: Next<R::Response>,
        cancel: CancellationToken,
    ) -> anyhow::Result<R::Response> {
        let started = Instant::now();
        let result = next.run(cancel).await;
        let elapsed = started.elapsed();
        if elapsed > self.threshold {
            warn!(
                request = type_name::<R>(),
                ?elapsed,
                threshold = ?self.threshold,
                "slow dispatch"
            );
        }
        result
    }
}
