//! Integration tests for stream request dispatch: laziness, behaviors,
//! mid-sequence failure, and cancellation.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use common::{ChaosError, Countdown, CountdownHandler};
use futures_util::StreamExt;
use sluice::{
    CancellationToken, Error, Mediator, ResponseStream, StreamBehavior, StreamNext, StreamRequest,
    StreamRequestHandler,
};

#[tokio::test]
async fn test_stream_yields_items_in_order() {
    let mediator = Mediator::builder()
        .register_stream_handler(CountdownHandler {
            opened: Arc::new(AtomicBool::new(false)),
        })
        .build()
        .expect("build failed");

    let mut stream = mediator.stream(Countdown { from: 3 }).expect("open failed");
    let mut items = Vec::new();
    while let Some(item) = stream.next().await {
        items.push(item.expect("stream item failed"));
    }
    assert_eq!(items, vec![3, 2, 1]);
}

#[tokio::test]
async fn test_stream_body_runs_at_first_poll_not_at_open() {
    let opened = Arc::new(AtomicBool::new(false));
    let mediator = Mediator::builder()
        .register_stream_handler(CountdownHandler {
            opened: Arc::clone(&opened),
        })
        .build()
        .expect("build failed");

    let mut stream = mediator.stream(Countdown { from: 1 }).expect("open failed");
    assert!(!opened.load(Ordering::SeqCst));

    stream.next().await.expect("empty stream").expect("item failed");
    assert!(opened.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_stream_without_handler_fails_at_open() {
    let mediator = Mediator::builder().build().expect("build failed");
    let Err(err) = mediator.stream(Countdown { from: 3 }) else {
        panic!("expected open to fail");
    };
    assert!(matches!(err, Error::HandlerNotFound { .. }));
}

#[tokio::test]
async fn test_stream_failure_arrives_as_err_item() {
    struct Flaky;

    impl StreamRequest for Flaky {
        type Item = u32;
    }

    struct FlakyHandler;

    impl StreamRequestHandler for FlakyHandler {
        type Request = Flaky;

        fn handle(&self, _: Arc<Flaky>, _: CancellationToken) -> ResponseStream<u32> {
            Box::pin(async_stream::stream! {
                yield Ok(1);
                yield Ok(2);
                yield Err(anyhow::Error::new(ChaosError("wire broke")));
            })
        }
    }

    let mediator = Mediator::builder()
        .register_stream_handler(FlakyHandler)
        .build()
        .expect("build failed");

    let mut stream = mediator.stream(Flaky).expect("open failed");
    assert_eq!(stream.next().await.expect("ended early").expect("item failed"), 1);
    assert_eq!(stream.next().await.expect("ended early").expect("item failed"), 2);

    let err = stream.next().await.expect("ended early").unwrap_err();
    assert_eq!(
        err.downcast_ref::<ChaosError>().expect("identity lost").0,
        "wire broke"
    );
}

#[tokio::test]
async fn test_stream_behavior_wraps_the_sequence() {
    struct Doubling;

    impl StreamBehavior<Countdown> for Doubling {
        fn handle(
            &self,
            _: Arc<Countdown>,
            next: StreamNext<u32>,
            cancel: CancellationToken,
        ) -> ResponseStream<u32> {
            Box::pin(next.run(cancel).map(|item| item.map(|value| value * 2)))
        }
    }

    let mediator = Mediator::builder()
        .register_stream_handler(CountdownHandler {
            opened: Arc::new(AtomicBool::new(false)),
        })
        .register_stream_behavior::<Countdown, _>(Doubling)
        .build()
        .expect("build failed");

    let mut stream = mediator.stream(Countdown { from: 2 }).expect("open failed");
    let mut items = Vec::new();
    while let Some(item) = stream.next().await {
        items.push(item.expect("stream item failed"));
    }
    assert_eq!(items, vec![4, 2]);
}

#[tokio::test]
async fn test_cancellation_truncates_an_unbounded_stream() {
    struct Endless;

    impl StreamRequest for Endless {
        type Item = u64;
    }

    struct EndlessHandler;

    impl StreamRequestHandler for EndlessHandler {
        type Request = Endless;

        fn handle(&self, _: Arc<Endless>, _: CancellationToken) -> ResponseStream<u64> {
            Box::pin(async_stream::stream! {
                let mut n = 0u64;
                loop {
                    yield Ok(n);
                    n += 1;
                }
            })
        }
    }

    let mediator = Mediator::builder()
        .register_stream_handler(EndlessHandler)
        .build()
        .expect("build failed");

    let cancel = CancellationToken::new();
    let mut stream = mediator
        .stream_with(Endless, cancel.clone())
        .expect("open failed");

    for expected in 0..3u64 {
        let item = stream.next().await.expect("ended early").expect("item failed");
        assert_eq!(item, expected);
    }

    cancel.cancel();
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn test_stream_boxed_round_trips_items() {
    let mediator = Mediator::builder()
        .register_stream_handler(CountdownHandler {
            opened: Arc::new(AtomicBool::new(false)),
        })
        .build()
        .expect("build failed");

    let mut stream = mediator
        .stream_boxed(Box::new(Countdown { from: 2 }))
        .expect("open failed");

    let mut items = Vec::new();
    while let Some(item) = stream.next().await {
        let boxed = item.expect("stream item failed");
        items.push(*boxed.downcast::<u32>().expect("wrong item type"));
    }
    assert_eq!(items, vec![2, 1]);
}

#[tokio::test]
async fn test_stream_boxed_rejects_unregistered_type() {
    let mediator = Mediator::builder().build().expect("build failed");
    let Err(err) = mediator.stream_boxed(Box::new(0u8)) else {
        panic!("expected open to fail");
    };
    assert!(matches!(err, Error::ContractViolation { .. }));
}
