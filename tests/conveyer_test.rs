// tests/conveyer_test.rs
use std::sync::Arc;
use std::time::{Duration, Instant};

use conveyer::handlers::{multiplexer, prefix_decorator, separator};
use conveyer::{ChannelError, Conveyer, ConveyerConfig, ConveyerError, StageError, UNDEFINED};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(2);

/// Start `run` on its own task.
fn start(conveyer: &Arc<Conveyer>, cancel: &CancellationToken) -> JoinHandle<Result<(), ConveyerError>> {
    let conveyer = conveyer.clone();
    let cancel = cancel.clone();
    tokio::spawn(async move { conveyer.run(cancel).await })
}

async fn recv(conveyer: &Conveyer, name: &str) -> String {
    tokio::time::timeout(WAIT, conveyer.recv(name))
        .await
        .expect("recv timed out")
        .expect("recv failed")
}

async fn finish(handle: JoinHandle<Result<(), ConveyerError>>) -> Result<(), ConveyerError> {
    tokio::time::timeout(WAIT, handle)
        .await
        .expect("run did not finish")
        .expect("run task panicked")
}

#[tokio::test]
async fn test_burst_beyond_capacity_times_out() {
    let conveyer = Conveyer::new(2);
    conveyer.register_decorator(prefix_decorator, "in", "out").unwrap();

    conveyer.send("in", "1").await.unwrap();
    conveyer.send("in", "2").await.unwrap();

    let started = Instant::now();
    let err = conveyer.send("in", "3").await.unwrap_err();
    assert!(started.elapsed() >= Duration::from_millis(90));
    assert!(matches!(err, ChannelError::Timeout { ref name, waited_ms: 100 } if name == "in"));
}

#[tokio::test]
async fn test_burst_beyond_capacity_without_wait_is_full() {
    let conveyer = Conveyer::with_config(ConveyerConfig::new(2).with_send_timeout(Duration::ZERO));
    conveyer.register_decorator(prefix_decorator, "in", "out").unwrap();

    conveyer.send("in", "1").await.unwrap();
    conveyer.send("in", "2").await.unwrap();

    let started = Instant::now();
    let err = conveyer.send("in", "3").await.unwrap_err();
    assert!(started.elapsed() < Duration::from_millis(50));
    assert_eq!(err, ChannelError::Full("in".into()));
}

#[tokio::test]
async fn test_decorator_prefixes_once() {
    let conveyer = Arc::new(Conveyer::new(4));
    conveyer.register_decorator(prefix_decorator, "in", "out").unwrap();

    let cancel = CancellationToken::new();
    let handle = start(&conveyer, &cancel);

    conveyer.send("in", "x").await.unwrap();
    assert_eq!(recv(&conveyer, "out").await, "decorated: x");

    conveyer.send("in", "decorated: x").await.unwrap();
    assert_eq!(recv(&conveyer, "out").await, "decorated: x");

    cancel.cancel();
    finish(handle).await.unwrap();
}

#[tokio::test]
async fn test_poison_item_fails_the_run() {
    let conveyer = Arc::new(Conveyer::new(4));
    conveyer.register_decorator(prefix_decorator, "in", "out").unwrap();

    conveyer.send("in", "a").await.unwrap();
    conveyer.send("in", "no decorator").await.unwrap();
    conveyer.send("in", "b").await.unwrap();

    let err = finish(start(&conveyer, &CancellationToken::new()))
        .await
        .unwrap_err();
    assert!(err.to_string().starts_with("conveyer run failed"));
    assert!(matches!(err.stage_error(), Some(StageError::Undecoratable(item)) if item == "no decorator"));

    assert_eq!(recv(&conveyer, "out").await, "decorated: a");
    assert_eq!(recv(&conveyer, "out").await, UNDEFINED);
}

#[tokio::test]
async fn test_separator_is_round_robin() {
    let conveyer = Arc::new(Conveyer::new(4));
    conveyer.register_separator(separator, "in", &["even", "odd"]).unwrap();

    let cancel = CancellationToken::new();
    let handle = start(&conveyer, &cancel);

    for item in ["a", "b", "c", "d"] {
        conveyer.send("in", item).await.unwrap();
    }

    assert_eq!(recv(&conveyer, "even").await, "a");
    assert_eq!(recv(&conveyer, "even").await, "c");
    assert_eq!(recv(&conveyer, "odd").await, "b");
    assert_eq!(recv(&conveyer, "odd").await, "d");

    cancel.cancel();
    finish(handle).await.unwrap();
}

#[tokio::test]
async fn test_multiplexer_merges_and_skips() {
    let conveyer = Arc::new(Conveyer::new(4));
    conveyer.register_multiplexer(multiplexer, &["left", "right"], "out").unwrap();

    let cancel = CancellationToken::new();
    let handle = start(&conveyer, &cancel);

    conveyer.send("left", "l1").await.unwrap();
    conveyer.send("left", "no multiplexer l").await.unwrap();
    conveyer.send("right", "no multiplexer r").await.unwrap();
    conveyer.send("right", "r1").await.unwrap();

    let mut merged = vec![recv(&conveyer, "out").await, recv(&conveyer, "out").await];
    merged.sort();
    assert_eq!(merged, vec!["l1", "r1"]);

    cancel.cancel();
    finish(handle).await.unwrap();
    assert_eq!(recv(&conveyer, "out").await, UNDEFINED);
}

#[tokio::test]
async fn test_stages_compose_by_name() {
    let conveyer = Arc::new(Conveyer::new(4));
    conveyer.register_multiplexer(multiplexer, &["left", "right"], "merged").unwrap();
    conveyer.register_separator(separator, "tagged", &["left", "right"]).unwrap();
    conveyer.register_decorator(prefix_decorator, "raw", "tagged").unwrap();

    let cancel = CancellationToken::new();
    let handle = start(&conveyer, &cancel);

    for item in ["x", "decorated: y", "z"] {
        conveyer.send("raw", item).await.unwrap();
    }

    let mut merged = Vec::new();
    for _ in 0..3 {
        merged.push(recv(&conveyer, "merged").await);
    }
    merged.sort();
    assert_eq!(merged, vec!["decorated: x", "decorated: y", "decorated: z"]);

    cancel.cancel();
    finish(handle).await.unwrap();
}

#[tokio::test]
async fn test_recv_after_shutdown_is_undefined() {
    let conveyer = Arc::new(Conveyer::new(2));
    conveyer.register_decorator(prefix_decorator, "in", "out").unwrap();

    let cancel = CancellationToken::new();
    let handle = start(&conveyer, &cancel);
    cancel.cancel();
    finish(handle).await.unwrap();

    for name in ["in", "out"] {
        assert_eq!(recv(&conveyer, name).await, UNDEFINED);
    }
    assert_eq!(
        conveyer.send("in", "late").await.unwrap_err(),
        ChannelError::Closed("in".into())
    );
}

#[tokio::test]
async fn test_unknown_channel_is_not_found() {
    let conveyer = Arc::new(Conveyer::new(2));
    conveyer.register_decorator(prefix_decorator, "in", "out").unwrap();
    let missing = ChannelError::NotFound("nowhere".into());

    assert_eq!(conveyer.send("nowhere", "x").await.unwrap_err(), missing);
    assert_eq!(conveyer.recv("nowhere").await.unwrap_err(), missing);

    let cancel = CancellationToken::new();
    let handle = start(&conveyer, &cancel);
    assert_eq!(conveyer.send("nowhere", "x").await.unwrap_err(), missing);
    assert_eq!(conveyer.recv("nowhere").await.unwrap_err(), missing);

    cancel.cancel();
    finish(handle).await.unwrap();
    assert_eq!(conveyer.send("nowhere", "x").await.unwrap_err(), missing);
    assert_eq!(conveyer.recv("nowhere").await.unwrap_err(), missing);
}

#[tokio::test]
async fn test_cancel_unblocks_stage_stuck_on_send() {
    let conveyer = Arc::new(Conveyer::new(1));
    conveyer.register_decorator(prefix_decorator, "in", "out").unwrap();

    let cancel = CancellationToken::new();
    let handle = start(&conveyer, &cancel);

    // "out" fills after the first item, so the stage blocks sending the second
    conveyer.send("in", "1").await.unwrap();
    conveyer.send("in", "2").await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    cancel.cancel();
    finish(handle).await.unwrap();
    assert_eq!(recv(&conveyer, "out").await, "decorated: 1");
}
