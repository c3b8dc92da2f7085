//! Integration tests for the single-flight queue client, run against an
//! in-memory publisher that records frames and can inject failures.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use sluice_core::client::queue::{
    QueuePublisher, QueueStreamClient, TAG_DATA, TAG_INIT, TAG_STOP,
};
use sluice_core::client::{StreamClient, StreamDescriptor, TransportError};
use sluice_core::retry::RetryPolicy;

// -----------------------------------------------------------------------
// Recording publisher
// -----------------------------------------------------------------------

#[derive(Default)]
struct MemoryPublisher {
    frames: Mutex<Vec<(String, Bytes)>>,
    attempts: AtomicUsize,
    /// Fail this many publishes before succeeding again.
    failures_remaining: AtomicUsize,
    /// Artificial latency per publish, to widen concurrency windows.
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MemoryPublisher {
    fn induced_failure() -> TransportError {
        TransportError::Status {
            action: "publish frame",
            status: 500,
            body: "induced failure".to_string(),
        }
    }

    fn frames(&self) -> Vec<(String, Bytes)> {
        self.frames.lock().unwrap().clone()
    }
}

#[async_trait]
impl QueuePublisher for MemoryPublisher {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), TransportError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        self.attempts.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(Self::induced_failure());
        }
        self.frames
            .lock()
            .unwrap()
            .push((topic.to_string(), payload));
        Ok(())
    }
}

// -----------------------------------------------------------------------
// Helpers
// -----------------------------------------------------------------------

fn descriptor() -> StreamDescriptor {
    StreamDescriptor {
        stream_id: "stream-1".to_string(),
        message_id: "message-1".to_string(),
        content_type: "test-stream".to_string(),
    }
}

fn quick_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        delay: Duration::from_millis(10),
    }
}

fn client(publisher: Arc<MemoryPublisher>) -> QueueStreamClient {
    QueueStreamClient::new(publisher, "/ingest-stream-1", &descriptor(), quick_retry())
}

fn stop_body(frame: &Bytes) -> serde_json::Value {
    assert_eq!(frame[0], TAG_STOP);
    serde_json::from_slice(&frame[1..]).expect("stop frame should be JSON")
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------

#[tokio::test]
async fn frames_arrive_as_init_then_data_then_stop() {
    let publisher = Arc::new(MemoryPublisher::default());
    let client = client(Arc::clone(&publisher));

    client.put(Bytes::from_static(b"alpha"));
    client.put(Bytes::from_static(b"beta"));
    client.stop(false, "stdout end");
    client.wait().await;

    let frames = publisher.frames();
    assert_eq!(frames.len(), 4);
    assert!(frames.iter().all(|(topic, _)| topic == "/ingest-stream-1"));

    assert_eq!(frames[0].1[0], TAG_INIT);
    let init: serde_json::Value = serde_json::from_slice(&frames[0].1[1..]).unwrap();
    assert_eq!(init["stream_id"], "stream-1");
    assert_eq!(init["content_type"], "test-stream");

    assert_eq!(frames[1].1[0], TAG_DATA);
    assert_eq!(&frames[1].1[1..], b"alpha");
    assert_eq!(frames[2].1[0], TAG_DATA);
    assert_eq!(&frames[2].1[1..], b"beta");

    let stop = stop_body(&frames[3].1);
    assert_eq!(stop["stop_state"], "done");
    assert_eq!(stop["stop_reason"], "stdout end");
    assert_eq!(stop["final_size"], 2, "final_size counts data frames");
}

#[tokio::test]
async fn never_more_than_one_publish_in_flight() {
    let publisher = Arc::new(MemoryPublisher {
        delay: Some(Duration::from_millis(5)),
        ..MemoryPublisher::default()
    });
    let client = client(Arc::clone(&publisher));

    for i in 0..8 {
        client.put(Bytes::from(format!("chunk-{i}")));
    }
    client.stop(false, "stdout end");
    client.wait().await;

    assert_eq!(publisher.max_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(publisher.frames().len(), 10);
}

#[tokio::test]
async fn flaky_publish_retries_without_duplicating_frames() {
    let publisher = Arc::new(MemoryPublisher::default());
    publisher.failures_remaining.store(2, Ordering::SeqCst);
    let client = client(Arc::clone(&publisher));

    client.put(Bytes::from_static(b"payload"));
    client.stop(false, "stdout end");
    client.wait().await;

    assert!(!client.is_failed());
    let frames = publisher.frames();
    // init (3 attempts), data, stop -- each recorded exactly once.
    assert_eq!(frames.len(), 3);
    assert_eq!(publisher.attempts.load(Ordering::SeqCst), 5);
}

#[tokio::test]
async fn publish_exhaustion_discards_remaining_frames() {
    let publisher = Arc::new(MemoryPublisher::default());
    publisher
        .failures_remaining
        .store(usize::MAX, Ordering::SeqCst);
    let client = client(Arc::clone(&publisher));

    client.put(Bytes::from_static(b"never"));
    client.stop(false, "stdout end");
    client.wait().await;

    assert!(client.is_failed());
    assert!(publisher.frames().is_empty());
    // Only the init frame burned its attempt budget.
    assert_eq!(publisher.attempts.load(Ordering::SeqCst), 3);

    // Post-failure calls are no-ops.
    client.put(Bytes::from_static(b"late"));
    client.stop(true, "again");
    client.wait().await;
    assert_eq!(publisher.attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn stop_is_idempotent_and_first_call_wins() {
    let publisher = Arc::new(MemoryPublisher::default());
    let client = client(Arc::clone(&publisher));

    client.stop(true, "first");
    client.stop(false, "second");
    client.wait().await;

    let frames = publisher.frames();
    let stops: Vec<_> = frames.iter().filter(|(_, f)| f[0] == TAG_STOP).collect();
    assert_eq!(stops.len(), 1);
    let stop = stop_body(&stops[0].1);
    assert_eq!(stop["stop_state"], "abort");
    assert_eq!(stop["stop_reason"], "first");
}

#[tokio::test]
async fn puts_after_stop_are_dropped() {
    let publisher = Arc::new(MemoryPublisher::default());
    let client = client(Arc::clone(&publisher));

    client.put(Bytes::from_static(b"kept"));
    client.stop(false, "stdout end");
    client.put(Bytes::from_static(b"dropped"));
    client.wait().await;

    let frames = publisher.frames();
    let data: Vec<_> = frames.iter().filter(|(_, f)| f[0] == TAG_DATA).collect();
    assert_eq!(data.len(), 1);
    assert_eq!(&data[0].1[1..], b"kept");
    // The stop frame is last even though a put raced it.
    assert_eq!(frames.last().unwrap().1[0], TAG_STOP);
}
