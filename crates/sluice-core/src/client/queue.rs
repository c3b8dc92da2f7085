//! Sequential queue stream client.
//!
//! Strict single-flight FIFO alternative for transports without byte-range
//! addressing (an append-only topic). Frames carry no position
//! information, so ordering is guaranteed by never having more than one
//! publish in flight: the drain loop pops the queue head, publishes it
//! through the retry policy, and only then considers the next frame. The
//! terminal frame is published strictly after the queue has drained.
//!
//! Wire format: `[tag_byte] + payload` with tag `0` = init JSON, `1` = raw
//! data bytes, `2` = stop JSON.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use tokio::sync::Notify;
use tracing::{info, warn};

use super::{StreamClient, StreamDescriptor, TransportError, check_response};
use crate::retry::{RetryPolicy, retry};

/// Frame tag bytes on the wire.
pub const TAG_INIT: u8 = 0;
pub const TAG_DATA: u8 = 1;
pub const TAG_STOP: u8 = 2;

/// Append-only message transport the queue client publishes through.
///
/// # Object Safety
///
/// Object-safe so tests can substitute an in-memory recording publisher.
#[async_trait]
pub trait QueuePublisher: Send + Sync {
    /// Append one message to `topic`. One attempt; retries are the
    /// caller's concern.
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), TransportError>;
}

// Compile-time assertion: QueuePublisher must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn QueuePublisher) {}
};

/// HTTP-backed publisher: `POST {base}/topics/{topic}/messages` with the
/// raw frame as the body.
pub struct HttpQueuePublisher {
    http: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
}

impl HttpQueuePublisher {
    pub fn new(base_url: impl Into<String>, auth_token: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth_token,
        }
    }
}

#[async_trait]
impl QueuePublisher for HttpQueuePublisher {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), TransportError> {
        let url = format!("{}/topics/{topic}/messages", self.base_url);
        let mut req = self.http.post(&url).body(payload);
        if let Some(token) = &self.auth_token {
            req = req.bearer_auth(token);
        }
        let res = req.send().await.map_err(|source| TransportError::Request {
            action: "publish frame",
            source,
        })?;
        check_response("publish frame", res).await
    }
}

/// Derive the topic for one stream: the configured URL's path joined with
/// the stream id.
pub fn derive_topic(stream_url: &str, stream_id: &str) -> Result<String> {
    let url = reqwest::Url::parse(stream_url)
        .with_context(|| format!("invalid stream URL: {stream_url}"))?;
    Ok(format!("{}-{stream_id}", url.path()))
}

fn frame(tag: u8, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(1 + payload.len());
    buf.put_u8(tag);
    buf.put_slice(payload);
    buf.freeze()
}

fn encode_init(descriptor: &StreamDescriptor) -> Bytes {
    let body = serde_json::json!({
        "stream_id": descriptor.stream_id,
        "message_id": descriptor.message_id,
        "content_type": descriptor.content_type,
    });
    frame(TAG_INIT, body.to_string().as_bytes())
}

fn encode_data(data: &Bytes) -> Bytes {
    frame(TAG_DATA, data)
}

fn encode_stop(abort: bool, reason: &str, final_size: u64) -> Bytes {
    let body = serde_json::json!({
        "stop_state": if abort { "abort" } else { "done" },
        "stop_reason": reason,
        "final_size": final_size,
    });
    frame(TAG_STOP, body.to_string().as_bytes())
}

struct QueueState {
    /// Encoded frames awaiting publish, FIFO.
    queue: VecDeque<Bytes>,
    /// Count of accepted data frames; reported as `final_size`.
    data_frames: u64,
    /// Encoded terminal frame, published only once the queue is empty.
    stop_frame: Option<Bytes>,
    stop_requested: bool,
    /// True while the drain loop owns the single publish slot.
    busy: bool,
    failed: bool,
}

struct QueueShared {
    publisher: Arc<dyn QueuePublisher>,
    topic: String,
    retry: RetryPolicy,
    state: Mutex<QueueState>,
    /// Signalled after every frame settlement and on idle transitions.
    settled: Notify,
}

/// Stream client over an append-only message queue.
pub struct QueueStreamClient {
    shared: Arc<QueueShared>,
}

impl QueueStreamClient {
    /// Create the client and enqueue the init frame. Must be called from
    /// within a tokio runtime.
    pub fn new(
        publisher: Arc<dyn QueuePublisher>,
        topic: impl Into<String>,
        descriptor: &StreamDescriptor,
        retry: RetryPolicy,
    ) -> Self {
        let shared = Arc::new(QueueShared {
            publisher,
            topic: topic.into(),
            retry,
            state: Mutex::new(QueueState {
                queue: VecDeque::from([encode_init(descriptor)]),
                data_frames: 0,
                stop_frame: None,
                stop_requested: false,
                busy: false,
                failed: false,
            }),
            settled: Notify::new(),
        });
        QueueShared::trigger(&shared);
        Self { shared }
    }

    /// Whether a frame publish exhausted its retries.
    pub fn is_failed(&self) -> bool {
        self.shared.lock_state().failed
    }
}

impl QueueShared {
    fn lock_state(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state.lock().expect("state lock poisoned")
    }

    /// Start the drain loop if it is idle. At most one loop (and therefore
    /// one in-flight publish) exists at any time.
    fn trigger(this: &Arc<QueueShared>) {
        {
            let mut state = this.lock_state();
            if state.busy || state.failed {
                return;
            }
            state.busy = true;
        }
        let s = Arc::clone(this);
        tokio::spawn(async move {
            s.drain().await;
        });
    }

    async fn drain(self: Arc<Self>) {
        loop {
            let next = {
                let mut state = self.lock_state();
                let frame = match state.queue.pop_front() {
                    Some(frame) => Some(frame),
                    // The stop frame only leaves once the queue is empty.
                    None => state.stop_frame.take(),
                };
                if frame.is_none() {
                    // Going idle must happen in the same critical section
                    // as the empty check, or a racing put() could see the
                    // loop as busy and strand its frame.
                    state.busy = false;
                }
                frame
            };
            let Some(payload) = next else {
                self.settled.notify_waiters();
                return;
            };

            let result = {
                let op = Arc::clone(&self);
                let op_payload = payload.clone();
                retry("send frame", self.retry, move || {
                    let op = Arc::clone(&op);
                    let payload = op_payload.clone();
                    async move { op.publisher.publish(&op.topic, payload).await }
                })
                .await
            };

            if let Err(e) = result {
                warn!(
                    topic = %self.topic,
                    error = %e,
                    "frame publish exhausted retries, dropping stream"
                );
                let mut state = self.lock_state();
                state.failed = true;
                state.queue.clear();
                state.stop_frame = None;
                state.busy = false;
                drop(state);
                self.settled.notify_waiters();
                return;
            }
            self.settled.notify_waiters();
        }
    }
}

#[async_trait]
impl StreamClient for QueueStreamClient {
    fn put(&self, data: Bytes) {
        {
            let mut state = self.shared.lock_state();
            if state.failed || state.stop_requested {
                return;
            }
            state.data_frames += 1;
            state.queue.push_back(encode_data(&data));
        }
        QueueShared::trigger(&self.shared);
    }

    fn stop(&self, abort: bool, reason: &str) {
        {
            let mut state = self.shared.lock_state();
            if state.failed || state.stop_requested {
                return;
            }
            state.stop_requested = true;
            info!(
                topic = %self.shared.topic,
                abort,
                reason,
                data_frames = state.data_frames,
                "stream stop requested"
            );
            state.stop_frame = Some(encode_stop(abort, reason, state.data_frames));
        }
        QueueShared::trigger(&self.shared);
    }

    async fn wait(&self) {
        loop {
            // Register for the settle signal before inspecting state, so a
            // settlement between the check and the await cannot be missed.
            let settled = self.shared.settled.notified();
            tokio::pin!(settled);
            settled.as_mut().enable();
            {
                let state = self.shared.lock_state();
                let done =
                    state.failed || (state.queue.is_empty() && state.stop_frame.is_none());
                if !state.busy && done {
                    return;
                }
            }
            settled.await;
        }
    }
}
