//! Range-addressed HTTP stream client (v2 protocol).
//!
//! Each chunk is uploaded with an absolute `X-Content-Range` header, so
//! uploads may settle out of order while the remote side still reassembles
//! a gap-free byte stream -- there is no separate sequence field. The
//! cursor is advanced synchronously under the state lock at `put()` time,
//! which is what keeps ranges contiguous and collision-free even when many
//! puts race their own uploads.
//!
//! Lifecycle: `Buffering --init ok--> Streaming --stop, drained--> Stopped`;
//! init exhaustion or upload exhaustion moves the stream to `Failed`, a
//! one-way transition after which puts are dropped and nothing further is
//! transmitted.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures::future::join_all;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{StreamClient, StreamDescriptor, TransportError, check_response};
use crate::retry::{RetryPolicy, retry};

/// Timing and retry knobs for [`HttpStreamClient`].
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Keep-alive period; reset by every successful upload.
    pub heartbeat_interval: Duration,
    /// Retry budget applied to init, content and stop calls.
    pub retry: RetryPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(5),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Session init outstanding; puts accumulate in the buffer.
    Buffering,
    /// Session active; puts upload immediately.
    Streaming,
    /// Stop transmitted after a full drain. Terminal.
    Stopped,
    /// Init or an upload exhausted its retries. Terminal, one-way.
    Failed,
}

#[derive(Debug, Clone)]
struct StopRequest {
    abort: bool,
    reason: String,
}

struct State {
    phase: Phase,
    /// Chunks accepted before init settled, in call order.
    buffer: Vec<Bytes>,
    /// Next unused byte offset.
    cursor: u64,
    /// Settle-set: every operation wait() must see finished.
    pending: Vec<JoinHandle<()>>,
    /// First stop() call, transmitted during wait() finalization.
    stop: Option<StopRequest>,
}

struct Shared {
    http: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
    descriptor: StreamDescriptor,
    config: HttpClientConfig,
    state: Mutex<State>,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
}

/// Stream client over the v2 HTTP ingest protocol.
pub struct HttpStreamClient {
    shared: Arc<Shared>,
}

impl HttpStreamClient {
    /// Create the client and immediately begin session initialization and
    /// the heartbeat timer. Must be called from within a tokio runtime.
    pub fn new(
        base_url: impl Into<String>,
        auth_token: Option<String>,
        descriptor: StreamDescriptor,
        config: HttpClientConfig,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let shared = Arc::new(Shared {
            http: reqwest::Client::new(),
            base_url,
            auth_token,
            descriptor,
            config,
            state: Mutex::new(State {
                phase: Phase::Buffering,
                buffer: Vec::new(),
                cursor: 0,
                pending: Vec::new(),
                stop: None,
            }),
            heartbeat: Mutex::new(None),
        });
        Shared::schedule_heartbeat(&shared);
        Shared::spawn_init(&shared);
        Self { shared }
    }

    /// Whether the stream has entered the terminal `Failed` state.
    pub fn is_failed(&self) -> bool {
        self.shared.state.lock().expect("state lock poisoned").phase == Phase::Failed
    }
}

impl Shared {
    fn lock_state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("state lock poisoned")
    }

    // -- request helpers ---------------------------------------------------

    fn authorized(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn send_init(&self) -> Result<(), TransportError> {
        let url = format!("{}/v2/streams", self.base_url);
        let body = serde_json::json!({
            "stream_id": self.descriptor.stream_id,
            "message_id": self.descriptor.message_id,
            "content_type": self.descriptor.content_type,
        });
        let res = self
            .authorized(self.http.post(&url).json(&body))
            .send()
            .await
            .map_err(|source| TransportError::Request {
                action: "init stream",
                source,
            })?;
        check_response("init stream", res).await
    }

    async fn send_content(&self, range: &str, data: Bytes) -> Result<(), TransportError> {
        let url = format!(
            "{}/v2/streams/{}/content",
            self.base_url, self.descriptor.stream_id
        );
        let res = self
            .authorized(
                self.http
                    .put(&url)
                    .header("X-Content-Range", range)
                    .body(data),
            )
            .send()
            .await
            .map_err(|source| TransportError::Request {
                action: "send content",
                source,
            })?;
        check_response("send content", res).await
    }

    async fn send_heartbeat(&self) -> Result<(), TransportError> {
        let url = format!(
            "{}/v2/streams/{}/actions/heartbeat",
            self.base_url, self.descriptor.stream_id
        );
        let res = self
            .authorized(self.http.post(&url))
            .send()
            .await
            .map_err(|source| TransportError::Request {
                action: "send heartbeat",
                source,
            })?;
        check_response("send heartbeat", res).await
    }

    async fn send_stop(&self, stop: &StopRequest, final_size: u64) -> Result<(), TransportError> {
        let url = format!(
            "{}/v2/streams/{}/actions/stop",
            self.base_url, self.descriptor.stream_id
        );
        let body = serde_json::json!({
            "stop_state": if stop.abort { "abort" } else { "done" },
            "stop_reason": stop.reason,
            "final_size": final_size,
        });
        let res = self
            .authorized(self.http.post(&url).json(&body))
            .send()
            .await
            .map_err(|source| TransportError::Request {
                action: "stop stream",
                source,
            })?;
        check_response("stop stream", res).await
    }

    // -- session init ------------------------------------------------------

    fn spawn_init(this: &Arc<Shared>) {
        let s = Arc::clone(this);
        let handle = tokio::spawn(async move {
            let result = {
                let op = Arc::clone(&s);
                retry("init stream", s.config.retry, move || {
                    let op = Arc::clone(&op);
                    async move { op.send_init().await }
                })
                .await
            };
            match result {
                Ok(()) => Shared::finish_init(&s),
                Err(e) => {
                    warn!(
                        stream_id = %s.descriptor.stream_id,
                        error = %e,
                        "stream init exhausted retries, dropping stream"
                    );
                    s.fail();
                }
            }
        });
        this.lock_state().pending.push(handle);
    }

    /// Mark the session active and flush the buffer through the normal put
    /// path in original call order. Range assignment happens under one
    /// lock acquisition so a racing `put()` cannot interleave the flush.
    fn finish_init(this: &Arc<Shared>) {
        let jobs: Vec<(u64, Bytes)> = {
            let mut state = this.lock_state();
            if state.phase != Phase::Buffering {
                return;
            }
            state.phase = Phase::Streaming;
            let buffered = std::mem::take(&mut state.buffer);
            let mut jobs = Vec::with_capacity(buffered.len());
            for chunk in buffered {
                let start = state.cursor;
                state.cursor += chunk.len() as u64;
                jobs.push((start, chunk));
            }
            jobs
        };
        debug!(
            stream_id = %this.descriptor.stream_id,
            flushed = jobs.len(),
            "stream initialized"
        );
        let handles: Vec<JoinHandle<()>> = jobs
            .into_iter()
            .map(|(start, chunk)| Shared::upload_task(this, start, chunk))
            .collect();
        this.lock_state().pending.extend(handles);
    }

    // -- chunk upload ------------------------------------------------------

    fn upload_task(this: &Arc<Shared>, start: u64, data: Bytes) -> JoinHandle<()> {
        let s = Arc::clone(this);
        tokio::spawn(async move {
            let end = start + data.len() as u64 - 1;
            let range = format!("bytes {start}-{end}");
            let result = {
                let op = Arc::clone(&s);
                let op_range = range.clone();
                retry(&format!("send range {range}"), s.config.retry, move || {
                    let op = Arc::clone(&op);
                    let range = op_range.clone();
                    let data = data.clone();
                    async move { op.send_content(&range, data).await }
                })
                .await
            };
            match result {
                Ok(()) => {
                    if s.heartbeat_allowed() {
                        Shared::schedule_heartbeat(&s);
                    }
                }
                Err(e) => {
                    warn!(
                        stream_id = %s.descriptor.stream_id,
                        range = %range,
                        error = %e,
                        "chunk upload exhausted retries, dropping stream"
                    );
                    // The synthesized abort is recorded nowhere: the stream
                    // is already failed when stop() runs, so it no-ops and
                    // the failure stays local-only.
                    s.fail();
                    s.record_stop(true, "failed to send data");
                }
            }
        })
    }

    // -- heartbeat ---------------------------------------------------------

    fn heartbeat_allowed(&self) -> bool {
        let state = self.lock_state();
        matches!(state.phase, Phase::Buffering | Phase::Streaming) && state.stop.is_none()
    }

    /// (Re)arm the keep-alive timer. Replaces any pending firing, so a
    /// successful upload pushes the next heartbeat a full interval out.
    fn schedule_heartbeat(this: &Arc<Shared>) {
        let s = Arc::clone(this);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(s.config.heartbeat_interval).await;
            if !s.heartbeat_allowed() {
                return;
            }
            if let Err(e) = s.send_heartbeat().await {
                // Heartbeat failure never fails the stream.
                debug!(
                    stream_id = %s.descriptor.stream_id,
                    error = %e,
                    "heartbeat failed, ignoring"
                );
            }
            if s.heartbeat_allowed() {
                Shared::schedule_heartbeat(&s);
            }
        });
        let mut slot = this.heartbeat.lock().expect("heartbeat lock poisoned");
        if let Some(old) = slot.replace(handle) {
            old.abort();
        }
    }

    fn cancel_heartbeat(&self) {
        if let Some(handle) = self
            .heartbeat
            .lock()
            .expect("heartbeat lock poisoned")
            .take()
        {
            handle.abort();
        }
    }

    // -- terminal transitions ----------------------------------------------

    fn fail(&self) {
        {
            let mut state = self.lock_state();
            if state.phase == Phase::Failed {
                return;
            }
            state.phase = Phase::Failed;
            state.buffer.clear();
        }
        self.cancel_heartbeat();
    }

    fn record_stop(&self, abort: bool, reason: &str) {
        {
            let mut state = self.lock_state();
            if state.phase == Phase::Failed || state.stop.is_some() {
                return;
            }
            info!(
                stream_id = %self.descriptor.stream_id,
                abort,
                reason,
                cursor = state.cursor,
                "stream stop requested"
            );
            state.stop = Some(StopRequest {
                abort,
                reason: reason.to_string(),
            });
        }
        self.cancel_heartbeat();
    }
}

#[async_trait::async_trait]
impl StreamClient for HttpStreamClient {
    fn put(&self, data: Bytes) {
        if data.is_empty() {
            // A zero-length chunk has no addressable range.
            return;
        }
        let mut state = self.shared.lock_state();
        match state.phase {
            Phase::Failed | Phase::Stopped => {}
            Phase::Buffering => state.buffer.push(data),
            Phase::Streaming => {
                let start = state.cursor;
                state.cursor += data.len() as u64;
                let handle = Shared::upload_task(&self.shared, start, data);
                state.pending.push(handle);
            }
        }
    }

    fn stop(&self, abort: bool, reason: &str) {
        self.shared.record_stop(abort, reason);
    }

    async fn wait(&self) {
        // Iteratively drain the settle-set. Operations that settle can
        // schedule new ones (the init task flushes the buffer), so the set
        // is re-checked after every pass until it stays empty.
        loop {
            let pending = std::mem::take(&mut self.shared.lock_state().pending);
            if pending.is_empty() {
                break;
            }
            let _ = join_all(pending).await;
        }

        // Finalization: the deferred stop action goes out only now, after
        // every accepted chunk has settled, and never on a failed stream.
        let deferred = {
            let state = self.shared.lock_state();
            if state.phase == Phase::Streaming {
                state.stop.clone().map(|stop| (stop, state.cursor))
            } else {
                None
            }
        };
        if let Some((stop, final_size)) = deferred {
            let result = {
                let op = Arc::clone(&self.shared);
                let op_stop = stop.clone();
                retry("stop stream", self.shared.config.retry, move || {
                    let op = Arc::clone(&op);
                    let stop = op_stop.clone();
                    async move { op.send_stop(&stop, final_size).await }
                })
                .await
            };
            if let Err(e) = result {
                warn!(
                    stream_id = %self.shared.descriptor.stream_id,
                    error = %e,
                    "failed to deliver stop action"
                );
            }
            let mut state = self.shared.lock_state();
            if state.phase == Phase::Streaming {
                state.phase = Phase::Stopped;
            }
        }
    }
}
