//! Stream relay clients.
//!
//! [`StreamClient`] is the one contract the supervisor depends on. All
//! transports implement it: the range-addressed HTTP client
//! ([`http::HttpStreamClient`]), the single-flight queue client
//! ([`queue::QueueStreamClient`]), and the discarding [`NoopClient`].
//!
//! The contract is deliberately narrow: `put` and `stop` are synchronous
//! fire-and-forget calls that schedule work on the runtime, and `wait` is
//! the only suspension point -- it resolves once every operation the
//! client ever scheduled (including retries and buffered flushes) has
//! settled.

pub mod http;
pub mod queue;

use async_trait::async_trait;
use bytes::Bytes;

/// Ordered byte delivery to a remote ingestion endpoint.
///
/// # Object Safety
///
/// This trait is object-safe so the supervisor can hold
/// `Arc<dyn StreamClient>` regardless of the configured transport.
#[async_trait]
pub trait StreamClient: Send + Sync {
    /// Queue one chunk for delivery. Never blocks the caller.
    ///
    /// Chunks are delivered as a contiguous, gap-free byte stream in call
    /// order. Accepted before the session has initialized (buffered) and
    /// silently dropped once the stream has failed.
    fn put(&self, data: Bytes);

    /// Record stream termination.
    ///
    /// Idempotent: only the first call's `(abort, reason)` is kept and
    /// eventually transmitted. The terminal network action is deferred
    /// until every previously accepted chunk has settled.
    fn stop(&self, abort: bool, reason: &str);

    /// Suspend until all outstanding work has settled.
    ///
    /// Resolves immediately if the stream already failed before anything
    /// was sent.
    async fn wait(&self);
}

// Compile-time assertion: StreamClient must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn StreamClient) {}
};

/// Client that discards everything; used when no ingest endpoint is
/// configured.
#[derive(Debug, Default)]
pub struct NoopClient;

#[async_trait]
impl StreamClient for NoopClient {
    fn put(&self, _data: Bytes) {}

    fn stop(&self, _abort: bool, _reason: &str) {}

    async fn wait(&self) {}
}

/// One failed transport attempt.
///
/// Carried through the retry policy; the final instance surfaces in the
/// client's logs when an operation exhausts its budget.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The endpoint answered with a non-success status.
    #[error("failed to {action}: {status} {body}")]
    Status {
        action: &'static str,
        status: u16,
        body: String,
    },
    /// The request never completed.
    #[error("failed to {action}: {source}")]
    Request {
        action: &'static str,
        #[source]
        source: reqwest::Error,
    },
}

/// Map a response to `Ok(())` on 2xx or a [`TransportError::Status`]
/// carrying the response body for the logs.
pub(crate) async fn check_response(
    action: &'static str,
    res: reqwest::Response,
) -> Result<(), TransportError> {
    let status = res.status();
    if status.is_success() {
        return Ok(());
    }
    let body = res.text().await.unwrap_or_default();
    Err(TransportError::Status {
        action,
        status: status.as_u16(),
        body,
    })
}

/// Identity of one stream session.
#[derive(Debug, Clone)]
pub struct StreamDescriptor {
    /// Required stream id; addresses the session on the remote side.
    pub stream_id: String,
    /// Message id; defaults to the stream id at the configuration layer.
    pub message_id: String,
    /// Tag describing the payload schema (one per agent kind).
    pub content_type: String,
}
