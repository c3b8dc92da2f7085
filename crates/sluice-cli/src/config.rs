//! CLI configuration resolution.
//!
//! Every value resolves through the chain: CLI flag > env var > default.
//! There is no on-disk config file; a relay run is fully described by its
//! invocation.

pub const ENV_STREAM_URL: &str = "SLUICE_STREAM_URL";
pub const ENV_STREAM_ID: &str = "SLUICE_STREAM_ID";
pub const ENV_STREAM_TOKEN: &str = "SLUICE_STREAM_TOKEN";

/// Fully resolved relay settings.
#[derive(Debug)]
pub struct RelayConfig {
    /// Ingest endpoint base URL; `None` means relaying is disabled.
    pub stream_url: Option<String>,
    pub stream_id: String,
    /// Defaults to the stream id.
    pub message_id: String,
    /// Bearer token sent on every ingest request.
    pub token: Option<String>,
}

impl RelayConfig {
    pub fn resolve(
        flag_url: Option<String>,
        flag_id: Option<String>,
        flag_message_id: Option<String>,
        flag_token: Option<String>,
    ) -> Self {
        let stream_url = flag_url
            .or_else(|| std::env::var(ENV_STREAM_URL).ok())
            .filter(|v| !v.is_empty());
        let stream_id = flag_id
            .or_else(|| std::env::var(ENV_STREAM_ID).ok())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let message_id = flag_message_id
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| stream_id.clone());
        let token = flag_token
            .or_else(|| std::env::var(ENV_STREAM_TOKEN).ok())
            .filter(|v| !v.is_empty());
        Self {
            stream_url,
            stream_id,
            message_id,
            token,
        }
    }
}
