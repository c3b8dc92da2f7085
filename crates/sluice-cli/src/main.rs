mod config;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use sluice_core::agent::AgentKind;
use sluice_core::client::http::{HttpClientConfig, HttpStreamClient};
use sluice_core::client::queue::{HttpQueuePublisher, QueueStreamClient, derive_topic};
use sluice_core::client::{NoopClient, StreamClient, StreamDescriptor};
use sluice_core::retry::RetryPolicy;
use sluice_core::supervisor::run_agent;

#[derive(Parser)]
#[command(
    name = "sluice",
    about = "Tee a coding agent's live output to a stream ingest endpoint",
    version
)]
struct Cli {
    /// Agent to run: claude, codex, dev or review
    agent: String,

    /// Ingest endpoint base URL (env: SLUICE_STREAM_URL)
    #[arg(long)]
    stream_url: Option<String>,

    /// Stream id for this run (env: SLUICE_STREAM_ID; default: random UUID)
    #[arg(long)]
    stream_id: Option<String>,

    /// Message id (defaults to the stream id)
    #[arg(long)]
    message_id: Option<String>,

    /// Bearer token sent on every ingest request (env: SLUICE_STREAM_TOKEN)
    #[arg(long)]
    stream_token: Option<String>,

    /// Transport used for the relay
    #[arg(long, value_enum, default_value_t = Transport::Http)]
    transport: Transport,

    /// Arguments passed through to the agent executable
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    agent_args: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum Transport {
    /// Range-addressed v2 HTTP protocol
    Http,
    /// Single-flight FIFO frames on an append-only topic
    Queue,
    /// Discard everything (run the agent without relaying)
    None,
}

async fn run(cli: Cli) -> Result<i32> {
    let kind = AgentKind::from_name(&cli.agent)?;
    let relay = config::RelayConfig::resolve(
        cli.stream_url,
        cli.stream_id,
        cli.message_id,
        cli.stream_token,
    );

    let descriptor = StreamDescriptor {
        stream_id: relay.stream_id.clone(),
        message_id: relay.message_id.clone(),
        content_type: kind.content_type().to_string(),
    };

    let client: Arc<dyn StreamClient> = match cli.transport {
        Transport::None => Arc::new(NoopClient),
        Transport::Http => {
            let url = relay.stream_url.clone().context(
                "stream URL required: pass --stream-url or set SLUICE_STREAM_URL \
                 (or use --transport none)",
            )?;
            Arc::new(HttpStreamClient::new(
                url,
                relay.token.clone(),
                descriptor,
                HttpClientConfig::default(),
            ))
        }
        Transport::Queue => {
            let url = relay.stream_url.clone().context(
                "stream URL required: pass --stream-url or set SLUICE_STREAM_URL \
                 (or use --transport none)",
            )?;
            let topic = derive_topic(&url, &relay.stream_id)?;
            let publisher = Arc::new(HttpQueuePublisher::new(url, relay.token.clone()));
            Arc::new(QueueStreamClient::new(
                publisher,
                topic,
                &descriptor,
                RetryPolicy::default(),
            ))
        }
    };

    info!(
        agent = %cli.agent,
        stream_id = %relay.stream_id,
        transport = ?cli.transport,
        "starting agent relay"
    );

    let command = kind.command(&cli.agent_args);
    let mut parser = kind.parser();
    run_agent(&command, parser.as_mut(), client.as_ref()).await
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        // The agent's exit status is the program's exit status.
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("{e:#}");
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_passthrough_args() {
        // Relay options come first; everything after the agent name is
        // handed to the agent untouched.
        let cli = Cli::parse_from([
            "sluice",
            "--stream-url",
            "http://localhost:8888",
            "--stream-id",
            "s1",
            "claude",
            "--model",
            "opus",
        ]);
        assert_eq!(cli.agent, "claude");
        assert_eq!(cli.stream_url.as_deref(), Some("http://localhost:8888"));
        assert_eq!(cli.stream_id.as_deref(), Some("s1"));
        assert_eq!(cli.transport, Transport::Http);
        assert_eq!(cli.agent_args, vec!["--model", "opus"]);
    }

    #[test]
    fn cli_accepts_hyphenated_passthrough_without_separator() {
        let cli = Cli::parse_from(["sluice", "--transport", "none", "codex", "-m", "gpt"]);
        assert_eq!(cli.agent, "codex");
        assert_eq!(cli.transport, Transport::None);
        assert_eq!(cli.agent_args, vec!["-m", "gpt"]);
    }
}
