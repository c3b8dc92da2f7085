//! Agent output parsers.
//!
//! Each supported agent executable emits newline-delimited JSON on stdout
//! and, somewhere in that stream, a terminal result. One [`AgentParser`]
//! variant per executable knows how to spot that result and render it when
//! the process closes. Variants are selected by the [`AgentKind`] tagged
//! enum -- never by inheritance.

pub mod claude;
pub mod codex;
pub mod pantheon;

use anyhow::bail;

pub use claude::ClaudeParser;
pub use codex::CodexParser;
pub use pantheon::PantheonParser;

/// Per-agent parsing capability.
///
/// `handle_line` opportunistically parses one non-blank stdout line and
/// silently ignores anything malformed. `handle_close` renders the
/// captured result (or a fallback notice) to the host program's own
/// stdout/stderr once the process has exited.
pub trait AgentParser: Send {
    /// Inspect one non-blank stdout line.
    fn handle_line(&mut self, line: &str);

    /// Render the terminal result after the process closed with `code`.
    ///
    /// Returns `Some(code)` when the result itself demands a different
    /// exit status than the process reported.
    fn handle_close(&mut self, code: i32) -> Option<i32>;
}

/// Supported agent executables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentKind {
    Claude,
    Codex,
    PantheonDev,
    PantheonReview,
}

/// Fully resolved invocation for an agent executable.
#[derive(Debug, Clone)]
pub struct AgentCommand {
    pub exec: String,
    pub args: Vec<String>,
}

impl AgentKind {
    /// Resolve a user-facing agent name, including the pantheon aliases.
    pub fn from_name(name: &str) -> anyhow::Result<Self> {
        match name {
            "claude" => Ok(Self::Claude),
            "codex" => Ok(Self::Codex),
            "dev" | "tdd" | "pantheon-tdd" | "dev-agent" => Ok(Self::PantheonDev),
            "review" | "pantheon-review" | "review-agent" => Ok(Self::PantheonReview),
            other => bail!("unknown agent '{other}' (expected claude, codex, dev or review)"),
        }
    }

    /// Executable name, resolved via `$PATH`.
    pub fn executable(&self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Codex => "codex",
            Self::PantheonDev => "dev-agent",
            Self::PantheonReview => "review",
        }
    }

    /// Fixed argument prefix that puts the executable into line-oriented
    /// streaming mode.
    pub fn base_args(&self) -> &'static [&'static str] {
        match self {
            Self::Claude => &[
                "-p",
                "--output-format",
                "stream-json",
                "--include-partial-messages",
                "--verbose",
            ],
            Self::Codex => &["exec", "--json"],
            Self::PantheonDev | Self::PantheonReview => &["--headless", "--stream-json"],
        }
    }

    /// Payload schema tag carried in the stream descriptor.
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Claude => "claude-code-stream-json+include-partial-messages",
            Self::Codex => "codex-exec-json",
            Self::PantheonDev | Self::PantheonReview => "pantheon-stream-json",
        }
    }

    /// Build the full invocation: fixed prefix, then passthrough args.
    pub fn command(&self, extra_args: &[String]) -> AgentCommand {
        let mut args: Vec<String> = self.base_args().iter().map(|s| s.to_string()).collect();
        args.extend(extra_args.iter().cloned());
        AgentCommand {
            exec: self.executable().to_string(),
            args,
        }
    }

    /// Fresh parser for this agent kind.
    pub fn parser(&self) -> Box<dyn AgentParser> {
        match self {
            Self::Claude => Box::new(ClaudeParser::default()),
            Self::Codex => Box::new(CodexParser::default()),
            Self::PantheonDev | Self::PantheonReview => Box::new(PantheonParser::default()),
        }
    }
}
