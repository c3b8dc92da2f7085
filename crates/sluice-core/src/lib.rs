//! Core library for sluice: stream relay clients, the retry policy, agent
//! output parsers and the process supervisor.
//!
//! # Architecture
//!
//! ```text
//! sluice (CLI)
//!     |
//!     v
//! supervisor::run_agent
//!     |-- spawns the agent process (stdin null, stdout/stderr piped)
//!     |-- stdout chunks --> dyn StreamClient::put  (raw bytes, in order)
//!     |-- stdout lines  --> dyn AgentParser::handle_line
//!     |-- process exit  --> AgentParser::handle_close, then
//!     |                     StreamClient::wait() before the program exits
//!     v
//! client::http::HttpStreamClient   (range-addressed v2 protocol)
//! client::queue::QueueStreamClient (single-flight FIFO frames)
//! client::NoopClient               (relay disabled)
//! ```

pub mod agent;
pub mod client;
pub mod retry;
pub mod supervisor;
