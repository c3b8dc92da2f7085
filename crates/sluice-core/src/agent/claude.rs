//! Claude Code result parsing.

use serde_json::Value;

use super::AgentParser;

/// Captures the last `type == "result"` line from Claude Code's
/// stream-json output.
///
/// The result message carries a `subtype` (`"success"` or an error
/// subtype), an `is_error` flag, and the final `result` text.
#[derive(Debug, Default)]
pub struct ClaudeParser {
    result: Option<Value>,
}

impl AgentParser for ClaudeParser {
    fn handle_line(&mut self, line: &str) {
        let Ok(value) = serde_json::from_str::<Value>(line) else {
            return;
        };
        if value.get("type").and_then(|t| t.as_str()) == Some("result") {
            self.result = Some(value);
        }
    }

    fn handle_close(&mut self, code: i32) -> Option<i32> {
        let Some(result) = &self.result else {
            eprintln!("claude exit ({code}) with no result message.");
            return None;
        };
        let subtype = result.get("subtype").and_then(|s| s.as_str()).unwrap_or("");
        if subtype == "success" {
            let text = result.get("result").and_then(|r| r.as_str()).unwrap_or("");
            if result
                .get("is_error")
                .and_then(|e| e.as_bool())
                .unwrap_or(false)
            {
                eprintln!("{text}");
            } else {
                println!("{text}");
            }
        } else {
            eprintln!("{subtype}");
        }
        None
    }
}
