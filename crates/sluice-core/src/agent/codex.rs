//! Codex CLI result parsing.

use serde_json::Value;

use super::AgentParser;

/// Tracks the final agent message and any terminal turn failure from
/// `codex exec --json` output.
#[derive(Debug, Default)]
pub struct CodexParser {
    final_message: Option<String>,
    turn_failure: Option<String>,
}

impl AgentParser for CodexParser {
    fn handle_line(&mut self, line: &str) {
        let Ok(value) = serde_json::from_str::<Value>(line) else {
            return;
        };
        match value.get("type").and_then(|t| t.as_str()) {
            Some("item.completed") => {
                let Some(item) = value.get("item") else {
                    return;
                };
                if item.get("type").and_then(|t| t.as_str()) == Some("agent_message") {
                    if let Some(text) = item.get("text").and_then(|t| t.as_str()) {
                        self.final_message = Some(text.to_string());
                    }
                }
            }
            Some("turn.failed") => {
                let message = value
                    .get("error")
                    .and_then(|e| e.get("message"))
                    .and_then(|m| m.as_str())
                    .unwrap_or("turn failed");
                self.turn_failure = Some(message.to_string());
            }
            _ => {}
        }
    }

    fn handle_close(&mut self, code: i32) -> Option<i32> {
        if code == 0 {
            match &self.final_message {
                Some(text) => println!("{text}"),
                None => println!("No final message."),
            }
        } else {
            match &self.turn_failure {
                Some(message) => eprintln!("{message}"),
                None => eprintln!("codex exit ({code}) with no error result."),
            }
        }
        None
    }
}
