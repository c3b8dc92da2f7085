//! Pantheon agent result parsing.
//!
//! Both pantheon sub-agents (`dev-agent` and `review`) share one stream
//! shape: a `thread.completed` item carrying a status, a summary and a
//! structured final report.

use serde_json::Value;

use super::AgentParser;

#[derive(Debug, Default)]
pub struct PantheonParser {
    completed: Option<Value>,
}

impl AgentParser for PantheonParser {
    fn handle_line(&mut self, line: &str) {
        let Ok(value) = serde_json::from_str::<Value>(line) else {
            return;
        };
        if value.get("type").and_then(|t| t.as_str()) == Some("thread.completed") {
            self.completed = Some(value);
        }
    }

    fn handle_close(&mut self, code: i32) -> Option<i32> {
        if code != 0 {
            eprintln!("pantheon agent exit ({code}).");
            return None;
        }
        let Some(item) = &self.completed else {
            println!("No final item.");
            return None;
        };
        if item.get("status").and_then(|s| s.as_str()) == Some("error") {
            let summary = item.get("summary").and_then(|s| s.as_str()).unwrap_or("");
            eprintln!("{summary}");
            // The process claims success; the thread result says otherwise.
            return Some(1);
        }
        match item.get("final_report") {
            Some(report) => {
                println!(
                    "{}",
                    serde_json::to_string_pretty(report).unwrap_or_else(|_| report.to_string())
                );
            }
            None => println!("No final item."),
        }
        None
    }
}
