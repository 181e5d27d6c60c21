//! Optional LLM-driven task agent collaborator.
//!
//! The protocol engine must function with this collaborator entirely
//! absent, so it sits behind a small trait and the service holds an
//! `Option` of it. Wiring in a real agent is the embedder's problem.

use async_trait::async_trait;
use serde_json::Value;

/// String values longer than this are truncated when folded into the
/// task description.
const CONTEXT_VALUE_LIMIT: usize = 200;

/// An external agent that can run a free-form task with tool access.
#[async_trait]
pub trait TaskAgent: Send + Sync {
    async fn run_task(&self, task: &str) -> anyhow::Result<Value>;
}

/// Fold context entries into the task description.
///
/// Long string values are truncated so a transcript or OCR dump does
/// not swamp the prompt.
pub fn enhance_task(description: &str, context: Option<&serde_json::Map<String, Value>>) -> String {
    let Some(context) = context else {
        return description.to_string();
    };
    if context.is_empty() {
        return description.to_string();
    }

    let mut enhanced = format!("{description}\n\nContext:\n");
    for (key, value) in context {
        match value.as_str() {
            Some(s) if s.len() > CONTEXT_VALUE_LIMIT => {
                let cut: String = s.chars().take(CONTEXT_VALUE_LIMIT).collect();
                enhanced.push_str(&format!("- {key}: {cut}...\n"));
            }
            Some(s) => enhanced.push_str(&format!("- {key}: {s}\n")),
            None => enhanced.push_str(&format!("- {key}: {value}\n")),
        }
    }
    enhanced
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enhance_without_context() {
        assert_eq!(enhance_task("summarize", None), "summarize");
        let empty = serde_json::Map::new();
        assert_eq!(enhance_task("summarize", Some(&empty)), "summarize");
    }

    #[test]
    fn test_enhance_with_context() {
        let mut context = serde_json::Map::new();
        context.insert("session".to_string(), Value::String("S1".to_string()));
        context.insert("count".to_string(), serde_json::json!(3));

        let enhanced = enhance_task("summarize", Some(&context));
        assert!(enhanced.starts_with("summarize\n\nContext:\n"));
        assert!(enhanced.contains("- session: S1\n"));
        assert!(enhanced.contains("- count: 3\n"));
    }

    #[test]
    fn test_enhance_truncates_long_values() {
        let mut context = serde_json::Map::new();
        context.insert("transcript".to_string(), Value::String("x".repeat(500)));

        let enhanced = enhance_task("summarize", Some(&context));
        assert!(enhanced.contains(&format!("{}...", "x".repeat(200))));
        assert!(!enhanced.contains(&"x".repeat(201)));
    }
}
