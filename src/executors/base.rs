//! Base trait for generation executors.

use async_trait::async_trait;
use serde_json::Value;

use crate::{ReelError, ReelResult};

/// Produces the value of a named task.
///
/// Implementations are free to fail; the dispatcher contains the failure and
/// substitutes the task's fallback.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Executor name, used in logs.
    fn name(&self) -> &str;

    /// Runs the task.
    ///
    /// # Arguments
    ///
    /// * `task_name` - Name of the task being run
    /// * `params` - Parameter bundle of the task
    async fn execute(&self, task_name: &str, params: &Value) -> ReelResult<Value>;

    /// Whether the backing service can be reached.
    async fn is_available(&self) -> bool {
        true
    }
}

/// Parses executor output into a value.
///
/// The whole output is tried as JSON first, then the outermost `{...}` span;
/// anything else is returned as a trimmed string. Empty output is an error.
pub fn parse_output(output: &str, executor_name: &str) -> ReelResult<Value> {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        return Err(ReelError::ExecutorFailed(
            executor_name.to_string(),
            "Executor produced no output".to_string(),
        ));
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Ok(value);
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            if let Ok(value) = serde_json::from_str::<Value>(&trimmed[start..=end]) {
                return Ok(value);
            }
        }
    }

    Ok(Value::String(trimmed.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct MockExecutor;

    #[async_trait]
    impl TaskExecutor for MockExecutor {
        fn name(&self) -> &str {
            "mock"
        }

        async fn execute(&self, task_name: &str, params: &Value) -> ReelResult<Value> {
            Ok(json!({"task": task_name, "params": params}))
        }
    }

    #[tokio::test]
    async fn test_default_availability() {
        let executor = MockExecutor;
        assert!(executor.is_available().await);

        let value = executor.execute("theme", &json!({"category": "animals"})).await.unwrap();
        assert_eq!(value["task"], "theme");
    }

    #[test]
    fn test_parse_json_output() {
        let value = parse_output(r#"{"theme": "Why do crows remember faces?"}"#, "llm").unwrap();
        assert_eq!(value["theme"], "Why do crows remember faces?");

        let value = parse_output("[\"a\", \"b\"]\n", "llm").unwrap();
        assert_eq!(value, json!(["a", "b"]));
    }

    #[test]
    fn test_parse_embedded_json() {
        let output = r#"
            Thinking...
            {"script": "Crows hold grudges.", "words": 3}
            done
        "#;

        let value = parse_output(output, "llm").unwrap();
        assert_eq!(value["words"], 3);
    }

    #[test]
    fn test_parse_plain_text() {
        let value = parse_output("  Why do crows remember faces?\n", "llm").unwrap();
        assert_eq!(value, json!("Why do crows remember faces?"));
    }

    #[test]
    fn test_parse_empty_output() {
        let result = parse_output("   \n", "llm");
        assert!(matches!(result, Err(ReelError::ExecutorFailed(_, _))));
    }
}
