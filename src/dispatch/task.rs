//! Task definitions, requests and results.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::executors::TaskExecutor;

/// Deterministic, I/O-free producer of a default value.
///
/// Receives the parameter bundle of the failed task.
pub type Fallback = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// Where a task's value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskSource {
    /// Served from the cache.
    Cached,
    /// Produced by the executor.
    Executed,
    /// Produced by the fallback after the executor failed.
    Fallback,
}

impl fmt::Display for TaskSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskSource::Cached => write!(f, "cached"),
            TaskSource::Executed => write!(f, "executed"),
            TaskSource::Fallback => write!(f, "fallback"),
        }
    }
}

/// How a named task is run.
#[derive(Clone)]
pub struct TaskDefinition {
    executor: Arc<dyn TaskExecutor>,
    fallback: Fallback,
    ttl: Option<Duration>,
}

impl TaskDefinition {
    /// Creates a definition with a fallback computed from the parameters.
    pub fn new<F>(executor: Arc<dyn TaskExecutor>, fallback: F) -> Self
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        Self {
            executor,
            fallback: Arc::new(fallback),
            ttl: None,
        }
    }

    /// Creates a definition whose fallback is a constant.
    pub fn with_fallback_value(executor: Arc<dyn TaskExecutor>, value: Value) -> Self {
        Self::new(executor, move |_| value.clone())
    }

    /// Sets the cache TTL. Without one the store default applies.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Cache TTL, if set.
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// Executor of this task.
    pub fn executor(&self) -> &Arc<dyn TaskExecutor> {
        &self.executor
    }

    pub(crate) fn bind(&self, request: TaskRequest, key: String, default_ttl: Duration) -> Task {
        Task {
            name: request.name,
            params: request.params,
            key,
            executor: Arc::clone(&self.executor),
            fallback: Arc::clone(&self.fallback),
            ttl: self.ttl.unwrap_or(default_ttl),
        }
    }
}

impl fmt::Debug for TaskDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskDefinition")
            .field("executor", &self.executor.name())
            .field("ttl", &self.ttl)
            .finish()
    }
}

/// A request to run a registered task with some parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    /// Registered task name.
    pub name: String,

    /// Parameter bundle.
    #[serde(default)]
    pub params: Value,
}

impl TaskRequest {
    /// Creates a new request.
    pub fn new(name: impl Into<String>, params: Value) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }
}

/// A task bound to one invocation.
pub struct Task {
    /// Task name, also the cache operation.
    pub name: String,

    /// Parameter bundle.
    pub params: Value,

    /// Encoded cache key.
    pub key: String,

    /// Executor to run on a miss.
    pub executor: Arc<dyn TaskExecutor>,

    /// Producer used when the executor fails.
    pub fallback: Fallback,

    /// TTL of the cached result.
    pub ttl: Duration,
}

/// Outcome of one task of a batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskResult {
    /// Task name.
    pub name: String,

    /// Produced value.
    pub value: Value,

    /// Provenance of the value.
    pub source: TaskSource,

    /// Time spent producing the value.
    pub latency: Duration,
}

impl TaskResult {
    /// Creates a new result.
    pub fn new(name: impl Into<String>, value: Value, source: TaskSource, latency: Duration) -> Self {
        Self {
            name: name.into(),
            value,
            source,
            latency,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ReelResult;
    use async_trait::async_trait;
    use serde_json::json;

    struct NoopExecutor;

    #[async_trait]
    impl TaskExecutor for NoopExecutor {
        fn name(&self) -> &str {
            "noop"
        }

        async fn execute(&self, _task_name: &str, _params: &Value) -> ReelResult<Value> {
            Ok(Value::Null)
        }
    }

    #[test]
    fn test_source_display() {
        assert_eq!(TaskSource::Cached.to_string(), "cached");
        assert_eq!(TaskSource::Executed.to_string(), "executed");
        assert_eq!(TaskSource::Fallback.to_string(), "fallback");
        assert_eq!(serde_json::to_value(TaskSource::Fallback).unwrap(), json!("fallback"));
    }

    #[test]
    fn test_bind_uses_default_ttl() {
        let definition = TaskDefinition::with_fallback_value(Arc::new(NoopExecutor), json!("x"));
        let task = definition.bind(
            TaskRequest::new("theme", json!({})),
            "key".to_string(),
            Duration::from_secs(5),
        );

        assert_eq!(task.ttl, Duration::from_secs(5));
        assert_eq!((task.fallback)(&task.params), json!("x"));

        let definition = definition.with_ttl(Duration::from_secs(9));
        let task = definition.bind(
            TaskRequest::new("theme", json!({})),
            "key".to_string(),
            Duration::from_secs(5),
        );
        assert_eq!(task.ttl, Duration::from_secs(9));
    }

    #[test]
    fn test_fallback_from_params() {
        let definition = TaskDefinition::new(Arc::new(NoopExecutor), |params| {
            json!(format!("A fun fact about {}", params["category"].as_str().unwrap_or("life")))
        });
        let task = definition.bind(
            TaskRequest::new("script", json!({"category": "animals"})),
            "key".to_string(),
            Duration::from_secs(5),
        );

        assert_eq!((task.fallback)(&task.params), json!("A fun fact about animals"));
    }

    #[test]
    fn test_request_deserialize_without_params() {
        let request: TaskRequest = serde_json::from_value(json!({"name": "theme"})).unwrap();
        assert_eq!(request.params, Value::Null);
    }
}
