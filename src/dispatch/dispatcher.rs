//! Concurrent, cache-aware batch execution.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use super::task::{Fallback, Task, TaskDefinition, TaskRequest, TaskResult, TaskSource};
use crate::cache::CacheStore;
use crate::executors::CommandExecutor;
use crate::metrics::MetricsAccumulator;
use crate::types::config::{Config, DispatchConfig};
use crate::{ReelError, ReelResult};

/// What the collector needs to finish a task whose executor did not succeed.
struct PendingTask {
    name: String,
    params: Value,
    fallback: Fallback,
}

/// Runs batches of named tasks.
///
/// Each task goes through:
///
/// ```text
/// PENDING -> CACHE_CHECK -> HIT -> DONE
///                        -> MISS -> EXECUTING -> SUCCESS -> DONE (write-through)
///                                             -> FAILURE -> FALLBACK -> DONE
/// ```
pub struct TaskDispatcher {
    cache: Arc<CacheStore>,
    definitions: HashMap<String, TaskDefinition>,
    semaphore: Arc<Semaphore>,
    task_timeout: Duration,
}

impl TaskDispatcher {
    /// Creates a dispatcher without any task.
    pub fn new(cache: Arc<CacheStore>, config: &DispatchConfig) -> ReelResult<Self> {
        if config.max_concurrency == 0 {
            return Err(ReelError::config("dispatch.max_concurrency must be greater than 0"));
        }
        if config.task_timeout_secs == 0 {
            return Err(ReelError::config("dispatch.task_timeout_secs must be greater than 0"));
        }

        Ok(Self {
            cache,
            definitions: HashMap::new(),
            semaphore: Arc::new(Semaphore::new(config.max_concurrency)),
            task_timeout: config.task_timeout(),
        })
    }

    /// Creates a dispatcher with one command-backed task per `[tasks.<name>]`
    /// entry of the configuration.
    pub fn from_config(cache: Arc<CacheStore>, config: &Config) -> ReelResult<Self> {
        let mut dispatcher = Self::new(cache, &config.dispatch)?;
        let command_timeout = Duration::from_secs(config.general.timeout_secs);

        for (name, task) in &config.tasks {
            let executor = CommandExecutor::from_config(name, task).with_timeout(command_timeout);
            let mut definition = TaskDefinition::with_fallback_value(
                Arc::new(executor),
                Value::String(task.fallback.clone()),
            );
            if let Some(ttl_secs) = task.ttl_secs {
                definition = definition.with_ttl(Duration::from_secs(ttl_secs));
            }
            dispatcher.register(name, definition);
        }

        Ok(dispatcher)
    }

    /// Registers (or replaces) a task.
    pub fn register(&mut self, name: impl Into<String>, definition: TaskDefinition) {
        self.definitions.insert(name.into(), definition);
    }

    /// Builder form of [`TaskDispatcher::register`].
    #[must_use]
    pub fn with_task(mut self, name: impl Into<String>, definition: TaskDefinition) -> Self {
        self.register(name, definition);
        self
    }

    /// Whether a task is registered under `name`.
    pub fn is_registered(&self, name: &str) -> bool {
        self.definitions.contains_key(name)
    }

    /// Registered task names, sorted.
    pub fn task_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.definitions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Registered definition of a task.
    pub fn definition(&self, name: &str) -> Option<&TaskDefinition> {
        self.definitions.get(name)
    }

    /// Backing cache.
    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    fn metrics(&self) -> &Arc<MetricsAccumulator> {
        self.cache.metrics()
    }

    /// Runs a batch of tasks.
    ///
    /// Cache hits are answered immediately; when every task hits, no
    /// executor is spawned at all. Misses run concurrently (bounded by
    /// `max_concurrency`) and each one settles on its own: a failing,
    /// timed-out or panicking executor is replaced by its fallback and never
    /// affects its siblings. Successful values are written to the cache as
    /// soon as they are produced, so they survive cancellation of the batch.
    ///
    /// # Errors
    ///
    /// Only caller mistakes are reported: an unregistered task name or the
    /// same name twice in one batch. Nothing runs in that case.
    pub async fn run_batch(
        &self,
        requests: Vec<TaskRequest>,
    ) -> ReelResult<HashMap<String, TaskResult>> {
        let tasks = self.bind_all(requests)?;
        let mut results = HashMap::with_capacity(tasks.len());

        let mut misses = Vec::new();
        for task in tasks {
            let probe_started = Instant::now();
            match self.cache.get_by_key(&task.key) {
                Some(value) => {
                    self.metrics().record_task(TaskSource::Cached);
                    results.insert(
                        task.name.clone(),
                        TaskResult::new(task.name, value, TaskSource::Cached, probe_started.elapsed()),
                    );
                }
                None => misses.push(task),
            }
        }

        if misses.is_empty() {
            tracing::debug!(tasks = results.len(), "Every task served from cache");
            return Ok(results);
        }

        let dispatched = misses.len();
        tracing::info!(cached = results.len(), dispatched, "Dispatching cache misses");

        let started = Instant::now();
        for result in self.execute_misses(misses).await {
            self.metrics().record_task(result.source);
            results.insert(result.name.clone(), result);
        }

        // Sequential-equivalent time is estimated, not measured.
        let elapsed = started.elapsed().as_secs_f64();
        let sequential_estimate = elapsed * dispatched as f64;
        self.metrics()
            .record_time_saved((sequential_estimate - elapsed).max(0.0));

        Ok(results)
    }

    /// Runs a single task through the same path as a batch.
    pub async fn run_one(&self, request: TaskRequest) -> ReelResult<TaskResult> {
        let name = request.name.clone();
        self.run_batch(vec![request])
            .await?
            .remove(&name)
            .ok_or_else(|| ReelError::other(format!("Task '{}' produced no result", name)))
    }

    fn bind_all(&self, requests: Vec<TaskRequest>) -> ReelResult<Vec<Task>> {
        let mut seen = HashSet::with_capacity(requests.len());
        let mut tasks = Vec::with_capacity(requests.len());

        for request in requests {
            let definition = self
                .definitions
                .get(&request.name)
                .ok_or_else(|| ReelError::UnknownTask(request.name.clone()))?;
            if !seen.insert(request.name.clone()) {
                return Err(ReelError::DuplicateTask(request.name));
            }

            let key = self.cache.key_for(&request.name, &request.params);
            tasks.push(definition.bind(request, key, self.cache.default_ttl()));
        }

        Ok(tasks)
    }

    async fn execute_misses(&self, misses: Vec<Task>) -> Vec<TaskResult> {
        let mut join_set = JoinSet::new();
        let mut pending = HashMap::with_capacity(misses.len());

        for task in misses {
            let Task {
                name,
                params,
                executor,
                fallback,
                ttl,
                ..
            } = task;

            let cache = Arc::clone(&self.cache);
            let semaphore = Arc::clone(&self.semaphore);
            let timeout = self.task_timeout;
            let task_name = name.clone();
            let task_params = params.clone();

            let handle = join_set.spawn(async move {
                // The semaphore is never closed.
                let _permit = semaphore.acquire_owned().await.ok();
                let started = Instant::now();

                let outcome =
                    match tokio::time::timeout(timeout, executor.execute(&task_name, &task_params))
                        .await
                    {
                        Ok(Ok(value)) => {
                            cache.set(&task_name, &task_params, &value, ttl);
                            Ok(value)
                        }
                        Ok(Err(e)) => Err(e),
                        Err(_) => Err(ReelError::ExecutorTimeout(task_name.clone())),
                    };

                (outcome, started.elapsed())
            });

            pending.insert(
                handle.id(),
                PendingTask {
                    name,
                    params,
                    fallback,
                },
            );
        }

        let mut results = Vec::with_capacity(pending.len());
        while let Some(joined) = join_set.join_next_with_id().await {
            let (id, outcome, latency) = match joined {
                Ok((id, (outcome, latency))) => (id, outcome, latency),
                Err(e) => (
                    e.id(),
                    Err(ReelError::other(format!("executor task aborted: {}", e))),
                    Duration::ZERO,
                ),
            };

            let Some(task) = pending.remove(&id) else {
                continue;
            };

            let result = match outcome {
                Ok(value) => TaskResult::new(task.name, value, TaskSource::Executed, latency),
                Err(e) => {
                    tracing::warn!(
                        task = %task.name,
                        error = %e,
                        "Task failed, using fallback"
                    );
                    let value = (task.fallback)(&task.params);
                    TaskResult::new(task.name, value, TaskSource::Fallback, latency)
                }
            };
            results.push(result);
        }

        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executors::TaskExecutor;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns a fixed value and counts its invocations.
    struct StubExecutor {
        value: Value,
        calls: AtomicUsize,
    }

    impl StubExecutor {
        fn new(value: Value) -> Arc<Self> {
            Arc::new(Self {
                value,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TaskExecutor for StubExecutor {
        fn name(&self) -> &str {
            "stub"
        }

        async fn execute(&self, _task_name: &str, _params: &Value) -> ReelResult<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.value.clone())
        }
    }

    struct FailingExecutor;

    #[async_trait]
    impl TaskExecutor for FailingExecutor {
        fn name(&self) -> &str {
            "failing"
        }

        async fn execute(&self, task_name: &str, _params: &Value) -> ReelResult<Value> {
            Err(ReelError::ExecutorFailed(task_name.to_string(), "quota exceeded".to_string()))
        }
    }

    struct SlowExecutor(Duration);

    #[async_trait]
    impl TaskExecutor for SlowExecutor {
        fn name(&self) -> &str {
            "slow"
        }

        async fn execute(&self, _task_name: &str, _params: &Value) -> ReelResult<Value> {
            tokio::time::sleep(self.0).await;
            Ok(json!("too late"))
        }
    }

    struct PanickingExecutor;

    #[async_trait]
    impl TaskExecutor for PanickingExecutor {
        fn name(&self) -> &str {
            "panicking"
        }

        async fn execute(&self, _task_name: &str, _params: &Value) -> ReelResult<Value> {
            panic!("executor bug");
        }
    }

    fn cache() -> Arc<CacheStore> {
        Arc::new(CacheStore::in_memory(
            1024 * 1024,
            Duration::from_secs(3600),
            Arc::new(MetricsAccumulator::new()),
        ))
    }

    fn dispatcher(cache: Arc<CacheStore>, task_timeout_secs: u64) -> TaskDispatcher {
        let config = DispatchConfig {
            max_concurrency: 4,
            task_timeout_secs,
        };
        TaskDispatcher::new(cache, &config).unwrap()
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let config = DispatchConfig {
            max_concurrency: 0,
            task_timeout_secs: 1,
        };
        assert!(matches!(
            TaskDispatcher::new(cache(), &config),
            Err(ReelError::Config(_))
        ));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = DispatchConfig {
            max_concurrency: 4,
            task_timeout_secs: 0,
        };
        assert!(matches!(
            TaskDispatcher::new(cache(), &config),
            Err(ReelError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_miss_executes_and_writes_through() {
        let cache = cache();
        let executor = StubExecutor::new(json!("Why do crows remember faces?"));
        let dispatcher = dispatcher(Arc::clone(&cache), 5).with_task(
            "theme",
            TaskDefinition::with_fallback_value(executor.clone(), json!("fallback")),
        );

        let params = json!({"category": "animals"});
        let result = dispatcher
            .run_one(TaskRequest::new("theme", params.clone()))
            .await
            .unwrap();

        assert_eq!(result.source, TaskSource::Executed);
        assert_eq!(result.value, json!("Why do crows remember faces?"));
        assert_eq!(executor.calls(), 1);
        assert_eq!(cache.get("theme", &params), Some(json!("Why do crows remember faces?")));
    }

    #[tokio::test]
    async fn test_all_cached_runs_no_executor() {
        let cache = cache();
        let theme = StubExecutor::new(json!("theme"));
        let script = StubExecutor::new(json!("script"));
        let dispatcher = dispatcher(Arc::clone(&cache), 5)
            .with_task(
                "theme",
                TaskDefinition::with_fallback_value(theme.clone(), json!("-")),
            )
            .with_task(
                "script",
                TaskDefinition::with_fallback_value(script.clone(), json!("-")),
            );

        let params = json!({"category": "space"});
        cache.set("theme", &params, &json!("cached theme"), Duration::from_secs(60));
        cache.set("script", &params, &json!("cached script"), Duration::from_secs(60));

        let results = dispatcher
            .run_batch(vec![
                TaskRequest::new("theme", params.clone()),
                TaskRequest::new("script", params.clone()),
            ])
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert!(results.values().all(|r| r.source == TaskSource::Cached));
        assert_eq!(results["theme"].value, json!("cached theme"));
        assert_eq!(theme.calls(), 0);
        assert_eq!(script.calls(), 0);

        let snapshot = cache.metrics().snapshot();
        assert_eq!(snapshot.tasks_cached, 2);
        assert_eq!(snapshot.tasks_executed, 0);
        assert_eq!(snapshot.time_saved_secs, 0.0);
    }

    #[tokio::test]
    async fn test_failure_uses_fallback_without_affecting_siblings() {
        let cache = cache();
        let dispatcher = dispatcher(Arc::clone(&cache), 5)
            .with_task(
                "theme",
                TaskDefinition::with_fallback_value(StubExecutor::new(json!("ok")), json!("-")),
            )
            .with_task(
                "script",
                TaskDefinition::new(Arc::new(FailingExecutor), |params| {
                    json!(format!("Default script about {}", params["category"].as_str().unwrap_or("anything")))
                }),
            );

        let params = json!({"category": "ocean"});
        let results = dispatcher
            .run_batch(vec![
                TaskRequest::new("theme", params.clone()),
                TaskRequest::new("script", params.clone()),
            ])
            .await
            .unwrap();

        assert_eq!(results["theme"].source, TaskSource::Executed);
        assert_eq!(results["script"].source, TaskSource::Fallback);
        assert_eq!(results["script"].value, json!("Default script about ocean"));

        // Fallback values are never cached.
        assert!(!cache.contains("script", &params));
        assert!(cache.contains("theme", &params));

        let snapshot = cache.metrics().snapshot();
        assert_eq!(snapshot.tasks_executed, 1);
        assert_eq!(snapshot.tasks_fallback, 1);
    }

    #[tokio::test]
    async fn test_timeout_uses_fallback() {
        let config = DispatchConfig {
            max_concurrency: 2,
            task_timeout_secs: 1,
        };
        let cache = cache();
        let dispatcher = TaskDispatcher::new(Arc::clone(&cache), &config)
            .unwrap()
            .with_task(
                "script",
                TaskDefinition::with_fallback_value(
                    Arc::new(SlowExecutor(Duration::from_secs(10))),
                    json!("short default script"),
                ),
            );

        let started = Instant::now();
        let result = dispatcher
            .run_one(TaskRequest::new("script", json!({})))
            .await
            .unwrap();

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(result.source, TaskSource::Fallback);
        assert_eq!(result.value, json!("short default script"));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_panic_uses_fallback() {
        let dispatcher = dispatcher(cache(), 5).with_task(
            "theme",
            TaskDefinition::with_fallback_value(Arc::new(PanickingExecutor), json!("safe")),
        );

        let result = dispatcher
            .run_one(TaskRequest::new("theme", json!({})))
            .await
            .unwrap();

        assert_eq!(result.source, TaskSource::Fallback);
        assert_eq!(result.value, json!("safe"));
    }

    #[tokio::test]
    async fn test_unknown_task_runs_nothing() {
        let executor = StubExecutor::new(json!("x"));
        let dispatcher = dispatcher(cache(), 5).with_task(
            "theme",
            TaskDefinition::with_fallback_value(executor.clone(), json!("-")),
        );

        let result = dispatcher
            .run_batch(vec![
                TaskRequest::new("theme", json!({})),
                TaskRequest::new("voiceover", json!({})),
            ])
            .await;

        assert!(matches!(result, Err(ReelError::UnknownTask(name)) if name == "voiceover"));
        assert_eq!(executor.calls(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_task_rejected() {
        let dispatcher = dispatcher(cache(), 5).with_task(
            "theme",
            TaskDefinition::with_fallback_value(StubExecutor::new(json!("x")), json!("-")),
        );

        let result = dispatcher
            .run_batch(vec![
                TaskRequest::new("theme", json!({"category": "a"})),
                TaskRequest::new("theme", json!({"category": "b"})),
            ])
            .await;

        assert!(matches!(result, Err(ReelError::DuplicateTask(name)) if name == "theme"));
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let results = dispatcher(cache(), 5).run_batch(Vec::new()).await.unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_from_config_registers_tasks() {
        let config = Config::default_config();
        let dispatcher = TaskDispatcher::from_config(cache(), &config).unwrap();

        assert_eq!(dispatcher.task_names(), vec!["script", "theme"]);
        assert!(dispatcher.is_registered("theme"));
        assert!(!dispatcher.is_registered("voiceover"));
        assert_eq!(
            dispatcher.definition("theme").map(|d| d.executor().name()),
            Some("theme")
        );
    }
}
