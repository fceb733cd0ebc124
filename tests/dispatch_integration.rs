//! Integration tests for batch dispatching.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reelsmith::cache::CacheStore;
use reelsmith::dispatch::{TaskDefinition, TaskDispatcher, TaskRequest, TaskSource};
use reelsmith::executors::TaskExecutor;
use reelsmith::metrics::MetricsAccumulator;
use reelsmith::types::config::{CacheConfig, DispatchConfig};
use reelsmith::{ReelError, ReelResult};
use serde_json::{json, Value};
use tempfile::TempDir;

/// Sleeps, then answers with a value derived from the task and params.
struct GeneratorExecutor {
    delay: Duration,
    calls: AtomicUsize,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl GeneratorExecutor {
    fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            calls: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl TaskExecutor for GeneratorExecutor {
    fn name(&self) -> &str {
        "generator"
    }

    async fn execute(&self, task_name: &str, params: &Value) -> ReelResult<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);

        tokio::time::sleep(self.delay).await;

        self.running.fetch_sub(1, Ordering::SeqCst);
        Ok(json!(format!(
            "{} about {}",
            task_name,
            params["category"].as_str().unwrap_or("anything")
        )))
    }
}

struct HangingExecutor;

#[async_trait]
impl TaskExecutor for HangingExecutor {
    fn name(&self) -> &str {
        "hanging"
    }

    async fn execute(&self, _task_name: &str, _params: &Value) -> ReelResult<Value> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(json!("never"))
    }
}

/// Never finishes; flags when its future is dropped.
struct AbortableExecutor {
    dropped: Arc<AtomicBool>,
}

struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl TaskExecutor for AbortableExecutor {
    fn name(&self) -> &str {
        "abortable"
    }

    async fn execute(&self, _task_name: &str, _params: &Value) -> ReelResult<Value> {
        let _flag = DropFlag(Arc::clone(&self.dropped));
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(json!("never"))
    }
}

fn memory_cache() -> Arc<CacheStore> {
    Arc::new(CacheStore::in_memory(
        1024 * 1024,
        Duration::from_secs(3600),
        Arc::new(MetricsAccumulator::new()),
    ))
}

fn dispatch_config(max_concurrency: usize, task_timeout_secs: u64) -> DispatchConfig {
    DispatchConfig {
        max_concurrency,
        task_timeout_secs,
    }
}

#[tokio::test]
async fn test_theme_and_script_with_timeout() {
    let cache = memory_cache();
    let theme = GeneratorExecutor::new(Duration::from_millis(20));
    let dispatcher = TaskDispatcher::new(Arc::clone(&cache), &dispatch_config(4, 1))
        .unwrap()
        .with_task(
            "theme",
            TaskDefinition::with_fallback_value(theme.clone(), json!("Why do cats purr?")),
        )
        .with_task(
            "script",
            TaskDefinition::with_fallback_value(Arc::new(HangingExecutor), json!("Default script")),
        );

    let params = json!({"category": "animals"});
    let results = dispatcher
        .run_batch(vec![
            TaskRequest::new("theme", params.clone()),
            TaskRequest::new("script", params.clone()),
        ])
        .await
        .unwrap();

    assert_eq!(results["theme"].source, TaskSource::Executed);
    assert_eq!(results["theme"].value, json!("theme about animals"));
    assert_eq!(results["script"].source, TaskSource::Fallback);
    assert_eq!(results["script"].value, json!("Default script"));

    // Only the successful task was written through.
    assert!(cache.contains("theme", &params));
    assert!(!cache.contains("script", &params));
}

#[tokio::test]
async fn test_second_batch_served_from_cache() {
    let cache = memory_cache();
    let executor = GeneratorExecutor::new(Duration::from_millis(10));
    let dispatcher = TaskDispatcher::new(Arc::clone(&cache), &dispatch_config(4, 5))
        .unwrap()
        .with_task("theme", TaskDefinition::with_fallback_value(executor.clone(), json!("-")))
        .with_task("keywords", TaskDefinition::with_fallback_value(executor.clone(), json!("-")));

    let batch = || {
        vec![
            TaskRequest::new("theme", json!({"category": "space", "request_id": "1"})),
            TaskRequest::new("keywords", json!({"category": "space", "request_id": "2"})),
        ]
    };

    let first = dispatcher.run_batch(batch()).await.unwrap();
    assert!(first.values().all(|r| r.source == TaskSource::Executed));
    assert_eq!(executor.calls.load(Ordering::SeqCst), 2);

    let second = dispatcher.run_batch(batch()).await.unwrap();
    assert!(second.values().all(|r| r.source == TaskSource::Cached));
    assert_eq!(second["theme"].value, first["theme"].value);
    assert_eq!(executor.calls.load(Ordering::SeqCst), 2);

    let snapshot = cache.metrics().snapshot();
    assert_eq!(snapshot.tasks_executed, 2);
    assert_eq!(snapshot.tasks_cached, 2);
}

#[tokio::test]
async fn test_concurrency_is_bounded() {
    let executor = GeneratorExecutor::new(Duration::from_millis(50));
    let mut dispatcher = TaskDispatcher::new(memory_cache(), &dispatch_config(2, 5)).unwrap();
    for name in ["a", "b", "c", "d", "e"] {
        dispatcher.register(name, TaskDefinition::with_fallback_value(executor.clone(), json!("-")));
    }

    let requests = ["a", "b", "c", "d", "e"]
        .iter()
        .map(|name| TaskRequest::new(*name, json!({})))
        .collect();
    let results = dispatcher.run_batch(requests).await.unwrap();

    assert_eq!(results.len(), 5);
    assert!(results.values().all(|r| r.source == TaskSource::Executed));
    assert!(executor.peak.load(Ordering::SeqCst) <= 2);
    assert!(executor.peak.load(Ordering::SeqCst) >= 1);
    assert!(dispatcher.cache().metrics().snapshot().time_saved_secs > 0.0);
}

#[tokio::test]
async fn test_unknown_task_is_a_caller_error() {
    let executor = GeneratorExecutor::new(Duration::ZERO);
    let dispatcher = TaskDispatcher::new(memory_cache(), &dispatch_config(2, 5))
        .unwrap()
        .with_task("theme", TaskDefinition::with_fallback_value(executor.clone(), json!("-")));

    let result = dispatcher
        .run_batch(vec![
            TaskRequest::new("theme", json!({})),
            TaskRequest::new("music", json!({})),
        ])
        .await;

    match result {
        Err(e @ ReelError::UnknownTask(_)) => assert!(e.is_programmer_error()),
        other => panic!("unexpected result: {:?}", other),
    }
    assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_results_survive_restart() {
    let temp_dir = TempDir::new().unwrap();
    let cache_config = CacheConfig {
        snapshot_path: temp_dir.path().join("cache.json"),
        ..CacheConfig::default()
    };
    let executor = GeneratorExecutor::new(Duration::ZERO);
    let params = json!({"category": "ocean"});

    {
        let cache = Arc::new(CacheStore::open(&cache_config, Arc::new(MetricsAccumulator::new())).unwrap());
        let dispatcher = TaskDispatcher::new(cache, &dispatch_config(2, 5))
            .unwrap()
            .with_task("theme", TaskDefinition::with_fallback_value(executor.clone(), json!("-")));
        let result = dispatcher.run_one(TaskRequest::new("theme", params.clone())).await.unwrap();
        assert_eq!(result.source, TaskSource::Executed);
        dispatcher.cache().persist_now().unwrap();
    }

    let cache = Arc::new(CacheStore::open(&cache_config, Arc::new(MetricsAccumulator::new())).unwrap());
    let dispatcher = TaskDispatcher::new(cache, &dispatch_config(2, 5))
        .unwrap()
        .with_task("theme", TaskDefinition::with_fallback_value(executor.clone(), json!("-")));
    let result = dispatcher.run_one(TaskRequest::new("theme", params)).await.unwrap();

    assert_eq!(result.source, TaskSource::Cached);
    assert_eq!(result.value, json!("theme about ocean"));
    assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_get_or_compute_single_task_path() {
    let cache = memory_cache();
    let params = json!({"category": "history"});
    let calls = AtomicUsize::new(0);

    for _ in 0..3 {
        let value: String = cache
            .get_or_compute("theme", &params, Duration::from_secs(60), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ReelError>("Who built the pyramids?".to_string())
            })
            .await
            .unwrap();
        assert_eq!(value, "Who built the pyramids?");
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_cancelled_batch_keeps_finished_writes() {
    let cache = memory_cache();
    let dropped = Arc::new(AtomicBool::new(false));
    let theme = GeneratorExecutor::new(Duration::from_millis(10));
    let dispatcher = TaskDispatcher::new(Arc::clone(&cache), &dispatch_config(4, 30))
        .unwrap()
        .with_task(
            "theme",
            TaskDefinition::with_fallback_value(theme.clone(), json!("Why do cats purr?")),
        )
        .with_task(
            "script",
            TaskDefinition::with_fallback_value(
                Arc::new(AbortableExecutor {
                    dropped: Arc::clone(&dropped),
                }),
                json!("Default script"),
            ),
        );

    let params = json!({"category": "animals"});
    let batch = dispatcher.run_batch(vec![
        TaskRequest::new("theme", params.clone()),
        TaskRequest::new("script", params.clone()),
    ]);
    let outcome = tokio::time::timeout(Duration::from_millis(300), batch).await;
    assert!(outcome.is_err(), "batch should still be waiting on the script");

    // Give the runtime a chance to drop the aborted task.
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(dropped.load(Ordering::SeqCst), "in-flight executor was not aborted");
    assert_eq!(cache.get("theme", &params), Some(json!("theme about animals")));
    assert!(!cache.contains("script", &params));
}
