//! CLI command implementations.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;

use crate::cache::CacheStore;
use crate::dispatch::{TaskDispatcher, TaskRequest, TaskResult};
use crate::executors::{CommandExecutor, CommandFetcher, KeywordScorer, TaskExecutor};
use crate::metrics::{MetricsAccumulator, PerformanceSnapshot};
use crate::selection::{Candidate, CandidateSelector};
use crate::types::config::{Config, CONFIG_FILE_NAME};
use crate::{ReelError, ReelResult};

/// Initializes configuration in the specified directory.
pub async fn init(path: Option<PathBuf>) -> ReelResult<()> {
    let target_dir = path.unwrap_or_else(|| PathBuf::from("."));

    if !target_dir.exists() {
        std::fs::create_dir_all(&target_dir)?;
        tracing::info!("Directory created: {}", target_dir.display());
    }

    let config_path = target_dir.join(CONFIG_FILE_NAME);

    if config_path.exists() {
        println!("Configuration already exists at: {}", config_path.display());
        println!("Use 'reelsmith config' to modify.");
        return Ok(());
    }

    // .reelsmith/ holds the cache snapshot
    let data_dir = target_dir.join(".reelsmith");
    if !data_dir.exists() {
        std::fs::create_dir_all(&data_dir)?;
        tracing::info!(".reelsmith/ directory created");
    }

    update_gitignore(&target_dir)?;

    let config = Config::default_config();
    config.save(&config_path)?;

    println!("reelsmith initialized successfully!");
    println!("Configuration created at: {}", config_path.display());
    println!("Data directory: .reelsmith/");
    println!();
    println!("Next steps:");
    println!("  1. Point [tasks.*] at your generation commands: reelsmith config");
    println!("  2. Check that they are installed: reelsmith doctor");
    println!(
        "  3. Run a batch: reelsmith run --tasks '[{{\"name\": \"theme\", \"params\": {{\"category\": \"animals\"}}}}]'"
    );

    Ok(())
}

/// Updates or creates .gitignore to include .reelsmith/
fn update_gitignore(target_dir: &Path) -> ReelResult<()> {
    let gitignore_path = target_dir.join(".gitignore");
    let entry = ".reelsmith/";
    let comment = "# reelsmith - local cache snapshot";

    if gitignore_path.exists() {
        let content = std::fs::read_to_string(&gitignore_path)?;

        if content
            .lines()
            .any(|line| line.trim() == entry || line.trim() == ".reelsmith")
        {
            tracing::debug!(".gitignore already contains .reelsmith/");
            return Ok(());
        }

        let mut new_content = content.trim_end().to_string();
        if !new_content.is_empty() {
            new_content.push_str("\n\n");
        }
        new_content.push_str(comment);
        new_content.push('\n');
        new_content.push_str(entry);
        new_content.push('\n');

        std::fs::write(&gitignore_path, new_content)?;
        println!(".gitignore updated with .reelsmith/");
    } else {
        let content = format!("{}\n{}\n", comment, entry);
        std::fs::write(&gitignore_path, content)?;
        println!(".gitignore created with .reelsmith/");
    }

    Ok(())
}

fn open_cache(config: &Config, metrics: Arc<MetricsAccumulator>) -> ReelResult<CacheStore> {
    CacheStore::open(&config.cache, metrics)
}

/// Reads a JSON argument given inline or as `@path`.
fn read_json_arg(arg: &str) -> ReelResult<Value> {
    let content = match arg.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path)?,
        None => arg.to_string(),
    };
    Ok(serde_json::from_str(&content)?)
}

/// Parses a batch: an array of requests or a single request.
fn parse_requests(tasks: &str) -> ReelResult<Vec<TaskRequest>> {
    let value = read_json_arg(tasks)?;
    let requests = match value {
        Value::Array(_) => serde_json::from_value(value)?,
        other => vec![serde_json::from_value(other)?],
    };
    Ok(requests)
}

/// Runs a batch of configured tasks.
pub async fn run(tasks: &str, json: bool, config: &Config) -> ReelResult<()> {
    let requests = parse_requests(tasks)?;
    let metrics = Arc::new(MetricsAccumulator::new());
    let cache = Arc::new(open_cache(config, Arc::clone(&metrics))?);
    let dispatcher = TaskDispatcher::from_config(Arc::clone(&cache), config)?;

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner());
    spinner.set_message(format!("Running {} task(s)...", requests.len()));
    spinner.enable_steady_tick(Duration::from_millis(100));

    let outcome = dispatcher.run_batch(requests).await;
    spinner.finish_and_clear();
    let results = outcome?;

    cache.persist_now()?;

    let ordered: BTreeMap<String, TaskResult> = results.into_iter().collect();
    let snapshot = metrics.snapshot();

    if json {
        let document = serde_json::json!({
            "results": ordered,
            "metrics": snapshot,
        });
        println!("{}", serde_json::to_string_pretty(&document)?);
        return Ok(());
    }

    for (name, result) in &ordered {
        let value = match &result.value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        println!(
            "  [{}] {} ({} ms)",
            result.source,
            name,
            result.latency.as_millis()
        );
        println!("      {}", value);
    }

    println!();
    print_metrics(&snapshot);

    Ok(())
}

/// Ranks candidates with the keyword scorer and downloads the best ones
/// through the configured fetcher.
pub async fn select(
    reference: &str,
    candidates: &str,
    max: usize,
    json: bool,
    config: &Config,
) -> ReelResult<()> {
    if !config.fetcher.is_configured() {
        return Err(ReelError::config(
            "no [fetcher] command configured, see 'reelsmith config'",
        ));
    }

    let candidates: Vec<Candidate> = serde_json::from_value(read_json_arg(candidates)?)?;
    let metrics = Arc::new(MetricsAccumulator::new());
    let selector = CandidateSelector::new(config.selection.clone())?.with_metrics(Arc::clone(&metrics));
    let fetcher = Arc::new(
        CommandFetcher::new(config.fetcher.clone()).with_timeout(config.selection.fetch_timeout()),
    );

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner());
    spinner.set_message(format!("Ranking {} candidate(s)...", candidates.len()));
    spinner.enable_steady_tick(Duration::from_millis(100));

    let selected = selector
        .select_and_fetch_default(reference, candidates, &KeywordScorer::new(), fetcher, max)
        .await;
    spinner.finish_and_clear();

    if json {
        println!("{}", serde_json::to_string_pretty(&selected)?);
        return Ok(());
    }

    if selected.is_empty() {
        println!("No candidate could be selected.");
        return Ok(());
    }

    for (rank, item) in selected.iter().enumerate() {
        println!(
            "  {}. {} [{}] score {:.3} -> {}",
            rank + 1,
            item.candidate.id,
            item.candidate.category,
            item.final_score,
            item.local_path.display()
        );
    }
    println!();
    println!(
        "Estimated download time saved: {:.2}s",
        metrics.snapshot().time_saved_secs
    );

    Ok(())
}

fn print_metrics(snapshot: &PerformanceSnapshot) {
    println!(
        "Tasks: {} cached, {} executed, {} fallback",
        snapshot.tasks_cached, snapshot.tasks_executed, snapshot.tasks_fallback
    );
    println!(
        "Cache: {} hits, {} misses ({:.0}% hit rate), {} evictions",
        snapshot.cache_hits,
        snapshot.cache_misses,
        snapshot.hit_rate * 100.0,
        snapshot.evictions
    );
    println!("Estimated time saved: {:.2}s", snapshot.time_saved_secs);
}

/// Shows cache statistics.
pub async fn stats(config: &Config) -> ReelResult<()> {
    if !config.cache.enabled {
        println!("Cache is disabled in the configuration.");
        return Ok(());
    }

    let store = open_cache(config, Arc::new(MetricsAccumulator::new()))?;
    let stats = store.stats();

    println!("Cache: {}", config.cache.snapshot_path.display());
    println!("  Entries: {}", stats.entries);
    println!(
        "  Size: {} / {} bytes ({:.1}%)",
        stats.total_size_bytes,
        stats.max_size_bytes,
        stats.utilization() * 100.0
    );

    let mut per_operation: BTreeMap<String, (usize, usize)> = BTreeMap::new();
    for entry in store.entries() {
        let operation = if entry.operation.is_empty() {
            "(unknown)".to_string()
        } else {
            entry.operation.clone()
        };
        let counts = per_operation.entry(operation).or_insert((0, 0));
        counts.0 += 1;
        counts.1 += entry.size_bytes;
    }

    if !per_operation.is_empty() {
        println!();
        println!("By operation:");
        for (operation, (count, size)) in &per_operation {
            println!("  {:<20} {:>6} entries {:>10} bytes", operation, count, size);
        }
    }

    Ok(())
}

/// Removes cache entries.
pub async fn clear(pattern: Option<&str>, config: &Config) -> ReelResult<()> {
    let store = open_cache(config, Arc::new(MetricsAccumulator::new()))?;
    let removed = store.clear(pattern);
    store.persist_now()?;

    match pattern {
        Some(pattern) => println!("Removed {} entries matching '{}'.", removed, pattern),
        None => println!("Removed {} entries.", removed),
    }

    Ok(())
}

/// Removes expired cache entries and rewrites the snapshot.
pub async fn prune(config: &Config) -> ReelResult<()> {
    let store = open_cache(config, Arc::new(MetricsAccumulator::new()))?;
    let removed = store.purge_expired();
    store.persist_now()?;

    println!(
        "Snapshot compacted: {} live entries kept, {} expired removed.",
        store.len(),
        removed
    );

    Ok(())
}

/// Edits the configuration interactively.
pub async fn config_cmd(config_path: &Path) -> ReelResult<()> {
    use super::interactive::{run_interactive_config, show_config_summary};

    if config_path.exists() {
        let config = Config::load(config_path)?;
        show_config_summary(&config);
    }

    run_interactive_config(config_path)
}

/// Diagnoses configuration problems.
pub async fn doctor(config: &Config) -> ReelResult<()> {
    println!("Diagnosing reelsmith configuration...\n");

    let mut issues: Vec<String> = Vec::new();
    let mut warnings: Vec<String> = Vec::new();

    match config.validate() {
        Ok(()) => println!("✓ Configuration is valid"),
        Err(e) => issues.push(e.to_string()),
    }

    if config.tasks.is_empty() {
        warnings.push("No [tasks] configured - 'reelsmith run' has nothing to do".to_string());
    }

    let timeout = Duration::from_secs(config.general.timeout_secs);
    for (name, task) in &config.tasks {
        let executor = CommandExecutor::from_config(name, task).with_timeout(timeout);

        if executor.is_available().await {
            let version = executor.version().await.unwrap_or_default();
            println!(
                "✓ Task '{}' is available (command: {} {})",
                name,
                executor.command(),
                version
            );
        } else {
            warnings.push(format!(
                "Task '{}' command not found (expected: {}), its fallback will be used",
                name,
                executor.command()
            ));
        }
    }

    if config.fetcher.is_configured() {
        println!("✓ Fetcher configured (command: {})", config.fetcher.command);
    } else {
        warnings.push("No [fetcher] command configured - media cannot be downloaded".to_string());
    }

    if config.cache.enabled {
        let snapshot_dir = config
            .cache
            .snapshot_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        if snapshot_dir.exists() {
            println!("✓ Cache directory exists ({})", snapshot_dir.display());
        } else {
            warnings.push(format!(
                "Cache directory {} does not exist yet, it will be created",
                snapshot_dir.display()
            ));
        }
    } else {
        warnings.push("Cache is disabled - every task will be executed".to_string());
    }

    println!();
    if issues.is_empty() && warnings.is_empty() {
        println!("✓ All good! reelsmith is ready.");
    } else {
        if !warnings.is_empty() {
            println!("Warnings:");
            for warning in warnings {
                println!("  ⚠ {}", warning);
            }
        }
        if !issues.is_empty() {
            println!("Problems:");
            for issue in issues {
                println!("  ✗ {}", issue);
            }
        }
    }

    Ok(())
}

/// Shows version.
pub fn version() {
    println!("reelsmith {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Cache-aware task orchestration for short-video pipelines");
}
