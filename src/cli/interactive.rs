//! Interactive configuration editor built on dialoguer.

use std::path::{Path, PathBuf};

use dialoguer::{theme::ColorfulTheme, Confirm, Input, Select};

use crate::types::config::{Config, TaskConfig};
use crate::ReelResult;

/// Runs the interactive editor and saves on request.
pub fn run_interactive_config(config_path: &Path) -> ReelResult<()> {
    let theme = ColorfulTheme::default();

    println!("\n🔧 reelsmith interactive configuration\n");

    let mut config = if config_path.exists() {
        Config::load(config_path)?
    } else {
        println!("Creating a new configuration...\n");
        Config::default_config()
    };

    loop {
        let options = vec![
            "General",
            "Cache",
            "Dispatch",
            "Selection",
            "Tasks",
            "Save and exit",
            "Exit without saving",
        ];

        let selection = Select::with_theme(&theme)
            .with_prompt("What do you want to configure?")
            .items(&options)
            .default(0)
            .interact()?;

        match selection {
            0 => configure_general(&theme, &mut config)?,
            1 => configure_cache(&theme, &mut config)?,
            2 => configure_dispatch(&theme, &mut config)?,
            3 => configure_selection(&theme, &mut config)?,
            4 => configure_tasks(&theme, &mut config)?,
            5 => {
                if let Err(e) = config.validate() {
                    println!("\n✗ {}\n", e);
                    continue;
                }
                config.save(config_path)?;
                println!("\n✓ Configuration saved to: {}\n", config_path.display());
                break;
            }
            6 => {
                if Confirm::with_theme(&theme)
                    .with_prompt("Exit without saving?")
                    .default(false)
                    .interact()?
                {
                    println!("\nExiting without saving.\n");
                    break;
                }
            }
            _ => {}
        }
    }

    Ok(())
}

fn configure_general(theme: &ColorfulTheme, config: &mut Config) -> ReelResult<()> {
    println!("\n📋 General\n");

    let log_levels = vec!["error", "warn", "info", "debug", "trace"];
    let current_idx = log_levels
        .iter()
        .position(|&l| l == config.general.log_level)
        .unwrap_or(2);

    let log_level_idx = Select::with_theme(theme)
        .with_prompt("Log level")
        .items(&log_levels)
        .default(current_idx)
        .interact()?;
    config.general.log_level = log_levels[log_level_idx].to_string();

    let log_formats = vec!["text", "json"];
    let current_format_idx = log_formats
        .iter()
        .position(|&f| f == config.general.log_format)
        .unwrap_or(0);

    let log_format_idx = Select::with_theme(theme)
        .with_prompt("Log format")
        .items(&log_formats)
        .default(current_format_idx)
        .interact()?;
    config.general.log_format = log_formats[log_format_idx].to_string();

    config.general.timeout_secs = Input::with_theme(theme)
        .with_prompt("Command timeout (seconds)")
        .default(config.general.timeout_secs)
        .interact_text()?;

    println!("\n✓ General settings updated.\n");
    Ok(())
}

fn configure_cache(theme: &ColorfulTheme, config: &mut Config) -> ReelResult<()> {
    println!("\n💾 Cache\n");

    config.cache.enabled = Confirm::with_theme(theme)
        .with_prompt("Persist the cache to disk?")
        .default(config.cache.enabled)
        .interact()?;

    let max_size_mib: usize = Input::with_theme(theme)
        .with_prompt("Size budget (MiB)")
        .default((config.cache.max_size_bytes / (1024 * 1024)).max(1))
        .interact_text()?;
    config.cache.max_size_bytes = max_size_mib.max(1) * 1024 * 1024;

    let ttl_hours: u64 = Input::with_theme(theme)
        .with_prompt("Default TTL (hours)")
        .default(config.cache.default_ttl_secs / 3600)
        .interact_text()?;
    config.cache.default_ttl_secs = ttl_hours * 3600;

    if config.cache.enabled {
        let snapshot_path: String = Input::with_theme(theme)
            .with_prompt("Snapshot file")
            .default(config.cache.snapshot_path.display().to_string())
            .interact_text()?;
        config.cache.snapshot_path = PathBuf::from(snapshot_path);
    }

    let volatile: String = Input::with_theme(theme)
        .with_prompt("Fields ignored in cache keys (comma separated)")
        .default(config.cache.volatile_fields.join(", "))
        .interact_text()?;
    config.cache.volatile_fields = split_list(&volatile);

    println!("\n✓ Cache configured.\n");
    Ok(())
}

fn configure_dispatch(theme: &ColorfulTheme, config: &mut Config) -> ReelResult<()> {
    println!("\n⚡ Dispatch\n");

    let max_concurrency: usize = Input::with_theme(theme)
        .with_prompt("Maximum concurrent tasks")
        .default(config.dispatch.max_concurrency)
        .interact_text()?;
    config.dispatch.max_concurrency = max_concurrency.max(1);

    config.dispatch.task_timeout_secs = Input::with_theme(theme)
        .with_prompt("Per-task timeout (seconds)")
        .default(config.dispatch.task_timeout_secs)
        .interact_text()?;

    println!("\n✓ Dispatch configured.\n");
    Ok(())
}

fn configure_selection(theme: &ColorfulTheme, config: &mut Config) -> ReelResult<()> {
    println!("\n🎬 Selection\n");

    let relevance_weight: f64 = Input::with_theme(theme)
        .with_prompt("Relevance weight (0-1)")
        .default(config.selection.relevance_weight)
        .interact_text()?;
    config.selection.relevance_weight = relevance_weight.clamp(0.0, 1.0);

    let quality_weight: f64 = Input::with_theme(theme)
        .with_prompt("Quality weight (0-1)")
        .default(config.selection.quality_weight)
        .interact_text()?;
    config.selection.quality_weight = quality_weight.clamp(0.0, 1.0);

    let diversity_bonus: f64 = Input::with_theme(theme)
        .with_prompt("Diversity bonus")
        .default(config.selection.diversity_bonus)
        .interact_text()?;
    config.selection.diversity_bonus = diversity_bonus.max(0.0);

    config.selection.category_cap = Input::with_theme(theme)
        .with_prompt("Maximum picks per category")
        .default(config.selection.category_cap)
        .interact_text()?;

    let max_parallel_fetches: usize = Input::with_theme(theme)
        .with_prompt("Parallel downloads")
        .default(config.selection.max_parallel_fetches)
        .interact_text()?;
    config.selection.max_parallel_fetches = max_parallel_fetches.max(1);

    config.selection.prefer_portrait = Confirm::with_theme(theme)
        .with_prompt("Prefer vertical footage?")
        .default(config.selection.prefer_portrait)
        .interact()?;

    println!("\n✓ Selection configured.\n");
    Ok(())
}

fn configure_tasks(theme: &ColorfulTheme, config: &mut Config) -> ReelResult<()> {
    println!("\n🧩 Tasks\n");

    loop {
        let mut options: Vec<String> = config.tasks.keys().cloned().collect();
        options.push("Add task".to_string());
        options.push("Back".to_string());

        let selection = Select::with_theme(theme)
            .with_prompt("Which task?")
            .items(&options)
            .default(0)
            .interact()?;

        let task_count = config.tasks.len();
        if selection == task_count + 1 {
            break;
        }

        let name = if selection == task_count {
            let name: String = Input::with_theme(theme)
                .with_prompt("Task name")
                .interact_text()?;
            name.trim().to_string()
        } else {
            options[selection].clone()
        };
        if name.is_empty() {
            continue;
        }

        let task = config
            .tasks
            .entry(name.clone())
            .or_insert_with(|| TaskConfig::new("", &[], ""));
        configure_single_task(theme, &name, task)?;
    }

    Ok(())
}

fn configure_single_task(theme: &ColorfulTheme, name: &str, task: &mut TaskConfig) -> ReelResult<()> {
    println!("\n⚙️  Configuring '{}'\n", name);

    task.command = Input::with_theme(theme)
        .with_prompt("Command")
        .default(task.command.clone())
        .interact_text()?;

    let args: String = Input::with_theme(theme)
        .with_prompt("Arguments (space separated)")
        .default(task.args.join(" "))
        .allow_empty(true)
        .interact_text()?;
    task.args = args.split_whitespace().map(String::from).collect();

    task.fallback = Input::with_theme(theme)
        .with_prompt("Fallback text")
        .default(task.fallback.clone())
        .allow_empty(true)
        .interact_text()?;

    let ttl_hours: u64 = Input::with_theme(theme)
        .with_prompt("Cache TTL in hours (0 = cache default)")
        .default(task.ttl_secs.map(|s| s / 3600).unwrap_or(0))
        .interact_text()?;
    task.ttl_secs = (ttl_hours > 0).then(|| ttl_hours * 3600);

    println!("\n✓ '{}' configured.\n", name);
    Ok(())
}

fn split_list(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Prints a summary of the configuration.
pub fn show_config_summary(config: &Config) {
    let yes_no = |flag: bool| if flag { "Yes" } else { "No" };

    println!("\n📊 Configuration summary\n");
    println!("┌─────────────────────────────────────────┐");
    println!("│ General                                 │");
    println!("├─────────────────────────────────────────┤");
    println!("│ Log level: {:<28} │", config.general.log_level);
    println!("│ Timeout: {:<29}s │", config.general.timeout_secs);
    println!("├─────────────────────────────────────────┤");
    println!("│ Cache                                   │");
    println!("├─────────────────────────────────────────┤");
    println!("│ Persistent: {:<27} │", yes_no(config.cache.enabled));
    println!(
        "│ Budget: {:<31} │",
        format!("{} MiB", config.cache.max_size_bytes / (1024 * 1024))
    );
    println!("│ Default TTL: {:<25}s │", config.cache.default_ttl_secs);
    println!("├─────────────────────────────────────────┤");
    println!("│ Dispatch                                │");
    println!("├─────────────────────────────────────────┤");
    println!("│ Concurrency: {:<26} │", config.dispatch.max_concurrency);
    println!("│ Task timeout: {:<24}s │", config.dispatch.task_timeout_secs);
    println!("├─────────────────────────────────────────┤");
    println!("│ Selection                               │");
    println!("├─────────────────────────────────────────┤");
    println!(
        "│ Weights: {:<30} │",
        format!(
            "relevance {:.2} / quality {:.2}",
            config.selection.relevance_weight, config.selection.quality_weight
        )
    );
    println!("│ Category cap: {:<25} │", config.selection.category_cap);
    println!(
        "│ Parallel downloads: {:<19} │",
        config.selection.max_parallel_fetches
    );
    println!("├─────────────────────────────────────────┤");
    println!("│ Tasks                                   │");
    println!("├─────────────────────────────────────────┤");
    for (name, task) in &config.tasks {
        println!("│ {:<12} {:<26} │", name, task.command);
    }
    println!("└─────────────────────────────────────────┘");
    println!();
}
