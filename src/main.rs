use clap::Parser;
use reelsmith::cli::{Cli, Commands};
use reelsmith::types::config::Config;
use reelsmith::ReelResult;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> ReelResult<()> {
    let cli = Cli::parse();

    // Load configuration first (no logging yet). A broken file is fatal;
    // defaults only stand in for a missing one.
    let config = if cli.config.exists() {
        Config::load(&cli.config)?
    } else {
        Config::default_config()
    };

    // CLI flags take precedence over config
    let log_level = if cli.quiet {
        "error".to_string()
    } else if cli.verbose {
        "debug".to_string()
    } else {
        config.general.log_level.clone()
    };

    let filter = EnvFilter::from_default_env().add_directive(
        format!("reelsmith={}", log_level)
            .parse()
            .unwrap_or_else(|_| "reelsmith=info".parse().expect("fallback directive is valid")),
    );

    if config.general.log_format == "json" {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(filter)
            .init();
    }

    tracing::debug!("Configuration loaded from: {}", cli.config.display());

    match cli.command {
        Commands::Init { path } => {
            reelsmith::cli::commands::init(path).await?;
        }
        Commands::Run { tasks, json } => {
            reelsmith::cli::commands::run(&tasks, json, &config).await?;
        }
        Commands::Select {
            reference,
            candidates,
            max,
            json,
        } => {
            reelsmith::cli::commands::select(&reference, &candidates, max, json, &config).await?;
        }
        Commands::Stats => {
            reelsmith::cli::commands::stats(&config).await?;
        }
        Commands::Clear { pattern } => {
            reelsmith::cli::commands::clear(pattern.as_deref(), &config).await?;
        }
        Commands::Prune => {
            reelsmith::cli::commands::prune(&config).await?;
        }
        Commands::Config => {
            reelsmith::cli::commands::config_cmd(&cli.config).await?;
        }
        Commands::Doctor => {
            reelsmith::cli::commands::doctor(&config).await?;
        }
        Commands::Version => {
            reelsmith::cli::commands::version();
        }
    }

    Ok(())
}
