use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use govnode_core::Network;
use govnode_node::config::expand_path;
use govnode_node::{logging, CacheFiles, NodeConfig};
use govnode_treasury::BudgetMode;
use owo_colors::OwoColorize;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Parser)]
#[command(name = "govnoded")]
#[command(about = "Masternode governance node tool", version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// main, test or regtest
    #[arg(long)]
    network: Option<Network>,

    #[arg(long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// auto, suggest or off
    #[arg(long)]
    budget_mode: Option<BudgetMode>,

    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Verify the cache files in the data directory
    Check,
    /// Print the effective configuration
    Config,
    /// Re-check the cache files every dump interval until interrupted
    Watch,
}

fn load_config(cli: &Cli) -> Result<NodeConfig> {
    let path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(expand_path("$HOME/.govnode/govnode.toml")));

    let mut config = if path.exists() {
        NodeConfig::load(&path).with_context(|| format!("loading {}", path.display()))?
    } else {
        if cli.config.is_some() {
            anyhow::bail!("config file {} not found", path.display());
        }
        NodeConfig::default()
    };

    if let Some(network) = cli.network {
        config.network = network;
    }
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    if let Some(mode) = cli.budget_mode {
        config.budget_mode = mode;
    }
    if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }
    config.validate()?;
    Ok(config)
}

fn print_check(caches: &CacheFiles) -> bool {
    let mut healthy = true;
    for (path, outcome) in caches.verify() {
        match outcome.as_str() {
            "ok" => println!("{} {}", "✓".green(), path.display()),
            "missing" => println!("{} {} (missing)", "-".bright_black(), path.display()),
            _ => {
                healthy = false;
                println!("{} {}: {}", "✗".red(), path.display(), outcome);
            }
        }
    }
    healthy
}

async fn watch_caches(config: &NodeConfig, caches: &CacheFiles) {
    let (tx, mut rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = tx.send(true);
        }
    });

    let mut interval = tokio::time::interval(Duration::from_secs(config.dump_interval_secs));
    loop {
        tokio::select! {
            _ = interval.tick() => {
                if !print_check(caches) {
                    tracing::warn!("cache verification failed");
                }
            }
            _ = rx.changed() => break,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    logging::init(&config.log_level)?;

    let command = cli.command.unwrap_or(Command::Check);
    let caches = CacheFiles::new(&config.data_dir, &config.params());

    match command {
        Command::Config => print!("{}", config.to_toml()),
        Command::Check => {
            println!(
                "{} {} ({} network)",
                "govnode".cyan().bold(),
                govnode_node::version(),
                config.network
            );
            if !print_check(&caches) {
                anyhow::bail!("one or more cache files failed verification");
            }
        }
        Command::Watch => watch_caches(&config, &caches).await,
    }
    Ok(())
}
