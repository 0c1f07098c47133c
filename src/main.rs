//! wscout: list, maintain and open an editor's recent workspaces
//!
//! Commands:
//! - list: scan and print recent workspaces
//! - scan: scan and print the run summary with the error list
//! - watch: keep the catalog fresh until Ctrl-C
//! - remove / open / clear / tag / favorite / retry

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use workspace_scout::config::{Config, default_config_path, load_config};
use workspace_scout::engine::{RemovalMode, WorkspaceEngine};
use workspace_scout::state::{self, Favorites, TagStore};
use workspace_scout::watcher::StorageWatcher;

#[derive(Parser)]
#[command(name = "wscout")]
#[command(about = "Recent workspace discovery for VS Code style editors", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (defaults to <config_dir>/workspace-scout/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging regardless of the config file
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan storage roots and list recent workspaces
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Scan storage roots and print the processing summary
    Scan,

    /// Keep scanning on the refresh interval and on storage changes
    Watch,

    /// Remove a workspace from the catalog
    Remove {
        uri: String,

        /// Delete the store directory instead of trashing it
        #[arg(long, conflicts_with = "forget")]
        delete: bool,

        /// Only drop the record; leave the store directory alone
        #[arg(long)]
        forget: bool,
    },

    /// Print the launch command for a workspace
    Open { uri: String },

    /// Back up every storage root and delete all store directories
    Clear {
        /// Required confirmation
        #[arg(long)]
        yes: bool,
    },

    /// Tag a workspace (tags are lowercased)
    Tag { uri: String, tag: String },

    /// Toggle favorite status
    Favorite { uri: String },

    /// Scan, then retry every path that failed
    Retry,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().or_else(default_config_path);
    let config = match &config_path {
        Some(path) => load_config(path)?,
        None => Config::default().validated(),
    };

    let _guards = init_logging(&config, cli.verbose)?;
    debug!("Using config {:?}", config_path);

    let engine = Arc::new(WorkspaceEngine::new(config));

    match cli.command {
        Commands::List { json } => list(&engine, json).await,
        Commands::Scan => scan(&engine).await,
        Commands::Watch => watch(engine).await,
        Commands::Remove {
            uri,
            delete,
            forget,
        } => {
            engine.refresh().await?;
            let mode = if delete {
                RemovalMode::Delete
            } else if forget {
                RemovalMode::Forget
            } else {
                RemovalMode::Trash
            };
            if engine.remove(&uri, mode) {
                println!("Removed {}", uri);
            } else {
                println!("No workspace {}", uri);
            }
            Ok(())
        }
        Commands::Open { uri } => {
            engine.refresh().await?;
            let intent = engine.open(&uri)?;
            println!("{} {}", intent.command, intent.args.join(" "));
            Ok(())
        }
        Commands::Clear { yes } => {
            if !yes {
                anyhow::bail!("Refusing to clear without --yes");
            }
            engine.refresh().await?;
            let report = engine.clear_all()?;
            println!(
                "Deleted {} store directories; backups: {}",
                report.deleted,
                report
                    .backups
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            Ok(())
        }
        Commands::Tag { uri, tag } => {
            let state_dir = engine.config().state_dir.clone();
            let added = state::update::<TagStore, _>(&state_dir, |tags| {
                let added = tags.add(&uri, &tag);
                (added, added)
            })?;
            if !added {
                println!("{} already tagged {}", uri, tag.to_lowercase());
            }
            Ok(())
        }
        Commands::Favorite { uri } => {
            let state_dir = engine.config().state_dir.clone();
            let now = state::update::<Favorites, _>(&state_dir, |favorites| {
                (true, favorites.toggle(&uri))
            })?;
            println!("{} {}", if now { "Favorited" } else { "Unfavorited" }, uri);
            Ok(())
        }
        Commands::Retry => {
            engine.refresh().await?;
            let summary = engine.retry_failed().await;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            print_errors(&engine);
            Ok(())
        }
    }
}

/// Console + daily rolling file under `<state_dir>/logs`. The guards must
/// live until exit so buffered lines are flushed.
fn init_logging(
    config: &Config,
    verbose: bool,
) -> Result<(
    tracing_appender::non_blocking::WorkerGuard,
    tracing_appender::non_blocking::WorkerGuard,
)> {
    let default_level = if verbose || config.enable_diagnostics {
        "workspace_scout=debug,wscout=debug"
    } else {
        "workspace_scout=info,wscout=info"
    };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .context("Invalid log filter")?;

    let logs_dir = config.logs_dir();
    fs::create_dir_all(&logs_dir)
        .with_context(|| format!("Failed to create logs directory {}", logs_dir.display()))?;

    let file_appender = rolling::daily(&logs_dir, "wscout.log");
    let (non_blocking_file, file_guard) = non_blocking(file_appender);
    let (non_blocking_console, console_guard) = non_blocking(std::io::stderr());

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(non_blocking_console)
                .with_target(false)
                .with_ansi(true),
        )
        .with(
            fmt::layer()
                .with_writer(non_blocking_file)
                .with_target(true)
                .with_ansi(false)
                .with_file(true)
                .with_line_number(true),
        )
        .init();

    Ok((file_guard, console_guard))
}

async fn list(engine: &WorkspaceEngine, json: bool) -> Result<()> {
    engine.refresh().await?;
    let entries = engine.entries();

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    let state_dir = &engine.config().state_dir;
    let favorites: Favorites = state::load(state_dir)?;
    let tags: TagStore = state::load(state_dir)?;
    for entry in entries {
        let star = if favorites.contains(&entry.view.uri) { "*" } else { " " };
        let labels = tags.tags_for(&entry.view.uri);
        let labels = if labels.is_empty() {
            String::new()
        } else {
            format!(" [{}]", labels.join(", "))
        };
        println!("{} {:<32} {}{}", star, entry.name, entry.view.uri, labels);
    }
    Ok(())
}

async fn scan(engine: &WorkspaceEngine) -> Result<()> {
    let report = engine.refresh().await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    print_errors(engine);
    Ok(())
}

fn print_errors(engine: &WorkspaceEngine) {
    let errors = engine.errors();
    if errors.is_empty() {
        return;
    }
    println!("{} failed paths:", errors.len());
    for item in errors {
        println!(
            "  {} ({:?}{}): {}",
            item.path.display(),
            item.kind,
            if item.retryable { ", retryable" } else { "" },
            item.message
        );
    }
}

async fn watch(engine: Arc<WorkspaceEngine>) -> Result<()> {
    let mut watcher = StorageWatcher::new(engine.config().storage_roots.clone());
    if let Err(e) = watcher.start(engine.clone()) {
        warn!("Storage watcher unavailable, relying on the refresh interval: {:#}", e);
    }
    let changed = watcher.changed();

    let mut refresh_tick =
        tokio::time::interval(Duration::from_secs(engine.config().refresh_interval_secs));
    let mut idle_tick = tokio::time::interval(Duration::from_secs(60));
    idle_tick.tick().await;

    info!("Watching storage roots, Ctrl-C to stop");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                engine.cancel();
                break;
            }
            _ = refresh_tick.tick() => {
                if !refresh_until_shutdown(&engine).await {
                    break;
                }
            }
            _ = changed.notified() => {
                if engine.is_dirty() && !refresh_until_shutdown(&engine).await {
                    break;
                }
            }
            _ = idle_tick.tick() => {
                let report = engine.idle_maintenance().await;
                debug!("Idle maintenance: {:?}", report);
            }
        }
    }

    watcher.stop();
    Ok(())
}

/// Refresh, cancelling the active run if Ctrl-C arrives meanwhile.
/// Returns `false` when shutdown was requested.
async fn refresh_until_shutdown(engine: &WorkspaceEngine) -> bool {
    let refresh = refresh_and_report(engine);
    tokio::pin!(refresh);
    tokio::select! {
        _ = &mut refresh => true,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown requested, cancelling active run");
            engine.cancel();
            refresh.await;
            false
        }
    }
}

async fn refresh_and_report(engine: &WorkspaceEngine) {
    match engine.refresh().await {
        Ok(report) => info!(
            "{} workspaces ({} new store dirs, {} failed)",
            engine.snapshot().len(),
            report.discovered,
            report.run.failed
        ),
        Err(e) => warn!("Refresh failed: {}", e),
    }
}
