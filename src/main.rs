use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use cli_table::{Cell, CellStruct, Style, Table, format::Justify, print_stdout};
use owo_colors::OwoColorize;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use offload::cli::{Cli, Commands};
use offload::config::Config;
use offload::filesystem::{
    Classifier, DfScanner, Scanner, SizeThreshold, Watcher, WatcherSettings,
};
use offload::orchestrator::{Orchestrator, OrchestratorSettings};
use offload::status::{ConsoleStatus, StatusSink, spawn_pair_forwarder};
use offload::transfer::{Supervisor, SupervisorSettings};
use offload::util::human_bytes;

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let loaded = Config::read(&config_path)
        .with_context(|| format!("loading config {}", config_path.display()))?;
    let found = loaded.is_some();
    let config = loaded.unwrap_or_default();
    // log_dir comes from the config, so the subscriber can only start after reading it
    let _log_guard = init_logging(cli.verbose, config.log_dir.as_deref())?;
    if !found {
        tracing::info!("[config] {} not found, using defaults", config_path.display());
    }

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => handle_run(&config),
        Commands::Scan => handle_scan(&config),
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

/// stderr always; a daily rolling file as well when `log_dir` is configured.
fn init_logging(verbose: bool, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let Some(dir) = log_dir else {
        tracing_subscriber::registry().with(filter).with(stderr_layer).try_init()?;
        return Ok(None);
    };
    std::fs::create_dir_all(dir)
        .with_context(|| format!("creating log dir {}", dir.display()))?;
    let appender = tracing_appender::rolling::daily(dir, "offload.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let file_layer = tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer);
    tracing_subscriber::registry().with(filter).with(stderr_layer).with(file_layer).try_init()?;
    Ok(Some(guard))
}

/// Fail early when an external tool the appliance depends on is missing.
fn check_tools(config: &Config) -> Result<()> {
    let mut tools = vec![
        config.rsync_path.as_os_str().to_owned(),
        config.df_path.as_os_str().to_owned(),
        config.sync_path.as_os_str().to_owned(),
    ];
    if config.remount
        && let Some(program) = config.mount_command.first()
    {
        tools.push(program.into());
    }
    for tool in tools {
        which::which(&tool)
            .with_context(|| format!("required tool not found: {}", tool.to_string_lossy()))?;
    }
    Ok(())
}

fn handle_run(config: &Config) -> Result<()> {
    check_tools(config)?;
    tracing::info!("[main] watching {}", config.media_root.display());

    let scanner = Arc::new(DfScanner::new(&config.media_root, &config.df_path, config.scan_timeout()));
    let classifier = Arc::new(SizeThreshold::new(config.destination_threshold));
    let mut watcher = Watcher::spawn(scanner, classifier, WatcherSettings::from_config(config));
    if let Err(e) = watcher.watch_mounts(&config.media_root) {
        tracing::warn!("[main] change notifications unavailable, periodic scans only: {}", e);
    }
    let watcher = Arc::new(watcher);

    let status: Arc<dyn StatusSink> = Arc::new(ConsoleStatus::new());
    let _forwarder = spawn_pair_forwarder(&watcher, status.clone());

    let supervisor = Arc::new(Supervisor::new(SupervisorSettings::from_config(config)));
    Orchestrator::new(watcher, supervisor, status, OrchestratorSettings::from_config(config)).run();
    Ok(())
}

fn handle_scan(config: &Config) -> Result<()> {
    let scanner = DfScanner::new(&config.media_root, &config.df_path, config.scan_timeout());
    let records = scanner.scan().context("filesystem scan failed")?;
    if records.is_empty() {
        println!("No media mounted under {}", scanner.media_root().display());
        return Ok(());
    }

    let classified = SizeThreshold::new(config.destination_threshold).classify(records.clone());
    let pair = classified.as_ref().ok();
    let role_of = |path: &Path| -> &'static str {
        let Some(p) = pair else { return "?" };
        if p.destination.as_ref().is_some_and(|d| d.path == path) {
            "destination"
        } else if p.source.as_ref().is_some_and(|s| s.path == path) {
            "source"
        } else {
            "?"
        }
    };

    let title = vec![
        "Path".cell().bold(true),
        "Size".cell().bold(true),
        "Used".cell().bold(true),
        "Available".cell().bold(true),
        "Role".cell().bold(true),
    ];
    let table: Vec<Vec<CellStruct>> = records
        .iter()
        .map(|r| {
            vec![
                r.path.display().to_string().cell(),
                human_bytes(r.size).cell().justify(Justify::Right),
                human_bytes(r.used).cell().justify(Justify::Right),
                human_bytes(r.available).cell().justify(Justify::Right),
                role_of(&r.path).cell(),
            ]
        })
        .collect();
    print_stdout(table.table().title(title))?;

    match classified {
        Ok(p) if p.is_complete() => println!("{}", "Ready: card and drive detected".green()),
        Ok(p) if p.destination.is_none() => println!("{}", "Waiting: connect drive".yellow()),
        Ok(_) => println!("{}", "Waiting: connect card".yellow()),
        Err(e) => println!("{} {}", "Error:".red(), e),
    }
    Ok(())
}
