//! mockbox - mock-service ensemble for local development
//!
//! ## Commands
//!
//! - `up`: start (or reuse) the ensemble, import artifacts, keep it alive
//! - `scan`: list the artifacts that would be imported
//! - `reload`: re-import changed artifacts into a running ensemble
//! - `status`: show the ensemble recorded by the last `up`
//! - `info`: show version and runtime availability

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use container_ensemble::DockerCli;
use mockbox_core::watch::{changed_ids, outside_roots};
use mockbox_core::{
    ArtifactScanner, ArtifactWatcher, ContainerEnsembleOrchestrator, HotReloadReconciler,
    HttpImporter, LaunchMode, MockboxConfig, ProvisionContext, ScanResult, StateFile, WatchConfig,
    DEFAULT_CONFIG_FILE,
};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "mockbox")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Mock-service ensemble for local development", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Configuration file
    #[arg(short, long, global = true, env = "MOCKBOX_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start or reuse the ensemble and import artifacts; runs until Ctrl-C
    Up {
        /// Re-import changed artifacts while running
        #[arg(short, long)]
        watch: bool,

        /// Launch as a test session (never shared with other processes)
        #[arg(long)]
        test_mode: bool,

        /// Application configuration visible to the ensemble (key=value)
        #[arg(long = "set", value_parser = parse_key_value)]
        settings: Vec<(String, String)>,
    },

    /// List artifacts found under the scan roots
    Scan {
        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Re-import the given artifacts into the running ensemble
    Reload {
        /// Changed files (paths or stable ids)
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Show the ensemble recorded by the last `up`
    Status {
        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Show version and container runtime availability
    Info,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))?;
    if key.trim().is_empty() {
        return Err(format!("empty key in '{}'", raw));
    }
    Ok((key.trim().to_string(), value.to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    mockbox_core::init_tracing(cli.json, level);

    let config = MockboxConfig::load(&cli.config)
        .with_context(|| format!("Failed to load configuration from {:?}", cli.config))?;

    match cli.command {
        Commands::Up {
            watch,
            test_mode,
            settings,
        } => cmd_up(config, watch, test_mode, settings.into_iter().collect()).await,
        Commands::Scan { format } => cmd_scan(&config, format),
        Commands::Reload { files } => cmd_reload(&config, &files).await,
        Commands::Status { format } => cmd_status(&config, format),
        Commands::Info => cmd_info(&cli.config).await,
    }
}

async fn cmd_up(
    config: MockboxConfig,
    watch: bool,
    test_mode: bool,
    global_config: BTreeMap<String, String>,
) -> Result<()> {
    let runtime = Arc::new(DockerCli::from_env());
    let importer = Arc::new(HttpImporter::new().context("Failed to build import client")?);
    let mut orchestrator = ContainerEnsembleOrchestrator::new(runtime, importer.clone());

    let ctx = ProvisionContext {
        launch_mode: if test_mode {
            LaunchMode::Test
        } else {
            LaunchMode::Development
        },
        scan_roots: config.scan_roots.clone(),
        global_config,
    };

    let Some(ensemble) = orchestrator.provision(&config.devservices, &ctx).await? else {
        println!("Dev services are disabled or no container runtime is available; nothing started.");
        return Ok(());
    };

    let service_name = config.devservices.service_name.clone();
    let state = StateFile::from_ensemble(&service_name, &ensemble);
    state
        .write(&config.state_file)
        .with_context(|| format!("Failed to write state to {:?}", config.state_file))?;

    print_exposed(&state);
    println!();
    println!("Press Ctrl-C to stop.");

    let result = if watch {
        run_watch_loop(&config, &service_name, importer).await
    } else {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl-C")
    };

    info!("Shutting down ensemble '{}'", service_name);
    orchestrator.shutdown().await;
    if let Err(e) = StateFile::remove(&config.state_file) {
        warn!("Failed to remove state file {:?}: {}", config.state_file, e);
    }
    result
}

/// Feed debounced file changes to the reconciler until Ctrl-C.
async fn run_watch_loop(
    config: &MockboxConfig,
    service_name: &str,
    importer: Arc<HttpImporter>,
) -> Result<()> {
    let declared = config.devservices.declared_paths();
    let mut watcher =
        ArtifactWatcher::start(&config.scan_roots, &declared, WatchConfig::default())
            .context("Failed to watch scan roots")?;
    let reconciler = HotReloadReconciler::new(service_name, config.scan_roots.clone(), importer);
    info!("Watching {} roots for artifact changes", config.scan_roots.len());

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                return signal.context("Failed to listen for Ctrl-C");
            }
            batch = watcher.next_batch() => {
                let Some(changed) = batch else {
                    warn!("File watcher stopped; waiting for Ctrl-C");
                    return tokio::signal::ctrl_c()
                        .await
                        .context("Failed to listen for Ctrl-C");
                };
                // another process may have restarted the service since startup
                match StateFile::read(&config.state_file)? {
                    Some(state) => reload_batch(&reconciler, &state, &changed).await,
                    None => warn!("State file {:?} is gone, ignoring changes", config.state_file),
                }
            }
        }
    }
}

async fn reload_batch(
    reconciler: &HotReloadReconciler,
    state: &StateFile,
    changed: &HashSet<String>,
) {
    match reconciler.on_files_changed(&state.exposed_config, changed).await {
        Ok(outcome) if !outcome.is_empty() => println!(
            "Reloaded {} primary and {} secondary artifacts",
            outcome.primaries.len(),
            outcome.secondaries.len()
        ),
        Ok(_) => {}
        Err(e) => warn!("Hot reload failed: {}", e),
    }
}

fn cmd_scan(config: &MockboxConfig, format: OutputFormat) -> Result<()> {
    let scan = ArtifactScanner::new(config.scan_roots.clone()).scan();
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&scan_json(&scan))?),
        OutputFormat::Text => {
            if scan.is_empty() {
                println!("No artifacts found under {:?}", config.scan_roots);
                return Ok(());
            }
            println!("Primary artifacts:");
            for (id, artifact) in &scan.primaries {
                println!("  {:<40} {:?}", id, artifact.format);
            }
            println!("Secondary artifacts:");
            for (id, artifact) in &scan.secondaries {
                println!("  {:<40} {:?}", id, artifact.format);
            }
            if scan.collection_present {
                println!();
                println!("A collection was found; the collection runner will be started.");
            }
        }
    }
    Ok(())
}

fn scan_json(scan: &ScanResult) -> serde_json::Value {
    let entries = |group: &BTreeMap<String, mockbox_core::ArtifactDescriptor>| {
        group
            .iter()
            .map(|(id, a)| {
                serde_json::json!({
                    "id": id,
                    "location": a.locator.to_string(),
                    "format": a.format,
                })
            })
            .collect::<Vec<_>>()
    };
    serde_json::json!({
        "primaries": entries(&scan.primaries),
        "secondaries": entries(&scan.secondaries),
        "collection_present": scan.collection_present,
    })
}

async fn cmd_reload(config: &MockboxConfig, files: &[PathBuf]) -> Result<()> {
    let state = StateFile::read(&config.state_file)?.with_context(|| {
        format!(
            "No running ensemble recorded at {:?}; run 'mockbox up' first",
            config.state_file
        )
    })?;

    let declared = outside_roots(&config.scan_roots, &config.devservices.declared_paths());
    let mut changed = HashSet::new();
    for file in files {
        let ids = changed_ids(&config.scan_roots, &declared, std::slice::from_ref(file));
        if ids.is_empty() {
            changed.insert(file.to_string_lossy().to_string());
        } else {
            changed.extend(ids);
        }
    }

    let importer = Arc::new(HttpImporter::new().context("Failed to build import client")?);
    let reconciler =
        HotReloadReconciler::new(&state.service_name, config.scan_roots.clone(), importer);
    let outcome = reconciler
        .on_files_changed(&state.exposed_config, &changed)
        .await?;

    for id in outcome.primaries.iter().chain(&outcome.secondaries) {
        println!("Reloaded {}", id);
    }
    for id in &outcome.failed {
        println!("Failed   {}", id);
    }
    if outcome.is_empty() && outcome.failed.is_empty() {
        println!("None of the given files were imported by the running ensemble.");
    }
    Ok(())
}

fn cmd_status(config: &MockboxConfig, format: OutputFormat) -> Result<()> {
    let Some(state) = StateFile::read(&config.state_file)? else {
        println!("No ensemble running (no state at {:?})", config.state_file);
        return Ok(());
    };
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&state)?),
        OutputFormat::Text => {
            println!("Ensemble '{}' (since {})", state.service_name, state.written_at);
            for service in &state.services {
                println!(
                    "  {:<16} {:<14} {}",
                    service.role.to_string(),
                    short_id(&service.container_id),
                    if service.owned { "owned" } else { "shared" }
                );
            }
            println!();
            print_exposed(&state);
        }
    }
    Ok(())
}

async fn cmd_info(config_path: &Path) -> Result<()> {
    println!("mockbox {}", mockbox_core::VERSION);
    println!(
        "Config: {:?} ({})",
        config_path,
        if config_path.exists() { "found" } else { "defaults" }
    );
    let available = container_ensemble::is_docker_available().await;
    println!(
        "Container runtime: {}",
        if available { "available" } else { "unavailable" }
    );
    Ok(())
}

fn print_exposed(state: &StateFile) {
    println!("Exposed configuration:");
    for (key, value) in state.exposed_config.iter() {
        println!("  {} = {}", key, value);
    }
}

fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}
