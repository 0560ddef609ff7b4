//! modhost - host simulator for the plugin runtime.
//!
//! Loads a scenario, drives the runtime on a real tick scheduler and prints
//! what happened to every plugin.

mod report;
mod scenario;

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use modhost_core::{
    load_config, Bootstrapper, ErrorSink, HostServices, ModuleCatalog, RuntimeConfig, Scheduler,
    TokioScheduler,
};
use tokio::sync::oneshot;
use tokio::time;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use report::SimulationOutput;
use scenario::{DelayedOwner, Scenario};

#[derive(Debug, Parser)]
#[command(name = "modhost", version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Host simulator for the modhost plugin runtime", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run a scenario and print the plugin lifecycle report
    Simulate {
        /// Scenario file (TOML)
        #[arg(long, value_name = "FILE")]
        scenario: PathBuf,

        /// Runtime configuration (TOML or JSON)
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// How long the host stays up before deactivating the runtime
        #[arg(long, default_value_t = 5000)]
        run_ms: u64,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Load and validate a runtime configuration file
    CheckConfig {
        #[arg(long, value_name = "FILE")]
        config: PathBuf,
    },
}

/// Error sink that forwards to the log and counts.
struct LogSink {
    reported: Arc<AtomicUsize>,
}

impl ErrorSink for LogSink {
    fn report(&self, context: &str, error: &str) {
        self.reported.fetch_add(1, Ordering::SeqCst);
        warn!(target: "modhost::errors", context, error, "Failure reported");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Simulate {
            scenario,
            config,
            run_ms,
            json,
        } => {
            let config = match &config {
                Some(path) => load_config(path)
                    .with_context(|| format!("Invalid config {}", path.display()))?,
                None => RuntimeConfig::default(),
            };
            init_tracing(&config.log_level);

            let scenario = Scenario::load(&scenario)?;
            let output = simulate(config, scenario, run_ms).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                print!("{}", report::render(&output));
            }
        }
        Commands::CheckConfig { config: path } => {
            init_tracing("info");
            let config = load_config(&path)
                .with_context(|| format!("Invalid config {}", path.display()))?;
            info!(path = %path.display(), "Configuration is valid");
            print!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

fn init_tracing(default_filter: &str) {
    // RUST_LOG wins over the configured level
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn simulate(
    config: RuntimeConfig,
    scenario: Scenario,
    run_ms: u64,
) -> anyhow::Result<SimulationOutput> {
    let catalog = Arc::new(ModuleCatalog::new());
    for module in scenario.initial_modules() {
        catalog.register_module(module.definition()?);
    }
    let late = scenario
        .late_modules()
        .map(|(delay, module)| -> anyhow::Result<_> { Ok((delay, module.definition()?)) })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let (scheduler, driver) = TokioScheduler::spawn(config.tick_interval());
    let reported = Arc::new(AtomicUsize::new(0));
    let counter = reported.clone();
    let owner = Arc::new(DelayedOwner::new(&scenario.owner));
    let host =
        HostServices::new(owner, scheduler.clone(), catalog.clone()).with_error_sink(move |_| {
            Ok(Arc::new(LogSink {
                reported: counter.clone(),
            }) as Arc<dyn ErrorSink>)
        });
    let runtime = Bootstrapper::new(config, host);

    info!(run_ms, modules = scenario.modules.len(), "Starting simulation");
    let activated = runtime.clone();
    on_scheduler(&scheduler, move || activated.on_activated()).await?;

    let arrivals: Vec<_> = late
        .into_iter()
        .map(|(delay, definition)| {
            let catalog = catalog.clone();
            tokio::spawn(async move {
                time::sleep(delay).await;
                info!(module = %definition.id, "Module arriving");
                catalog.register_module(definition);
            })
        })
        .collect();

    time::sleep(Duration::from_millis(run_ms)).await;
    let running = runtime.report();

    for arrival in &arrivals {
        arrival.abort();
    }
    let deactivated = runtime.clone();
    on_scheduler(&scheduler, move || deactivated.on_deactivated()).await?;
    let stopped = runtime.report();

    scheduler.stop();
    driver.await.context("Scheduler driver failed")?;
    info!("Simulation finished");

    Ok(SimulationOutput {
        run_ms,
        errors_reported: reported.load(Ordering::SeqCst),
        running,
        stopped,
    })
}

/// Run a host signal on the scheduler so it never overlaps a tick or a slice.
async fn on_scheduler<F>(scheduler: &TokioScheduler, signal: F) -> anyhow::Result<()>
where
    F: FnOnce() + Send + 'static,
{
    let (done, finished) = oneshot::channel();
    scheduler.invoke_after(
        Duration::ZERO,
        Box::new(move || {
            signal();
            let _ = done.send(());
        }),
    );
    finished.await.context("Scheduler stopped before running the host signal")
}
