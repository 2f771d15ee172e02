use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use weft_core::config::AppConfig;
use weft_core::event::{EngineEvent, EventBus};
use weft_core::types::{GraphSpec, RunStatus};
use weft_engine::{GraphScheduler, InMemoryRunStore, RunSupervisor, StepRegistry};
use weft_tools::ToolRegistry;

const DEFAULT_CONFIG: &str = "weft.toml";

#[derive(Parser)]
#[command(name = "weft", version, about = "DAG step execution engine")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = DEFAULT_CONFIG, env = "WEFT_CONFIG")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway (default)
    Serve,
    /// Execute one graph in-process and print its final state
    Run {
        /// Path to a graph JSON file
        graph: PathBuf,
    },
    /// List registered tools
    Tools,
    /// Show effective configuration
    Config,
}

/// Everything a command needs to submit and observe runs.
struct Engine {
    tools: Arc<ToolRegistry>,
    supervisor: Arc<RunSupervisor>,
    events: Arc<EventBus>,
}

impl Engine {
    fn build(config: &AppConfig) -> Self {
        let events = Arc::new(EventBus::default());
        let tools = Arc::new(ToolRegistry::with_builtins(config));
        let steps = Arc::new(StepRegistry::with_builtins(tools.clone()));

        let scheduler =
            GraphScheduler::new(steps, config.engine.clone()).with_events(events.clone());
        let supervisor = RunSupervisor::new(scheduler, Arc::new(InMemoryRunStore::new()))
            .with_events(events.clone());

        Self {
            tools,
            supervisor: Arc::new(supervisor),
            events,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    // RUST_LOG wins over the config file.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        config
            .log
            .filter
            .as_deref()
            .and_then(|f| EnvFilter::try_new(f).ok())
            .unwrap_or_else(|| EnvFilter::new("weft=info,warn"))
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Tools => {
            let engine = Engine::build(&config);
            for def in engine.tools.definitions() {
                println!("{:<32} {}", def.name, def.description);
            }
        }
        Commands::Run { graph } => {
            let engine = Engine::build(&config);
            run_graph(&engine, &graph).await?;
        }
        Commands::Serve => {
            let engine = Engine::build(&config);
            info!(
                bind = %config.gateway.bind,
                max_concurrent_runs = config.engine.max_concurrent_runs,
                "Starting gateway"
            );
            let server = weft_gateway::GatewayServer::new(
                config.gateway.clone(),
                engine.supervisor.clone(),
                engine.tools.clone(),
            );
            let cancel = CancellationToken::new();
            let cancel_clone = cancel.clone();

            // Graceful shutdown on Ctrl-C
            tokio::spawn(async move {
                tokio::signal::ctrl_c().await.ok();
                info!("Shutting down gateway...");
                cancel_clone.cancel();
            });

            server.run(cancel).await?;
        }
    }

    Ok(())
}

/// Load `path`, falling back to built-in defaults only when the default
/// config file is absent.
fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    if path.exists() {
        return Ok(AppConfig::load(path)?);
    }
    if path == Path::new(DEFAULT_CONFIG) {
        return Ok(AppConfig::default());
    }
    anyhow::bail!("config file not found: {}", path.display())
}

async fn run_graph(engine: &Engine, path: &Path) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(path)?;
    let graph: GraphSpec = serde_json::from_str(&content)?;

    // Subscribe before submitting so no event is missed.
    let mut rx = engine.events.subscribe();
    let run_id = engine.supervisor.submit(graph).await?;
    info!(run_id = %run_id, "Run started");

    let supervisor = engine.supervisor.clone();
    let interrupt_id = run_id.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!(run_id = %interrupt_id, "Interrupted, cancelling run");
            supervisor.cancel(&interrupt_id);
        }
    });

    loop {
        match rx.recv().await {
            Ok(event) if event.run_id() == run_id => match event {
                EngineEvent::StepRetrying {
                    step_id,
                    attempt,
                    error,
                    ..
                } => {
                    eprintln!("[{}] attempt {} failed: {}", step_id, attempt, error);
                }
                EngineEvent::StepFinished { result, .. } => {
                    if result.success {
                        eprintln!("[{}: ok] after {} attempt(s)", result.step_id, result.attempts);
                    } else {
                        eprintln!(
                            "[{}: ERROR] {}",
                            result.step_id,
                            result.error.as_deref().unwrap_or("")
                        );
                    }
                }
                EngineEvent::RunFinished { .. } => break,
                _ => {}
            },
            Ok(_) => {}
            Err(RecvError::Lagged(n)) => warn!(skipped = n, "Event stream lagged"),
            Err(RecvError::Closed) => break,
        }
    }
    interrupt.abort();

    let Some(snapshot) = engine.supervisor.status(&run_id) else {
        anyhow::bail!("run {} disappeared from the store", run_id);
    };
    println!("{}", serde_json::to_string_pretty(&snapshot)?);

    if snapshot.status != RunStatus::Completed {
        error!(run_id = %run_id, status = %snapshot.status, "Run did not complete");
        anyhow::bail!("run {} finished with status {}", run_id, snapshot.status);
    }
    Ok(())
}
