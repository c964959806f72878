use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use mad_dungeon::api::server::{self, AppState};
use mad_dungeon::commands::CommandDispatcher;
use mad_dungeon::engine::{
    recover_interrupted, run_periodic, shutdown_channel, AgentLoop, CommandWorker, LlmOrchestrator,
    RecoverySummary, Tick,
};
use mad_dungeon::providers::ConfiguredProviderFactory;
use mad_dungeon::storage::{InMemoryStore, PostgresStorage, Storage};
use mad_dungeon::{ApiCredential, Config, DungeonService, WorldModel};

#[derive(Parser)]
#[command(name = "mad-dungeon")]
#[command(about = "Multi-agent text dungeon driven by LLM agents", long_about = None)]
#[command(version)]
struct Cli {
    /// TOML configuration file; environment variables override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the command worker, the agent loop and the HTTP API
    Run {
        #[arg(long, help = "Override the API port")]
        port: Option<u16>,
    },
    /// Load a world file and report what it contains
    ValidateWorld {
        #[arg(help = "World file (JSON or YAML); defaults to the configured one")]
        path: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run { port } => run(config, port).await?,
        Commands::ValidateWorld { path } => {
            validate_world(path.as_deref().unwrap_or(&config.world_path))?
        }
    }

    Ok(())
}

async fn open_storage(config: &Config) -> Result<Arc<dyn Storage>> {
    match &config.database_url {
        Some(url) => {
            let storage = PostgresStorage::new(url).await?;
            storage.run_migrations().await?;
            log::info!("Using PostgreSQL storage");
            Ok(Arc::new(storage))
        }
        None => {
            log::warn!("DATABASE_URL not set; state is kept in memory only");
            Ok(Arc::new(InMemoryStore::new()))
        }
    }
}

async fn run(config: Config, port: Option<u16>) -> Result<()> {
    let world = Arc::new(WorldModel::load(&config.world_path)?);
    let storage = open_storage(&config).await?;

    match config.provider_api_key() {
        Some(key) => {
            let description = format!("{} (from config)", config.llm_provider);
            storage
                .add_credential(&ApiCredential::new(key).with_description(description))
                .await?
        }
        None => log::warn!(
            "No API key configured for {}; LLM requests will fail until one is added",
            config.llm_provider
        ),
    }

    let recovered = recover_interrupted(storage.as_ref()).await?;
    if recovered != RecoverySummary::default() {
        log::warn!(
            "Recovered {} interrupted commands and {} interrupted LLM requests",
            recovered.requeued_commands,
            recovered.failed_requests
        );
    }

    let settings = config.engine_settings();
    let dispatcher = Arc::new(CommandDispatcher::new(
        storage.clone(),
        world.clone(),
        settings.clone(),
    ));
    let worker: Arc<dyn Tick> = Arc::new(CommandWorker::new(
        storage.clone(),
        dispatcher,
        settings.clone(),
    ));
    let factory = Arc::new(ConfiguredProviderFactory::new(
        config.llm_provider,
        config.llm_model.clone(),
        config.ollama_url.clone(),
    ));
    let orchestrator = Arc::new(LlmOrchestrator::new(
        storage.clone(),
        factory,
        settings.llm_timeout,
    ));
    let agent_loop: Arc<dyn Tick> = Arc::new(AgentLoop::new(
        storage.clone(),
        orchestrator.clone(),
        settings,
    ));

    let service = Arc::new(
        DungeonService::new(storage.clone(), world.clone())
            .with_prompts_dir(config.prompts_dir.clone()),
    );
    let loaded = service.load_prompts().await?;
    log::info!("Loaded prompts for {} agents", loaded);

    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    let worker_task = tokio::spawn(run_periodic(
        worker,
        Duration::from_millis(config.command_poll_millis),
        shutdown_rx.clone(),
    ));
    let loop_task = tokio::spawn(run_periodic(
        agent_loop,
        Duration::from_secs(config.agent_tick_secs),
        shutdown_rx,
    ));

    let state = AppState { service };
    tokio::select! {
        result = server::serve(state, port.unwrap_or(config.api_port)) => {
            if let Err(e) = result {
                log::error!("API server stopped: {:#}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            log::info!("Shutdown signal received");
        }
    }

    let _ = shutdown_tx.send(true);
    let _ = tokio::join!(worker_task, loop_task);
    match orchestrator.shutdown().await {
        Ok(0) => {}
        Ok(n) => log::warn!("{} LLM calls were still running at shutdown", n),
        Err(e) => log::error!("Could not record interrupted LLM calls: {:#}", e),
    }
    log::info!("Dungeon stopped");
    Ok(())
}

fn validate_world(path: &Path) -> Result<()> {
    let world = WorldModel::load(path)?;
    println!("World {} is valid", path.display());
    println!("Rooms: {}", world.rooms.len());
    println!("Objects: {}", world.objects.len());
    let placed: usize = world.placements.values().map(Vec::len).sum();
    println!("Placed objects: {}", placed);
    Ok(())
}
