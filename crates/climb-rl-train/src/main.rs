// Climbing course trainer CLI
// Trains or evaluates an agent on the default course, headless

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use climb_rl_core::AgentKind;
use climb_rl_env::{ClimbingEnvironment, KinematicWorld};
use climb_rl_train::{FileCheckpointStore, TrainingConfig, TrainingOrchestrator};

#[derive(Parser)]
#[command(name = "climb-train")]
#[command(about = "Train agents on a staged climbing course", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train an agent
    Train {
        /// Learning algorithm (dqn or ppo), overrides the config file
        #[arg(short, long)]
        agent: Option<AgentKind>,

        /// Episodes to play
        #[arg(short, long, default_value = "500")]
        episodes: usize,

        /// JSON training configuration
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Directory for checkpoints
        #[arg(long)]
        checkpoint_dir: Option<PathBuf>,

        /// Continue from the stored checkpoint
        #[arg(long)]
        resume: bool,

        /// Seed the agent's random number generator
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Evaluate a checkpointed agent greedily
    Evaluate {
        /// Learning algorithm the checkpoint was trained with
        #[arg(short, long)]
        agent: Option<AgentKind>,

        /// Directory holding the checkpoint
        #[arg(long)]
        checkpoint_dir: PathBuf,

        /// Episodes to play
        #[arg(short, long, default_value = "20")]
        episodes: usize,

        /// JSON training configuration
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn load_config(path: Option<&PathBuf>, agent: Option<AgentKind>) -> Result<TrainingConfig> {
    let mut config = match path {
        Some(path) => TrainingConfig::from_json_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => TrainingConfig::default(),
    };
    if let Some(agent) = agent {
        config.agent = agent;
    }
    config.validate()?;
    Ok(config)
}

fn build_orchestrator(config: TrainingConfig, checkpoint_dir: Option<PathBuf>) -> Result<TrainingOrchestrator> {
    let env = ClimbingEnvironment::new(config.course.clone(), KinematicWorld::new())?;
    let mut orchestrator = TrainingOrchestrator::new(config, Box::new(env))?;
    if let Some(dir) = checkpoint_dir {
        orchestrator = orchestrator.with_checkpoint_store(Arc::new(FileCheckpointStore::new(dir)));
    }
    Ok(orchestrator)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Train {
            agent,
            episodes,
            config,
            checkpoint_dir,
            resume,
            seed,
        } => {
            let mut config = load_config(config.as_ref(), agent)?;
            if let Some(seed) = seed {
                config = config.with_seed(seed);
            }
            let save_at_end = checkpoint_dir.is_some();
            let mut orchestrator = build_orchestrator(config, checkpoint_dir)?;
            if resume && !orchestrator.restore_checkpoint().await {
                warn!("no checkpoint restored, training from scratch");
            }

            let control = orchestrator.control();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("interrupt received, stopping after the current episode");
                    control.stop();
                }
            });

            let stats = orchestrator.start_training(episodes).await?;
            if save_at_end {
                let record = orchestrator.save_checkpoint().await?;
                info!(id = %record.id, episode = record.episode, "final checkpoint saved");
            }
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::Evaluate {
            agent,
            checkpoint_dir,
            episodes,
            config,
        } => {
            let config = load_config(config.as_ref(), agent)?;
            let mut orchestrator = build_orchestrator(config, Some(checkpoint_dir))?;
            if !orchestrator.restore_checkpoint().await {
                anyhow::bail!("no usable checkpoint to evaluate");
            }
            let report = orchestrator.evaluate(episodes).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}
