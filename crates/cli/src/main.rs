mod config;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use db::{TaskInfoRepository, UniverseRepository, UniverseStore};
use events::{Event, EventBus};
use orchestrator::{
    CommandNodeOperations, Commissioner, ExclusiveLock, ExpectedVersion, ResumeUniverse,
    TaskRunner,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use universe_core::{RegisterUniverseRequest, TaskState, Universe};
use uuid::Uuid;

use crate::config::{CtlConfig, CONFIG_FILE, CTL_DIR};

#[derive(Parser)]
#[command(name = "universe-ctl")]
#[command(about = "Run lifecycle tasks against database universes", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the state directory, config and database
    Init,
    /// Register a universe from a JSON description
    Register { file: PathBuf },
    Show { universe: Uuid },
    List,
    /// Resume a paused universe
    Resume {
        universe: Uuid,
        /// Fail unless the universe is at this version (negative = any)
        #[arg(long, allow_hyphen_values = true)]
        expected_version: Option<i64>,
    },
    /// Task history of a universe
    Tasks { universe: Uuid },
    /// Clear a leaked update lock
    Unlock { universe: Uuid },
}

struct Workspace {
    config: CtlConfig,
    universes: Arc<UniverseRepository>,
    tasks: Arc<TaskInfoRepository>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    match cli.command {
        Commands::Init => init_project().await,
        Commands::Register { file } => register(&file).await,
        Commands::Show { universe } => show(universe).await,
        Commands::List => list().await,
        Commands::Resume {
            universe,
            expected_version,
        } => resume(universe, ExpectedVersion::from_option(expected_version)).await,
        Commands::Tasks { universe } => tasks(universe).await,
        Commands::Unlock { universe } => unlock(universe).await,
    }
}

async fn init_project() -> Result<()> {
    let ctl_dir = std::env::current_dir()?.join(CTL_DIR);

    if ctl_dir.exists() {
        println!("Already initialized at {}", ctl_dir.display());
        return Ok(());
    }

    tokio::fs::create_dir_all(&ctl_dir).await?;

    let config = CtlConfig::default();
    tokio::fs::write(ctl_dir.join(CONFIG_FILE), config.to_toml()?).await?;

    let db_path = config.database_path(&ctl_dir);
    let pool = db::create_pool(&db::database_url(&db_path)).await?;
    db::run_migrations(&pool).await?;

    println!("Initialized {}", ctl_dir.display());
    println!("  {} ", CONFIG_FILE);
    println!("  {} ", db_path.display());
    println!();
    println!("Edit [node_commands] in {} before running tasks.", CONFIG_FILE);
    Ok(())
}

async fn open_workspace() -> Result<Workspace> {
    let ctl_dir = std::env::current_dir()?.join(CTL_DIR);
    if !ctl_dir.exists() {
        bail!("No {} directory found. Run 'universe-ctl init' first.", CTL_DIR);
    }

    let config = CtlConfig::load(&ctl_dir).await?;
    let db_path = config.database_path(&ctl_dir);
    tracing::debug!("Database: {}", db_path.display());

    let pool = db::create_pool(&db::database_url(&db_path))
        .await
        .context("Failed to create database pool")?;
    db::run_migrations(&pool).await?;

    Ok(Workspace {
        config,
        universes: Arc::new(UniverseRepository::new(pool.clone())),
        tasks: Arc::new(TaskInfoRepository::new(pool)),
    })
}

async fn register(file: &Path) -> Result<()> {
    let ws = open_workspace().await?;
    let content = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Cannot read {}", file.display()))?;
    let request: RegisterUniverseRequest =
        serde_json::from_str(&content).context("Invalid universe description")?;

    let universe = request.into_universe();
    ws.universes.insert(&universe).await?;

    println!("Registered '{}' as {}", universe.name, universe.universe_uuid);
    Ok(())
}

async fn show(universe_uuid: Uuid) -> Result<()> {
    let ws = open_workspace().await?;
    let universe = ws.universes.read(universe_uuid).await?;
    println!("{}", serde_json::to_string_pretty(&universe)?);
    Ok(())
}

async fn list() -> Result<()> {
    let ws = open_workspace().await?;
    let universes = ws.universes.list().await?;

    if universes.is_empty() {
        println!("No universes registered.");
        return Ok(());
    }
    for universe in &universes {
        println!("  {} {}", status_icon(universe), summary(universe));
    }
    Ok(())
}

fn status_icon(universe: &Universe) -> &'static str {
    if universe.details.is_locked() {
        "◐"
    } else if universe.details.universe_paused {
        "○"
    } else {
        "●"
    }
}

fn summary(universe: &Universe) -> String {
    format!(
        "{} {} v{} ({} masters, {} tservers){}",
        universe.universe_uuid,
        universe.name,
        universe.version,
        universe.masters().len(),
        universe.tservers().len(),
        if universe.details.universe_paused {
            " paused"
        } else {
            ""
        }
    )
}

async fn resume(universe_uuid: Uuid, expected: ExpectedVersion) -> Result<()> {
    let ws = open_workspace().await?;
    let bus = EventBus::new();
    let mut rx = bus.subscribe();

    let node_ops = Arc::new(CommandNodeOperations::new(ws.config.node_commands.clone()));
    let runner = TaskRunner::new(ws.universes.clone(), node_ops)
        .with_config(ws.config.orchestrator.clone())
        .with_event_bus(bus);
    let commissioner = Commissioner::new(runner).with_task_repo(ws.tasks.clone());

    let task_uuid = commissioner
        .submit(Arc::new(ResumeUniverse), universe_uuid, expected)
        .await?;
    println!("Task {} submitted", task_uuid);

    let wait = commissioner.wait(task_uuid);
    tokio::pin!(wait);
    let (state, failure) = loop {
        tokio::select! {
            result = &mut wait => break result?,
            Ok(envelope) = rx.recv() => print_event(&envelope.event),
        }
    };
    for envelope in events::drain_task_events(&mut rx, task_uuid) {
        print_event(&envelope.event);
    }

    match (state, failure) {
        (TaskState::Succeeded, _) => {
            println!("Universe {} resumed", universe_uuid);
            Ok(())
        }
        (state, failure) => bail!(
            "Task {} ended {}: {}",
            task_uuid,
            state,
            failure.unwrap_or_else(|| "no failure message".to_string())
        ),
    }
}

fn print_event(event: &Event) {
    match event {
        Event::SubTaskGroupStarted {
            group_index,
            group_name,
            subtask_count,
            ..
        } => println!("  [{}] {} ({} subtasks)", group_index, group_name, subtask_count),
        Event::SubTaskGroupCompleted {
            group_index,
            group_name,
            success,
            ..
        } => println!(
            "  [{}] {} {}",
            group_index,
            group_name,
            if *success { "done" } else { "FAILED" }
        ),
        Event::SubTaskCompleted {
            subtask,
            success: false,
            attempts,
            error,
            ..
        } => println!(
            "      {} failed after {} attempt(s): {}",
            subtask,
            attempts,
            error.as_deref().unwrap_or("unknown error")
        ),
        _ => {}
    }
}

async fn tasks(universe_uuid: Uuid) -> Result<()> {
    let ws = open_workspace().await?;
    let history = ws.tasks.find_by_universe(universe_uuid).await?;

    if history.is_empty() {
        println!("No tasks yet.");
        return Ok(());
    }
    println!("Tasks ({}):", history.len());
    for info in &history {
        println!(
            "  {} {} [{}] {}{}",
            info.created_at.format("%Y-%m-%d %H:%M:%S"),
            info.task_uuid,
            info.state,
            info.task_type,
            info.failure_message
                .as_deref()
                .map(|m| format!(" - {}", m))
                .unwrap_or_default()
        );
    }
    Ok(())
}

async fn unlock(universe_uuid: Uuid) -> Result<()> {
    let ws = open_workspace().await?;
    let lock = ExclusiveLock::new(ws.universes.clone());

    match lock.force_release(universe_uuid).await? {
        Some(version) => println!("Lock cleared, universe now at v{}", version),
        None => println!("Universe {} was not locked", universe_uuid),
    }
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "universe_ctl=info,orchestrator=info,db=info".into()),
        )
        .init();
}
