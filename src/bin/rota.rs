//! rota CLI: run a worker in the rotation, or inspect the shared state.

use anyhow::Context;
use clap::{Parser, Subcommand};
use rota::clock::SystemClock;
use rota::config::Config;
use rota::config::secrets::ExposeSecret;
use rota::coordinator::{TurnCoordinator, TurnPolicy};
use rota::db::{Db, PgDocumentStore, PgSeenStore};
use rota::dedup::DedupCache;
use rota::executor::WorkExecutor;
use rota::job::CommandJob;
use rota::model::ServerId;
use rota::model::item::ItemId;
use rota::poller::Poller;
use rota::registry::ServerRegistry;
use rota::store::DocumentStore;
use rota::telemetry::{TelemetryConfig, init_telemetry};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "rota", about = "Take turns running a shared periodic job")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Register this server and poll for turns until interrupted
    Serve {
        /// Executable to run on each turn (overrides JOB_COMMAND)
        #[arg(long)]
        job_command: Option<PathBuf>,
        /// Arguments passed to the job command
        #[arg(last = true)]
        job_args: Vec<String>,
    },
    /// Register this server in the rotation and exit
    Register,
    /// Print the scheduler document
    Status,
    /// Force the lock free (running = false)
    Release,
    /// Seen-set operations
    Seen {
        #[command(subcommand)]
        action: SeenAction,
    },
}

#[derive(Subcommand)]
enum SeenAction {
    /// Print the item id derived from a title and source name
    Id { title: String, source: String },
    /// Report whether each id has been seen
    Check {
        #[arg(required = true)]
        ids: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rota::config::load_env_file();
    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            job_command,
            job_args,
        } => cmd_serve(job_command, job_args).await,
        Command::Seen {
            action: SeenAction::Id { title, source },
        } => {
            match ItemId::derive(&title, &source) {
                Some(id) => println!("{id}"),
                None => anyhow::bail!("title and source must both contain letters or digits"),
            }
            Ok(())
        }
        Command::Seen {
            action: SeenAction::Check { ids },
        } => {
            let (_, db) = open_db().await?;
            let cache = DedupCache::new(Arc::new(PgSeenStore::new(db)));
            for id in ids {
                let seen = cache.has_seen(&ItemId(id.clone())).await?;
                println!("{id}  {}", if seen { "seen" } else { "unseen" });
            }
            Ok(())
        }
        Command::Register => {
            let (config, db) = open_db().await?;
            let store = PgDocumentStore::new(db, &config.state_document);
            let registry = ServerRegistry::new(Arc::new(store));
            if registry.register(&ServerId::new(&config.server_id)).await? {
                println!("Registered {}", config.server_id);
            } else {
                println!("{} was already registered", config.server_id);
            }
            Ok(())
        }
        Command::Status => {
            let (config, db) = open_db().await?;
            cmd_status(&PgDocumentStore::new(db, &config.state_document)).await
        }
        Command::Release => {
            let (config, db) = open_db().await?;
            PgDocumentStore::new(db, &config.state_document)
                .set_running(false)
                .await?;
            println!("Lock released");
            Ok(())
        }
    }
}

async fn open_db() -> anyhow::Result<(Config, Arc<Db>)> {
    let config = Config::from_env()?;
    let db = Db::connect(config.database_url.expose_secret()).await?;
    db.migrate().await?;
    Ok((config, Arc::new(db)))
}

async fn cmd_serve(job_command: Option<PathBuf>, job_args: Vec<String>) -> anyhow::Result<()> {
    let config = Config::from_env()?;

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "rota".to_string(),
        instance_id: Some(config.server_id.clone()),
        default_level: config.log_level.clone(),
    })?;

    let command = job_command
        .or_else(|| config.job_command.clone())
        .context("no job command configured, pass --job-command or set JOB_COMMAND")?;

    let db = Arc::new(Db::connect(config.database_url.expose_secret()).await?);
    db.migrate().await?;
    let store: Arc<dyn DocumentStore> =
        Arc::new(PgDocumentStore::new(db, &config.state_document));

    let server_id = ServerId::new(&config.server_id);
    // Running unregistered would never be granted a turn.
    ServerRegistry::new(Arc::clone(&store))
        .register(&server_id)
        .await
        .with_context(|| format!("could not register server {server_id}"))?;

    let coordinator = TurnCoordinator::new(
        store,
        server_id,
        Arc::new(SystemClock),
        TurnPolicy {
            timeout: config.job_timeout,
            recovery: config.recovery_mode,
        },
    );
    let job = CommandJob::new(command).args(job_args);
    let executor = WorkExecutor::new(coordinator.clone(), Arc::new(job));
    let poller = Poller::new(coordinator, executor, config.poll_interval);

    info!(
        server_id = %config.server_id,
        recovery_mode = %config.recovery_mode,
        timeout_secs = config.job_timeout.as_secs(),
        "worker started"
    );

    let stopper = poller.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutdown signal received, finishing the current cycle");
        stopper.shutdown();
    });

    poller.run().await;
    Ok(())
}

async fn cmd_status(store: &PgDocumentStore) -> anyhow::Result<()> {
    let Some(state) = store.load().await? else {
        println!("No scheduler state at {}", store.path());
        return Ok(());
    };

    println!("Running:     {}", state.running);
    println!("Started:     {}", state.run_started_at);
    println!(
        "Next:        {} (index {})",
        state
            .next_server()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string()),
        state.pointer_index
    );
    println!("Servers:");
    for (i, server) in state.servers.iter().enumerate() {
        let marker = if i == state.pointer_index { ">" } else { " " };
        println!("  {marker} {i:<3} {server}");
    }
    Ok(())
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(_) => {
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
    }
}
