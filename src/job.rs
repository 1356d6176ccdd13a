//! The periodic job a worker runs when it holds the turn.
//!
//! Its result and failures are opaque to the coordinator. The scraping and
//! notification pipeline lives behind this trait; the binary plugs in a
//! [`CommandJob`] that runs it as an external executable.

use async_trait::async_trait;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::debug;
use uuid::Uuid;

/// Context handed to each run.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub server_id: String,
    pub run_id: Uuid,
}

#[async_trait]
pub trait Job: Send + Sync {
    async fn run(&self, ctx: &RunContext) -> anyhow::Result<()>;
}

/// Runs an executable per turn; a non-zero exit is a failure.
#[derive(Debug, Clone)]
pub struct CommandJob {
    command: PathBuf,
    args: Vec<String>,
}

impl CommandJob {
    pub fn new(command: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

#[async_trait]
impl Job for CommandJob {
    async fn run(&self, ctx: &RunContext) -> anyhow::Result<()> {
        debug!(
            command = %self.command.display(),
            run_id = %ctx.run_id,
            "running job command"
        );

        let status = Command::new(&self.command)
            .args(&self.args)
            .env("ROTA_SERVER_ID", &ctx.server_id)
            .env("ROTA_RUN_ID", ctx.run_id.to_string())
            .kill_on_drop(true)
            .status()
            .await?;

        if status.success() {
            Ok(())
        } else {
            anyhow::bail!(
                "job command {} exited with status {}",
                self.command.display(),
                status.code().unwrap_or(-1)
            )
        }
    }
}

/// A job built from an async closure.
pub struct FnJob<F>(pub F);

#[async_trait]
impl<F, Fut> Job for FnJob<F>
where
    F: Fn(RunContext) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn run(&self, ctx: &RunContext) -> anyhow::Result<()> {
        (self.0)(ctx.clone()).await
    }
}
