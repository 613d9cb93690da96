use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use gitfix::pipeline::{PipelineOptions, TaskPipeline};
use gitfix::{
    init_telemetry, AgentAdapter, ConfigLoader, EnvConfig, GitHubClient, ShutdownCoordinator,
    TaskQueue, TaskStateStore, WorkerPool, WorkspaceManager,
};

/// Worker pool: dequeues discovered work and runs the per-issue pipeline.
#[derive(Parser)]
#[command(name = "gitfix-worker", version)]
struct Args {
    /// Clear all queue keys before starting.
    #[arg(long)]
    reset: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    if let Err(e) = init_telemetry() {
        eprintln!("Warning: failed to initialize telemetry: {e}");
    }

    let env = EnvConfig::from_env();
    let config = Arc::new(ConfigLoader::from_env().context("loading configuration")?);
    let github = Arc::new(GitHubClient::new().context("building GitHub client")?);
    let queue = Arc::new(
        TaskQueue::connect(&env.redis_url, "gitfix-tasks")
            .await
            .context("connecting to the task queue")?,
    );
    let store = Arc::new(
        TaskStateStore::connect(&env.redis_url)
            .await
            .context("connecting to the state store")?,
    );

    if args.reset {
        queue.obliterate().await.context("clearing queue keys")?;
        tracing::info!("queue keys cleared");
    }

    let shutdown = ShutdownCoordinator::new();
    shutdown.install_signal_handlers();
    config.spawn_refresh(shutdown.signal());

    let workspace = Arc::new(WorkspaceManager::new(env.clone(), Arc::clone(&github)));
    let agent = Arc::new(AgentAdapter::new(&env));
    let pipeline = Arc::new(TaskPipeline::new(
        github,
        Arc::clone(&workspace) as Arc<dyn gitfix::pipeline::WorkspacePort>,
        store,
        agent,
        Arc::clone(&queue) as Arc<dyn gitfix::pipeline::ProgressPort>,
        Arc::clone(&config) as Arc<dyn gitfix::pipeline::SettingsSource>,
        PipelineOptions::from_env(&env),
    ));

    // Hourly sweep for retained worktrees whose schedule elapsed.
    {
        let workspace = Arc::clone(&workspace);
        let mut sweep_shutdown = shutdown.signal();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(3600));
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = workspace.cleanup_expired().await {
                            tracing::warn!(error = %e, "worktree sweep failed");
                        }
                    }
                    _ = sweep_shutdown.cancelled() => break,
                }
            }
        });
    }

    let concurrency = config.load_all().settings.worker_concurrency;
    let pool = WorkerPool::new(queue, concurrency);
    pool.run(pipeline, shutdown.signal()).await?;
    Ok(())
}
