use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use gitfix::{
    init_telemetry, ConfigLoader, DiscoveryDaemon, EnvConfig, GitHubClient, ShutdownCoordinator,
    TaskQueue, TaskStateStore,
};

/// GitHub issue discovery daemon: polls monitored repositories and enqueues
/// eligible work for the worker pool.
#[derive(Parser)]
#[command(name = "gitfix-daemon", version)]
struct Args {
    /// Drain and obliterate the task queue before starting.
    #[arg(long)]
    reset: bool,

    /// Remove every `<label>-processing` marker from monitored repositories
    /// before starting.
    #[arg(long = "reset-labels")]
    reset_labels: bool,
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

    let shutdown = ShutdownCoordinator::new();
    shutdown.install_signal_handlers();
    config.spawn_refresh(shutdown.signal());

    let daemon = DiscoveryDaemon::new(config, env, github, queue.clone(), store);

    if args.reset {
        queue.drain().await.context("draining queue")?;
        queue.obliterate().await.context("obliterating queue")?;
        tracing::info!("queue reset complete");
    }
    if args.reset_labels {
        daemon
            .reset_processing_labels()
            .await
            .context("resetting processing labels")?;
    }

    daemon.run(shutdown.signal()).await
}
