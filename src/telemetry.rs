use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

/// Initialize structured logging for a gitfix process.
///
/// JSON output with span context so correlation ids survive into whatever
/// transport ships the logs; `RUST_LOG` controls the filter.
pub fn init_telemetry() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(true),
        )
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("gitfix telemetry initialized with structured logging");
    Ok(())
}

/// Generate a correlation id for one task lifecycle.
pub fn generate_correlation_id() -> Uuid {
    Uuid::new_v4()
}

/// Span covering one task's trip through the pipeline. Every log record inside
/// carries the correlation id assigned at enqueue.
pub fn task_span(task_id: &str, repository: &str, correlation_id: &Uuid) -> tracing::Span {
    tracing::info_span!(
        "task_pipeline",
        task.id = task_id,
        repository = repository,
        correlation.id = %correlation_id,
    )
}
