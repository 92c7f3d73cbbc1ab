use thiserror::Error;
use timeline_common::StorageError;

/// Failures that keep the service from starting. Anything that goes wrong once the
/// pipeline is running is handled by the pipeline itself.
#[derive(Error, Debug)]
pub enum ConsumerError {
    #[error("invalid configuration: {0}")]
    Config(#[from] envconfig::Error),
    #[error("timeline storage unavailable: {0}")]
    Storage(#[from] StorageError),
    #[error("failed to apply migrations: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("failed to install metrics recorder: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),
    #[error("probe server failed: {0}")]
    Serve(#[from] std::io::Error),
}
