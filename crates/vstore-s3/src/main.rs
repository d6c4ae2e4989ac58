use std::sync::Arc;

use aws_config::Region;
use aws_sdk_s3::config::{BehaviorVersion, Credentials};
use clap::Parser;
use tokio::signal;
use tokio::sync::watch as tokio_watch;
use tracing::info;
use tracing_subscriber::EnvFilter;
use vstore_consistency::{JobRegistry, JobRunner, LockCleanupJob, LockSessionManager};
use vstore_s3::{Config, S3ObjectStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();

    info!("Starting vstore-jobs");
    info!("  Job: {}", config.job);
    info!("  Locks bucket: {}", config.locks_bucket);

    let s3_client = build_s3_client(&config).await;
    let locks = Arc::new(S3ObjectStore::new(s3_client, config.locks_bucket.clone()));

    // Event-driven jobs need an event log client, which the embedding service provides.
    let registry = JobRegistry::new().with_job(
        "lock-cleanup",
        Arc::new(LockCleanupJob::new(LockSessionManager::new(locks))),
    );
    info!("  Available jobs: {:?}", registry.job_ids());

    let runner = JobRunner::new(registry);
    runner.run(&config.job, create_shutdown_signal()).await?;

    info!("Job complete");
    Ok(())
}

async fn build_s3_client(config: &Config) -> aws_sdk_s3::Client {
    let region = Region::new(config.s3_region.clone());

    let mut builder = match config.static_credentials() {
        Some((access_key_id, secret_access_key)) => aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .credentials_provider(Credentials::new(
                access_key_id,
                secret_access_key,
                None,
                None,
                "vstore-jobs",
            ))
            .region(region),
        None => {
            let shared = aws_config::defaults(BehaviorVersion::latest())
                .region(region)
                .load()
                .await;
            aws_sdk_s3::config::Builder::from(&shared)
        }
    };

    if let Some(endpoint) = &config.s3_endpoint {
        builder = builder.endpoint_url(endpoint);
    }

    aws_sdk_s3::Client::from_conf(builder.force_path_style(config.force_path_style).build())
}

/// Create a shutdown signal that triggers on Ctrl+C or SIGTERM.
fn create_shutdown_signal() -> tokio_watch::Receiver<bool> {
    let (tx, rx) = tokio_watch::channel(false);

    tokio::spawn(async move {
        let ctrl_c = async {
            signal::ctrl_c()
                .await
                .expect("Failed to install Ctrl+C handler");
            info!("Received Ctrl+C, initiating shutdown");
        };

        #[cfg(unix)]
        let terminate = async {
            signal::unix::signal(signal::unix::SignalKind::terminate())
                .expect("Failed to install SIGTERM handler")
                .recv()
                .await;
            info!("Received SIGTERM, initiating shutdown");
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }

        let _ = tx.send(true);
    });

    rx
}
