use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Semaphore;
use tracing::{error, info};

use codeshot::core::{LanguageTable, PipelineConfig};
use codeshot::engine::capture::ChromiumLauncher;
use codeshot::engine::container::DockerRuntime;
use codeshot::engine::Coordinator;
use codeshot::jobs::{process_job, JobDefaults};
use codeshot::redis_manager::RedisManager;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("codeshot=info".parse()?),
        )
        .init();

    let config = PipelineConfig::from_env()?;
    let languages = Arc::new(LanguageTable::embedded()?);
    info!(
        "Loaded {} runnable languages",
        languages.supported_languages().len()
    );

    let runtime = Arc::new(DockerRuntime::connect()?);
    info!(
        "Connected to docker (image={}, network={})",
        config.container.image, config.container.network
    );

    let launcher = Arc::new(ChromiumLauncher::new(
        config.capture.chromium_path.clone(),
        config.capture.command_timeout,
    ));

    let defaults = JobDefaults::from(&config);
    let max_jobs = config.max_concurrent_jobs;
    let coordinator = Arc::new(Coordinator::new(config, languages, runtime, launcher)?);

    let mut redis = RedisManager::from_env().await?;
    let permits = Arc::new(Semaphore::new(max_jobs));

    info!("Waiting for jobs (max {} concurrent)...", max_jobs);

    loop {
        // Wait for capacity before taking a job off the queue
        let permit = permits
            .clone()
            .acquire_owned()
            .await
            .context("Job semaphore closed")?;
        let job = redis.pop_job().await?;

        let coordinator = Arc::clone(&coordinator);
        let mut publisher = redis.publisher();
        tokio::spawn(async move {
            let _permit = permit;
            let result = process_job(&coordinator, job, defaults).await;
            match publisher.store(&result).await {
                Ok(()) => info!(job_id = %result.job_id, "Job completed"),
                Err(e) => error!(job_id = %result.job_id, "Failed to store result: {:#}", e),
            }
        });
    }
}
