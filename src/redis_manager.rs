//! Redis Manager - queue consumption and result publication
//!
//! Jobs are popped with BLPOP; each result is stored under its own key with a
//! one hour expiry and published for real-time subscribers.

use std::time::Duration;

use anyhow::{Context, Result};
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tracing::{info, warn};

use crate::jobs::{JobResult, WorkerJob};

/// Redis key constants
pub mod keys {
    /// Job queue key
    pub const JOB_QUEUE: &str = "codeshot:queue";

    /// Result key prefix (for polling)
    pub const RESULT_PREFIX: &str = "codeshot:result:";

    /// Result channel (for pub/sub)
    pub const RESULT_CHANNEL: &str = "codeshot:results";
}

const RESULT_EXPIRY_SECS: u64 = 3600; // 1 hour
const RECONNECT_DELAY: Duration = Duration::from_secs(3);

pub struct RedisManager {
    client: redis::Client,
    conn: MultiplexedConnection,
}

impl RedisManager {
    pub async fn with_url(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url).context("Failed to create Redis client")?;
        let conn = get_connection_with_retry(&client).await?;
        info!("Connected to Redis at {}", redis_url);
        Ok(Self { client, conn })
    }

    /// Connect using REDIS_URL, defaulting to "redis://localhost:6379"
    pub async fn from_env() -> Result<Self> {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".into());
        Self::with_url(&url).await
    }

    /// Block until the next well-formed job arrives.
    ///
    /// Malformed payloads are logged and skipped; connection failures trigger a reconnect.
    pub async fn pop_job(&mut self) -> Result<WorkerJob> {
        loop {
            let result: Option<(String, String)> =
                match self.conn.blpop(keys::JOB_QUEUE, 0.0).await {
                    Ok(res) => res,
                    Err(e) => {
                        warn!("Redis BLPOP failed: {}. Reconnecting...", e);
                        self.conn = get_connection_with_retry(&self.client).await?;
                        continue;
                    }
                };

            if let Some((_, job_data)) = result {
                match parse_job(&job_data) {
                    Ok(job) => return Ok(job),
                    Err(e) => {
                        warn!("Failed to parse job data: {}. Data: {}", e, job_data);
                        continue;
                    }
                }
            }
        }
    }

    /// A handle for storing results from concurrently running jobs
    pub fn publisher(&self) -> ResultPublisher {
        ResultPublisher {
            client: self.client.clone(),
            conn: self.conn.clone(),
        }
    }
}

#[derive(Clone)]
pub struct ResultPublisher {
    client: redis::Client,
    conn: MultiplexedConnection,
}

impl ResultPublisher {
    /// Store a result with a 1-hour expiration and publish it
    pub async fn store(&mut self, result: &JobResult) -> Result<()> {
        let key = result_key(&result.job_id);
        let json = serde_json::to_string(result)?;

        if let Err(e) = self
            .conn
            .set_ex::<_, _, ()>(&key, &json, RESULT_EXPIRY_SECS)
            .await
        {
            warn!("Failed to store result: {}. Reconnecting...", e);
            self.conn = get_connection_with_retry(&self.client).await?;
            self.conn
                .set_ex::<_, _, ()>(&key, &json, RESULT_EXPIRY_SECS)
                .await?;
        }

        // Publish to channel (ignore errors as there may be no subscribers)
        let _ = self
            .conn
            .publish::<_, _, ()>(keys::RESULT_CHANNEL, &json)
            .await;

        Ok(())
    }
}

fn parse_job(data: &str) -> serde_json::Result<WorkerJob> {
    serde_json::from_str(data)
}

fn result_key(job_id: &str) -> String {
    format!("{}{}", keys::RESULT_PREFIX, job_id)
}

/// Get a Redis connection with retry logic
async fn get_connection_with_retry(client: &redis::Client) -> Result<MultiplexedConnection> {
    loop {
        match client.get_multiplexed_async_connection().await {
            Ok(conn) => return Ok(conn),
            Err(e) => {
                warn!(
                    "Failed to connect to Redis: {}. Retrying in {} seconds...",
                    e,
                    RECONNECT_DELAY.as_secs()
                );
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
}
