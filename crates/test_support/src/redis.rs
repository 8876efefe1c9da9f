use anyhow::{Context, Result};
use testcontainers::{
    ContainerAsync, GenericImage, ImageExt,
    core::{IntoContainerPort, WaitFor},
    runners::AsyncRunner,
};
use tokio::time::{Duration, sleep};

use crate::unique_name;

const REDIS_PORT: u16 = 6379;
const IMAGE: &str = "redis";
const TAG: &str = "7-alpine";

#[derive(Debug)]
pub struct RedisContainer {
    container: ContainerAsync<GenericImage>,
    host_port: u16,
}

impl RedisContainer {
    /// Start a Redis container with persistence disabled.
    ///
    /// # Errors
    /// Returns an error if no container runtime is available, the container
    /// fails to start, or the port cannot be resolved.
    pub async fn start() -> Result<Self> {
        crate::runtime::ensure_container_runtime()?;
        let image = GenericImage::new(IMAGE, TAG)
            .with_exposed_port(REDIS_PORT.tcp())
            .with_wait_for(WaitFor::message_on_stdout("Ready to accept connections"))
            .with_cmd(["redis-server", "--save", "", "--appendonly", "no"])
            .with_container_name(unique_name("redis"));

        let container = image
            .start()
            .await
            .context("Failed to start Redis container")?;
        let host_port = container
            .get_host_port_ipv4(REDIS_PORT.tcp())
            .await
            .context("Failed to resolve Redis host port")?;

        Ok(Self {
            container,
            host_port,
        })
    }

    #[must_use]
    pub fn url(&self) -> String {
        format!("redis://127.0.0.1:{}", self.host_port)
    }

    #[must_use]
    pub fn container(&self) -> &ContainerAsync<GenericImage> {
        &self.container
    }

    /// Open a managed connection, retrying while the server warms up.
    ///
    /// # Errors
    /// Returns an error if Redis does not become ready after retries.
    pub async fn connection(&self) -> Result<redis::aio::ConnectionManager> {
        let client = redis::Client::open(self.url()).context("Invalid redis URL")?;
        let mut attempts = 0;
        loop {
            match redis::aio::ConnectionManager::new(client.clone()).await {
                Ok(conn) => return Ok(conn),
                Err(err) => {
                    attempts += 1;
                    if attempts >= 20 {
                        return Err(err).context("Redis did not become ready");
                    }
                    sleep(Duration::from_millis(250)).await;
                }
            }
        }
    }
}
