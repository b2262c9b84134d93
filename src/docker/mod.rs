//! Thin capability layer over the local Docker daemon.
//!
//! When the daemon is unreachable at construction the client falls back to a
//! deterministic in-memory mock of three containers whose operations mutate
//! the mock records. The fallback decision is made once; later calls never
//! re-probe.

mod logs;

pub use logs::{read_capped, LogBuffer};

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use bollard::container::{
    ListContainersOptions, LogsOptions, RestartContainerOptions, StartContainerOptions,
    StopContainerOptions, UpdateContainerOptions,
};
use bollard::models::{RestartPolicy as RuntimeRestartPolicy, RestartPolicyNameEnum};
use bollard::Docker;
use chrono::{DateTime, Utc};
use futures_util::stream::{self, BoxStream, StreamExt};
use serde::Serialize;
use thiserror::Error;

use crate::store::{RestartPolicy, RestartPolicyName};

const PING_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum DockerError {
    #[error("container not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Api(#[from] bollard::errors::Error),
}

#[derive(Debug, Clone, Serialize)]
pub struct ContainerSummary {
    pub id: String,
    pub name: String,
    pub image: String,
    pub state: String,
    pub status: String,
    pub labels: HashMap<String, String>,
    pub names: Vec<String>,
    pub restart_policy: String,
}

pub struct DockerClient {
    backend: Backend,
}

enum Backend {
    Real(Docker),
    Mock(Mutex<HashMap<String, ContainerSummary>>),
}

impl DockerClient {
    /// Connect to the local daemon, falling back to the mock when the socket
    /// is missing or the daemon does not answer a ping within 2 seconds.
    pub async fn connect() -> Self {
        match Docker::connect_with_local_defaults() {
            Ok(cli) => match tokio::time::timeout(PING_TIMEOUT, cli.ping()).await {
                Ok(Ok(_)) => {
                    return Self {
                        backend: Backend::Real(cli),
                    }
                }
                Ok(Err(err)) => {
                    tracing::warn!(error = %err, "docker ping failed, using mock containers")
                }
                Err(_) => tracing::warn!("docker ping timed out, using mock containers"),
            },
            Err(err) => tracing::warn!(error = %err, "docker connect failed, using mock containers"),
        }
        Self::mock()
    }

    /// A client backed purely by the in-memory mock records.
    pub fn mock() -> Self {
        let fixture = |id: &str, name: &str, image: &str, state: &str, status: &str, policy: &str| {
            (
                id.to_string(),
                ContainerSummary {
                    id: id.to_string(),
                    name: name.to_string(),
                    image: image.to_string(),
                    state: state.to_string(),
                    status: status.to_string(),
                    labels: HashMap::new(),
                    names: vec![format!("/{name}")],
                    restart_policy: policy.to_string(),
                },
            )
        };
        let records = HashMap::from([
            fixture("mock-1", "mock-postgres", "postgres:15", "running", "Up 2 hours", "always"),
            fixture("mock-2", "mock-nginx", "nginx:latest", "exited", "Exited (0) 10 minutes ago", "no"),
            fixture("mock-3", "mock-redis", "redis:alpine", "running", "Up 5 days", "on-failure"),
        ]);
        Self {
            backend: Backend::Mock(Mutex::new(records)),
        }
    }

    pub fn is_mock(&self) -> bool {
        matches!(self.backend, Backend::Mock(_))
    }

    pub async fn has_docker(&self) -> bool {
        match &self.backend {
            Backend::Mock(_) => true,
            Backend::Real(cli) => cli.ping().await.is_ok(),
        }
    }

    pub async fn list_containers(&self) -> Result<Vec<ContainerSummary>, DockerError> {
        match &self.backend {
            Backend::Mock(records) => {
                let records = records.lock().unwrap();
                let mut out: Vec<_> = records.values().cloned().collect();
                out.sort_by(|a, b| a.id.cmp(&b.id));
                Ok(out)
            }
            Backend::Real(cli) => {
                let opts = ListContainersOptions::<String> {
                    all: true,
                    ..Default::default()
                };
                let containers = cli.list_containers(Some(opts)).await?;
                let out = containers
                    .into_iter()
                    .map(|c| {
                        let names = c.names.unwrap_or_default();
                        let name = names
                            .first()
                            .map(|n| n.strip_prefix('/').unwrap_or(n).to_string())
                            .unwrap_or_default();
                        ContainerSummary {
                            id: c.id.unwrap_or_default(),
                            name,
                            image: c.image.unwrap_or_default(),
                            state: c.state.unwrap_or_default(),
                            status: c.status.unwrap_or_default(),
                            labels: c.labels.unwrap_or_default(),
                            names,
                            restart_policy: String::new(),
                        }
                    })
                    .collect();
                Ok(out)
            }
        }
    }

    pub async fn container_state(&self, id: &str) -> Result<String, DockerError> {
        match &self.backend {
            Backend::Mock(records) => {
                let records = records.lock().unwrap();
                records
                    .get(id)
                    .map(|c| c.state.clone())
                    .ok_or_else(|| DockerError::NotFound(id.to_string()))
            }
            Backend::Real(cli) => {
                let inspect = cli.inspect_container(id, None).await?;
                Ok(inspect
                    .state
                    .and_then(|s| s.status)
                    .map(|s| s.to_string())
                    .unwrap_or_default())
            }
        }
    }

    pub async fn start(&self, id: &str) -> Result<(), DockerError> {
        match &self.backend {
            Backend::Mock(records) => {
                let mut records = records.lock().unwrap();
                let c = records
                    .get_mut(id)
                    .ok_or_else(|| DockerError::NotFound(id.to_string()))?;
                c.state = "running".to_string();
                c.status = "Up (mock)".to_string();
                Ok(())
            }
            Backend::Real(cli) => {
                cli.start_container(id, None::<StartContainerOptions<String>>)
                    .await?;
                Ok(())
            }
        }
    }

    pub async fn stop(&self, id: &str, timeout: Duration) -> Result<(), DockerError> {
        match &self.backend {
            Backend::Mock(records) => {
                let mut records = records.lock().unwrap();
                let c = records
                    .get_mut(id)
                    .ok_or_else(|| DockerError::NotFound(id.to_string()))?;
                c.state = "exited".to_string();
                c.status = "Exited (mock)".to_string();
                Ok(())
            }
            Backend::Real(cli) => {
                let opts = StopContainerOptions {
                    t: timeout.as_secs() as i64,
                };
                cli.stop_container(id, Some(opts)).await?;
                Ok(())
            }
        }
    }

    pub async fn restart(&self, id: &str, timeout: Duration) -> Result<(), DockerError> {
        match &self.backend {
            Backend::Mock(records) => {
                let mut records = records.lock().unwrap();
                let c = records
                    .get_mut(id)
                    .ok_or_else(|| DockerError::NotFound(id.to_string()))?;
                c.state = "running".to_string();
                c.status = "Up (mock restarted)".to_string();
                Ok(())
            }
            Backend::Real(cli) => {
                let opts = RestartContainerOptions {
                    t: timeout.as_secs() as isize,
                };
                cli.restart_container(id, Some(opts)).await?;
                Ok(())
            }
        }
    }

    pub async fn update_restart_policy(
        &self,
        id: &str,
        policy: &RestartPolicy,
    ) -> Result<(), DockerError> {
        match &self.backend {
            Backend::Mock(records) => {
                let mut records = records.lock().unwrap();
                let c = records
                    .get_mut(id)
                    .ok_or_else(|| DockerError::NotFound(id.to_string()))?;
                c.restart_policy = policy.name.as_str().to_string();
                Ok(())
            }
            Backend::Real(cli) => {
                let update = UpdateContainerOptions::<String> {
                    restart_policy: Some(RuntimeRestartPolicy {
                        name: Some(runtime_policy_name(policy.name)),
                        maximum_retry_count: Some(policy.maximum_retry_count),
                    }),
                    ..Default::default()
                };
                cli.update_container(id, update).await?;
                Ok(())
            }
        }
    }

    /// Stream demultiplexed stdout/stderr log payloads, newest `tail` lines
    /// since `since`. Callers cap the total bytes via [`read_capped`].
    pub async fn logs(
        &self,
        id: &str,
        tail: i64,
        since: DateTime<Utc>,
    ) -> Result<BoxStream<'static, Result<Vec<u8>, DockerError>>, DockerError> {
        match &self.backend {
            Backend::Mock(records) => {
                {
                    let records = records.lock().unwrap();
                    if !records.contains_key(id) {
                        return Err(DockerError::NotFound(id.to_string()));
                    }
                }
                let content = format!(
                    "{since} container {id} accepting connections\n\
                     {since} container {id} heartbeat ok\n\
                     {since} container {id} ready\n",
                    since = since.to_rfc3339(),
                    id = id,
                );
                Ok(stream::iter(vec![Ok(content.into_bytes())]).boxed())
            }
            Backend::Real(cli) => {
                let opts = LogsOptions::<String> {
                    stdout: true,
                    stderr: true,
                    timestamps: true,
                    tail: if tail <= 0 {
                        "all".to_string()
                    } else {
                        tail.to_string()
                    },
                    since: since.timestamp(),
                    ..Default::default()
                };
                let stream = cli
                    .logs(id, Some(opts))
                    .map(|item| match item {
                        Ok(out) => Ok(out.into_bytes().to_vec()),
                        Err(err) => Err(DockerError::from(err)),
                    })
                    .boxed();
                Ok(stream)
            }
        }
    }
}

fn runtime_policy_name(name: RestartPolicyName) -> RestartPolicyNameEnum {
    match name {
        RestartPolicyName::No => RestartPolicyNameEnum::NO,
        RestartPolicyName::Always => RestartPolicyNameEnum::ALWAYS,
        RestartPolicyName::OnFailure => RestartPolicyNameEnum::ON_FAILURE,
        RestartPolicyName::UnlessStopped => RestartPolicyNameEnum::UNLESS_STOPPED,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_lists_fixtures() {
        let docker = DockerClient::mock();
        assert!(docker.is_mock());
        assert!(docker.has_docker().await);

        let containers = docker.list_containers().await.unwrap();
        assert_eq!(containers.len(), 3);
        assert_eq!(containers[0].id, "mock-1");
        assert_eq!(containers[0].name, "mock-postgres");
        assert_eq!(containers[1].state, "exited");
    }

    #[tokio::test]
    async fn test_mock_lifecycle_mutates_state() {
        let docker = DockerClient::mock();

        assert_eq!(docker.container_state("mock-2").await.unwrap(), "exited");
        docker.start("mock-2").await.unwrap();
        assert_eq!(docker.container_state("mock-2").await.unwrap(), "running");

        docker.stop("mock-2", Duration::from_secs(5)).await.unwrap();
        assert_eq!(docker.container_state("mock-2").await.unwrap(), "exited");

        docker
            .restart("mock-2", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(docker.container_state("mock-2").await.unwrap(), "running");
    }

    #[tokio::test]
    async fn test_mock_unknown_container_errors() {
        let docker = DockerClient::mock();
        let err = docker.container_state("nope").await.unwrap_err();
        assert!(err.to_string().contains("not found"));
        assert!(docker.start("nope").await.is_err());
        assert!(docker.logs("nope", 10, Utc::now()).await.is_err());
    }

    #[tokio::test]
    async fn test_mock_update_restart_policy() {
        let docker = DockerClient::mock();
        docker
            .update_restart_policy(
                "mock-2",
                &RestartPolicy {
                    name: RestartPolicyName::UnlessStopped,
                    maximum_retry_count: 0,
                },
            )
            .await
            .unwrap();
        let containers = docker.list_containers().await.unwrap();
        let nginx = containers.iter().find(|c| c.id == "mock-2").unwrap();
        assert_eq!(nginx.restart_policy, "unless-stopped");
    }

    #[tokio::test]
    async fn test_mock_logs_capped() {
        let docker = DockerClient::mock();
        let stream = docker.logs("mock-1", 200, Utc::now()).await.unwrap();
        let (bytes, truncated) = read_capped(stream, 16).await;
        assert_eq!(bytes.len(), 16);
        assert!(truncated);
    }
}
