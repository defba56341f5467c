// src/adapters/docker.rs
//! Bollard-backed implementation of the `ContainerHost` capability set.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions,
    NetworkingConfig, RemoveContainerOptions, RenameContainerOptions, StartContainerOptions,
    StopContainerOptions, UpdateContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::{CreateImageOptions, RemoveImageOptions};
use bollard::models::{RestartPolicy, RestartPolicyNameEnum};
use bollard::Docker;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use tracing::{debug, error, info, warn};

use crate::core::container::{normalize_name, Container, ContainerId, ImageId};
use crate::core::filter::ContainerFilter;
use crate::core::host::{ContainerHost, ContainerUpdate, HostError, HostResult};
use crate::core::params::UpdateParams;

#[derive(Clone)]
pub struct DockerHost {
    client: Docker,
    node_name: String,
}

impl DockerHost {
    pub fn new(socket: &str, node_name: String) -> anyhow::Result<Self> {
        let client = Docker::connect_with_unix(socket, 120, bollard::API_DEFAULT_VERSION)
            .or_else(|_| Docker::connect_with_local_defaults())
            .map_err(|e| anyhow::anyhow!("docker connection failed: {}", e))?;
        Ok(Self { client, node_name })
    }

    fn classify(e: bollard::errors::Error) -> HostError {
        if let bollard::errors::Error::DockerResponseServerError {
            status_code,
            message,
        } = &e
        {
            return match *status_code {
                404 => HostError::NotFound(message.clone()),
                409 => HostError::Conflict(message.clone()),
                _ if message.contains("already in progress") => {
                    HostError::AlreadyInProgress(message.clone())
                }
                _ => HostError::Api(e),
            };
        }
        HostError::Api(e)
    }

    /// The container this process runs in, identified by the hostname Docker
    /// assigns (a prefix of the container id) or an exact name match.
    pub async fn find_current_container(&self, hostname: &str) -> HostResult<Option<Container>> {
        let all = self.list_containers(&ContainerFilter::matching_all()).await?;
        Ok(all
            .into_iter()
            .find(|c| c.id().0.starts_with(hostname) || c.name() == hostname))
    }

    async fn snapshot(&self, id: &str, fallback_image: Option<String>) -> HostResult<Container> {
        let inspect = self
            .client
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(Self::classify)?;

        let name = inspect
            .name
            .as_deref()
            .map(normalize_name)
            .unwrap_or_default();
        let config = inspect.config.clone();
        let config_image = config.as_ref().and_then(|c| c.image.clone());
        let image_name = config_image
            .clone()
            .or(fallback_image)
            .unwrap_or_default();
        let image_id = inspect.image.clone().unwrap_or_default();
        let labels = config
            .as_ref()
            .and_then(|c| c.labels.clone())
            .unwrap_or_default();
        // HostConfig links look like "/target:/container/alias".
        let links = inspect
            .host_config
            .as_ref()
            .and_then(|h| h.links.clone())
            .unwrap_or_default()
            .into_iter()
            .map(|l| {
                l.split(':')
                    .next()
                    .map(normalize_name)
                    .unwrap_or_default()
            })
            .collect::<Vec<_>>();
        let created = inspect
            .created
            .as_deref()
            .and_then(|c| DateTime::parse_from_rfc3339(c).ok())
            .map(|d| d.with_timezone(&Utc));

        let mut container = Container::new(id, &name, image_name, image_id)
            .with_labels(labels)
            .with_runtime_links(links)
            .with_raw(inspect);
        if let Some(config_image) = config_image {
            container = container.with_config_image(config_image);
        }
        if let Some(created) = created {
            container = container.with_created_at(created);
        }
        Ok(container)
    }
}

#[async_trait]
impl ContainerHost for DockerHost {
    async fn list_containers(&self, filter: &ContainerFilter) -> HostResult<Vec<Container>> {
        let summaries = self
            .client
            .list_containers(Some(ListContainersOptions::<String> {
                all: false,
                ..Default::default()
            }))
            .await
            .map_err(Self::classify)?;

        let mut containers = Vec::with_capacity(summaries.len());
        for summary in summaries {
            let Some(id) = summary.id else { continue };
            match self.snapshot(&id, summary.image).await {
                Ok(c) => {
                    if filter.matches(&c) {
                        containers.push(c);
                    }
                }
                // The container may have gone away between list and inspect.
                Err(e) if e.is_not_found() => {
                    debug!(id = %id, "container vanished during listing");
                }
                Err(e) => return Err(e),
            }
        }
        // Host-list order is created-at order; keep it stable for scans.
        containers.sort_by_key(|c| c.created_at());
        Ok(containers)
    }

    async fn is_stale(
        &self,
        container: &Container,
        params: &UpdateParams,
    ) -> HostResult<(bool, ImageId)> {
        let image_name = container.image_name().to_string();
        if image_name.is_empty() {
            return Err(HostError::InvalidConfiguration(format!(
                "container {} has no image reference",
                container.name()
            )));
        }

        debug!(
            event = "CHECK_UPDATES",
            node.name = %self.node_name,
            container = %container.name(),
            image = %image_name,
            "🔍 checking for a newer image"
        );

        if !container.is_no_pull(params) {
            let mut stream = self.client.create_image(
                Some(CreateImageOptions {
                    from_image: image_name.clone(),
                    ..Default::default()
                }),
                None,
                None,
            );
            while let Some(res) = stream.next().await {
                if let Err(e) = res {
                    error!(
                        event = "IMAGE_PULL_FAIL",
                        node.name = %self.node_name,
                        container = %container.name(),
                        image = %image_name,
                        error = %e,
                        "❌ image pull failed"
                    );
                    return Err(Self::classify(e));
                }
            }
        }

        let latest = self
            .client
            .inspect_image(&image_name)
            .await
            .map_err(Self::classify)?;
        let latest_id = ImageId::from(latest.id.unwrap_or_default());
        let stale = !latest_id.is_empty() && latest_id != *container.image_id();

        if stale {
            info!(
                event = "UPDATE_FOUND",
                node.name = %self.node_name,
                container = %container.name(),
                old.sha = %container.image_id().short(),
                new.sha = %latest_id.short(),
                "🚀 newer image found"
            );
        }
        Ok((stale, latest_id))
    }

    async fn stop_and_remove_container(
        &self,
        container: &Container,
        timeout: Duration,
    ) -> HostResult<()> {
        info!(
            event = "CONTAINER_STOP",
            node.name = %self.node_name,
            container = %container.name(),
            id = %container.id().short(),
            "🛑 stopping container"
        );
        match self
            .client
            .stop_container(
                &container.id().0,
                Some(StopContainerOptions {
                    t: timeout.as_secs() as i64,
                }),
            )
            .await
        {
            Ok(()) => {}
            // 304: already stopped.
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 304, ..
            }) => {}
            Err(e) => return Err(Self::classify(e)),
        }

        self.client
            .remove_container(
                &container.id().0,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(Self::classify)
    }

    async fn start_container(&self, container: &Container) -> HostResult<ContainerId> {
        let raw = container.raw().ok_or_else(|| {
            HostError::InvalidConfiguration(format!(
                "no captured configuration for {}",
                container.name()
            ))
        })?;
        let source_config = raw.config.clone().ok_or_else(|| {
            HostError::InvalidConfiguration(format!("no config snapshot for {}", container.name()))
        })?;

        let config = Config {
            image: Some(container.image_name().to_string()),
            env: source_config.env,
            cmd: source_config.cmd,
            entrypoint: source_config.entrypoint,
            exposed_ports: source_config.exposed_ports,
            labels: source_config.labels,
            working_dir: source_config.working_dir,
            user: source_config.user,
            host_config: raw.host_config.clone(),
            networking_config: raw.network_settings.as_ref().map(|n| NetworkingConfig {
                endpoints_config: n.networks.clone().unwrap_or_default(),
            }),
            ..Default::default()
        };

        info!(
            event = "CONTAINER_CREATE",
            node.name = %self.node_name,
            container = %container.name(),
            image = %container.image_name(),
            "✨ creating replacement container"
        );
        let created = self
            .client
            .create_container(
                Some(CreateContainerOptions {
                    name: container.name().to_string(),
                    platform: None,
                }),
                config,
            )
            .await
            .map_err(Self::classify)?;
        for warning in &created.warnings {
            warn!(container = %container.name(), warning = %warning, "create warning");
        }

        self.client
            .start_container(&created.id, None::<StartContainerOptions<String>>)
            .await
            .map_err(Self::classify)?;
        info!(
            event = "CONTAINER_START",
            node.name = %self.node_name,
            container = %container.name(),
            id = %ContainerId::from(created.id.clone()).short(),
            "▶️ started replacement container"
        );
        Ok(ContainerId::from(created.id))
    }

    async fn rename_container(&self, container: &Container, new_name: &str) -> HostResult<()> {
        info!(
            event = "CONTAINER_RENAME",
            node.name = %self.node_name,
            container = %container.name(),
            new_name,
            "renaming container"
        );
        self.client
            .rename_container(
                &container.id().0,
                RenameContainerOptions { name: new_name },
            )
            .await
            .map_err(Self::classify)
    }

    async fn update_container(
        &self,
        container: &Container,
        update: ContainerUpdate,
    ) -> HostResult<()> {
        let restart_policy = update.restart_policy.as_deref().map(|name| RestartPolicy {
            name: Some(match name {
                "no" => RestartPolicyNameEnum::NO,
                "always" => RestartPolicyNameEnum::ALWAYS,
                "unless-stopped" => RestartPolicyNameEnum::UNLESS_STOPPED,
                "on-failure" => RestartPolicyNameEnum::ON_FAILURE,
                _ => RestartPolicyNameEnum::EMPTY,
            }),
            maximum_retry_count: None,
        });

        self.client
            .update_container(
                &container.id().0,
                UpdateContainerOptions::<String> {
                    restart_policy,
                    ..Default::default()
                },
            )
            .await
            .map_err(Self::classify)
    }

    async fn remove_container(&self, container: &Container) -> HostResult<()> {
        self.client
            .remove_container(
                &container.id().0,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(Self::classify)
    }

    async fn remove_image_by_id(&self, id: &ImageId, name: &str) -> HostResult<()> {
        info!(
            event = "IMAGE_REMOVE",
            node.name = %self.node_name,
            image = %name,
            id = %id.short(),
            "removing image"
        );
        self.client
            .remove_image(&id.0, Some(RemoveImageOptions::default()), None)
            .await
            .map(|_| ())
            .map_err(Self::classify)
    }

    async fn wait_for_healthy(&self, id: &ContainerId, timeout: Duration) -> HostResult<()> {
        let deadline = Instant::now() + timeout;
        loop {
            let inspect = self
                .client
                .inspect_container(&id.0, None::<InspectContainerOptions>)
                .await
                .map_err(Self::classify)?;

            if let Some(state) = &inspect.state {
                use bollard::models::HealthStatusEnum;
                match state.health.as_ref().and_then(|h| h.status) {
                    Some(HealthStatusEnum::HEALTHY) => return Ok(()),
                    Some(HealthStatusEnum::UNHEALTHY) => {
                        return Err(HostError::Other(format!(
                            "container {} became unhealthy",
                            id.short()
                        )))
                    }
                    Some(HealthStatusEnum::STARTING) => {}
                    // No healthcheck configured: running is good enough.
                    _ => {
                        if state.running == Some(true) {
                            return Ok(());
                        }
                    }
                }
            }

            if Instant::now() >= deadline {
                return Err(HostError::Timeout(timeout));
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    async fn exec_in_container(
        &self,
        id: &ContainerId,
        command: &str,
        timeout: Duration,
    ) -> HostResult<i64> {
        debug!(
            event = "EXEC_HOOK",
            node.name = %self.node_name,
            container = %id.short(),
            command,
            "executing command in container"
        );
        let exec = self
            .client
            .create_exec(
                &id.0,
                CreateExecOptions::<String> {
                    cmd: Some(vec!["sh".into(), "-c".into(), command.into()]),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await
            .map_err(Self::classify)?;

        let drain = async {
            match self
                .client
                .start_exec(&exec.id, None)
                .await
                .map_err(Self::classify)?
            {
                StartExecResults::Attached { mut output, .. } => {
                    while let Some(chunk) = output.next().await {
                        if let Ok(chunk) = chunk {
                            debug!(container = %id.short(), output = %chunk, "hook output");
                        }
                    }
                }
                StartExecResults::Detached => {}
            }
            Ok::<(), HostError>(())
        };
        match tokio::time::timeout(timeout, drain).await {
            Ok(result) => result?,
            Err(_) => return Err(HostError::Timeout(timeout)),
        }

        let inspected = self
            .client
            .inspect_exec(&exec.id)
            .await
            .map_err(Self::classify)?;
        Ok(inspected.exit_code.unwrap_or(0))
    }
}
