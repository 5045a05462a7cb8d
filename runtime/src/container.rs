use crate::error::RuntimeError;
use crate::paths::symlink_to_container_path;
use crate::sandbox::{labels_match, make_pod_id};
use crate::service::{RuntimeService, make_container_key, make_sandbox_key};
use crate::types::{Container, ContainerState, now_nanos};
use crate::{env, supervisor};
use nix::sys::signal::{Signal, kill};
use nix::unistd::{Pid, getpgid};
use procri_core::{
    ContainerFilter, ContainerStatusRequest, ContainerStatusResponse, CreateContainerRequest,
    CreateContainerResponse, ListContainersRequest, ListContainersResponse,
    ReopenContainerLogRequest, ReopenContainerLogResponse, RemoveContainerRequest,
    RemoveContainerResponse, StartContainerRequest, StartContainerResponse, StopContainerRequest,
    StopContainerResponse, UpdateContainerResourcesRequest, UpdateContainerResourcesResponse,
};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const FALLBACK_LOG_PATH: &str = "/tmp/cnt.log";
const TERMINATE_POLL_INTERVAL: Duration = Duration::from_millis(500);

impl RuntimeService {
    /// Creates a new container inside the given sandbox, which must exist
    /// and be READY.
    pub async fn create_container(
        &self,
        req: CreateContainerRequest,
    ) -> Result<CreateContainerResponse, RuntimeError> {
        let Some(config) = req.config else {
            return Err(RuntimeError::InvalidParameter(
                "CreateContainerRequest.Config".to_string(),
            ));
        };
        let Some(metadata) = config.metadata else {
            return Err(RuntimeError::InvalidParameter(
                "CreateContainerRequest.Config.Metadata".to_string(),
            ));
        };
        let Some(image) = config.image else {
            return Err(RuntimeError::InvalidParameter(
                "CreateContainerRequest.Config.Image".to_string(),
            ));
        };
        let Some(sandbox_metadata) = req.sandbox_config.and_then(|sc| sc.metadata) else {
            return Err(RuntimeError::InvalidParameter(
                "CreateContainerRequest.SandboxConfig".to_string(),
            ));
        };

        let cid = xid::new().to_string();

        for mount in &config.mounts {
            tracing::debug!(
                "CreateContainer {} {} -> {}",
                cid,
                mount.host_path,
                mount.container_path
            );
            if mount.host_path == mount.container_path {
                continue;
            }
            symlink_to_container_path(&mount.host_path, &mount.container_path)
                .await
                .map_err(|e| RuntimeError::Symlink(e.to_string()))?;
        }

        let pod_id = make_pod_id(&sandbox_metadata.namespace, &sandbox_metadata.name);

        let _guard = self.locks.lock(&make_sandbox_key(&pod_id)).await;
        let Some(mut pod) = self.get_sandbox(&pod_id).await else {
            return Err(RuntimeError::InvalidParameter(format!(
                "CreateContainer: no such pod sandbox {}",
                pod_id
            )));
        };
        if pod.state != crate::types::SandboxState::Ready {
            return Err(RuntimeError::SandboxNotReady(format!(
                "CreateContainer sandbox {} is not ready",
                pod_id
            )));
        }

        let log_path = if config.log_path.is_empty() {
            String::new()
        } else {
            Path::new(&pod.log_directory)
                .join(&config.log_path)
                .to_string_lossy()
                .into_owned()
        };

        let container = Container {
            id: cid.clone(),
            pod_id: pod_id.clone(),
            created_at: now_nanos(),
            name: metadata.name,
            attempt: metadata.attempt,
            image: image.image,
            args: config.args,
            command: config.command,
            working_dir: config.working_dir,
            log_path,
            env: env::make_env_list(&config.envs),
            pid: 0,
            started_at: 0,
            finished_at: 0,
            exit_code: 0,
            state: ContainerState::Created,
            generation: 0,
            labels: config.labels,
            annotations: config.annotations,
        };
        self.put_container(&cid, &container).await;

        pod.containers.push(cid.clone());
        self.put_sandbox(&pod_id, &pod).await;

        tracing::info!("CreateContainer: created container {}", cid);
        Ok(CreateContainerResponse { container_id: cid })
    }

    /// Starts the container's process under a PTY and hands the child to the
    /// background supervisor.
    pub async fn start_container(
        self: Arc<Self>,
        req: StartContainerRequest,
    ) -> Result<StartContainerResponse, RuntimeError> {
        let cid = req.container_id;

        let _guard = self.locks.lock(&make_container_key(&cid)).await;
        let Some(mut container) = self.get_container(&cid).await else {
            return Err(RuntimeError::NotFound(format!(
                "container {} not found",
                cid
            )));
        };

        if container.command.is_empty() && container.args.is_empty() {
            return Err(RuntimeError::InvalidParameter(format!(
                "container {} no command or args",
                cid
            )));
        }

        if container.log_path.is_empty() {
            container.log_path = FALLBACK_LOG_PATH.to_string();
        }
        if let Some(parent) = Path::new(&container.log_path).parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                tracing::warn!(
                    "creating directory for logfile {} for {}: {}",
                    container.log_path,
                    cid,
                    e
                );
            }
        }

        container.generation += 1;
        let spawned = supervisor::spawn_container(&container).await?;

        container.pid = spawned.pid;
        container.state = ContainerState::Running;
        container.exit_code = 0;
        container.started_at = now_nanos();
        self.put_container(&cid, &container).await;

        let service = self.clone();
        let generation = container.generation;
        let id = cid.clone();
        tokio::spawn(async move {
            service.track_container_process(id, generation, spawned).await;
        });

        tracing::info!("StartContainer {} succeeded", cid);
        Ok(StartContainerResponse {})
    }

    /// Signal the container's process group and wait for the supervisor to
    /// record the exit, escalating to SIGKILL after `timeout` seconds.
    pub(crate) async fn terminate_container(
        &self,
        container: &Container,
        timeout: i64,
    ) -> Result<(), RuntimeError> {
        let cid = &container.id;

        if container.state != ContainerState::Running {
            tracing::debug!("container {} not running", cid);
            return Ok(());
        }
        if container.pid == 0 {
            return Err(RuntimeError::Internal(format!(
                "container {} not started",
                cid
            )));
        }

        let pid = Pid::from_raw(container.pid);
        // The PTY makes the child a session leader, so signalling the
        // negated group id reaches the whole tree.
        let target = match getpgid(Some(pid)) {
            Ok(pgid) => Pid::from_raw(-pgid.as_raw()),
            Err(e) => {
                tracing::warn!("can't find container {} process group {}: {}", cid, pid, e);
                pid
            }
        };

        // If the caller abandons the call mid-protocol, the process still
        // gets a SIGKILL on the way out.
        let mut cancel_guard = KillOnDrop::armed(pid);

        if let Err(e) = kill(target, Signal::SIGTERM) {
            tracing::warn!(
                "trying to gracefully stop container {} process {}: {}",
                cid,
                target,
                e
            );
            let _ = kill(target, Signal::SIGKILL);
            cancel_guard.disarm();
            return Ok(());
        }

        let deadline = tokio::time::sleep(Duration::from_secs(timeout.max(0) as u64));
        tokio::pin!(deadline);
        let mut tick = tokio::time::interval_at(
            tokio::time::Instant::now() + TERMINATE_POLL_INTERVAL,
            TERMINATE_POLL_INTERVAL,
        );

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    match self.get_container(cid).await {
                        None => {
                            tracing::debug!(
                                "terminating container {} process {}: already removed",
                                cid,
                                pid
                            );
                            cancel_guard.disarm();
                            return Ok(());
                        }
                        Some(current) if current.state != ContainerState::Running => {
                            tracing::debug!(
                                "exit code for container {} process {}: {}",
                                cid,
                                pid,
                                current.exit_code
                            );
                            cancel_guard.disarm();
                            return Ok(());
                        }
                        Some(_) => {}
                    }
                }
                _ = &mut deadline => {
                    tracing::warn!("timeout waiting for container {} process {}", cid, pid);
                    let _ = kill(pid, Signal::SIGKILL);
                    cancel_guard.disarm();
                    return Ok(());
                }
            }
        }
    }

    /// Stops a running container with a grace period. Idempotent: a missing
    /// or already-stopped container is a success.
    pub async fn stop_container(
        &self,
        req: StopContainerRequest,
    ) -> Result<StopContainerResponse, RuntimeError> {
        let cid = req.container_id;

        let Some(container) = self.get_container(&cid).await else {
            tracing::debug!("StopContainer: container {} not found", cid);
            return Ok(StopContainerResponse {});
        };

        self.terminate_container(&container, req.timeout).await?;

        tracing::info!("StopContainer {} succeeded", cid);
        Ok(StopContainerResponse {})
    }

    /// Removes the container, forcibly terminating it if running.
    /// Idempotent.
    pub async fn remove_container(
        &self,
        req: RemoveContainerRequest,
    ) -> Result<RemoveContainerResponse, RuntimeError> {
        let cid = req.container_id;

        let Some(container) = self.get_container(&cid).await else {
            tracing::debug!("RemoveContainer: container {} not found", cid);
            return Ok(RemoveContainerResponse {});
        };

        {
            let _guard = self.locks.lock(&make_sandbox_key(&container.pod_id)).await;
            if let Some(mut pod) = self.get_sandbox(&container.pod_id).await {
                if pod.containers.iter().any(|c| *c == cid) {
                    pod.containers.retain(|c| *c != cid);
                    self.put_sandbox(&container.pod_id, &pod).await;
                }
            } else {
                tracing::warn!("RemoveContainer {} no pod {} found", cid, container.pod_id);
            }
        }

        self.terminate_container(&container, 0).await?;
        self.delete_container(&cid).await;

        tracing::info!("RemoveContainer {} success", cid);
        Ok(RemoveContainerResponse {})
    }

    /// Full status view; a missing record is an error.
    pub async fn container_status(
        &self,
        req: ContainerStatusRequest,
    ) -> Result<ContainerStatusResponse, RuntimeError> {
        let cid = req.container_id;

        let Some(container) = self.get_container(&cid).await else {
            return Err(RuntimeError::NotFound(format!(
                "container {} not found",
                cid
            )));
        };

        Ok(ContainerStatusResponse {
            status: Some(container.to_status()),
            info: Default::default(),
        })
    }

    pub async fn list_containers(
        &self,
        req: ListContainersRequest,
    ) -> Result<ListContainersResponse, RuntimeError> {
        let mut containers = self.list_containers_internal().await;
        if let Some(filter) = &req.filter {
            containers = filter_containers(containers, filter);
        }

        let result = containers.iter().map(Container::to_cri).collect();
        Ok(ListContainersResponse { containers: result })
    }

    pub async fn update_container_resources(
        &self,
        req: UpdateContainerResourcesRequest,
    ) -> Result<UpdateContainerResourcesResponse, RuntimeError> {
        tracing::debug!(
            "UpdateContainerResources {} resource spec {:?}",
            req.container_id,
            req.linux
        );
        Ok(UpdateContainerResourcesResponse {})
    }

    pub async fn reopen_container_log(
        &self,
        req: ReopenContainerLogRequest,
    ) -> Result<ReopenContainerLogResponse, RuntimeError> {
        // Reopening while the process holds the log file open is not
        // implemented.
        Err(RuntimeError::Unsupported(format!(
            "ReopenContainerLog {}",
            req.container_id
        )))
    }
}

/// Sends SIGKILL on drop unless disarmed; implements the cancellation arm of
/// the termination protocol, where dropping the in-flight future is the
/// cancellation signal.
struct KillOnDrop {
    pid: Option<Pid>,
}

impl KillOnDrop {
    fn armed(pid: Pid) -> Self {
        Self { pid: Some(pid) }
    }

    fn disarm(&mut self) {
        self.pid = None;
    }
}

impl Drop for KillOnDrop {
    fn drop(&mut self) {
        if let Some(pid) = self.pid.take() {
            tracing::warn!("termination of process {} cancelled, sending SIGKILL", pid);
            let _ = kill(pid, Signal::SIGKILL);
        }
    }
}

fn filter_containers(containers: Vec<Container>, filter: &ContainerFilter) -> Vec<Container> {
    let containers = filter_containers_by_pod_sandbox_id(&filter.pod_sandbox_id, containers);
    let containers = filter_containers_by_label(&filter.label_selector, containers);
    let containers =
        filter_containers_by_state(filter.state.as_ref().map(|s| s.state), containers);
    filter_containers_by_id(&filter.id, containers)
}

fn filter_containers_by_pod_sandbox_id(
    sandbox_id: &str,
    containers: Vec<Container>,
) -> Vec<Container> {
    if sandbox_id.is_empty() {
        return containers;
    }
    containers
        .into_iter()
        .filter(|cnt| cnt.pod_id == sandbox_id)
        .collect()
}

fn filter_containers_by_label(
    selector: &HashMap<String, String>,
    containers: Vec<Container>,
) -> Vec<Container> {
    if selector.is_empty() {
        return containers;
    }
    containers
        .into_iter()
        .filter(|cnt| labels_match(selector, &cnt.labels))
        .collect()
}

fn filter_containers_by_state(state: Option<i32>, containers: Vec<Container>) -> Vec<Container> {
    let Some(state) = state else {
        return containers;
    };
    containers
        .into_iter()
        .filter(|cnt| cnt.state.to_proto() as i32 == state)
        .collect()
}

fn filter_containers_by_id(id: &str, containers: Vec<Container>) -> Vec<Container> {
    if id.is_empty() {
        return containers;
    }
    containers
        .into_iter()
        .filter(|cnt| cnt.id == id)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use procri_core::ContainerStateValue;

    fn container(id: &str, pod: &str, state: ContainerState, labels: &[(&str, &str)]) -> Container {
        Container {
            id: id.to_string(),
            pod_id: pod.to_string(),
            name: id.to_string(),
            attempt: 0,
            image: "img".to_string(),
            command: vec!["true".to_string()],
            args: Vec::new(),
            env: Vec::new(),
            working_dir: String::new(),
            log_path: String::new(),
            pid: 0,
            created_at: 1,
            started_at: 0,
            finished_at: 0,
            exit_code: 0,
            state,
            generation: 0,
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            annotations: HashMap::new(),
        }
    }

    #[test]
    fn test_filter_composition() {
        let containers = vec![
            container("a", "ns_p1", ContainerState::Running, &[("app", "web")]),
            container("b", "ns_p1", ContainerState::Exited, &[("app", "web")]),
            container("c", "ns_p2", ContainerState::Running, &[("app", "db")]),
        ];

        let filter = ContainerFilter {
            id: String::new(),
            state: Some(ContainerStateValue {
                state: procri_core::ContainerState::ContainerRunning as i32,
            }),
            pod_sandbox_id: "ns_p1".to_string(),
            label_selector: [("app".to_string(), "web".to_string())].into_iter().collect(),
        };

        let result = filter_containers(containers, &filter);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].id, "a");
    }

    #[test]
    fn test_filter_by_id() {
        let containers = vec![
            container("a", "ns_p1", ContainerState::Created, &[]),
            container("b", "ns_p1", ContainerState::Created, &[]),
        ];

        let filter = ContainerFilter {
            id: "b".to_string(),
            state: None,
            pod_sandbox_id: String::new(),
            label_selector: HashMap::new(),
        };

        let result = filter_containers(containers, &filter);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].id, "b");
    }

    #[test]
    fn test_label_filter_requires_every_pair() {
        let containers = vec![container(
            "a",
            "ns_p1",
            ContainerState::Running,
            &[("app", "web")],
        )];

        let filter = ContainerFilter {
            id: String::new(),
            state: None,
            pod_sandbox_id: String::new(),
            label_selector: [
                ("app".to_string(), "web".to_string()),
                ("tier".to_string(), "fe".to_string()),
            ]
            .into_iter()
            .collect(),
        };

        assert!(filter_containers(containers, &filter).is_empty());
    }
}
