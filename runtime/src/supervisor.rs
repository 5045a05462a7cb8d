use crate::error::RuntimeError;
use crate::logpipe::LogPipe;
use crate::pty::{open_pty, set_controlling_tty};
use crate::service::RuntimeService;
use crate::types::{Container, ContainerState, now_nanos};
use std::os::fd::OwnedFd;
use std::process::Stdio;
use tokio::process::{Child, Command};

/// A freshly spawned container process and the handles the supervisor owns
/// until it exits.
pub(crate) struct SpawnedChild {
    pub(crate) pid: i32,
    pub(crate) child: Child,
    pub(crate) master: OwnedFd,
    pub(crate) log_pipe: LogPipe,
}

/// Start the container's command under a PTY. The slave becomes the child's
/// controlling terminal (making it a session leader); stdout and stderr come
/// back through pipes for the log fan-in.
pub(crate) async fn spawn_container(container: &Container) -> Result<SpawnedChild, RuntimeError> {
    let mut command_args = container.command.clone();
    command_args.extend(container.args.iter().cloned());

    let pty = open_pty()
        .map_err(|e| RuntimeError::Spawn(format!("container {}: openpty: {}", container.id, e)))?;

    let mut cmd = Command::new(&command_args[0]);
    cmd.args(&command_args[1..]);
    cmd.env_clear();
    for entry in &container.env {
        if let Some((key, value)) = entry.split_once('=') {
            cmd.env(key, value);
        }
    }
    if !container.working_dir.is_empty() {
        cmd.current_dir(&container.working_dir);
    }
    cmd.stdin(Stdio::from(pty.slave));
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    set_controlling_tty(&mut cmd);

    let mut child = cmd.spawn().map_err(|e| {
        RuntimeError::Spawn(format!("container {} start failed: {}", container.id, e))
    })?;

    let pid = child.id().map(|p| p as i32).ok_or_else(|| {
        RuntimeError::Spawn(format!("container {} exited before tracking", container.id))
    })?;

    let stdout = child.stdout.take().ok_or_else(|| {
        RuntimeError::Spawn(format!("container {}: no stdout pipe", container.id))
    })?;
    let stderr = child.stderr.take().ok_or_else(|| {
        RuntimeError::Spawn(format!("container {}: no stderr pipe", container.id))
    })?;

    let log_pipe = LogPipe::new(stdout, stderr, &container.log_path)
        .await
        .map_err(|e| {
            RuntimeError::Spawn(format!("container {} start failed: {}", container.id, e))
        })?;

    Ok(SpawnedChild {
        pid,
        child,
        master: pty.master,
        log_pipe,
    })
}

impl RuntimeService {
    /// Waits for the log readers to drain and the child to exit, then writes
    /// the terminal state back. The write is skipped when the record was
    /// superseded by a concurrent remove/recreate (generation mismatch).
    pub(crate) async fn track_container_process(
        &self,
        container_id: String,
        generation: u64,
        spawned: SpawnedChild,
    ) {
        let SpawnedChild {
            pid,
            mut child,
            master,
            log_pipe,
        } = spawned;

        tracing::trace!("waiting for logs of {} to finish", pid);
        log_pipe.wait().await;

        let exit_code = match child.wait().await {
            Ok(status) => status.code().unwrap_or(-1),
            Err(e) => {
                tracing::warn!(
                    "waiting for container {} process {}: {}",
                    container_id,
                    pid,
                    e
                );
                -1
            }
        };

        // The child is gone; release its terminal.
        drop(master);

        let _guard = self
            .locks
            .lock(&crate::service::make_container_key(&container_id))
            .await;

        let Some(mut container) = self.get_container(&container_id).await else {
            tracing::error!("failed to get container {} after exit", container_id);
            return;
        };

        if container.generation != generation {
            tracing::error!(
                "container {} was respawned ({} -> {}), dropping stale exit",
                container_id,
                generation,
                container.generation
            );
            return;
        }

        tracing::debug!(
            container_id = %container_id,
            pid = pid,
            exit_code = exit_code,
            "container exited"
        );

        container.exit_code = exit_code;
        container.state = ContainerState::Exited;
        container.finished_at = now_nanos();
        self.put_container(&container_id, &container).await;
    }
}

#[cfg(test)]
mod tests {
    use crate::testutil::create_test_service;
    use crate::types::ContainerState;
    use procri_core::{
        ContainerConfig, ContainerMetadata, ContainerStatusRequest, CreateContainerRequest,
        ImageSpec, PodSandboxConfig, PodSandboxMetadata, RunPodSandboxRequest,
        StartContainerRequest, StopContainerRequest,
    };
    use std::time::Duration;

    fn sandbox_config(namespace: &str, name: &str, log_directory: &str) -> PodSandboxConfig {
        PodSandboxConfig {
            metadata: Some(PodSandboxMetadata {
                name: name.to_string(),
                uid: format!("uid-{}", name),
                namespace: namespace.to_string(),
                attempt: 0,
            }),
            hostname: String::new(),
            log_directory: log_directory.to_string(),
            labels: Default::default(),
            annotations: Default::default(),
        }
    }

    fn create_req(
        sandbox: &PodSandboxConfig,
        name: &str,
        cmd: &[&str],
        log_path: &str,
    ) -> CreateContainerRequest {
        CreateContainerRequest {
            pod_sandbox_id: String::new(),
            config: Some(ContainerConfig {
                metadata: Some(ContainerMetadata {
                    name: name.to_string(),
                    attempt: 0,
                }),
                image: Some(ImageSpec {
                    image: "busybox".to_string(),
                    ..Default::default()
                }),
                command: cmd.iter().map(|c| c.to_string()).collect(),
                log_path: log_path.to_string(),
                ..Default::default()
            }),
            sandbox_config: Some(sandbox.clone()),
        }
    }

    async fn wait_for_state(
        service: &crate::RuntimeService,
        cid: &str,
        state: ContainerState,
    ) -> procri_core::ContainerStatus {
        for _ in 0..100 {
            let resp = service
                .container_status(ContainerStatusRequest {
                    container_id: cid.to_string(),
                    verbose: false,
                })
                .await
                .unwrap();
            let status = resp.status.unwrap();
            if status.state == state.to_proto() as i32 {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        panic!("container {} never reached {}", cid, state);
    }

    #[tokio::test]
    async fn test_container_runs_to_exit_and_logs() {
        let (service, dir) = create_test_service().await;
        let logs = dir.path().join("logs");
        tokio::fs::create_dir_all(&logs).await.unwrap();

        let sandbox = sandbox_config("default", "p1", logs.to_str().unwrap());
        service
            .run_pod_sandbox(RunPodSandboxRequest {
                config: Some(sandbox.clone()),
                runtime_handler: String::new(),
            })
            .await
            .unwrap();

        let created = service
            .create_container(create_req(&sandbox, "c1", &["sh", "-c", "echo hello"], "c1.log"))
            .await
            .unwrap();
        let cid = created.container_id;

        service
            .clone()
            .start_container(StartContainerRequest {
                container_id: cid.clone(),
            })
            .await
            .unwrap();

        let status = wait_for_state(&service, &cid, ContainerState::Exited).await;
        assert_eq!(status.exit_code, 0);
        assert!(status.started_at > 0);
        assert!(status.finished_at > 0);

        let contents = tokio::fs::read_to_string(logs.join("c1.log")).await.unwrap();
        assert!(contents.contains(" stdout F hello\n"), "{:?}", contents);
    }

    #[tokio::test]
    async fn test_stop_terminates_before_grace_period() {
        let (service, dir) = create_test_service().await;
        let logs = dir.path().join("logs");
        tokio::fs::create_dir_all(&logs).await.unwrap();

        let sandbox = sandbox_config("default", "p2", logs.to_str().unwrap());
        service
            .run_pod_sandbox(RunPodSandboxRequest {
                config: Some(sandbox.clone()),
                runtime_handler: String::new(),
            })
            .await
            .unwrap();

        let created = service
            .create_container(create_req(
                &sandbox,
                "c1",
                &["sh", "-c", "exec sleep 30"],
                "c1.log",
            ))
            .await
            .unwrap();
        let cid = created.container_id;

        service
            .clone()
            .start_container(StartContainerRequest {
                container_id: cid.clone(),
            })
            .await
            .unwrap();

        let status = service
            .container_status(ContainerStatusRequest {
                container_id: cid.clone(),
                verbose: false,
            })
            .await
            .unwrap();
        assert!(status.status.unwrap().state == ContainerState::Running.to_proto() as i32);

        let started = std::time::Instant::now();
        service
            .stop_container(StopContainerRequest {
                container_id: cid.clone(),
                timeout: 10,
            })
            .await
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(8));

        let status = wait_for_state(&service, &cid, ContainerState::Exited).await;
        assert!(status.finished_at > 0);
    }

    #[tokio::test]
    async fn test_stale_supervisor_does_not_overwrite_restart() {
        let (service, dir) = create_test_service().await;
        let logs = dir.path().join("logs");
        tokio::fs::create_dir_all(&logs).await.unwrap();

        let sandbox = sandbox_config("default", "p3", logs.to_str().unwrap());
        service
            .run_pod_sandbox(RunPodSandboxRequest {
                config: Some(sandbox.clone()),
                runtime_handler: String::new(),
            })
            .await
            .unwrap();

        let created = service
            .create_container(create_req(&sandbox, "c1", &["sh", "-c", "exit 7"], "c1.log"))
            .await
            .unwrap();
        let cid = created.container_id;

        service
            .clone()
            .start_container(StartContainerRequest {
                container_id: cid.clone(),
            })
            .await
            .unwrap();
        let status = wait_for_state(&service, &cid, ContainerState::Exited).await;
        assert_eq!(status.exit_code, 7);

        // A second spawn bumps the generation; the exit of the first child
        // has already been recorded and must stay recorded.
        service
            .clone()
            .start_container(StartContainerRequest {
                container_id: cid.clone(),
            })
            .await
            .unwrap();
        let second = wait_for_state(&service, &cid, ContainerState::Exited).await;
        assert_eq!(second.exit_code, 7);
        assert!(second.started_at >= status.started_at);
    }
}
