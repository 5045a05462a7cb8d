use crate::error::RuntimeError;
use crate::service::{RuntimeService, make_sandbox_key};
use crate::types::{Sandbox, SandboxState, now_nanos};
use procri_core::{
    LinuxPodSandboxStatus, ListPodSandboxRequest, ListPodSandboxResponse, PodSandboxFilter,
    PodSandboxNetworkStatus, PodSandboxStatusRequest, PodSandboxStatusResponse,
    RemovePodSandboxRequest, RemovePodSandboxResponse, RunPodSandboxRequest, RunPodSandboxResponse,
    StopPodSandboxRequest, StopPodSandboxResponse,
};
use std::collections::HashMap;

const STOP_SANDBOX_TIMEOUT_SECONDS: i64 = 30;

pub(crate) fn make_pod_id(namespace: &str, name: &str) -> String {
    format!("{}_{}", namespace, name)
}

impl RuntimeService {
    /// Creates and starts a pod-level sandbox; the sandbox is READY on
    /// success.
    pub async fn run_pod_sandbox(
        &self,
        req: RunPodSandboxRequest,
    ) -> Result<RunPodSandboxResponse, RuntimeError> {
        let Some(config) = req.config else {
            return Err(RuntimeError::InvalidParameter(
                "RunPodSandboxRequest.Config".to_string(),
            ));
        };
        let Some(metadata) = config.metadata else {
            return Err(RuntimeError::InvalidParameter(
                "RunPodSandboxRequest.Config.Metadata".to_string(),
            ));
        };

        let pod_id = make_pod_id(&metadata.namespace, &metadata.name);

        let _guard = self.locks.lock(&make_sandbox_key(&pod_id)).await;
        if self.get_sandbox(&pod_id).await.is_some() {
            return Err(RuntimeError::InvalidParameter(format!(
                "PodSandbox {} already exists",
                pod_id
            )));
        }

        let sandbox = Sandbox {
            id: pod_id.clone(),
            name: metadata.name,
            namespace: metadata.namespace,
            uid: metadata.uid,
            attempt: metadata.attempt,
            hostname: config.hostname,
            log_directory: config.log_directory,
            state: SandboxState::Ready,
            labels: config.labels,
            annotations: config.annotations,
            containers: Vec::new(),
            created_at: now_nanos(),
        };

        self.put_sandbox(&pod_id, &sandbox).await;

        tracing::info!("RunPodSandbox: created {}", pod_id);
        Ok(RunPodSandboxResponse {
            pod_sandbox_id: pod_id,
        })
    }

    /// Terminate every container the sandbox still lists. Containers whose
    /// records are already gone are skipped.
    async fn terminate_sandbox_containers(
        &self,
        pod: &Sandbox,
        force: bool,
    ) -> Result<(), RuntimeError> {
        let timeout = if force { 0 } else { STOP_SANDBOX_TIMEOUT_SECONDS };

        for container_id in &pod.containers {
            let Some(container) = self.get_container(container_id).await else {
                continue;
            };
            if let Err(e) = self.terminate_container(&container, timeout).await {
                tracing::error!("{} terminating container {}: {}", pod.id, container_id, e);
                return Err(e);
            }
        }

        Ok(())
    }

    /// Stops the sandbox's processes. Idempotent; the kubelet calls this
    /// eagerly and repeatedly before RemovePodSandbox.
    pub async fn stop_pod_sandbox(
        &self,
        req: StopPodSandboxRequest,
    ) -> Result<StopPodSandboxResponse, RuntimeError> {
        let pod_id = req.pod_sandbox_id;

        let _guard = self.locks.lock(&make_sandbox_key(&pod_id)).await;
        let Some(mut pod) = self.get_sandbox(&pod_id).await else {
            tracing::debug!("StopPodSandbox: {} does not exist", pod_id);
            return Ok(StopPodSandboxResponse {});
        };

        self.terminate_sandbox_containers(&pod, false).await?;

        pod.state = SandboxState::NotReady;
        self.put_sandbox(&pod_id, &pod).await;

        tracing::info!("StopPodSandbox for {} succeeded", pod_id);
        Ok(StopPodSandboxResponse {})
    }

    /// Removes the sandbox and erases every container record it lists.
    /// Idempotent.
    pub async fn remove_pod_sandbox(
        &self,
        req: RemovePodSandboxRequest,
    ) -> Result<RemovePodSandboxResponse, RuntimeError> {
        let pod_id = req.pod_sandbox_id;

        let _guard = self.locks.lock(&make_sandbox_key(&pod_id)).await;
        let Some(mut pod) = self.get_sandbox(&pod_id).await else {
            return Ok(RemovePodSandboxResponse {});
        };

        self.terminate_sandbox_containers(&pod, true).await?;

        let containers = std::mem::take(&mut pod.containers);
        for (i, container_id) in containers.iter().enumerate() {
            self.delete_container(container_id).await;
            pod.containers = containers[i + 1..].to_vec();
            self.put_sandbox(&pod_id, &pod).await;
        }

        self.delete_sandbox(&pod_id).await;

        tracing::info!("RemovePodSandbox for {} succeeded", pod_id);
        Ok(RemovePodSandboxResponse {})
    }

    pub async fn pod_sandbox_status(
        &self,
        req: PodSandboxStatusRequest,
    ) -> Result<PodSandboxStatusResponse, RuntimeError> {
        let pod_id = req.pod_sandbox_id;

        let Some(pod) = self.get_sandbox(&pod_id).await else {
            return Err(RuntimeError::NotFound(format!(
                "pod sandbox {} not found",
                pod_id
            )));
        };

        let status = procri_core::PodSandboxStatus {
            id: pod.uid.clone(),
            metadata: Some(pod.metadata()),
            state: pod.state.to_proto() as i32,
            created_at: pod.created_at,
            network: Some(PodSandboxNetworkStatus {
                ip: self.ip_address.clone(),
            }),
            linux: Some(LinuxPodSandboxStatus {}),
            labels: pod.labels.clone(),
            annotations: pod.annotations.clone(),
            runtime_handler: String::new(),
        };

        Ok(PodSandboxStatusResponse {
            status: Some(status),
            info: Default::default(),
        })
    }

    pub async fn list_pod_sandbox(
        &self,
        req: ListPodSandboxRequest,
    ) -> Result<ListPodSandboxResponse, RuntimeError> {
        let mut pods = self.list_sandboxes().await;
        if let Some(filter) = &req.filter {
            pods = filter_pods(pods, filter);
        }

        let items = pods.iter().map(Sandbox::to_cri).collect();
        Ok(ListPodSandboxResponse { items })
    }
}

fn filter_pods(pods: Vec<Sandbox>, filter: &PodSandboxFilter) -> Vec<Sandbox> {
    let pods = filter_pods_by_id(&filter.id, pods);
    let pods = filter_pods_by_label(&filter.label_selector, pods);
    filter_pods_by_state(filter.state.as_ref().map(|s| s.state), pods)
}

fn filter_pods_by_id(id: &str, pods: Vec<Sandbox>) -> Vec<Sandbox> {
    if id.is_empty() {
        return pods;
    }
    pods.into_iter().filter(|pod| pod.id == id).collect()
}

pub(crate) fn labels_match(selector: &HashMap<String, String>, labels: &HashMap<String, String>) -> bool {
    selector
        .iter()
        .all(|(k, v)| labels.get(k).is_some_and(|have| have == v))
}

fn filter_pods_by_label(
    selector: &HashMap<String, String>,
    pods: Vec<Sandbox>,
) -> Vec<Sandbox> {
    if selector.is_empty() {
        return pods;
    }
    pods.into_iter()
        .filter(|pod| labels_match(selector, &pod.labels))
        .collect()
}

fn filter_pods_by_state(state: Option<i32>, pods: Vec<Sandbox>) -> Vec<Sandbox> {
    let Some(state) = state else {
        return pods;
    };
    pods.into_iter()
        .filter(|pod| pod.state.to_proto() as i32 == state)
        .collect()
}
