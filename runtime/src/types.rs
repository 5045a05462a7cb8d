use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxState {
    Ready,
    NotReady,
}

impl SandboxState {
    pub fn to_proto(self) -> procri_core::PodSandboxState {
        match self {
            SandboxState::Ready => procri_core::PodSandboxState::SandboxReady,
            SandboxState::NotReady => procri_core::PodSandboxState::SandboxNotready,
        }
    }
}

impl std::fmt::Display for SandboxState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SandboxState::Ready => write!(f, "ready"),
            SandboxState::NotReady => write!(f, "notready"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    Created,
    Running,
    Exited,
    Unknown,
}

impl ContainerState {
    pub fn to_proto(self) -> procri_core::ContainerState {
        match self {
            ContainerState::Created => procri_core::ContainerState::ContainerCreated,
            ContainerState::Running => procri_core::ContainerState::ContainerRunning,
            ContainerState::Exited => procri_core::ContainerState::ContainerExited,
            ContainerState::Unknown => procri_core::ContainerState::ContainerUnknown,
        }
    }
}

impl std::fmt::Display for ContainerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContainerState::Created => write!(f, "created"),
            ContainerState::Running => write!(f, "running"),
            ContainerState::Exited => write!(f, "exited"),
            ContainerState::Unknown => write!(f, "unknown"),
        }
    }
}

/// Pod-level grouping. Purely a record; there is no isolation behind it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sandbox {
    pub id: String,
    pub name: String,
    pub namespace: String,
    pub uid: String,
    pub attempt: u32,
    pub created_at: i64,
    pub hostname: String,
    pub log_directory: String,
    pub state: SandboxState,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    #[serde(default)]
    pub containers: Vec<String>,
}

impl Sandbox {
    pub(crate) fn metadata(&self) -> procri_core::PodSandboxMetadata {
        procri_core::PodSandboxMetadata {
            name: self.name.clone(),
            uid: self.uid.clone(),
            namespace: self.namespace.clone(),
            attempt: self.attempt,
        }
    }

    pub(crate) fn to_cri(&self) -> procri_core::PodSandbox {
        procri_core::PodSandbox {
            id: self.id.clone(),
            metadata: Some(self.metadata()),
            state: self.state.to_proto() as i32,
            created_at: self.created_at,
            labels: self.labels.clone(),
            annotations: self.annotations.clone(),
            runtime_handler: String::new(),
        }
    }
}

/// A single supervised host process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    pub id: String,
    pub pod_id: String,
    pub name: String,
    pub attempt: u32,
    pub image: String,
    pub command: Vec<String>,
    pub args: Vec<String>,
    pub env: Vec<String>,
    pub working_dir: String,
    pub log_path: String,
    pub pid: i32,
    pub created_at: i64,
    pub started_at: i64,
    pub finished_at: i64,
    pub exit_code: i32,
    pub state: ContainerState,
    // Incremented at each spawn; the supervisor's terminal write applies
    // only if the record still carries the generation it started with.
    #[serde(default)]
    pub generation: u64,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
}

impl Container {
    pub(crate) fn metadata(&self) -> procri_core::ContainerMetadata {
        procri_core::ContainerMetadata {
            name: self.name.clone(),
            attempt: self.attempt,
        }
    }

    pub(crate) fn to_cri(&self) -> procri_core::Container {
        procri_core::Container {
            id: self.id.clone(),
            pod_sandbox_id: self.pod_id.clone(),
            metadata: Some(self.metadata()),
            image: Some(procri_core::ImageSpec {
                image: self.image.clone(),
                ..Default::default()
            }),
            image_ref: self.image.clone(),
            state: self.state.to_proto() as i32,
            created_at: self.created_at,
            labels: self.labels.clone(),
            annotations: self.annotations.clone(),
        }
    }

    pub(crate) fn to_status(&self) -> procri_core::ContainerStatus {
        procri_core::ContainerStatus {
            id: self.id.clone(),
            metadata: Some(self.metadata()),
            state: self.state.to_proto() as i32,
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
            exit_code: self.exit_code,
            image: Some(procri_core::ImageSpec {
                image: self.image.clone(),
                ..Default::default()
            }),
            image_ref: self.image.clone(),
            reason: String::new(),
            message: String::new(),
            labels: self.labels.clone(),
            annotations: self.annotations.clone(),
            mounts: Vec::new(),
            log_path: self.log_path.clone(),
        }
    }
}

pub(crate) fn now_nanos() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or_default()
}
