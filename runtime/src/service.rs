use crate::error::RuntimeError;
use crate::streaming::StreamingServer;
use crate::types::{Container, Sandbox};
use procri_core::{
    AttachRequest, AttachResponse, ExecRequest, ExecResponse, PortForwardRequest,
    PortForwardResponse, RuntimeCondition, RuntimeStatus, StatusRequest, StatusResponse,
    UpdateRuntimeConfigRequest, UpdateRuntimeConfigResponse, VersionRequest, VersionResponse,
};
use procri_store::DiskStore;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tonic::Status;

pub(crate) const SANDBOX_SUBDIR: &str = "sandbox";
pub(crate) const SANDBOX_PREFIX: &str = "sb_";
pub(crate) const CONTAINER_SUBDIR: &str = "container";
pub(crate) const CONTAINER_PREFIX: &str = "cnt_";

const RUNTIME_NAME: &str = "procri";
const RUNTIME_API_VERSION: &str = "0.0.0";

pub(crate) fn make_sandbox_key(id: &str) -> String {
    format!("{}/{}{}", SANDBOX_SUBDIR, SANDBOX_PREFIX, id)
}

pub(crate) fn make_container_key(id: &str) -> String {
    format!("{}/{}{}", CONTAINER_SUBDIR, CONTAINER_PREFIX, id)
}

/// Per-key async mutexes guarding read-modify-write sequences against the
/// store, which itself only offers single-key atomicity.
pub(crate) struct KeyLocks {
    inner: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyLocks {
    fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let entry = {
            let mut table = self.inner.lock().await;
            table.entry(key.to_string()).or_default().clone()
        };
        entry.lock_owned().await
    }
}

/// The CRI runtime state machine: pod sandboxes and containers persisted to
/// the store, host processes supervised in the background.
pub struct RuntimeService {
    pub(crate) streaming_server: Arc<dyn StreamingServer>,
    pub(crate) store: DiskStore,
    pub(crate) locks: KeyLocks,
    pub(crate) ip_address: String,
    runtime_version: String,
}

impl RuntimeService {
    pub async fn new(
        streaming_server: Arc<dyn StreamingServer>,
        ip_address: String,
        store: DiskStore,
        runtime_version: String,
    ) -> Result<Self, RuntimeError> {
        store.ensure_subdir(SANDBOX_SUBDIR).await?;
        store.ensure_subdir(CONTAINER_SUBDIR).await?;

        Ok(Self {
            streaming_server,
            store,
            locks: KeyLocks::new(),
            ip_address,
            runtime_version,
        })
    }

    //
    // Record accessors. Read failures and undecodable records count as
    // record-absent; write failures are logged and leave state untouched.
    //

    pub(crate) async fn get_sandbox(&self, id: &str) -> Option<Sandbox> {
        let key = make_sandbox_key(id);
        let buf = match self.store.read(&key).await {
            Ok(buf) => buf,
            Err(e) => {
                tracing::debug!("looking up {}: {}", key, e);
                return None;
            }
        };
        match serde_json::from_slice(&buf) {
            Ok(sandbox) => Some(sandbox),
            Err(e) => {
                tracing::error!("deserializing data for {}: {}", key, e);
                None
            }
        }
    }

    pub(crate) async fn put_sandbox(&self, id: &str, sandbox: &Sandbox) {
        let key = make_sandbox_key(id);
        let buf = match serde_json::to_vec(sandbox) {
            Ok(buf) => buf,
            Err(e) => {
                tracing::error!("serializing data for {}: {}", key, e);
                return;
            }
        };
        if let Err(e) = self.store.write(&key, &buf).await {
            tracing::error!("storing {}: {}", key, e);
        }
    }

    pub(crate) async fn delete_sandbox(&self, id: &str) -> bool {
        let key = make_sandbox_key(id);
        if let Err(e) = self.store.erase(&key).await {
            tracing::error!("deleting {}: {}", key, e);
            return false;
        }
        true
    }

    pub(crate) async fn list_sandboxes(&self) -> Vec<Sandbox> {
        let mut list = Vec::new();
        for key in self.store_keys().await {
            let Some(id) = key.strip_prefix(SANDBOX_PREFIX) else {
                continue;
            };
            if let Some(sandbox) = self.get_sandbox(id).await {
                list.push(sandbox);
            }
        }
        list
    }

    pub(crate) async fn get_container(&self, id: &str) -> Option<Container> {
        let key = make_container_key(id);
        let buf = match self.store.read(&key).await {
            Ok(buf) => buf,
            Err(e) => {
                tracing::debug!("looking up {}: {}", key, e);
                return None;
            }
        };
        match serde_json::from_slice(&buf) {
            Ok(container) => Some(container),
            Err(e) => {
                tracing::error!("deserializing data for {}: {}", key, e);
                None
            }
        }
    }

    pub(crate) async fn put_container(&self, id: &str, container: &Container) {
        let key = make_container_key(id);
        let buf = match serde_json::to_vec(container) {
            Ok(buf) => buf,
            Err(e) => {
                tracing::error!("serializing data for {}: {}", key, e);
                return;
            }
        };
        if let Err(e) = self.store.write(&key, &buf).await {
            tracing::error!("storing {}: {}", key, e);
        }
    }

    pub(crate) async fn delete_container(&self, id: &str) -> bool {
        let key = make_container_key(id);
        if let Err(e) = self.store.erase(&key).await {
            tracing::error!("deleting {}: {}", key, e);
            return false;
        }
        true
    }

    pub(crate) async fn list_containers_internal(&self) -> Vec<Container> {
        let mut list = Vec::new();
        for key in self.store_keys().await {
            let Some(id) = key.strip_prefix(CONTAINER_PREFIX) else {
                continue;
            };
            if let Some(container) = self.get_container(id).await {
                list.push(container);
            }
        }
        list
    }

    async fn store_keys(&self) -> Vec<String> {
        match self.store.keys().await {
            Ok(keys) => keys,
            Err(e) => {
                tracing::error!("listing store keys: {}", e);
                Vec::new()
            }
        }
    }

    //
    // Runtime-level calls.
    //

    pub async fn version(&self, req: VersionRequest) -> Result<VersionResponse, RuntimeError> {
        Ok(VersionResponse {
            // Version of the kubelet runtime API, echoed back.
            version: req.version,
            runtime_name: RUNTIME_NAME.to_string(),
            // These two must be semver-compatible.
            runtime_version: convert_to_semver(&self.runtime_version),
            runtime_api_version: RUNTIME_API_VERSION.to_string(),
        })
    }

    pub async fn runtime_status(&self, _req: StatusRequest) -> Result<StatusResponse, RuntimeError> {
        let conditions = vec![
            RuntimeCondition {
                r#type: "RuntimeReady".to_string(),
                status: true,
                reason: String::new(),
                message: String::new(),
            },
            RuntimeCondition {
                r#type: "NetworkReady".to_string(),
                status: true,
                reason: String::new(),
                message: String::new(),
            },
        ];

        Ok(StatusResponse {
            status: Some(RuntimeStatus { conditions }),
            info: Default::default(),
        })
    }

    pub async fn update_runtime_config(
        &self,
        req: UpdateRuntimeConfigRequest,
    ) -> Result<UpdateRuntimeConfigResponse, RuntimeError> {
        tracing::debug!("UpdateRuntimeConfig request {:?}", req);
        Ok(UpdateRuntimeConfigResponse {})
    }

    //
    // Streaming calls hand off to the external streaming server, which
    // returns the URL the client upgrades against.
    //

    pub fn exec(&self, req: ExecRequest) -> Result<ExecResponse, Status> {
        tracing::debug!("Exec {:?}", req);
        self.streaming_server.get_exec(&req)
    }

    pub fn attach(&self, req: AttachRequest) -> Result<AttachResponse, Status> {
        tracing::debug!("Attach {:?}", req);
        self.streaming_server.get_attach(&req)
    }

    pub fn port_forward(&self, req: PortForwardRequest) -> Result<PortForwardResponse, Status> {
        tracing::debug!("PortForward {:?}", req);
        self.streaming_server.get_port_forward(&req)
    }
}

/// Reduce a build version (possibly `git describe` output such as
/// `v0.1.0-12-gf102854-dirty`) to the bare semver tag.
fn convert_to_semver(build_version: &str) -> String {
    build_version
        .split('-')
        .next()
        .unwrap_or(build_version)
        .to_string()
}

/// First non-loopback IPv4 interface address, used for the streaming server
/// bind address and the sandbox network status.
pub fn host_ip_address() -> String {
    match nix::ifaddrs::getifaddrs() {
        Ok(addrs) => {
            for ifaddr in addrs {
                if ifaddr
                    .flags
                    .contains(nix::net::if_::InterfaceFlags::IFF_LOOPBACK)
                {
                    continue;
                }
                let Some(address) = ifaddr.address else {
                    continue;
                };
                if let Some(sin) = address.as_sockaddr_in() {
                    return sin.ip().to_string();
                }
            }
        }
        Err(e) => {
            tracing::warn!("getifaddrs(): {}", e);
        }
    }
    "127.0.0.1".to_string()
}
