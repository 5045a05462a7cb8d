use crate::service::RuntimeService;
use crate::streaming::StreamingServer;
use procri_core::{
    AttachRequest, AttachResponse, ExecRequest, ExecResponse, PortForwardRequest,
    PortForwardResponse,
};
use procri_store::DiskStore;
use std::sync::Arc;
use tempfile::TempDir;
use tonic::Status;

pub(crate) struct NullStreaming;

impl StreamingServer for NullStreaming {
    fn get_exec(&self, _req: &ExecRequest) -> Result<ExecResponse, Status> {
        Err(Status::unimplemented("test"))
    }
    fn get_attach(&self, _req: &AttachRequest) -> Result<AttachResponse, Status> {
        Err(Status::unimplemented("test"))
    }
    fn get_port_forward(&self, _req: &PortForwardRequest) -> Result<PortForwardResponse, Status> {
        Err(Status::unimplemented("test"))
    }
}

pub(crate) async fn create_test_service() -> (Arc<RuntimeService>, TempDir) {
    let dir = TempDir::new().unwrap();
    let store = DiskStore::new(dir.path()).await.unwrap();
    let service = RuntimeService::new(
        Arc::new(NullStreaming),
        "127.0.0.1".to_string(),
        store,
        "0.1.0".to_string(),
    )
    .await
    .unwrap();
    (Arc::new(service), dir)
}
