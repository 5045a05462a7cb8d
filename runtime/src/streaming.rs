use procri_core::{
    AttachRequest, AttachResponse, ExecRequest, ExecResponse, PortForwardRequest,
    PortForwardResponse,
};
use tonic::Status;

/// Boundary to the external kubelet streaming server. Each getter validates
/// the request, registers it for a later client upgrade, and returns the URL
/// token the agent should connect to.
pub trait StreamingServer: Send + Sync {
    fn get_exec(&self, req: &ExecRequest) -> Result<ExecResponse, Status>;
    fn get_attach(&self, req: &AttachRequest) -> Result<AttachResponse, Status>;
    fn get_port_forward(&self, req: &PortForwardRequest) -> Result<PortForwardResponse, Status>;
}
