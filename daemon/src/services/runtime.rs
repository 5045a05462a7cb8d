use procri_core::RuntimeService as CriRuntimeService;
use procri_core::{
    AttachRequest, AttachResponse, ContainerStatsRequest, ContainerStatsResponse,
    ContainerStatusRequest, ContainerStatusResponse, CreateContainerRequest,
    CreateContainerResponse, ExecRequest, ExecResponse, ExecSyncRequest, ExecSyncResponse,
    ListContainerStatsRequest, ListContainerStatsResponse, ListContainersRequest,
    ListContainersResponse, ListPodSandboxRequest, ListPodSandboxResponse, PodSandboxStatusRequest,
    PodSandboxStatusResponse, PortForwardRequest, PortForwardResponse, ReopenContainerLogRequest,
    ReopenContainerLogResponse, RemoveContainerRequest, RemoveContainerResponse,
    RemovePodSandboxRequest, RemovePodSandboxResponse, RunPodSandboxRequest, RunPodSandboxResponse,
    StartContainerRequest, StartContainerResponse, StatusRequest, StatusResponse,
    StopContainerRequest, StopContainerResponse, StopPodSandboxRequest, StopPodSandboxResponse,
    UpdateContainerResourcesRequest, UpdateContainerResourcesResponse, UpdateRuntimeConfigRequest,
    UpdateRuntimeConfigResponse, VersionRequest, VersionResponse,
};
use procri_runtime::RuntimeService;
use std::sync::Arc;
use tonic::{Request, Response, Status};

pub struct RuntimeServiceGrpc {
    runtime: Arc<RuntimeService>,
}

impl RuntimeServiceGrpc {
    pub fn new(runtime: Arc<RuntimeService>) -> Self {
        Self { runtime }
    }
}

#[tonic::async_trait]
impl CriRuntimeService for RuntimeServiceGrpc {
    async fn version(
        &self,
        request: Request<VersionRequest>,
    ) -> Result<Response<VersionResponse>, Status> {
        let resp = self.runtime.version(request.into_inner()).await?;
        Ok(Response::new(resp))
    }

    async fn run_pod_sandbox(
        &self,
        request: Request<RunPodSandboxRequest>,
    ) -> Result<Response<RunPodSandboxResponse>, Status> {
        let req = request.into_inner();
        tracing::debug!("RunPodSandbox request {:?}", req);
        let resp = self.runtime.run_pod_sandbox(req).await?;
        Ok(Response::new(resp))
    }

    async fn stop_pod_sandbox(
        &self,
        request: Request<StopPodSandboxRequest>,
    ) -> Result<Response<StopPodSandboxResponse>, Status> {
        let req = request.into_inner();
        tracing::debug!("StopPodSandbox request {:?}", req);
        let resp = self.runtime.stop_pod_sandbox(req).await?;
        Ok(Response::new(resp))
    }

    async fn remove_pod_sandbox(
        &self,
        request: Request<RemovePodSandboxRequest>,
    ) -> Result<Response<RemovePodSandboxResponse>, Status> {
        let req = request.into_inner();
        tracing::debug!("RemovePodSandbox request {:?}", req);
        let resp = self.runtime.remove_pod_sandbox(req).await?;
        Ok(Response::new(resp))
    }

    async fn pod_sandbox_status(
        &self,
        request: Request<PodSandboxStatusRequest>,
    ) -> Result<Response<PodSandboxStatusResponse>, Status> {
        let resp = self.runtime.pod_sandbox_status(request.into_inner()).await?;
        Ok(Response::new(resp))
    }

    async fn list_pod_sandbox(
        &self,
        request: Request<ListPodSandboxRequest>,
    ) -> Result<Response<ListPodSandboxResponse>, Status> {
        let resp = self.runtime.list_pod_sandbox(request.into_inner()).await?;
        Ok(Response::new(resp))
    }

    async fn create_container(
        &self,
        request: Request<CreateContainerRequest>,
    ) -> Result<Response<CreateContainerResponse>, Status> {
        let req = request.into_inner();
        tracing::debug!("CreateContainer request {:?}", req);
        let resp = self.runtime.create_container(req).await?;
        Ok(Response::new(resp))
    }

    async fn start_container(
        &self,
        request: Request<StartContainerRequest>,
    ) -> Result<Response<StartContainerResponse>, Status> {
        let req = request.into_inner();
        tracing::debug!("StartContainer request {:?}", req);
        let resp = self.runtime.clone().start_container(req).await?;
        Ok(Response::new(resp))
    }

    async fn stop_container(
        &self,
        request: Request<StopContainerRequest>,
    ) -> Result<Response<StopContainerResponse>, Status> {
        let req = request.into_inner();
        tracing::debug!("StopContainer request {:?}", req);
        let resp = self.runtime.stop_container(req).await?;
        Ok(Response::new(resp))
    }

    async fn remove_container(
        &self,
        request: Request<RemoveContainerRequest>,
    ) -> Result<Response<RemoveContainerResponse>, Status> {
        let req = request.into_inner();
        tracing::debug!("RemoveContainer request {:?}", req);
        let resp = self.runtime.remove_container(req).await?;
        Ok(Response::new(resp))
    }

    async fn list_containers(
        &self,
        request: Request<ListContainersRequest>,
    ) -> Result<Response<ListContainersResponse>, Status> {
        let resp = self.runtime.list_containers(request.into_inner()).await?;
        Ok(Response::new(resp))
    }

    async fn container_status(
        &self,
        request: Request<ContainerStatusRequest>,
    ) -> Result<Response<ContainerStatusResponse>, Status> {
        let resp = self.runtime.container_status(request.into_inner()).await?;
        Ok(Response::new(resp))
    }

    async fn update_container_resources(
        &self,
        request: Request<UpdateContainerResourcesRequest>,
    ) -> Result<Response<UpdateContainerResourcesResponse>, Status> {
        let resp = self
            .runtime
            .update_container_resources(request.into_inner())
            .await?;
        Ok(Response::new(resp))
    }

    async fn reopen_container_log(
        &self,
        request: Request<ReopenContainerLogRequest>,
    ) -> Result<Response<ReopenContainerLogResponse>, Status> {
        let resp = self
            .runtime
            .reopen_container_log(request.into_inner())
            .await?;
        Ok(Response::new(resp))
    }

    async fn exec_sync(
        &self,
        request: Request<ExecSyncRequest>,
    ) -> Result<Response<ExecSyncResponse>, Status> {
        let req = request.into_inner();
        tracing::debug!("ExecSync request {:?}", req);
        let result = self.runtime.exec_sync(req).await?;

        if result.timed_out {
            return Err(procri_runtime::RuntimeError::Timeout("command".to_string()).into());
        }
        if result.exit_code != 0 {
            return Err(Status::internal(format!(
                "command exited with status {}",
                result.exit_code
            )));
        }

        Ok(Response::new(ExecSyncResponse {
            stdout: result.stdout,
            stderr: result.stderr,
            exit_code: result.exit_code,
        }))
    }

    async fn exec(&self, request: Request<ExecRequest>) -> Result<Response<ExecResponse>, Status> {
        let resp = self.runtime.exec(request.into_inner())?;
        Ok(Response::new(resp))
    }

    async fn attach(
        &self,
        request: Request<AttachRequest>,
    ) -> Result<Response<AttachResponse>, Status> {
        let resp = self.runtime.attach(request.into_inner())?;
        Ok(Response::new(resp))
    }

    async fn port_forward(
        &self,
        request: Request<PortForwardRequest>,
    ) -> Result<Response<PortForwardResponse>, Status> {
        let resp = self.runtime.port_forward(request.into_inner())?;
        Ok(Response::new(resp))
    }

    async fn container_stats(
        &self,
        request: Request<ContainerStatsRequest>,
    ) -> Result<Response<ContainerStatsResponse>, Status> {
        let resp = self.runtime.container_stats(request.into_inner()).await?;
        Ok(Response::new(resp))
    }

    async fn list_container_stats(
        &self,
        request: Request<ListContainerStatsRequest>,
    ) -> Result<Response<ListContainerStatsResponse>, Status> {
        let resp = self
            .runtime
            .list_container_stats(request.into_inner())
            .await?;
        Ok(Response::new(resp))
    }

    async fn update_runtime_config(
        &self,
        request: Request<UpdateRuntimeConfigRequest>,
    ) -> Result<Response<UpdateRuntimeConfigResponse>, Status> {
        let resp = self
            .runtime
            .update_runtime_config(request.into_inner())
            .await?;
        Ok(Response::new(resp))
    }

    async fn status(
        &self,
        request: Request<StatusRequest>,
    ) -> Result<Response<StatusResponse>, Status> {
        let resp = self.runtime.runtime_status(request.into_inner()).await?;
        Ok(Response::new(resp))
    }
}
