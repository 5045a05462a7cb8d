use crate::error::RuntimeError;
use crate::service::RuntimeService;
use crate::types::now_nanos;
use procri_core::{
    ContainerAttributes, ContainerFilter, ContainerStats, ContainerStatsRequest,
    ContainerStatsResponse, CpuUsage, FilesystemIdentifier, FilesystemUsage,
    ListContainerStatsRequest, ListContainerStatsResponse, ListContainersRequest, MemoryUsage,
    UInt64Value,
};

impl RuntimeService {
    /// Stats shell for one container: live timestamps, zero usage. The
    /// record must exist.
    pub async fn container_stats(
        &self,
        req: ContainerStatsRequest,
    ) -> Result<ContainerStatsResponse, RuntimeError> {
        let cid = req.container_id;

        let Some(container) = self.get_container(&cid).await else {
            return Err(RuntimeError::NotFound(format!(
                "ContainerStats {}: not found",
                cid
            )));
        };

        let timestamp = now_nanos();
        let stats = ContainerStats {
            attributes: Some(ContainerAttributes {
                id: cid,
                metadata: Some(container.metadata()),
                labels: container.labels.clone(),
                annotations: container.annotations.clone(),
            }),
            cpu: Some(CpuUsage {
                timestamp,
                usage_core_nano_seconds: Some(UInt64Value { value: 0 }),
            }),
            memory: Some(MemoryUsage {
                timestamp,
                working_set_bytes: Some(UInt64Value { value: 0 }),
            }),
            writable_layer: Some(FilesystemUsage {
                timestamp,
                fs_id: Some(FilesystemIdentifier {
                    mountpoint: "/".to_string(),
                }),
                used_bytes: Some(UInt64Value { value: 0 }),
                inodes_used: Some(UInt64Value { value: 0 }),
            }),
        };

        Ok(ContainerStatsResponse { stats: Some(stats) })
    }

    pub async fn list_container_stats(
        &self,
        req: ListContainerStatsRequest,
    ) -> Result<ListContainerStatsResponse, RuntimeError> {
        let filter = req.filter.map(|f| ContainerFilter {
            id: f.id,
            state: None,
            pod_sandbox_id: f.pod_sandbox_id,
            label_selector: f.label_selector,
        });

        let listed = self.list_containers(ListContainersRequest { filter }).await?;

        let mut stats = Vec::with_capacity(listed.containers.len());
        for container in listed.containers {
            match self
                .container_stats(ContainerStatsRequest {
                    container_id: container.id.clone(),
                })
                .await
            {
                Ok(resp) => stats.extend(resp.stats),
                Err(e) => {
                    tracing::warn!("ListContainerStats {}: {}", container.id, e);
                }
            }
        }

        Ok(ListContainerStatsResponse { stats })
    }
}
