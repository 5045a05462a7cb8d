use procri_core::ImageService as CriImageService;
use procri_core::{
    ImageFsInfoRequest, ImageFsInfoResponse, ImageStatusRequest, ImageStatusResponse,
    ListImagesRequest, ListImagesResponse, PullImageRequest, PullImageResponse,
    RemoveImageRequest, RemoveImageResponse,
};
use procri_image::ImageRegistry;
use std::sync::Arc;
use tonic::{Request, Response, Status};

pub struct ImageServiceGrpc {
    registry: Arc<ImageRegistry>,
}

impl ImageServiceGrpc {
    pub fn new(registry: Arc<ImageRegistry>) -> Self {
        Self { registry }
    }
}

#[tonic::async_trait]
impl CriImageService for ImageServiceGrpc {
    async fn list_images(
        &self,
        request: Request<ListImagesRequest>,
    ) -> Result<Response<ListImagesResponse>, Status> {
        let req = request.into_inner();
        tracing::debug!("ListImages request {:?}", req);
        let resp = self.registry.list_images(req).await?;
        Ok(Response::new(resp))
    }

    async fn image_status(
        &self,
        request: Request<ImageStatusRequest>,
    ) -> Result<Response<ImageStatusResponse>, Status> {
        let req = request.into_inner();
        tracing::debug!("ImageStatus request {:?}", req);
        let resp = self.registry.image_status(req).await?;
        Ok(Response::new(resp))
    }

    async fn pull_image(
        &self,
        request: Request<PullImageRequest>,
    ) -> Result<Response<PullImageResponse>, Status> {
        let req = request.into_inner();
        tracing::debug!("PullImage request {:?}", req);
        let resp = self.registry.pull_image(req).await?;
        Ok(Response::new(resp))
    }

    async fn remove_image(
        &self,
        request: Request<RemoveImageRequest>,
    ) -> Result<Response<RemoveImageResponse>, Status> {
        let req = request.into_inner();
        tracing::debug!("RemoveImage request {:?}", req);
        let resp = self.registry.remove_image(req).await?;
        Ok(Response::new(resp))
    }

    async fn image_fs_info(
        &self,
        request: Request<ImageFsInfoRequest>,
    ) -> Result<Response<ImageFsInfoResponse>, Status> {
        let req = request.into_inner();
        tracing::debug!("ImageFsInfo request {:?}", req);
        let resp = self.registry.image_fs_info(req).await?;
        Ok(Response::new(resp))
    }
}
