//! Generated CRI v1alpha2 types and service traits.

mod proto {
    tonic::include_proto!("runtime.v1alpha2");
}

pub use proto::image_service_server::{ImageService, ImageServiceServer};
pub use proto::runtime_service_server::{RuntimeService, RuntimeServiceServer};
pub use proto::*;
