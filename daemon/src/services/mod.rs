mod image;
mod runtime;

pub use image::ImageServiceGrpc;
pub use runtime::RuntimeServiceGrpc;
