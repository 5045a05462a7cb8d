mod error;
mod reference;
mod service;

pub use error::ImageError;
pub use reference::{make_image_key, split_image_reference};
pub use service::ImageRegistry;
