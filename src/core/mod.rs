pub mod deletion;
pub mod duplicate;
pub mod hash;
pub mod metadata;
pub mod perceptual;
pub mod thumbnail;
pub mod video;
