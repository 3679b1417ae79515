mod jpeg;
mod magic;
mod normalize;

pub use jpeg::dimensions as jpeg_dimensions;
pub use magic::{sniff, ImageKind};
pub use normalize::{downscale_for_provider, normalize, MediaError, NormalizedImage};
