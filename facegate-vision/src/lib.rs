pub mod face;
pub mod pipeline;

// Re-export commonly used types
pub use face::{Detection, Embedding};
pub use pipeline::{FaceDetector, FaceEmbedder, FaceScan, Pipeline};
