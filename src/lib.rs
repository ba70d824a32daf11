pub mod calibrate;
pub mod config;
pub mod controller;
pub mod matcher;
pub mod recognizer;
pub mod runtime;
pub mod scheduler;
pub mod stability;
pub mod store;

// Re-export vision types for convenience
pub use facegate_vision::{face, pipeline, Detection, Embedding, Pipeline};

pub use controller::{AccessConfig, AccessController, AccessPhase, Handoff, Status, Update};
pub use matcher::{FrameLabel, MatchResult};
pub use runtime::{AccessService, Output, Signal};
pub use store::{EmbeddingStore, StoreSource};
