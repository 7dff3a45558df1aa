//! nether-gltf library
//!
//! Reads glTF 2.0 assets (JSON or binary container), runs an ordered list of
//! transform stages over the decoded model, and writes the result back as
//! JSON with external or embedded resources, or as a binary container.

pub mod config;
pub mod container;
pub mod error;
pub mod extras;
pub mod model;
pub mod process;
pub mod reader;
pub mod resource;
pub mod stage;
pub mod writer;

pub use config::PipelineConfig;
pub use error::{ErrorKind, PipelineError, Result};
pub use extras::{PipelineExtras, ResourceId, ResourceState};
pub use model::AssetModel;
pub use process::{persist, AssetPipeline};
pub use reader::{read, read_root, InputForm, ReadOptions};
pub use resource::{ExternalWrite, ResourceOrigin, ResourceResolver, SourceDescriptor};
pub use stage::{stage_fn, Stage, StageConfig, StagePipeline};
pub use writer::{write, WriteOptions, WriteOutput};
