//! Ordered transform stages over an [`AssetModel`]
//!
//! Stages run strictly in sequence. After each one the pipeline re-checks the
//! closed-model invariant, that every accessor kept its `count`, and that no
//! mesh, primitive, attribute or index list went missing. Any failure is a
//! [`PipelineError::InvariantViolation`].

mod extensions;
mod prune;
mod quantize;

pub use extensions::DeclareExtensions;
pub use prune::PruneBuffers;
pub use quantize::{QuantizePositions, KHR_MESH_QUANTIZATION};

use serde::Deserialize;
use std::collections::BTreeMap;

use crate::error::{PipelineError, Result};
use crate::model::AssetModel;

/// One transform step
///
/// A stage consumes a closed model and must return a closed model. It may add
/// or rewrite accessors, buffer views, and buffers, and declare extensions,
/// but it never changes an accessor's `count`.
pub trait Stage: Send + Sync {
    fn name(&self) -> &str;

    fn apply(&self, model: AssetModel) -> Result<AssetModel>;

    /// Whether the stage may drop meshes, primitives, attributes or indices
    fn removes_attributes(&self) -> bool {
        false
    }
}

/// Stage backed by a closure
pub struct FnStage<F> {
    name: String,
    f: F,
}

/// Wrap a closure as a named stage
pub fn stage_fn<F>(name: impl Into<String>, f: F) -> FnStage<F>
where
    F: Fn(AssetModel) -> Result<AssetModel> + Send + Sync,
{
    FnStage {
        name: name.into(),
        f,
    }
}

impl<F> Stage for FnStage<F>
where
    F: Fn(AssetModel) -> Result<AssetModel> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, model: AssetModel) -> Result<AssetModel> {
        (self.f)(model)
    }
}

/// Stage selection as written in a pipeline config file
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "name", rename_all = "kebab-case")]
pub enum StageConfig {
    QuantizePositions {
        #[serde(default = "default_position_bits")]
        position_bits: u8,
    },
    DeclareExtensions {
        #[serde(default)]
        used: Vec<String>,
        #[serde(default)]
        required: Vec<String>,
    },
    PruneBuffers,
}

fn default_position_bits() -> u8 {
    quantize::DEFAULT_POSITION_BITS
}

impl StageConfig {
    pub fn build(&self) -> Result<Box<dyn Stage>> {
        let stage: Box<dyn Stage> = match self {
            Self::QuantizePositions { position_bits } => {
                Box::new(QuantizePositions::new(*position_bits)?)
            }
            Self::DeclareExtensions { used, required } => {
                Box::new(DeclareExtensions::new(used.clone(), required.clone()))
            }
            Self::PruneBuffers => Box::new(PruneBuffers),
        };
        Ok(stage)
    }
}

/// Attribute names and accessor counts of one primitive
type PrimitiveShape = (BTreeMap<String, u64>, Option<u64>);

/// What a stage must leave intact: accessor counts and primitive shapes
struct Signature {
    accessor_counts: Vec<u64>,
    meshes: Vec<Vec<PrimitiveShape>>,
}

impl Signature {
    fn of(model: &AssetModel) -> Self {
        let accessor_counts: Vec<u64> = model
            .root
            .accessors
            .iter()
            .map(|accessor| accessor.count.0)
            .collect();
        let count = |index: usize| accessor_counts.get(index).copied().unwrap_or(0);
        let meshes = model
            .root
            .meshes
            .iter()
            .map(|mesh| {
                mesh.primitives
                    .iter()
                    .map(|primitive| {
                        let attributes = primitive
                            .attributes
                            .iter()
                            .map(|(semantic, accessor)| {
                                (semantic_name(semantic), count(accessor.value()))
                            })
                            .collect();
                        (attributes, primitive.indices.map(|i| count(i.value())))
                    })
                    .collect()
            })
            .collect();
        Self {
            accessor_counts,
            meshes,
        }
    }

    /// Compare against the signature taken after a stage ran
    fn check(&self, after: &Signature, allow_removal: bool) -> std::result::Result<(), String> {
        for (i, old) in self.accessor_counts.iter().enumerate() {
            match after.accessor_counts.get(i) {
                None => return Err(format!("accessor {i} was removed")),
                Some(new) if new != old => {
                    return Err(format!("accessor {i} count changed {old} -> {new}"))
                }
                _ => {}
            }
        }

        if after.meshes.len() < self.meshes.len() && !allow_removal {
            return Err(format!(
                "mesh count dropped {} -> {}",
                self.meshes.len(),
                after.meshes.len()
            ));
        }
        for (m, (old_mesh, new_mesh)) in self.meshes.iter().zip(&after.meshes).enumerate() {
            if new_mesh.len() < old_mesh.len() && !allow_removal {
                return Err(format!(
                    "mesh {m} primitive count dropped {} -> {}",
                    old_mesh.len(),
                    new_mesh.len()
                ));
            }
            for (p, ((old_attrs, old_indices), (new_attrs, new_indices))) in
                old_mesh.iter().zip(new_mesh).enumerate()
            {
                for (name, old_count) in old_attrs {
                    match new_attrs.get(name) {
                        Some(new_count) if new_count != old_count => {
                            return Err(format!(
                                "mesh {m} primitive {p} attribute {name} count changed {old_count} -> {new_count}"
                            ))
                        }
                        None if !allow_removal => {
                            return Err(format!("mesh {m} primitive {p} lost attribute {name}"))
                        }
                        _ => {}
                    }
                }
                match (old_indices, new_indices) {
                    (Some(old), Some(new)) if old != new => {
                        return Err(format!(
                            "mesh {m} primitive {p} index count changed {old} -> {new}"
                        ))
                    }
                    (Some(_), None) if !allow_removal => {
                        return Err(format!("mesh {m} primitive {p} lost its indices"))
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }
}

fn semantic_name(
    semantic: &gltf_json::validation::Checked<gltf_json::mesh::Semantic>,
) -> String {
    match semantic {
        gltf_json::validation::Checked::Valid(semantic) => semantic.to_string(),
        gltf_json::validation::Checked::Invalid => "<invalid>".to_string(),
    }
}

/// Ordered list of stages run over one model at a time
///
/// Holds no per-run state, so one pipeline can process several models from
/// different threads.
#[derive(Default)]
pub struct StagePipeline {
    stages: Vec<Box<dyn Stage>>,
}

impl StagePipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_configs(configs: &[StageConfig]) -> Result<Self> {
        let stages = configs
            .iter()
            .map(StageConfig::build)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { stages })
    }

    pub fn with_stage(mut self, stage: impl Stage + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    pub fn push(&mut self, stage: Box<dyn Stage>) {
        self.stages.push(stage);
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    /// Run every stage in order, checking the model between stages
    pub fn run(&self, model: AssetModel) -> Result<AssetModel> {
        model
            .check_closed()
            .map_err(|detail| PipelineError::invariant("<input>", detail))?;

        let mut model = model;
        for stage in &self.stages {
            let before = Signature::of(&model);
            let accessors = model.root.accessors.len();

            tracing::debug!("Running stage {}", stage.name());
            model = stage.apply(model)?;

            model
                .check_closed()
                .map_err(|detail| PipelineError::invariant(stage.name(), detail))?;
            before
                .check(&Signature::of(&model), stage.removes_attributes())
                .map_err(|detail| PipelineError::invariant(stage.name(), detail))?;

            tracing::debug!(
                "Stage {} done: {} -> {} accessors, {} buffers",
                stage.name(),
                accessors,
                model.root.accessors.len(),
                model.root.buffers.len()
            );
        }
        Ok(model)
    }
}
