//! Removal of buffer views and buffers nothing references

use super::Stage;
use crate::error::{PipelineError, Result};
use crate::model::{accessor_views, is_buffer_neutral, AssetModel};

const NAME: &str = "prune-buffers";

/// Drops buffer views unused by accessors and images, then unused buffers
///
/// Does nothing when the document uses an extension that may hold buffer
/// references this stage cannot see.
pub struct PruneBuffers;

impl Stage for PruneBuffers {
    fn name(&self) -> &str {
        NAME
    }

    fn apply(&self, mut model: AssetModel) -> Result<AssetModel> {
        if let Some(extension) = model
            .root
            .extensions_used
            .iter()
            .find(|name| !is_buffer_neutral(name))
        {
            tracing::warn!("Skipping buffer pruning: document uses {extension}");
            return Ok(model);
        }
        if model
            .root
            .meshes
            .iter()
            .flat_map(|mesh| &mesh.primitives)
            .any(|primitive| primitive.extensions.is_some())
        {
            tracing::warn!("Skipping buffer pruning: primitives carry extensions");
            return Ok(model);
        }

        let mut views_used = vec![false; model.root.buffer_views.len()];
        let referenced = model
            .root
            .accessors
            .iter()
            .flat_map(accessor_views)
            .chain(model.root.images.iter().filter_map(|image| image.buffer_view));
        for view in referenced {
            if let Some(flag) = views_used.get_mut(view.value()) {
                *flag = true;
            }
        }
        let removed_views = views_used.iter().filter(|used| !**used).count();
        model
            .remove_buffer_views(&views_used)
            .map_err(|detail| PipelineError::invariant(NAME, detail))?;

        let mut buffers_used = vec![false; model.root.buffers.len()];
        for view in &model.root.buffer_views {
            if let Some(flag) = buffers_used.get_mut(view.buffer.value()) {
                *flag = true;
            }
        }
        let removed_buffers = buffers_used.iter().filter(|used| !**used).count();
        model
            .remove_buffers(&buffers_used)
            .map_err(|detail| PipelineError::invariant(NAME, detail))?;

        tracing::debug!(
            "Pruned {} buffer view(s) and {} buffer(s)",
            removed_views,
            removed_buffers
        );
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extras::{PipelineExtras, ResourceId, ResourceState};
    use crate::resource::ResourceOrigin;
    use crate::stage::{QuantizePositions, StagePipeline};
    use gltf_json as json;

    fn model_with_orphans() -> AssetModel {
        let root: json::Root = serde_json::from_value(serde_json::json!({
            "asset": {"version": "2.0"},
            "buffers": [{"byteLength": 36}, {"byteLength": 16}],
            "bufferViews": [
                {"buffer": 1, "byteLength": 16},
                {"buffer": 0, "byteLength": 36}
            ],
            "accessors": [{"bufferView": 1, "componentType": 5126, "count": 3, "type": "VEC3"}],
            "meshes": [{"primitives": [{"attributes": {"POSITION": 0}}]}],
            "nodes": [{"mesh": 0}]
        }))
        .unwrap();
        let mut extras = PipelineExtras::new(None);
        extras.insert(
            ResourceId::Buffer(0),
            ResourceState::new(vec![0; 36], ResourceOrigin::ContainerChunk),
        );
        extras.insert(
            ResourceId::Buffer(1),
            ResourceState::new(vec![1; 16], ResourceOrigin::Generated),
        );
        AssetModel::new(root, extras)
    }

    #[test]
    fn test_removes_unreferenced_view_and_buffer() {
        let model = PruneBuffers.apply(model_with_orphans()).unwrap();
        model.check_closed().unwrap();
        assert_eq!(model.root.buffer_views.len(), 1);
        assert_eq!(model.root.buffers.len(), 1);
        assert_eq!(model.root.accessors[0].buffer_view.unwrap().value(), 0);
        assert_eq!(model.buffer_bytes(0), Some(&[0u8; 36][..]));
    }

    #[test]
    fn test_unknown_extension_blocks_pruning() {
        let mut model = model_with_orphans();
        model.declare_extension("EXT_meshopt_compression", false);
        let model = PruneBuffers.apply(model).unwrap();
        assert_eq!(model.root.buffer_views.len(), 2);
        assert_eq!(model.root.buffers.len(), 2);
    }

    #[test]
    fn test_prunes_float_positions_after_quantization() {
        let pipeline = StagePipeline::new()
            .with_stage(QuantizePositions::default())
            .with_stage(PruneBuffers);
        let model = pipeline.run(model_with_orphans()).unwrap();

        // Only the quantized position buffer survives
        assert_eq!(model.root.buffers.len(), 1);
        assert_eq!(model.root.buffer_views.len(), 1);
        assert_eq!(model.root.buffers[0].byte_length.0, 24);
    }
}
