//! In-memory asset graph
//!
//! The document is a `gltf_json::Root`; cross references are integer indices.
//! A model is *closed* when every index resolves, every byte span fits inside
//! the view or buffer it points into, and every buffer and image has decoded
//! bytes in the side-table.

use gltf_json as json;
use json::accessor::{ComponentType, Type};
use json::validation::Checked::Valid;

use crate::extras::{PipelineExtras, ResourceId, ResourceState};
use crate::resource::ResourceOrigin;

/// Document graph plus its transient resource state
#[derive(Debug, Clone)]
pub struct AssetModel {
    pub root: json::Root,
    pub extras: PipelineExtras,
}

impl AssetModel {
    pub fn new(root: json::Root, extras: PipelineExtras) -> Self {
        Self { root, extras }
    }

    pub fn into_parts(self) -> (json::Root, PipelineExtras) {
        (self.root, self.extras)
    }

    pub fn buffer_bytes(&self, index: usize) -> Option<&[u8]> {
        self.extras.bytes(ResourceId::Buffer(index))
    }

    pub fn image_bytes(&self, index: usize) -> Option<&[u8]> {
        self.extras.bytes(ResourceId::Image(index))
    }

    /// Append a buffer holding `bytes` and register its payload
    pub fn push_buffer(&mut self, bytes: Vec<u8>, name: Option<String>) -> json::Index<json::Buffer> {
        let index = self.root.buffers.len();
        self.root.buffers.push(json::Buffer {
            byte_length: bytes.len().into(),
            extensions: Default::default(),
            extras: Default::default(),
            name,
            uri: None,
        });
        self.extras.insert(
            ResourceId::Buffer(index),
            ResourceState::new(bytes, ResourceOrigin::Generated),
        );
        json::Index::new(index as u32)
    }

    /// Add an extension name to `extensionsUsed`, and to `extensionsRequired` if asked
    pub fn declare_extension(&mut self, name: &str, required: bool) {
        if !self.root.extensions_used.iter().any(|used| used == name) {
            self.root.extensions_used.push(name.to_string());
        }
        if required && !self.root.extensions_required.iter().any(|req| req == name) {
            self.root.extensions_required.push(name.to_string());
        }
    }

    /// Full closure check: graph references, spans, and decoded payloads
    pub fn check_closed(&self) -> Result<(), String> {
        check_graph(&self.root)?;
        self.check_resources()
    }

    fn check_resources(&self) -> Result<(), String> {
        for (i, buffer) in self.root.buffers.iter().enumerate() {
            let bytes = self
                .buffer_bytes(i)
                .ok_or_else(|| format!("buffer {i} has no resolved source"))?;
            if bytes.len() as u64 != buffer.byte_length.0 {
                return Err(format!(
                    "buffer {i} declares {} bytes but holds {}",
                    buffer.byte_length.0,
                    bytes.len()
                ));
            }
        }
        for i in 0..self.root.images.len() {
            if self.image_bytes(i).is_none() {
                return Err(format!("image {i} has no resolved source"));
            }
        }
        Ok(())
    }

    /// Remove buffer views whose `keep` flag is false, remapping every reference
    ///
    /// Fails without touching the model if a removed view is still referenced.
    pub fn remove_buffer_views(&mut self, keep: &[bool]) -> Result<(), String> {
        let map = compaction_map(keep, self.root.buffer_views.len());
        let remap = |index: json::Index<json::buffer::View>| -> Result<_, String> {
            map.get(index.value())
                .copied()
                .flatten()
                .map(|new| json::Index::new(new as u32))
                .ok_or_else(|| format!("buffer view {} is still referenced", index.value()))
        };

        // Validate first so a failure leaves the model untouched
        for accessor in &self.root.accessors {
            for view in accessor_views(accessor) {
                remap(view)?;
            }
        }
        for image in &self.root.images {
            if let Some(view) = image.buffer_view {
                remap(view)?;
            }
        }

        for accessor in &mut self.root.accessors {
            if let Some(view) = accessor.buffer_view {
                accessor.buffer_view = Some(remap(view)?);
            }
            if let Some(sparse) = &mut accessor.sparse {
                sparse.indices.buffer_view = remap(sparse.indices.buffer_view)?;
                sparse.values.buffer_view = remap(sparse.values.buffer_view)?;
            }
        }
        for image in &mut self.root.images {
            if let Some(view) = image.buffer_view {
                image.buffer_view = Some(remap(view)?);
            }
        }
        retain_by_flag(&mut self.root.buffer_views, keep);
        Ok(())
    }

    /// Remove buffers whose `keep` flag is false, remapping views and payloads
    pub fn remove_buffers(&mut self, keep: &[bool]) -> Result<(), String> {
        let map = compaction_map(keep, self.root.buffers.len());
        if let Some((i, view)) = self
            .root
            .buffer_views
            .iter()
            .enumerate()
            .find(|(_, view)| map.get(view.buffer.value()).copied().flatten().is_none())
        {
            return Err(format!(
                "buffer {} is still referenced by buffer view {i}",
                view.buffer.value()
            ));
        }

        for view in &mut self.root.buffer_views {
            if let Some(new) = map.get(view.buffer.value()).copied().flatten() {
                view.buffer = json::Index::new(new as u32);
            }
        }
        retain_by_flag(&mut self.root.buffers, keep);
        self.extras.remap_buffers(&map);
        Ok(())
    }
}

fn compaction_map(keep: &[bool], len: usize) -> Vec<Option<usize>> {
    let mut next = 0;
    (0..len)
        .map(|i| {
            if keep.get(i).copied().unwrap_or(true) {
                next += 1;
                Some(next - 1)
            } else {
                None
            }
        })
        .collect()
}

fn retain_by_flag<T>(items: &mut Vec<T>, keep: &[bool]) {
    let mut i = 0;
    items.retain(|_| {
        let kept = keep.get(i).copied().unwrap_or(true);
        i += 1;
        kept
    });
}

/// Extensions known not to reference buffer views or buffers
pub(crate) fn is_buffer_neutral(extension: &str) -> bool {
    matches!(
        extension,
        "KHR_mesh_quantization" | "KHR_texture_transform" | "KHR_lights_punctual"
    ) || extension.starts_with("KHR_materials_")
}

/// Every buffer view an accessor reads from, sparse storage included
pub(crate) fn accessor_views(
    accessor: &json::Accessor,
) -> impl Iterator<Item = json::Index<json::buffer::View>> + '_ {
    let sparse = accessor
        .sparse
        .iter()
        .flat_map(|sparse| [sparse.indices.buffer_view, sparse.values.buffer_view]);
    accessor.buffer_view.into_iter().chain(sparse)
}

pub fn component_size(component_type: ComponentType) -> u64 {
    match component_type {
        ComponentType::I8 | ComponentType::U8 => 1,
        ComponentType::I16 | ComponentType::U16 => 2,
        ComponentType::U32 | ComponentType::F32 => 4,
    }
}

pub fn component_count(type_: Type) -> u64 {
    match type_ {
        Type::Scalar => 1,
        Type::Vec2 => 2,
        Type::Vec3 => 3,
        Type::Vec4 | Type::Mat2 => 4,
        Type::Mat3 => 9,
        Type::Mat4 => 16,
    }
}

/// Size in bytes of one accessor element, `None` if its type is not recognised
pub fn element_size(accessor: &json::Accessor) -> Option<u64> {
    match (&accessor.component_type, &accessor.type_) {
        (Valid(component), Valid(type_)) => Some(component_size(component.0) * component_count(*type_)),
        _ => None,
    }
}

/// Bytes an accessor covers inside its view, measured from the view start
///
/// `None` if the type is not recognised or the span does not fit in a `u64`.
pub fn accessor_span(accessor: &json::Accessor, stride: Option<u64>) -> Option<u64> {
    let element = element_size(accessor)?;
    let offset = accessor.byte_offset.as_ref().map(|o| o.0).unwrap_or(0);
    let count = accessor.count.0;
    if count == 0 {
        return Some(offset);
    }
    let stride = stride.unwrap_or(element);
    stride
        .checked_mul(count - 1)?
        .checked_add(element)?
        .checked_add(offset)
}

/// End of a `[start, start + length)` range, `None` on overflow
pub(crate) fn span_end(start: u64, length: u64) -> Option<u64> {
    start.checked_add(length)
}

fn check_index<T>(what: &str, owner: String, index: json::Index<T>, len: usize) -> Result<(), String> {
    if index.value() < len {
        Ok(())
    } else {
        Err(format!("{owner} references missing {what} {}", index.value()))
    }
}

/// Check references and byte spans of a document, without looking at payloads
pub fn check_graph(root: &json::Root) -> Result<(), String> {
    let views = root.buffer_views.len();
    let accessors = root.accessors.len();

    for (i, view) in root.buffer_views.iter().enumerate() {
        check_index("buffer", format!("buffer view {i}"), view.buffer, root.buffers.len())?;
        let buffer = &root.buffers[view.buffer.value()];
        let start = view.byte_offset.as_ref().map(|o| o.0).unwrap_or(0);
        let end = span_end(start, view.byte_length.0)
            .ok_or_else(|| format!("buffer view {i} range overflows"))?;
        if end > buffer.byte_length.0 {
            return Err(format!(
                "buffer view {i} ends at byte {end}, past buffer {} ({} bytes)",
                view.buffer.value(),
                buffer.byte_length.0
            ));
        }
    }

    for (i, accessor) in root.accessors.iter().enumerate() {
        for view in accessor_views(accessor) {
            check_index("buffer view", format!("accessor {i}"), view, views)?;
        }
        let Some(view_index) = accessor.buffer_view else {
            continue;
        };
        let view = &root.buffer_views[view_index.value()];
        let stride = view.byte_stride.as_ref().map(|s| s.0 as u64);
        if element_size(accessor).is_none() {
            return Err(format!("accessor {i} has an unrecognised component type or shape"));
        }
        let span = accessor_span(accessor, stride)
            .ok_or_else(|| format!("accessor {i} span overflows buffer view {}", view_index.value()))?;
        if span > view.byte_length.0 {
            return Err(format!(
                "accessor {i} spans {span} bytes, past buffer view {} ({} bytes)",
                view_index.value(),
                view.byte_length.0
            ));
        }
    }

    for (i, image) in root.images.iter().enumerate() {
        if let Some(view) = image.buffer_view {
            check_index("buffer view", format!("image {i}"), view, views)?;
        }
    }

    for (m, mesh) in root.meshes.iter().enumerate() {
        for (p, primitive) in mesh.primitives.iter().enumerate() {
            let owner = || format!("mesh {m} primitive {p}");
            for accessor in primitive.attributes.values() {
                check_index("accessor", owner(), *accessor, accessors)?;
            }
            if let Some(indices) = primitive.indices {
                check_index("accessor", owner(), indices, accessors)?;
            }
            for target in primitive.targets.iter().flatten() {
                for accessor in [target.positions, target.normals, target.tangents]
                    .into_iter()
                    .flatten()
                {
                    check_index("accessor", owner(), accessor, accessors)?;
                }
            }
        }
    }

    for (i, node) in root.nodes.iter().enumerate() {
        if let Some(mesh) = node.mesh {
            check_index("mesh", format!("node {i}"), mesh, root.meshes.len())?;
        }
        for child in node.children.iter().flatten() {
            check_index("node", format!("node {i}"), *child, root.nodes.len())?;
        }
    }

    for (i, skin) in root.skins.iter().enumerate() {
        if let Some(matrices) = skin.inverse_bind_matrices {
            check_index("accessor", format!("skin {i}"), matrices, accessors)?;
        }
    }

    for (a, animation) in root.animations.iter().enumerate() {
        for sampler in &animation.samplers {
            check_index("accessor", format!("animation {a}"), sampler.input, accessors)?;
            check_index("accessor", format!("animation {a}"), sampler.output, accessors)?;
        }
    }

    for (i, texture) in root.textures.iter().enumerate() {
        check_index("image", format!("texture {i}"), texture.source, root.images.len())?;
    }

    Ok(())
}
