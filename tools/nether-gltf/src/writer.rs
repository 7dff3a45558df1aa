//! Asset writer: strips transient state, picks a final source for every
//! buffer and image, and serializes the document
//!
//! The writer never touches the filesystem. External payloads come back as
//! [`ExternalWrite`] instructions; see [`crate::process::persist`].

use gltf_json as json;
use hashbrown::HashMap;
use std::path::{Component, Path, PathBuf};

use crate::container::{self, align4};
use crate::error::{PipelineError, Result};
use crate::extras::{ResourceId, ResourceState};
use crate::model::{check_graph, is_buffer_neutral, AssetModel};
use crate::resource::{
    embed, extension_for_mime, externalize, is_contained_relative, percent_decode, ExternalWrite,
    ResourceOrigin, OCTET_STREAM,
};

const WRITER: &str = "<writer>";

/// Options for [`write`]
#[derive(Debug, Clone)]
pub struct WriteOptions {
    /// Emit a binary container with every payload in its binary chunk
    pub binary: bool,
    /// Encode payloads as data URIs instead of external files
    pub embed_resources: bool,
    /// Directory external files are planned under
    pub output_base_path: Option<PathBuf>,
    /// Prefix for generated external file names
    pub resource_stem: String,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            binary: false,
            embed_resources: false,
            output_base_path: None,
            resource_stem: "model".to_string(),
        }
    }
}

/// Serialized document plus the files the caller still has to write
#[derive(Debug, Clone)]
pub struct WriteOutput {
    pub document: Vec<u8>,
    pub external_writes: Vec<ExternalWrite>,
    /// Final document as serialized
    pub root: json::Root,
}

/// Serialize a closed model
///
/// Either every payload gets a valid final source and the document is
/// produced, or the call fails before any output exists.
pub fn write(model: AssetModel, options: &WriteOptions) -> Result<WriteOutput> {
    let (mut root, extras) = model.into_parts();
    let mut resources = extras.strip();
    check_graph(&root).map_err(|detail| PipelineError::invariant(WRITER, detail))?;

    let mut external_writes = Vec::new();
    let document = if options.binary {
        if options.embed_resources {
            tracing::debug!("Binary output requested, ignoring embed_resources");
        }
        let binary = pack_binary(&mut root, &mut resources)?;
        check_graph(&root).map_err(|detail| PipelineError::invariant(WRITER, detail))?;
        let json_bytes = serde_json::to_vec(&root)
            .map_err(|err| PipelineError::format(format!("failed to serialize glTF JSON: {err}")))?;
        container::encode(&json_bytes, binary.as_deref())?
    } else {
        external_writes = assign_sources(&mut root, &mut resources, options)?;
        serde_json::to_vec_pretty(&root)
            .map_err(|err| PipelineError::format(format!("failed to serialize glTF JSON: {err}")))?
    };

    tracing::debug!(
        "Wrote {} byte document with {} external resource(s)",
        document.len(),
        external_writes.len()
    );
    Ok(WriteOutput {
        document,
        external_writes,
        root,
    })
}

fn take_payload(
    resources: &mut HashMap<ResourceId, ResourceState>,
    id: ResourceId,
) -> Result<ResourceState> {
    resources.remove(&id).ok_or_else(|| {
        let what = match id {
            ResourceId::Buffer(i) => format!("buffer {i}"),
            ResourceId::Image(i) => format!("image {i}"),
        };
        PipelineError::invariant(WRITER, format!("{what} has no resolved source"))
    })
}

/// Merge every buffer and URI image into one binary chunk
///
/// Returns `None` when the document holds no bytes and no buffer views.
/// Refuses to renumber buffers when an extension may point at them.
fn pack_binary(
    root: &mut json::Root,
    resources: &mut HashMap<ResourceId, ResourceState>,
) -> Result<Option<Vec<u8>>> {
    if root.buffers.len() > 1 {
        if let Some(extension) = root.extensions_used.iter().find(|name| !is_buffer_neutral(name)) {
            return Err(PipelineError::format(format!(
                "cannot merge {} buffers into a binary container: {extension} may reference them",
                root.buffers.len()
            )));
        }
    }

    let mut chunk: Vec<u8> = Vec::new();
    let mut offsets = Vec::with_capacity(root.buffers.len());
    for i in 0..root.buffers.len() {
        let state = take_payload(resources, ResourceId::Buffer(i))?;
        offsets.push(chunk.len() as u64);
        chunk.extend_from_slice(&state.bytes);
        chunk.resize(align4(chunk.len()), 0);
    }

    for view in &mut root.buffer_views {
        let base = offsets.get(view.buffer.value()).copied().ok_or_else(|| {
            PipelineError::invariant(WRITER, format!("missing buffer {}", view.buffer.value()))
        })?;
        let offset = view.byte_offset.as_ref().map(|o| o.0).unwrap_or(0) + base;
        if offset != 0 || view.byte_offset.is_some() {
            view.byte_offset = Some(offset.into());
        }
        view.buffer = json::Index::new(0);
    }

    for (i, image) in root.images.iter_mut().enumerate() {
        let state = take_payload(resources, ResourceId::Image(i))?;
        if image.buffer_view.is_some() {
            continue;
        }
        let mime_type = state
            .mime_type
            .clone()
            .unwrap_or_else(|| OCTET_STREAM.to_string());
        let offset = chunk.len();
        chunk.extend_from_slice(&state.bytes);

        image.buffer_view = Some(json::Index::new(root.buffer_views.len() as u32));
        root.buffer_views.push(json::buffer::View {
            buffer: json::Index::new(0),
            byte_length: state.bytes.len().into(),
            byte_offset: Some((offset as u64).into()),
            byte_stride: None,
            extensions: Default::default(),
            extras: Default::default(),
            name: None,
            target: None,
        });
        image.uri = None;
        image.mime_type = Some(json::image::MimeType(mime_type));
        chunk.resize(align4(chunk.len()), 0);
    }

    if chunk.is_empty() && root.buffer_views.is_empty() {
        root.buffers.clear();
        return Ok(None);
    }

    let mut merged = if root.buffers.is_empty() {
        json::Buffer {
            byte_length: 0u64.into(),
            extensions: Default::default(),
            extras: Default::default(),
            name: None,
            uri: None,
        }
    } else {
        root.buffers.swap_remove(0)
    };
    merged.byte_length = chunk.len().into();
    merged.uri = None;
    root.buffers = vec![merged];

    tracing::debug!("Packed binary chunk of {} bytes", chunk.len());
    Ok(Some(chunk))
}

/// Give every buffer and URI image a data URI or an external file
fn assign_sources(
    root: &mut json::Root,
    resources: &mut HashMap<ResourceId, ResourceState>,
    options: &WriteOptions,
) -> Result<Vec<ExternalWrite>> {
    let mut planner = WritePlanner::new(options);
    let stem = &options.resource_stem;
    let single_buffer = root.buffers.len() == 1;

    for (i, buffer) in root.buffers.iter_mut().enumerate() {
        let state = take_payload(resources, ResourceId::Buffer(i))?;
        let uri = if options.embed_resources {
            embed(&state.bytes, OCTET_STREAM)
        } else {
            let name = kept_name(&state.origin).unwrap_or_else(|| {
                if single_buffer {
                    format!("{stem}.bin")
                } else {
                    format!("{stem}_{i}.bin")
                }
            });
            planner.plan(state.bytes, &name)?
        };
        buffer.uri = Some(uri);
    }

    for (i, image) in root.images.iter_mut().enumerate() {
        let state = take_payload(resources, ResourceId::Image(i))?;
        if image.buffer_view.is_some() {
            continue;
        }
        let mime_type = state.mime_type.as_deref().unwrap_or(OCTET_STREAM);
        let uri = if options.embed_resources {
            embed(&state.bytes, mime_type)
        } else {
            let name = kept_name(&state.origin).unwrap_or_else(|| {
                format!("{stem}_image{i}.{}", extension_for_mime(mime_type))
            });
            planner.plan(state.bytes, &name)?
        };
        image.uri = Some(uri);
    }

    Ok(planner.writes)
}

/// Relative path an external resource is written back to, if it stays inside
/// the output directory
fn kept_name(origin: &ResourceOrigin) -> Option<String> {
    let ResourceOrigin::External { uri } = origin else {
        return None;
    };
    let decoded = percent_decode(uri).filter(|path| is_contained_relative(path))?;
    let parts: Vec<&str> = Path::new(&decoded)
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => part.to_str(),
            _ => None,
        })
        .collect();
    Some(parts.join("/"))
}

/// Collects external writes, merging identical payloads for one path
struct WritePlanner<'a> {
    options: &'a WriteOptions,
    writes: Vec<ExternalWrite>,
    by_path: HashMap<PathBuf, usize>,
}

impl<'a> WritePlanner<'a> {
    fn new(options: &'a WriteOptions) -> Self {
        Self {
            options,
            writes: Vec::new(),
            by_path: HashMap::new(),
        }
    }

    /// Plan `bytes` at `relative_path`, returning the URI to record
    fn plan(&mut self, bytes: Vec<u8>, relative_path: &str) -> Result<String> {
        let write = externalize(bytes, relative_path, self.options.output_base_path.as_deref());
        if let Some(&existing) = self.by_path.get(&write.path) {
            let planned = &self.writes[existing];
            if planned.bytes != write.bytes {
                return Err(PipelineError::WriteConflict(write.path));
            }
            return Ok(planned.uri.clone());
        }
        let uri = write.uri.clone();
        self.by_path.insert(write.path.clone(), self.writes.len());
        self.writes.push(write);
        Ok(uri)
    }
}
