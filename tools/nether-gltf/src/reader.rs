//! Asset reader: detects the input form, parses the document, and decodes
//! every buffer and image into the pipeline side-table

use gltf_json as json;
use rayon::prelude::*;
use std::path::PathBuf;

use crate::container;
use crate::error::{PipelineError, Result};
use crate::extras::{PipelineExtras, ResourceId, ResourceState};
use crate::model::{span_end, AssetModel};
use crate::resource::{
    mime_from_extension, sniff_mime, ResourceOrigin, ResourceResolver, SourceDescriptor,
};

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Input encodings the reader understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputForm {
    /// Plain JSON text
    Json,
    /// Binary container (.glb)
    Container,
}

impl InputForm {
    /// Classify input by its leading bytes
    pub fn detect(bytes: &[u8]) -> Self {
        if container::is_container(bytes) {
            Self::Container
        } else {
            Self::Json
        }
    }
}

/// Options for [`read`]
#[derive(Debug, Clone)]
pub struct ReadOptions {
    /// Directory external URIs are resolved against
    pub base_path: PathBuf,
    /// Refuse external files outside `base_path` and `allowed_roots`
    pub sandbox: bool,
    pub allowed_roots: Vec<PathBuf>,
    /// Detach images stored in buffer views into standalone resources
    pub prefer_embedded: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("."),
            sandbox: false,
            allowed_roots: Vec::new(),
            prefer_embedded: false,
        }
    }
}

impl ReadOptions {
    pub fn with_base_path(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            ..Self::default()
        }
    }

    fn resolver(&self) -> ResourceResolver {
        let resolver = ResourceResolver::new(&self.base_path);
        if self.sandbox {
            resolver.sandboxed(&self.allowed_roots)
        } else {
            resolver
        }
    }
}

/// Read a glTF JSON document or binary container into a closed model
pub fn read(input: &[u8], options: &ReadOptions) -> Result<AssetModel> {
    let form = InputForm::detect(input);
    tracing::debug!("Reading {:?} input ({} bytes)", form, input.len());

    let (json_bytes, binary) = match form {
        InputForm::Container => {
            let container = container::decode(input)?;
            (container.json, container.binary)
        }
        InputForm::Json => (input, None),
    };
    let json_bytes = json_bytes.strip_prefix(UTF8_BOM).unwrap_or(json_bytes);

    let root: json::Root = serde_json::from_slice(json_bytes)
        .map_err(|err| PipelineError::format(format!("malformed glTF JSON: {err}")))?;

    resolve_root(root, binary, options)
}

/// Resolve the resources of an already-parsed document
pub fn read_root(root: json::Root, options: &ReadOptions) -> Result<AssetModel> {
    resolve_root(root, None, options)
}

impl AssetModel {
    /// Build a closed model from a parsed document, see [`read_root`]
    pub fn from_root(root: json::Root, options: &ReadOptions) -> Result<Self> {
        read_root(root, options)
    }
}

fn resolve_root(
    mut root: json::Root,
    binary: Option<&[u8]>,
    options: &ReadOptions,
) -> Result<AssetModel> {
    for (i, buffer) in root.buffers.iter().enumerate() {
        if buffer.uri.is_none() && (i != 0 || binary.is_none()) {
            return Err(PipelineError::format(format!(
                "buffer {i} has no uri and is not backed by a binary chunk"
            )));
        }
    }

    let resolver = options.resolver();

    // Every URI-backed resource is independent, so they resolve in parallel.
    // Buffer-view images need their buffer first and are sliced afterwards.
    let mut jobs: Vec<(ResourceId, Option<&str>)> = root
        .buffers
        .iter()
        .enumerate()
        .map(|(i, buffer)| (ResourceId::Buffer(i), buffer.uri.as_deref()))
        .collect();
    jobs.extend(
        root.images
            .iter()
            .enumerate()
            .filter(|(_, image)| image.buffer_view.is_none())
            .map(|(i, image)| (ResourceId::Image(i), image.uri.as_deref())),
    );

    let resolved: Result<Vec<(ResourceId, ResourceState)>> = jobs
        .par_iter()
        .map(|&(id, uri)| {
            if let ResourceId::Image(i) = id {
                if uri.is_none() {
                    return Err(PipelineError::format(format!(
                        "image {i} has neither a uri nor a buffer view"
                    )));
                }
            }
            let source = SourceDescriptor::from_uri(uri);
            let bytes = resolver.resolve(&source, binary)?;
            Ok((id, ResourceState::new(bytes, ResourceOrigin::from_descriptor(&source))))
        })
        .collect();

    let mut extras = PipelineExtras::new(Some(options.base_path.clone()));
    for (id, mut state) in resolved? {
        match id {
            ResourceId::Buffer(i) => {
                let declared = root.buffers[i].byte_length.0 as usize;
                if state.bytes.len() < declared {
                    return Err(PipelineError::format(format!(
                        "buffer {i} declares {declared} bytes but its source holds {}",
                        state.bytes.len()
                    )));
                }
                state.bytes.truncate(declared);
            }
            ResourceId::Image(i) => {
                let image = &root.images[i];
                state.mime_type = image_mime(
                    image.mime_type.as_ref().map(|m| m.0.as_str()),
                    &state.origin,
                    &state.bytes,
                );
            }
        }
        extras.insert(id, state);
    }

    slice_buffer_view_images(&mut root, &mut extras, options.prefer_embedded)?;

    let model = AssetModel::new(root, extras);
    model
        .check_closed()
        .map_err(|detail| PipelineError::format(format!("invalid document: {detail}")))?;

    tracing::debug!(
        "Read {} buffers, {} images, {} accessors",
        model.root.buffers.len(),
        model.root.images.len(),
        model.root.accessors.len()
    );
    Ok(model)
}

fn slice_buffer_view_images(
    root: &mut json::Root,
    extras: &mut PipelineExtras,
    detach: bool,
) -> Result<()> {
    for (i, image) in root.images.iter_mut().enumerate() {
        let Some(view_index) = image.buffer_view else {
            continue;
        };
        let view = root.buffer_views.get(view_index.value()).ok_or_else(|| {
            PipelineError::format(format!(
                "image {i} references missing buffer view {}",
                view_index.value()
            ))
        })?;
        let buffer = extras
            .bytes(ResourceId::Buffer(view.buffer.value()))
            .ok_or_else(|| {
                PipelineError::format(format!(
                    "buffer view {} references missing buffer {}",
                    view_index.value(),
                    view.buffer.value()
                ))
            })?;
        let start = view.byte_offset.as_ref().map(|o| o.0).unwrap_or(0);
        let bytes = span_end(start, view.byte_length.0)
            .and_then(|end| Some(usize::try_from(start).ok()?..usize::try_from(end).ok()?))
            .and_then(|range| buffer.get(range))
            .ok_or_else(|| {
                PipelineError::format(format!(
                    "buffer view {} is out of range for its buffer",
                    view_index.value()
                ))
            })?
            .to_vec();

        let mime_type = image_mime(
            image.mime_type.as_ref().map(|m| m.0.as_str()),
            &ResourceOrigin::BufferView(view_index.value()),
            &bytes,
        );
        let origin = if detach {
            image.buffer_view = None;
            ResourceOrigin::Embedded {
                mime_type: mime_type.clone().unwrap_or_default(),
            }
        } else {
            ResourceOrigin::BufferView(view_index.value())
        };
        extras.insert(
            ResourceId::Image(i),
            ResourceState::new(bytes, origin).with_mime_type(mime_type),
        );
    }
    Ok(())
}

/// Declared MIME type, else the data URI's, else sniffed, else by extension
fn image_mime(declared: Option<&str>, origin: &ResourceOrigin, bytes: &[u8]) -> Option<String> {
    if let Some(mime) = declared {
        return Some(mime.to_string());
    }
    if let ResourceOrigin::Embedded { mime_type } = origin {
        if mime_type.starts_with("image/") {
            return Some(mime_type.clone());
        }
    }
    sniff_mime(bytes)
        .or_else(|| match origin {
            ResourceOrigin::External { uri } => mime_from_extension(uri),
            _ => None,
        })
        .map(str::to_string)
}
