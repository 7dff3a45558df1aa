//! Transient per-resource state attached to a model while it is processed
//!
//! Decoded bytes live here rather than in the document so nothing transient
//! can leak into the serialized output. The writer consumes the table with
//! [`PipelineExtras::strip`].

use hashbrown::HashMap;
use std::path::{Path, PathBuf};

use crate::resource::ResourceOrigin;

/// Identity of a resource node in the document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceId {
    Buffer(usize),
    Image(usize),
}

/// Decoded payload plus what is known about where it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceState {
    pub bytes: Vec<u8>,
    pub origin: ResourceOrigin,
    pub mime_type: Option<String>,
}

impl ResourceState {
    pub fn new(bytes: Vec<u8>, origin: ResourceOrigin) -> Self {
        Self {
            bytes,
            origin,
            mime_type: None,
        }
    }

    pub fn with_mime_type(mut self, mime_type: Option<String>) -> Self {
        self.mime_type = mime_type;
        self
    }
}

/// Side-table of decoded resources keyed by [`ResourceId`]
#[derive(Debug, Clone, Default)]
pub struct PipelineExtras {
    base_path: Option<PathBuf>,
    resources: HashMap<ResourceId, ResourceState>,
}

impl PipelineExtras {
    pub fn new(base_path: Option<PathBuf>) -> Self {
        Self {
            base_path,
            resources: HashMap::new(),
        }
    }

    /// Directory external resources were resolved against
    pub fn base_path(&self) -> Option<&Path> {
        self.base_path.as_deref()
    }

    pub fn insert(&mut self, id: ResourceId, state: ResourceState) -> Option<ResourceState> {
        self.resources.insert(id, state)
    }

    pub fn get(&self, id: ResourceId) -> Option<&ResourceState> {
        self.resources.get(&id)
    }

    pub fn get_mut(&mut self, id: ResourceId) -> Option<&mut ResourceState> {
        self.resources.get_mut(&id)
    }

    pub fn bytes(&self, id: ResourceId) -> Option<&[u8]> {
        self.resources.get(&id).map(|state| state.bytes.as_slice())
    }

    pub fn remove(&mut self, id: ResourceId) -> Option<ResourceState> {
        self.resources.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Re-key buffer entries after the buffers collection was compacted
    ///
    /// `map[old]` is the new index, or `None` if the buffer was removed.
    pub fn remap_buffers(&mut self, map: &[Option<usize>]) {
        let resources = std::mem::take(&mut self.resources);
        self.resources = resources
            .into_iter()
            .filter_map(|(id, state)| match id {
                ResourceId::Buffer(old) => map
                    .get(old)
                    .copied()
                    .flatten()
                    .map(|new| (ResourceId::Buffer(new), state)),
                image => Some((image, state)),
            })
            .collect();
    }

    /// Drop the table, handing its payloads to the caller
    pub fn strip(self) -> HashMap<ResourceId, ResourceState> {
        self.resources
    }
}
