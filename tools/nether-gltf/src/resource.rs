//! Resource resolution: data URIs, external files, and the container chunk
//!
//! A buffer or image names its bytes in one of three ways. [`SourceDescriptor`]
//! is the borrowed form read from the document; [`ResourceOrigin`] is what the
//! pipeline remembers about a resource after its bytes are decoded.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use std::path::{Component, Path, PathBuf};

use crate::error::{PipelineError, Result};

/// MIME type used for buffers and unrecognised payloads
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Where a resource's bytes live, as declared by the document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceDescriptor<'a> {
    /// Full `data:` URI
    Embedded(&'a str),
    /// URI relative to the document's base path, still percent-encoded
    External(&'a str),
    /// The binary chunk of the container the document came from
    ContainerChunk,
}

impl<'a> SourceDescriptor<'a> {
    pub fn from_uri(uri: Option<&'a str>) -> Self {
        match uri {
            Some(uri) if uri.starts_with("data:") => Self::Embedded(uri),
            Some(uri) => Self::External(uri),
            None => Self::ContainerChunk,
        }
    }
}

/// Where a decoded resource originally came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceOrigin {
    Embedded { mime_type: String },
    External { uri: String },
    ContainerChunk,
    /// Image stored inside a buffer view
    BufferView(usize),
    /// Buffer created by a pipeline stage
    Generated,
}

impl ResourceOrigin {
    pub fn from_descriptor(source: &SourceDescriptor<'_>) -> Self {
        match source {
            SourceDescriptor::Embedded(uri) => Self::Embedded {
                mime_type: data_uri_mime(uri).unwrap_or(OCTET_STREAM).to_string(),
            },
            SourceDescriptor::External(uri) => Self::External {
                uri: (*uri).to_string(),
            },
            SourceDescriptor::ContainerChunk => Self::ContainerChunk,
        }
    }
}

/// External file the writer wants persisted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalWrite {
    /// Percent-encoded URI recorded in the document
    pub uri: String,
    /// Destination path (output base path joined with the decoded URI)
    pub path: PathBuf,
    pub bytes: Vec<u8>,
}

/// Turns source descriptors into bytes relative to a base directory
#[derive(Debug, Clone)]
pub struct ResourceResolver {
    base_path: PathBuf,
    /// Canonical roots external files must stay inside; `None` disables the sandbox
    sandbox_roots: Option<Vec<PathBuf>>,
}

impl ResourceResolver {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            sandbox_roots: None,
        }
    }

    /// Restrict external resolution to the base path plus `extra_roots`
    pub fn sandboxed(mut self, extra_roots: &[PathBuf]) -> Self {
        let roots = std::iter::once(self.base_path.as_path())
            .chain(extra_roots.iter().map(PathBuf::as_path))
            .map(|root| root.canonicalize().unwrap_or_else(|_| root.to_path_buf()))
            .collect();
        self.sandbox_roots = Some(roots);
        self
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Decode a resource into raw bytes
    ///
    /// `binary_chunk` is the container's binary chunk, when the document came
    /// from a container.
    pub fn resolve(
        &self,
        source: &SourceDescriptor<'_>,
        binary_chunk: Option<&[u8]>,
    ) -> Result<Vec<u8>> {
        match source {
            SourceDescriptor::Embedded(uri) => decode_data_uri(uri),
            SourceDescriptor::External(uri) => self.read_external(uri),
            SourceDescriptor::ContainerChunk => binary_chunk.map(<[u8]>::to_vec).ok_or_else(|| {
                PipelineError::format("buffer has no uri and the input has no binary chunk")
            }),
        }
    }

    fn read_external(&self, uri: &str) -> Result<Vec<u8>> {
        if has_scheme(uri) {
            return Err(PipelineError::format(format!(
                "unsupported resource uri scheme: {uri}"
            )));
        }
        let decoded = percent_decode(uri)
            .ok_or_else(|| PipelineError::format(format!("invalid percent-encoding in uri: {uri}")))?;
        let path = self.base_path.join(decoded);

        if !path.is_file() {
            return Err(PipelineError::not_found(path, "no such file"));
        }
        if let Some(roots) = &self.sandbox_roots {
            let canonical = path
                .canonicalize()
                .map_err(|err| PipelineError::io(&path, err))?;
            if !roots.iter().any(|root| canonical.starts_with(root)) {
                return Err(PipelineError::not_found(path, "outside the permitted roots"));
            }
        }

        tracing::debug!("Reading external resource {:?}", path);
        std::fs::read(&path).map_err(|err| match err.kind() {
            std::io::ErrorKind::NotFound => PipelineError::not_found(&path, err.to_string()),
            _ => PipelineError::io(&path, err),
        })
    }
}

/// Encode bytes as a base64 data URI
pub fn embed(bytes: &[u8], mime_type: &str) -> String {
    format!("data:{};base64,{}", mime_type, BASE64.encode(bytes))
}

/// Plan an external file for `bytes` at `relative_path` under `output_base`
pub fn externalize(bytes: Vec<u8>, relative_path: &str, output_base: Option<&Path>) -> ExternalWrite {
    let path = match output_base {
        Some(base) => base.join(relative_path),
        None => PathBuf::from(relative_path),
    };
    ExternalWrite {
        uri: percent_encode(relative_path),
        path,
        bytes,
    }
}

/// MIME type declared by a data URI, if any
pub fn data_uri_mime(uri: &str) -> Option<&str> {
    let header = uri.strip_prefix("data:")?.split(',').next()?;
    let mime = header.split(';').next()?;
    (!mime.is_empty()).then_some(mime)
}

/// Decode `data:<mime>[;base64],<payload>`
pub fn decode_data_uri(uri: &str) -> Result<Vec<u8>> {
    let rest = uri
        .strip_prefix("data:")
        .ok_or_else(|| PipelineError::format("not a data uri"))?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| PipelineError::format("data uri has no payload separator"))?;

    if header.split(';').any(|param| param == "base64") {
        // Wrapped payloads carry line breaks the engine rejects
        let compact: Vec<u8> = payload
            .bytes()
            .filter(|b| !b.is_ascii_whitespace())
            .collect();
        BASE64
            .decode(compact)
            .map_err(|err| PipelineError::format(format!("invalid base64 in data uri: {err}")))
    } else {
        percent_decode_bytes(payload)
            .ok_or_else(|| PipelineError::format("invalid percent-encoding in data uri"))
    }
}

fn has_scheme(uri: &str) -> bool {
    match uri.find("://") {
        Some(pos) => uri[..pos]
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.'),
        None => false,
    }
}

/// Decode `%XX` escapes into a UTF-8 path or name
pub fn percent_decode(input: &str) -> Option<String> {
    String::from_utf8(percent_decode_bytes(input)?).ok()
}

fn percent_decode_bytes(input: &str) -> Option<Vec<u8>> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hi = bytes.get(i + 1).and_then(|&b| hex_digit(b))?;
            let lo = bytes.get(i + 2).and_then(|&b| hex_digit(b))?;
            out.push((hi << 4) | lo);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    Some(out)
}

fn hex_digit(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Percent-encode everything except unreserved characters and `/`
pub fn percent_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for b in input.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

/// Whether a decoded relative path stays inside its base directory
pub fn is_contained_relative(path: &str) -> bool {
    let path = Path::new(path);
    !path.as_os_str().is_empty()
        && path
            .components()
            .all(|component| matches!(component, Component::Normal(_) | Component::CurDir))
}

/// Identify common image formats by their leading bytes
pub fn sniff_mime(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
        Some("image/png")
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg")
    } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some("image/webp")
    } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        Some("image/gif")
    } else if bytes.starts_with(&[0xAB, b'K', b'T', b'X', b' ', b'2', b'0', 0xBB]) {
        Some("image/ktx2")
    } else {
        None
    }
}

/// Guess a MIME type from a file name
pub fn mime_from_extension(uri: &str) -> Option<&'static str> {
    let ext = Path::new(uri).extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        "ktx2" => Some("image/ktx2"),
        "bin" => Some(OCTET_STREAM),
        _ => None,
    }
}

/// File extension for a MIME type
pub fn extension_for_mime(mime_type: &str) -> &'static str {
    match mime_type {
        "image/png" => "png",
        "image/jpeg" => "jpg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        "image/ktx2" => "ktx2",
        _ => "bin",
    }
}
