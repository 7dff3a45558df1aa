//! Binary glTF container (.glb) framing
//!
//! # Layout
//! ```text
//! 0x00: magic "glTF"
//! 0x04: version u32 (2)
//! 0x08: total_length u32 (header + all chunks, including padding)
//! 0x0C: chunk 0 = JSON (length u32, type u32, data, 0x20 padding)
//! var:  chunk 1 = BIN, optional (length u32, type u32, data, 0x00 padding)
//! ```
//!
//! `length` is written as the unpadded data length. The decoder skips to the
//! next 4-byte boundary after every chunk, so containers that store padded
//! lengths decode as well.

use crate::error::{PipelineError, Result};

/// Container magic
pub const MAGIC: [u8; 4] = *b"glTF";

/// The only supported container version
pub const VERSION: u32 = 2;

/// Chunk type for the structured-data (JSON) chunk
pub const CHUNK_JSON: u32 = 0x4E4F_534A;

/// Chunk type for the binary-buffer chunk
pub const CHUNK_BIN: u32 = 0x004E_4942;

const CHUNK_HEADER_SIZE: usize = 8;

/// Round up to the next multiple of 4
pub(crate) fn align4(len: usize) -> usize {
    (len + 3) & !3
}

/// Container header (12 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerHeader {
    pub version: u32,
    pub total_length: u32,
}

impl ContainerHeader {
    pub const SIZE: usize = 12;

    pub fn new(total_length: u32) -> Self {
        Self {
            version: VERSION,
            total_length,
        }
    }

    /// Write header to bytes
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..4].copy_from_slice(&MAGIC);
        bytes[4..8].copy_from_slice(&self.version.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.total_length.to_le_bytes());
        bytes
    }

    /// Read header from bytes, `None` if too short or the magic does not match
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE || bytes[0..4] != MAGIC {
            return None;
        }
        Some(Self {
            version: read_u32(bytes, 4),
            total_length: read_u32(bytes, 8),
        })
    }
}

/// Chunks of a decoded container, borrowed from the input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Container<'a> {
    pub json: &'a [u8],
    pub binary: Option<&'a [u8]>,
}

/// Whether `bytes` starts with the container magic
pub fn is_container(bytes: &[u8]) -> bool {
    bytes.len() >= MAGIC.len() && bytes[..MAGIC.len()] == MAGIC
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

/// Split a container into its JSON chunk and optional binary chunk
pub fn decode(bytes: &[u8]) -> Result<Container<'_>> {
    if bytes.len() < ContainerHeader::SIZE {
        return Err(PipelineError::format(format!(
            "container too short: {} bytes",
            bytes.len()
        )));
    }
    let header = ContainerHeader::from_bytes(bytes)
        .ok_or_else(|| PipelineError::format("bad container magic"))?;
    if header.version != VERSION {
        return Err(PipelineError::format(format!(
            "unsupported container version {}",
            header.version
        )));
    }

    let total = header.total_length as usize;
    if total < ContainerHeader::SIZE {
        return Err(PipelineError::format(format!(
            "container length {total} is smaller than its header"
        )));
    }
    if total > bytes.len() {
        return Err(PipelineError::format(format!(
            "container truncated: header declares {} bytes, got {}",
            total,
            bytes.len()
        )));
    }
    let data = &bytes[..total];

    let mut json: Option<&[u8]> = None;
    let mut binary: Option<&[u8]> = None;
    let mut skipped_unknown = false;
    let mut offset = ContainerHeader::SIZE;

    while offset < total {
        if offset + CHUNK_HEADER_SIZE > total {
            return Err(PipelineError::format(format!(
                "truncated chunk header at offset {offset}"
            )));
        }
        let length = read_u32(data, offset) as usize;
        let kind = read_u32(data, offset + 4);
        let start = offset + CHUNK_HEADER_SIZE;
        let end = start
            .checked_add(length)
            .filter(|&end| end <= total)
            .ok_or_else(|| {
                PipelineError::format(format!(
                    "chunk at offset {offset} declares {length} bytes past the container end"
                ))
            })?;
        let chunk = &data[start..end];

        match kind {
            CHUNK_JSON if json.is_none() => json = Some(chunk),
            CHUNK_JSON => return Err(PipelineError::format("multiple JSON chunks")),
            _ if json.is_none() => {
                return Err(PipelineError::format("first chunk must be the JSON chunk"))
            }
            CHUNK_BIN if binary.is_some() => {
                return Err(PipelineError::format("multiple binary chunks"))
            }
            CHUNK_BIN if skipped_unknown => {
                return Err(PipelineError::format(
                    "binary chunk must directly follow the JSON chunk",
                ))
            }
            CHUNK_BIN => binary = Some(chunk),
            other => {
                tracing::debug!("Skipping unknown chunk type 0x{:08X}", other);
                skipped_unknown = true;
            }
        }

        offset = align4(end).min(total);
    }

    let json = json.ok_or_else(|| PipelineError::format("container has no JSON chunk"))?;
    Ok(Container { json, binary })
}

/// Pack a JSON document and optional binary payload into a container
pub fn encode(json: &[u8], binary: Option<&[u8]>) -> Result<Vec<u8>> {
    let json_padded = align4(json.len());
    let mut total = ContainerHeader::SIZE + CHUNK_HEADER_SIZE + json_padded;
    if let Some(bin) = binary {
        total += CHUNK_HEADER_SIZE + align4(bin.len());
    }
    let total_u32 = u32::try_from(total)
        .map_err(|_| PipelineError::format(format!("container of {total} bytes exceeds 4 GiB")))?;

    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(&ContainerHeader::new(total_u32).to_bytes());

    out.extend_from_slice(&(json.len() as u32).to_le_bytes());
    out.extend_from_slice(&CHUNK_JSON.to_le_bytes());
    out.extend_from_slice(json);
    out.extend(std::iter::repeat_n(0x20u8, json_padded - json.len()));

    if let Some(bin) = binary {
        out.extend_from_slice(&(bin.len() as u32).to_le_bytes());
        out.extend_from_slice(&CHUNK_BIN.to_le_bytes());
        out.extend_from_slice(bin);
        out.extend(std::iter::repeat_n(0u8, align4(bin.len()) - bin.len()));
    }

    debug_assert_eq!(out.len(), total);
    Ok(out)
}

/// Chunk framing summary used by inspection tooling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkInfo {
    pub kind: u32,
    pub length: u32,
    /// Bytes the chunk occupies including its header and padding
    pub framed_length: usize,
}

/// List the chunks of a container without interpreting them
pub fn chunk_table(bytes: &[u8]) -> Result<Vec<ChunkInfo>> {
    let header = ContainerHeader::from_bytes(bytes)
        .ok_or_else(|| PipelineError::format("bad container magic"))?;
    let total = (header.total_length as usize).min(bytes.len());
    let mut chunks = Vec::new();
    let mut offset = ContainerHeader::SIZE;
    while offset + CHUNK_HEADER_SIZE <= total {
        let length = read_u32(bytes, offset);
        let kind = read_u32(bytes, offset + 4);
        let next = align4(offset + CHUNK_HEADER_SIZE + length as usize).min(total);
        chunks.push(ChunkInfo {
            kind,
            length,
            framed_length: next - offset,
        });
        offset = next;
    }
    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_bytes() {
        let header = ContainerHeader::new(1234);
        let bytes = header.to_bytes();
        assert_eq!(&bytes[0..4], b"glTF");
        assert_eq!(ContainerHeader::from_bytes(&bytes), Some(header));
        assert_eq!(ContainerHeader::from_bytes(&bytes[..11]), None);
    }

    #[test]
    fn test_roundtrip_unaligned_payloads() {
        let json = br#"{"asset":{"version":"2.0"}}"#;
        let bin = [1u8, 2, 3, 4, 5];
        let encoded = encode(json, Some(&bin)).unwrap();

        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded.json, json);
        assert_eq!(decoded.binary, Some(&bin[..]));
    }

    #[test]
    fn test_roundtrip_without_binary() {
        let json = b"{}";
        let encoded = encode(json, None).unwrap();
        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded.json, json);
        assert_eq!(decoded.binary, None);
    }

    #[test]
    fn test_roundtrip_empty_binary() {
        let encoded = encode(b"{}", Some(&[])).unwrap();
        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded.binary, Some(&[][..]));
    }

    #[test]
    fn test_padding_bytes_and_total_length() {
        let encoded = encode(b"{\"a\":1}", Some(&[9, 9])).unwrap();
        // JSON: 7 bytes + 1 space, BIN: 2 bytes + 2 zeros
        assert_eq!(encoded.len(), 12 + 8 + 8 + 8 + 4);
        assert_eq!(read_u32(&encoded, 8) as usize, encoded.len());
        assert_eq!(encoded[12 + 8 + 7], 0x20);
        assert_eq!(&encoded[encoded.len() - 2..], &[0, 0]);
        assert_eq!(encoded.len() % 4, 0);
    }

    #[test]
    fn test_every_chunk_is_aligned() {
        for json_len in 0..6 {
            for bin_len in 0..6 {
                let json = vec![b' '; json_len];
                let bin = vec![7u8; bin_len];
                let encoded = encode(&json, Some(&bin)).unwrap();
                for chunk in chunk_table(&encoded).unwrap() {
                    assert_eq!(chunk.framed_length % 4, 0);
                }
            }
        }
    }

    #[test]
    fn test_decodes_padded_chunk_lengths() {
        // Chunk lengths that include their padding, as most exporters write them
        let mut glb = Vec::new();
        glb.extend_from_slice(b"glTF");
        glb.extend_from_slice(&2u32.to_le_bytes());
        glb.extend_from_slice(&(12u32 + 8 + 4 + 8 + 4).to_le_bytes());
        glb.extend_from_slice(&4u32.to_le_bytes());
        glb.extend_from_slice(&CHUNK_JSON.to_le_bytes());
        glb.extend_from_slice(b"{}  ");
        glb.extend_from_slice(&4u32.to_le_bytes());
        glb.extend_from_slice(&CHUNK_BIN.to_le_bytes());
        glb.extend_from_slice(&[1, 2, 0, 0]);

        let decoded = decode(&glb).unwrap();
        assert_eq!(decoded.json, b"{}  ");
        assert_eq!(decoded.binary, Some(&[1u8, 2, 0, 0][..]));
    }

    #[test]
    fn test_rejects_bad_magic_and_version() {
        let mut encoded = encode(b"{}", None).unwrap();
        encoded[4] = 1;
        assert!(decode(&encoded).unwrap_err().to_string().contains("version"));

        encoded[0] = b'x';
        assert!(decode(&encoded).is_err());
        assert!(decode(b"glT").is_err());
    }

    #[test]
    fn test_rejects_truncated_container() {
        let encoded = encode(b"{}", Some(&[1, 2, 3, 4])).unwrap();
        assert!(decode(&encoded[..encoded.len() - 4]).is_err());
    }

    #[test]
    fn test_rejects_binary_first() {
        let mut glb = Vec::new();
        glb.extend_from_slice(&ContainerHeader::new(12 + 8 + 4).to_bytes());
        glb.extend_from_slice(&4u32.to_le_bytes());
        glb.extend_from_slice(&CHUNK_BIN.to_le_bytes());
        glb.extend_from_slice(&[0; 4]);
        let err = decode(&glb).unwrap_err();
        assert!(err.to_string().contains("first chunk"));
    }

    #[test]
    fn test_rejects_second_binary_chunk() {
        let mut glb = encode(b"{}", Some(&[1, 2, 3, 4])).unwrap();
        glb.extend_from_slice(&4u32.to_le_bytes());
        glb.extend_from_slice(&CHUNK_BIN.to_le_bytes());
        glb.extend_from_slice(&[5, 6, 7, 8]);
        let total = glb.len() as u32;
        glb[8..12].copy_from_slice(&total.to_le_bytes());
        assert!(decode(&glb).unwrap_err().to_string().contains("multiple binary"));
    }

    #[test]
    fn test_skips_unknown_trailing_chunk() {
        let mut glb = encode(b"{}", Some(&[1, 2, 3, 4])).unwrap();
        glb.extend_from_slice(&2u32.to_le_bytes());
        glb.extend_from_slice(&0x5458_4554u32.to_le_bytes());
        glb.extend_from_slice(&[0xAA, 0xBB, 0, 0]);
        let total = glb.len() as u32;
        glb[8..12].copy_from_slice(&total.to_le_bytes());

        let decoded = decode(&glb).unwrap();
        assert_eq!(decoded.binary, Some(&[1u8, 2, 3, 4][..]));
    }

    #[test]
    fn test_is_container() {
        assert!(is_container(b"glTF\x02\0\0\0"));
        assert!(!is_container(b"{\"asset\":{}}"));
        assert!(!is_container(b"gl"));
    }
}
