//! GLB file assembly.
//!
//! Writes chunk lengths padded to 4 bytes, the way most exporters do, so the
//! reader is exercised against containers it did not produce itself.

use gltf_json as json;

const JSON_CHUNK: u32 = 0x4E4F534A;
const BIN_CHUNK: u32 = 0x004E4942;

/// One chunk: padded length, type, payload, fill
fn push_chunk(out: &mut Vec<u8>, kind: u32, payload: &[u8], fill: u8) {
    let padded = payload.len().next_multiple_of(4);
    out.extend_from_slice(&(padded as u32).to_le_bytes());
    out.extend_from_slice(&kind.to_le_bytes());
    out.extend_from_slice(payload);
    out.resize(out.len() + padded - payload.len(), fill);
}

/// Container holding `root` as JSON and `buffer_data` as the BIN chunk
pub(crate) fn assemble_glb(root: &json::Root, buffer_data: &[u8]) -> Vec<u8> {
    let document = serde_json::to_vec(root).expect("Failed to serialize JSON");

    let mut chunks = Vec::new();
    push_chunk(&mut chunks, JSON_CHUNK, &document, b' ');
    push_chunk(&mut chunks, BIN_CHUNK, buffer_data, 0);

    let mut glb = Vec::with_capacity(12 + chunks.len());
    glb.extend_from_slice(b"glTF");
    glb.extend_from_slice(&2u32.to_le_bytes());
    glb.extend_from_slice(&((12 + chunks.len()) as u32).to_le_bytes());
    glb.extend_from_slice(&chunks);
    glb
}
