//! Programmatic glTF generation for integration tests.
//!
//! Generates a cube scene (positions, normals, indices) in the forms the
//! pipeline reads:
//! - JSON with an embedded data URI buffer
//! - JSON with an external `.bin` buffer
//! - GLB with the buffer in the binary chunk

#![allow(dead_code)]

mod glb_assembly;
mod gltf_json;
mod mesh_data;

pub use mesh_data::{BUFFER_LENGTH, INDEX_COUNT, VERTEX_COUNT};

use ::gltf_json as json;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use std::path::Path;

/// Smallest byte sequence recognised as PNG (signature plus filler)
pub const PNG_BYTES: &[u8] = &[
    0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 13, b'I', b'H', b'D', b'R', 7,
];

pub fn data_uri(mime_type: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime_type, BASE64.encode(bytes))
}

/// Packed cube bytes
pub fn cube_buffer() -> Vec<u8> {
    mesh_data::pack_cube().0
}

/// Cube scene whose buffer has the given uri (`None` for a GLB chunk)
pub fn cube_root(buffer_uri: Option<String>) -> json::Root {
    let (buffer, views, accessors) = mesh_data::pack_cube();
    gltf_json::build_cube_json(buffer_uri, buffer.len(), &views, &accessors)
}

/// Cube scene with its buffer embedded as a data URI
pub fn cube_embedded_json() -> Vec<u8> {
    let root = cube_root(Some(data_uri("application/octet-stream", &cube_buffer())));
    serde_json::to_vec(&root).expect("Failed to serialize JSON")
}

/// Cube scene plus an image, both stored in `dir`
///
/// Writes `<name>.gltf`, `<name>.bin` and `texture.png`, returning the
/// document path.
pub fn write_cube_with_texture(dir: &Path, name: &str) -> std::path::PathBuf {
    let mut root = cube_root(Some(format!("{name}.bin")));
    gltf_json::add_image(&mut root, "texture.png".to_string());

    std::fs::write(dir.join(format!("{name}.bin")), cube_buffer()).expect("Failed to write buffer");
    std::fs::write(dir.join("texture.png"), PNG_BYTES).expect("Failed to write image");
    let path = dir.join(format!("{name}.gltf"));
    std::fs::write(&path, serde_json::to_vec_pretty(&root).expect("Failed to serialize JSON"))
        .expect("Failed to write document");
    path
}

/// Cube scene with an embedded PNG image and the given buffer uri
pub fn cube_root_with_embedded_image(buffer_uri: Option<String>) -> json::Root {
    let mut root = cube_root(buffer_uri);
    gltf_json::add_image(&mut root, data_uri("image/png", PNG_BYTES));
    root
}

/// Cube as a GLB with padded chunk lengths
pub fn cube_glb() -> Vec<u8> {
    let (buffer, views, accessors) = mesh_data::pack_cube();
    let root = gltf_json::build_cube_json(None, buffer.len(), &views, &accessors);
    glb_assembly::assemble_glb(&root, &buffer)
}

/// Original cube positions, in vertex order
pub fn cube_positions() -> Vec<[f32; 3]> {
    mesh_data::cube_positions()
}
