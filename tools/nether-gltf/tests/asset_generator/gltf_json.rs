//! GLTF JSON structure building.

use super::mesh_data::{INDICES_ACCESSOR, NORM_ACCESSOR, POS_ACCESSOR};
use gltf_json as json;
use json::validation::Checked::Valid;

/// Build a one-mesh scene over the packed cube buffer
pub(crate) fn build_cube_json(
    buffer_uri: Option<String>,
    buffer_length: usize,
    buffer_views: &[json::buffer::View],
    accessors: &[json::Accessor],
) -> json::Root {
    let mut attributes = std::collections::BTreeMap::new();
    attributes.insert(
        Valid(json::mesh::Semantic::Positions),
        json::Index::new(POS_ACCESSOR),
    );
    attributes.insert(
        Valid(json::mesh::Semantic::Normals),
        json::Index::new(NORM_ACCESSOR),
    );

    let meshes = vec![json::Mesh {
        extensions: Default::default(),
        extras: Default::default(),
        name: Some("Cube".to_string()),
        primitives: vec![json::mesh::Primitive {
            attributes,
            extensions: Default::default(),
            extras: Default::default(),
            indices: Some(json::Index::new(INDICES_ACCESSOR)),
            material: None,
            mode: Valid(json::mesh::Mode::Triangles),
            targets: None,
        }],
        weights: None,
    }];

    let nodes = vec![json::Node {
        camera: None,
        children: None,
        extensions: Default::default(),
        extras: Default::default(),
        matrix: None,
        mesh: Some(json::Index::new(0)),
        name: Some("Cube".to_string()),
        rotation: None,
        scale: None,
        skin: None,
        translation: Some([0.0, 1.0, 0.0]),
        weights: None,
    }];

    let scenes = vec![json::Scene {
        extensions: Default::default(),
        extras: Default::default(),
        name: Some("TestScene".to_string()),
        nodes: vec![json::Index::new(0)],
    }];

    let buffers = vec![json::Buffer {
        byte_length: buffer_length.into(),
        extensions: Default::default(),
        extras: Default::default(),
        name: None,
        uri: buffer_uri,
    }];

    json::Root {
        accessors: accessors.to_vec(),
        animations: Vec::new(),
        asset: json::Asset {
            copyright: None,
            extensions: Default::default(),
            extras: Default::default(),
            generator: Some("nether-gltf-test".to_string()),
            min_version: None,
            version: "2.0".to_string(),
        },
        buffers,
        buffer_views: buffer_views.to_vec(),
        cameras: Vec::new(),
        extensions: Default::default(),
        extras: Default::default(),
        extensions_required: Vec::new(),
        extensions_used: Vec::new(),
        images: Vec::new(),
        materials: Vec::new(),
        meshes,
        nodes,
        samplers: Vec::new(),
        scene: Some(json::Index::new(0)),
        scenes,
        skins: Vec::new(),
        textures: Vec::new(),
    }
}

/// Append an image with the given uri and a texture sampling it
pub(crate) fn add_image(root: &mut json::Root, uri: String) {
    let image = root.images.len();
    root.images.push(
        serde_json::from_value(serde_json::json!({ "uri": uri, "name": "Albedo" }))
            .expect("valid image json"),
    );
    root.textures.push(
        serde_json::from_value(serde_json::json!({ "source": image }))
            .expect("valid texture json"),
    );
}
