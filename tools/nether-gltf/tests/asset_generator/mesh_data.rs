//! Cube geometry and binary packing.

use gltf_json as json;
use json::validation::Checked::Valid;

/// Cube corner count
pub const VERTEX_COUNT: usize = 8;
/// Triangle list index count
pub const INDEX_COUNT: usize = 36;
/// Packed byte length: positions + normals + indices
pub const BUFFER_LENGTH: usize = VERTEX_COUNT * 12 * 2 + INDEX_COUNT * 2;

/// Accessor indices (must match pack_cube order)
pub const POS_ACCESSOR: u32 = 0;
pub const NORM_ACCESSOR: u32 = 1;
pub const INDICES_ACCESSOR: u32 = 2;

pub(crate) fn cube_positions() -> Vec<[f32; 3]> {
    let mut positions = Vec::with_capacity(VERTEX_COUNT);
    for i in 0..VERTEX_COUNT {
        positions.push([
            if i & 1 == 0 { -1.0 } else { 1.0 },
            if i & 2 == 0 { -0.5 } else { 0.5 },
            if i & 4 == 0 { -2.0 } else { 2.0 },
        ]);
    }
    positions
}

fn cube_normals(positions: &[[f32; 3]]) -> Vec<[f32; 3]> {
    positions
        .iter()
        .map(|p| {
            let len = (p[0] * p[0] + p[1] * p[1] + p[2] * p[2]).sqrt();
            [p[0] / len, p[1] / len, p[2] / len]
        })
        .collect()
}

fn cube_indices() -> Vec<u16> {
    // Two triangles per face, corners addressed by bit pattern
    const FACES: [[u16; 4]; 6] = [
        [0, 1, 3, 2],
        [4, 6, 7, 5],
        [0, 4, 5, 1],
        [2, 3, 7, 6],
        [0, 2, 6, 4],
        [1, 5, 7, 3],
    ];
    FACES
        .iter()
        .flat_map(|[a, b, c, d]| [*a, *b, *c, *a, *c, *d])
        .collect()
}

/// Compute bounding box for positions
fn compute_bounds(positions: &[[f32; 3]]) -> (Vec<f32>, Vec<f32>) {
    let mut min = [f32::MAX; 3];
    let mut max = [f32::MIN; 3];

    for pos in positions {
        for i in 0..3 {
            min[i] = min[i].min(pos[i]);
            max[i] = max[i].max(pos[i]);
        }
    }

    (min.to_vec(), max.to_vec())
}

fn vec3_accessor(view: u32, count: usize, bounds: Option<(Vec<f32>, Vec<f32>)>) -> json::Accessor {
    let (min, max) = match bounds {
        Some((min, max)) => (
            Some(json::Value::from(min)),
            Some(json::Value::from(max)),
        ),
        None => (None, None),
    };
    json::Accessor {
        buffer_view: Some(json::Index::new(view)),
        byte_offset: Some(0u64.into()),
        count: count.into(),
        component_type: Valid(json::accessor::GenericComponentType(
            json::accessor::ComponentType::F32,
        )),
        extensions: Default::default(),
        extras: Default::default(),
        type_: Valid(json::accessor::Type::Vec3),
        min,
        max,
        name: None,
        normalized: false,
        sparse: None,
    }
}

fn view(offset: usize, length: usize, target: json::buffer::Target) -> json::buffer::View {
    json::buffer::View {
        buffer: json::Index::new(0),
        byte_length: length.into(),
        byte_offset: Some(offset.into()),
        byte_stride: None,
        extensions: Default::default(),
        extras: Default::default(),
        name: None,
        target: Some(Valid(target)),
    }
}

/// Pack the cube into one buffer
pub(crate) fn pack_cube() -> (Vec<u8>, Vec<json::buffer::View>, Vec<json::Accessor>) {
    let positions = cube_positions();
    let normals = cube_normals(&positions);
    let indices = cube_indices();

    let mut buffer = Vec::with_capacity(BUFFER_LENGTH);
    let mut views = Vec::new();
    let mut accessors = Vec::new();

    // Positions
    let offset = buffer.len();
    buffer.extend_from_slice(bytemuck::cast_slice(&positions));
    views.push(view(offset, buffer.len() - offset, json::buffer::Target::ArrayBuffer));
    accessors.push(vec3_accessor(0, positions.len(), Some(compute_bounds(&positions))));

    // Normals
    let offset = buffer.len();
    buffer.extend_from_slice(bytemuck::cast_slice(&normals));
    views.push(view(offset, buffer.len() - offset, json::buffer::Target::ArrayBuffer));
    accessors.push(vec3_accessor(1, normals.len(), None));

    // Indices
    let offset = buffer.len();
    buffer.extend_from_slice(bytemuck::cast_slice(&indices));
    views.push(view(
        offset,
        buffer.len() - offset,
        json::buffer::Target::ElementArrayBuffer,
    ));
    accessors.push(json::Accessor {
        buffer_view: Some(json::Index::new(2)),
        byte_offset: Some(0u64.into()),
        count: indices.len().into(),
        component_type: Valid(json::accessor::GenericComponentType(
            json::accessor::ComponentType::U16,
        )),
        extensions: Default::default(),
        extras: Default::default(),
        type_: Valid(json::accessor::Type::Scalar),
        min: None,
        max: None,
        name: None,
        normalized: false,
        sparse: None,
    });

    debug_assert_eq!(buffer.len(), BUFFER_LENGTH);
    (buffer, views, accessors)
}
