//! Position quantization to 16-bit integers (`KHR_mesh_quantization`)
//!
//! Each eligible mesh gets one uniform scale and an offset at its bounding box
//! minimum. Positions are stored as unsigned integers padded to four
//! components, and every node instancing the mesh moves it onto a new child
//! node that carries the dequantization transform.

use glam::Vec3;
use gltf_json as json;
use hashbrown::HashMap;
use json::accessor::{ComponentType, GenericComponentType, Type};
use json::validation::Checked::Valid;

use super::Stage;
use crate::error::{PipelineError, Result};
use crate::model::AssetModel;

pub const KHR_MESH_QUANTIZATION: &str = "KHR_mesh_quantization";

pub const DEFAULT_POSITION_BITS: u8 = 14;

/// Quantized element: x, y, z and one padding lane
const ELEMENT_STRIDE: usize = 8;

const NAME: &str = "quantize-positions";

pub struct QuantizePositions {
    bits: u8,
}

impl QuantizePositions {
    pub fn new(bits: u8) -> Result<Self> {
        if !(1..=16).contains(&bits) {
            return Err(PipelineError::Config(format!(
                "position_bits must be between 1 and 16, got {bits}"
            )));
        }
        Ok(Self { bits })
    }

    pub fn bits(&self) -> u8 {
        self.bits
    }

    fn max_value(&self) -> f32 {
        ((1u32 << self.bits) - 1) as f32
    }
}

impl Default for QuantizePositions {
    fn default() -> Self {
        Self {
            bits: DEFAULT_POSITION_BITS,
        }
    }
}

/// One mesh selected for quantization
struct MeshPlan {
    mesh: usize,
    accessors: Vec<usize>,
    min: Vec3,
    scale: f32,
}

impl Stage for QuantizePositions {
    fn name(&self) -> &str {
        NAME
    }

    fn apply(&self, mut model: AssetModel) -> Result<AssetModel> {
        let plans = self.plan(&model)?;
        if plans.is_empty() {
            tracing::debug!("No meshes eligible for position quantization");
            return Ok(model);
        }

        let max_q = self.max_value();
        let mut packed: Vec<u8> = Vec::new();
        // (accessor, offset into the new buffer, quantized min, quantized max)
        let mut rewrites: Vec<(usize, usize, [u16; 3], [u16; 3])> = Vec::new();

        for plan in &plans {
            for &accessor in &plan.accessors {
                let positions = read_positions(&model, accessor)?;
                let offset = packed.len();
                let mut lo = [u16::MAX; 3];
                let mut hi = [0u16; 3];
                for position in positions {
                    let q = ((position - plan.min) / plan.scale)
                        .round()
                        .clamp(Vec3::ZERO, Vec3::splat(max_q));
                    let element = [q.x as u16, q.y as u16, q.z as u16, 0];
                    for i in 0..3 {
                        lo[i] = lo[i].min(element[i]);
                        hi[i] = hi[i].max(element[i]);
                    }
                    packed.extend_from_slice(bytemuck::cast_slice(&element));
                }
                if lo[0] > hi[0] {
                    lo = [0; 3];
                }
                rewrites.push((accessor, offset, lo, hi));
            }
        }

        let buffer = model.push_buffer(packed, Some("quantized_positions".to_string()));
        for (accessor, offset, lo, hi) in rewrites {
            let count = model.root.accessors[accessor].count.0 as usize;
            let view = json::Index::new(model.root.buffer_views.len() as u32);
            model.root.buffer_views.push(json::buffer::View {
                buffer,
                byte_length: (count * ELEMENT_STRIDE).into(),
                byte_offset: Some((offset as u64).into()),
                byte_stride: Some(json::buffer::Stride(ELEMENT_STRIDE)),
                extensions: Default::default(),
                extras: Default::default(),
                name: None,
                target: Some(Valid(json::buffer::Target::ArrayBuffer)),
            });

            let target = &mut model.root.accessors[accessor];
            target.buffer_view = Some(view);
            target.byte_offset = Some(0u64.into());
            target.component_type = Valid(GenericComponentType(ComponentType::U16));
            target.normalized = false;
            target.min = Some(json::Value::from(lo.to_vec()));
            target.max = Some(json::Value::from(hi.to_vec()));
        }

        for plan in &plans {
            attach_dequantize_nodes(&mut model.root, plan);
        }
        model.declare_extension(KHR_MESH_QUANTIZATION, true);

        tracing::info!(
            "Quantized positions of {} mesh(es) to {} bits",
            plans.len(),
            self.bits
        );
        Ok(model)
    }
}

impl QuantizePositions {
    fn plan(&self, model: &AssetModel) -> Result<Vec<MeshPlan>> {
        let root = &model.root;
        let uses = accessor_use_counts(root);

        let mut skinned = vec![false; root.meshes.len()];
        let mut instanced = vec![false; root.meshes.len()];
        for node in &root.nodes {
            if let Some(mesh) = node.mesh.and_then(|m| instanced.get_mut(m.value())) {
                *mesh = true;
            }
            if let (Some(mesh), Some(_)) = (node.mesh, node.skin) {
                if let Some(flag) = skinned.get_mut(mesh.value()) {
                    *flag = true;
                }
            }
        }

        let mut plans = Vec::new();
        for (m, mesh) in root.meshes.iter().enumerate() {
            if !instanced[m] || skinned[m] {
                continue;
            }
            if mesh.primitives.iter().any(|p| p.targets.is_some()) {
                tracing::debug!("Mesh {m} has morph targets, leaving positions as float");
                continue;
            }

            let mut accessors = Vec::new();
            let mut eligible = true;
            for primitive in &mesh.primitives {
                let Some(index) = primitive
                    .attributes
                    .get(&Valid(json::mesh::Semantic::Positions))
                else {
                    continue;
                };
                let index = index.value();
                if !accessors.contains(&index) {
                    accessors.push(index);
                }
                let usable = root.accessors.get(index).is_some_and(|accessor| {
                    is_float_vec3(accessor)
                        && accessor.sparse.is_none()
                        && accessor.buffer_view.is_some()
                });
                eligible &= usable;
            }
            if accessors.is_empty() || !eligible {
                continue;
            }

            // Every use of these accessors must be a POSITION of this mesh
            let local = mesh
                .primitives
                .iter()
                .filter_map(|p| p.attributes.get(&Valid(json::mesh::Semantic::Positions)))
                .fold(HashMap::new(), |mut counts: HashMap<usize, usize>, index| {
                    *counts.entry(index.value()).or_default() += 1;
                    counts
                });
            if accessors
                .iter()
                .any(|a| uses.get(a).copied().unwrap_or(0) != local.get(a).copied().unwrap_or(0))
            {
                tracing::debug!("Mesh {m} shares its position data, leaving positions as float");
                continue;
            }

            let mut min = Vec3::splat(f32::MAX);
            let mut max = Vec3::splat(f32::MIN);
            for &accessor in &accessors {
                for position in read_positions(model, accessor)? {
                    min = min.min(position);
                    max = max.max(position);
                }
            }
            if min.x > max.x {
                continue;
            }
            if !min.is_finite() || !max.is_finite() {
                tracing::warn!("Mesh {m} has non-finite positions, leaving them as float");
                continue;
            }

            let extent = (max - min).max_element();
            let scale = if extent > 0.0 {
                extent / self.max_value()
            } else {
                1.0
            };
            plans.push(MeshPlan {
                mesh: m,
                accessors,
                min,
                scale,
            });
        }
        Ok(plans)
    }
}

fn is_float_vec3(accessor: &json::Accessor) -> bool {
    matches!(
        (&accessor.component_type, &accessor.type_),
        (Valid(GenericComponentType(ComponentType::F32)), Valid(Type::Vec3))
    )
}

/// How many times each accessor is referenced anywhere in the document
fn accessor_use_counts(root: &json::Root) -> HashMap<usize, usize> {
    let mut uses: HashMap<usize, usize> = HashMap::new();
    let mut bump = |index: usize| *uses.entry(index).or_default() += 1;

    for mesh in &root.meshes {
        for primitive in &mesh.primitives {
            primitive.attributes.values().for_each(|a| bump(a.value()));
            if let Some(indices) = primitive.indices {
                bump(indices.value());
            }
            for target in primitive.targets.iter().flatten() {
                [target.positions, target.normals, target.tangents]
                    .into_iter()
                    .flatten()
                    .for_each(|a| bump(a.value()));
            }
        }
    }
    for skin in &root.skins {
        if let Some(matrices) = skin.inverse_bind_matrices {
            bump(matrices.value());
        }
    }
    for animation in &root.animations {
        for sampler in &animation.samplers {
            bump(sampler.input.value());
            bump(sampler.output.value());
        }
    }
    uses
}

fn read_positions(model: &AssetModel, index: usize) -> Result<Vec<Vec3>> {
    let missing = |what: &str| PipelineError::invariant(NAME, format!("accessor {index}: {what}"));
    let accessor = model
        .root
        .accessors
        .get(index)
        .ok_or_else(|| missing("not found"))?;
    let view_index = accessor
        .buffer_view
        .ok_or_else(|| missing("no buffer view"))?;
    let view = model
        .root
        .buffer_views
        .get(view_index.value())
        .ok_or_else(|| missing("buffer view not found"))?;
    let bytes = model
        .buffer_bytes(view.buffer.value())
        .ok_or_else(|| missing("buffer has no payload"))?;

    let stride = view.byte_stride.as_ref().map(|s| s.0).unwrap_or(12);
    let start = view
        .byte_offset
        .as_ref()
        .map(|o| o.0)
        .unwrap_or(0)
        .checked_add(accessor.byte_offset.as_ref().map(|o| o.0).unwrap_or(0))
        .and_then(|start| usize::try_from(start).ok())
        .ok_or_else(|| missing("offset overflows"))?;
    let count = usize::try_from(accessor.count.0).map_err(|_| missing("count overflows"))?;

    (0..count)
        .map(|i| {
            i.checked_mul(stride)
                .and_then(|step| step.checked_add(start))
                .and_then(|at| bytes.get(at..at.checked_add(12)?))
                .map(|raw| Vec3::from_array(bytemuck::pod_read_unaligned::<[f32; 3]>(raw)))
                .ok_or_else(|| missing("element past the end of its buffer"))
        })
        .collect()
}

/// Move the mesh of every node instancing `plan.mesh` onto a child node
/// carrying the dequantization transform
fn attach_dequantize_nodes(root: &mut json::Root, plan: &MeshPlan) {
    let owners: Vec<usize> = root
        .nodes
        .iter()
        .enumerate()
        .filter(|(_, node)| node.mesh.map(|m| m.value()) == Some(plan.mesh))
        .map(|(i, _)| i)
        .collect();

    for owner in owners {
        let child = json::Index::new(root.nodes.len() as u32);
        let mesh = root.nodes[owner].mesh.take();
        let weights = root.nodes[owner].weights.take();
        let name = root.nodes[owner].name.as_ref().map(|n| format!("{n}_quantized"));
        root.nodes.push(json::Node {
            camera: None,
            children: None,
            extensions: Default::default(),
            extras: Default::default(),
            matrix: None,
            mesh,
            name,
            rotation: None,
            scale: Some([plan.scale; 3]),
            skin: None,
            translation: Some(plan.min.to_array()),
            weights,
        });
        root.nodes[owner]
            .children
            .get_or_insert_with(Vec::new)
            .push(child);
    }
}
