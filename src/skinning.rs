//! CPU fallback for skeletal deformation.
//!
//! Positions and normals are blended from up to 8 bone influences per
//! vertex. The blend always reads the original, pre-deformation data
//! (snapshotted once), never its own output, and runs at most once per
//! simulation frame.

use glam::{Mat4, Vec3};

use crate::geometry::{GeometryRecord, VertexKind};
use crate::mesh::MeshId;

const INFLUENCES_PER_SLOT: usize = 4;

/// Supplies flattened bone matrices, 16 floats per bone.
pub trait SkeletonProvider {
    fn bone_matrices(&self, mesh: MeshId) -> &[f32];
}

#[derive(Debug, Default)]
pub struct SkinningCache {
    original_positions: Vec<f32>,
    original_normals: Vec<f32>,
    blended: Vec<Mat4>,
    last_frame: Option<u64>,
}

impl SkinningCache {
    pub fn last_applied_frame(&self) -> Option<u64> {
        self.last_frame
    }

    /// Drop the snapshots, so the next apply re-captures current data.
    /// Needed after any authoring edit to positions or normals.
    pub fn invalidate(&mut self) {
        self.original_positions.clear();
        self.original_normals.clear();
        self.last_frame = None;
    }
}

/// Blend bone transforms into the record's positions and normals in place.
///
/// Returns whether any work was done; a repeat call within the same
/// simulation frame is a no-op. The caller re-uploads the touched
/// attributes afterwards.
pub fn apply(
    cache: &mut SkinningCache,
    record: &mut GeometryRecord,
    bone_matrices: &[f32],
    frame: u64,
) -> bool {
    if cache.last_frame == Some(frame) {
        return false;
    }

    let vertex_count = {
        let Some(positions) = record.attribute(VertexKind::Position) else {
            return false;
        };
        if record.attribute(VertexKind::BonesWeights).is_none()
            || record.attribute(VertexKind::BonesIndices).is_none()
        {
            return false;
        }

        if cache.original_positions.is_empty() {
            cache.original_positions = positions.data.clone();
            if let Some(normals) = record.attribute(VertexKind::Normal) {
                cache.original_normals = normals.data.clone();
            }
        }

        positions.vertex_count()
    };

    build_blended_matrices(cache, record, bone_matrices, vertex_count);

    if let Some(positions) = record.attribute_mut(VertexKind::Position) {
        for (vertex, matrix) in cache.blended.iter().enumerate() {
            let base = vertex * 3;
            let original = Vec3::new(
                cache.original_positions[base],
                cache.original_positions[base + 1],
                cache.original_positions[base + 2],
            );
            let skinned = matrix.transform_point3(original);
            positions.data[base..base + 3].copy_from_slice(&skinned.to_array());
        }
    }

    if !cache.original_normals.is_empty() {
        if let Some(normals) = record.attribute_mut(VertexKind::Normal) {
            for (vertex, matrix) in cache.blended.iter().enumerate() {
                let base = vertex * 3;
                let original = Vec3::new(
                    cache.original_normals[base],
                    cache.original_normals[base + 1],
                    cache.original_normals[base + 2],
                );
                let skinned = matrix.transform_vector3(original);
                normals.data[base..base + 3].copy_from_slice(&skinned.to_array());
            }
        }
    }

    cache.last_frame = Some(frame);
    true
}

fn build_blended_matrices(
    cache: &mut SkinningCache,
    record: &GeometryRecord,
    bone_matrices: &[f32],
    vertex_count: usize,
) {
    let weights = record.attribute(VertexKind::BonesWeights);
    let indices = record.attribute(VertexKind::BonesIndices);
    let extra_weights = record.attribute(VertexKind::BonesWeightsExtra);
    let extra_indices = record.attribute(VertexKind::BonesIndicesExtra);

    cache.blended.clear();
    cache.blended.reserve(vertex_count);

    for vertex in 0..vertex_count {
        let mut accumulated = Mat4::ZERO;
        let mut influenced = false;

        for (weight_attr, index_attr) in [
            (weights, indices),
            (extra_weights, extra_indices),
        ] {
            let (Some(weight_attr), Some(index_attr)) = (weight_attr, index_attr) else {
                continue;
            };
            let base = vertex * INFLUENCES_PER_SLOT;
            if base + INFLUENCES_PER_SLOT > weight_attr.data.len()
                || base + INFLUENCES_PER_SLOT > index_attr.data.len()
            {
                continue;
            }

            for slot in 0..INFLUENCES_PER_SLOT {
                let weight = weight_attr.data[base + slot];
                if weight <= 0.0 {
                    continue;
                }
                let bone = index_attr.data[base + slot].floor() as usize;
                let offset = bone * 16;
                if offset + 16 > bone_matrices.len() {
                    continue;
                }
                let bone_matrix = Mat4::from_cols_slice(&bone_matrices[offset..offset + 16]);
                accumulated += bone_matrix * weight;
                influenced = true;
            }
        }

        if !influenced {
            accumulated = Mat4::IDENTITY;
        }
        cache.blended.push(accumulated);
    }
}

/// Force every vertex's influence weights to sum to 1.
///
/// A vertex whose weights sum to zero gets a single full influence on its
/// first slot instead of an undefined pose. With an extra weight buffer the
/// sum spans all 8 slots.
pub fn normalize_skin_weights(weights: &mut [f32], mut extra_weights: Option<&mut [f32]>) {
    let vertex_count = weights.len() / INFLUENCES_PER_SLOT;

    for vertex in 0..vertex_count {
        let base = vertex * INFLUENCES_PER_SLOT;
        let primary = &mut weights[base..base + INFLUENCES_PER_SLOT];

        let mut sum: f32 = primary.iter().sum();
        if let Some(extra) = extra_weights.as_deref() {
            sum += extra[base..base + INFLUENCES_PER_SLOT].iter().sum::<f32>();
        }

        if sum == 0.0 {
            primary[0] = 1.0;
            for value in &mut primary[1..] {
                *value = 0.0;
            }
            if let Some(extra) = extra_weights.as_deref_mut() {
                extra[base..base + INFLUENCES_PER_SLOT].fill(0.0);
            }
        } else {
            for value in primary {
                *value /= sum;
            }
            if let Some(extra) = extra_weights.as_deref_mut() {
                for value in &mut extra[base..base + INFLUENCES_PER_SLOT] {
                    *value /= sum;
                }
            }
        }
    }
}

/// Normalize the weight attributes stored on a record. The caller
/// re-uploads them afterwards.
pub fn normalize_record_weights(record: &mut GeometryRecord) {
    let Some(attribute) = record.attribute_mut(VertexKind::BonesWeights) else {
        return;
    };
    let mut primary = std::mem::take(&mut attribute.data);

    if let Some(extra) = record.attribute_mut(VertexKind::BonesWeightsExtra) {
        normalize_skin_weights(&mut primary, Some(&mut extra.data));
    } else {
        normalize_skin_weights(&mut primary, None);
    }

    if let Some(attribute) = record.attribute_mut(VertexKind::BonesWeights) {
        attribute.data = primary;
    }
}
