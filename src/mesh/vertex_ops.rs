//! Structural edits to a mesh's vertex data.
//!
//! These operations resize the underlying buffers, so each one snapshots
//! the current partitions and reattaches them afterwards; partitions are
//! never migrated implicitly. A mesh still sharing its geometry gets a
//! private copy first.

use glam::Vec3;
use itertools::izip;

use crate::geometry::{GeometryId, GeometryStore, VertexKind};
use crate::gpu::GpuDevice;
use crate::mesh::{Mesh, SubMeshRange};

fn ensure_private_geometry(
    mesh: &mut Mesh,
    store: &mut GeometryStore,
    device: &mut dyn GpuDevice,
) -> Option<GeometryId> {
    let id = mesh.geometry()?;
    if store.ref_count(id) > 1 {
        let copy = store.make_unique(id, device)?;
        mesh.set_geometry(Some(copy));
        return Some(copy);
    }
    Some(id)
}

/// Duplicate vertices per index so every attribute kind has one value per
/// corner. Returns the old index list, or `None` when there is nothing to
/// expand.
fn expand_attributes_by_index(
    geometry_id: GeometryId,
    store: &mut GeometryStore,
    device: &mut dyn GpuDevice,
) -> Option<Vec<u32>> {
    let (mut kinds, indices) = {
        let record = store.get(geometry_id)?;
        let kinds: Vec<VertexKind> = record.attribute_kinds().collect();
        (kinds, record.raw_indices().to_vec())
    };
    if indices.is_empty() {
        return None;
    }

    // Position first: it re-establishes the vertex total the remaining
    // kinds are validated against.
    kinds.sort_by_key(|kind| kind.stream_order());

    for kind in kinds {
        let (source, stride, updatable) = {
            let attribute = store.get(geometry_id)?.attribute(kind)?;
            (attribute.data.clone(), attribute.stride, attribute.updatable)
        };

        let mut expanded = Vec::with_capacity(indices.len() * stride);
        for &index in &indices {
            let base = index as usize * stride;
            expanded.extend_from_slice(&source[base..base + stride]);
        }
        store.set_attribute(geometry_id, kind, expanded, updatable, stride, device);
    }

    Some(indices)
}

fn remap_ranges_after_expansion(ranges: &[SubMeshRange]) -> Vec<SubMeshRange> {
    ranges
        .iter()
        .map(|range| SubMeshRange {
            material_index: range.material_index,
            vertex_start: range.index_start,
            vertex_count: range.index_count,
            index_start: range.index_start,
            index_count: range.index_count,
        })
        .collect()
}

/// Convert to flat shading: one vertex per triangle corner with face
/// normals. Shared-vertex smoothing is lost by design.
pub fn convert_to_flat_shaded(
    mesh: &mut Mesh,
    store: &mut GeometryStore,
    device: &mut dyn GpuDevice,
) {
    let Some(geometry_id) = ensure_private_geometry(mesh, store, device) else {
        return;
    };
    let previous_ranges = mesh.submesh_ranges();

    let Some(old_indices) = expand_attributes_by_index(geometry_id, store, device) else {
        log::warn!("mesh {:?} has no indices to flat-shade", mesh.name);
        return;
    };

    // Face normal for each triangle, written to all three corners.
    let normals = {
        let Some(record) = store.get(geometry_id) else {
            return;
        };
        let Some(positions) = record.attribute(VertexKind::Position) else {
            return;
        };
        let stride = positions.stride;
        let mut normals = vec![0.0f32; positions.data.len() / stride * 3];
        for (triangle, chunk) in positions.data.chunks_exact(stride * 3).enumerate() {
            let a = Vec3::new(chunk[0], chunk[1], chunk[2]);
            let b = Vec3::new(chunk[stride], chunk[stride + 1], chunk[stride + 2]);
            let c = Vec3::new(
                chunk[stride * 2],
                chunk[stride * 2 + 1],
                chunk[stride * 2 + 2],
            );
            let face_normal = (b - a).cross(c - a).normalize_or_zero();
            for corner in 0..3 {
                let base = (triangle * 3 + corner) * 3;
                normals[base..base + 3].copy_from_slice(&face_normal.to_array());
            }
        }
        normals
    };
    store.set_attribute(geometry_id, VertexKind::Normal, normals, false, 3, device);

    store.set_indices(
        geometry_id,
        (0..old_indices.len() as u32).collect(),
        None,
        false,
        device,
    );

    mesh.sync_totals(store);
    mesh.rebuild_from_previous_ranges(&remap_ranges_after_expansion(&previous_ranges));
    mesh.skinning.invalidate();
}

/// Duplicate vertices so index order equals vertex order, then draw without
/// the index buffer.
pub fn convert_to_unindexed(
    mesh: &mut Mesh,
    store: &mut GeometryStore,
    device: &mut dyn GpuDevice,
) {
    let Some(geometry_id) = ensure_private_geometry(mesh, store, device) else {
        return;
    };
    let previous_ranges = mesh.submesh_ranges();

    let Some(old_indices) = expand_attributes_by_index(geometry_id, store, device) else {
        log::warn!("mesh {:?} has no indices to unindex", mesh.name);
        return;
    };

    store.set_indices(
        geometry_id,
        (0..old_indices.len() as u32).collect(),
        None,
        false,
        device,
    );

    mesh.unindexed = true;
    mesh.sync_totals(store);
    mesh.rebuild_from_previous_ranges(&remap_ranges_after_expansion(&previous_ranges));
    mesh.skinning.invalidate();
}

/// Push vertices along their normals by a sampled height.
///
/// `heights` is a single-channel map of `width * height` bytes. A mesh
/// missing positions, normals or a first UV set (or whose positions are not
/// updatable) is left untouched with a warning.
pub fn apply_displacement_map(
    mesh: &mut Mesh,
    store: &mut GeometryStore,
    device: &mut dyn GpuDevice,
    heights: &[u8],
    width: usize,
    height: usize,
    min_height: f32,
    max_height: f32,
) {
    let Some(geometry_id) = mesh.geometry() else {
        return;
    };
    if width == 0 || height == 0 || heights.len() < width * height {
        log::warn!("displacement map smaller than {}x{}; ignoring", width, height);
        return;
    }

    let (normals, uvs) = {
        let Some(record) = store.get(geometry_id) else {
            return;
        };
        let ready = record.has_attribute(VertexKind::Position)
            && record.has_attribute(VertexKind::Normal)
            && record.has_attribute(VertexKind::Uv(0));
        if !ready {
            log::warn!(
                "mesh {:?} needs positions, normals and a first UV set for displacement",
                mesh.name
            );
            return;
        }
        if !record.attribute(VertexKind::Position).is_some_and(|a| a.updatable) {
            log::warn!(
                "mesh {:?} positions are not updatable; displacement skipped",
                mesh.name
            );
            return;
        }
        (
            record.attribute(VertexKind::Normal).map(|a| a.data.clone()).unwrap_or_default(),
            record.attribute(VertexKind::Uv(0)).map(|a| a.data.clone()).unwrap_or_default(),
        )
    };

    {
        let Some(record) = store.get_mut(geometry_id) else {
            return;
        };
        let Some(positions) = record.attribute_mut(VertexKind::Position) else {
            return;
        };

        for (position, normal, uv) in izip!(
            positions.data.chunks_exact_mut(3),
            normals.chunks_exact(3),
            uvs.chunks_exact(2)
        ) {
            let u = uv[0].clamp(0.0, 1.0);
            let v = uv[1].clamp(0.0, 1.0);
            let px = ((u * (width - 1) as f32) as usize).min(width - 1);
            let py = ((v * (height - 1) as f32) as usize).min(height - 1);

            let gradient = heights[py * width + px] as f32 / 255.0;
            let offset = min_height + (max_height - min_height) * gradient;
            let direction = Vec3::new(normal[0], normal[1], normal[2]).normalize_or_zero();

            position[0] += direction.x * offset;
            position[1] += direction.y * offset;
            position[2] += direction.z * offset;
        }
    }

    store.upload_attribute(geometry_id, VertexKind::Position, device);
    for submesh in &mut mesh.submeshes {
        submesh.invalidate_cached();
    }
    mesh.skinning.invalidate();
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Mat4;

    use crate::gpu::HeadlessDevice;
    use crate::scene::Scene;

    fn quad_scene() -> (Scene, crate::mesh::MeshId, HeadlessDevice) {
        let mut scene = Scene::new();
        let mut device = HeadlessDevice::new();
        let mesh_id = scene.add_mesh(Mesh::new("quad"));

        let geometry_id = scene.geometry.create();
        scene.geometry.set_attribute(
            geometry_id,
            VertexKind::Position,
            vec![
                0.0, 0.0, 0.0, //
                1.0, 0.0, 0.0, //
                1.0, 1.0, 0.0, //
                0.0, 1.0, 0.0,
            ],
            true,
            3,
            &mut device,
        );
        scene.geometry.set_attribute(
            geometry_id,
            VertexKind::Normal,
            vec![
                0.0, 0.0, 1.0, //
                0.0, 0.0, 1.0, //
                0.0, 0.0, 1.0, //
                0.0, 0.0, 1.0,
            ],
            true,
            3,
            &mut device,
        );
        scene.geometry.set_attribute(
            geometry_id,
            VertexKind::Uv(0),
            vec![0.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.0, 1.0],
            false,
            2,
            &mut device,
        );
        scene
            .geometry
            .set_indices(geometry_id, vec![0, 1, 2, 0, 2, 3], None, false, &mut device);
        scene.assign_geometry(mesh_id, geometry_id, &mut device);

        (scene, mesh_id, device)
    }

    #[test]
    fn flat_shading_duplicates_vertices_and_keeps_partitions() {
        let (mut scene, mesh_id, mut device) = quad_scene();
        scene.get_mesh_mut(mesh_id).unwrap().subdivide(2);

        let mesh = scene.meshes.get_mut(mesh_id).unwrap();
        convert_to_flat_shaded(mesh, &mut scene.geometry, &mut device);

        assert_eq!(mesh.total_vertices(), 6);
        assert_eq!(mesh.total_indices(), 6);
        assert_eq!(mesh.submeshes.len(), 2);
        assert!(mesh.partitions_consistent());

        let record = scene.geometry.get(mesh.geometry().unwrap()).unwrap();
        let normals = &record.attribute(VertexKind::Normal).unwrap().data;
        assert_eq!(&normals[..3], &[0.0, 0.0, 1.0]);
        assert_eq!(record.raw_indices(), (0..6).collect::<Vec<u32>>());
    }

    #[test]
    fn flat_shading_copies_shared_geometry_first() {
        let (mut scene, mesh_id, mut device) = quad_scene();
        let geometry_id = scene.get_mesh(mesh_id).unwrap().geometry().unwrap();
        let other = scene.add_mesh(Mesh::new("sibling"));
        scene.assign_geometry(other, geometry_id, &mut device);

        let mesh = scene.meshes.get_mut(mesh_id).unwrap();
        convert_to_flat_shaded(mesh, &mut scene.geometry, &mut device);

        assert_ne!(mesh.geometry().unwrap(), geometry_id);
        let sibling_record = scene.geometry.get(geometry_id).unwrap();
        assert_eq!(sibling_record.total_vertices(), 4);
    }

    #[test]
    fn unindexing_sets_the_flag_and_expands() {
        let (mut scene, mesh_id, mut device) = quad_scene();

        let mesh = scene.meshes.get_mut(mesh_id).unwrap();
        convert_to_unindexed(mesh, &mut scene.geometry, &mut device);

        assert!(mesh.unindexed);
        assert_eq!(mesh.total_vertices(), 6);
    }

    #[test]
    fn displacement_moves_vertices_along_normals() {
        let (mut scene, mesh_id, mut device) = quad_scene();

        let mesh = scene.meshes.get_mut(mesh_id).unwrap();
        apply_displacement_map(
            mesh,
            &mut scene.geometry,
            &mut device,
            &[255, 255, 255, 255],
            2,
            2,
            0.0,
            1.0,
        );

        let record = scene.geometry.get(mesh.geometry().unwrap()).unwrap();
        let positions = &record.attribute(VertexKind::Position).unwrap().data;
        assert_eq!(positions[2], 1.0);
        assert_eq!(positions[5], 1.0);
    }

    #[test]
    fn displacement_without_uvs_is_a_no_op() {
        let mut scene = Scene::new();
        let mut device = HeadlessDevice::new();
        let mesh_id = scene.add_mesh(Mesh::new("bare"));

        let geometry_id = scene.geometry.create();
        scene.geometry.set_attribute(
            geometry_id,
            VertexKind::Position,
            vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
            true,
            3,
            &mut device,
        );
        scene
            .geometry
            .set_indices(geometry_id, vec![0, 1, 2], None, false, &mut device);
        scene.assign_geometry(mesh_id, geometry_id, &mut device);
        let _ = scene.create_instance(mesh_id, Mat4::IDENTITY);

        let mesh = scene.meshes.get_mut(mesh_id).unwrap();
        apply_displacement_map(
            mesh,
            &mut scene.geometry,
            &mut device,
            &[255; 4],
            2,
            2,
            0.0,
            1.0,
        );

        let record = scene.geometry.get(geometry_id).unwrap();
        assert_eq!(record.attribute(VertexKind::Position).unwrap().data[0], 0.0);
        assert_eq!(record.attribute(VertexKind::Position).unwrap().data[2], 0.0);
    }
}
