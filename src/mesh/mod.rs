pub mod instance;
pub mod lod;
pub mod submesh;
pub mod vertex_ops;

pub use instance::{InstanceId, MeshInstance};
pub use lod::{LodLevel, LodSelectionCallback};
pub use submesh::{SubMesh, SubMeshRange};

use anyhow::bail;
use glam::Mat4;
use id_arena::Id;

use crate::geometry::{GeometryId, GeometryStore, VertexKind};
use crate::gpu::GpuDevice;
use crate::loading::{DelayLoadInfo, DelayLoadState};
use crate::rendering::transform_buffer::InstanceTransformBuffer;
use crate::rendering::visibility::VisibleInstances;
use crate::skinning::SkinningCache;

pub type MeshId = Id<Mesh>;

/// A morph target: absolute positions (and optionally normals) that must
/// match the base geometry's vertex count exactly.
#[derive(Debug, Clone)]
pub struct MorphTarget {
    pub name: String,
    pub positions: Vec<f32>,
    pub normals: Option<Vec<f32>>,
}

/// A renderable scene graph node.
///
/// One concrete type covers every role a mesh can play; auxiliary state
/// (instance list, LOD levels, blocked-proxy flag, delay-load state) tells
/// the role apart instead of subclassing.
pub struct Mesh {
    pub name: String,
    pub world_matrix: Mat4,
    pub material_index: Option<usize>,
    pub unindexed: bool,

    geometry: Option<GeometryId>,
    pub(crate) total_vertices: usize,
    pub(crate) total_indices: usize,
    pub submeshes: Vec<SubMesh>,

    pub(crate) instances: Vec<InstanceId>,
    pub(crate) visibility: Option<VisibleInstances>,
    pub(crate) transform_buffer: InstanceTransformBuffer,

    pub(crate) lod_levels: Vec<LodLevel>,
    pub(crate) blocked_as_lod: bool,
    pub(crate) lod_callback: Option<LodSelectionCallback>,

    pub(crate) skinning: SkinningCache,

    pub(crate) delay_load: DelayLoadState,
    pub(crate) delay_info: Option<DelayLoadInfo>,

    pub(crate) disposed: bool,
}

impl Mesh {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            world_matrix: Mat4::IDENTITY,
            material_index: None,
            unindexed: false,
            geometry: None,
            total_vertices: 0,
            total_indices: 0,
            submeshes: Vec::new(),
            instances: Vec::new(),
            visibility: None,
            transform_buffer: InstanceTransformBuffer::new(),
            lod_levels: Vec::new(),
            blocked_as_lod: false,
            lod_callback: None,
            skinning: SkinningCache::default(),
            delay_load: DelayLoadState::None,
            delay_info: None,
            disposed: false,
        }
    }

    pub fn geometry(&self) -> Option<GeometryId> {
        self.geometry
    }

    pub(crate) fn set_geometry(&mut self, id: Option<GeometryId>) {
        self.geometry = id;
    }

    pub fn total_vertices(&self) -> usize {
        self.total_vertices
    }

    pub fn total_indices(&self) -> usize {
        self.total_indices
    }

    pub fn instances(&self) -> &[InstanceId] {
        &self.instances
    }

    pub fn has_instances(&self) -> bool {
        !self.instances.is_empty()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn is_blocked_as_lod(&self) -> bool {
        self.blocked_as_lod
    }

    pub fn lod_levels(&self) -> &[LodLevel] {
        &self.lod_levels
    }

    pub fn delay_load_state(&self) -> DelayLoadState {
        self.delay_load
    }

    /// Observability hook fired on every LOD selection.
    pub fn set_lod_callback(&mut self, callback: Option<LodSelectionCallback>) {
        self.lod_callback = callback;
    }

    /// Refresh the local view of the shared geometry's totals.
    pub(crate) fn sync_totals(&mut self, store: &GeometryStore) {
        if let Some(record) = self.geometry.and_then(|id| store.get(id)) {
            self.total_vertices = record.total_vertices();
            self.total_indices = record.total_indices();
        }
    }

    /// Renderable this frame: present geometry, no pending delayed load.
    pub fn is_ready(&self, store: &GeometryStore) -> bool {
        if self.disposed {
            return false;
        }
        match self.delay_load {
            DelayLoadState::NotLoaded | DelayLoadState::Loading => return false,
            DelayLoadState::None | DelayLoadState::Loaded => {}
        }
        self.geometry
            .and_then(|id| store.get(id))
            .is_some_and(|record| record.is_ready())
    }

    // ----- partitions -----

    pub fn partitions_consistent(&self) -> bool {
        self.submeshes
            .iter()
            .all(|submesh| submesh.fits(self.total_vertices, self.total_indices))
    }

    /// One partition spanning everything. Kept as-is when a consistent
    /// partitioning already exists, unless `force` rebuilds it anyway.
    pub fn build_global_partition(&mut self, force: bool) {
        if !force && !self.submeshes.is_empty() && self.partitions_consistent() {
            return;
        }

        self.submeshes = vec![SubMesh::new(
            None,
            0,
            self.total_vertices,
            0,
            self.total_indices,
        )];
    }

    /// Replace the partitioning with `count` triangle-aligned chunks.
    pub fn subdivide(&mut self, count: usize) {
        let ranges = submesh::subdivide_ranges(count, self.total_vertices, self.total_indices);
        self.submeshes = ranges.into_iter().map(SubMesh::from_range).collect();
    }

    /// Reattach previously snapshotted partitions, clipping each range to
    /// the current totals and dropping ranges that start past them.
    pub fn rebuild_from_previous_ranges(&mut self, ranges: &[SubMeshRange]) {
        self.submeshes = ranges
            .iter()
            .filter(|range| {
                range.index_start < self.total_indices && range.vertex_start < self.total_vertices
            })
            .map(|range| {
                let mut clipped = *range;
                clipped.index_count = clipped
                    .index_count
                    .min(self.total_indices - clipped.index_start);
                clipped.vertex_count = clipped
                    .vertex_count
                    .min(self.total_vertices - clipped.vertex_start);
                SubMesh::from_range(clipped)
            })
            .collect();
    }

    pub fn submesh_ranges(&self) -> Vec<SubMeshRange> {
        self.submeshes.iter().map(SubMesh::range).collect()
    }

    // ----- render pass bookkeeping -----

    /// Forget per-pass visibility before a new pass; the mapping is
    /// discarded wholesale, not entry by entry.
    pub fn pre_activate(&mut self) {
        self.visibility = None;
    }

    /// Mark the pass id secondary passes should fall back to when they have
    /// no registration of their own.
    pub fn pre_activate_intermediate(&mut self, render_id: u64) {
        if let Some(visibility) = self.visibility.as_mut() {
            visibility.intermediate_default_render_id = Some(render_id);
        }
    }

    // ----- morph targets -----

    /// Attach morph targets, validating vertex counts up front. A mismatch
    /// rejects the whole configuration and leaves the mesh untouched and
    /// renderable.
    pub fn attach_morph_targets(
        &mut self,
        store: &mut GeometryStore,
        device: &mut dyn GpuDevice,
        targets: Vec<MorphTarget>,
    ) -> anyhow::Result<()> {
        let Some(geometry) = self.geometry else {
            bail!("mesh {:?} has no geometry to morph", self.name);
        };
        let total = self.total_vertices;

        for (index, target) in targets.iter().enumerate() {
            if target.positions.len() != total * 3 {
                bail!(
                    "morph target {:?} (#{}) has {} vertices, mesh has {}",
                    target.name,
                    index,
                    target.positions.len() / 3,
                    total
                );
            }
            if let Some(normals) = &target.normals {
                if normals.len() != total * 3 {
                    bail!(
                        "morph target {:?} (#{}) normal count mismatch",
                        target.name,
                        index
                    );
                }
            }
        }

        for (index, target) in targets.into_iter().enumerate() {
            let slot = index as u8;
            store.set_attribute(
                geometry,
                VertexKind::MorphPosition(slot),
                target.positions,
                false,
                3,
                device,
            );
            if let Some(normals) = target.normals {
                store.set_attribute(
                    geometry,
                    VertexKind::MorphNormal(slot),
                    normals,
                    false,
                    3,
                    device,
                );
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mesh_with_totals(vertices: usize, indices: usize) -> Mesh {
        let mut mesh = Mesh::new("test");
        mesh.total_vertices = vertices;
        mesh.total_indices = indices;
        mesh
    }

    #[test]
    fn global_partition_spans_everything() {
        let mut mesh = mesh_with_totals(24, 36);
        mesh.build_global_partition(false);

        assert_eq!(mesh.submeshes.len(), 1);
        let range = mesh.submeshes[0].range();
        assert_eq!(range.vertex_count, 24);
        assert_eq!(range.index_count, 36);
    }

    #[test]
    fn consistent_partitions_survive_rebuild_requests() {
        let mut mesh = mesh_with_totals(24, 36);
        mesh.subdivide(2);
        let before = mesh.submesh_ranges();

        mesh.build_global_partition(false);
        assert_eq!(mesh.submesh_ranges(), before);

        mesh.build_global_partition(true);
        assert_eq!(mesh.submeshes.len(), 1);
    }

    #[test]
    fn shrunk_geometry_invalidates_partitions() {
        let mut mesh = mesh_with_totals(24, 36);
        mesh.subdivide(2);
        assert!(mesh.partitions_consistent());

        mesh.total_indices = 12;
        assert!(!mesh.partitions_consistent());

        mesh.build_global_partition(false);
        assert_eq!(mesh.submeshes.len(), 1);
        assert_eq!(mesh.submeshes[0].index_count, 12);
    }

    #[test]
    fn mismatched_morph_target_is_rejected_whole() {
        use crate::geometry::GeometryStore;
        use crate::gpu::HeadlessDevice;

        let mut device = HeadlessDevice::new();
        let mut store = GeometryStore::new();
        let geometry_id = store.create();
        store.set_attribute(
            geometry_id,
            VertexKind::Position,
            vec![0.0; 12],
            true,
            3,
            &mut device,
        );

        let mut mesh = Mesh::new("morphed");
        mesh.set_geometry(Some(geometry_id));
        mesh.total_vertices = 4;

        let result = mesh.attach_morph_targets(
            &mut store,
            &mut device,
            vec![
                MorphTarget {
                    name: "ok".to_string(),
                    positions: vec![0.0; 12],
                    normals: None,
                },
                MorphTarget {
                    name: "short".to_string(),
                    positions: vec![0.0; 6],
                    normals: None,
                },
            ],
        );

        assert!(result.is_err());
        // Nothing was attached, not even the valid target.
        let record = store.get(geometry_id).unwrap();
        assert!(!record.has_attribute(VertexKind::MorphPosition(0)));
    }

    #[test]
    fn previous_ranges_are_clipped_to_new_totals() {
        let mut mesh = mesh_with_totals(24, 18);
        let ranges = [
            SubMeshRange {
                material_index: Some(1),
                vertex_start: 0,
                vertex_count: 24,
                index_start: 0,
                index_count: 12,
            },
            SubMeshRange {
                material_index: Some(2),
                vertex_start: 0,
                vertex_count: 24,
                index_start: 12,
                index_count: 12,
            },
            SubMeshRange {
                material_index: Some(3),
                vertex_start: 0,
                vertex_count: 24,
                index_start: 24,
                index_count: 12,
            },
        ];

        mesh.rebuild_from_previous_ranges(&ranges);
        assert_eq!(mesh.submeshes.len(), 2);
        assert_eq!(mesh.submeshes[1].index_count, 6);
        assert_eq!(mesh.submeshes[1].material_index, Some(2));
    }
}
