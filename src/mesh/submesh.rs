//! Submesh partitions: disjoint slices of a mesh's index range.
//!
//! Partitions are cheap descriptors over shared geometry. They are rebuilt,
//! never patched, whenever the underlying vertex/index totals stop covering
//! them, and they cache a bounding sphere and a wireframe line list lazily.

use crate::geometry::{GeometryRecord, VertexKind};
use crate::gpu::{BufferId, BufferKind, GpuDevice};
use crate::math::bounds::BoundingSphere;

/// The persistable shape of one partition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SubMeshRange {
    pub material_index: Option<usize>,
    pub vertex_start: usize,
    pub vertex_count: usize,
    pub index_start: usize,
    pub index_count: usize,
}

#[derive(Debug, Default)]
struct WireframeCache {
    indices: Vec<u32>,
    buffer: Option<BufferId>,
}

#[derive(Debug)]
pub struct SubMesh {
    pub material_index: Option<usize>,
    pub vertex_start: usize,
    pub vertex_count: usize,
    pub index_start: usize,
    pub index_count: usize,
    /// Last render pass id this partition was dispatched for.
    pub(crate) render_id: u64,
    bounds: Option<BoundingSphere>,
    wireframe: Option<WireframeCache>,
}

impl SubMesh {
    pub fn new(
        material_index: Option<usize>,
        vertex_start: usize,
        vertex_count: usize,
        index_start: usize,
        index_count: usize,
    ) -> Self {
        Self {
            material_index,
            vertex_start,
            vertex_count,
            index_start,
            index_count,
            render_id: 0,
            bounds: None,
            wireframe: None,
        }
    }

    pub fn from_range(range: SubMeshRange) -> Self {
        Self::new(
            range.material_index,
            range.vertex_start,
            range.vertex_count,
            range.index_start,
            range.index_count,
        )
    }

    pub fn range(&self) -> SubMeshRange {
        SubMeshRange {
            material_index: self.material_index,
            vertex_start: self.vertex_start,
            vertex_count: self.vertex_count,
            index_start: self.index_start,
            index_count: self.index_count,
        }
    }

    pub fn fits(&self, total_vertices: usize, total_indices: usize) -> bool {
        self.index_start + self.index_count <= total_indices
            && self.vertex_start + self.vertex_count <= total_vertices
    }

    /// Drop cached data derived from geometry contents.
    pub fn invalidate_cached(&mut self) {
        self.bounds = None;
        self.wireframe = None;
    }

    pub fn bounding_sphere(&mut self, record: &GeometryRecord) -> Option<BoundingSphere> {
        if self.bounds.is_none() {
            let positions = record.attribute(VertexKind::Position)?;
            let stride = positions.stride.max(1);
            let points = positions
                .data
                .chunks_exact(stride)
                .skip(self.vertex_start)
                .take(self.vertex_count)
                .map(|chunk| glam::Vec3::new(chunk[0], chunk[1], chunk[2]));
            self.bounds = BoundingSphere::from_points(points);
        }
        self.bounds
    }

    pub fn world_bounds(
        &mut self,
        record: &GeometryRecord,
        world: &glam::Mat4,
    ) -> Option<BoundingSphere> {
        self.bounding_sphere(record)
            .map(|sphere| sphere.transform(world))
    }

    /// Line-list index buffer for wireframe fill, built from this
    /// partition's triangles on first use.
    pub(crate) fn wireframe_buffer(
        &mut self,
        record: &GeometryRecord,
        device: &mut dyn GpuDevice,
    ) -> Option<(BufferId, u32)> {
        if self.wireframe.is_none() {
            let indices = record.raw_indices();
            let end = (self.index_start + self.index_count).min(indices.len());
            let mut lines = Vec::with_capacity(self.index_count * 2);
            for triangle in indices[self.index_start..end].chunks_exact(3) {
                lines.extend_from_slice(&[
                    triangle[0],
                    triangle[1],
                    triangle[1],
                    triangle[2],
                    triangle[2],
                    triangle[0],
                ]);
            }
            let buffer = if lines.is_empty() {
                None
            } else {
                Some(device.create_buffer(
                    BufferKind::Index,
                    "wireframe_indices",
                    bytemuck::cast_slice(&lines),
                    false,
                ))
            };
            self.wireframe = Some(WireframeCache {
                indices: lines,
                buffer,
            });
        }

        let cache = self.wireframe.as_ref()?;
        cache
            .buffer
            .map(|buffer| (buffer, cache.indices.len() as u32))
    }
}

/// Split `total_indices` into `count` roughly equal chunks, each aligned up
/// to whole triangles and the last clipped to the remaining indices. Chunks
/// past the total are dropped.
pub fn subdivide_ranges(
    count: usize,
    total_vertices: usize,
    total_indices: usize,
) -> Vec<SubMeshRange> {
    if count == 0 || total_indices == 0 {
        return Vec::new();
    }

    let raw = total_indices.div_ceil(count);
    let chunk = raw.div_ceil(3) * 3;

    let mut ranges = Vec::with_capacity(count);
    let mut offset = 0;
    for _ in 0..count {
        if offset >= total_indices {
            break;
        }
        let index_count = chunk.min(total_indices - offset);
        ranges.push(SubMeshRange {
            material_index: None,
            vertex_start: 0,
            vertex_count: total_vertices,
            index_start: offset,
            index_count,
        });
        offset += index_count;
    }

    ranges
}
