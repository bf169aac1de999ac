//! Shared geometry records with explicit reference counts.
//!
//! Many meshes can render from one record; the store tracks how many. A
//! record's GPU buffers are released exactly when its count reaches zero,
//! and a mesh that wants to mutate shared data first takes a private deep
//! copy with [`GeometryStore::make_unique`].

use std::borrow::Cow;
use std::collections::HashMap;

use id_arena::{Arena, Id};

use crate::geometry::VertexKind;
use crate::gpu::{BufferId, BufferKind, GpuDevice};

pub type GeometryId = Id<GeometryRecord>;

#[derive(Debug, Clone)]
pub struct VertexAttribute {
    pub data: Vec<f32>,
    pub stride: usize,
    pub updatable: bool,
    pub buffer: Option<BufferId>,
}

impl VertexAttribute {
    pub fn vertex_count(&self) -> usize {
        if self.stride == 0 {
            0
        } else {
            self.data.len() / self.stride
        }
    }
}

#[derive(Debug, Default)]
pub struct GeometryRecord {
    attributes: HashMap<VertexKind, VertexAttribute>,
    indices: Vec<u32>,
    indices_updatable: bool,
    index_buffer: Option<BufferId>,
    total_vertices: usize,
    total_indices: usize,
    ref_count: usize,
    released: bool,
}

impl GeometryRecord {
    pub fn total_vertices(&self) -> usize {
        self.total_vertices
    }

    pub fn total_indices(&self) -> usize {
        self.total_indices
    }

    pub fn ref_count(&self) -> usize {
        self.ref_count
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    pub fn has_attribute(&self, kind: VertexKind) -> bool {
        self.attributes.contains_key(&kind)
    }

    pub fn attribute(&self, kind: VertexKind) -> Option<&VertexAttribute> {
        self.attributes.get(&kind)
    }

    pub fn attribute_mut(&mut self, kind: VertexKind) -> Option<&mut VertexAttribute> {
        self.attributes.get_mut(&kind)
    }

    pub fn attribute_kinds(&self) -> impl Iterator<Item = VertexKind> + '_ {
        self.attributes.keys().copied()
    }

    pub fn index_buffer(&self) -> Option<BufferId> {
        self.index_buffer
    }

    pub fn raw_indices(&self) -> &[u32] {
        &self.indices
    }

    /// Whether every buffer a draw needs is present and uploaded.
    pub fn is_ready(&self) -> bool {
        !self.released
            && self
                .attributes
                .get(&VertexKind::Position)
                .is_some_and(|attribute| attribute.buffer.is_some())
    }

    fn release_buffers(&mut self, device: &mut dyn GpuDevice) {
        for attribute in self.attributes.values_mut() {
            if let Some(buffer) = attribute.buffer.take() {
                device.dispose_buffer(buffer);
            }
        }
        if let Some(buffer) = self.index_buffer.take() {
            device.dispose_buffer(buffer);
        }
        self.released = true;
    }
}

#[derive(Debug, Default)]
pub struct GeometryStore {
    records: Arena<GeometryRecord>,
}

impl GeometryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self) -> GeometryId {
        self.records.alloc(GeometryRecord::default())
    }

    pub fn get(&self, id: GeometryId) -> Option<&GeometryRecord> {
        self.records.get(id).filter(|record| !record.released)
    }

    pub fn get_mut(&mut self, id: GeometryId) -> Option<&mut GeometryRecord> {
        self.records.get_mut(id).filter(|record| !record.released)
    }

    /// Register one more mesh rendering from this record. Returns the
    /// record's (total_vertices, total_indices) for the mesh's local view.
    pub fn attach(&mut self, id: GeometryId) -> Option<(usize, usize)> {
        let record = self.get_mut(id)?;
        record.ref_count += 1;
        Some((record.total_vertices, record.total_indices))
    }

    /// Drop one mesh's hold on the record. GPU buffers are released when the
    /// count reaches zero; `force_dispose` additionally discards the CPU-side
    /// data so the record cannot be revived.
    pub fn detach(&mut self, id: GeometryId, force_dispose: bool, device: &mut dyn GpuDevice) {
        let Some(record) = self.records.get_mut(id) else {
            return;
        };

        record.ref_count = record.ref_count.saturating_sub(1);
        if record.ref_count > 0 {
            return;
        }

        record.release_buffers(device);
        if force_dispose {
            record.attributes.clear();
            record.indices.clear();
            record.total_vertices = 0;
            record.total_indices = 0;
        }
    }

    /// Deep-copy the record into a fresh one owned by a single mesh.
    ///
    /// The copy always has a reference count of 1, even when the source
    /// count was already 1, and later mutation of either side never leaks
    /// into the other. The source loses one reference.
    pub fn make_unique(
        &mut self,
        id: GeometryId,
        device: &mut dyn GpuDevice,
    ) -> Option<GeometryId> {
        let source = self.get(id)?;

        let mut attributes = HashMap::with_capacity(source.attributes.len());
        for (&kind, attribute) in &source.attributes {
            attributes.insert(
                kind,
                VertexAttribute {
                    data: attribute.data.clone(),
                    stride: attribute.stride,
                    updatable: attribute.updatable,
                    buffer: None,
                },
            );
        }

        let mut copy = GeometryRecord {
            attributes,
            indices: source.indices.clone(),
            indices_updatable: source.indices_updatable,
            index_buffer: None,
            total_vertices: source.total_vertices,
            total_indices: source.total_indices,
            ref_count: 1,
            released: false,
        };

        for (&kind, attribute) in copy.attributes.iter_mut() {
            attribute.buffer = Some(device.create_buffer(
                BufferKind::Vertex,
                &kind.label(),
                bytemuck::cast_slice(&attribute.data),
                attribute.updatable,
            ));
        }
        if !copy.indices.is_empty() {
            copy.index_buffer = Some(device.create_buffer(
                BufferKind::Index,
                "indices",
                bytemuck::cast_slice(&copy.indices),
                copy.indices_updatable,
            ));
        }

        let copy_id = self.records.alloc(copy);
        self.detach(id, false, device);
        Some(copy_id)
    }

    /// Store an attribute stream and upload it. A non-position stream whose
    /// vertex count disagrees with the record's total is rejected with a
    /// warning, keeping strides consistent across the record.
    pub fn set_attribute(
        &mut self,
        id: GeometryId,
        kind: VertexKind,
        data: Vec<f32>,
        updatable: bool,
        stride: usize,
        device: &mut dyn GpuDevice,
    ) {
        let Some(record) = self.get_mut(id) else {
            return;
        };

        let stride = if stride == 0 {
            kind.default_stride()
        } else {
            stride
        };
        let vertex_count = data.len() / stride;

        if kind == VertexKind::Position {
            record.total_vertices = vertex_count;
        } else if record.total_vertices != 0 && vertex_count != record.total_vertices {
            log::warn!(
                "attribute {} has {} vertices, geometry has {}; ignoring",
                kind.label(),
                vertex_count,
                record.total_vertices
            );
            return;
        }

        let bytes: &[u8] = bytemuck::cast_slice(&data);
        let buffer = match record.attributes.get_mut(&kind) {
            Some(existing) => match existing.buffer {
                Some(buffer)
                    if updatable
                        && existing.updatable
                        && existing.data.len() == data.len() =>
                {
                    device.update_buffer(buffer, 0, bytes);
                    Some(buffer)
                }
                _ => {
                    if let Some(old) = existing.buffer.take() {
                        device.dispose_buffer(old);
                    }
                    Some(device.create_buffer(BufferKind::Vertex, &kind.label(), bytes, updatable))
                }
            },
            None => Some(device.create_buffer(BufferKind::Vertex, &kind.label(), bytes, updatable)),
        };

        record.attributes.insert(
            kind,
            VertexAttribute {
                data,
                stride,
                updatable,
                buffer,
            },
        );
    }

    /// Re-upload an attribute after in-place CPU mutation.
    pub fn upload_attribute(&mut self, id: GeometryId, kind: VertexKind, device: &mut dyn GpuDevice) {
        let Some(record) = self.get_mut(id) else {
            return;
        };
        let Some(attribute) = record.attributes.get_mut(&kind) else {
            return;
        };

        let bytes: &[u8] = bytemuck::cast_slice(&attribute.data);
        match attribute.buffer {
            Some(buffer) if attribute.updatable => device.update_buffer(buffer, 0, bytes),
            _ => {
                if let Some(old) = attribute.buffer.take() {
                    device.dispose_buffer(old);
                }
                attribute.buffer = Some(device.create_buffer(
                    BufferKind::Vertex,
                    &kind.label(),
                    bytes,
                    attribute.updatable,
                ));
            }
        }
    }

    pub fn set_indices(
        &mut self,
        id: GeometryId,
        data: Vec<u32>,
        total_vertices: Option<usize>,
        updatable: bool,
        device: &mut dyn GpuDevice,
    ) {
        let Some(record) = self.get_mut(id) else {
            return;
        };

        if let Some(old) = record.index_buffer.take() {
            device.dispose_buffer(old);
        }

        record.total_indices = data.len();
        if let Some(total) = total_vertices {
            record.total_vertices = total;
        }
        record.indices_updatable = updatable;
        record.index_buffer = if data.is_empty() {
            None
        } else {
            Some(device.create_buffer(
                BufferKind::Index,
                "indices",
                bytemuck::cast_slice(&data),
                updatable,
            ))
        };
        record.indices = data;
    }

    /// Read an attribute stream. `None` when the kind has no backing buffer.
    /// With `copy_when_shared`, callers get a private copy whenever more
    /// than one mesh still renders from this record.
    pub fn attribute_data(
        &self,
        id: GeometryId,
        kind: VertexKind,
        copy_when_shared: bool,
    ) -> Option<Cow<'_, [f32]>> {
        let record = self.get(id)?;
        let attribute = record.attributes.get(&kind)?;

        if copy_when_shared && record.ref_count > 1 {
            Some(Cow::Owned(attribute.data.clone()))
        } else {
            Some(Cow::Borrowed(attribute.data.as_slice()))
        }
    }

    pub fn indices(
        &self,
        id: GeometryId,
        copy_when_shared: bool,
        force_copy: bool,
    ) -> Option<Cow<'_, [u32]>> {
        let record = self.get(id)?;

        if force_copy || (copy_when_shared && record.ref_count > 1) {
            Some(Cow::Owned(record.indices.clone()))
        } else {
            Some(Cow::Borrowed(record.indices.as_slice()))
        }
    }

    pub fn ref_count(&self, id: GeometryId) -> usize {
        self.records.get(id).map_or(0, |record| record.ref_count)
    }
}
