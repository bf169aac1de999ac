//! wgpu implementation of the GPU boundary.
//!
//! Pipelines, bind groups and shaders belong to the material system; this
//! backend only owns buffers and translates [`DrawCall`]s onto an already
//! configured render pass.

use std::collections::HashMap;

use wgpu::util::DeviceExt;

use crate::geometry::VertexKind;
use crate::gpu::{BufferId, BufferKind, DrawCall, DrawSink, FillMode, GpuDevice};

pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    buffers: HashMap<BufferId, wgpu::Buffer>,
    next_id: u64,
}

impl WgpuDevice {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self {
            device,
            queue,
            buffers: HashMap::new(),
            next_id: 0,
        }
    }

    pub fn buffer(&self, id: BufferId) -> Option<&wgpu::Buffer> {
        self.buffers.get(&id)
    }
}

impl GpuDevice for WgpuDevice {
    fn create_buffer(
        &mut self,
        kind: BufferKind,
        label: &str,
        contents: &[u8],
        updatable: bool,
    ) -> BufferId {
        let mut usage = match kind {
            BufferKind::Vertex | BufferKind::Instance => wgpu::BufferUsages::VERTEX,
            BufferKind::Index => wgpu::BufferUsages::INDEX,
        };
        if updatable {
            usage |= wgpu::BufferUsages::COPY_DST;
        }

        let buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents,
                usage,
            });

        self.next_id += 1;
        let id = BufferId(self.next_id);
        self.buffers.insert(id, buffer);
        id
    }

    fn update_buffer(&mut self, buffer: BufferId, offset: u64, contents: &[u8]) {
        let Some(target) = self.buffers.get(&buffer) else {
            log::warn!("update for unknown buffer {:?}", buffer);
            return;
        };
        self.queue.write_buffer(target, offset, contents);
    }

    fn dispose_buffer(&mut self, buffer: BufferId) {
        if let Some(target) = self.buffers.remove(&buffer) {
            target.destroy();
        }
    }
}

/// Binds the streams named by each draw call and issues it on a render pass.
///
/// Streams are bound in the order the dispatcher listed them, with the
/// instance matrix stream in the next slot after the vertex streams.
pub struct WgpuDrawEncoder<'a, 'pass> {
    device: &'pass WgpuDevice,
    pass: &'a mut wgpu::RenderPass<'pass>,
}

impl<'a, 'pass> WgpuDrawEncoder<'a, 'pass> {
    pub fn new(device: &'pass WgpuDevice, pass: &'a mut wgpu::RenderPass<'pass>) -> Self {
        Self { device, pass }
    }
}

impl DrawSink for WgpuDrawEncoder<'_, '_> {
    fn draw(&mut self, call: DrawCall) {
        let mut slot = 0u32;
        for stream in &call.streams {
            if let Some(buffer) = self.device.buffer(stream.buffer) {
                self.pass.set_vertex_buffer(slot, buffer.slice(..));
                slot += 1;
            }
        }

        if let Some(instance_stream) = call.instance_buffer.and_then(|id| self.device.buffer(id)) {
            self.pass.set_vertex_buffer(slot, instance_stream.slice(..));
        }

        let instances = 0..call.instance_count.max(1);

        match call.index_buffer.and_then(|id| self.device.buffer(id)) {
            Some(indices) if call.fill_mode != FillMode::Point => {
                self.pass
                    .set_index_buffer(indices.slice(..), wgpu::IndexFormat::Uint32);
                self.pass.draw_indexed(
                    call.index_start..call.index_start + call.index_count,
                    0,
                    instances,
                );
            }
            _ => {
                self.pass.draw(
                    call.vertex_start..call.vertex_start + call.vertex_count,
                    instances,
                );
            }
        }
    }
}

/// Shader location for a vertex stream, for pipelines consuming these draws.
/// Morph target streams have no fixed location and return `None`.
pub fn shader_location(kind: VertexKind) -> Option<u32> {
    match kind {
        VertexKind::Position => Some(0),
        VertexKind::Normal => Some(1),
        VertexKind::Uv(channel) => Some(2 + channel as u32),
        VertexKind::Tangent => Some(8),
        VertexKind::Color => Some(9),
        VertexKind::BonesIndices => Some(10),
        VertexKind::BonesWeights => Some(11),
        VertexKind::BonesIndicesExtra => Some(12),
        VertexKind::BonesWeightsExtra => Some(13),
        VertexKind::MorphPosition(_) | VertexKind::MorphNormal(_) => None,
    }
}

/// Vertex layout of the instance matrix stream: one 4x4 matrix per instance,
/// split into four float4 rows across consecutive shader locations.
pub fn instance_matrix_layout() -> wgpu::VertexBufferLayout<'static> {
    const ROWS: [wgpu::VertexAttribute; 4] = [
        wgpu::VertexAttribute {
            offset: 0,
            shader_location: 14,
            format: wgpu::VertexFormat::Float32x4,
        },
        wgpu::VertexAttribute {
            offset: std::mem::size_of::<[f32; 4]>() as wgpu::BufferAddress,
            shader_location: 15,
            format: wgpu::VertexFormat::Float32x4,
        },
        wgpu::VertexAttribute {
            offset: std::mem::size_of::<[f32; 8]>() as wgpu::BufferAddress,
            shader_location: 16,
            format: wgpu::VertexFormat::Float32x4,
        },
        wgpu::VertexAttribute {
            offset: std::mem::size_of::<[f32; 12]>() as wgpu::BufferAddress,
            shader_location: 17,
            format: wgpu::VertexFormat::Float32x4,
        },
    ];

    wgpu::VertexBufferLayout {
        array_stride: std::mem::size_of::<[f32; 16]>() as wgpu::BufferAddress,
        step_mode: wgpu::VertexStepMode::Instance,
        attributes: &ROWS,
    }
}
