//! Boundary between the geometry core and the GPU.
//!
//! The core only ever talks to opaque [`BufferId`] handles through
//! [`GpuDevice`] and emits [`DrawCall`]s into a [`DrawSink`]. The headless
//! backend records everything for inspection; the wgpu backend translates
//! draw calls onto a render pass.

mod headless;

#[cfg(feature = "wgpu-backend")]
pub mod wgpu_backend;

pub use headless::{HeadlessBuffer, HeadlessDevice};

use crate::geometry::VertexKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    Vertex,
    Index,
    Instance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FillMode {
    #[default]
    Triangle,
    Wireframe,
    Point,
}

/// One named vertex stream bound for a draw.
#[derive(Debug, Clone, Copy)]
pub struct StreamBinding {
    pub kind: VertexKind,
    pub buffer: BufferId,
}

/// A single draw operation, fully resolved by the dispatcher.
///
/// `instance_buffer`/`instance_count` describe the per-instance matrix
/// stream; a non-instanced draw has no instance buffer and a count of 1.
#[derive(Debug, Clone)]
pub struct DrawCall {
    pub streams: Vec<StreamBinding>,
    pub index_buffer: Option<BufferId>,
    pub index_start: u32,
    pub index_count: u32,
    pub vertex_start: u32,
    pub vertex_count: u32,
    pub instance_buffer: Option<BufferId>,
    pub instance_count: u32,
    pub fill_mode: FillMode,
    pub render_id: u64,
    pub alternate: bool,
}

/// Buffer lifecycle operations the core needs from a GPU device.
pub trait GpuDevice {
    fn create_buffer(
        &mut self,
        kind: BufferKind,
        label: &str,
        contents: &[u8],
        updatable: bool,
    ) -> BufferId;

    /// Overwrite a byte range in place. Only valid for updatable buffers.
    fn update_buffer(&mut self, buffer: BufferId, offset: u64, contents: &[u8]);

    fn dispose_buffer(&mut self, buffer: BufferId);
}

/// Receiver for resolved draw calls.
pub trait DrawSink {
    fn draw(&mut self, call: DrawCall);
}
