pub mod dispatcher;
pub mod transform_buffer;
pub mod visibility;

use glam::Mat4;

use crate::gpu::FillMode;
use crate::mesh::MeshId;

/// Identifies the render pass a query or draw belongs to. Always passed
/// explicitly; nothing in the core reads an ambient pass id.
#[derive(Debug, Clone, Copy)]
pub struct RenderContext {
    pub render_id: u64,
    /// Secondary (non-primary-camera) pass.
    pub intermediate: bool,
    /// Second emission of a mirrored alternate-camera configuration.
    pub alternate: bool,
}

impl RenderContext {
    pub fn new(render_id: u64) -> Self {
        Self {
            render_id,
            intermediate: false,
            alternate: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RenderConfig {
    pub hardware_instancing: bool,
    pub force_wireframe: bool,
    pub force_points: bool,
    /// Mirrored second camera: every draw step is repeated once with
    /// swapped view/projection.
    pub alternate_camera: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            hardware_instancing: true,
            force_wireframe: false,
            force_points: false,
            alternate_camera: false,
        }
    }
}

/// The material system this core draws through. Shader compilation and
/// binding details live behind it; the dispatcher only asks for readiness
/// and hands over world matrices.
pub trait MaterialSystem {
    fn is_ready_for_draw(&self, mesh: MeshId, material_index: usize, instanced: bool) -> bool;

    /// Full bind: material state plus the world matrix.
    fn bind(&mut self, world: &Mat4, mesh: MeshId);

    /// Cheap re-bind of only the world matrix, for per-instance draws that
    /// reuse the already bound material.
    fn bind_only_world_matrix(&mut self, world: &Mat4);

    fn fill_mode(&self, _material_index: usize) -> FillMode {
        FillMode::Triangle
    }
}
