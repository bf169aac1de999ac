use glam::Mat4;
use id_arena::Id;

use crate::mesh::MeshId;

pub type InstanceId = Id<MeshInstance>;

/// A draw-only copy of a master mesh: shares its geometry and submeshes,
/// carries only its own world transform.
pub struct MeshInstance {
    pub master: MeshId,
    /// Position in the master's instance list, kept current by swap-removal.
    pub(crate) index_in_master: usize,
    pub world_matrix: Mat4,
    pub(crate) disposed: bool,
}

impl MeshInstance {
    pub(crate) fn new(master: MeshId, index_in_master: usize, world_matrix: Mat4) -> Self {
        Self {
            master,
            index_in_master,
            world_matrix,
            disposed: false,
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }
}
