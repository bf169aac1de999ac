//! Per-pass instance visibility cache.
//!
//! A submesh can be queried several times within one render pass (depth
//! bookkeeping, then color). The first query does the real work and stamps
//! the partition with the pass id it processed; repeat queries for the same
//! effective id short-circuit with `must_return`. Secondary passes that
//! never registered their own instances fall back to the recorded default
//! pass, and a mesh whose own draw was already issued in a different pass
//! gets its self-draw suppressed.

use std::collections::HashMap;

use crate::mesh::{InstanceId, Mesh};

/// Visibility bookkeeping for one mesh across the passes of a frame.
#[derive(Debug)]
pub struct VisibleInstances {
    /// Most recent pass id any instance was registered for.
    pub(crate) default_render_id: u64,
    /// Pass id the mesh's own draw belongs to, fixed at first registration.
    pub(crate) self_default_render_id: u64,
    /// Fallback id for intermediate passes, set at pre-activation.
    pub(crate) intermediate_default_render_id: Option<u64>,
    per_pass: HashMap<u64, Vec<InstanceId>>,
}

impl VisibleInstances {
    fn new(render_id: u64) -> Self {
        Self {
            default_render_id: render_id,
            self_default_render_id: render_id,
            intermediate_default_render_id: None,
            per_pass: HashMap::new(),
        }
    }

    pub fn instances_for(&self, render_id: u64) -> Option<&[InstanceId]> {
        self.per_pass.get(&render_id).map(Vec::as_slice)
    }
}

/// Outcome of one visibility query for a (mesh, partition, pass) triple.
#[derive(Debug, Clone)]
pub struct RenderBatch {
    /// The partition was already processed for this effective pass id; skip
    /// all further dispatch work.
    pub must_return: bool,
    /// Whether the mesh's own (non-instanced) draw belongs to this pass.
    pub render_self: bool,
    pub visible_instances: Vec<InstanceId>,
}

/// Record `instance` as visible for `render_id` on its master mesh.
pub fn register_instance(mesh: &mut Mesh, instance: InstanceId, render_id: u64) {
    let visibility = mesh
        .visibility
        .get_or_insert_with(|| VisibleInstances::new(render_id));

    visibility.default_render_id = render_id;
    visibility
        .per_pass
        .entry(render_id)
        .or_default()
        .push(instance);
}

/// Query the batch for `submesh_index` at `render_id`.
///
/// The id actually processed is the queried id, or `max(queried, fallback)`
/// when the queried pass has no registration of its own and the default
/// (or intermediate default) list is substituted.
pub fn get_render_batch(
    mesh: &mut Mesh,
    submesh_index: usize,
    render_id: u64,
    intermediate: bool,
) -> RenderBatch {
    let Some(submesh) = mesh.submeshes.get_mut(submesh_index) else {
        return RenderBatch {
            must_return: true,
            render_self: false,
            visible_instances: Vec::new(),
        };
    };

    let Some(visibility) = mesh.visibility.as_ref() else {
        return RenderBatch {
            must_return: false,
            render_self: true,
            visible_instances: Vec::new(),
        };
    };

    let mut effective_id = render_id;
    let mut visible: &[InstanceId] = &[];

    if let Some(list) = visibility.per_pass.get(&render_id) {
        visible = list;
    } else {
        let fallback_id = if intermediate {
            visibility
                .intermediate_default_render_id
                .unwrap_or(visibility.default_render_id)
        } else {
            visibility.default_render_id
        };
        if let Some(list) = visibility.per_pass.get(&fallback_id) {
            visible = list;
        }
        effective_id = render_id.max(fallback_id);
    }

    let render_self = effective_id == visibility.self_default_render_id;
    let visible_instances = visible.to_vec();

    if submesh.render_id == effective_id {
        return RenderBatch {
            must_return: true,
            render_self,
            visible_instances,
        };
    }

    submesh.render_id = effective_id;
    RenderBatch {
        must_return: false,
        render_self,
        visible_instances,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use id_arena::Arena;

    use crate::mesh::MeshInstance;

    fn mesh_with_submesh() -> Mesh {
        let mut mesh = Mesh::new("cached");
        mesh.total_vertices = 4;
        mesh.total_indices = 6;
        mesh.build_global_partition(false);
        mesh
    }

    fn some_instances(count: usize, master: crate::mesh::MeshId) -> Vec<InstanceId> {
        let mut arena: Arena<MeshInstance> = Arena::new();
        (0..count)
            .map(|i| arena.alloc(MeshInstance::new(master, i, glam::Mat4::IDENTITY)))
            .collect()
    }

    fn some_mesh_id() -> crate::mesh::MeshId {
        let mut arena: Arena<Mesh> = Arena::new();
        arena.alloc(Mesh::new("master"))
    }

    #[test]
    fn repeat_query_in_same_pass_short_circuits() {
        let mut mesh = mesh_with_submesh();
        let ids = some_instances(3, some_mesh_id());
        for &id in &ids {
            register_instance(&mut mesh, id, 7);
        }

        let first = get_render_batch(&mut mesh, 0, 7, false);
        assert!(!first.must_return);
        assert!(first.render_self);
        assert_eq!(first.visible_instances, ids);

        let second = get_render_batch(&mut mesh, 0, 7, false);
        assert!(second.must_return);
        assert_eq!(second.visible_instances, ids);
    }

    #[test]
    fn new_pass_id_recomputes() {
        let mut mesh = mesh_with_submesh();
        let ids = some_instances(1, some_mesh_id());
        register_instance(&mut mesh, ids[0], 7);

        let _ = get_render_batch(&mut mesh, 0, 7, false);
        register_instance(&mut mesh, ids[0], 8);
        let batch = get_render_batch(&mut mesh, 0, 8, false);
        assert!(!batch.must_return);
    }

    #[test]
    fn unregistered_pass_falls_back_to_default_and_suppresses_self() {
        let mut mesh = mesh_with_submesh();
        let ids = some_instances(2, some_mesh_id());
        for &id in &ids {
            register_instance(&mut mesh, id, 7);
        }

        // Pass 9 has no registration; the default list substitutes and the
        // effective id moves past the self-default pass.
        let batch = get_render_batch(&mut mesh, 0, 9, false);
        assert!(!batch.must_return);
        assert!(!batch.render_self);
        assert_eq!(batch.visible_instances, ids);

        let repeat = get_render_batch(&mut mesh, 0, 9, false);
        assert!(repeat.must_return);
    }

    #[test]
    fn intermediate_pass_prefers_intermediate_marker() {
        let mut mesh = mesh_with_submesh();
        let master = some_mesh_id();
        let early = some_instances(1, master);
        register_instance(&mut mesh, early[0], 3);
        let late = some_instances(2, master);
        for &id in &late {
            register_instance(&mut mesh, id, 5);
        }
        mesh.pre_activate_intermediate(3);

        let batch = get_render_batch(&mut mesh, 0, 6, true);
        assert_eq!(batch.visible_instances, early);

        let primary = get_render_batch(&mut mesh, 0, 7, false);
        assert_eq!(primary.visible_instances, late);
    }

    #[test]
    fn no_registrations_renders_self_every_query() {
        let mut mesh = mesh_with_submesh();

        let first = get_render_batch(&mut mesh, 0, 4, false);
        let second = get_render_batch(&mut mesh, 0, 4, false);
        assert!(!first.must_return);
        assert!(!second.must_return);
        assert!(first.render_self && second.render_self);
    }

    #[test]
    fn pre_activate_discards_the_mapping() {
        let mut mesh = mesh_with_submesh();
        let ids = some_instances(1, some_mesh_id());
        register_instance(&mut mesh, ids[0], 7);
        assert!(mesh.visibility.is_some());

        mesh.pre_activate();
        assert!(mesh.visibility.is_none());
    }
}
