//! Turns a visibility batch into actual draw calls.
//!
//! The dispatcher is the only place that decides to skip rendering: it
//! aggregates readiness from the visibility cache, the geometry record and
//! the material system, then emits either one instanced draw or a sequence
//! of per-instance draws. Nothing on this path returns errors; a mesh that
//! is not ready this frame simply draws nothing.

use id_arena::Arena;

use crate::geometry::{GeometryRecord, GeometryStore};
use crate::gpu::{BufferId, DrawCall, DrawSink, FillMode, GpuDevice, StreamBinding};
use crate::mesh::{Mesh, MeshId, MeshInstance, SubMesh};
use crate::rendering::visibility::{self, RenderBatch};
use crate::rendering::{MaterialSystem, RenderConfig, RenderContext};

struct ResolvedDraw {
    streams: Vec<StreamBinding>,
    index_buffer: Option<BufferId>,
    index_start: u32,
    index_count: u32,
    vertex_start: u32,
    vertex_count: u32,
    fill_mode: FillMode,
}

/// Render one partition of a mesh for the given pass.
#[allow(clippy::too_many_arguments)]
pub fn render_submesh(
    meshes: &mut Arena<Mesh>,
    instances: &Arena<MeshInstance>,
    store: &GeometryStore,
    config: &RenderConfig,
    materials: &mut dyn MaterialSystem,
    device: &mut dyn GpuDevice,
    sink: &mut dyn DrawSink,
    mesh_id: MeshId,
    submesh_index: usize,
    ctx: RenderContext,
) {
    let Some(mesh) = meshes.get_mut(mesh_id) else {
        return;
    };
    if mesh.is_disposed() {
        return;
    }

    let batch = visibility::get_render_batch(mesh, submesh_index, ctx.render_id, ctx.intermediate);
    if batch.must_return {
        return;
    }

    if !mesh.is_ready(store) {
        return;
    }
    let Some(record) = mesh.geometry().and_then(|id| store.get(id)) else {
        return;
    };

    let Some(material_index) = mesh.submeshes[submesh_index]
        .material_index
        .or(mesh.material_index)
    else {
        return;
    };

    let instanced = config.hardware_instancing && !batch.visible_instances.is_empty();
    if !materials.is_ready_for_draw(mesh_id, material_index, instanced) {
        return;
    }

    let fill_mode = if config.force_points {
        FillMode::Point
    } else if config.force_wireframe {
        FillMode::Wireframe
    } else {
        materials.fill_mode(material_index)
    };

    let unindexed = mesh.unindexed;
    let resolved = resolve_bindings(
        record,
        &mut mesh.submeshes[submesh_index],
        unindexed,
        fill_mode,
        device,
    );

    if instanced {
        let count = batch.visible_instances.len() + usize::from(batch.render_self);
        let world = mesh.world_matrix;
        mesh.transform_buffer.ensure_capacity(count, device);
        if batch.render_self {
            mesh.transform_buffer.write_self(&world);
        }
        for &id in &batch.visible_instances {
            if let Some(instance) = instances.get(id) {
                mesh.transform_buffer.write_instance(&instance.world_matrix);
            }
        }
        mesh.transform_buffer.commit(device);
    }

    let mesh = &*mesh;
    emit_draws(
        mesh, mesh_id, instances, &batch, &resolved, instanced, materials, sink, ctx,
    );

    // Mirrored alternate camera: repeat the draw step exactly once. The
    // render pass controller swaps view/projection and viewport around the
    // second emission; the guard flag stops further recursion.
    if config.alternate_camera && !ctx.alternate {
        let alternate_ctx = RenderContext {
            alternate: true,
            ..ctx
        };
        emit_draws(
            mesh,
            mesh_id,
            instances,
            &batch,
            &resolved,
            instanced,
            materials,
            sink,
            alternate_ctx,
        );
    }
}

fn resolve_bindings(
    record: &GeometryRecord,
    submesh: &mut SubMesh,
    unindexed: bool,
    fill_mode: FillMode,
    device: &mut dyn GpuDevice,
) -> ResolvedDraw {
    let mut streams: Vec<StreamBinding> = record
        .attribute_kinds()
        .filter_map(|kind| {
            record
                .attribute(kind)
                .and_then(|attribute| attribute.buffer)
                .map(|buffer| StreamBinding { kind, buffer })
        })
        .collect();
    streams.sort_by_key(|stream| stream.kind.stream_order());

    let vertex_start = submesh.vertex_start as u32;
    let vertex_count = submesh.vertex_count as u32;

    let (index_buffer, index_start, index_count) = match fill_mode {
        FillMode::Wireframe => match submesh.wireframe_buffer(record, device) {
            Some((buffer, count)) => (Some(buffer), 0, count),
            None => (None, 0, 0),
        },
        FillMode::Point => (None, 0, 0),
        FillMode::Triangle => {
            if unindexed {
                (None, 0, 0)
            } else {
                match record.index_buffer() {
                    Some(buffer) => (
                        Some(buffer),
                        submesh.index_start as u32,
                        submesh.index_count as u32,
                    ),
                    None => (None, 0, 0),
                }
            }
        }
    };

    ResolvedDraw {
        streams,
        index_buffer,
        index_start,
        index_count,
        vertex_start,
        vertex_count,
        fill_mode,
    }
}

#[allow(clippy::too_many_arguments)]
fn emit_draws(
    mesh: &Mesh,
    mesh_id: MeshId,
    instances: &Arena<MeshInstance>,
    batch: &RenderBatch,
    resolved: &ResolvedDraw,
    instanced: bool,
    materials: &mut dyn MaterialSystem,
    sink: &mut dyn DrawSink,
    ctx: RenderContext,
) {
    let call = |instance_buffer: Option<BufferId>, instance_count: u32| DrawCall {
        streams: resolved.streams.clone(),
        index_buffer: resolved.index_buffer,
        index_start: resolved.index_start,
        index_count: resolved.index_count,
        vertex_start: resolved.vertex_start,
        vertex_count: resolved.vertex_count,
        instance_buffer,
        instance_count,
        fill_mode: resolved.fill_mode,
        render_id: ctx.render_id,
        alternate: ctx.alternate,
    };

    if instanced {
        materials.bind(&mesh.world_matrix, mesh_id);
        sink.draw(call(
            mesh.transform_buffer.buffer(),
            mesh.transform_buffer.used_matrices() as u32,
        ));
        return;
    }

    if batch.render_self {
        materials.bind(&mesh.world_matrix, mesh_id);
        sink.draw(call(None, 1));
    }

    for &id in &batch.visible_instances {
        let Some(instance) = instances.get(id) else {
            continue;
        };
        materials.bind_only_world_matrix(&instance.world_matrix);
        sink.draw(call(None, 1));
    }
}
