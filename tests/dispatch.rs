//! End-to-end dispatch behavior against the recording backend.

use glam::{Mat4, Vec3};

use meshine::geometry::VertexKind;
use meshine::gpu::{FillMode, HeadlessDevice};
use meshine::mesh::{Mesh, MeshId};
use meshine::rendering::{MaterialSystem, RenderContext};
use meshine::scene::Scene;

#[derive(Default)]
struct RecordingMaterials {
    not_ready: bool,
    fill_mode: FillMode,
    full_binds: usize,
    world_only_binds: usize,
}

impl MaterialSystem for RecordingMaterials {
    fn is_ready_for_draw(&self, _mesh: MeshId, _material_index: usize, _instanced: bool) -> bool {
        !self.not_ready
    }

    fn bind(&mut self, _world: &Mat4, _mesh: MeshId) {
        self.full_binds += 1;
    }

    fn bind_only_world_matrix(&mut self, _world: &Mat4) {
        self.world_only_binds += 1;
    }

    fn fill_mode(&self, _material_index: usize) -> FillMode {
        self.fill_mode
    }
}

fn scene_with_quad(device: &mut HeadlessDevice) -> (Scene, MeshId) {
    let mut scene = Scene::new();
    let mut mesh = Mesh::new("quad");
    mesh.material_index = Some(0);
    let mesh_id = scene.add_mesh(mesh);

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
        device,
    );
    scene
        .geometry
        .set_indices(geometry_id, vec![0, 1, 2, 0, 2, 3], None, false, device);
    scene.assign_geometry(mesh_id, geometry_id, device);

    (scene, mesh_id)
}

#[test]
fn hundred_instances_draw_once_per_pass() {
    let mut device = HeadlessDevice::new();
    let (mut scene, mesh_id) = scene_with_quad(&mut device);
    let mut materials = RecordingMaterials::default();

    let render_id = scene.next_render_id();
    for i in 0..100 {
        let world = Mat4::from_translation(Vec3::new(i as f32, 0.0, 0.0));
        let instance = scene.create_instance(mesh_id, world).unwrap();
        scene.register_visible_instance(instance, render_id);
    }

    let ctx = RenderContext::new(render_id);
    let mut sink = HeadlessDevice::new();
    scene.render_mesh(mesh_id, ctx, &mut materials, &mut device, &mut sink);

    assert_eq!(sink.draw_calls.len(), 1);
    let call = &sink.draw_calls[0];
    assert_eq!(call.instance_count, 101);
    assert!(call.instance_buffer.is_some());
    assert_eq!(call.index_count, 6);
    assert_eq!(materials.full_binds, 1);

    // The transform buffer really holds 101 matrices.
    let uploaded = device
        .buffer(call.instance_buffer.unwrap())
        .expect("instance buffer exists");
    assert!(uploaded.data.len() >= 101 * 64);

    // Second query in the same pass: no new draws, no new uploads.
    let uploads_before = device.upload_count;
    scene.render_mesh(mesh_id, ctx, &mut materials, &mut device, &mut sink);
    assert_eq!(sink.draw_calls.len(), 1);
    assert_eq!(device.upload_count, uploads_before);
    assert_eq!(materials.full_binds, 1);
}

#[test]
fn next_pass_draws_again() {
    let mut device = HeadlessDevice::new();
    let (mut scene, mesh_id) = scene_with_quad(&mut device);
    let mut materials = RecordingMaterials::default();
    let mut sink = HeadlessDevice::new();

    let first = scene.next_render_id();
    let instance = scene.create_instance(mesh_id, Mat4::IDENTITY).unwrap();
    scene.register_visible_instance(instance, first);
    scene.render_mesh(mesh_id, RenderContext::new(first), &mut materials, &mut device, &mut sink);
    assert_eq!(sink.draw_calls.len(), 1);

    let second = scene.next_render_id();
    scene.register_visible_instance(instance, second);
    scene.render_mesh(mesh_id, RenderContext::new(second), &mut materials, &mut device, &mut sink);
    assert_eq!(sink.draw_calls.len(), 2);
}

#[test]
fn without_hardware_instancing_each_copy_draws_itself() {
    let mut device = HeadlessDevice::new();
    let (mut scene, mesh_id) = scene_with_quad(&mut device);
    scene.config.hardware_instancing = false;
    let mut materials = RecordingMaterials::default();
    let mut sink = HeadlessDevice::new();

    let render_id = scene.next_render_id();
    for _ in 0..3 {
        let instance = scene.create_instance(mesh_id, Mat4::IDENTITY).unwrap();
        scene.register_visible_instance(instance, render_id);
    }

    scene.render_mesh(
        mesh_id,
        RenderContext::new(render_id),
        &mut materials,
        &mut device,
        &mut sink,
    );

    // One draw for the mesh itself, one per instance, each with its own
    // world matrix bound.
    assert_eq!(sink.draw_calls.len(), 4);
    assert!(sink.draw_calls.iter().all(|call| call.instance_count == 1));
    assert_eq!(materials.full_binds, 1);
    assert_eq!(materials.world_only_binds, 3);
}

#[test]
fn alternate_camera_repeats_the_draw_exactly_once() {
    let mut device = HeadlessDevice::new();
    let (mut scene, mesh_id) = scene_with_quad(&mut device);
    scene.config.alternate_camera = true;
    let mut materials = RecordingMaterials::default();
    let mut sink = HeadlessDevice::new();

    let render_id = scene.next_render_id();
    let instance = scene.create_instance(mesh_id, Mat4::IDENTITY).unwrap();
    scene.register_visible_instance(instance, render_id);

    scene.render_mesh(
        mesh_id,
        RenderContext::new(render_id),
        &mut materials,
        &mut device,
        &mut sink,
    );

    assert_eq!(sink.draw_calls.len(), 2);
    assert!(!sink.draw_calls[0].alternate);
    assert!(sink.draw_calls[1].alternate);
}

#[test]
fn unready_material_draws_nothing() {
    let mut device = HeadlessDevice::new();
    let (mut scene, mesh_id) = scene_with_quad(&mut device);
    let mut materials = RecordingMaterials {
        not_ready: true,
        ..Default::default()
    };
    let mut sink = HeadlessDevice::new();

    let render_id = scene.next_render_id();
    scene.render_mesh(
        mesh_id,
        RenderContext::new(render_id),
        &mut materials,
        &mut device,
        &mut sink,
    );

    assert!(sink.draw_calls.is_empty());
}

#[test]
fn wireframe_fill_uses_the_line_list() {
    let mut device = HeadlessDevice::new();
    let (mut scene, mesh_id) = scene_with_quad(&mut device);
    scene.config.force_wireframe = true;
    let mut materials = RecordingMaterials::default();
    let mut sink = HeadlessDevice::new();

    let render_id = scene.next_render_id();
    scene.render_mesh(
        mesh_id,
        RenderContext::new(render_id),
        &mut materials,
        &mut device,
        &mut sink,
    );

    assert_eq!(sink.draw_calls.len(), 1);
    let call = &sink.draw_calls[0];
    assert_eq!(call.fill_mode, FillMode::Wireframe);
    // Two triangles become six edges, twelve line-list indices.
    assert_eq!(call.index_count, 12);
}

#[test]
fn lod_substitution_renders_the_proxy() {
    let mut device = HeadlessDevice::new();
    let (mut scene, master) = scene_with_quad(&mut device);
    let mut materials = RecordingMaterials::default();
    let mut sink = HeadlessDevice::new();

    let (proxy, proxy_geometry) = {
        let mut mesh = Mesh::new("coarse");
        mesh.material_index = Some(0);
        let proxy = scene.add_mesh(mesh);
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
        scene.assign_geometry(proxy, geometry_id, &mut device);
        (proxy, geometry_id)
    };
    scene.add_lod_level(master, 50.0, Some(proxy));

    let render_id = scene.next_render_id();
    let target = scene.effective_lod(master, 25.0);
    assert_eq!(target, proxy);

    scene.render_mesh(
        target,
        RenderContext::new(render_id),
        &mut materials,
        &mut device,
        &mut sink,
    );

    assert_eq!(sink.draw_calls.len(), 1);
    assert_eq!(sink.draw_calls[0].index_count, 3);
    assert_eq!(scene.geometry.ref_count(proxy_geometry), 1);
}
