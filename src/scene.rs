//! Scene container: the arenas every component works against, the render
//! pass counter, and pending-load accounting.

use crossbeam_channel::{Receiver, Sender};
use glam::Mat4;
use id_arena::Arena;

use crate::geometry::{GeometryData, GeometryId, GeometryStore, VertexKind};
use crate::gpu::{DrawSink, GpuDevice};
use crate::loading::{AssetLoader, DelayLoadInfo, DelayLoadState, LoadMessage};
use crate::mesh::{lod, InstanceId, Mesh, MeshId, MeshInstance};
use crate::rendering::{dispatcher, visibility, MaterialSystem, RenderConfig, RenderContext};
use crate::skinning::{self, SkeletonProvider};

pub struct Scene {
    pub geometry: GeometryStore,
    pub meshes: Arena<Mesh>,
    pub instances: Arena<MeshInstance>,
    pub config: RenderConfig,
    render_id: u64,
    frame_id: u64,
    pending_data: usize,
    load_tx: Sender<LoadMessage>,
    load_rx: Receiver<LoadMessage>,
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

impl Scene {
    pub fn new() -> Self {
        let (load_tx, load_rx) = crossbeam_channel::unbounded();
        Self {
            geometry: GeometryStore::new(),
            meshes: Arena::new(),
            instances: Arena::new(),
            config: RenderConfig::default(),
            render_id: 0,
            frame_id: 0,
            pending_data: 0,
            load_tx,
            load_rx,
        }
    }

    pub fn add_mesh(&mut self, mesh: Mesh) -> MeshId {
        self.meshes.alloc(mesh)
    }

    pub fn get_mesh(&self, id: MeshId) -> Option<&Mesh> {
        self.meshes.get(id).filter(|mesh| !mesh.is_disposed())
    }

    pub fn get_mesh_mut(&mut self, id: MeshId) -> Option<&mut Mesh> {
        self.meshes.get_mut(id).filter(|mesh| !mesh.is_disposed())
    }

    // ----- pass and frame counters -----

    pub fn current_render_id(&self) -> u64 {
        self.render_id
    }

    /// Start a new render pass; ids only ever grow.
    pub fn next_render_id(&mut self) -> u64 {
        self.render_id += 1;
        self.render_id
    }

    pub fn current_frame(&self) -> u64 {
        self.frame_id
    }

    pub fn advance_frame(&mut self) -> u64 {
        self.frame_id += 1;
        self.frame_id
    }

    // ----- pending load accounting -----

    pub fn pending_data_count(&self) -> usize {
        self.pending_data
    }

    pub fn add_pending_data(&mut self) {
        self.pending_data += 1;
    }

    pub fn remove_pending_data(&mut self) {
        self.pending_data = self.pending_data.saturating_sub(1);
    }

    // ----- geometry wiring -----

    /// Share `geometry_id` into the mesh: bumps the record's reference
    /// count, refreshes the mesh's local totals and rebuilds the global
    /// partition over the new data.
    pub fn assign_geometry(
        &mut self,
        mesh_id: MeshId,
        geometry_id: GeometryId,
        device: &mut dyn GpuDevice,
    ) {
        let Some((total_vertices, total_indices)) = self.geometry.attach(geometry_id) else {
            return;
        };

        let Some(mesh) = self.meshes.get_mut(mesh_id) else {
            self.geometry.detach(geometry_id, false, device);
            return;
        };

        if let Some(previous) = mesh.geometry() {
            self.geometry.detach(previous, false, device);
        }

        mesh.set_geometry(Some(geometry_id));
        mesh.total_vertices = total_vertices;
        mesh.total_indices = total_indices;
        mesh.skinning.invalidate();
        mesh.build_global_partition(true);
    }

    /// Copy-on-write: give the mesh its own private copy of the geometry.
    pub fn make_geometry_unique(&mut self, mesh_id: MeshId, device: &mut dyn GpuDevice) {
        let Some(mesh) = self.meshes.get_mut(mesh_id) else {
            return;
        };
        let Some(current) = mesh.geometry() else {
            return;
        };
        if let Some(copy) = self.geometry.make_unique(current, device) {
            mesh.set_geometry(Some(copy));
        }
    }

    // ----- instances -----

    /// Factory for a draw-only copy of `master`.
    pub fn create_instance(&mut self, master: MeshId, world_matrix: Mat4) -> Option<InstanceId> {
        let mesh = self.meshes.get(master).filter(|mesh| !mesh.is_disposed())?;
        let index = mesh.instances.len();

        let id = self
            .instances
            .alloc(MeshInstance::new(master, index, world_matrix));
        self.meshes.get_mut(master)?.instances.push(id);
        Some(id)
    }

    /// O(1) removal: the instance swaps with the last entry of its master's
    /// list, and the moved entry's stored index is fixed up.
    pub fn dispose_instance(&mut self, id: InstanceId) {
        let Some(instance) = self.instances.get_mut(id) else {
            return;
        };
        if instance.disposed {
            return;
        }
        instance.disposed = true;
        let master = instance.master;
        let index = instance.index_in_master;

        let Some(mesh) = self.meshes.get_mut(master) else {
            return;
        };
        if mesh.instances.get(index) != Some(&id) {
            return;
        }

        mesh.instances.swap_remove(index);
        if let Some(&moved) = mesh.instances.get(index) {
            if let Some(moved_instance) = self.instances.get_mut(moved) {
                moved_instance.index_in_master = index;
            }
        }
    }

    /// Dispose a mesh, all of its instances, and its hold on the geometry.
    /// Proxies it used as LOD levels become available again.
    pub fn dispose_mesh(
        &mut self,
        mesh_id: MeshId,
        force_dispose_geometry: bool,
        device: &mut dyn GpuDevice,
    ) {
        let Some(mesh) = self.meshes.get_mut(mesh_id) else {
            return;
        };
        if mesh.disposed {
            return;
        }
        mesh.disposed = true;

        let instance_ids = std::mem::take(&mut mesh.instances);
        let geometry_id = mesh.geometry();
        mesh.set_geometry(None);
        let proxies: Vec<MeshId> = mesh
            .lod_levels
            .drain(..)
            .filter_map(|level| level.mesh)
            .collect();

        for id in instance_ids {
            if let Some(instance) = self.instances.get_mut(id) {
                instance.disposed = true;
            }
        }
        for proxy in proxies {
            if let Some(proxy_mesh) = self.meshes.get_mut(proxy) {
                proxy_mesh.blocked_as_lod = false;
            }
        }
        if let Some(geometry_id) = geometry_id {
            self.geometry.detach(geometry_id, force_dispose_geometry, device);
        }
    }

    // ----- visibility -----

    /// Record an instance as visible for `render_id` on its master.
    pub fn register_visible_instance(&mut self, instance: InstanceId, render_id: u64) {
        let Some(record) = self.instances.get(instance) else {
            return;
        };
        if record.disposed {
            return;
        }
        let master = record.master;
        if let Some(mesh) = self.meshes.get_mut(master) {
            visibility::register_instance(mesh, instance, render_id);
        }
    }

    // ----- LOD -----

    /// Register a proxy for distances below `distance`. A proxy already
    /// serving another master is refused with a warning.
    pub fn add_lod_level(&mut self, master: MeshId, distance: f32, proxy: Option<MeshId>) {
        if let Some(proxy_id) = proxy {
            let Some(proxy_mesh) = self.meshes.get_mut(proxy_id) else {
                return;
            };
            if proxy_mesh.blocked_as_lod {
                log::warn!(
                    "mesh {:?} is already the LOD proxy of another mesh; level not added",
                    proxy_mesh.name
                );
                return;
            }
            proxy_mesh.blocked_as_lod = true;
        }

        if let Some(mesh) = self.meshes.get_mut(master) {
            mesh.lod_levels.push(lod::LodLevel {
                distance,
                mesh: proxy,
            });
            lod::sort_levels(&mut mesh.lod_levels);
        }
    }

    pub fn remove_lod_level(&mut self, master: MeshId, proxy: Option<MeshId>) {
        if let Some(mesh) = self.meshes.get_mut(master) {
            mesh.lod_levels.retain(|level| level.mesh != proxy);
            lod::sort_levels(&mut mesh.lod_levels);
        }
        if let Some(proxy_id) = proxy {
            if let Some(proxy_mesh) = self.meshes.get_mut(proxy_id) {
                proxy_mesh.blocked_as_lod = false;
            }
        }
    }

    /// The mesh to actually render at `distance`, after LOD substitution.
    /// Fires the mesh's selection callback as a side effect.
    pub fn effective_lod(&mut self, mesh_id: MeshId, distance: f32) -> MeshId {
        let levels = match self.meshes.get(mesh_id) {
            Some(mesh) if !mesh.lod_levels.is_empty() => mesh.lod_levels.clone(),
            _ => return mesh_id,
        };

        let chosen = lod::select_level(&levels, distance, mesh_id);
        if let Some(mesh) = self.meshes.get_mut(mesh_id) {
            if let Some(callback) = mesh.lod_callback.as_mut() {
                callback(distance, mesh_id, chosen);
            }
        }
        chosen
    }

    // ----- skinning -----

    /// CPU-blend bone transforms into the mesh's geometry, at most once for
    /// the current simulation frame, and re-upload the touched attributes.
    pub fn apply_skinning(
        &mut self,
        mesh_id: MeshId,
        skeleton: &dyn SkeletonProvider,
        device: &mut dyn GpuDevice,
    ) {
        let frame = self.frame_id;
        let Some(mesh) = self.meshes.get_mut(mesh_id) else {
            return;
        };
        let Some(geometry_id) = mesh.geometry() else {
            return;
        };
        let Some(record) = self.geometry.get_mut(geometry_id) else {
            return;
        };

        let bone_matrices = skeleton.bone_matrices(mesh_id);
        if !skinning::apply(&mut mesh.skinning, record, bone_matrices, frame) {
            return;
        }

        self.geometry
            .upload_attribute(geometry_id, VertexKind::Position, device);
        self.geometry
            .upload_attribute(geometry_id, VertexKind::Normal, device);
    }

    // ----- delayed loading -----

    pub fn set_delay_load(&mut self, mesh_id: MeshId, info: DelayLoadInfo) {
        if let Some(mesh) = self.meshes.get_mut(mesh_id) {
            mesh.delay_info = Some(info);
            mesh.delay_load = DelayLoadState::NotLoaded;
        }
    }

    /// Kick off the deferred load if it has not started yet. The loader is
    /// invoked exactly once per transition; until completion arrives the
    /// mesh stays in `Loading` and reports not ready.
    pub fn check_delayed_state(&mut self, mesh_id: MeshId, loader: &mut dyn AssetLoader) {
        let Some(mesh) = self.meshes.get_mut(mesh_id) else {
            return;
        };
        if mesh.delay_load != DelayLoadState::NotLoaded {
            return;
        }
        let Some(info) = mesh.delay_info.clone() else {
            mesh.delay_load = DelayLoadState::None;
            return;
        };

        mesh.delay_load = DelayLoadState::Loading;
        self.pending_data += 1;

        let success_tx = self.load_tx.clone();
        let error_tx = self.load_tx.clone();
        loader.load_file(
            &info.url,
            info.is_binary,
            Box::new(move |data| {
                let _ = success_tx.send(LoadMessage::Loaded(mesh_id, data));
            }),
            Box::new(move |message| {
                let _ = error_tx.send(LoadMessage::Failed(mesh_id, message));
            }),
        );
    }

    /// Apply any completed delayed loads. Failures drop the mesh back to
    /// `NotLoaded` so a later readiness check can retry.
    pub fn drain_delay_loaded(&mut self, device: &mut dyn GpuDevice) {
        while let Ok(message) = self.load_rx.try_recv() {
            match message {
                LoadMessage::Loaded(mesh_id, bytes) => {
                    let decode = self
                        .meshes
                        .get(mesh_id)
                        .and_then(|mesh| mesh.delay_info.as_ref())
                        .map(|info| info.decode);
                    let Some(decode) = decode else {
                        self.remove_pending_data();
                        continue;
                    };

                    match decode(&bytes) {
                        Ok(data) => {
                            self.apply_geometry_data(mesh_id, data, device);
                            if let Some(mesh) = self.meshes.get_mut(mesh_id) {
                                mesh.delay_load = DelayLoadState::Loaded;
                            }
                        }
                        Err(error) => {
                            log::warn!("decoding delayed geometry failed: {error:#}");
                            if let Some(mesh) = self.meshes.get_mut(mesh_id) {
                                mesh.delay_load = DelayLoadState::NotLoaded;
                            }
                        }
                    }
                    self.remove_pending_data();
                }
                LoadMessage::Failed(mesh_id, error) => {
                    log::warn!("delayed load failed: {error}");
                    if let Some(mesh) = self.meshes.get_mut(mesh_id) {
                        mesh.delay_load = DelayLoadState::NotLoaded;
                    }
                    self.remove_pending_data();
                }
            }
        }
    }

    /// Build a geometry record from a decoded payload and share it into the
    /// mesh.
    pub fn apply_geometry_data(
        &mut self,
        mesh_id: MeshId,
        data: GeometryData,
        device: &mut dyn GpuDevice,
    ) {
        let geometry_id = self.geometry.create();
        self.geometry
            .set_attribute(geometry_id, VertexKind::Position, data.positions, true, 3, device);
        if let Some(normals) = data.normals {
            self.geometry
                .set_attribute(geometry_id, VertexKind::Normal, normals, true, 3, device);
        }
        if let Some(uvs) = data.uvs {
            self.geometry
                .set_attribute(geometry_id, VertexKind::Uv(0), uvs, false, 2, device);
        }
        self.geometry
            .set_indices(geometry_id, data.indices, None, false, device);

        self.assign_geometry(mesh_id, geometry_id, device);
    }

    // ----- dispatch -----

    /// Render every partition of a mesh for the given pass.
    pub fn render_mesh(
        &mut self,
        mesh_id: MeshId,
        ctx: RenderContext,
        materials: &mut dyn MaterialSystem,
        device: &mut dyn GpuDevice,
        sink: &mut dyn DrawSink,
    ) {
        let submesh_count = match self.meshes.get(mesh_id) {
            Some(mesh) if !mesh.is_disposed() => mesh.submeshes.len(),
            _ => return,
        };

        let Scene {
            geometry,
            meshes,
            instances,
            config,
            ..
        } = self;

        for index in 0..submesh_count {
            dispatcher::render_submesh(
                meshes, instances, geometry, config, materials, device, sink, mesh_id, index, ctx,
            );
        }
    }
}
