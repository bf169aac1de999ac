//! Renderable geometry management for scene graph meshes: shared
//! vertex/index buffers, submesh partitions, instanced draw batching,
//! LOD selection and CPU skinning.

pub mod geometry;
pub mod gpu;
pub mod loading;
pub mod math;
pub mod mesh;
pub mod rendering;
pub mod scene;
pub mod skinning;
