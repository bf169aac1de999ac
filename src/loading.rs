//! Delayed geometry loading.
//!
//! A mesh can defer its geometry to an external source. Readiness checks
//! move it from `NotLoaded` to `Loading`, during which it reports not ready
//! and draws nothing; completion arrives over a channel and is applied by
//! the scene on the render thread. The `Loading` state may persist across
//! any number of frames and cannot be cancelled.

use crate::geometry::GeometryData;
use crate::mesh::MeshId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DelayLoadState {
    /// Geometry is owned directly; no deferred source.
    #[default]
    None,
    NotLoaded,
    Loading,
    Loaded,
}

/// Turns a loaded payload into geometry. File formats are not this crate's
/// business, so the hook is supplied alongside the URL.
pub type GeometryDecoder = fn(&[u8]) -> anyhow::Result<GeometryData>;

#[derive(Debug, Clone)]
pub struct DelayLoadInfo {
    pub url: String,
    pub is_binary: bool,
    pub decode: GeometryDecoder,
}

pub type LoadSuccess = Box<dyn FnOnce(Vec<u8>)>;
pub type LoadError = Box<dyn FnOnce(String)>;

/// External file transport. Invoked exactly once per delay-load transition;
/// the callbacks may fire immediately or arbitrarily many frames later.
pub trait AssetLoader {
    fn load_file(
        &mut self,
        url: &str,
        is_binary: bool,
        on_success: LoadSuccess,
        on_error: LoadError,
    );
}

/// Completion message delivered back to the scene.
#[derive(Debug)]
pub(crate) enum LoadMessage {
    Loaded(MeshId, Vec<u8>),
    Failed(MeshId, String),
}
