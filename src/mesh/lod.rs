//! Distance-based level-of-detail selection.

use crate::mesh::MeshId;

/// One LOD entry: below `distance` to the camera this level applies. A level
/// without a proxy renders the full-detail mesh at that distance band.
#[derive(Debug, Clone, Copy)]
pub struct LodLevel {
    pub distance: f32,
    pub mesh: Option<MeshId>,
}

/// Observability hook fired on every selection with
/// (distance, full-detail mesh, chosen mesh).
pub type LodSelectionCallback = Box<dyn FnMut(f32, MeshId, MeshId)>;

/// Pick the level for `distance` from a descending-sorted level list.
///
/// Levels are scanned from the farthest threshold toward the nearest; the
/// nearest level still covering the distance wins. A camera beyond every
/// threshold gets the fallback mesh.
pub fn select_level(levels: &[LodLevel], distance: f32, fallback: MeshId) -> MeshId {
    let mut chosen = None;
    for level in levels {
        if level.distance >= distance {
            chosen = Some(level);
        } else {
            break;
        }
    }

    match chosen {
        Some(level) => level.mesh.unwrap_or(fallback),
        None => fallback,
    }
}

/// Keep the invariant: descending by distance, so selection is one scan.
pub(crate) fn sort_levels(levels: &mut [LodLevel]) {
    levels.sort_by(|a, b| b.distance.total_cmp(&a.distance));
}
