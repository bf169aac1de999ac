mod store;

pub use store::{GeometryId, GeometryRecord, GeometryStore, VertexAttribute};

/// Semantic kind of a vertex attribute stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexKind {
    Position,
    Normal,
    Tangent,
    Color,
    /// UV channel, 0 through 5.
    Uv(u8),
    BonesIndices,
    BonesWeights,
    BonesIndicesExtra,
    BonesWeightsExtra,
    MorphPosition(u8),
    MorphNormal(u8),
}

impl VertexKind {
    /// Floats per vertex when the caller does not specify a stride.
    pub fn default_stride(self) -> usize {
        match self {
            VertexKind::Position | VertexKind::Normal | VertexKind::Tangent => 3,
            VertexKind::Uv(_) => 2,
            VertexKind::Color
            | VertexKind::BonesIndices
            | VertexKind::BonesWeights
            | VertexKind::BonesIndicesExtra
            | VertexKind::BonesWeightsExtra => 4,
            VertexKind::MorphPosition(_) | VertexKind::MorphNormal(_) => 3,
        }
    }

    /// Canonical ordering for stream bindings, so draw calls list streams in
    /// a stable slot order.
    pub fn stream_order(self) -> u32 {
        match self {
            VertexKind::Position => 0,
            VertexKind::Normal => 1,
            VertexKind::Uv(channel) => 2 + channel as u32,
            VertexKind::Tangent => 8,
            VertexKind::Color => 9,
            VertexKind::BonesIndices => 10,
            VertexKind::BonesWeights => 11,
            VertexKind::BonesIndicesExtra => 12,
            VertexKind::BonesWeightsExtra => 13,
            VertexKind::MorphPosition(target) => 14 + 2 * target as u32,
            VertexKind::MorphNormal(target) => 15 + 2 * target as u32,
        }
    }

    pub fn label(self) -> String {
        match self {
            VertexKind::Position => "position".to_string(),
            VertexKind::Normal => "normal".to_string(),
            VertexKind::Tangent => "tangent".to_string(),
            VertexKind::Color => "color".to_string(),
            VertexKind::Uv(channel) => format!("uv{}", channel),
            VertexKind::BonesIndices => "bones_indices".to_string(),
            VertexKind::BonesWeights => "bones_weights".to_string(),
            VertexKind::BonesIndicesExtra => "bones_indices_extra".to_string(),
            VertexKind::BonesWeightsExtra => "bones_weights_extra".to_string(),
            VertexKind::MorphPosition(target) => format!("morph{}_position", target),
            VertexKind::MorphNormal(target) => format!("morph{}_normal", target),
        }
    }
}

/// Decoded geometry payload, as delivered by a delayed load or an importer.
#[derive(Debug, Clone, Default)]
pub struct GeometryData {
    pub positions: Vec<f32>,
    pub normals: Option<Vec<f32>>,
    pub uvs: Option<Vec<f32>>,
    pub indices: Vec<u32>,
}
