use crate::analysis::features::PITCH_CLASSES;

/// Golden ratio, the icosahedron's edge/coordinate ratio.
pub const PHI: f64 = 1.618_033_988_749_895;

pub const VERTEX_COUNT: usize = 12;
pub const FACE_COUNT: usize = 20;

/// Counter-clockwise outward winding.
pub const INDICES: [u16; FACE_COUNT * 3] = [
    0, 11, 5, 0, 5, 1, 0, 1, 7, 0, 7, 10, 0, 10, 11, //
    1, 5, 9, 5, 11, 4, 11, 10, 2, 10, 7, 6, 7, 1, 8, //
    3, 9, 4, 3, 4, 2, 3, 2, 6, 3, 6, 8, 3, 8, 9, //
    4, 9, 5, 2, 4, 11, 6, 2, 10, 8, 6, 7, 9, 8, 1,
];

#[derive(Clone, Debug, PartialEq)]
pub struct MeshBuffers {
    /// xyz per vertex
    pub vertices: [f32; VERTEX_COUNT * 3],
    pub indices: [u16; FACE_COUNT * 3],
}

#[cfg(test)]
impl MeshBuffers {
    pub fn vertex(&self, k: usize) -> [f32; 3] {
        [
            self.vertices[k * 3],
            self.vertices[k * 3 + 1],
            self.vertices[k * 3 + 2],
        ]
    }
}

/// Unit-radius icosahedron vertices.
fn base_vertices() -> [[f64; 3]; VERTEX_COUNT] {
    let raw = [
        [-1.0, PHI, 0.0],
        [1.0, PHI, 0.0],
        [-1.0, -PHI, 0.0],
        [1.0, -PHI, 0.0],
        [0.0, -1.0, PHI],
        [0.0, 1.0, PHI],
        [0.0, -1.0, -PHI],
        [0.0, 1.0, -PHI],
        [PHI, 0.0, -1.0],
        [PHI, 0.0, 1.0],
        [-PHI, 0.0, -1.0],
        [-PHI, 0.0, 1.0],
    ];
    let norm = (1.0 + PHI * PHI).sqrt();
    raw.map(|v| v.map(|c| c / norm))
}

/// Scale vertex `k` of the base icosahedron by `pitches[k]`.
///
/// Non-finite or negative pitch values count as zero; all-zero input
/// collapses the mesh onto the origin.
pub fn synthesize(pitches: &[f64; PITCH_CLASSES]) -> MeshBuffers {
    let mut vertices = [0.0f32; VERTEX_COUNT * 3];
    for (k, base) in base_vertices().iter().enumerate() {
        let p = pitches[k];
        let scale = if p.is_finite() { p.max(0.0) } else { 0.0 };
        for axis in 0..3 {
            vertices[k * 3 + axis] = (base[axis] * scale) as f32;
        }
    }
    MeshBuffers {
        vertices,
        indices: INDICES,
    }
}
