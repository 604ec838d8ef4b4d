use std::path::PathBuf;
use std::sync::Arc;

use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Uniform scale applied when moving reconstructed geometry into the export
/// convention.
pub const EXPORT_SCALE: f32 = 0.5 * 1.35;

/// Surface appearance bound to a mesh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Texture {
    /// One linear RGB colour per vertex.
    VertexColors { colors: Vec<Vec3> },
    /// Image texture sampled with one UV per vertex.
    Map { image: PathBuf, uvs: Vec<Vec2> },
}

impl Texture {
    /// Number of per-vertex entries this binding carries.
    fn per_vertex_len(&self) -> usize {
        match self {
            Self::VertexColors { colors } => colors.len(),
            Self::Map { uvs, .. } => uvs.len(),
        }
    }
}

/// A reconstructed, textured triangle mesh.
///
/// Construction validates that every face references an existing vertex and
/// that the texture carries exactly one entry per vertex. There is no way to
/// mutate a `Mesh` afterwards; transforms produce a new value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Mesh {
    vertices: Vec<Vec3>,
    faces: Vec<[u32; 3]>,
    texture: Arc<Texture>,
}

impl Mesh {
    pub fn new(vertices: Vec<Vec3>, faces: Vec<[u32; 3]>, texture: Texture) -> Result<Self> {
        let vertex_count = vertices.len();

        if let Some((i, face)) = faces
            .iter()
            .enumerate()
            .find(|(_, face)| face.iter().any(|&idx| idx as usize >= vertex_count))
        {
            return Err(Error::MalformedMesh(format!(
                "face {} {:?} references a vertex outside 0..{}",
                i, face, vertex_count
            )));
        }

        if let Some(bad) = vertices.iter().position(|v| !v.is_finite()) {
            return Err(Error::MalformedMesh(format!("vertex {} is not finite", bad)));
        }

        let texture_len = texture.per_vertex_len();
        if texture_len != vertex_count {
            return Err(Error::MalformedMesh(format!(
                "texture has {} entries for {} vertices",
                texture_len, vertex_count
            )));
        }

        Ok(Self {
            vertices,
            faces,
            texture: Arc::new(texture),
        })
    }

    pub fn vertices(&self) -> &[Vec3] {
        &self.vertices
    }

    pub fn faces(&self) -> &[[u32; 3]] {
        &self.faces
    }

    pub fn texture(&self) -> &Texture {
        &self.texture
    }

    /// True when both meshes share the same texture allocation.
    pub fn shares_texture_with(&self, other: &Mesh) -> bool {
        Arc::ptr_eq(&self.texture, &other.texture)
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn face_count(&self) -> usize {
        self.faces.len()
    }
}

/// Mesh as it travels over the wire, not yet validated.
#[derive(Deserialize)]
struct RawMesh {
    vertices: Vec<Vec3>,
    faces: Vec<[u32; 3]>,
    texture: Texture,
}

impl<'de> Deserialize<'de> for Mesh {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = RawMesh::deserialize(deserializer)?;
        Mesh::new(raw.vertices, raw.faces, raw.texture).map_err(serde::de::Error::custom)
    }
}

/// Move reconstructed geometry into the export coordinate convention.
///
/// Positions are scaled by `0.5 * 1.35`, then X and Z are negated. Faces and
/// the texture binding carry over untouched and the input is left as is.
pub fn normalize(mesh: &Mesh) -> Mesh {
    let vertices = mesh
        .vertices
        .iter()
        .map(|v| {
            let scaled = *v / 2.0 * 1.35;
            Vec3::new(-scaled.x, scaled.y, -scaled.z)
        })
        .collect();

    Mesh {
        vertices,
        faces: mesh.faces.clone(),
        texture: Arc::clone(&mesh.texture),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle(vertices: Vec<Vec3>) -> Mesh {
        let colors = vec![Vec3::ONE; vertices.len()];
        Mesh::new(vertices, vec![[0, 1, 2]], Texture::VertexColors { colors }).unwrap()
    }

    #[test]
    fn test_normalize_unit_vertex() {
        let mesh = triangle(vec![Vec3::ONE, Vec3::ONE, Vec3::ONE]);
        let out = normalize(&mesh);
        for v in out.vertices() {
            assert!((v.x - -0.675).abs() < 1e-6);
            assert!((v.y - 0.675).abs() < 1e-6);
            assert!((v.z - -0.675).abs() < 1e-6);
        }
    }

    #[test]
    fn test_normalize_keeps_faces_and_texture() {
        let mesh = triangle(vec![Vec3::X, Vec3::Y, Vec3::new(0.2, -4.0, 3.0)]);
        let out = normalize(&mesh);

        assert_eq!(out.faces(), mesh.faces());
        assert!(out.shares_texture_with(&mesh));
        assert_eq!(out.vertex_count(), mesh.vertex_count());

        let v = out.vertices()[2];
        assert!((v.x - -0.2 * EXPORT_SCALE).abs() < 1e-6);
        assert!((v.y - -4.0 * EXPORT_SCALE).abs() < 1e-6);
        assert!((v.z - -3.0 * EXPORT_SCALE).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_leaves_input_untouched() {
        let mesh = triangle(vec![Vec3::X, Vec3::Y, Vec3::Z]);
        let before = mesh.clone();
        let _ = normalize(&mesh);
        assert_eq!(mesh, before);
    }

    #[test]
    fn test_rejects_out_of_range_face() {
        let colors = vec![Vec3::ONE; 3];
        let err = Mesh::new(
            vec![Vec3::X, Vec3::Y, Vec3::Z],
            vec![[0, 1, 3]],
            Texture::VertexColors { colors },
        )
        .unwrap_err();
        assert!(matches!(err, Error::MalformedMesh(_)));
    }

    #[test]
    fn test_rejects_texture_vertex_mismatch() {
        let err = Mesh::new(
            vec![Vec3::X, Vec3::Y, Vec3::Z],
            vec![[0, 1, 2]],
            Texture::Map {
                image: PathBuf::from("albedo.png"),
                uvs: vec![Vec2::ZERO; 2],
            },
        )
        .unwrap_err();
        assert!(matches!(err, Error::MalformedMesh(_)));
    }

    #[test]
    fn test_deserialize_validates() {
        let ok = r#"{"vertices":[[0,0,0],[1,0,0],[0,1,0]],"faces":[[0,1,2]],
            "texture":{"kind":"vertex_colors","colors":[[1,1,1],[1,1,1],[1,1,1]]}}"#;
        let mesh: Mesh = serde_json::from_str(ok).unwrap();
        assert_eq!(mesh.face_count(), 1);

        let bad = r#"{"vertices":[[0,0,0]],"faces":[[0,1,2]],
            "texture":{"kind":"vertex_colors","colors":[[1,1,1]]}}"#;
        assert!(serde_json::from_str::<Mesh>(bad).is_err());
    }
}
