// SPDX-License-Identifier: CEPL-1.0
//! Everything the renderer consumes from disk, plus built-in fallbacks.
use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use ember_render::{MeshData, SceneAssets, ShaderSet, TextureData, Vertex, VertexLayout};
use tracing::info;

use crate::config::AssetConfig;

const HALF: f32 = 0.5;
const LIGHT: [u8; 4] = [0xee, 0xee, 0xee, 0xff];
const DARK: [u8; 4] = [0x33, 0x55, 0x99, 0xff];

// (outward normal, right, up) per face, with right x up == -normal so that
// bottom-left, bottom-right, top-right, top-left is counter-clockwise from outside.
const FACES: [([f32; 3], [f32; 3], [f32; 3]); 6] = [
    ([0.0, 0.0, -1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
    ([0.0, 0.0, 1.0], [-1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
    ([1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0]),
    ([-1.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.0, 1.0, 0.0]),
    ([0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]),
    ([0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, -1.0]),
];

/// Unit cube centred on the origin, 4 vertices and 2 triangles per face.
pub fn cube_mesh() -> MeshData {
    let mut verts = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);
    for (n, r, u) in FACES {
        let base = verts.len() as u32;
        for (sr, su, uv) in [
            (-1.0, -1.0, [0.0, 1.0]),
            (1.0, -1.0, [1.0, 1.0]),
            (1.0, 1.0, [1.0, 0.0]),
            (-1.0, 1.0, [0.0, 0.0]),
        ] {
            let p: [f32; 3] = std::array::from_fn(|i| HALF * (n[i] + sr * r[i] + su * u[i]));
            verts.push(Vertex::new(p[0], p[1], p[2], uv[0], uv[1]));
        }
        indices.extend([0, 1, 2, 0, 2, 3].map(|i| base + i));
    }
    MeshData::from_vertices(&verts, Some(indices))
}

/// `size`x`size` RGBA8 checkerboard of `cells`x`cells` squares.
pub fn checkerboard(size: u32, cells: u32) -> Result<TextureData> {
    let cell = (size / cells.max(1)).max(1);
    let mut rgba = Vec::with_capacity((size * size * 4) as usize);
    for y in 0..size {
        for x in 0..size {
            let px = if ((x / cell) + (y / cell)) % 2 == 0 {
                LIGHT
            } else {
                DARK
            };
            rgba.extend_from_slice(&px);
        }
    }
    Ok(TextureData::new(size, size, rgba)?)
}

pub fn load_texture(path: &Path) -> Result<TextureData> {
    let img = image::open(path)
        .with_context(|| format!("decoding texture {}", path.display()))?
        .to_rgba8();
    let (w, h) = img.dimensions();
    Ok(TextureData::new(w, h, img.into_raw())?)
}

/// One indexed mesh per OBJ model. Missing UVs become (0, 0).
pub fn load_obj(path: &Path) -> Result<Vec<MeshData>> {
    let opts = tobj::LoadOptions {
        triangulate: true,
        single_index: true,
        ..Default::default()
    };
    let (models, _materials) =
        tobj::load_obj(path, &opts).with_context(|| format!("loading {}", path.display()))?;

    let mut meshes = Vec::with_capacity(models.len());
    for model in models {
        let m = &model.mesh;
        let count = m.positions.len() / 3;
        let has_uv = m.texcoords.len() >= count * 2;
        let verts: Vec<Vertex> = (0..count)
            .map(|i| {
                let (u, v) = if has_uv {
                    (m.texcoords[2 * i], 1.0 - m.texcoords[2 * i + 1])
                } else {
                    (0.0, 0.0)
                };
                // OBJ is right-handed; negating Z mirrors into the left-handed world
                // and keeps counter-clockwise faces counter-clockwise from outside.
                Vertex::new(
                    m.positions[3 * i],
                    m.positions[3 * i + 1],
                    -m.positions[3 * i + 2],
                    u,
                    v,
                )
            })
            .collect();
        if verts.is_empty() {
            continue;
        }
        meshes.push(MeshData::from_vertices(&verts, Some(m.indices.clone())));
    }
    if meshes.is_empty() {
        bail!("{} contains no geometry", path.display());
    }
    info!(path = %path.display(), meshes = meshes.len(), "model loaded");
    Ok(meshes)
}

fn read_spirv(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("reading shader {}", path.display()))
}

pub fn load_shaders(cfg: &AssetConfig) -> Result<ShaderSet> {
    #[cfg(feature = "builtin-shaders")]
    if !cfg.vertex_shader.exists() || !cfg.fragment_shader.exists() {
        info!("shader files not found; using built-in SPIR-V");
        return Ok(ember_render_vk::builtin_shaders::mesh());
    }
    Ok(ShaderSet {
        vertex: read_spirv(&cfg.vertex_shader)?,
        fragment: read_spirv(&cfg.fragment_shader)?,
    })
}

pub fn load_scene(cfg: &AssetConfig) -> Result<SceneAssets> {
    let meshes = match &cfg.model {
        Some(path) => load_obj(path)?,
        None => vec![cube_mesh()],
    };
    let texture = match &cfg.texture {
        Some(path) => load_texture(path)?,
        None => checkerboard(256, 8)?,
    };
    Ok(SceneAssets {
        meshes,
        texture,
        shaders: load_shaders(cfg)?,
        layout: VertexLayout::position_uv(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_math::Vec3;

    fn positions(mesh: &MeshData) -> Vec<Vec3> {
        decode_vertices(mesh)
            .iter()
            .map(|v| Vec3::new(v.position[0], v.position[1], v.position[2]))
            .collect()
    }

    fn decode_vertices(mesh: &MeshData) -> Vec<Vertex> {
        mesh.vertices
            .chunks_exact(std::mem::size_of::<Vertex>())
            .map(|c| {
                let f: Vec<f32> = c
                    .chunks_exact(4)
                    .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
                    .collect();
                Vertex::new(f[0], f[1], f[2], f[4], f[5])
            })
            .collect()
    }

    #[test]
    fn cube_shape() {
        let cube = cube_mesh();
        assert_eq!(cube.vertex_count, 24);
        assert_eq!(cube.index_count(), 36);
        for p in positions(&cube) {
            assert_eq!(p.abs(), Vec3::splat(0.5));
        }
    }

    #[test]
    fn cube_faces_are_counter_clockwise_from_outside() {
        let cube = cube_mesh();
        let p = positions(&cube);
        let idx = cube.indices.as_ref().unwrap();
        for tri in idx.chunks_exact(3) {
            let (a, b, c) = (p[tri[0] as usize], p[tri[1] as usize], p[tri[2] as usize]);
            let centre = (a + b + c) / 3.0;
            // Outward direction of an axis-aligned face is its dominant centroid axis.
            let outward = Vec3::select(
                centre.abs().cmpge(Vec3::splat(0.5 - 1e-4)),
                centre.signum(),
                Vec3::ZERO,
            );
            assert_eq!(outward.length_squared(), 1.0, "triangle {tri:?}");
            // In a left-handed world, CCW seen from outside means the
            // right-hand-rule normal points inward.
            let n = (b - a).cross(c - a);
            assert!(n.dot(outward) < 0.0, "triangle {tri:?} faces inward");
        }
    }

    #[test]
    fn checkerboard_alternates() {
        let tex = checkerboard(4, 2).unwrap();
        assert_eq!((tex.width(), tex.height()), (4, 4));
        let px = |x: usize, y: usize| &tex.rgba()[(y * 4 + x) * 4..][..4];
        assert_eq!(px(0, 0), px(1, 1));
        assert_ne!(px(0, 0), px(2, 0));
        assert_eq!(px(0, 0), px(2, 2));
    }

    #[test]
    fn missing_shader_file_names_the_path() {
        let cfg = AssetConfig {
            vertex_shader: "nowhere/a.spv".into(),
            fragment_shader: "nowhere/b.spv".into(),
            ..AssetConfig::default()
        };
        let err = read_spirv(&cfg.vertex_shader).unwrap_err();
        assert!(format!("{err:#}").contains("nowhere/a.spv"));
    }

    #[test]
    fn obj_is_loaded_indexed_with_flipped_v() {
        let dir = std::env::temp_dir().join(format!("ember-obj-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("tri.obj");
        fs::write(
            &path,
            "v 0 0 1\nv 1 0 1\nv 0 1 1\nvt 0 0\nvt 1 0\nvt 0 1\nf 1/1 2/2 3/3\n",
        )
        .unwrap();

        let meshes = load_obj(&path).unwrap();
        assert_eq!(meshes.len(), 1);
        assert_eq!(meshes[0].vertex_count, 3);
        assert_eq!(meshes[0].index_count(), 3);
        let verts = decode_vertices(&meshes[0]);
        assert_eq!(verts[0].uv, [0.0, 1.0]);
        assert_eq!(verts[0].position[2], -1.0);

        fs::remove_dir_all(&dir).ok();
    }
}
