// SPDX-License-Identifier: CEPL-1.0
//! Data handed to a renderer at load time. Bytes only; decoding happens in the app.
use bytemuck::{Pod, Zeroable};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SceneError {
    #[error("texture {width}x{height} needs {expected} bytes of RGBA8, got {actual}")]
    TextureSize {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
    #[error("vertex blob of {len} bytes is not a multiple of the {stride}-byte stride")]
    VertexStride { len: usize, stride: u32 },
    #[error("attribute at location {location} overruns the {stride}-byte stride")]
    AttributeOverrun { location: u32, stride: u32 },
}

/// Interleaved vertex used by the built-in meshes and the OBJ loader.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 4],
    pub uv: [f32; 2],
}

impl Vertex {
    pub const fn new(x: f32, y: f32, z: f32, u: f32, v: f32) -> Self {
        Self {
            position: [x, y, z, 1.0],
            uv: [u, v],
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VertexFormat {
    Float2,
    Float3,
    Float4,
}

impl VertexFormat {
    pub fn size(self) -> u32 {
        match self {
            VertexFormat::Float2 => 8,
            VertexFormat::Float3 => 12,
            VertexFormat::Float4 => 16,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VertexAttribute {
    pub location: u32,
    pub format: VertexFormat,
    pub offset: u32,
}

/// Stride and attribute offsets agreed between the asset loader and the pipeline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VertexLayout {
    pub stride: u32,
    pub attributes: Vec<VertexAttribute>,
}

impl VertexLayout {
    /// Layout of [`Vertex`]: vec4 position at 0, vec2 uv at 16, stride 24.
    pub fn position_uv() -> Self {
        Self {
            stride: std::mem::size_of::<Vertex>() as u32,
            attributes: vec![
                VertexAttribute {
                    location: 0,
                    format: VertexFormat::Float4,
                    offset: std::mem::offset_of!(Vertex, position) as u32,
                },
                VertexAttribute {
                    location: 1,
                    format: VertexFormat::Float2,
                    offset: std::mem::offset_of!(Vertex, uv) as u32,
                },
            ],
        }
    }

    pub fn validate(&self) -> Result<(), SceneError> {
        for a in &self.attributes {
            if a.offset + a.format.size() > self.stride {
                return Err(SceneError::AttributeOverrun {
                    location: a.location,
                    stride: self.stride,
                });
            }
        }
        Ok(())
    }
}

impl Default for VertexLayout {
    fn default() -> Self {
        Self::position_uv()
    }
}

/// One mesh: raw vertex bytes plus optional 32-bit indices.
#[derive(Clone, Debug, Default)]
pub struct MeshData {
    pub vertices: Vec<u8>,
    pub vertex_count: u32,
    pub indices: Option<Vec<u32>>,
}

impl MeshData {
    pub fn from_vertices(vertices: &[Vertex], indices: Option<Vec<u32>>) -> Self {
        Self {
            vertices: bytemuck::cast_slice(vertices).to_vec(),
            vertex_count: vertices.len() as u32,
            indices,
        }
    }

    /// Wraps an already interleaved blob, checking it against the layout stride.
    pub fn from_bytes(
        vertices: Vec<u8>,
        layout: &VertexLayout,
        indices: Option<Vec<u32>>,
    ) -> Result<Self, SceneError> {
        let stride = layout.stride as usize;
        if stride == 0 || vertices.len() % stride != 0 {
            return Err(SceneError::VertexStride {
                len: vertices.len(),
                stride: layout.stride,
            });
        }
        Ok(Self {
            vertex_count: (vertices.len() / stride) as u32,
            vertices,
            indices,
        })
    }

    pub fn index_bytes(&self) -> Option<&[u8]> {
        self.indices.as_deref().map(bytemuck::cast_slice)
    }

    pub fn index_count(&self) -> u32 {
        self.indices.as_ref().map_or(0, |i| i.len() as u32)
    }

    pub fn is_empty(&self) -> bool {
        self.vertex_count == 0
    }
}

/// Decoded RGBA8 pixels.
#[derive(Clone, Debug)]
pub struct TextureData {
    width: u32,
    height: u32,
    rgba: Vec<u8>,
}

impl TextureData {
    pub fn new(width: u32, height: u32, rgba: Vec<u8>) -> Result<Self, SceneError> {
        let expected = width as usize * height as usize * 4;
        if expected == 0 || rgba.len() != expected {
            return Err(SceneError::TextureSize {
                width,
                height,
                expected,
                actual: rgba.len(),
            });
        }
        Ok(Self {
            width,
            height,
            rgba,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn rgba(&self) -> &[u8] {
        &self.rgba
    }
}

/// Compiled shader bytecode, one opaque blob per stage.
#[derive(Clone, Debug, Default)]
pub struct ShaderSet {
    pub vertex: Vec<u8>,
    pub fragment: Vec<u8>,
}

#[derive(Clone, Debug)]
pub struct SceneAssets {
    pub meshes: Vec<MeshData>,
    pub texture: TextureData,
    pub shaders: ShaderSet,
    pub layout: VertexLayout,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_layout() {
        let l = VertexLayout::position_uv();
        assert_eq!(l.stride, 24);
        assert_eq!(l.attributes[0].offset, 0);
        assert_eq!(l.attributes[1].offset, 16);
        assert!(l.validate().is_ok());
    }

    #[test]
    fn overrunning_attribute_is_rejected() {
        let mut l = VertexLayout::position_uv();
        l.attributes[1].offset = 20;
        assert_eq!(
            l.validate(),
            Err(SceneError::AttributeOverrun {
                location: 1,
                stride: 24
            })
        );
    }

    #[test]
    fn mesh_counts() {
        let verts = [Vertex::new(0.0, 0.0, 0.0, 0.0, 0.0); 3];
        let m = MeshData::from_vertices(&verts, Some(vec![0, 1, 2]));
        assert_eq!(m.vertices.len(), 72);
        assert_eq!(m.vertex_count, 3);
        assert_eq!(m.index_count(), 3);
        assert_eq!(m.index_bytes().map(<[u8]>::len), Some(12));
    }

    #[test]
    fn blob_must_match_stride() {
        let layout = VertexLayout::position_uv();
        assert!(MeshData::from_bytes(vec![0; 48], &layout, None).is_ok());
        assert!(matches!(
            MeshData::from_bytes(vec![0; 50], &layout, None),
            Err(SceneError::VertexStride { len: 50, .. })
        ));
    }

    #[test]
    fn texture_size_is_checked() {
        assert!(TextureData::new(2, 2, vec![0; 16]).is_ok());
        assert!(TextureData::new(2, 2, vec![0; 15]).is_err());
        assert!(TextureData::new(0, 0, Vec::new()).is_err());
    }
}
