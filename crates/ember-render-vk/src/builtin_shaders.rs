// SPDX-License-Identifier: CEPL-1.0
//! SPIR-V for `shaders/mesh.{vert,frag}`, compiled by build.rs.
use ember_render::ShaderSet;

pub const MESH_VERT: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/mesh.vert.spv"));
pub const MESH_FRAG: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/mesh.frag.spv"));

pub fn mesh() -> ShaderSet {
  ShaderSet {
    vertex: MESH_VERT.to_vec(),
    fragment: MESH_FRAG.to_vec(),
  }
}
