// SPDX-License-Identifier: CEPL-1.0
//! Needs a Vulkan driver; run with `cargo test -p ember-render-vk -- --ignored`.
use ash::vk;
use ember_render::{RendererConfig, Vertex};
use ember_render_vk::{download_from_device, upload_to_device, CommandPool, DeviceContext};

fn headless_config() -> RendererConfig {
  RendererConfig {
    require_discrete_gpu: false,
    validation: false,
    ..RendererConfig::default()
  }
}

#[test]
#[ignore = "requires a Vulkan-capable GPU"]
fn vertex_bytes_survive_a_staged_upload() {
  let device = DeviceContext::headless(&headless_config()).expect("headless device");
  let pool = CommandPool::new(device.clone()).expect("command pool");

  let verts = [
    Vertex::new(-0.5, -0.5, 0.0, 0.0, 0.0),
    Vertex::new(0.5, -0.5, 0.0, 1.0, 0.0),
    Vertex::new(0.0, 0.5, 0.0, 0.5, 1.0),
  ];
  let bytes = bytemuck::cast_slice::<Vertex, u8>(&verts);

  let gpu = upload_to_device(
    &device,
    &pool,
    bytes,
    vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_SRC,
  )
  .expect("upload");
  assert_eq!(gpu.size(), bytes.len() as u64);

  let back = download_from_device(&device, &pool, &gpu).expect("download");
  assert_eq!(back, bytes);
}

#[test]
#[ignore = "requires a Vulkan-capable GPU"]
fn headless_device_has_no_swapchain() {
  let device = DeviceContext::headless(&headless_config()).expect("headless device");
  assert!(device.surface().is_err());
  assert!(device.swapchain_loader().is_err());
  assert!(!device.name().is_empty());
}
