// SPDX-License-Identifier: CEPL-1.0
//! Vulkan implementation of [`ember_render::Renderer`].
use std::sync::Arc;

use anyhow::{Context, Result};
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{debug, info, warn};

use ember_render::{
  FrameEvent, FrameInput, FrameOutcome, FrameState, InvalidTransition, MvpUniform, RenderSize,
  Renderer, RendererConfig, SceneAssets, VertexLayout, VsyncMode,
};

#[cfg(feature = "builtin-shaders")]
pub mod builtin_shaders;
pub mod command;
pub mod descriptor;
pub mod device;
pub mod error;
pub mod frame;
pub mod instance;
pub mod pipeline;
pub mod swapchain;
pub mod sync;
pub mod upload;

pub use command::CommandPool;
pub use device::DeviceContext;
pub use error::VkError;
pub use frame::{
  classify_acquire, classify_present, presented_outcome, rebuild_action, skipped_outcome,
  Acquired, RebuildAction, SurfaceStatus,
};
pub use swapchain::{Swapchain, SwapchainPlan};
pub use sync::FrameSynchronizer;
pub use upload::{download_from_device, upload_to_device, GpuBuffer, Texture};

use descriptor::DescriptorSets;
use frame::MeshBuffers;
use pipeline::{GraphicsPipeline, PipelineDesc, ShaderModules};

/// Everything that depends on the surface size. Dropped and rebuilt as a unit.
struct SurfaceTargets {
  swapchain: Swapchain,
  pipeline: GraphicsPipeline,
}

impl Drop for SurfaceTargets {
  fn drop(&mut self) {
    // framebuffers -> views -> swapchain -> pipeline + layout -> render pass
    self.swapchain.destroy_framebuffers();
    self.swapchain.destroy_views();
    self.swapchain.destroy_chain();
    self.pipeline.destroy();
    self.swapchain.destroy_render_pass();
  }
}

pub struct VkRenderer {
  // Field order is drop order. Everything below `targets` outlives every rebuild.
  targets: Option<SurfaceTargets>,
  sync: FrameSynchronizer,
  command_buffers: Vec<vk::CommandBuffer>,
  descriptors: DescriptorSets,
  uniforms: Vec<GpuBuffer>,
  meshes: Vec<MeshBuffers>,
  _texture: Texture,
  shaders: ShaderModules,
  vertex_layout: VertexLayout,
  _pool: CommandPool,
  device: Arc<DeviceContext>,

  size: RenderSize,
  clear: [f32; 4],
  vsync: VsyncMode,
  blend: bool,
  state: FrameState,
}

impl VkRenderer {
  /// Uploads `scene` to an existing device and, if `size` is drawable, builds the swapchain.
  pub fn with_device(
    device: Arc<DeviceContext>,
    size: RenderSize,
    config: &RendererConfig,
    scene: &SceneAssets,
  ) -> Result<Self> {
    scene.layout.validate().context("vertex layout")?;
    let frames = config.frames_in_flight.max(1);

    let pool = CommandPool::new(device.clone())?;
    let mut meshes = Vec::with_capacity(scene.meshes.len());
    for (i, mesh) in scene.meshes.iter().enumerate() {
      if mesh.is_empty() {
        warn!(mesh = i, "skipping empty mesh");
        continue;
      }
      let buffers =
        MeshBuffers::upload(&device, &pool, mesh).with_context(|| format!("mesh {i}"))?;
      meshes.push(buffers);
    }
    let texture = Texture::upload(&device, &pool, &scene.texture).context("texture upload")?;

    let mut uniforms = Vec::with_capacity(frames);
    for _ in 0..frames {
      let mut ub = GpuBuffer::host_visible(
        &device,
        std::mem::size_of::<MvpUniform>() as vk::DeviceSize,
        vk::BufferUsageFlags::UNIFORM_BUFFER,
      )?;
      ub.map_persistent()?;
      uniforms.push(ub);
    }
    let descriptors = DescriptorSets::new(&device, &uniforms, &texture)?;
    let shaders = ShaderModules::new(&device, &scene.shaders)?;
    let command_buffers = pool.allocate(frames as u32)?;
    let sync = FrameSynchronizer::new(&device, frames, config.fence_timeout_ms)?;

    let mut r = Self {
      targets: None,
      sync,
      command_buffers,
      descriptors,
      uniforms,
      meshes,
      _texture: texture,
      shaders,
      vertex_layout: scene.layout.clone(),
      _pool: pool,
      device,
      size,
      clear: config.clear_color,
      vsync: config.vsync_mode,
      blend: config.blend,
      state: FrameState::Idle,
    };
    if !size.is_empty() {
      match r.build_targets() {
        Ok(t) => r.targets = Some(t),
        // starts minimised; the first render() with an area builds them
        Err(VkError::ZeroExtent) => debug!("surface has no area yet"),
        Err(e) => return Err(e.into()),
      }
    }
    info!(
      gpu = %r.device.name(),
      frames_in_flight = r.sync.frames_in_flight(),
      meshes = r.meshes.len(),
      "vulkan renderer ready"
    );
    Ok(r)
  }

  pub fn device(&self) -> &Arc<DeviceContext> {
    &self.device
  }

  pub fn state(&self) -> FrameState {
    self.state
  }

  pub fn frame_counter(&self) -> u64 {
    self.sync.frame_counter()
  }

  pub fn swapchain_extent(&self) -> Option<vk::Extent2D> {
    self.targets.as_ref().map(|t| t.swapchain.extent())
  }

  pub(crate) fn transition(&mut self, event: FrameEvent) -> Result<(), InvalidTransition> {
    self.state = self.state.next(event)?;
    Ok(())
  }

  fn request_rebuild(&mut self) {
    // ResizeRequested is accepted from every state
    self.state = self.state.next(FrameEvent::ResizeRequested).unwrap_or(FrameState::Resizing);
  }

  fn build_targets(&self) -> error::Result<SurfaceTargets> {
    let swapchain = Swapchain::create(&self.device, self.size, self.vsync)?;
    let pipeline = GraphicsPipeline::build(
      &self.device,
      &PipelineDesc {
        render_pass: swapchain.render_pass(),
        extent: swapchain.extent(),
        shaders: &self.shaders,
        set_layout: self.descriptors.layout(),
        vertex_layout: &self.vertex_layout,
        blend: self.blend,
      },
    )?;
    Ok(SurfaceTargets {
      swapchain,
      pipeline,
    })
  }

  /// The single rebuild path: resize, stale surface and vsync change all come through here.
  ///
  /// A surface with no area is never recreated: the state stays `Resizing`, the old
  /// targets stay as they are, and the next `render` asks again.
  pub(crate) fn rebuild(&mut self, cause: FrameEvent) -> Result<RebuildAction> {
    self.transition(cause)?;
    if self.surface_action()? == RebuildAction::Pause {
      debug!(?cause, "surface has no area; rebuild deferred");
      return Ok(RebuildAction::Pause);
    }
    self.device.wait_idle()?;
    self.sync.wait_all()?;
    // old targets go first; SurfaceTargets::drop owns the order
    self.targets = None;
    match self.build_targets() {
      Ok(t) => self.targets = Some(t),
      // shrank to nothing between the query and the create
      Err(VkError::ZeroExtent) => return Ok(RebuildAction::Pause),
      Err(e) => return Err(anyhow::Error::new(e).context("swapchain rebuild")),
    }
    self.transition(FrameEvent::Rebuilt)?;
    Ok(RebuildAction::Recreate)
  }

  /// A minimised window can report a zero current extent even after a non-zero resize event.
  fn surface_action(&self) -> error::Result<RebuildAction> {
    let surface = self.device.surface()?;
    let caps = unsafe {
      surface
        .loader()
        .get_physical_device_surface_capabilities(self.device.physical(), surface.handle())
    }
    .map_err(|r| VkError::resource("surface capabilities", r))?;
    Ok(rebuild_action(caps.current_extent, self.size))
  }
}

impl Renderer for VkRenderer {
  fn new(
    window: &dyn HasWindowHandle,
    display: &dyn HasDisplayHandle,
    size: RenderSize,
    config: &RendererConfig,
    scene: &SceneAssets,
  ) -> Result<Self> {
    let device = DeviceContext::new(window, display, config).context("vulkan device")?;
    Self::with_device(device, size, config, scene)
  }

  fn on_window_resized(&mut self, size: RenderSize) {
    if size == self.size && self.targets.is_some() {
      return;
    }
    self.size = size;
    if !size.is_empty() {
      self.request_rebuild();
    }
  }

  fn render(&mut self, frame: &FrameInput) -> Result<FrameOutcome> {
    if self.size.is_empty() {
      return Ok(FrameOutcome::Paused);
    }
    if (self.state == FrameState::Resizing || self.targets.is_none())
      && self.rebuild(FrameEvent::ResizeRequested)? == RebuildAction::Pause
    {
      return Ok(FrameOutcome::Paused);
    }
    self.draw_frame(frame)
  }

  fn set_clear_color(&mut self, rgba: [f32; 4]) {
    self.clear = rgba;
  }

  fn set_vsync_mode(&mut self, mode: VsyncMode) {
    if mode != self.vsync {
      self.vsync = mode;
      self.request_rebuild();
    }
  }
}

impl Drop for VkRenderer {
  fn drop(&mut self) {
    // Strict teardown order:
    //   1. wait for every in-flight frame, then the whole device
    //   2. surface targets (framebuffers, views, swapchain, pipeline, render pass)
    //   3. remaining fields in declaration order, device last
    if let Err(e) = self.sync.wait_all() {
      warn!(error = %e, "frame fences did not signal during teardown");
    }
    self.device.wait_idle().ok();
    self.targets.take();
  }
}
