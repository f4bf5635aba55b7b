// SPDX-License-Identifier: CEPL-1.0
//! Presentable image chain, its views, the render pass and one framebuffer per image.
use std::sync::Arc;

use ash::vk;
use ember_render::{RenderSize, VsyncMode};
use tracing::info;

use crate::device::{DeviceContext, QueueFamilies};
use crate::error::{Result, VkError, VkResultExt};
use crate::upload::create_image_view;

/// Prefer BGRA8 UNORM + sRGB-nonlinear, otherwise whatever the driver listed first.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
  formats
    .iter()
    .copied()
    .find(|f| {
      f.format == vk::Format::B8G8R8A8_UNORM
        && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
    })
    .or_else(|| formats.first().copied())
}

/// MAILBOX when preferred and available; FIFO is always supported.
pub fn choose_present_mode(modes: &[vk::PresentModeKHR], pref: VsyncMode) -> vk::PresentModeKHR {
  match pref {
    VsyncMode::Mailbox if modes.contains(&vk::PresentModeKHR::MAILBOX) => {
      vk::PresentModeKHR::MAILBOX
    }
    _ => vk::PresentModeKHR::FIFO,
  }
}

pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, want: RenderSize) -> vk::Extent2D {
  if caps.current_extent.width != u32::MAX {
    return caps.current_extent;
  }
  // max/min instead of clamp: a driver reporting max < min must not panic us
  vk::Extent2D {
    width: want
      .width
      .max(caps.min_image_extent.width)
      .min(caps.max_image_extent.width),
    height: want
      .height
      .max(caps.min_image_extent.height)
      .min(caps.max_image_extent.height),
  }
}

/// One more than the minimum; `max_image_count == 0` means no upper bound.
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
  let want = caps.min_image_count + 1;
  if caps.max_image_count == 0 {
    want
  } else {
    want.min(caps.max_image_count)
  }
}

/// Every decision that goes into `vkCreateSwapchainKHR`, computed without touching the GPU.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwapchainPlan {
  pub format: vk::SurfaceFormatKHR,
  pub present_mode: vk::PresentModeKHR,
  pub extent: vk::Extent2D,
  pub image_count: u32,
  pub pre_transform: vk::SurfaceTransformFlagsKHR,
  /// `Some` when graphics and present live in different families.
  pub concurrent_families: Option<[u32; 2]>,
}

impl SwapchainPlan {
  pub fn new(
    caps: &vk::SurfaceCapabilitiesKHR,
    formats: &[vk::SurfaceFormatKHR],
    modes: &[vk::PresentModeKHR],
    want: RenderSize,
    vsync: VsyncMode,
    families: QueueFamilies,
  ) -> Result<Self> {
    let format = choose_surface_format(formats).ok_or(VkError::ResourceCreation {
      what: "swapchain (surface reports no formats)",
      result: vk::Result::ERROR_FORMAT_NOT_SUPPORTED,
    })?;
    // A minimised window reports 0x0, which vkCreateSwapchainKHR rejects.
    let extent = choose_extent(caps, want);
    if extent.width == 0 || extent.height == 0 {
      return Err(VkError::ZeroExtent);
    }
    Ok(Self {
      format,
      present_mode: choose_present_mode(modes, vsync),
      extent,
      image_count: choose_image_count(caps),
      pre_transform: caps.current_transform,
      concurrent_families: (!families.is_shared())
        .then_some([families.graphics, families.present]),
    })
  }
}

pub struct Swapchain {
  device: Arc<DeviceContext>,
  handle: vk::SwapchainKHR,
  plan: SwapchainPlan,
  images: Vec<vk::Image>,
  views: Vec<vk::ImageView>,
  render_pass: vk::RenderPass,
  framebuffers: Vec<vk::Framebuffer>,
}

impl Swapchain {
  pub fn create(device: &Arc<DeviceContext>, want: RenderSize, vsync: VsyncMode) -> Result<Self> {
    let surface = device.surface()?;
    let loader = device.swapchain_loader()?;
    let (phys, surf) = (device.physical(), surface.handle());

    let (caps, formats, modes) = unsafe {
      let sl = surface.loader();
      (
        sl.get_physical_device_surface_capabilities(phys, surf)
          .creating("surface capabilities")?,
        sl.get_physical_device_surface_formats(phys, surf)
          .creating("surface formats")?,
        sl.get_physical_device_surface_present_modes(phys, surf)
          .creating("present modes")?,
      )
    };
    let plan = SwapchainPlan::new(&caps, &formats, &modes, want, vsync, device.families())?;

    let (sharing_mode, family_count, p_families) = match &plan.concurrent_families {
      Some(f) => (vk::SharingMode::CONCURRENT, 2, f.as_ptr()),
      None => (vk::SharingMode::EXCLUSIVE, 0, std::ptr::null()),
    };
    let info = vk::SwapchainCreateInfoKHR {
      s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
      surface: surf,
      min_image_count: plan.image_count,
      image_format: plan.format.format,
      image_color_space: plan.format.color_space,
      image_extent: plan.extent,
      image_array_layers: 1,
      image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
      image_sharing_mode: sharing_mode,
      queue_family_index_count: family_count,
      p_queue_family_indices: p_families,
      pre_transform: plan.pre_transform,
      composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
      present_mode: plan.present_mode,
      clipped: vk::TRUE,
      // always a full rebuild; the old chain is gone before we get here
      old_swapchain: vk::SwapchainKHR::null(),
      ..Default::default()
    };
    let handle = unsafe { loader.create_swapchain(&info, None) }.creating("swapchain")?;

    let mut this = Self {
      device: device.clone(),
      handle,
      plan,
      images: Vec::new(),
      views: Vec::new(),
      render_pass: vk::RenderPass::null(),
      framebuffers: Vec::new(),
    };
    this.images = unsafe { loader.get_swapchain_images(handle) }.creating("swapchain images")?;

    let d = device.device();
    for &image in &this.images {
      let view = create_image_view(d, image, plan.format.format)?;
      this.views.push(view);
    }
    this.render_pass = unsafe { create_render_pass(d, plan.format.format)? };
    for &view in &this.views {
      let fb_info = vk::FramebufferCreateInfo {
        s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
        render_pass: this.render_pass,
        attachment_count: 1,
        p_attachments: &view,
        width: plan.extent.width,
        height: plan.extent.height,
        layers: 1,
        ..Default::default()
      };
      let fb = unsafe { d.create_framebuffer(&fb_info, None) }.creating("framebuffer")?;
      this.framebuffers.push(fb);
    }
    if !this.is_consistent() {
      return Err(VkError::ResourceCreation {
        what: "framebuffers (one per swapchain image)",
        result: vk::Result::ERROR_INITIALIZATION_FAILED,
      });
    }

    info!(
      format = ?plan.format.format,
      color_space = ?plan.format.color_space,
      present_mode = ?plan.present_mode,
      extent = %format_args!("{}x{}", plan.extent.width, plan.extent.height),
      images = this.images.len(),
      requested = plan.image_count,
      "swapchain created"
    );
    Ok(this)
  }

  pub fn handle(&self) -> vk::SwapchainKHR {
    self.handle
  }

  pub fn extent(&self) -> vk::Extent2D {
    self.plan.extent
  }

  pub fn render_pass(&self) -> vk::RenderPass {
    self.render_pass
  }

  pub fn framebuffer(&self, image_index: u32) -> Option<vk::Framebuffer> {
    self.framebuffers.get(image_index as usize).copied()
  }

  /// Images, views and framebuffers always come in equal numbers.
  pub fn is_consistent(&self) -> bool {
    counts_match(self.images.len(), self.views.len(), self.framebuffers.len())
  }

  // The four teardown steps are separate so the caller can slot the pipeline
  // between the swapchain and the render pass. Each is idempotent.

  pub(crate) fn destroy_framebuffers(&mut self) {
    let d = self.device.device();
    for fb in self.framebuffers.drain(..) {
      unsafe { d.destroy_framebuffer(fb, None) };
    }
  }

  pub(crate) fn destroy_views(&mut self) {
    let d = self.device.device();
    for view in self.views.drain(..) {
      unsafe { d.destroy_image_view(view, None) };
    }
  }

  pub(crate) fn destroy_chain(&mut self) {
    if self.handle != vk::SwapchainKHR::null() {
      if let Ok(loader) = self.device.swapchain_loader() {
        unsafe { loader.destroy_swapchain(self.handle, None) };
      }
      self.handle = vk::SwapchainKHR::null();
    }
    // images belong to the swapchain
    self.images.clear();
  }

  pub(crate) fn destroy_render_pass(&mut self) {
    if self.render_pass != vk::RenderPass::null() {
      unsafe { self.device.device().destroy_render_pass(self.render_pass, None) };
      self.render_pass = vk::RenderPass::null();
    }
  }
}

impl Drop for Swapchain {
  fn drop(&mut self) {
    self.destroy_framebuffers();
    self.destroy_views();
    self.destroy_chain();
    self.destroy_render_pass();
  }
}

fn counts_match(images: usize, views: usize, framebuffers: usize) -> bool {
  images > 0 && images == views && views == framebuffers
}

unsafe fn create_render_pass(d: &ash::Device, format: vk::Format) -> Result<vk::RenderPass> {
  let color = vk::AttachmentDescription {
    format,
    samples: vk::SampleCountFlags::TYPE_1,
    load_op: vk::AttachmentLoadOp::CLEAR,
    store_op: vk::AttachmentStoreOp::STORE,
    stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
    stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
    initial_layout: vk::ImageLayout::UNDEFINED,
    final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
    ..Default::default()
  };
  let color_ref = vk::AttachmentReference {
    attachment: 0,
    layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
  };
  let subpass = vk::SubpassDescription {
    pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
    color_attachment_count: 1,
    p_color_attachments: &color_ref,
    ..Default::default()
  };
  // Wait for the presentation engine to release the image before writing to it.
  let dependency = vk::SubpassDependency {
    src_subpass: vk::SUBPASS_EXTERNAL,
    dst_subpass: 0,
    src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
    dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
    src_access_mask: vk::AccessFlags::empty(),
    dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
    ..Default::default()
  };
  let info = vk::RenderPassCreateInfo {
    s_type: vk::StructureType::RENDER_PASS_CREATE_INFO,
    attachment_count: 1,
    p_attachments: &color,
    subpass_count: 1,
    p_subpasses: &subpass,
    dependency_count: 1,
    p_dependencies: &dependency,
    ..Default::default()
  };
  unsafe { d.create_render_pass(&info, None) }.creating("render pass")
}

#[cfg(test)]
mod tests {
  use super::*;

  fn fmt(format: vk::Format) -> vk::SurfaceFormatKHR {
    vk::SurfaceFormatKHR {
      format,
      color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
    }
  }

  fn caps(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
    vk::SurfaceCapabilitiesKHR {
      min_image_count: min,
      max_image_count: max,
      current_extent: vk::Extent2D {
        width: u32::MAX,
        height: u32::MAX,
      },
      min_image_extent: vk::Extent2D {
        width: 1,
        height: 1,
      },
      max_image_extent: vk::Extent2D {
        width: 2560,
        height: 1440,
      },
      current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
      ..Default::default()
    }
  }

  const SHARED: QueueFamilies = QueueFamilies {
    graphics: 0,
    present: 0,
  };

  #[test]
  fn format_prefers_bgra_unorm_srgb() {
    let formats = [
      fmt(vk::Format::R8G8B8A8_UNORM),
      fmt(vk::Format::B8G8R8A8_UNORM),
    ];
    assert_eq!(
      choose_surface_format(&formats),
      Some(fmt(vk::Format::B8G8R8A8_UNORM))
    );
  }

  #[test]
  fn format_falls_back_to_first() {
    let formats = [
      fmt(vk::Format::R8G8B8A8_UNORM),
      fmt(vk::Format::A2B10G10R10_UNORM_PACK32),
    ];
    assert_eq!(
      choose_surface_format(&formats),
      Some(fmt(vk::Format::R8G8B8A8_UNORM))
    );
    assert_eq!(choose_surface_format(&[]), None);
  }

  #[test]
  fn present_mode_selection() {
    let both = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
    assert_eq!(
      choose_present_mode(&both, VsyncMode::Mailbox),
      vk::PresentModeKHR::MAILBOX
    );
    assert_eq!(
      choose_present_mode(&[vk::PresentModeKHR::FIFO], VsyncMode::Mailbox),
      vk::PresentModeKHR::FIFO
    );
    assert_eq!(
      choose_present_mode(&both, VsyncMode::Fifo),
      vk::PresentModeKHR::FIFO
    );
  }

  #[test]
  fn image_count_policy() {
    assert_eq!(choose_image_count(&caps(2, 0)), 3);
    assert_eq!(choose_image_count(&caps(2, 3)), 3);
    assert_eq!(choose_image_count(&caps(3, 3)), 3);
  }

  #[test]
  fn extent_clamps_when_unset() {
    let c = caps(2, 0);
    assert_eq!(
      choose_extent(&c, RenderSize::new(4000, 4000)),
      vk::Extent2D {
        width: 2560,
        height: 1440
      }
    );
    assert_eq!(
      choose_extent(&c, RenderSize::new(800, 600)),
      vk::Extent2D {
        width: 800,
        height: 600
      }
    );
  }

  #[test]
  fn extent_uses_current_when_set() {
    let mut c = caps(2, 0);
    c.current_extent = vk::Extent2D {
      width: 1024,
      height: 768,
    };
    assert_eq!(
      choose_extent(&c, RenderSize::new(4000, 10)),
      vk::Extent2D {
        width: 1024,
        height: 768
      }
    );
  }

  #[test]
  fn resize_to_800x600_plans_a_clamped_extent() {
    let c = caps(2, 0);
    let formats = [fmt(vk::Format::B8G8R8A8_UNORM)];
    let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
    let before = SwapchainPlan::new(
      &c,
      &formats,
      &modes,
      RenderSize::new(1920, 1080),
      VsyncMode::Mailbox,
      SHARED,
    )
    .unwrap();
    let after = SwapchainPlan::new(
      &c,
      &formats,
      &modes,
      RenderSize::new(800, 600),
      VsyncMode::Mailbox,
      SHARED,
    )
    .unwrap();
    assert_eq!(before.extent.width, 1920);
    assert_eq!(after.extent, vk::Extent2D { width: 800, height: 600 });
    assert_eq!(before.image_count, after.image_count);
    assert_eq!(before.format, after.format);
  }

  #[test]
  fn replanning_is_idempotent() {
    let c = caps(2, 4);
    let formats = [fmt(vk::Format::R8G8B8A8_UNORM), fmt(vk::Format::B8G8R8A8_UNORM)];
    let modes = [vk::PresentModeKHR::FIFO];
    let want = RenderSize::new(1280, 720);
    let a = SwapchainPlan::new(&c, &formats, &modes, want, VsyncMode::Mailbox, SHARED).unwrap();
    let b = SwapchainPlan::new(&c, &formats, &modes, want, VsyncMode::Mailbox, SHARED).unwrap();
    assert_eq!(a, b);
  }

  #[test]
  fn split_families_share_concurrently() {
    let c = caps(2, 0);
    let formats = [fmt(vk::Format::B8G8R8A8_UNORM)];
    let split = QueueFamilies {
      graphics: 0,
      present: 2,
    };
    let plan = SwapchainPlan::new(
      &c,
      &formats,
      &[vk::PresentModeKHR::FIFO],
      RenderSize::new(640, 480),
      VsyncMode::Fifo,
      split,
    )
    .unwrap();
    assert_eq!(plan.concurrent_families, Some([0, 2]));
    assert_eq!(plan.pre_transform, vk::SurfaceTransformFlagsKHR::IDENTITY);
  }

  #[test]
  fn minimised_surface_cannot_be_planned() {
    let formats = [fmt(vk::Format::B8G8R8A8_UNORM)];
    let mut c = caps(2, 0);
    c.current_extent = vk::Extent2D {
      width: 0,
      height: 0,
    };
    let err = SwapchainPlan::new(
      &c,
      &formats,
      &[vk::PresentModeKHR::FIFO],
      RenderSize::new(800, 600),
      VsyncMode::Fifo,
      SHARED,
    )
    .unwrap_err();
    assert!(err.is_zero_extent());

    // undefined current extent, zero-height window, driver allows 0 as a minimum
    let mut c = caps(2, 0);
    c.min_image_extent = vk::Extent2D {
      width: 0,
      height: 0,
    };
    let err = SwapchainPlan::new(
      &c,
      &formats,
      &[vk::PresentModeKHR::FIFO],
      RenderSize::new(800, 0),
      VsyncMode::Fifo,
      SHARED,
    )
    .unwrap_err();
    assert!(err.is_zero_extent());
  }

  #[test]
  fn image_view_framebuffer_counts() {
    assert!(counts_match(3, 3, 3));
    assert!(!counts_match(3, 3, 2));
    assert!(!counts_match(3, 2, 3));
    assert!(!counts_match(0, 0, 0));
  }

  #[test]
  fn empty_format_list_is_an_error() {
    let err = SwapchainPlan::new(
      &caps(2, 0),
      &[],
      &[vk::PresentModeKHR::FIFO],
      RenderSize::new(1, 1),
      VsyncMode::Fifo,
      SHARED,
    )
    .unwrap_err();
    assert!(matches!(err, VkError::ResourceCreation { .. }));
  }
}
