// SPDX-License-Identifier: CEPL-1.0
//! One frame: wait, acquire, record, submit, present.
//!
//! Out-of-date and suboptimal results from acquire/present are classified into
//! [`SurfaceStatus`] and handled by rebuilding; only genuinely fatal results become errors.
use std::sync::Arc;

use ash::prelude::VkResult;
use ash::vk;
use ember_math::{combine_mvp, model_rotation};
use ember_render::{FrameEvent, FrameInput, FrameOutcome, MeshData, MvpUniform, RenderSize};
use tracing::{debug, trace};

use crate::command::CommandPool;
use crate::device::DeviceContext;
use crate::error::{Result, VkError, VkResultExt};
use crate::upload::{upload_to_device, GpuBuffer};
use crate::VkRenderer;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SurfaceStatus {
  Optimal,
  /// Still presentable, but no longer an exact match. Rebuild after this frame.
  Suboptimal,
  OutOfDate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Acquired {
  Image { index: u32, status: SurfaceStatus },
  OutOfDate,
}

pub fn classify_acquire(result: VkResult<(u32, bool)>) -> Result<Acquired> {
  match result {
    Ok((index, false)) => Ok(Acquired::Image {
      index,
      status: SurfaceStatus::Optimal,
    }),
    Ok((index, true)) => Ok(Acquired::Image {
      index,
      status: SurfaceStatus::Suboptimal,
    }),
    Err(vk::Result::ERROR_OUT_OF_DATE_KHR | vk::Result::SUBOPTIMAL_KHR) => {
      Ok(Acquired::OutOfDate)
    }
    Err(r) => Err(VkError::DeviceLost(format!("acquire_next_image: {r}"))),
  }
}

pub fn classify_present(result: VkResult<bool>) -> Result<SurfaceStatus> {
  match result {
    Ok(false) => Ok(SurfaceStatus::Optimal),
    Ok(true) | Err(vk::Result::SUBOPTIMAL_KHR) => Ok(SurfaceStatus::Suboptimal),
    Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(SurfaceStatus::OutOfDate),
    Err(r) => Err(VkError::DeviceLost(format!("queue_present: {r}"))),
  }
}

/// What a pending rebuild should do with the surface as it is right now.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RebuildAction {
  Recreate,
  /// The surface has no area. Keep waiting in `Resizing`; nothing is destroyed or created.
  Pause,
}

/// `current_extent` is `u32::MAX` wide when the window size decides the extent.
pub fn rebuild_action(current_extent: vk::Extent2D, window: RenderSize) -> RebuildAction {
  let (w, h) = if current_extent.width == u32::MAX {
    (window.width, window.height)
  } else {
    (current_extent.width, current_extent.height)
  };
  if w == 0 || h == 0 {
    RebuildAction::Pause
  } else {
    RebuildAction::Recreate
  }
}

/// A frame that reached present is stale if either end reported anything but optimal.
pub fn presented_outcome(acquire: SurfaceStatus, present: SurfaceStatus) -> FrameOutcome {
  if acquire == SurfaceStatus::Optimal && present == SurfaceStatus::Optimal {
    FrameOutcome::Presented
  } else {
    FrameOutcome::PresentedStale
  }
}

/// A frame dropped at acquire: skipped if the chain came back, paused if it could not.
pub fn skipped_outcome(action: RebuildAction) -> FrameOutcome {
  match action {
    RebuildAction::Recreate => FrameOutcome::Skipped,
    RebuildAction::Pause => FrameOutcome::Paused,
  }
}

/// Device-local copy of one [`MeshData`].
pub(crate) struct MeshBuffers {
  vertices: GpuBuffer,
  indices: Option<GpuBuffer>,
  vertex_count: u32,
  index_count: u32,
}

impl MeshBuffers {
  pub(crate) fn upload(
    device: &Arc<DeviceContext>,
    pool: &CommandPool,
    mesh: &MeshData,
  ) -> Result<Self> {
    let vertices = upload_to_device(
      device,
      pool,
      &mesh.vertices,
      vk::BufferUsageFlags::VERTEX_BUFFER,
    )?;
    let indices = match mesh.index_bytes() {
      Some(bytes) if !bytes.is_empty() => Some(upload_to_device(
        device,
        pool,
        bytes,
        vk::BufferUsageFlags::INDEX_BUFFER,
      )?),
      _ => None,
    };
    Ok(Self {
      vertices,
      indices,
      vertex_count: mesh.vertex_count,
      index_count: mesh.index_count(),
    })
  }
}

/// Handles a command buffer needs for one frame; all owned elsewhere.
#[derive(Clone, Copy)]
pub(crate) struct RecordTargets {
  pub render_pass: vk::RenderPass,
  pub framebuffer: vk::Framebuffer,
  pub extent: vk::Extent2D,
  pub pipeline: vk::Pipeline,
  pub pipeline_layout: vk::PipelineLayout,
  pub descriptor_set: vk::DescriptorSet,
  pub clear: [f32; 4],
}

/// Re-records `cmd` from scratch. The caller guarantees its fence has signalled.
pub(crate) unsafe fn record_command_buffer(
  d: &ash::Device,
  cmd: vk::CommandBuffer,
  t: &RecordTargets,
  meshes: &[MeshBuffers],
) -> Result<()> {
  d.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
    .creating("command buffer reset")?;
  let begin = vk::CommandBufferBeginInfo {
    s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
    flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
    ..Default::default()
  };
  d.begin_command_buffer(cmd, &begin)
    .creating("command buffer begin")?;

  let clears = [vk::ClearValue {
    color: vk::ClearColorValue { float32: t.clear },
  }];
  let rp_begin = vk::RenderPassBeginInfo {
    s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
    render_pass: t.render_pass,
    framebuffer: t.framebuffer,
    render_area: vk::Rect2D {
      offset: vk::Offset2D { x: 0, y: 0 },
      extent: t.extent,
    },
    clear_value_count: clears.len() as u32,
    p_clear_values: clears.as_ptr(),
    ..Default::default()
  };
  d.cmd_begin_render_pass(cmd, &rp_begin, vk::SubpassContents::INLINE);
  d.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, t.pipeline);
  d.cmd_bind_descriptor_sets(
    cmd,
    vk::PipelineBindPoint::GRAPHICS,
    t.pipeline_layout,
    0,
    &[t.descriptor_set],
    &[],
  );

  for mesh in meshes {
    d.cmd_bind_vertex_buffers(cmd, 0, &[mesh.vertices.handle()], &[0]);
    match &mesh.indices {
      Some(ib) => {
        d.cmd_bind_index_buffer(cmd, ib.handle(), 0, vk::IndexType::UINT32);
        d.cmd_draw_indexed(cmd, mesh.index_count, 1, 0, 0, 0);
      }
      None => d.cmd_draw(cmd, mesh.vertex_count, 1, 0, 0),
    }
  }

  d.cmd_end_render_pass(cmd);
  d.end_command_buffer(cmd).creating("command buffer end")?;
  Ok(())
}

impl VkRenderer {
  /// Runs one frame against existing targets. The caller handles pause and pending rebuilds.
  pub(crate) fn draw_frame(&mut self, frame: &FrameInput) -> anyhow::Result<FrameOutcome> {
    let device = self.device.clone();
    let d = device.device();
    let loader = device.swapchain_loader()?;

    self.transition(FrameEvent::BeginFrame)?;
    self.sync.wait_current()?;

    let swapchain = self
      .targets
      .as_ref()
      .map(|t| t.swapchain.handle())
      .ok_or_else(|| anyhow::anyhow!("draw_frame without a swapchain"))?;
    let slot = self.sync.current();
    let (image_available, render_finished, in_flight) = {
      let s = self.sync.slot();
      (s.image_available, s.render_finished, s.in_flight)
    };

    let acquired = classify_acquire(unsafe {
      loader.acquire_next_image(swapchain, u64::MAX, image_available, vk::Fence::null())
    })?;
    let (image_index, acquire_status) = match acquired {
      Acquired::Image { index, status } => (index, status),
      Acquired::OutOfDate => {
        debug!("swapchain out of date at acquire; frame skipped");
        let action = self.rebuild(FrameEvent::SurfaceStale)?;
        return Ok(skipped_outcome(action));
      }
    };
    self.transition(FrameEvent::ImageAcquired)?;

    let mvp = combine_mvp(model_rotation(frame.elapsed_ms), frame.view, frame.projection);
    self.uniforms[slot].write(&MvpUniform::new(mvp))?;

    let targets = self.record_targets(image_index, slot)?;
    let cmd = self.command_buffers[slot];
    unsafe { record_command_buffer(d, cmd, &targets, &self.meshes) }?;

    let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
    let submit = vk::SubmitInfo {
      s_type: vk::StructureType::SUBMIT_INFO,
      wait_semaphore_count: 1,
      p_wait_semaphores: &image_available,
      p_wait_dst_stage_mask: wait_stages.as_ptr(),
      command_buffer_count: 1,
      p_command_buffers: &cmd,
      signal_semaphore_count: 1,
      p_signal_semaphores: &render_finished,
      ..Default::default()
    };
    // Reset last: an error above must not leave an unsignalled fence behind.
    self.sync.reset_current()?;
    unsafe { d.queue_submit(device.graphics_queue(), &[submit], in_flight) }
      .creating("queue submit")?;
    self.sync.mark_submitted()?;
    self.transition(FrameEvent::CommandsSubmitted)?;

    self.transition(FrameEvent::BeginPresent)?;
    let present = vk::PresentInfoKHR {
      s_type: vk::StructureType::PRESENT_INFO_KHR,
      wait_semaphore_count: 1,
      p_wait_semaphores: &render_finished,
      swapchain_count: 1,
      p_swapchains: &swapchain,
      p_image_indices: &image_index,
      ..Default::default()
    };
    let present_status =
      classify_present(unsafe { loader.queue_present(device.present_queue(), &present) })?;
    self.sync.advance();
    trace!(slot, image_index, frame = self.sync.frame_counter(), "frame submitted");

    let outcome = presented_outcome(acquire_status, present_status);
    if outcome == FrameOutcome::PresentedStale {
      debug!(?acquire_status, ?present_status, "surface stale after present");
      // a paused rebuild leaves the state in Resizing; render() retries it
      self.rebuild(FrameEvent::SurfaceStale)?;
    } else {
      self.transition(FrameEvent::Presented)?;
    }
    Ok(outcome)
  }

  fn record_targets(&self, image_index: u32, slot: usize) -> Result<RecordTargets> {
    let missing = |what: &'static str| VkError::ResourceCreation {
      what,
      result: vk::Result::ERROR_UNKNOWN,
    };
    let t = self.targets.as_ref().ok_or_else(|| missing("swapchain"))?;
    Ok(RecordTargets {
      render_pass: t.swapchain.render_pass(),
      framebuffer: t
        .swapchain
        .framebuffer(image_index)
        .ok_or_else(|| missing("framebuffer for acquired image"))?,
      extent: t.swapchain.extent(),
      pipeline: t.pipeline.handle(),
      pipeline_layout: t.pipeline.layout(),
      descriptor_set: self
        .descriptors
        .set(slot)
        .ok_or_else(|| missing("descriptor set"))?,
      clear: self.clear,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn acquire_classification() {
    assert_eq!(
      classify_acquire(Ok((2, false))).unwrap(),
      Acquired::Image {
        index: 2,
        status: SurfaceStatus::Optimal
      }
    );
    assert_eq!(
      classify_acquire(Ok((0, true))).unwrap(),
      Acquired::Image {
        index: 0,
        status: SurfaceStatus::Suboptimal
      }
    );
    assert_eq!(
      classify_acquire(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap(),
      Acquired::OutOfDate
    );
  }

  #[test]
  fn acquire_fatal_results() {
    for r in [
      vk::Result::ERROR_DEVICE_LOST,
      vk::Result::ERROR_SURFACE_LOST_KHR,
      vk::Result::ERROR_OUT_OF_HOST_MEMORY,
    ] {
      assert!(classify_acquire(Err(r)).unwrap_err().is_device_lost());
    }
  }

  #[test]
  fn minimised_surface_pauses_instead_of_rebuilding() {
    let zero = vk::Extent2D {
      width: 0,
      height: 0,
    };
    let window = RenderSize::new(800, 600);
    assert_eq!(rebuild_action(zero, window), RebuildAction::Pause);
    assert_eq!(
      rebuild_action(vk::Extent2D { width: 800, height: 0 }, window),
      RebuildAction::Pause
    );
    assert_eq!(
      rebuild_action(vk::Extent2D { width: 640, height: 480 }, window),
      RebuildAction::Recreate
    );
  }

  #[test]
  fn undefined_extent_defers_to_the_window() {
    let undefined = vk::Extent2D {
      width: u32::MAX,
      height: u32::MAX,
    };
    assert_eq!(
      rebuild_action(undefined, RenderSize::new(800, 600)),
      RebuildAction::Recreate
    );
    assert_eq!(
      rebuild_action(undefined, RenderSize::new(0, 600)),
      RebuildAction::Pause
    );
  }

  #[test]
  fn stale_status_at_either_end_marks_the_frame() {
    use SurfaceStatus::*;
    assert_eq!(presented_outcome(Optimal, Optimal), FrameOutcome::Presented);
    for (a, p) in [
      (Suboptimal, Optimal),
      (Optimal, Suboptimal),
      (Optimal, OutOfDate),
      (Suboptimal, OutOfDate),
    ] {
      assert_eq!(presented_outcome(a, p), FrameOutcome::PresentedStale);
      assert!(presented_outcome(a, p).presented());
    }
  }

  #[test]
  fn out_of_date_acquire_outcome() {
    assert_eq!(skipped_outcome(RebuildAction::Recreate), FrameOutcome::Skipped);
    assert_eq!(skipped_outcome(RebuildAction::Pause), FrameOutcome::Paused);
    assert!(!skipped_outcome(RebuildAction::Pause).presented());
  }

  #[test]
  fn present_classification() {
    assert_eq!(classify_present(Ok(false)).unwrap(), SurfaceStatus::Optimal);
    assert_eq!(classify_present(Ok(true)).unwrap(), SurfaceStatus::Suboptimal);
    assert_eq!(
      classify_present(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap(),
      SurfaceStatus::OutOfDate
    );
    assert!(classify_present(Err(vk::Result::ERROR_DEVICE_LOST))
      .unwrap_err()
      .is_device_lost());
  }
}
