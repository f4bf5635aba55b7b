// SPDX-License-Identifier: CEPL-1.0
//! Per-slot fence/semaphore triples and the frame ring that decides which slot is next.
use std::sync::Arc;

use ash::vk;
use ember_render::FrameRing;
use tracing::trace;

use crate::device::DeviceContext;
use crate::error::{Result, VkError, VkResultExt};

pub struct SyncSlot {
  pub image_available: vk::Semaphore,
  pub render_finished: vk::Semaphore,
  /// Waited on only while the ring says the GPU owns the slot.
  pub in_flight: vk::Fence,
}

pub struct FrameSynchronizer {
  device: Arc<DeviceContext>,
  slots: Vec<SyncSlot>,
  ring: FrameRing,
  timeout_ns: u64,
}

/// `0` means wait forever.
pub fn fence_timeout_ns(ms: u64) -> u64 {
  if ms == 0 {
    u64::MAX
  } else {
    ms.saturating_mul(1_000_000)
  }
}

/// A fence that never signals means the GPU stopped making progress.
pub fn fence_wait_error(result: vk::Result, timeout_ms: u64) -> VkError {
  match result {
    vk::Result::TIMEOUT => {
      VkError::DeviceLost(format!("frame fence not signalled within {timeout_ms} ms"))
    }
    vk::Result::ERROR_DEVICE_LOST => VkError::DeviceLost("frame fence wait".into()),
    r => VkError::resource("frame fence wait", r),
  }
}

impl FrameSynchronizer {
  pub fn new(device: &Arc<DeviceContext>, frames: usize, fence_timeout_ms: u64) -> Result<Self> {
    let mut this = Self {
      device: device.clone(),
      slots: Vec::with_capacity(frames),
      ring: FrameRing::new(frames),
      timeout_ns: fence_timeout_ns(fence_timeout_ms),
    };
    let d = device.device();
    let sem_info = vk::SemaphoreCreateInfo::default();
    let fence_info = vk::FenceCreateInfo {
      s_type: vk::StructureType::FENCE_CREATE_INFO,
      flags: vk::FenceCreateFlags::SIGNALED,
      ..Default::default()
    };
    for _ in 0..this.ring.len() {
      let image_available =
        unsafe { d.create_semaphore(&sem_info, None) }.creating("semaphore")?;
      let render_finished = match unsafe { d.create_semaphore(&sem_info, None) } {
        Ok(s) => s,
        Err(r) => {
          unsafe { d.destroy_semaphore(image_available, None) };
          return Err(VkError::resource("semaphore", r));
        }
      };
      let in_flight = match unsafe { d.create_fence(&fence_info, None) } {
        Ok(f) => f,
        Err(r) => {
          unsafe {
            d.destroy_semaphore(image_available, None);
            d.destroy_semaphore(render_finished, None);
          }
          return Err(VkError::resource("fence", r));
        }
      };
      this.slots.push(SyncSlot {
        image_available,
        render_finished,
        in_flight,
      });
    }
    Ok(this)
  }

  pub fn frames_in_flight(&self) -> usize {
    self.ring.len()
  }

  pub fn frame_counter(&self) -> u64 {
    self.ring.frame_counter()
  }

  pub fn current(&self) -> usize {
    self.ring.current()
  }

  pub fn slot(&self) -> &SyncSlot {
    &self.slots[self.ring.current()]
  }

  /// Blocks until the GPU is done with the current slot, then hands it to the host.
  pub fn wait_current(&mut self) -> Result<()> {
    let i = self.ring.current();
    if !self.ring.must_wait() {
      return Ok(());
    }
    trace!(slot = i, "waiting on frame fence");
    self.wait(&[self.slots[i].in_flight])?;
    self.ring.mark_retired(i)?;
    Ok(())
  }

  /// Unsignals the current fence. Call immediately before the submit that signals it.
  pub fn reset_current(&self) -> Result<()> {
    let fence = self.slot().in_flight;
    unsafe { self.device.device().reset_fences(&[fence]) }.creating("fence reset")
  }

  pub fn mark_submitted(&mut self) -> Result<usize> {
    Ok(self.ring.mark_submitted()?)
  }

  pub fn advance(&mut self) {
    self.ring.advance();
  }

  /// Waits for every submitted slot. Used before rebuilds and teardown.
  pub fn wait_all(&mut self) -> Result<()> {
    let fences: Vec<_> = self
      .ring
      .in_flight_slots()
      .map(|i| self.slots[i].in_flight)
      .collect();
    if !fences.is_empty() {
      self.wait(&fences)?;
    }
    self.ring.retire_all();
    Ok(())
  }

  fn wait(&self, fences: &[vk::Fence]) -> Result<()> {
    unsafe {
      self.device
        .device()
        .wait_for_fences(fences, true, self.timeout_ns)
    }
    .map_err(|r| fence_wait_error(r, self.timeout_ns / 1_000_000))
  }
}

impl Drop for FrameSynchronizer {
  fn drop(&mut self) {
    let d = self.device.device();
    for s in self.slots.drain(..) {
      unsafe {
        d.destroy_fence(s.in_flight, None);
        d.destroy_semaphore(s.render_finished, None);
        d.destroy_semaphore(s.image_available, None);
      }
    }
  }
}
