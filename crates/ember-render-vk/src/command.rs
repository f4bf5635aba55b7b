// SPDX-License-Identifier: CEPL-1.0
use std::sync::Arc;

use ash::vk;

use crate::device::DeviceContext;
use crate::error::{Result, VkError, VkResultExt};

/// Graphics-family command pool. Buffers allocated from it die with it.
pub struct CommandPool {
  device: Arc<DeviceContext>,
  pool: vk::CommandPool,
}

impl CommandPool {
  pub fn new(device: Arc<DeviceContext>) -> Result<Self> {
    let info = vk::CommandPoolCreateInfo {
      s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
      queue_family_index: device.families().graphics,
      flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
      ..Default::default()
    };
    let pool = unsafe { device.device().create_command_pool(&info, None) }
      .creating("command pool")?;
    Ok(Self { device, pool })
  }

  pub fn handle(&self) -> vk::CommandPool {
    self.pool
  }

  pub fn allocate(&self, count: u32) -> Result<Vec<vk::CommandBuffer>> {
    let info = vk::CommandBufferAllocateInfo {
      s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
      command_pool: self.pool,
      level: vk::CommandBufferLevel::PRIMARY,
      command_buffer_count: count,
      ..Default::default()
    };
    unsafe { self.device.device().allocate_command_buffers(&info) }
      .creating("command buffers")
  }

  /// Records `record` into a throwaway command buffer, submits it on the graphics
  /// queue and blocks until the queue is idle. Load-time only.
  pub fn one_shot(&self, record: impl FnOnce(&ash::Device, vk::CommandBuffer)) -> Result<()> {
    let cmd = self
      .allocate(1)?
      .first()
      .copied()
      .ok_or(VkError::ResourceCreation {
        what: "one-shot command buffer",
        result: vk::Result::ERROR_OUT_OF_HOST_MEMORY,
      })?;
    let result = unsafe { self.submit_and_wait(cmd, record) };
    unsafe {
      self.device
        .device()
        .free_command_buffers(self.pool, std::slice::from_ref(&cmd))
    };
    result
  }

  unsafe fn submit_and_wait(
    &self,
    cmd: vk::CommandBuffer,
    record: impl FnOnce(&ash::Device, vk::CommandBuffer),
  ) -> Result<()> {
    let d = self.device.device();
    let begin = vk::CommandBufferBeginInfo {
      s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
      flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
      ..Default::default()
    };
    unsafe { d.begin_command_buffer(cmd, &begin) }.creating("one-shot recording")?;
    record(d, cmd);
    unsafe { d.end_command_buffer(cmd) }.creating("one-shot recording")?;

    let submit = vk::SubmitInfo {
      s_type: vk::StructureType::SUBMIT_INFO,
      command_buffer_count: 1,
      p_command_buffers: &cmd,
      ..Default::default()
    };
    let queue = self.device.graphics_queue();
    unsafe { d.queue_submit(queue, std::slice::from_ref(&submit), vk::Fence::null()) }
      .creating("one-shot submit")?;
    unsafe { d.queue_wait_idle(queue) }.creating("one-shot wait")
  }
}

impl Drop for CommandPool {
  fn drop(&mut self) {
    unsafe { self.device.device().destroy_command_pool(self.pool, None) };
  }
}
