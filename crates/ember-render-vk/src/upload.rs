// SPDX-License-Identifier: CEPL-1.0
//! Staged uploads into device-local memory, plus the RAII buffer and texture types.
use std::ptr::NonNull;
use std::sync::Arc;

use ash::vk;
use ember_render::TextureData;
use tracing::debug;

use crate::command::CommandPool;
use crate::device::DeviceContext;
use crate::error::{Result, VkError, VkResultExt};

const HOST_MEMORY: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
  vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw() | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
);

/// A buffer and the memory bound to it, destroyed together.
pub struct GpuBuffer {
  device: Arc<DeviceContext>,
  buffer: vk::Buffer,
  memory: vk::DeviceMemory,
  size: vk::DeviceSize,
  mapped: Option<NonNull<u8>>,
}

impl GpuBuffer {
  pub fn new(
    device: &Arc<DeviceContext>,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    memory_flags: vk::MemoryPropertyFlags,
  ) -> Result<Self> {
    if size == 0 {
      return Err(VkError::ResourceCreation {
        what: "zero-sized buffer",
        result: vk::Result::ERROR_INITIALIZATION_FAILED,
      });
    }
    let d = device.device();
    let info = vk::BufferCreateInfo {
      s_type: vk::StructureType::BUFFER_CREATE_INFO,
      size,
      usage,
      sharing_mode: vk::SharingMode::EXCLUSIVE,
      ..Default::default()
    };
    let buffer = unsafe { d.create_buffer(&info, None) }.creating("buffer")?;

    // From here on Drop cleans up whatever got created.
    let mut this = Self {
      device: device.clone(),
      buffer,
      memory: vk::DeviceMemory::null(),
      size,
      mapped: None,
    };

    let req = unsafe { d.get_buffer_memory_requirements(buffer) };
    let alloc = vk::MemoryAllocateInfo {
      s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
      allocation_size: req.size,
      memory_type_index: device.memory_type_index(req.memory_type_bits, memory_flags)?,
      ..Default::default()
    };
    this.memory = unsafe { d.allocate_memory(&alloc, None) }.creating("buffer memory")?;
    unsafe { d.bind_buffer_memory(buffer, this.memory, 0) }.creating("buffer binding")?;
    Ok(this)
  }

  /// Host-visible, host-coherent: writes need no flush.
  pub fn host_visible(
    device: &Arc<DeviceContext>,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
  ) -> Result<Self> {
    Self::new(device, size, usage, HOST_MEMORY)
  }

  pub fn handle(&self) -> vk::Buffer {
    self.buffer
  }

  pub fn size(&self) -> vk::DeviceSize {
    self.size
  }

  /// Keeps the memory mapped until drop. Only valid for host-visible buffers.
  pub fn map_persistent(&mut self) -> Result<()> {
    if self.mapped.is_none() {
      self.mapped = Some(self.map_raw()?);
    }
    Ok(())
  }

  fn map_raw(&self) -> Result<NonNull<u8>> {
    let ptr = unsafe {
      self.device.device().map_memory(
        self.memory,
        0,
        vk::WHOLE_SIZE,
        vk::MemoryMapFlags::empty(),
      )
    }
    .creating("memory mapping")?;
    NonNull::new(ptr.cast::<u8>()).ok_or(VkError::ResourceCreation {
      what: "memory mapping",
      result: vk::Result::ERROR_MEMORY_MAP_FAILED,
    })
  }

  pub fn write_bytes(&mut self, offset: vk::DeviceSize, bytes: &[u8]) -> Result<()> {
    if offset + bytes.len() as vk::DeviceSize > self.size {
      return Err(VkError::ResourceCreation {
        what: "mapped write past end of buffer",
        result: vk::Result::ERROR_MEMORY_MAP_FAILED,
      });
    }
    let (ptr, temporary) = match self.mapped {
      Some(p) => (p, false),
      None => (self.map_raw()?, true),
    };
    // SAFETY: range checked above; the mapping covers the whole allocation.
    unsafe {
      std::ptr::copy_nonoverlapping(
        bytes.as_ptr(),
        ptr.as_ptr().add(offset as usize),
        bytes.len(),
      );
      if temporary {
        self.device.device().unmap_memory(self.memory);
      }
    }
    Ok(())
  }

  pub fn write<T: bytemuck::Pod>(&mut self, value: &T) -> Result<()> {
    self.write_bytes(0, bytemuck::bytes_of(value))
  }

  pub fn read_bytes(&self) -> Result<Vec<u8>> {
    let (ptr, temporary) = match self.mapped {
      Some(p) => (p, false),
      None => (self.map_raw()?, true),
    };
    let out = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), self.size as usize) }.to_vec();
    if temporary {
      unsafe { self.device.device().unmap_memory(self.memory) };
    }
    Ok(out)
  }
}

impl Drop for GpuBuffer {
  fn drop(&mut self) {
    let d = self.device.device();
    unsafe {
      if self.mapped.take().is_some() {
        d.unmap_memory(self.memory);
      }
      // vkDestroy*/vkFree* ignore null handles.
      d.destroy_buffer(self.buffer, None);
      d.free_memory(self.memory, None);
    }
  }
}

/// Host bytes -> staging -> new device-local buffer. Blocks until the copy completes.
pub fn upload_to_device(
  device: &Arc<DeviceContext>,
  pool: &CommandPool,
  data: &[u8],
  usage: vk::BufferUsageFlags,
) -> Result<GpuBuffer> {
  let size = data.len() as vk::DeviceSize;
  let mut staging = GpuBuffer::host_visible(device, size, vk::BufferUsageFlags::TRANSFER_SRC)?;
  staging.write_bytes(0, data)?;

  let target = GpuBuffer::new(
    device,
    size,
    usage | vk::BufferUsageFlags::TRANSFER_DST,
    vk::MemoryPropertyFlags::DEVICE_LOCAL,
  )?;
  pool.one_shot(|d, cmd| {
    let region = vk::BufferCopy {
      src_offset: 0,
      dst_offset: 0,
      size,
    };
    unsafe { d.cmd_copy_buffer(cmd, staging.handle(), target.handle(), &[region]) };
  })?;
  debug!(bytes = size, ?usage, "uploaded buffer");
  // staging is dropped on return; the queue is already idle
  Ok(target)
}

/// Copies `src` back into host memory. `src` needs `TRANSFER_SRC` usage.
pub fn download_from_device(
  device: &Arc<DeviceContext>,
  pool: &CommandPool,
  src: &GpuBuffer,
) -> Result<Vec<u8>> {
  let readback =
    GpuBuffer::host_visible(device, src.size(), vk::BufferUsageFlags::TRANSFER_DST)?;
  pool.one_shot(|d, cmd| {
    let region = vk::BufferCopy {
      src_offset: 0,
      dst_offset: 0,
      size: src.size(),
    };
    unsafe { d.cmd_copy_buffer(cmd, src.handle(), readback.handle(), &[region]) };
  })?;
  readback.read_bytes()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Transition {
  pub src_access: vk::AccessFlags,
  pub dst_access: vk::AccessFlags,
  pub src_stage: vk::PipelineStageFlags,
  pub dst_stage: vk::PipelineStageFlags,
}

/// The two layout changes a texture upload needs; anything else is a bug.
pub(crate) fn layout_transition(
  old: vk::ImageLayout,
  new: vk::ImageLayout,
) -> Option<Transition> {
  match (old, new) {
    (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL) => Some(Transition {
      src_access: vk::AccessFlags::empty(),
      dst_access: vk::AccessFlags::TRANSFER_WRITE,
      src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
      dst_stage: vk::PipelineStageFlags::TRANSFER,
    }),
    (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL) => {
      Some(Transition {
        src_access: vk::AccessFlags::TRANSFER_WRITE,
        dst_access: vk::AccessFlags::SHADER_READ,
        src_stage: vk::PipelineStageFlags::TRANSFER,
        dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
      })
    }
    _ => None,
  }
}

unsafe fn record_transition(
  d: &ash::Device,
  cmd: vk::CommandBuffer,
  image: vk::Image,
  old: vk::ImageLayout,
  new: vk::ImageLayout,
  t: Transition,
) {
  let barrier = vk::ImageMemoryBarrier {
    s_type: vk::StructureType::IMAGE_MEMORY_BARRIER,
    old_layout: old,
    new_layout: new,
    src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
    dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
    image,
    subresource_range: COLOR_RANGE,
    src_access_mask: t.src_access,
    dst_access_mask: t.dst_access,
    ..Default::default()
  };
  unsafe {
    d.cmd_pipeline_barrier(
      cmd,
      t.src_stage,
      t.dst_stage,
      vk::DependencyFlags::empty(),
      &[],
      &[],
      std::slice::from_ref(&barrier),
    )
  };
}

pub(crate) const COLOR_RANGE: vk::ImageSubresourceRange = vk::ImageSubresourceRange {
  aspect_mask: vk::ImageAspectFlags::COLOR,
  base_mip_level: 0,
  level_count: 1,
  base_array_layer: 0,
  layer_count: 1,
};

pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

/// Sampled RGBA8 texture: image, memory, view and sampler.
pub struct Texture {
  device: Arc<DeviceContext>,
  image: vk::Image,
  memory: vk::DeviceMemory,
  view: vk::ImageView,
  sampler: vk::Sampler,
  extent: vk::Extent2D,
}

impl Texture {
  pub fn upload(
    device: &Arc<DeviceContext>,
    pool: &CommandPool,
    data: &TextureData,
  ) -> Result<Self> {
    let d = device.device();
    let extent = vk::Extent2D {
      width: data.width(),
      height: data.height(),
    };

    let mut staging = GpuBuffer::host_visible(
      device,
      data.rgba().len() as vk::DeviceSize,
      vk::BufferUsageFlags::TRANSFER_SRC,
    )?;
    staging.write_bytes(0, data.rgba())?;

    let info = vk::ImageCreateInfo {
      s_type: vk::StructureType::IMAGE_CREATE_INFO,
      image_type: vk::ImageType::TYPE_2D,
      format: TEXTURE_FORMAT,
      extent: vk::Extent3D {
        width: extent.width,
        height: extent.height,
        depth: 1,
      },
      mip_levels: 1,
      array_layers: 1,
      samples: vk::SampleCountFlags::TYPE_1,
      tiling: vk::ImageTiling::OPTIMAL,
      usage: vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
      sharing_mode: vk::SharingMode::EXCLUSIVE,
      initial_layout: vk::ImageLayout::UNDEFINED,
      ..Default::default()
    };
    let image = unsafe { d.create_image(&info, None) }.creating("texture image")?;
    let mut this = Self {
      device: device.clone(),
      image,
      memory: vk::DeviceMemory::null(),
      view: vk::ImageView::null(),
      sampler: vk::Sampler::null(),
      extent,
    };

    let req = unsafe { d.get_image_memory_requirements(image) };
    let alloc = vk::MemoryAllocateInfo {
      s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
      allocation_size: req.size,
      memory_type_index: device
        .memory_type_index(req.memory_type_bits, vk::MemoryPropertyFlags::DEVICE_LOCAL)?,
      ..Default::default()
    };
    this.memory = unsafe { d.allocate_memory(&alloc, None) }.creating("texture memory")?;
    unsafe { d.bind_image_memory(image, this.memory, 0) }.creating("texture binding")?;

    let to_dst = (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
    let to_read = (
      vk::ImageLayout::TRANSFER_DST_OPTIMAL,
      vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    );
    let (Some(t_dst), Some(t_read)) = (
      layout_transition(to_dst.0, to_dst.1),
      layout_transition(to_read.0, to_read.1),
    ) else {
      return Err(VkError::ResourceCreation {
        what: "texture layout transition",
        result: vk::Result::ERROR_FORMAT_NOT_SUPPORTED,
      });
    };

    pool.one_shot(|d, cmd| unsafe {
      record_transition(d, cmd, image, to_dst.0, to_dst.1, t_dst);
      let region = vk::BufferImageCopy {
        buffer_offset: 0,
        buffer_row_length: 0,
        buffer_image_height: 0,
        image_subresource: vk::ImageSubresourceLayers {
          aspect_mask: vk::ImageAspectFlags::COLOR,
          mip_level: 0,
          base_array_layer: 0,
          layer_count: 1,
        },
        image_offset: vk::Offset3D::default(),
        image_extent: info.extent,
      };
      d.cmd_copy_buffer_to_image(
        cmd,
        staging.handle(),
        image,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        &[region],
      );
      record_transition(d, cmd, image, to_read.0, to_read.1, t_read);
    })?;

    this.view = create_image_view(d, image, TEXTURE_FORMAT)?;

    let sampler_info = vk::SamplerCreateInfo {
      s_type: vk::StructureType::SAMPLER_CREATE_INFO,
      mag_filter: vk::Filter::LINEAR,
      min_filter: vk::Filter::LINEAR,
      address_mode_u: vk::SamplerAddressMode::REPEAT,
      address_mode_v: vk::SamplerAddressMode::REPEAT,
      address_mode_w: vk::SamplerAddressMode::REPEAT,
      anisotropy_enable: vk::TRUE,
      max_anisotropy: device.limits().max_sampler_anisotropy,
      border_color: vk::BorderColor::INT_OPAQUE_BLACK,
      unnormalized_coordinates: vk::FALSE,
      compare_enable: vk::FALSE,
      compare_op: vk::CompareOp::ALWAYS,
      mipmap_mode: vk::SamplerMipmapMode::LINEAR,
      ..Default::default()
    };
    this.sampler = unsafe { d.create_sampler(&sampler_info, None) }.creating("sampler")?;

    debug!(width = extent.width, height = extent.height, "uploaded texture");
    Ok(this)
  }

  pub fn view(&self) -> vk::ImageView {
    self.view
  }

  pub fn sampler(&self) -> vk::Sampler {
    self.sampler
  }

  pub fn extent(&self) -> vk::Extent2D {
    self.extent
  }
}

impl Drop for Texture {
  fn drop(&mut self) {
    let d = self.device.device();
    unsafe {
      d.destroy_sampler(self.sampler, None);
      d.destroy_image_view(self.view, None);
      d.destroy_image(self.image, None);
      d.free_memory(self.memory, None);
    }
  }
}

pub(crate) fn create_image_view(
  d: &ash::Device,
  image: vk::Image,
  format: vk::Format,
) -> Result<vk::ImageView> {
  let info = vk::ImageViewCreateInfo {
    s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
    image,
    view_type: vk::ImageViewType::TYPE_2D,
    format,
    subresource_range: COLOR_RANGE,
    ..Default::default()
  };
  unsafe { d.create_image_view(&info, None) }.creating("image view")
}
