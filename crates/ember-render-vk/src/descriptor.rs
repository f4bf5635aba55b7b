// SPDX-License-Identifier: CEPL-1.0
use std::sync::Arc;

use ash::vk;

use crate::device::DeviceContext;
use crate::error::{Result, VkError, VkResultExt};
use crate::upload::{GpuBuffer, Texture};

pub const UNIFORM_BINDING: u32 = 0;
pub const TEXTURE_BINDING: u32 = 1;

/// Binding 0: per-frame MVP uniform (vertex). Binding 1: texture + sampler (fragment).
pub fn set_layout_bindings() -> [vk::DescriptorSetLayoutBinding<'static>; 2] {
  [
    vk::DescriptorSetLayoutBinding {
      binding: UNIFORM_BINDING,
      descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
      descriptor_count: 1,
      stage_flags: vk::ShaderStageFlags::VERTEX,
      ..Default::default()
    },
    vk::DescriptorSetLayoutBinding {
      binding: TEXTURE_BINDING,
      descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
      descriptor_count: 1,
      stage_flags: vk::ShaderStageFlags::FRAGMENT,
      ..Default::default()
    },
  ]
}

/// One descriptor set per frame slot, all sharing the same layout and texture.
pub struct DescriptorSets {
  device: Arc<DeviceContext>,
  layout: vk::DescriptorSetLayout,
  pool: vk::DescriptorPool,
  sets: Vec<vk::DescriptorSet>,
}

impl DescriptorSets {
  pub fn new(
    device: &Arc<DeviceContext>,
    uniforms: &[GpuBuffer],
    texture: &Texture,
  ) -> Result<Self> {
    let d = device.device();
    let count = uniforms.len() as u32;

    let bindings = set_layout_bindings();
    let layout_info = vk::DescriptorSetLayoutCreateInfo {
      s_type: vk::StructureType::DESCRIPTOR_SET_LAYOUT_CREATE_INFO,
      binding_count: bindings.len() as u32,
      p_bindings: bindings.as_ptr(),
      ..Default::default()
    };
    let layout = unsafe { d.create_descriptor_set_layout(&layout_info, None) }
      .creating("descriptor set layout")?;
    let mut this = Self {
      device: device.clone(),
      layout,
      pool: vk::DescriptorPool::null(),
      sets: Vec::new(),
    };

    let pool_sizes = [
      vk::DescriptorPoolSize {
        ty: vk::DescriptorType::UNIFORM_BUFFER,
        descriptor_count: count,
      },
      vk::DescriptorPoolSize {
        ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        descriptor_count: count,
      },
    ];
    let pool_info = vk::DescriptorPoolCreateInfo {
      s_type: vk::StructureType::DESCRIPTOR_POOL_CREATE_INFO,
      max_sets: count,
      pool_size_count: pool_sizes.len() as u32,
      p_pool_sizes: pool_sizes.as_ptr(),
      ..Default::default()
    };
    this.pool = unsafe { d.create_descriptor_pool(&pool_info, None) }
      .creating("descriptor pool")?;

    let layouts = vec![layout; uniforms.len()];
    let alloc = vk::DescriptorSetAllocateInfo {
      s_type: vk::StructureType::DESCRIPTOR_SET_ALLOCATE_INFO,
      descriptor_pool: this.pool,
      descriptor_set_count: count,
      p_set_layouts: layouts.as_ptr(),
      ..Default::default()
    };
    this.sets = unsafe { d.allocate_descriptor_sets(&alloc) }.creating("descriptor sets")?;
    if this.sets.len() != uniforms.len() {
      return Err(VkError::ResourceCreation {
        what: "descriptor sets",
        result: vk::Result::ERROR_OUT_OF_POOL_MEMORY,
      });
    }

    let image_info = vk::DescriptorImageInfo {
      sampler: texture.sampler(),
      image_view: texture.view(),
      image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    };
    // Infos must stay put while `writes` points into them.
    let buffer_infos: Vec<_> = uniforms
      .iter()
      .map(|u| vk::DescriptorBufferInfo {
        buffer: u.handle(),
        offset: 0,
        range: u.size(),
      })
      .collect();
    let mut writes = Vec::with_capacity(uniforms.len() * 2);
    for (set, info) in this.sets.iter().zip(&buffer_infos) {
      writes.push(vk::WriteDescriptorSet {
        s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
        dst_set: *set,
        dst_binding: UNIFORM_BINDING,
        descriptor_count: 1,
        descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
        p_buffer_info: info,
        ..Default::default()
      });
      writes.push(vk::WriteDescriptorSet {
        s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
        dst_set: *set,
        dst_binding: TEXTURE_BINDING,
        descriptor_count: 1,
        descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        p_image_info: &image_info,
        ..Default::default()
      });
    }
    unsafe { d.update_descriptor_sets(&writes, &[]) };
    Ok(this)
  }

  pub fn layout(&self) -> vk::DescriptorSetLayout {
    self.layout
  }

  pub fn set(&self, slot: usize) -> Option<vk::DescriptorSet> {
    self.sets.get(slot).copied()
  }
}

impl Drop for DescriptorSets {
  fn drop(&mut self) {
    let d = self.device.device();
    unsafe {
      // sets are freed with their pool
      d.destroy_descriptor_pool(self.pool, None);
      d.destroy_descriptor_set_layout(self.layout, None);
    }
  }
}
