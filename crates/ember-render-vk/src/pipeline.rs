// SPDX-License-Identifier: CEPL-1.0
use std::io::Cursor;
use std::sync::Arc;

use ash::util::read_spv;
use ash::vk;
use ember_render::{ShaderSet, VertexFormat, VertexLayout};
use tracing::debug;

use crate::device::DeviceContext;
use crate::error::{Result, VkError};

/// Vertex + fragment modules, loaded once and kept for every pipeline rebuild.
pub struct ShaderModules {
  device: Arc<DeviceContext>,
  vertex: vk::ShaderModule,
  fragment: vk::ShaderModule,
}

impl ShaderModules {
  pub fn new(device: &Arc<DeviceContext>, shaders: &ShaderSet) -> Result<Self> {
    let d = device.device();
    let vertex = create_module(d, &shaders.vertex, "vertex")?;
    let fragment = match create_module(d, &shaders.fragment, "fragment") {
      Ok(m) => m,
      Err(e) => {
        unsafe { d.destroy_shader_module(vertex, None) };
        return Err(e);
      }
    };
    Ok(Self {
      device: device.clone(),
      vertex,
      fragment,
    })
  }

  pub fn vertex(&self) -> vk::ShaderModule {
    self.vertex
  }

  pub fn fragment(&self) -> vk::ShaderModule {
    self.fragment
  }
}

impl Drop for ShaderModules {
  fn drop(&mut self) {
    let d = self.device.device();
    unsafe {
      d.destroy_shader_module(self.vertex, None);
      d.destroy_shader_module(self.fragment, None);
    }
  }
}

fn create_module(d: &ash::Device, bytes: &[u8], stage: &str) -> Result<vk::ShaderModule> {
  // read_spv checks the magic number and realigns to u32
  let code = read_spv(&mut Cursor::new(bytes))
    .map_err(|e| VkError::PipelineCreation(format!("{stage} shader is not SPIR-V: {e}")))?;
  let info = vk::ShaderModuleCreateInfo {
    s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
    p_code: code.as_ptr(),
    code_size: code.len() * 4,
    ..Default::default()
  };
  unsafe { d.create_shader_module(&info, None) }
    .map_err(|r| VkError::PipelineCreation(format!("{stage} shader module: {r}")))
}

pub fn vk_format(f: VertexFormat) -> vk::Format {
  match f {
    VertexFormat::Float2 => vk::Format::R32G32_SFLOAT,
    VertexFormat::Float3 => vk::Format::R32G32B32_SFLOAT,
    VertexFormat::Float4 => vk::Format::R32G32B32A32_SFLOAT,
  }
}

pub fn vertex_input(
  layout: &VertexLayout,
) -> (
  vk::VertexInputBindingDescription,
  Vec<vk::VertexInputAttributeDescription>,
) {
  let binding = vk::VertexInputBindingDescription {
    binding: 0,
    stride: layout.stride,
    input_rate: vk::VertexInputRate::VERTEX,
  };
  let attributes = layout
    .attributes
    .iter()
    .map(|a| vk::VertexInputAttributeDescription {
      location: a.location,
      binding: 0,
      format: vk_format(a.format),
      offset: a.offset,
    })
    .collect();
  (binding, attributes)
}

/// Straight alpha over when enabled; color writes are always on.
pub fn blend_attachment(enabled: bool) -> vk::PipelineColorBlendAttachmentState {
  vk::PipelineColorBlendAttachmentState {
    blend_enable: if enabled { vk::TRUE } else { vk::FALSE },
    src_color_blend_factor: vk::BlendFactor::SRC_ALPHA,
    dst_color_blend_factor: vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
    color_blend_op: vk::BlendOp::ADD,
    src_alpha_blend_factor: vk::BlendFactor::ONE,
    dst_alpha_blend_factor: vk::BlendFactor::ZERO,
    alpha_blend_op: vk::BlendOp::ADD,
    color_write_mask: vk::ColorComponentFlags::R
      | vk::ColorComponentFlags::G
      | vk::ColorComponentFlags::B
      | vk::ColorComponentFlags::A,
  }
}

pub struct PipelineDesc<'a> {
  pub render_pass: vk::RenderPass,
  pub extent: vk::Extent2D,
  pub shaders: &'a ShaderModules,
  pub set_layout: vk::DescriptorSetLayout,
  pub vertex_layout: &'a VertexLayout,
  pub blend: bool,
}

/// Pipeline + its layout. Rebuilt with the render pass on every swapchain rebuild.
pub struct GraphicsPipeline {
  device: Arc<DeviceContext>,
  layout: vk::PipelineLayout,
  pipeline: vk::Pipeline,
}

impl GraphicsPipeline {
  pub fn build(device: &Arc<DeviceContext>, desc: &PipelineDesc<'_>) -> Result<Self> {
    let d = device.device();
    let entry = c"main";

    let stages = [
      vk::PipelineShaderStageCreateInfo {
        s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
        stage: vk::ShaderStageFlags::VERTEX,
        module: desc.shaders.vertex(),
        p_name: entry.as_ptr(),
        ..Default::default()
      },
      vk::PipelineShaderStageCreateInfo {
        s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
        stage: vk::ShaderStageFlags::FRAGMENT,
        module: desc.shaders.fragment(),
        p_name: entry.as_ptr(),
        ..Default::default()
      },
    ];

    let (binding, attributes) = vertex_input(desc.vertex_layout);
    let vertex_input = vk::PipelineVertexInputStateCreateInfo {
      s_type: vk::StructureType::PIPELINE_VERTEX_INPUT_STATE_CREATE_INFO,
      vertex_binding_description_count: 1,
      p_vertex_binding_descriptions: &binding,
      vertex_attribute_description_count: attributes.len() as u32,
      p_vertex_attribute_descriptions: attributes.as_ptr(),
      ..Default::default()
    };
    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
      s_type: vk::StructureType::PIPELINE_INPUT_ASSEMBLY_STATE_CREATE_INFO,
      topology: vk::PrimitiveTopology::TRIANGLE_LIST,
      primitive_restart_enable: vk::FALSE,
      ..Default::default()
    };

    // Static viewport/scissor: the pipeline is rebuilt whenever the extent changes.
    let viewport = vk::Viewport {
      x: 0.0,
      y: 0.0,
      width: desc.extent.width as f32,
      height: desc.extent.height as f32,
      min_depth: 0.0,
      max_depth: 1.0,
    };
    let scissor = vk::Rect2D {
      offset: vk::Offset2D { x: 0, y: 0 },
      extent: desc.extent,
    };
    let viewport_state = vk::PipelineViewportStateCreateInfo {
      s_type: vk::StructureType::PIPELINE_VIEWPORT_STATE_CREATE_INFO,
      viewport_count: 1,
      p_viewports: &viewport,
      scissor_count: 1,
      p_scissors: &scissor,
      ..Default::default()
    };

    let raster = vk::PipelineRasterizationStateCreateInfo {
      s_type: vk::StructureType::PIPELINE_RASTERIZATION_STATE_CREATE_INFO,
      depth_clamp_enable: vk::FALSE,
      rasterizer_discard_enable: vk::FALSE,
      polygon_mode: vk::PolygonMode::FILL,
      cull_mode: vk::CullModeFlags::BACK,
      front_face: vk::FrontFace::COUNTER_CLOCKWISE,
      depth_bias_enable: vk::FALSE,
      line_width: 1.0,
      ..Default::default()
    };
    let multisample = vk::PipelineMultisampleStateCreateInfo {
      s_type: vk::StructureType::PIPELINE_MULTISAMPLE_STATE_CREATE_INFO,
      rasterization_samples: vk::SampleCountFlags::TYPE_1,
      sample_shading_enable: vk::FALSE,
      ..Default::default()
    };
    let blend_att = blend_attachment(desc.blend);
    let color_blend = vk::PipelineColorBlendStateCreateInfo {
      s_type: vk::StructureType::PIPELINE_COLOR_BLEND_STATE_CREATE_INFO,
      logic_op_enable: vk::FALSE,
      attachment_count: 1,
      p_attachments: &blend_att,
      ..Default::default()
    };

    let layout_info = vk::PipelineLayoutCreateInfo {
      s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
      set_layout_count: 1,
      p_set_layouts: &desc.set_layout,
      ..Default::default()
    };
    let layout = unsafe { d.create_pipeline_layout(&layout_info, None) }
      .map_err(|r| VkError::PipelineCreation(format!("pipeline layout: {r}")))?;
    let mut this = Self {
      device: device.clone(),
      layout,
      pipeline: vk::Pipeline::null(),
    };

    let info = vk::GraphicsPipelineCreateInfo {
      s_type: vk::StructureType::GRAPHICS_PIPELINE_CREATE_INFO,
      stage_count: stages.len() as u32,
      p_stages: stages.as_ptr(),
      p_vertex_input_state: &vertex_input,
      p_input_assembly_state: &input_assembly,
      p_viewport_state: &viewport_state,
      p_rasterization_state: &raster,
      p_multisample_state: &multisample,
      p_color_blend_state: &color_blend,
      layout,
      render_pass: desc.render_pass,
      subpass: 0,
      ..Default::default()
    };
    let pipelines = unsafe {
      d.create_graphics_pipelines(
        vk::PipelineCache::null(),
        std::slice::from_ref(&info),
        None,
      )
    }
    .map_err(|(_, r)| VkError::PipelineCreation(format!("graphics pipeline: {r}")))?;
    this.pipeline = pipelines
      .first()
      .copied()
      .ok_or_else(|| VkError::PipelineCreation("driver returned no pipeline".into()))?;

    debug!(
      extent = %format_args!("{}x{}", desc.extent.width, desc.extent.height),
      blend = desc.blend,
      "graphics pipeline built"
    );
    Ok(this)
  }

  pub fn handle(&self) -> vk::Pipeline {
    self.pipeline
  }

  pub fn layout(&self) -> vk::PipelineLayout {
    self.layout
  }

  pub(crate) fn destroy(&mut self) {
    let d = self.device.device();
    unsafe {
      d.destroy_pipeline(self.pipeline, None);
      d.destroy_pipeline_layout(self.layout, None);
    }
    self.pipeline = vk::Pipeline::null();
    self.layout = vk::PipelineLayout::null();
  }
}

impl Drop for GraphicsPipeline {
  fn drop(&mut self) {
    self.destroy();
  }
}
