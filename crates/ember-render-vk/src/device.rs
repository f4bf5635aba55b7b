// SPDX-License-Identifier: CEPL-1.0
//! Physical-device selection and the logical device that every other object hangs off.
//!
//! Creation order is fixed: instance, then surface from that instance, then a physical
//! device that can present to that surface, then the logical device. [`DeviceContext`]
//! is shared as `Arc` by every GPU object, so the device outlives all of them.
use std::ffi::CStr;
use std::sync::Arc;

use ash::khr::{surface, swapchain};
use ash::vk;
use ember_render::RendererConfig;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{debug, info};

use crate::error::{Result, VkError, VkResultExt};
use crate::instance::InstanceContext;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilies {
  pub graphics: u32,
  pub present: u32,
}

impl QueueFamilies {
  /// One family does both; swapchain images can use exclusive sharing.
  pub fn is_shared(&self) -> bool {
    self.graphics == self.present
  }

  pub fn unique(&self) -> Vec<u32> {
    if self.is_shared() {
      vec![self.graphics]
    } else {
      vec![self.graphics, self.present]
    }
  }
}

/// Picks a graphics family and a present family, preferring one that does both.
pub fn find_queue_families(
  families: &[vk::QueueFamilyProperties],
  mut supports_present: impl FnMut(u32) -> bool,
) -> Option<QueueFamilies> {
  let mut graphics = None;
  let mut present = None;
  for (i, f) in families.iter().enumerate() {
    let i = i as u32;
    let g = f.queue_count > 0 && f.queue_flags.contains(vk::QueueFlags::GRAPHICS);
    let p = f.queue_count > 0 && supports_present(i);
    if g && p {
      return Some(QueueFamilies {
        graphics: i,
        present: i,
      });
    }
    if g && graphics.is_none() {
      graphics = Some(i);
    }
    if p && present.is_none() {
      present = Some(i);
    }
  }
  Some(QueueFamilies {
    graphics: graphics?,
    present: present?,
  })
}

pub fn find_memory_type(
  props: &vk::PhysicalDeviceMemoryProperties,
  type_bits: u32,
  required: vk::MemoryPropertyFlags,
) -> Option<u32> {
  (0..props.memory_type_count).find(|&i| {
    type_bits & (1 << i) != 0
      && props.memory_types[i as usize]
        .property_flags
        .contains(required)
  })
}

/// What we learned about one physical device, without holding any handles.
#[derive(Clone, Debug)]
pub struct DeviceReport {
  pub name: String,
  pub device_type: vk::PhysicalDeviceType,
  pub has_swapchain_ext: bool,
  pub format_count: usize,
  pub present_mode_count: usize,
  pub families: Option<QueueFamilies>,
  pub sampler_anisotropy: bool,
}

#[derive(Clone, Copy, Debug)]
pub struct Requirements {
  pub discrete: bool,
  pub presentation: bool,
}

/// `Err` carries the first unmet requirement, for logging.
pub fn check_suitability(r: &DeviceReport, req: Requirements) -> Result<(), &'static str> {
  if req.discrete && r.device_type != vk::PhysicalDeviceType::DISCRETE_GPU {
    return Err("not a discrete GPU");
  }
  if r.families.is_none() {
    return Err("missing graphics or present queue family");
  }
  if req.presentation {
    if !r.has_swapchain_ext {
      return Err("VK_KHR_swapchain not supported");
    }
    if r.format_count == 0 {
      return Err("no surface formats");
    }
    if r.present_mode_count == 0 {
      return Err("no present modes");
    }
  }
  if !r.sampler_anisotropy {
    return Err("samplerAnisotropy not supported");
  }
  Ok(())
}

fn type_rank(t: vk::PhysicalDeviceType) -> u8 {
  match t {
    vk::PhysicalDeviceType::DISCRETE_GPU => 0,
    vk::PhysicalDeviceType::INTEGRATED_GPU => 1,
    vk::PhysicalDeviceType::VIRTUAL_GPU => 2,
    vk::PhysicalDeviceType::CPU => 3,
    _ => 4,
  }
}

pub struct SurfaceContext {
  loader: surface::Instance,
  handle: vk::SurfaceKHR,
}

impl SurfaceContext {
  pub fn loader(&self) -> &surface::Instance {
    &self.loader
  }

  pub fn handle(&self) -> vk::SurfaceKHR {
    self.handle
  }
}

impl Drop for SurfaceContext {
  fn drop(&mut self) {
    unsafe { self.loader.destroy_surface(self.handle, None) };
  }
}

pub struct DeviceContext {
  device: ash::Device,
  physical: vk::PhysicalDevice,
  properties: vk::PhysicalDeviceProperties,
  memory: vk::PhysicalDeviceMemoryProperties,
  families: QueueFamilies,
  graphics_queue: vk::Queue,
  present_queue: vk::Queue,
  swapchain_loader: Option<swapchain::Device>,
  // Field order matters: the surface is destroyed before the instance.
  surface: Option<SurfaceContext>,
  instance: InstanceContext,
}

struct Picked {
  physical: vk::PhysicalDevice,
  properties: vk::PhysicalDeviceProperties,
  families: QueueFamilies,
}

impl DeviceContext {
  /// Instance + surface for `window`, then the first suitable GPU that can present to it.
  pub fn new(
    window: &dyn HasWindowHandle,
    display: &dyn HasDisplayHandle,
    config: &RendererConfig,
  ) -> Result<Arc<Self>> {
    let dh = display
      .display_handle()
      .map_err(|e| VkError::Initialization(format!("display handle: {e}")))?
      .as_raw();
    let wh = window
      .window_handle()
      .map_err(|e| VkError::Initialization(format!("window handle: {e}")))?
      .as_raw();

    let exts = ash_window::enumerate_required_extensions(dh)
      .map_err(|e| VkError::Initialization(format!("surface extensions: {e}")))?;
    let instance = InstanceContext::new(&config.app_name, exts, config.validation)?;

    let handle =
      unsafe { ash_window::create_surface(instance.entry(), instance.handle(), dh, wh, None) }
        .map_err(|e| VkError::Initialization(format!("create_surface: {e}")))?;
    let surface = SurfaceContext {
      loader: surface::Instance::new(instance.entry(), instance.handle()),
      handle,
    };

    let req = Requirements {
      discrete: config.require_discrete_gpu,
      presentation: true,
    };
    Self::finish(instance, Some(surface), req)
  }

  /// No window, no swapchain. Used for uploads and readback in tests and tools.
  pub fn headless(config: &RendererConfig) -> Result<Arc<Self>> {
    let instance = InstanceContext::new(&config.app_name, &[], config.validation)?;
    let req = Requirements {
      discrete: config.require_discrete_gpu,
      presentation: false,
    };
    Self::finish(instance, None, req)
  }

  fn finish(
    instance: InstanceContext,
    surface: Option<SurfaceContext>,
    req: Requirements,
  ) -> Result<Arc<Self>> {
    // On failure the surface must go before the instance, so drop it explicitly.
    let picked = match unsafe { pick_physical_device(instance.handle(), surface.as_ref(), req) }
    {
      Ok(p) => p,
      Err(e) => {
        drop(surface);
        return Err(e);
      }
    };
    let device = match unsafe {
      create_logical_device(
        instance.handle(),
        picked.physical,
        picked.families,
        req.presentation,
      )
    } {
      Ok(d) => d,
      Err(e) => {
        drop(surface);
        return Err(e);
      }
    };

    let graphics_queue = unsafe { device.get_device_queue(picked.families.graphics, 0) };
    let present_queue = unsafe { device.get_device_queue(picked.families.present, 0) };
    let memory = unsafe {
      instance
        .handle()
        .get_physical_device_memory_properties(picked.physical)
    };
    let swapchain_loader = req
      .presentation
      .then(|| swapchain::Device::new(instance.handle(), &device));

    info!(
      gpu = %device_name(&picked.properties),
      graphics_family = picked.families.graphics,
      present_family = picked.families.present,
      validation = instance.validation_enabled(),
      "logical device created"
    );

    Ok(Arc::new(Self {
      device,
      physical: picked.physical,
      properties: picked.properties,
      memory,
      families: picked.families,
      graphics_queue,
      present_queue,
      swapchain_loader,
      surface,
      instance,
    }))
  }

  pub fn device(&self) -> &ash::Device {
    &self.device
  }

  pub fn physical(&self) -> vk::PhysicalDevice {
    self.physical
  }

  pub fn limits(&self) -> &vk::PhysicalDeviceLimits {
    &self.properties.limits
  }

  pub fn name(&self) -> String {
    device_name(&self.properties)
  }

  pub fn families(&self) -> QueueFamilies {
    self.families
  }

  pub fn graphics_queue(&self) -> vk::Queue {
    self.graphics_queue
  }

  pub fn present_queue(&self) -> vk::Queue {
    self.present_queue
  }

  pub fn surface(&self) -> Result<&SurfaceContext> {
    self.surface
      .as_ref()
      .ok_or_else(|| VkError::Initialization("headless context has no surface".into()))
  }

  pub fn swapchain_loader(&self) -> Result<&swapchain::Device> {
    self.swapchain_loader
      .as_ref()
      .ok_or_else(|| VkError::Initialization("headless context has no swapchain".into()))
  }

  pub fn memory_type_index(
    &self,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
  ) -> Result<u32> {
    find_memory_type(&self.memory, type_bits, required).ok_or(VkError::ResourceCreation {
      what: "memory type",
      result: vk::Result::ERROR_FEATURE_NOT_PRESENT,
    })
  }

  /// Blocks until every queue is idle.
  pub fn wait_idle(&self) -> Result<()> {
    unsafe { self.device.device_wait_idle() }.map_err(|r| match r {
      vk::Result::ERROR_DEVICE_LOST => VkError::DeviceLost("device_wait_idle".into()),
      r => VkError::resource("device idle wait", r),
    })
  }
}

impl Drop for DeviceContext {
  fn drop(&mut self) {
    unsafe {
      self.device.device_wait_idle().ok();
      self.device.destroy_device(None);
    }
    // surface, then instance, via field drop order
  }
}

fn device_name(props: &vk::PhysicalDeviceProperties) -> String {
  unsafe { CStr::from_ptr(props.device_name.as_ptr()) }
    .to_string_lossy()
    .into_owned()
}

unsafe fn report_for(
  instance: &ash::Instance,
  phys: vk::PhysicalDevice,
  surface: Option<&SurfaceContext>,
) -> (DeviceReport, vk::PhysicalDeviceProperties) {
  let props = unsafe { instance.get_physical_device_properties(phys) };
  let features = unsafe { instance.get_physical_device_features(phys) };
  let queue_props = unsafe { instance.get_physical_device_queue_family_properties(phys) };

  let report = match surface {
    Some(s) => {
      let exts = unsafe { instance.enumerate_device_extension_properties(phys) }
        .unwrap_or_default();
      let has_swapchain_ext = exts
        .iter()
        .any(|e| unsafe { CStr::from_ptr(e.extension_name.as_ptr()) } == swapchain::NAME);
      let format_count =
        unsafe { s.loader.get_physical_device_surface_formats(phys, s.handle) }
          .map_or(0, |f| f.len());
      let present_mode_count =
        unsafe { s.loader.get_physical_device_surface_present_modes(phys, s.handle) }
          .map_or(0, |m| m.len());
      let families = find_queue_families(&queue_props, |i| unsafe {
        s.loader
          .get_physical_device_surface_support(phys, i, s.handle)
          .unwrap_or(false)
      });
      DeviceReport {
        name: device_name(&props),
        device_type: props.device_type,
        has_swapchain_ext,
        format_count,
        present_mode_count,
        families,
        sampler_anisotropy: features.sampler_anisotropy == vk::TRUE,
      }
    }
    None => {
      // Headless: "present" collapses onto the graphics family.
      let families = queue_props
        .iter()
        .position(|f| f.queue_count > 0 && f.queue_flags.contains(vk::QueueFlags::GRAPHICS))
        .map(|g| QueueFamilies {
          graphics: g as u32,
          present: g as u32,
        });
      DeviceReport {
        name: device_name(&props),
        device_type: props.device_type,
        has_swapchain_ext: false,
        format_count: 0,
        present_mode_count: 0,
        families,
        sampler_anisotropy: features.sampler_anisotropy == vk::TRUE,
      }
    }
  };
  (report, props)
}

unsafe fn pick_physical_device(
  instance: &ash::Instance,
  surface: Option<&SurfaceContext>,
  req: Requirements,
) -> Result<Picked> {
  let devices = unsafe { instance.enumerate_physical_devices() }
    .map_err(|e| VkError::Initialization(format!("enumerate_physical_devices: {e}")))?;
  if devices.is_empty() {
    return Err(VkError::NoSuitableDevice(
      "no Vulkan-capable GPU found".into(),
    ));
  }

  let mut candidates: Vec<_> = devices
    .iter()
    .map(|&phys| {
      let (report, props) = unsafe { report_for(instance, phys, surface) };
      (phys, report, props)
    })
    .collect();
  candidates.sort_by_key(|(_, r, _)| type_rank(r.device_type));

  let mut rejected = Vec::new();
  for (phys, report, props) in candidates {
    match check_suitability(&report, req) {
      Ok(()) => {
        info!(gpu = %report.name, kind = ?report.device_type, "selected physical device");
        // families is Some once suitability passed
        if let Some(families) = report.families {
          return Ok(Picked {
            physical: phys,
            properties: props,
            families,
          });
        }
      }
      Err(why) => {
        debug!(gpu = %report.name, why, "rejected physical device");
        rejected.push(format!("{}: {why}", report.name));
      }
    }
  }
  Err(VkError::NoSuitableDevice(rejected.join("; ")))
}

unsafe fn create_logical_device(
  instance: &ash::Instance,
  phys: vk::PhysicalDevice,
  families: QueueFamilies,
  presentation: bool,
) -> Result<ash::Device> {
  let priorities = [1.0_f32];
  let queue_infos: Vec<_> = families
    .unique()
    .into_iter()
    .map(|family| vk::DeviceQueueCreateInfo {
      s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
      queue_family_index: family,
      queue_count: 1,
      p_queue_priorities: priorities.as_ptr(),
      ..Default::default()
    })
    .collect();

  let features = vk::PhysicalDeviceFeatures {
    sampler_anisotropy: vk::TRUE,
    ..Default::default()
  };
  let exts: Vec<*const std::ffi::c_char> = if presentation {
    vec![swapchain::NAME.as_ptr()]
  } else {
    Vec::new()
  };

  let info = vk::DeviceCreateInfo {
    s_type: vk::StructureType::DEVICE_CREATE_INFO,
    queue_create_info_count: queue_infos.len() as u32,
    p_queue_create_infos: queue_infos.as_ptr(),
    enabled_extension_count: exts.len() as u32,
    pp_enabled_extension_names: exts.as_ptr(),
    p_enabled_features: &features,
    ..Default::default()
  };
  unsafe { instance.create_device(phys, &info, None) }.creating("logical device")
}

#[cfg(test)]
mod tests {
  use super::*;

  fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
    vk::QueueFamilyProperties {
      queue_flags: flags,
      queue_count: 1,
      ..Default::default()
    }
  }

  fn good_report() -> DeviceReport {
    DeviceReport {
      name: "test gpu".into(),
      device_type: vk::PhysicalDeviceType::DISCRETE_GPU,
      has_swapchain_ext: true,
      format_count: 2,
      present_mode_count: 1,
      families: Some(QueueFamilies {
        graphics: 0,
        present: 0,
      }),
      sampler_anisotropy: true,
    }
  }

  const WINDOWED: Requirements = Requirements {
    discrete: true,
    presentation: true,
  };

  #[test]
  fn prefers_a_family_that_does_both() {
    let fams = [
      family(vk::QueueFlags::GRAPHICS),
      family(vk::QueueFlags::TRANSFER),
      family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
    ];
    // family 1 and 2 can present
    let q = find_queue_families(&fams, |i| i >= 1).unwrap();
    assert_eq!(q, QueueFamilies { graphics: 2, present: 2 });
    assert!(q.is_shared());
  }

  #[test]
  fn split_families_when_no_single_family_does_both() {
    let fams = [family(vk::QueueFlags::GRAPHICS), family(vk::QueueFlags::TRANSFER)];
    let q = find_queue_families(&fams, |i| i == 1).unwrap();
    assert_eq!(q, QueueFamilies { graphics: 0, present: 1 });
    assert_eq!(q.unique(), vec![0, 1]);
  }

  #[test]
  fn no_present_family_is_incomplete() {
    let fams = [family(vk::QueueFlags::GRAPHICS)];
    assert!(find_queue_families(&fams, |_| false).is_none());
  }

  #[test]
  fn memory_type_respects_bits_and_flags() {
    let mut props = vk::PhysicalDeviceMemoryProperties {
      memory_type_count: 3,
      ..Default::default()
    };
    props.memory_types[0].property_flags = vk::MemoryPropertyFlags::DEVICE_LOCAL;
    props.memory_types[1].property_flags =
      vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
    props.memory_types[2].property_flags = vk::MemoryPropertyFlags::HOST_VISIBLE
      | vk::MemoryPropertyFlags::HOST_COHERENT
      | vk::MemoryPropertyFlags::HOST_CACHED;

    let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
    assert_eq!(find_memory_type(&props, 0b111, host), Some(1));
    assert_eq!(find_memory_type(&props, 0b100, host), Some(2));
    assert_eq!(find_memory_type(&props, 0b001, host), None);
    assert_eq!(
      find_memory_type(&props, 0b111, vk::MemoryPropertyFlags::DEVICE_LOCAL),
      Some(0)
    );
  }

  #[test]
  fn suitability_rules() {
    assert_eq!(check_suitability(&good_report(), WINDOWED), Ok(()));

    let mut r = good_report();
    r.device_type = vk::PhysicalDeviceType::INTEGRATED_GPU;
    assert_eq!(check_suitability(&r, WINDOWED), Err("not a discrete GPU"));
    let relaxed = Requirements {
      discrete: false,
      ..WINDOWED
    };
    assert_eq!(check_suitability(&r, relaxed), Ok(()));

    let mut r = good_report();
    r.present_mode_count = 0;
    assert!(check_suitability(&r, WINDOWED).is_err());

    let mut r = good_report();
    r.has_swapchain_ext = false;
    assert!(check_suitability(&r, WINDOWED).is_err());

    let mut r = good_report();
    r.sampler_anisotropy = false;
    assert!(check_suitability(&r, WINDOWED).is_err());
  }

  #[test]
  fn headless_ignores_presentation() {
    let mut r = good_report();
    r.has_swapchain_ext = false;
    r.format_count = 0;
    r.present_mode_count = 0;
    let headless = Requirements {
      discrete: true,
      presentation: false,
    };
    assert_eq!(check_suitability(&r, headless), Ok(()));
  }

  #[test]
  fn discrete_ranks_first() {
    assert!(
      type_rank(vk::PhysicalDeviceType::DISCRETE_GPU)
        < type_rank(vk::PhysicalDeviceType::INTEGRATED_GPU)
    );
  }
}
