// SPDX-License-Identifier: CEPL-1.0
use std::ffi::{c_char, CStr, CString};

use ash::ext::debug_utils;
use ash::{vk, Entry};
use tracing::{debug, error, info, trace, warn};

use crate::error::{Result, VkError, VkResultExt};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

unsafe extern "system" fn debug_callback(
  severity: vk::DebugUtilsMessageSeverityFlagsEXT,
  types: vk::DebugUtilsMessageTypeFlagsEXT,
  data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
  _user: *mut std::ffi::c_void,
) -> vk::Bool32 {
  if data.is_null() {
    return vk::FALSE;
  }
  // SAFETY: the loader hands us a valid callback struct for the duration of the call.
  let p_message = unsafe { (*data).p_message };
  if p_message.is_null() {
    return vk::FALSE;
  }
  let msg = unsafe { CStr::from_ptr(p_message) }.to_string_lossy();

  if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
    error!(target: "vulkan", ?types, "{msg}");
  } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
    warn!(target: "vulkan", ?types, "{msg}");
  } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
    debug!(target: "vulkan", ?types, "{msg}");
  } else {
    trace!(target: "vulkan", ?types, "{msg}");
  }
  vk::FALSE
}

struct DebugMessenger {
  loader: debug_utils::Instance,
  messenger: vk::DebugUtilsMessengerEXT,
}

/// Loader entry, instance and (optionally) the validation messenger.
pub struct InstanceContext {
  entry: Entry,
  instance: ash::Instance,
  debug: Option<DebugMessenger>,
}

impl InstanceContext {
  /// Loads the Vulkan library and creates an instance with `extensions` enabled.
  pub fn new(app_name: &str, extensions: &[*const c_char], validation: bool) -> Result<Self> {
    // SAFETY: loading the system loader; nothing else touches it concurrently.
    let entry = unsafe { Entry::load()? };

    let validation = validation && validation_layer_available(&entry);
    let mut ext_vec = extensions.to_vec();
    if validation {
      ext_vec.push(debug_utils::NAME.as_ptr());
    }
    let layers = if validation {
      vec![VALIDATION_LAYER.as_ptr()]
    } else {
      Vec::new()
    };

    let app = CString::new(app_name).unwrap_or_else(|_| CString::from(c"ember"));
    let app_info = vk::ApplicationInfo {
      s_type: vk::StructureType::APPLICATION_INFO,
      p_application_name: app.as_ptr(),
      application_version: vk::make_api_version(0, 0, 1, 0),
      p_engine_name: c"ember".as_ptr(),
      engine_version: vk::make_api_version(0, 0, 1, 0),
      api_version: vk::API_VERSION_1_0,
      ..Default::default()
    };
    let create_info = vk::InstanceCreateInfo {
      s_type: vk::StructureType::INSTANCE_CREATE_INFO,
      p_application_info: &app_info,
      enabled_extension_count: ext_vec.len() as u32,
      pp_enabled_extension_names: ext_vec.as_ptr(),
      enabled_layer_count: layers.len() as u32,
      pp_enabled_layer_names: layers.as_ptr(),
      ..Default::default()
    };

    let instance = match unsafe { entry.create_instance(&create_info, None) } {
      Ok(i) => i,
      Err(vk::Result::ERROR_INCOMPATIBLE_DRIVER) => {
        return Err(VkError::Initialization(
          "no compatible Vulkan driver".to_owned(),
        ))
      }
      Err(vk::Result::ERROR_EXTENSION_NOT_PRESENT) => {
        return Err(VkError::Initialization(
          "required instance extension missing".to_owned(),
        ))
      }
      Err(e) => return Err(VkError::Initialization(format!("vkCreateInstance: {e}"))),
    };
    info!(validation, extensions = ext_vec.len(), "vulkan instance created");

    let debug = if validation {
      match unsafe { create_debug_messenger(&entry, &instance) } {
        Ok(d) => Some(d),
        Err(e) => {
          unsafe { instance.destroy_instance(None) };
          return Err(e);
        }
      }
    } else {
      None
    };

    Ok(Self {
      entry,
      instance,
      debug,
    })
  }

  pub fn entry(&self) -> &Entry {
    &self.entry
  }

  pub fn handle(&self) -> &ash::Instance {
    &self.instance
  }

  pub fn validation_enabled(&self) -> bool {
    self.debug.is_some()
  }
}

fn validation_layer_available(entry: &Entry) -> bool {
  let layers = unsafe { entry.enumerate_instance_layer_properties() }.unwrap_or_default();
  let found = layers
    .iter()
    .any(|l| unsafe { CStr::from_ptr(l.layer_name.as_ptr()) } == VALIDATION_LAYER);
  if !found {
    warn!("validation requested but VK_LAYER_KHRONOS_validation is not installed");
  }
  found
}

unsafe fn create_debug_messenger(
  entry: &Entry,
  instance: &ash::Instance,
) -> Result<DebugMessenger> {
  let loader = debug_utils::Instance::new(entry, instance);
  let ci = vk::DebugUtilsMessengerCreateInfoEXT {
    s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
      | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
      | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
      | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
      | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
      | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
    pfn_user_callback: Some(debug_callback),
    ..Default::default()
  };
  let messenger = unsafe { loader.create_debug_utils_messenger(&ci, None) }
    .creating("debug messenger")?;
  Ok(DebugMessenger { loader, messenger })
}

impl Drop for InstanceContext {
  fn drop(&mut self) {
    // Every child object (device, surface) is gone by the time this runs.
    unsafe {
      if let Some(d) = self.debug.take() {
        d.loader.destroy_debug_utils_messenger(d.messenger, None);
      }
      self.instance.destroy_instance(None);
    }
  }
}
