// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use ember_render::FrameRingError;
use thiserror::Error;

/// Renderer failures. Stale surfaces are not errors; see [`crate::SurfaceStatus`].
/// [`VkError::ZeroExtent`] is the only recoverable variant: the surface has no area yet.
#[derive(Debug, Error)]
pub enum VkError {
  #[error("vulkan initialization failed: {0}")]
  Initialization(String),

  #[error("no suitable GPU: {0}")]
  NoSuitableDevice(String),

  #[error("failed to create {what}: {result}")]
  ResourceCreation {
    what: &'static str,
    result: vk::Result,
  },

  #[error("pipeline creation failed: {0}")]
  PipelineCreation(String),

  #[error("device lost: {0}")]
  DeviceLost(String),

  #[error("surface has zero extent")]
  ZeroExtent,

  #[error(transparent)]
  FrameRing(#[from] FrameRingError),

  #[error(transparent)]
  Io(#[from] std::io::Error),
}

pub type Result<T, E = VkError> = std::result::Result<T, E>;

impl From<ash::LoadingError> for VkError {
  fn from(e: ash::LoadingError) -> Self {
    VkError::Initialization(format!("vulkan loader not found: {e}"))
  }
}

impl VkError {
  pub(crate) fn resource(what: &'static str, result: vk::Result) -> Self {
    if result == vk::Result::ERROR_DEVICE_LOST {
      return VkError::DeviceLost(what.to_owned());
    }
    VkError::ResourceCreation { what, result }
  }

  pub fn is_device_lost(&self) -> bool {
    matches!(self, VkError::DeviceLost(_))
  }

  pub fn is_zero_extent(&self) -> bool {
    matches!(self, VkError::ZeroExtent)
  }
}

/// Tags a raw `vk::Result` with the object being created.
pub(crate) trait VkResultExt<T> {
  fn creating(self, what: &'static str) -> Result<T>;
}

impl<T> VkResultExt<T> for ash::prelude::VkResult<T> {
  fn creating(self, what: &'static str) -> Result<T> {
    self.map_err(|r| VkError::resource(what, r))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn device_lost_is_not_a_creation_error() {
    let e = VkError::resource("fence", vk::Result::ERROR_DEVICE_LOST);
    assert!(e.is_device_lost());
    let e = VkError::resource("buffer", vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
    assert!(matches!(
      e,
      VkError::ResourceCreation { what: "buffer", .. }
    ));
    assert!(e.to_string().starts_with("failed to create buffer"));
  }

  #[test]
  fn ring_misuse_surfaces_as_an_error() {
    let e: VkError = FrameRingError::OutOfRange(7).into();
    assert!(matches!(e, VkError::FrameRing(FrameRingError::OutOfRange(7))));
    assert_eq!(e.to_string(), "slot 7 out of range");
    assert!(!e.is_device_lost() && !e.is_zero_extent());
  }

  #[test]
  fn creating_tags_the_object() {
    let r: ash::prelude::VkResult<()> = Err(vk::Result::ERROR_OUT_OF_HOST_MEMORY);
    match r.creating("sampler") {
      Err(VkError::ResourceCreation { what, result }) => {
        assert_eq!(what, "sampler");
        assert_eq!(result, vk::Result::ERROR_OUT_OF_HOST_MEMORY);
      }
      other => panic!("unexpected {other:?}"),
    }
  }
}
