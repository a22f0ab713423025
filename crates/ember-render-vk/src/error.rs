// SPDX-License-Identifier: CEPL-1.0
use ash::prelude::VkResult;
use ash::vk;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    /// A Vulkan call failed; `stage` names what was being attempted.
    #[error("{stage} failed: {result}")]
    OperationFailed {
        stage: &'static str,
        result: vk::Result,
    },

    #[error("no physical device meets the graphics and presentation requirements")]
    NoSuitableDevice,

    #[error("no memory type in {allowed:#034b} has properties {required:?}")]
    NoSuitableMemoryType {
        allowed: u32,
        required: vk::MemoryPropertyFlags,
    },

    #[error("failed to load shader bytecode from {}", path.display())]
    ShaderLoadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("window handle unavailable: {0}")]
    WindowHandle(#[from] raw_window_handle::HandleError),

    #[error("failed to load the Vulkan library: {0}")]
    Loader(#[from] ash::LoadingError),
}

pub type Result<T> = std::result::Result<T, RenderError>;

impl RenderError {
    pub fn failed(stage: &'static str, result: vk::Result) -> Self {
        RenderError::OperationFailed { stage, result }
    }

    /// The stage name for `OperationFailed`, `None` otherwise.
    pub fn stage(&self) -> Option<&'static str> {
        match self {
            RenderError::OperationFailed { stage, .. } => Some(stage),
            _ => None,
        }
    }
}

/// Tags a raw Vulkan result with the stage it came from.
pub trait StageExt<T> {
    fn stage(self, stage: &'static str) -> Result<T>;
}

impl<T> StageExt<T> for VkResult<T> {
    fn stage(self, stage: &'static str) -> Result<T> {
        self.map_err(|result| RenderError::failed(stage, result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_is_carried_into_message() {
        let r: VkResult<()> = Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        let err = r.stage("allocate descriptor sets").unwrap_err();
        assert_eq!(err.stage(), Some("allocate descriptor sets"));
        assert!(err.to_string().starts_with("allocate descriptor sets failed"));
    }

    #[test]
    fn ok_passes_through() {
        let r: VkResult<u32> = Ok(7);
        assert_eq!(r.stage("create swapchain").unwrap(), 7);
    }

    #[test]
    fn window_handle_errors_convert_and_chain() {
        let err = RenderError::from(raw_window_handle::HandleError::Unavailable);
        assert!(err.to_string().starts_with("window handle unavailable"));
        let err = anyhow::Error::new(err).context("create surface");
        assert_eq!(err.chain().count(), 3);
    }

    #[test]
    fn non_operation_errors_have_no_stage() {
        assert_eq!(RenderError::NoSuitableDevice.stage(), None);
    }
}
