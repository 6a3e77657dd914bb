// Error types for the Vulkan backend
//
// Startup failures are fatal and carry the stage that failed.
// Frame failures carry the frame stage so callers can tell an
// out-of-date surface apart from a lost device.

use ash::prelude::VkResult;
use ash::vk;
use std::fmt;
use thiserror::Error;

/// Which kind of extension was missing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtensionKind {
    Instance,
    Device,
}

impl fmt::Display for ExtensionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtensionKind::Instance => f.write_str("instance"),
            ExtensionKind::Device => f.write_str("device"),
        }
    }
}

/// Fatal errors raised while bringing the renderer up
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("failed to load the Vulkan library: {0}")]
    Loading(#[from] ash::LoadingError),

    #[error("window handle unavailable: {0}")]
    WindowHandle(#[from] raw_window_handle::HandleError),

    #[error("{stage} failed: {result}")]
    Vulkan {
        stage: &'static str,
        result: vk::Result,
    },

    #[error("required {kind} extension {name} is not available")]
    MissingExtension { kind: ExtensionKind, name: String },

    #[error("no physical device has a queue family with both graphics and presentation support")]
    NoSuitableDevice,

    #[error("{what} enumeration returned {count} entries, more than the supported {limit}")]
    TooMany {
        what: &'static str,
        count: usize,
        limit: usize,
    },

    #[error("this context already has a window surface")]
    SurfaceAlreadyCreated,

    #[error("surface reports no supported formats")]
    NoSurfaceFormats,

    #[error("swapchain returned {count} images but the surface allows at most {max}")]
    ImageCountExceeded { count: usize, max: u32 },

    #[error("failed to read shader `{name}`: {source}")]
    ShaderRead {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("shader `{name}` is not valid SPIR-V: {reason}")]
    InvalidShader { name: String, reason: String },
}

/// Attach a stage name to a raw Vulkan result
pub trait VkResultExt<T> {
    fn during(self, stage: &'static str) -> Result<T, SetupError>;
}

impl<T> VkResultExt<T> for VkResult<T> {
    fn during(self, stage: &'static str) -> Result<T, SetupError> {
        self.map_err(|result| SetupError::Vulkan { stage, result })
    }
}

/// Step of the per-frame state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStage {
    Acquire,
    Record,
    Submit,
    Present,
    Synchronize,
}

impl fmt::Display for FrameStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FrameStage::Acquire => "image acquisition",
            FrameStage::Record => "command recording",
            FrameStage::Submit => "queue submission",
            FrameStage::Present => "presentation",
            FrameStage::Synchronize => "device synchronization",
        };
        f.write_str(name)
    }
}

/// Failure of a single frame. None of these are recovered from in-loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("swapchain is out of date during {0} and must be recreated")]
    OutOfDate(FrameStage),

    #[error("surface was lost during {0}")]
    SurfaceLost(FrameStage),

    #[error("device was lost during {0}")]
    DeviceLost(FrameStage),

    #[error("timed out waiting for a presentable image")]
    Timeout,

    #[error("{stage} failed: {result}")]
    Vulkan {
        stage: FrameStage,
        result: vk::Result,
    },
}

impl FrameError {
    pub fn from_vk(stage: FrameStage, result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_OUT_OF_DATE_KHR => FrameError::OutOfDate(stage),
            vk::Result::ERROR_SURFACE_LOST_KHR => FrameError::SurfaceLost(stage),
            vk::Result::ERROR_DEVICE_LOST => FrameError::DeviceLost(stage),
            vk::Result::TIMEOUT | vk::Result::NOT_READY if stage == FrameStage::Acquire => {
                FrameError::Timeout
            }
            result => FrameError::Vulkan { stage, result },
        }
    }

    pub fn stage(&self) -> FrameStage {
        match *self {
            FrameError::OutOfDate(stage)
            | FrameError::SurfaceLost(stage)
            | FrameError::DeviceLost(stage) => stage,
            FrameError::Timeout => FrameStage::Acquire,
            FrameError::Vulkan { stage, .. } => stage,
        }
    }

    pub fn is_out_of_date(&self) -> bool {
        matches!(self, FrameError::OutOfDate(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_date_is_distinguishable_at_every_stage() {
        for stage in [FrameStage::Acquire, FrameStage::Present] {
            let err = FrameError::from_vk(stage, vk::Result::ERROR_OUT_OF_DATE_KHR);
            assert!(err.is_out_of_date());
            assert_eq!(err.stage(), stage);
        }
    }

    #[test]
    fn submit_failure_keeps_submit_stage() {
        let err = FrameError::from_vk(FrameStage::Submit, vk::Result::ERROR_OUT_OF_HOST_MEMORY);
        assert_eq!(
            err,
            FrameError::Vulkan {
                stage: FrameStage::Submit,
                result: vk::Result::ERROR_OUT_OF_HOST_MEMORY,
            }
        );
        assert!(!err.is_out_of_date());
    }

    #[test]
    fn timeout_only_maps_during_acquire() {
        assert_eq!(
            FrameError::from_vk(FrameStage::Acquire, vk::Result::TIMEOUT),
            FrameError::Timeout
        );
        assert_eq!(
            FrameError::from_vk(FrameStage::Synchronize, vk::Result::TIMEOUT).stage(),
            FrameStage::Synchronize
        );
    }

    #[test]
    fn lost_device_and_surface() {
        assert_eq!(
            FrameError::from_vk(FrameStage::Submit, vk::Result::ERROR_DEVICE_LOST),
            FrameError::DeviceLost(FrameStage::Submit)
        );
        assert_eq!(
            FrameError::from_vk(FrameStage::Present, vk::Result::ERROR_SURFACE_LOST_KHR),
            FrameError::SurfaceLost(FrameStage::Present)
        );
    }

    #[test]
    fn setup_error_names_the_stage() {
        let err: Result<(), _> =
            Err(vk::Result::ERROR_INITIALIZATION_FAILED).during("vkCreateInstance");
        let msg = err.unwrap_err().to_string();
        assert!(msg.starts_with("vkCreateInstance failed"), "{msg}");
    }
}
