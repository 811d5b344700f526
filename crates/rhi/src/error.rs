//! RHI-specific error types.

use ash::vk;
use thiserror::Error;

/// RHI-specific error type.
#[derive(Error, Debug)]
pub enum RhiError {
    /// Vulkan API error
    #[error("Vulkan error: {0}")]
    VulkanError(#[from] vk::Result),

    /// Failed to load Vulkan library
    #[error("Failed to load Vulkan: {0}")]
    LoadingError(#[from] ash::LoadingError),

    /// No device offers graphics and presentation with the required features
    #[error("No suitable GPU found")]
    NoSuitableGpu,

    /// None of the candidate depth formats supports optimal-tiling attachments
    #[error("No supported depth-stencil format")]
    NoSupportedDepthFormat,

    /// No memory type matches both the resource mask and the requested properties
    #[error("No memory type in mask {type_bits:#x} has properties {required:?}")]
    MemoryTypeNotFound {
        type_bits: u32,
        required: vk::MemoryPropertyFlags,
    },

    /// `vkAcquireNextImageKHR` failed with something other than out-of-date/suboptimal
    #[error("Failed to acquire swapchain image: {0}")]
    AcquireFailed(vk::Result),

    /// `vkQueuePresentKHR` failed with something other than out-of-date/suboptimal
    #[error("Failed to present swapchain image: {0}")]
    PresentFailed(vk::Result),

    /// Layout with no single stage/access mapping on the derived barrier path
    #[error("Layout {0:?} needs explicit stage and access masks")]
    UnsupportedLayout(vk::ImageLayout),

    /// A caller broke a precondition (unbound resource, bad stride, stale handle)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Shader loading error
    #[error("Shader error: {0}")]
    ShaderError(String),

    /// Surface creation or query error
    #[error("Surface error: {0}")]
    SurfaceError(String),

    /// Swapchain error
    #[error("Swapchain error: {0}")]
    SwapchainError(String),

    /// Pipeline creation error
    #[error("Pipeline error: {0}")]
    PipelineError(String),
}

/// Result type alias for RHI operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;
