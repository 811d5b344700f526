//! Vulkan abstraction layer (Render Hardware Interface).
//!
//! A thin, safe layer over `ash`:
//! - Instance, physical device selection, and logical device creation
//! - Explicit memory-type selection with two-step create-then-bind resources
//! - A generational arena that owns every device-memory-backed resource
//! - Swapchain negotiation, acquire, and present
//! - Semaphores, fences, and the per-frame synchronization slot
//! - Command recording and the layout-transition barrier table
//! - Dynamic rendering, descriptors, shaders, and graphics pipelines

mod error;

pub mod arena;
pub mod barrier;
pub mod command;
pub mod descriptor;
pub mod device;
pub mod instance;
pub mod memory;
pub mod physical_device;
pub mod pipeline;
pub mod rendering;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod vertex;

pub use error::{RhiError, RhiResult};

// Re-export ash types that users might need
pub use ash::vk;
