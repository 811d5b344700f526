//! Frame lifecycle and render pass orchestration.
//!
//! - [`frame_ring`]: the per-slot synchronization ring behind a
//!   [`FrameBackend`](frame_ring::FrameBackend) seam
//! - [`gpu_resources`]: images paired with their declared layouts
//! - [`passes`]: G-buffer and composite passes and their draw systems
//! - [`Renderer`]: the frame driver tying them together
//!
//! # Render Loop
//!
//! ```no_run
//! use lumen_core::AppConfig;
//! use lumen_platform::Window;
//! use lumen_renderer::Renderer;
//!
//! # fn example(window: &Window) -> Result<(), lumen_renderer::RenderError> {
//! let config = AppConfig::default();
//! let mut renderer = Renderer::new(window, &config)?;
//! renderer.render_frame()?;
//! # Ok(())
//! # }
//! ```

mod error;

pub mod frame;
pub mod frame_ring;
pub mod gpu_resources;
pub mod passes;
pub mod renderer;
pub mod ubo;

pub use error::{RenderError, RenderResult};
pub use frame::{FrameInfo, MAX_FRAMES_IN_FLIGHT, PerFrame};
pub use frame_ring::{BeginFrame, FrameBackend, FrameRing, SlotState};
pub use renderer::Renderer;
pub use ubo::GlobalUbo;
