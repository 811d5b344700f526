//! Platform layer for lumen.
//!
//! This crate provides the window collaborator the renderer consumes:
//! - Window creation from [`lumen_core::WindowConfig`] via winit
//! - Vulkan surface creation with RAII cleanup
//! - Keyboard and mouse state gathered from window events

mod peripherals;
mod window;

pub use peripherals::{Keyboard, KeyCode, Modifiers, Mouse, MouseButton, Peripherals};
pub use window::{Surface, Window, get_required_extensions};

pub use winit::event::{ElementState, WindowEvent};
pub use winit::event_loop::{ActiveEventLoop, EventLoop};
