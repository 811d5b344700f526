//! Core utilities shared by every lumen crate.
//!
//! This crate provides foundational types used across the engine:
//! - Error types and result aliases
//! - Logging initialization
//! - Frame clock for delta-time bookkeeping
//! - Application configuration loaded from JSON

mod clock;
mod config;
mod error;
mod logging;

pub use clock::FrameClock;
pub use config::{
    AppConfig, AppSection, DeviceConfig, Extent, LayerConfig, Position, VulkanConfig,
    WindowConfig, WindowMode,
};
pub use error::{Error, Result};
pub use logging::init_logging;
