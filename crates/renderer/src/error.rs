//! Renderer error types.

use lumen_rhi::RhiError;
use thiserror::Error;

/// Error returned by the frame driver and its setup.
#[derive(Error, Debug)]
pub enum RenderError {
    /// A GPU-facing operation failed
    #[error(transparent)]
    Rhi(#[from] RhiError),

    /// Window, surface, or configuration failure
    #[error(transparent)]
    Platform(#[from] lumen_core::Error),
}

/// Result type alias for renderer operations.
pub type RenderResult<T> = std::result::Result<T, RenderError>;
