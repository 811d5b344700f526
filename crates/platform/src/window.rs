//! winit window and the Vulkan surface presented into it.

use std::ffi::{CStr, c_char};

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};
use tracing::{debug, info};
use winit::dpi::{PhysicalPosition, PhysicalSize};
use winit::event_loop::ActiveEventLoop;
use winit::window::{Fullscreen, Window as WinitWindow, WindowAttributes};

use lumen_core::{Error, Result, WindowConfig, WindowMode};

/// Owned `VkSurfaceKHR`. The instance it came from must outlive it.
pub struct Surface {
    handle: vk::SurfaceKHR,
    loader: ash::khr::surface::Instance,
}

impl Surface {
    #[inline]
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    /// Loader for capability, format, and present-mode queries.
    #[inline]
    pub fn loader(&self) -> &ash::khr::surface::Instance {
        &self.loader
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        // SAFETY: created from the same instance as `loader`, destroyed only here.
        unsafe { self.loader.destroy_surface(self.handle, None) };
        debug!("Surface destroyed");
    }
}

/// Window the swapchain presents into.
///
/// Tracks the framebuffer size reported by resize events; a zero extent
/// means minimized and the renderer skips frames until it changes.
pub struct Window {
    window: WinitWindow,
    extent: vk::Extent2D,
}

impl Window {
    /// # Errors
    ///
    /// Returns [`Error::Window`] if winit refuses to create the window.
    pub fn new(event_loop: &ActiveEventLoop, title: &str, config: &WindowConfig) -> Result<Self> {
        let attrs = WindowAttributes::default()
            .with_title(title)
            .with_inner_size(PhysicalSize::new(config.extent.width, config.extent.height))
            .with_position(PhysicalPosition::new(config.position.x, config.position.y))
            .with_resizable(true)
            .with_maximized(config.mode == WindowMode::Maximized)
            .with_fullscreen(
                (config.mode == WindowMode::Fullscreen).then_some(Fullscreen::Borderless(None)),
            );

        let window = event_loop
            .create_window(attrs)
            .map_err(|e| Error::Window(e.to_string()))?;

        // Maximized and fullscreen windows ignore the requested size.
        let size = window.inner_size();
        info!("Window {}x{} ({:?})", size.width, size.height, config.mode);

        Ok(Self {
            window,
            extent: vk::Extent2D {
                width: size.width,
                height: size.height,
            },
        })
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    #[inline]
    pub fn is_minimized(&self) -> bool {
        self.extent.width == 0 || self.extent.height == 0
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.extent = vk::Extent2D { width, height };
        debug!("Window resized to {}x{}", width, height);
    }

    pub fn aspect_ratio(&self) -> f32 {
        aspect_ratio(self.extent)
    }

    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }

    /// Instance extensions the display needs for surface creation.
    pub fn required_extensions(&self) -> Result<Vec<*const c_char>> {
        let (display, _) = self.raw_handles()?;
        get_required_extensions(display)
    }

    /// # Errors
    ///
    /// Returns [`Error::Window`] if the window handles are unavailable or
    /// surface creation fails.
    pub fn create_surface(&self, entry: &ash::Entry, instance: &ash::Instance) -> Result<Surface> {
        let (display, window) = self.raw_handles()?;

        // SAFETY: both handles come from a live window; the surface is
        // destroyed in `Surface::drop` before the instance.
        let handle = unsafe {
            ash_window::create_surface(entry, instance, display, window, None)
                .map_err(|e| Error::Window(format!("surface creation failed: {e}")))?
        };
        info!("Surface created");

        Ok(Surface {
            handle,
            loader: ash::khr::surface::Instance::new(entry, instance),
        })
    }

    fn raw_handles(&self) -> Result<(RawDisplayHandle, RawWindowHandle)> {
        let display = self
            .window
            .display_handle()
            .map_err(|e| Error::Window(format!("no display handle: {e}")))?;
        let window = self
            .window
            .window_handle()
            .map_err(|e| Error::Window(format!("no window handle: {e}")))?;
        Ok((display.as_raw(), window.as_raw()))
    }
}

/// Width over height; 1.0 for a minimized window.
fn aspect_ratio(extent: vk::Extent2D) -> f32 {
    if extent.height == 0 {
        return 1.0;
    }
    extent.width as f32 / extent.height as f32
}

/// Surface extensions for `display`.
///
/// The returned pointers are static names owned by the loader.
///
/// # Errors
///
/// Returns [`Error::Window`] if ash-window does not support the display.
pub fn get_required_extensions(display: RawDisplayHandle) -> Result<Vec<*const c_char>> {
    let extensions = ash_window::enumerate_required_extensions(display)
        .map_err(|e| Error::Window(format!("unsupported display: {e}")))?;

    debug!(
        "Surface extensions: {:?}",
        extensions
            .iter()
            // SAFETY: ash-window returns static, null-terminated names.
            .map(|&ext| unsafe { CStr::from_ptr(ext) })
            .collect::<Vec<_>>()
    );
    Ok(extensions.to_vec())
}
