//! Swapchain management.
//!
//! [`Swapchain`] owns the VkSwapchainKHR, one view per presentable image,
//! the depth target, and one primary command buffer per image. Everything
//! that depends on the surface is chosen by [`SwapchainSettings::negotiate`],
//! a pure function, so recreating against an unchanged surface yields the
//! same settings.
//!
//! Presentable images belong to the presentation engine. They are handed out
//! as [`SwapchainImage`] copies and never destroyed here; only their views
//! are. The depth image lives in the caller's [`ResourceArena`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ash::vk;
//! use lumen_rhi::arena::ResourceArena;
//! use lumen_rhi::device::Device;
//! use lumen_rhi::instance::Instance;
//! use lumen_rhi::swapchain::{AcquireOutcome, Swapchain};
//!
//! # fn example(instance: &Instance, device: Arc<Device>, surface: vk::SurfaceKHR,
//! #            image_available: vk::Semaphore) -> Result<(), lumen_rhi::RhiError> {
//! let mut arena = ResourceArena::new();
//! let extent = vk::Extent2D { width: 1280, height: 720 };
//! let mut swapchain = Swapchain::new(instance, device, surface, extent, &mut arena)?;
//!
//! match swapchain.acquire_next_image(image_available, vk::Fence::null())? {
//!     AcquireOutcome::Acquired { image_index, .. } => {
//!         let _target = swapchain.image(image_index)?;
//!     }
//!     AcquireOutcome::NeedsRecreation => swapchain.recreate(extent, &mut arena)?,
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info, warn};

use crate::arena::{ImageHandle, ResourceArena};
use crate::command::CommandPool;
use crate::device::{Device, FormatSupport};
use crate::error::{RhiError, RhiResult};
use crate::instance::Instance;
use crate::memory::{Image, ImageDesc};
use crate::physical_device::QueueFamilyIndices;

/// Image count the swapchain asks for before clamping to the surface limits.
pub const PREFERRED_IMAGE_COUNT: u32 = 3;

/// Usage of every presentable image: rendered to, copied from, and copied into.
pub const PRESENTABLE_USAGE: vk::ImageUsageFlags = vk::ImageUsageFlags::from_raw(
    vk::ImageUsageFlags::COLOR_ATTACHMENT.as_raw()
        | vk::ImageUsageFlags::TRANSFER_SRC.as_raw()
        | vk::ImageUsageFlags::TRANSFER_DST.as_raw(),
);

/// Color formats tried in order, each with `SRGB_NONLINEAR`.
pub const PREFERRED_COLOR_FORMATS: [vk::Format; 4] = [
    vk::Format::B8G8R8A8_UNORM,
    vk::Format::R8G8B8A8_UNORM,
    vk::Format::B8G8R8_UNORM,
    vk::Format::R8G8B8_UNORM,
];

/// Depth formats tried in order; the first one usable as an optimal-tiling
/// depth attachment wins.
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// What a surface supports, as reported by the physical device.
#[derive(Debug, Clone)]
pub struct SwapchainSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupport {
    /// # Errors
    ///
    /// Returns an error if any of the surface queries fail.
    pub fn query(
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
    ) -> RhiResult<Self> {
        let capabilities = unsafe {
            surface_loader.get_physical_device_surface_capabilities(physical_device, surface)?
        };
        let formats = unsafe {
            surface_loader.get_physical_device_surface_formats(physical_device, surface)?
        };
        let present_modes = unsafe {
            surface_loader.get_physical_device_surface_present_modes(physical_device, surface)?
        };

        debug!(
            "Swapchain support: {} formats, {} present modes, image count {}..{}",
            formats.len(),
            present_modes.len(),
            capabilities.min_image_count,
            if capabilities.max_image_count == 0 {
                "unbounded".to_string()
            } else {
                capabilities.max_image_count.to_string()
            }
        );

        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }

    #[inline]
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// Everything chosen for one swapchain instance.
#[derive(Debug, Clone, Copy)]
pub struct SwapchainSettings {
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
    pub image_usage: vk::ImageUsageFlags,
    pub sharing_mode: vk::SharingMode,
    pub queue_family_indices: [u32; 2],
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
    pub composite_alpha: vk::CompositeAlphaFlagsKHR,
}

impl SwapchainSettings {
    /// Pick every swapchain parameter from the surface support and the
    /// window's pixel extent. Deterministic for identical inputs.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::SwapchainError`] if the surface reports no format
    /// or present mode, or cannot provide [`PRESENTABLE_USAGE`].
    pub fn negotiate(
        support: &SwapchainSupport,
        window_extent: vk::Extent2D,
        queue_families: QueueFamilyIndices,
    ) -> RhiResult<Self> {
        if !support.is_adequate() {
            return Err(RhiError::SwapchainError(
                "surface reports no formats or present modes".to_string(),
            ));
        }

        let caps = &support.capabilities;
        if !caps.supported_usage_flags.contains(PRESENTABLE_USAGE) {
            return Err(RhiError::SwapchainError(format!(
                "surface usage {:?} lacks required {:?}",
                caps.supported_usage_flags, PRESENTABLE_USAGE
            )));
        }

        let sharing_mode = if queue_families.are_different() {
            vk::SharingMode::CONCURRENT
        } else {
            vk::SharingMode::EXCLUSIVE
        };

        Ok(Self {
            surface_format: choose_surface_format(&support.formats)?,
            present_mode: choose_present_mode(&support.present_modes),
            extent: choose_extent(caps, window_extent),
            image_count: choose_image_count(caps),
            image_usage: PRESENTABLE_USAGE,
            sharing_mode,
            queue_family_indices: [queue_families.graphics, queue_families.present],
            pre_transform: choose_pre_transform(caps),
            composite_alpha: choose_composite_alpha(caps),
        })
    }

    /// Family indices to list in the create info; empty when exclusive.
    pub fn sharing_families(&self) -> &[u32] {
        if self.sharing_mode == vk::SharingMode::CONCURRENT {
            &self.queue_family_indices
        } else {
            &[]
        }
    }
}

/// Prefer an 8-bit UNORM format in sRGB nonlinear space; otherwise the
/// first pair the surface reports.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> RhiResult<vk::SurfaceFormatKHR> {
    let first = formats
        .first()
        .copied()
        .ok_or_else(|| RhiError::SwapchainError("no surface formats".to_string()))?;

    // A lone UNDEFINED entry means the surface takes any format.
    if formats.len() == 1 && first.format == vk::Format::UNDEFINED {
        return Ok(vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        });
    }

    for preferred in PREFERRED_COLOR_FORMATS {
        if let Some(found) = formats.iter().find(|f| {
            f.format == preferred && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        }) {
            return Ok(*found);
        }
    }

    warn!(
        "No preferred surface format, using {:?} / {:?}",
        first.format, first.color_space
    );
    Ok(first)
}

/// MAILBOX, then IMMEDIATE, then FIFO (always available).
pub fn choose_present_mode(present_modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
        .into_iter()
        .find(|mode| present_modes.contains(mode))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// The surface's current extent, unless it leaves sizing to the swapchain
/// (`u32::MAX`), in which case the window extent clamped to the limits.
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    window_extent: vk::Extent2D,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    vk::Extent2D {
        width: window_extent.width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: window_extent.height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// [`PREFERRED_IMAGE_COUNT`] clamped to the surface limits; a maximum of 0
/// means unbounded.
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = PREFERRED_IMAGE_COUNT.max(capabilities.min_image_count);
    if capabilities.max_image_count > 0 {
        count.min(capabilities.max_image_count)
    } else {
        count
    }
}

pub fn choose_pre_transform(
    capabilities: &vk::SurfaceCapabilitiesKHR,
) -> vk::SurfaceTransformFlagsKHR {
    if capabilities
        .supported_transforms
        .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
    {
        vk::SurfaceTransformFlagsKHR::IDENTITY
    } else {
        capabilities.current_transform
    }
}

pub fn choose_composite_alpha(capabilities: &vk::SurfaceCapabilitiesKHR) -> vk::CompositeAlphaFlagsKHR {
    [
        vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::INHERIT,
    ]
    .into_iter()
    .find(|alpha| capabilities.supported_composite_alpha.contains(*alpha))
    .unwrap_or(vk::CompositeAlphaFlagsKHR::OPAQUE)
}

/// First of [`DEPTH_FORMAT_CANDIDATES`] usable as an optimal-tiling depth
/// attachment.
///
/// # Errors
///
/// Returns [`RhiError::NoSupportedDepthFormat`] if none is.
pub fn choose_depth_format(support: &impl FormatSupport) -> RhiResult<vk::Format> {
    DEPTH_FORMAT_CANDIDATES
        .into_iter()
        .find(|format| {
            support
                .optimal_tiling_features(*format)
                .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
        })
        .ok_or(RhiError::NoSupportedDepthFormat)
}

/// Result of an acquire the caller has to act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// An image is ready once the acquire semaphore signals.
    Acquired { image_index: u32, suboptimal: bool },
    /// The surface changed; recreate before rendering again.
    NeedsRecreation,
}

/// Result of a present. Both variants are successes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    /// The image was queued but the swapchain no longer matches the surface.
    Stale,
}

impl PresentOutcome {
    /// True when the swapchain should be rebuilt before the next frame.
    pub fn needs_recreation(self) -> bool {
        self == PresentOutcome::Stale
    }
}

/// Map a raw acquire result onto [`AcquireOutcome`].
///
/// `OUT_OF_DATE` is a normal outcome; anything else that is not a success
/// becomes [`RhiError::AcquireFailed`].
pub fn classify_acquire(result: Result<(u32, bool), vk::Result>) -> RhiResult<AcquireOutcome> {
    match result {
        Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Acquired {
            image_index,
            suboptimal,
        }),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::NeedsRecreation),
        Err(e) => Err(RhiError::AcquireFailed(e)),
    }
}

/// Map a raw present result onto [`PresentOutcome`].
///
/// `SUBOPTIMAL` and `OUT_OF_DATE` are swallowed; anything else becomes
/// [`RhiError::PresentFailed`].
pub fn classify_present(result: Result<bool, vk::Result>) -> RhiResult<PresentOutcome> {
    match result {
        Ok(false) => Ok(PresentOutcome::Presented),
        Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::Stale),
        Err(e) => Err(RhiError::PresentFailed(e)),
    }
}

/// A presentable image for one frame. Borrowed from the presentation engine;
/// dropping it destroys nothing.
#[derive(Debug, Clone, Copy)]
pub struct SwapchainImage {
    pub index: u32,
    pub image: vk::Image,
    pub view: vk::ImageView,
}

/// Vulkan swapchain wrapper.
///
/// Not thread-safe; the frame loop is its only user.
pub struct Swapchain {
    device: Arc<Device>,
    surface_loader: ash::khr::surface::Instance,
    swapchain_loader: ash::khr::swapchain::Device,
    surface: vk::SurfaceKHR,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    settings: SwapchainSettings,
    depth_format: vk::Format,
    depth_image: ImageHandle,
    command_pool: CommandPool,
    command_buffers: Vec<vk::CommandBuffer>,
}

impl Swapchain {
    /// Creates the swapchain and everything sized by it.
    ///
    /// # Errors
    ///
    /// Returns an error if negotiation fails, no depth format is supported,
    /// or any object creation fails.
    pub fn new(
        instance: &Instance,
        device: Arc<Device>,
        surface: vk::SurfaceKHR,
        window_extent: vk::Extent2D,
        arena: &mut ResourceArena,
    ) -> RhiResult<Self> {
        let surface_loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());
        let swapchain_loader = ash::khr::swapchain::Device::new(instance.handle(), device.handle());

        let depth_format = choose_depth_format(device.as_ref())?;
        let command_pool = CommandPool::new(device.clone(), device.queue_families().graphics)?;

        let settings = negotiate_for(&device, &surface_loader, surface, window_extent)?;
        let (swapchain, images, image_views) = create_chain(
            &device,
            &swapchain_loader,
            surface,
            &settings,
            vk::SwapchainKHR::null(),
        )?;
        let depth_image = create_depth(&device, arena, depth_format, settings.extent)?;
        let command_buffers = command_pool.allocate(images.len() as u32)?;

        log_created(&settings, depth_format, images.len());

        Ok(Self {
            device,
            surface_loader,
            swapchain_loader,
            surface,
            swapchain,
            images,
            image_views,
            settings,
            depth_format,
            depth_image,
            command_pool,
            command_buffers,
        })
    }

    /// Rebuilds the swapchain in place, chaining the old handle.
    ///
    /// Waits for the device to go idle first, so no frame may be mid-record.
    /// Image views, the depth image, and command buffers are all replaced.
    pub fn recreate(
        &mut self,
        window_extent: vk::Extent2D,
        arena: &mut ResourceArena,
    ) -> RhiResult<()> {
        self.device.wait_idle()?;

        let settings = negotiate_for(
            &self.device,
            &self.surface_loader,
            self.surface,
            window_extent,
        )?;
        let old_swapchain = self.swapchain;
        let (swapchain, images, image_views) = create_chain(
            &self.device,
            &self.swapchain_loader,
            self.surface,
            &settings,
            old_swapchain,
        )?;

        self.destroy_image_views();
        unsafe {
            self.swapchain_loader.destroy_swapchain(old_swapchain, None);
        }
        self.swapchain = swapchain;
        self.images = images;
        self.image_views = image_views;

        arena.destroy_image(self.depth_image)?;
        self.depth_image = create_depth(&self.device, arena, self.depth_format, settings.extent)?;

        self.command_pool
            .free(&std::mem::take(&mut self.command_buffers));
        self.command_buffers = self
            .command_pool
            .allocate(self.images.len() as u32)?;

        self.settings = settings;
        log_created(&self.settings, self.depth_format, self.images.len());
        Ok(())
    }

    /// Acquires the next presentable image with no timeout.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::AcquireFailed`] for results other than success,
    /// suboptimal, or out-of-date.
    pub fn acquire_next_image(
        &self,
        signal_semaphore: vk::Semaphore,
        signal_fence: vk::Fence,
    ) -> RhiResult<AcquireOutcome> {
        let result = unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                signal_semaphore,
                signal_fence,
            )
        };
        classify_acquire(result)
    }

    /// Queues `image_index` for presentation once `wait_semaphore` signals.
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> RhiResult<PresentOutcome> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let wait_semaphores = [wait_semaphore];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe { self.swapchain_loader.queue_present(queue, &present_info) };
        classify_present(result)
    }

    /// # Errors
    ///
    /// Returns [`RhiError::InvalidArgument`] for an index this swapchain
    /// never handed out.
    pub fn image(&self, index: u32) -> RhiResult<SwapchainImage> {
        let i = index as usize;
        match (self.images.get(i), self.image_views.get(i)) {
            (Some(&image), Some(&view)) => Ok(SwapchainImage { index, image, view }),
            _ => Err(out_of_range(index, self.images.len())),
        }
    }

    /// Command buffer recorded for swapchain image `index`.
    pub fn command_buffer(&self, index: u32) -> RhiResult<vk::CommandBuffer> {
        self.command_buffers
            .get(index as usize)
            .copied()
            .ok_or_else(|| out_of_range(index, self.command_buffers.len()))
    }

    #[inline]
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    #[inline]
    pub fn settings(&self) -> &SwapchainSettings {
        &self.settings
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.settings.surface_format.format
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.settings.extent
    }

    #[inline]
    pub fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    #[inline]
    pub fn depth_format(&self) -> vk::Format {
        self.depth_format
    }

    /// Arena handle of the depth target. Changes on every recreation.
    #[inline]
    pub fn depth_image(&self) -> ImageHandle {
        self.depth_image
    }

    fn destroy_image_views(&mut self) {
        for view in self.image_views.drain(..) {
            unsafe {
                self.device.handle().destroy_image_view(view, None);
            }
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.command_pool
            .free(&std::mem::take(&mut self.command_buffers));
        self.destroy_image_views();
        unsafe {
            self.swapchain_loader
                .destroy_swapchain(self.swapchain, None);
        }
        info!(
            "Swapchain destroyed (was {}x{}, {} images)",
            self.settings.extent.width,
            self.settings.extent.height,
            self.images.len()
        );
    }
}

fn negotiate_for(
    device: &Device,
    surface_loader: &ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
    window_extent: vk::Extent2D,
) -> RhiResult<SwapchainSettings> {
    let support = SwapchainSupport::query(device.physical_device(), surface, surface_loader)?;
    SwapchainSettings::negotiate(&support, window_extent, device.queue_families())
}

fn create_chain(
    device: &Device,
    loader: &ash::khr::swapchain::Device,
    surface: vk::SurfaceKHR,
    settings: &SwapchainSettings,
    old_swapchain: vk::SwapchainKHR,
) -> RhiResult<(vk::SwapchainKHR, Vec<vk::Image>, Vec<vk::ImageView>)> {
    let create_info = vk::SwapchainCreateInfoKHR::default()
        .surface(surface)
        .min_image_count(settings.image_count)
        .image_format(settings.surface_format.format)
        .image_color_space(settings.surface_format.color_space)
        .image_extent(settings.extent)
        .image_array_layers(1)
        .image_usage(settings.image_usage)
        .image_sharing_mode(settings.sharing_mode)
        .queue_family_indices(settings.sharing_families())
        .pre_transform(settings.pre_transform)
        .composite_alpha(settings.composite_alpha)
        .present_mode(settings.present_mode)
        .clipped(true)
        .old_swapchain(old_swapchain);

    let swapchain = unsafe { loader.create_swapchain(&create_info, None)? };

    let images = match unsafe { loader.get_swapchain_images(swapchain) } {
        Ok(images) => images,
        Err(e) => {
            unsafe { loader.destroy_swapchain(swapchain, None) };
            return Err(e.into());
        }
    };

    let mut views = Vec::with_capacity(images.len());
    for &image in &images {
        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(settings.surface_format.format)
            .subresource_range(crate::barrier::full_range(vk::ImageAspectFlags::COLOR));

        match unsafe { device.handle().create_image_view(&view_info, None) } {
            Ok(view) => views.push(view),
            Err(e) => {
                unsafe {
                    for view in views {
                        device.handle().destroy_image_view(view, None);
                    }
                    loader.destroy_swapchain(swapchain, None);
                }
                return Err(RhiError::SwapchainError(format!(
                    "failed to create swapchain image view: {e:?}"
                )));
            }
        }
    }

    Ok((swapchain, images, views))
}

fn create_depth(
    device: &Arc<Device>,
    arena: &mut ResourceArena,
    format: vk::Format,
    extent: vk::Extent2D,
) -> RhiResult<ImageHandle> {
    let desc = ImageDesc::attachment(
        format,
        extent,
        vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
        vk::ImageAspectFlags::DEPTH,
    );
    let image = Image::new(device.clone(), desc)?;
    Ok(arena.insert_image(image))
}

fn log_created(settings: &SwapchainSettings, depth_format: vk::Format, image_count: usize) {
    info!(
        "Swapchain {}x{}: color {:?} / {:?}, depth {:?}, {:?}, {} images",
        settings.extent.width,
        settings.extent.height,
        settings.surface_format.format,
        settings.surface_format.color_space,
        depth_format,
        settings.present_mode,
        image_count
    );
}

fn out_of_range(index: u32, len: usize) -> RhiError {
    RhiError::InvalidArgument(format!(
        "swapchain image index {index} out of range (0..{len})"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn fmt(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    fn srgb(format: vk::Format) -> vk::SurfaceFormatKHR {
        fmt(format, vk::ColorSpaceKHR::SRGB_NONLINEAR)
    }

    fn capabilities(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D {
                width: 1280,
                height: 720,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            supported_transforms: vk::SurfaceTransformFlagsKHR::IDENTITY,
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            supported_composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            supported_usage_flags: PRESENTABLE_USAGE,
            ..Default::default()
        }
    }

    fn support(min: u32, max: u32) -> SwapchainSupport {
        SwapchainSupport {
            capabilities: capabilities(min, max),
            formats: vec![
                srgb(vk::Format::R8G8B8A8_SRGB),
                srgb(vk::Format::B8G8R8A8_UNORM),
            ],
            present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
        }
    }

    const SAME_FAMILY: QueueFamilyIndices = QueueFamilyIndices {
        graphics: 0,
        present: 0,
    };

    struct FormatTable(HashMap<vk::Format, vk::FormatFeatureFlags>);

    impl FormatSupport for FormatTable {
        fn optimal_tiling_features(&self, format: vk::Format) -> vk::FormatFeatureFlags {
            self.0.get(&format).copied().unwrap_or_default()
        }
    }

    #[test]
    fn test_surface_format_prefers_bgra_unorm() {
        let chosen = choose_surface_format(&[
            srgb(vk::Format::R8G8B8A8_UNORM),
            srgb(vk::Format::B8G8R8A8_UNORM),
        ])
        .unwrap();
        assert_eq!(chosen.format, vk::Format::B8G8R8A8_UNORM);
        assert_eq!(chosen.color_space, vk::ColorSpaceKHR::SRGB_NONLINEAR);
    }

    #[test]
    fn test_surface_format_requires_srgb_nonlinear() {
        let chosen = choose_surface_format(&[
            fmt(
                vk::Format::B8G8R8A8_UNORM,
                vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT,
            ),
            srgb(vk::Format::R8G8B8A8_UNORM),
        ])
        .unwrap();
        assert_eq!(chosen.format, vk::Format::R8G8B8A8_UNORM);
    }

    #[test]
    fn test_surface_format_undefined_means_any() {
        let chosen = choose_surface_format(&[srgb(vk::Format::UNDEFINED)]).unwrap();
        assert_eq!(chosen.format, vk::Format::B8G8R8A8_UNORM);
        assert_eq!(chosen.color_space, vk::ColorSpaceKHR::SRGB_NONLINEAR);
    }

    #[test]
    fn test_surface_format_falls_back_to_first() {
        let chosen = choose_surface_format(&[
            srgb(vk::Format::A2B10G10R10_UNORM_PACK32),
            srgb(vk::Format::R16G16B16A16_SFLOAT),
        ])
        .unwrap();
        assert_eq!(chosen.format, vk::Format::A2B10G10R10_UNORM_PACK32);

        assert!(matches!(
            choose_surface_format(&[]),
            Err(RhiError::SwapchainError(_))
        ));
    }

    #[test]
    fn test_present_mode_order() {
        use vk::PresentModeKHR as M;
        assert_eq!(choose_present_mode(&[M::FIFO, M::IMMEDIATE, M::MAILBOX]), M::MAILBOX);
        assert_eq!(choose_present_mode(&[M::FIFO, M::IMMEDIATE]), M::IMMEDIATE);
        assert_eq!(choose_present_mode(&[M::FIFO_RELAXED]), M::FIFO);
    }

    #[test]
    fn test_extent_uses_current_when_defined() {
        let caps = capabilities(2, 3);
        let extent = choose_extent(
            &caps,
            vk::Extent2D {
                width: 800,
                height: 600,
            },
        );
        assert_eq!(extent.width, 1280);
        assert_eq!(extent.height, 720);
    }

    #[test]
    fn test_extent_clamps_window_size() {
        let mut caps = capabilities(2, 3);
        caps.current_extent = vk::Extent2D {
            width: u32::MAX,
            height: u32::MAX,
        };
        caps.min_image_extent = vk::Extent2D {
            width: 100,
            height: 100,
        };
        caps.max_image_extent = vk::Extent2D {
            width: 2000,
            height: 2000,
        };

        let big = choose_extent(
            &caps,
            vk::Extent2D {
                width: 3000,
                height: 50,
            },
        );
        assert_eq!((big.width, big.height), (2000, 100));

        let inside = choose_extent(
            &caps,
            vk::Extent2D {
                width: 800,
                height: 600,
            },
        );
        assert_eq!((inside.width, inside.height), (800, 600));
    }

    #[test]
    fn test_image_count_targets_three() {
        assert_eq!(choose_image_count(&capabilities(2, 8)), 3);
        assert_eq!(choose_image_count(&capabilities(2, 2)), 2);
        assert_eq!(choose_image_count(&capabilities(4, 8)), 4);
        assert_eq!(choose_image_count(&capabilities(1, 0)), 3);
    }

    #[test]
    fn test_transform_and_alpha() {
        let mut caps = capabilities(2, 3);
        assert_eq!(
            choose_pre_transform(&caps),
            vk::SurfaceTransformFlagsKHR::IDENTITY
        );
        caps.supported_transforms = vk::SurfaceTransformFlagsKHR::ROTATE_90;
        caps.current_transform = vk::SurfaceTransformFlagsKHR::ROTATE_90;
        assert_eq!(
            choose_pre_transform(&caps),
            vk::SurfaceTransformFlagsKHR::ROTATE_90
        );

        assert_eq!(
            choose_composite_alpha(&caps),
            vk::CompositeAlphaFlagsKHR::OPAQUE
        );
        caps.supported_composite_alpha =
            vk::CompositeAlphaFlagsKHR::OPAQUE | vk::CompositeAlphaFlagsKHR::INHERIT;
        assert_eq!(
            choose_composite_alpha(&caps),
            vk::CompositeAlphaFlagsKHR::INHERIT
        );
        caps.supported_composite_alpha |= vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED;
        assert_eq!(
            choose_composite_alpha(&caps),
            vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED
        );
    }

    #[test]
    fn test_negotiate_sharing_mode() {
        let window = vk::Extent2D {
            width: 1280,
            height: 720,
        };
        let exclusive = SwapchainSettings::negotiate(&support(2, 3), window, SAME_FAMILY).unwrap();
        assert_eq!(exclusive.sharing_mode, vk::SharingMode::EXCLUSIVE);
        assert!(exclusive.sharing_families().is_empty());

        let split = QueueFamilyIndices {
            graphics: 0,
            present: 2,
        };
        let concurrent = SwapchainSettings::negotiate(&support(2, 3), window, split).unwrap();
        assert_eq!(concurrent.sharing_mode, vk::SharingMode::CONCURRENT);
        assert_eq!(concurrent.sharing_families(), &[0, 2]);
    }

    #[test]
    fn test_negotiate_rejects_missing_usage() {
        let mut surface = support(2, 3);
        surface.capabilities.supported_usage_flags = vk::ImageUsageFlags::COLOR_ATTACHMENT;
        let result = SwapchainSettings::negotiate(
            &surface,
            vk::Extent2D {
                width: 1,
                height: 1,
            },
            SAME_FAMILY,
        );
        assert!(matches!(result, Err(RhiError::SwapchainError(_))));
    }

    #[test]
    fn test_negotiate_is_deterministic() {
        let window = vk::Extent2D {
            width: 1280,
            height: 720,
        };
        for (min, max) in [(2, 2), (2, 3), (2, 4), (1, 0)] {
            let surface = support(min, max);
            let first = SwapchainSettings::negotiate(&surface, window, SAME_FAMILY).unwrap();
            let second = SwapchainSettings::negotiate(&surface, window, SAME_FAMILY).unwrap();

            assert_eq!(first.surface_format.format, second.surface_format.format);
            assert_eq!(
                first.surface_format.color_space,
                second.surface_format.color_space
            );
            assert_eq!(first.present_mode, second.present_mode);
            assert_eq!(first.image_count, second.image_count);
            assert_eq!(first.extent, second.extent);
            assert_eq!(first.image_usage, PRESENTABLE_USAGE);
        }
    }

    #[test]
    fn test_depth_format_prefers_d32() {
        let table = FormatTable(
            DEPTH_FORMAT_CANDIDATES
                .into_iter()
                .map(|f| (f, vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT))
                .collect(),
        );
        assert_eq!(choose_depth_format(&table).unwrap(), vk::Format::D32_SFLOAT);
    }

    #[test]
    fn test_depth_format_falls_back_to_d24_s8() {
        let table = FormatTable(HashMap::from([
            (
                vk::Format::D24_UNORM_S8_UINT,
                vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            ),
            // Sampled-only is not enough.
            (vk::Format::D32_SFLOAT, vk::FormatFeatureFlags::SAMPLED_IMAGE),
        ]));
        assert_eq!(
            choose_depth_format(&table).unwrap(),
            vk::Format::D24_UNORM_S8_UINT
        );
    }

    #[test]
    fn test_depth_format_none_supported() {
        let table = FormatTable(HashMap::new());
        assert!(matches!(
            choose_depth_format(&table),
            Err(RhiError::NoSupportedDepthFormat)
        ));
    }

    #[test]
    fn test_acquire_classification() {
        assert_eq!(
            classify_acquire(Ok((2, false))).unwrap(),
            AcquireOutcome::Acquired {
                image_index: 2,
                suboptimal: false
            }
        );
        assert_eq!(
            classify_acquire(Ok((1, true))).unwrap(),
            AcquireOutcome::Acquired {
                image_index: 1,
                suboptimal: true
            }
        );
        assert_eq!(
            classify_acquire(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap(),
            AcquireOutcome::NeedsRecreation
        );
        assert!(matches!(
            classify_acquire(Err(vk::Result::ERROR_SURFACE_LOST_KHR)),
            Err(RhiError::AcquireFailed(vk::Result::ERROR_SURFACE_LOST_KHR))
        ));
    }

    #[test]
    fn test_present_classification() {
        assert_eq!(
            classify_present(Ok(false)).unwrap(),
            PresentOutcome::Presented
        );
        assert_eq!(classify_present(Ok(true)).unwrap(), PresentOutcome::Stale);
        assert_eq!(
            classify_present(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap(),
            PresentOutcome::Stale
        );
        assert!(matches!(
            classify_present(Err(vk::Result::ERROR_DEVICE_LOST)),
            Err(RhiError::PresentFailed(vk::Result::ERROR_DEVICE_LOST))
        ));
    }

    #[test]
    fn stale_present_requests_recreation() {
        for raw in [Ok(true), Err(vk::Result::ERROR_OUT_OF_DATE_KHR)] {
            assert!(classify_present(raw).unwrap().needs_recreation());
        }
        assert!(!classify_present(Ok(false)).unwrap().needs_recreation());
    }
}
