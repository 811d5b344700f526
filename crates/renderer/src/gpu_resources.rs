//! GPU resource state threaded through the render passes.
//!
//! Every image a pass touches is a [`TrackedImage`]: the raw handle paired
//! with the layout the last recorded barrier left it in. Passes move images
//! only through [`TrackedImage::declare`], so a later pass always knows the
//! real layout of an earlier pass's output.
//!
//! The G-buffer targets are shared by every frame in flight. Their barriers
//! therefore always take the source half of the masks from the layout the
//! previous frame really left them in, even when the contents are discarded.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use lumen_rhi::arena::{ImageHandle, ImageOwner, ResourceArena};
use lumen_rhi::barrier::{self, BarrierMasks};
use lumen_rhi::device::Device;
use lumen_rhi::memory::{Image, ImageDesc};
use lumen_rhi::swapchain::{Swapchain, SwapchainImage};
use lumen_rhi::sync::ACQUIRE_WAIT_STAGE;
use lumen_rhi::{RhiError, RhiResult};

/// One layout change, with the masks the barrier table derived for it.
///
/// `old` is the layout written into the barrier. It is `UNDEFINED` when the
/// contents are discarded, while `masks` still order after the image's
/// previous use.
#[derive(Debug, Clone, Copy)]
pub struct Transition {
    pub image: vk::Image,
    pub range: vk::ImageSubresourceRange,
    pub old: vk::ImageLayout,
    pub new: vk::ImageLayout,
    pub masks: BarrierMasks,
}

/// An image plus its declared current layout.
#[derive(Debug, Clone, Copy)]
pub struct TrackedImage {
    name: &'static str,
    owner: ImageOwner,
    image: vk::Image,
    view: vk::ImageView,
    range: vk::ImageSubresourceRange,
    layout: vk::ImageLayout,
    discard_contents: bool,
    /// Source stage for the first barrier of a freshly acquired image.
    acquire_stage: Option<vk::PipelineStageFlags>,
}

impl TrackedImage {
    /// An image whose contents start undefined.
    pub fn new(
        name: &'static str,
        owner: ImageOwner,
        image: vk::Image,
        view: vk::ImageView,
        range: vk::ImageSubresourceRange,
    ) -> Self {
        Self {
            name,
            owner,
            image,
            view,
            range,
            layout: vk::ImageLayout::UNDEFINED,
            discard_contents: false,
            acquire_stage: None,
        }
    }

    pub fn owned(name: &'static str, handle: ImageHandle, image: &Image) -> Self {
        Self::new(
            name,
            ImageOwner::Owned(handle),
            image.handle(),
            image.view(),
            image.desc().subresource_range(),
        )
    }

    /// A swapchain image just acquired for this frame.
    ///
    /// Its first barrier waits at [`ACQUIRE_WAIT_STAGE`], the stage the
    /// submission waits on the image-available semaphore.
    pub fn acquired(name: &'static str, image: SwapchainImage) -> Self {
        Self {
            acquire_stage: Some(ACQUIRE_WAIT_STAGE),
            ..Self::new(
                name,
                ImageOwner::Borrowed,
                image.image,
                image.view,
                barrier::full_range(vk::ImageAspectFlags::COLOR),
            )
        }
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[inline]
    pub fn owner(&self) -> ImageOwner {
        self.owner
    }

    #[inline]
    pub fn image(&self) -> vk::Image {
        self.image
    }

    #[inline]
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    #[inline]
    pub fn range(&self) -> vk::ImageSubresourceRange {
        self.range
    }

    #[inline]
    pub fn layout(&self) -> vk::ImageLayout {
        self.layout
    }

    /// Declare the move to `new` and return the barrier it needs.
    ///
    /// Returns `None` when the image is already in `new` and its contents are
    /// kept. Nothing changes on error.
    ///
    /// # Errors
    ///
    /// [`RhiError::UnsupportedLayout`] for `GENERAL` or an untabled layout.
    pub fn declare(&mut self, new: vk::ImageLayout) -> RhiResult<Option<Transition>> {
        if self.layout == new && !self.discard_contents {
            return Ok(None);
        }
        let mut masks = barrier::derive_masks(self.layout, new)?;
        if self.layout == vk::ImageLayout::UNDEFINED
            && let Some(stage) = self.acquire_stage.take()
        {
            masks.src_stage = stage;
        }

        let old = if std::mem::take(&mut self.discard_contents) {
            vk::ImageLayout::UNDEFINED
        } else {
            self.layout
        };
        let transition = Transition {
            image: self.image,
            range: self.range,
            old,
            new,
            masks,
        };
        self.layout = new;
        Ok(Some(transition))
    }

    /// Fail unless the declared layout is `expected`.
    pub fn require_layout(&self, expected: vk::ImageLayout) -> RhiResult<()> {
        if self.layout == expected {
            Ok(())
        } else {
            Err(RhiError::InvalidArgument(format!(
                "{} is in {:?}, expected {:?}",
                self.name, self.layout, expected
            )))
        }
    }

    /// Drop the contents. The next barrier is written from `UNDEFINED` but
    /// still waits for the image's last use.
    #[inline]
    pub fn discard(&mut self) {
        self.discard_contents = true;
    }
}

/// Images shared between the G-buffer and composite passes.
#[derive(Debug)]
pub struct GpuResourceState {
    /// G-buffer color target. Same format and extent as the swapchain.
    pub albedo: TrackedImage,
    /// The swapchain's depth target.
    pub depth: TrackedImage,
    extent: vk::Extent2D,
    swapchain_image: Option<TrackedImage>,
}

impl GpuResourceState {
    pub fn new(albedo: TrackedImage, depth: TrackedImage, extent: vk::Extent2D) -> Self {
        Self {
            albedo,
            depth,
            extent,
            swapchain_image: None,
        }
    }

    /// Create the albedo target and pick up the swapchain's depth image.
    ///
    /// # Errors
    ///
    /// Returns an error if the albedo image cannot be created or the depth
    /// handle is stale.
    pub fn create(
        device: &Arc<Device>,
        arena: &mut ResourceArena,
        swapchain: &Swapchain,
    ) -> RhiResult<Self> {
        let extent = swapchain.extent();
        let desc = ImageDesc::attachment(
            swapchain.format(),
            extent,
            vk::ImageUsageFlags::COLOR_ATTACHMENT
                | vk::ImageUsageFlags::TRANSFER_SRC
                | vk::ImageUsageFlags::SAMPLED,
            vk::ImageAspectFlags::COLOR,
        );
        let albedo_handle = arena.insert_image(Image::new(device.clone(), desc)?);
        let albedo = TrackedImage::owned("albedo", albedo_handle, arena.image(albedo_handle)?);

        let depth_handle = swapchain.depth_image();
        let depth = TrackedImage::owned("depth", depth_handle, arena.image(depth_handle)?);

        debug!(
            "G-buffer targets created: {}x{} {:?}",
            extent.width,
            extent.height,
            swapchain.format()
        );

        Ok(Self::new(albedo, depth, extent))
    }

    /// Destroy the images this state owns. The depth image belongs to the
    /// swapchain and is left alone.
    pub fn destroy(&mut self, arena: &mut ResourceArena) -> RhiResult<()> {
        if let ImageOwner::Owned(handle) = self.albedo.owner() {
            arena.destroy_image(handle)?;
        }
        self.swapchain_image = None;
        Ok(())
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Track the image acquired for this frame.
    pub fn bind_swapchain_image(&mut self, image: SwapchainImage) {
        self.swapchain_image = Some(TrackedImage::acquired("swapchain", image));
    }

    /// # Errors
    ///
    /// [`RhiError::InvalidArgument`] outside of a frame.
    pub fn swapchain_image(&mut self) -> RhiResult<&mut TrackedImage> {
        self.swapchain_image
            .as_mut()
            .ok_or_else(|| RhiError::InvalidArgument("no swapchain image bound".to_string()))
    }

    /// End the frame's use of the swapchain image, which must be ready to
    /// present.
    pub fn release_swapchain_image(&mut self) -> RhiResult<()> {
        let image = self.swapchain_image.take().ok_or_else(|| {
            RhiError::InvalidArgument("no swapchain image bound".to_string())
        })?;
        image.require_layout(vk::ImageLayout::PRESENT_SRC_KHR)
    }
}
