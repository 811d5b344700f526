//! Composite pass: writes the G-buffer albedo into the acquired swapchain
//! image, draws overlays on top with the G-buffer depth, and leaves the
//! swapchain image ready to present.

use ash::vk;

use lumen_rhi::RhiResult;
use lumen_rhi::rendering::{Attachment, RenderingScope};

use super::{DrawSystem, FrameContext, RenderPass, draw_all, record_transitions};
use crate::gpu_resources::{GpuResourceState, Transition};

pub struct CompositePass {
    overlays: Vec<Box<dyn DrawSystem>>,
}

impl CompositePass {
    pub fn new(overlays: Vec<Box<dyn DrawSystem>>) -> Self {
        Self { overlays }
    }

    /// Albedo moves from its produced layout to transfer source; the
    /// swapchain image, freshly acquired, to transfer destination.
    pub fn copy_transitions(resources: &mut GpuResourceState) -> RhiResult<Vec<Transition>> {
        resources
            .albedo
            .require_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)?;

        let albedo = resources
            .albedo
            .declare(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)?;
        let swapchain = resources
            .swapchain_image()?
            .declare(vk::ImageLayout::TRANSFER_DST_OPTIMAL)?;
        Ok(albedo.into_iter().chain(swapchain).collect())
    }

    /// Overlays render over the copied image, depth-tested against the
    /// G-buffer depth.
    pub fn overlay_transitions(resources: &mut GpuResourceState) -> RhiResult<Vec<Transition>> {
        resources
            .depth
            .require_layout(vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL)?;
        Ok(resources
            .swapchain_image()?
            .declare(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)?
            .into_iter()
            .collect())
    }

    /// Only the swapchain image is this pass's output.
    pub fn present_transitions(resources: &mut GpuResourceState) -> RhiResult<Vec<Transition>> {
        Ok(resources
            .swapchain_image()?
            .declare(vk::ImageLayout::PRESENT_SRC_KHR)?
            .into_iter()
            .collect())
    }
}

impl RenderPass for CompositePass {
    fn name(&self) -> &'static str {
        "composite"
    }

    fn begin(&self, ctx: &FrameContext<'_>, resources: &mut GpuResourceState) -> RhiResult<()> {
        record_transitions(&ctx.cmd, &Self::copy_transitions(resources)?);

        let target_image = resources.swapchain_image()?.image();
        ctx.cmd.copy_image(
            resources.albedo.image(),
            target_image,
            ctx.extent,
            vk::ImageAspectFlags::COLOR,
        );

        record_transitions(&ctx.cmd, &Self::overlay_transitions(resources)?);

        let target = *resources.swapchain_image()?;
        let depth = &resources.depth;
        let scope = RenderingScope::new(ctx.extent)
            .color(Attachment::color(target.view(), target.layout()).load())
            .depth(Attachment::depth(depth.view(), depth.layout()).load());

        ctx.cmd.begin_rendering(&scope.info());
        ctx.cmd.set_viewport_and_scissor(ctx.extent);
        Ok(())
    }

    fn draw(&self, ctx: &FrameContext<'_>) -> RhiResult<()> {
        draw_all(&self.overlays, ctx)
    }

    fn end(&self, ctx: &FrameContext<'_>, resources: &mut GpuResourceState) -> RhiResult<()> {
        ctx.cmd.end_rendering();
        record_transitions(&ctx.cmd, &Self::present_transitions(resources)?);
        Ok(())
    }
}
