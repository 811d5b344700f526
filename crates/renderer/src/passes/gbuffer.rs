//! G-buffer pass: clears the albedo and depth targets and runs the object
//! draw systems into them.

use ash::vk;

use lumen_rhi::RhiResult;
use lumen_rhi::rendering::{Attachment, RenderingScope};

use super::{DrawSystem, FrameContext, RenderPass, draw_all, record_transitions};
use crate::gpu_resources::{GpuResourceState, Transition};

const CLEAR_COLOR: [f32; 4] = [0.01, 0.01, 0.02, 1.0];

pub struct GBufferPass {
    systems: Vec<Box<dyn DrawSystem>>,
    clear_color: [f32; 4],
}

impl GBufferPass {
    pub fn new(systems: Vec<Box<dyn DrawSystem>>) -> Self {
        Self {
            systems,
            clear_color: CLEAR_COLOR,
        }
    }

    pub fn with_clear_color(mut self, color: [f32; 4]) -> Self {
        self.clear_color = color;
        self
    }

    pub fn system_count(&self) -> usize {
        self.systems.len()
    }

    /// Both targets are cleared, so their previous contents are discarded.
    pub fn begin_transitions(resources: &mut GpuResourceState) -> RhiResult<Vec<Transition>> {
        resources.albedo.discard();
        resources.depth.discard();

        let albedo = resources
            .albedo
            .declare(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)?;
        let depth = resources
            .depth
            .declare(vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL)?;
        Ok(albedo.into_iter().chain(depth).collect())
    }
}

impl RenderPass for GBufferPass {
    fn name(&self) -> &'static str {
        "gbuffer"
    }

    fn begin(&self, ctx: &FrameContext<'_>, resources: &mut GpuResourceState) -> RhiResult<()> {
        let transitions = Self::begin_transitions(resources)?;
        record_transitions(&ctx.cmd, &transitions);

        let (albedo, depth) = (&resources.albedo, &resources.depth);
        let scope = RenderingScope::new(ctx.extent)
            .color(Attachment::color(albedo.view(), albedo.layout()).clear_color(self.clear_color))
            .depth(Attachment::depth(depth.view(), depth.layout()));

        ctx.cmd.begin_rendering(&scope.info());
        ctx.cmd.set_viewport_and_scissor(ctx.extent);
        Ok(())
    }

    fn draw(&self, ctx: &FrameContext<'_>) -> RhiResult<()> {
        draw_all(&self.systems, ctx)
    }

    /// The targets stay in attachment layouts; the composite moves them.
    fn end(&self, ctx: &FrameContext<'_>, _resources: &mut GpuResourceState) -> RhiResult<()> {
        ctx.cmd.end_rendering();
        Ok(())
    }
}
