//! Render pass orchestration.
//!
//! A pass runs three phases against the frame's command buffer:
//!
//! ```text
//! begin  image transitions, viewport/scissor, begin rendering
//! draw   delegate to the pass's draw systems
//! end    end rendering, hand results to the next consumer
//! ```
//!
//! Passes share a [`GpuResourceState`] and transition only what they
//! produce. A consumer moves a producer's output from its produced layout
//! into the layout it reads in.

mod composite;
mod gbuffer;
mod mesh;

pub use composite::CompositePass;
pub use gbuffer::GBufferPass;
pub use mesh::{MeshDrawSystem, cube_mesh};

use ash::vk;
use tracing::trace;

use lumen_rhi::RhiResult;
use lumen_rhi::arena::ResourceArena;
use lumen_rhi::barrier::BarrierMasks;
use lumen_rhi::command::CommandBuffer;

use crate::frame::FrameInfo;
use crate::gpu_resources::{GpuResourceState, Transition};

/// Everything a pass or draw system may read while recording one frame.
pub struct FrameContext<'a> {
    pub cmd: CommandBuffer<'a>,
    pub frame: &'a FrameInfo,
    pub extent: vk::Extent2D,
    /// Global uniforms of `frame.frame_index`.
    pub descriptor_set: vk::DescriptorSet,
    pub arena: &'a ResourceArena,
}

/// Records draws inside a pass's rendering scope.
pub trait DrawSystem {
    fn name(&self) -> &str;

    fn draw(&self, ctx: &FrameContext<'_>) -> RhiResult<()>;
}

/// One stage of the frame.
pub trait RenderPass {
    fn name(&self) -> &'static str;

    fn begin(&self, ctx: &FrameContext<'_>, resources: &mut GpuResourceState) -> RhiResult<()>;

    fn draw(&self, ctx: &FrameContext<'_>) -> RhiResult<()>;

    fn end(&self, ctx: &FrameContext<'_>, resources: &mut GpuResourceState) -> RhiResult<()>;

    /// Begin, draw, and end in order.
    fn record(&self, ctx: &FrameContext<'_>, resources: &mut GpuResourceState) -> RhiResult<()> {
        trace!("Recording {} pass", self.name());
        self.begin(ctx, resources)?;
        self.draw(ctx)?;
        self.end(ctx, resources)
    }
}

/// Passes in submission order.
#[derive(Default)]
pub struct PassSequence {
    passes: Vec<Box<dyn RenderPass>>,
}

impl PassSequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pass(mut self, pass: impl RenderPass + 'static) -> Self {
        self.passes.push(Box::new(pass));
        self
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    pub fn record(&self, ctx: &FrameContext<'_>, resources: &mut GpuResourceState) -> RhiResult<()> {
        for pass in &self.passes {
            pass.record(ctx, resources)?;
        }
        Ok(())
    }
}

pub(crate) fn draw_all(systems: &[Box<dyn DrawSystem>], ctx: &FrameContext<'_>) -> RhiResult<()> {
    for system in systems {
        trace!("Drawing {}", system.name());
        system.draw(ctx)?;
    }
    Ok(())
}

/// Transitions sharing a layout pair and masks.
#[derive(Debug)]
struct TransitionBatch {
    old: vk::ImageLayout,
    new: vk::ImageLayout,
    masks: BarrierMasks,
    targets: Vec<(vk::Image, vk::ImageSubresourceRange)>,
}

/// Group a phase's transitions into batches. A phase touches each image at
/// most once, so the batches may be recorded in any order.
fn batch_transitions(transitions: &[Transition]) -> Vec<TransitionBatch> {
    let mut batches: Vec<TransitionBatch> = Vec::new();
    for t in transitions {
        let target = (t.image, t.range);
        match batches
            .iter_mut()
            .find(|b| b.old == t.old && b.new == t.new && b.masks == t.masks)
        {
            Some(batch) => batch.targets.push(target),
            None => batches.push(TransitionBatch {
                old: t.old,
                new: t.new,
                masks: t.masks,
                targets: vec![target],
            }),
        }
    }
    batches
}

pub(crate) fn record_transitions(cmd: &CommandBuffer<'_>, transitions: &[Transition]) {
    for batch in batch_transitions(transitions) {
        cmd.transition_images(&batch.targets, batch.old, batch.new, &batch.masks);
    }
}

#[cfg(test)]
mod tests {
    use ash::vk::ImageLayout as L;
    use ash::vk::{AccessFlags, Handle, PipelineStageFlags};

    use lumen_rhi::arena::ImageOwner;
    use lumen_rhi::barrier::full_range;
    use lumen_rhi::swapchain::SwapchainImage;
    use lumen_rhi::sync::ACQUIRE_WAIT_STAGE;

    use super::*;
    use crate::gpu_resources::TrackedImage;

    const ALBEDO: u64 = 10;
    const DEPTH: u64 = 11;

    fn fake(raw: u64) -> SwapchainImage {
        SwapchainImage {
            index: raw as u32,
            image: vk::Image::from_raw(raw),
            view: vk::ImageView::from_raw(raw),
        }
    }

    fn target(name: &'static str, raw: u64, aspect: vk::ImageAspectFlags) -> TrackedImage {
        TrackedImage::new(
            name,
            ImageOwner::Borrowed,
            vk::Image::from_raw(raw),
            vk::ImageView::from_raw(raw),
            full_range(aspect),
        )
    }

    fn state() -> GpuResourceState {
        GpuResourceState::new(
            target("albedo", ALBEDO, vk::ImageAspectFlags::COLOR),
            target("depth", DEPTH, vk::ImageAspectFlags::DEPTH),
            vk::Extent2D {
                width: 4,
                height: 4,
            },
        )
    }

    /// All transitions of one frame, in recording order.
    fn frame_transitions(resources: &mut GpuResourceState, image: u64) -> Vec<Transition> {
        resources.bind_swapchain_image(fake(image));
        let mut all = GBufferPass::begin_transitions(resources).unwrap();
        all.extend(CompositePass::copy_transitions(resources).unwrap());
        all.extend(CompositePass::overlay_transitions(resources).unwrap());
        all.extend(CompositePass::present_transitions(resources).unwrap());
        resources.release_swapchain_image().unwrap();
        all
    }

    fn find(transitions: &[Transition], raw: u64) -> Transition {
        *transitions
            .iter()
            .find(|t| t.image == vk::Image::from_raw(raw))
            .unwrap()
    }

    #[test]
    fn every_pass_transition_has_masks() {
        let mut resources = state();
        let legitimately_empty = [L::UNDEFINED, L::PRESENT_SRC_KHR];

        for frame in 0..3 {
            for t in frame_transitions(&mut resources, frame % 2) {
                assert!(
                    t.masks.has_access()
                        || (legitimately_empty.contains(&t.old)
                            && legitimately_empty.contains(&t.new)),
                    "{:?} -> {:?} has no access masks",
                    t.old,
                    t.new
                );
                assert!(!t.masks.src_stage.is_empty());
                assert!(!t.masks.dst_stage.is_empty());
            }
        }
    }

    #[test]
    fn frame_layout_sequence() {
        let mut resources = state();
        let pairs: Vec<(vk::Image, L, L)> = frame_transitions(&mut resources, 1)
            .iter()
            .map(|t| (t.image, t.old, t.new))
            .collect();

        let albedo = vk::Image::from_raw(ALBEDO);
        let depth = vk::Image::from_raw(DEPTH);
        let swapchain = vk::Image::from_raw(1);
        assert_eq!(
            pairs,
            vec![
                (albedo, L::UNDEFINED, L::COLOR_ATTACHMENT_OPTIMAL),
                (depth, L::UNDEFINED, L::DEPTH_ATTACHMENT_OPTIMAL),
                (albedo, L::COLOR_ATTACHMENT_OPTIMAL, L::TRANSFER_SRC_OPTIMAL),
                (swapchain, L::UNDEFINED, L::TRANSFER_DST_OPTIMAL),
                (swapchain, L::TRANSFER_DST_OPTIMAL, L::COLOR_ATTACHMENT_OPTIMAL),
                (swapchain, L::COLOR_ATTACHMENT_OPTIMAL, L::PRESENT_SRC_KHR),
            ]
        );
    }

    #[test]
    fn swapchain_copy_is_ordered_after_acquire_wait() {
        let mut resources = state();
        for image in 0..3 {
            let transitions = frame_transitions(&mut resources, image);
            let first = find(&transitions, image);
            assert_eq!(first.new, L::TRANSFER_DST_OPTIMAL);
            assert!(first.masks.src_stage.contains(ACQUIRE_WAIT_STAGE));
            assert!(first.masks.dst_stage.contains(PipelineStageFlags::TRANSFER));
        }
    }

    #[test]
    fn next_frame_gbuffer_waits_for_previous_frame() {
        let mut resources = state();
        frame_transitions(&mut resources, 0);
        assert_eq!(resources.albedo.layout(), L::TRANSFER_SRC_OPTIMAL);
        assert_eq!(resources.depth.layout(), L::DEPTH_ATTACHMENT_OPTIMAL);

        let next = frame_transitions(&mut resources, 1);

        // Frame N's copy read albedo; frame N+1's clear writes it.
        let albedo = find(&next, ALBEDO);
        assert_eq!((albedo.old, albedo.new), (L::UNDEFINED, L::COLOR_ATTACHMENT_OPTIMAL));
        assert!(albedo.masks.src_stage.contains(PipelineStageFlags::TRANSFER));
        assert!(albedo.masks.src_access.contains(AccessFlags::TRANSFER_READ));

        // Frame N's composite depth-tested against depth; frame N+1 clears it.
        let depth = find(&next, DEPTH);
        assert_eq!((depth.old, depth.new), (L::UNDEFINED, L::DEPTH_ATTACHMENT_OPTIMAL));
        assert!(
            depth
                .masks
                .src_stage
                .contains(PipelineStageFlags::LATE_FRAGMENT_TESTS)
        );
        assert!(
            depth
                .masks
                .src_access
                .contains(AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE)
        );
    }

    #[test]
    fn composite_leaves_albedo_out_of_present() {
        let mut resources = state();
        let transitions = frame_transitions(&mut resources, 0);
        assert!(
            transitions
                .iter()
                .all(|t| t.image != vk::Image::from_raw(ALBEDO) || t.new != L::PRESENT_SRC_KHR)
        );
        assert_eq!(resources.albedo.layout(), L::TRANSFER_SRC_OPTIMAL);
    }

    #[test]
    fn composite_requires_gbuffer_output() {
        let mut resources = state();
        resources.bind_swapchain_image(fake(0));
        assert!(CompositePass::copy_transitions(&mut resources).is_err());
    }

    #[test]
    fn matching_transitions_share_one_batch() {
        let mut a = target("a", 1, vk::ImageAspectFlags::COLOR);
        let mut b = target("b", 2, vk::ImageAspectFlags::COLOR);
        let mut c = target("c", 3, vk::ImageAspectFlags::DEPTH);
        let transitions: Vec<Transition> = [
            a.declare(L::COLOR_ATTACHMENT_OPTIMAL),
            c.declare(L::DEPTH_ATTACHMENT_OPTIMAL),
            b.declare(L::COLOR_ATTACHMENT_OPTIMAL),
        ]
        .into_iter()
        .map(|t| t.unwrap().unwrap())
        .collect();

        let batches = batch_transitions(&transitions);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].new, L::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(
            batches[0].targets.iter().map(|t| t.0).collect::<Vec<_>>(),
            vec![vk::Image::from_raw(1), vk::Image::from_raw(2)]
        );
        assert_eq!(batches[1].targets.len(), 1);
        assert_eq!(batches[1].targets[0].1.aspect_mask, vk::ImageAspectFlags::DEPTH);
    }

    #[test]
    fn different_masks_split_batches() {
        let mut fresh = target("fresh", 1, vk::ImageAspectFlags::COLOR);
        let mut reused = target("reused", 2, vk::ImageAspectFlags::COLOR);
        reused.declare(L::TRANSFER_SRC_OPTIMAL).unwrap();
        reused.discard();

        let transitions = [
            fresh.declare(L::COLOR_ATTACHMENT_OPTIMAL).unwrap().unwrap(),
            reused.declare(L::COLOR_ATTACHMENT_OPTIMAL).unwrap().unwrap(),
        ];
        // Same layouts, but the reused image must wait on its transfer read.
        assert_eq!(transitions[0].old, transitions[1].old);
        assert_eq!(batch_transitions(&transitions).len(), 2);
    }

    #[test]
    fn pass_sequence_keeps_order() {
        let passes = PassSequence::new()
            .with_pass(GBufferPass::new(Vec::new()))
            .with_pass(CompositePass::new(Vec::new()));
        assert_eq!(passes.names(), vec!["gbuffer", "composite"]);
    }
}
