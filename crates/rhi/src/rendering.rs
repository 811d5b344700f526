//! Dynamic rendering scopes (Vulkan 1.3).
//!
//! A [`RenderingScope`] owns the attachment infos that `VkRenderingInfo`
//! points at, so the info stays valid for as long as the scope is alive.
//! Each [`Attachment`] carries the layout its image was declared in by the
//! pass that opens the scope.
//!
//! ```no_run
//! use ash::vk;
//! use lumen_rhi::command::CommandBuffer;
//! use lumen_rhi::rendering::{Attachment, RenderingScope};
//!
//! # fn example(color: vk::ImageView, depth: vk::ImageView, cmd: &CommandBuffer, extent: vk::Extent2D) {
//! let scope = RenderingScope::new(extent)
//!     .color(Attachment::color(color, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL).clear_color([0.1, 0.1, 0.1, 1.0]))
//!     .depth(Attachment::depth(depth, vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL));
//!
//! cmd.begin_rendering(&scope.info());
//! cmd.end_rendering();
//! # }
//! ```

use ash::vk;

/// What happens to an attachment's contents when the scope opens.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum LoadBehavior {
    ClearColor([f32; 4]),
    ClearDepth(f32),
    /// Keep what a previous scope stored.
    Load,
}

impl LoadBehavior {
    fn op(self) -> vk::AttachmentLoadOp {
        match self {
            Self::ClearColor(_) | Self::ClearDepth(_) => vk::AttachmentLoadOp::CLEAR,
            Self::Load => vk::AttachmentLoadOp::LOAD,
        }
    }

    fn clear_value(self) -> vk::ClearValue {
        match self {
            Self::ClearColor(float32) => vk::ClearValue {
                color: vk::ClearColorValue { float32 },
            },
            Self::ClearDepth(depth) => vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue { depth, stencil: 0 },
            },
            Self::Load => vk::ClearValue::default(),
        }
    }
}

/// One image bound into a rendering scope. Contents are always stored.
#[derive(Clone, Copy, Debug)]
pub struct Attachment {
    pub view: vk::ImageView,
    pub layout: vk::ImageLayout,
    pub load: LoadBehavior,
}

impl Attachment {
    /// Color target cleared to opaque black.
    pub fn color(view: vk::ImageView, layout: vk::ImageLayout) -> Self {
        Self {
            view,
            layout,
            load: LoadBehavior::ClearColor([0.0, 0.0, 0.0, 1.0]),
        }
    }

    /// Depth target cleared to the far plane.
    pub fn depth(view: vk::ImageView, layout: vk::ImageLayout) -> Self {
        Self {
            view,
            layout,
            load: LoadBehavior::ClearDepth(1.0),
        }
    }

    pub fn clear_color(mut self, rgba: [f32; 4]) -> Self {
        self.load = LoadBehavior::ClearColor(rgba);
        self
    }

    pub fn load(mut self) -> Self {
        self.load = LoadBehavior::Load;
        self
    }

    fn info(&self) -> vk::RenderingAttachmentInfo<'static> {
        vk::RenderingAttachmentInfo::default()
            .image_view(self.view)
            .image_layout(self.layout)
            .load_op(self.load.op())
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(self.load.clear_value())
    }
}

/// Render area and attachments of one `vkCmdBeginRendering` call.
pub struct RenderingScope {
    area: vk::Rect2D,
    colors: Vec<vk::RenderingAttachmentInfo<'static>>,
    depth: Option<vk::RenderingAttachmentInfo<'static>>,
}

impl RenderingScope {
    pub fn new(extent: vk::Extent2D) -> Self {
        Self {
            area: vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent,
            },
            colors: Vec::new(),
            depth: None,
        }
    }

    pub fn color(mut self, attachment: Attachment) -> Self {
        self.colors.push(attachment.info());
        self
    }

    pub fn depth(mut self, attachment: Attachment) -> Self {
        self.depth = Some(attachment.info());
        self
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.area.extent
    }

    /// Borrowing info for `vkCmdBeginRendering`.
    pub fn info(&self) -> vk::RenderingInfo<'_> {
        let info = vk::RenderingInfo::default()
            .render_area(self.area)
            .layer_count(1)
            .color_attachments(&self.colors);
        match &self.depth {
            Some(depth) => info.depth_attachment(depth),
            None => info,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    #[test]
    fn cleared_color_uses_clear_op() {
        let scope = RenderingScope::new(extent(4, 4)).color(
            Attachment::color(vk::ImageView::null(), vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                .clear_color([0.1, 0.2, 0.3, 1.0]),
        );
        let info = scope.info();
        assert_eq!(info.color_attachment_count, 1);

        let color = scope.colors[0];
        assert_eq!(color.load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(color.store_op, vk::AttachmentStoreOp::STORE);
        assert_eq!(unsafe { color.clear_value.color.float32 }, [0.1, 0.2, 0.3, 1.0]);
    }

    #[test]
    fn loaded_attachments_keep_declared_layout() {
        let scope = RenderingScope::new(extent(1920, 1080))
            .color(
                Attachment::color(vk::ImageView::null(), vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                    .load(),
            )
            .depth(
                Attachment::depth(vk::ImageView::null(), vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL)
                    .load(),
            );

        let depth = scope.depth.as_ref().map(|d| (d.load_op, d.image_layout));
        assert_eq!(
            depth,
            Some((
                vk::AttachmentLoadOp::LOAD,
                vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL
            ))
        );
        assert_eq!(scope.colors[0].load_op, vk::AttachmentLoadOp::LOAD);
        assert_eq!(scope.info().render_area.extent.width, 1920);
    }

    #[test]
    fn depth_clears_to_far_plane() {
        let attachment =
            Attachment::depth(vk::ImageView::null(), vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL);
        assert_eq!(attachment.load, LoadBehavior::ClearDepth(1.0));
        let info = attachment.info();
        assert_eq!(unsafe { info.clear_value.depth_stencil.depth }, 1.0);
    }

    #[test]
    fn scope_without_depth_has_null_pointer() {
        let scope = RenderingScope::new(extent(8, 8))
            .color(Attachment::color(vk::ImageView::null(), vk::ImageLayout::GENERAL));
        assert!(scope.info().p_depth_attachment.is_null());
        assert_eq!(scope.extent(), extent(8, 8));
    }
}
