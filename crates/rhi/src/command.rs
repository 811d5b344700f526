//! Command pools and recording.
//!
//! The swapchain owns one resettable [`CommandPool`] and one primary buffer
//! per swapchain image. Passes record through [`CommandBuffer`], a copyable
//! view that never frees the handle it wraps.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::barrier::{self, BarrierMasks};
use crate::device::Device;
use crate::error::RhiResult;

/// Pool created with `RESET_COMMAND_BUFFER` so each buffer is re-recorded on
/// its own. Record from one thread.
pub struct CommandPool {
    device: Arc<Device>,
    pool: vk::CommandPool,
}

impl CommandPool {
    /// # Errors
    ///
    /// Returns an error if pool creation fails.
    pub fn new(device: Arc<Device>, queue_family: u32) -> RhiResult<Self> {
        let info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let pool = unsafe { device.handle().create_command_pool(&info, None)? };
        debug!("Command pool on queue family {queue_family}");
        Ok(Self { device, pool })
    }

    /// Allocate `count` primary buffers.
    pub fn allocate(&self, count: u32) -> RhiResult<Vec<vk::CommandBuffer>> {
        let info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);
        Ok(unsafe { self.device.handle().allocate_command_buffers(&info)? })
    }

    /// Return buffers to the pool. None of them may be pending.
    pub fn free(&self, buffers: &[vk::CommandBuffer]) {
        if !buffers.is_empty() {
            unsafe { self.device.handle().free_command_buffers(self.pool, buffers) };
        }
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_command_pool(self.pool, None);
        }
    }
}

/// Recording view over a command buffer owned by a [`CommandPool`].
///
/// Copyable and cheap; it does not free the handle.
#[derive(Clone, Copy)]
pub struct CommandBuffer<'a> {
    device: &'a Device,
    buffer: vk::CommandBuffer,
}

impl<'a> CommandBuffer<'a> {
    #[inline]
    pub fn new(device: &'a Device, buffer: vk::CommandBuffer) -> Self {
        Self { device, buffer }
    }

    #[inline]
    pub fn handle(&self) -> vk::CommandBuffer {
        self.buffer
    }

    /// Resets the buffer and begins one-time-submit recording.
    ///
    /// # Errors
    ///
    /// Returns an error if the reset or begin call fails.
    pub fn begin(&self) -> RhiResult<()> {
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        unsafe {
            let device = self.device.handle();
            device.reset_command_buffer(self.buffer, vk::CommandBufferResetFlags::empty())?;
            device.begin_command_buffer(self.buffer, &begin_info)?;
        }

        Ok(())
    }

    /// Ends recording. After this the buffer is ready for submission.
    pub fn end(&self) -> RhiResult<()> {
        unsafe {
            self.device.handle().end_command_buffer(self.buffer)?;
        }

        Ok(())
    }

    pub fn begin_rendering(&self, rendering_info: &vk::RenderingInfo) {
        unsafe {
            self.device
                .handle()
                .cmd_begin_rendering(self.buffer, rendering_info);
        }
    }

    pub fn end_rendering(&self) {
        unsafe {
            self.device.handle().cmd_end_rendering(self.buffer);
        }
    }

    pub fn bind_graphics_pipeline(&self, pipeline: vk::Pipeline) {
        let device = self.device.handle();
        unsafe { device.cmd_bind_pipeline(self.buffer, vk::PipelineBindPoint::GRAPHICS, pipeline) };
    }

    /// Bind `set` at set index 0 of a graphics layout.
    pub fn bind_global_set(&self, layout: vk::PipelineLayout, set: vk::DescriptorSet) {
        let device = self.device.handle();
        unsafe {
            device.cmd_bind_descriptor_sets(
                self.buffer,
                vk::PipelineBindPoint::GRAPHICS,
                layout,
                0,
                &[set],
                &[],
            );
        }
    }

    /// Bind a vertex buffer at binding 0 and an index buffer, both from offset 0.
    pub fn bind_mesh(&self, vertices: vk::Buffer, indices: vk::Buffer, index_type: vk::IndexType) {
        let device = self.device.handle();
        unsafe {
            device.cmd_bind_vertex_buffers(self.buffer, 0, &[vertices], &[0]);
            device.cmd_bind_index_buffer(self.buffer, indices, 0, index_type);
        }
    }

    /// Sets viewport 0 and scissor 0 to cover `extent`.
    pub fn set_viewport_and_scissor(&self, extent: vk::Extent2D) {
        let (viewport, scissor) = covering_viewport(extent);
        unsafe {
            let device = self.device.handle();
            device.cmd_set_viewport(self.buffer, 0, &[viewport]);
            device.cmd_set_scissor(self.buffer, 0, &[scissor]);
        }
    }

    /// Single-instance non-indexed draw.
    pub fn draw(&self, vertex_count: u32) {
        unsafe { self.device.handle().cmd_draw(self.buffer, vertex_count, 1, 0, 0) };
    }

    /// Single-instance indexed draw of the bound mesh.
    pub fn draw_indexed(&self, index_count: u32) {
        unsafe {
            self.device
                .handle()
                .cmd_draw_indexed(self.buffer, index_count, 1, 0, 0, 0);
        }
    }

    /// Pushes a plain-data constant block.
    pub fn push_constants<T: bytemuck::Pod>(
        &self,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        data: &T,
    ) {
        unsafe {
            self.device.handle().cmd_push_constants(
                self.buffer,
                layout,
                stages,
                0,
                bytemuck::bytes_of(data),
            );
        }
    }

    /// One barrier call moving every target between the same pair of
    /// layouts.
    pub fn transition_images(
        &self,
        targets: &[(vk::Image, vk::ImageSubresourceRange)],
        old: vk::ImageLayout,
        new: vk::ImageLayout,
        masks: &BarrierMasks,
    ) {
        barrier::cmd_transition_batch(self.device.handle(), self.buffer, targets, old, new, masks);
    }

    /// Copies mip 0 / layer 0 of `src` into `dst` over `extent`.
    ///
    /// `src` must be in `TRANSFER_SRC_OPTIMAL` and `dst` in
    /// `TRANSFER_DST_OPTIMAL`.
    pub fn copy_image(
        &self,
        src: vk::Image,
        dst: vk::Image,
        extent: vk::Extent2D,
        aspect: vk::ImageAspectFlags,
    ) {
        let region = full_copy_region(extent, aspect);
        unsafe {
            self.device.handle().cmd_copy_image(
                self.buffer,
                src,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                dst,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }
    }
}

/// Viewport with a `[0, 1]` depth range and matching scissor over `extent`.
fn covering_viewport(extent: vk::Extent2D) -> (vk::Viewport, vk::Rect2D) {
    let viewport = vk::Viewport::default()
        .width(extent.width as f32)
        .height(extent.height as f32)
        .max_depth(1.0);
    let scissor = vk::Rect2D {
        offset: vk::Offset2D::default(),
        extent,
    };
    (viewport, scissor)
}

fn full_copy_region(extent: vk::Extent2D, aspect: vk::ImageAspectFlags) -> vk::ImageCopy {
    let layers = vk::ImageSubresourceLayers {
        aspect_mask: aspect,
        mip_level: 0,
        base_array_layer: 0,
        layer_count: 1,
    };
    vk::ImageCopy {
        src_subresource: layers,
        src_offset: vk::Offset3D::default(),
        dst_subresource: layers,
        dst_offset: vk::Offset3D::default(),
        extent: vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn viewport_covers_extent() {
        let extent = vk::Extent2D {
            width: 800,
            height: 600,
        };
        let (viewport, scissor) = covering_viewport(extent);
        assert_eq!((viewport.x, viewport.y), (0.0, 0.0));
        assert_eq!(viewport.width, 800.0);
        assert_eq!(viewport.height, 600.0);
        assert_eq!((viewport.min_depth, viewport.max_depth), (0.0, 1.0));
        assert_eq!(scissor.extent, extent);
    }

    #[test]
    fn copy_region_is_single_layer() {
        let region = full_copy_region(
            vk::Extent2D {
                width: 64,
                height: 32,
            },
            vk::ImageAspectFlags::COLOR,
        );
        assert_eq!(region.extent.depth, 1);
        assert_eq!(region.extent.width, 64);
        assert_eq!(region.src_subresource.layer_count, 1);
        assert_eq!(region.dst_subresource.aspect_mask, vk::ImageAspectFlags::COLOR);
    }
}
