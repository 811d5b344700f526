//! Per-frame global uniforms.
//!
//! One uniform buffer and one descriptor set per frame-in-flight slot. The
//! frame driver writes a slot's buffer right before recording into that slot,
//! after its fence wait, so the GPU never reads a buffer the host is writing.

use std::mem::size_of;
use std::sync::Arc;

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use tracing::debug;

use lumen_rhi::RhiResult;
use lumen_rhi::arena::{BufferHandle, ResourceArena};
use lumen_rhi::descriptor::{DescriptorPool, write_uniform_buffer};
use lumen_rhi::device::Device;
use lumen_rhi::memory::{Buffer, BufferUsage};

use crate::frame::PerFrame;

/// Camera matrices shared by every draw of a frame.
///
/// Matches the shader's `GlobalUbo` block (set 0, binding 0).
///
/// # Memory Layout
///
/// - Offset 0: projection (64 bytes)
/// - Offset 64: view (64 bytes)
/// - Offset 128: inverse view (64 bytes)
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct GlobalUbo {
    pub projection: Mat4,
    pub view: Mat4,
    pub inverse_view: Mat4,
}

impl GlobalUbo {
    pub const SIZE: usize = size_of::<Self>();

    pub fn new(projection: Mat4, view: Mat4) -> Self {
        Self {
            projection,
            view,
            inverse_view: view.inverse(),
        }
    }
}

impl From<(Mat4, Mat4)> for GlobalUbo {
    fn from((projection, view): (Mat4, Mat4)) -> Self {
        Self::new(projection, view)
    }
}

/// A slot's uniform buffer and the descriptor set pointing at it.
#[derive(Debug, Clone, Copy)]
pub struct FrameUniforms {
    pub buffer: BufferHandle,
    pub descriptor_set: vk::DescriptorSet,
}

impl FrameUniforms {
    /// Allocate a uniform buffer and descriptor set for every slot.
    ///
    /// # Errors
    ///
    /// Returns an error if buffer creation or set allocation fails.
    pub fn create(
        device: &Arc<Device>,
        arena: &mut ResourceArena,
        pool: &mut DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> RhiResult<PerFrame<Self>> {
        let size = GlobalUbo::SIZE as vk::DeviceSize;
        let uniforms = PerFrame::try_new(|_slot| -> RhiResult<Self> {
            let buffer = Buffer::new(device.clone(), BufferUsage::Uniform, size)?;
            let raw = buffer.handle();
            let buffer = arena.insert_buffer(buffer);

            let descriptor_set = pool.allocate(layout)?;
            write_uniform_buffer(device, descriptor_set, 0, raw, size);

            Ok(Self {
                buffer,
                descriptor_set,
            })
        })?;

        debug!("Created {} per-frame uniform sets", uniforms.len());
        Ok(uniforms)
    }

    /// Copy `ubo` into this slot's buffer.
    pub fn write(&self, arena: &ResourceArena, ubo: &GlobalUbo) -> RhiResult<()> {
        arena.buffer(self.buffer)?.upload(std::slice::from_ref(ubo))
    }
}
