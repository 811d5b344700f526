//! Descriptor set layouts and per-slot uniform sets.
//!
//! Sets are allocated once per frame-in-flight slot. A pool is sized by the
//! slot count, never by the swapchain image count, so recreating the
//! swapchain never touches descriptors.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

pub struct DescriptorSetLayout {
    device: Arc<Device>,
    layout: vk::DescriptorSetLayout,
}

impl DescriptorSetLayout {
    /// Layout with a single uniform buffer at `binding`.
    ///
    /// # Errors
    ///
    /// Returns an error if layout creation fails.
    pub fn uniform(
        device: Arc<Device>,
        binding: u32,
        stages: vk::ShaderStageFlags,
    ) -> RhiResult<Self> {
        let bindings = [uniform_buffer_binding(binding, stages)];
        let info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
        let layout = unsafe { device.handle().create_descriptor_set_layout(&info, None)? };
        debug!("Uniform set layout: binding {binding}, stages {stages:?}");
        Ok(Self { device, layout })
    }

    #[inline]
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

/// Pool of uniform-buffer sets, one per slot. Sets die with the pool.
pub struct DescriptorPool {
    device: Arc<Device>,
    pool: vk::DescriptorPool,
    capacity: u32,
    allocated: u32,
}

impl DescriptorPool {
    /// # Errors
    ///
    /// Returns an error if pool creation fails.
    pub fn for_uniform_sets(device: Arc<Device>, slots: u32) -> RhiResult<Self> {
        let sizes = [vk::DescriptorPoolSize::default()
            .ty(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(slots)];
        let info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(slots)
            .pool_sizes(&sizes);
        let pool = unsafe { device.handle().create_descriptor_pool(&info, None)? };
        debug!("Descriptor pool for {slots} uniform set(s)");

        Ok(Self {
            device,
            pool,
            capacity: slots,
            allocated: 0,
        })
    }

    /// Allocate one set with `layout`.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidArgument`] once every slot has its set, or a
    /// Vulkan error if allocation fails.
    pub fn allocate(&mut self, layout: vk::DescriptorSetLayout) -> RhiResult<vk::DescriptorSet> {
        check_capacity(self.allocated, self.capacity)?;

        let layouts = [layout];
        let info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pool)
            .set_layouts(&layouts);
        let set = unsafe { self.device.handle().allocate_descriptor_sets(&info)? }
            .into_iter()
            .next()
            .ok_or_else(|| RhiError::InvalidArgument("driver returned no set".to_string()))?;

        self.allocated += 1;
        Ok(set)
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_descriptor_pool(self.pool, None);
        }
    }
}

fn check_capacity(allocated: u32, capacity: u32) -> RhiResult<()> {
    if allocated >= capacity {
        return Err(RhiError::InvalidArgument(format!(
            "descriptor pool exhausted ({capacity} set(s))"
        )));
    }
    Ok(())
}

pub fn uniform_buffer_binding(
    binding: u32,
    stages: vk::ShaderStageFlags,
) -> vk::DescriptorSetLayoutBinding<'static> {
    vk::DescriptorSetLayoutBinding::default()
        .binding(binding)
        .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
        .descriptor_count(1)
        .stage_flags(stages)
}

/// Point `binding` of `set` at the first `range` bytes of `buffer`.
///
/// The set must not be referenced by a pending submission.
pub fn write_uniform_buffer(
    device: &Device,
    set: vk::DescriptorSet,
    binding: u32,
    buffer: vk::Buffer,
    range: vk::DeviceSize,
) {
    let infos = [vk::DescriptorBufferInfo::default()
        .buffer(buffer)
        .offset(0)
        .range(range)];
    let write = vk::WriteDescriptorSet::default()
        .dst_set(set)
        .dst_binding(binding)
        .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
        .buffer_info(&infos);

    unsafe {
        device.handle().update_descriptor_sets(&[write], &[]);
    }
}
