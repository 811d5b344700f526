//! Frame driver.
//!
//! [`Renderer`] owns every Vulkan object and runs one frame per
//! [`Renderer::render_frame`] call:
//!
//! ```text
//! begin_frame -> write slot uniforms -> G-buffer -> composite -> end_frame
//! ```

use std::path::Path;
use std::sync::Arc;

use ash::vk;
use tracing::{debug, error, info};

use lumen_core::AppConfig;
use lumen_platform::{Surface, Window};
use lumen_rhi::arena::ResourceArena;
use lumen_rhi::command::CommandBuffer;
use lumen_rhi::descriptor::{DescriptorPool, DescriptorSetLayout};
use lumen_rhi::device::Device;
use lumen_rhi::instance::{Instance, InstanceDesc};
use lumen_rhi::physical_device::{DeviceRequirements, select_physical_device};
use lumen_rhi::swapchain::Swapchain;
use lumen_rhi::sync::FrameSync;

use crate::error::RenderResult;
use crate::frame::{FrameInfo, MAX_FRAMES_IN_FLIGHT, PerFrame};
use crate::frame_ring::{BeginFrame, FrameRing, VulkanFrameBackend};
use crate::gpu_resources::GpuResourceState;
use crate::passes::{
    CompositePass, DrawSystem, FrameContext, GBufferPass, MeshDrawSystem, PassSequence,
};
use crate::ubo::{FrameUniforms, GlobalUbo};

/// Directory the mesh shaders are loaded from.
pub const SHADER_DIR: &str = "shaders";

/// Top-level renderer.
///
/// # Resource Destruction Order
///
/// Fields drop in declaration order after `Drop::drop` has waited for the
/// device to go idle:
///
/// 1. Passes and their draw systems (pipelines, layouts)
/// 2. Descriptor pool and set layout
/// 3. Frame synchronization slots
/// 4. Swapchain (views, command buffers, swapchain)
/// 5. Arena (uniform, vertex, index buffers; G-buffer and depth images)
/// 6. Device
/// 7. Surface
/// 8. Instance
pub struct Renderer {
    passes: PassSequence,
    // Held only to outlive the objects created from them.
    _descriptor_pool: DescriptorPool,
    _global_layout: DescriptorSetLayout,
    sync: Vec<FrameSync>,
    swapchain: Swapchain,
    arena: ResourceArena,
    device: Arc<Device>,
    _surface: Surface,
    _instance: Instance,

    frame_ring: FrameRing,
    uniforms: PerFrame<FrameUniforms>,
    gpu_resources: GpuResourceState,
    globals: GlobalUbo,
    window_extent: vk::Extent2D,
    needs_recreation: bool,
}

impl Renderer {
    /// Build the whole stack for `window`.
    ///
    /// # Errors
    ///
    /// Returns an error if any startup step fails: no suitable GPU, no
    /// supported depth format, or failed object creation. None of these is
    /// retryable.
    pub fn new(window: &Window, config: &AppConfig) -> RenderResult<Self> {
        let app = &config.app;
        let window_extent = window.extent();

        info!(
            "Initializing renderer ({}x{})",
            window_extent.width, window_extent.height
        );

        let instance = Instance::new(&InstanceDesc {
            application_name: app.title.clone(),
            application_version: app.version,
            layers: config.enabled_layers(),
            window_extensions: window.required_extensions()?,
            extensions: app.vulkan.extensions.clone(),
            enable_debug_messenger: app.vulkan.enable_validation_layers,
        })?;

        let surface = window.create_surface(instance.entry(), instance.handle())?;

        let requirements = DeviceRequirements::with_extensions(
            &app.vulkan.device.extensions,
            app.vulkan.device.enable_anisotropy,
        )?;
        let physical_device = select_physical_device(
            instance.handle(),
            surface.handle(),
            surface.loader(),
            &requirements,
        )?;
        let device = Device::new(&instance, &physical_device, &requirements)?;

        let mut arena = ResourceArena::new();
        let swapchain = Swapchain::new(
            &instance,
            device.clone(),
            surface.handle(),
            window_extent,
            &mut arena,
        )?;

        let sync = FrameSync::ring(&device)?;

        let global_layout = DescriptorSetLayout::uniform(
            device.clone(),
            0,
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
        )?;
        let mut descriptor_pool =
            DescriptorPool::for_uniform_sets(device.clone(), MAX_FRAMES_IN_FLIGHT as u32)?;
        let uniforms = FrameUniforms::create(
            &device,
            &mut arena,
            &mut descriptor_pool,
            global_layout.handle(),
        )?;

        let gpu_resources = GpuResourceState::create(&device, &mut arena, &swapchain)?;

        let mut systems: Vec<Box<dyn DrawSystem>> = Vec::new();
        if let Some(mesh) = MeshDrawSystem::load(
            &device,
            &mut arena,
            Path::new(SHADER_DIR),
            global_layout.handle(),
            swapchain.format(),
            swapchain.depth_format(),
        )? {
            systems.push(Box::new(mesh));
        }

        let passes = PassSequence::new()
            .with_pass(GBufferPass::new(systems))
            .with_pass(CompositePass::new(Vec::new()));

        let frame_ring = FrameRing::new(swapchain.image_count());

        info!(
            "Renderer initialized: passes {:?}, {} frames in flight",
            passes.names(),
            MAX_FRAMES_IN_FLIGHT
        );

        Ok(Self {
            passes,
            _descriptor_pool: descriptor_pool,
            _global_layout: global_layout,
            sync,
            swapchain,
            arena,
            device,
            _surface: surface,
            _instance: instance,
            frame_ring,
            uniforms,
            gpu_resources,
            globals: GlobalUbo::default(),
            window_extent,
            needs_recreation: false,
        })
    }

    /// Record the new window size. Recreation happens on the next frame.
    pub fn resize(&mut self, width: u32, height: u32) {
        let extent = vk::Extent2D { width, height };
        if extent == self.window_extent {
            return;
        }
        debug!(
            "Resize requested: {}x{} -> {}x{}",
            self.window_extent.width, self.window_extent.height, width, height
        );
        self.window_extent = extent;
        self.needs_recreation = true;
    }

    /// Camera matrices for the next frames.
    pub fn set_globals(&mut self, globals: GlobalUbo) {
        self.globals = globals;
    }

    /// Render and present one frame.
    ///
    /// A minimized window renders nothing. An out-of-date swapchain skips the
    /// frame and recreates.
    ///
    /// # Errors
    ///
    /// Returns an error for any failed GPU call other than the out-of-date
    /// and suboptimal signals.
    pub fn render_frame(&mut self) -> RenderResult<()> {
        if self.window_extent.width == 0 || self.window_extent.height == 0 {
            return Ok(());
        }

        if self.needs_recreation {
            self.recreate_swapchain()?;
        }

        let mut backend = VulkanFrameBackend::new(&self.device, &self.swapchain, &self.sync);

        let frame = match self.frame_ring.begin_frame(&mut backend)? {
            BeginFrame::Ready(frame) => frame,
            BeginFrame::NeedsRecreation => {
                self.recreate_swapchain()?;
                return Ok(());
            }
        };

        self.record(&frame)?;

        let mut backend = VulkanFrameBackend::new(&self.device, &self.swapchain, &self.sync);
        if self.frame_ring.end_frame(&mut backend)?.needs_recreation() {
            debug!("Present reported a stale swapchain, recreating before the next frame");
            self.needs_recreation = true;
        }
        Ok(())
    }

    fn record(&mut self, frame: &FrameInfo) -> RenderResult<()> {
        let uniforms = self.uniforms[frame.frame_index];
        uniforms.write(&self.arena, &self.globals)?;

        self.gpu_resources
            .bind_swapchain_image(self.swapchain.image(frame.image_index)?);

        let ctx = FrameContext {
            cmd: CommandBuffer::new(
                &self.device,
                self.swapchain.command_buffer(frame.image_index)?,
            ),
            frame,
            extent: self.swapchain.extent(),
            descriptor_set: uniforms.descriptor_set,
            arena: &self.arena,
        };
        self.passes.record(&ctx, &mut self.gpu_resources)?;
        self.gpu_resources.release_swapchain_image()?;
        Ok(())
    }

    fn recreate_swapchain(&mut self) -> RenderResult<()> {
        if self.window_extent.width == 0 || self.window_extent.height == 0 {
            self.needs_recreation = true;
            return Ok(());
        }

        self.device.wait_idle()?;
        self.swapchain
            .recreate(self.window_extent, &mut self.arena)?;

        self.gpu_resources.destroy(&mut self.arena)?;
        self.gpu_resources =
            GpuResourceState::create(&self.device, &mut self.arena, &self.swapchain)?;

        self.frame_ring.reset_images(self.swapchain.image_count());
        self.needs_recreation = false;
        Ok(())
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent()
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.swapchain.format()
    }

    #[inline]
    pub fn frame_ring(&self) -> &FrameRing {
        &self.frame_ring
    }

    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            error!(
                "Failed to wait for device idle during renderer drop: {:?}",
                e
            );
        }
        info!("Renderer destroyed");
    }
}
