//! Graphics pipelines for dynamic rendering.
//!
//! A pipeline is described by a plain [`GraphicsPipelineDesc`] naming the
//! shaders, vertex layout, and the attachment formats of the scope it will
//! draw into. Viewport and scissor are always dynamic; passes set them per
//! frame from the swapchain extent, so a resize never invalidates a pipeline.
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use ash::vk;
//! use lumen_rhi::device::Device;
//! use lumen_rhi::pipeline::{AttachmentFormats, GraphicsPipelineDesc, Pipeline, PipelineLayout};
//! use lumen_rhi::shader::{Shader, ShaderStage};
//! use lumen_rhi::vertex::MeshVertex;
//!
//! # fn example(device: Arc<Device>) -> Result<(), lumen_rhi::RhiError> {
//! let vert = Shader::from_spirv_file(device.clone(), Path::new("shaders/mesh.vert.spv"), ShaderStage::Vertex)?;
//! let frag = Shader::from_spirv_file(device.clone(), Path::new("shaders/mesh.frag.spv"), ShaderStage::Fragment)?;
//! let layout = PipelineLayout::new(device.clone(), &[], &[])?;
//!
//! let desc = GraphicsPipelineDesc {
//!     shaders: vec![&vert, &frag],
//!     vertex_bindings: vec![MeshVertex::binding_description()],
//!     vertex_attributes: MeshVertex::attribute_descriptions().to_vec(),
//!     targets: AttachmentFormats::new(vk::Format::B8G8R8A8_UNORM).with_depth(vk::Format::D32_SFLOAT),
//!     ..Default::default()
//! };
//! let pipeline = Pipeline::graphics(device, &layout, &desc)?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::shader::{Shader, ShaderStage};

/// Set layouts and push constant ranges shared by the pipelines bound under it.
pub struct PipelineLayout {
    device: Arc<Device>,
    layout: vk::PipelineLayout,
}

impl PipelineLayout {
    /// # Errors
    ///
    /// Returns an error if layout creation fails.
    pub fn new(
        device: Arc<Device>,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constants: &[vk::PushConstantRange],
    ) -> RhiResult<Self> {
        let info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(set_layouts)
            .push_constant_ranges(push_constants);
        let layout = unsafe { device.handle().create_pipeline_layout(&info, None)? };

        debug!(
            "Pipeline layout: {} set layout(s), {} push range(s)",
            set_layouts.len(),
            push_constants.len()
        );
        Ok(Self { device, layout })
    }

    #[inline]
    pub fn handle(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_pipeline_layout(self.layout, None);
        }
    }
}

/// Formats of the rendering scope a pipeline draws into.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AttachmentFormats {
    pub colors: Vec<vk::Format>,
    pub depth: Option<vk::Format>,
}

impl AttachmentFormats {
    pub fn new(color: vk::Format) -> Self {
        Self {
            colors: vec![color],
            depth: None,
        }
    }

    pub fn with_depth(mut self, depth: vk::Format) -> Self {
        self.depth = Some(depth);
        self
    }
}

/// Fixed-function state of a triangle-list pipeline.
///
/// Depth test and write use `LESS` whenever the targets carry a depth
/// format. Blending is off.
#[derive(Clone)]
pub struct GraphicsPipelineDesc<'a> {
    pub shaders: Vec<&'a Shader>,
    pub vertex_bindings: Vec<vk::VertexInputBindingDescription>,
    pub vertex_attributes: Vec<vk::VertexInputAttributeDescription>,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub depth_write: bool,
    pub targets: AttachmentFormats,
}

impl Default for GraphicsPipelineDesc<'_> {
    fn default() -> Self {
        Self {
            shaders: Vec::new(),
            vertex_bindings: Vec::new(),
            vertex_attributes: Vec::new(),
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            depth_write: true,
            targets: AttachmentFormats::default(),
        }
    }
}

impl GraphicsPipelineDesc<'_> {
    /// Check the description before handing it to the driver.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::PipelineError`] without exactly one vertex and
    /// one fragment stage, or without a color target.
    pub fn validate(&self) -> RhiResult<()> {
        for stage in [ShaderStage::Vertex, ShaderStage::Fragment] {
            let count = self.shaders.iter().filter(|s| s.stage() == stage).count();
            if count != 1 {
                return Err(RhiError::PipelineError(format!(
                    "expected one {stage:?} shader, found {count}"
                )));
            }
        }
        if self.targets.colors.is_empty() {
            return Err(RhiError::PipelineError(
                "pipeline has no color target".to_string(),
            ));
        }
        Ok(())
    }
}

/// Graphics pipeline for dynamic rendering.
pub struct Pipeline {
    device: Arc<Device>,
    pipeline: vk::Pipeline,
}

impl Pipeline {
    /// Create a pipeline targeting dynamic rendering.
    ///
    /// # Errors
    ///
    /// Returns an error if the description is invalid or creation fails.
    pub fn graphics(
        device: Arc<Device>,
        layout: &PipelineLayout,
        desc: &GraphicsPipelineDesc<'_>,
    ) -> RhiResult<Self> {
        desc.validate()?;

        let stages: Vec<_> = desc.shaders.iter().map(|s| s.stage_create_info()).collect();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&desc.vertex_bindings)
            .vertex_attribute_descriptions(&desc.vertex_attributes);
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST);
        let viewport = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);
        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(desc.cull_mode)
            .front_face(desc.front_face);
        let multisample = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let has_depth = desc.targets.depth.is_some();
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(has_depth)
            .depth_write_enable(has_depth && desc.depth_write)
            .depth_compare_op(vk::CompareOp::LESS)
            .max_depth_bounds(1.0);

        let blend_attachments = vec![
            vk::PipelineColorBlendAttachmentState::default()
                .color_write_mask(vk::ColorComponentFlags::RGBA);
            desc.targets.colors.len()
        ];
        let blend = vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let mut rendering = vk::PipelineRenderingCreateInfo::default()
            .color_attachment_formats(&desc.targets.colors)
            .depth_attachment_format(desc.targets.depth.unwrap_or(vk::Format::UNDEFINED));

        let info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&blend)
            .dynamic_state(&dynamic)
            .layout(layout.handle())
            .push_next(&mut rendering);

        let pipeline = unsafe {
            device
                .handle()
                .create_graphics_pipelines(vk::PipelineCache::null(), &[info], None)
                .map_err(|(_, result)| result)?
        }
        .into_iter()
        .next()
        .ok_or_else(|| RhiError::PipelineError("driver returned no pipeline".to_string()))?;

        debug!(
            "Graphics pipeline: colors {:?}, depth {:?}",
            desc.targets.colors, desc.targets.depth
        );
        Ok(Self { device, pipeline })
    }

    #[inline]
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_pipeline(self.pipeline, None);
        }
        debug!("Graphics pipeline destroyed");
    }
}
