//! Colored mesh draw system for the G-buffer pass.

use std::path::Path;
use std::sync::Arc;

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};
use tracing::{info, warn};

use lumen_rhi::RhiResult;
use lumen_rhi::arena::{BufferHandle, ResourceArena};
use lumen_rhi::device::Device;
use lumen_rhi::memory::{Buffer, BufferUsage};
use lumen_rhi::pipeline::{AttachmentFormats, GraphicsPipelineDesc, Pipeline, PipelineLayout};
use lumen_rhi::shader::{Shader, ShaderStage};
use lumen_rhi::vertex::MeshVertex;

use super::{DrawSystem, FrameContext};

pub const VERTEX_SHADER: &str = "mesh.vert.spv";
pub const FRAGMENT_SHADER: &str = "mesh.frag.spv";

/// Radians per second the mesh turns about +Y.
const SPIN_RATE: f32 = 0.6;

/// Vertex-stage push constant block.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct MeshPushConstants {
    model: Mat4,
}

/// Draws one indexed mesh with the global uniforms bound at set 0.
pub struct MeshDrawSystem {
    pipeline: Pipeline,
    layout: PipelineLayout,
    vertex_buffer: BufferHandle,
    index_buffer: BufferHandle,
    index_count: u32,
}

impl MeshDrawSystem {
    /// Build the pipeline from `shader_dir` and upload the mesh.
    ///
    /// Returns `Ok(None)` when either shader binary is missing, so the
    /// renderer can run without object draws.
    ///
    /// # Errors
    ///
    /// Returns an error if a present shader is invalid or any GPU object
    /// creation fails.
    pub fn load(
        device: &Arc<Device>,
        arena: &mut ResourceArena,
        shader_dir: &Path,
        global_layout: vk::DescriptorSetLayout,
        color_format: vk::Format,
        depth_format: vk::Format,
    ) -> RhiResult<Option<Self>> {
        let vert_path = shader_dir.join(VERTEX_SHADER);
        let frag_path = shader_dir.join(FRAGMENT_SHADER);
        if !vert_path.is_file() || !frag_path.is_file() {
            warn!(
                "Mesh shaders not found in {:?}, G-buffer will only be cleared",
                shader_dir
            );
            return Ok(None);
        }

        let vertex_shader = Shader::from_spirv_file(device.clone(), &vert_path, ShaderStage::Vertex)?;
        let fragment_shader =
            Shader::from_spirv_file(device.clone(), &frag_path, ShaderStage::Fragment)?;

        let push_range = vk::PushConstantRange::default()
            .stage_flags(vk::ShaderStageFlags::VERTEX)
            .offset(0)
            .size(size_of::<MeshPushConstants>() as u32);
        let layout = PipelineLayout::new(device.clone(), &[global_layout], &[push_range])?;

        let desc = GraphicsPipelineDesc {
            shaders: vec![&vertex_shader, &fragment_shader],
            vertex_bindings: vec![MeshVertex::binding_description()],
            vertex_attributes: MeshVertex::attribute_descriptions().to_vec(),
            targets: AttachmentFormats::new(color_format).with_depth(depth_format),
            ..Default::default()
        };
        let pipeline = Pipeline::graphics(device.clone(), &layout, &desc)?;

        let (vertices, indices) = cube_mesh();
        let vertex_buffer = arena.insert_buffer(Buffer::with_data(
            device.clone(),
            BufferUsage::Vertex,
            &vertices,
        )?);
        let index_buffer =
            arena.insert_buffer(Buffer::with_data(device.clone(), BufferUsage::Index, &indices)?);

        info!(
            "Mesh draw system ready: {} vertices, {} indices",
            vertices.len(),
            indices.len()
        );

        Ok(Some(Self {
            pipeline,
            layout,
            vertex_buffer,
            index_buffer,
            index_count: indices.len() as u32,
        }))
    }

    fn model_matrix(seconds: f32) -> Mat4 {
        Mat4::from_rotation_y(seconds * SPIN_RATE)
    }
}

impl DrawSystem for MeshDrawSystem {
    fn name(&self) -> &str {
        "mesh"
    }

    fn draw(&self, ctx: &FrameContext<'_>) -> RhiResult<()> {
        let vertex_buffer = ctx.arena.buffer(self.vertex_buffer)?.handle();
        let index_buffer = ctx.arena.buffer(self.index_buffer)?.handle();
        ctx.cmd.bind_graphics_pipeline(self.pipeline.handle());
        ctx.cmd
            .bind_global_set(self.layout.handle(), ctx.descriptor_set);
        ctx.cmd
            .bind_mesh(vertex_buffer, index_buffer, vk::IndexType::UINT16);

        let seconds = ctx.frame.time.as_secs_f32();
        ctx.cmd.push_constants(
            self.layout.handle(),
            vk::ShaderStageFlags::VERTEX,
            &MeshPushConstants {
                model: Self::model_matrix(seconds),
            },
        );
        ctx.cmd.draw_indexed(self.index_count);
        Ok(())
    }
}

/// Unit cube with one flat color per face, counter-clockwise outward.
pub fn cube_mesh() -> (Vec<MeshVertex>, Vec<u16>) {
    // (normal, tangent u, tangent v, color) per face; u x v = normal
    let faces = [
        (Vec3::X, Vec3::NEG_Z, Vec3::Y, Vec3::new(0.9, 0.2, 0.2)),
        (Vec3::NEG_X, Vec3::Z, Vec3::Y, Vec3::new(0.2, 0.9, 0.9)),
        (Vec3::Y, Vec3::X, Vec3::NEG_Z, Vec3::new(0.2, 0.9, 0.2)),
        (Vec3::NEG_Y, Vec3::X, Vec3::Z, Vec3::new(0.9, 0.2, 0.9)),
        (Vec3::Z, Vec3::X, Vec3::Y, Vec3::new(0.2, 0.2, 0.9)),
        (Vec3::NEG_Z, Vec3::NEG_X, Vec3::Y, Vec3::new(0.9, 0.9, 0.2)),
    ];

    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);
    for (normal, u, v, color) in faces {
        let base = vertices.len() as u16;
        let center = normal * 0.5;
        for (su, sv) in [(-0.5, -0.5), (0.5, -0.5), (0.5, 0.5), (-0.5, 0.5)] {
            vertices.push(MeshVertex::new(center + u * su + v * sv, normal, color));
        }
        indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }
    (vertices, indices)
}
