//! Vertex formats and their input descriptions.

use std::mem::{offset_of, size_of};

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::Vec3;

/// Colored mesh vertex.
///
/// - location 0: position (vec3)
/// - location 1: normal (vec3)
/// - location 2: color (vec3)
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct MeshVertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub color: Vec3,
}

impl MeshVertex {
    #[inline]
    pub const fn new(position: Vec3, normal: Vec3, color: Vec3) -> Self {
        Self {
            position,
            normal,
            color,
        }
    }

    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: size_of::<Self>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 3] {
        [
            attribute(0, offset_of!(Self, position)),
            attribute(1, offset_of!(Self, normal)),
            attribute(2, offset_of!(Self, color)),
        ]
    }
}

fn attribute(location: u32, offset: usize) -> vk::VertexInputAttributeDescription {
    vk::VertexInputAttributeDescription {
        binding: 0,
        location,
        format: vk::Format::R32G32B32_SFLOAT,
        offset: offset as u32,
    }
}
