//! Device memory allocation with explicit memory-type selection.
//!
//! Every resource is created in two steps: the `vk::Buffer`/`vk::Image` object
//! first ([`UnboundBuffer`], [`UnboundImage`]), then a dedicated
//! `vk::DeviceMemory` chosen by [`find_memory_type`] and bound to it. Only the
//! bound types ([`Buffer`], [`Image`]) can be used for rendering, so an
//! unbound resource never reaches a command buffer.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use lumen_rhi::device::Device;
//! use lumen_rhi::memory::{Buffer, BufferUsage};
//!
//! # fn example(device: Arc<Device>) -> Result<(), lumen_rhi::RhiError> {
//! let vertices: [f32; 6] = [0.0, 0.5, -0.5, -0.5, 0.5, -0.5];
//! let vertex_buffer = Buffer::with_data(device, BufferUsage::Vertex, &vertices)?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use bytemuck::Pod;
use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Index of the first memory type allowed by `type_bits` whose property flags
/// contain all of `required`.
///
/// # Errors
///
/// Returns [`RhiError::MemoryTypeNotFound`] when nothing matches. Callers
/// treat this as a fatal setup error.
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> RhiResult<u32> {
    memory_properties
        .memory_types
        .iter()
        .take(memory_properties.memory_type_count as usize)
        .enumerate()
        .find(|(i, memory_type)| {
            type_bits & (1 << i) != 0 && memory_type.property_flags.contains(required)
        })
        .map(|(i, _)| i as u32)
        .ok_or(RhiError::MemoryTypeNotFound {
            type_bits,
            required,
        })
}

fn allocate(
    device: &Device,
    requirements: vk::MemoryRequirements,
    properties: vk::MemoryPropertyFlags,
) -> RhiResult<vk::DeviceMemory> {
    let type_index = find_memory_type(
        device.memory_properties(),
        requirements.memory_type_bits,
        properties,
    )?;

    let alloc_info = vk::MemoryAllocateInfo::default()
        .allocation_size(requirements.size)
        .memory_type_index(type_index);

    let memory = unsafe { device.handle().allocate_memory(&alloc_info, None)? };
    Ok(memory)
}

/// Copy `src` into `dst`, placing element `i` at byte `i * stride`.
///
/// # Errors
///
/// Returns [`RhiError::InvalidArgument`] if `stride` is smaller than an
/// element or `dst` cannot hold `src.len()` strided elements.
pub fn copy_strided<T: Pod>(dst: &mut [u8], src: &[T], stride: usize) -> RhiResult<()> {
    let element = std::mem::size_of::<T>();
    if stride < element {
        return Err(RhiError::InvalidArgument(format!(
            "stride {stride} is smaller than element size {element}"
        )));
    }
    let needed = strided_size(src.len(), element, stride);
    if needed > dst.len() {
        return Err(RhiError::InvalidArgument(format!(
            "upload of {needed} bytes exceeds destination of {} bytes",
            dst.len()
        )));
    }

    let bytes: &[u8] = bytemuck::cast_slice(src);
    if stride == element {
        dst[..bytes.len()].copy_from_slice(bytes);
    } else {
        for (i, chunk) in bytes.chunks_exact(element).enumerate() {
            let at = i * stride;
            dst[at..at + element].copy_from_slice(chunk);
        }
    }
    Ok(())
}

/// Bytes spanned by `count` elements laid out at `stride`.
fn strided_size(count: usize, element: usize, stride: usize) -> usize {
    match count {
        0 => 0,
        n => (n - 1) * stride + element,
    }
}

/// Buffer usage type.
///
/// Decides the Vulkan usage flags and the memory properties the backing
/// allocation must have.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferUsage {
    Vertex,
    Index,
    Uniform,
    Staging,
}

impl BufferUsage {
    pub fn to_vk_usage(self) -> vk::BufferUsageFlags {
        match self {
            BufferUsage::Vertex => {
                vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
            }
            BufferUsage::Index => {
                vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
            }
            BufferUsage::Uniform => vk::BufferUsageFlags::UNIFORM_BUFFER,
            BufferUsage::Staging => vk::BufferUsageFlags::TRANSFER_SRC,
        }
    }

    /// All usages are written from the CPU.
    pub fn memory_properties(self) -> vk::MemoryPropertyFlags {
        vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
    }

    pub fn name(self) -> &'static str {
        match self {
            BufferUsage::Vertex => "vertex",
            BufferUsage::Index => "index",
            BufferUsage::Uniform => "uniform",
            BufferUsage::Staging => "staging",
        }
    }
}

/// A buffer object without memory.
pub struct UnboundBuffer {
    device: Arc<Device>,
    buffer: vk::Buffer,
    size: vk::DeviceSize,
    usage: BufferUsage,
}

impl UnboundBuffer {
    /// Create the buffer object.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidArgument`] for a zero size, or the Vulkan
    /// error from `vkCreateBuffer`.
    pub fn new(device: Arc<Device>, usage: BufferUsage, size: vk::DeviceSize) -> RhiResult<Self> {
        if size == 0 {
            return Err(RhiError::InvalidArgument(
                "Buffer size must be greater than 0".to_string(),
            ));
        }

        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage.to_vk_usage())
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.handle().create_buffer(&buffer_info, None)? };

        Ok(Self {
            device,
            buffer,
            size,
            usage,
        })
    }

    pub fn memory_requirements(&self) -> vk::MemoryRequirements {
        unsafe { self.device.handle().get_buffer_memory_requirements(self.buffer) }
    }

    /// Allocate memory with `properties` and bind it at offset 0.
    pub fn bind(mut self, properties: vk::MemoryPropertyFlags) -> RhiResult<Buffer> {
        let requirements = self.memory_requirements();
        let memory = allocate(&self.device, requirements, properties)?;

        if let Err(e) = unsafe { self.device.handle().bind_buffer_memory(self.buffer, memory, 0) } {
            unsafe { self.device.handle().free_memory(memory, None) };
            return Err(e.into());
        }

        debug!(
            "Created {} buffer: {} bytes ({} allocated)",
            self.usage.name(),
            self.size,
            requirements.size
        );

        Ok(Buffer {
            device: Arc::clone(&self.device),
            buffer: std::mem::replace(&mut self.buffer, vk::Buffer::null()),
            memory,
            size: self.size,
            usage: self.usage,
            properties,
        })
    }
}

impl Drop for UnboundBuffer {
    fn drop(&mut self) {
        // Null once ownership moved into a bound Buffer.
        if self.buffer != vk::Buffer::null() {
            unsafe { self.device.handle().destroy_buffer(self.buffer, None) };
        }
    }
}

/// A buffer with bound device memory.
pub struct Buffer {
    device: Arc<Device>,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
    usage: BufferUsage,
    properties: vk::MemoryPropertyFlags,
}

impl Buffer {
    /// Create and bind a buffer with the usage's default memory properties.
    pub fn new(device: Arc<Device>, usage: BufferUsage, size: vk::DeviceSize) -> RhiResult<Self> {
        UnboundBuffer::new(device, usage, size)?.bind(usage.memory_properties())
    }

    /// Create a buffer sized for `data` and upload it.
    pub fn with_data<T: Pod>(device: Arc<Device>, usage: BufferUsage, data: &[T]) -> RhiResult<Self> {
        let size = std::mem::size_of_val(data) as vk::DeviceSize;
        let buffer = Self::new(device, usage, size)?;
        buffer.upload(data)?;
        Ok(buffer)
    }

    /// Upload tightly packed elements at offset 0.
    pub fn upload<T: Pod>(&self, data: &[T]) -> RhiResult<()> {
        self.upload_strided(data, std::mem::size_of::<T>())
    }

    /// Upload elements spaced `stride` bytes apart, starting at offset 0.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidArgument`] if the memory is not host-visible,
    /// the stride is smaller than `T`, or the data does not fit.
    pub fn upload_strided<T: Pod>(&self, data: &[T], stride: usize) -> RhiResult<()> {
        if !self
            .properties
            .contains(vk::MemoryPropertyFlags::HOST_VISIBLE)
        {
            return Err(RhiError::InvalidArgument(format!(
                "{} buffer memory is not host visible",
                self.usage.name()
            )));
        }
        if data.is_empty() {
            return Ok(());
        }

        let span = strided_size(data.len(), std::mem::size_of::<T>(), stride) as vk::DeviceSize;
        if span > self.size {
            return Err(RhiError::InvalidArgument(format!(
                "upload of {} bytes exceeds {} buffer of {} bytes",
                span,
                self.usage.name(),
                self.size
            )));
        }

        let device = self.device.handle();
        unsafe {
            let ptr = device.map_memory(self.memory, 0, span, vk::MemoryMapFlags::empty())?;
            let dst = std::slice::from_raw_parts_mut(ptr.cast::<u8>(), span as usize);
            let copied = copy_strided(dst, data, stride);

            if copied.is_ok()
                && !self
                    .properties
                    .contains(vk::MemoryPropertyFlags::HOST_COHERENT)
            {
                let range = vk::MappedMemoryRange::default()
                    .memory(self.memory)
                    .offset(0)
                    .size(vk::WHOLE_SIZE);
                device.flush_mapped_memory_ranges(&[range])?;
            }
            device.unmap_memory(self.memory);
            copied
        }
    }

    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    #[inline]
    pub fn usage(&self) -> BufferUsage {
        self.usage
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_buffer(self.buffer, None);
            self.device.handle().free_memory(self.memory, None);
        }
        debug!("Destroyed {} buffer", self.usage.name());
    }
}

/// Parameters for a device-memory-backed 2D image.
#[derive(Clone, Copy, Debug)]
pub struct ImageDesc {
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub tiling: vk::ImageTiling,
    pub usage: vk::ImageUsageFlags,
    pub memory_properties: vk::MemoryPropertyFlags,
    pub aspect: vk::ImageAspectFlags,
}

impl ImageDesc {
    /// Optimal-tiling, device-local attachment.
    pub fn attachment(
        format: vk::Format,
        extent: vk::Extent2D,
        usage: vk::ImageUsageFlags,
        aspect: vk::ImageAspectFlags,
    ) -> Self {
        Self {
            format,
            extent,
            tiling: vk::ImageTiling::OPTIMAL,
            usage,
            memory_properties: vk::MemoryPropertyFlags::DEVICE_LOCAL,
            aspect,
        }
    }

    /// Full single-mip, single-layer range for this image's aspect.
    pub fn subresource_range(&self) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange::default()
            .aspect_mask(self.aspect)
            .base_mip_level(0)
            .level_count(1)
            .base_array_layer(0)
            .layer_count(1)
    }
}

/// An image object without memory.
pub struct UnboundImage {
    device: Arc<Device>,
    image: vk::Image,
    desc: ImageDesc,
}

impl UnboundImage {
    /// Create the image object in `UNDEFINED` layout.
    pub fn new(device: Arc<Device>, desc: ImageDesc) -> RhiResult<Self> {
        if desc.extent.width == 0 || desc.extent.height == 0 {
            return Err(RhiError::InvalidArgument(format!(
                "image extent must be non-zero, got {}x{}",
                desc.extent.width, desc.extent.height
            )));
        }

        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(desc.format)
            .extent(vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(desc.tiling)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { device.handle().create_image(&image_info, None)? };

        Ok(Self {
            device,
            image,
            desc,
        })
    }

    pub fn memory_requirements(&self) -> vk::MemoryRequirements {
        unsafe { self.device.handle().get_image_memory_requirements(self.image) }
    }

    /// Allocate memory, bind it, and create a view over the whole image.
    pub fn bind(mut self) -> RhiResult<Image> {
        let device = self.device.handle();
        let requirements = self.memory_requirements();
        let memory = allocate(&self.device, requirements, self.desc.memory_properties)?;

        if let Err(e) = unsafe { device.bind_image_memory(self.image, memory, 0) } {
            unsafe { device.free_memory(memory, None) };
            return Err(e.into());
        }

        let view_info = vk::ImageViewCreateInfo::default()
            .image(self.image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(self.desc.format)
            .subresource_range(self.desc.subresource_range());

        let view = match unsafe { device.create_image_view(&view_info, None) } {
            Ok(view) => view,
            Err(e) => {
                unsafe { device.free_memory(memory, None) };
                return Err(e.into());
            }
        };

        debug!(
            "Created image {:?} {}x{} ({} bytes)",
            self.desc.format, self.desc.extent.width, self.desc.extent.height, requirements.size
        );

        Ok(Image {
            device: Arc::clone(&self.device),
            image: std::mem::replace(&mut self.image, vk::Image::null()),
            memory,
            view,
            desc: self.desc,
        })
    }
}

impl Drop for UnboundImage {
    fn drop(&mut self) {
        if self.image != vk::Image::null() {
            unsafe { self.device.handle().destroy_image(self.image, None) };
        }
    }
}

/// An image with bound device memory and a default view.
pub struct Image {
    device: Arc<Device>,
    image: vk::Image,
    memory: vk::DeviceMemory,
    view: vk::ImageView,
    desc: ImageDesc,
}

impl Image {
    pub fn new(device: Arc<Device>, desc: ImageDesc) -> RhiResult<Self> {
        UnboundImage::new(device, desc)?.bind()
    }

    #[inline]
    pub fn handle(&self) -> vk::Image {
        self.image
    }

    #[inline]
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.desc.format
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.desc.extent
    }

    #[inline]
    pub fn desc(&self) -> &ImageDesc {
        &self.desc
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        unsafe {
            let device = self.device.handle();
            device.destroy_image_view(self.view, None);
            device.destroy_image(self.image, None);
            device.free_memory(self.memory, None);
        }
        debug!("Destroyed image {:?}", self.desc.format);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_properties(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            ..Default::default()
        };
        for (slot, flags) in props.memory_types.iter_mut().zip(types) {
            slot.property_flags = *flags;
        }
        props
    }

    const DEVICE_LOCAL: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::DEVICE_LOCAL;
    const HOST: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
        vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw()
            | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
    );

    #[test]
    fn picks_first_type_in_mask_with_superset_flags() {
        let props = memory_properties(&[DEVICE_LOCAL, HOST, HOST | DEVICE_LOCAL]);

        assert_eq!(find_memory_type(&props, 0b111, HOST).unwrap(), 1);
        assert_eq!(find_memory_type(&props, 0b100, HOST).unwrap(), 2);
        assert_eq!(find_memory_type(&props, 0b111, DEVICE_LOCAL).unwrap(), 0);
        assert_eq!(
            find_memory_type(&props, 0b110, vk::MemoryPropertyFlags::HOST_VISIBLE).unwrap(),
            1
        );
    }

    #[test]
    fn types_beyond_count_are_ignored() {
        let mut props = memory_properties(&[DEVICE_LOCAL]);
        props.memory_types[1].property_flags = HOST;

        assert!(matches!(
            find_memory_type(&props, 0b11, HOST),
            Err(RhiError::MemoryTypeNotFound { type_bits: 0b11, .. })
        ));
    }

    #[test]
    fn mask_excluding_every_match_fails() {
        let props = memory_properties(&[DEVICE_LOCAL, HOST]);
        assert!(find_memory_type(&props, 0b01, HOST).is_err());
    }

    #[test]
    fn strided_copy_spaces_elements() {
        let src: [u32; 3] = [1, 2, 3];
        let mut dst = [0u8; 20];
        copy_strided(&mut dst, &src, 8).unwrap();

        assert_eq!(&dst[0..4], &1u32.to_ne_bytes());
        assert_eq!(&dst[4..8], &[0; 4]);
        assert_eq!(&dst[8..12], &2u32.to_ne_bytes());
        assert_eq!(&dst[16..20], &3u32.to_ne_bytes());
    }

    #[test]
    fn packed_copy_matches_source_bytes() {
        let src: [u16; 4] = [0xAAAA, 0xBBBB, 0xCCCC, 0xDDDD];
        let mut dst = [0u8; 8];
        copy_strided(&mut dst, &src, 2).unwrap();
        assert_eq!(&dst[..], bytemuck::cast_slice::<u16, u8>(&src));
    }

    #[test]
    fn stride_smaller_than_element_is_rejected() {
        let src: [u64; 2] = [1, 2];
        let mut dst = [0u8; 32];
        assert!(matches!(
            copy_strided(&mut dst, &src, 4),
            Err(RhiError::InvalidArgument(_))
        ));
    }

    #[test]
    fn oversized_upload_is_rejected() {
        let src: [u32; 3] = [1, 2, 3];
        let mut dst = [0u8; 19];
        assert!(copy_strided(&mut dst, &src, 8).is_err());
    }

    #[test]
    fn strided_size_excludes_trailing_padding() {
        assert_eq!(strided_size(0, 4, 16), 0);
        assert_eq!(strided_size(1, 4, 16), 4);
        assert_eq!(strided_size(3, 4, 16), 36);
    }

    #[test]
    fn buffer_usage_flags() {
        assert!(
            BufferUsage::Vertex
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::VERTEX_BUFFER)
        );
        assert!(
            BufferUsage::Index
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::INDEX_BUFFER)
        );
        assert!(
            BufferUsage::Uniform
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::UNIFORM_BUFFER)
        );
        assert!(
            BufferUsage::Uniform
                .memory_properties()
                .contains(vk::MemoryPropertyFlags::HOST_VISIBLE)
        );
    }

    #[test]
    fn attachment_desc_is_device_local() {
        let desc = ImageDesc::attachment(
            vk::Format::D32_SFLOAT,
            vk::Extent2D {
                width: 8,
                height: 8,
            },
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            vk::ImageAspectFlags::DEPTH,
        );
        assert_eq!(desc.memory_properties, vk::MemoryPropertyFlags::DEVICE_LOCAL);
        assert_eq!(desc.subresource_range().aspect_mask, vk::ImageAspectFlags::DEPTH);
        assert_eq!(desc.subresource_range().layer_count, 1);
    }
}
