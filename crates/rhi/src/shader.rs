//! SPIR-V shader modules.
//!
//! Binaries are precompiled; the engine only validates the word stream
//! before handing it to the driver. Every module uses the entry point
//! `main`.

use std::ffi::CStr;
use std::path::Path;
use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// First word of every SPIR-V module.
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

const ENTRY_POINT: &CStr = c"main";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl From<ShaderStage> for vk::ShaderStageFlags {
    fn from(stage: ShaderStage) -> Self {
        match stage {
            ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
            ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
        }
    }
}

pub struct Shader {
    device: Arc<Device>,
    module: vk::ShaderModule,
    stage: ShaderStage,
}

impl Shader {
    /// # Errors
    ///
    /// Returns [`RhiError::ShaderError`] if the file is unreadable or not
    /// SPIR-V, or a Vulkan error if module creation fails.
    pub fn from_spirv_file(device: Arc<Device>, path: &Path, stage: ShaderStage) -> RhiResult<Self> {
        let bytes = std::fs::read(path)
            .map_err(|e| RhiError::ShaderError(format!("{}: {e}", path.display())))?;
        let code = spirv_words(&bytes)
            .map_err(|e| RhiError::ShaderError(format!("{}: {e}", path.display())))?;

        let info = vk::ShaderModuleCreateInfo::default().code(&code);
        let module = unsafe { device.handle().create_shader_module(&info, None)? };
        debug!("{:?} shader {} ({} words)", stage, path.display(), code.len());

        Ok(Self {
            device,
            module,
            stage,
        })
    }

    #[inline]
    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    /// Stage info borrowing this module.
    pub fn stage_create_info(&self) -> vk::PipelineShaderStageCreateInfo<'_> {
        vk::PipelineShaderStageCreateInfo::default()
            .stage(self.stage.into())
            .module(self.module)
            .name(ENTRY_POINT)
    }
}

impl Drop for Shader {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_shader_module(self.module, None);
        }
    }
}

/// Reinterpret little-endian bytes as SPIR-V words.
///
/// # Errors
///
/// Returns [`RhiError::ShaderError`] for an empty stream, a length that is
/// not a multiple of four, or a wrong magic number.
pub fn spirv_words(bytes: &[u8]) -> RhiResult<Vec<u32>> {
    if bytes.is_empty() || !bytes.len().is_multiple_of(4) {
        return Err(RhiError::ShaderError(format!(
            "expected a non-empty multiple of 4 bytes, got {}",
            bytes.len()
        )));
    }

    let words: Vec<u32> = bytes
        .chunks_exact(4)
        .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
        .collect();
    match words.first() {
        Some(&SPIRV_MAGIC) => Ok(words),
        Some(other) => Err(RhiError::ShaderError(format!(
            "bad SPIR-V magic {other:#010x}"
        ))),
        None => Err(RhiError::ShaderError("empty SPIR-V stream".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_flags() {
        assert_eq!(
            vk::ShaderStageFlags::from(ShaderStage::Vertex),
            vk::ShaderStageFlags::VERTEX
        );
        assert_eq!(
            vk::ShaderStageFlags::from(ShaderStage::Fragment),
            vk::ShaderStageFlags::FRAGMENT
        );
    }

    #[test]
    fn spirv_words_reads_little_endian() {
        let mut bytes = SPIRV_MAGIC.to_le_bytes().to_vec();
        bytes.extend_from_slice(&0x0001_0600u32.to_le_bytes());
        assert_eq!(spirv_words(&bytes).unwrap(), vec![SPIRV_MAGIC, 0x0001_0600]);
    }

    #[test]
    fn spirv_words_rejects_bad_input() {
        for bytes in [&[][..], &[0x03, 0x02, 0x23], &0xDEAD_BEEFu32.to_le_bytes()] {
            assert!(matches!(spirv_words(bytes), Err(RhiError::ShaderError(_))));
        }
    }
}
