//! Image layout transitions.
//!
//! Stage and access masks for a transition are derived from a fixed table
//! keyed by layout: the old layout supplies the source half, the new layout
//! the destination half. A wrong entry produces silent GPU races rather than
//! errors, so the table is deliberately small and every entry is tested.
//!
//! | layout                     | access                                  | stage                           |
//! |----------------------------|-----------------------------------------|---------------------------------|
//! | `UNDEFINED`                | none                                    | top of pipe                     |
//! | `PREINITIALIZED`           | host write                              | host                            |
//! | `COLOR_ATTACHMENT_OPTIMAL` | color attachment read/write             | color attachment output         |
//! | `DEPTH_ATTACHMENT_OPTIMAL` | depth/stencil attachment read/write     | early + late fragment tests     |
//! | `SHADER_READ_ONLY_OPTIMAL` | shader read, input attachment read      | vertex + fragment shader        |
//! | `TRANSFER_SRC_OPTIMAL`     | transfer read                           | transfer                        |
//! | `TRANSFER_DST_OPTIMAL`     | transfer write                          | transfer                        |
//! | `PRESENT_SRC_KHR`          | none                                    | bottom of pipe                  |
//!
//! `GENERAL` has no single meaning and is rejected by [`derive_masks`]; pass
//! caller-chosen masks to [`cmd_transition_batch`] instead.

use ash::vk;

use crate::error::{RhiError, RhiResult};

/// Stage and access masks for both sides of a barrier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BarrierMasks {
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
}

impl BarrierMasks {
    /// True if either side carries an access mask.
    pub fn has_access(&self) -> bool {
        !self.src_access.is_empty() || !self.dst_access.is_empty()
    }
}

/// Memory accesses performed while an image sits in `layout`.
///
/// # Errors
///
/// [`RhiError::UnsupportedLayout`] for `GENERAL` and any layout not in the table.
pub fn access_mask(layout: vk::ImageLayout) -> RhiResult<vk::AccessFlags> {
    let access = match layout {
        vk::ImageLayout::UNDEFINED | vk::ImageLayout::PRESENT_SRC_KHR => vk::AccessFlags::empty(),
        vk::ImageLayout::PREINITIALIZED => vk::AccessFlags::HOST_WRITE,
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => {
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE
        }
        vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL
        | vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL => {
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
        }
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => {
            vk::AccessFlags::SHADER_READ | vk::AccessFlags::INPUT_ATTACHMENT_READ
        }
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL => vk::AccessFlags::TRANSFER_READ,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL => vk::AccessFlags::TRANSFER_WRITE,
        other => return Err(RhiError::UnsupportedLayout(other)),
    };
    Ok(access)
}

/// Pipeline stages that touch an image while it sits in `layout`.
///
/// # Errors
///
/// [`RhiError::UnsupportedLayout`] for `GENERAL` and any layout not in the table.
pub fn pipeline_stage(layout: vk::ImageLayout) -> RhiResult<vk::PipelineStageFlags> {
    let stage = match layout {
        vk::ImageLayout::UNDEFINED => vk::PipelineStageFlags::TOP_OF_PIPE,
        vk::ImageLayout::PREINITIALIZED => vk::PipelineStageFlags::HOST,
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL | vk::ImageLayout::TRANSFER_DST_OPTIMAL => {
            vk::PipelineStageFlags::TRANSFER
        }
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => {
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        }
        vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL
        | vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL => {
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
                | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS
        }
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => {
            vk::PipelineStageFlags::VERTEX_SHADER | vk::PipelineStageFlags::FRAGMENT_SHADER
        }
        vk::ImageLayout::PRESENT_SRC_KHR => vk::PipelineStageFlags::BOTTOM_OF_PIPE,
        other => return Err(RhiError::UnsupportedLayout(other)),
    };
    Ok(stage)
}

/// Masks for an `old → new` transition, looked up from the layout table.
pub fn derive_masks(old: vk::ImageLayout, new: vk::ImageLayout) -> RhiResult<BarrierMasks> {
    Ok(BarrierMasks {
        src_stage: pipeline_stage(old)?,
        dst_stage: pipeline_stage(new)?,
        src_access: access_mask(old)?,
        dst_access: access_mask(new)?,
    })
}

/// One barrier per target, all sharing the same layouts and masks.
pub fn build_image_barriers(
    targets: &[(vk::Image, vk::ImageSubresourceRange)],
    old: vk::ImageLayout,
    new: vk::ImageLayout,
    masks: &BarrierMasks,
) -> Vec<vk::ImageMemoryBarrier<'static>> {
    targets
        .iter()
        .map(|&(image, range)| {
            vk::ImageMemoryBarrier::default()
                .src_access_mask(masks.src_access)
                .dst_access_mask(masks.dst_access)
                .old_layout(old)
                .new_layout(new)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(image)
                .subresource_range(range)
        })
        .collect()
}

/// Single-mip, single-layer range over `aspect`.
pub fn full_range(aspect: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: aspect,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

// ============================================================================
// Recording
// ============================================================================

/// Move every target from `old` to `new` with one `vkCmdPipelineBarrier`.
///
/// Masks are supplied by the caller, either from [`derive_masks`] or chosen
/// by hand; the latter is the only way to use `GENERAL`. An empty `targets`
/// records nothing.
pub fn cmd_transition_batch(
    device: &ash::Device,
    command_buffer: vk::CommandBuffer,
    targets: &[(vk::Image, vk::ImageSubresourceRange)],
    old: vk::ImageLayout,
    new: vk::ImageLayout,
    masks: &BarrierMasks,
) {
    if targets.is_empty() {
        return;
    }
    let barriers = build_image_barriers(targets, old, new, masks);
    record(device, command_buffer, masks, &barriers);
}

fn record(
    device: &ash::Device,
    command_buffer: vk::CommandBuffer,
    masks: &BarrierMasks,
    barriers: &[vk::ImageMemoryBarrier<'_>],
) {
    unsafe {
        device.cmd_pipeline_barrier(
            command_buffer,
            masks.src_stage,
            masks.dst_stage,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            barriers,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::ImageLayout as L;

    const TABLE_LAYOUTS: [vk::ImageLayout; 8] = [
        L::UNDEFINED,
        L::PREINITIALIZED,
        L::COLOR_ATTACHMENT_OPTIMAL,
        L::DEPTH_ATTACHMENT_OPTIMAL,
        L::SHADER_READ_ONLY_OPTIMAL,
        L::TRANSFER_SRC_OPTIMAL,
        L::TRANSFER_DST_OPTIMAL,
        L::PRESENT_SRC_KHR,
    ];

    #[test]
    fn every_table_entry_maps_to_a_stage() {
        for layout in TABLE_LAYOUTS {
            let stage = pipeline_stage(layout).unwrap();
            assert!(!stage.is_empty(), "{layout:?} has no stage");
        }
    }

    #[test]
    fn only_undefined_and_present_have_empty_access() {
        for layout in TABLE_LAYOUTS {
            let empty = access_mask(layout).unwrap().is_empty();
            let expected_empty = matches!(layout, L::UNDEFINED | L::PRESENT_SRC_KHR);
            assert_eq!(empty, expected_empty, "{layout:?}");
        }
    }

    #[test]
    fn exact_entries() {
        assert_eq!(
            access_mask(L::COLOR_ATTACHMENT_OPTIMAL).unwrap(),
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE
        );
        assert_eq!(
            access_mask(L::DEPTH_ATTACHMENT_OPTIMAL).unwrap(),
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
        );
        assert_eq!(
            access_mask(L::SHADER_READ_ONLY_OPTIMAL).unwrap(),
            vk::AccessFlags::SHADER_READ | vk::AccessFlags::INPUT_ATTACHMENT_READ
        );
        assert_eq!(
            access_mask(L::TRANSFER_SRC_OPTIMAL).unwrap(),
            vk::AccessFlags::TRANSFER_READ
        );
        assert_eq!(
            access_mask(L::TRANSFER_DST_OPTIMAL).unwrap(),
            vk::AccessFlags::TRANSFER_WRITE
        );
        assert_eq!(
            access_mask(L::PREINITIALIZED).unwrap(),
            vk::AccessFlags::HOST_WRITE
        );

        assert_eq!(
            pipeline_stage(L::UNDEFINED).unwrap(),
            vk::PipelineStageFlags::TOP_OF_PIPE
        );
        assert_eq!(
            pipeline_stage(L::PREINITIALIZED).unwrap(),
            vk::PipelineStageFlags::HOST
        );
        assert_eq!(
            pipeline_stage(L::DEPTH_ATTACHMENT_OPTIMAL).unwrap(),
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
                | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS
        );
        assert_eq!(
            pipeline_stage(L::SHADER_READ_ONLY_OPTIMAL).unwrap(),
            vk::PipelineStageFlags::VERTEX_SHADER | vk::PipelineStageFlags::FRAGMENT_SHADER
        );
        assert_eq!(
            pipeline_stage(L::PRESENT_SRC_KHR).unwrap(),
            vk::PipelineStageFlags::BOTTOM_OF_PIPE
        );
    }

    #[test]
    fn general_is_rejected_on_derived_path() {
        assert!(matches!(
            derive_masks(L::GENERAL, L::COLOR_ATTACHMENT_OPTIMAL),
            Err(RhiError::UnsupportedLayout(L::GENERAL))
        ));
        assert!(matches!(
            derive_masks(L::UNDEFINED, L::GENERAL),
            Err(RhiError::UnsupportedLayout(L::GENERAL))
        ));
    }

    #[test]
    fn unknown_layout_is_rejected() {
        assert!(access_mask(L::READ_ONLY_OPTIMAL).is_err());
        assert!(pipeline_stage(L::ATTACHMENT_OPTIMAL).is_err());
    }

    #[test]
    fn every_pair_other_than_empty_ones_has_access() {
        for old in TABLE_LAYOUTS {
            for new in TABLE_LAYOUTS {
                let masks = derive_masks(old, new).unwrap();
                let both_empty = matches!(old, L::UNDEFINED | L::PRESENT_SRC_KHR)
                    && matches!(new, L::UNDEFINED | L::PRESENT_SRC_KHR);
                assert_eq!(masks.has_access(), !both_empty, "{old:?} -> {new:?}");
            }
        }
    }

    #[test]
    fn color_to_present_releases_attachment_writes() {
        let masks = derive_masks(L::COLOR_ATTACHMENT_OPTIMAL, L::PRESENT_SRC_KHR).unwrap();
        assert_eq!(
            masks.src_stage,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        );
        assert_eq!(masks.dst_stage, vk::PipelineStageFlags::BOTTOM_OF_PIPE);
        assert!(
            masks
                .src_access
                .contains(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
        );
        assert!(masks.dst_access.is_empty());
    }

    #[test]
    fn batch_builds_one_barrier_per_target() {
        let color = full_range(vk::ImageAspectFlags::COLOR);
        let depth = full_range(vk::ImageAspectFlags::DEPTH);
        let targets = [
            (vk::Image::null(), color),
            (vk::Image::null(), depth),
            (vk::Image::null(), color),
        ];
        let masks = derive_masks(L::UNDEFINED, L::TRANSFER_DST_OPTIMAL).unwrap();
        let barriers = build_image_barriers(&targets, L::UNDEFINED, L::TRANSFER_DST_OPTIMAL, &masks);

        assert_eq!(barriers.len(), 3);
        for (barrier, (_, range)) in barriers.iter().zip(targets.iter()) {
            assert_eq!(barrier.old_layout, L::UNDEFINED);
            assert_eq!(barrier.new_layout, L::TRANSFER_DST_OPTIMAL);
            assert_eq!(barrier.dst_access_mask, vk::AccessFlags::TRANSFER_WRITE);
            assert_eq!(barrier.subresource_range.aspect_mask, range.aspect_mask);
            assert_eq!(barrier.src_queue_family_index, vk::QUEUE_FAMILY_IGNORED);
        }
    }
}
