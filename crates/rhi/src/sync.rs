//! Per-slot synchronization objects.
//!
//! Each frame-in-flight slot owns two semaphores (acquire to render, render
//! to present) and one fence the host waits on before reusing the slot.
//!
//! ```no_run
//! use std::sync::Arc;
//! use lumen_rhi::device::Device;
//! use lumen_rhi::sync::FrameSync;
//!
//! # fn example(device: Arc<Device>) -> Result<(), lumen_rhi::RhiError> {
//! let slot = FrameSync::new(device)?;
//!
//! // Before reusing the slot:
//! slot.in_flight_fence().wait_for_frame_retirement()?;
//! slot.in_flight_fence().reset()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::{debug, trace};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Number of frames the CPU may record ahead of the GPU.
///
/// Per-frame resources (sync slots, uniform buffers, descriptor sets) are
/// sized by this, never by the swapchain image count.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

/// Timeout of a single wait call inside [`Fence::wait_for_frame_retirement`].
pub const FENCE_POLL_TIMEOUT_NS: u64 = 100_000_000;

/// Stage at which a submission waits on the image-available semaphore.
///
/// The first barrier on an acquired swapchain image must use this as its
/// source stage, or the write can start before the presentation engine is
/// done reading the image.
pub const ACQUIRE_WAIT_STAGE: vk::PipelineStageFlags =
    vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT;

/// Binary semaphore for queue-to-queue ordering. The host never waits on it.
pub struct Semaphore {
    device: Arc<Device>,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    fn new(device: Arc<Device>) -> RhiResult<Self> {
        let semaphore = unsafe {
            device
                .handle()
                .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)?
        };
        Ok(Self { device, semaphore })
    }

    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe { self.device.handle().destroy_semaphore(self.semaphore, None) };
    }
}

/// Host-visible completion signal of one slot's submission.
pub struct Fence {
    device: Arc<Device>,
    fence: vk::Fence,
}

impl Fence {
    /// Created signaled so the first wait on a fresh slot returns at once.
    fn signaled(device: Arc<Device>) -> RhiResult<Self> {
        let info = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);
        let fence = unsafe { device.handle().create_fence(&info, None)? };
        Ok(Self { device, fence })
    }

    #[inline]
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }

    /// Block until the submission that signals this fence has retired.
    ///
    /// The wait is re-issued in [`FENCE_POLL_TIMEOUT_NS`] slices while the
    /// driver reports `TIMEOUT`, so there is no overall deadline.
    ///
    /// # Errors
    ///
    /// Returns any wait result other than `SUCCESS` or `TIMEOUT`, such as
    /// `ERROR_DEVICE_LOST`.
    pub fn wait_for_frame_retirement(&self) -> RhiResult<()> {
        let fences = [self.fence];
        let polls = poll_until_retired(|timeout| {
            match unsafe { self.device.handle().wait_for_fences(&fences, true, timeout) } {
                Ok(()) => vk::Result::SUCCESS,
                Err(e) => e,
            }
        })?;

        if polls > 1 {
            trace!("Fence retired after {} wait calls", polls);
        }
        Ok(())
    }

    /// Unsignal the fence. It must not belong to a pending submission.
    pub fn reset(&self) -> RhiResult<()> {
        unsafe { self.device.handle().reset_fences(&[self.fence])? };
        Ok(())
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe { self.device.handle().destroy_fence(self.fence, None) };
    }
}

/// Drive a fence wait until it stops timing out.
///
/// `wait` is called with [`FENCE_POLL_TIMEOUT_NS`] and returns the raw wait
/// result. Returns the number of calls made.
pub fn poll_until_retired(mut wait: impl FnMut(u64) -> vk::Result) -> RhiResult<u32> {
    let mut polls = 0u32;
    loop {
        polls = polls.saturating_add(1);
        match wait(FENCE_POLL_TIMEOUT_NS) {
            vk::Result::SUCCESS => return Ok(polls),
            vk::Result::TIMEOUT => continue,
            other => return Err(RhiError::VulkanError(other)),
        }
    }
}

/// Synchronization objects owned by one frame-in-flight slot.
///
/// ```text
/// 1. wait in_flight_fence      (previous use of this slot has retired)
/// 2. acquire image             (signals image_available)
/// 3. reset in_flight_fence
/// 4. submit                    (waits image_available, signals render_finished + fence)
/// 5. present                   (waits render_finished)
/// ```
pub struct FrameSync {
    image_available_semaphore: Semaphore,
    render_finished_semaphore: Semaphore,
    in_flight_fence: Fence,
}

impl FrameSync {
    /// Creates one slot. The fence starts signaled.
    ///
    /// # Errors
    ///
    /// Returns an error if any synchronization object creation fails.
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        let image_available_semaphore = Semaphore::new(device.clone())?;
        let render_finished_semaphore = Semaphore::new(device.clone())?;
        let in_flight_fence = Fence::signaled(device)?;

        Ok(Self {
            image_available_semaphore,
            render_finished_semaphore,
            in_flight_fence,
        })
    }

    /// Creates [`MAX_FRAMES_IN_FLIGHT`] slots.
    pub fn ring(device: &Arc<Device>) -> RhiResult<Vec<Self>> {
        let slots = (0..MAX_FRAMES_IN_FLIGHT)
            .map(|_| Self::new(device.clone()))
            .collect::<RhiResult<Vec<_>>>()?;
        debug!("Created {} frame synchronization slots", slots.len());
        Ok(slots)
    }

    #[inline]
    pub fn image_available_semaphore(&self) -> &Semaphore {
        &self.image_available_semaphore
    }

    #[inline]
    pub fn render_finished_semaphore(&self) -> &Semaphore {
        &self.render_finished_semaphore
    }

    #[inline]
    pub fn in_flight_fence(&self) -> &Fence {
        &self.in_flight_fence
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_frames_in_flight() {
        assert_eq!(MAX_FRAMES_IN_FLIGHT, 2);
    }

    #[test]
    fn poll_returns_on_first_success() {
        let polls = poll_until_retired(|_| vk::Result::SUCCESS).unwrap();
        assert_eq!(polls, 1);
    }

    #[test]
    fn poll_retries_through_timeouts() {
        let mut remaining = 3;
        let polls = poll_until_retired(|timeout| {
            assert_eq!(timeout, FENCE_POLL_TIMEOUT_NS);
            if remaining == 0 {
                vk::Result::SUCCESS
            } else {
                remaining -= 1;
                vk::Result::TIMEOUT
            }
        })
        .unwrap();
        assert_eq!(polls, 4);
    }

    #[test]
    fn poll_propagates_device_loss() {
        let mut calls = 0;
        let result = poll_until_retired(|_| {
            calls += 1;
            if calls < 2 {
                vk::Result::TIMEOUT
            } else {
                vk::Result::ERROR_DEVICE_LOST
            }
        });
        assert!(matches!(
            result,
            Err(RhiError::VulkanError(vk::Result::ERROR_DEVICE_LOST))
        ));
        assert_eq!(calls, 2);
    }

    #[test]
    fn sync_objects_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Semaphore>();
        assert_send_sync::<Fence>();
        assert_send_sync::<FrameSync>();
    }
}
