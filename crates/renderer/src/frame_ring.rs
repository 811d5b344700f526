//! Frame synchronization ring.
//!
//! Drives the per-slot lifecycle of frames in flight. The ring itself is a
//! pure state machine; every GPU interaction goes through a [`FrameBackend`],
//! which is [`VulkanFrameBackend`] at runtime and a simulated timeline in
//! tests.
//!
//! # Synchronization Flow
//!
//! ```text
//! begin_frame (slot = frame_index)
//!   1. wait slot fence           Submitted -> WaitingOnFence -> Idle
//!   2. acquire image             signals the slot's image_available
//!      out of date?              -> advance, return NeedsRecreation
//!   3. wait image's last user    only if another slot still holds it
//!   4. reset slot fence
//!   5. begin command buffer
//! ... record passes ...
//! end_frame
//!   6. end command buffer
//!   7. submit                    waits image_available @ COLOR_ATTACHMENT_OUTPUT,
//!                                signals render_finished + slot fence
//!                                Idle -> Submitted
//!   8. present                   waits render_finished
//!   9. advance                   frame_index = (frame_index + 1) % N
//! ```
//!
//! # Example
//!
//! ```no_run
//! use lumen_renderer::frame_ring::{BeginFrame, FrameRing, VulkanFrameBackend};
//! # use lumen_rhi::device::Device;
//! # use lumen_rhi::swapchain::Swapchain;
//! # use lumen_rhi::sync::FrameSync;
//! # fn example(device: &Device, swapchain: &Swapchain, sync: &[FrameSync]) -> Result<(), lumen_rhi::RhiError> {
//! let mut ring = FrameRing::new(swapchain.image_count());
//! let mut backend = VulkanFrameBackend::new(device, swapchain, sync);
//!
//! match ring.begin_frame(&mut backend)? {
//!     BeginFrame::Ready(_frame) => {
//!         // Record passes...
//!         ring.end_frame(&mut backend)?;
//!     }
//!     BeginFrame::NeedsRecreation => {
//!         // Recreate the swapchain before the next frame
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use ash::vk;
use tracing::{debug, trace};

use lumen_core::FrameClock;
use lumen_rhi::command::CommandBuffer;
use lumen_rhi::device::Device;
use lumen_rhi::swapchain::{AcquireOutcome, PresentOutcome, Swapchain};
use lumen_rhi::sync::{ACQUIRE_WAIT_STAGE, FrameSync};
use lumen_rhi::{RhiError, RhiResult};

use crate::frame::{FrameInfo, MAX_FRAMES_IN_FLIGHT};

/// GPU side of the ring.
///
/// `slot` is always in `[0, MAX_FRAMES_IN_FLIGHT)`.
pub trait FrameBackend {
    /// Block until the last submission that signaled `slot`'s fence retires.
    fn wait_for_slot(&mut self, slot: usize) -> RhiResult<()>;

    /// Acquire a presentable image, signaling `slot`'s acquire semaphore.
    fn acquire(&mut self, slot: usize) -> RhiResult<AcquireOutcome>;

    /// Unsignal `slot`'s fence. Only called once a submit is certain.
    fn reset_slot(&mut self, slot: usize) -> RhiResult<()>;

    fn begin_commands(&mut self, image_index: u32) -> RhiResult<()>;

    fn end_commands(&mut self, image_index: u32) -> RhiResult<()>;

    /// Submit the image's command buffer with `slot`'s semaphores and fence.
    fn submit(&mut self, slot: usize, image_index: u32) -> RhiResult<()>;

    fn present(&mut self, slot: usize, image_index: u32) -> RhiResult<PresentOutcome>;
}

/// Lifecycle of one synchronization slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Nothing outstanding; the fence is signaled.
    Idle,
    /// A submission for `frame_number` may still be executing.
    Submitted { frame_number: u64 },
    /// The host is blocked on the slot fence.
    WaitingOnFence,
}

/// Result of [`FrameRing::begin_frame`].
#[derive(Debug, Clone, Copy)]
pub enum BeginFrame {
    /// Recording may start; `end_frame` must follow.
    Ready(FrameInfo),
    /// Acquire reported an out-of-date swapchain. The frame was skipped and
    /// the ring already advanced.
    NeedsRecreation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ImageUser {
    slot: usize,
    frame_number: u64,
}

/// Fixed ring of [`MAX_FRAMES_IN_FLIGHT`] slots.
#[derive(Debug)]
pub struct FrameRing {
    slots: [SlotState; MAX_FRAMES_IN_FLIGHT],
    /// Last (slot, frame) to record into each swapchain image.
    image_users: Vec<Option<ImageUser>>,
    frame_index: usize,
    frame_number: u64,
    image_index: Option<u32>,
    current: Option<FrameInfo>,
    clock: FrameClock,
    last_cpu_time: Duration,
}

impl FrameRing {
    pub fn new(image_count: u32) -> Self {
        debug!(
            "Frame ring created: {} slots, {} swapchain images",
            MAX_FRAMES_IN_FLIGHT, image_count
        );
        Self {
            slots: [SlotState::Idle; MAX_FRAMES_IN_FLIGHT],
            image_users: vec![None; image_count as usize],
            frame_index: 0,
            frame_number: 0,
            image_index: None,
            current: None,
            clock: FrameClock::new(),
            last_cpu_time: Duration::ZERO,
        }
    }

    /// Slot the next `begin_frame` will use.
    #[inline]
    pub fn frame_index(&self) -> usize {
        self.frame_index
    }

    #[inline]
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    /// Image index of the most recent successful acquire.
    #[inline]
    pub fn image_index(&self) -> Option<u32> {
        self.image_index
    }

    pub fn slot_state(&self, slot: usize) -> Option<SlotState> {
        self.slots.get(slot).copied()
    }

    /// The frame between `begin_frame` and `end_frame`, if any.
    #[inline]
    pub fn current_frame(&self) -> Option<&FrameInfo> {
        self.current.as_ref()
    }

    /// CPU time from `begin_frame` to the end of `end_frame` of the last
    /// completed frame.
    #[inline]
    pub fn last_cpu_time(&self) -> Duration {
        self.last_cpu_time
    }

    /// Forget all image and slot bookkeeping after swapchain recreation.
    ///
    /// The device must be idle, which retires every slot.
    pub fn reset_images(&mut self, image_count: u32) {
        self.image_users = vec![None; image_count as usize];
        self.slots = [SlotState::Idle; MAX_FRAMES_IN_FLIGHT];
        self.image_index = None;
        debug!("Frame ring reset for {} swapchain images", image_count);
    }

    /// Wait for the current slot, acquire an image, and open its command
    /// buffer.
    ///
    /// # Errors
    ///
    /// Fails if a frame is already open or any backend call fails. An
    /// out-of-date acquire is not an error.
    pub fn begin_frame(&mut self, backend: &mut impl FrameBackend) -> RhiResult<BeginFrame> {
        if self.current.is_some() {
            return Err(RhiError::InvalidArgument(
                "begin_frame called twice without end_frame".to_string(),
            ));
        }

        let slot = self.frame_index;
        self.wait_for_frame_retirement(backend, slot)?;

        let image_index = match backend.acquire(slot)? {
            AcquireOutcome::Acquired {
                image_index,
                suboptimal,
            } => {
                if suboptimal {
                    trace!("Acquired suboptimal image {}", image_index);
                }
                image_index
            }
            AcquireOutcome::NeedsRecreation => {
                debug!(
                    "Swapchain out of date at frame {}, skipping",
                    self.frame_number
                );
                self.advance();
                return Ok(BeginFrame::NeedsRecreation);
            }
        };

        self.wait_for_image(backend, slot, image_index)?;

        backend.reset_slot(slot)?;
        backend.begin_commands(image_index)?;

        let (start, delta) = self.clock.begin();
        let frame = FrameInfo {
            frame_index: slot,
            image_index,
            frame_number: self.frame_number,
            start,
            delta,
            time: self.clock.uptime(),
        };
        self.image_index = Some(image_index);
        self.current = Some(frame);

        trace!(
            "Frame {} begun: slot {}, image {}",
            frame.frame_number, slot, image_index
        );
        Ok(BeginFrame::Ready(frame))
    }

    /// Close, submit, and present the open frame, then advance the ring.
    ///
    /// The ring advances even when this fails.
    ///
    /// # Errors
    ///
    /// Fails without an open frame, or if the backend fails. A stale present
    /// is returned as [`PresentOutcome::Stale`], not an error.
    pub fn end_frame(&mut self, backend: &mut impl FrameBackend) -> RhiResult<PresentOutcome> {
        let Some(frame) = self.current.take() else {
            return Err(RhiError::InvalidArgument(
                "end_frame called without begin_frame".to_string(),
            ));
        };

        let result = self.finish(backend, &frame);
        self.last_cpu_time = frame.start.elapsed();
        self.advance();
        result
    }

    fn finish(
        &mut self,
        backend: &mut impl FrameBackend,
        frame: &FrameInfo,
    ) -> RhiResult<PresentOutcome> {
        backend.end_commands(frame.image_index)?;
        backend.submit(frame.frame_index, frame.image_index)?;
        self.slots[frame.frame_index] = SlotState::Submitted {
            frame_number: frame.frame_number,
        };
        if let Some(user) = self.image_users.get_mut(frame.image_index as usize) {
            *user = Some(ImageUser {
                slot: frame.frame_index,
                frame_number: frame.frame_number,
            });
        }

        let outcome = backend.present(frame.frame_index, frame.image_index)?;
        if outcome == PresentOutcome::Stale {
            debug!(
                "Present of image {} reported a stale swapchain",
                frame.image_index
            );
        }
        Ok(outcome)
    }

    /// Blocks until `slot`'s previous submission has retired.
    fn wait_for_frame_retirement(
        &mut self,
        backend: &mut impl FrameBackend,
        slot: usize,
    ) -> RhiResult<()> {
        let previous = self.slots[slot];
        self.slots[slot] = SlotState::WaitingOnFence;
        if let Err(e) = backend.wait_for_slot(slot) {
            self.slots[slot] = previous;
            return Err(e);
        }
        self.slots[slot] = SlotState::Idle;
        Ok(())
    }

    /// Command buffers belong to images, not slots: if another slot's
    /// still-pending submission recorded into this image, wait for it.
    fn wait_for_image(
        &mut self,
        backend: &mut impl FrameBackend,
        slot: usize,
        image_index: u32,
    ) -> RhiResult<()> {
        let index = image_index as usize;
        if index >= self.image_users.len() {
            self.image_users.resize(index + 1, None);
        }

        let Some(user) = self.image_users[index] else {
            return Ok(());
        };
        if user.slot == slot {
            return Ok(());
        }
        if self.slots[user.slot]
            == (SlotState::Submitted {
                frame_number: user.frame_number,
            })
        {
            trace!(
                "Image {} still in flight from frame {}, waiting on slot {}",
                image_index, user.frame_number, user.slot
            );
            self.wait_for_frame_retirement(backend, user.slot)?;
        }
        Ok(())
    }

    fn advance(&mut self) {
        self.frame_index = (self.frame_index + 1) % MAX_FRAMES_IN_FLIGHT;
        self.frame_number += 1;
    }
}

/// [`FrameBackend`] over the real device, swapchain, and sync slots.
///
/// Borrowed for the duration of one frame.
pub struct VulkanFrameBackend<'a> {
    device: &'a Device,
    swapchain: &'a Swapchain,
    sync: &'a [FrameSync],
}

impl<'a> VulkanFrameBackend<'a> {
    pub fn new(device: &'a Device, swapchain: &'a Swapchain, sync: &'a [FrameSync]) -> Self {
        Self {
            device,
            swapchain,
            sync,
        }
    }

    fn slot(&self, slot: usize) -> RhiResult<&'a FrameSync> {
        self.sync.get(slot).ok_or_else(|| {
            RhiError::InvalidArgument(format!(
                "sync slot {} out of range (have {})",
                slot,
                self.sync.len()
            ))
        })
    }

    fn command_buffer(&self, image_index: u32) -> RhiResult<CommandBuffer<'a>> {
        let buffer = self.swapchain.command_buffer(image_index)?;
        Ok(CommandBuffer::new(self.device, buffer))
    }
}

impl FrameBackend for VulkanFrameBackend<'_> {
    fn wait_for_slot(&mut self, slot: usize) -> RhiResult<()> {
        self.slot(slot)?.in_flight_fence().wait_for_frame_retirement()
    }

    fn acquire(&mut self, slot: usize) -> RhiResult<AcquireOutcome> {
        let semaphore = self.slot(slot)?.image_available_semaphore().handle();
        self.swapchain
            .acquire_next_image(semaphore, vk::Fence::null())
    }

    fn reset_slot(&mut self, slot: usize) -> RhiResult<()> {
        self.slot(slot)?.in_flight_fence().reset()
    }

    fn begin_commands(&mut self, image_index: u32) -> RhiResult<()> {
        self.command_buffer(image_index)?.begin()
    }

    fn end_commands(&mut self, image_index: u32) -> RhiResult<()> {
        self.command_buffer(image_index)?.end()
    }

    fn submit(&mut self, slot: usize, image_index: u32) -> RhiResult<()> {
        let sync = self.slot(slot)?;

        let wait_semaphores = [sync.image_available_semaphore().handle()];
        let wait_stages = [ACQUIRE_WAIT_STAGE];
        let signal_semaphores = [sync.render_finished_semaphore().handle()];
        let command_buffers = [self.swapchain.command_buffer(image_index)?];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        // SAFETY: the command buffer was ended in end_commands, and the ring
        // reset this slot's fence after waiting for its previous submission.
        unsafe {
            self.device
                .submit_graphics(&[submit_info], sync.in_flight_fence().handle())
        }
    }

    fn present(&mut self, slot: usize, image_index: u32) -> RhiResult<PresentOutcome> {
        let semaphore = self.slot(slot)?.render_finished_semaphore().handle();
        self.swapchain
            .present(self.device.present_queue(), image_index, semaphore)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Wait(usize),
        Acquire(usize),
        Reset(usize),
        Begin(u32),
        End(u32),
        Submit(usize, u32),
        Present(usize, u32),
    }

    /// Records calls; acquires hand out images in order.
    struct Recorder {
        calls: Vec<Call>,
        image_count: u32,
        next_image: u32,
        out_of_date_on: Option<usize>,
        acquires: usize,
    }

    impl Recorder {
        fn new(image_count: u32) -> Self {
            Self {
                calls: Vec::new(),
                image_count,
                next_image: 0,
                out_of_date_on: None,
                acquires: 0,
            }
        }
    }

    impl FrameBackend for Recorder {
        fn wait_for_slot(&mut self, slot: usize) -> RhiResult<()> {
            self.calls.push(Call::Wait(slot));
            Ok(())
        }

        fn acquire(&mut self, slot: usize) -> RhiResult<AcquireOutcome> {
            self.calls.push(Call::Acquire(slot));
            let n = self.acquires;
            self.acquires += 1;
            if self.out_of_date_on == Some(n) {
                return Ok(AcquireOutcome::NeedsRecreation);
            }
            let image_index = self.next_image;
            self.next_image = (self.next_image + 1) % self.image_count;
            Ok(AcquireOutcome::Acquired {
                image_index,
                suboptimal: false,
            })
        }

        fn reset_slot(&mut self, slot: usize) -> RhiResult<()> {
            self.calls.push(Call::Reset(slot));
            Ok(())
        }

        fn begin_commands(&mut self, image_index: u32) -> RhiResult<()> {
            self.calls.push(Call::Begin(image_index));
            Ok(())
        }

        fn end_commands(&mut self, image_index: u32) -> RhiResult<()> {
            self.calls.push(Call::End(image_index));
            Ok(())
        }

        fn submit(&mut self, slot: usize, image_index: u32) -> RhiResult<()> {
            self.calls.push(Call::Submit(slot, image_index));
            Ok(())
        }

        fn present(&mut self, slot: usize, image_index: u32) -> RhiResult<PresentOutcome> {
            self.calls.push(Call::Present(slot, image_index));
            Ok(PresentOutcome::Presented)
        }
    }

    fn run_frame(ring: &mut FrameRing, backend: &mut Recorder) -> Option<FrameInfo> {
        match ring.begin_frame(backend).unwrap() {
            BeginFrame::Ready(frame) => {
                ring.end_frame(backend).unwrap();
                Some(frame)
            }
            BeginFrame::NeedsRecreation => None,
        }
    }

    #[test]
    fn first_frame_call_order() {
        let mut ring = FrameRing::new(3);
        let mut backend = Recorder::new(3);

        run_frame(&mut ring, &mut backend);

        assert_eq!(
            backend.calls,
            vec![
                Call::Wait(0),
                Call::Acquire(0),
                Call::Reset(0),
                Call::Begin(0),
                Call::End(0),
                Call::Submit(0, 0),
                Call::Present(0, 0),
            ]
        );
        assert_eq!(ring.frame_index(), 1);
        assert_eq!(ring.slot_state(0), Some(SlotState::Submitted { frame_number: 0 }));
    }

    #[test]
    fn out_of_date_skips_reset_and_submit() {
        let mut ring = FrameRing::new(3);
        let mut backend = Recorder::new(3);
        backend.out_of_date_on = Some(0);

        assert!(run_frame(&mut ring, &mut backend).is_none());
        assert_eq!(backend.calls, vec![Call::Wait(0), Call::Acquire(0)]);
        assert_eq!(ring.frame_index(), 1);
        assert_eq!(ring.image_index(), None);
        assert!(ring.current_frame().is_none());
    }

    #[test]
    fn end_without_begin_is_rejected() {
        let mut ring = FrameRing::new(2);
        let mut backend = Recorder::new(2);
        assert!(matches!(
            ring.end_frame(&mut backend),
            Err(RhiError::InvalidArgument(_))
        ));
    }

    #[test]
    fn double_begin_is_rejected() {
        let mut ring = FrameRing::new(2);
        let mut backend = Recorder::new(2);
        ring.begin_frame(&mut backend).unwrap();
        assert!(matches!(
            ring.begin_frame(&mut backend),
            Err(RhiError::InvalidArgument(_))
        ));
    }

    #[test]
    fn image_guard_waits_on_other_slot() {
        // One image shared by both slots: frame 1 must wait for slot 0,
        // which still holds frame 0's submission.
        let mut ring = FrameRing::new(1);
        let mut backend = Recorder::new(1);

        run_frame(&mut ring, &mut backend);
        backend.calls.clear();
        run_frame(&mut ring, &mut backend);

        assert_eq!(
            &backend.calls[..4],
            &[
                Call::Wait(1),
                Call::Acquire(1),
                Call::Wait(0),
                Call::Reset(1),
            ]
        );
        assert_eq!(ring.slot_state(0), Some(SlotState::Idle));
    }

    #[test]
    fn image_guard_ignores_retired_users() {
        // Three images over two slots: image 0 comes back at frame 3, by
        // which time slot 0 has been waited on and reused by frame 2.
        let mut ring = FrameRing::new(3);
        let mut backend = Recorder::new(3);

        for _ in 0..3 {
            run_frame(&mut ring, &mut backend);
        }
        backend.calls.clear();
        run_frame(&mut ring, &mut backend);

        assert_eq!(
            &backend.calls[..3],
            &[Call::Wait(1), Call::Acquire(1), Call::Reset(1)]
        );
    }

    #[test]
    fn reset_images_clears_bookkeeping() {
        let mut ring = FrameRing::new(2);
        let mut backend = Recorder::new(2);
        run_frame(&mut ring, &mut backend);

        ring.reset_images(4);
        assert_eq!(ring.image_index(), None);
        assert_eq!(ring.slot_state(0), Some(SlotState::Idle));
        // The frame counter survives recreation.
        assert_eq!(ring.frame_index(), 1);
        assert_eq!(ring.frame_number(), 1);
    }
}
