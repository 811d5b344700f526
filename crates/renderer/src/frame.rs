//! Frame-scoped state shared by the ring, the passes, and the app.

use std::ops::Index;
use std::time::{Duration, Instant};

pub use lumen_rhi::sync::MAX_FRAMES_IN_FLIGHT;

/// Snapshot of the frame being recorded.
///
/// `frame_index` selects the synchronization slot and every per-frame
/// resource; `image_index` is whatever the swapchain handed out and has no
/// fixed relation to it.
#[derive(Debug, Clone, Copy)]
pub struct FrameInfo {
    /// Slot in `[0, MAX_FRAMES_IN_FLIGHT)`.
    pub frame_index: usize,
    /// Swapchain image recorded into this frame.
    pub image_index: u32,
    /// Monotonic frame counter; advances together with `frame_index`.
    pub frame_number: u64,
    /// When `begin_frame` stamped this frame.
    pub start: Instant,
    /// Time between the previous frame's start and this one's.
    pub delta: Duration,
    /// Time since the ring was created.
    pub time: Duration,
}

impl FrameInfo {
    #[inline]
    pub fn delta_secs(&self) -> f32 {
        self.delta.as_secs_f32()
    }
}

/// Exactly one `T` per frame-in-flight slot.
///
/// Sized by [`MAX_FRAMES_IN_FLIGHT`] and never by the swapchain image count,
/// so swapchain recreation cannot change how many there are.
#[derive(Debug)]
pub struct PerFrame<T> {
    items: Vec<T>,
}

impl<T> PerFrame<T> {
    /// Build one item per slot.
    pub fn new(mut make: impl FnMut(usize) -> T) -> Self {
        Self {
            items: (0..MAX_FRAMES_IN_FLIGHT).map(&mut make).collect(),
        }
    }

    /// Build one item per slot, stopping at the first failure.
    pub fn try_new<E>(make: impl FnMut(usize) -> Result<T, E>) -> Result<Self, E> {
        let items = (0..MAX_FRAMES_IN_FLIGHT)
            .map(make)
            .collect::<Result<Vec<_>, E>>()?;
        Ok(Self { items })
    }

    #[inline]
    pub fn get(&self, slot: usize) -> Option<&T> {
        self.items.get(slot)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }
}

impl<T> Index<usize> for PerFrame<T> {
    type Output = T;

    fn index(&self, slot: usize) -> &T {
        &self.items[slot]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_frame_has_one_item_per_slot() {
        let slots = PerFrame::new(|slot| slot * 10);
        assert_eq!(slots.len(), MAX_FRAMES_IN_FLIGHT);
        assert_eq!(slots[1], 10);
        assert!(slots.get(MAX_FRAMES_IN_FLIGHT).is_none());
    }

    #[test]
    fn try_new_stops_at_first_error() {
        let mut calls = 0;
        let result: Result<PerFrame<u32>, &str> = PerFrame::try_new(|slot| {
            calls += 1;
            if slot == 0 { Err("boom") } else { Ok(1) }
        });
        assert_eq!(result.unwrap_err(), "boom");
        assert_eq!(calls, 1);
    }
}
