//! Owner of every device-memory-backed resource the renderer creates.
//!
//! Resources live in generational pools and are addressed by small `Copy`
//! handles. Removing a resource bumps its slot generation, so a stale handle
//! fails the lookup instead of aliasing whatever reuses the slot.
//!
//! Images the presentation engine owns never enter the arena; they are
//! passed around as [`crate::swapchain::SwapchainImage`] values and show up
//! as [`ImageOwner::Borrowed`] wherever ownership matters.

use std::marker::PhantomData;

use ash::vk;

use crate::error::{RhiError, RhiResult};
use crate::memory::{Buffer, Image};

/// Typed index into a [`Pool`].
pub struct Handle<T> {
    index: u32,
    generation: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    #[inline]
    pub fn index(&self) -> u32 {
        self.index
    }

    #[inline]
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<T> Eq for Handle<T> {}

impl<T> std::fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Handle({}v{})", self.index, self.generation)
    }
}

pub type ImageHandle = Handle<Image>;
pub type BufferHandle = Handle<Buffer>;

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Generational storage with slot reuse.
pub struct Pool<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
}

impl<T> Default for Pool<T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }
}

impl<T> Pool<T> {
    pub fn insert(&mut self, value: T) -> Handle<T> {
        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index as usize].value = Some(value);
                index
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    value: Some(value),
                });
                (self.slots.len() - 1) as u32
            }
        };

        Handle {
            index,
            generation: self.slots[index as usize].generation,
            _marker: PhantomData,
        }
    }

    pub fn get(&self, handle: Handle<T>) -> Option<&T> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_ref())
    }

    pub fn remove(&mut self, handle: Handle<T>) -> Option<T> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        Some(value)
    }

    /// Live values.
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every value, invalidating all outstanding handles.
    pub fn clear(&mut self) {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.value.take().is_some() {
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(index as u32);
            }
        }
    }
}

/// Who destroys an image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageOwner {
    /// Destroyed with the arena entry.
    Owned(ImageHandle),
    /// Destroyed by the presentation engine with its swapchain.
    Borrowed,
}

/// Device resources owned by the renderer.
#[derive(Default)]
pub struct ResourceArena {
    images: Pool<Image>,
    buffers: Pool<Buffer>,
}

impl ResourceArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_image(&mut self, image: Image) -> ImageHandle {
        self.images.insert(image)
    }

    pub fn insert_buffer(&mut self, buffer: Buffer) -> BufferHandle {
        self.buffers.insert(buffer)
    }

    /// # Errors
    ///
    /// Returns [`RhiError::InvalidArgument`] for a removed or foreign handle.
    pub fn image(&self, handle: ImageHandle) -> RhiResult<&Image> {
        self.images
            .get(handle)
            .ok_or_else(|| RhiError::InvalidArgument(format!("stale image {handle:?}")))
    }

    /// # Errors
    ///
    /// Returns [`RhiError::InvalidArgument`] for a removed or foreign handle.
    pub fn buffer(&self, handle: BufferHandle) -> RhiResult<&Buffer> {
        self.buffers
            .get(handle)
            .ok_or_else(|| RhiError::InvalidArgument(format!("stale buffer {handle:?}")))
    }

    /// Raw handle and view of an owned image.
    pub fn image_views(&self, handle: ImageHandle) -> RhiResult<(vk::Image, vk::ImageView)> {
        self.image(handle).map(|image| (image.handle(), image.view()))
    }

    /// Destroy an image. The caller must know the GPU no longer uses it.
    pub fn destroy_image(&mut self, handle: ImageHandle) -> RhiResult<()> {
        self.images
            .remove(handle)
            .map(drop)
            .ok_or_else(|| RhiError::InvalidArgument(format!("stale image {handle:?}")))
    }

    /// Destroy a buffer. The caller must know the GPU no longer uses it.
    pub fn destroy_buffer(&mut self, handle: BufferHandle) -> RhiResult<()> {
        self.buffers
            .remove(handle)
            .map(drop)
            .ok_or_else(|| RhiError::InvalidArgument(format!("stale buffer {handle:?}")))
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    /// Destroy everything. Call only after the device is idle.
    pub fn clear(&mut self) {
        self.images.clear();
        self.buffers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_get() {
        let mut pool = Pool::default();
        let a = pool.insert("a");
        let b = pool.insert("b");

        assert_eq!(pool.get(a), Some(&"a"));
        assert_eq!(pool.get(b), Some(&"b"));
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn stale_handle_misses_after_slot_reuse() {
        let mut pool = Pool::default();
        let old = pool.insert(1);
        assert_eq!(pool.remove(old), Some(1));

        let new = pool.insert(2);
        assert_eq!(new.index(), old.index());
        assert_ne!(new.generation(), old.generation());
        assert_eq!(pool.get(old), None);
        assert_eq!(pool.get(new), Some(&2));
        assert_eq!(pool.remove(old), None);
    }

    #[test]
    fn double_remove_fails() {
        let mut pool = Pool::default();
        let h = pool.insert(7u32);
        assert!(pool.remove(h).is_some());
        assert!(pool.remove(h).is_none());
        assert!(pool.is_empty());
    }

    #[test]
    fn clear_invalidates_all_handles() {
        let mut pool = Pool::default();
        let handles: Vec<_> = (0..4).map(|i| pool.insert(i)).collect();
        pool.clear();

        assert!(pool.is_empty());
        assert!(handles.iter().all(|h| pool.get(*h).is_none()));

        let reused = pool.insert(9);
        assert!(handles.iter().all(|h| *h != reused));
    }

    #[test]
    fn empty_arena_rejects_foreign_handles() {
        let mut owner = Pool::<Image>::default();
        // A handle minted by another pool must not resolve here.
        let foreign = Handle::<Image> {
            index: 0,
            generation: 0,
            _marker: PhantomData,
        };
        assert!(owner.get(foreign).is_none());
        assert!(owner.remove(foreign).is_none());

        let arena = ResourceArena::new();
        assert!(matches!(
            arena.image(foreign),
            Err(RhiError::InvalidArgument(_))
        ));
        assert_eq!(arena.image_count(), 0);
        assert_eq!(arena.buffer_count(), 0);
    }
}
