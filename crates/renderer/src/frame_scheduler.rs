//! Frames-in-flight scheduling.
//!
//! [`FrameScheduler`] drives one frame per [`FrameScheduler::draw_frame`]
//! call against a [`FrameBackend`]. It owns the per-slot sync objects and the
//! per-image fence bookkeeping. The backend owns everything else (the
//! swapchain, the drawables, the queues).
//!
//! # Synchronization Flow
//!
//! ```text
//! 1. Wait on the slot's in-flight fence (CPU waits for the slot's last use)
//! 2. Acquire an image (signals the slot's image-available semaphore)
//!    - out of date: recreate the swapchain, nothing is submitted
//! 3. Wait on the fence of the slot that last rendered this image, if any
//! 4. Record this slot against the image, update that image's uniforms
//! 5. Submit the image's command buffer:
//!    - wait on image-available
//!    - signal render-finished and the slot's in-flight fence
//! 6. Present (waits on render-finished)
//!    - out of date, suboptimal or resized: recreate after presenting
//! 7. Advance to the next slot, modulo the number of slots
//! ```
//!
//! A zero-sized framebuffer (minimized window) defers recreation. The
//! scheduler keeps the recreate pending and returns
//! [`FrameOutcome::Minimized`] without touching the GPU until the size is
//! nonzero again.

use tracing::{debug, info, trace};

use turt_rhi::RhiResult;

/// Result of acquiring a presentable image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired { image_index: u32, suboptimal: bool },
    /// The swapchain no longer matches the surface.
    OutOfDate,
}

/// Result of queueing an image for presentation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    OutOfDate,
}

/// What a call to [`FrameScheduler::draw_frame`] did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    /// A frame was submitted and presented.
    Presented,
    /// The swapchain was recreated. A frame may or may not have been
    /// presented before recreation.
    SwapchainRecreated,
    /// The framebuffer has a zero dimension. Nothing was acquired or
    /// submitted and recreation stays pending.
    Minimized,
}

/// Where a frame slot is in its cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FrameState {
    #[default]
    Idle,
    Acquiring,
    Recording,
    Submitted,
    Presenting,
}

/// Operations the scheduler needs from the GPU side.
///
/// The Vulkan implementation lives in [`crate::engine`]. Tests substitute a
/// recording mock.
pub trait FrameBackend {
    /// Sync objects for one frame slot: an image-available semaphore, a
    /// render-finished semaphore and an in-flight fence created signaled.
    type SlotSync;

    fn create_slot_sync(&mut self) -> RhiResult<Self::SlotSync>;

    /// Blocks until the slot's in-flight fence is signaled.
    fn wait_for_slot(&mut self, sync: &Self::SlotSync) -> RhiResult<()>;

    fn acquire_next_image(&mut self, sync: &Self::SlotSync) -> RhiResult<AcquireOutcome>;

    /// Writes every drawable's uniforms for `image_index`.
    fn update_uniforms(&mut self, image_index: u32) -> RhiResult<()>;

    /// Resets the slot's fence and submits the command buffer recorded for
    /// `image_index`.
    fn submit(&mut self, sync: &Self::SlotSync, image_index: u32) -> RhiResult<()>;

    fn present(&mut self, sync: &Self::SlotSync, image_index: u32) -> RhiResult<PresentOutcome>;

    /// Current window framebuffer size in pixels.
    fn framebuffer_extent(&self) -> (u32, u32);

    /// Returns and clears the external resize flag.
    fn take_resize_request(&mut self) -> bool;

    /// Waits for the device, then rebuilds every swapchain-sized resource for
    /// a `width` x `height` framebuffer. Clears any pending resize request.
    fn recreate_swapchain(&mut self, width: u32, height: u32) -> RhiResult<()>;

    fn image_count(&self) -> usize;
}

/// One frame-in-flight slot.
#[derive(Debug)]
pub struct FrameSlot<S> {
    sync: S,
    state: FrameState,
}

impl<S> FrameSlot<S> {
    #[inline]
    pub fn sync(&self) -> &S {
        &self.sync
    }

    #[inline]
    pub fn state(&self) -> FrameState {
        self.state
    }
}

pub struct FrameScheduler<S> {
    slots: Vec<FrameSlot<S>>,
    /// For each swapchain image, the slot whose submission last used it.
    images_in_flight: Vec<Option<usize>>,
    current_slot: usize,
    recreate_pending: bool,
}

impl<S> FrameScheduler<S> {
    /// Creates `frames_in_flight` slots (at least one) using `backend`.
    pub fn new<B>(backend: &mut B, frames_in_flight: usize) -> RhiResult<Self>
    where
        B: FrameBackend<SlotSync = S>,
    {
        let count = frames_in_flight.max(1);
        let slots = (0..count)
            .map(|_| {
                Ok(FrameSlot {
                    sync: backend.create_slot_sync()?,
                    state: FrameState::Idle,
                })
            })
            .collect::<RhiResult<Vec<_>>>()?;

        info!("Frame scheduler ready with {} frames in flight", count);

        Ok(Self {
            slots,
            images_in_flight: vec![None; backend.image_count()],
            current_slot: 0,
            recreate_pending: false,
        })
    }

    /// Renders and presents one frame, or recreates the swapchain when it has
    /// gone stale.
    ///
    /// # Errors
    ///
    /// Only fatal device errors. Out-of-date and suboptimal swapchains are
    /// handled here and never surface as errors.
    pub fn draw_frame<B>(&mut self, backend: &mut B) -> RhiResult<FrameOutcome>
    where
        B: FrameBackend<SlotSync = S>,
    {
        let (width, height) = backend.framebuffer_extent();
        if self.recreate_pending || width == 0 || height == 0 {
            return self.recreate(backend);
        }

        let slot = self.current_slot;

        self.slots[slot].state = FrameState::Acquiring;
        backend.wait_for_slot(&self.slots[slot].sync)?;

        let image_index = match backend.acquire_next_image(&self.slots[slot].sync)? {
            AcquireOutcome::Acquired {
                image_index,
                suboptimal,
            } => {
                if suboptimal {
                    trace!("Acquired image {} from a suboptimal swapchain", image_index);
                }
                image_index
            }
            AcquireOutcome::OutOfDate => {
                debug!("Swapchain out of date on acquire");
                self.slots[slot].state = FrameState::Idle;
                return self.recreate(backend);
            }
        };
        let image = image_index as usize;

        if image >= self.images_in_flight.len() {
            self.images_in_flight.resize(image + 1, None);
        }
        if let Some(previous) = self.images_in_flight[image]
            && previous != slot
        {
            backend.wait_for_slot(&self.slots[previous].sync)?;
        }
        self.images_in_flight[image] = Some(slot);

        self.slots[slot].state = FrameState::Recording;
        backend.update_uniforms(image_index)?;

        backend.submit(&self.slots[slot].sync, image_index)?;
        self.slots[slot].state = FrameState::Submitted;

        trace!("Slot {} submitted image {}", slot, image_index);
        self.slots[slot].state = FrameState::Presenting;
        let presented = backend.present(&self.slots[slot].sync, image_index)?;
        let resized = backend.take_resize_request();

        self.slots[slot].state = FrameState::Idle;
        self.current_slot = (self.current_slot + 1) % self.slots.len();

        match presented {
            PresentOutcome::Presented if !resized => Ok(FrameOutcome::Presented),
            outcome => {
                debug!("Recreating after present ({:?}, resized: {})", outcome, resized);
                self.recreate(backend)
            }
        }
    }

    fn recreate<B>(&mut self, backend: &mut B) -> RhiResult<FrameOutcome>
    where
        B: FrameBackend<SlotSync = S>,
    {
        let (width, height) = backend.framebuffer_extent();
        if width == 0 || height == 0 {
            if !self.recreate_pending {
                info!("Framebuffer is {}x{}, waiting for a nonzero size", width, height);
            }
            self.recreate_pending = true;
            return Ok(FrameOutcome::Minimized);
        }

        backend.recreate_swapchain(width, height)?;
        self.recreate_pending = false;

        // The device is idle after recreation, so no recorded fence is pending.
        self.images_in_flight.clear();
        self.images_in_flight.resize(backend.image_count(), None);

        Ok(FrameOutcome::SwapchainRecreated)
    }

    /// Index of the slot the next frame will use.
    #[inline]
    pub fn current_slot(&self) -> usize {
        self.current_slot
    }

    #[inline]
    pub fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn slots(&self) -> &[FrameSlot<S>] {
        &self.slots
    }

    /// `true` while a recreate is waiting for a nonzero framebuffer.
    #[inline]
    pub fn is_recreate_pending(&self) -> bool {
        self.recreate_pending
    }

    /// Slot recorded against each swapchain image.
    #[inline]
    pub fn images_in_flight(&self) -> &[Option<usize>] {
        &self.images_in_flight
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Backend that always succeeds with a fixed number of images.
    struct NullBackend {
        images: usize,
        next_image: u32,
        created: usize,
    }

    impl FrameBackend for NullBackend {
        type SlotSync = usize;

        fn create_slot_sync(&mut self) -> RhiResult<usize> {
            self.created += 1;
            Ok(self.created - 1)
        }

        fn wait_for_slot(&mut self, _sync: &usize) -> RhiResult<()> {
            Ok(())
        }

        fn acquire_next_image(&mut self, _sync: &usize) -> RhiResult<AcquireOutcome> {
            let image_index = self.next_image;
            self.next_image = (self.next_image + 1) % self.images as u32;
            Ok(AcquireOutcome::Acquired {
                image_index,
                suboptimal: false,
            })
        }

        fn update_uniforms(&mut self, _image_index: u32) -> RhiResult<()> {
            Ok(())
        }

        fn submit(&mut self, _sync: &usize, _image_index: u32) -> RhiResult<()> {
            Ok(())
        }

        fn present(&mut self, _sync: &usize, _image_index: u32) -> RhiResult<PresentOutcome> {
            Ok(PresentOutcome::Presented)
        }

        fn framebuffer_extent(&self) -> (u32, u32) {
            (800, 600)
        }

        fn take_resize_request(&mut self) -> bool {
            false
        }

        fn recreate_swapchain(&mut self, _width: u32, _height: u32) -> RhiResult<()> {
            Ok(())
        }

        fn image_count(&self) -> usize {
            self.images
        }
    }

    fn backend(images: usize) -> NullBackend {
        NullBackend {
            images,
            next_image: 0,
            created: 0,
        }
    }

    #[test]
    fn test_new_creates_one_sync_per_slot() {
        let mut backend = backend(3);
        let scheduler = FrameScheduler::new(&mut backend, 2).unwrap();

        assert_eq!(backend.created, 2);
        assert_eq!(scheduler.frames_in_flight(), 2);
        assert_eq!(scheduler.images_in_flight().len(), 3);
        assert!(scheduler.slots().iter().all(|s| s.state() == FrameState::Idle));
    }

    #[test]
    fn test_zero_frames_in_flight_clamps_to_one() {
        let mut backend = backend(2);
        let scheduler = FrameScheduler::new(&mut backend, 0).unwrap();
        assert_eq!(scheduler.frames_in_flight(), 1);
    }

    #[test]
    fn test_slot_advances_modulo_count() {
        let mut backend = backend(3);
        let mut scheduler = FrameScheduler::new(&mut backend, 3).unwrap();

        let mut seen = Vec::new();
        for _ in 0..7 {
            seen.push(scheduler.current_slot());
            assert_eq!(
                scheduler.draw_frame(&mut backend).unwrap(),
                FrameOutcome::Presented
            );
        }

        assert_eq!(seen, vec![0, 1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn test_image_records_last_slot() {
        let mut backend = backend(3);
        let mut scheduler = FrameScheduler::new(&mut backend, 2).unwrap();

        scheduler.draw_frame(&mut backend).unwrap();
        scheduler.draw_frame(&mut backend).unwrap();

        assert_eq!(scheduler.images_in_flight(), &[Some(0), Some(1), None]);
    }

    #[test]
    fn test_slots_return_to_idle() {
        let mut backend = backend(2);
        let mut scheduler = FrameScheduler::new(&mut backend, 2).unwrap();

        scheduler.draw_frame(&mut backend).unwrap();
        assert!(scheduler.slots().iter().all(|s| s.state() == FrameState::Idle));
    }
}
