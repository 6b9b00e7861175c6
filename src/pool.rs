//! Buffer pool: kernel-mapped frame buffers and their queue protocol.
//!
//! Each mapping is an owned, move-only resource unmapped exactly once on
//! drop. The pool also tags every buffer with its position in the device's
//! two-queue protocol, so an invalid transition (the classic double-release)
//! is an error instead of silent memory corruption.

use std::ptr::NonNull;

use nix::sys::mman::munmap;

use crate::control::DeviceControl;
use crate::error::{CaptureError, Result};

/// Double-buffering is the minimum for capture that does not stall.
pub const MIN_BUFFERS: u32 = 2;

enum Backing {
    Mmap,
    #[cfg(test)]
    Heap,
}

/// One buffer's mapping into process memory, shared with the kernel.
///
/// The type is move-only: the address is unmapped exactly once, when the
/// value drops.
pub struct MappedBuffer {
    ptr: NonNull<u8>,
    len: usize,
    backing: Backing,
}

impl MappedBuffer {
    /// Take ownership of a fresh `mmap` region.
    ///
    /// # Safety
    ///
    /// `ptr` must point to a live mapping of exactly `len` bytes that no
    /// other owner will unmap.
    pub(crate) const unsafe fn from_mmap(ptr: NonNull<u8>, len: usize) -> Self {
        Self {
            ptr,
            len,
            backing: Backing::Mmap,
        }
    }

    /// Heap-backed stand-in used by the hardware-free test double.
    #[cfg(test)]
    pub(crate) fn from_vec(data: Vec<u8>) -> Self {
        let boxed = data.into_boxed_slice();
        let len = boxed.len();
        let raw = Box::into_raw(boxed);
        Self {
            // SAFETY: `Box::into_raw` never returns null.
            ptr: unsafe { NonNull::new_unchecked(raw.cast::<u8>()) },
            len,
            backing: Backing::Heap,
        }
    }

    /// Length of the mapping in bytes.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether the mapping is zero-sized.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The mapped bytes.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: the mapping is valid for `len` bytes until drop, and the
        // pool hands out a buffer's contents only while the device is not
        // writing it (Held state).
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for MappedBuffer {
    fn drop(&mut self) {
        match self.backing {
            Backing::Mmap => {
                // SAFETY: `ptr`/`len` describe a mapping this value owns;
                // drop runs at most once.
                let _ = unsafe { munmap(self.ptr.cast(), self.len) };
            }
            #[cfg(test)]
            Backing::Heap => {
                let raw = std::ptr::slice_from_raw_parts_mut(self.ptr.as_ptr(), self.len);
                // SAFETY: `ptr`/`len` came from `Box::into_raw` in
                // `from_vec`; drop runs at most once.
                drop(unsafe { Box::from_raw(raw) });
            }
        }
    }
}

/// Where a buffer currently sits in the device's two-queue protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    /// Neither queued to the device nor held by a consumer.
    Free,
    /// In the device's incoming queue; the device may write it.
    Queued,
    /// Held by a consumer as a frame; the device must not touch it.
    Held,
}

struct Slot {
    mapping: MappedBuffer,
    state: BufferState,
}

/// An ordered set of kernel-mapped buffers reserved from the device.
pub struct BufferPool {
    slots: Vec<Slot>,
}

impl BufferPool {
    /// Reserve `requested` buffers from the device and map every granted
    /// one.
    ///
    /// The driver may grant fewer than requested; fewer than [`MIN_BUFFERS`]
    /// fails with [`CaptureError::InsufficientBuffers`]. If any single
    /// mapping fails, all mappings made earlier in the batch are unmapped
    /// and the kernel reservation is released before the error returns — a
    /// partial pool never survives.
    pub fn allocate<C: DeviceControl>(control: &mut C, requested: u32) -> Result<Self> {
        let granted = control.request_buffers(requested)?;
        if granted < MIN_BUFFERS {
            let _ = control.request_buffers(0);
            return Err(CaptureError::InsufficientBuffers { requested, granted });
        }

        match Self::map_all(control, granted) {
            Ok(slots) => Ok(Self { slots }),
            Err(err) => {
                // The partially built Vec has already dropped its mappings.
                let _ = control.request_buffers(0);
                Err(err)
            }
        }
    }

    fn map_all<C: DeviceControl>(control: &mut C, granted: u32) -> Result<Vec<Slot>> {
        let mut slots = Vec::with_capacity(granted as usize);
        for index in 0..granted {
            let mapped = control
                .query_buffer(index)
                .and_then(|descriptor| control.map_buffer(&descriptor))
                .map_err(|source| CaptureError::MapFailed {
                    index,
                    source: Box::new(source),
                })?;
            slots.push(Slot {
                mapping: mapped,
                state: BufferState::Free,
            });
        }
        Ok(slots)
    }

    /// Number of mapped buffers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the pool holds no mappings (after `release_all`).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// The protocol state of one buffer.
    #[must_use]
    pub fn state(&self, index: u32) -> Option<BufferState> {
        self.slots.get(index as usize).map(|slot| slot.state)
    }

    /// The mapped bytes of one buffer.
    #[must_use]
    pub fn data(&self, index: u32) -> Option<&[u8]> {
        self.slots
            .get(index as usize)
            .map(|slot| slot.mapping.as_slice())
    }

    /// Record that a buffer entered the device's incoming queue.
    pub(crate) fn note_queued(&mut self, index: u32) -> Result<()> {
        self.transition(index, "enqueue", |state| {
            matches!(state, BufferState::Free | BufferState::Held).then_some(BufferState::Queued)
        })
    }

    /// Record that a buffer was dequeued and is now held by a consumer.
    pub(crate) fn note_held(&mut self, index: u32) -> Result<()> {
        self.transition(index, "dequeue", |state| {
            matches!(state, BufferState::Queued).then_some(BufferState::Held)
        })
    }

    /// Drop a buffer back to `Free` regardless of its state; used when the
    /// stream stops and the kernel forgets its queues.
    pub(crate) fn note_free(&mut self, index: u32) {
        if let Some(slot) = self.slots.get_mut(index as usize) {
            slot.state = BufferState::Free;
        }
    }

    /// All buffers back to `Free`; the kernel side was cleared by
    /// `VIDIOC_STREAMOFF`.
    pub(crate) fn reset_states(&mut self) {
        for slot in &mut self.slots {
            slot.state = BufferState::Free;
        }
    }

    fn transition<F>(&mut self, index: u32, operation: &'static str, next: F) -> Result<()>
    where
        F: FnOnce(BufferState) -> Option<BufferState>,
    {
        let slot = self
            .slots
            .get_mut(index as usize)
            .ok_or(CaptureError::BufferProtocol {
                operation,
                index,
                state: BufferState::Free,
            })?;
        match next(slot.state) {
            Some(state) => {
                slot.state = state;
                Ok(())
            }
            None => Err(CaptureError::BufferProtocol {
                operation,
                index,
                state: slot.state,
            }),
        }
    }

    /// Unmap every buffer. Idempotent; called on teardown.
    pub fn release_all(&mut self) {
        self.slots.clear();
    }
}
