//! Deferred resource deletion for multi-frame-in-flight rendering.
//!
//! With several frames in flight a resource cannot be freed the moment the caller lets go of it:
//! a command buffer that is still executing may reference it. The queue holds resources until
//! enough frames have passed for every such command buffer to have retired.

use crate::buffer::Buffer;
use crate::error::Result;
use crate::nbuffer::NBuffer;
use crate::slots::TextureId;
use std::collections::VecDeque;

/// A resource waiting for the GPU to stop using it.
pub enum PendingResource {
    /// Retired texture; its bindless index is released once it is destroyed
    Texture(TextureId),
    Buffer(Buffer),
    NBuffer(NBuffer),
}

impl std::fmt::Debug for PendingResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Texture(id) => f.debug_tuple("Texture").field(id).finish(),
            Self::Buffer(buffer) => f.debug_tuple("Buffer").field(&buffer.name()).finish(),
            Self::NBuffer(nbuffer) => f.debug_tuple("NBuffer").field(&nbuffer.name()).finish(),
        }
    }
}

struct PendingDeletion<T> {
    resource: T,
    frame_queued: u64,
}

/// Queue for deferred deletions.
///
/// Resources are queued with the frame number current at the time and handed to the release
/// callback once `frames_in_flight` further frames have been submitted.
pub struct DeferredDeletionQueue<T = PendingResource> {
    pending: VecDeque<PendingDeletion<T>>,
    frames_in_flight: usize,
}

impl<T> DeferredDeletionQueue<T> {
    pub fn new(frames_in_flight: usize) -> Self {
        Self {
            pending: VecDeque::new(),
            frames_in_flight,
        }
    }

    /// Queue `resource`, last used by frame `frame_number`.
    pub fn queue(&mut self, resource: T, frame_number: u64) {
        debug_assert!(
            self.pending
                .back()
                .map_or(true, |last| last.frame_queued <= frame_number),
            "deferred deletions must be queued in frame order"
        );
        self.pending.push_back(PendingDeletion {
            resource,
            frame_queued: frame_number,
        });
    }

    /// Release resources no frame in flight can still reference.
    ///
    /// Call at the start of each frame, after waiting on that frame's fence.
    pub fn process<F>(&mut self, current_frame_number: u64, mut release: F) -> Result<()>
    where
        F: FnMut(T) -> Result<()>,
    {
        let cutoff = current_frame_number.saturating_sub(self.frames_in_flight as u64);

        // Queue order is FIFO and frame numbers are non-decreasing, so only the front can mature.
        while self
            .pending
            .front()
            .is_some_and(|p| p.frame_queued < cutoff)
        {
            if let Some(pending) = self.pending.pop_front() {
                release(pending.resource)?;
            }
        }

        Ok(())
    }

    /// Release everything immediately.
    ///
    /// Only valid once the device is idle.
    pub fn flush<F>(&mut self, mut release: F) -> Result<()>
    where
        F: FnMut(T) -> Result<()>,
    {
        while let Some(pending) = self.pending.pop_front() {
            release(pending.resource)?;
        }
        Ok(())
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }
}
