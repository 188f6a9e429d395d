//! CPU/GPU frame pacing over the queue fence.
//!
//! # Overview
//!
//! The CPU may run up to `F` frames ahead of the GPU. Each frame slot
//! remembers the fence value signaled at the end of its last frame; before
//! the slot's command lists and descriptor tables are reused, the CPU
//! blocks until the GPU has reached that value.
//!
//! ```text
//! slot:   Recording ──fence()──► Submitted(v) ──GPU reaches v──► Reusable
//! ```
//!
//! The fence counter only grows, so a single queue fence serves every slot.

use std::sync::Arc;

use cadence_rhi::GpuDevice;
use tracing::trace;

use crate::error::RenderResult;

/// Fence counter plus per-slot "last submitted" values.
pub struct FramePacer {
    device: Arc<dyn GpuDevice>,
    fence_value: u64,
    slot_values: Vec<u64>,
    frame_index: usize,
}

impl FramePacer {
    /// Creates a pacer for `frames_in_flight` slots, starting at slot 0.
    ///
    /// # Panics
    ///
    /// Panics if `frames_in_flight` is zero.
    pub fn new(device: Arc<dyn GpuDevice>, frames_in_flight: usize) -> Self {
        assert!(frames_in_flight > 0, "at least one frame slot is required");
        Self {
            device,
            fence_value: 0,
            slot_values: vec![0; frames_in_flight],
            frame_index: 0,
        }
    }

    /// Slot being recorded.
    #[inline]
    pub fn frame_index(&self) -> usize {
        self.frame_index
    }

    #[inline]
    pub fn frames_in_flight(&self) -> usize {
        self.slot_values.len()
    }

    /// Last fence value signaled.
    #[inline]
    pub fn fence_value(&self) -> u64 {
        self.fence_value
    }

    /// Fence value recorded for `slot`; zero if it never submitted.
    #[inline]
    pub fn slot_value(&self, slot: usize) -> u64 {
        self.slot_values[slot]
    }

    /// Slot that follows the current one.
    #[inline]
    pub fn next_frame_index(&self) -> usize {
        (self.frame_index + 1) % self.slot_values.len()
    }

    /// Signals the next fence value behind all submitted work and records
    /// it for the current slot.
    pub fn fence(&mut self) -> RenderResult<u64> {
        let value = self.fence_value + 1;
        self.device.signal(value)?;
        self.fence_value = value;
        self.slot_values[self.frame_index] = value;
        trace!("Frame slot {} fenced at {}", self.frame_index, value);
        Ok(value)
    }

    /// Blocks until the GPU reaches `value`. Returns at once if it has.
    pub fn wait_for_fence_value(&self, value: u64) -> RenderResult<()> {
        if value == 0 || self.device.completed_value()? >= value {
            return Ok(());
        }
        trace!("Waiting for fence value {}", value);
        self.device.wait_for_value(value)?;
        Ok(())
    }

    /// Blocks until `slot`'s resources are no longer used by the GPU.
    pub fn wait_for_slot(&self, slot: usize) -> RenderResult<()> {
        self.wait_for_fence_value(self.slot_values[slot])
    }

    /// Whether the GPU is done with `slot`, without blocking.
    pub fn is_slot_reusable(&self, slot: usize) -> RenderResult<bool> {
        Ok(self.device.completed_value()? >= self.slot_values[slot])
    }

    /// Moves on to the next slot and returns it.
    pub fn advance(&mut self) -> usize {
        self.frame_index = self.next_frame_index();
        self.frame_index
    }

    /// Fences and waits: every submission so far has retired on return.
    pub fn wait_for_gpu_idle(&mut self) -> RenderResult<()> {
        let value = self.fence()?;
        self.wait_for_fence_value(value)
    }
}
