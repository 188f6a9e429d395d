//! The device and submission-queue contract.
//!
//! # Overview
//!
//! [`GpuDevice`] is everything the frame engine needs from a GPU:
//! - Creating, recording, closing and resetting command lists
//! - Creating and writing shader-visible descriptor heaps
//! - Submitting closed lists to the single execution queue
//! - Signaling and waiting on the queue's monotonic fence
//!
//! The device is shared by every worker thread (`Arc<dyn GpuDevice>`).
//! Each call is individually atomic; ordering between threads is the
//! caller's business. Submissions on the queue execute in the order the
//! `submit` calls arrive.
//!
//! # Fence model
//!
//! The queue owns one 64-bit fence. `signal(v)` enqueues "set fence to `v`"
//! behind all previously submitted work, so observing `completed_value() >= v`
//! proves every submission made before that signal has retired.

use std::fmt;

use crate::command::{Command, CommandListHandle, CommandListKind, CommandListPair, ResourceView};
use crate::descriptor::{DescriptorHeapHandle, DescriptorHeapInfo};
use crate::error::RhiResult;

/// Which implementation sits behind a [`GpuDevice`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Backend {
    /// Software timeline, no GPU required.
    Headless,
    /// Vulkan through `ash`.
    Vulkan,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Headless => f.write_str("headless"),
            Backend::Vulkan => f.write_str("vulkan"),
        }
    }
}

/// A GPU device with one execution queue.
pub trait GpuDevice: Send + Sync {
    /// The backend implementing this device.
    fn backend(&self) -> Backend;

    /// Creates a command list and its allocator. The list starts out
    /// recording.
    fn create_command_list(&self, kind: CommandListKind) -> RhiResult<CommandListPair>;

    /// Resets the allocator and reopens the list for recording.
    ///
    /// The caller must have proven, through the queue fence, that the last
    /// submission of this list has retired.
    fn reset_command_list(&self, pair: &CommandListPair) -> RhiResult<()>;

    /// Appends one command to a recording list.
    fn record(&self, list: CommandListHandle, command: &Command) -> RhiResult<()>;

    /// Ends recording; the list becomes submittable.
    fn close_command_list(&self, list: CommandListHandle) -> RhiResult<()>;

    /// Releases the list and its allocator.
    fn destroy_command_list(&self, pair: CommandListPair);

    /// Creates a shader-visible descriptor heap with `capacity` slots.
    fn create_descriptor_heap(&self, capacity: u32) -> RhiResult<DescriptorHeapInfo>;

    /// Writes `views` into consecutive slots starting at `first`.
    fn write_descriptors(
        &self,
        heap: DescriptorHeapHandle,
        first: u32,
        views: &[ResourceView],
    ) -> RhiResult<()>;

    /// Releases a descriptor heap.
    fn destroy_descriptor_heap(&self, heap: DescriptorHeapHandle);

    /// Submits closed lists to the execution queue, in order.
    fn submit(&self, lists: &[CommandListHandle]) -> RhiResult<()>;

    /// Enqueues a fence signal to `value` behind all prior submissions.
    fn signal(&self, value: u64) -> RhiResult<()>;

    /// The highest fence value the GPU has reached.
    fn completed_value(&self) -> RhiResult<u64>;

    /// Blocks the calling thread until the fence reaches `value`.
    fn wait_for_value(&self, value: u64) -> RhiResult<()>;

    /// Enqueues presentation of the current back buffer.
    fn present(&self) -> RhiResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_display() {
        assert_eq!(Backend::Headless.to_string(), "headless");
        assert_eq!(Backend::Vulkan.to_string(), "vulkan");
    }

    #[test]
    fn test_trait_object_is_send_sync() {
        fn assert_send_sync<T: Send + Sync + ?Sized>() {}
        assert_send_sync::<dyn GpuDevice>();
    }
}
