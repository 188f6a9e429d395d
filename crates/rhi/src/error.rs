//! RHI-specific error types.

use thiserror::Error;

/// RHI-specific error type.
#[derive(Error, Debug)]
pub enum RhiError {
    /// Vulkan API error
    #[error("Vulkan error: {0}")]
    VulkanError(#[from] ash::vk::Result),

    /// Failed to load Vulkan
    #[error("Failed to load Vulkan: {0}")]
    LoadingError(#[from] ash::LoadingError),

    /// No suitable GPU found
    #[error("No suitable GPU found")]
    NoSuitableGpu,

    /// A handle that the device never issued, or already destroyed.
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),

    /// An operation issued against an object in the wrong state
    /// (recording into a closed list, submitting an open one, ...).
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// An object was reused while GPU work referencing it has not retired.
    #[error("Object still in flight: {0}")]
    InFlight(String),

    /// A descriptor write past the end of its heap.
    #[error("Descriptor range {first}..{end} exceeds heap capacity {capacity}")]
    OutOfRange {
        /// First slot written.
        first: u32,
        /// One past the last slot written.
        end: u64,
        /// Heap capacity.
        capacity: u32,
    },

    /// A host wait on a fence value that no submission will ever signal.
    #[error("Waiting for fence value {requested}, but only {signaled} was ever signaled")]
    FenceNeverSignaled {
        /// Value the caller waited for.
        requested: u64,
        /// Highest value signaled on the queue.
        signaled: u64,
    },
}

/// Result type alias for RHI operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;
