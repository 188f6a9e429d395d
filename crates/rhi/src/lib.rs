//! Render Hardware Interface.
//!
//! This crate provides the device/submission-queue abstraction the frame
//! engine records and submits through:
//! - [`GpuDevice`], the backend-neutral device and queue contract
//! - [`HeadlessDevice`], a software GPU timeline that validates the protocol
//! - [`VulkanDevice`], an `ash` backend built on timeline semaphores
//! - Command, descriptor and resource-state vocabulary shared by both

mod error;

pub mod command;
pub mod descriptor;
pub mod device;
pub mod headless;
pub mod instance;
pub mod logical_device;
pub mod physical_device;
pub mod sync;
pub mod vulkan;

pub use command::{
    Command, CommandAllocatorHandle, CommandListHandle, CommandListKind, CommandListPair,
    ResourceState, ResourceView,
};
pub use descriptor::{
    CpuDescriptorHandle, DescriptorHeapHandle, DescriptorHeapInfo, GpuDescriptorHandle,
};
pub use device::{Backend, GpuDevice};
pub use error::{RhiError, RhiResult};
pub use headless::{CompletionMode, ExecutedCommand, HeadlessDevice};
pub use vulkan::VulkanDevice;

// Re-export ash types that users might need
pub use ash::vk;
