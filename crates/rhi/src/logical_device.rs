//! Vulkan logical device and its execution queue.
//!
//! # Overview
//!
//! [`LogicalDevice`] owns the `VkDevice` and the single queue every
//! submission goes through. It enables exactly what the frame engine
//! relies on:
//! - Vulkan 1.2 timeline semaphores for the queue fence
//! - Vulkan 1.3 synchronization2 for inter-pass barriers
//!
//! `vkQueueSubmit` requires external synchronization on the queue, so the
//! queue handle is only reachable through a lock.

use std::sync::Arc;

use ash::vk;
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, error, info};

use crate::error::RhiError;
use crate::instance::Instance;
use crate::physical_device::PhysicalDeviceInfo;

/// Vulkan logical device wrapper.
///
/// # Thread Safety
///
/// Shared across threads using `Arc`. Queue access is serialized by an
/// internal mutex.
pub struct LogicalDevice {
    /// Vulkan logical device handle.
    device: ash::Device,
    /// Physical device handle.
    physical_device: vk::PhysicalDevice,
    /// Execution queue, locked for submission.
    queue: Mutex<vk::Queue>,
    /// Family of the execution queue.
    queue_family: u32,
}

impl LogicalDevice {
    /// Creates a logical device with one queue from the graphics family.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::NoSuitableGpu`] if the physical device has no
    /// graphics family, or a Vulkan error if device creation fails.
    pub fn new(
        instance: &Instance,
        physical_device_info: &PhysicalDeviceInfo,
    ) -> Result<Arc<Self>, RhiError> {
        let queue_family = physical_device_info
            .queue_families
            .graphics_family
            .ok_or(RhiError::NoSuitableGpu)?;

        let queue_priorities = [1.0f32];
        let queue_create_infos = [vk::DeviceQueueCreateInfo::default()
            .queue_family_index(queue_family)
            .queue_priorities(&queue_priorities)];

        let mut features_1_2 = vk::PhysicalDeviceVulkan12Features::default().timeline_semaphore(true);
        let mut features_1_3 = vk::PhysicalDeviceVulkan13Features::default().synchronization2(true);

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .push_next(&mut features_1_2)
            .push_next(&mut features_1_3);

        let device = unsafe {
            instance
                .handle()
                .create_device(physical_device_info.device, &create_info, None)?
        };

        let queue = unsafe { device.get_device_queue(queue_family, 0) };
        debug!("Execution queue retrieved from family {}", queue_family);

        info!(
            "Logical device created on '{}'",
            physical_device_info.device_name()
        );

        Ok(Arc::new(Self {
            device,
            physical_device: physical_device_info.device,
            queue: Mutex::new(queue),
            queue_family,
        }))
    }

    /// Returns the Vulkan logical device handle.
    #[inline]
    pub fn handle(&self) -> &ash::Device {
        &self.device
    }

    /// Returns the physical device handle.
    #[inline]
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Family index of the execution queue.
    #[inline]
    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    /// Locks the execution queue for submission.
    #[inline]
    pub fn queue(&self) -> MutexGuard<'_, vk::Queue> {
        self.queue.lock()
    }

    /// Blocks until all outstanding work on the device has completed.
    ///
    /// # Errors
    ///
    /// Returns an error if the wait fails.
    pub fn wait_idle(&self) -> Result<(), RhiError> {
        let _queue = self.queue.lock();
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }
}

impl Drop for LogicalDevice {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                error!("Failed to wait for device idle during drop: {:?}", e);
            }
            self.device.destroy_device(None);
        }
        info!("Logical device destroyed");
    }
}

// Safety: ash::Device is Send+Sync, the physical device handle is a plain
// handle, and the queue handle is only touched under its mutex.
unsafe impl Send for LogicalDevice {}
unsafe impl Sync for LogicalDevice {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logical_device_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<LogicalDevice>();
    }
}
