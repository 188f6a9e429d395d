//! Timeline semaphore, the Vulkan queue fence.
//!
//! # Overview
//!
//! A timeline semaphore carries a monotonically increasing 64-bit counter.
//! A queue submission can set it to a value once all prior work retires,
//! and the host can read it or block until it reaches a value. This is
//! exactly the fence model of [`GpuDevice`](crate::GpuDevice): one object
//! per queue instead of one binary fence per frame slot.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use cadence_rhi::logical_device::LogicalDevice;
//! use cadence_rhi::sync::TimelineSemaphore;
//!
//! # fn example(device: Arc<LogicalDevice>) -> Result<(), cadence_rhi::RhiError> {
//! let timeline = TimelineSemaphore::new(device)?;
//! // ... submit work that signals value 1 ...
//! timeline.wait(1, u64::MAX)?;
//! assert!(timeline.value()? >= 1);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::error::RhiResult;
use crate::logical_device::LogicalDevice;

/// Vulkan timeline semaphore wrapper.
///
/// # Thread Safety
///
/// Reading and waiting on a timeline semaphore needs no external
/// synchronization, so the wrapper is freely shared between threads.
pub struct TimelineSemaphore {
    /// Reference to the logical device.
    device: Arc<LogicalDevice>,
    /// Vulkan semaphore handle.
    semaphore: vk::Semaphore,
}

impl TimelineSemaphore {
    /// Creates a timeline semaphore with a counter of zero.
    ///
    /// # Errors
    ///
    /// Returns an error if semaphore creation fails.
    pub fn new(device: Arc<LogicalDevice>) -> RhiResult<Self> {
        let mut type_info = vk::SemaphoreTypeCreateInfo::default()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(0);
        let create_info = vk::SemaphoreCreateInfo::default().push_next(&mut type_info);

        let semaphore = unsafe { device.handle().create_semaphore(&create_info, None)? };

        debug!("Created timeline semaphore");

        Ok(Self { device, semaphore })
    }

    /// Returns the Vulkan semaphore handle.
    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }

    /// Current counter value.
    pub fn value(&self) -> RhiResult<u64> {
        Ok(unsafe {
            self.device
                .handle()
                .get_semaphore_counter_value(self.semaphore)?
        })
    }

    /// Blocks until the counter reaches `value`.
    ///
    /// # Arguments
    ///
    /// * `value` - Counter value to wait for
    /// * `timeout` - Timeout in nanoseconds. Use `u64::MAX` for infinite wait.
    ///
    /// # Errors
    ///
    /// Returns `vk::Result::TIMEOUT` if the timeout expires first.
    pub fn wait(&self, value: u64, timeout: u64) -> RhiResult<()> {
        let semaphores = [self.semaphore];
        let values = [value];
        let wait_info = vk::SemaphoreWaitInfo::default()
            .semaphores(&semaphores)
            .values(&values);
        unsafe { self.device.handle().wait_semaphores(&wait_info, timeout)? };
        Ok(())
    }
}

impl Drop for TimelineSemaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_semaphore(self.semaphore, None);
        }
        debug!("Destroyed timeline semaphore");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeline_semaphore_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<TimelineSemaphore>();
    }
}
