//! Physical device (GPU) selection.
//!
//! # Overview
//!
//! The frame engine drives a single execution queue and paces the CPU
//! against it with a timeline semaphore. Selection therefore:
//! 1. Enumerates all available GPUs
//! 2. Requires a graphics queue family
//! 3. Requires Vulkan 1.3 with timeline semaphores and synchronization2
//! 4. Prefers discrete GPUs, then larger device-local memory
//!
//! # Example
//!
//! ```no_run
//! use cadence_rhi::instance::Instance;
//! use cadence_rhi::physical_device::select_physical_device;
//!
//! # fn example() -> Result<(), cadence_rhi::RhiError> {
//! let instance = Instance::new(false)?;
//! let device_info = select_physical_device(instance.handle())?;
//! println!("Selected GPU: {:?}", device_info.device_name());
//! # Ok(())
//! # }
//! ```

use std::ffi::CStr;

use ash::vk;
use tracing::{debug, info, warn};

use crate::error::RhiError;

/// Queue family indices for the queues the engine may use.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    /// Family of the execution queue. Supports graphics, compute and copy.
    pub graphics_family: Option<u32>,
    /// A compute-only family, if the device exposes one.
    pub async_compute_family: Option<u32>,
}

impl QueueFamilyIndices {
    /// Whether the execution queue can be created.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.graphics_family.is_some()
    }
}

/// Information about a physical device (GPU).
#[derive(Clone)]
pub struct PhysicalDeviceInfo {
    /// Vulkan physical device handle.
    pub device: vk::PhysicalDevice,
    /// Device properties (name, limits, API version, etc.).
    pub properties: vk::PhysicalDeviceProperties,
    /// Memory properties (heap sizes, memory types).
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    /// Queue family indices.
    pub queue_families: QueueFamilyIndices,
}

impl PhysicalDeviceInfo {
    /// Returns the device name as a string.
    pub fn device_name(&self) -> &str {
        unsafe {
            CStr::from_ptr(self.properties.device_name.as_ptr())
                .to_str()
                .unwrap_or("Unknown Device")
        }
    }

    /// Returns a human-readable string for the device type.
    pub fn device_type_name(&self) -> &'static str {
        device_type_name(self.properties.device_type)
    }

    /// Returns the Vulkan API version supported by the device.
    pub fn api_version(&self) -> (u32, u32, u32) {
        let version = self.properties.api_version;
        (
            vk::api_version_major(version),
            vk::api_version_minor(version),
            vk::api_version_patch(version),
        )
    }

    /// Returns the total device local memory in bytes.
    pub fn device_local_memory(&self) -> u64 {
        self.memory_properties
            .memory_heaps
            .iter()
            .take(self.memory_properties.memory_heap_count as usize)
            .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
            .map(|heap| heap.size)
            .sum()
    }
}

impl std::fmt::Debug for PhysicalDeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (major, minor, patch) = self.api_version();
        f.debug_struct("PhysicalDeviceInfo")
            .field("name", &self.device_name())
            .field("type", &self.device_type_name())
            .field("api_version", &format!("{}.{}.{}", major, minor, patch))
            .field("queue_families", &self.queue_families)
            .finish()
    }
}

fn device_type_name(device_type: vk::PhysicalDeviceType) -> &'static str {
    match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => "Discrete GPU",
        vk::PhysicalDeviceType::INTEGRATED_GPU => "Integrated GPU",
        vk::PhysicalDeviceType::VIRTUAL_GPU => "Virtual GPU",
        vk::PhysicalDeviceType::CPU => "CPU",
        _ => "Other",
    }
}

/// Selects the most suitable physical device.
///
/// # Errors
///
/// Returns [`RhiError::NoSuitableGpu`] if no GPU meets the requirements.
pub fn select_physical_device(instance: &ash::Instance) -> Result<PhysicalDeviceInfo, RhiError> {
    let devices = unsafe { instance.enumerate_physical_devices()? };

    if devices.is_empty() {
        warn!("No Vulkan-capable GPUs found");
        return Err(RhiError::NoSuitableGpu);
    }

    info!("Found {} GPU(s)", devices.len());

    let mut suitable_devices: Vec<(PhysicalDeviceInfo, u64)> = devices
        .into_iter()
        .filter_map(|device| check_device_suitability(instance, device))
        .map(|info| {
            let score = rate_device(&info);
            debug!(
                "GPU '{}' ({}) - Score: {}",
                info.device_name(),
                info.device_type_name(),
                score
            );
            (info, score)
        })
        .collect();

    if suitable_devices.is_empty() {
        warn!("No suitable GPU found with required capabilities");
        return Err(RhiError::NoSuitableGpu);
    }

    suitable_devices.sort_by(|a, b| b.1.cmp(&a.1));
    let (selected_device, score) = suitable_devices.swap_remove(0);

    let (major, minor, patch) = selected_device.api_version();
    info!(
        "Selected GPU: '{}' ({}) - Vulkan {}.{}.{}, Score: {}",
        selected_device.device_name(),
        selected_device.device_type_name(),
        major,
        minor,
        patch,
        score
    );

    Ok(selected_device)
}

fn check_device_suitability(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
) -> Option<PhysicalDeviceInfo> {
    let properties = unsafe { instance.get_physical_device_properties(device) };
    let memory_properties = unsafe { instance.get_physical_device_memory_properties(device) };

    let device_name = unsafe {
        CStr::from_ptr(properties.device_name.as_ptr())
            .to_str()
            .unwrap_or("Unknown")
    };

    let queue_families = find_queue_families(instance, device);
    if !queue_families.is_complete() {
        debug!("GPU '{}' skipped: no graphics queue family", device_name);
        return None;
    }

    if !supports_vulkan_1_3(properties.api_version) {
        debug!(
            "GPU '{}' skipped: Vulkan 1.3 not supported (version: {}.{})",
            device_name,
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version)
        );
        return None;
    }

    let mut features_1_2 = vk::PhysicalDeviceVulkan12Features::default();
    let mut features_1_3 = vk::PhysicalDeviceVulkan13Features::default();
    {
        let mut features = vk::PhysicalDeviceFeatures2::default()
            .push_next(&mut features_1_2)
            .push_next(&mut features_1_3);
        unsafe { instance.get_physical_device_features2(device, &mut features) };
    }

    if features_1_2.timeline_semaphore == vk::FALSE || features_1_3.synchronization2 == vk::FALSE
    {
        debug!(
            "GPU '{}' skipped: timeline semaphores or synchronization2 unsupported",
            device_name
        );
        return None;
    }

    Some(PhysicalDeviceInfo {
        device,
        properties,
        memory_properties,
        queue_families,
    })
}

fn supports_vulkan_1_3(api_version: u32) -> bool {
    let major = vk::api_version_major(api_version);
    let minor = vk::api_version_minor(api_version);
    major > 1 || (major == 1 && minor >= 3)
}

fn find_queue_families(instance: &ash::Instance, device: vk::PhysicalDevice) -> QueueFamilyIndices {
    let families = unsafe { instance.get_physical_device_queue_family_properties(device) };
    queue_families_from_flags(families.iter().map(|f| (f.queue_flags, f.queue_count)))
}

fn queue_families_from_flags(
    families: impl Iterator<Item = (vk::QueueFlags, u32)>,
) -> QueueFamilyIndices {
    let mut indices = QueueFamilyIndices::default();

    for (i, (flags, count)) in families.enumerate() {
        if count == 0 {
            continue;
        }
        let i = i as u32;
        let has_graphics = flags.contains(vk::QueueFlags::GRAPHICS);
        let has_compute = flags.contains(vk::QueueFlags::COMPUTE);

        if has_graphics && indices.graphics_family.is_none() {
            indices.graphics_family = Some(i);
        }
        if has_compute && !has_graphics && indices.async_compute_family.is_none() {
            indices.async_compute_family = Some(i);
        }
    }

    indices
}

/// Higher scores indicate more desirable devices.
fn rate_device(info: &PhysicalDeviceInfo) -> u64 {
    let mut score = match info.properties.device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 10000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 1000,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 100,
        vk::PhysicalDeviceType::CPU => 10,
        _ => 1,
    };

    // VRAM in MB, capped at 16GB
    score += (info.device_local_memory() / (1024 * 1024)).min(16000);

    if info.queue_families.async_compute_family.is_some() {
        score += 100;
    }

    score
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_family_indices_default() {
        let indices = QueueFamilyIndices::default();
        assert!(indices.graphics_family.is_none());
        assert!(!indices.is_complete());
    }

    #[test]
    fn test_graphics_family_is_first_graphics_queue() {
        let indices = queue_families_from_flags(
            [
                (vk::QueueFlags::TRANSFER, 1),
                (vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, 0),
                (vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, 4),
                (vk::QueueFlags::COMPUTE, 2),
            ]
            .into_iter(),
        );
        assert_eq!(indices.graphics_family, Some(2));
        assert_eq!(indices.async_compute_family, Some(3));
        assert!(indices.is_complete());
    }

    #[test]
    fn test_compute_only_device_is_incomplete() {
        let indices = queue_families_from_flags([(vk::QueueFlags::COMPUTE, 1)].into_iter());
        assert!(!indices.is_complete());
    }

    #[test]
    fn test_vulkan_version_check() {
        assert!(supports_vulkan_1_3(vk::API_VERSION_1_3));
        assert!(supports_vulkan_1_3(vk::make_api_version(0, 1, 4, 0)));
        assert!(!supports_vulkan_1_3(vk::API_VERSION_1_2));
    }

    #[test]
    fn test_device_type_names() {
        assert_eq!(
            device_type_name(vk::PhysicalDeviceType::DISCRETE_GPU),
            "Discrete GPU"
        );
        assert_eq!(device_type_name(vk::PhysicalDeviceType::OTHER), "Other");
    }
}
