//! Shader-visible descriptor heap vocabulary.
//!
//! A descriptor heap is a fixed-capacity array of resource-binding slots.
//! Slots are addressed two ways: a CPU handle used when writing
//! descriptors, and a GPU handle used when binding a table to a draw. Both
//! advance by the heap's stride per slot.

use crate::command::ResourceView;

/// Opaque handle to a descriptor heap.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DescriptorHeapHandle(pub u64);

/// Host-side address of a descriptor slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CpuDescriptorHandle(pub u64);

impl CpuDescriptorHandle {
    /// Address `index` slots past this one.
    #[inline]
    pub fn offset(self, index: u32, stride: u32) -> Self {
        Self(self.0 + u64::from(index) * u64::from(stride))
    }
}

/// Device-side address of a descriptor slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GpuDescriptorHandle(pub u64);

impl GpuDescriptorHandle {
    /// Address `index` slots past this one.
    #[inline]
    pub fn offset(self, index: u32, stride: u32) -> Self {
        Self(self.0 + u64::from(index) * u64::from(stride))
    }
}

/// Everything needed to sub-allocate a heap.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DescriptorHeapInfo {
    /// The heap itself.
    pub heap: DescriptorHeapHandle,
    /// CPU handle of slot 0.
    pub cpu_base: CpuDescriptorHandle,
    /// GPU handle of slot 0.
    pub gpu_base: GpuDescriptorHandle,
    /// Distance between consecutive slots.
    pub stride: u32,
    /// Number of slots.
    pub capacity: u32,
}

/// Slot-0 handles for heap `id`.
///
/// Each heap owns its own 2^32-slot window, so handles of different heaps
/// never collide. GPU handles carry the top bit to keep them apart from
/// CPU handles.
pub(crate) fn heap_bases(id: u64) -> (CpuDescriptorHandle, GpuDescriptorHandle) {
    (
        CpuDescriptorHandle(id << 32),
        GpuDescriptorHandle((1 << 63) | (id << 32)),
    )
}

/// Checks a write of `views` at `first` against `capacity`.
pub(crate) fn check_range(
    first: u32,
    views: &[ResourceView],
    capacity: u32,
) -> crate::RhiResult<()> {
    let end = u64::from(first) + views.len() as u64;
    if end > u64::from(capacity) {
        return Err(crate::RhiError::OutOfRange {
            first,
            end,
            capacity,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_offset_uses_stride() {
        let cpu = CpuDescriptorHandle(0x1000);
        assert_eq!(cpu.offset(0, 32), cpu);
        assert_eq!(cpu.offset(3, 32), CpuDescriptorHandle(0x1000 + 96));

        let gpu = GpuDescriptorHandle(0x8000_0000);
        assert_eq!(gpu.offset(2, 1), GpuDescriptorHandle(0x8000_0002));
    }

    #[test]
    fn test_check_range() {
        let views = [ResourceView(1), ResourceView(2)];
        assert!(check_range(0, &views, 2).is_ok());
        assert!(check_range(14, &views, 16).is_ok());
        assert!(matches!(
            check_range(15, &views, 16),
            Err(crate::RhiError::OutOfRange { end: 17, .. })
        ));
    }

    #[test]
    fn test_heap_bases_are_disjoint() {
        let (cpu_a, gpu_a) = heap_bases(1);
        let (cpu_b, gpu_b) = heap_bases(2);
        assert_ne!(gpu_a, gpu_b);
        assert_ne!(cpu_a, cpu_b);
        // The last slot of one heap stays below the next heap's base.
        assert!(gpu_a.offset(u32::MAX, 1) < gpu_b);
        assert!(cpu_a.offset(u32::MAX, 1) < cpu_b);
    }
}
