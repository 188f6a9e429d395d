//! Per-frame bump allocator over a shader-visible descriptor heap.
//!
//! # Overview
//!
//! Each `[frame][thread]` lane owns one [`DescriptorTableAllocator`]. During
//! a frame it hands out contiguous slot ranges ("tables") from the front of
//! its heap; once the frame's fence has been reached the whole heap is
//! reclaimed at once with [`reset`](DescriptorTableAllocator::reset).
//!
//! ```text
//! heap: [ t0 t0 t0 | t1 t1 | ........ free ........ ]
//!                          ^allocated              ^capacity
//! ```
//!
//! A request that does not fit fails without moving the offset.

use std::sync::Arc;

use cadence_rhi::{
    CpuDescriptorHandle, DescriptorHeapHandle, DescriptorHeapInfo, GpuDevice,
    GpuDescriptorHandle, ResourceView,
};
use tracing::debug;

use crate::error::{RenderError, RenderResult};

/// A contiguous range of descriptor slots.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DescriptorTable {
    /// First slot, relative to the heap start.
    pub offset: u32,
    /// Number of slots.
    pub count: u32,
    /// CPU handle of the first slot.
    pub cpu: CpuDescriptorHandle,
    /// GPU handle of the first slot.
    pub gpu: GpuDescriptorHandle,
}

/// Bump allocator of descriptor tables.
pub struct DescriptorTableAllocator {
    device: Arc<dyn GpuDevice>,
    info: DescriptorHeapInfo,
    allocated: u32,
}

impl DescriptorTableAllocator {
    /// Creates the allocator and its heap of `max_descriptors` slots.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::InvalidConfig`] for an empty heap, or the
    /// device error if the heap cannot be created.
    pub fn new(device: Arc<dyn GpuDevice>, max_descriptors: u32) -> RenderResult<Self> {
        if max_descriptors == 0 {
            return Err(RenderError::InvalidConfig(
                "descriptor heap needs at least one slot".into(),
            ));
        }
        let info = device.create_descriptor_heap(max_descriptors)?;
        Ok(Self {
            device,
            info,
            allocated: 0,
        })
    }

    /// Reserves `count` contiguous slots.
    ///
    /// `alloc_table(0)` returns an empty table at the current offset.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::DescriptorCapacity`] if fewer than `count`
    /// slots remain. The allocator is left unchanged.
    pub fn alloc_table(&mut self, count: u32) -> RenderResult<DescriptorTable> {
        let available = self.remaining();
        if count > available {
            return Err(RenderError::DescriptorCapacity {
                requested: count,
                available,
            });
        }
        let offset = self.allocated;
        self.allocated += count;
        Ok(DescriptorTable {
            offset,
            count,
            cpu: self.info.cpu_base.offset(offset, self.info.stride),
            gpu: self.info.gpu_base.offset(offset, self.info.stride),
        })
    }

    /// Writes `views` into `table`, starting `first` slots in.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::DescriptorRange`] if the write would spill
    /// past the end of the table.
    pub fn write_descriptors(
        &self,
        table: &DescriptorTable,
        first: u32,
        views: &[ResourceView],
    ) -> RenderResult<()> {
        let end = u64::from(first) + views.len() as u64;
        if end > u64::from(table.count) {
            return Err(RenderError::DescriptorRange {
                first,
                end,
                size: table.count,
            });
        }
        self.device
            .write_descriptors(self.info.heap, table.offset + first, views)?;
        Ok(())
    }

    /// Reclaims every table. Call only after this lane's fence was reached.
    #[inline]
    pub fn reset(&mut self) {
        self.allocated = 0;
    }

    /// Slots handed out since the last reset.
    #[inline]
    pub fn allocated(&self) -> u32 {
        self.allocated
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.info.capacity
    }

    #[inline]
    pub fn remaining(&self) -> u32 {
        self.info.capacity - self.allocated
    }

    #[inline]
    pub fn heap(&self) -> DescriptorHeapHandle {
        self.info.heap
    }
}

impl Drop for DescriptorTableAllocator {
    fn drop(&mut self) {
        self.device.destroy_descriptor_heap(self.info.heap);
        debug!(
            "Released descriptor heap {} ({} slots)",
            self.info.heap.0, self.info.capacity
        );
    }
}
