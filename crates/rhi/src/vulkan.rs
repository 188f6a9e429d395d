//! Vulkan backend for [`GpuDevice`].
//!
//! # Overview
//!
//! [`VulkanDevice`] maps the device contract onto an offscreen Vulkan 1.3
//! device:
//!
//! | Contract              | Vulkan                                          |
//! |-----------------------|-------------------------------------------------|
//! | command allocator     | one `VkCommandPool` per list                    |
//! | command list          | one primary `VkCommandBuffer`                   |
//! | descriptor heap       | a `VkDescriptorPool` plus a host-side slot table |
//! | queue fence           | a timeline semaphore                            |
//! | transition            | a global `vkCmdPipelineBarrier2`                |
//!
//! Pipelines, root signatures and draw arguments are owned by collaborators
//! outside this crate, so those commands are traced rather than encoded.
//! Descriptor handles are slot indices (`stride == 1`) offset by a per-heap
//! base.
//!
//! A [`CommandListHandle`] carries the raw `VkCommandBuffer`, so `record`
//! encodes straight into the buffer without touching shared state. The
//! owning pool guarantees the list is open and used by one thread; misuse is
//! left to the validation layers. Create, close, reset, destroy and submit
//! go through the device-wide state lock.
//!
//! There is no surface; `present` only counts frames.

use std::collections::HashMap;
use std::sync::Arc;

use ash::vk::{self, Handle};
use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use crate::command::{
    Command, CommandAllocatorHandle, CommandListHandle, CommandListKind, CommandListPair,
    ResourceState, ResourceView,
};
use crate::descriptor::{
    self, DescriptorHeapHandle, DescriptorHeapInfo,
};
use crate::device::{Backend, GpuDevice};
use crate::error::{RhiError, RhiResult};
use crate::instance::Instance;
use crate::logical_device::LogicalDevice;
use crate::physical_device::select_physical_device;
use crate::sync::TimelineSemaphore;

struct VulkanList {
    pool: vk::CommandPool,
    buffer: vk::CommandBuffer,
    recording: bool,
    /// Timeline value that proves the last submission retired.
    retire_value: u64,
}

struct VulkanHeap {
    pool: vk::DescriptorPool,
    slots: Vec<Option<ResourceView>>,
}

#[derive(Default)]
struct VulkanState {
    next_id: u64,
    lists: HashMap<CommandListHandle, VulkanList>,
    heaps: HashMap<DescriptorHeapHandle, VulkanHeap>,
    signaled: u64,
    presented: u64,
}

impl VulkanState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn list(&self, list: CommandListHandle) -> RhiResult<&VulkanList> {
        self.lists
            .get(&list)
            .ok_or_else(|| RhiError::InvalidHandle(format!("command list {:#x}", list.0)))
    }

    fn list_mut(&mut self, list: CommandListHandle) -> RhiResult<&mut VulkanList> {
        self.lists
            .get_mut(&list)
            .ok_or_else(|| RhiError::InvalidHandle(format!("command list {:#x}", list.0)))
    }
}

/// [`GpuDevice`] on top of `ash`.
pub struct VulkanDevice {
    state: Mutex<VulkanState>,
    timeline: TimelineSemaphore,
    device: Arc<LogicalDevice>,
    // Dropped last.
    _instance: Instance,
}

impl VulkanDevice {
    /// Loads Vulkan, selects a GPU and creates the device.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::LoadingError`] without a Vulkan loader and
    /// [`RhiError::NoSuitableGpu`] when no GPU supports Vulkan 1.3 with
    /// timeline semaphores.
    pub fn new(enable_validation: bool) -> RhiResult<Arc<Self>> {
        let instance = Instance::new(enable_validation)?;
        let physical = select_physical_device(instance.handle())?;
        let device = LogicalDevice::new(&instance, &physical)?;
        let timeline = TimelineSemaphore::new(device.clone())?;

        info!("Vulkan device ready on '{}'", physical.device_name());

        Ok(Arc::new(Self {
            state: Mutex::new(VulkanState::default()),
            timeline,
            device,
            _instance: instance,
        }))
    }

    /// The underlying logical device.
    #[inline]
    pub fn logical_device(&self) -> &Arc<LogicalDevice> {
        &self.device
    }

    /// Number of frames presented.
    pub fn presented_count(&self) -> u64 {
        self.state.lock().presented
    }

    fn begin(&self, buffer: vk::CommandBuffer) -> RhiResult<()> {
        let begin_info =
            vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            self.device
                .handle()
                .begin_command_buffer(buffer, &begin_info)?
        };
        Ok(())
    }

    fn encode(&self, buffer: vk::CommandBuffer, command: &Command) {
        match *command {
            Command::Transition {
                resource,
                before,
                after,
            } => {
                let (src_stage, src_access) = stage_and_access(before);
                let (dst_stage, dst_access) = stage_and_access(after);
                let barriers = [vk::MemoryBarrier2::default()
                    .src_stage_mask(src_stage)
                    .src_access_mask(src_access)
                    .dst_stage_mask(dst_stage)
                    .dst_access_mask(dst_access)];
                let dependency = vk::DependencyInfo::default().memory_barriers(&barriers);
                unsafe {
                    self.device
                        .handle()
                        .cmd_pipeline_barrier2(buffer, &dependency)
                };
                trace!(
                    "Barrier for resource {}: {:?} -> {:?}",
                    resource.0, before, after
                );
            }
            other => trace!("Vulkan command traced: {:?}", other),
        }
    }
}

/// Pipeline stage and access mask a resource state implies.
fn stage_and_access(state: ResourceState) -> (vk::PipelineStageFlags2, vk::AccessFlags2) {
    use vk::{AccessFlags2 as A, PipelineStageFlags2 as S};
    let depth_stages = S::EARLY_FRAGMENT_TESTS | S::LATE_FRAGMENT_TESTS;
    match state {
        ResourceState::Common => (S::ALL_COMMANDS, A::MEMORY_READ | A::MEMORY_WRITE),
        ResourceState::RenderTarget => (
            S::COLOR_ATTACHMENT_OUTPUT,
            A::COLOR_ATTACHMENT_READ | A::COLOR_ATTACHMENT_WRITE,
        ),
        ResourceState::DepthWrite | ResourceState::StencilWrite => (
            depth_stages,
            A::DEPTH_STENCIL_ATTACHMENT_READ | A::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ),
        ResourceState::DepthRead | ResourceState::StencilRead => {
            (depth_stages, A::DEPTH_STENCIL_ATTACHMENT_READ)
        }
        ResourceState::ShaderResource => (
            S::VERTEX_SHADER | S::FRAGMENT_SHADER | S::COMPUTE_SHADER,
            A::SHADER_SAMPLED_READ,
        ),
        ResourceState::Present => (S::BOTTOM_OF_PIPE, A::NONE),
    }
}

impl GpuDevice for VulkanDevice {
    fn backend(&self) -> Backend {
        Backend::Vulkan
    }

    fn create_command_list(&self, kind: CommandListKind) -> RhiResult<CommandListPair> {
        // Every kind runs on the single execution queue.
        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(self.device.queue_family())
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);
        let pool = unsafe { self.device.handle().create_command_pool(&pool_info, None)? };

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let buffer = match unsafe { self.device.handle().allocate_command_buffers(&alloc_info) } {
            Ok(buffers) => buffers[0],
            Err(e) => {
                unsafe { self.device.handle().destroy_command_pool(pool, None) };
                return Err(e.into());
            }
        };
        if let Err(e) = self.begin(buffer) {
            unsafe { self.device.handle().destroy_command_pool(pool, None) };
            return Err(e);
        }

        let pair = CommandListPair {
            allocator: CommandAllocatorHandle(pool.as_raw()),
            list: CommandListHandle(buffer.as_raw()),
        };
        let mut state = self.state.lock();
        state.lists.insert(
            pair.list,
            VulkanList {
                pool,
                buffer,
                recording: true,
                retire_value: 0,
            },
        );
        trace!("Created Vulkan command list {:#x} ({:?})", pair.list.0, kind);
        Ok(pair)
    }

    fn reset_command_list(&self, pair: &CommandListPair) -> RhiResult<()> {
        let completed = self.timeline.value()?;
        let mut state = self.state.lock();
        let list = state.list_mut(pair.list)?;
        if list.retire_value > completed {
            return Err(RhiError::InFlight(format!(
                "command list {:#x} reset before fence value {} (completed {})",
                pair.list.0, list.retire_value, completed
            )));
        }
        if list.recording {
            unsafe { self.device.handle().end_command_buffer(list.buffer)? };
        }
        unsafe {
            self.device
                .handle()
                .reset_command_pool(list.pool, vk::CommandPoolResetFlags::empty())?
        };
        list.recording = false;
        let buffer = list.buffer;
        self.begin(buffer)?;
        state.list_mut(pair.list)?.recording = true;
        Ok(())
    }

    fn record(&self, list: CommandListHandle, command: &Command) -> RhiResult<()> {
        if list.0 == 0 {
            return Err(RhiError::InvalidHandle("null command list".into()));
        }
        self.encode(vk::CommandBuffer::from_raw(list.0), command);
        Ok(())
    }

    fn close_command_list(&self, list: CommandListHandle) -> RhiResult<()> {
        let mut state = self.state.lock();
        let entry = state.list_mut(list)?;
        if !entry.recording {
            return Err(RhiError::InvalidState(format!(
                "command list {:#x} closed twice",
                list.0
            )));
        }
        unsafe { self.device.handle().end_command_buffer(entry.buffer)? };
        entry.recording = false;
        Ok(())
    }

    fn destroy_command_list(&self, pair: CommandListPair) {
        let (list, signaled) = {
            let mut state = self.state.lock();
            (state.lists.remove(&pair.list), state.signaled)
        };
        let Some(list) = list else {
            warn!("Destroying unknown command list {:#x}", pair.list.0);
            return;
        };
        if list.retire_value > signaled {
            // No fence covers the submission; only a full idle proves it retired.
            warn!(
                "Destroying command list {:#x} submitted after the last fence",
                pair.list.0
            );
            if let Err(e) = self.device.wait_idle() {
                warn!("Device idle wait before destroy failed: {}", e);
            }
        } else if let Ok(completed) = self.timeline.value()
            && list.retire_value > completed
        {
            warn!(
                "Destroying command list {:#x} while in flight, waiting for fence {}",
                pair.list.0, list.retire_value
            );
            if let Err(e) = self.timeline.wait(list.retire_value, u64::MAX) {
                warn!("Fence wait before destroy failed: {}", e);
            }
        }
        unsafe { self.device.handle().destroy_command_pool(list.pool, None) };
    }

    fn create_descriptor_heap(&self, capacity: u32) -> RhiResult<DescriptorHeapInfo> {
        let pool_sizes = [vk::DescriptorPoolSize::default()
            .ty(vk::DescriptorType::SAMPLED_IMAGE)
            .descriptor_count(capacity.max(1))];
        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(1)
            .pool_sizes(&pool_sizes);
        let pool = unsafe { self.device.handle().create_descriptor_pool(&pool_info, None)? };

        let mut state = self.state.lock();
        let id = state.next_id();
        let heap = DescriptorHeapHandle(id);
        let (cpu_base, gpu_base) = descriptor::heap_bases(id);
        state.heaps.insert(
            heap,
            VulkanHeap {
                pool,
                slots: vec![None; capacity as usize],
            },
        );
        debug!("Created Vulkan descriptor heap {} ({} slots)", id, capacity);
        Ok(DescriptorHeapInfo {
            heap,
            cpu_base,
            gpu_base,
            stride: 1,
            capacity,
        })
    }

    fn write_descriptors(
        &self,
        heap: DescriptorHeapHandle,
        first: u32,
        views: &[ResourceView],
    ) -> RhiResult<()> {
        let mut state = self.state.lock();
        let entry = state
            .heaps
            .get_mut(&heap)
            .ok_or_else(|| RhiError::InvalidHandle(format!("descriptor heap {}", heap.0)))?;
        descriptor::check_range(first, views, entry.slots.len() as u32)?;
        for (slot, view) in entry.slots[first as usize..].iter_mut().zip(views) {
            *slot = Some(*view);
        }
        Ok(())
    }

    fn destroy_descriptor_heap(&self, heap: DescriptorHeapHandle) {
        match self.state.lock().heaps.remove(&heap) {
            Some(entry) => unsafe {
                self.device
                    .handle()
                    .destroy_descriptor_pool(entry.pool, None)
            },
            None => warn!("Destroying unknown descriptor heap {}", heap.0),
        }
    }

    fn submit(&self, lists: &[CommandListHandle]) -> RhiResult<()> {
        let mut state = self.state.lock();
        let mut buffers = Vec::with_capacity(lists.len());
        for &list in lists {
            let entry = state.list(list)?;
            if entry.recording {
                return Err(RhiError::InvalidState(format!(
                    "submitting open command list {:#x}",
                    list.0
                )));
            }
            buffers.push(entry.buffer);
        }

        let submit = vk::SubmitInfo::default().command_buffers(&buffers);
        {
            let queue = self.device.queue();
            unsafe {
                self.device
                    .handle()
                    .queue_submit(*queue, &[submit], vk::Fence::null())?
            };
        }

        // Signal values only increase, so the next one proves retirement.
        let retire_value = state.signaled + 1;
        for &list in lists {
            state.list_mut(list)?.retire_value = retire_value;
        }
        Ok(())
    }

    fn signal(&self, value: u64) -> RhiResult<()> {
        let mut state = self.state.lock();
        if value <= state.signaled {
            return Err(RhiError::InvalidState(format!(
                "fence value {} does not exceed last signaled {}",
                value, state.signaled
            )));
        }

        let semaphores = [self.timeline.handle()];
        let values = [value];
        let mut timeline_info =
            vk::TimelineSemaphoreSubmitInfo::default().signal_semaphore_values(&values);
        let submit = vk::SubmitInfo::default()
            .signal_semaphores(&semaphores)
            .push_next(&mut timeline_info);
        {
            let queue = self.device.queue();
            unsafe {
                self.device
                    .handle()
                    .queue_submit(*queue, &[submit], vk::Fence::null())?
            };
        }

        state.signaled = value;
        Ok(())
    }

    fn completed_value(&self) -> RhiResult<u64> {
        self.timeline.value()
    }

    fn wait_for_value(&self, value: u64) -> RhiResult<()> {
        let signaled = self.state.lock().signaled;
        if value > signaled {
            return Err(RhiError::FenceNeverSignaled {
                requested: value,
                signaled,
            });
        }
        self.timeline.wait(value, u64::MAX)
    }

    fn present(&self) -> RhiResult<()> {
        let mut state = self.state.lock();
        state.presented += 1;
        trace!("Offscreen present #{}", state.presented);
        Ok(())
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            warn!("Failed to wait for device idle: {}", e);
        }
        let mut state = self.state.lock();
        let handle = self.device.handle();
        for (_, list) in state.lists.drain() {
            unsafe { handle.destroy_command_pool(list.pool, None) };
        }
        for (_, heap) in state.heaps.drain() {
            unsafe { handle.destroy_descriptor_pool(heap.pool, None) };
        }
        debug!("Vulkan device destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device_or_skip() -> Option<Arc<VulkanDevice>> {
        match VulkanDevice::new(false) {
            Ok(device) => Some(device),
            Err(RhiError::LoadingError(_) | RhiError::NoSuitableGpu) => {
                eprintln!("Skipping test: Vulkan not available");
                None
            }
            Err(RhiError::VulkanError(e)) => {
                eprintln!("Skipping test: Vulkan initialization failed ({e})");
                None
            }
            Err(e) => panic!("Unexpected error: {:?}", e),
        }
    }

    #[test]
    fn test_vulkan_device_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<VulkanDevice>();
    }

    #[test]
    fn test_write_states_have_write_access() {
        for state in [
            ResourceState::RenderTarget,
            ResourceState::DepthWrite,
            ResourceState::StencilWrite,
        ] {
            let (_, access) = stage_and_access(state);
            assert!(
                access.intersects(
                    vk::AccessFlags2::COLOR_ATTACHMENT_WRITE
                        | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE
                ),
                "{state:?}"
            );
        }
        let (_, access) = stage_and_access(ResourceState::ShaderResource);
        assert_eq!(access, vk::AccessFlags2::SHADER_SAMPLED_READ);
    }

    #[test]
    fn test_submit_signal_wait_round() {
        let Some(device) = device_or_skip() else {
            return;
        };
        let pair = device.create_command_list(CommandListKind::Direct).unwrap();
        device
            .record(
                pair.list,
                &Command::Transition {
                    resource: ResourceView(1),
                    before: ResourceState::DepthWrite,
                    after: ResourceState::ShaderResource,
                },
            )
            .unwrap();
        device.close_command_list(pair.list).unwrap();
        device.submit(&[pair.list]).unwrap();
        device.signal(1).unwrap();
        device.wait_for_value(1).unwrap();
        assert!(device.completed_value().unwrap() >= 1);

        device.reset_command_list(&pair).unwrap();
        device.destroy_command_list(pair);
    }

    #[test]
    fn test_heaps_get_distinct_handle_ranges() {
        let Some(device) = device_or_skip() else {
            return;
        };
        let a = device.create_descriptor_heap(16).unwrap();
        let b = device.create_descriptor_heap(16).unwrap();
        assert_ne!(a.gpu_base, b.gpu_base);
        assert_ne!(a.gpu_base.offset(3, a.stride), b.gpu_base.offset(3, b.stride));
        device.destroy_descriptor_heap(a.heap);
        device.destroy_descriptor_heap(b.heap);
    }

    #[test]
    fn test_lists_record_from_several_threads() {
        let Some(device) = device_or_skip() else {
            return;
        };
        let pairs: Vec<_> = (0..4)
            .map(|_| device.create_command_list(CommandListKind::Direct).unwrap())
            .collect();
        std::thread::scope(|scope| {
            for pair in &pairs {
                let device = &device;
                scope.spawn(move || {
                    for _ in 0..64 {
                        device
                            .record(
                                pair.list,
                                &Command::Transition {
                                    resource: ResourceView(1),
                                    before: ResourceState::RenderTarget,
                                    after: ResourceState::ShaderResource,
                                },
                            )
                            .unwrap();
                    }
                });
            }
        });
        for pair in pairs {
            device.close_command_list(pair.list).unwrap();
            device.submit(&[pair.list]).unwrap();
            device.destroy_command_list(pair);
        }
        device.signal(1).unwrap();
        device.wait_for_value(1).unwrap();
    }

    #[test]
    fn test_wait_for_unsignaled_value_fails() {
        let Some(device) = device_or_skip() else {
            return;
        };
        assert!(matches!(
            device.wait_for_value(5),
            Err(RhiError::FenceNeverSignaled { requested: 5, .. })
        ));
    }
}
