//! Software GPU timeline.
//!
//! [`HeadlessDevice`] implements [`GpuDevice`] without a GPU. Submitted work
//! sits on a queue and is "executed" in order, either immediately, after a
//! fixed latency on a background timeline thread, or only when a test drives
//! it with [`HeadlessDevice::complete_up_to`].
//!
//! Unlike a real driver it enforces the command-list protocol and reports
//! violations as errors:
//! - recording into a list that is not recording
//! - closing a list twice
//! - submitting a list that is still open
//! - resetting a list whose submission has not retired ([`RhiError::InFlight`])
//! - waiting for a fence value nobody will signal
//!
//! Executed commands are logged in execution order so tests can check what
//! the GPU would have seen.
//!
//! # Example
//!
//! ```
//! use cadence_rhi::{Command, CommandListKind, CompletionMode, GpuDevice, HeadlessDevice};
//!
//! # fn example() -> Result<(), cadence_rhi::RhiError> {
//! let device = HeadlessDevice::new(CompletionMode::Immediate);
//! let pair = device.create_command_list(CommandListKind::Direct)?;
//! device.record(pair.list, &Command::Draw { vertex_count: 3, instance_count: 1 })?;
//! device.close_command_list(pair.list)?;
//! device.submit(&[pair.list])?;
//! device.signal(1)?;
//! device.wait_for_value(1)?;
//! assert_eq!(device.executed_commands().len(), 1);
//! # Ok(())
//! # }
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace, warn};

use crate::command::{
    Command, CommandAllocatorHandle, CommandListHandle, CommandListKind, CommandListPair,
    ResourceView,
};
use crate::descriptor::{
    self, DescriptorHeapHandle, DescriptorHeapInfo,
};
use crate::device::{Backend, GpuDevice};
use crate::error::{RhiError, RhiResult};

/// Distance between descriptor slots, in bytes of the fake address space.
const DESCRIPTOR_STRIDE: u32 = 32;

/// When submitted work retires.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompletionMode {
    /// Work retires as soon as it is enqueued.
    Immediate,
    /// A timeline thread retires each submission after this long.
    Delayed(Duration),
    /// Work retires only through [`HeadlessDevice::complete_up_to`].
    Manual,
}

/// One command as the simulated GPU executed it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExecutedCommand {
    /// Queue submission the command arrived in (1-based).
    pub submission: u64,
    /// List the command was recorded into.
    pub list: CommandListHandle,
    /// The command.
    pub command: Command,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ListStatus {
    Recording,
    Closed,
    Submitted,
    Retired,
}

struct ListState {
    kind: CommandListKind,
    status: ListStatus,
    commands: Vec<Command>,
}

struct HeapState {
    slots: Vec<Option<ResourceView>>,
}

enum QueueOp {
    Execute {
        submission: u64,
        lists: Vec<CommandListHandle>,
    },
    Signal(u64),
    Present,
}

#[derive(Default)]
struct Timeline {
    next_id: u64,
    lists: HashMap<CommandListHandle, ListState>,
    heaps: HashMap<DescriptorHeapHandle, HeapState>,
    pending: VecDeque<QueueOp>,
    submissions: u64,
    signaled: u64,
    completed: u64,
    presented: u64,
    executed: Vec<ExecutedCommand>,
    shutdown: bool,
}

impl Timeline {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn list_mut(&mut self, list: CommandListHandle) -> RhiResult<&mut ListState> {
        self.lists
            .get_mut(&list)
            .ok_or_else(|| RhiError::InvalidHandle(format!("command list {}", list.0)))
    }

    fn execute(&mut self, op: QueueOp) {
        match op {
            QueueOp::Execute { submission, lists } => {
                for list in lists {
                    // Destroyed before it ran; nothing left to execute.
                    let Some(state) = self.lists.get_mut(&list) else {
                        continue;
                    };
                    for command in state.commands.drain(..) {
                        self.executed.push(ExecutedCommand {
                            submission,
                            list,
                            command,
                        });
                    }
                    state.status = ListStatus::Retired;
                }
            }
            QueueOp::Signal(value) => {
                self.completed = self.completed.max(value);
                trace!("Headless fence reached {}", value);
            }
            QueueOp::Present => self.presented += 1,
        }
    }

    fn drain_pending(&mut self) {
        while let Some(op) = self.pending.pop_front() {
            self.execute(op);
        }
    }
}

struct Shared {
    timeline: Mutex<Timeline>,
    /// Wakes the timeline thread when work is enqueued.
    work_ready: Condvar,
    /// Wakes host waiters when the fence advances.
    progress: Condvar,
}

/// GPU-less [`GpuDevice`] with protocol validation.
pub struct HeadlessDevice {
    shared: Arc<Shared>,
    mode: CompletionMode,
    timeline_thread: Mutex<Option<JoinHandle<()>>>,
}

impl HeadlessDevice {
    /// Creates a headless device.
    pub fn new(mode: CompletionMode) -> Arc<Self> {
        let shared = Arc::new(Shared {
            timeline: Mutex::new(Timeline::default()),
            work_ready: Condvar::new(),
            progress: Condvar::new(),
        });

        let timeline_thread = match mode {
            CompletionMode::Delayed(latency) => {
                let shared = shared.clone();
                let handle = std::thread::Builder::new()
                    .name("cadence-headless-gpu".into())
                    .spawn(move || run_timeline(&shared, latency))
                    .ok();
                if handle.is_none() {
                    warn!("Failed to spawn headless timeline thread, completing immediately");
                }
                handle
            }
            CompletionMode::Immediate | CompletionMode::Manual => None,
        };

        debug!("Headless device created ({:?})", mode);

        Arc::new(Self {
            shared,
            mode,
            timeline_thread: Mutex::new(timeline_thread),
        })
    }

    /// The completion mode this device was created with.
    #[inline]
    pub fn mode(&self) -> CompletionMode {
        self.mode
    }

    /// Retires queued work in order until the fence reaches `value` or the
    /// queue is empty. Returns the resulting completed value.
    pub fn complete_up_to(&self, value: u64) -> u64 {
        let mut timeline = self.shared.timeline.lock();
        while timeline.completed < value {
            let Some(op) = timeline.pending.pop_front() else {
                break;
            };
            timeline.execute(op);
        }
        let completed = timeline.completed;
        drop(timeline);
        self.shared.progress.notify_all();
        completed
    }

    /// Retires everything queued so far.
    pub fn complete_all(&self) -> u64 {
        let mut timeline = self.shared.timeline.lock();
        timeline.drain_pending();
        let completed = timeline.completed;
        drop(timeline);
        self.shared.progress.notify_all();
        completed
    }

    /// Every command executed so far, in execution order.
    pub fn executed_commands(&self) -> Vec<ExecutedCommand> {
        self.shared.timeline.lock().executed.clone()
    }

    /// Number of `submit` calls accepted.
    pub fn submission_count(&self) -> u64 {
        self.shared.timeline.lock().submissions
    }

    /// Number of presents executed.
    pub fn presented_count(&self) -> u64 {
        self.shared.timeline.lock().presented
    }

    /// Highest fence value signaled on the queue.
    pub fn signaled_value(&self) -> u64 {
        self.shared.timeline.lock().signaled
    }

    /// Queue operations not yet executed.
    pub fn pending_operations(&self) -> usize {
        self.shared.timeline.lock().pending.len()
    }

    /// Command lists created and not destroyed.
    pub fn live_command_lists(&self) -> usize {
        self.shared.timeline.lock().lists.len()
    }

    /// Descriptor heaps created and not destroyed.
    pub fn live_descriptor_heaps(&self) -> usize {
        self.shared.timeline.lock().heaps.len()
    }

    /// Kind a live command list was created with.
    pub fn command_list_kind(&self, list: CommandListHandle) -> Option<CommandListKind> {
        self.shared.timeline.lock().lists.get(&list).map(|l| l.kind)
    }

    /// The view stored in a descriptor slot, if any.
    pub fn descriptor_at(&self, heap: DescriptorHeapHandle, slot: u32) -> Option<ResourceView> {
        self.shared
            .timeline
            .lock()
            .heaps
            .get(&heap)
            .and_then(|h| h.slots.get(slot as usize).copied().flatten())
    }

    fn enqueue(&self, mut timeline: parking_lot::MutexGuard<'_, Timeline>, op: QueueOp) {
        timeline.pending.push_back(op);
        match self.mode {
            CompletionMode::Immediate => {
                timeline.drain_pending();
                drop(timeline);
                self.shared.progress.notify_all();
            }
            CompletionMode::Delayed(_) => {
                drop(timeline);
                self.shared.work_ready.notify_one();
            }
            CompletionMode::Manual => {}
        }
    }
}

fn run_timeline(shared: &Shared, latency: Duration) {
    let mut timeline = shared.timeline.lock();
    loop {
        while timeline.pending.is_empty() && !timeline.shutdown {
            shared.work_ready.wait(&mut timeline);
        }
        if timeline.shutdown {
            timeline.drain_pending();
            shared.progress.notify_all();
            break;
        }
        let Some(op) = timeline.pending.pop_front() else {
            continue;
        };
        if matches!(op, QueueOp::Execute { .. }) {
            parking_lot::MutexGuard::unlocked(&mut timeline, || std::thread::sleep(latency));
        }
        timeline.execute(op);
        shared.progress.notify_all();
    }
    debug!("Headless timeline thread exiting");
}

impl GpuDevice for HeadlessDevice {
    fn backend(&self) -> Backend {
        Backend::Headless
    }

    fn create_command_list(&self, kind: CommandListKind) -> RhiResult<CommandListPair> {
        let mut timeline = self.shared.timeline.lock();
        let id = timeline.next_id();
        let pair = CommandListPair {
            allocator: CommandAllocatorHandle(id),
            list: CommandListHandle(id),
        };
        timeline.lists.insert(
            pair.list,
            ListState {
                kind,
                status: ListStatus::Recording,
                commands: Vec::new(),
            },
        );
        trace!("Created headless command list {}", id);
        Ok(pair)
    }

    fn reset_command_list(&self, pair: &CommandListPair) -> RhiResult<()> {
        let mut timeline = self.shared.timeline.lock();
        let state = timeline.list_mut(pair.list)?;
        if state.status == ListStatus::Submitted {
            return Err(RhiError::InFlight(format!(
                "command list {} reset before its submission retired",
                pair.list.0
            )));
        }
        state.commands.clear();
        state.status = ListStatus::Recording;
        Ok(())
    }

    fn record(&self, list: CommandListHandle, command: &Command) -> RhiResult<()> {
        let mut timeline = self.shared.timeline.lock();
        let state = timeline.list_mut(list)?;
        if state.status != ListStatus::Recording {
            return Err(RhiError::InvalidState(format!(
                "recording into command list {} while {:?}",
                list.0, state.status
            )));
        }
        state.commands.push(*command);
        Ok(())
    }

    fn close_command_list(&self, list: CommandListHandle) -> RhiResult<()> {
        let mut timeline = self.shared.timeline.lock();
        let state = timeline.list_mut(list)?;
        if state.status != ListStatus::Recording {
            return Err(RhiError::InvalidState(format!(
                "closing command list {} while {:?}",
                list.0, state.status
            )));
        }
        state.status = ListStatus::Closed;
        Ok(())
    }

    fn destroy_command_list(&self, pair: CommandListPair) {
        let mut timeline = self.shared.timeline.lock();
        match timeline.lists.remove(&pair.list) {
            Some(state) if state.status == ListStatus::Submitted => {
                warn!(
                    "Destroyed command list {} while its submission was in flight",
                    pair.list.0
                );
            }
            Some(_) => trace!("Destroyed headless command list {}", pair.list.0),
            None => warn!("Destroying unknown command list {}", pair.list.0),
        }
    }

    fn create_descriptor_heap(&self, capacity: u32) -> RhiResult<DescriptorHeapInfo> {
        let mut timeline = self.shared.timeline.lock();
        let id = timeline.next_id();
        let heap = DescriptorHeapHandle(id);
        timeline.heaps.insert(
            heap,
            HeapState {
                slots: vec![None; capacity as usize],
            },
        );
        debug!("Created headless descriptor heap {} ({} slots)", id, capacity);
        let (cpu_base, gpu_base) = descriptor::heap_bases(id);
        Ok(DescriptorHeapInfo {
            heap,
            cpu_base,
            gpu_base,
            stride: DESCRIPTOR_STRIDE,
            capacity,
        })
    }

    fn write_descriptors(
        &self,
        heap: DescriptorHeapHandle,
        first: u32,
        views: &[ResourceView],
    ) -> RhiResult<()> {
        let mut timeline = self.shared.timeline.lock();
        let state = timeline
            .heaps
            .get_mut(&heap)
            .ok_or_else(|| RhiError::InvalidHandle(format!("descriptor heap {}", heap.0)))?;
        descriptor::check_range(first, views, state.slots.len() as u32)?;
        for (slot, view) in state.slots[first as usize..].iter_mut().zip(views) {
            *slot = Some(*view);
        }
        Ok(())
    }

    fn destroy_descriptor_heap(&self, heap: DescriptorHeapHandle) {
        if self.shared.timeline.lock().heaps.remove(&heap).is_none() {
            warn!("Destroying unknown descriptor heap {}", heap.0);
        }
    }

    fn submit(&self, lists: &[CommandListHandle]) -> RhiResult<()> {
        let mut timeline = self.shared.timeline.lock();
        for &list in lists {
            let state = timeline.list_mut(list)?;
            if state.status != ListStatus::Closed {
                return Err(RhiError::InvalidState(format!(
                    "submitting command list {} while {:?}",
                    list.0, state.status
                )));
            }
        }
        for &list in lists {
            timeline.list_mut(list)?.status = ListStatus::Submitted;
        }
        timeline.submissions += 1;
        let submission = timeline.submissions;
        self.enqueue(
            timeline,
            QueueOp::Execute {
                submission,
                lists: lists.to_vec(),
            },
        );
        Ok(())
    }

    fn signal(&self, value: u64) -> RhiResult<()> {
        let mut timeline = self.shared.timeline.lock();
        if value <= timeline.signaled {
            return Err(RhiError::InvalidState(format!(
                "fence value {} does not exceed last signaled {}",
                value, timeline.signaled
            )));
        }
        timeline.signaled = value;
        self.enqueue(timeline, QueueOp::Signal(value));
        Ok(())
    }

    fn completed_value(&self) -> RhiResult<u64> {
        Ok(self.shared.timeline.lock().completed)
    }

    fn wait_for_value(&self, value: u64) -> RhiResult<()> {
        let mut timeline = self.shared.timeline.lock();
        if value > timeline.signaled {
            return Err(RhiError::FenceNeverSignaled {
                requested: value,
                signaled: timeline.signaled,
            });
        }
        while timeline.completed < value {
            self.shared.progress.wait(&mut timeline);
        }
        Ok(())
    }

    fn present(&self) -> RhiResult<()> {
        let timeline = self.shared.timeline.lock();
        self.enqueue(timeline, QueueOp::Present);
        Ok(())
    }
}

impl Drop for HeadlessDevice {
    fn drop(&mut self) {
        self.shared.timeline.lock().shutdown = true;
        self.shared.work_ready.notify_all();
        if let Some(handle) = self.timeline_thread.lock().take()
            && handle.join().is_err()
        {
            warn!("Headless timeline thread panicked");
        }
        debug!("Headless device destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn closed_list(device: &HeadlessDevice, command: Command) -> CommandListPair {
        let pair = device.create_command_list(CommandListKind::Direct).unwrap();
        device.record(pair.list, &command).unwrap();
        device.close_command_list(pair.list).unwrap();
        pair
    }

    const DRAW: Command = Command::Draw {
        vertex_count: 3,
        instance_count: 1,
    };

    #[test]
    fn test_immediate_mode_retires_on_signal() {
        let device = HeadlessDevice::new(CompletionMode::Immediate);
        let pair = closed_list(&device, DRAW);
        device.submit(&[pair.list]).unwrap();
        device.signal(1).unwrap();
        assert_eq!(device.completed_value().unwrap(), 1);
        device.wait_for_value(1).unwrap();

        let executed = device.executed_commands();
        assert_eq!(executed.len(), 1);
        assert_eq!(executed[0].submission, 1);
        assert_eq!(executed[0].command, DRAW);
    }

    #[test]
    fn test_reset_while_in_flight_is_rejected() {
        let device = HeadlessDevice::new(CompletionMode::Manual);
        let pair = closed_list(&device, DRAW);
        device.submit(&[pair.list]).unwrap();
        device.signal(1).unwrap();

        assert!(matches!(
            device.reset_command_list(&pair),
            Err(RhiError::InFlight(_))
        ));

        assert_eq!(device.complete_up_to(1), 1);
        device.reset_command_list(&pair).unwrap();
        device.record(pair.list, &DRAW).unwrap();
    }

    #[test]
    fn test_manual_completion_stops_at_requested_value() {
        let device = HeadlessDevice::new(CompletionMode::Manual);
        let first = closed_list(&device, DRAW);
        device.submit(&[first.list]).unwrap();
        device.signal(1).unwrap();
        let second = closed_list(&device, DRAW);
        device.submit(&[second.list]).unwrap();
        device.signal(2).unwrap();

        assert_eq!(device.complete_up_to(1), 1);
        assert_eq!(device.executed_commands().len(), 1);
        assert_eq!(device.pending_operations(), 2);

        assert_eq!(device.complete_all(), 2);
        assert_eq!(device.executed_commands().len(), 2);
    }

    #[test]
    fn test_protocol_violations() {
        let device = HeadlessDevice::new(CompletionMode::Immediate);
        let pair = device.create_command_list(CommandListKind::Direct).unwrap();

        // Submitting an open list.
        assert!(matches!(
            device.submit(&[pair.list]),
            Err(RhiError::InvalidState(_))
        ));

        device.close_command_list(pair.list).unwrap();
        // Double close and recording into a closed list.
        assert!(device.close_command_list(pair.list).is_err());
        assert!(device.record(pair.list, &DRAW).is_err());

        // Unknown handles.
        assert!(matches!(
            device.record(CommandListHandle(999), &DRAW),
            Err(RhiError::InvalidHandle(_))
        ));
    }

    #[test]
    fn test_fence_values_must_increase() {
        let device = HeadlessDevice::new(CompletionMode::Immediate);
        device.signal(2).unwrap();
        assert!(device.signal(2).is_err());
        assert!(matches!(
            device.wait_for_value(3),
            Err(RhiError::FenceNeverSignaled {
                requested: 3,
                signaled: 2
            })
        ));
    }

    #[test]
    fn test_wait_blocks_until_manual_completion() {
        let device = HeadlessDevice::new(CompletionMode::Manual);
        device.signal(1).unwrap();

        let waiter = {
            let device = device.clone();
            std::thread::spawn(move || device.wait_for_value(1))
        };
        std::thread::sleep(Duration::from_millis(20));
        assert!(!waiter.is_finished());

        device.complete_up_to(1);
        waiter.join().unwrap().unwrap();
    }

    #[test]
    fn test_delayed_mode_eventually_completes() {
        let device = HeadlessDevice::new(CompletionMode::Delayed(Duration::from_millis(2)));
        let pair = closed_list(&device, DRAW);
        device.submit(&[pair.list]).unwrap();
        device.signal(1).unwrap();
        device.wait_for_value(1).unwrap();
        assert_eq!(device.executed_commands().len(), 1);
    }

    #[test]
    fn test_descriptor_writes() {
        let device = HeadlessDevice::new(CompletionMode::Immediate);
        let info = device.create_descriptor_heap(4).unwrap();
        assert_eq!(info.capacity, 4);
        assert_eq!(device.live_descriptor_heaps(), 1);

        device
            .write_descriptors(info.heap, 2, &[ResourceView(7), ResourceView(8)])
            .unwrap();
        assert_eq!(device.descriptor_at(info.heap, 2), Some(ResourceView(7)));
        assert_eq!(device.descriptor_at(info.heap, 3), Some(ResourceView(8)));
        assert_eq!(device.descriptor_at(info.heap, 0), None);
        assert!(
            device
                .write_descriptors(info.heap, 3, &[ResourceView(1), ResourceView(2)])
                .is_err()
        );

        device.destroy_descriptor_heap(info.heap);
        assert_eq!(device.live_descriptor_heaps(), 0);
    }

    #[test]
    fn test_present_is_queued() {
        let device = HeadlessDevice::new(CompletionMode::Manual);
        device.present().unwrap();
        assert_eq!(device.presented_count(), 0);
        device.complete_all();
        assert_eq!(device.presented_count(), 1);
    }
}
