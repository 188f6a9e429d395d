//! The frame state machine.
//!
//! # Overview
//!
//! [`Orchestrator`] ties every other piece together. It owns:
//!
//! - `[frame][thread]` lanes, each a [`CommandBufferPool`] plus a
//!   [`DescriptorTableAllocator`]
//! - `[pass][thread]` [`RenderItemQueue`]s, filled round-robin
//! - the [`WorkerPool`] that drains the queues one pass at a time
//! - the [`FramePacer`] that keeps the CPU at most `F` frames ahead
//! - one main command pool per frame for inter-pass transitions
//!
//! # Frame sequence
//!
//! ```text
//! begin_frame ─► submit_item × N ─► render_frame:
//!     for pass in Shadow, Object, MirrorStencil, MirrorBlend, PostProcess:
//!         record transitions ─► dispatch(pass) ─► wait_for_completion(pass)
//!     present transitions ─► present ─► fence
//!     wait for next slot's fence ─► reset next slot's lanes ─► advance
//! ```
//!
//! A slot's lanes are reset only after the GPU reached the fence value
//! recorded the last time that slot was used.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use cadence_core::EngineConfig;
//! use cadence_renderer::{FrameTargets, ObjectRegistry, Orchestrator, PipelineTable};
//! use cadence_rhi::{CompletionMode, HeadlessDevice};
//!
//! # fn example() -> cadence_renderer::RenderResult<()> {
//! let device = HeadlessDevice::new(CompletionMode::Immediate);
//! let registry = Arc::new(ObjectRegistry::new());
//! let mut orchestrator = Orchestrator::with_thread_count(
//!     device,
//!     &EngineConfig::default(),
//!     2,
//!     PipelineTable::standard(),
//!     registry,
//!     FrameTargets::default(),
//! )?;
//!
//! orchestrator.begin_frame();
//! // orchestrator.submit_item(pass, item)?;
//! let stats = orchestrator.render_frame()?;
//! assert_eq!(stats.fence_value, 1);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use cadence_core::{EngineConfig, Timer};
use cadence_rhi::{Command, CommandListKind, GpuDevice, ResourceView};
use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use crate::command_pool::CommandBufferPool;
use crate::context::ResourceContext;
use crate::descriptor_table::DescriptorTableAllocator;
use crate::error::{RenderError, RenderResult};
use crate::frame_pacer::FramePacer;
use crate::grid::Grid;
use crate::pass::{FrameTargets, PassTransition, RenderPass, present_transitions};
use crate::pipeline_table::PipelineTable;
use crate::render_item::RenderItem;
use crate::render_queue::RenderItemQueue;
use crate::renderable::ObjectRegistry;
use crate::worker_pool::{PhaseJob, PhaseTicket, WorkerPool};

/// Summary of one finished frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameStats {
    /// Frame number, counting from zero.
    pub frame: u64,
    /// Slot the frame was recorded into.
    pub frame_index: usize,
    /// Fence value signaled at the end of the frame.
    pub fence_value: u64,
    /// Items submitted to each pass, in [`RenderPass::ALL`] order.
    pub items_per_pass: [usize; RenderPass::COUNT],
    /// CPU time since the previous frame finished.
    pub cpu_time: Duration,
}

impl FrameStats {
    pub fn total_items(&self) -> usize {
        self.items_per_pass.iter().sum()
    }
}

/// Command lists and descriptor tables of one `[frame][thread]` cell.
struct Lane {
    commands: CommandBufferPool,
    tables: DescriptorTableAllocator,
}

/// State the workers share with the orchestrator.
///
/// Every lane and queue sits behind its own mutex. The pass barrier keeps
/// the orchestrator and the owning worker from ever holding the same one
/// at once, so the locks are never contended.
struct FrameWork {
    device: Arc<dyn GpuDevice>,
    lanes: Grid<Mutex<Lane>>,
    queues: Grid<Mutex<RenderItemQueue>>,
    registry: Arc<ObjectRegistry>,
    pipelines: PipelineTable,
    globals: Vec<ResourceView>,
}

impl PhaseJob for FrameWork {
    fn run(&self, worker: usize, ticket: PhaseTicket) -> RenderResult<()> {
        let mut queue = self.queues[(ticket.pass.index(), worker)].lock();
        if queue.is_empty() {
            return Ok(());
        }

        let mut lane = self.lanes[(ticket.frame_index, worker)].lock();
        let Lane { commands, tables } = &mut *lane;
        let pair = commands.current()?;

        // Common state is re-bound only when the tag changes.
        let mut bound = None;
        let mut items = 0usize;
        while let Some(item) = queue.dispatch() {
            let tag = item.pipeline_state().ok_or_else(|| {
                RenderError::InvalidRenderItem(format!("unknown pipeline state in {:?}", item))
            })?;
            let binding = if bound == Some(tag) {
                self.pipelines.get(tag)?
            } else {
                bound = Some(tag);
                self.pipelines.bind_common_state(
                    self.device.as_ref(),
                    pair.list,
                    tag,
                    tables,
                    &self.globals,
                )?
            };

            let object = self
                .registry
                .get(item.object())
                .ok_or(RenderError::UnknownObject(item.object().0))?;
            let mut ctx = ResourceContext::new(
                self.device.as_ref(),
                pair.list,
                tables,
                binding,
                item,
                ticket.pass,
                ticket.frame_index,
                worker,
            );
            object.render(&mut ctx, tag)?;
            items += 1;
        }

        commands.submit_and_close()?;
        trace!(
            "Worker {} submitted {} item(s) for the {} pass",
            worker, items, ticket.pass
        );
        Ok(())
    }
}

/// Drives frames through the pass schedule.
pub struct Orchestrator {
    work: Arc<FrameWork>,
    workers: WorkerPool,
    pacer: FramePacer,
    main_pools: Vec<CommandBufferPool>,
    targets: FrameTargets,
    next_thread: [usize; RenderPass::COUNT],
    items_per_pass: [usize; RenderPass::COUNT],
    frame_number: u64,
    timer: Timer,
    in_frame: bool,
}

impl Orchestrator {
    /// Creates an orchestrator with `min(physical cores, max_worker_threads)`
    /// workers.
    pub fn new(
        device: Arc<dyn GpuDevice>,
        config: &EngineConfig,
        pipelines: PipelineTable,
        registry: Arc<ObjectRegistry>,
        targets: FrameTargets,
    ) -> RenderResult<Self> {
        let threads = config.worker_thread_count();
        Self::with_thread_count(device, config, threads, pipelines, registry, targets)
    }

    /// Creates an orchestrator with an exact worker count.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` is invalid, if a pool cannot hold one
    /// list per pass plus the present transitions, or if device objects or
    /// threads cannot be created.
    pub fn with_thread_count(
        device: Arc<dyn GpuDevice>,
        config: &EngineConfig,
        thread_count: usize,
        pipelines: PipelineTable,
        registry: Arc<ObjectRegistry>,
        targets: FrameTargets,
    ) -> RenderResult<Self> {
        config.validate()?;
        if thread_count == 0 {
            return Err(RenderError::InvalidConfig(
                "at least one worker thread is required".into(),
            ));
        }
        // Main pools use one list per pass boundary plus one for present.
        let lists_needed = RenderPass::COUNT + 1;
        if config.command_lists_per_pool < lists_needed {
            return Err(RenderError::InvalidConfig(format!(
                "command_lists_per_pool must be at least {} (got {})",
                lists_needed, config.command_lists_per_pool
            )));
        }

        let frames = config.frames_in_flight;
        let lanes = Grid::try_from_fn(frames, thread_count, |_, _| {
            Ok::<_, RenderError>(Mutex::new(Lane {
                commands: CommandBufferPool::new(
                    device.clone(),
                    CommandListKind::Direct,
                    config.command_lists_per_pool,
                )?,
                tables: DescriptorTableAllocator::new(
                    device.clone(),
                    config.descriptors_per_allocator,
                )?,
            }))
        })?;
        let queues = Grid::from_fn(RenderPass::COUNT, thread_count, |_, _| {
            Mutex::new(RenderItemQueue::new(config.render_items_per_queue))
        });
        let main_pools = (0..frames)
            .map(|_| {
                CommandBufferPool::new(
                    device.clone(),
                    CommandListKind::Direct,
                    config.command_lists_per_pool,
                )
            })
            .collect::<RenderResult<Vec<_>>>()?;

        let work = Arc::new(FrameWork {
            device: device.clone(),
            lanes,
            queues,
            registry,
            pipelines,
            globals: targets.global_views().to_vec(),
        });
        let workers = WorkerPool::new(thread_count, work.clone())?;

        info!(
            "Orchestrator ready: {} frame(s) in flight, {} worker(s), {} backend",
            frames,
            thread_count,
            device.backend()
        );

        Ok(Self {
            work,
            workers,
            pacer: FramePacer::new(device, frames),
            main_pools,
            targets,
            next_thread: [0; RenderPass::COUNT],
            items_per_pass: [0; RenderPass::COUNT],
            frame_number: 0,
            timer: Timer::new(),
            in_frame: false,
        })
    }

    #[inline]
    pub fn thread_count(&self) -> usize {
        self.workers.thread_count()
    }

    #[inline]
    pub fn frames_in_flight(&self) -> usize {
        self.pacer.frames_in_flight()
    }

    /// Slot the next frame records into.
    #[inline]
    pub fn frame_index(&self) -> usize {
        self.pacer.frame_index()
    }

    /// Frames finished so far.
    #[inline]
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    /// Last fence value signaled.
    #[inline]
    pub fn fence_value(&self) -> u64 {
        self.pacer.fence_value()
    }

    #[inline]
    pub fn registry(&self) -> &Arc<ObjectRegistry> {
        &self.work.registry
    }

    #[inline]
    pub fn device(&self) -> &Arc<dyn GpuDevice> {
        &self.work.device
    }

    /// Mean CPU frame time so far.
    pub fn average_frame_time(&self) -> Duration {
        self.timer.average_lap()
    }

    /// Command lists of `slot` not yet reset, across all its lanes and its
    /// main pool.
    pub fn outstanding_lists(&self, slot: usize) -> usize {
        let lanes: usize = self
            .work
            .lanes
            .row(slot)
            .iter()
            .map(|lane| lane.lock().commands.allocated_count())
            .sum();
        lanes + self.main_pools[slot].allocated_count()
    }

    /// Starts collecting items for a new frame.
    ///
    /// # Panics
    ///
    /// Panics if the previous frame was not rendered.
    pub fn begin_frame(&mut self) {
        assert!(!self.in_frame, "begin_frame() called twice without render_frame()");
        for queue in self.work.queues.iter() {
            queue.lock().reset();
        }
        self.next_thread = [0; RenderPass::COUNT];
        self.items_per_pass = [0; RenderPass::COUNT];
        self.in_frame = true;
    }

    /// Queues an item for `pass`, on the next thread in round-robin order.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::InvalidRenderItem`] if the item's pipeline
    /// state is unknown or belongs to another pass, and
    /// [`RenderError::QueueFull`] if that thread's queue is full. Nothing is
    /// queued on error.
    pub fn submit_item(&mut self, pass: RenderPass, item: RenderItem) -> RenderResult<()> {
        assert!(self.in_frame, "submit_item() outside begin_frame()/render_frame()");
        match item.pipeline_state() {
            Some(tag) if tag.pass() == pass => {}
            Some(tag) => {
                return Err(RenderError::InvalidRenderItem(format!(
                    "{:?} belongs to the {} pass, not {}",
                    tag,
                    tag.pass(),
                    pass
                )));
            }
            None => {
                return Err(RenderError::InvalidRenderItem(format!(
                    "unknown pipeline state in {:?}",
                    item
                )));
            }
        }
        let p = pass.index();
        let thread = self.next_thread[p];
        self.work.queues[(p, thread)].lock().add(&item)?;
        self.next_thread[p] = (thread + 1) % self.thread_count();
        self.items_per_pass[p] += 1;
        Ok(())
    }

    /// Items queued per thread for `pass` this frame.
    pub fn queued_items(&self, pass: RenderPass) -> Vec<usize> {
        self.work
            .queues
            .row(pass.index())
            .iter()
            .map(|queue| queue.lock().len())
            .collect()
    }

    /// Runs every pass, presents, and paces against the GPU.
    ///
    /// A frame that fails is abandoned: lists left open are closed without
    /// being submitted, nothing is presented, and the slot is still fenced
    /// and rotated so the next [`begin_frame`](Self::begin_frame) can run.
    ///
    /// # Panics
    ///
    /// Panics if called without [`begin_frame`](Self::begin_frame), or if a
    /// worker panics.
    pub fn render_frame(&mut self) -> RenderResult<FrameStats> {
        assert!(self.in_frame, "render_frame() without begin_frame()");
        if let Err(err) = self.record_passes() {
            self.abandon_frame(&err);
            return Err(err);
        }
        self.end_frame()
    }

    /// Blocks until the GPU has retired everything submitted so far.
    pub fn wait_for_gpu_idle(&mut self) -> RenderResult<()> {
        self.pacer.wait_for_gpu_idle()
    }

    fn record_passes(&mut self) -> RenderResult<()> {
        let frame_index = self.pacer.frame_index();
        for pass in RenderPass::ALL {
            self.record_transitions(&pass.transitions_before(&self.targets))?;
            self.workers.execute(PhaseTicket { pass, frame_index })?;
        }
        self.record_transitions(&present_transitions(&self.targets))
    }

    fn end_frame(&mut self) -> RenderResult<FrameStats> {
        self.work.device.present()?;
        let (fence_value, finished) = self.rotate_slot()?;

        let stats = FrameStats {
            frame: self.frame_number,
            frame_index: finished,
            fence_value,
            items_per_pass: self.items_per_pass,
            cpu_time: self.timer.lap(),
        };
        self.frame_number += 1;
        self.in_frame = false;

        debug!(
            "Frame {} done in slot {}: fence {}, {} item(s), {:?}",
            stats.frame,
            stats.frame_index,
            stats.fence_value,
            stats.total_items(),
            stats.cpu_time
        );
        Ok(stats)
    }

    /// Closes whatever the failed frame left open and moves to the next slot.
    ///
    /// Whatever was submitted before the failure stays on the queue and is
    /// covered by the fence signaled here.
    fn abandon_frame(&mut self, cause: &RenderError) {
        self.in_frame = false;
        let slot = self.pacer.frame_index();
        warn!("Frame {} abandoned in slot {}: {}", self.frame_number, slot, cause);

        for lane in self.work.lanes.row(slot) {
            let mut lane = lane.lock();
            if lane.commands.has_current()
                && let Err(e) = lane.commands.close()
            {
                warn!("Failed to close an abandoned worker list: {}", e);
            }
        }
        let main = &mut self.main_pools[slot];
        if main.has_current()
            && let Err(e) = main.close()
        {
            warn!("Failed to close an abandoned transition list: {}", e);
        }

        if let Err(e) = self.rotate_slot() {
            warn!("Failed to fence abandoned frame {}: {}", self.frame_number, e);
            return;
        }
        self.timer.lap();
        self.frame_number += 1;
    }

    /// Fences the current slot, then waits for, resets and enters the next
    /// one. Returns the fence value and the slot just left.
    fn rotate_slot(&mut self) -> RenderResult<(u64, usize)> {
        let fence_value = self.pacer.fence()?;
        let finished = self.pacer.frame_index();

        let next = self.pacer.next_frame_index();
        self.pacer.wait_for_slot(next)?;
        self.reset_slot(next)?;
        self.pacer.advance();
        Ok((fence_value, finished))
    }

    fn reset_slot(&mut self, slot: usize) -> RenderResult<()> {
        for lane in self.work.lanes.row(slot) {
            let mut lane = lane.lock();
            lane.commands.reset_all()?;
            lane.tables.reset();
        }
        self.main_pools[slot].reset_all()?;
        trace!("Frame slot {} reset", slot);
        Ok(())
    }

    fn record_transitions(&mut self, transitions: &[PassTransition]) -> RenderResult<()> {
        if transitions.is_empty() {
            return Ok(());
        }
        let slot = self.pacer.frame_index();
        let pool = &mut self.main_pools[slot];
        let pair = pool.current()?;
        for t in transitions {
            self.work.device.record(
                pair.list,
                &Command::Transition {
                    resource: t.resource,
                    before: t.before,
                    after: t.after,
                },
            )?;
        }
        pool.submit_and_close()
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        // Lists and heaps are released after this; the GPU must be done.
        // Mid-frame, submissions may sit behind the last fence.
        let waited = if self.in_frame {
            self.pacer.wait_for_gpu_idle()
        } else {
            self.pacer.wait_for_fence_value(self.pacer.fence_value())
        };
        if let Err(e) = waited {
            warn!("Failed to wait for the GPU during teardown: {}", e);
        }
        info!("Orchestrator stopped after {} frame(s)", self.frame_number);
    }
}
