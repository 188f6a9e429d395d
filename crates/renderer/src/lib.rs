//! Frame command-submission and synchronization engine.
//!
//! This crate orchestrates the recording and submission of a frame:
//! - Per-thread command list pools and descriptor table allocators
//! - Per-pass render item queues filled round-robin
//! - A persistent worker pool driven pass by pass through phase barriers
//! - Frame pacing against the queue fence

mod barrier;
mod error;
mod grid;

pub mod command_pool;
pub mod context;
pub mod descriptor_table;
pub mod frame_pacer;
pub mod orchestrator;
pub mod pass;
pub mod pipeline_table;
pub mod render_item;
pub mod render_queue;
pub mod renderable;
pub mod worker_pool;

pub use barrier::{BarrierPoisoned, PhaseBarrier};
pub use command_pool::CommandBufferPool;
pub use context::ResourceContext;
pub use descriptor_table::{DescriptorTable, DescriptorTableAllocator};
pub use error::{RenderError, RenderResult};
pub use frame_pacer::FramePacer;
pub use grid::Grid;
pub use orchestrator::{FrameStats, Orchestrator};
pub use pass::{FrameTargets, PassTransition, RenderPass, present_transitions};
pub use pipeline_table::{DrawStrategy, PipelineBinding, PipelineTable};
pub use render_item::{
    FilterHandle, LightHandle, ObjectHandle, ObjectKind, PipelineStateTag, RenderItem,
};
pub use render_queue::RenderItemQueue;
pub use renderable::{ObjectRegistry, Renderable};
pub use worker_pool::{PhaseJob, PhaseTicket, WorkerEvent, WorkerPool};
