//! Renderer error types.

use cadence_rhi::RhiError;
use thiserror::Error;

use crate::pass::RenderPass;
use crate::render_item::PipelineStateTag;

/// Errors raised while building or driving frames.
#[derive(Error, Debug)]
pub enum RenderError {
    /// Device-level failure.
    #[error("RHI error: {0}")]
    Rhi(#[from] RhiError),

    /// Configuration or IO failure from the core crate.
    #[error(transparent)]
    Core(#[from] cadence_core::Error),

    /// A descriptor table request larger than what is left in the heap.
    #[error("Descriptor table of {requested} slots exceeds remaining capacity {available}")]
    DescriptorCapacity {
        /// Slots requested.
        requested: u32,
        /// Slots left before the heap is exhausted.
        available: u32,
    },

    /// A descriptor write outside the table it targets.
    #[error("Descriptor write {first}..{end} exceeds table of {size} slots")]
    DescriptorRange {
        /// First table slot written.
        first: u32,
        /// One past the last table slot written.
        end: u64,
        /// Table size.
        size: u32,
    },

    /// A render item queue has no room left.
    #[error("Render item queue is full ({capacity} items)")]
    QueueFull {
        /// Queue capacity in items.
        capacity: usize,
    },

    /// A render item names an object that is not registered.
    #[error("Unknown object handle {0}")]
    UnknownObject(u64),

    /// No pipeline binding exists for a pipeline-state tag.
    #[error("No pipeline registered for {0:?}")]
    UnknownPipelineState(PipelineStateTag),

    /// A render item whose raw tags do not decode.
    #[error("Invalid render item: {0}")]
    InvalidRenderItem(String),

    /// Sizing parameters that cannot drive the engine.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A worker thread could not be spawned.
    #[error("Failed to spawn worker thread: {0}")]
    ThreadSpawn(#[from] std::io::Error),

    /// The first error a worker hit during a pass.
    #[error("Worker {worker} failed during the {pass} pass: {source}")]
    Worker {
        /// Index of the failing worker.
        worker: usize,
        /// Pass being executed.
        pass: RenderPass,
        /// What went wrong.
        #[source]
        source: Box<RenderError>,
    },
}

/// Result type alias for renderer operations.
pub type RenderResult<T> = std::result::Result<T, RenderError>;
