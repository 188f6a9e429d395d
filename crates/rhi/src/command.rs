//! Command list vocabulary.
//!
//! A command list is recorded into through a [`GpuDevice`](crate::GpuDevice)
//! and backed by a command allocator that owns its memory. The pair is
//! created together, reset together, and destroyed together.
//!
//! # Lifecycle
//!
//! ```text
//! create ──► Recording ──close──► Closed ──submit──► Submitted
//!                ▲                                      │
//!                └────────────── reset ◄── (GPU retired)┘
//! ```
//!
//! Resetting a pair whose last submission has not been retired by the GPU
//! is a protocol violation; backends that can observe it report
//! [`RhiError::InFlight`](crate::RhiError::InFlight).

use crate::descriptor::GpuDescriptorHandle;

/// Queue type a command list will be submitted to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CommandListKind {
    /// Graphics, compute and copy work.
    Direct,
    /// Compute and copy work.
    Compute,
    /// Copy work only.
    Copy,
}

/// Opaque handle to the memory backing a command list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommandAllocatorHandle(pub u64);

/// Opaque handle to a recordable command list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommandListHandle(pub u64);

/// A command list and the allocator it records into.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CommandListPair {
    /// Allocator that owns the recorded memory.
    pub allocator: CommandAllocatorHandle,
    /// The list commands are recorded into.
    pub list: CommandListHandle,
}

/// Opaque handle to a GPU resource view (texture, buffer, render target).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceView(pub u64);

/// Usage state of a resource, for transitions between passes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceState {
    /// No particular usage.
    Common,
    /// Written as a color attachment.
    RenderTarget,
    /// Written as a depth attachment.
    DepthWrite,
    /// Read-only depth attachment.
    DepthRead,
    /// Sampled from shaders.
    ShaderResource,
    /// Stencil written by a masking pass.
    StencilWrite,
    /// Stencil tested against by a later pass.
    StencilRead,
    /// Ready to be handed to the presentation engine.
    Present,
}

/// A backend-neutral command.
///
/// Pipeline, root signature and draw parameters are opaque ids owned by the
/// pipeline collaborator; the engine only sequences them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    /// Bind a root signature / pipeline layout.
    SetRootSignature(u32),
    /// Bind a pipeline state object.
    SetPipelineState(u32),
    /// Bind a descriptor table to a root slot.
    SetDescriptorTable {
        /// Root parameter slot.
        slot: u32,
        /// First descriptor of the table.
        table: GpuDescriptorHandle,
    },
    /// Set the stencil reference value.
    SetStencilReference(u32),
    /// Non-indexed draw.
    Draw {
        /// Vertices per instance.
        vertex_count: u32,
        /// Instance count.
        instance_count: u32,
    },
    /// Indexed draw.
    DrawIndexed {
        /// Indices per instance.
        index_count: u32,
        /// Instance count.
        instance_count: u32,
    },
    /// Resource state transition.
    Transition {
        /// Resource changing state.
        resource: ResourceView,
        /// State the previous pass left it in.
        before: ResourceState,
        /// State the next pass expects.
        after: ResourceState,
    },
}

impl Command {
    /// Whether this command produces rasterization work.
    #[inline]
    pub fn is_draw(&self) -> bool {
        matches!(self, Command::Draw { .. } | Command::DrawIndexed { .. })
    }
}
