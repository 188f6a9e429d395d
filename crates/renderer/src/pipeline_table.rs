//! Table-driven common-state binding.
//!
//! Every [`PipelineStateTag`] maps to a [`PipelineBinding`]: the root
//! signature and pipeline object to bind, how many global descriptors the
//! pipeline reads from slot 0, and how its draws are issued. The table is
//! built once at startup and only looked up afterwards.
//!
//! Root signature and pipeline ids are opaque values owned by the pipeline
//! collaborator.

use std::collections::HashMap;

use cadence_rhi::{Command, CommandListHandle, GpuDevice, ResourceView};
use tracing::trace;

use crate::descriptor_table::DescriptorTableAllocator;
use crate::error::{RenderError, RenderResult};
use crate::render_item::PipelineStateTag;

/// How a pipeline's draws are issued.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrawStrategy {
    /// `DrawIndexed(count, instances)`.
    Indexed,
    /// `Draw(count, instances)`.
    NonIndexed,
    /// A single screen-covering triangle; the count is ignored.
    FullscreenTriangle,
}

/// What binding a pipeline-state tag means.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PipelineBinding {
    /// Root signature / pipeline layout id.
    pub root_signature: u32,
    /// Pipeline state object id.
    pub pipeline: u32,
    /// Leading global views bound at slot 0. Zero binds no global table.
    pub global_table_size: u32,
    /// Stencil reference for stencil-writing or -testing pipelines.
    pub stencil_reference: Option<u32>,
    pub strategy: DrawStrategy,
}

/// Pipeline-state tag to binding map.
#[derive(Clone, Debug, Default)]
pub struct PipelineTable {
    bindings: HashMap<PipelineStateTag, PipelineBinding>,
}

impl PipelineTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// A table covering every tag with the engine's standard layout ids.
    pub fn standard() -> Self {
        use DrawStrategy::*;
        use PipelineStateTag::*;

        let rows = [
            (ShadowStatic, 1, 1, 1, None, Indexed),
            (ShadowSkinned, 1, 2, 1, None, Indexed),
            (Opaque, 2, 3, 2, None, Indexed),
            (OpaqueSkinned, 2, 4, 2, None, Indexed),
            (Sky, 2, 5, 1, None, Indexed),
            (MirrorStencil, 3, 6, 1, Some(1), Indexed),
            (Reflected, 2, 7, 2, Some(1), Indexed),
            (MirrorBlend, 3, 8, 1, Some(1), Indexed),
            (PostProcess, 4, 9, 3, None, FullscreenTriangle),
        ];

        let mut table = Self::new();
        for (tag, root_signature, pipeline, global_table_size, stencil_reference, strategy) in rows
        {
            table.insert(
                tag,
                PipelineBinding {
                    root_signature,
                    pipeline,
                    global_table_size,
                    stencil_reference,
                    strategy,
                },
            );
        }
        table
    }

    /// Adds or replaces a binding, returning the old one.
    pub fn insert(
        &mut self,
        tag: PipelineStateTag,
        binding: PipelineBinding,
    ) -> Option<PipelineBinding> {
        self.bindings.insert(tag, binding)
    }

    /// Looks up the binding of a tag.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::UnknownPipelineState`] for an unregistered tag.
    pub fn get(&self, tag: PipelineStateTag) -> RenderResult<&PipelineBinding> {
        self.bindings
            .get(&tag)
            .ok_or(RenderError::UnknownPipelineState(tag))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Records the common state of `tag` into `list`.
    ///
    /// Binds the root signature and pipeline, allocates the global table
    /// from the calling thread's allocator, fills it from the front of
    /// `globals`, and binds it to slot 0.
    pub fn bind_common_state(
        &self,
        device: &dyn GpuDevice,
        list: CommandListHandle,
        tag: PipelineStateTag,
        tables: &mut DescriptorTableAllocator,
        globals: &[ResourceView],
    ) -> RenderResult<&PipelineBinding> {
        let binding = self.get(tag)?;

        device.record(list, &Command::SetRootSignature(binding.root_signature))?;
        device.record(list, &Command::SetPipelineState(binding.pipeline))?;

        if binding.global_table_size > 0 {
            let table = tables.alloc_table(binding.global_table_size)?;
            let count = globals.len().min(binding.global_table_size as usize);
            tables.write_descriptors(&table, 0, &globals[..count])?;
            device.record(
                list,
                &Command::SetDescriptorTable {
                    slot: 0,
                    table: table.gpu,
                },
            )?;
        }

        if let Some(reference) = binding.stencil_reference {
            device.record(list, &Command::SetStencilReference(reference))?;
        }

        trace!("Bound common state for {:?}", tag);
        Ok(binding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_rhi::{CommandListKind, CompletionMode, HeadlessDevice};

    #[test]
    fn test_standard_table_covers_every_tag() {
        let table = PipelineTable::standard();
        assert_eq!(table.len(), PipelineStateTag::ALL.len());
        for tag in PipelineStateTag::ALL {
            assert!(table.get(tag).is_ok(), "{:?}", tag);
        }
    }

    #[test]
    fn test_missing_tag_is_an_error() {
        let table = PipelineTable::new();
        assert!(matches!(
            table.get(PipelineStateTag::Sky),
            Err(RenderError::UnknownPipelineState(PipelineStateTag::Sky))
        ));
    }

    #[test]
    fn test_bind_common_state_records_and_allocates() {
        let device = HeadlessDevice::new(CompletionMode::Immediate);
        let mut tables = DescriptorTableAllocator::new(device.clone(), 16).unwrap();
        let pair = device.create_command_list(CommandListKind::Direct).unwrap();
        let globals = [ResourceView(10), ResourceView(11), ResourceView(12)];

        let table = PipelineTable::standard();
        let binding = table
            .bind_common_state(
                device.as_ref(),
                pair.list,
                PipelineStateTag::MirrorStencil,
                &mut tables,
                &globals,
            )
            .unwrap();
        assert_eq!(binding.pipeline, 6);
        assert_eq!(tables.allocated(), 1);
        assert_eq!(device.descriptor_at(tables.heap(), 0), Some(ResourceView(10)));

        device.close_command_list(pair.list).unwrap();
        device.submit(&[pair.list]).unwrap();
        let commands: Vec<_> = device
            .executed_commands()
            .into_iter()
            .map(|c| c.command)
            .collect();
        assert_eq!(commands[0], Command::SetRootSignature(3));
        assert_eq!(commands[1], Command::SetPipelineState(6));
        assert!(matches!(
            commands[2],
            Command::SetDescriptorTable { slot: 0, .. }
        ));
        assert_eq!(commands[3], Command::SetStencilReference(1));
    }
}
