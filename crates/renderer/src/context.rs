//! What a [`Renderable`](crate::Renderable) sees while it draws.

use cadence_rhi::{Command, CommandListHandle, GpuDevice, ResourceView};

use crate::descriptor_table::{DescriptorTable, DescriptorTableAllocator};
use crate::error::{RenderError, RenderResult};
use crate::pass::RenderPass;
use crate::pipeline_table::{DrawStrategy, PipelineBinding};
use crate::render_item::RenderItem;

/// Recording context handed to [`Renderable::render`](crate::Renderable::render).
///
/// It borrows the calling worker's command list and descriptor allocator
/// for the duration of one item. Common state for the item's pipeline is
/// already bound when the object is called.
pub struct ResourceContext<'a> {
    device: &'a dyn GpuDevice,
    list: CommandListHandle,
    tables: &'a mut DescriptorTableAllocator,
    binding: &'a PipelineBinding,
    item: RenderItem,
    pass: RenderPass,
    frame_index: usize,
    thread_index: usize,
    draws: u32,
}

impl<'a> ResourceContext<'a> {
    /// Builds a context over a recording list.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        device: &'a dyn GpuDevice,
        list: CommandListHandle,
        tables: &'a mut DescriptorTableAllocator,
        binding: &'a PipelineBinding,
        item: RenderItem,
        pass: RenderPass,
        frame_index: usize,
        thread_index: usize,
    ) -> Self {
        Self {
            device,
            list,
            tables,
            binding,
            item,
            pass,
            frame_index,
            thread_index,
            draws: 0,
        }
    }

    /// The item being rendered.
    #[inline]
    pub fn item(&self) -> &RenderItem {
        &self.item
    }

    #[inline]
    pub fn pass(&self) -> RenderPass {
        self.pass
    }

    #[inline]
    pub fn frame_index(&self) -> usize {
        self.frame_index
    }

    #[inline]
    pub fn thread_index(&self) -> usize {
        self.thread_index
    }

    #[inline]
    pub fn list(&self) -> CommandListHandle {
        self.list
    }

    /// The binding of the item's pipeline state.
    #[inline]
    pub fn binding(&self) -> &PipelineBinding {
        self.binding
    }

    /// Draw calls recorded through this context.
    #[inline]
    pub fn draws(&self) -> u32 {
        self.draws
    }

    /// Records a raw command.
    pub fn record(&self, command: &Command) -> RenderResult<()> {
        self.device.record(self.list, command)?;
        Ok(())
    }

    /// Reserves a descriptor table from this thread's allocator.
    pub fn alloc_table(&mut self, count: u32) -> RenderResult<DescriptorTable> {
        self.tables.alloc_table(count)
    }

    /// Writes views into a table allocated through this context.
    pub fn write_descriptors(
        &self,
        table: &DescriptorTable,
        first: u32,
        views: &[ResourceView],
    ) -> RenderResult<()> {
        self.tables.write_descriptors(table, first, views)
    }

    /// Binds a table to a root slot.
    pub fn bind_table(&self, slot: u32, table: &DescriptorTable) -> RenderResult<()> {
        self.record(&Command::SetDescriptorTable {
            slot,
            table: table.gpu,
        })
    }

    /// Allocates a table for `views`, fills it and binds it to `slot`.
    pub fn bind_views(&mut self, slot: u32, views: &[ResourceView]) -> RenderResult<DescriptorTable> {
        let count = u32::try_from(views.len()).map_err(|_| RenderError::DescriptorCapacity {
            requested: u32::MAX,
            available: self.tables.remaining(),
        })?;
        let table = self.alloc_table(count)?;
        self.write_descriptors(&table, 0, views)?;
        self.bind_table(slot, &table)?;
        Ok(table)
    }

    /// Issues a draw the way the item's pipeline expects.
    pub fn draw(&mut self, count: u32, instances: u32) -> RenderResult<()> {
        let command = match self.binding.strategy {
            DrawStrategy::Indexed => Command::DrawIndexed {
                index_count: count,
                instance_count: instances,
            },
            DrawStrategy::NonIndexed => Command::Draw {
                vertex_count: count,
                instance_count: instances,
            },
            DrawStrategy::FullscreenTriangle => Command::Draw {
                vertex_count: 3,
                instance_count: 1,
            },
        };
        self.record(&command)?;
        self.draws += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render_item::{ObjectHandle, ObjectKind, PipelineStateTag};
    use cadence_rhi::{CommandListKind, CompletionMode, HeadlessDevice};

    #[test]
    fn test_draw_follows_strategy() {
        let device = HeadlessDevice::new(CompletionMode::Immediate);
        let mut tables = DescriptorTableAllocator::new(device.clone(), 8).unwrap();
        let pair = device.create_command_list(CommandListKind::Direct).unwrap();
        let binding = PipelineBinding {
            root_signature: 4,
            pipeline: 9,
            global_table_size: 0,
            stencil_reference: None,
            strategy: DrawStrategy::FullscreenTriangle,
        };
        let item = RenderItem::new(
            ObjectKind::Fullscreen,
            ObjectHandle(1),
            PipelineStateTag::PostProcess,
        );

        let mut ctx = ResourceContext::new(
            device.as_ref(),
            pair.list,
            &mut tables,
            &binding,
            item,
            RenderPass::PostProcess,
            0,
            0,
        );
        let table = ctx.bind_views(1, &[ResourceView(3), ResourceView(4)]).unwrap();
        ctx.draw(100, 7).unwrap();
        assert_eq!(ctx.draws(), 1);
        assert_eq!(table.count, 2);
        assert_eq!(tables.allocated(), 2);

        device.close_command_list(pair.list).unwrap();
        device.submit(&[pair.list]).unwrap();
        let last = device.executed_commands().pop().unwrap().command;
        assert_eq!(
            last,
            Command::Draw {
                vertex_count: 3,
                instance_count: 1
            }
        );
    }

    #[test]
    fn test_bind_views_beyond_capacity_fails_cleanly() {
        let device = HeadlessDevice::new(CompletionMode::Immediate);
        let mut tables = DescriptorTableAllocator::new(device.clone(), 2).unwrap();
        let pair = device.create_command_list(CommandListKind::Direct).unwrap();
        let binding = PipelineBinding {
            root_signature: 2,
            pipeline: 3,
            global_table_size: 0,
            stencil_reference: None,
            strategy: DrawStrategy::Indexed,
        };
        let item = RenderItem::new(
            ObjectKind::StaticMesh,
            ObjectHandle(1),
            PipelineStateTag::Opaque,
        );

        let mut ctx = ResourceContext::new(
            device.as_ref(),
            pair.list,
            &mut tables,
            &binding,
            item,
            RenderPass::Object,
            0,
            0,
        );
        let views = [ResourceView(1), ResourceView(2), ResourceView(3)];
        let err = ctx.bind_views(1, &views).unwrap_err();
        assert!(matches!(
            err,
            RenderError::DescriptorCapacity {
                requested: 3,
                available: 2
            }
        ));
        assert_eq!(tables.allocated(), 0);

        device.close_command_list(pair.list).unwrap();
        device.submit(&[pair.list]).unwrap();
        assert!(device.executed_commands().is_empty());
    }
}
