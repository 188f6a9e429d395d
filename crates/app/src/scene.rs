//! A synthetic scene that exercises every pass.

use std::sync::Arc;

use anyhow::Result;
use cadence_renderer::{
    FilterHandle, LightHandle, ObjectKind, ObjectRegistry, Orchestrator, PipelineStateTag,
    RenderItem, RenderPass, RenderResult, Renderable, ResourceContext,
};
use cadence_rhi::ResourceView;
use tracing::debug;

/// Indexed mesh, rigid or skinned.
struct Mesh {
    vertices: ResourceView,
    material: ResourceView,
    index_count: u32,
}

impl Renderable for Mesh {
    fn render(&self, ctx: &mut ResourceContext<'_>, _: PipelineStateTag) -> RenderResult<()> {
        // Depth-only passes skip the material.
        if ctx.pass() == RenderPass::Shadow {
            ctx.bind_views(1, &[self.vertices])?;
        } else {
            ctx.bind_views(1, &[self.vertices, self.material])?;
        }
        ctx.draw(self.index_count, 1)
    }
}

struct Sky {
    cubemap: ResourceView,
}

impl Renderable for Sky {
    fn render(&self, ctx: &mut ResourceContext<'_>, _: PipelineStateTag) -> RenderResult<()> {
        ctx.bind_views(1, &[self.cubemap])?;
        ctx.draw(36, 1)
    }
}

/// A planar mirror: a quad drawn into stencil, then blended.
struct Mirror {
    quad: ResourceView,
    surface: ResourceView,
}

impl Renderable for Mirror {
    fn render(&self, ctx: &mut ResourceContext<'_>, tag: PipelineStateTag) -> RenderResult<()> {
        match tag {
            PipelineStateTag::MirrorBlend => ctx.bind_views(1, &[self.quad, self.surface])?,
            _ => ctx.bind_views(1, &[self.quad])?,
        };
        ctx.draw(6, 1)
    }
}

/// Fullscreen filter reading a lookup table.
struct Filter {
    lut: ResourceView,
}

impl Renderable for Filter {
    fn render(&self, ctx: &mut ResourceContext<'_>, _: PipelineStateTag) -> RenderResult<()> {
        ctx.bind_views(1, &[self.lut])?;
        ctx.draw(3, 1)
    }
}

/// Registered objects and the items they submit every frame.
pub struct SyntheticScene {
    items: Vec<RenderItem>,
}

impl SyntheticScene {
    /// Registers `meshes` meshes plus a sky, a mirror and a filter.
    ///
    /// Every fourth mesh is skinned and every eighth is seen in the mirror.
    pub fn build(registry: &ObjectRegistry, meshes: usize) -> Self {
        let sun = LightHandle(1);
        let mut items = Vec::with_capacity(meshes * 3 + 4);
        let mut next_view = 1000u64;
        let mut view = || {
            next_view += 1;
            ResourceView(next_view)
        };

        let mut reflected = Vec::new();
        for i in 0..meshes {
            let handle = registry.register(Arc::new(Mesh {
                vertices: view(),
                material: view(),
                index_count: 36 + (i as u32 % 7) * 12,
            }));
            let (kind, shadow, opaque) = if i % 4 == 3 {
                (
                    ObjectKind::SkinnedMesh,
                    PipelineStateTag::ShadowSkinned,
                    PipelineStateTag::OpaqueSkinned,
                )
            } else {
                (
                    ObjectKind::StaticMesh,
                    PipelineStateTag::ShadowStatic,
                    PipelineStateTag::Opaque,
                )
            };
            items.push(RenderItem::new(kind, handle, shadow).with_light(sun));
            items.push(RenderItem::new(kind, handle, opaque).with_light(sun));
            if i % 8 == 0 {
                reflected.push(RenderItem::new(kind, handle, PipelineStateTag::Reflected));
            }
        }

        let sky = registry.register(Arc::new(Sky { cubemap: view() }));
        items.push(RenderItem::new(ObjectKind::Sky, sky, PipelineStateTag::Sky));

        let mirror = registry.register(Arc::new(Mirror {
            quad: view(),
            surface: view(),
        }));
        items.push(RenderItem::new(
            ObjectKind::Mirror,
            mirror,
            PipelineStateTag::MirrorStencil,
        ));
        // Reflections first, then the mirror surface blended over them.
        items.extend(reflected);
        items.push(RenderItem::new(
            ObjectKind::Mirror,
            mirror,
            PipelineStateTag::MirrorBlend,
        ));

        let filter = registry.register(Arc::new(Filter { lut: view() }));
        items.push(
            RenderItem::new(
                ObjectKind::Fullscreen,
                filter,
                PipelineStateTag::PostProcess,
            )
            .with_filter(FilterHandle(filter.0)),
        );

        debug!(
            "Synthetic scene: {} object(s), {} item(s) per frame",
            registry.len(),
            items.len()
        );
        Self { items }
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    /// Submits every item to the pass its pipeline state belongs to.
    pub fn submit(&self, orchestrator: &mut Orchestrator) -> Result<()> {
        for item in &self.items {
            let tag = item
                .pipeline_state()
                .ok_or_else(|| anyhow::anyhow!("scene item without a pipeline state"))?;
            orchestrator.submit_item(tag.pass(), *item)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scene_covers_every_pass() {
        let registry = ObjectRegistry::new();
        let scene = SyntheticScene::build(&registry, 16);
        // 16 meshes + sky + mirror + filter.
        assert_eq!(registry.len(), 19);

        let mut passes: Vec<RenderPass> = scene
            .items
            .iter()
            .filter_map(|item| item.pipeline_state())
            .map(|tag| tag.pass())
            .collect();
        passes.sort();
        passes.dedup();
        assert_eq!(passes, RenderPass::ALL.to_vec());
    }

    #[test]
    fn test_every_item_refers_to_a_registered_object() {
        let registry = ObjectRegistry::new();
        let scene = SyntheticScene::build(&registry, 9);
        assert!(
            scene
                .items
                .iter()
                .all(|item| registry.get(item.object()).is_some())
        );
        // Two per mesh, sky, mirror stencil and blend, two reflections, filter.
        assert_eq!(scene.item_count(), 9 * 2 + 1 + 2 + 2 + 1);
    }
}
