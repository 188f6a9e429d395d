//! The fixed pass schedule of a frame.
//!
//! ```text
//! Shadow ─► Object ─► MirrorStencil ─► MirrorBlend ─► PostProcess ─► present
//! ```
//!
//! Each pass depends on the writes of the one before it, so a full barrier
//! separates them. At every boundary the orchestrator records the resource
//! transitions returned by [`RenderPass::transitions_before`] (and
//! [`present_transitions`] before presenting).

use std::fmt;

use cadence_rhi::{ResourceState, ResourceView};

/// One phase of frame rendering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RenderPass {
    /// Depth from each shadow-casting light.
    Shadow,
    /// Lit opaque geometry, sampling the shadow maps.
    Object,
    /// Mirror footprints written into stencil.
    MirrorStencil,
    /// Reflections and mirror surfaces, stencil-tested.
    MirrorBlend,
    /// Fullscreen filters over the scene color.
    PostProcess,
}

impl RenderPass {
    /// Number of passes.
    pub const COUNT: usize = 5;

    /// Every pass, in execution order.
    pub const ALL: [RenderPass; Self::COUNT] = [
        RenderPass::Shadow,
        RenderPass::Object,
        RenderPass::MirrorStencil,
        RenderPass::MirrorBlend,
        RenderPass::PostProcess,
    ];

    /// Position in the schedule.
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            RenderPass::Shadow => "shadow",
            RenderPass::Object => "object",
            RenderPass::MirrorStencil => "mirror-stencil",
            RenderPass::MirrorBlend => "mirror-blend",
            RenderPass::PostProcess => "post-process",
        }
    }

    /// Transitions that must execute after the previous pass and before
    /// this one.
    pub fn transitions_before(self, targets: &FrameTargets) -> Vec<PassTransition> {
        use ResourceState::*;
        match self {
            RenderPass::Shadow => vec![
                PassTransition::new(targets.shadow_map, ShaderResource, DepthWrite),
                PassTransition::new(targets.back_buffer, Present, RenderTarget),
            ],
            RenderPass::Object => vec![PassTransition::new(
                targets.shadow_map,
                DepthWrite,
                ShaderResource,
            )],
            RenderPass::MirrorStencil => vec![PassTransition::new(
                targets.depth_stencil,
                DepthWrite,
                StencilWrite,
            )],
            RenderPass::MirrorBlend => vec![PassTransition::new(
                targets.depth_stencil,
                StencilWrite,
                StencilRead,
            )],
            RenderPass::PostProcess => vec![
                PassTransition::new(targets.scene_color, RenderTarget, ShaderResource),
                PassTransition::new(targets.depth_stencil, StencilRead, DepthWrite),
            ],
        }
    }
}

impl fmt::Display for RenderPass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Transitions between the post-process pass and present. They also put
/// every target back in the state the shadow pass expects next frame.
pub fn present_transitions(targets: &FrameTargets) -> Vec<PassTransition> {
    use ResourceState::*;
    vec![
        PassTransition::new(targets.scene_color, ShaderResource, RenderTarget),
        PassTransition::new(targets.back_buffer, RenderTarget, Present),
    ]
}

/// A state change of one resource at a pass boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PassTransition {
    pub resource: ResourceView,
    pub before: ResourceState,
    pub after: ResourceState,
}

impl PassTransition {
    pub fn new(resource: ResourceView, before: ResourceState, after: ResourceState) -> Self {
        Self {
            resource,
            before,
            after,
        }
    }
}

/// Frame-wide resources the passes hand to one another. Owned by the
/// resource collaborator; the engine only sequences their transitions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameTargets {
    /// Per-frame constants (camera, lights), bound in every global table.
    pub frame_constants: ResourceView,
    /// Shadow depth map.
    pub shadow_map: ResourceView,
    /// Main depth-stencil buffer.
    pub depth_stencil: ResourceView,
    /// HDR scene color.
    pub scene_color: ResourceView,
    /// Presentable back buffer.
    pub back_buffer: ResourceView,
}

impl Default for FrameTargets {
    fn default() -> Self {
        Self {
            frame_constants: ResourceView(1),
            shadow_map: ResourceView(2),
            depth_stencil: ResourceView(3),
            scene_color: ResourceView(4),
            back_buffer: ResourceView(5),
        }
    }
}

impl FrameTargets {
    /// Views bound, in order, at the front of every global descriptor table.
    pub fn global_views(&self) -> [ResourceView; 3] {
        [self.frame_constants, self.shadow_map, self.scene_color]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_schedule_order() {
        let indices: Vec<_> = RenderPass::ALL.iter().map(|p| p.index()).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
        assert!(RenderPass::Shadow < RenderPass::PostProcess);
        assert_eq!(RenderPass::MirrorBlend.to_string(), "mirror-blend");
    }

    #[test]
    fn test_transitions_chain_across_a_frame() {
        // Walk a full frame twice: every transition must start from the
        // state the previous one left its resource in.
        let targets = FrameTargets::default();
        let mut states: HashMap<ResourceView, ResourceState> = HashMap::from([
            (targets.shadow_map, ResourceState::ShaderResource),
            (targets.depth_stencil, ResourceState::DepthWrite),
            (targets.scene_color, ResourceState::RenderTarget),
            (targets.back_buffer, ResourceState::Present),
        ]);
        let initial = states.clone();

        for _ in 0..2 {
            let boundaries = RenderPass::ALL
                .iter()
                .map(|p| p.transitions_before(&targets))
                .chain(std::iter::once(present_transitions(&targets)));
            for transitions in boundaries {
                for t in transitions {
                    assert_eq!(states[&t.resource], t.before, "{:?}", t);
                    states.insert(t.resource, t.after);
                }
            }
            assert_eq!(states, initial);
        }
    }

    #[test]
    fn test_shadow_map_readable_before_object_pass() {
        let targets = FrameTargets::default();
        let before_object = RenderPass::Object.transitions_before(&targets);
        assert!(before_object.contains(&PassTransition::new(
            targets.shadow_map,
            ResourceState::DepthWrite,
            ResourceState::ShaderResource
        )));
    }
}
