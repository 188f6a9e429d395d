//! The deferred draw request.
//!
//! A [`RenderItem`] is a 32-byte plain-old-data record: which object to
//! draw, with which optional light and filter, through which pipeline
//! state. Items are copied byte-for-byte into
//! [`RenderItemQueue`](crate::RenderItemQueue)s and read back by workers.
//!
//! ```text
//! offset  size  field
//!      0     4  object kind      (ObjectKind as u32)
//!      4     4  pipeline state   (PipelineStateTag as u32)
//!      8     8  object handle
//!     16     8  light handle     (0 = none)
//!     24     8  filter handle    (0 = none)
//! ```

use bytemuck::{Pod, Zeroable};

use crate::pass::RenderPass;

/// Handle of a registered [`Renderable`](crate::Renderable).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectHandle(pub u64);

/// Handle of the light an item is lit or shadowed by.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LightHandle(pub u64);

/// Handle of a post-process filter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FilterHandle(pub u64);

/// What kind of object an item draws.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ObjectKind {
    /// Rigid mesh.
    StaticMesh = 1,
    /// Skinned mesh.
    SkinnedMesh = 2,
    /// Reflective surface.
    Mirror = 3,
    /// Sky dome or box.
    Sky = 4,
    /// Screen-covering quad driven by a filter.
    Fullscreen = 5,
}

impl TryFrom<u32> for ObjectKind {
    type Error = u32;

    fn try_from(raw: u32) -> Result<Self, u32> {
        Ok(match raw {
            1 => ObjectKind::StaticMesh,
            2 => ObjectKind::SkinnedMesh,
            3 => ObjectKind::Mirror,
            4 => ObjectKind::Sky,
            5 => ObjectKind::Fullscreen,
            other => return Err(other),
        })
    }
}

/// Pipeline state an item is drawn with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum PipelineStateTag {
    /// Depth-only, rigid.
    ShadowStatic = 1,
    /// Depth-only, skinned.
    ShadowSkinned = 2,
    /// Lit opaque, rigid.
    Opaque = 3,
    /// Lit opaque, skinned.
    OpaqueSkinned = 4,
    /// Sky.
    Sky = 5,
    /// Writes the mirror footprint into stencil.
    MirrorStencil = 6,
    /// Reflected geometry, stencil-tested.
    Reflected = 7,
    /// Blends the mirror surface over the reflection.
    MirrorBlend = 8,
    /// Fullscreen filter.
    PostProcess = 9,
}

impl PipelineStateTag {
    /// Every tag.
    pub const ALL: [PipelineStateTag; 9] = [
        PipelineStateTag::ShadowStatic,
        PipelineStateTag::ShadowSkinned,
        PipelineStateTag::Opaque,
        PipelineStateTag::OpaqueSkinned,
        PipelineStateTag::Sky,
        PipelineStateTag::MirrorStencil,
        PipelineStateTag::Reflected,
        PipelineStateTag::MirrorBlend,
        PipelineStateTag::PostProcess,
    ];

    /// Pass this tag's items are drawn in.
    pub fn pass(self) -> RenderPass {
        match self {
            PipelineStateTag::ShadowStatic | PipelineStateTag::ShadowSkinned => RenderPass::Shadow,
            PipelineStateTag::Opaque | PipelineStateTag::OpaqueSkinned | PipelineStateTag::Sky => {
                RenderPass::Object
            }
            PipelineStateTag::MirrorStencil => RenderPass::MirrorStencil,
            PipelineStateTag::Reflected | PipelineStateTag::MirrorBlend => RenderPass::MirrorBlend,
            PipelineStateTag::PostProcess => RenderPass::PostProcess,
        }
    }
}

impl TryFrom<u32> for PipelineStateTag {
    type Error = u32;

    fn try_from(raw: u32) -> Result<Self, u32> {
        PipelineStateTag::ALL
            .into_iter()
            .find(|tag| *tag as u32 == raw)
            .ok_or(raw)
    }
}

/// A deferred draw request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct RenderItem {
    object_kind: u32,
    pipeline_state: u32,
    object: u64,
    light: u64,
    filter: u64,
}

const _: () = assert!(std::mem::size_of::<RenderItem>() == 32);

impl RenderItem {
    /// An item with no light and no filter.
    pub fn new(kind: ObjectKind, object: ObjectHandle, pipeline_state: PipelineStateTag) -> Self {
        Self {
            object_kind: kind as u32,
            pipeline_state: pipeline_state as u32,
            object: object.0,
            light: 0,
            filter: 0,
        }
    }

    /// Attaches a light.
    pub fn with_light(mut self, light: LightHandle) -> Self {
        self.light = light.0;
        self
    }

    /// Attaches a filter.
    pub fn with_filter(mut self, filter: FilterHandle) -> Self {
        self.filter = filter.0;
        self
    }

    /// The object kind, `None` if the raw tag is not a known kind.
    pub fn object_kind(&self) -> Option<ObjectKind> {
        ObjectKind::try_from(self.object_kind).ok()
    }

    /// The pipeline state, `None` if the raw tag is not a known state.
    pub fn pipeline_state(&self) -> Option<PipelineStateTag> {
        PipelineStateTag::try_from(self.pipeline_state).ok()
    }

    #[inline]
    pub fn object(&self) -> ObjectHandle {
        ObjectHandle(self.object)
    }

    #[inline]
    pub fn light(&self) -> Option<LightHandle> {
        (self.light != 0).then_some(LightHandle(self.light))
    }

    #[inline]
    pub fn filter(&self) -> Option<FilterHandle> {
        (self.filter != 0).then_some(FilterHandle(self.filter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_is_32_bytes() {
        assert_eq!(std::mem::size_of::<RenderItem>(), 32);
        let item = RenderItem::new(
            ObjectKind::Mirror,
            ObjectHandle(0x1122),
            PipelineStateTag::MirrorStencil,
        )
        .with_light(LightHandle(9));
        let bytes = bytemuck::bytes_of(&item);
        assert_eq!(&bytes[0..4], &3u32.to_ne_bytes());
        assert_eq!(&bytes[4..8], &6u32.to_ne_bytes());
        assert_eq!(&bytes[8..16], &0x1122u64.to_ne_bytes());
        assert_eq!(&bytes[16..24], &9u64.to_ne_bytes());
        assert_eq!(&bytes[24..32], &0u64.to_ne_bytes());
    }

    #[test]
    fn test_optional_handles() {
        let item = RenderItem::new(
            ObjectKind::StaticMesh,
            ObjectHandle(1),
            PipelineStateTag::Opaque,
        );
        assert_eq!(item.light(), None);
        assert_eq!(item.filter(), None);

        let item = item
            .with_light(LightHandle(4))
            .with_filter(FilterHandle(5));
        assert_eq!(item.light(), Some(LightHandle(4)));
        assert_eq!(item.filter(), Some(FilterHandle(5)));
        assert_eq!(item.object_kind(), Some(ObjectKind::StaticMesh));
        assert_eq!(item.pipeline_state(), Some(PipelineStateTag::Opaque));
    }

    #[test]
    fn test_zeroed_item_has_no_valid_tags() {
        let item = RenderItem::zeroed();
        assert_eq!(item.object_kind(), None);
        assert_eq!(item.pipeline_state(), None);
    }

    #[test]
    fn test_tag_conversion() {
        for tag in PipelineStateTag::ALL {
            assert_eq!(PipelineStateTag::try_from(tag as u32), Ok(tag));
        }
        assert_eq!(PipelineStateTag::try_from(0), Err(0));
        assert_eq!(ObjectKind::try_from(6), Err(6));
    }

    #[test]
    fn test_tags_map_to_their_pass() {
        assert_eq!(PipelineStateTag::ShadowSkinned.pass(), RenderPass::Shadow);
        assert_eq!(PipelineStateTag::Sky.pass(), RenderPass::Object);
        assert_eq!(PipelineStateTag::Reflected.pass(), RenderPass::MirrorBlend);
        assert_eq!(PipelineStateTag::PostProcess.pass(), RenderPass::PostProcess);
    }
}
