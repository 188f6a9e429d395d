//! Objects the workers draw, and the registry render items refer to.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::context::ResourceContext;
use crate::error::RenderResult;
use crate::render_item::{ObjectHandle, PipelineStateTag};

/// Something a worker can record draws for.
///
/// `render` runs on a worker thread with the item's common state already
/// bound. It binds its own per-object resources through a table allocated
/// from `ctx` and issues its draws.
pub trait Renderable: Send + Sync {
    fn render(
        &self,
        ctx: &mut ResourceContext<'_>,
        pipeline_state: PipelineStateTag,
    ) -> RenderResult<()>;
}

/// Handle-to-object map shared by the application and the workers.
#[derive(Default)]
pub struct ObjectRegistry {
    objects: RwLock<HashMap<ObjectHandle, Arc<dyn Renderable>>>,
    next_handle: AtomicU64,
}

impl ObjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an object under a fresh, non-zero handle.
    pub fn register(&self, object: Arc<dyn Renderable>) -> ObjectHandle {
        let handle = ObjectHandle(self.next_handle.fetch_add(1, Ordering::Relaxed) + 1);
        self.objects.write().insert(handle, object);
        handle
    }

    /// Removes an object. Items already queued for it fail at render time.
    pub fn remove(&self, handle: ObjectHandle) -> Option<Arc<dyn Renderable>> {
        self.objects.write().remove(&handle)
    }

    pub fn get(&self, handle: ObjectHandle) -> Option<Arc<dyn Renderable>> {
        self.objects.read().get(&handle).cloned()
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }
}
