//! Append-only queue of deferred render items.
//!
//! # Overview
//!
//! A [`RenderItemQueue`] is a fixed-capacity byte buffer holding
//! [`RenderItem`] records back to back, with a write cursor for the
//! producer and a read cursor for the consumer:
//!
//! ```text
//! [ item 0 | item 1 | item 2 | ........ free ........ ]
//!            ^read            ^write                  ^capacity
//! ```
//!
//! Items come out in the order they went in. [`reset`](RenderItemQueue::reset)
//! rewinds both cursors without touching the allocation, so the queue is
//! reused every frame.
//!
//! # Example
//!
//! ```
//! use cadence_renderer::{ObjectHandle, ObjectKind, PipelineStateTag, RenderItem, RenderItemQueue};
//!
//! let mut queue = RenderItemQueue::new(8);
//! let item = RenderItem::new(ObjectKind::StaticMesh, ObjectHandle(1), PipelineStateTag::Opaque);
//! queue.add(&item).unwrap();
//! assert_eq!(queue.dispatch(), Some(item));
//! assert_eq!(queue.dispatch(), None);
//! ```

use crate::error::{RenderError, RenderResult};
use crate::render_item::RenderItem;

const ITEM_SIZE: usize = std::mem::size_of::<RenderItem>();

/// Fixed-capacity FIFO of render items.
#[derive(Debug)]
pub struct RenderItemQueue {
    buffer: Vec<u8>,
    write: usize,
    read: usize,
}

impl RenderItemQueue {
    /// Creates a zeroed queue for `max_items` items.
    pub fn new(max_items: usize) -> Self {
        Self {
            buffer: vec![0; max_items * ITEM_SIZE],
            write: 0,
            read: 0,
        }
    }

    /// Capacity in items.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.buffer.len() / ITEM_SIZE
    }

    /// Items added since the last reset.
    #[inline]
    pub fn len(&self) -> usize {
        self.write / ITEM_SIZE
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.write == 0
    }

    /// Items added but not yet dispatched.
    #[inline]
    pub fn pending(&self) -> usize {
        (self.write - self.read) / ITEM_SIZE
    }

    /// Appends an item.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::QueueFull`] and leaves the queue unchanged if
    /// there is no room.
    pub fn add(&mut self, item: &RenderItem) -> RenderResult<()> {
        let end = self.write + ITEM_SIZE;
        if end > self.buffer.len() {
            return Err(RenderError::QueueFull {
                capacity: self.capacity(),
            });
        }
        self.buffer[self.write..end].copy_from_slice(bytemuck::bytes_of(item));
        self.write = end;
        Ok(())
    }

    /// Returns the next unread item, or `None` once every item was read.
    pub fn dispatch(&mut self) -> Option<RenderItem> {
        if self.read >= self.write {
            return None;
        }
        let end = self.read + ITEM_SIZE;
        let item = bytemuck::pod_read_unaligned(&self.buffer[self.read..end]);
        self.read = end;
        Some(item)
    }

    /// Iterates over the unread items, consuming them.
    pub fn drain(&mut self) -> Drain<'_> {
        Drain { queue: self }
    }

    /// Rewinds both cursors. The allocation is kept.
    pub fn reset(&mut self) {
        self.write = 0;
        self.read = 0;
    }
}

/// Iterator returned by [`RenderItemQueue::drain`].
pub struct Drain<'a> {
    queue: &'a mut RenderItemQueue,
}

impl Iterator for Drain<'_> {
    type Item = RenderItem;

    fn next(&mut self) -> Option<RenderItem> {
        self.queue.dispatch()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let pending = self.queue.pending();
        (pending, Some(pending))
    }
}

impl ExactSizeIterator for Drain<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render_item::{ObjectHandle, ObjectKind, PipelineStateTag};

    fn item(n: u64) -> RenderItem {
        RenderItem::new(
            ObjectKind::StaticMesh,
            ObjectHandle(n),
            PipelineStateTag::Opaque,
        )
    }

    #[test]
    fn test_dispatch_is_fifo() {
        let mut queue = RenderItemQueue::new(4);
        for n in 1..=3 {
            queue.add(&item(n)).unwrap();
        }
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.dispatch().map(|i| i.object()), Some(ObjectHandle(1)));
        assert_eq!(queue.pending(), 2);
        let rest: Vec<_> = queue.drain().map(|i| i.object().0).collect();
        assert_eq!(rest, vec![2, 3]);
        assert_eq!(queue.dispatch(), None);
    }

    #[test]
    fn test_full_queue_rejects_without_corruption() {
        let mut queue = RenderItemQueue::new(2);
        queue.add(&item(1)).unwrap();
        queue.add(&item(2)).unwrap();
        assert!(matches!(
            queue.add(&item(3)),
            Err(RenderError::QueueFull { capacity: 2 })
        ));
        assert_eq!(queue.len(), 2);
        let all: Vec<_> = queue.drain().map(|i| i.object().0).collect();
        assert_eq!(all, vec![1, 2]);
    }

    #[test]
    fn test_reset_yields_nothing_until_new_adds() {
        let mut queue = RenderItemQueue::new(4);
        queue.add(&item(1)).unwrap();
        queue.add(&item(2)).unwrap();
        assert!(queue.dispatch().is_some());

        queue.reset();
        assert!(queue.is_empty());
        assert_eq!(queue.dispatch(), None);
        assert_eq!(queue.capacity(), 4);

        queue.add(&item(9)).unwrap();
        assert_eq!(queue.dispatch().map(|i| i.object()), Some(ObjectHandle(9)));
        assert_eq!(queue.dispatch(), None);
    }

    #[test]
    fn test_zero_capacity_queue() {
        let mut queue = RenderItemQueue::new(0);
        assert!(queue.add(&item(1)).is_err());
        assert_eq!(queue.dispatch(), None);
    }

    #[test]
    fn test_drain_size_hint() {
        let mut queue = RenderItemQueue::new(4);
        queue.add(&item(1)).unwrap();
        queue.add(&item(2)).unwrap();
        assert_eq!(queue.drain().len(), 2);
    }
}
