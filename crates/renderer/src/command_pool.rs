//! Recycling pool of command lists.
//!
//! # Overview
//!
//! A [`CommandBufferPool`] owns a growable, capped set of command list +
//! allocator pairs. Entries live in an arena and are referenced by index
//! from two sets:
//!
//! - **available**: reset and ready to record
//! - **allocated**: handed out this frame, possibly still executing on the GPU
//!
//! At most one entry is *current* at a time. [`current`](CommandBufferPool::current)
//! hands it out (creating a pair lazily while under the cap),
//! [`close`](CommandBufferPool::close) or
//! [`submit_and_close`](CommandBufferPool::submit_and_close) retires it, and
//! [`reset_all`](CommandBufferPool::reset_all) moves everything allocated
//! back to available once the frame's fence has been reached.
//!
//! # Invariants
//!
//! `allocated + available == total <= max`, and `current` is set only
//! between `current()` and `close()`. Overflowing the cap, closing with no
//! current list, or closing twice are programming errors and panic.
//!
//! # Example
//!
//! ```
//! use cadence_renderer::CommandBufferPool;
//! use cadence_rhi::{CommandListKind, CompletionMode, HeadlessDevice};
//!
//! # fn example() -> cadence_renderer::RenderResult<()> {
//! let device = HeadlessDevice::new(CompletionMode::Immediate);
//! let mut pool = CommandBufferPool::new(device, CommandListKind::Direct, 4)?;
//!
//! let list = pool.current()?;
//! // ... record into list.list ...
//! pool.submit_and_close()?;
//! assert_eq!(pool.total(), 1);
//! # Ok(())
//! # }
//! ```

use std::collections::VecDeque;
use std::sync::Arc;

use cadence_rhi::{CommandListKind, CommandListPair, GpuDevice};
use tracing::{debug, trace, warn};

use crate::error::{RenderError, RenderResult};

struct CommandBufferEntry {
    pair: CommandListPair,
    closed: bool,
}

/// Capped pool of command lists for one `[frame][thread]` lane.
pub struct CommandBufferPool {
    device: Arc<dyn GpuDevice>,
    kind: CommandListKind,
    entries: Vec<CommandBufferEntry>,
    available: VecDeque<usize>,
    allocated: Vec<usize>,
    current: Option<usize>,
    max_count: usize,
}

impl CommandBufferPool {
    /// Creates an empty pool.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::InvalidConfig`] if `max_count <= 2`.
    pub fn new(
        device: Arc<dyn GpuDevice>,
        kind: CommandListKind,
        max_count: usize,
    ) -> RenderResult<Self> {
        if max_count <= 2 {
            return Err(RenderError::InvalidConfig(format!(
                "command buffer pool cap must exceed 2 (got {})",
                max_count
            )));
        }
        Ok(Self {
            device,
            kind,
            entries: Vec::new(),
            available: VecDeque::new(),
            allocated: Vec::new(),
            current: None,
            max_count,
        })
    }

    /// Pairs created so far.
    #[inline]
    pub fn total(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn allocated_count(&self) -> usize {
        self.allocated.len()
    }

    #[inline]
    pub fn available_count(&self) -> usize {
        self.available.len()
    }

    #[inline]
    pub fn max_count(&self) -> usize {
        self.max_count
    }

    #[inline]
    pub fn kind(&self) -> CommandListKind {
        self.kind
    }

    /// Whether a list is handed out and not yet closed.
    #[inline]
    pub fn has_current(&self) -> bool {
        self.current.is_some()
    }

    /// Returns the list being recorded, taking a new one if none is.
    ///
    /// # Panics
    ///
    /// Panics if no list is available and the pool is at its cap.
    ///
    /// # Errors
    ///
    /// Returns the device error if a new pair cannot be created.
    pub fn current(&mut self) -> RenderResult<CommandListPair> {
        if let Some(index) = self.current {
            return Ok(self.entries[index].pair);
        }

        let index = match self.available.pop_front() {
            Some(index) => index,
            None => {
                assert!(
                    self.entries.len() < self.max_count,
                    "command buffer pool exhausted: all {} {:?} lists are in use this frame",
                    self.max_count,
                    self.kind
                );
                let pair = self.device.create_command_list(self.kind)?;
                self.entries.push(CommandBufferEntry {
                    pair,
                    closed: false,
                });
                trace!(
                    "Command pool grew to {}/{} lists",
                    self.entries.len(),
                    self.max_count
                );
                self.entries.len() - 1
            }
        };

        self.entries[index].closed = false;
        self.allocated.push(index);
        self.current = Some(index);
        self.debug_check();
        Ok(self.entries[index].pair)
    }

    /// Closes the current list and returns it.
    ///
    /// # Panics
    ///
    /// Panics if there is no current list or it is already closed.
    pub fn close(&mut self) -> RenderResult<CommandListPair> {
        let Some(index) = self.current.take() else {
            panic!("close() called with no current {:?} command list", self.kind);
        };
        let entry = &mut self.entries[index];
        assert!(
            !entry.closed,
            "command list {} closed twice",
            entry.pair.list.0
        );
        self.device.close_command_list(entry.pair.list)?;
        entry.closed = true;
        Ok(entry.pair)
    }

    /// Closes the current list and submits it to the execution queue.
    pub fn submit_and_close(&mut self) -> RenderResult<()> {
        let pair = self.close()?;
        self.device.submit(&[pair.list])?;
        Ok(())
    }

    /// Resets every allocated list and makes it available again.
    ///
    /// Call only after the fence recorded for this pool's frame slot has
    /// been reached.
    pub fn reset_all(&mut self) -> RenderResult<()> {
        if let Some(index) = self.current.take() {
            warn!(
                "Resetting {:?} pool while command list {} is still open",
                self.kind, self.entries[index].pair.list.0
            );
        }

        while let Some(index) = self.allocated.pop() {
            let entry = &mut self.entries[index];
            if let Err(e) = self.device.reset_command_list(&entry.pair) {
                self.allocated.push(index);
                return Err(e.into());
            }
            entry.closed = false;
            self.available.push_back(index);
        }
        self.debug_check();
        Ok(())
    }

    #[inline]
    fn debug_check(&self) {
        debug_assert_eq!(
            self.allocated.len() + self.available.len(),
            self.entries.len()
        );
        debug_assert!(self.entries.len() <= self.max_count);
    }
}

impl Drop for CommandBufferPool {
    fn drop(&mut self) {
        let count = self.entries.len();
        for entry in self.entries.drain(..) {
            self.device.destroy_command_list(entry.pair);
        }
        self.allocated.clear();
        self.available.clear();
        debug!("Released {} {:?} command list(s)", count, self.kind);
    }
}
