//! ## kestrel-core::queue
//! **Queues that accept delivered events**
//!
//! A link never delivers directly; it inserts into whichever queue its
//! configuration selected:
//! - `vortex`: the partition's time-ordered queue feeding handler links
//! - `polling`: per-link queue drained by `recv()`
//! - `untimed`: init/complete phase traffic
//! - `sync`: outbound buffer for another partition
//! - `uninitialized`: placeholder that rejects everything

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::event::Event;

mod polling;
mod sync;
mod uninitialized;
mod untimed;
mod vortex;

pub use polling::PollingLinkQueue;
pub use sync::SyncQueue;
pub use uninitialized::UninitializedQueue;
pub use untimed::UntimedQueue;
pub use vortex::TimeVortex;

/// A queue a link can hand events to.
pub trait ActivityQueue: Send + fmt::Debug {
    fn insert(&mut self, event: Event);

    fn pop(&mut self) -> Option<Event>;

    fn front(&self) -> Option<&Event>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every queued event in queue order.
    fn drain(&mut self) -> Vec<Event> {
        let mut events = Vec::with_capacity(self.len());
        while let Some(event) = self.pop() {
            events.push(event);
        }
        events
    }
}

pub type SharedQueue = Arc<Mutex<dyn ActivityQueue>>;
