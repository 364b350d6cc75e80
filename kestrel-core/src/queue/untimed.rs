use std::collections::VecDeque;

use crate::event::Event;
use crate::queue::ActivityQueue;

/// FIFO of events exchanged during init and complete phases.
///
/// The delivery time of an untimed event is the phase in which it becomes
/// receivable rather than a simulated time.
#[derive(Debug, Default)]
pub struct UntimedQueue {
    events: VecDeque<Event>,
}

impl UntimedQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next event receivable in `phase`, if any.
    pub fn pop_ready(&mut self, phase: u64) -> Option<Event> {
        if self.events.front()?.delivery_time() <= phase {
            self.events.pop_front()
        } else {
            None
        }
    }

    pub fn clear(&mut self) -> usize {
        let discarded = self.events.len();
        self.events.clear();
        discarded
    }
}

impl ActivityQueue for UntimedQueue {
    fn insert(&mut self, event: Event) {
        self.events.push_back(event);
    }

    fn pop(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    fn front(&self) -> Option<&Event> {
        self.events.front()
    }

    fn len(&self) -> usize {
        self.events.len()
    }
}
