use crate::event::Event;
use crate::queue::ActivityQueue;

/// Outbound buffer for events bound for another partition.
///
/// Filled by links during an epoch and emptied by the thread synchronizer at
/// the next barrier. Timed and untimed traffic are kept apart.
#[derive(Debug, Default)]
pub struct SyncQueue {
    timed: Vec<Event>,
    untimed: Vec<Event>,
}

impl SyncQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_untimed(&mut self, event: Event) {
        self.untimed.push(event);
    }

    pub fn take_timed(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.timed)
    }

    pub fn take_untimed(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.untimed)
    }

    pub fn pending(&self) -> usize {
        self.timed.len() + self.untimed.len()
    }
}

impl ActivityQueue for SyncQueue {
    fn insert(&mut self, event: Event) {
        self.timed.push(event);
    }

    fn pop(&mut self) -> Option<Event> {
        if self.timed.is_empty() {
            None
        } else {
            Some(self.timed.remove(0))
        }
    }

    fn front(&self) -> Option<&Event> {
        self.timed.first()
    }

    fn len(&self) -> usize {
        self.timed.len()
    }
}
