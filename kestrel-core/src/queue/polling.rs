use std::collections::BTreeMap;

use crate::event::Event;
use crate::queue::ActivityQueue;
use crate::time::SimTime;

/// Receive queue of a polling link: delivery time order, FIFO among equals.
#[derive(Debug, Default)]
pub struct PollingLinkQueue {
    events: BTreeMap<(SimTime, u64), Event>,
    next_seq: u64,
}

impl PollingLinkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Front event if it is due at `now`.
    pub fn pop_due(&mut self, now: SimTime) -> Option<Event> {
        let due = self
            .events
            .first_key_value()
            .is_some_and(|(&(time, _), _)| time <= now);
        if due {
            self.pop()
        } else {
            None
        }
    }

    pub(crate) fn events_mut(&mut self) -> impl Iterator<Item = &mut Event> {
        self.events.values_mut()
    }
}

impl ActivityQueue for PollingLinkQueue {
    fn insert(&mut self, event: Event) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.events.insert((event.delivery_time(), seq), event);
    }

    fn pop(&mut self) -> Option<Event> {
        self.events.pop_first().map(|(_, event)| event)
    }

    fn front(&self) -> Option<&Event> {
        self.events.values().next()
    }

    fn len(&self) -> usize {
        self.events.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(time: SimTime, priority: i32) -> Event {
        let mut event = Event::default().with_priority(priority);
        event.set_delivery_time(time);
        event
    }

    #[test]
    fn equal_times_come_out_in_insertion_order() {
        let mut queue = PollingLinkQueue::new();
        queue.insert(at(5, 1));
        queue.insert(at(5, 2));
        queue.insert(at(3, 3));
        let order: Vec<i32> = queue.drain().iter().map(Event::priority).collect();
        assert_eq!(order, vec![3, 1, 2]);
    }

    #[test]
    fn nothing_is_due_before_its_time() {
        let mut queue = PollingLinkQueue::new();
        queue.insert(at(10, 0));
        assert!(queue.pop_due(9).is_none());
        assert_eq!(queue.pop_due(10).unwrap().delivery_time(), 10);
        assert!(queue.pop_due(u64::MAX).is_none());
    }
}
