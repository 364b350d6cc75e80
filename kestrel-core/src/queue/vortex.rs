use std::collections::BTreeMap;

use crate::event::{DeliveryTarget, Event, LinkId};
use crate::queue::ActivityQueue;
use crate::time::SimTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct VortexKey {
    time: SimTime,
    priority: i32,
    tag: LinkId,
    order: u64,
}

/// The partition's main event queue.
///
/// Ordered by delivery time, then priority, then (when link order is
/// enforced) the tag of the sending link, then insertion order. With link
/// order enforced, simultaneous events come out the same way no matter which
/// thread produced them first.
#[derive(Debug)]
pub struct TimeVortex {
    events: BTreeMap<VortexKey, Event>,
    next_order: u64,
    enforce_link_order: bool,
    max_depth: usize,
}

impl TimeVortex {
    pub fn new(enforce_link_order: bool) -> Self {
        Self {
            events: BTreeMap::new(),
            next_order: 0,
            enforce_link_order,
            max_depth: 0,
        }
    }

    fn key(&self, event: &Event) -> VortexKey {
        VortexKey {
            time: event.delivery_time(),
            priority: event.priority(),
            tag: if self.enforce_link_order {
                event.order_tag()
            } else {
                0
            },
            order: event.queue_order(),
        }
    }

    fn push(&mut self, event: Event) {
        let key = self.key(&event);
        self.events.insert(key, event);
        self.max_depth = self.max_depth.max(self.events.len());
    }

    /// Re-inserts a checkpointed event, keeping its original insertion order.
    pub(crate) fn restore(&mut self, event: Event) {
        self.next_order = self.next_order.max(event.queue_order() + 1);
        self.push(event);
    }

    /// Events that will be delivered to `target`, in queue order.
    pub(crate) fn events_for_mut(
        &mut self,
        target: DeliveryTarget,
    ) -> impl Iterator<Item = &mut Event> {
        self.events
            .values_mut()
            .filter(move |event| event.delivery() == target)
    }

    pub(crate) fn count_for(&self, target: DeliveryTarget) -> usize {
        self.events
            .values()
            .filter(|event| event.delivery() == target)
            .count()
    }

    /// Largest number of events held at once.
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }
}

impl ActivityQueue for TimeVortex {
    fn insert(&mut self, mut event: Event) {
        event.set_queue_order(self.next_order);
        self.next_order += 1;
        self.push(event);
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
    use crate::event::HandlerId;

    fn event(time: SimTime, priority: i32, tag: LinkId) -> Event {
        let mut event = Event::default().with_priority(priority);
        event.set_delivery_time(time);
        event.set_delivery_info(tag, DeliveryTarget::Handler(HandlerId(tag as usize)));
        event
    }

    fn tags(vortex: &mut TimeVortex) -> Vec<LinkId> {
        vortex.drain().iter().map(Event::order_tag).collect()
    }

    #[test]
    fn time_then_priority() {
        let mut vortex = TimeVortex::new(true);
        vortex.insert(event(20, 50, 1));
        vortex.insert(event(10, 50, 2));
        vortex.insert(event(10, 10, 3));
        assert_eq!(tags(&mut vortex), vec![3, 2, 1]);
    }

    #[test]
    fn simultaneous_events_break_ties_by_link_tag() {
        let mut vortex = TimeVortex::new(true);
        vortex.insert(event(10, 50, 9));
        vortex.insert(event(10, 50, 4));
        vortex.insert(event(10, 50, 6));
        assert_eq!(tags(&mut vortex), vec![4, 6, 9]);
    }

    #[test]
    fn without_enforcement_ties_keep_insertion_order() {
        let mut vortex = TimeVortex::new(false);
        vortex.insert(event(10, 50, 9));
        vortex.insert(event(10, 50, 4));
        assert_eq!(tags(&mut vortex), vec![9, 4]);
    }

    #[test]
    fn restored_events_keep_their_order_and_later_inserts_follow() {
        let mut vortex = TimeVortex::new(false);
        let mut restored = event(10, 50, 1);
        restored.set_queue_order(41);
        vortex.restore(restored);
        vortex.insert(event(10, 50, 2));
        assert_eq!(vortex.front().unwrap().queue_order(), 41);
        assert_eq!(tags(&mut vortex), vec![1, 2]);
    }

    #[test]
    fn events_can_be_selected_by_target() {
        let mut vortex = TimeVortex::new(true);
        vortex.insert(event(1, 50, 1));
        vortex.insert(event(2, 50, 2));
        vortex.insert(event(3, 50, 1));
        let target = DeliveryTarget::Handler(HandlerId(1));
        assert_eq!(vortex.count_for(target), 2);
        let times: Vec<SimTime> = vortex
            .events_for_mut(target)
            .map(|e| e.delivery_time())
            .collect();
        assert_eq!(times, vec![1, 3]);
        assert_eq!(vortex.max_depth(), 3);
    }
}
