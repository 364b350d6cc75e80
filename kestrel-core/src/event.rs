//! Events, delivery targets and the per-partition handler table.

use std::any::Any;
use std::fmt;

use kestrel_serialization::{SerResult, Serializable, Serializer, Visit};

use crate::time::SimTime;

/// Identifying tag of a link; also the tie-break key for simultaneous events.
pub type LinkId = u64;

/// Default priority of events sent over links.
pub const EVENT_PRIORITY: i32 = 50;

/// Index of a handler in its partition's [`HandlerTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(pub(crate) usize);

/// Where an event goes once it reaches the front of its queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DeliveryTarget {
    #[default]
    Unset,
    /// A handler in the receiving partition.
    Handler(HandlerId),
    /// The link with this tag in another partition.
    Remote(LinkId),
}

/// Optional tracking metadata describing who sent an event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventOrigin {
    pub component: String,
    pub port: String,
    pub type_name: String,
}

impl Visit for EventOrigin {
    fn visit(&mut self, ser: &mut Serializer) -> SerResult<()> {
        ser.field("component", &mut self.component)?;
        ser.field("port", &mut self.port)?;
        ser.field("type_name", &mut self.type_name)
    }
}

/// A payload in flight between two link endpoints.
///
/// The delivery target is stamped by the sending link and is never persisted;
/// a restored event takes the target of the link it was in flight on.
pub struct Event {
    delivery_time: SimTime,
    priority: i32,
    order_tag: LinkId,
    queue_order: u64,
    delivery: DeliveryTarget,
    payload: Box<dyn Serializable>,
    origin: Option<EventOrigin>,
}

impl Event {
    pub fn new<P: Serializable + 'static>(payload: P) -> Self {
        Self::from_boxed(Box::new(payload))
    }

    pub fn from_boxed(payload: Box<dyn Serializable>) -> Self {
        Self {
            delivery_time: 0,
            priority: EVENT_PRIORITY,
            order_tag: 0,
            queue_order: 0,
            delivery: DeliveryTarget::Unset,
            payload,
            origin: None,
        }
    }

    pub fn with_origin(mut self, origin: EventOrigin) -> Self {
        self.origin = Some(origin);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn delivery_time(&self) -> SimTime {
        self.delivery_time
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Tag of the link this event was sent on.
    pub fn order_tag(&self) -> LinkId {
        self.order_tag
    }

    pub fn queue_order(&self) -> u64 {
        self.queue_order
    }

    pub fn delivery(&self) -> DeliveryTarget {
        self.delivery
    }

    pub fn origin(&self) -> Option<&EventOrigin> {
        self.origin.as_ref()
    }

    pub fn payload(&self) -> &dyn Serializable {
        &*self.payload
    }

    pub fn payload_mut(&mut self) -> &mut dyn Serializable {
        &mut *self.payload
    }

    /// Payload downcast to its concrete type.
    pub fn payload_as<T: Any>(&self) -> Option<&T> {
        (*self.payload).as_any().downcast_ref::<T>()
    }

    pub fn payload_as_mut<T: Any>(&mut self) -> Option<&mut T> {
        (*self.payload).as_any_mut().downcast_mut::<T>()
    }

    pub fn into_payload(self) -> Box<dyn Serializable> {
        self.payload
    }

    pub(crate) fn set_delivery_time(&mut self, time: SimTime) {
        self.delivery_time = time;
    }

    pub(crate) fn set_delivery_info(&mut self, order_tag: LinkId, delivery: DeliveryTarget) {
        self.order_tag = order_tag;
        self.delivery = delivery;
    }

    pub(crate) fn set_delivery(&mut self, delivery: DeliveryTarget) {
        self.delivery = delivery;
    }

    pub(crate) fn set_queue_order(&mut self, order: u64) {
        self.queue_order = order;
    }
}

impl Default for Event {
    fn default() -> Self {
        Self::from_boxed(Box::default())
    }
}

impl Visit for Event {
    fn visit(&mut self, ser: &mut Serializer) -> SerResult<()> {
        ser.field("delivery_time", &mut self.delivery_time)?;
        ser.field("priority", &mut self.priority)?;
        ser.field("order_tag", &mut self.order_tag)?;
        ser.field("queue_order", &mut self.queue_order)?;
        ser.field("origin", &mut self.origin)?;
        ser.field("payload", &mut self.payload)
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("delivery_time", &self.delivery_time)
            .field("priority", &self.priority)
            .field("order_tag", &self.order_tag)
            .field("delivery", &self.delivery)
            .field("payload", &self.payload.type_name())
            .finish()
    }
}

/// Callback invoked when an event reaches its receiving link.
pub trait EventHandler: Send {
    fn handle(&mut self, event: Event);
}

impl<F: FnMut(Event) + Send> EventHandler for F {
    fn handle(&mut self, event: Event) {
        self(event)
    }
}

enum Slot {
    Vacant,
    Occupied(Box<dyn EventHandler>),
    /// Lent out for the duration of one delivery.
    CheckedOut,
}

/// Slab of installed handlers, indexed by [`HandlerId`].
///
/// A handler is checked out while it runs so it can send on links (and even
/// replace itself) without the table being locked.
#[derive(Default)]
pub(crate) struct HandlerTable {
    slots: Vec<Slot>,
}

impl HandlerTable {
    pub(crate) fn insert(&mut self, handler: Box<dyn EventHandler>) -> HandlerId {
        if let Some(index) = self.slots.iter().position(|s| matches!(s, Slot::Vacant)) {
            self.slots[index] = Slot::Occupied(handler);
            return HandlerId(index);
        }
        self.slots.push(Slot::Occupied(handler));
        HandlerId(self.slots.len() - 1)
    }

    /// Installs `handler` under `id` and returns the one it displaced.
    pub(crate) fn replace(
        &mut self,
        id: HandlerId,
        handler: Box<dyn EventHandler>,
    ) -> Option<Box<dyn EventHandler>> {
        let slot = self.slots.get_mut(id.0)?;
        match std::mem::replace(slot, Slot::Occupied(handler)) {
            Slot::Occupied(previous) => Some(previous),
            Slot::Vacant | Slot::CheckedOut => None,
        }
    }

    pub(crate) fn checkout(&mut self, id: HandlerId) -> Option<Box<dyn EventHandler>> {
        let slot = self.slots.get_mut(id.0)?;
        match std::mem::replace(slot, Slot::CheckedOut) {
            Slot::Occupied(handler) => Some(handler),
            other => {
                *slot = other;
                None
            }
        }
    }

    /// Returns a handler after delivery. If it was replaced while checked
    /// out, the returned handler is dropped.
    pub(crate) fn checkin(&mut self, id: HandlerId, handler: Box<dyn EventHandler>) {
        if let Some(slot) = self.slots.get_mut(id.0) {
            if matches!(slot, Slot::CheckedOut) {
                *slot = Slot::Occupied(handler);
            }
        }
    }

    pub(crate) fn contains(&self, id: HandlerId) -> bool {
        matches!(
            self.slots.get(id.0),
            Some(Slot::Occupied(_) | Slot::CheckedOut)
        )
    }

    pub(crate) fn len(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| !matches!(s, Slot::Vacant))
            .count()
    }

    /// Drops every handler; handlers may own links, which own the context.
    pub(crate) fn clear(&mut self) -> Vec<Box<dyn EventHandler>> {
        std::mem::take(&mut self.slots)
            .into_iter()
            .filter_map(|slot| match slot {
                Slot::Occupied(handler) => Some(handler),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use kestrel_serialization::SerializableRegistry;
    use parking_lot::Mutex;

    use super::*;

    #[derive(Debug, Default, PartialEq)]
    struct Note {
        text: String,
    }

    impl Serializable for Note {
        fn type_name(&self) -> &'static str {
            "test.Note"
        }

        fn serialize_order(&mut self, ser: &mut Serializer) -> SerResult<()> {
            ser.field("text", &mut self.text)
        }
    }

    #[test]
    fn payload_downcasts_to_its_type() {
        let mut event = Event::new(Note { text: "hi".into() });
        assert_eq!(event.payload_as::<Note>().unwrap().text, "hi");
        assert!(event.payload_as::<u32>().is_none());
        event.payload_as_mut::<Note>().unwrap().text.push('!');
        assert_eq!(event.payload().type_name(), "test.Note");
        assert_eq!(event.payload_as::<Note>().unwrap().text, "hi!");
    }

    #[test]
    fn delivery_target_is_not_persisted() {
        let registry = Arc::new(SerializableRegistry::new());
        registry.register::<Note>();

        let mut event = Event::new(Note { text: "x".into() }).with_origin(EventOrigin {
            component: "cpu0".into(),
            port: "mem".into(),
            type_name: "Note".into(),
        });
        event.set_delivery_time(42);
        event.set_delivery_info(7, DeliveryTarget::Handler(HandlerId(3)));

        let mut ser = Serializer::new(registry);
        ser.start_sizing();
        ser.visit(&mut event).unwrap();
        ser.start_packing(ser.size());
        ser.visit(&mut event).unwrap();
        let bytes = ser.finish_packing().unwrap();

        let mut restored = Event::default();
        ser.start_unpacking(bytes);
        ser.visit(&mut restored).unwrap();
        assert_eq!(restored.delivery_time(), 42);
        assert_eq!(restored.order_tag(), 7);
        assert_eq!(restored.delivery(), DeliveryTarget::Unset);
        assert_eq!(restored.origin().unwrap().port, "mem");
        assert_eq!(restored.payload_as::<Note>().unwrap().text, "x");
    }

    #[test]
    fn handler_checkout_and_replace() {
        let hits = Arc::new(Mutex::new(Vec::new()));
        let mut table = HandlerTable::default();
        let sink = Arc::clone(&hits);
        let id = table.insert(Box::new(move |ev: Event| sink.lock().push(ev.delivery_time())));
        assert!(table.contains(id));

        let mut handler = table.checkout(id).unwrap();
        assert!(table.checkout(id).is_none(), "a handler is lent out once");
        handler.handle(Event::default());

        // replaced while checked out: the returning handler is discarded
        let replaced = Arc::clone(&hits);
        let previous = table.replace(
            id,
            Box::new(move |_ev: Event| replaced.lock().push(u64::MAX)),
        );
        assert!(previous.is_none());
        table.checkin(id, handler);
        table.checkout(id).unwrap().handle(Event::default());

        assert_eq!(*hits.lock(), vec![0, u64::MAX]);
        assert_eq!(table.len(), 1);
        assert_eq!(table.clear().len(), 0);
    }
}
