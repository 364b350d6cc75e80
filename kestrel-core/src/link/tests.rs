use std::sync::Arc;

use kestrel_serialization::{SerResult, Serializable, Serializer};
use parking_lot::Mutex;
use tracing_test::traced_test;

use super::*;
use crate::partition::{Partition, PartitionOptions};

#[derive(Debug, Default)]
struct Ping(u32);

impl Serializable for Ping {
    fn type_name(&self) -> &'static str {
        "test.Ping"
    }

    fn serialize_order(&mut self, ser: &mut Serializer) -> SerResult<()> {
        ser.field("seq", &mut self.0)
    }
}

fn partition(core: &str) -> Partition {
    Partition::new(PartitionOptions {
        core_time_base: core.into(),
        ..PartitionOptions::default()
    })
    .unwrap()
}

fn recorder() -> (Arc<Mutex<Vec<(SimTime, u32)>>>, impl FnMut(Event) + Send + 'static) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    let handler = move |ev: Event| {
        let seq = ev.payload_as::<Ping>().map_or(u32::MAX, |p| p.0);
        sink.lock().push((ev.delivery_time(), seq));
    };
    (log, handler)
}

#[test]
fn handler_fires_once_after_latency() {
    let mut p = partition("1ns");
    let pair = p.link_pair(1, 2).unwrap();
    pair.left.add_send_latency(10, "1ns").unwrap();
    let (log, handler) = recorder();
    pair.right.set_functor(handler);
    p.finalize_links();

    p.run_until(100);
    pair.left.send_now(Event::new(Ping(1)));
    p.run_until(200);

    assert_eq!(*log.lock(), vec![(110, 1)]);
    assert_eq!(p.delivered(), 1);
}

#[test]
fn send_with_converts_the_delay() {
    let mut p = partition("1ps");
    let pair = p.link_pair(1, 2).unwrap();
    pair.left.add_send_latency(1, "1ns").unwrap();
    pair.left.set_default_time_base(p.get_time_converter("2ns").unwrap());
    let (log, handler) = recorder();
    pair.right.set_functor(handler);
    p.finalize_links();

    let ghz = p.get_time_converter("1GHz").unwrap();
    pair.left.send_with(3, &ghz, Event::new(Ping(1)));
    pair.left.send(3, Event::new(Ping(2)));
    p.run_until(10_000);

    assert_eq!(*log.lock(), vec![(4_000, 1), (7_000, 2)]);
}

#[test]
fn polling_link_returns_events_in_order_once_due() {
    let mut p = partition("1ns");
    let pair = p.link_pair(1, 2).unwrap();
    pair.right.set_polling();
    pair.left.add_send_latency(5, "1ns").unwrap();
    p.finalize_links();

    for seq in 0..3 {
        pair.left.send_now(Event::new(Ping(seq)));
    }
    assert!(pair.right.recv().is_none(), "nothing is due before the latency");

    p.run_until(5);
    let got: Vec<u32> = std::iter::from_fn(|| pair.right.recv())
        .map(|ev| ev.payload_as::<Ping>().unwrap().0)
        .collect();
    assert_eq!(got, vec![0, 1, 2]);
    assert!(pair.right.recv().is_none());
}

struct Veto {
    kept: Vec<Event>,
    seen: Vec<AttachKey>,
}

impl AttachPoint for Veto {
    fn register_link_attach_tool(&mut self, metadata: &AttachPointMetaData) -> AttachKey {
        metadata.link_tag * 100
    }

    fn event_sent(&mut self, key: AttachKey, event: &mut Option<Event>) {
        self.seen.push(key);
        if let Some(event) = event.take() {
            self.kept.push(event);
        }
    }
}

struct Counter {
    hits: u32,
}

impl AttachPoint for Counter {
    fn register_link_attach_tool(&mut self, _metadata: &AttachPointMetaData) -> AttachKey {
        7
    }

    fn event_sent(&mut self, _key: AttachKey, _event: &mut Option<Event>) {
        self.hits += 1;
    }
}

#[test]
fn attach_point_can_veto_delivery() {
    let mut p = partition("1ns");
    let pair = p.link_pair(3, 4).unwrap();
    let (log, handler) = recorder();
    pair.right.set_functor(handler);

    let veto = Arc::new(Mutex::new(Veto {
        kept: Vec::new(),
        seen: Vec::new(),
    }));
    let tool: SharedAttachPoint = veto.clone();
    let key = pair.left.attach_tool(tool, &pair.left.attach_metadata());
    assert_eq!(key, 300);
    p.finalize_links();

    pair.left.send_now(Event::new(Ping(9)));
    p.run_until(50);

    assert!(log.lock().is_empty());
    let veto = veto.lock();
    assert_eq!(veto.seen, vec![300]);
    assert_eq!(veto.kept.len(), 1);
    assert_eq!(veto.kept[0].payload_as::<Ping>().unwrap().0, 9);
    assert_eq!(veto.kept[0].order_tag(), 3);
}

#[test]
fn tools_run_in_attach_order_and_stop_at_a_veto() {
    let mut p = partition("1ns");
    let pair = p.link_pair(1, 2).unwrap();
    pair.right.set_functor(|_ev: Event| {});

    let counter = Arc::new(Mutex::new(Counter { hits: 0 }));
    let veto = Arc::new(Mutex::new(Veto {
        kept: Vec::new(),
        seen: Vec::new(),
    }));
    let counter_tool: SharedAttachPoint = counter.clone();
    let veto_tool: SharedAttachPoint = veto.clone();
    let late_tool: SharedAttachPoint = Arc::new(Mutex::new(Counter { hits: 0 }));
    let meta = pair.left.attach_metadata();
    pair.left.attach_tool(counter_tool.clone(), &meta);
    pair.left.attach_tool(veto_tool.clone(), &meta);
    pair.left.attach_tool(late_tool, &meta);
    p.finalize_links();

    pair.left.send_now(Event::new(Ping(1)));
    assert_eq!(counter.lock().hits, 1);
    assert_eq!(veto.lock().kept.len(), 1);

    assert!(pair.left.detach_tool(&veto_tool));
    assert!(!pair.left.detach_tool(&veto_tool));
    pair.left.send_now(Event::new(Ping(2)));
    assert_eq!(p.run_until(1), 1);
    assert_eq!(counter.lock().hits, 2);
}

#[test]
#[should_panic(expected = "only polling links can be received from")]
fn recv_on_a_handler_link_panics() {
    let mut p = partition("1ns");
    let pair = p.link_pair(1, 2).unwrap();
    pair.right.set_functor(|_ev: Event| {});
    p.finalize_links();
    pair.right.recv();
}

#[test]
#[should_panic(expected = "cannot install a handler on polling link")]
fn handler_on_a_polling_link_panics() {
    let mut p = partition("1ns");
    let pair = p.link_pair(1, 2).unwrap();
    pair.right.set_polling();
    pair.right.set_functor(|_ev: Event| {});
}

#[test]
#[should_panic(expected = "cannot send untimed data in Run mode")]
fn untimed_data_in_run_mode_panics() {
    let mut p = partition("1ns");
    let pair = p.link_pair(1, 2).unwrap();
    p.finalize_links();
    pair.left.send_untimed_data(Event::new(Ping(0)));
}

#[test]
#[should_panic(expected = "cannot send timed events in Init mode")]
fn timed_send_during_init_panics() {
    let mut p = partition("1ns");
    let pair = p.link_pair(1, 2).unwrap();
    pair.right.set_functor(|_ev: Event| {});
    pair.left.send_now(Event::new(Ping(0)));
}

#[test]
#[should_panic(expected = "has neither a handler nor polling configured")]
fn sending_to_an_unconfigured_pair_panics() {
    let mut p = partition("1ns");
    let pair = p.link_pair(1, 2).unwrap();
    p.finalize_links();
    pair.left.send_now(Event::new(Ping(0)));
}

#[test]
#[should_panic(expected = "can only change during configuration")]
fn latency_is_fixed_once_running() {
    let mut p = partition("1ns");
    let pair = p.link_pair(1, 2).unwrap();
    p.finalize_links();
    pair.left.add_send_latency_tc(1, &TimeConverter::CORE);
}

#[test]
fn recv_latency_lands_on_the_sending_side() {
    let mut p = partition("1ns");
    let pair = p.link_pair(1, 2).unwrap();
    pair.right.add_recv_latency(4, "1ns").unwrap();
    pair.left.add_send_latency(1, "1ns").unwrap();
    assert_eq!(pair.left.latency(), 5);
    assert_eq!(pair.right.latency(), 0);
    assert!(pair.left.add_send_latency(1, "1ps").is_err());
}

#[test]
fn untimed_data_is_receivable_in_the_next_phase() {
    let mut p = partition("1ns");
    let pair = p.link_pair(1, 2).unwrap();
    let ctx = Arc::clone(p.context());

    ctx.set_untimed_phase(0);
    pair.left.send_untimed_data(Event::new(Ping(1)));
    assert!(pair.right.recv_untimed_data().is_none());
    assert!(pair.left.recv_untimed_data().is_none());
    assert_eq!(ctx.take_untimed_count(), 1);

    ctx.set_untimed_phase(1);
    let ev = pair.right.recv_untimed_data().unwrap();
    assert_eq!(ev.delivery_time(), 1);
    assert_eq!(ev.order_tag(), 1);
    assert!(pair.right.recv_untimed_data().is_none());
}

#[test]
#[traced_test]
fn replacing_a_handler_keeps_its_slot() {
    let mut p = partition("1ns");
    let pair = p.link_pair(1, 2).unwrap();
    let (first_log, first) = recorder();
    let (second_log, second) = recorder();
    pair.right.set_functor(first);
    let id = pair.right.functor().unwrap();
    pair.right.replace_functor(second);
    assert_eq!(pair.right.functor(), Some(id));
    assert!(!logs_contain("replaced an installed handler"));

    let (third_log, third) = recorder();
    pair.right.set_functor(third);
    assert!(logs_contain("set_functor replaced an installed handler"));
    p.finalize_links();

    pair.left.send_now(Event::new(Ping(5)));
    p.run_until(0);
    assert!(first_log.lock().is_empty());
    assert!(second_log.lock().is_empty());
    assert_eq!(*third_log.lock(), vec![(0, 5)]);
}

#[test]
fn a_handler_can_replace_itself_mid_delivery() {
    let mut p = partition("1ns");
    let pair = p.link_pair(1, 2).unwrap();
    let (log, replacement) = recorder();
    let receiver = pair.right.clone();
    let mut replacement = Some(replacement);
    pair.right.set_functor(move |_ev: Event| {
        if let Some(next) = replacement.take() {
            receiver.replace_functor(next);
        }
    });
    p.finalize_links();

    pair.left.send_now(Event::new(Ping(1)));
    pair.left.send_now(Event::new(Ping(2)));
    p.run_until(0);
    assert_eq!(*log.lock(), vec![(0, 2)]);
}

#[test]
fn link_metadata_and_modes() {
    let mut p = partition("1ns");
    let pair = p.link_pair(11, 12).unwrap();
    assert_eq!(pair.left.name(), "link-11");
    assert_eq!(pair.left.mode(), LinkMode::Init);
    assert!(!pair.left.is_configured());
    pair.left.set_polling();
    assert_eq!(pair.left.link_type(), LinkType::Poll);
    assert!(pair.left.is_configured());

    p.finalize_links();
    assert_eq!(pair.right.mode(), LinkMode::Run);
    p.prepare_for_complete();
    assert_eq!(pair.right.mode(), LinkMode::Complete);
    let meta = pair.right.attach_metadata();
    assert_eq!(meta.link_tag, 12);
    assert_eq!(meta.link_name, "link-12");
}
