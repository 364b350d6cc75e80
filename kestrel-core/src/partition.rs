//! ## kestrel-core::partition
//! **One thread's share of the simulation**
//!
//! A partition owns a clock, a time vortex, the handlers of its links and
//! the components driving them. Its lifecycle is:
//! 1. configuration: links are created and configured, untimed init phases run
//! 2. `finalize_links`: every link enters `Run` and picks its send queue
//! 3. `run_until`: events are popped from the vortex and delivered
//! 4. `prepare_for_complete`: untimed complete phases, then `finish`

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use kestrel_telemetry::MetricsRecorder;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::context::{PartitionId, SimContext};
use crate::error::{CoreError, CoreResult};
use crate::event::{DeliveryTarget, Event, LinkId};
use crate::link::Link;
use crate::queue::{ActivityQueue, SyncQueue, TimeVortex};
use crate::time::{SimTime, TimeConverter, TimeLord, VirtualClock};

/// Lifecycle callbacks of a simulated component.
pub trait Component: Send {
    /// Untimed init phase `phase`; may send and receive untimed data.
    fn init(&mut self, _phase: u64) {}

    /// Called once after links are finalized, before the first event.
    fn setup(&mut self) {}

    /// Untimed complete phase `phase`.
    fn complete(&mut self, _phase: u64) {}

    /// Called once at the very end.
    fn finish(&mut self) {}
}

#[derive(Debug, Clone)]
pub struct PartitionOptions {
    pub id: PartitionId,
    pub core_time_base: String,
    pub enforce_link_order: bool,
    pub metrics: Option<MetricsRecorder>,
}

impl Default for PartitionOptions {
    fn default() -> Self {
        Self {
            id: 0,
            core_time_base: "1ps".to_owned(),
            enforce_link_order: true,
            metrics: None,
        }
    }
}

/// Both endpoints of a connection.
#[derive(Debug, Clone)]
pub struct LinkPair {
    pub left: Link,
    pub right: Link,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub init_phases: u64,
    pub delivered: u64,
    pub complete_phases: u64,
    pub end_time: SimTime,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum UntimedStage {
    Init,
    Complete,
}

pub struct Partition {
    ctx: Arc<SimContext>,
    links: Vec<Link>,
    by_tag: HashMap<LinkId, usize>,
    /// Local stand-ins for remote endpoints, keyed by the tag inbound events carry.
    proxies: HashMap<LinkId, Link>,
    /// Local endpoints sending to another partition, and that partition.
    sync_routes: Vec<(LinkId, PartitionId)>,
    outgoing: BTreeMap<PartitionId, Arc<Mutex<SyncQueue>>>,
    components: Vec<Box<dyn Component>>,
    delivered: u64,
}

impl Partition {
    pub fn new(options: PartitionOptions) -> CoreResult<Self> {
        let time_lord = Arc::new(TimeLord::new(&options.core_time_base)?);
        info!(
            partition = options.id,
            core_time_base = %options.core_time_base,
            "partition created"
        );
        Ok(Self {
            ctx: Arc::new(SimContext::new(
                options.id,
                time_lord,
                options.enforce_link_order,
                options.metrics,
            )),
            links: Vec::new(),
            by_tag: HashMap::new(),
            proxies: HashMap::new(),
            sync_routes: Vec::new(),
            outgoing: BTreeMap::new(),
            components: Vec::new(),
            delivered: 0,
        })
    }

    pub fn id(&self) -> PartitionId {
        self.ctx.partition
    }

    pub fn now(&self) -> SimTime {
        self.ctx.clock.now()
    }

    pub fn clock(&self) -> VirtualClock {
        self.ctx.clock.clone()
    }

    pub fn core_time_base(&self) -> &str {
        self.ctx.time_lord.core_base()
    }

    pub fn get_time_converter(&self, base: &str) -> CoreResult<TimeConverter> {
        Ok(self.ctx.time_lord.get_time_converter(base)?)
    }

    pub fn metrics(&self) -> Option<&MetricsRecorder> {
        self.ctx.metrics.as_ref()
    }

    pub(crate) fn context(&self) -> &Arc<SimContext> {
        &self.ctx
    }

    pub(crate) fn vortex(&self) -> &Arc<Mutex<TimeVortex>> {
        &self.ctx.vortex
    }

    /// Links in registration order, stand-ins for remote endpoints included.
    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn link(&self, tag: LinkId) -> Option<&Link> {
        self.by_tag.get(&tag).map(|&index| &self.links[index])
    }

    pub(crate) fn new_link(&mut self, tag: LinkId, name: String) -> CoreResult<Link> {
        if self.by_tag.contains_key(&tag) {
            return Err(CoreError::DuplicateLink(tag));
        }
        let link = Link::new(Arc::clone(&self.ctx), tag, name);
        self.by_tag.insert(tag, self.links.len());
        self.links.push(link.clone());
        Ok(link)
    }

    /// Creates two connected endpoints tagged `left_tag` and `right_tag`.
    pub fn link_pair(&mut self, left_tag: LinkId, right_tag: LinkId) -> CoreResult<LinkPair> {
        if left_tag == right_tag {
            return Err(CoreError::DuplicateLink(right_tag));
        }
        let left = self.new_link(left_tag, format!("link-{left_tag}"))?;
        let right = self.new_link(right_tag, format!("link-{right_tag}"))?;
        Link::connect(&left, &right);
        debug!(left_tag, right_tag, "link pair created");
        Ok(LinkPair { left, right })
    }

    /// Creates a link whose pair is itself: a component's way of scheduling
    /// events to itself.
    pub fn self_link(&mut self, tag: LinkId) -> CoreResult<Link> {
        let link = self.new_link(tag, format!("self-{tag}"))?;
        Link::connect_to_self(&link);
        Ok(link)
    }

    pub(crate) fn register_proxy(&mut self, remote_tag: LinkId, proxy: Link) {
        self.proxies.insert(remote_tag, proxy);
    }

    pub(crate) fn register_sync_route(&mut self, tag: LinkId, peer: PartitionId) {
        self.sync_routes.push((tag, peer));
    }

    pub(crate) fn outgoing_queue(&mut self, peer: PartitionId) -> Arc<Mutex<SyncQueue>> {
        Arc::clone(
            self.outgoing
                .entry(peer)
                .or_insert_with(|| Arc::new(Mutex::new(SyncQueue::new()))),
        )
    }

    pub fn add_component<C: Component + 'static>(&mut self, component: C) {
        self.components.push(Box::new(component));
    }

    /// Runs one untimed phase on every component and returns how many
    /// untimed events were sent during it.
    pub(crate) fn untimed_phase(&mut self, stage: UntimedStage, phase: u64) -> u64 {
        self.ctx.set_untimed_phase(phase);
        for component in &mut self.components {
            match stage {
                UntimedStage::Init => component.init(phase),
                UntimedStage::Complete => component.complete(phase),
            }
        }
        let sent = self.ctx.take_untimed_count();
        debug!(partition = self.id(), ?stage, phase, sent, "untimed phase finished");
        sent
    }

    fn run_untimed(&mut self, stage: UntimedStage) -> u64 {
        let mut phase = 0;
        loop {
            let sent = self.untimed_phase(stage, phase);
            phase += 1;
            if sent == 0 {
                return phase;
            }
        }
    }

    /// Runs init phases until one passes without untimed traffic. Returns
    /// the number of phases run.
    pub fn run_untimed_phases(&mut self) -> u64 {
        self.run_untimed(UntimedStage::Init)
    }

    /// Moves every link into `Run` and calls `setup` on every component.
    pub fn finalize_links(&mut self) {
        for link in &self.links {
            link.finalize_configuration();
        }
        for component in &mut self.components {
            component.setup();
        }
        info!(
            partition = self.id(),
            links = self.links.len(),
            "link configuration finalized"
        );
    }

    /// Moves every link into `Run` without calling `setup`: a restored
    /// checkpoint already holds whatever setup sent.
    pub(crate) fn finalize_links_for_restart(&mut self) {
        for link in &self.links {
            link.finalize_configuration();
        }
        debug!(partition = self.id(), "links finalized for restart");
    }

    /// Delivers every event due at or before `end`, then moves the clock to
    /// `end`. Returns the number of events delivered.
    pub fn run_until(&mut self, end: SimTime) -> u64 {
        let delivered = self.deliver_while(|time| time <= end);
        self.ctx.clock.set(end);
        if let Some(metrics) = &self.ctx.metrics {
            metrics.set_sim_time(self.now());
        }
        delivered
    }

    /// Delivers every event due strictly before `limit`.
    pub(crate) fn run_before(&mut self, limit: SimTime) -> u64 {
        self.deliver_while(|time| time < limit)
    }

    fn deliver_while(&mut self, due: impl Fn(SimTime) -> bool) -> u64 {
        let mut delivered = 0;
        loop {
            let next = {
                let mut vortex = self.ctx.vortex.lock();
                let ready = vortex.front().is_some_and(|ev| due(ev.delivery_time()));
                if ready {
                    vortex.pop()
                } else {
                    None
                }
            };
            let Some(event) = next else {
                break;
            };
            self.ctx.clock.set(event.delivery_time());
            self.deliver(event);
            delivered += 1;
        }
        self.delivered += delivered;
        delivered
    }

    fn deliver(&self, event: Event) {
        let id = match event.delivery() {
            DeliveryTarget::Handler(id) => id,
            other => panic!(
                "event from link {} reached the time vortex with delivery target {other:?}",
                event.order_tag()
            ),
        };

        let handler = self.ctx.handlers.lock().checkout(id);
        match handler {
            Some(mut handler) => {
                handler.handle(event);
                self.ctx.handlers.lock().checkin(id, handler);
                if let Some(metrics) = &self.ctx.metrics {
                    metrics.inc_delivered();
                }
            }
            None => warn!(
                partition = self.id(),
                handler = ?id,
                "event dropped: handler is not installed"
            ),
        }
    }

    /// Leaves `Run`: links switch to untimed traffic for the complete phases.
    pub fn prepare_for_complete(&mut self) {
        for link in &self.links {
            link.prepare_for_complete();
        }
    }

    /// Runs complete phases until one passes without untimed traffic.
    pub fn run_complete_phases(&mut self) -> u64 {
        self.run_untimed(UntimedStage::Complete)
    }

    pub fn finish(&mut self) {
        for component in &mut self.components {
            component.finish();
        }
        info!(
            partition = self.id(),
            delivered = self.delivered,
            now = self.now(),
            "partition finished"
        );
    }

    /// Runs the whole lifecycle of a single partition up to `end`.
    pub fn run(&mut self, end: SimTime) -> RunSummary {
        let init_phases = self.run_untimed_phases();
        self.finalize_links();
        let delivered = self.run_until(end);
        self.prepare_for_complete();
        let complete_phases = self.run_complete_phases();
        self.finish();
        RunSummary {
            init_phases,
            delivered,
            complete_phases,
            end_time: self.now(),
        }
    }

    /// Finishes a run restored from a checkpoint: no init phases, no setup.
    pub fn resume(&mut self, end: SimTime) -> RunSummary {
        let delivered = self.run_until(end);
        self.prepare_for_complete();
        let complete_phases = self.run_complete_phases();
        self.finish();
        RunSummary {
            init_phases: 0,
            delivered,
            complete_phases,
            end_time: self.now(),
        }
    }

    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    /// Events waiting in the time vortex.
    pub fn pending_events(&self) -> usize {
        self.ctx.vortex.lock().len()
    }

    /// Events buffered for other partitions and not yet exchanged.
    pub fn pending_sync_events(&self) -> usize {
        self.outgoing.values().map(|queue| queue.lock().pending()).sum()
    }

    /// Endpoints in this partition that send to another partition, with the
    /// peer each one sends to.
    pub(crate) fn sync_routes(&self) -> impl Iterator<Item = (&Link, PartitionId)> + '_ {
        self.sync_routes
            .iter()
            .filter_map(|&(tag, peer)| self.link(tag).map(|link| (link, peer)))
    }

    /// Extra latency added on arrival of events sent by remote link `sender`,
    /// or `None` when the local endpoint they would reach cannot receive.
    pub(crate) fn inbound_latency(&self, sender: LinkId) -> Option<SimTime> {
        let proxy = self.proxies.get(&sender)?;
        proxy.pair_is_configured().then(|| proxy.latency())
    }

    pub(crate) fn peers(&self) -> impl Iterator<Item = PartitionId> + '_ {
        self.outgoing.keys().copied()
    }

    pub(crate) fn take_outgoing(&self, peer: PartitionId) -> (Vec<Event>, Vec<Event>) {
        match self.outgoing.get(&peer) {
            Some(queue) => {
                let mut queue = queue.lock();
                (queue.take_timed(), queue.take_untimed())
            }
            None => (Vec::new(), Vec::new()),
        }
    }

    /// Hands events that arrived from another partition to their local
    /// stand-in links.
    pub(crate) fn inject(&mut self, timed: Vec<Event>, untimed: Vec<Event>) -> CoreResult<()> {
        for event in timed {
            self.proxy_for(&event)?.inject_remote(event);
        }
        for event in untimed {
            self.proxy_for(&event)?.inject_remote_untimed(event);
        }
        Ok(())
    }

    fn proxy_for(&self, event: &Event) -> CoreResult<&Link> {
        match event.delivery() {
            DeliveryTarget::Remote(tag) => self.proxies.get(&tag).ok_or(CoreError::UnknownLink(tag)),
            other => Err(CoreError::Sync(format!(
                "inbound event from link {} has local delivery target {other:?}",
                event.order_tag()
            ))),
        }
    }
}

impl Drop for Partition {
    fn drop(&mut self) {
        // handlers hold links, links hold the context, the context holds handlers
        let handlers = self.ctx.handlers.lock().clear();
        drop(handlers);
    }
}

impl fmt::Debug for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Partition")
            .field("id", &self.id())
            .field("now", &self.now())
            .field("links", &self.links.len())
            .field("components", &self.components.len())
            .field("pending_events", &self.pending_events())
            .finish()
    }
}
