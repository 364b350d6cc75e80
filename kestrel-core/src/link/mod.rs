//! ## kestrel-core::link
//! **Endpoints that carry events between components**
//!
//! Links always come in pairs. Sending on one endpoint delivers to its pair:
//! either to a handler installed on the pair (`set_functor`) or into the
//! pair's polling queue (`set_polling`). The handler's target is stored on
//! the *sending* side, so a send never has to look at the receiver.
//!
//! Timed traffic is only allowed in `Run` mode. Init and complete phases use
//! untimed data, which becomes receivable one phase after it was sent.

use std::fmt;
use std::sync::{Arc, Weak};

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

mod attach;

pub use attach::{AttachKey, AttachPoint, AttachPointMetaData, SharedAttachPoint};
pub(crate) use attach::AttachedTool;

use crate::context::SimContext;
use crate::error::CoreResult;
use crate::event::{DeliveryTarget, Event, EventHandler, HandlerId, LinkId};
use crate::queue::{
    ActivityQueue, PollingLinkQueue, SharedQueue, SyncQueue, UninitializedQueue, UntimedQueue,
};
use crate::time::{SimTime, TimeConverter};

/// How a link receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkType {
    /// Events are pulled with [`Link::recv`].
    Poll,
    /// Events are pushed to an installed handler.
    Handler,
    /// Stand-in for an endpoint that lives in another partition.
    Sync,
    /// Nothing configured yet.
    Uninitialized,
}

impl LinkType {
    pub(crate) fn code(self) -> u8 {
        match self {
            LinkType::Poll => 0,
            LinkType::Handler => 1,
            LinkType::Sync => 2,
            LinkType::Uninitialized => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkMode {
    Init,
    Run,
    Complete,
}

struct LinkState {
    name: String,
    kind: LinkType,
    mode: LinkMode,
    /// Target stamped on events sent from this side.
    delivery: DeliveryTarget,
    latency: SimTime,
    default_time_base: TimeConverter,
    send_queue: SharedQueue,
    /// Handler installed on this side, if any.
    handler: Option<HandlerId>,
    poll_queue: Option<Arc<Mutex<PollingLinkQueue>>>,
    sync_queue: Option<Arc<Mutex<SyncQueue>>>,
    untimed_queue: UntimedQueue,
    tools: Vec<AttachedTool>,
}

struct LinkInner {
    tag: LinkId,
    ctx: Arc<SimContext>,
    pair: OnceCell<Weak<LinkInner>>,
    state: Mutex<LinkState>,
}

/// One endpoint of a link pair. Cloning yields another handle to the same
/// endpoint.
#[derive(Clone)]
pub struct Link {
    inner: Arc<LinkInner>,
}

/// Everything the checkpoint writer needs from a link, read in one lock.
pub(crate) struct LinkSnapshot {
    pub(crate) tag: LinkId,
    pub(crate) kind: LinkType,
    pub(crate) latency: SimTime,
    pub(crate) default_time_base: TimeConverter,
    pub(crate) delivery: DeliveryTarget,
    pub(crate) tools: Vec<AttachedTool>,
    pub(crate) poll_queue: Option<Arc<Mutex<PollingLinkQueue>>>,
}

impl Link {
    pub(crate) fn new(ctx: Arc<SimContext>, tag: LinkId, name: impl Into<String>) -> Self {
        let name = name.into();
        let send_queue: SharedQueue = Arc::new(Mutex::new(UninitializedQueue::new(format!(
            "link {tag} ({name}) sent an event but its peer has neither a handler nor polling configured"
        ))));
        Self {
            inner: Arc::new(LinkInner {
                tag,
                ctx,
                pair: OnceCell::new(),
                state: Mutex::new(LinkState {
                    name,
                    kind: LinkType::Uninitialized,
                    mode: LinkMode::Init,
                    delivery: DeliveryTarget::Unset,
                    latency: 0,
                    default_time_base: TimeConverter::CORE,
                    send_queue,
                    handler: None,
                    poll_queue: None,
                    sync_queue: None,
                    untimed_queue: UntimedQueue::new(),
                    tools: Vec::new(),
                }),
            }),
        }
    }

    /// Makes `left` and `right` each other's pair. A link's pair is set once.
    pub(crate) fn connect(left: &Link, right: &Link) {
        for (link, pair) in [(left, right), (right, left)] {
            if link.inner.pair.set(Arc::downgrade(&pair.inner)).is_err() {
                panic!("link {} already has a pair", link.inner.tag);
            }
        }
    }

    /// A link whose pair is itself.
    pub(crate) fn connect_to_self(link: &Link) {
        if link.inner.pair.set(Arc::downgrade(&link.inner)).is_err() {
            panic!("link {} already has a pair", link.inner.tag);
        }
    }

    fn pair(&self) -> Link {
        let weak = self
            .inner
            .pair
            .get()
            .unwrap_or_else(|| panic!("link {} has no pair", self.inner.tag));
        match weak.upgrade() {
            Some(inner) => Link { inner },
            None => panic!("pair of link {} has been dropped", self.inner.tag),
        }
    }

    pub fn id(&self) -> LinkId {
        self.inner.tag
    }

    pub fn name(&self) -> String {
        self.inner.state.lock().name.clone()
    }

    pub fn link_type(&self) -> LinkType {
        self.inner.state.lock().kind
    }

    pub fn mode(&self) -> LinkMode {
        self.inner.state.lock().mode
    }

    /// True once a handler or polling has been configured on this side.
    pub fn is_configured(&self) -> bool {
        self.link_type() != LinkType::Uninitialized
    }

    /// Accumulated one-way latency of sends from this side, in core ticks.
    pub fn latency(&self) -> SimTime {
        self.inner.state.lock().latency
    }

    pub fn default_time_base(&self) -> TimeConverter {
        self.inner.state.lock().default_time_base
    }

    pub fn set_default_time_base(&self, tc: TimeConverter) {
        self.inner.state.lock().default_time_base = tc;
    }

    /// Current simulated time of the partition this link lives in.
    pub fn now(&self) -> SimTime {
        self.inner.ctx.clock.now()
    }

    /// Sends `event` after `delay` cycles of the default time base.
    pub fn send(&self, delay: SimTime, event: Event) {
        let tc = self.default_time_base();
        self.send_impl(tc.convert_to_core_time(delay), event);
    }

    /// Sends `event` after `delay` cycles of `tc`.
    pub fn send_with(&self, delay: SimTime, tc: &TimeConverter, event: Event) {
        self.send_impl(tc.convert_to_core_time(delay), event);
    }

    /// Sends `event` with no delay beyond the link latency.
    pub fn send_now(&self, event: Event) {
        self.send_impl(0, event);
    }

    fn send_impl(&self, delay: SimTime, mut event: Event) {
        let (queue, delivery, latency, tools) = {
            let state = self.inner.state.lock();
            if state.mode != LinkMode::Run {
                panic!(
                    "link {} ({}) cannot send timed events in {:?} mode; use send_untimed_data",
                    self.inner.tag, state.name, state.mode
                );
            }
            (
                Arc::clone(&state.send_queue),
                state.delivery,
                state.latency,
                state.tools.clone(),
            )
        };

        let ctx = &self.inner.ctx;
        let delivery_time = ctx.clock.now().saturating_add(delay).saturating_add(latency);
        event.set_delivery_time(delivery_time);
        event.set_delivery_info(self.inner.tag, delivery);

        let mut slot = Some(event);
        for attached in &tools {
            attached.tool.lock().event_sent(attached.key, &mut slot);
            if slot.is_none() {
                trace!(tag = self.inner.tag, delivery_time, "event vetoed by attach point");
                if let Some(metrics) = &ctx.metrics {
                    metrics.inc_vetoed();
                }
                return;
            }
        }

        if let Some(event) = slot {
            trace!(tag = self.inner.tag, delivery_time, "event sent");
            if let Some(metrics) = &ctx.metrics {
                metrics.inc_sent();
            }
            queue.lock().insert(event);
        }
    }

    /// Next event due on a polling link, or `None` if nothing is due yet.
    ///
    /// # Panics
    /// If this link is not a polling link.
    pub fn recv(&self) -> Option<Event> {
        let queue = {
            let state = self.inner.state.lock();
            if state.kind != LinkType::Poll {
                panic!(
                    "recv() called on link {} ({}) of type {:?}; only polling links can be received from",
                    self.inner.tag, state.name, state.kind
                );
            }
            state.poll_queue.clone()
        }?;
        let now = self.inner.ctx.clock.now();
        let event = queue.lock().pop_due(now);
        if let (Some(_), Some(metrics)) = (&event, &self.inner.ctx.metrics) {
            metrics.inc_delivered();
        }
        event
    }

    /// Installs the handler called for events arriving on this side.
    ///
    /// # Panics
    /// If this link is a polling link.
    pub fn set_functor<H: EventHandler + 'static>(&self, handler: H) {
        let existing = {
            let state = self.inner.state.lock();
            if state.kind == LinkType::Poll {
                panic!(
                    "cannot install a handler on polling link {} ({})",
                    self.inner.tag, state.name
                );
            }
            state.handler
        };
        if existing.is_some() {
            warn!(tag = self.inner.tag, "set_functor replaced an installed handler");
        }
        self.install_handler(existing, Box::new(handler));
    }

    /// Swaps in a new handler and drops the previous one.
    pub fn replace_functor<H: EventHandler + 'static>(&self, handler: H) {
        let existing = {
            let state = self.inner.state.lock();
            if state.kind == LinkType::Poll {
                panic!(
                    "cannot replace the handler of polling link {} ({})",
                    self.inner.tag, state.name
                );
            }
            state.handler
        };
        self.install_handler(existing, Box::new(handler));
    }

    fn install_handler(&self, existing: Option<HandlerId>, handler: Box<dyn EventHandler>) {
        let ctx = &self.inner.ctx;
        let (id, previous) = match existing {
            Some(id) => {
                let previous = ctx.handlers.lock().replace(id, handler);
                (id, previous)
            }
            None => (ctx.handlers.lock().insert(handler), None),
        };
        // dropped outside the table lock; it may own links
        drop(previous);

        {
            let mut state = self.inner.state.lock();
            state.kind = LinkType::Handler;
            state.handler = Some(id);
        }
        self.pair().set_delivery_info(DeliveryTarget::Handler(id));
        debug!(tag = self.inner.tag, handler = id.0, "handler installed");
    }

    /// Handler installed on this side, if any.
    pub fn functor(&self) -> Option<HandlerId> {
        self.inner.state.lock().handler
    }

    /// Makes this a polling link: arriving events wait for [`Link::recv`].
    ///
    /// # Panics
    /// If a handler is installed or configuration has finished.
    pub fn set_polling(&self) {
        let mut state = self.inner.state.lock();
        match (state.kind, state.mode) {
            (LinkType::Handler, _) => panic!(
                "cannot poll link {} ({}): a handler is installed",
                self.inner.tag, state.name
            ),
            (_, LinkMode::Run | LinkMode::Complete) => panic!(
                "link {} ({}) must be configured for polling before the run starts",
                self.inner.tag, state.name
            ),
            (LinkType::Poll, _) => {}
            _ => {
                state.kind = LinkType::Poll;
                state.poll_queue = Some(Arc::new(Mutex::new(PollingLinkQueue::new())));
            }
        }
    }

    /// Adds `cycles` of `time_base` to the latency of sends from this side.
    pub fn add_send_latency(&self, cycles: SimTime, time_base: &str) -> CoreResult<()> {
        let tc = self.inner.ctx.time_lord.get_time_converter(time_base)?;
        self.add_send_latency_tc(cycles, &tc);
        Ok(())
    }

    pub fn add_send_latency_tc(&self, cycles: SimTime, tc: &TimeConverter) {
        self.add_latency(tc.convert_to_core_time(cycles));
    }

    /// Adds `cycles` of `time_base` to the latency of events arriving here.
    pub fn add_recv_latency(&self, cycles: SimTime, time_base: &str) -> CoreResult<()> {
        let tc = self.inner.ctx.time_lord.get_time_converter(time_base)?;
        self.add_recv_latency_tc(cycles, &tc);
        Ok(())
    }

    pub fn add_recv_latency_tc(&self, cycles: SimTime, tc: &TimeConverter) {
        self.pair().add_latency(tc.convert_to_core_time(cycles));
    }

    fn add_latency(&self, ticks: SimTime) {
        let mut state = self.inner.state.lock();
        if state.mode != LinkMode::Init {
            panic!(
                "latency of link {} ({}) can only change during configuration",
                self.inner.tag, state.name
            );
        }
        state.latency = state.latency.saturating_add(ticks);
    }

    /// Registers `tool` on the send path of this side and returns its key.
    pub fn attach_tool(&self, tool: SharedAttachPoint, metadata: &AttachPointMetaData) -> AttachKey {
        let key = tool.lock().register_link_attach_tool(metadata);
        self.inner
            .state
            .lock()
            .tools
            .push(AttachedTool { tool, key });
        key
    }

    /// Removes every registration of `tool`. Returns false if it was not
    /// attached.
    pub fn detach_tool(&self, tool: &SharedAttachPoint) -> bool {
        let mut state = self.inner.state.lock();
        let before = state.tools.len();
        state.tools.retain(|attached| !attached.is(tool));
        before != state.tools.len()
    }

    /// Metadata describing this link to an attach point.
    pub fn attach_metadata(&self) -> AttachPointMetaData {
        AttachPointMetaData {
            link_tag: self.inner.tag,
            link_name: self.name(),
        }
    }

    /// Sends `event` during an init or complete phase. It becomes receivable
    /// on the pair in the next phase.
    ///
    /// # Panics
    /// In `Run` mode.
    pub fn send_untimed_data(&self, mut event: Event) {
        let (delivery, sync_queue) = {
            let state = self.inner.state.lock();
            if state.mode == LinkMode::Run {
                panic!(
                    "link {} ({}) cannot send untimed data in Run mode",
                    self.inner.tag, state.name
                );
            }
            (state.delivery, state.sync_queue.clone())
        };

        let ctx = &self.inner.ctx;
        event.set_delivery_time(ctx.untimed_phase() + 1);
        event.set_delivery_info(self.inner.tag, delivery);
        ctx.count_untimed();

        match sync_queue {
            Some(queue) => queue.lock().insert_untimed(event),
            None => self.pair().inner.state.lock().untimed_queue.insert(event),
        };
    }

    /// Next untimed event receivable in the current phase.
    ///
    /// # Panics
    /// In `Run` mode.
    pub fn recv_untimed_data(&self) -> Option<Event> {
        let phase = self.inner.ctx.untimed_phase();
        let mut state = self.inner.state.lock();
        if state.mode == LinkMode::Run {
            panic!(
                "link {} ({}) cannot receive untimed data in Run mode",
                self.inner.tag, state.name
            );
        }
        state.untimed_queue.pop_ready(phase)
    }

    // Partition and synchronizer interface.

    pub(crate) fn set_delivery_info(&self, delivery: DeliveryTarget) {
        self.inner.state.lock().delivery = delivery;
    }

    pub(crate) fn set_latency(&self, latency: SimTime) {
        self.inner.state.lock().latency = latency;
    }

    pub(crate) fn set_send_queue(&self, queue: SharedQueue) {
        self.inner.state.lock().send_queue = queue;
    }

    /// Routes sends from this side to another partition through `queue`.
    pub(crate) fn set_as_sync_link(&self, queue: Arc<Mutex<SyncQueue>>, remote: LinkId) {
        self.set_send_queue(queue.clone());
        self.set_delivery_info(DeliveryTarget::Remote(remote));
        self.inner.state.lock().sync_queue = Some(queue);
    }

    /// Marks this link as the local stand-in for a remote endpoint.
    pub(crate) fn set_as_sync_proxy(&self) {
        self.inner.state.lock().kind = LinkType::Sync;
    }

    /// True when sends from this side have somewhere to land.
    pub(crate) fn pair_is_configured(&self) -> bool {
        self.pair().is_configured()
    }

    /// Leaves `Init`: picks the send queue from the pair's configuration and
    /// discards unread untimed data.
    pub(crate) fn finalize_configuration(&self) {
        let (pair_kind, pair_poll) = {
            let pair = self.pair();
            let state = pair.inner.state.lock();
            (state.kind, state.poll_queue.clone())
        };

        {
            let mut state = self.inner.state.lock();
            state.mode = LinkMode::Run;
            let discarded = state.untimed_queue.clear();
            if discarded > 0 {
                debug!(tag = self.inner.tag, discarded, "unread untimed data discarded");
            }
        }

        match (pair_kind, pair_poll) {
            (LinkType::Handler, _) => self.set_send_queue(self.inner.ctx.vortex.clone()),
            (LinkType::Poll, Some(poll)) => self.set_send_queue(poll),
            // remote peer; routed by set_as_sync_link
            (LinkType::Sync, _) => {}
            _ => debug!(tag = self.inner.tag, "pair of link is not configured"),
        }
    }

    /// Leaves `Run` for the complete phases.
    pub(crate) fn prepare_for_complete(&self) {
        let mut state = self.inner.state.lock();
        state.mode = LinkMode::Complete;
        state.untimed_queue.clear();
    }

    /// Delivers an event that arrived from another partition, as if this
    /// stand-in link had sent it locally.
    pub(crate) fn inject_remote(&self, mut event: Event) {
        let (queue, delivery, latency) = {
            let state = self.inner.state.lock();
            (Arc::clone(&state.send_queue), state.delivery, state.latency)
        };
        event.set_delivery_time(event.delivery_time().saturating_add(latency));
        event.set_delivery(delivery);
        queue.lock().insert(event);
    }

    /// Untimed counterpart of [`Link::inject_remote`].
    pub(crate) fn inject_remote_untimed(&self, event: Event) {
        self.pair().inner.state.lock().untimed_queue.insert(event);
    }

    pub(crate) fn snapshot(&self) -> LinkSnapshot {
        let state = self.inner.state.lock();
        LinkSnapshot {
            tag: self.inner.tag,
            kind: state.kind,
            latency: state.latency,
            default_time_base: state.default_time_base,
            delivery: state.delivery,
            tools: state.tools.clone(),
            poll_queue: state.poll_queue.clone(),
        }
    }

    pub(crate) fn set_tool_keys(&self, keys: &[AttachKey]) {
        let mut state = self.inner.state.lock();
        for (attached, key) in state.tools.iter_mut().zip(keys) {
            attached.key = *key;
        }
    }
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Link")
            .field("tag", &self.inner.tag)
            .field("name", &state.name)
            .field("kind", &state.kind)
            .field("mode", &state.mode)
            .field("latency", &state.latency)
            .field("delivery", &state.delivery)
            .finish()
    }
}

#[cfg(test)]
mod tests;
