//! State shared by every link of one partition.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use kestrel_telemetry::MetricsRecorder;
use parking_lot::Mutex;

use crate::event::HandlerTable;
use crate::queue::TimeVortex;
use crate::time::{TimeLord, VirtualClock};

pub type PartitionId = u32;

pub(crate) struct SimContext {
    pub(crate) partition: PartitionId,
    pub(crate) clock: VirtualClock,
    pub(crate) time_lord: Arc<TimeLord>,
    pub(crate) vortex: Arc<Mutex<TimeVortex>>,
    pub(crate) handlers: Mutex<HandlerTable>,
    pub(crate) metrics: Option<MetricsRecorder>,
    untimed_phase: AtomicU64,
    untimed_sent: AtomicU64,
}

impl SimContext {
    pub(crate) fn new(
        partition: PartitionId,
        time_lord: Arc<TimeLord>,
        enforce_link_order: bool,
        metrics: Option<MetricsRecorder>,
    ) -> Self {
        Self {
            partition,
            clock: VirtualClock::new(0),
            time_lord,
            vortex: Arc::new(Mutex::new(TimeVortex::new(enforce_link_order))),
            handlers: Mutex::new(HandlerTable::default()),
            metrics,
            untimed_phase: AtomicU64::new(0),
            untimed_sent: AtomicU64::new(0),
        }
    }

    pub(crate) fn untimed_phase(&self) -> u64 {
        self.untimed_phase.load(Ordering::Acquire)
    }

    pub(crate) fn set_untimed_phase(&self, phase: u64) {
        self.untimed_phase.store(phase, Ordering::Release);
    }

    pub(crate) fn count_untimed(&self) {
        self.untimed_sent.fetch_add(1, Ordering::AcqRel);
        if let Some(metrics) = &self.metrics {
            metrics.inc_untimed();
        }
    }

    /// Untimed events sent since the last call.
    pub(crate) fn take_untimed_count(&self) -> u64 {
        self.untimed_sent.swap(0, Ordering::AcqRel)
    }
}
