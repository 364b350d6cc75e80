//! ## kestrel-telemetry::metrics
//! **Prometheus counters for link traffic and checkpoints**
//!
//! One recorder per process; partitions share it through clones, which share
//! the underlying collectors.

use prometheus::{Counter, Histogram, HistogramOpts, IntGauge, Registry};

#[derive(Debug, Clone)]
pub struct MetricsRecorder {
    pub registry: prometheus::Registry,
    pub events_sent: prometheus::Counter,
    pub events_delivered: prometheus::Counter,
    pub events_vetoed: prometheus::Counter,
    pub untimed_events: prometheus::Counter,
    pub checkpoint_bytes: prometheus::Histogram,
    pub sim_time: prometheus::IntGauge,
}

impl MetricsRecorder {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let events_sent = Counter::new(
            "kestrel_events_sent_total",
            "Events accepted by a link send",
        )?;
        let events_delivered = Counter::new(
            "kestrel_events_delivered_total",
            "Events handed to a handler or polling queue",
        )?;
        let events_vetoed = Counter::new(
            "kestrel_events_vetoed_total",
            "Events dropped by an attached instrumentation tool",
        )?;
        let untimed_events = Counter::new(
            "kestrel_untimed_events_total",
            "Untimed events exchanged during init and complete phases",
        )?;
        let checkpoint_bytes = Histogram::with_opts(
            HistogramOpts::new("kestrel_checkpoint_bytes", "Size of written checkpoints")
                .buckets(vec![1_024.0, 65_536.0, 1_048_576.0, 67_108_864.0]),
        )?;
        let sim_time = IntGauge::new(
            "kestrel_sim_time",
            "Simulated time reached, in core ticks",
        )?;

        registry.register(Box::new(events_sent.clone()))?;
        registry.register(Box::new(events_delivered.clone()))?;
        registry.register(Box::new(events_vetoed.clone()))?;
        registry.register(Box::new(untimed_events.clone()))?;
        registry.register(Box::new(checkpoint_bytes.clone()))?;
        registry.register(Box::new(sim_time.clone()))?;

        Ok(Self {
            registry,
            events_sent,
            events_delivered,
            events_vetoed,
            untimed_events,
            checkpoint_bytes,
            sim_time,
        })
    }

    pub fn gather_metrics(&self) -> Result<String, prometheus::Error> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::<u8>::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    pub fn inc_sent(&self) {
        self.events_sent.inc();
    }

    pub fn inc_delivered(&self) {
        self.events_delivered.inc();
    }

    pub fn inc_vetoed(&self) {
        self.events_vetoed.inc();
    }

    pub fn inc_untimed(&self) {
        self.untimed_events.inc();
    }

    pub fn observe_checkpoint(&self, bytes: usize) {
        self.checkpoint_bytes.observe(bytes as f64);
    }

    pub fn set_sim_time(&self, ticks: u64) {
        self.sim_time.set(i64::try_from(ticks).unwrap_or(i64::MAX));
    }
}
