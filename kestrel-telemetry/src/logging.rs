//! ## kestrel-telemetry::logging
//! **Structured logging for simulation runs**
//!
//! Every partition thread is named after its partition, so the thread name
//! column identifies which rank produced a line.

use tracing::info_span;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Clone)]
pub struct EventLogger;

impl EventLogger {
    /// Installs the global subscriber. `RUST_LOG` overrides `default_filter`.
    ///
    /// Returns false if a subscriber was already installed.
    pub fn init(default_filter: &str) -> bool {
        fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
            )
            .with_thread_names(true)
            .with_span_events(FmtSpan::ENTER)
            .try_init()
            .is_ok()
    }

    /// Emits one structured line describing a simulation-level occurrence.
    #[inline]
    pub fn log_sim_event(kind: &str, sim_time: u64, detail: &str) {
        let span = info_span!("sim_event", kind = kind, sim_time = sim_time);
        let _entered = span.enter();
        tracing::info!(detail = detail, "Simulation event recorded");
    }
}
