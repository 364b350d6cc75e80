//! # kestrel-core
//!
//! Discrete-event simulation kernel: links, events, time and partitions.
//!
//! Components talk only through [`Link`]s. A send stamps the event with its
//! delivery time and target and drops it into a queue; the partition that
//! owns the receiving side pops it in time order and hands it over.
//!
//! ### Key Submodules:
//! - `time`: virtual clock, time bases and conversion to core ticks
//! - `event`: events, handlers and delivery targets
//! - `link`: link endpoints and attach points on the send path
//! - `queue`: time vortex, polling, untimed and cross-partition queues
//! - `partition`: per-thread lifecycle (init, run, complete)
//! - `sync`: conservative parallel execution across partitions
//! - `checkpoint`: checkpoint images and restart

pub mod checkpoint;
mod context;
pub mod error;
pub mod event;
pub mod link;
pub mod partition;
pub mod queue;
pub mod sync;
pub mod time;

pub mod prelude {
    pub use crate::checkpoint::{Checkpoint, CheckpointReader};
    pub use crate::error::{CoreError, CoreResult};
    pub use crate::event::{Event, EventHandler, EventOrigin, LinkId};
    pub use crate::link::{AttachPoint, AttachPointMetaData, Link, LinkMode, LinkType};
    pub use crate::partition::{Component, LinkPair, Partition, PartitionOptions, RunSummary};
    pub use crate::sync::{connect_partitions, run_parallel};
    pub use crate::time::{SimTime, TimeConverter, TimeLord, VirtualClock};
}

pub use context::PartitionId;
pub use error::{CoreError, CoreResult};
