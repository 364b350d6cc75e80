//! ## kestrel-core::sync
//! **Running partitions on parallel threads**
//!
//! Partitions advance in epochs one lookahead long, where the lookahead is
//! the smallest latency of any link crossing partitions. Nothing sent during
//! an epoch can arrive before the next one starts, so each thread runs its
//! epoch independently and then trades outbound events with every peer.
//!
//! Every exchange is a round: each thread sends one batch to each peer and
//! waits for one batch from each peer. Batches are injected in partition
//! order so the result does not depend on thread scheduling.

use std::collections::BTreeSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, error, info, info_span};

use crate::context::PartitionId;
use crate::error::{CoreError, CoreResult};
use crate::event::{Event, LinkId};
use crate::link::Link;
use crate::partition::{Partition, RunSummary, UntimedStage};
use crate::time::SimTime;

const ABORT_POLL: Duration = Duration::from_millis(50);

/// Connects a link in `left` to a link in `right`.
///
/// Each side gets its endpoint plus a local stand-in for the remote one,
/// tagged like the remote endpoint. Events sent from either endpoint are
/// buffered for the peer partition and handed to the stand-in on arrival.
pub fn connect_partitions(
    left: &mut Partition,
    left_tag: LinkId,
    right: &mut Partition,
    right_tag: LinkId,
) -> CoreResult<(Link, Link)> {
    if left.id() == right.id() {
        return Err(CoreError::Sync(format!(
            "partition {} cannot be connected to itself; use link_pair",
            left.id()
        )));
    }
    if left.core_time_base() != right.core_time_base() {
        return Err(CoreError::Sync(format!(
            "partitions {} and {} use different core time bases ({} and {})",
            left.id(),
            right.id(),
            left.core_time_base(),
            right.core_time_base()
        )));
    }
    if left_tag == right_tag {
        return Err(CoreError::DuplicateLink(left_tag));
    }
    for partition in [&*left, &*right] {
        for tag in [left_tag, right_tag] {
            if partition.link(tag).is_some() {
                return Err(CoreError::DuplicateLink(tag));
            }
        }
    }

    let local = half_link(left, left_tag, right.id(), right_tag)?;
    let remote = half_link(right, right_tag, left.id(), left_tag)?;
    debug!(
        left = left.id(),
        left_tag,
        right = right.id(),
        right_tag,
        "link connected across partitions"
    );
    Ok((local, remote))
}

fn half_link(
    partition: &mut Partition,
    tag: LinkId,
    peer: PartitionId,
    peer_tag: LinkId,
) -> CoreResult<Link> {
    let link = partition.new_link(tag, format!("link-{tag}"))?;
    let proxy = partition.new_link(peer_tag, format!("remote-{peer_tag}@{peer}"))?;
    proxy.set_as_sync_proxy();
    Link::connect(&link, &proxy);

    let queue = partition.outgoing_queue(peer);
    link.set_as_sync_link(queue, tag);
    partition.register_proxy(peer_tag, proxy);
    partition.register_sync_route(tag, peer);
    Ok(link)
}

/// Outbound traffic from one partition to one peer for one round.
#[derive(Debug)]
pub struct SyncBatch {
    pub from: PartitionId,
    pub round: u64,
    pub timed: Vec<Event>,
    pub untimed: Vec<Event>,
    /// Untimed events the sender produced in the phase just finished.
    pub untimed_sent: u64,
}

/// One partition's end of the all-to-all exchange.
pub struct ThreadSync {
    id: PartitionId,
    round: u64,
    peers: Vec<(PartitionId, Sender<SyncBatch>)>,
    inbox: Receiver<SyncBatch>,
    stash: Vec<SyncBatch>,
    abort: Arc<AtomicBool>,
}

impl ThreadSync {
    /// Builds a fully connected set of synchronizers, one per id.
    pub fn mesh(ids: &[PartitionId], abort: &Arc<AtomicBool>) -> Vec<ThreadSync> {
        let channels: Vec<(Sender<SyncBatch>, Receiver<SyncBatch>)> =
            ids.iter().map(|_| channel::unbounded()).collect();

        ids.iter()
            .zip(&channels)
            .map(|(&id, (_, inbox))| ThreadSync {
                id,
                round: 0,
                peers: ids
                    .iter()
                    .zip(&channels)
                    .filter(|(peer, _)| **peer != id)
                    .map(|(&peer, (tx, _))| (peer, tx.clone()))
                    .collect(),
                inbox: inbox.clone(),
                stash: Vec::new(),
                abort: Arc::clone(abort),
            })
            .collect()
    }

    pub fn id(&self) -> PartitionId {
        self.id
    }

    pub fn round(&self) -> u64 {
        self.round
    }

    /// Trades buffered events with every peer and injects what arrived.
    /// Returns the number of untimed events sent across all partitions in
    /// the phase just finished, `untimed_sent` included.
    pub fn exchange(&mut self, partition: &mut Partition, untimed_sent: u64) -> CoreResult<u64> {
        self.round += 1;
        for (peer, tx) in &self.peers {
            let (timed, untimed) = partition.take_outgoing(*peer);
            let batch = SyncBatch {
                from: self.id,
                round: self.round,
                timed,
                untimed,
                untimed_sent,
            };
            tx.send(batch).map_err(|_| {
                CoreError::Sync(format!("partition {peer} stopped before round {}", self.round))
            })?;
        }

        let round = self.round;
        let (mut batches, later): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.stash).into_iter().partition(|b| b.round == round);
        self.stash = later;

        while batches.len() < self.peers.len() {
            if self.abort.load(Ordering::Acquire) {
                return Err(CoreError::Aborted);
            }
            match self.inbox.recv_timeout(ABORT_POLL) {
                Ok(batch) if batch.round == round => batches.push(batch),
                Ok(batch) => self.stash.push(batch),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(CoreError::Sync(format!(
                        "partition {} lost its peers in round {round}",
                        self.id
                    )))
                }
            }
        }

        batches.sort_by_key(|batch| batch.from);
        let mut total = untimed_sent;
        for batch in batches {
            total += batch.untimed_sent;
            partition.inject(batch.timed, batch.untimed)?;
        }
        Ok(total)
    }
}

/// Smallest latency of any path crossing partitions: the sending
/// endpoint's latency plus the latency added on arrival. Endpoints whose
/// remote side has neither a handler nor polling never deliver and are
/// ignored. `None` when no path crosses, in which case the partitions never
/// need to meet before the end.
pub fn lookahead(partitions: &[Partition]) -> CoreResult<Option<SimTime>> {
    let mut smallest: Option<(LinkId, SimTime)> = None;
    for partition in partitions {
        for (link, peer) in partition.sync_routes() {
            let arrival = partitions
                .iter()
                .find(|p| p.id() == peer)
                .and_then(|p| p.inbound_latency(link.id()));
            let Some(arrival) = arrival else {
                continue;
            };
            let latency = link.latency().saturating_add(arrival);
            if smallest.map_or(true, |(_, best)| latency < best) {
                smallest = Some((link.id(), latency));
            }
        }
    }
    match smallest {
        Some((tag, 0)) => Err(CoreError::Sync(format!(
            "link {tag} crosses partitions with zero latency"
        ))),
        Some((_, latency)) => Ok(Some(latency)),
        None => Ok(None),
    }
}

/// Runs every partition on its own thread up to `end` and returns their
/// summaries in input order.
///
/// A panic on any partition thread stops the others and is resumed on the
/// calling thread.
pub fn run_parallel(partitions: &mut [Partition], end: SimTime) -> CoreResult<Vec<RunSummary>> {
    let ids: Vec<PartitionId> = partitions.iter().map(Partition::id).collect();
    let unique: BTreeSet<PartitionId> = ids.iter().copied().collect();
    if unique.len() != ids.len() {
        return Err(CoreError::Sync("partition ids must be unique".to_owned()));
    }
    let lookahead = lookahead(partitions)?;
    info!(partitions = ids.len(), ?lookahead, end, "starting parallel run");

    let abort = Arc::new(AtomicBool::new(false));
    let syncs = ThreadSync::mesh(&ids, &abort);

    let outcome = crossbeam::scope(|scope| -> CoreResult<Vec<RunSummary>> {
        let mut handles = Vec::with_capacity(partitions.len());
        for (partition, sync) in partitions.iter_mut().zip(syncs) {
            let thread_abort = Arc::clone(&abort);
            let spawned = scope
                .builder()
                .name(format!("partition-{}", partition.id()))
                .spawn(move |_| {
                    let result = panic::catch_unwind(AssertUnwindSafe(|| {
                        drive(partition, sync, end, lookahead)
                    }));
                    match result {
                        Ok(Ok(summary)) => Ok(summary),
                        Ok(Err(e)) => {
                            thread_abort.store(true, Ordering::Release);
                            Err(e)
                        }
                        Err(payload) => {
                            thread_abort.store(true, Ordering::Release);
                            panic::resume_unwind(payload)
                        }
                    }
                });
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    abort.store(true, Ordering::Release);
                    return Err(CoreError::Io(e));
                }
            }
        }

        let mut summaries = Vec::with_capacity(handles.len());
        let mut failure = None;
        for handle in handles {
            match handle.join() {
                Ok(Ok(summary)) => summaries.push(summary),
                // report the partition that failed, not the peers it stopped
                Ok(Err(e)) => match failure {
                    None | Some(CoreError::Aborted) => failure = Some(e),
                    Some(_) => {}
                },
                Err(payload) => panic::resume_unwind(payload),
            }
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(summaries),
        }
    });

    match outcome {
        Ok(result) => result,
        Err(payload) => panic::resume_unwind(payload),
    }
}

fn drive(
    partition: &mut Partition,
    mut sync: ThreadSync,
    end: SimTime,
    lookahead: Option<SimTime>,
) -> CoreResult<RunSummary> {
    let span = info_span!("partition", id = partition.id());
    let _enter = span.enter();

    let init_phases = untimed_rounds(partition, &mut sync, UntimedStage::Init)?;
    partition.finalize_links();

    let mut delivered = 0;
    let mut epoch_start = partition.now();
    loop {
        let epoch_end = lookahead
            .and_then(|l| epoch_start.checked_add(l))
            .filter(|&epoch_end| epoch_end <= end);
        match epoch_end {
            Some(epoch_end) => {
                delivered += partition.run_before(epoch_end);
                sync.exchange(partition, 0)?;
                epoch_start = epoch_end;
            }
            None => {
                delivered += partition.run_until(end);
                sync.exchange(partition, 0)?;
                break;
            }
        }
    }

    partition.prepare_for_complete();
    let complete_phases = untimed_rounds(partition, &mut sync, UntimedStage::Complete)?;
    partition.finish();

    let summary = RunSummary {
        init_phases,
        delivered,
        complete_phases,
        end_time: partition.now(),
    };
    if summary.end_time != end {
        error!(now = summary.end_time, end, "partition finished at an unexpected time");
    }
    Ok(summary)
}

fn untimed_rounds(
    partition: &mut Partition,
    sync: &mut ThreadSync,
    stage: UntimedStage,
) -> CoreResult<u64> {
    let mut phase = 0;
    loop {
        let sent = partition.untimed_phase(stage, phase);
        let global = sync.exchange(partition, sent)?;
        phase += 1;
        if global == 0 {
            return Ok(phase);
        }
    }
}
