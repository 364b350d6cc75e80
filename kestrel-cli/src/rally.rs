//! The rally model: one ball passed around a ring of players, one player
//! per partition.
//!
//! Player `i` owns an outbox link to player `i + 1` and an inbox link from
//! player `i - 1`. With a single partition the ring closes on itself through
//! a local link pair.

use std::sync::Arc;

use kestrel_core::prelude::*;
use kestrel_serialization::{SerResult, Serializable, SerializableRegistry, Serializer, Visit};
use kestrel_telemetry::MetricsRecorder;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::{CliError, CliResult};

/// The ball.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Volley {
    pub rally: u64,
    pub hitter: String,
}

impl Serializable for Volley {
    fn type_name(&self) -> &'static str {
        "kestrel.rally.Volley"
    }

    fn serialize_order(&mut self, ser: &mut Serializer) -> SerResult<()> {
        ser.field("rally", &mut self.rally)?;
        ser.field("hitter", &mut self.hitter)
    }
}

/// Model-level state saved alongside the kernel in a checkpoint.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Tally {
    pub volleys: u64,
    pub greetings: u64,
    pub longest_rally: u64,
}

impl Visit for Tally {
    fn visit(&mut self, ser: &mut Serializer) -> SerResult<()> {
        ser.field("volleys", &mut self.volleys)?;
        ser.field("greetings", &mut self.greetings)?;
        ser.field("longest_rally", &mut self.longest_rally)
    }
}

pub type SharedTally = Arc<Mutex<Tally>>;

pub fn registry() -> Arc<SerializableRegistry> {
    let registry = Arc::new(SerializableRegistry::new());
    registry.register::<Volley>();
    registry
}

#[derive(Debug, Clone)]
pub struct RallySettings {
    pub core_time_base: String,
    pub enforce_link_order: bool,
    pub players: u32,
    pub latency: String,
    pub metrics: Option<MetricsRecorder>,
}

struct Player {
    name: String,
    outbox: Link,
    inbox: Link,
    serves: bool,
    tally: SharedTally,
}

impl Component for Player {
    fn init(&mut self, phase: u64) {
        if phase == 0 {
            self.outbox.send_untimed_data(Event::new(Volley {
                rally: 0,
                hitter: self.name.clone(),
            }));
        }
        while let Some(hello) = self.inbox.recv_untimed_data() {
            let from = hello.payload_as::<Volley>().map(|v| v.hitter.as_str());
            debug!(player = %self.name, ?from, phase, "greeting received");
            self.tally.lock().greetings += 1;
        }
    }

    fn setup(&mut self) {
        if self.serves {
            self.outbox.send_now(Event::new(Volley {
                rally: 1,
                hitter: self.name.clone(),
            }));
        }
    }

    fn finish(&mut self) {
        let tally = self.tally.lock();
        info!(
            player = %self.name,
            volleys = tally.volleys,
            longest_rally = tally.longest_rally,
            "player finished"
        );
    }
}

/// Every partition of the model and the state they share.
pub struct Court {
    pub partitions: Vec<Partition>,
    pub tally: SharedTally,
}

impl Court {
    pub fn new(settings: &RallySettings) -> CliResult<Self> {
        let players = settings.players.max(1) as usize;
        let mut partitions = Vec::with_capacity(players);
        for id in 0..settings.players.max(1) {
            partitions.push(Partition::new(PartitionOptions {
                id,
                core_time_base: settings.core_time_base.clone(),
                enforce_link_order: settings.enforce_link_order,
                metrics: settings.metrics.clone(),
            })?);
        }

        // connection i runs from player i to player i + 1
        let mut outboxes = Vec::with_capacity(players);
        let mut inboxes = Vec::with_capacity(players);
        if players == 1 {
            let pair = partitions[0].link_pair(1, 2)?;
            outboxes.push(pair.left);
            inboxes.push(pair.right);
        } else {
            let mut received = vec![None; players];
            for from in 0..players {
                let to = (from + 1) % players;
                let out_tag = 2 * from as LinkId + 1;
                let in_tag = out_tag + 1;
                let (outbox, inbox) = {
                    let (a, b) = pick_two(&mut partitions, from, to);
                    connect_partitions(a, out_tag, b, in_tag)?
                };
                outboxes.push(outbox);
                received[to] = Some(inbox);
            }
            for inbox in received {
                inboxes.push(inbox.ok_or_else(|| {
                    CliError::Unsupported("ring left a player without an inbox".to_owned())
                })?);
            }
        }

        let tally = SharedTally::default();
        for (id, ((partition, outbox), inbox)) in partitions
            .iter_mut()
            .zip(outboxes)
            .zip(inboxes)
            .enumerate()
        {
            outbox.add_send_latency(1, &settings.latency)?;
            let name = format!("player-{id}");
            install_return(&name, &inbox, &outbox, &tally);
            partition.add_component(Player {
                name,
                outbox,
                inbox,
                serves: id == 0,
                tally: Arc::clone(&tally),
            });
        }

        Ok(Self { partitions, tally })
    }

    /// Converts a duration such as `"1us"` to core ticks.
    pub fn ticks(&self, duration: &str) -> CliResult<SimTime> {
        let partition = self
            .partitions
            .first()
            .ok_or_else(|| CliError::Unsupported("court has no partitions".to_owned()))?;
        Ok(partition.get_time_converter(duration)?.factor())
    }

    /// The only partition of a single-player court.
    pub fn single(&mut self) -> CliResult<&mut Partition> {
        match self.partitions.as_mut_slice() {
            [partition] => Ok(partition),
            _ => Err(CliError::Unsupported(
                "checkpoints need a single partition".to_owned(),
            )),
        }
    }
}

fn install_return(name: &str, inbox: &Link, outbox: &Link, tally: &SharedTally) {
    let hitter = name.to_owned();
    let outbox = outbox.clone();
    let tally = Arc::clone(tally);
    inbox.set_functor(move |ev: Event| {
        let rally = ev.payload_as::<Volley>().map_or(0, |v| v.rally);
        {
            let mut tally = tally.lock();
            tally.volleys += 1;
            tally.longest_rally = tally.longest_rally.max(rally);
        }
        outbox.send_now(Event::new(Volley {
            rally: rally + 1,
            hitter: hitter.clone(),
        }));
    });
}

/// Two distinct elements of `items`, in the order asked for.
fn pick_two<T>(items: &mut [T], a: usize, b: usize) -> (&mut T, &mut T) {
    if a < b {
        let (head, tail) = items.split_at_mut(b);
        (&mut head[a], &mut tail[0])
    } else {
        let (head, tail) = items.split_at_mut(a);
        (&mut tail[0], &mut head[b])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(players: u32) -> RallySettings {
        RallySettings {
            core_time_base: "1ns".into(),
            enforce_link_order: true,
            players,
            latency: "10ns".into(),
            metrics: None,
        }
    }

    #[test]
    fn single_player_rallies_against_itself() {
        let mut court = Court::new(&settings(1)).unwrap();
        let end = court.ticks("100ns").unwrap();
        let summary = court.single().unwrap().run(end);

        let tally = court.tally.lock();
        assert_eq!(summary.init_phases, 2);
        assert_eq!(tally.greetings, 1);
        // served at 0, returned at 10, 20, ... 100
        assert_eq!(tally.volleys, 10);
        assert_eq!(tally.longest_rally, 10);
    }

    #[test]
    fn ring_across_partitions_matches_a_single_partition() {
        let mut single = Court::new(&settings(1)).unwrap();
        let end = single.ticks("200ns").unwrap();
        single.single().unwrap().run(end);

        let mut ring = Court::new(&settings(3)).unwrap();
        run_parallel(&mut ring.partitions, end).unwrap();

        let single = single.tally.lock();
        let ring = ring.tally.lock();
        assert_eq!(ring.volleys, single.volleys);
        assert_eq!(ring.longest_rally, single.longest_rally);
        assert_eq!(ring.greetings, 3);
    }

    #[test]
    fn two_player_ring_runs_in_parallel() {
        let mut ring = Court::new(&settings(2)).unwrap();
        let end = ring.ticks("100ns").unwrap();
        let summaries = run_parallel(&mut ring.partitions, end).unwrap();

        // served at 0, then one hop every 10ns alternating between partitions
        assert_eq!(summaries[0].delivered + summaries[1].delivered, 10);
        assert_eq!(summaries[1].delivered, 5);
        let tally = ring.tally.lock();
        assert_eq!(tally.volleys, 10);
        assert_eq!(tally.longest_rally, 10);
        assert_eq!(tally.greetings, 2);
    }

    #[test]
    fn pick_two_returns_the_requested_order() {
        let mut items = [1, 2, 3];
        let (a, b) = pick_two(&mut items, 2, 0);
        assert_eq!((*a, *b), (3, 1));
        let (a, b) = pick_two(&mut items, 0, 1);
        assert_eq!((*a, *b), (1, 2));
    }

    #[test]
    fn restarted_rally_ends_like_an_uninterrupted_one() {
        let registry = registry();
        let mut whole = Court::new(&settings(1)).unwrap();
        let end = whole.ticks("200ns").unwrap();
        whole.single().unwrap().run(end);

        let mut first = Court::new(&settings(1)).unwrap();
        let at = first.ticks("55ns").unwrap();
        let tally = Arc::clone(&first.tally);
        let partition = first.single().unwrap();
        partition.run_untimed_phases();
        partition.finalize_links();
        partition.run_until(at);
        let image = Checkpoint::write(partition, &mut *tally.lock(), &registry).unwrap();

        let mut second = Court::new(&settings(1)).unwrap();
        let tally = Arc::clone(&second.tally);
        let partition = second.single().unwrap();
        CheckpointReader::from_bytes(&registry, &image)
            .unwrap()
            .restore(partition, &mut *tally.lock())
            .unwrap();
        assert_eq!(tally.lock().volleys, 5);
        let summary = partition.resume(end);

        assert_eq!(summary.init_phases, 0);
        assert_eq!(summary.delivered, 15);
        assert_eq!(*tally.lock(), *whole.tally.lock());
    }

    #[test]
    fn checkpoints_need_one_partition() {
        let mut court = Court::new(&settings(2)).unwrap();
        assert!(matches!(court.single(), Err(CliError::Unsupported(_))));
    }
}
