//! ## kestrel-core::checkpoint
//! **Checkpoint and restart of a partition**
//!
//! An image holds, in order:
//! - header: magic, format version, core time base, current time
//! - roots: whatever state the caller hands in, through [`Visit`]
//! - one record per link in registration order: tag, type, latency,
//!   default time base, attach point keys, then the events in flight on it
//!
//! A blake3 digest of everything above trails the image.
//!
//! Restart rebuilds the partition with the same configuration (same links,
//! same handlers, same tools), then lets [`CheckpointReader::restore`] put the
//! saved state back. Delivery targets are never stored: a restored event
//! takes the target of the link it was in flight on.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use kestrel_serialization::{ObjectMap, SerResult, SerializableRegistry, Serializer, Visit};
use tracing::{debug, info};

use crate::error::{CoreError, CoreResult};
use crate::event::{DeliveryTarget, Event, LinkId};
use crate::link::{AttachKey, Link, LinkSnapshot};
use crate::partition::Partition;
use crate::queue::{ActivityQueue, TimeVortex};
use crate::time::{SimTime, TimeConverter};

const MAGIC: u32 = u32::from_le_bytes(*b"KCP1");
pub const CHECKPOINT_VERSION: u32 = 1;
const DIGEST_LEN: usize = blake3::OUT_LEN;

/// One link's part of the image, borrowed for a SIZER, PACK or MAP pass.
struct LinkRecord<'a> {
    snapshot: LinkSnapshot,
    vortex: &'a mut TimeVortex,
}

impl LinkRecord<'_> {
    fn carries_vortex_events(&self) -> bool {
        matches!(self.snapshot.delivery, DeliveryTarget::Handler(_))
    }
}

impl Visit for LinkRecord<'_> {
    fn visit(&mut self, ser: &mut Serializer) -> SerResult<()> {
        let snap = &self.snapshot;
        let mut tag = snap.tag;
        let mut latency = snap.latency;
        ser.field("tag", &mut tag)?;
        ser.field("kind", &mut snap.kind.code())?;
        ser.field("latency", &mut latency)?;
        ser.field("default_time_base", &mut snap.default_time_base.factor())?;

        ser.field("tool_count", &mut (snap.tools.len() as u64))?;
        for attached in &snap.tools {
            let mut key = attached.key;
            attached
                .tool
                .lock()
                .serialize_event_attach_point_key(ser, &mut key)?;
        }

        if self.carries_vortex_events() {
            let target = snap.delivery;
            ser.field("vortex_events", &mut (self.vortex.count_for(target) as u64))?;
            for (index, event) in self.vortex.events_for_mut(target).enumerate() {
                ser.field(&format!("vortex[{index}]"), event)?;
            }
        } else {
            ser.field("vortex_events", &mut 0u64)?;
        }

        match &snap.poll_queue {
            Some(queue) => {
                let mut queue = queue.lock();
                ser.field("poll_events", &mut (queue.len() as u64))?;
                for (index, event) in queue.events_mut().enumerate() {
                    ser.field(&format!("poll[{index}]"), event)?;
                }
            }
            None => ser.field("poll_events", &mut 0u64)?,
        }
        Ok(())
    }
}

/// Writes checkpoint images.
pub struct Checkpoint;

impl Checkpoint {
    /// Serializes `partition` and `roots` into a self-verifying image.
    ///
    /// Fails if events bound for other partitions have not been exchanged
    /// yet, or if an event in the time vortex belongs to no link.
    pub fn write<R: Visit + ?Sized>(
        partition: &Partition,
        roots: &mut R,
        registry: &Arc<SerializableRegistry>,
    ) -> CoreResult<Vec<u8>> {
        let pending = partition.pending_sync_events();
        if pending > 0 {
            return Err(CoreError::Checkpoint(format!(
                "{pending} events for other partitions have not been exchanged"
            )));
        }

        let mut vortex = partition.vortex().lock();
        let claimed: usize = partition
            .links()
            .iter()
            .filter_map(|link| match link.snapshot().delivery {
                target @ DeliveryTarget::Handler(_) => Some(vortex.count_for(target)),
                _ => None,
            })
            .sum();
        if claimed != vortex.len() {
            return Err(CoreError::Checkpoint(format!(
                "{} events in the time vortex belong to no link",
                vortex.len() - claimed
            )));
        }

        let mut ser = Serializer::new(Arc::clone(registry));
        ser.start_sizing();
        visit_image(&mut ser, partition, roots, &mut vortex)?;
        let size = ser.size();

        ser.start_packing(size);
        visit_image(&mut ser, partition, roots, &mut vortex)?;
        let mut image = ser.finish_packing()?;
        drop(vortex);

        let digest = blake3::hash(&image);
        image.extend_from_slice(digest.as_bytes());

        if let Some(metrics) = partition.metrics() {
            metrics.observe_checkpoint(image.len());
        }
        info!(
            partition = partition.id(),
            now = partition.now(),
            bytes = image.len(),
            digest = %digest.to_hex(),
            "checkpoint written"
        );
        Ok(image)
    }

    pub fn write_to_path<R: Visit + ?Sized>(
        path: impl AsRef<Path>,
        partition: &Partition,
        roots: &mut R,
        registry: &Arc<SerializableRegistry>,
    ) -> CoreResult<usize> {
        let image = Self::write(partition, roots, registry)?;
        fs::write(path.as_ref(), &image)?;
        debug!(path = %path.as_ref().display(), "checkpoint saved");
        Ok(image.len())
    }

    /// Inspectable tree of what an image of `partition` would hold.
    pub fn describe<R: Visit + ?Sized>(
        partition: &Partition,
        roots: &mut R,
        registry: &Arc<SerializableRegistry>,
    ) -> CoreResult<ObjectMap> {
        let mut vortex = partition.vortex().lock();
        let mut ser = Serializer::new(Arc::clone(registry));
        ser.start_mapping("checkpoint");
        visit_image(&mut ser, partition, roots, &mut vortex)?;
        Ok(ser.finish_mapping()?)
    }
}

fn visit_image<R: Visit + ?Sized>(
    ser: &mut Serializer,
    partition: &Partition,
    roots: &mut R,
    vortex: &mut TimeVortex,
) -> SerResult<()> {
    let mut magic = MAGIC;
    let mut version = CHECKPOINT_VERSION;
    ser.field("magic", &mut magic)?;
    ser.field("version", &mut version)?;
    ser.field("core_time_base", &mut partition.core_time_base().to_owned())?;
    ser.field("now", &mut partition.now())?;
    ser.field("roots", roots)?;

    let links = partition.links();
    ser.field("link_count", &mut (links.len() as u64))?;
    for link in links {
        let mut record = LinkRecord {
            snapshot: link.snapshot(),
            vortex: &mut *vortex,
        };
        ser.field(&format!("link-{}", link.id()), &mut record)?;
    }
    Ok(())
}

/// A verified image, header already read.
pub struct CheckpointReader {
    ser: Serializer,
    core_time_base: String,
    now: SimTime,
}

impl CheckpointReader {
    /// Verifies the digest and reads the header of `image`.
    pub fn from_bytes(registry: &Arc<SerializableRegistry>, image: &[u8]) -> CoreResult<Self> {
        if image.len() < DIGEST_LEN {
            return Err(CoreError::Checkpoint(format!(
                "image of {} bytes is too short",
                image.len()
            )));
        }
        let (body, digest) = image.split_at(image.len() - DIGEST_LEN);
        if blake3::hash(body).as_bytes().as_slice() != digest {
            return Err(CoreError::Checkpoint(
                "digest mismatch: image is corrupt or truncated".to_owned(),
            ));
        }

        let mut ser = Serializer::new(Arc::clone(registry));
        ser.start_unpacking(body.to_vec());

        let mut magic = 0u32;
        ser.field("magic", &mut magic)?;
        if magic != MAGIC {
            return Err(CoreError::Checkpoint(format!("bad magic {magic:#010x}")));
        }
        let mut version = 0u32;
        ser.field("version", &mut version)?;
        if version != CHECKPOINT_VERSION {
            return Err(CoreError::Checkpoint(format!(
                "unsupported version {version}, expected {CHECKPOINT_VERSION}"
            )));
        }
        let mut core_time_base = String::new();
        ser.field("core_time_base", &mut core_time_base)?;
        let mut now: SimTime = 0;
        ser.field("now", &mut now)?;

        Ok(Self {
            ser,
            core_time_base,
            now,
        })
    }

    pub fn open(registry: &Arc<SerializableRegistry>, path: impl AsRef<Path>) -> CoreResult<Self> {
        let image = fs::read(path.as_ref())?;
        debug!(path = %path.as_ref().display(), bytes = image.len(), "checkpoint loaded");
        Self::from_bytes(registry, &image)
    }

    pub fn core_time_base(&self) -> &str {
        &self.core_time_base
    }

    /// Simulated time at which the image was taken.
    pub fn now(&self) -> SimTime {
        self.now
    }

    /// Restores `roots` and the state of every link into `partition`.
    ///
    /// `partition` must be freshly configured like the one that was saved,
    /// with its links not yet finalized. Component `setup` is not called: the
    /// restored events replace whatever it would have sent.
    pub fn restore<R: Visit + ?Sized>(
        mut self,
        partition: &mut Partition,
        roots: &mut R,
    ) -> CoreResult<()> {
        if partition.core_time_base() != self.core_time_base {
            return Err(CoreError::Checkpoint(format!(
                "image uses core time base {} but the partition uses {}",
                self.core_time_base,
                partition.core_time_base()
            )));
        }
        if partition.pending_events() > 0 {
            return Err(CoreError::Checkpoint(
                "the time vortex must be empty before a restore".to_owned(),
            ));
        }

        self.ser.field("roots", roots)?;

        let mut link_count = 0u64;
        self.ser.field("link_count", &mut link_count)?;
        if link_count != partition.links().len() as u64 {
            return Err(CoreError::Checkpoint(format!(
                "image has {link_count} links but the partition has {}",
                partition.links().len()
            )));
        }

        let mut restored = 0;
        for link in partition.links() {
            restored += self.restore_link(partition, link)?;
        }
        if self.ser.remaining() != 0 {
            return Err(CoreError::Checkpoint(format!(
                "{} unread bytes after the last link",
                self.ser.remaining()
            )));
        }

        partition.finalize_links_for_restart();
        partition.context().clock.reset_to(self.now);
        info!(
            partition = partition.id(),
            now = self.now,
            events = restored,
            "checkpoint restored"
        );
        Ok(())
    }

    fn restore_link(&mut self, partition: &Partition, link: &Link) -> CoreResult<usize> {
        let ser = &mut self.ser;
        let snap = link.snapshot();

        let mut tag: LinkId = 0;
        ser.field("tag", &mut tag)?;
        if tag != snap.tag {
            return Err(CoreError::Checkpoint(format!(
                "expected link {} in the image but found link {tag}",
                snap.tag
            )));
        }
        let mut kind = 0u8;
        ser.field("kind", &mut kind)?;
        if kind != snap.kind.code() {
            return Err(CoreError::Checkpoint(format!(
                "link {tag} was saved as type {kind} but is configured as {:?}",
                snap.kind
            )));
        }

        let mut latency: SimTime = 0;
        ser.field("latency", &mut latency)?;
        link.set_latency(latency);
        let mut factor: SimTime = 1;
        ser.field("default_time_base", &mut factor)?;
        link.set_default_time_base(TimeConverter::from_factor(factor));

        let mut tool_count = 0u64;
        ser.field("tool_count", &mut tool_count)?;
        if tool_count != snap.tools.len() as u64 {
            return Err(CoreError::Checkpoint(format!(
                "link {tag} was saved with {tool_count} attach points but has {}",
                snap.tools.len()
            )));
        }
        let mut keys: Vec<AttachKey> = Vec::with_capacity(snap.tools.len());
        for attached in &snap.tools {
            let mut key = attached.key;
            attached
                .tool
                .lock()
                .serialize_event_attach_point_key(ser, &mut key)?;
            keys.push(key);
        }
        link.set_tool_keys(&keys);

        let mut vortex_events = 0u64;
        ser.field("vortex_events", &mut vortex_events)?;
        if vortex_events > 0 && !matches!(snap.delivery, DeliveryTarget::Handler(_)) {
            return Err(CoreError::Checkpoint(format!(
                "link {tag} has {vortex_events} events in flight but its pair has no handler"
            )));
        }
        {
            let mut vortex = partition.vortex().lock();
            for index in 0..vortex_events {
                let mut event = Event::default();
                ser.field(&format!("vortex[{index}]"), &mut event)?;
                event.set_delivery(snap.delivery);
                vortex.restore(event);
            }
        }

        let mut poll_events = 0u64;
        ser.field("poll_events", &mut poll_events)?;
        if poll_events > 0 {
            let queue = snap.poll_queue.as_ref().ok_or_else(|| {
                CoreError::Checkpoint(format!("link {tag} has saved poll events but is not polling"))
            })?;
            let mut queue = queue.lock();
            for index in 0..poll_events {
                let mut event = Event::default();
                ser.field(&format!("poll[{index}]"), &mut event)?;
                queue.insert(event);
            }
        }

        Ok((vortex_events + poll_events) as usize)
    }
}
