//! Instrumentation hooks on the send path.

use std::sync::Arc;

use kestrel_serialization::{SerResult, Serializer};
use parking_lot::Mutex;

use crate::event::{Event, LinkId};

/// Opaque value handed out by a tool at registration and handed back to it
/// on every send. The link never interprets it.
pub type AttachKey = u64;

pub type SharedAttachPoint = Arc<Mutex<dyn AttachPoint>>;

/// Describes the link a tool is being attached to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttachPointMetaData {
    pub link_tag: LinkId,
    pub link_name: String,
}

/// A tool that observes, rewrites or drops events as they are sent.
///
/// Tools run synchronously on the sending thread, in attach order. Taking
/// the event out of `event` vetoes delivery and leaves the tool owning it.
pub trait AttachPoint: Send {
    fn register_link_attach_tool(&mut self, metadata: &AttachPointMetaData) -> AttachKey;

    fn event_sent(&mut self, key: AttachKey, event: &mut Option<Event>);

    /// Called while checkpointing and restoring for every attached key.
    /// Tools whose keys carry state across a restart visit it here.
    fn serialize_event_attach_point_key(
        &mut self,
        _ser: &mut Serializer,
        _key: &mut AttachKey,
    ) -> SerResult<()> {
        Ok(())
    }
}

#[derive(Clone)]
pub(crate) struct AttachedTool {
    pub(crate) tool: SharedAttachPoint,
    pub(crate) key: AttachKey,
}

impl AttachedTool {
    pub(crate) fn is(&self, tool: &SharedAttachPoint) -> bool {
        std::ptr::eq(
            Arc::as_ptr(&self.tool) as *const (),
            Arc::as_ptr(tool) as *const (),
        )
    }
}
