use crate::event::Event;
use crate::queue::ActivityQueue;

/// Send queue of a link whose peer has not been configured.
///
/// Every operation is a programming error and panics with the message given
/// at construction, naming the link involved.
#[derive(Debug, Clone)]
pub struct UninitializedQueue {
    message: String,
}

impl UninitializedQueue {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    fn fail(&self) -> ! {
        tracing::error!(message = %self.message, "use of uninitialized queue");
        panic!("{}", self.message)
    }
}

impl ActivityQueue for UninitializedQueue {
    fn insert(&mut self, _event: Event) {
        self.fail()
    }

    fn pop(&mut self) -> Option<Event> {
        self.fail()
    }

    fn front(&self) -> Option<&Event> {
        self.fail()
    }

    fn len(&self) -> usize {
        self.fail()
    }
}
