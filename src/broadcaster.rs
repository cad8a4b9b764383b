//! Live post fan-out.
//!
//! Each thread keeps a list of subscribed sinks. A "socket" here is anything
//! implementing [`PostSink`]; the (out of scope) HTTP/websocket layer is
//! responsible for constructing one per accepted connection and submitting
//! a subscribe request to the sequencer. Fan-out itself runs synchronously
//! inside the post-admit command, matching the single-writer discipline: a
//! dead sink is dropped on first write failure rather than retried.

use std::collections::HashMap;
use std::fmt;

use bytes::Bytes;

use crate::ids::ThreadId;

#[derive(Debug)]
pub struct SinkError;

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("post sink closed")
    }
}

impl std::error::Error for SinkError {}

/// A live subscriber. Implementors should treat a write taking longer than
/// about 30 seconds as failed and return `Err`.
pub trait PostSink: Send {
    fn send(&mut self, payload: Bytes) -> Result<(), SinkError>;
}

#[derive(Default)]
pub struct Broadcaster {
    subscribers: HashMap<ThreadId, Vec<Box<dyn PostSink>>>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, thread: ThreadId, sink: Box<dyn PostSink>) {
        self.subscribers.entry(thread).or_default().push(sink);
    }

    /// Writes `payload` to every live subscriber of `thread`, dropping any
    /// that fail.
    pub fn broadcast(&mut self, thread: &ThreadId, payload: Bytes) {
        let Some(sinks) = self.subscribers.get_mut(thread) else { return };
        sinks.retain_mut(|sink| sink.send(payload.clone()).is_ok());
    }

    /// Drops every subscriber of a deleted thread.
    pub fn purge(&mut self, thread: &ThreadId) {
        self.subscribers.remove(thread);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recording(Vec<Bytes>);

    impl PostSink for Recording {
        fn send(&mut self, payload: Bytes) -> Result<(), SinkError> {
            self.0.push(payload);
            Ok(())
        }
    }

    struct AlwaysFails;

    impl PostSink for AlwaysFails {
        fn send(&mut self, _payload: Bytes) -> Result<(), SinkError> {
            Err(SinkError)
        }
    }

    #[test]
    fn broadcast_drops_failed_sinks() {
        let mut b = Broadcaster::new();
        let tid = ThreadId::from("0");
        b.subscribe(tid.clone(), Box::new(AlwaysFails));
        b.broadcast(&tid, Bytes::from_static(b"hi"));
        // Second broadcast should be a no-op over an empty subscriber list,
        // not a panic over a sink we already dropped.
        b.broadcast(&tid, Bytes::from_static(b"again"));
    }
}
