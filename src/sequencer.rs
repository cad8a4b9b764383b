//! The hive's single-writer executor.
//!
//! Exactly one task owns the `Hive` value. Every mutation and every read
//! that needs a consistent view arrives as a closure on a bounded channel
//! and runs to completion before the next is dequeued — the same admission
//! discipline the original gives its tube/job state machine, just generalized
//! from a fixed job-queue command set to an arbitrary closure. `submit`
//! builds a oneshot reply channel, sends the request, and awaits the reply;
//! this is the seam an HTTP handler (out of scope here) calls into.

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::broadcaster::PostSink;
use crate::hive::Hive;
use crate::ids::ThreadId;

type BoxedCommand = Box<dyn FnOnce(&mut Hive) + Send>;

enum Request {
    Command(BoxedCommand),
    Subscribe { thread: ThreadId, sink: Box<dyn PostSink> },
    Render { thread: ThreadId, reply: oneshot::Sender<Bytes> },
}

#[derive(Clone)]
pub struct SequencerHandle {
    tx: mpsc::Sender<Request>,
}

impl SequencerHandle {
    /// Runs `f` against the hive on the sequencer task and returns its
    /// result, serialized with every other request in arrival order.
    pub async fn submit<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut Hive) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let boxed: BoxedCommand = Box::new(move |hive| {
            let result = f(hive);
            let _ = reply_tx.send(result);
        });

        self.tx.send(Request::Command(boxed)).await.expect("sequencer task has stopped");
        reply_rx.await.expect("sequencer dropped the reply channel without answering")
    }

    /// Registers `sink` to receive every post admitted to `thread` from now
    /// on. Fire-and-forget: the caller doesn't need the subscription to be
    /// live before returning.
    pub async fn subscribe(&self, thread: ThreadId, sink: Box<dyn PostSink>) {
        let _ = self.tx.send(Request::Subscribe { thread, sink }).await;
    }

    /// Renders a fresh copy of a thread's full page, bypassing the page
    /// cache — the caller (typically [`crate::cache::PageCache::get`]'s
    /// stale path) is the one that will populate it.
    pub async fn render(&self, thread: ThreadId) -> Bytes {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Request::Render { thread, reply }).await.is_err() {
            return Bytes::new();
        }
        rx.await.unwrap_or_default()
    }
}

/// Spawns the sequencer task, handing it sole ownership of `hive`. Returns a
/// cloneable handle plus the task's join handle, which yields the hive back
/// once the last handle is dropped and the channel closes, for a final
/// durable flush at shutdown.
pub fn spawn(mut hive: Hive, capacity: usize) -> (SequencerHandle, JoinHandle<Hive>) {
    let (tx, mut rx) = mpsc::channel(capacity.max(1));

    let join = tokio::spawn(async move {
        while let Some(request) = rx.recv().await {
            match request {
                Request::Command(f) => f(&mut hive),
                Request::Subscribe { thread, sink } => hive.subscribe(thread, sink),
                Request::Render { thread, reply } => {
                    let bytes = hive.render_thread_page(&thread);
                    let _ = reply.send(bytes);
                },
            }
        }
        hive
    });

    (SequencerHandle { tx }, join)
}
