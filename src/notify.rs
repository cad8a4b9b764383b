//! Staff notification on urgent events (illegal-content reports).
//!
//! SMTP delivery itself is out of scope; what's needed is the seam the hive
//! calls into on the first illegal-content report against a post, firing
//! once per post rather than once per report. The only implementation here
//! is a logging no-op, the same role `PostSink` plays for the (out of scope)
//! websocket layer.

use tracing::info;

use crate::ids::{PostGid, ThreadId};

pub trait Notifier: Send + Sync {
    fn notify_illegal_report(&self, post: PostGid, thread: &ThreadId);
}

#[derive(Default)]
pub struct LoggingNotifier;

impl Notifier for LoggingNotifier {
    fn notify_illegal_report(&self, post: PostGid, thread: &ThreadId) {
        info!(%post, %thread, "illegal content reported");
    }
}
