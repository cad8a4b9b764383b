//! Posts and post references.

use std::collections::HashMap;
use std::time::SystemTime;

use crate::config::Role;
use crate::ids::{PostGid, PostLid, ThreadId};
use crate::types::han::Han;
use crate::types::media::MediaEntry;

/// A reference to a post, as handed back from admission or stored in a
/// reply's back-reference list.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PostRef {
    pub global: PostGid,
    pub local: PostLid,
    pub thread: ThreadId,
}

#[derive(Clone, Debug)]
pub struct Report {
    pub submitter_addr: String,
    pub time: SystemTime,
}

/// Role carried by a staff member at the moment a post was made, captured
/// by value so authorship display survives role changes later.
#[derive(Clone, Debug, Default)]
pub struct PostRole {
    pub name: String,
    pub role: Option<Role>,
}

#[derive(Clone, Debug)]
pub struct Post {
    pub comment: String,
    pub user_addr: String,
    pub media_name: String,
    pub media: Option<MediaEntry>,

    pub escaped_comment: String,
    pub escaped_media_name: String,

    pub global_id: PostGid,
    pub local_id: PostLid,
    pub reply_to: PostLid,
    pub time: SystemTime,
    pub parent_thread: ThreadId,
    pub han: Han,
    pub replies: Vec<PostRef>,
    /// Tag labels, populated only on the OP post of a thread.
    pub tags: Vec<String>,
    pub desired_user_id: u64,

    pub op: bool,
    pub recovered: bool,
    pub hidden: bool,
    pub role: PostRole,
    pub show_role: bool,
    pub report_history: HashMap<ThreadId, Vec<Report>>,
    pub reported_by: HashMap<String, ()>,
    pub no_dump: bool,
}

impl Post {
    /// A new, not-yet-admitted post draft. Admission (via `Hive::add_post`)
    /// fills in `global_id`, `local_id`, `han`, timestamps and escaped
    /// fields.
    pub fn draft(user_addr: impl Into<String>, comment: impl Into<String>) -> Self {
        Post {
            comment: comment.into(),
            user_addr: user_addr.into(),
            media_name: String::new(),
            media: None,
            escaped_comment: String::new(),
            escaped_media_name: String::new(),
            global_id: PostGid(0),
            local_id: PostLid::NONE,
            reply_to: PostLid::NONE,
            time: SystemTime::UNIX_EPOCH,
            parent_thread: ThreadId::from(""),
            han: Han::op(),
            replies: Vec::new(),
            tags: Vec::new(),
            desired_user_id: 0,
            op: false,
            recovered: false,
            hidden: false,
            role: PostRole::default(),
            show_role: false,
            report_history: HashMap::new(),
            reported_by: HashMap::new(),
            no_dump: false,
        }
    }
}
