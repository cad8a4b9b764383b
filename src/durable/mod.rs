//! Write-behind durable store.
//!
//! Four bounded queues (threads/posts/media/bans) buffer rows between the
//! sequencer's admission path and disk; a timer-driven flush drains whatever
//! is queued into one transaction per table, in the fixed order
//! threads → media → posts → bans, matching the original's `dumpThreads`,
//! `dumpMedia`, `dumpPosts`, `dumpBans` call order. Recovery on startup runs
//! media first (the hive's posts reference media by hash), then threads,
//! then posts replayed through the same admission path with `recovered` set
//! so counters and thread summaries come out identical to a live run.
//!
//! `rusqlite` is synchronous; all methods here are too, and are meant to be
//! invoked via `tokio::task::spawn_blocking` from async call sites, the same
//! split used for [`crate::library::MediaLibrary`].

use std::path::Path;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{params, Connection};

use crate::config::{BanReason, Database as DatabaseConfig};
use crate::ids::{PostGid, PostLid, ThreadId};
use crate::types::media::{MediaEntry, MediaType};
use crate::users::Ban;

fn unix(t: SystemTime) -> i64 {
    t.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}

fn from_unix(secs: i64) -> SystemTime {
    UNIX_EPOCH + std::time::Duration::from_secs(secs.max(0) as u64)
}

#[derive(Clone, Debug)]
pub struct ThreadRecord {
    pub id: ThreadId,
    pub random_mark: u32,
    pub updated: SystemTime,
    pub tags: Vec<String>,
    pub sticky_tags: Vec<String>,
    pub locked: bool,
    pub hidden: bool,
}

#[derive(Clone, Debug)]
pub struct PostRecord {
    pub comment: String,
    pub user_addr: String,
    pub media_hash: Option<String>,
    pub media_name: String,
    pub global_id: PostGid,
    pub local_id: PostLid,
    pub reply_to: PostLid,
    pub time: SystemTime,
    pub parent_thread: ThreadId,
    pub hidden: bool,
    pub authority: String,
}

#[derive(Clone, Debug)]
pub struct MediaRecord {
    pub hash: String,
    pub thumb: Vec<u8>,
    pub media_type: MediaType,
    pub info: String,
    pub size: u64,
    pub ban_reason: Option<String>,
}

pub struct RecoveredThread {
    pub record: ThreadRecord,
}

pub struct RecoveredPost {
    pub record: PostRecord,
}

/// Holds the connection and in-memory queues. Queue capacity is bounded per
/// configuration; a row enqueued while its queue is already full evicts the
/// oldest queued row of the same kind rather than growing unboundedly — the
/// evicted row is lost only until the next flush, which runs often enough in
/// practice that this is a capacity safety valve, not a routine path.
pub struct DurableStore {
    conn: Mutex<Connection>,
    threads: Mutex<Vec<ThreadRecord>>,
    posts: Mutex<Vec<PostRecord>>,
    media: Mutex<Vec<MediaRecord>>,
    bans: Mutex<Vec<Ban>>,
    thread_queue_size: usize,
    post_queue_size: usize,
    media_queue_size: usize,
    ban_queue_size: usize,
}

impl DurableStore {
    pub fn open(path: impl AsRef<Path>, cfg: &DatabaseConfig) -> rusqlite::Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        create_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            threads: Mutex::new(Vec::new()),
            posts: Mutex::new(Vec::new()),
            media: Mutex::new(Vec::new()),
            bans: Mutex::new(Vec::new()),
            thread_queue_size: cfg.thread_queue_size.max(1),
            post_queue_size: cfg.post_queue_size.max(1),
            media_queue_size: cfg.media_queue_size.max(1),
            ban_queue_size: cfg.ban_queue_size.max(1),
        })
    }

    /// Enqueues a thread row for the next flush. A `no_dump` thread (report
    /// queues, the lock notice) should never reach here; enforced by the
    /// caller, not this layer.
    pub fn enqueue_thread(&self, record: ThreadRecord) {
        let mut q = self.threads.lock().unwrap();
        if q.len() >= self.thread_queue_size {
            q.remove(0);
        }
        q.push(record);
    }

    pub fn enqueue_post(&self, record: PostRecord) {
        let mut q = self.posts.lock().unwrap();
        if q.len() >= self.post_queue_size {
            q.remove(0);
        }
        q.push(record);
    }

    pub fn enqueue_media(&self, record: MediaRecord) {
        let mut q = self.media.lock().unwrap();
        if q.len() >= self.media_queue_size {
            q.remove(0);
        }
        q.push(record);
    }

    pub fn enqueue_ban(&self, ban: Ban) {
        let mut q = self.bans.lock().unwrap();
        if q.len() >= self.ban_queue_size {
            q.remove(0);
        }
        q.push(ban);
    }

    /// Drains every queue into one transaction, in table order
    /// threads → media → posts → bans. Called on a timer and once more at
    /// shutdown for a final flush.
    pub fn flush(&self) -> rusqlite::Result<()> {
        let threads = std::mem::take(&mut *self.threads.lock().unwrap());
        let media = std::mem::take(&mut *self.media.lock().unwrap());
        let posts = std::mem::take(&mut *self.posts.lock().unwrap());
        let bans = std::mem::take(&mut *self.bans.lock().unwrap());

        if threads.is_empty() && media.is_empty() && posts.is_empty() && bans.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        for t in &threads {
            // Plain UPSERT, not INSERT OR REPLACE: the latter deletes the
            // conflicting row first, which would cascade-delete every post
            // under this thread via the `parent_thread` foreign key.
            tx.execute(
                "INSERT INTO threads
                 (id, random_mark, updated, tags, sticky_tags, locked, hidden)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(id) DO UPDATE SET
                    updated = excluded.updated,
                    tags = excluded.tags,
                    sticky_tags = excluded.sticky_tags,
                    locked = excluded.locked,
                    hidden = excluded.hidden",
                params![
                    t.id.as_str(),
                    t.random_mark,
                    unix(t.updated),
                    t.tags.join(" "),
                    t.sticky_tags.join(" "),
                    t.locked,
                    t.hidden,
                ],
            )?;
        }

        for m in &media {
            // Same UPSERT reasoning as threads: a delete-then-insert would
            // briefly violate the `posts.media` foreign key for any post
            // already referencing this hash.
            tx.execute(
                "INSERT INTO media (hash, thumb, type, info, size, ban_reason)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(hash) DO UPDATE SET
                    thumb = excluded.thumb,
                    info = excluded.info,
                    size = excluded.size,
                    ban_reason = excluded.ban_reason",
                params![
                    m.hash,
                    m.thumb,
                    m.media_type.as_str(),
                    m.info,
                    m.size as i64,
                    m.ban_reason.clone().unwrap_or_default(),
                ],
            )?;
        }

        for p in &posts {
            tx.execute(
                "INSERT INTO posts
                 (comment, user_addr, media, media_name, global_id, local_id, reply_to,
                  time, parent_thread, hidden, authority)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    p.comment,
                    p.user_addr,
                    p.media_hash,
                    p.media_name,
                    p.global_id.0 as i64,
                    p.local_id.0 as i64,
                    p.reply_to.0 as i64,
                    unix(p.time),
                    p.parent_thread.as_str(),
                    p.hidden,
                    p.authority,
                ],
            )?;
        }

        for b in &bans {
            tx.execute(
                "INSERT INTO bans (user_addr, reason, description, start_time, end_time)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    b.addr,
                    b.reason.name,
                    b.reason.description,
                    unix(b.start),
                    unix(b.end),
                ],
            )?;
        }

        tx.commit()
    }

    /// Deletes a thread row immediately (not via the write-behind queue):
    /// thread deletion is a rare admin/prune action, not a hot-path write,
    /// and the foreign key cascade on `parent_thread` takes its posts with
    /// it in the same statement.
    pub fn delete_thread_now(&self, id: &ThreadId) -> rusqlite::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM threads WHERE id = ?1", params![id.as_str()])?;
        Ok(())
    }

    pub fn recover_media(&self, banreasons: &std::collections::HashMap<String, BanReason>) -> rusqlite::Result<Vec<MediaEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT hash, thumb, type, info, size, ban_reason FROM media;")?;

        let rows = stmt.query_map([], |row| {
            let media_type: String = row.get(2)?;
            let ban_reason: String = row.get(5)?;
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Vec<u8>>(1)?,
                media_type,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)? as u64,
                ban_reason,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (hash, thumb, media_type, info, size, ban_reason) = row?;
            let media_type = match media_type.as_str() {
                "video" => MediaType::Video,
                "audio" => MediaType::Audio,
                _ => MediaType::Image,
            };

            let blocked_reason = if ban_reason.is_empty() {
                None
            } else {
                Some(banreasons.get(&ban_reason).map(|r| r.name.clone()).unwrap_or(ban_reason))
            };

            out.push(MediaEntry {
                hash,
                media_type,
                info,
                size,
                thumb,
                full: None,
                ref_count: 0,
                blocked_reason,
            });
        }

        Ok(out)
    }

    pub fn recover_threads(&self) -> rusqlite::Result<Vec<RecoveredThread>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, random_mark, updated, tags, sticky_tags, locked, hidden
             FROM threads ORDER BY rowid ASC;",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(ThreadRecord {
                id: ThreadId::from(row.get::<_, String>(0)?),
                random_mark: row.get(1)?,
                updated: from_unix(row.get(2)?),
                tags: row.get::<_, String>(3)?.split_whitespace().map(String::from).collect(),
                sticky_tags: row.get::<_, String>(4)?.split_whitespace().map(String::from).collect(),
                locked: row.get(5)?,
                hidden: row.get(6)?,
            })
        })?;

        rows.map(|r| r.map(|record| RecoveredThread { record })).collect()
    }

    pub fn recover_posts(&self) -> rusqlite::Result<Vec<RecoveredPost>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT comment, user_addr, media, media_name, global_id, local_id, reply_to,
                    time, parent_thread, hidden, authority FROM posts ORDER BY id ASC;",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(PostRecord {
                comment: row.get(0)?,
                user_addr: row.get(1)?,
                media_hash: row.get(2)?,
                media_name: row.get(3)?,
                global_id: PostGid(row.get::<_, i64>(4)? as u64),
                local_id: PostLid(row.get::<_, i64>(5)? as u64),
                reply_to: PostLid(row.get::<_, i64>(6)? as u64),
                time: from_unix(row.get(7)?),
                parent_thread: ThreadId::from(row.get::<_, String>(8)?),
                hidden: row.get(9)?,
                authority: row.get(10)?,
            })
        })?;

        rows.map(|r| r.map(|record| RecoveredPost { record })).collect()
    }

    pub fn recover_bans(&self) -> rusqlite::Result<Vec<Ban>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT user_addr, reason, description, start_time, end_time FROM bans;",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(Ban {
                addr: row.get(0)?,
                reason: BanReason {
                    name: row.get(1)?,
                    description: row.get(2)?,
                    length: 0,
                },
                start: from_unix(row.get(3)?),
                end: from_unix(row.get(4)?),
            })
        })?;

        rows.collect()
    }
}

fn create_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS threads(
            id              TEXT PRIMARY KEY,
            random_mark     INTEGER NOT NULL,
            updated         INTEGER NOT NULL,
            tags            TEXT NOT NULL,
            sticky_tags     TEXT NOT NULL,
            locked          INTEGER NOT NULL,
            hidden          INTEGER NOT NULL);

        CREATE TABLE IF NOT EXISTS posts(
            id              INTEGER PRIMARY KEY,
            comment         TEXT NOT NULL,
            user_addr       TEXT NOT NULL,
            media           TEXT REFERENCES media(hash),
            media_name      TEXT NOT NULL,
            global_id       INTEGER NOT NULL,
            local_id        INTEGER NOT NULL,
            reply_to        INTEGER NOT NULL,
            time            INTEGER NOT NULL,
            parent_thread   TEXT REFERENCES threads(id) ON DELETE CASCADE,
            hidden          INTEGER NOT NULL,
            authority       TEXT NOT NULL);

        CREATE TABLE IF NOT EXISTS media(
            hash            TEXT PRIMARY KEY,
            thumb           BLOB NOT NULL,
            type            TEXT NOT NULL,
            info            TEXT NOT NULL,
            size            INTEGER NOT NULL,
            ban_reason      TEXT NOT NULL);

        CREATE TABLE IF NOT EXISTS bans(
            id              INTEGER PRIMARY KEY,
            user_addr       TEXT NOT NULL,
            reason          TEXT NOT NULL,
            description     TEXT NOT NULL,
            start_time      INTEGER NOT NULL,
            end_time        INTEGER NOT NULL);",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> DatabaseConfig {
        DatabaseConfig {
            name: String::new(),
            dump_interval: crate::config::DurationSetting(std::time::Duration::from_secs(5)),
            ban_queue_size: 10,
            post_queue_size: 10,
            thread_queue_size: 10,
            media_queue_size: 10,
        }
    }

    #[test]
    fn flush_then_recover_round_trips_a_thread() {
        let store = DurableStore::open(":memory:", &cfg()).unwrap();
        store.enqueue_thread(ThreadRecord {
            id: ThreadId::from("abc"),
            random_mark: 7,
            updated: SystemTime::now(),
            tags: vec!["general".to_owned()],
            sticky_tags: vec![],
            locked: false,
            hidden: false,
        });
        store.flush().unwrap();

        let recovered = store.recover_threads().unwrap();
        assert_eq!(recovered.len(), 1);
        assert_eq!(recovered[0].record.id.as_str(), "abc");
        assert_eq!(recovered[0].record.tags, vec!["general".to_owned()]);
    }

    #[test]
    fn empty_flush_is_a_no_op() {
        let store = DurableStore::open(":memory:", &cfg()).unwrap();
        store.flush().unwrap();
        assert!(store.recover_threads().unwrap().is_empty());
    }
}
