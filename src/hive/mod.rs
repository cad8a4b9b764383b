//! The hive: all in-memory board state, owned exclusively by the sequencer
//! task and mutated only through `&mut self` methods on this type.
//!
//! Everything that isn't the content-addressed media store or the per-IP
//! user registry lives here — threads, tags, the global post index, the
//! anti-spam form generations, and the synthetic report-queue threads.
//! `Hive` itself never spawns a task or holds a lock; all concurrency safety
//! comes from [`crate::sequencer`] only ever calling these methods from its
//! single executor loop.

pub mod markup;
pub mod query;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::antispam::{self, FieldNames, IndexForms};
use crate::broadcaster::{Broadcaster, PostSink};
use crate::cache::SharedPageCache;
use crate::config::{Role, Settings, WordFilter};
use crate::durable::{DurableStore, PostRecord, RecoveredPost, RecoveredThread, ThreadRecord};
use crate::error::{AdmitError, AdmitResult};
use crate::ids::{PostGid, PostLid, ThreadId};
use crate::library::MediaLibrary;
use crate::notify::Notifier;
use crate::render::Renderer;
use crate::types::post::{Post, PostRef, PostRole, Report};
use crate::types::tag::{self, Tag};
use crate::types::thread::Thread;
use crate::users::{Ban, UserRegistry};

use query::{run_query, sticky_threads, ParsedQuery, QueryResult};

#[derive(Clone)]
struct ReportQueues {
    aggregate: ThreadId,
    illegal: ThreadId,
    rule: ThreadId,
}

pub struct Hive {
    config: Arc<Settings>,
    word_filters: Vec<WordFilter>,

    durable: Arc<DurableStore>,
    media: Arc<MediaLibrary>,
    users: Arc<UserRegistry>,
    cache: SharedPageCache,
    renderer: Arc<dyn Renderer>,
    notifier: Arc<dyn Notifier>,

    threads: HashMap<ThreadId, Thread>,
    tags: HashMap<String, Tag>,
    posts: HashMap<PostGid, (ThreadId, PostLid)>,
    thread_counter: u64,
    post_counter: u64,
    autocomplete: Vec<u8>,

    broadcaster: Broadcaster,
    index_forms: IndexForms,
    thread_forms: HashMap<ThreadId, FieldNames>,
    report_queues: Option<ReportQueues>,

    rng: StdRng,
}

impl Hive {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<Settings>,
        word_filters: Vec<WordFilter>,
        durable: Arc<DurableStore>,
        media: Arc<MediaLibrary>,
        users: Arc<UserRegistry>,
        cache: SharedPageCache,
        renderer: Arc<dyn Renderer>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let mut rng = StdRng::from_entropy();
        let index_forms = IndexForms::new(&config.spamtrap, &mut rng);

        Self {
            config,
            word_filters,
            durable,
            media,
            users,
            cache,
            renderer,
            notifier,
            threads: HashMap::new(),
            tags: HashMap::new(),
            posts: HashMap::new(),
            thread_counter: 0,
            post_counter: 0,
            autocomplete: Vec::new(),
            broadcaster: Broadcaster::new(),
            index_forms,
            thread_forms: HashMap::new(),
            report_queues: None,
            rng,
        }
    }

    pub fn config(&self) -> &Arc<Settings> {
        &self.config
    }

    /// Regenerates the index-page anti-spam form if its lifetime has
    /// elapsed. Meant to be called periodically (e.g. by a timer task
    /// submitting `sequencer.submit(|hive| hive.tick())`).
    pub fn tick(&mut self) {
        let lifetime = self.config.spamtrap.thread_form_lifetime.0;
        self.index_forms.refresh(&self.config.spamtrap, lifetime, &mut self.rng);
    }

    pub fn index_form(&self) -> &FieldNames {
        self.index_forms.current()
    }

    pub fn thread_form(&self, id: &ThreadId) -> Option<&FieldNames> {
        self.thread_forms.get(id)
    }

    // ---- admission -----------------------------------------------------

    /// Admits `p`. If `p.op` is set, a new thread is derived from its tags
    /// first. Returns a reference to the stored post on success.
    pub fn add_post(&mut self, mut p: Post) -> AdmitResult<PostRef> {
        if p.op {
            self.prepare_thread_for_op(&mut p)?;
        }

        let thread_id = p.parent_thread.clone();
        {
            let thread = self.threads.get(&thread_id).ok_or(AdmitError::ThreadNotExist)?;
            let role_permits_locked = p.role.role.as_ref().is_some_and(|r| r.post_in_locked_thread);
            if thread.locked && !p.recovered && !role_permits_locked {
                return Err(AdmitError::ThreadLocked);
            }
        }

        let comment_chars = p.comment.chars().count();
        let newline_count = p.comment.matches('\n').count();
        if comment_chars > self.config.limit.comment_length
            || newline_count > self.config.limit.newlines_per_post
        {
            return Err(AdmitError::CommentTooLong);
        }

        for filter in &self.word_filters {
            if filter.regexp.is_match(&p.comment) {
                let reason = self
                    .config
                    .banreasons
                    .get(&filter.ban)
                    .unwrap_or_else(|| panic!("word filter references unknown ban reason {:?}", filter.ban));
                let ban = self.users.issue_ban(&self.config, &p.user_addr, reason.clone());
                self.durable.enqueue_ban(ban);
                return Err(AdmitError::WordFilterBlocked);
            }
        }

        if !p.show_role {
            p.role = PostRole::default();
        }

        if p.recovered {
            self.post_counter = self.post_counter.max(p.global_id.0);
        } else {
            self.post_counter += 1;
            p.global_id = PostGid(self.post_counter);
        }

        p.escaped_comment = markup::escape(&p.comment);
        p.escaped_media_name = markup::escape(&p.media_name);

        if let Some(media) = &p.media {
            self.media.inc_ref(&media.hash);
        }

        let recovered = p.recovered;
        let no_dump = p.no_dump;
        let comment = p.comment.clone();
        let user_addr = p.user_addr.clone();
        let media_hash = p.media.as_ref().map(|m| m.hash.clone());
        let media_name = p.media_name.clone();
        let reply_to = p.reply_to;
        let global_id = p.global_id;
        let authority = p.role.name.clone();

        let local_id = self
            .threads
            .get_mut(&thread_id)
            .expect("checked above")
            .add_post(p, &mut self.rng);

        let (post_time, post_hidden, thread_hidden) = {
            let thread = self.threads.get_mut(&thread_id).unwrap();
            let snapshot = thread.post_by_local_id(local_id).expect("just inserted").clone();

            let post_bytes = self.renderer.render_post(thread, &snapshot);
            let cat_bytes = self.renderer.render_catalog_row(thread);
            let sum_bytes = self.renderer.render_summary_row(thread);
            thread.cat_bytes = cat_bytes.to_vec();
            thread.sum_bytes = sum_bytes.to_vec();

            if !recovered {
                self.broadcaster.broadcast(&thread_id, post_bytes);
            }

            (snapshot.time, snapshot.hidden, thread.hidden)
        };

        self.cache.set_stale(&thread_id, thread_hidden);

        let bump_labels: Vec<String> =
            self.threads.get(&thread_id).map(|t| t.tags.clone()).unwrap_or_default();
        for label in &bump_labels {
            if let Some(tag) = self.tags.get_mut(label) {
                tag.normal.bump(&thread_id);
            }
        }

        if !recovered && !no_dump {
            self.durable.enqueue_post(PostRecord {
                comment,
                user_addr,
                media_hash,
                media_name,
                global_id,
                local_id,
                reply_to,
                time: post_time,
                parent_thread: thread_id.clone(),
                hidden: post_hidden,
                authority,
            });
        }

        let post_count = self.threads.get(&thread_id).map(|t| t.count.posts).unwrap_or(0);
        let already_locked = self.threads.get(&thread_id).map(|t| t.locked).unwrap_or(true);
        if !recovered && !already_locked && post_count >= self.config.limit.posts_per_thread as u64 {
            self.lock_with_notice(&thread_id);
        }

        self.posts.insert(global_id, (thread_id.clone(), local_id));

        // The returned reference's global component is always zero, matching
        // the admission pipeline's reply back-references (`bind_reply`) —
        // callers that need the real global id look it up via `self.posts`.
        Ok(PostRef { global: PostGid(0), local: local_id, thread: thread_id })
    }

    fn prepare_thread_for_op(&mut self, p: &mut Post) -> AdmitResult<()> {
        let mut tags: Vec<String> = p.tags.iter().map(|t| t.to_lowercase()).collect();
        tags.sort();
        tags.dedup();

        if tags.is_empty() {
            return Err(AdmitError::NoTags);
        }
        if tags.len() > self.config.limit.tags_per_thread {
            return Err(AdmitError::TooManyTags);
        }

        let role_permits_system = p.role.role.as_ref().is_some_and(|r| r.post_system_threads);
        for t in &tags {
            if t.chars().count() > self.config.limit.tag_length {
                return Err(AdmitError::TagTooLong);
            }
            if !tag::is_user_postable(t) && !role_permits_system {
                return Err(AdmitError::ProhibitedTags);
            }
        }

        tags.push(tag::ALL_TAG.to_owned());
        tags.sort();
        tags.dedup();

        let thread_id = ThreadId::from_counter(self.thread_counter);
        self.thread_counter += 1;

        let mut thread = Thread::new(thread_id.clone(), &mut self.rng);
        thread.tags = tags.clone();
        self.threads.insert(thread_id.clone(), thread);

        for label in &tags {
            self.tags.entry(label.clone()).or_insert_with(|| Tag::new(label.clone())).normal.add(&thread_id);
        }

        if !p.recovered {
            self.thread_forms.insert(
                thread_id.clone(),
                antispam::generate_thread_form(&self.config.spamtrap, &mut self.rng).real,
            );
        }

        self.refresh_autocomplete();
        p.parent_thread = thread_id.clone();

        self.enqueue_thread_update(&thread_id);
        self.prune_if_over_cap();
        Ok(())
    }

    /// Locks a thread and appends a synthetic system post announcing why, on
    /// reaching the configured reply cap.
    fn lock_with_notice(&mut self, thread_id: &ThreadId) {
        let hidden = {
            let Some(thread) = self.threads.get_mut(thread_id) else { return };
            thread.locked = true;

            let mut notice = Post::draft("", "Reply limit reached. Thread locked.");
            notice.parent_thread = thread_id.clone();
            notice.no_dump = true;
            notice.time = std::time::SystemTime::now();
            notice.escaped_comment = markup::escape(&notice.comment);
            thread.add_system_post(notice);
            thread.hidden
        };
        self.cache.set_stale(thread_id, hidden);
        self.enqueue_thread_update(thread_id);
    }

    /// Drops threads over the configured cap, oldest (least recently
    /// bumped) first, as named by the `!!_all` tag's normal list.
    fn prune_if_over_cap(&mut self) {
        let cap = self.config.limit.threads;
        if cap == 0 {
            return;
        }

        loop {
            let Some(all_tag) = self.tags.get(tag::ALL_TAG) else { break };
            if all_tag.normal.len() <= cap {
                break;
            }
            let Some(victim) = all_tag.normal.back().cloned() else { break };
            self.remove_thread(&victim);
        }
    }

    fn remove_thread(&mut self, id: &ThreadId) {
        let Some(thread) = self.threads.remove(id) else { return };

        for label in thread.tags.iter().chain(thread.sticky_tags.iter()) {
            if let Some(tag) = self.tags.get_mut(label) {
                tag.normal.remove(id);
                tag.sticky.remove(id);
            }
        }

        for post in thread.posts() {
            self.posts.remove(&post.global_id);
        }

        self.thread_forms.remove(id);
        self.broadcaster.purge(id);
        self.cache.purge(id);
        let _ = self.durable.delete_thread_now(id);
    }

    fn enqueue_thread_update(&self, id: &ThreadId) {
        if let Some(record) = self.thread_record(id) {
            self.durable.enqueue_thread(record);
        }
    }

    fn thread_record(&self, id: &ThreadId) -> Option<ThreadRecord> {
        let thread = self.threads.get(id)?;
        if thread.no_dump {
            return None;
        }
        Some(ThreadRecord {
            id: thread.id.clone(),
            random_mark: thread.random_mark,
            updated: thread.updated,
            tags: thread.tags.clone(),
            sticky_tags: thread.sticky_tags.clone(),
            locked: thread.locked,
            hidden: thread.hidden,
        })
    }

    // ---- reports ---------------------------------------------------------

    /// Records a report of `gid` by `reporter_addr`, appending it to the
    /// aggregate queue and, depending on `reason`, the rule or illegal
    /// queue. The first illegal report against a post notifies staff; once a
    /// post accumulates the configured auto-delete threshold of reporters it
    /// is hidden.
    pub fn report_post(&mut self, gid: PostGid, reason: &str, reporter_addr: &str) -> AdmitResult<()> {
        let (thread_id, local_id) = self.posts.get(&gid).cloned().ok_or(AdmitError::PostNotExist)?;

        let already_reported = self
            .threads
            .get(&thread_id)
            .and_then(|t| t.post_by_local_id(local_id))
            .map(|p| p.reported_by.contains_key(reporter_addr))
            .ok_or(AdmitError::PostNotExist)?;
        if already_reported {
            return Err(AdmitError::AlreadyReported);
        }

        let queues = self.report_queues.clone().expect("report queues installed before any admission");
        self.append_to_queue(&queues.aggregate, &thread_id, local_id, reporter_addr);

        match reason {
            "rule_violation" => {
                self.append_to_queue(&queues.rule, &thread_id, local_id, reporter_addr);
            },
            "illegal" => {
                let was_first = self
                    .threads
                    .get(&thread_id)
                    .and_then(|t| t.post_by_local_id(local_id))
                    .map(|p| !p.report_history.contains_key(&queues.illegal))
                    .unwrap_or(false);
                self.append_to_queue(&queues.illegal, &thread_id, local_id, reporter_addr);
                if was_first {
                    self.notifier.notify_illegal_report(gid, &thread_id);
                }
            },
            _ => {},
        }

        let hidden_thread = {
            let thread = self.threads.get_mut(&thread_id).ok_or(AdmitError::PostNotExist)?;
            let post = thread.post_by_local_id_mut(local_id).ok_or(AdmitError::PostNotExist)?;
            post.reported_by.insert(reporter_addr.to_owned(), ());
            if post.reported_by.len() as u32 >= self.config.general.auto_delete_threshold {
                post.hidden = true;
            }
            thread.hidden
        };
        self.cache.set_stale(&thread_id, hidden_thread);
        Ok(())
    }

    fn append_to_queue(&mut self, queue: &ThreadId, thread_id: &ThreadId, local_id: PostLid, reporter_addr: &str) {
        if let Some(thread) = self.threads.get_mut(thread_id) {
            if let Some(post) = thread.post_by_local_id_mut(local_id) {
                post.report_history.entry(queue.clone()).or_default().push(Report {
                    submitter_addr: reporter_addr.to_owned(),
                    time: std::time::SystemTime::now(),
                });
            }
        }
    }

    fn insert_report_queue(&mut self, key: &str) -> ThreadId {
        let id = ThreadId::from(format!("queue-{key}"));
        let mut thread = Thread::new(id.clone(), &mut self.rng);
        let label = format!("{}{key}_queue", tag::ADMIN_TAG_PREFIX);
        thread.tags = vec![label.clone()];
        thread.hidden = true;
        thread.no_dump = true;
        self.tags.entry(label.clone()).or_insert_with(|| Tag::new(label)).normal.add(&id);
        self.threads.insert(id.clone(), thread);
        id
    }

    /// Creates the three synthetic report-queue threads. Idempotent only in
    /// the sense that it's meant to run exactly once, right after recovery.
    fn install_report_queues(&mut self) {
        let aggregate = self.insert_report_queue("aggregate");
        let illegal = self.insert_report_queue("illegal");
        let rule = self.insert_report_queue("rule");
        self.report_queues = Some(ReportQueues { aggregate, illegal, rule });
    }

    // ---- admin actions -----------------------------------------------------

    pub fn lock_thread(&mut self, id: &ThreadId, role: Option<&Role>) -> AdmitResult<()> {
        if !role.is_some_and(|r| r.lock_thread) {
            return Err(AdmitError::Unauthorized);
        }
        let hidden = {
            let thread = self.threads.get_mut(id).ok_or(AdmitError::ThreadNotExist)?;
            thread.locked = true;
            thread.hidden
        };
        self.cache.set_stale(id, hidden);
        self.enqueue_thread_update(id);
        Ok(())
    }

    pub fn unlock_thread(&mut self, id: &ThreadId, role: Option<&Role>) -> AdmitResult<()> {
        if !role.is_some_and(|r| r.lock_thread) {
            return Err(AdmitError::Unauthorized);
        }
        let hidden = {
            let thread = self.threads.get_mut(id).ok_or(AdmitError::ThreadNotExist)?;
            thread.locked = false;
            thread.hidden
        };
        self.cache.set_stale(id, hidden);
        self.enqueue_thread_update(id);
        Ok(())
    }

    pub fn sticky_thread(&mut self, id: &ThreadId, label: &str, role: Option<&Role>) -> AdmitResult<()> {
        if !role.is_some_and(|r| r.sticky_thread) {
            return Err(AdmitError::Unauthorized);
        }
        let thread = self.threads.get_mut(id).ok_or(AdmitError::ThreadNotExist)?;
        if !thread.tags.iter().any(|t| t == label) {
            return Err(AdmitError::ThreadNotExist);
        }
        thread.set_sticky(label);
        if let Some(tag) = self.tags.get_mut(label) {
            tag.sticky_thread(id);
        }
        self.enqueue_thread_update(id);
        Ok(())
    }

    pub fn unsticky_thread(&mut self, id: &ThreadId, label: &str, role: Option<&Role>) -> AdmitResult<()> {
        if !role.is_some_and(|r| r.sticky_thread) {
            return Err(AdmitError::Unauthorized);
        }
        let thread = self.threads.get_mut(id).ok_or(AdmitError::ThreadNotExist)?;
        if !thread.sticky_tags.iter().any(|t| t == label) {
            return Err(AdmitError::ThreadNotExist);
        }
        thread.set_unsticky(label);
        if let Some(tag) = self.tags.get_mut(label) {
            tag.unsticky_thread(id);
        }
        self.enqueue_thread_update(id);
        Ok(())
    }

    pub fn delete_thread(&mut self, id: &ThreadId, role: Option<&Role>) -> AdmitResult<()> {
        if !role.is_some_and(|r| r.delete_thread) {
            return Err(AdmitError::Unauthorized);
        }
        if !self.threads.contains_key(id) {
            return Err(AdmitError::ThreadNotExist);
        }
        self.remove_thread(id);
        Ok(())
    }

    pub fn hide_post(&mut self, gid: PostGid, role: Option<&Role>) -> AdmitResult<()> {
        if !role.is_some_and(|r| r.delete_post) {
            return Err(AdmitError::Unauthorized);
        }
        let (thread_id, local_id) = self.posts.get(&gid).cloned().ok_or(AdmitError::PostNotExist)?;
        let hidden_thread = {
            let thread = self.threads.get_mut(&thread_id).ok_or(AdmitError::PostNotExist)?;
            let post = thread.post_by_local_id_mut(local_id).ok_or(AdmitError::PostNotExist)?;
            post.hidden = true;
            thread.hidden
        };
        self.cache.set_stale(&thread_id, hidden_thread);
        Ok(())
    }

    // ---- queries -----------------------------------------------------------

    /// Runs a boolean tag query, prepending the union of filter/merge tags'
    /// sticky lists on page 0.
    pub fn tag_query(&self, query: &ParsedQuery) -> QueryResult {
        let per_page = self.config.catalog.threads_per_page;
        let result = run_query(&self.tags, &self.threads, query, per_page);
        if query.page != 0 {
            return result;
        }

        let mut seen = HashSet::new();
        let mut merged = Vec::new();
        for tid in
            sticky_threads(&self.tags, &query.filter).into_iter().chain(sticky_threads(&self.tags, &query.merge))
        {
            if seen.insert(tid.clone()) {
                merged.push(tid);
            }
        }
        for tid in result.threads {
            if seen.insert(tid.clone()) {
                merged.push(tid);
            }
        }

        QueryResult { threads: merged, total: result.total }
    }

    pub fn posts_by_addr(&self, addr: &str) -> Vec<PostRef> {
        let mut out = Vec::new();
        for thread in self.threads.values() {
            for post in thread.posts_by_addr(addr) {
                out.push(PostRef { global: post.global_id, local: post.local_id, thread: thread.id.clone() });
            }
        }
        out
    }

    pub fn render_thread_page(&self, id: &ThreadId) -> Bytes {
        match self.threads.get(id) {
            Some(thread) => self.renderer.render_thread_page(thread),
            None => Bytes::new(),
        }
    }

    pub fn subscribe(&mut self, thread: ThreadId, sink: Box<dyn PostSink>) {
        self.broadcaster.subscribe(thread, sink);
    }

    fn refresh_autocomplete(&mut self) {
        let mut labels: Vec<&str> = self
            .tags
            .iter()
            .filter(|(label, t)| tag::is_user_postable(label) && (!t.normal.is_empty() || !t.sticky.is_empty()))
            .map(|(label, _)| label.as_str())
            .collect();
        labels.sort_unstable();
        self.autocomplete = labels.join("\n").into_bytes();
    }

    pub fn autocomplete_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.autocomplete)
    }

    // ---- recovery -----------------------------------------------------------

    /// Replays durable state, reconstructing threads, tags, posts and
    /// indexes in original admission order. Media recovery happens
    /// independently before this call (the hive's posts just reference
    /// already-recovered media by hash). Installs the synthetic
    /// report-queue threads and the autocomplete list once done.
    pub fn recover(
        &mut self,
        recovered_threads: Vec<RecoveredThread>,
        recovered_posts: Vec<RecoveredPost>,
        recovered_bans: Vec<Ban>,
    ) -> anyhow::Result<()> {
        for rt in recovered_threads {
            let r = rt.record;
            if let Some(counter) = r.id.parse_counter() {
                self.thread_counter = self.thread_counter.max(counter + 1);
            }

            let mut thread = Thread::new(r.id.clone(), &mut self.rng);
            thread.random_mark = r.random_mark;
            thread.updated = r.updated;
            thread.tags = r.tags.clone();
            thread.sticky_tags = r.sticky_tags.clone();
            thread.locked = r.locked;
            thread.hidden = r.hidden;

            for label in &r.tags {
                self.tags.entry(label.clone()).or_insert_with(|| Tag::new(label.clone())).normal.add(&r.id);
            }
            for label in &r.sticky_tags {
                self.tags.entry(label.clone()).or_insert_with(|| Tag::new(label.clone())).sticky.add(&r.id);
            }

            self.threads.insert(r.id, thread);
        }

        for rp in recovered_posts {
            let r = rp.record;
            let mut post = Post::draft(r.user_addr, r.comment);
            post.media_name = r.media_name;
            post.media = r.media_hash.as_deref().and_then(|h| self.media.get(h));
            post.global_id = r.global_id;
            post.reply_to = r.reply_to;
            post.time = r.time;
            post.parent_thread = r.parent_thread;
            post.hidden = r.hidden;
            post.recovered = true;
            post.op = false;

            if !r.authority.is_empty() {
                let role = self
                    .config
                    .roles
                    .get(&r.authority)
                    .ok_or_else(|| {
                        anyhow::anyhow!("recovered post references unknown staff role {:?}", r.authority)
                    })?
                    .clone();
                post.show_role = true;
                post.role = PostRole { name: r.authority, role: Some(role) };
            }

            self.add_post(post).map_err(|e| anyhow::anyhow!("recovery replay rejected a stored post: {e}"))?;
        }

        for ban in recovered_bans {
            self.users.recover_ban(&self.config, ban);
        }

        self.install_report_queues();
        self.refresh_autocomplete();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::*;
    use crate::notify::LoggingNotifier;
    use crate::render::PlainRenderer;
    use std::time::Duration;

    fn test_settings() -> Settings {
        Settings {
            general: General { auto_delete_threshold: 2, ..Default::default() },
            catalog: Catalog { threads_per_page: 10, ..Default::default() },
            limit: Limit {
                threads: 2,
                posts_per_thread: 3,
                tags_per_thread: 4,
                comment_length: 500,
                tag_length: 20,
                newlines_per_post: 20,
            },
            admin: Default::default(),
            media: Default::default(),
            image: Default::default(),
            video: Default::default(),
            audio: Default::default(),
            spamtrap: SpamTrap {
                duplicate_fields: 1,
                field_display: vec![1],
                field_hide: vec![2],
                field_prefix: "f_".to_owned(),
                thread_form_lifetime: DurationSetting(Duration::from_secs(3600)),
            },
            notify: Default::default(),
            database: Default::default(),
            staff: HashMap::new(),
            roles: HashMap::new(),
            thresholds: HashMap::new(),
            banreasons: HashMap::new(),
            wordfilters: Vec::new(),
        }
    }

    fn test_hive() -> Hive {
        let cfg = Arc::new(test_settings());
        let durable = Arc::new(DurableStore::open(":memory:", &cfg.database).unwrap());
        let media = Arc::new(MediaLibrary::new(&cfg.media));
        let users = Arc::new(UserRegistry::new());
        let cache: SharedPageCache = Arc::new(crate::cache::PageCache::new());
        Hive::new(
            cfg,
            Vec::new(),
            durable,
            media,
            users,
            cache,
            Arc::new(PlainRenderer),
            Arc::new(LoggingNotifier),
        )
    }

    fn op(tags: &[&str]) -> Post {
        let mut p = Post::draft("1.1.1.1", "hello world");
        p.op = true;
        p.tags = tags.iter().map(|s| s.to_string()).collect();
        p
    }

    /// `add_post` always hands back a zeroed global component (matching the
    /// original's `postRef{0, LocalId, ThreadId}`); tests that need the real
    /// global id (as `/posts_by_user/<gid>`-style callers would have it from
    /// a rendered page) look it up here instead.
    fn global_of(hive: &Hive, r: &PostRef) -> PostGid {
        hive.threads.get(&r.thread).unwrap().post_by_local_id(r.local).unwrap().global_id
    }

    #[test]
    fn op_creates_thread_with_all_tag() {
        let mut hive = test_hive();
        let ref_ = hive.add_post(op(&["general"])).unwrap();
        let thread = hive.threads.get(&ref_.thread).unwrap();
        assert!(thread.tags.contains(&"general".to_owned()));
        assert!(thread.tags.contains(&tag::ALL_TAG.to_owned()));
    }

    #[test]
    fn reply_without_thread_is_rejected() {
        let mut hive = test_hive();
        let mut reply = Post::draft("2.2.2.2", "hi");
        reply.parent_thread = ThreadId::from("nonexistent");
        assert_eq!(hive.add_post(reply), Err(AdmitError::ThreadNotExist));
    }

    #[test]
    fn empty_tag_set_is_rejected() {
        let mut hive = test_hive();
        assert_eq!(hive.add_post(op(&[])), Err(AdmitError::NoTags));
    }

    #[test]
    fn too_many_tags_is_rejected() {
        let mut hive = test_hive();
        assert_eq!(hive.add_post(op(&["a", "b", "c", "d", "e"])), Err(AdmitError::TooManyTags));
    }

    #[test]
    fn reply_locks_thread_at_reply_cap() {
        let mut hive = test_hive();
        let thread_ref = hive.add_post(op(&["general"])).unwrap();

        for _ in 0..2 {
            let mut reply = Post::draft("3.3.3.3", "reply");
            reply.parent_thread = thread_ref.thread.clone();
            hive.add_post(reply).unwrap();
        }

        assert!(hive.threads.get(&thread_ref.thread).unwrap().locked);

        let mut late_reply = Post::draft("4.4.4.4", "too late");
        late_reply.parent_thread = thread_ref.thread.clone();
        assert_eq!(hive.add_post(late_reply), Err(AdmitError::ThreadLocked));
    }

    #[test]
    fn prune_drops_oldest_thread_over_cap() {
        let mut hive = test_hive();
        let first = hive.add_post(op(&["general"])).unwrap().thread;
        hive.add_post(op(&["general"])).unwrap();
        hive.add_post(op(&["general"])).unwrap();

        assert!(!hive.threads.contains_key(&first));
        assert_eq!(hive.threads.len(), 2);
    }

    #[test]
    fn report_to_illegal_queue_notifies_once() {
        let mut hive = test_hive();
        hive.install_report_queues();
        let post_ref = hive.add_post(op(&["general"])).unwrap();
        let gid = global_of(&hive, &post_ref);

        hive.report_post(gid, "illegal", "9.9.9.9").unwrap();
        assert_eq!(hive.report_post(gid, "illegal", "9.9.9.9"), Err(AdmitError::AlreadyReported));
    }

    #[test]
    fn auto_delete_threshold_hides_post() {
        let mut hive = test_hive();
        hive.install_report_queues();
        let post_ref = hive.add_post(op(&["general"])).unwrap();
        let gid = global_of(&hive, &post_ref);

        hive.report_post(gid, "spam", "1.0.0.1").unwrap();
        hive.report_post(gid, "spam", "1.0.0.2").unwrap();

        let thread = hive.threads.get(&post_ref.thread).unwrap();
        assert!(thread.post_by_local_id(post_ref.local).unwrap().hidden);
    }

    #[test]
    fn tag_query_finds_posted_thread() {
        let mut hive = test_hive();
        hive.add_post(op(&["general"])).unwrap();

        let query = ParsedQuery { filter: vec!["general".to_owned()], page: 0, ..Default::default() };
        let result = hive.tag_query(&query);
        assert_eq!(result.threads.len(), 1);
    }

    #[test]
    fn admin_action_requires_role_flag() {
        let mut hive = test_hive();
        let thread_ref = hive.add_post(op(&["general"])).unwrap();
        let weak_role = Role {
            title: "weak".to_owned(),
            marker: String::new(),
            color: String::new(),
            post_with_role: false,
            view_restricted_tags: false,
            see_hidden_threads: false,
            post_in_locked_thread: false,
            post_system_threads: false,
            lock_thread: false,
            sticky_thread: false,
            delete_thread: false,
            delete_post: false,
            ban_user: false,
            block_image: false,
            show_user_posts: false,
            recommend_ban: false,
            receive_notifications: false,
        };
        assert_eq!(
            hive.lock_thread(&thread_ref.thread, Some(&weak_role)),
            Err(AdmitError::Unauthorized)
        );
        assert_eq!(hive.lock_thread(&thread_ref.thread, None), Err(AdmitError::Unauthorized));
    }

    #[test]
    fn recover_reconstructs_thread_counter_and_posts() {
        let mut hive = test_hive();
        let thread_ref = hive.add_post(op(&["general"])).unwrap();
        let mut reply = Post::draft("5.5.5.5", "a reply");
        reply.parent_thread = thread_ref.thread.clone();
        hive.add_post(reply).unwrap();

        let recovered_threads: Vec<RecoveredThread> = hive
            .threads
            .values()
            .map(|t| RecoveredThread {
                record: ThreadRecord {
                    id: t.id.clone(),
                    random_mark: t.random_mark,
                    updated: t.updated,
                    tags: t.tags.clone(),
                    sticky_tags: t.sticky_tags.clone(),
                    locked: t.locked,
                    hidden: t.hidden,
                },
            })
            .collect();

        let recovered_posts: Vec<RecoveredPost> = hive
            .threads
            .values()
            .flat_map(|t| t.posts().iter())
            .map(|p| RecoveredPost {
                record: PostRecord {
                    comment: p.comment.clone(),
                    user_addr: p.user_addr.clone(),
                    media_hash: p.media.as_ref().map(|m| m.hash.clone()),
                    media_name: p.media_name.clone(),
                    global_id: p.global_id,
                    local_id: p.local_id,
                    reply_to: p.reply_to,
                    time: p.time,
                    parent_thread: p.parent_thread.clone(),
                    hidden: p.hidden,
                    authority: String::new(),
                },
            })
            .collect();

        let mut fresh = test_hive();
        fresh.recover(recovered_threads, recovered_posts, Vec::new()).unwrap();

        assert_eq!(fresh.threads.len(), 1 + 3); // 1 real thread + 3 report queues
        assert_eq!(fresh.thread_counter, hive.thread_counter);
        assert_eq!(fresh.post_counter, hive.post_counter);
    }
}
