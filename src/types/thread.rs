//! A thread: an ordered conversation plus the indexes needed to serve posts
//! by local id or by author address.

use std::collections::{HashMap, HashSet};

use rand::Rng;

use crate::ids::{PostLid, ThreadId};
use crate::types::han::HanGenerator;
use crate::types::post::{Post, PostRef};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ContentCount {
    pub posts: u64,
    pub media: u64,
    pub image: u64,
    pub video: u64,
    pub audio: u64,
}

pub struct Thread {
    pub id: ThreadId,
    /// Distinguishes this thread's on-disk row from a same-id thread created
    /// in a prior process lifetime (purely diagnostic).
    pub random_mark: u32,

    posts: Vec<Post>,
    by_local_id: HashMap<PostLid, usize>,
    by_addr: HashMap<String, Vec<usize>>,

    han_gen: HanGenerator,
    han_map: HashMap<String, crate::types::han::Han>,
    user_ids: HashSet<u64>,

    pub tags: Vec<String>,
    pub sticky_tags: Vec<String>,
    pub count: ContentCount,

    pub updated: std::time::SystemTime,
    pub locked: bool,
    pub hidden: bool,
    pub no_dump: bool,
    pub nsfw: bool,

    /// Rendered catalog-row / summary-row bytes, produced by the (out of
    /// scope) template layer; kept here purely as a cache invalidation
    /// target.
    pub cat_bytes: Vec<u8>,
    pub sum_bytes: Vec<u8>,
}

impl Thread {
    pub fn new(id: ThreadId, rng: &mut impl Rng) -> Self {
        Thread {
            id,
            random_mark: rng.gen(),
            posts: Vec::new(),
            by_local_id: HashMap::new(),
            by_addr: HashMap::new(),
            han_gen: HanGenerator::new(rng),
            han_map: HashMap::new(),
            user_ids: HashSet::new(),
            tags: Vec::new(),
            sticky_tags: Vec::new(),
            count: ContentCount::default(),
            updated: std::time::SystemTime::now(),
            locked: false,
            hidden: false,
            no_dump: false,
            nsfw: false,
            cat_bytes: Vec::new(),
            sum_bytes: Vec::new(),
        }
    }

    pub fn posts(&self) -> &[Post] {
        &self.posts
    }

    pub fn post_by_local_id(&self, lid: PostLid) -> Option<&Post> {
        self.by_local_id.get(&lid).map(|&i| &self.posts[i])
    }

    pub fn post_by_local_id_mut(&mut self, lid: PostLid) -> Option<&mut Post> {
        self.by_local_id.get(&lid).copied().map(move |i| &mut self.posts[i])
    }

    pub fn posts_by_addr(&self, addr: &str) -> Vec<&Post> {
        self.by_addr
            .get(addr)
            .map(|idxs| idxs.iter().map(|&i| &self.posts[i]).collect())
            .unwrap_or_default()
    }

    pub fn has_tag(&self, label: &str) -> bool {
        self.tags.iter().any(|t| t == label) || self.sticky_tags.iter().any(|t| t == label)
    }

    pub fn all_tags(&self) -> impl Iterator<Item = &str> {
        self.tags.iter().chain(self.sticky_tags.iter()).map(String::as_str)
    }

    /// Appends `post` to this thread, assigning its local id and han
    /// identity, indexing it, and binding any reply target. Returns the
    /// assigned local id.
    ///
    /// Does not touch the page cache or broadcaster: the caller (the hive,
    /// which alone has access to those) is responsible for marking the
    /// thread's cached page stale and fanning the rendered post out to
    /// subscribers.
    pub fn add_post(&mut self, mut post: Post, rng: &mut impl Rng) -> PostLid {
        let han = match self.han_map.get(&post.user_addr) {
            Some(h) => h.clone(),
            None => {
                let mut han = self.han_gen.next(rng);
                let ident = if !self.user_ids.contains(&post.desired_user_id) {
                    post.desired_user_id
                } else {
                    rng.gen()
                };
                han.ident = ident;
                self.user_ids.insert(ident);
                self.han_map.insert(post.user_addr.clone(), han.clone());
                han
            },
        };
        post.han = han;

        self.count.posts += 1;
        post.local_id = PostLid(self.count.posts);

        if let Some(marker) = post.role.role.as_ref().map(|r| r.marker.clone()) {
            if !marker.is_empty() {
                post.han.char = marker;
            }
        }

        if !post.recovered {
            post.time = std::time::SystemTime::now();
        }

        self.increment_media_counts(&post);
        self.updated = post.time;

        let idx = self.posts.len();
        self.by_local_id.insert(post.local_id, idx);
        self.by_addr.entry(post.user_addr.clone()).or_default().push(idx);

        let reply_to = post.reply_to;
        self.posts.push(post);

        if !reply_to.is_none() {
            self.bind_reply(idx, reply_to);
        }

        self.posts[idx].local_id
    }

    /// Appends a synthetic queue entry directly, bypassing han/media
    /// bookkeeping (used for report-queue threads and the lock notice).
    pub fn add_system_post(&mut self, mut post: Post) -> PostLid {
        self.count.posts += 1;
        post.local_id = PostLid(self.count.posts);
        let idx = self.posts.len();
        self.by_local_id.insert(post.local_id, idx);
        self.posts.push(post);
        self.posts[idx].local_id
    }

    fn increment_media_counts(&mut self, post: &Post) {
        let Some(media) = &post.media else { return };
        use crate::types::media::MediaType::*;
        match media.media_type {
            Image => self.count.image += 1,
            Video => self.count.video += 1,
            Audio => self.count.audio += 1,
        }
        self.count.media += 1;
    }

    /// Binds `idx`'s reply-to target, appending a back-reference to the
    /// target's `replies`. If the target local id is unknown, clears
    /// `reply_to` on the post at `idx` instead.
    fn bind_reply(&mut self, idx: usize, target_lid: PostLid) {
        let Some(&target_idx) = self.by_local_id.get(&target_lid) else {
            self.posts[idx].reply_to = PostLid::NONE;
            return;
        };

        let thread_id = self.id.clone();
        let back_ref = PostRef {
            global: crate::ids::PostGid(0),
            local: self.posts[idx].local_id,
            thread: thread_id,
        };
        self.posts[target_idx].replies.push(back_ref);
    }

    pub fn set_sticky(&mut self, name: &str) {
        if let Some(pos) = self.tags.iter().position(|t| t == name) {
            let tag = self.tags.remove(pos);
            self.sticky_tags.push(tag);
        }
    }

    pub fn set_unsticky(&mut self, name: &str) {
        if let Some(pos) = self.sticky_tags.iter().position(|t| t == name) {
            let tag = self.sticky_tags.remove(pos);
            self.tags.push(tag);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn thread() -> Thread {
        let mut rng = rand::rngs::StdRng::seed_from_u64(1);
        Thread::new(ThreadId::from("0"), &mut rng)
    }

    #[test]
    fn op_gets_fixed_han() {
        let mut t = thread();
        let mut rng = rand::rngs::StdRng::seed_from_u64(2);
        let mut post = Post::draft("1.2.3.4", "hello");
        post.op = true;
        let lid = t.add_post(post, &mut rng);
        assert_eq!(lid, PostLid(1));
        assert_eq!(t.post_by_local_id(lid).unwrap().han.char, "主");
    }

    #[test]
    fn reply_binds_back_reference() {
        let mut t = thread();
        let mut rng = rand::rngs::StdRng::seed_from_u64(3);
        let mut op = Post::draft("1.2.3.4", "hello");
        op.op = true;
        let op_lid = t.add_post(op, &mut rng);

        let mut reply = Post::draft("5.6.7.8", "world");
        reply.reply_to = op_lid;
        let reply_lid = t.add_post(reply, &mut rng);

        let target = t.post_by_local_id(op_lid).unwrap();
        assert_eq!(target.replies.len(), 1);
        assert_eq!(target.replies[0].local, reply_lid);
    }

    #[test]
    fn reply_to_unknown_post_is_cleared() {
        let mut t = thread();
        let mut rng = rand::rngs::StdRng::seed_from_u64(4);
        let mut post = Post::draft("1.2.3.4", "hi");
        post.reply_to = PostLid(99);
        let lid = t.add_post(post, &mut rng);
        assert!(t.post_by_local_id(lid).unwrap().reply_to.is_none());
    }
}
