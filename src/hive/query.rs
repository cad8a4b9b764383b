//! Boolean tag-query planner.
//!
//! Combines a "filter" generator (threads carrying *every* filter tag,
//! walked from the smallest qualifying tag's list) and a "merge" generator
//! (threads carrying *any* merge tag, picked by most-recent `updated`)
//! into a single deduplicated, most-recent-first stream, then slices out
//! one page.

use std::collections::HashMap;
use std::collections::HashSet;

use crate::ids::ThreadId;
use crate::types::tag::Tag;
use crate::types::thread::Thread;

#[derive(Clone, Debug, Default)]
pub struct ParsedQuery {
    pub merge: Vec<String>,
    pub filter: Vec<String>,
    pub exclude: Vec<String>,
    pub page: usize,
    pub admin: bool,
}

pub struct QueryResult {
    pub threads: Vec<ThreadId>,
    /// Total number of matches seen (including the page already sliced
    /// out), used to render page navigation.
    pub total: usize,
}

/// A single pass over a tag's normal list, materialized up front. Tag lists
/// are small enough in practice (thread count is capped) that this is
/// simpler than a true lazy generator while preserving the same
/// most-recent-first order and one-element lookahead semantics.
struct Cursor {
    items: Vec<ThreadId>,
    pos: usize,
}

impl Cursor {
    fn new(items: Vec<ThreadId>) -> Self {
        Self { items, pos: 0 }
    }

    fn peek(&self) -> Option<&ThreadId> {
        self.items.get(self.pos)
    }

    fn advance(&mut self) {
        self.pos += 1;
    }
}

fn filter_cursor(filter_tags: &[&Tag]) -> Cursor {
    if filter_tags.is_empty() {
        return Cursor::new(Vec::new());
    }
    // Walk the smallest-population filter tag; a thread is yielded only if
    // it also belongs to every other filter tag (checked by the caller).
    let smallest = filter_tags
        .iter()
        .min_by_key(|t| t.normal.len())
        .expect("non-empty");
    Cursor::new(smallest.normal.iter().cloned().collect())
}

fn merge_cursors(merge_tags: &[&Tag]) -> Vec<Cursor> {
    merge_tags
        .iter()
        .map(|t| Cursor::new(t.normal.iter().cloned().collect()))
        .collect()
}

fn contains_all<'a>(
    threads: &HashMap<ThreadId, Thread>,
    tid: &ThreadId,
    filter_tags: &[&Tag],
) -> bool {
    let Some(thread) = threads.get(tid) else { return false };
    filter_tags.iter().all(|t| thread.has_tag(&t.name))
}

/// Runs the boolean query and returns one page of thread ids plus the total
/// match count.
pub fn run_query(
    tags: &HashMap<String, Tag>,
    threads: &HashMap<ThreadId, Thread>,
    query: &ParsedQuery,
    per_page: usize,
) -> QueryResult {
    let lookup = |labels: &[String]| -> Vec<&Tag> {
        labels.iter().filter_map(|l| tags.get(l)).collect()
    };

    let mut filter_tags = lookup(&query.filter);
    if filter_tags.len() < query.filter.len() {
        // At least one named filter tag doesn't exist: the intersection can
        // never match anything.
        filter_tags.clear();
    }
    let merge_tags = lookup(&query.merge);
    let exclude_tags = lookup(&query.exclude);

    if filter_tags.is_empty() && merge_tags.is_empty() {
        return QueryResult { threads: Vec::new(), total: 0 };
    }

    let mut filter_cur = filter_cursor(&filter_tags);
    let mut merge_cur = merge_cursors(&merge_tags);
    let mut seen = HashSet::new();

    let is_excluded = |tid: &ThreadId| -> bool {
        let Some(thread) = threads.get(tid) else { return false };
        exclude_tags.iter().any(|t| thread.has_tag(&t.name))
    };

    let mut advance = || -> Option<ThreadId> {
        loop {
            let from_filter = if filter_tags.is_empty() {
                None
            } else {
                filter_cur.peek().cloned()
            };

            // Skip filter candidates that don't carry every filter tag.
            if let Some(tid) = &from_filter {
                if !contains_all(threads, tid, &filter_tags) {
                    filter_cur.advance();
                    continue;
                }
            }

            let newest_merge_idx = merge_cur
                .iter()
                .enumerate()
                .filter_map(|(i, c)| c.peek().map(|tid| (i, tid)))
                .filter_map(|(i, tid)| threads.get(tid).map(|t| (i, t.updated)))
                .max_by_key(|&(_, updated)| updated)
                .map(|(i, _)| i);

            let pick_filter = match (&from_filter, newest_merge_idx) {
                (Some(_), None) => true,
                (None, Some(_)) => false,
                (None, None) => return None,
                (Some(ftid), Some(mi)) => {
                    let f_updated = threads.get(ftid).map(|t| t.updated);
                    let m_updated =
                        merge_cur[mi].peek().and_then(|tid| threads.get(tid)).map(|t| t.updated);
                    // Tie-break favors the filter side.
                    f_updated >= m_updated
                },
            };

            let tid = if pick_filter {
                let tid = from_filter.unwrap();
                filter_cur.advance();
                tid
            } else {
                let i = newest_merge_idx.unwrap();
                let tid = merge_cur[i].peek().unwrap().clone();
                merge_cur[i].advance();
                tid
            };

            if is_excluded(&tid) {
                seen.insert(tid);
                continue;
            }
            if !seen.insert(tid.clone()) {
                continue;
            }

            return Some(tid);
        }
    };

    let offset = query.page * per_page;
    let mut skipped = 0;
    while skipped < offset {
        if advance().is_none() {
            return QueryResult { threads: Vec::new(), total: skipped };
        }
        skipped += 1;
    }

    let mut page = Vec::new();
    let mut taken = 0;
    while taken < per_page {
        match advance() {
            None => return QueryResult { total: skipped + taken, threads: page },
            Some(tid) => {
                let hidden = threads.get(&tid).map(|t| t.hidden).unwrap_or(false);
                if hidden && !query.admin {
                    continue;
                }
                page.push(tid);
                taken += 1;
            },
        }
    }

    let mut total = skipped + taken;
    while advance().is_some() {
        total += 1;
    }

    QueryResult { threads: page, total }
}

/// Threads in the union of the sticky lists for the given tag labels, in tag
/// order. Only meaningful on page 0.
pub fn sticky_threads(tags: &HashMap<String, Tag>, labels: &[String]) -> Vec<ThreadId> {
    let mut out = Vec::new();
    for label in labels {
        if let Some(tag) = tags.get(label) {
            out.extend(tag.sticky.iter().cloned());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn thread_with_tags(id: &str, labels: &[&str]) -> (ThreadId, Thread) {
        let mut rng = rand::rngs::StdRng::seed_from_u64(id.len() as u64 + 1);
        let tid = ThreadId::from(id);
        let mut t = Thread::new(tid.clone(), &mut rng);
        t.tags = labels.iter().map(|s| s.to_string()).collect();
        (tid, t)
    }

    fn fixture() -> (HashMap<String, Tag>, HashMap<ThreadId, Thread>) {
        let mut threads = HashMap::new();
        let mut tags: HashMap<String, Tag> = HashMap::new();

        for (id, labels) in [("a", &["general", "news"][..]), ("b", &["general"][..]), ("c", &["news"][..])] {
            let (tid, thread) = thread_with_tags(id, labels);
            for label in labels {
                tags.entry((*label).to_owned()).or_insert_with(|| Tag::new(*label)).normal.add(&tid);
            }
            threads.insert(tid, thread);
        }

        (tags, threads)
    }

    #[test]
    fn filter_intersection_requires_every_tag() {
        let (tags, threads) = fixture();
        let query = ParsedQuery { filter: vec!["general".to_owned(), "news".to_owned()], ..Default::default() };
        let result = run_query(&tags, &threads, &query, 10);
        assert_eq!(result.threads, vec![ThreadId::from("a")]);
    }

    #[test]
    fn merge_union_includes_either_tag() {
        let (tags, threads) = fixture();
        let query = ParsedQuery { merge: vec!["general".to_owned(), "news".to_owned()], ..Default::default() };
        let result = run_query(&tags, &threads, &query, 10);
        assert_eq!(result.threads.len(), 3);
    }

    #[test]
    fn exclude_removes_matching_threads() {
        let (tags, threads) = fixture();
        let query = ParsedQuery {
            merge: vec!["general".to_owned()],
            exclude: vec!["news".to_owned()],
            ..Default::default()
        };
        let result = run_query(&tags, &threads, &query, 10);
        assert_eq!(result.threads, vec![ThreadId::from("b")]);
    }

    #[test]
    fn unknown_filter_tag_matches_nothing() {
        let (tags, threads) = fixture();
        let query = ParsedQuery { filter: vec!["nonexistent".to_owned()], ..Default::default() };
        let result = run_query(&tags, &threads, &query, 10);
        assert!(result.threads.is_empty());
    }

    #[test]
    fn sticky_threads_collects_union() {
        let mut tags: HashMap<String, Tag> = HashMap::new();
        let sticky_id = ThreadId::from("s");
        let mut tag = Tag::new("general");
        tag.sticky.add(&sticky_id);
        tags.insert("general".to_owned(), tag);

        let result = sticky_threads(&tags, &["general".to_owned()]);
        assert_eq!(result, vec![sticky_id]);
    }
}
