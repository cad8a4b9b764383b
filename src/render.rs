//! Page/row rendering seam.
//!
//! HTML/text templating itself is out of scope: the hive's job is to
//! pre-render a post, a thread's catalog-row and summary-row, and a full
//! thread page to bytes, then cache/broadcast the result rather than
//! re-rendering on every read. [`PlainRenderer`] is a minimal, deterministic
//! stand-in so the crate is a runnable whole without pulling in a template
//! engine no example in this stack uses.

use bytes::Bytes;
use std::fmt::Write as _;

use crate::types::post::Post;
use crate::types::thread::Thread;
use crate::users::Ban;

pub trait Renderer: Send + Sync {
    fn render_post(&self, thread: &Thread, post: &Post) -> Bytes;
    fn render_catalog_row(&self, thread: &Thread) -> Bytes;
    fn render_summary_row(&self, thread: &Thread) -> Bytes;
    fn render_thread_page(&self, thread: &Thread) -> Bytes;
    fn render_banned_page(&self, ban: &Ban) -> Bytes;
}

#[derive(Default)]
pub struct PlainRenderer;

fn render_one_post(out: &mut String, post: &Post) {
    let _ = writeln!(
        out,
        "#{} {} ({}): {}",
        post.local_id, post.han.char, post.han.ident, post.escaped_comment
    );
    if let Some(media) = &post.media {
        let _ = writeln!(out, "  [{}] {}", media.media_type.as_str(), post.escaped_media_name);
    }
}

impl Renderer for PlainRenderer {
    fn render_post(&self, _thread: &Thread, post: &Post) -> Bytes {
        let mut out = String::new();
        render_one_post(&mut out, post);
        Bytes::from(out)
    }

    fn render_catalog_row(&self, thread: &Thread) -> Bytes {
        Bytes::from(format!(
            "[{}] {} posts, {} media\n",
            thread.id, thread.count.posts, thread.count.media
        ))
    }

    fn render_summary_row(&self, thread: &Thread) -> Bytes {
        let mut out = format!("[{}] ", thread.id);
        for post in thread.posts().iter().rev().take(3) {
            let _ = write!(out, "{} ", post.escaped_comment);
        }
        out.push('\n');
        Bytes::from(out)
    }

    fn render_thread_page(&self, thread: &Thread) -> Bytes {
        let mut out = String::new();
        if thread.locked {
            out.push_str("(locked)\n");
        }
        for post in thread.posts() {
            render_one_post(&mut out, post);
        }
        Bytes::from(out)
    }

    fn render_banned_page(&self, ban: &Ban) -> Bytes {
        Bytes::from(format!("banned until {:?}: {}\n", ban.end, ban.reason.description))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::ThreadId;
    use rand::SeedableRng;

    fn thread() -> Thread {
        let mut rng = rand::rngs::StdRng::seed_from_u64(1);
        Thread::new(ThreadId::from("0"), &mut rng)
    }

    #[test]
    fn render_post_includes_escaped_comment() {
        let renderer = PlainRenderer;
        let thread = thread();
        let mut post = Post::draft("1.2.3.4", "hello");
        post.escaped_comment = "hello".to_owned();
        let bytes = renderer.render_post(&thread, &post);
        assert!(String::from_utf8(bytes.to_vec()).unwrap().contains("hello"));
    }

    #[test]
    fn render_thread_page_marks_locked() {
        let renderer = PlainRenderer;
        let mut thread = thread();
        thread.locked = true;
        let bytes = renderer.render_thread_page(&thread);
        assert!(String::from_utf8(bytes.to_vec()).unwrap().starts_with("(locked)"));
    }

    #[test]
    fn render_catalog_row_reports_post_count() {
        let renderer = PlainRenderer;
        let thread = thread();
        let bytes = renderer.render_catalog_row(&thread);
        assert!(String::from_utf8(bytes.to_vec()).unwrap().contains("0 posts"));
    }
}
