//! `tolxanka`: the in-memory core of a tag-driven, anonymous, multi-media
//! discussion board.
//!
//! This crate owns the hard part — the single-writer hive that holds every
//! live thread, post, and tag index; the durable write-behind queue that
//! survives a restart; and the content-addressed media store with its
//! in-memory LRU. HTTP routing, template rendering, and SMTP delivery are
//! deliberately out of scope: each module here documents the seam an outer
//! service would call into instead of reimplementing one.

pub mod antispam;
pub mod av;
pub mod broadcaster;
pub mod cache;
pub mod config;
pub mod durable;
pub mod error;
pub mod hive;
pub mod ids;
pub mod library;
pub mod notify;
pub mod render;
pub mod sequencer;
pub mod types;
pub mod users;
