//! Board configuration.
//!
//! Settings are assembled from every `*.toml` file in a directory,
//! concatenated in directory order and parsed as one document — the same
//! "drop a fragment in the config directory" layout as the original, done
//! with `toml`/`serde` in place of hand-rolled parsing. Byte-size fields are
//! given in megabytes in the file and multiplied out at load time.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use regex::Regex;
use serde::{de, Deserialize, Deserializer};

#[derive(Debug, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub general: General,
    #[serde(default)]
    pub catalog: Catalog,
    #[serde(default)]
    pub limit: Limit,
    #[serde(default)]
    pub admin: Admin,
    #[serde(default)]
    pub media: Media,
    #[serde(default)]
    pub image: Image,
    #[serde(default)]
    pub video: Video,
    #[serde(default)]
    pub audio: Audio,
    #[serde(default)]
    pub spamtrap: SpamTrap,
    #[serde(default)]
    pub notify: Notify,
    #[serde(default)]
    pub database: Database,

    #[serde(default)]
    pub staff: HashMap<String, Staff>,
    #[serde(default)]
    pub roles: HashMap<String, Role>,
    #[serde(default)]
    pub thresholds: HashMap<String, ThresholdSetting>,
    #[serde(default)]
    pub banreasons: HashMap<String, BanReason>,
    #[serde(default)]
    pub wordfilters: Vec<WordFilterSetting>,
}

#[derive(Debug, Deserialize)]
pub struct General {
    pub site_name: String,
    pub listen_port: u16,
    pub passthrough_delay: DurationSetting,
    pub auto_delete_threshold: u32,
    pub post_time_format: String,
    pub summary_post_tail_length: usize,
}

impl Default for General {
    fn default() -> Self {
        Self {
            site_name: String::new(),
            listen_port: 8080,
            passthrough_delay: DurationSetting(Duration::from_secs(0)),
            auto_delete_threshold: 3,
            post_time_format: "%Y-%m-%d %H:%M:%S".to_owned(),
            summary_post_tail_length: 0,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct Catalog {
    pub summary_char_limit: usize,
    pub page_range: u32,
    pub threads_per_page: usize,
}

#[derive(Debug, Deserialize, Default)]
pub struct Limit {
    pub threads: usize,
    pub posts_per_thread: usize,
    pub tags_per_thread: usize,
    pub comment_length: usize,
    pub tag_length: usize,
    pub newlines_per_post: usize,
}

#[derive(Debug, Deserialize)]
pub struct Admin {
    pub challenge_length: usize,
    pub challenge_duration: DurationSetting,
    pub cookie_name: String,
    pub cookie_lifetime: DurationSetting,
}

impl Default for Admin {
    fn default() -> Self {
        Self {
            challenge_length: 64,
            challenge_duration: DurationSetting(Duration::from_secs(300)),
            cookie_name: "tolxanka_admin".to_owned(),
            cookie_lifetime: DurationSetting(Duration::from_secs(86400)),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct Media {
    pub path: String,
    #[serde(default)]
    pub valid_referers: Vec<String>,
    pub cache_size: u64,
}

#[derive(Debug, Deserialize, Default)]
pub struct Image {
    pub accepted_file_formats: Vec<String>,
    pub thumb_width: u32,
    pub thumb_height: u32,
    pub max_size: u64,
}

#[derive(Debug, Deserialize, Default)]
pub struct Video {
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    pub workers: usize,
    pub thumbnail_seek_time: DurationSetting,
    pub accepted_file_formats: Vec<String>,
    pub max_size: u64,
}

#[derive(Debug, Deserialize, Default)]
pub struct Audio {
    pub accepted_codecs: Vec<String>,
    pub accepted_file_formats: Vec<String>,
    pub thumbnail_file: String,
    pub max_size: u64,
}

#[derive(Debug, Deserialize, Default)]
pub struct SpamTrap {
    pub duplicate_fields: usize,
    pub field_display: Vec<u32>,
    pub field_hide: Vec<u32>,
    pub field_prefix: String,
    pub thread_form_lifetime: DurationSetting,
}

#[derive(Debug, Deserialize, Default)]
pub struct Notify {
    pub addr: String,
    pub password: String,
    pub smtp_server: String,
    pub from_email: String,
}

#[derive(Debug, Deserialize, Default)]
pub struct Database {
    pub name: String,
    pub dump_interval: DurationSetting,
    pub ban_queue_size: usize,
    pub post_queue_size: usize,
    pub thread_queue_size: usize,
    pub media_queue_size: usize,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Role {
    pub title: String,
    #[serde(default)]
    pub marker: String,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub post_with_role: bool,
    #[serde(default)]
    pub view_restricted_tags: bool,
    #[serde(default)]
    pub see_hidden_threads: bool,
    #[serde(default)]
    pub post_in_locked_thread: bool,
    #[serde(default)]
    pub post_system_threads: bool,
    #[serde(default)]
    pub lock_thread: bool,
    #[serde(default)]
    pub sticky_thread: bool,
    #[serde(default)]
    pub delete_thread: bool,
    #[serde(default)]
    pub delete_post: bool,
    #[serde(default)]
    pub ban_user: bool,
    #[serde(default)]
    pub block_image: bool,
    #[serde(default)]
    pub show_user_posts: bool,
    #[serde(default)]
    pub recommend_ban: bool,
    #[serde(default)]
    pub receive_notifications: bool,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Staff {
    pub role: String,
    pub active: bool,
    pub email: String,
    /// Base64-encoded Ed25519 verifying key (32 bytes decoded). Substitutes
    /// for an armored OpenPGP public key: see DESIGN.md for the grounding.
    pub public_key: String,
}

#[derive(Clone, Copy, Debug, Deserialize)]
pub struct ThresholdSetting {
    pub times: usize,
    pub duration: DurationSetting,
}

#[derive(Clone, Debug, Deserialize)]
pub struct BanReason {
    #[serde(default)]
    pub name: String,
    pub description: String,
    pub length: u64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct WordFilterSetting {
    pub pattern: String,
    pub ban: String,
}

/// A compiled word filter: the setting above plus its regex, built once at
/// load time rather than re-compiled per post.
pub struct WordFilter {
    pub regexp: Regex,
    pub ban: String,
}

/// A `time.Duration`-style wrapper that deserializes from strings like
/// `"24h"` or `"90s"`, mirroring the original's `UnmarshalText`.
#[derive(Clone, Copy, Debug)]
pub struct DurationSetting(pub Duration);

impl Default for DurationSetting {
    fn default() -> Self {
        Self(Duration::ZERO)
    }
}

impl<'de> Deserialize<'de> for DurationSetting {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse_duration(&raw)
            .map(DurationSetting)
            .map_err(de::Error::custom)
    }
}

/// Parses a small subset of Go's `time.ParseDuration` grammar: a sequence of
/// `<number><unit>` pairs where unit is one of `ns`, `us`, `ms`, `s`, `m`,
/// `h`.
fn parse_duration(raw: &str) -> Result<Duration, String> {
    let mut total = Duration::ZERO;
    let mut rest = raw.trim();

    if rest.is_empty() {
        return Err(format!("empty duration string"));
    }

    while !rest.is_empty() {
        let digits_end = rest
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .ok_or_else(|| format!("missing unit in duration {raw:?}"))?;
        let (num, unit_rest) = rest.split_at(digits_end);
        let unit_end = unit_rest
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(unit_rest.len());
        let (unit, remainder) = unit_rest.split_at(unit_end);

        let value: f64 = num
            .parse()
            .map_err(|_| format!("bad number {num:?} in duration {raw:?}"))?;

        let unit_dur = match unit {
            "ns" => Duration::from_nanos(1),
            "us" | "\u{b5}s" => Duration::from_micros(1),
            "ms" => Duration::from_millis(1),
            "s" => Duration::from_secs(1),
            "m" => Duration::from_secs(60),
            "h" => Duration::from_secs(3600),
            other => return Err(format!("unknown duration unit {other:?}")),
        };

        total += unit_dur.mul_f64(value);
        rest = remainder;
    }

    Ok(total)
}

impl Settings {
    /// Reads every `.toml` file in `dir` (in directory listing order),
    /// concatenates their bytes, and parses the result as one document.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let mut entries: Vec<_> = fs::read_dir(dir)
            .with_context(|| format!("reading config directory {dir:?}"))?
            .collect::<std::io::Result<_>>()?;
        entries.sort_by_key(|e| e.file_name());

        let mut combined = String::new();
        for entry in entries {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("toml") {
                continue;
            }
            combined.push_str(
                &fs::read_to_string(&path)
                    .with_context(|| format!("reading {path:?}"))?,
            );
            combined.push('\n');
        }

        let mut settings: Settings = toml::from_str(&combined)
            .with_context(|| format!("parsing config in {dir:?}"))?;

        for (name, reason) in settings.banreasons.iter_mut() {
            reason.name = name.clone();
        }

        settings.media.cache_size *= 1_000_000;
        settings.image.max_size *= 1_000_000;
        settings.video.max_size *= 1_000_000;
        settings.audio.max_size *= 1_000_000;

        Ok(settings)
    }

    /// Compiles the configured word filters into regexes, in configured
    /// order. Called once at startup; a bad pattern is a fatal configuration
    /// error.
    pub fn compiled_word_filters(&self) -> Result<Vec<WordFilter>> {
        self.wordfilters
            .iter()
            .map(|w| {
                Ok(WordFilter {
                    regexp: Regex::new(&w.pattern)
                        .with_context(|| format!("word filter {:?}", w.pattern))?,
                    ban: w.ban.clone(),
                })
            })
            .collect()
    }

    /// The largest of the per-medium upload size ceilings, used to size the
    /// request body limit at the (out of scope) HTTP layer.
    pub fn max_file_size(&self) -> u64 {
        self.image
            .max_size
            .max(self.video.max_size)
            .max(self.audio.max_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_go_style_durations() {
        assert_eq!(parse_duration("24h").unwrap(), Duration::from_secs(86400));
        assert_eq!(parse_duration("90s").unwrap(), Duration::from_secs(90));
        assert_eq!(
            parse_duration("1h30m").unwrap(),
            Duration::from_secs(5400)
        );
    }

    #[test]
    fn rejects_empty_duration() {
        assert!(parse_duration("").is_err());
    }
}
