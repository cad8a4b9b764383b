//! Content-addressed media store with an in-memory LRU over total bytes.
//!
//! Guarded by a single mutex, independent of the hive's own sequencer; all
//! operations here are synchronous and CPU/disk-bound, so callers on the
//! async side should run them via `tokio::task::spawn_blocking` rather than
//! await them directly, keeping the sequencer's pure in-memory work separate
//! from channel-bound I/O.

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;

use image::GenericImageView;
use md5::{Digest, Md5};

use crate::config::{BanReason, Image as ImageConfig, Media as MediaConfig};
use crate::types::media::{MediaEntry, MediaType};

fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

fn classify_format(cfg: &crate::config::Settings, format: &str) -> Option<MediaType> {
    if cfg.image.accepted_file_formats.iter().any(|f| f == format) {
        Some(MediaType::Image)
    } else if cfg.video.accepted_file_formats.iter().any(|f| f == format) {
        Some(MediaType::Video)
    } else if cfg.audio.accepted_file_formats.iter().any(|f| f == format) {
        Some(MediaType::Audio)
    } else {
        None
    }
}

/// Resizes by nearest-neighbor to fit within the configured thumbnail box,
/// preserving aspect ratio, and encodes as JPEG quality 70.
fn create_thumb(bytes: &[u8], cfg: &ImageConfig) -> Result<Vec<u8>, image::ImageError> {
    let img = image::load_from_memory(bytes)?;
    let (width, height) = img.dimensions();

    let (new_width, new_height) = if width > height {
        let w = cfg.thumb_width;
        let h = (cfg.thumb_width as f64 / width as f64 * height as f64) as u32;
        (w, h.max(1))
    } else {
        let h = cfg.thumb_height;
        let w = (cfg.thumb_height as f64 / height as f64 * width as f64) as u32;
        (w.max(1), h)
    };

    let resized = img.resize_exact(new_width, new_height, image::imageops::FilterType::Nearest);
    let mut out = Vec::new();
    resized.write_to(&mut io::Cursor::new(&mut out), image::ImageFormat::Jpeg)?;
    Ok(out)
}

pub fn image_info(size: u64, width: u32, height: u32) -> String {
    let size_str = if size < 1_000 {
        format!("{size} bytes")
    } else if size < 1_000_000 {
        format!("{} KB", size / 1_000)
    } else {
        format!("{:.2} MB", size as f64 / 1_000_000.0)
    };
    format!("({size_str} {width}x{height})")
}

struct Lru {
    order: VecDeque<String>,
    total: u64,
}

pub struct MediaLibrary {
    by_hash: Mutex<HashMap<String, MediaEntry>>,
    lru: Mutex<Lru>,
    media_path: PathBuf,
    cache_size: u64,
}

#[derive(Debug)]
pub enum InsertError {
    UnsupportedFormat,
    Decode(String),
    CacheFull,
    Io(String),
}

impl MediaLibrary {
    pub fn new(media_cfg: &MediaConfig) -> Self {
        Self {
            by_hash: Mutex::new(HashMap::new()),
            lru: Mutex::new(Lru { order: VecDeque::new(), total: 0 }),
            media_path: PathBuf::from(&media_cfg.path),
            cache_size: media_cfg.cache_size,
        }
    }

    fn file_name(&self, hash: &str) -> PathBuf {
        self.media_path.join(hash)
    }

    /// Classifies `bytes` by the configured accepted formats for its
    /// content-type hint and inserts it, generating a thumbnail for images
    /// synchronously. Video/audio entries are inserted without a thumbnail;
    /// the caller is expected to submit the A/V probe/thumbnail job to the
    /// worker pool separately and call [`Self::set_av_metadata`] once done.
    pub fn insert(
        &self,
        cfg: &crate::config::Settings,
        format: &str,
        bytes: Vec<u8>,
    ) -> Result<MediaEntry, InsertError> {
        let media_type = classify_format(cfg, format).ok_or(InsertError::UnsupportedFormat)?;
        let hash = hash_bytes(&bytes);

        if let Some(existing) = self.by_hash.lock().unwrap().get(&hash) {
            return Ok(existing.clone());
        }

        let (thumb, info) = match media_type {
            MediaType::Image => {
                let thumb = create_thumb(&bytes, &cfg.image)
                    .map_err(|e| InsertError::Decode(e.to_string()))?;
                let dims = image::load_from_memory(&bytes)
                    .map_err(|e| InsertError::Decode(e.to_string()))?
                    .dimensions();
                (thumb, image_info(bytes.len() as u64, dims.0, dims.1))
            },
            MediaType::Video | MediaType::Audio => (Vec::new(), String::new()),
        };

        let entry = MediaEntry {
            hash: hash.clone(),
            media_type,
            info,
            size: bytes.len() as u64,
            thumb,
            full: Some(bytes),
            ref_count: 0,
            blocked_reason: None,
        };

        self.direct_insert(entry)
    }

    fn direct_insert(&self, entry: MediaEntry) -> Result<MediaEntry, InsertError> {
        let mut by_hash = self.by_hash.lock().unwrap();
        if let Some(existing) = by_hash.get(&entry.hash) {
            return Ok(existing.clone());
        }

        // Lock order is by_hash then lru throughout this module; clear_space
        // takes both guards rather than re-locking, since this thread
        // already holds by_hash.
        let mut lru = self.lru.lock().unwrap();
        if !self.clear_space(&mut by_hash, &mut lru, entry.size) {
            return Err(InsertError::CacheFull);
        }

        self.write_to_disk(&entry)?;

        lru.order.push_back(entry.hash.clone());
        lru.total += entry.size;

        by_hash.insert(entry.hash.clone(), entry.clone());
        Ok(entry)
    }

    /// Reinserts an already-processed entry without touching disk, used
    /// during recovery.
    pub fn recover_insert(&self, entry: MediaEntry) {
        let mut by_hash = self.by_hash.lock().unwrap();
        let mut lru = self.lru.lock().unwrap();
        lru.order.push_back(entry.hash.clone());
        lru.total += entry.size;
        by_hash.insert(entry.hash.clone(), entry);
    }

    fn write_to_disk(&self, entry: &MediaEntry) -> Result<(), InsertError> {
        let Some(full) = &entry.full else { return Ok(()) };
        fs::write(self.file_name(&entry.hash), full).map_err(|e| InsertError::Io(e.to_string()))
    }

    /// Evicts LRU entries (dropping only their resident `full` bytes) until
    /// `size` more bytes would fit under the configured ceiling. Returns
    /// `false` if `size` alone exceeds the ceiling. Takes already-held guards
    /// rather than locking itself, so callers that already hold `by_hash`
    /// (the lock order used throughout this module) don't re-lock it.
    fn clear_space(&self, by_hash: &mut HashMap<String, MediaEntry>, lru: &mut Lru, size: u64) -> bool {
        if self.cache_size < size {
            return false;
        }

        while self.cache_size.saturating_sub(lru.total) < size {
            let Some(hash) = lru.order.pop_front() else { return false };
            if let Some(entry) = by_hash.get_mut(&hash) {
                lru.total = lru.total.saturating_sub(entry.size);
                entry.full = None;
            }
        }

        true
    }

    pub fn inc_ref(&self, hash: &str) {
        if let Some(entry) = self.by_hash.lock().unwrap().get_mut(hash) {
            entry.ref_count += 1;
        }
    }

    /// No caller in this crate invokes this: the post lifecycle never
    /// deletes a post, only hides it, so reference counts are incremented
    /// but never decremented. Kept to document that behavior explicitly
    /// rather than leave it unimplemented, matching the original's actual
    /// (if arguably buggy) behavior.
    pub fn dec_ref(&self, hash: &str) {
        if let Some(entry) = self.by_hash.lock().unwrap().get_mut(hash) {
            entry.ref_count = entry.ref_count.saturating_sub(1);
        }
    }

    pub fn block(&self, hash: &str, reason: &BanReason) -> Result<(), InsertError> {
        let mut by_hash = self.by_hash.lock().unwrap();
        let Some(entry) = by_hash.get_mut(hash) else { return Ok(()) };

        fs::remove_file(self.file_name(hash)).map_err(|e| InsertError::Io(e.to_string()))?;
        entry.thumb.clear();
        entry.full = None;
        entry.blocked_reason = Some(reason.name.clone());
        Ok(())
    }

    pub fn get(&self, hash: &str) -> Option<MediaEntry> {
        self.by_hash.lock().unwrap().get(hash).cloned()
    }

    /// Returns thumbnail bytes, or full bytes, rehydrating from disk if the
    /// entry was evicted from the in-memory LRU. Returns `None` for unknown
    /// or blocked media.
    pub fn write_media(&self, hash: &str, full: bool) -> Option<Vec<u8>> {
        let mut by_hash = self.by_hash.lock().unwrap();
        let entry = by_hash.get_mut(hash)?;
        if entry.blocked_reason.is_some() {
            return None;
        }

        if !full {
            return Some(entry.thumb.clone());
        }

        if entry.full.is_none() {
            entry.full = fs::read(self.file_name(hash)).ok();
        }

        entry.full.clone()
    }

    /// Fills in probe/thumbnail results for a video or audio entry produced
    /// by the A/V worker pool.
    pub fn set_av_metadata(&self, hash: &str, info: String, thumb: Vec<u8>) {
        if let Some(entry) = self.by_hash.lock().unwrap().get_mut(hash) {
            entry.info = info;
            entry.thumb = thumb;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn media_cfg(cache_size: u64) -> MediaConfig {
        MediaConfig { path: std::env::temp_dir().to_string_lossy().into_owned(), valid_referers: vec![], cache_size }
    }

    #[test]
    fn inc_ref_then_dec_ref_never_goes_negative() {
        let lib = MediaLibrary::new(&media_cfg(1_000_000));
        lib.recover_insert(MediaEntry {
            hash: "abc".into(),
            media_type: MediaType::Image,
            info: String::new(),
            size: 10,
            thumb: vec![],
            full: Some(vec![1, 2, 3]),
            ref_count: 0,
            blocked_reason: None,
        });
        lib.dec_ref("abc");
        assert_eq!(lib.get("abc").unwrap().ref_count, 0);
        lib.inc_ref("abc");
        lib.inc_ref("abc");
        assert_eq!(lib.get("abc").unwrap().ref_count, 2);
    }

    #[test]
    fn clear_space_rejects_oversized_upload() {
        let lib = MediaLibrary::new(&media_cfg(100));
        let mut by_hash = lib.by_hash.lock().unwrap();
        let mut lru = lib.lru.lock().unwrap();
        assert!(!lib.clear_space(&mut by_hash, &mut lru, 1000));
    }

    #[test]
    fn insert_evicts_to_fit_then_succeeds() {
        let lib = MediaLibrary::new(&media_cfg(20));
        let cfg = crate::config::Settings {
            general: Default::default(),
            catalog: Default::default(),
            limit: Default::default(),
            admin: Default::default(),
            media: media_cfg(20),
            image: Default::default(),
            video: Default::default(),
            audio: crate::config::Audio {
                accepted_codecs: vec![],
                accepted_file_formats: vec!["mp3".to_owned()],
                thumbnail_file: String::new(),
                max_size: 0,
            },
            spamtrap: Default::default(),
            notify: Default::default(),
            database: Default::default(),
            staff: Default::default(),
            roles: Default::default(),
            thresholds: Default::default(),
            banreasons: Default::default(),
            wordfilters: Vec::new(),
        };
        lib.recover_insert(MediaEntry {
            hash: "old".into(),
            media_type: MediaType::Video,
            info: String::new(),
            size: 15,
            thumb: vec![],
            full: Some(vec![0; 15]),
            ref_count: 0,
            blocked_reason: None,
        });

        let inserted = lib.insert(&cfg, "mp3", vec![1; 10]).unwrap();
        assert_eq!(inserted.size, 10);
        assert!(lib.get("old").unwrap().full.is_none());
    }
}
