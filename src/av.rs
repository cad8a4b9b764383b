//! Fixed-size worker pool for external audio/video probing and thumbnail
//! extraction.
//!
//! Mirrors the original's unbuffered work channel plus N goroutines
//! draining it, expressed as a shared `tokio::sync::mpsc` receiver behind a
//! mutex and N worker tasks. Submitting a job blocks the caller on a
//! one-shot reply, exactly as the original blocks on its own `wait` channel.

use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;

use serde::Deserialize;
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::warn;

use crate::config::{Audio, Video};

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

#[derive(Clone)]
pub struct AvPool {
    tx: mpsc::Sender<Job>,
}

impl AvPool {
    pub fn start(workers: usize) -> Self {
        let (tx, rx) = mpsc::channel::<Job>(workers.max(1) * 4);
        let rx = Arc::new(Mutex::new(rx));

        for _ in 0..workers.max(1) {
            let rx = rx.clone();
            tokio::spawn(async move {
                loop {
                    let job = rx.lock().await.recv().await;
                    match job {
                        Some(job) => job.await,
                        None => break,
                    }
                }
            });
        }

        Self { tx }
    }

    /// Submits a job (an ffprobe/ffmpeg invocation) and awaits its
    /// completion, capping how many external processes run concurrently to
    /// `workers`.
    pub async fn run<F>(&self, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        let wrapped: Job = Box::pin(async move {
            job.await;
            let _ = done_tx.send(());
        });

        if self.tx.send(wrapped).await.is_err() {
            warn!("av worker pool is shut down, dropping job");
            return;
        }

        let _ = done_rx.await;
    }
}

#[derive(Debug, Deserialize, Default)]
struct ProbeResult {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    #[serde(default)]
    format: ProbeFormat,
}

#[derive(Debug, Deserialize, Default)]
struct ProbeStream {
    #[serde(default)]
    codec_name: String,
    #[serde(default)]
    codec_type: String,
    #[serde(default)]
    height: u32,
    #[serde(default)]
    width: u32,
}

#[derive(Debug, Deserialize, Default)]
struct ProbeFormat {
    #[serde(default)]
    duration: String,
    #[serde(default)]
    tags: ProbeTags,
}

#[derive(Debug, Deserialize, Default)]
struct ProbeTags {
    #[serde(default)]
    album: String,
    #[serde(default)]
    artist: String,
    #[serde(default)]
    title: String,
}

fn duration_string(raw: &str) -> String {
    let seconds: f64 = raw.parse().unwrap_or(0.0);
    let seconds = seconds as u64;
    let (h, m, s) = (seconds / 3600, (seconds % 3600) / 60, seconds % 60);
    format!("{h:02}:{m:02}:{s:02}")
}

pub fn size_string(size: u64) -> String {
    if size < 1_000 {
        format!("{size} bytes")
    } else if size < 1_000_000 {
        format!("{} KB", size / 1_000)
    } else {
        format!("{:.2} MB", size as f64 / 1_000_000.0)
    }
}

async fn probe_file(ffprobe_path: &str, file_name: &str) -> ProbeResult {
    let output = Command::new(ffprobe_path)
        .args(["-v", "quiet", "-of", "json", "-show_format", "-show_streams", file_name])
        .stdout(Stdio::piped())
        .output()
        .await;

    match output {
        Ok(out) => serde_json::from_slice(&out.stdout).unwrap_or_default(),
        Err(error) => {
            warn!(%error, "ffprobe invocation failed");
            ProbeResult::default()
        },
    }
}

/// Probes a video file and returns a human-readable info string
/// (`"(1.2 MB 1920x1080 00:01:30 h264/aac)"`-shaped).
pub async fn probe_video(cfg: &Video, file_name: &str, size: u64) -> String {
    let probe = probe_file(&cfg.ffprobe_path, file_name).await;

    let mut video_codec = String::new();
    let mut audio_codec = String::new();
    let mut width = 0;
    let mut height = 0;

    for stream in &probe.streams {
        match stream.codec_type.as_str() {
            "video" => {
                video_codec = stream.codec_name.clone();
                width = stream.width;
                height = stream.height;
            },
            "audio" => audio_codec = stream.codec_name.clone(),
            _ => {},
        }
    }

    let codecs = if audio_codec.is_empty() {
        video_codec
    } else {
        format!("{video_codec}/{audio_codec}")
    };

    format!(
        "({} {width}x{height} {} {codecs})",
        size_string(size),
        duration_string(&probe.format.duration)
    )
}

/// Extracts a single frame at the configured seek time via ffmpeg, scaled to
/// the configured thumbnail width, as a JPEG.
pub async fn video_thumb(
    video_cfg: &Video,
    thumb_width: u32,
    file_name: &str,
) -> Option<Vec<u8>> {
    let seek_seconds = video_cfg.thumbnail_seek_time.0.as_secs_f64();
    let scale = format!("scale=w={thumb_width}:h=-1");

    let output = Command::new(&video_cfg.ffmpeg_path)
        .args([
            "-i",
            file_name,
            "-ss",
            &format!("{seek_seconds:.0}"),
            "-vframes",
            "1",
            "-f",
            "mjpeg",
            "-vf",
            &scale,
            "pipe:1",
        ])
        .stdout(Stdio::piped())
        .output()
        .await
        .ok()?;

    Some(output.stdout)
}

/// Probes an audio file; fails if the codec isn't in the configured accept
/// list or the file has no streams.
pub async fn probe_audio(cfg: &Audio, ffprobe_path: &str, file_name: &str, size: u64) -> Option<String> {
    let probe = probe_file(ffprobe_path, file_name).await;
    let stream = probe.streams.first()?;

    if !cfg.accepted_codecs.iter().any(|c| c == &stream.codec_name) {
        return None;
    }

    Some(format!(
        "({} {} - {} ({}) {} {})",
        size_string(size),
        probe.format.tags.artist,
        probe.format.tags.title,
        probe.format.tags.album,
        duration_string(&probe.format.duration),
        stream.codec_name,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pool_runs_submitted_jobs() {
        let pool = AvPool::start(2);
        let (tx, rx) = oneshot::channel();
        pool.run(async move {
            let _ = tx.send(42);
        })
        .await;
        assert_eq!(rx.await.unwrap(), 42);
    }

    #[test]
    fn duration_string_formats_hms() {
        assert_eq!(duration_string("90"), "00:01:30");
    }
}
