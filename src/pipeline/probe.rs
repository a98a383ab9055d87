use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use tokio::process::Command;
use tokio::time::timeout;

/// Files below this size are treated as corrupt without probing.
const MIN_SOUND_BYTES: u64 = 1000;

const QUICK_PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const PROPERTIES_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Default)]
pub struct MediaProperties {
    pub duration_sec: f64,
    pub width: u32,
    pub height: u32,
    pub video_codec: String,
    pub audio_codec: Option<String>,
    pub sample_rate: Option<u32>,
    pub fps: f64,
}

async fn run_ffprobe(args: &[&str], path: &Path, limit: Duration) -> Result<String> {
    let future = Command::new("ffprobe")
        .args(args)
        .arg(path)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output();

    let output = timeout(limit, future)
        .await
        .map_err(|_| anyhow!("ffprobe timed out for {}", path.display()))?
        .with_context(|| format!("Failed to run ffprobe for {}", path.display()))?;

    if !output.status.success() {
        bail!(
            "ffprobe failed for {}: {}",
            path.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    String::from_utf8(output.stdout).context("ffprobe returned non-UTF8 output")
}

/// Cheap structural check: plausible size, a video stream, and at least one
/// decodable frame. Any failure, including a probe timeout, means unsound.
pub async fn is_sound(path: &Path) -> bool {
    let Ok(metadata) = std::fs::metadata(path) else {
        return false;
    };
    if metadata.len() < MIN_SOUND_BYTES {
        return false;
    }

    let result = run_ffprobe(
        &[
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-count_frames",
            "-show_entries",
            "stream=nb_read_frames",
            "-of",
            "default=nokey=1:noprint_wrappers=1",
        ],
        path,
        QUICK_PROBE_TIMEOUT,
    )
    .await;

    match result {
        Ok(stdout) => stdout
            .trim()
            .parse::<u64>()
            .map(|frames| frames >= 1)
            .unwrap_or(false),
        Err(_) => false,
    }
}

pub async fn duration(path: &Path) -> Result<f64> {
    let stdout = run_ffprobe(
        &[
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ],
        path,
        QUICK_PROBE_TIMEOUT,
    )
    .await?;

    stdout
        .trim()
        .parse()
        .context("Failed to parse ffprobe duration as f64")
}

pub async fn properties(path: &Path) -> Result<MediaProperties> {
    let stdout = run_ffprobe(
        &[
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_streams",
            "-show_format",
        ],
        path,
        PROPERTIES_TIMEOUT,
    )
    .await?;

    let data: serde_json::Value =
        serde_json::from_str(&stdout).context("Failed to parse ffprobe JSON")?;

    let mut props = MediaProperties {
        duration_sec: data["format"]["duration"]
            .as_str()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0.0),
        ..Default::default()
    };

    let streams = data["streams"].as_array().cloned().unwrap_or_default();
    for stream in &streams {
        match stream["codec_type"].as_str() {
            Some("video") if props.video_codec.is_empty() => {
                props.video_codec = stream["codec_name"].as_str().unwrap_or("unknown").to_string();
                props.width = stream["width"].as_u64().unwrap_or(0) as u32;
                props.height = stream["height"].as_u64().unwrap_or(0) as u32;
                props.fps = stream["r_frame_rate"]
                    .as_str()
                    .and_then(parse_frame_rate)
                    .unwrap_or(0.0);
            }
            Some("audio") if props.audio_codec.is_none() => {
                props.audio_codec = stream["codec_name"].as_str().map(str::to_string);
                props.sample_rate = stream["sample_rate"]
                    .as_str()
                    .and_then(|s| s.parse().ok());
            }
            _ => {}
        }
    }

    if props.video_codec.is_empty() {
        bail!("no video stream in {}", path.display());
    }

    Ok(props)
}

/// ffprobe reports frame rates as rationals such as "30/1" or "30000/1001".
fn parse_frame_rate(raw: &str) -> Option<f64> {
    match raw.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.parse().ok()?;
            let den: f64 = den.parse().ok()?;
            (den > 0.0).then_some(num / den)
        }
        None => raw.parse().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::tempdir;

    #[test]
    fn frame_rate_parses_rationals() {
        assert_eq!(parse_frame_rate("30/1"), Some(30.0));
        let ntsc = parse_frame_rate("30000/1001").unwrap();
        assert!((ntsc - 29.97).abs() < 0.01);
        assert_eq!(parse_frame_rate("30/0"), None);
        assert_eq!(parse_frame_rate("25"), Some(25.0));
    }

    #[tokio::test]
    async fn tiny_or_missing_files_are_unsound() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tiny.mp4");
        std::fs::write(&path, b"not a video").unwrap();
        assert!(!is_sound(&path).await);
        assert!(!is_sound(&dir.path().join("absent.mp4")).await);
    }
}
