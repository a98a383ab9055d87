use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use tokio::process::Command;

use crate::pipeline::config::PipelineBudget;
use crate::pipeline::error::{Phase, PipelineError};
use crate::pipeline::phase::{ProgressFn, run_phase};
use crate::pipeline::plan::{Plan, Span};
use crate::pipeline::probe;
use crate::pipeline::workspace::Workspace;
use crate::ui;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentState {
    Raw,
    Canonical,
}

/// A media file on disk realizing one span, owned by its slot index.
#[derive(Debug, Clone)]
pub struct SegmentFile {
    pub path: PathBuf,
    pub state: SegmentState,
}

impl SegmentFile {
    pub fn raw(path: PathBuf) -> Self {
        Self {
            path,
            state: SegmentState::Raw,
        }
    }

    pub fn canonical(path: PathBuf) -> Self {
        Self {
            path,
            state: SegmentState::Canonical,
        }
    }
}

/// Materializes a span's time range as a playable local file.
///
/// The contract the pipeline relies on: given a video id and a time range,
/// produce a file containing that range, cut at keyframes, never leaving a
/// partial file at the returned path.
#[async_trait]
pub trait SegmentSource: Send + Sync {
    async fn fetch(&self, span: &Span, dest_stem: &Path) -> Result<PathBuf>;
}

/// Container extensions the source may produce, in preference order.
pub const RAW_EXTENSIONS: [&str; 4] = ["mp4", "webm", "mkv", "m4a"];

/// Cached raw segment for a stem, if any container variant exists. The
/// extension is appended, never substituted: stems contain dots from the
/// fractional-second cache key.
pub fn find_cached(dest_stem: &Path) -> Option<PathBuf> {
    RAW_EXTENSIONS
        .iter()
        .map(|ext| {
            let mut name = dest_stem.as_os_str().to_owned();
            name.push(format!(".{ext}"));
            PathBuf::from(name)
        })
        .find(|candidate| candidate.exists())
}

/// Fetches clip ranges with yt-dlp. The tool downloads to `*.part` and
/// renames on completion, so a file at the destination is always whole.
pub struct YtDlpSource {
    pub format: String,
    pub retries: u32,
    pub socket_timeout_secs: u64,
    pub cookies_from_browser: Option<String>,
}

impl Default for YtDlpSource {
    fn default() -> Self {
        Self {
            format: "bestvideo[height<=720]+bestaudio/best[height<=720]".to_string(),
            retries: 3,
            socket_timeout_secs: 30,
            cookies_from_browser: None,
        }
    }
}

impl YtDlpSource {
    fn build_args(&self, span: &Span, dest_stem: &Path) -> Vec<String> {
        let video_id = span.video_id.as_deref().unwrap_or_default();
        // Clamp only the low end; the upper bound keeps the true interval.
        let start = span.start_time.max(0.0);
        let end = span.start_time + span.duration;

        let mut args = vec![
            "--quiet".to_string(),
            "--no-warnings".to_string(),
            "--no-playlist".to_string(),
            "-f".to_string(),
            self.format.clone(),
            "--download-sections".to_string(),
            format!("*{start:.2}-{end:.2}"),
            "--force-keyframes-at-cuts".to_string(),
            "--retries".to_string(),
            self.retries.to_string(),
            "--socket-timeout".to_string(),
            self.socket_timeout_secs.to_string(),
            "-o".to_string(),
            format!("{}.%(ext)s", dest_stem.display()),
        ];
        if let Some(browser) = &self.cookies_from_browser {
            args.push("--cookies-from-browser".to_string());
            args.push(browser.clone());
        }
        args.push(format!("https://www.youtube.com/watch?v={video_id}"));
        args
    }
}

#[async_trait]
impl SegmentSource for YtDlpSource {
    async fn fetch(&self, span: &Span, dest_stem: &Path) -> Result<PathBuf> {
        let args = self.build_args(span, dest_stem);

        let output = Command::new("yt-dlp")
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to spawn yt-dlp for '{}'", span.text))?;

        if !output.status.success() {
            bail!(
                "yt-dlp failed for '{}': {}",
                span.text,
                summarize_downloader_error(&String::from_utf8_lossy(&output.stderr))
            );
        }

        find_cached(dest_stem).with_context(|| {
            format!(
                "download finished but no file matches {}.*",
                dest_stem.display()
            )
        })
    }
}

/// Collapse noisy downloader stderr into the phrase a user can act on.
fn summarize_downloader_error(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.contains("Private video") || trimmed.contains("Video unavailable") {
        return "video unavailable or private".to_string();
    }
    if trimmed.contains("HTTP Error 403") || trimmed.contains("429") {
        return "HTTP error (may be rate limited)".to_string();
    }
    let last_line = trimmed.lines().last().unwrap_or(trimmed);
    last_line.chars().take(200).collect()
}

/// Fetch phase: one bounded job per non-placeholder span, results re-indexed
/// into plan order. Placeholder slots come back `None`; the orchestrator
/// fills them with synthesized cards.
pub async fn fetch_phase(
    plan: &Plan,
    source: Arc<dyn SegmentSource>,
    workspace: &Workspace,
    budget: &PipelineBudget,
    progress: Option<ProgressFn>,
) -> Result<Vec<Option<SegmentFile>>, PipelineError> {
    let labels: Vec<String> = plan.spans.iter().map(|span| span.text.clone()).collect();

    let jobs: Vec<Option<_>> = plan
        .spans
        .iter()
        .map(|span| {
            if span.is_placeholder() {
                return None;
            }
            let span = span.clone();
            let source = source.clone();
            let dest_stem = workspace.downloads_dir().join(workspace.raw_stem(
                &span,
                budget.clip_padding_start,
                budget.clip_padding_end,
            ));
            Some(async move { fetch_one(source, span, dest_stem).await })
        })
        .collect();

    let eligible = plan.real_count();
    run_phase(
        Phase::Fetch,
        jobs,
        &labels,
        budget.download_workers(),
        budget.download_timeout,
        budget.max_failure_rate,
        eligible,
        progress,
    )
    .await
}

async fn fetch_one(
    source: Arc<dyn SegmentSource>,
    span: Span,
    dest_stem: PathBuf,
) -> Result<SegmentFile> {
    if let Some(cached) = find_cached(&dest_stem) {
        if probe::is_sound(&cached).await {
            ui::debug(
                "fetch.cache.hit",
                &format!("using cached segment for '{}'", span.text),
            );
            return Ok(SegmentFile::raw(cached));
        }
        // Stale or corrupt cache entry; refetch from scratch.
        let _ = std::fs::remove_file(&cached);
    }

    let path = source.fetch(&span, &dest_stem).await?;

    if !probe::is_sound(&path).await {
        let _ = std::fs::remove_file(&path);
        bail!("fetched segment failed validation for '{}'", span.text);
    }

    Ok(SegmentFile::raw(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::tempdir;

    fn span(video: &str, start: f64, duration: f64) -> Span {
        Span::phrase("hello".into(), video.into(), start, start + duration, 1, 0.0, 0.0)
    }

    #[test]
    fn ytdlp_args_request_keyframe_aligned_section() {
        let source = YtDlpSource::default();
        let args = source.build_args(&span("V1", 12.5, 1.25), Path::new("/tmp/stem"));
        let joined = args.join(" ");
        assert!(joined.contains("--download-sections *12.50-13.75"));
        assert!(joined.contains("--force-keyframes-at-cuts"));
        assert!(joined.contains("-o /tmp/stem.%(ext)s"));
        assert!(joined.ends_with("https://www.youtube.com/watch?v=V1"));
        assert!(!joined.contains("--cookies-from-browser"));
    }

    #[test]
    fn ytdlp_args_include_cookies_when_configured() {
        let source = YtDlpSource {
            cookies_from_browser: Some("firefox".to_string()),
            ..Default::default()
        };
        let args = source.build_args(&span("V1", 0.0, 1.0), Path::new("/tmp/stem"));
        assert!(args.join(" ").contains("--cookies-from-browser firefox"));
    }

    #[test]
    fn negative_start_is_clamped_in_section_range() {
        let source = YtDlpSource::default();
        let mut clip = span("V1", 0.0, 1.0);
        clip.start_time = -0.5;
        let args = source.build_args(&clip, Path::new("/tmp/stem"));
        assert!(args.join(" ").contains("*0.00-0.50"));
    }

    #[test]
    fn find_cached_appends_rather_than_replaces_extensions() {
        let dir = tempdir().unwrap();
        let stem = dir.path().join("V1_1.00_2.00_p0.00-0.00");
        assert!(find_cached(&stem).is_none());

        // The dotted stem must survive intact in front of the extension.
        let cached = PathBuf::from(format!("{}.webm", stem.display()));
        std::fs::write(&cached, b"x").unwrap();
        assert_eq!(find_cached(&stem).unwrap(), cached);
    }

    #[test]
    fn downloader_errors_are_summarized() {
        assert_eq!(
            summarize_downloader_error("ERROR: Private video, sign in"),
            "video unavailable or private"
        );
        assert_eq!(
            summarize_downloader_error("blah\nHTTP Error 403: Forbidden"),
            "HTTP error (may be rate limited)"
        );
        let long = format!("line1\n{}", "e".repeat(300));
        assert_eq!(summarize_downloader_error(&long).len(), 200);
    }
}
