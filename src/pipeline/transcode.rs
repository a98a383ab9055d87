use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use sha2::{Digest, Sha256};

use crate::pipeline::config::{PipelineBudget, StyleOptions};
use crate::pipeline::error::{Phase, PipelineError};
use crate::pipeline::fetch::{SegmentFile, SegmentState};
use crate::pipeline::media;
use crate::pipeline::phase::{ProgressFn, run_phase};
use crate::pipeline::plan::Plan;
use crate::pipeline::probe;
use crate::pipeline::workspace::Workspace;
use crate::ui;

/// Everything one transcode worker needs; owned, so workers share nothing.
#[derive(Clone)]
struct SegmentTask {
    text: String,
    stem: String,
    processed_dir: PathBuf,
    canonical_path: PathBuf,
    normalize_audio: bool,
    style: StyleOptions,
}

/// Transcode phase: coerce every populated slot into the canonical format.
///
/// Placeholder cards arrive already canonical and only get validated. The
/// failure gate divides by the non-placeholder job count.
pub async fn transcode_phase(
    slots: Vec<Option<SegmentFile>>,
    plan: &Plan,
    workspace: &Workspace,
    budget: &PipelineBudget,
    style: &StyleOptions,
    progress: Option<ProgressFn>,
) -> Result<Vec<Option<SegmentFile>>, PipelineError> {
    let labels: Vec<String> = plan.spans.iter().map(|span| span.text.clone()).collect();
    let eligible = plan
        .spans
        .iter()
        .zip(&slots)
        .filter(|(span, slot)| !span.is_placeholder() && slot.is_some())
        .count();

    let jobs: Vec<Option<_>> = plan
        .spans
        .iter()
        .zip(slots)
        .map(|(span, slot)| {
            let segment = slot?;
            let stem =
                workspace.raw_stem(span, budget.clip_padding_start, budget.clip_padding_end);
            let task = SegmentTask {
                text: span.text.clone(),
                canonical_path: workspace.canonical_path(&stem),
                stem,
                processed_dir: workspace.processed_dir(),
                normalize_audio: budget.normalize_audio,
                style: style.clone(),
            };
            Some(canonicalize_one(segment, task))
        })
        .collect();

    run_phase(
        Phase::Transcode,
        jobs,
        &labels,
        budget.transcode_workers(),
        budget.transcode_timeout,
        budget.max_failure_rate,
        eligible,
        progress,
    )
    .await
}

async fn canonicalize_one(segment: SegmentFile, task: SegmentTask) -> Result<SegmentFile> {
    // Whole-segment cache across runs.
    if task.canonical_path.exists() && probe::is_sound(&task.canonical_path).await {
        ui::debug(
            "transcode.cache.hit",
            &format!("using cached canonical segment for '{}'", task.text),
        );
        return Ok(SegmentFile::canonical(task.canonical_path));
    }

    if segment.state == SegmentState::Canonical {
        // Title cards are rendered straight to the canonical contract.
        if !probe::is_sound(&segment.path).await {
            bail!("placeholder card failed validation for '{}'", task.text);
        }
        return Ok(segment);
    }

    let encoded = task.step_path("encoded");
    run_step(&encoded, &task.text, {
        let input = segment.path.clone();
        let normalize = task.normalize_audio;
        let out = encoded.clone();
        async move { media::encode_canonical(&input, &out, normalize).await }
    })
    .await?;

    let (width, height) = task.style.aspect_ratio.dimensions();
    let boxed = task.step_path("boxed");
    run_step(&boxed, &task.text, {
        let input = encoded.clone();
        let out = boxed.clone();
        let pad_color = task.style.pad_color.clone();
        async move { media::letterbox(&input, &out, width, height, &pad_color).await }
    })
    .await?;

    let mut current = boxed.clone();

    if task.style.add_subtitles {
        let subtitled = task.step_path("subtitled");
        run_step(&subtitled, &task.text, {
            let input = current.clone();
            let out = subtitled.clone();
            let text = task.text.clone();
            async move { media::subtitle_overlay(&input, &out, &text).await }
        })
        .await?;
        current = subtitled;
    }

    if let Some(watermark_text) = task.style.watermark_text.clone() {
        let watermarked = task.step_path("watermarked");
        let corner = task.style.watermark_corner;
        run_step(&watermarked, &task.text, {
            let input = current.clone();
            let out = watermarked.clone();
            async move { media::watermark(&input, &out, &watermark_text, corner).await }
        })
        .await?;
        current = watermarked;
    }

    fs::rename(&current, &task.canonical_path).with_context(|| {
        format!(
            "Failed to move canonical segment into place at {}",
            task.canonical_path.display()
        )
    })?;

    task.remove_intermediates();

    Ok(SegmentFile::canonical(task.canonical_path))
}

impl SegmentTask {
    fn step_path(&self, step: &str) -> PathBuf {
        self.processed_dir.join(format!("{}_{step}.mp4", self.stem))
    }

    fn remove_intermediates(&self) {
        for step in ["encoded", "boxed", "subtitled", "watermarked"] {
            let path = self.step_path(step);
            if path.exists() {
                let _ = fs::remove_file(path);
            }
        }
    }
}

/// Run one cached step: reuse a sound existing output, otherwise produce it
/// and validate before handing it to the next step.
async fn run_step<F>(output: &Path, text: &str, produce: F) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    if output.exists() && probe::is_sound(output).await {
        return Ok(());
    }

    produce.await?;

    if !probe::is_sound(output).await {
        let _ = fs::remove_file(output);
        bail!(
            "invalid intermediate for '{text}' at {}",
            output.display()
        );
    }

    Ok(())
}

/// Title card standing in for a word the index cannot serve. Rendered at
/// the slot resolution so it is canonical from birth.
pub async fn render_placeholder(
    workspace: &Workspace,
    slot: usize,
    word: &str,
    style: &StyleOptions,
    duration: f64,
) -> Result<SegmentFile> {
    let path = workspace.placeholder_path(slot, word);
    if !(path.exists() && probe::is_sound(&path).await) {
        let (width, height) = style.aspect_ratio.dimensions();
        media::title_card(&path, word, width, height, duration, "gray", "white").await?;
    }
    Ok(SegmentFile::canonical(path))
}

/// Intro/outro card, cached by content so repeated texts render once.
pub async fn render_card(
    workspace: &Workspace,
    text: &str,
    style: &StyleOptions,
) -> Result<SegmentFile> {
    let (width, height) = style.aspect_ratio.dimensions();
    let key = card_cache_key(text, width, height, style.card_duration);
    let path = workspace.card_path(&format!("card_{}", &key[..16]));
    if !(path.exists() && probe::is_sound(&path).await) {
        media::title_card(
            &path,
            text,
            width,
            height,
            style.card_duration,
            "black",
            "white",
        )
        .await?;
    }
    Ok(SegmentFile::canonical(path))
}

fn card_cache_key(text: &str, width: u32, height: u32, duration: f64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(width.to_le_bytes());
    hasher.update(height.to_le_bytes());
    hasher.update(duration.to_le_bytes());
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
