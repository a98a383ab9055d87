use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use serde::Serialize;

use crate::index::ClipIndex;
use crate::pipeline::concat;
use crate::pipeline::config::{PipelineBudget, StyleOptions};
use crate::pipeline::error::PipelineError;
use crate::pipeline::fetch::{self, SegmentFile, SegmentSource};
use crate::pipeline::phase::ProgressFn;
use crate::pipeline::plan::{self, Plan};
use crate::pipeline::probe;
use crate::pipeline::transcode;
use crate::pipeline::workspace::{CleanupGuard, Workspace};
use crate::ui;

/// Position of one word (or phrase) on the output timeline, in output order.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WordTiming {
    pub word: String,
    pub start_sec: f64,
    pub end_sec: f64,
}

#[derive(Debug, Clone)]
pub struct FinalArtifact {
    pub output_path: PathBuf,
    pub timings: Vec<WordTiming>,
}

/// Drives the pipeline: plan, fetch, transcode, concatenate, time.
///
/// Owns the temp workspace; every exit path (success, error, cancellation)
/// tears it down according to the budget's cleanup settings.
pub struct Stitcher {
    index: ClipIndex,
    budget: PipelineBudget,
    style: StyleOptions,
    workspace: Workspace,
    output_dir: PathBuf,
    source: Arc<dyn SegmentSource>,
}

impl Stitcher {
    pub fn new(
        index: ClipIndex,
        budget: PipelineBudget,
        style: StyleOptions,
        source: Arc<dyn SegmentSource>,
        temp_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
    ) -> Result<Self> {
        budget.validate()?;

        if budget.channel_filter.is_some() && !index.has_video_metadata() {
            return Err(PipelineError::InvalidOption(
                "channel filtering requires video metadata in the index".to_string(),
            )
            .into());
        }

        let output_dir = output_dir.into();
        std::fs::create_dir_all(&output_dir).with_context(|| {
            format!("Failed to create output directory {}", output_dir.display())
        })?;

        let workspace = Workspace::create(temp_dir.into())?;
        let (width, height) = style.aspect_ratio.dimensions();
        ui::debug(
            "workspace.ready",
            &format!(
                "workspace at {}, output slot {} ({}x{})",
                workspace.root().display(),
                style.aspect_ratio.as_str(),
                width,
                height
            ),
        );

        Ok(Self {
            index,
            budget,
            style,
            workspace,
            output_dir,
            source,
        })
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Generate a video for `text` at `output_dir/output_name`.
    ///
    /// Returns the absolute output path and per-word timings covering the
    /// output timeline contiguously (after the intro card, if any).
    pub async fn generate(
        &self,
        text: &str,
        output_name: &str,
        progress: Option<ProgressFn>,
    ) -> Result<FinalArtifact> {
        let started = Instant::now();
        let _guard = CleanupGuard::new(
            &self.workspace,
            self.budget.cleanup_temp_files,
            self.budget.keep_download_cache,
        );

        ui::info("generate.start", &format!("generating video from: '{text}'"));

        // Step 1: tokenize
        let words = plan::tokenize(text);
        if words.is_empty() {
            return Err(PipelineError::EmptyInput.into());
        }

        // Step 2: plan
        let lookup_started = Instant::now();
        let plan = plan::build_plan(&words, &self.index, &self.budget)?;
        self.check_plan(&plan)?;
        self.report_diversity(&plan);
        ui::debug(
            "plan.ready",
            &format!(
                "{} spans covering {} words",
                plan.spans.len(),
                plan.words().len()
            ),
        );
        let lookup_time = lookup_started.elapsed();

        // Step 3: fetch raw segments, then fill placeholder slots
        ui::info(
            "generate.fetch",
            &format!("fetching {} segments", plan.real_count()),
        );
        let fetch_started = Instant::now();
        let mut slots = fetch::fetch_phase(
            &plan,
            self.source.clone(),
            &self.workspace,
            &self.budget,
            progress.clone(),
        )
        .await?;
        let fetch_time = fetch_started.elapsed();

        for (i, span) in plan.spans.iter().enumerate() {
            if span.is_placeholder() {
                ui::info(
                    "generate.placeholder",
                    &format!("creating placeholder card for '{}'", span.text),
                );
                slots[i] = Some(
                    transcode::render_placeholder(
                        &self.workspace,
                        i,
                        &span.text,
                        &self.style,
                        span.duration,
                    )
                    .await?,
                );
            }
        }

        if slots.iter().all(Option::is_none) {
            bail!("failed to fetch or synthesize any segments");
        }

        // Step 4: transcode every populated slot to the canonical format
        ui::info("generate.transcode", "canonicalizing segments");
        let transcode_started = Instant::now();
        let canonical = transcode::transcode_phase(
            slots,
            &plan,
            &self.workspace,
            &self.budget,
            &self.style,
            progress,
        )
        .await?;
        let transcode_time = transcode_started.elapsed();

        let survivors = self.collect_survivors(&plan, canonical);
        if survivors.is_empty() {
            bail!("no segments survived transcoding");
        }

        // Step 5: cards, concatenation
        let concat_started = Instant::now();
        let mut inputs: Vec<PathBuf> = Vec::new();
        let mut intro_duration = 0.0;

        if let Some(intro_text) = &self.style.intro_text {
            let card = transcode::render_card(&self.workspace, intro_text, &self.style).await?;
            intro_duration = probe::duration(&card.path)
                .await
                .unwrap_or(self.style.card_duration);
            inputs.push(card.path);
        }
        inputs.extend(survivors.iter().map(|s| s.path.clone()));
        if let Some(outro_text) = &self.style.outro_text {
            let card = transcode::render_card(&self.workspace, outro_text, &self.style).await?;
            inputs.push(card.path);
        }

        let output_path = self.output_dir.join(output_name);
        let concat_result = if self.budget.incremental_concat {
            concat::concatenate_incremental(&inputs, &output_path, &self.workspace.concat_dir())
                .await
        } else {
            concat::concatenate(&inputs, &output_path, &self.workspace.concat_dir()).await
        };
        concat_result.map_err(|err| PipelineError::ConcatFailed(format!("{err:#}")))?;
        let concat_time = concat_started.elapsed();

        match probe::properties(&output_path).await {
            Ok(props) => ui::debug(
                "generate.output.probe",
                &format!(
                    "output: {:.2}s {}x{} {} @ {:.0} fps, audio {} {} Hz",
                    props.duration_sec,
                    props.width,
                    props.height,
                    props.video_codec,
                    props.fps,
                    props.audio_codec.as_deref().unwrap_or("none"),
                    props.sample_rate.unwrap_or(0),
                ),
            ),
            Err(err) => ui::warn(
                "generate.output.probe",
                &format!("could not probe output properties: {err}"),
            ),
        }

        // Step 6: per-word timings from the files that made the cut
        let timings = self.compute_timings(&survivors, intro_duration).await;

        let output_path = output_path
            .canonicalize()
            .unwrap_or(output_path);

        ui::debug(
            "generate.summary",
            &format!(
                "lookup {:.2}s, fetch {:.2}s, transcode {:.2}s, concat {:.2}s",
                lookup_time.as_secs_f64(),
                fetch_time.as_secs_f64(),
                transcode_time.as_secs_f64(),
                concat_time.as_secs_f64(),
            ),
        );
        ui::success(
            "generate.done",
            &format!(
                "video generated in {:.1}s: {}",
                started.elapsed().as_secs_f64(),
                output_path.display()
            ),
        );

        Ok(FinalArtifact {
            output_path,
            timings,
        })
    }

    fn check_plan(&self, plan: &Plan) -> Result<(), PipelineError> {
        if !self.budget.allow_placeholders && !plan.missing_words.is_empty() {
            return Err(PipelineError::PlanEmpty {
                missing: plan.missing_words.clone(),
            });
        }
        if plan.real_count() == 0 {
            return Err(PipelineError::PlanEmpty {
                missing: plan.missing_words.clone(),
            });
        }
        Ok(())
    }

    fn report_diversity(&self, plan: &Plan) {
        let real = plan.real_count();
        let unique = plan.unique_videos();
        let message = if unique < real {
            format!("{unique} unique videos used for {real} clips")
        } else {
            format!("all clips from different videos ({unique} unique)")
        };
        ui::debug("plan.diversity", &message);
        if plan.placeholder_count() > 0 {
            ui::info(
                "plan.placeholders",
                &format!(
                    "using placeholders for {} words: {}",
                    plan.missing_words.len(),
                    plan.missing_words.join(", ")
                ),
            );
        }
    }

    /// Keep populated slots in plan order; a `None` slot in the middle is
    /// skipped but the remaining order holds.
    fn collect_survivors(&self, plan: &Plan, slots: Vec<Option<SegmentFile>>) -> Vec<Survivor> {
        let mut survivors = Vec::new();
        for (span, slot) in plan.spans.iter().zip(slots) {
            match slot {
                Some(segment) => survivors.push(Survivor {
                    word: span.text.clone(),
                    path: segment.path,
                    fallback_duration: span.duration,
                }),
                None => ui::warn(
                    "generate.slot.skipped",
                    &format!("segment for '{}' missing from output", span.text),
                ),
            }
        }
        survivors
    }

    async fn compute_timings(&self, survivors: &[Survivor], intro_duration: f64) -> Vec<WordTiming> {
        let mut timings = Vec::with_capacity(survivors.len());
        let mut t = intro_duration;
        for survivor in survivors {
            let duration = match probe::duration(&survivor.path).await {
                Ok(duration) => duration,
                Err(err) => {
                    ui::warn(
                        "generate.timing.fallback",
                        &format!(
                            "could not probe duration for '{}', using planned duration: {err}",
                            survivor.word
                        ),
                    );
                    survivor.fallback_duration
                }
            };
            timings.push(WordTiming {
                word: survivor.word.clone(),
                start_sec: t,
                end_sec: t + duration,
            });
            t += duration;
        }
        timings
    }
}

struct Survivor {
    word: String,
    path: PathBuf,
    fallback_duration: f64,
}

/// Default output name when the caller does not provide one.
pub fn default_output_name() -> String {
    format!("stitched_{}.mp4", chrono::Local::now().format("%Y%m%d_%H%M%S"))
}

pub fn resolve_output_name(requested: Option<&str>) -> String {
    match requested {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => default_output_name(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::path::Path;

    use async_trait::async_trait;
    use rusqlite::Connection;
    use tempfile::tempdir;

    use crate::pipeline::plan::Span;

    struct RefusingSource;

    #[async_trait]
    impl SegmentSource for RefusingSource {
        async fn fetch(&self, span: &Span, _dest_stem: &Path) -> Result<PathBuf> {
            bail!("unexpected fetch for '{}'", span.text)
        }
    }

    fn empty_index(dir: &Path) -> ClipIndex {
        let db_path = dir.join("index.db");
        let conn = Connection::open(&db_path).unwrap();
        conn.execute_batch(
            "CREATE TABLE word_clips (word TEXT, video_id TEXT, start_time REAL, duration REAL);",
        )
        .unwrap();
        drop(conn);
        ClipIndex::open(&db_path).unwrap()
    }

    fn stitcher(dir: &Path, budget: PipelineBudget) -> Stitcher {
        Stitcher::new(
            empty_index(dir),
            budget,
            StyleOptions::default(),
            Arc::new(RefusingSource),
            dir.join("temp"),
            dir.join("output"),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn empty_text_fails_before_any_fetch() {
        let dir = tempdir().unwrap();
        let stitcher = stitcher(
            dir.path(),
            PipelineBudget {
                cleanup_temp_files: false,
                ..Default::default()
            },
        );

        let err = stitcher.generate("...", "out.mp4", None).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::EmptyInput)
        ));
    }

    #[tokio::test]
    async fn all_missing_words_fail_with_plan_empty() {
        let dir = tempdir().unwrap();
        let stitcher = stitcher(
            dir.path(),
            PipelineBudget {
                cleanup_temp_files: false,
                ..Default::default()
            },
        );

        let err = stitcher
            .generate("xyzzy plugh", "out.mp4", None)
            .await
            .unwrap_err();
        match err.downcast_ref::<PipelineError>() {
            Some(PipelineError::PlanEmpty { missing }) => {
                assert_eq!(missing, &vec!["xyzzy".to_string(), "plugh".to_string()]);
            }
            other => panic!("expected PlanEmpty, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cleanup_guard_runs_on_failure() {
        let dir = tempdir().unwrap();
        let stitcher = stitcher(dir.path(), PipelineBudget::default());

        let processed = stitcher.workspace().processed_dir();
        assert!(processed.exists());

        let _ = stitcher.generate("xyzzy", "out.mp4", None).await;
        assert!(!processed.exists());
        // The raw-segment cache survives by default.
        assert!(stitcher.workspace().downloads_dir().exists());
    }

    #[test]
    fn channel_filter_requires_metadata() {
        let dir = tempdir().unwrap();
        let index = empty_index(dir.path());
        let result = Stitcher::new(
            index,
            PipelineBudget {
                channel_filter: Some("CH".to_string()),
                ..Default::default()
            },
            StyleOptions::default(),
            Arc::new(RefusingSource),
            dir.path().join("temp"),
            dir.path().join("output"),
        );
        assert!(result.is_err());
    }

    #[test]
    fn resolve_output_name_prefers_request() {
        assert_eq!(resolve_output_name(Some("clip.mp4")), "clip.mp4");
        assert!(resolve_output_name(None).starts_with("stitched_"));
    }

    #[tokio::test]
    async fn timings_are_contiguous_from_the_intro_onward() {
        let dir = tempdir().unwrap();
        let stitcher = stitcher(
            dir.path(),
            PipelineBudget {
                cleanup_temp_files: false,
                ..Default::default()
            },
        );

        // Unprobeable paths fall back to the planned durations.
        let survivors = vec![
            Survivor {
                word: "hello".to_string(),
                path: dir.path().join("missing_a.mp4"),
                fallback_duration: 1.5,
            },
            Survivor {
                word: "world".to_string(),
                path: dir.path().join("missing_b.mp4"),
                fallback_duration: 0.5,
            },
        ];

        let timings = stitcher.compute_timings(&survivors, 2.0).await;
        assert_eq!(timings.len(), 2);
        assert!((timings[0].start_sec - 2.0).abs() < 1e-9);
        assert!((timings[0].end_sec - 3.5).abs() < 1e-9);
        assert!((timings[1].start_sec - timings[0].end_sec).abs() < 1e-9);
        assert!((timings[1].end_sec - 4.0).abs() < 1e-9);
    }
}
