mod cli;
mod common;
mod index;
mod pipeline;
mod ui;

use std::sync::{Arc, Mutex};

use anyhow::Result;
use clap::Parser;
use indicatif::ProgressBar;

use crate::cli::{Cli, Commands, GenerateArgs, StatsArgs};
use crate::common::{progress, tools};
use crate::index::ClipIndex;
use crate::pipeline::fetch::YtDlpSource;
use crate::pipeline::orchestrator::resolve_output_name;
use crate::pipeline::phase::ProgressFn;
use crate::pipeline::{AspectRatio, PipelineBudget, PipelineError, Stitcher, StyleOptions};
use crate::ui::prelude::*;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };
    ui::init(format, !cli.json, cli.verbose);

    let exit_code = match run(cli).await {
        Ok(()) => 0,
        Err(err) => {
            let cancelled = matches!(
                err.downcast_ref::<PipelineError>(),
                Some(PipelineError::Cancelled)
            );
            error("main.error", &format!("{err:#}"));
            if cancelled { 130 } else { 1 }
        }
    };
    std::process::exit(exit_code);
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Generate(args) => handle_generate(args).await,
        Commands::Stats(args) => handle_stats(args),
        Commands::Check => handle_check(),
    }
}

async fn handle_generate(args: GenerateArgs) -> Result<()> {
    tools::verify_required()?;

    let budget = PipelineBudget {
        max_download_workers: args.download_workers,
        max_transcode_workers: args.transcode_workers,
        download_timeout: std::time::Duration::from_secs(args.download_timeout),
        transcode_timeout: std::time::Duration::from_secs(args.transcode_timeout),
        max_failure_rate: args.max_failure_rate,
        max_phrase_length: args.max_phrase_length,
        clip_padding_start: args.padding_start,
        clip_padding_end: args.padding_end,
        normalize_audio: !args.no_normalize,
        allow_placeholders: !args.strict,
        incremental_concat: args.incremental,
        cleanup_temp_files: !args.no_cleanup,
        keep_download_cache: !args.no_download_cache,
        channel_filter: args.channel.clone(),
        ..Default::default()
    };

    let style = StyleOptions {
        aspect_ratio: args.aspect_ratio.parse::<AspectRatio>()?,
        add_subtitles: args.subtitles,
        watermark_text: args.watermark.clone(),
        watermark_corner: args.watermark_corner.parse()?,
        intro_text: args.intro.clone(),
        outro_text: args.outro.clone(),
        ..Default::default()
    };

    let spinner = matches!(get_output_format(), OutputFormat::Text)
        .then(|| progress::create_spinner("opening clip index".to_string()));
    let index = ClipIndex::open(&args.database)?;
    if let Some(pb) = spinner {
        progress::finish_spinner_with_success(
            pb,
            format!("index opened: {}", args.database.display()),
        );
    }
    let source = Arc::new(YtDlpSource {
        format: args.quality.clone(),
        cookies_from_browser: args.cookies_from_browser.clone(),
        ..Default::default()
    });

    let stitcher = Stitcher::new(index, budget, style, source, &args.temp_dir, &args.output_dir)?;
    let output_name = resolve_output_name(args.output.as_deref());

    let artifact = tokio::select! {
        result = stitcher.generate(&args.text, &output_name, phase_progress()) => result?,
        _ = tokio::signal::ctrl_c() => {
            return Err(PipelineError::Cancelled.into());
        }
    };

    separator();
    success(
        "generate.output",
        &format!("video created: {}", artifact.output_path.display()),
    );
    info(
        "generate.timings",
        &format!("{} word timings generated", artifact.timings.len()),
    );
    if matches!(get_output_format(), OutputFormat::Json) {
        success_with_data(
            "generate.result",
            "generation complete",
            serde_json::json!({
                "output_path": artifact.output_path,
                "timings": artifact.timings,
            }),
        );
    }

    Ok(())
}

/// Progress bar shared by the fetch and transcode phases; re-created when a
/// phase with a different segment count starts. Text mode only.
fn phase_progress() -> Option<ProgressFn> {
    if matches!(get_output_format(), OutputFormat::Json) {
        return None;
    }

    let state: Arc<Mutex<Option<ProgressBar>>> = Arc::new(Mutex::new(None));
    Some(Arc::new(move |done, total| {
        let mut bar = state.lock().expect("progress bar poisoned");
        let stale = bar
            .as_ref()
            .map(|b| b.length() != Some(total as u64))
            .unwrap_or(true);
        if stale {
            if let Some(old) = bar.take() {
                old.finish_and_clear();
            }
            *bar = Some(progress::create_phase_bar(
                total as u64,
                "processing segments".to_string(),
            ));
        }
        if let Some(b) = bar.as_ref() {
            b.set_position(done as u64);
            if done == total {
                b.finish_and_clear();
            }
        }
    }))
}

fn handle_stats(args: StatsArgs) -> Result<()> {
    let index = ClipIndex::open(&args.database)?;
    let stats = index.stats()?;

    info(
        "stats.clips",
        &format!("indexed word clips: {}", stats.total_clips),
    );
    info(
        "stats.videos",
        &format!("distinct videos: {}", stats.unique_videos),
    );
    info(
        "stats.duration",
        &format!("average clip duration: {:.2}s", stats.avg_clip_duration),
    );
    info(
        "stats.transcripts",
        &format!("transcripts available: {}", stats.transcripts),
    );
    if matches!(get_output_format(), OutputFormat::Json) {
        success_with_data(
            "stats.result",
            "index statistics",
            serde_json::json!({
                "total_clips": stats.total_clips,
                "unique_videos": stats.unique_videos,
                "avg_clip_duration": stats.avg_clip_duration,
                "transcripts": stats.transcripts,
            }),
        );
    }

    Ok(())
}

fn handle_check() -> Result<()> {
    let mut all_present = true;
    for tool in tools::REQUIRED_TOOLS {
        match tools::locate(tool) {
            Some(path) => success(
                "check.tool",
                &format!(
                    "{} found at {} ({})",
                    tool.name,
                    path.display(),
                    tool.purpose
                ),
            ),
            None => {
                all_present = false;
                error(
                    "check.tool.missing",
                    &format!("{} not found on PATH ({})", tool.name, tool.purpose),
                );
            }
        }
    }

    if !all_present {
        anyhow::bail!("some required tools are missing");
    }
    success("check.done", "all required tools are available");
    Ok(())
}
