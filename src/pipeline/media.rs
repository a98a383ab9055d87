use std::path::Path;
use std::process::Stdio;

use anyhow::{Context, Result, bail};
use tokio::process::Command;

/// Stream parameters shared by every segment that reaches the concatenator.
#[derive(Debug, Clone, Copy)]
pub struct EncodingProfile {
    pub video_codec: &'static str,
    pub preset: &'static str,
    pub crf: &'static str,
    pub pix_fmt: &'static str,
    pub frame_rate: &'static str,
    pub keyframe_interval: &'static str,
    pub audio_codec: &'static str,
    pub audio_bitrate: &'static str,
    pub sample_rate: &'static str,
    pub channels: &'static str,
    pub movflags: Option<&'static str>,
}

/// The canonical format: concatenation is only safe once every input
/// carries exactly these stream parameters.
pub const PROFILE_CANONICAL: EncodingProfile = EncodingProfile {
    video_codec: "libx264",
    preset: "ultrafast",
    crf: "23",
    pix_fmt: "yuv420p",
    frame_rate: "30",
    keyframe_interval: "30",
    audio_codec: "aac",
    audio_bitrate: "128k",
    sample_rate: "44100",
    channels: "2",
    movflags: Some("+faststart"),
};

pub const LOUDNORM_FILTER: &str = "loudnorm=I=-16:TP=-1.5:LRA=11";

impl EncodingProfile {
    pub fn push_to(&self, args: &mut Vec<String>) {
        args.push("-c:v".to_string());
        args.push(self.video_codec.to_string());
        args.push("-preset".to_string());
        args.push(self.preset.to_string());
        args.push("-crf".to_string());
        args.push(self.crf.to_string());
        args.push("-pix_fmt".to_string());
        args.push(self.pix_fmt.to_string());
        args.push("-r".to_string());
        args.push(self.frame_rate.to_string());
        args.push("-g".to_string());
        args.push(self.keyframe_interval.to_string());
        args.push("-c:a".to_string());
        args.push(self.audio_codec.to_string());
        args.push("-b:a".to_string());
        args.push(self.audio_bitrate.to_string());
        args.push("-ar".to_string());
        args.push(self.sample_rate.to_string());
        args.push("-ac".to_string());
        args.push(self.channels.to_string());
        if let Some(movflags) = self.movflags {
            args.push("-movflags".to_string());
            args.push(movflags.to_string());
        }
    }
}

/// Run ffmpeg to completion. The child is killed if the surrounding task is
/// dropped, so phase deadlines and Ctrl-C reach the subprocess.
pub async fn run_ffmpeg(args: &[String], ctx: &str) -> Result<()> {
    let output = Command::new("ffmpeg")
        .args(args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .with_context(|| format!("Failed to spawn ffmpeg {ctx}"))?;

    if !output.status.success() {
        bail!(
            "ffmpeg failed {}: {}",
            ctx,
            stderr_tail(&output.stderr, 400)
        );
    }

    Ok(())
}

fn stderr_tail(stderr: &[u8], max: usize) -> String {
    let text = String::from_utf8_lossy(stderr);
    let trimmed = text.trim();
    if trimmed.len() <= max {
        return trimmed.to_string();
    }
    let start = trimmed.len() - max;
    let start = trimmed
        .char_indices()
        .map(|(i, _)| i)
        .find(|&i| i >= start)
        .unwrap_or(0);
    format!("…{}", &trimmed[start..])
}

/// Re-encode to the canonical format, optionally loudness-normalizing the
/// audio in the same pass.
pub async fn encode_canonical(input: &Path, output: &Path, normalize_audio: bool) -> Result<()> {
    let mut args = vec!["-y".to_string(), "-i".to_string(), path_arg(input)];
    if normalize_audio {
        args.push("-af".to_string());
        args.push(LOUDNORM_FILTER.to_string());
    }
    PROFILE_CANONICAL.push_to(&mut args);
    args.push(path_arg(output));

    run_ffmpeg(&args, &format!("to canonicalize {}", input.display())).await
}

pub fn letterbox_filter(width: u32, height: u32, pad_color: &str) -> String {
    format!(
        "scale={width}:{height}:force_original_aspect_ratio=decrease,\
         pad={width}:{height}:(ow-iw)/2:(oh-ih)/2:color={pad_color}"
    )
}

/// Scale to fit inside the target slot and pad the rest, never cropping.
pub async fn letterbox(
    input: &Path,
    output: &Path,
    width: u32,
    height: u32,
    pad_color: &str,
) -> Result<()> {
    let mut args = vec![
        "-y".to_string(),
        "-i".to_string(),
        path_arg(input),
        "-vf".to_string(),
        letterbox_filter(width, height, pad_color),
    ];
    push_video_only(&mut args);
    args.push(path_arg(output));

    run_ffmpeg(&args, &format!("to letterbox {}", input.display())).await
}

/// Lower-third caption with a semi-opaque box.
pub async fn subtitle_overlay(input: &Path, output: &Path, text: &str) -> Result<()> {
    let filter = format!(
        "drawtext=text='{}':fontsize=48:fontcolor=white:\
         x=(w-text_w)/2:y=h-text_h-h*0.1:box=1:boxcolor=black@0.6:boxborderw=10",
        escape_drawtext(text)
    );
    let mut args = vec![
        "-y".to_string(),
        "-i".to_string(),
        path_arg(input),
        "-vf".to_string(),
        filter,
    ];
    push_video_only(&mut args);
    args.push(path_arg(output));

    run_ffmpeg(&args, &format!("to subtitle {}", input.display())).await
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Corner {
    TopLeft,
    TopRight,
    BottomLeft,
    #[default]
    BottomRight,
}

impl Corner {
    fn positions(self) -> (&'static str, &'static str) {
        match self {
            Corner::TopLeft => ("10", "10"),
            Corner::TopRight => ("w-text_w-10", "10"),
            Corner::BottomLeft => ("10", "h-text_h-10"),
            Corner::BottomRight => ("w-text_w-10", "h-text_h-10"),
        }
    }
}

impl std::str::FromStr for Corner {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "top-left" => Ok(Corner::TopLeft),
            "top-right" => Ok(Corner::TopRight),
            "bottom-left" => Ok(Corner::BottomLeft),
            "bottom-right" => Ok(Corner::BottomRight),
            other => bail!("unknown watermark corner '{other}'"),
        }
    }
}

pub async fn watermark(input: &Path, output: &Path, text: &str, corner: Corner) -> Result<()> {
    let (x, y) = corner.positions();
    let filter = format!(
        "drawtext=text='{}':fontsize=24:fontcolor=white@0.7:\
         x={x}:y={y}:shadowcolor=black@0.5:shadowx=2:shadowy=2",
        escape_drawtext(text)
    );
    let mut args = vec![
        "-y".to_string(),
        "-i".to_string(),
        path_arg(input),
        "-vf".to_string(),
        filter,
    ];
    push_video_only(&mut args);
    args.push(path_arg(output));

    run_ffmpeg(&args, &format!("to watermark {}", input.display())).await
}

/// Solid-color card with the text centered and silent stereo audio, encoded
/// straight to the canonical format.
pub async fn title_card(
    output: &Path,
    text: &str,
    width: u32,
    height: u32,
    duration: f64,
    bg_color: &str,
    text_color: &str,
) -> Result<()> {
    let filter = format!(
        "drawtext=text='{}':fontsize=72:fontcolor={text_color}:\
         x=(w-text_w)/2:y=(h-text_h)/2",
        escape_drawtext(text)
    );
    let mut args = vec![
        "-y".to_string(),
        "-f".to_string(),
        "lavfi".to_string(),
        "-i".to_string(),
        format!("color=c={bg_color}:s={width}x{height}:d={duration}:r=30"),
        "-f".to_string(),
        "lavfi".to_string(),
        "-i".to_string(),
        "anullsrc=channel_layout=stereo:sample_rate=44100".to_string(),
        "-vf".to_string(),
        filter,
        "-shortest".to_string(),
    ];
    PROFILE_CANONICAL.push_to(&mut args);
    args.push(path_arg(output));

    run_ffmpeg(&args, &format!("to create title card '{text}'")).await
}

/// Canonical video settings with the audio stream copied through, for steps
/// that only touch pixels.
fn push_video_only(args: &mut Vec<String>) {
    let p = PROFILE_CANONICAL;
    args.extend(
        [
            "-c:v",
            p.video_codec,
            "-preset",
            p.preset,
            "-crf",
            p.crf,
            "-pix_fmt",
            p.pix_fmt,
            "-c:a",
            "copy",
        ]
        .iter()
        .map(|s| s.to_string()),
    );
}

pub fn escape_drawtext(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace(':', "\\:")
        .replace('\'', "\\'")
        .replace('%', "\\%")
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
