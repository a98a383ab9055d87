use std::str::FromStr;
use std::time::Duration;

use crate::pipeline::error::PipelineError;
use crate::pipeline::media::Corner;

/// Output frame slot. Inputs are scaled to fit and padded, never cropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AspectRatio {
    #[default]
    Wide,
    Tall,
    Square,
}

impl AspectRatio {
    pub fn dimensions(self) -> (u32, u32) {
        match self {
            AspectRatio::Wide => (1920, 1080),
            AspectRatio::Tall => (1080, 1920),
            AspectRatio::Square => (1080, 1080),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AspectRatio::Wide => "16:9",
            AspectRatio::Tall => "9:16",
            AspectRatio::Square => "1:1",
        }
    }
}

impl FromStr for AspectRatio {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "16:9" => Ok(AspectRatio::Wide),
            "9:16" => Ok(AspectRatio::Tall),
            "1:1" => Ok(AspectRatio::Square),
            other => Err(PipelineError::InvalidOption(format!(
                "unsupported aspect ratio '{other}' (expected 16:9, 9:16 or 1:1)"
            ))),
        }
    }
}

/// Resource and behavior limits for one `generate` call.
#[derive(Debug, Clone)]
pub struct PipelineBudget {
    /// Concurrent fetch workers, clamped to [1, 10]. The default is low
    /// on purpose: the remote source is rate-sensitive.
    pub max_download_workers: usize,
    /// Concurrent transcode workers, clamped to [1, 10].
    pub max_transcode_workers: usize,
    /// Wall-clock deadline for the whole fetch phase.
    pub download_timeout: Duration,
    /// Wall-clock deadline for the whole transcode phase.
    pub transcode_timeout: Duration,
    /// Per-phase failure ratio above which the run is aborted.
    pub max_failure_rate: f64,
    /// Longest consecutive-word phrase the planner will try, in [1, 50].
    pub max_phrase_length: usize,
    /// Seconds of lead-in kept before each clip's first word.
    pub clip_padding_start: f64,
    /// Seconds of tail kept after each clip's last word.
    pub clip_padding_end: f64,
    /// Loudness-normalize each segment while canonicalizing.
    pub normalize_audio: bool,
    /// Render a title card for words the index cannot serve. When false,
    /// any unmatched word fails the plan.
    pub allow_placeholders: bool,
    /// Duration of placeholder title cards, seconds.
    pub placeholder_duration: f64,
    /// Concatenate pairwise instead of in a single pass. Same output,
    /// lower peak disk footprint.
    pub incremental_concat: bool,
    /// Remove intermediate directories after the run.
    pub cleanup_temp_files: bool,
    /// Keep fetched raw segments for reuse by later runs.
    pub keep_download_cache: bool,
    /// Restrict clips to one channel (requires video metadata in the index).
    pub channel_filter: Option<String>,
}

impl Default for PipelineBudget {
    fn default() -> Self {
        Self {
            max_download_workers: 3,
            max_transcode_workers: 4,
            download_timeout: Duration::from_secs(300),
            transcode_timeout: Duration::from_secs(600),
            max_failure_rate: 0.5,
            max_phrase_length: 10,
            clip_padding_start: 0.15,
            clip_padding_end: 0.15,
            normalize_audio: true,
            allow_placeholders: true,
            placeholder_duration: 1.0,
            incremental_concat: false,
            cleanup_temp_files: true,
            keep_download_cache: true,
            channel_filter: None,
        }
    }
}

pub const MIN_WORKERS: usize = 1;
pub const MAX_WORKERS: usize = 10;
pub const MAX_PHRASE_LENGTH_LIMIT: usize = 50;

impl PipelineBudget {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.max_phrase_length < 1 || self.max_phrase_length > MAX_PHRASE_LENGTH_LIMIT {
            return Err(PipelineError::InvalidOption(format!(
                "max phrase length must be between 1 and {MAX_PHRASE_LENGTH_LIMIT}, got {}",
                self.max_phrase_length
            )));
        }
        if !(0.0..=1.0).contains(&self.max_failure_rate) {
            return Err(PipelineError::InvalidOption(format!(
                "max failure rate must be between 0.0 and 1.0, got {}",
                self.max_failure_rate
            )));
        }
        if self.clip_padding_start < 0.0 || self.clip_padding_end < 0.0 {
            return Err(PipelineError::InvalidOption(
                "clip padding must not be negative".to_string(),
            ));
        }
        Ok(())
    }

    pub fn download_workers(&self) -> usize {
        self.max_download_workers.clamp(MIN_WORKERS, MAX_WORKERS)
    }

    pub fn transcode_workers(&self) -> usize {
        self.max_transcode_workers.clamp(MIN_WORKERS, MAX_WORKERS)
    }
}

/// Presentation options that do not affect sequencing.
#[derive(Debug, Clone)]
pub struct StyleOptions {
    pub aspect_ratio: AspectRatio,
    /// Burn the span's literal text into each segment as a lower-third.
    pub add_subtitles: bool,
    pub watermark_text: Option<String>,
    pub watermark_corner: Corner,
    pub intro_text: Option<String>,
    pub outro_text: Option<String>,
    /// Duration of intro/outro cards, seconds.
    pub card_duration: f64,
    /// Color of the letterbox/pillarbox bars.
    pub pad_color: String,
}

impl Default for StyleOptions {
    fn default() -> Self {
        Self {
            aspect_ratio: AspectRatio::default(),
            add_subtitles: false,
            watermark_text: None,
            watermark_corner: Corner::default(),
            intro_text: None,
            outro_text: None,
            card_duration: 2.0,
            pad_color: "black".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aspect_ratio_parses_known_slots() {
        assert_eq!("16:9".parse::<AspectRatio>().unwrap(), AspectRatio::Wide);
        assert_eq!("9:16".parse::<AspectRatio>().unwrap(), AspectRatio::Tall);
        assert_eq!("1:1".parse::<AspectRatio>().unwrap(), AspectRatio::Square);
        assert!("4:3".parse::<AspectRatio>().is_err());
    }

    #[test]
    fn worker_counts_are_clamped() {
        let budget = PipelineBudget {
            max_download_workers: 0,
            max_transcode_workers: 64,
            ..Default::default()
        };
        assert_eq!(budget.download_workers(), 1);
        assert_eq!(budget.transcode_workers(), 10);
    }

    #[test]
    fn validate_rejects_out_of_range_phrase_length() {
        let budget = PipelineBudget {
            max_phrase_length: 51,
            ..Default::default()
        };
        assert!(budget.validate().is_err());

        let budget = PipelineBudget {
            max_phrase_length: 0,
            ..Default::default()
        };
        assert!(budget.validate().is_err());
    }
}
