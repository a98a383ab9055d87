use clap::{Args, Parser, Subcommand, ValueHint};
use std::path::PathBuf;

/// Create videos from text by stitching together indexed source clips
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Emit machine-readable JSON events instead of text
    #[arg(long, global = true)]
    pub json: bool,

    /// Enable debug output
    #[arg(long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate a video from text
    Generate(GenerateArgs),
    /// Show statistics for a clip index
    Stats(StatsArgs),
    /// Verify that the required external tools are installed
    Check,
}

#[derive(Args, Debug, Clone)]
pub struct GenerateArgs {
    /// Input text to convert to video
    #[arg(long)]
    pub text: String,

    /// SQLite index with word-clip mappings
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub database: PathBuf,

    /// Output video filename; defaults to a timestamped name
    #[arg(short = 'o', long)]
    pub output: Option<String>,

    /// Output directory
    #[arg(long, default_value = "./output", value_hint = ValueHint::DirPath)]
    pub output_dir: PathBuf,

    /// Temporary files directory
    #[arg(long, default_value = "./temp", value_hint = ValueHint::DirPath)]
    pub temp_dir: PathBuf,

    /// Maximum number of consecutive words to match as a phrase [1-50]
    #[arg(long, default_value_t = 10)]
    pub max_phrase_length: usize,

    /// Padding before each clip's first word, seconds
    #[arg(long, default_value_t = 0.15)]
    pub padding_start: f64,

    /// Padding after each clip's last word, seconds
    #[arg(long, default_value_t = 0.15)]
    pub padding_end: f64,

    /// Concurrent download workers [1-10]; keep low, the source is
    /// rate-sensitive
    #[arg(long, default_value_t = 3)]
    pub download_workers: usize,

    /// Concurrent transcode workers [1-10]
    #[arg(long, default_value_t = 4)]
    pub transcode_workers: usize,

    /// Wall-clock limit for the download phase, seconds
    #[arg(long, default_value_t = 300)]
    pub download_timeout: u64,

    /// Wall-clock limit for the transcode phase, seconds
    #[arg(long, default_value_t = 600)]
    pub transcode_timeout: u64,

    /// Abort when more than this fraction of segments fail in a phase
    #[arg(long, default_value_t = 0.5)]
    pub max_failure_rate: f64,

    /// Target aspect ratio (16:9, 9:16 or 1:1)
    #[arg(long, default_value = "16:9")]
    pub aspect_ratio: String,

    /// Burn each clip's word into the frame as a caption
    #[arg(long)]
    pub subtitles: bool,

    /// Watermark text overlaid on every clip
    #[arg(long)]
    pub watermark: Option<String>,

    /// Watermark position (top-left, top-right, bottom-left, bottom-right)
    #[arg(long, default_value = "bottom-right")]
    pub watermark_corner: String,

    /// Intro title-card text
    #[arg(long)]
    pub intro: Option<String>,

    /// Outro title-card text
    #[arg(long)]
    pub outro: Option<String>,

    /// Restrict clips to one channel id
    #[arg(long)]
    pub channel: Option<String>,

    /// Fail instead of inserting placeholder cards for missing words
    #[arg(long)]
    pub strict: bool,

    /// Disable audio loudness normalization
    #[arg(long)]
    pub no_normalize: bool,

    /// Keep temporary files (useful for debugging)
    #[arg(long)]
    pub no_cleanup: bool,

    /// Also remove cached raw downloads during cleanup
    #[arg(long)]
    pub no_download_cache: bool,

    /// Concatenate pairwise instead of in a single pass
    #[arg(long)]
    pub incremental: bool,

    /// yt-dlp format selector for fetched segments
    #[arg(
        long,
        default_value = "bestvideo[height<=720]+bestaudio/best[height<=720]"
    )]
    pub quality: String,

    /// Read cookies from this browser for fetching (chrome, firefox, ...)
    #[arg(long)]
    pub cookies_from_browser: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct StatsArgs {
    /// SQLite index with word-clip mappings
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub database: PathBuf,
}
