use std::path::PathBuf;

use anyhow::{Result, bail};

/// External programs the pipeline shells out to.
#[derive(Debug, Clone, Copy)]
pub struct ExternalTool {
    pub name: &'static str,
    pub purpose: &'static str,
}

pub static REQUIRED_TOOLS: &[ExternalTool] = &[
    ExternalTool {
        name: "ffmpeg",
        purpose: "transcoding, title cards and concatenation",
    },
    ExternalTool {
        name: "ffprobe",
        purpose: "media validation and duration probing",
    },
    ExternalTool {
        name: "yt-dlp",
        purpose: "fetching clip segments from source videos",
    },
];

pub fn locate(tool: &ExternalTool) -> Option<PathBuf> {
    which::which(tool.name).ok()
}

/// Fail early with one message listing everything that is missing.
pub fn verify_required() -> Result<()> {
    let missing: Vec<&str> = REQUIRED_TOOLS
        .iter()
        .filter(|tool| locate(tool).is_none())
        .map(|tool| tool.name)
        .collect();

    if !missing.is_empty() {
        bail!(
            "required tools not found on PATH: {}. Install them and retry.",
            missing.join(", ")
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locate_finds_a_ubiquitous_binary() {
        let tool = ExternalTool {
            name: "sh",
            purpose: "test",
        };
        assert!(locate(&tool).is_some());
    }
}
