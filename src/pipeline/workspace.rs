use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::pipeline::plan::Span;
use crate::ui;

/// Scratch directory layout for one or more `generate` calls.
///
/// Every file name is derived from its cache key (video, interval, padding)
/// or slot index, so concurrent workers never touch the same path.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn create(root: impl Into<PathBuf>) -> Result<Self> {
        let ws = Self { root: root.into() };
        for dir in [
            ws.downloads_dir(),
            ws.processed_dir(),
            ws.placeholders_dir(),
            ws.concat_dir(),
        ] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create workspace directory {}", dir.display()))?;
        }
        Ok(ws)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Raw fetched segments, reusable across calls.
    pub fn downloads_dir(&self) -> PathBuf {
        self.root.join("downloads")
    }

    /// Canonicalized segments and transcode intermediates.
    pub fn processed_dir(&self) -> PathBuf {
        self.root.join("processed")
    }

    /// Synthesized title cards for words without clips.
    pub fn placeholders_dir(&self) -> PathBuf {
        self.root.join("placeholders")
    }

    /// Concat lists and incremental intermediates.
    pub fn concat_dir(&self) -> PathBuf {
        self.root.join("concat")
    }

    /// Cache stem for a span's raw segment. Padding values are part of the
    /// name so runs with different padding never reuse each other's files.
    pub fn raw_stem(&self, span: &Span, pad_start: f64, pad_end: f64) -> String {
        let video_id = span.video_id.as_deref().unwrap_or("placeholder");
        format!(
            "{}_{:.2}_{:.2}_p{:.2}-{:.2}",
            sanitize_component(video_id),
            span.start_time,
            span.duration,
            pad_start,
            pad_end,
        )
    }

    pub fn placeholder_path(&self, slot: usize, word: &str) -> PathBuf {
        self.placeholders_dir()
            .join(format!("{}_{}.mp4", slot, sanitize_component(word)))
    }

    pub fn card_path(&self, name: &str) -> PathBuf {
        self.placeholders_dir().join(format!("{name}.mp4"))
    }

    pub fn canonical_path(&self, stem: &str) -> PathBuf {
        self.processed_dir().join(format!("{stem}_canonical.mp4"))
    }
}

const MAX_COMPONENT_LEN: usize = 48;

fn sanitize_component(s: &str) -> String {
    let cleaned: String = s
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    cleaned.chars().take(MAX_COMPONENT_LEN).collect()
}

/// Tears the workspace down when dropped, so cleanup runs on success,
/// error and cancellation alike. Raw downloads survive when the caller
/// wants the cross-run cache.
pub struct CleanupGuard<'a> {
    workspace: &'a Workspace,
    cleanup: bool,
    keep_downloads: bool,
}

impl<'a> CleanupGuard<'a> {
    pub fn new(workspace: &'a Workspace, cleanup: bool, keep_downloads: bool) -> Self {
        Self {
            workspace,
            cleanup,
            keep_downloads,
        }
    }
}

impl Drop for CleanupGuard<'_> {
    fn drop(&mut self) {
        if !self.cleanup {
            return;
        }
        ui::debug("workspace.cleanup", "removing intermediate directories");
        let mut targets = vec![
            self.workspace.processed_dir(),
            self.workspace.placeholders_dir(),
            self.workspace.concat_dir(),
        ];
        if !self.keep_downloads {
            targets.push(self.workspace.downloads_dir());
        }
        for dir in targets {
            if dir.exists()
                && let Err(err) = fs::remove_dir_all(&dir)
            {
                ui::warn(
                    "workspace.cleanup.failed",
                    &format!("failed to remove {}: {err}", dir.display()),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::tempdir;

    #[test]
    fn create_lays_out_directories() {
        let dir = tempdir().unwrap();
        let ws = Workspace::create(dir.path().join("work")).unwrap();
        assert!(ws.downloads_dir().is_dir());
        assert!(ws.processed_dir().is_dir());
        assert!(ws.placeholders_dir().is_dir());
        assert!(ws.concat_dir().is_dir());
    }

    #[test]
    fn raw_stem_distinguishes_padding() {
        let dir = tempdir().unwrap();
        let ws = Workspace::create(dir.path().join("work")).unwrap();
        let span = Span::phrase("hello".into(), "V1".into(), 1.0, 2.0, 1, 0.0, 0.0);
        let a = ws.raw_stem(&span, 0.0, 0.0);
        let b = ws.raw_stem(&span, 0.15, 0.15);
        assert_ne!(a, b);
    }

    #[test]
    fn sanitize_strips_path_hostile_characters() {
        assert_eq!(sanitize_component("a/b\\c d"), "a_b_c_d");
        assert_eq!(sanitize_component("ok-id_9"), "ok-id_9");
        assert!(sanitize_component(&"x".repeat(100)).len() <= MAX_COMPONENT_LEN);
    }

    #[test]
    fn guard_removes_intermediates_and_keeps_downloads() {
        let dir = tempdir().unwrap();
        let ws = Workspace::create(dir.path().join("work")).unwrap();
        fs::write(ws.processed_dir().join("x.mp4"), b"x").unwrap();
        fs::write(ws.downloads_dir().join("y.mp4"), b"y").unwrap();

        drop(CleanupGuard::new(&ws, true, true));

        assert!(!ws.processed_dir().exists());
        assert!(!ws.placeholders_dir().exists());
        assert!(!ws.concat_dir().exists());
        assert!(ws.downloads_dir().join("y.mp4").exists());
    }

    #[test]
    fn guard_respects_cleanup_flag() {
        let dir = tempdir().unwrap();
        let ws = Workspace::create(dir.path().join("work")).unwrap();
        drop(CleanupGuard::new(&ws, false, true));
        assert!(ws.processed_dir().exists());
    }

    #[test]
    fn guard_can_purge_downloads() {
        let dir = tempdir().unwrap();
        let ws = Workspace::create(dir.path().join("work")).unwrap();
        drop(CleanupGuard::new(&ws, true, false));
        assert!(!ws.downloads_dir().exists());
    }
}
