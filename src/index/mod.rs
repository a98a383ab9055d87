use std::path::Path;

use anyhow::{Context, Result, bail};
use rusqlite::Connection;

use crate::pipeline::plan::Span;
use crate::ui;

/// One known occurrence of a lowercase word in a source video.
#[derive(Debug, Clone, PartialEq)]
pub struct WordClip {
    pub word: String,
    pub video_id: String,
    pub start_time: f64,
    pub duration: f64,
}

#[derive(Debug, Clone, Default)]
pub struct IndexStats {
    pub total_clips: u64,
    pub unique_videos: u64,
    pub avg_clip_duration: f64,
    pub transcripts: u64,
}

/// Read-only lookup over the word/transcript index.
///
/// Lookups return `Option` for "not found"; errors are reserved for I/O and
/// schema problems. The connection is never written through.
pub struct ClipIndex {
    conn: Connection,
    has_transcripts: bool,
    has_video_metadata: bool,
}

impl ClipIndex {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            bail!("index database not found: {}", path.display());
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open index database {}", path.display()))?;

        Self::verify_schema(&conn)?;

        let has_transcripts = table_exists(&conn, "video_transcripts")?
            && count_rows(&conn, "video_transcripts")? > 0;
        let has_video_metadata = table_exists(&conn, "videos")?;

        Ok(Self {
            conn,
            has_transcripts,
            has_video_metadata,
        })
    }

    fn verify_schema(conn: &Connection) -> Result<()> {
        if !table_exists(conn, "word_clips")? {
            bail!("table 'word_clips' does not exist in index database");
        }

        let mut stmt = conn.prepare("PRAGMA table_info(word_clips)")?;
        let columns: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<std::result::Result<_, _>>()?;

        for required in ["word", "video_id", "start_time", "duration"] {
            if !columns.iter().any(|c| c == required) {
                bail!("index table 'word_clips' is missing column '{required}'");
            }
        }

        Ok(())
    }

    pub fn has_transcripts(&self) -> bool {
        self.has_transcripts
    }

    pub fn has_video_metadata(&self) -> bool {
        self.has_video_metadata
    }

    /// Case-insensitive single-word lookup. Prefers a clip from a video not
    /// in `exclude_videos`, falls back to any clip, else `None`.
    pub fn lookup_word(
        &self,
        word: &str,
        exclude_videos: &[String],
        channel_filter: Option<&str>,
    ) -> Result<Option<WordClip>> {
        let clips = self.clips_for_word(word, channel_filter)?;

        let preferred = clips
            .iter()
            .find(|clip| !exclude_videos.contains(&clip.video_id))
            .cloned();

        Ok(preferred.or_else(|| clips.into_iter().next()))
    }

    fn clips_for_word(&self, word: &str, channel_filter: Option<&str>) -> Result<Vec<WordClip>> {
        let mut clips = Vec::new();

        if let Some(channel_id) = channel_filter {
            let mut stmt = self.conn.prepare(
                "SELECT wc.word, wc.video_id, wc.start_time, wc.duration
                 FROM word_clips wc
                 JOIN videos v ON v.video_id = wc.video_id
                 WHERE LOWER(wc.word) = LOWER(?1) AND v.channel_id = ?2",
            )?;
            let rows = stmt.query_map(rusqlite::params![word, channel_id], row_to_clip)?;
            for clip in rows {
                clips.push(clip?);
            }
        } else {
            let mut stmt = self.conn.prepare(
                "SELECT word, video_id, start_time, duration
                 FROM word_clips
                 WHERE LOWER(word) = LOWER(?1)",
            )?;
            let rows = stmt.query_map([word], row_to_clip)?;
            for clip in rows {
                clips.push(clip?);
            }
        }

        Ok(clips)
    }

    /// Scan transcripts for a case-insensitive match of the consecutive word
    /// sequence `words`. The first match in a non-excluded video wins; if
    /// every match sits in an excluded video, the first of those is returned.
    ///
    /// The returned span is padded: `start_time = first.start - pad_start`
    /// (clamped at 0), `duration = last.end - first.start + pad_start + pad_end`.
    pub fn find_phrase(
        &self,
        words: &[String],
        exclude_videos: &[String],
        channel_filter: Option<&str>,
        pad_start: f64,
        pad_end: f64,
    ) -> Result<Option<Span>> {
        if words.len() < 2 || !self.has_transcripts {
            return Ok(None);
        }

        let sql = if channel_filter.is_some() {
            "SELECT t.video_id, t.transcript_data
             FROM video_transcripts t
             JOIN videos v ON v.video_id = t.video_id
             WHERE v.channel_id = ?1"
        } else {
            "SELECT video_id, transcript_data FROM video_transcripts"
        };

        let mut stmt = self.conn.prepare(sql)?;
        let rows: Vec<(String, String)> = if let Some(channel_id) = channel_filter {
            stmt.query_map([channel_id], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<std::result::Result<_, _>>()?
        } else {
            stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<std::result::Result<_, _>>()?
        };

        let mut fallback: Option<Span> = None;

        for (video_id, transcript_data) in rows {
            let entries: Vec<(String, f64, f64)> = match serde_json::from_str(&transcript_data) {
                Ok(entries) => entries,
                Err(err) => {
                    ui::debug(
                        "index.transcript.malformed",
                        &format!("skipping transcript for {video_id}: {err}"),
                    );
                    continue;
                }
            };

            let Some(position) = first_occurrence(&entries, words) else {
                continue;
            };

            let first = &entries[position];
            let last = &entries[position + words.len() - 1];
            let span = Span::phrase(
                words.join(" "),
                video_id.clone(),
                first.1,
                last.2,
                words.len(),
                pad_start,
                pad_end,
            );

            if !exclude_videos.contains(&video_id) {
                return Ok(Some(span));
            }
            if fallback.is_none() {
                fallback = Some(span);
            }
        }

        Ok(fallback)
    }

    pub fn stats(&self) -> Result<IndexStats> {
        let total_clips: u64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM word_clips", [], |row| {
                row.get::<_, i64>(0)
            })? as u64;
        let unique_videos: u64 = self.conn.query_row(
            "SELECT COUNT(DISTINCT video_id) FROM word_clips",
            [],
            |row| row.get::<_, i64>(0),
        )? as u64;
        let avg_clip_duration: f64 = self
            .conn
            .query_row("SELECT AVG(duration) FROM word_clips", [], |row| {
                row.get::<_, Option<f64>>(0)
            })?
            .unwrap_or(0.0);
        let transcripts = if self.has_transcripts {
            count_rows(&self.conn, "video_transcripts")?
        } else {
            0
        };

        Ok(IndexStats {
            total_clips,
            unique_videos,
            avg_clip_duration,
            transcripts,
        })
    }
}

fn row_to_clip(row: &rusqlite::Row) -> std::result::Result<WordClip, rusqlite::Error> {
    Ok(WordClip {
        word: row.get(0)?,
        video_id: row.get(1)?,
        start_time: row.get(2)?,
        duration: row.get(3)?,
    })
}

fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn count_rows(conn: &Connection, table: &str) -> Result<u64> {
    // Table names come from the fixed schema, never from user input.
    let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
        row.get(0)
    })?;
    Ok(count as u64)
}

/// Index of the first entry where `words` matches consecutively,
/// case-insensitive.
fn first_occurrence(entries: &[(String, f64, f64)], words: &[String]) -> Option<usize> {
    if words.is_empty() || entries.len() < words.len() {
        return None;
    }
    (0..=entries.len() - words.len()).find(|&start| {
        words
            .iter()
            .enumerate()
            .all(|(offset, word)| entries[start + offset].0.to_lowercase() == *word)
    })
}
