use std::sync::OnceLock;

use anyhow::Result;
use regex::Regex;

use crate::index::{ClipIndex, WordClip};
use crate::pipeline::config::PipelineBudget;
use crate::ui;

/// A contiguous interval in one source video covering one word or an n-word
/// phrase. `video_id == None` marks a placeholder: no source clip exists and
/// a title card carrying the literal word stands in at this position.
///
/// Padding is folded into `start_time`/`duration` when the span is built, so
/// downstream stages always work with the final interval.
#[derive(Debug, Clone, PartialEq)]
pub struct Span {
    pub text: String,
    pub video_id: Option<String>,
    pub start_time: f64,
    pub duration: f64,
    pub word_count: usize,
}

impl Span {
    pub fn phrase(
        text: String,
        video_id: String,
        first_start: f64,
        last_end: f64,
        word_count: usize,
        pad_start: f64,
        pad_end: f64,
    ) -> Self {
        Self {
            text,
            video_id: Some(video_id),
            start_time: (first_start - pad_start).max(0.0),
            duration: last_end - first_start + pad_start + pad_end,
            word_count,
        }
    }

    pub fn single(word: &str, clip: &WordClip, pad_start: f64, pad_end: f64) -> Self {
        Self {
            text: word.to_string(),
            video_id: Some(clip.video_id.clone()),
            start_time: (clip.start_time - pad_start).max(0.0),
            duration: clip.duration + pad_start + pad_end,
            word_count: 1,
        }
    }

    pub fn placeholder(word: &str, duration: f64) -> Self {
        Self {
            text: word.to_string(),
            video_id: None,
            start_time: 0.0,
            duration,
            word_count: 1,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.video_id.is_none()
    }

    pub fn words(&self) -> impl Iterator<Item = &str> {
        self.text.split_whitespace()
    }
}

/// Ordered spans whose flattened words equal the input word sequence.
#[derive(Debug, Clone, Default)]
pub struct Plan {
    pub spans: Vec<Span>,
    /// Words no clip matched, in input order.
    pub missing_words: Vec<String>,
}

impl Plan {
    pub fn words(&self) -> Vec<&str> {
        self.spans.iter().flat_map(|span| span.words()).collect()
    }

    pub fn real_count(&self) -> usize {
        self.spans.iter().filter(|s| !s.is_placeholder()).count()
    }

    pub fn placeholder_count(&self) -> usize {
        self.spans.len() - self.real_count()
    }

    pub fn unique_videos(&self) -> usize {
        let mut ids: Vec<&str> = self
            .spans
            .iter()
            .filter_map(|s| s.video_id.as_deref())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids.len()
    }
}

fn word_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\b[\w']+\b").expect("word pattern compiles"))
}

/// Lowercase word tokens, contractions preserved, standalone apostrophes
/// discarded.
pub fn tokenize(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    word_pattern()
        .find_iter(&lowered)
        .map(|m| m.as_str().to_string())
        .filter(|w| !w.is_empty() && w.chars().any(|c| c != '\''))
        .collect()
}

/// Greedy longest-phrase planning.
///
/// At each position the longest transcript phrase (up to the configured
/// limit) wins; otherwise a single-word clip; otherwise a placeholder. The
/// exclusion list steers repeat lookups toward videos not yet used in this
/// plan, so output drawing from `k` sources shows `k` different videos when
/// the index allows it.
pub fn build_plan(words: &[String], index: &ClipIndex, budget: &PipelineBudget) -> Result<Plan> {
    let mut plan = Plan::default();
    let mut used_videos: Vec<String> = Vec::new();
    let channel = budget.channel_filter.as_deref();
    let mut i = 0;

    while i < words.len() {
        let mut matched_phrase = None;

        if index.has_transcripts() {
            let longest = budget.max_phrase_length.min(words.len() - i);
            for len in (2..=longest).rev() {
                if let Some(span) = index.find_phrase(
                    &words[i..i + len],
                    &used_videos,
                    channel,
                    budget.clip_padding_start,
                    budget.clip_padding_end,
                )? {
                    ui::debug(
                        "plan.phrase",
                        &format!("matched {len}-word phrase: '{}'", span.text),
                    );
                    matched_phrase = Some((span, len));
                    break;
                }
            }
        }

        if let Some((span, len)) = matched_phrase {
            if let Some(video_id) = &span.video_id {
                used_videos.push(video_id.clone());
            }
            plan.spans.push(span);
            i += len;
            continue;
        }

        let word = &words[i];
        match index.lookup_word(word, &used_videos, channel)? {
            Some(clip) => {
                used_videos.push(clip.video_id.clone());
                plan.spans.push(Span::single(
                    word,
                    &clip,
                    budget.clip_padding_start,
                    budget.clip_padding_end,
                ));
            }
            None => {
                ui::warn(
                    "plan.missing",
                    &format!("no clip found for word '{word}', using placeholder"),
                );
                plan.missing_words.push(word.clone());
                if budget.allow_placeholders {
                    plan.spans
                        .push(Span::placeholder(word, budget.placeholder_duration));
                }
            }
        }
        i += 1;
    }

    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;

    use rusqlite::Connection;
    use tempfile::tempdir;

    fn open_fixture(populate: impl FnOnce(&Connection)) -> (tempfile::TempDir, ClipIndex) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("index.db");
        let conn = Connection::open(&db_path).unwrap();
        conn.execute_batch(
            "CREATE TABLE word_clips (word TEXT, video_id TEXT, start_time REAL, duration REAL);
             CREATE TABLE video_transcripts (video_id TEXT PRIMARY KEY, transcript_data TEXT);",
        )
        .unwrap();
        populate(&conn);
        drop(conn);
        let index = ClipIndex::open(&db_path).unwrap();
        (dir, index)
    }

    fn insert_clip(conn: &Connection, word: &str, video: &str, start: f64, duration: f64) {
        conn.execute(
            "INSERT INTO word_clips (word, video_id, start_time, duration) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![word, video, start, duration],
        )
        .unwrap();
    }

    fn insert_transcript(conn: &Connection, video: &str, entries: &[(&str, f64, f64)]) {
        let data: Vec<(String, f64, f64)> = entries
            .iter()
            .map(|(w, s, e)| (w.to_string(), *s, *e))
            .collect();
        conn.execute(
            "INSERT INTO video_transcripts (video_id, transcript_data) VALUES (?1, ?2)",
            rusqlite::params![video, serde_json::to_string(&data).unwrap()],
        )
        .unwrap();
    }

    fn unpadded_budget() -> PipelineBudget {
        PipelineBudget {
            clip_padding_start: 0.0,
            clip_padding_end: 0.0,
            ..Default::default()
        }
    }

    #[test]
    fn tokenize_lowercases_and_keeps_contractions() {
        assert_eq!(
            tokenize("Don't Stop, believing!"),
            vec!["don't", "stop", "believing"]
        );
        assert!(tokenize("... !!! ...").is_empty());
    }

    #[test]
    fn full_phrase_becomes_one_span() {
        let (_dir, index) = open_fixture(|conn| {
            insert_transcript(
                conn,
                "V1",
                &[
                    ("hello", 0.0, 0.4),
                    ("world", 0.4, 0.9),
                    ("how", 0.9, 1.2),
                    ("are", 1.2, 1.6),
                    ("you", 1.6, 2.3),
                ],
            );
        });

        let words = tokenize("Hello world how are you");
        let plan = build_plan(&words, &index, &unpadded_budget()).unwrap();

        assert_eq!(plan.spans.len(), 1);
        let span = &plan.spans[0];
        assert_eq!(span.text, "hello world how are you");
        assert_eq!(span.video_id.as_deref(), Some("V1"));
        assert_eq!(span.start_time, 0.0);
        assert!((span.duration - 2.3).abs() < 1e-9);
        assert_eq!(plan.words(), words.iter().map(String::as_str).collect::<Vec<_>>());
    }

    #[test]
    fn greedy_phrase_then_orphan_word() {
        let (_dir, index) = open_fixture(|conn| {
            insert_transcript(
                conn,
                "V1",
                &[
                    ("the", 0.0, 0.2),
                    ("quick", 0.2, 0.5),
                    ("brown", 0.5, 0.8),
                    ("fox", 0.8, 1.1),
                ],
            );
            insert_clip(conn, "goodbye", "V3", 7.0, 0.6);
        });

        let words = tokenize("the quick brown goodbye");
        let plan = build_plan(&words, &index, &unpadded_budget()).unwrap();

        assert_eq!(plan.spans.len(), 2);
        assert_eq!(plan.spans[0].text, "the quick brown");
        assert_eq!(plan.spans[0].video_id.as_deref(), Some("V1"));
        assert_eq!(plan.spans[1].text, "goodbye");
        assert_eq!(plan.spans[1].video_id.as_deref(), Some("V3"));
    }

    #[test]
    fn diversity_tie_break_spreads_across_videos() {
        let (_dir, index) = open_fixture(|conn| {
            insert_transcript(conn, "V1", &[("hello", 0.0, 0.3), ("world", 0.3, 0.7)]);
            insert_clip(conn, "hello", "V1", 0.0, 0.3);
            insert_clip(conn, "quick", "V2", 5.0, 0.4);
        });

        let words = tokenize("hello quick");
        let plan = build_plan(&words, &index, &unpadded_budget()).unwrap();

        assert_eq!(plan.spans.len(), 2);
        assert_eq!(plan.spans[0].video_id.as_deref(), Some("V1"));
        assert_eq!(plan.spans[1].video_id.as_deref(), Some("V2"));
    }

    #[test]
    fn repeated_word_uses_distinct_videos_while_available() {
        let (_dir, index) = open_fixture(|conn| {
            insert_clip(conn, "w", "V1", 0.0, 0.5);
            insert_clip(conn, "w", "V2", 1.0, 0.5);
            insert_clip(conn, "w", "V3", 2.0, 0.5);
        });

        let words = tokenize("w w w");
        let plan = build_plan(&words, &index, &unpadded_budget()).unwrap();

        let ids: Vec<_> = plan
            .spans
            .iter()
            .map(|s| s.video_id.clone().unwrap())
            .collect();
        assert_eq!(ids.len(), 3);
        assert_eq!(plan.unique_videos(), 3);
    }

    #[test]
    fn missing_word_gets_placeholder_in_position() {
        let (_dir, index) = open_fixture(|conn| {
            insert_clip(conn, "hello", "V1", 0.0, 0.5);
            insert_clip(conn, "world", "V2", 1.0, 0.5);
        });

        let words = tokenize("hello xyzzy world");
        let plan = build_plan(&words, &index, &unpadded_budget()).unwrap();

        assert_eq!(plan.spans.len(), 3);
        assert!(!plan.spans[0].is_placeholder());
        assert!(plan.spans[1].is_placeholder());
        assert_eq!(plan.spans[1].text, "xyzzy");
        assert!((plan.spans[1].duration - 1.0).abs() < 1e-9);
        assert!(!plan.spans[2].is_placeholder());
        assert_eq!(plan.missing_words, vec!["xyzzy"]);
        assert_eq!(plan.words(), vec!["hello", "xyzzy", "world"]);
    }

    #[test]
    fn strict_mode_records_missing_without_placeholder() {
        let (_dir, index) = open_fixture(|_conn| {});
        let budget = PipelineBudget {
            allow_placeholders: false,
            ..unpadded_budget()
        };

        let words = tokenize("xyzzy");
        let plan = build_plan(&words, &index, &budget).unwrap();
        assert!(plan.spans.is_empty());
        assert_eq!(plan.missing_words, vec!["xyzzy"]);
    }

    #[test]
    fn phrase_padding_folds_into_span() {
        let (_dir, index) = open_fixture(|conn| {
            insert_transcript(conn, "V1", &[("hello", 1.0, 1.4), ("world", 1.4, 1.9)]);
        });
        let budget = PipelineBudget {
            clip_padding_start: 0.2,
            clip_padding_end: 0.1,
            ..Default::default()
        };

        let words = tokenize("hello world");
        let plan = build_plan(&words, &index, &budget).unwrap();
        let span = &plan.spans[0];
        assert!((span.start_time - 0.8).abs() < 1e-9);
        assert!((span.duration - (0.9 + 0.3)).abs() < 1e-9);
    }
}
