//! Clean title and date extraction from archive filenames.
//!
//! Filenames on the archive look like
//! `2025-09-16_19_04_19.413015_HUGE%20ANNOUNCEMENT_40.mp4`: a server generated
//! timestamp, the stream title and some noise. The date in that prefix is not
//! trustworthy, so the output date always comes from the HTTP metadata.

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use regex::Regex;

use crate::helpers::{percent_decode, split_media_extension};

pub const UNTITLED: &str = "Untitled VOD";

static RE_TIMESTAMP_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}[_ ](\d{1,2})[_:](\d{2})[_:](\d{2})(?:\.\d+)?[_\s-]*").unwrap()
});
static RE_DATE_PREFIX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}[_\s-]*").unwrap());
static RE_TRAILING_COUNTER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"_\d+$").unwrap());
static RE_TRAILING_GG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(^|[_\s\d])gg$").unwrap());
static RE_DASHES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"-+").unwrap());
static RE_SPACES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extracted {
    pub title: String,
    pub date: NaiveDate,
    pub time: Option<NaiveTime>,
}

/// Intermediate state threaded through the cleanup steps.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TitleDraft {
    pub text: String,
    pub time: Option<NaiveTime>,
}

impl TitleDraft {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into(), time: None }
    }
}

pub type CleanupStep = fn(TitleDraft) -> TitleDraft;

/// Applied in order; later steps assume the earlier ones ran.
pub const CLEANUP_STEPS: &[(&str, CleanupStep)] = &[
    ("percent_decode", decode_step),
    ("strip_extension", strip_extension),
    ("strip_timestamp_prefix", strip_timestamp_prefix),
    ("strip_artifacts", strip_artifacts),
    ("underscores_to_spaces", underscores_to_spaces),
    ("trim_separators", trim_separators),
];

pub fn extract(raw_filename: &str, authoritative_timestamp: DateTime<Utc>) -> Extracted {
    let draft = CLEANUP_STEPS
        .iter()
        .fold(TitleDraft::new(raw_filename), |draft, (_, step)| step(draft));

    Extracted {
        title: draft.text,
        date: authoritative_timestamp.date_naive(),
        time: draft.time,
    }
}

/// Decoded filename without its media extension.
pub fn original_name(raw_filename: &str) -> String {
    strip_extension(decode_step(TitleDraft::new(raw_filename))).text
}

/// Lowercase media extension of the file, `mp4` when there is none.
pub fn file_extension(raw_filename: &str) -> String {
    split_media_extension(&percent_decode(raw_filename))
        .map(|(_, ext)| ext)
        .unwrap_or_else(|| "mp4".to_string())
}

pub fn decode_step(draft: TitleDraft) -> TitleDraft {
    TitleDraft { text: percent_decode(&draft.text), ..draft }
}

pub fn strip_extension(draft: TitleDraft) -> TitleDraft {
    match split_media_extension(&draft.text) {
        Some((stem, _)) => TitleDraft { text: stem.to_string(), ..draft },
        None => draft,
    }
}

pub fn strip_timestamp_prefix(mut draft: TitleDraft) -> TitleDraft {
    let prefix = RE_TIMESTAMP_PREFIX.captures(&draft.text).map(|caps| {
        let part = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());
        let time = match (part(1), part(2), part(3)) {
            (Some(h), Some(m), Some(s)) => NaiveTime::from_hms_opt(h, m, s),
            _ => None,
        };
        (time, caps.get(0).map_or(0, |m| m.end()))
    });
    if let Some((time, end)) = prefix {
        draft.time = time;
        draft.text = draft.text[end..].to_string();
        return draft;
    }

    draft.text = RE_DATE_PREFIX.replace(&draft.text, "").into_owned();
    draft
}

/// Trailing `_<counter>` and `gg` tokens appended by the archive.
pub fn strip_artifacts(draft: TitleDraft) -> TitleDraft {
    let text = RE_TRAILING_COUNTER.replace(&draft.text, "");
    let text = RE_TRAILING_GG.replace(&text, "${1}");
    TitleDraft { text: text.into_owned(), ..draft }
}

pub fn underscores_to_spaces(draft: TitleDraft) -> TitleDraft {
    let text = draft.text.replace('_', " ");
    let text = RE_DASHES.replace_all(&text, " - ");
    let text = RE_SPACES.replace_all(&text, " ");
    TitleDraft { text: text.into_owned(), ..draft }
}

pub fn trim_separators(draft: TitleDraft) -> TitleDraft {
    let trimmed = draft.text.trim_matches(|c: char| c.is_whitespace() || c == '-' || c == '_');
    let text = if trimmed.is_empty() { UNTITLED.to_string() } else { trimmed.to_string() };
    TitleDraft { text, ..draft }
}
