use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// One media file found in the remote listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateFile {
    pub remote_path: Url,
    pub raw_filename: String,
    pub size_bytes: Option<u64>,
    pub authoritative_timestamp: DateTime<Utc>,
}

impl CandidateFile {
    pub fn identity_key(&self) -> String {
        identity_key(&self.remote_path)
    }
}

/// Stable key for a remote file: the absolute URL without its fragment.
pub fn identity_key(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    url.to_string()
}

/// One completed download as persisted by the dedupe store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRecord {
    pub identity_key: String,
    #[serde(default)]
    pub remote_path: String,
    pub final_path: PathBuf,
    pub completed_at: DateTime<Utc>,
}

impl DownloadRecord {
    pub fn completed_now(candidate: &CandidateFile, final_path: PathBuf) -> Self {
        Self {
            identity_key: candidate.identity_key(),
            remote_path: candidate.remote_path.to_string(),
            final_path,
            completed_at: Utc::now(),
        }
    }
}

/// Counters for one pipeline pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Summary {
    pub discovered: usize,
    pub skipped_known: usize,
    pub skipped_too_large: usize,
    pub adopted: usize,
    pub downloaded: usize,
    pub failed: usize,
    pub scan_failures: usize,
    pub aborted: Option<String>,
}

impl Summary {
    pub fn processed(&self) -> usize {
        self.skipped_known + self.skipped_too_large + self.adopted + self.downloaded + self.failed
    }
}
