use std::collections::{HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{Result, VodError};
use crate::types::DownloadRecord;

/// Append-only record of finished downloads.
/// Format: one JSON-encoded `DownloadRecord` per line.
pub struct DedupeStore {
    path: PathBuf,
    records: HashMap<String, DownloadRecord>,
    // Keys held in memory whose append failed, oldest first.
    unsaved: Vec<String>,
}

impl DedupeStore {
    /// Rebuilds the in-memory map from `path`. Never fails: a missing or
    /// unreadable file yields an empty store, corrupt lines are skipped.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let records = match File::open(&path) {
            Ok(file) => read_records(&path, file),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(store = %path.display(), "no dedupe store yet, starting empty");
                HashMap::new()
            }
            Err(e) => {
                warn!(store = %path.display(), error = %e, "could not open dedupe store, starting empty");
                HashMap::new()
            }
        };

        debug!(store = %path.display(), records = records.len(), "dedupe store loaded");
        Self { path, records, unsaved: Vec::new() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, identity_key: &str) -> bool {
        self.records.contains_key(identity_key)
    }

    pub fn get(&self, identity_key: &str) -> Option<&DownloadRecord> {
        self.records.get(identity_key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn keys(&self) -> HashSet<String> {
        self.records.keys().cloned().collect()
    }

    /// Number of records that exist only in memory.
    pub fn unsaved(&self) -> usize {
        self.unsaved.len()
    }

    /// Persists `record` and syncs it to disk before returning.
    ///
    /// The record is kept in memory even when the write fails, so the rest of
    /// the run does not fetch the same file again. The write is attempted
    /// again by [`DedupeStore::retry_unsaved`].
    pub fn record(&mut self, record: DownloadRecord) -> Result<()> {
        if self.records.contains_key(&record.identity_key) {
            return Ok(());
        }

        let written = self.append(&record);
        if written.is_err() {
            self.unsaved.push(record.identity_key.clone());
        }
        self.records.insert(record.identity_key.clone(), record);
        written.map_err(|source| VodError::Store { path: self.path.clone(), source })
    }

    /// Appends every record whose earlier write failed. Stops at the first
    /// failure and keeps the rest for the next attempt; returns how many
    /// records reached the disk.
    pub fn retry_unsaved(&mut self) -> Result<usize> {
        let mut saved = 0;
        while let Some(key) = self.unsaved.first().cloned() {
            if let Some(record) = self.records.get(&key) {
                self.append(record).map_err(|source| VodError::Store { path: self.path.clone(), source })?;
                saved += 1;
            }
            self.unsaved.remove(0);
        }
        Ok(saved)
    }

    fn append(&self, record: &DownloadRecord) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        file.write_all(line.as_bytes())?;
        file.flush()?;
        file.sync_data()
    }
}

fn read_records(path: &Path, file: File) -> HashMap<String, DownloadRecord> {
    let mut records = HashMap::new();

    for (number, line) in BufReader::new(file).lines().enumerate() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!(store = %path.display(), line = number + 1, error = %e, "stopped reading dedupe store");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<DownloadRecord>(&line) {
            Ok(record) => {
                records.insert(record.identity_key.clone(), record);
            }
            Err(e) => {
                warn!(store = %path.display(), line = number + 1, error = %e, "skipping corrupt dedupe record");
            }
        }
    }

    records
}
