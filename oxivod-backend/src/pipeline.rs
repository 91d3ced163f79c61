use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::downloader::{DownloadJob, Downloader, ProgressReporter};
use crate::error::{ErrorKind, Result, VodError};
use crate::extract::{extract, file_extension, original_name};
use crate::helpers::{percent_decode, sanitize_filename};
use crate::naming::{Naming, NamingValues};
use crate::scheduler::StopSignal;
use crate::store::DedupeStore;
use crate::types::{CandidateFile, DownloadRecord, Summary};

const STAGING_DIR: &str = ".partial";

/// Everything one pass needs; the dedupe store is the only part that
/// outlives the process.
pub struct PipelineContext {
    pub store: DedupeStore,
    pub downloader: Downloader,
    pub naming: Naming,
    pub destination_root: PathBuf,
    pub max_size_bytes: Option<u64>,
    pub delay: Duration,
    pub stop: StopSignal,
    pub progress: Box<dyn ProgressReporter>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateState {
    Discovered,
    Downloading,
    Downloaded,
    Placed,
    Recorded,
}

impl fmt::Display for CandidateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CandidateState::Discovered => "discovered",
            CandidateState::Downloading => "downloading",
            CandidateState::Downloaded => "downloaded",
            CandidateState::Placed => "placed",
            CandidateState::Recorded => "recorded",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
enum Outcome {
    Downloaded(PathBuf),
    Adopted(PathBuf),
}

#[derive(Debug)]
struct CandidateFailure {
    state: CandidateState,
    destination: PathBuf,
    error: VodError,
}

/// Runs every candidate through download, placement and recording, strictly
/// one after another. A failing candidate never stops the pass; a failing
/// store write or a stop request does. Records whose write failed in an
/// earlier pass are written first.
pub fn process(ctx: &mut PipelineContext, candidates: impl IntoIterator<Item = CandidateFile>) -> Summary {
    let mut summary = Summary::default();
    let mut candidates = candidates.into_iter();
    let mut attempted = false;

    if ctx.store.unsaved() > 0 {
        match ctx.store.retry_unsaved() {
            Ok(saved) => info!("Stored {} download records left over from an earlier run", saved),
            Err(e) => {
                error!(kind = %e.kind(), error = %e, "dedupe store is still unwritable");
                summary.aborted = Some(format!("dedupe store unwritable: {e}"));
                return summary;
            }
        }
    }

    loop {
        if ctx.stop.is_triggered() {
            info!("Stop requested, ending run before the next VOD");
            summary.aborted = Some("stop requested".to_string());
            break;
        }
        let Some(candidate) = candidates.next() else {
            break;
        };
        summary.discovered += 1;

        if ctx.store.contains(&candidate.identity_key()) {
            debug!(remote = %candidate.remote_path, "already downloaded, skipping");
            summary.skipped_known += 1;
            continue;
        }

        if let (Some(max), Some(size)) = (ctx.max_size_bytes, candidate.size_bytes) {
            if size > max {
                info!(
                    remote = %candidate.remote_path,
                    "Skipping {} - file too large ({:.1} MB)",
                    candidate.raw_filename,
                    size as f64 / 1048576.0
                );
                summary.skipped_too_large += 1;
                continue;
            }
        }

        if attempted && !ctx.delay.is_zero() {
            debug!("Waiting {:?} before next download", ctx.delay);
            if ctx.stop.wait_timeout(ctx.delay) {
                info!("Stop requested, ending run before the next VOD");
                summary.aborted = Some("stop requested".to_string());
                break;
            }
        }
        attempted = true;

        match process_candidate(ctx, &candidate) {
            Ok(Outcome::Downloaded(path)) => {
                info!(remote = %candidate.remote_path, dest = %path.display(), "VOD downloaded and placed");
                summary.downloaded += 1;
            }
            Ok(Outcome::Adopted(path)) => {
                info!(remote = %candidate.remote_path, dest = %path.display(), "VOD already in place, recorded");
                summary.adopted += 1;
            }
            Err(failure) => {
                error!(
                    remote = %candidate.remote_path,
                    dest = %failure.destination.display(),
                    state = %failure.state,
                    kind = %failure.error.kind(),
                    error = %failure.error,
                    "VOD failed"
                );
                summary.failed += 1;

                if failure.error.kind() == ErrorKind::Store {
                    summary.aborted = Some(format!("dedupe store unwritable: {}", failure.error));
                    break;
                }
            }
        }
    }

    summary
}

fn process_candidate(
    ctx: &mut PipelineContext,
    candidate: &CandidateFile,
) -> std::result::Result<Outcome, CandidateFailure> {
    let extracted = extract(&candidate.raw_filename, candidate.authoritative_timestamp);
    let values = NamingValues::new(&extracted, &original_name(&candidate.raw_filename));
    let destination =
        ctx.naming
            .destination(&ctx.destination_root, &values, &file_extension(&candidate.raw_filename));
    let fail = |state, error| CandidateFailure { state, destination: destination.clone(), error };

    info!(
        title = %extracted.title,
        date = %extracted.date,
        time = ?extracted.time,
        dest = %destination.display(),
        "Processing VOD"
    );

    if let Some(existing) = existing_len(&destination) {
        if candidate.size_bytes == Some(existing) {
            ctx.store
                .record(DownloadRecord::completed_now(candidate, destination.clone()))
                .map_err(|e| fail(CandidateState::Placed, e))?;
            return Ok(Outcome::Adopted(destination));
        }
        return Err(fail(CandidateState::Discovered, VodError::Collision { path: destination.clone() }));
    }

    let staging = staging_path(&ctx.destination_root, &candidate.raw_filename);
    if let Some(parent) = staging.parent() {
        fs::create_dir_all(parent).map_err(|e| fail(CandidateState::Downloading, VodError::fs(parent, e)))?;
    }

    let job = DownloadJob {
        name: &extracted.title,
        url: &candidate.remote_path,
        location: &staging,
        timestamp: candidate.authoritative_timestamp,
    };
    if let Err(e) = ctx.downloader.download(&job, ctx.progress.as_ref()) {
        discard(&staging);
        return Err(fail(CandidateState::Downloading, e));
    }

    if let Err(e) = place(&staging, &destination) {
        discard(&staging);
        return Err(fail(CandidateState::Downloaded, e));
    }

    ctx.store
        .record(DownloadRecord::completed_now(candidate, destination.clone()))
        .map_err(|e| fail(CandidateState::Placed, e))?;
    debug!(remote = %candidate.remote_path, state = %CandidateState::Recorded, "record committed");

    Ok(Outcome::Downloaded(destination))
}

pub fn staging_path(root: &Path, raw_filename: &str) -> PathBuf {
    root.join(STAGING_DIR).join(format!("{}.part", sanitize_filename(&percent_decode(raw_filename))))
}

fn existing_len(path: &Path) -> Option<u64> {
    fs::symlink_metadata(path).ok().map(|m| m.len())
}

/// Moves the staging file to `destination`, refusing to replace anything.
fn place(staging: &Path, destination: &Path) -> Result<()> {
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent).map_err(|e| VodError::fs(parent, e))?;
    }

    match fs::hard_link(staging, destination) {
        Ok(()) => {
            if let Err(e) = fs::remove_file(staging) {
                warn!(staging = %staging.display(), error = %e, "placed VOD but could not remove staging file");
            }
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            Err(VodError::Collision { path: destination.to_path_buf() })
        }
        Err(e) => {
            // No hard links on this filesystem
            debug!(error = %e, "hard link failed, falling back to rename");
            if fs::symlink_metadata(destination).is_ok() {
                return Err(VodError::Collision { path: destination.to_path_buf() });
            }
            fs::rename(staging, destination).map_err(|e| VodError::fs(destination, e))
        }
    }
}

fn discard(staging: &Path) {
    match fs::remove_file(staging) {
        Ok(()) => debug!(staging = %staging.display(), "removed staging file"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(staging = %staging.display(), error = %e, "could not remove staging file"),
    }
}
