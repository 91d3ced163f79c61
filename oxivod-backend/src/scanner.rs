use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::blocking::Client;
use reqwest::header::{CONTENT_LENGTH, LAST_MODIFIED};
use scraper::{Html, Selector};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{Result, VodError};
use crate::helpers::is_media_file;
use crate::types::{identity_key, CandidateFile};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingFile {
    pub url: Url,
    pub raw_filename: String,
}

/// Entries of one directory listing page, in page order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    pub directories: Vec<Url>,
    pub files: Vec<ListingFile>,
}

/// Extracts child directories and media files from an HTML index page.
///
/// Parent links, sort links (`?C=N;O=D`) and anything outside `base` are
/// ignored, as are files without a media extension.
pub fn parse_listing(base: &Url, html: &str) -> Listing {
    let doc = Html::parse_document(html);
    let link_sel = Selector::parse("a[href]").expect("static selector");

    let mut seen = HashSet::new();
    let mut listing = Listing::default();

    for href in doc.select(&link_sel).filter_map(|a| a.value().attr("href")) {
        let href = href.trim();
        if href.is_empty() || href.starts_with('?') || href.starts_with('#') || href.starts_with("..") {
            continue;
        }

        let Ok(url) = base.join(href) else {
            debug!(href, "unparsable link in listing");
            continue;
        };
        if url.query().is_some() || url == *base || !url.as_str().starts_with(base.as_str()) {
            continue;
        }
        if !seen.insert(url.clone()) {
            continue;
        }

        if url.path().ends_with('/') {
            listing.directories.push(url);
            continue;
        }

        let raw_filename = href.rsplit('/').next().unwrap_or(href).to_string();
        if is_media_file(&raw_filename) {
            listing.files.push(ListingFile { url, raw_filename });
        } else {
            debug!(file = %raw_filename, "not a media file, ignoring");
        }
    }

    listing
}

// Obsolete HTTP date forms, both always GMT.
const RFC850_FORMAT: &str = "%A, %d-%b-%y %H:%M:%S GMT";
const ASCTIME_FORMAT: &str = "%a %b %e %H:%M:%S %Y";

/// Parses an HTTP date: the RFC 1123 form first, then RFC 850 and asctime.
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(t) = DateTime::parse_from_rfc2822(value) {
        return Some(t.with_timezone(&Utc));
    }
    [RFC850_FORMAT, ASCTIME_FORMAT]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|t| t.and_utc())
}

/// Walks the archive index and resolves file metadata with header probes.
pub struct Scanner {
    client: Client,
    timeout: Duration,
    known: HashSet<String>,
}

impl Scanner {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout, known: HashSet::new() }
    }

    /// Identity keys that need no probe because they are already downloaded.
    pub fn set_known(&mut self, known: HashSet<String>) {
        self.known = known;
    }

    /// Starts a fresh walk from `base_url`. Only the root listing is fetched
    /// eagerly; a failure there aborts the scan.
    pub fn scan(&self, base_url: &Url) -> Result<Scan<'_>> {
        let mut root = base_url.clone();
        if !root.path().ends_with('/') {
            root.set_path(&format!("{}/", root.path()));
        }

        let listing = self.fetch_listing(&root)?;
        info!(
            root = %root,
            directories = listing.directories.len(),
            files = listing.files.len(),
            "archive root listed"
        );

        Ok(Scan {
            scanner: self,
            directories: listing.directories.into(),
            files: listing.files.into(),
            stats: ScanStats::default(),
        })
    }

    pub fn fetch_listing(&self, url: &Url) -> Result<Listing> {
        debug!(url = %url, "fetching listing");
        let response = self
            .client
            .get(url.clone())
            .timeout(self.timeout)
            .send()
            .map_err(|e| VodError::request(url.as_str(), e))?;

        let status = response.status();
        debug!(url = %url, status = status.as_u16(), "listing response");
        if !status.is_success() {
            return Err(VodError::HttpStatus { url: url.to_string(), status: status.as_u16() });
        }

        let body = response.text().map_err(|e| VodError::request(url.as_str(), e))?;
        Ok(parse_listing(url, &body))
    }

    /// Resolves timestamp and size of one file without fetching its body.
    pub fn probe(&self, url: &Url, raw_filename: &str) -> Result<CandidateFile> {
        let response = self
            .client
            .head(url.clone())
            .timeout(self.timeout)
            .send()
            .map_err(|e| VodError::request(url.as_str(), e))?;

        let status = response.status();
        debug!(url = %url, status = status.as_u16(), headers = ?response.headers(), "probe response");
        if !status.is_success() {
            return Err(VodError::HttpStatus { url: url.to_string(), status: status.as_u16() });
        }

        let headers = response.headers();
        let authoritative_timestamp = headers
            .get(LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_http_date)
            .ok_or_else(|| VodError::MissingTimestamp { url: url.to_string() })?;
        let size_bytes = headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());

        Ok(CandidateFile {
            remote_path: url.clone(),
            raw_filename: raw_filename.to_string(),
            size_bytes,
            authoritative_timestamp,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub known_skipped: usize,
    pub probe_failures: usize,
    pub listing_failures: usize,
}

/// Lazy walk over one archive; subdirectories are listed when reached.
pub struct Scan<'a> {
    scanner: &'a Scanner,
    directories: VecDeque<Url>,
    files: VecDeque<ListingFile>,
    stats: ScanStats,
}

impl Scan<'_> {
    pub fn stats(&self) -> ScanStats {
        self.stats
    }
}

impl Iterator for Scan<'_> {
    type Item = CandidateFile;

    fn next(&mut self) -> Option<CandidateFile> {
        loop {
            while let Some(file) = self.files.pop_front() {
                if self.scanner.known.contains(&identity_key(&file.url)) {
                    debug!(remote = %file.url, "already downloaded, not probing");
                    self.stats.known_skipped += 1;
                    continue;
                }

                match self.scanner.probe(&file.url, &file.raw_filename) {
                    Ok(candidate) => return Some(candidate),
                    Err(e) => {
                        warn!(remote = %file.url, kind = %e.kind(), error = %e, "metadata probe failed, skipping file");
                        self.stats.probe_failures += 1;
                    }
                }
            }

            let directory = self.directories.pop_front()?;
            match self.scanner.fetch_listing(&directory) {
                Ok(listing) => {
                    if !listing.directories.is_empty() {
                        debug!(url = %directory, nested = listing.directories.len(), "ignoring nested directories");
                    }
                    debug!(url = %directory, files = listing.files.len(), "subdirectory listed");
                    self.files.extend(listing.files);
                }
                Err(e) => {
                    warn!(url = %directory, kind = %e.kind(), error = %e, "subdirectory listing failed, skipping");
                    self.stats.listing_failures += 1;
                }
            }
        }
    }
}
