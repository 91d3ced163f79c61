use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use filetime::{set_file_times, FileTime};
use reqwest::blocking::{Client, Response};
use tracing::{debug, warn};
use url::Url;

use crate::error::{Result, VodError};

/// Receives progress of the download in flight.
pub trait ProgressReporter {
    fn started(&self, name: &str, total_size: Option<u64>);
    fn advanced(&self, completed: u64);
    fn finished(&self, success: bool);
}

/// Reporter that discards everything.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn started(&self, _name: &str, _total_size: Option<u64>) {}
    fn advanced(&self, _completed: u64) {}
    fn finished(&self, _success: bool) {}
}

pub struct DownloadJob<'a> {
    pub name: &'a str,
    pub url: &'a Url,
    pub location: &'a Path,
    pub timestamp: DateTime<Utc>,
}

/// Streams bodies to disk, one at a time.
pub struct Downloader {
    client: Client,
    retries: u32,
    backoff: Duration,
    timeout: Option<Duration>,
}

impl Downloader {
    pub fn new(client: Client, retries: u32, backoff: Duration) -> Self {
        Self { client, retries, backoff, timeout: None }
    }

    /// Caps one attempt, headers and body together, so a stalled server
    /// cannot hold the run forever.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Writes the body of `job.url` to `job.location` and stamps the file
    /// with `job.timestamp`. Network failures are retried with a linearly
    /// growing pause; returns the number of bytes written.
    pub fn download(&self, job: &DownloadJob<'_>, progress: &dyn ProgressReporter) -> Result<u64> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.attempt(job, progress) {
                Ok(bytes) => return Ok(bytes),
                Err(e) if e.is_retryable() && attempt <= self.retries => {
                    warn!(remote = %job.url, attempt, error = %e, "download attempt failed, retrying");
                    thread::sleep(self.backoff * attempt);
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn attempt(&self, job: &DownloadJob<'_>, progress: &dyn ProgressReporter) -> Result<u64> {
        debug!(remote = %job.url, staging = %job.location.display(), "requesting body");
        let mut request = self.client.get(job.url.clone());
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }
        let mut response: Response = request.send().map_err(|e| VodError::request(job.url.as_str(), e))?;

        let status = response.status();
        debug!(remote = %job.url, status = status.as_u16(), headers = ?response.headers(), "body response");
        if !status.is_success() {
            return Err(VodError::HttpStatus { url: job.url.to_string(), status: status.as_u16() });
        }

        let total_size = response.content_length();
        let mut file = File::create(job.location).map_err(|e| VodError::fs(job.location, e))?;
        let mut completed: u64 = 0;
        let mut buf = [0; 8192];

        progress.started(job.name, total_size);
        let copied = loop {
            let bytes_read = match response.read(&mut buf) {
                Ok(0) => break Ok(()),
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => break Err(VodError::Transfer { url: job.url.to_string(), source: e }),
            };

            if let Err(e) = file.write_all(&buf[..bytes_read]) {
                break Err(VodError::fs(job.location, e));
            }
            completed += bytes_read as u64;
            progress.advanced(completed);
        };

        let finished = copied
            .and_then(|_| match total_size {
                Some(expected) if expected != completed => Err(VodError::Transfer {
                    url: job.url.to_string(),
                    source: io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("received {completed} of {expected} bytes"),
                    ),
                }),
                _ => Ok(()),
            })
            .and_then(|_| file.sync_all().map_err(|e| VodError::fs(job.location, e)));
        progress.finished(finished.is_ok());
        finished?;

        let stamp = FileTime::from_unix_time(job.timestamp.timestamp(), 0);
        set_file_times(job.location, stamp, stamp).map_err(|e| VodError::fs(job.location, e))?;

        Ok(completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::cell::RefCell;

    #[derive(Default)]
    struct Recorder {
        events: RefCell<Vec<String>>,
    }

    impl ProgressReporter for Recorder {
        fn started(&self, name: &str, total_size: Option<u64>) {
            self.events.borrow_mut().push(format!("start {name} {total_size:?}"));
        }
        fn advanced(&self, _completed: u64) {}
        fn finished(&self, success: bool) {
            self.events.borrow_mut().push(format!("done {success}"));
        }
    }

    #[test]
    fn body_is_written_and_stamped() {
        let mut server = mockito::Server::new();
        let _m = server.mock("GET", "/a.mp4").with_body("0123456789").create();
        let url = Url::parse(&format!("{}/a.mp4", server.url())).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let location = dir.path().join("a.part");
        let timestamp = Utc.with_ymd_and_hms(2025, 4, 13, 19, 4, 19).unwrap();
        let job = DownloadJob { name: "a", url: &url, location: &location, timestamp };

        let recorder = Recorder::default();
        let bytes = Downloader::new(Client::new(), 0, Duration::ZERO).download(&job, &recorder).unwrap();

        assert_eq!(bytes, 10);
        assert_eq!(std::fs::read_to_string(&location).unwrap(), "0123456789");
        let mtime = FileTime::from_last_modification_time(&std::fs::metadata(&location).unwrap());
        assert_eq!(mtime.unix_seconds(), timestamp.timestamp());
        assert_eq!(*recorder.events.borrow(), vec!["start a Some(10)".to_string(), "done true".to_string()]);
    }

    #[test]
    fn server_errors_are_retried_then_reported() {
        let mut server = mockito::Server::new();
        let m = server.mock("GET", "/a.mp4").with_status(502).expect(3).create();
        let url = Url::parse(&format!("{}/a.mp4", server.url())).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let location = dir.path().join("a.part");
        let job = DownloadJob { name: "a", url: &url, location: &location, timestamp: Utc::now() };

        let err = Downloader::new(Client::new(), 2, Duration::ZERO).download(&job, &NoProgress).unwrap_err();
        assert!(matches!(err, VodError::HttpStatus { status: 502, .. }));
        assert!(!location.exists());
        m.assert();
    }

    #[test]
    fn stalled_transfer_times_out() {
        let mut server = mockito::Server::new();
        let _m = server
            .mock("GET", "/slow.mp4")
            .with_chunked_body(|w| {
                w.write_all(b"first")?;
                thread::sleep(Duration::from_secs(2));
                w.write_all(b"late")
            })
            .create();
        let url = Url::parse(&format!("{}/slow.mp4", server.url())).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let location = dir.path().join("slow.part");
        let job = DownloadJob { name: "slow", url: &url, location: &location, timestamp: Utc::now() };

        let downloader = Downloader::new(Client::new(), 0, Duration::ZERO).with_timeout(Duration::from_millis(300));
        let err = downloader.download(&job, &NoProgress).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Network);
        assert!(err.is_retryable());
    }
}
