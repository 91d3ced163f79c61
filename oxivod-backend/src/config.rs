// Configuration for oxivod
// Read from environment variables (and a `.env` file loaded by the binary)

use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::NaiveTime;
use url::Url;

use crate::error::{Result, VodError};
use crate::naming::Naming;

pub const DEFAULT_BASE_URL: &str = "https://archive.wubby.tv/vods/public/";
pub const DEFAULT_FOLDER_STRUCTURE: &str = "{year}/{month} - {month_name}";
pub const DEFAULT_FILE_NAME_PATTERN: &str = "{date} - {title}";

const BYTES_PER_MB: u64 = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct Config {
    /// Destination root for placed files
    pub download_path: PathBuf,

    /// Size ceiling in MiB, 0 disables it
    pub max_file_size_mb: u64,

    /// Daily check time (local)
    pub check_time: NaiveTime,

    pub vod_base_url: Url,

    pub naming: Naming,

    pub debug: bool,

    /// Dedupe store file
    pub store_path: PathBuf,

    /// Pause between two downloads
    pub download_delay: Duration,

    /// Extra attempts per download after a transient failure
    pub download_retries: u32,

    pub user_agent: String,

    /// Timeout for listing and probe requests
    pub request_timeout: Duration,

    /// Upper bound for one whole body transfer
    pub download_timeout: Duration,

    /// Optional second log destination
    pub log_file: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from `lookup`, applying defaults for unset
    /// keys. Nothing is touched on disk.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let download_path = PathBuf::from(var("DOWNLOAD_PATH").unwrap_or_else(|| "./downloads".to_string()));
        let download_path = std::path::absolute(&download_path).unwrap_or(download_path);

        let check_time = var("CHECK_TIME").unwrap_or_else(|| "02:00".to_string());
        let check_time = NaiveTime::parse_from_str(&check_time, "%H:%M")
            .map_err(|_| VodError::Config(format!("CHECK_TIME must be HH:MM, got {check_time:?}")))?;

        let base = var("VOD_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let mut vod_base_url =
            Url::parse(&base).map_err(|e| VodError::Config(format!("VOD_BASE_URL {base:?} is not a URL: {e}")))?;
        if !matches!(vod_base_url.scheme(), "http" | "https") {
            return Err(VodError::Config(format!("VOD_BASE_URL must be http(s), got {base:?}")));
        }
        if !vod_base_url.path().ends_with('/') {
            let path = format!("{}/", vod_base_url.path());
            vod_base_url.set_path(&path);
        }

        let naming = Naming::new(
            &var("FOLDER_STRUCTURE").unwrap_or_else(|| DEFAULT_FOLDER_STRUCTURE.to_string()),
            &var("FILE_NAME_PATTERN").unwrap_or_else(|| DEFAULT_FILE_NAME_PATTERN.to_string()),
        )?;

        let store_path = var("STORE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| download_path.join(".oxivod").join("downloaded.jsonl"));

        let max_file_size_mb: u64 = parse_number(&var, "MAX_FILE_SIZE_MB", 0)?;
        if max_file_size_mb.checked_mul(BYTES_PER_MB).is_none() {
            return Err(VodError::Config(format!("MAX_FILE_SIZE_MB {max_file_size_mb} is too large")));
        }

        Ok(Self {
            max_file_size_mb,
            check_time,
            vod_base_url,
            naming,
            debug: var("DEBUG").map(|v| v.eq_ignore_ascii_case("true") || v == "1").unwrap_or(false),
            store_path,
            download_delay: Duration::from_secs(parse_number(&var, "DOWNLOAD_DELAY_SECS", 2)?),
            download_retries: parse_number(&var, "DOWNLOAD_RETRIES", 2)?,
            user_agent: var("USER_AGENT").unwrap_or_else(|| format!("oxivod/{}", env!("CARGO_PKG_VERSION"))),
            request_timeout: Duration::from_secs(parse_number(&var, "REQUEST_TIMEOUT_SECS", 30)?),
            download_timeout: Duration::from_secs(parse_number(&var, "DOWNLOAD_TIMEOUT_SECS", 6 * 60 * 60)?),
            log_file: var("LOG_FILE").map(PathBuf::from),
            download_path,
        })
    }

    pub fn max_file_size_bytes(&self) -> Option<u64> {
        self.max_file_size_mb.checked_mul(BYTES_PER_MB).filter(|bytes| *bytes > 0)
    }

    /// Creates the destination root and checks it accepts new files.
    pub fn ensure_destination(&self) -> Result<()> {
        let unwritable =
            |e: std::io::Error| VodError::Config(format!("cannot write to {}: {e}", self.download_path.display()));

        fs::create_dir_all(&self.download_path).map_err(unwritable)?;
        let probe = self.download_path.join(".oxivod-write-test");
        fs::write(&probe, b"").map_err(unwritable)?;
        fs::remove_file(&probe).map_err(unwritable)
    }

    pub fn log_config(&self) {
        tracing::info!("Download path: {}", self.download_path.display());
        tracing::info!("Scheduled check time: {}", self.check_time.format("%H:%M"));
        tracing::info!("VOD source: {}", self.vod_base_url);
        tracing::info!("Folder pattern: {} / file pattern: {}", self.naming.folder, self.naming.file);
        match self.max_file_size_bytes() {
            Some(bytes) => tracing::info!("Size ceiling: {} MB ({} bytes)", self.max_file_size_mb, bytes),
            None => tracing::debug!("Size ceiling: none"),
        }
        tracing::debug!("Dedupe store: {}", self.store_path.display());
        tracing::debug!(
            "Delay {:?}, retries {}, request timeout {:?}, download timeout {:?}",
            self.download_delay,
            self.download_retries,
            self.request_timeout,
            self.download_timeout
        );
        if let Some(log_file) = &self.log_file {
            tracing::info!("Also logging to {}", log_file.display());
        }
    }
}

fn parse_number<T: FromStr>(var: impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T> {
    match var(key) {
        None => Ok(default),
        Some(value) => value
            .parse()
            .map_err(|_| VodError::Config(format!("{key} must be a non-negative integer, got {value:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Result<Config> {
        let env: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.check_time, NaiveTime::from_hms_opt(2, 0, 0).unwrap());
        assert_eq!(config.vod_base_url.as_str(), DEFAULT_BASE_URL);
        assert_eq!(config.max_file_size_bytes(), None);
        assert!(!config.debug);
        assert!(config.download_path.is_absolute());
        assert!(config.store_path.ends_with(".oxivod/downloaded.jsonl"));
        assert_eq!(config.download_delay, Duration::from_secs(2));
        assert_eq!(config.download_retries, 2);
        assert_eq!(config.download_timeout, Duration::from_secs(21600));
        assert_eq!(config.log_file, None);
    }

    #[test]
    fn overrides() {
        let config = config(&[
            ("DOWNLOAD_PATH", "/srv/media/vods"),
            ("MAX_FILE_SIZE_MB", "100"),
            ("CHECK_TIME", "23:30"),
            ("VOD_BASE_URL", "http://mirror.example/vods"),
            ("FOLDER_STRUCTURE", "{month_name} - {year}"),
            ("FILE_NAME_PATTERN", "{title} - {date}"),
            ("DEBUG", "TRUE"),
            ("DOWNLOAD_DELAY_SECS", "0"),
            ("DOWNLOAD_TIMEOUT_SECS", "600"),
            ("LOG_FILE", "/var/log/oxivod.log"),
        ])
        .unwrap();

        assert_eq!(config.download_path, PathBuf::from("/srv/media/vods"));
        assert_eq!(config.max_file_size_bytes(), Some(100 * 1024 * 1024));
        assert_eq!(config.check_time, NaiveTime::from_hms_opt(23, 30, 0).unwrap());
        assert_eq!(config.vod_base_url.as_str(), "http://mirror.example/vods/");
        assert_eq!(config.naming.folder.template(), "{month_name} - {year}");
        assert!(config.debug);
        assert_eq!(config.download_delay, Duration::ZERO);
        assert_eq!(config.download_timeout, Duration::from_secs(600));
        assert_eq!(config.log_file, Some(PathBuf::from("/var/log/oxivod.log")));
    }

    #[test]
    fn size_ceiling_that_overflows_bytes_is_rejected() {
        let huge = u64::MAX.to_string();
        assert!(matches!(config(&[("MAX_FILE_SIZE_MB", huge.as_str())]), Err(VodError::Config(_))));

        let largest = (u64::MAX / (1024 * 1024)).to_string();
        let config = config(&[("MAX_FILE_SIZE_MB", largest.as_str())]).unwrap();
        assert_eq!(config.max_file_size_bytes(), Some(u64::MAX / (1024 * 1024) * 1024 * 1024));
    }

    #[test]
    fn invalid_values_are_config_errors() {
        assert!(matches!(config(&[("CHECK_TIME", "2am")]), Err(VodError::Config(_))));
        assert!(matches!(config(&[("MAX_FILE_SIZE_MB", "-5")]), Err(VodError::Config(_))));
        assert!(matches!(config(&[("VOD_BASE_URL", "ftp://x/")]), Err(VodError::Config(_))));
        assert!(matches!(config(&[("FILE_NAME_PATTERN", "{episode}")]), Err(VodError::Config(_))));
    }

    #[test]
    fn destination_must_be_writable() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("media");
        let ok = config(&[("DOWNLOAD_PATH", root.to_str().unwrap())]).unwrap();
        ok.ensure_destination().unwrap();
        assert!(root.is_dir());

        let file = dir.path().join("plain-file");
        fs::write(&file, b"x").unwrap();
        let blocked = config(&[("DOWNLOAD_PATH", file.to_str().unwrap())]).unwrap();
        assert!(matches!(blocked.ensure_destination(), Err(VodError::Config(_))));
    }
}
