use std::time::Duration;

use reqwest::blocking::{Client, ClientBuilder};

use crate::error::{Result, VodError};

const TCP_KEEPALIVE: Duration = Duration::from_secs(60);

pub const MEDIA_EXTENSIONS: &[&str] = &["mp4", "mkv", "avi", "mov", "webm", "m4v", "flv", "wmv"];

pub fn sanitize_filename(name: &str) -> String {
    let cleaned = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect::<String>()
        .trim()
        .to_string();

    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        "_".to_string()
    } else {
        cleaned
    }
}

/// Splits `name` into stem and lowercase extension when the extension is a
/// known media type.
pub fn split_media_extension(name: &str) -> Option<(&str, String)> {
    let (stem, ext) = name.rsplit_once('.')?;
    let ext = ext.to_ascii_lowercase();
    if stem.is_empty() || !MEDIA_EXTENSIONS.contains(&ext.as_str()) {
        return None;
    }
    Some((stem, ext))
}

pub fn is_media_file(name: &str) -> bool {
    split_media_extension(name).is_some()
}

pub fn percent_decode(raw: &str) -> String {
    String::from_utf8_lossy(&urlencoding::decode_binary(raw.as_bytes())).into_owned()
}

pub fn create_reqwest_client(user_agent: &str, timeout: Duration) -> Result<Client> {
    // Every request sets its own timeout; bodies may take hours.
    ClientBuilder::new()
        .user_agent(user_agent)
        .connect_timeout(timeout)
        .tcp_keepalive(TCP_KEEPALIVE)
        .timeout(None::<Duration>)
        .build()
        .map_err(|e| VodError::Config(format!("cannot build HTTP client: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_reserved_characters() {
        assert_eq!(sanitize_filename("a/b:c*d?"), "a_b_c_d_");
        assert_eq!(sanitize_filename("  Title  "), "Title");
        assert_eq!(sanitize_filename("   "), "_");
        assert_eq!(sanitize_filename(".."), "_");
    }

    #[test]
    fn media_extension_is_case_insensitive() {
        assert_eq!(split_media_extension("clip.MP4"), Some(("clip", "mp4".to_string())));
        assert!(is_media_file("a.b.webm"));
        assert!(!is_media_file("notes.txt"));
        assert!(!is_media_file("noextension"));
        assert!(!is_media_file(".mp4"));
    }

    #[test]
    fn percent_decode_handles_bad_escapes() {
        assert_eq!(percent_decode("HUGE%20ANNOUNCEMENT"), "HUGE ANNOUNCEMENT");
        assert_eq!(percent_decode("100%_real"), "100%_real");
    }
}
