use std::collections::HashMap;
use std::fs;
use std::path::Path;

use mockito::{Mock, ServerGuard};
use oxivod_backend::config::Config;
use oxivod_backend::downloader::NoProgress;
use oxivod_backend::scheduler::StopSignal;
use oxivod_backend::store::DedupeStore;
use oxivod_backend::{prepare, run_check};

const LAST_MODIFIED: &str = "Sun, 13 Apr 2025 19:04:19 GMT";
const ANNOUNCEMENT: &str = "2025-09-16_19_04_19.413015_HUGE%20ANNOUNCEMENT.mp4";

fn index(links: &[&str]) -> String {
    let rows: String = links.iter().map(|l| format!("<a href=\"{l}\">{l}</a>\n")).collect();
    format!("<html><body><pre><a href=\"../\">../</a>\n{rows}</pre></body></html>")
}

fn config(server: &ServerGuard, root: &Path) -> Config {
    let env: HashMap<&str, String> = HashMap::from([
        ("DOWNLOAD_PATH", root.display().to_string()),
        ("VOD_BASE_URL", format!("{}/vods/public/", server.url())),
        ("FOLDER_STRUCTURE", "{month_name} - {year}".to_string()),
        ("FILE_NAME_PATTERN", "{title} - {date}".to_string()),
        ("DOWNLOAD_DELAY_SECS", "0".to_string()),
        ("DOWNLOAD_RETRIES", "0".to_string()),
    ]);
    Config::from_lookup(|key| env.get(key).cloned()).unwrap()
}

fn serve_file(server: &mut ServerGuard, path: &str, body: &str, hits: usize) -> (Mock, Mock) {
    let head = server
        .mock("HEAD", path)
        .with_header("last-modified", LAST_MODIFIED)
        .expect(hits)
        .create();
    let get = server.mock("GET", path).with_body(body).expect(hits).create();
    (head, get)
}

#[test]
fn archive_is_mirrored_once() {
    let mut server = mockito::Server::new();
    let root = tempfile::tempdir().unwrap();

    let _root = server.mock("GET", "/vods/public/").with_body(index(&["apr/", "notes.txt"])).create();
    let _apr = server
        .mock("GET", "/vods/public/apr/")
        .with_body(index(&[ANNOUNCEMENT, "just_chatting_40.mkv"]))
        .create();
    let (head_a, get_a) = serve_file(&mut server, &format!("/vods/public/apr/{ANNOUNCEMENT}"), "big news", 1);
    let (head_b, get_b) = serve_file(&mut server, "/vods/public/apr/just_chatting_40.mkv", "chat", 1);

    let config = config(&server, root.path());
    config.ensure_destination().unwrap();

    let (mut ctx, mut scanner) = prepare(&config, StopSignal::new(), Box::new(NoProgress)).unwrap();
    let first = run_check(&mut ctx, &mut scanner, &config.vod_base_url).unwrap();
    assert_eq!(first.downloaded, 2);
    assert_eq!(first.failed, 0);

    let month = root.path().join("apr - 2025");
    assert_eq!(fs::read_to_string(month.join("HUGE ANNOUNCEMENT - 2025-04-13.mp4")).unwrap(), "big news");
    assert_eq!(fs::read_to_string(month.join("just chatting - 2025-04-13.mkv")).unwrap(), "chat");

    // A second run, even from a fresh process, finds nothing new.
    let (mut ctx, mut scanner) = prepare(&config, StopSignal::new(), Box::new(NoProgress)).unwrap();
    let second = run_check(&mut ctx, &mut scanner, &config.vod_base_url).unwrap();
    assert_eq!(second.downloaded, 0);
    assert_eq!(second.skipped_known, 2);
    assert_eq!(DedupeStore::load(&config.store_path).len(), 2);
    assert_eq!(fs::read_to_string(&config.store_path).unwrap().lines().count(), 2);

    for mock in [head_a, get_a, head_b, get_b] {
        mock.assert();
    }
}

#[test]
fn one_failing_probe_does_not_stop_the_run() {
    let mut server = mockito::Server::new();
    let root = tempfile::tempdir().unwrap();

    let names = ["one.mp4", "two.mp4", "three.mp4", "four.mp4", "five.mp4"];
    let _root = server.mock("GET", "/vods/public/").with_body(index(&["may/"])).create();
    let _may = server.mock("GET", "/vods/public/may/").with_body(index(&names)).create();

    let mut mocks = Vec::new();
    for name in &names[..4] {
        let (head, get) = serve_file(&mut server, &format!("/vods/public/may/{name}"), name, 1);
        mocks.push(head);
        mocks.push(get);
    }
    let _five = server.mock("HEAD", "/vods/public/may/five.mp4").with_status(500).create();
    let never = server.mock("GET", "/vods/public/may/five.mp4").expect(0).create();

    let config = config(&server, root.path());
    let (mut ctx, mut scanner) = prepare(&config, StopSignal::new(), Box::new(NoProgress)).unwrap();
    let summary = run_check(&mut ctx, &mut scanner, &config.vod_base_url).unwrap();

    assert_eq!(summary.downloaded, 4);
    assert_eq!(summary.scan_failures, 1);
    assert_eq!(ctx.store.len(), 4);
    never.assert();
    for mock in mocks {
        mock.assert();
    }
}

#[test]
fn unreachable_root_fails_the_run() {
    let mut server = mockito::Server::new();
    let root = tempfile::tempdir().unwrap();
    let _root = server.mock("GET", "/vods/public/").with_status(502).create();

    let config = config(&server, root.path());
    let (mut ctx, mut scanner) = prepare(&config, StopSignal::new(), Box::new(NoProgress)).unwrap();

    assert!(run_check(&mut ctx, &mut scanner, &config.vod_base_url).is_err());
    assert!(ctx.store.is_empty());
}
