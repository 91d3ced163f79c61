pub mod config;
pub mod downloader;
pub mod error;
pub mod extract;
pub mod helpers;
pub mod naming;
pub mod pipeline;
pub mod scanner;
pub mod scheduler;
pub mod store;
pub mod types;

use std::time::Duration;

use tracing::info;
use url::Url;

use config::Config;
use downloader::{Downloader, ProgressReporter};
use error::Result;
use helpers::create_reqwest_client;
use pipeline::PipelineContext;
use scanner::Scanner;
use scheduler::StopSignal;
use store::DedupeStore;
use types::Summary;

/// Builds the long-lived pipeline context and scanner from `config`.
/// The destination root must already be usable.
pub fn prepare(
    config: &Config,
    stop: StopSignal,
    progress: Box<dyn ProgressReporter>,
) -> Result<(PipelineContext, Scanner)> {
    let client = create_reqwest_client(&config.user_agent, config.request_timeout)?;
    let store = DedupeStore::load(&config.store_path);
    info!("Already downloaded: {} files", store.len());

    let context = PipelineContext {
        store,
        downloader: Downloader::new(client.clone(), config.download_retries, Duration::from_millis(500))
            .with_timeout(config.download_timeout),
        naming: config.naming.clone(),
        destination_root: config.download_path.clone(),
        max_size_bytes: config.max_file_size_bytes(),
        delay: config.download_delay,
        stop,
        progress,
    };

    Ok((context, Scanner::new(client, config.request_timeout)))
}

/// One complete check: list the archive, then fetch and place every new VOD.
/// Fails only when the archive root cannot be listed.
pub fn run_check(ctx: &mut PipelineContext, scanner: &mut Scanner, base_url: &Url) -> Result<Summary> {
    info!("Scanning for new VODs at {}", base_url);
    scanner.set_known(ctx.store.keys());

    let mut scan = scanner.scan(base_url)?;
    let mut summary = pipeline::process(ctx, scan.by_ref());

    let stats = scan.stats();
    summary.skipped_known += stats.known_skipped;
    summary.scan_failures = stats.probe_failures + stats.listing_failures;

    if summary.discovered == 0 && summary.scan_failures == 0 {
        info!("No new VODs found - all up to date");
    }
    info!(
        "Check complete - Downloaded: {}, Adopted: {}, Skipped: {} known / {} too large, Failed: {} ({} during scan)",
        summary.downloaded,
        summary.adopted,
        summary.skipped_known,
        summary.skipped_too_large,
        summary.failed,
        summary.scan_failures
    );
    if let Some(reason) = &summary.aborted {
        info!("Run ended early: {}", reason);
    }

    Ok(summary)
}
