mod download_view;

use std::fs::{self, File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::{crate_version, Arg, ArgAction, Command};
use download_view::BarProgress;
use oxivod_backend::config::Config;
use oxivod_backend::scheduler::{run_daily, StopSignal};
use oxivod_backend::{prepare, run_check};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() -> Result<()> {
    let matches = Command::new("oxivod")
        .version(crate_version!())
        .about("Mirrors new VODs from a web archive into a Plex/Jellyfin friendly library")
        .arg(
            Arg::new("check-now")
                .long("check-now")
                .help("Run a check right away, then keep waiting for the daily schedule")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    // Load .env file if present
    dotenvy::dotenv().ok();

    let config = Config::from_env().context("Failed to load configuration")?;
    init_tracing(config.debug, config.log_file.as_deref())?;

    config
        .ensure_destination()
        .with_context(|| format!("Download path {} is not usable", config.download_path.display()))?;
    config.log_config();

    let stop = StopSignal::new();
    let handler_stop = stop.clone();
    ctrlc::set_handler(move || handler_stop.trigger()).context("Failed to install Ctrl-C handler")?;

    let (mut ctx, mut scanner) = prepare(&config, stop.clone(), Box::new(BarProgress::new()))
        .context("Failed to set up the downloader")?;

    let mut check = || {
        if let Err(e) = run_check(&mut ctx, &mut scanner, &config.vod_base_url) {
            error!(kind = %e.kind(), error = %e, "VOD check failed, retrying at the next scheduled time");
        }
    };

    if matches.get_flag("check-now") {
        info!("Running immediate check");
        check();
    }

    if !stop.is_triggered() {
        info!("Scheduled to check daily at {}, press Ctrl+C to stop", config.check_time.format("%H:%M"));
        run_daily(config.check_time, &stop, &mut check);
    }

    info!("VOD downloader stopped");
    Ok(())
}

fn init_tracing(debug: bool, log_file: Option<&Path>) -> Result<()> {
    let default = if debug {
        "oxivod=debug,oxivod_backend=debug,reqwest=debug"
    } else {
        "oxivod=info,oxivod_backend=info"
    };

    let file_layer = match log_file {
        Some(path) => Some(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(open_log_file(path)?)),
        ),
        None => None,
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();
    Ok(())
}

/// Opens `path` for appending, creating missing parent directories.
fn open_log_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("Failed to create log directory {}", parent.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_file_receives_plain_events() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("oxivod.log");

        let layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(Mutex::new(open_log_file(&path).unwrap()));
        let subscriber = tracing_subscriber::registry().with(layer);
        tracing::subscriber::with_default(subscriber, || info!(run = 1, "check complete"));

        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.contains("check complete"));
        assert!(contents.contains("run=1"));
        assert!(!contents.contains('\u{1b}'));
    }

    #[test]
    fn log_file_is_appended_to() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("oxivod.log");
        fs::write(&path, "earlier\n").unwrap();

        let mut file = open_log_file(&path).unwrap();
        std::io::Write::write_all(&mut file, b"later\n").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "earlier\nlater\n");
    }
}
