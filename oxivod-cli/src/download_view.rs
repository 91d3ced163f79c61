use std::cell::RefCell;

use indicatif::{ProgressBar, ProgressStyle};
use oxivod_backend::downloader::ProgressReporter;

fn create_task_text(total_size: Option<u64>, completed: u64, name: &str) -> String {
    let com_mb = completed as f64 / 1048576.0;
    match total_size {
        Some(total) => {
            let tot_mb = total as f64 / 1048576.0;
            format!("{com_mb:.1} / {tot_mb:.1} MB - {name}")
        }
        None => format!("{com_mb:.1} MB - {name}"),
    }
}

struct ActiveBar {
    bar: ProgressBar,
    name: String,
    total_size: Option<u64>,
}

/// Terminal progress bar for the download in flight.
#[derive(Default)]
pub struct BarProgress {
    active: RefCell<Option<ActiveBar>>,
}

impl BarProgress {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressReporter for BarProgress {
    fn started(&self, name: &str, total_size: Option<u64>) {
        let bar = match total_size {
            Some(total) => {
                let pb = ProgressBar::new(total);
                pb.set_style(
                    ProgressStyle::default_bar()
                        .template("{spinner:.green} [{bar:40.cyan/blue}] {bytes:>10}/{total_bytes:10} {msg}")
                        .unwrap_or_else(|_| ProgressStyle::default_bar())
                        .progress_chars("#>-"),
                );
                pb
            }
            None => ProgressBar::new_spinner(),
        };
        let name: String = name.chars().take(40).collect();
        bar.set_message(name.clone());
        *self.active.borrow_mut() = Some(ActiveBar { bar, name, total_size });
    }

    fn advanced(&self, completed: u64) {
        if let Some(active) = self.active.borrow().as_ref() {
            active.bar.set_position(completed);
        }
    }

    fn finished(&self, success: bool) {
        if let Some(active) = self.active.borrow_mut().take() {
            let text = create_task_text(active.total_size, active.bar.position(), &active.name);
            if success {
                active.bar.finish_with_message(format!("Downloaded {text}"));
            } else {
                active.bar.abandon_with_message(format!("Failed {text}"));
            }
        }
    }
}
