use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{Local, NaiveDateTime, NaiveTime, TimeDelta};
use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, info};

// Upper bound for one sleep so clock jumps (suspend, DST) are noticed.
const MAX_NAP: Duration = Duration::from_secs(60);

/// Run-granular cancellation shared between the signal handler, the
/// scheduler and the pipeline.
#[derive(Clone)]
pub struct StopSignal {
    flag: Arc<AtomicBool>,
    tx: Sender<()>,
    rx: Receiver<()>,
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, rx) = bounded(1);
        Self { flag: Arc::new(AtomicBool::new(false)), tx, rx }
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
        // A full channel already holds a wake-up.
        self.tx.try_send(()).ok();
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Sleeps for up to `timeout`; returns `true` once a stop was requested.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.is_triggered() {
            return true;
        }
        match self.rx.recv_timeout(timeout) {
            Ok(()) => {
                // Keep the wake-up for any other waiter.
                self.tx.try_send(()).ok();
                true
            }
            Err(RecvTimeoutError::Timeout) => self.is_triggered(),
            Err(RecvTimeoutError::Disconnected) => true,
        }
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Next moment at `at` strictly after `now`.
pub fn next_run_after(now: NaiveDateTime, at: NaiveTime) -> NaiveDateTime {
    let today = now.date().and_time(at);
    if today > now { today } else { today + TimeDelta::days(1) }
}

/// Calls `job` every day at `at` (local time) until `stop` is triggered.
/// Jobs run on the calling thread, so two runs never overlap.
pub fn run_daily(at: NaiveTime, stop: &StopSignal, mut job: impl FnMut()) {
    loop {
        let next = next_run_after(Local::now().naive_local(), at);
        info!("Waiting for scheduled check at {}", next.format("%Y-%m-%d %H:%M"));

        loop {
            let now = Local::now().naive_local();
            if now >= next {
                break;
            }
            let nap = (next - now).to_std().unwrap_or_default().min(MAX_NAP);
            if stop.wait_timeout(nap) {
                debug!("scheduler stopped while waiting");
                return;
            }
        }

        job();

        if stop.is_triggered() {
            debug!("scheduler stopped after run");
            return;
        }
    }
}
