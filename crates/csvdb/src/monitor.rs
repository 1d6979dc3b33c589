//! Polling change monitor for a directory of delimited files.
//!
//! No filesystem notifications are used: each poll lists the directory and
//! compares modification times with the last ones recorded. Several writes
//! inside one interval collapse into a single change, and a rewrite that
//! leaves the timestamp unchanged is not seen. Deletions and renames are
//! not reported.

use crate::error::{CsvDbError, Result};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, info, warn};

/// Longest single sleep while waiting out a poll interval.
const STOP_CHECK_SLICE: Duration = Duration::from_millis(25);

/// A created or modified source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    pub file_name: String,
    pub path: PathBuf,
    pub modified: SystemTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Idle,
    Running,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub directory: PathBuf,
    /// Lowercase, without the dot
    pub extension: String,
    pub poll_interval: Duration,
}

/// Counters for one poll.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollStats {
    pub files_seen: usize,
    pub changed: usize,
    pub errors: usize,
}

/// Synchronous timestamp poller. This is what the monitor thread drives.
#[derive(Debug)]
pub struct Poller {
    directory: PathBuf,
    extension: String,
    seen: HashMap<PathBuf, SystemTime>,
}

impl Poller {
    pub fn new(directory: impl Into<PathBuf>, extension: &str) -> Self {
        Self {
            directory: directory.into(),
            extension: extension.trim_start_matches('.').to_ascii_lowercase(),
            seen: HashMap::new(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Record every matching file's current timestamp as the baseline.
    ///
    /// Fails only when the directory itself cannot be listed.
    pub fn snapshot(&mut self) -> Result<Vec<FileChange>> {
        let files = self.list_files()?;
        let mut baseline = Vec::with_capacity(files.len());
        for path in files {
            match modified_time(&path) {
                Ok(modified) => {
                    self.seen.insert(path.clone(), modified);
                    baseline.push(change_for(path, modified));
                }
                Err(e) => warn!("Skipping {}: {}", path.display(), e),
            }
        }
        Ok(baseline)
    }

    /// One poll: report every file that is new or has a newer timestamp.
    ///
    /// Per-file stat failures are logged and skipped. The callback runs
    /// synchronously, in listing order, before the next file is examined.
    pub fn poll_once<F>(&mut self, mut on_change: F) -> PollStats
    where
        F: FnMut(&FileChange),
    {
        let mut stats = PollStats::default();
        let files = match self.list_files() {
            Ok(files) => files,
            Err(e) => {
                warn!("Cannot list {}: {}", self.directory.display(), e);
                stats.errors += 1;
                return stats;
            }
        };

        for path in files {
            stats.files_seen += 1;
            let modified = match modified_time(&path) {
                Ok(t) => t,
                Err(e) => {
                    warn!("Skipping {}: {}", path.display(), e);
                    stats.errors += 1;
                    continue;
                }
            };
            let is_newer = match self.seen.get(&path) {
                Some(previous) => modified > *previous,
                None => true,
            };
            if is_newer {
                self.seen.insert(path.clone(), modified);
                stats.changed += 1;
                let change = change_for(path, modified);
                debug!(file = %change.file_name, "change detected");
                on_change(&change);
            }
        }
        stats
    }

    /// Regular files with the watched extension, sorted by path.
    fn list_files(&self) -> Result<Vec<PathBuf>> {
        let entries = fs::read_dir(&self.directory).map_err(|source| {
            CsvDbError::SourceUnavailable {
                path: self.directory.clone(),
                source,
            }
        })?;

        let mut files = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Directory entry error in {}: {}", self.directory.display(), e);
                    continue;
                }
            };
            let path = entry.path();
            let matches_ext = path
                .extension()
                .map(|ext| ext.to_string_lossy().eq_ignore_ascii_case(&self.extension))
                .unwrap_or(false);
            if matches_ext && path.is_file() {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

fn modified_time(path: &Path) -> std::io::Result<SystemTime> {
    fs::metadata(path)?.modified()
}

fn change_for(path: PathBuf, modified: SystemTime) -> FileChange {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    FileChange {
        file_name,
        path,
        modified,
    }
}

/// Cooperative stop flag shared with the polling thread.
#[derive(Debug, Clone, Default)]
pub struct StopToken {
    stopped: Arc<AtomicBool>,
}

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

/// Background polling loop over one directory.
///
/// Idle until [`ChangeMonitor::start`], then Running until
/// [`ChangeMonitor::stop`]. Stopped is terminal. The thread notices a stop
/// request at its next poll boundary, so it exits within one interval.
pub struct ChangeMonitor {
    config: MonitorConfig,
    state: MonitorState,
    stop: StopToken,
    handle: Option<JoinHandle<()>>,
}

impl ChangeMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            config,
            state: MonitorState::Idle,
            stop: StopToken::new(),
            handle: None,
        }
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Take the baseline snapshot and launch the polling thread.
    ///
    /// Returns the baseline; files in it are only reported again once their
    /// timestamp moves forward.
    pub fn start<F>(&mut self, mut on_change: F) -> Result<Vec<FileChange>>
    where
        F: FnMut(&FileChange) + Send + 'static,
    {
        if self.state != MonitorState::Idle {
            return Err(CsvDbError::InvalidState(format!(
                "monitor already {:?}",
                self.state
            )));
        }

        let mut poller = Poller::new(&self.config.directory, &self.config.extension);
        let baseline = poller.snapshot()?;
        let interval = self.config.poll_interval;
        let stop = self.stop.clone();

        let handle = thread::Builder::new()
            .name("csvdb-monitor".to_string())
            .spawn(move || {
                info!(
                    "Monitoring {} every {:?}",
                    poller.directory().display(),
                    interval
                );
                loop {
                    if !wait_interval(&stop, interval) {
                        break;
                    }
                    let stats = poller.poll_once(&mut on_change);
                    if stats.changed > 0 || stats.errors > 0 {
                        debug!(
                            seen = stats.files_seen,
                            changed = stats.changed,
                            errors = stats.errors,
                            "poll complete"
                        );
                    }
                }
                info!("Monitor stopped");
            })?;

        self.handle = Some(handle);
        self.state = MonitorState::Running;
        Ok(baseline)
    }

    /// Request the polling thread to exit. Safe to call repeatedly.
    pub fn stop(&mut self) {
        self.stop.stop();
        if self.state != MonitorState::Stopped {
            self.state = MonitorState::Stopped;
        }
    }

    /// Wait for the polling thread to finish. Does not request a stop.
    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Monitor thread panicked");
            }
        }
    }
}

impl Drop for ChangeMonitor {
    fn drop(&mut self) {
        self.stop.stop();
    }
}

/// Sleep for one interval in short slices. False once a stop is requested.
fn wait_interval(stop: &StopToken, interval: Duration) -> bool {
    let deadline = Instant::now() + interval;
    loop {
        if stop.is_stopped() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep((deadline - now).min(STOP_CHECK_SLICE));
    }
}
