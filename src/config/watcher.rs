//! Hot reload of the configuration file.
//!
//! The parent directory is watched rather than the file itself, so editors
//! that save by rename-and-replace keep triggering reloads. A save that
//! leaves the file content unchanged is ignored.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::{parse_config, ConfigError};
use crate::config::schema::ForwardConfig;

/// Sends every new, valid configuration found at `path`.
///
/// A broken edit is logged and skipped; the running pool stays in place.
pub struct ConfigWatcher {
    path: PathBuf,
    updates: mpsc::UnboundedSender<ForwardConfig>,
}

impl ConfigWatcher {
    /// Returns the watcher and the receiving end for validated configurations.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<ForwardConfig>) {
        let (updates, rx) = mpsc::unbounded_channel();
        (
            Self {
                path: path.to_path_buf(),
                updates,
            },
            rx,
        )
    }

    /// Start watching on notify's background thread.
    ///
    /// Events flow only while the returned watcher is alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let file = self.path.clone();
        let updates = self.updates;
        let seen = Mutex::new(fs::read_to_string(&file).ok());

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if touches(&event, &file) => {
                    let mut last = seen.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                    match reload(&file, &mut last) {
                        Ok(Some(config)) => {
                            tracing::info!(path = %file.display(), upstreams = config.upstreams.len(), "Config file changed");
                            let _ = updates.send(config);
                        }
                        Ok(None) => tracing::debug!(path = %file.display(), "Config file unchanged"),
                        Err(e) => {
                            tracing::error!(path = %file.display(), error = %e, "Failed to reload config, keeping current pool")
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "Config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        tracing::info!(path = %self.path.display(), "Config watcher started");
        Ok(watcher)
    }
}

/// Whether `event` may have changed the content of `file`.
fn touches(event: &Event, file: &Path) -> bool {
    matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
        && event.paths.iter().any(|p| p.file_name() == file.file_name())
}

/// Re-read `file`. `Ok(None)` when its content matches `last`.
fn reload(file: &Path, last: &mut Option<String>) -> Result<Option<ForwardConfig>, ConfigError> {
    let content = fs::read_to_string(file)?;
    if last.as_deref() == Some(content.as_str()) {
        return Ok(None);
    }
    let config = parse_config(&content)?;
    *last = Some(content);
    Ok(Some(config))
}
