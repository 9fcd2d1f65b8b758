//! Project config watcher.
//!
//! ```text
//! filesystem events (notify, project root, non-recursive)
//!   → keep spice.toml / package.json
//!   → debounce
//!   → fingerprint both files
//!   → emit ConfigEvent::Changed when the fingerprint moved
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::{CONFIG_FILE, PACKAGE_JSON};
use crate::error::Result;
use crate::hash::compute_hash;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);

/// Files whose changes reload the session
pub const WATCHED_FILES: &[&str] = &[CONFIG_FILE, PACKAGE_JSON];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigEvent {
    Changed,
    Error(String),
}

pub fn is_config_path(path: &Path) -> bool {
    path.file_name()
        .map(|name| WATCHED_FILES.iter().any(|w| name == *w))
        .unwrap_or(false)
}

/// Hash over the watched files' contents; missing files hash as empty
pub fn fingerprint(root: &Path) -> String {
    let mut combined = Vec::new();
    for name in WATCHED_FILES {
        combined.extend_from_slice(name.as_bytes());
        combined.push(0);
        if let Ok(bytes) = std::fs::read(root.join(name)) {
            combined.extend_from_slice(&bytes);
        }
        combined.push(0);
    }
    compute_hash(&combined)
}

pub struct ConfigWatcher {
    root: PathBuf,
    debounce: Duration,
    last_fingerprint: String,
    watcher: RecommendedWatcher,
    raw_rx: mpsc::UnboundedReceiver<notify::Result<Event>>,
    event_tx: mpsc::Sender<ConfigEvent>,
}

impl ConfigWatcher {
    /// Create the watcher. Call [`run`](Self::run) to start it.
    pub fn new(root: &Path, debounce: Duration) -> Result<(Self, mpsc::Receiver<ConfigEvent>)> {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(16);

        let watcher = RecommendedWatcher::new(
            move |res| {
                let _ = raw_tx.send(res);
            },
            notify::Config::default(),
        )?;

        Ok((
            Self {
                root: root.to_path_buf(),
                debounce,
                last_fingerprint: fingerprint(root),
                watcher,
                raw_rx,
                event_tx,
            },
            event_rx,
        ))
    }

    /// Process events until the receiver is dropped
    pub async fn run(mut self) {
        if let Err(e) = self.watcher.watch(&self.root, RecursiveMode::NonRecursive) {
            warn!(path = %self.root.display(), error = %e, "failed to watch project root");
            let _ = self.event_tx.send(ConfigEvent::Error(e.to_string())).await;
            return;
        }
        info!(path = %self.root.display(), "watching project config");

        let mut deadline: Option<tokio::time::Instant> = None;

        loop {
            tokio::select! {
                biased;

                () = async {
                    match deadline {
                        Some(at) => tokio::time::sleep_until(at).await,
                        None => std::future::pending::<()>().await,
                    }
                } => {
                    deadline = None;
                    let current = fingerprint(&self.root);
                    if current == self.last_fingerprint {
                        debug!("config touched without content change");
                        continue;
                    }
                    self.last_fingerprint = current;
                    if self.event_tx.send(ConfigEvent::Changed).await.is_err() {
                        return;
                    }
                }

                event = self.raw_rx.recv() => match event {
                    Some(Ok(ev)) => {
                        if relevant(&ev) {
                            deadline = Some(tokio::time::Instant::now() + self.debounce);
                        }
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "config watcher error");
                        if self.event_tx.send(ConfigEvent::Error(e.to_string())).await.is_err() {
                            return;
                        }
                    }
                    None => return,
                }
            }
        }
    }
}

fn relevant(event: &Event) -> bool {
    !matches!(event.kind, EventKind::Access(_)) && event.paths.iter().any(|p| is_config_path(p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn only_config_files_are_relevant() {
        assert!(is_config_path(Path::new("/p/spice.toml")));
        assert!(is_config_path(Path::new("/p/package.json")));
        assert!(!is_config_path(Path::new("/p/src/app.tsx")));

        let event = Event::new(EventKind::Modify(notify::event::ModifyKind::Any))
            .add_path(PathBuf::from("/p/spice.toml"));
        assert!(relevant(&event));

        let access = Event::new(EventKind::Access(notify::event::AccessKind::Any))
            .add_path(PathBuf::from("/p/spice.toml"));
        assert!(!relevant(&access));
    }

    #[test]
    fn fingerprint_tracks_content() {
        let tmp = TempDir::new().unwrap();
        let empty = fingerprint(tmp.path());

        std::fs::write(tmp.path().join(CONFIG_FILE), "name = \"a\"").unwrap();
        let first = fingerprint(tmp.path());
        assert_ne!(empty, first);

        std::fs::write(tmp.path().join(CONFIG_FILE), "name = \"a\"").unwrap();
        assert_eq!(first, fingerprint(tmp.path()));

        std::fs::write(tmp.path().join(PACKAGE_JSON), "{}").unwrap();
        assert_ne!(first, fingerprint(tmp.path()));
    }

    #[tokio::test]
    async fn emits_change_after_edit() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join(CONFIG_FILE), "name = \"a\"").unwrap();

        let (watcher, mut events) =
            ConfigWatcher::new(tmp.path(), Duration::from_millis(50)).unwrap();
        let task = tokio::spawn(watcher.run());
        tokio::time::sleep(Duration::from_millis(200)).await;

        std::fs::write(tmp.path().join(CONFIG_FILE), "name = \"b\"").unwrap();
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap();
        assert_eq!(event, Some(ConfigEvent::Changed));

        drop(events);
        task.abort();
    }
}
