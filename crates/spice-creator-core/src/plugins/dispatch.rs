use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, warn};

use crate::artifact::SharedCache;
use crate::bundler::{BuildResult, Plugin};
use crate::error::Result;

/// Receives the logical names of artifacts that changed in a build
pub trait ChangeNotifier: Send + Sync {
    /// Returns how many receivers were reached
    fn notify_changed(&self, names: &[String]) -> usize;
}

/// Outcome of one dispatch pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub written: usize,
    pub failed: usize,
    pub notified: usize,
}

/// Copies changed artifacts to every destination, then tells listeners
pub struct Dispatch {
    cache: SharedCache,
    destinations: Vec<PathBuf>,
    notifier: Option<Arc<dyn ChangeNotifier>>,
}

impl Dispatch {
    /// `out_dir` is always written; `host_dir` is added when copying is on
    pub fn new(cache: SharedCache, out_dir: PathBuf, host_dir: Option<PathBuf>) -> Self {
        let mut destinations = vec![out_dir];
        destinations.extend(host_dir);
        Self {
            cache,
            destinations,
            notifier: None,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn ChangeNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn destinations(&self) -> &[PathBuf] {
        &self.destinations
    }

    /// Write every changed artifact to every destination concurrently.
    ///
    /// Each write stands alone: a failure is logged and counted, the rest
    /// still run.
    pub async fn dispatch(&self) -> DispatchReport {
        let (records, names) = {
            let cache = self.cache.lock().await;
            if !cache.has_changes() {
                return DispatchReport::default();
            }
            let names: Vec<String> = cache.changed().map(String::from).collect();
            (cache.changed_records(), names)
        };

        let writes = records.iter().flat_map(|record| {
            self.destinations.iter().map(move |dir| {
                let target = dir.join(&record.logical_name);
                let bytes = Arc::clone(&record.bytes);
                async move {
                    let result = write_file(dir, &target, &bytes).await;
                    (target, result)
                }
            })
        });

        let mut report = DispatchReport::default();
        for (target, result) in join_all(writes).await {
            match result {
                Ok(()) => {
                    debug!(path = %target.display(), "wrote artifact");
                    report.written += 1;
                }
                Err(e) => {
                    warn!(path = %target.display(), error = %e, "failed to write artifact");
                    report.failed += 1;
                }
            }
        }

        if let Some(notifier) = &self.notifier {
            report.notified = notifier.notify_changed(&names);
        }
        report
    }
}

async fn write_file(dir: &Path, target: &Path, bytes: &[u8]) -> std::io::Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    tokio::fs::write(target, bytes).await
}

#[async_trait]
impl Plugin for Dispatch {
    fn name(&self) -> &str {
        "dispatch"
    }

    async fn on_end(&self, result: &BuildResult) -> Result<()> {
        if !result.succeeded() {
            return Ok(());
        }
        let report = self.dispatch().await;
        if report.failed > 0 {
            warn!(
                written = report.written,
                failed = report.failed,
                "some artifacts could not be copied"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Notifier that keeps every batch it receives
    #[derive(Default)]
    pub struct RecordingNotifier {
        pub batches: Mutex<Vec<Vec<String>>>,
    }

    impl ChangeNotifier for RecordingNotifier {
        fn notify_changed(&self, names: &[String]) -> usize {
            self.batches.lock().unwrap().push(names.to_vec());
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingNotifier;
    use super::*;
    use crate::artifact::BuildCache;
    use tempfile::TempDir;

    async fn build_pass(cache: &SharedCache, files: &[(&str, &str)]) {
        let mut cache = cache.lock().await;
        cache.begin_build();
        for (name, content) in files {
            cache.record_if_changed(name, content.as_bytes());
        }
    }

    #[tokio::test]
    async fn writes_changed_artifacts_to_every_destination() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("dist");
        let host = tmp.path().join("Themes/dark");
        let cache = BuildCache::shared();
        let notifier = Arc::new(RecordingNotifier::default());
        let dispatch =
            Dispatch::new(cache.clone(), out.clone(), Some(host.clone())).with_notifier(notifier.clone());

        build_pass(&cache, &[("theme.js", "js"), ("user.css", "css")]).await;
        let report = dispatch.dispatch().await;

        assert_eq!(report.written, 4);
        assert_eq!(report.failed, 0);
        for dir in [&out, &host] {
            assert_eq!(std::fs::read_to_string(dir.join("theme.js")).unwrap(), "js");
            assert_eq!(std::fs::read_to_string(dir.join("user.css")).unwrap(), "css");
        }
        assert_eq!(
            *notifier.batches.lock().unwrap(),
            vec![vec!["theme.js".to_string(), "user.css".to_string()]]
        );
    }

    #[tokio::test]
    async fn identical_second_pass_writes_and_notifies_nothing() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("dist");
        let cache = BuildCache::shared();
        let notifier = Arc::new(RecordingNotifier::default());
        let dispatch = Dispatch::new(cache.clone(), out.clone(), None).with_notifier(notifier.clone());

        build_pass(&cache, &[("my-app.js", "same")]).await;
        assert_eq!(dispatch.dispatch().await.written, 1);

        std::fs::remove_file(out.join("my-app.js")).unwrap();
        build_pass(&cache, &[("my-app.js", "same")]).await;
        let report = dispatch.dispatch().await;

        assert_eq!(report, DispatchReport::default());
        assert!(!out.join("my-app.js").exists());
        assert_eq!(notifier.batches.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn only_changed_paths_are_sent() {
        let tmp = TempDir::new().unwrap();
        let cache = BuildCache::shared();
        let notifier = Arc::new(RecordingNotifier::default());
        let dispatch = Dispatch::new(cache.clone(), tmp.path().to_path_buf(), None)
            .with_notifier(notifier.clone());

        build_pass(&cache, &[("theme.js", "js"), ("user.css", "a")]).await;
        dispatch.dispatch().await;
        build_pass(&cache, &[("theme.js", "js"), ("user.css", "b")]).await;
        dispatch.dispatch().await;

        let batches = notifier.batches.lock().unwrap();
        assert_eq!(batches[1], vec!["user.css".to_string()]);
    }

    #[tokio::test]
    async fn failing_destination_does_not_block_others() {
        let tmp = TempDir::new().unwrap();
        let blocked = tmp.path().join("blocked");
        std::fs::write(&blocked, "not a directory").unwrap();
        let out = tmp.path().join("dist");

        let cache = BuildCache::shared();
        let dispatch = Dispatch::new(cache.clone(), out.clone(), Some(blocked));

        build_pass(&cache, &[("my-app.js", "x")]).await;
        let report = dispatch.dispatch().await;

        assert_eq!(report.written, 1);
        assert_eq!(report.failed, 1);
        assert!(out.join("my-app.js").exists());
    }
}
