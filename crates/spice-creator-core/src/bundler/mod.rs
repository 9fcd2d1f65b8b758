//! Bundler engine abstractions.
//!
//! The pipeline never parses source itself. It drives an engine through a
//! [`BuildContext`] and plugs into four hook points: build start, build end,
//! module resolve and module load.
//!
//! ```text
//! BuildContext::rebuild()
//!   → Plugin::on_start          (every plugin, registration order)
//!   → resolve/load hooks        (engine asks plugins for claimed specifiers)
//!   → engine bundles in memory
//!   → Plugin::on_end(result)    (every plugin, registration order)
//! ```

pub mod esbuild;

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::error::Result;

/// Targets used when the project config does not set any
pub const DEFAULT_TARGETS: &[&str] = &["es2022", "chrome120"];

/// One file produced by the engine, not yet written anywhere
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFile {
    pub path: PathBuf,
    pub contents: Vec<u8>,
}

impl OutputFile {
    pub fn new(path: impl Into<PathBuf>, contents: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            contents: contents.into(),
        }
    }

    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.contents)
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    pub fn is_script(&self) -> bool {
        self.path.extension().is_some_and(|ext| ext == "js")
    }

    pub fn is_stylesheet(&self) -> bool {
        self.path.extension().is_some_and(|ext| ext == "css")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildMessage {
    pub text: String,
    pub location: Option<String>,
}

impl BuildMessage {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            location: None,
        }
    }
}

impl std::fmt::Display for BuildMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.location {
            Some(location) => write!(f, "{}: {}", location, self.text),
            None => write!(f, "{}", self.text),
        }
    }
}

/// Everything the engine hands to build-end hooks
#[derive(Debug, Clone, Default)]
pub struct BuildResult {
    pub errors: Vec<BuildMessage>,
    pub warnings: Vec<BuildMessage>,
    pub output_files: Vec<OutputFile>,
    /// Number of input modules, when the engine reports it
    pub input_count: Option<usize>,
}

impl BuildResult {
    pub fn succeeded(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveArgs {
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub path: String,
    pub namespace: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadArgs {
    pub path: String,
    pub namespace: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Loaded {
    pub contents: String,
}

/// Hook points a pipeline stage can implement
#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    /// Module specifiers this plugin wants [`Plugin::on_resolve`] called for
    fn resolve_filter(&self) -> Vec<String> {
        Vec::new()
    }

    async fn on_start(&self) -> Result<()> {
        Ok(())
    }

    async fn on_end(&self, _result: &BuildResult) -> Result<()> {
        Ok(())
    }

    fn on_resolve(&self, _args: &ResolveArgs) -> Option<Resolved> {
        None
    }

    fn on_load(&self, _args: &LoadArgs) -> Option<Loaded> {
        None
    }
}

/// Ordered plugin list with the dispatch rules every engine follows
#[derive(Clone, Default)]
pub struct PluginSet {
    plugins: Vec<Arc<dyn Plugin>>,
}

impl PluginSet {
    pub fn new(plugins: Vec<Arc<dyn Plugin>>) -> Self {
        Self { plugins }
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Run build-start hooks. Fatal errors abort, others are logged.
    pub async fn start(&self) -> Result<()> {
        for plugin in &self.plugins {
            if let Err(e) = plugin.on_start().await {
                if e.is_fatal() {
                    return Err(e);
                }
                warn!(plugin = plugin.name(), error = %e, "build-start hook failed");
            }
        }
        Ok(())
    }

    /// Run build-end hooks in order. Fatal errors abort, others are logged.
    pub async fn end(&self, result: &BuildResult) -> Result<()> {
        for plugin in &self.plugins {
            if let Err(e) = plugin.on_end(result).await {
                if e.is_fatal() {
                    return Err(e);
                }
                warn!(plugin = plugin.name(), error = %e, "build-end hook failed");
            }
        }
        Ok(())
    }

    pub fn resolve_filters(&self) -> Vec<String> {
        let mut specs: Vec<String> = self
            .plugins
            .iter()
            .flat_map(|p| p.resolve_filter())
            .collect();
        specs.sort();
        specs.dedup();
        specs
    }

    /// First plugin answer wins
    pub fn resolve(&self, args: &ResolveArgs) -> Option<Resolved> {
        self.plugins.iter().find_map(|p| p.on_resolve(args))
    }

    pub fn load(&self, args: &LoadArgs) -> Option<Loaded> {
        self.plugins.iter().find_map(|p| p.on_load(args))
    }

    /// Resolve and load a specifier in one go
    pub fn virtual_module(&self, specifier: &str) -> Option<Loaded> {
        let resolved = self.resolve(&ResolveArgs {
            path: specifier.to_string(),
        })?;
        self.load(&LoadArgs {
            path: resolved.path,
            namespace: resolved.namespace,
        })
    }
}

/// Options for one build context
#[derive(Debug, Clone, PartialEq)]
pub struct BuildOptions {
    /// Working directory of the build, also the watch root
    pub root: PathBuf,
    pub entry_points: Vec<PathBuf>,
    pub out_dir: PathBuf,
    pub minify: bool,
    pub external: Vec<String>,
    pub target: Vec<String>,
    pub define: BTreeMap<String, String>,
    /// Paths whose changes never trigger a rebuild
    pub watch_ignore: Vec<PathBuf>,
}

impl BuildOptions {
    pub fn new(root: &Path, entry_points: Vec<PathBuf>, out_dir: PathBuf) -> Self {
        Self {
            root: root.to_path_buf(),
            entry_points,
            out_dir,
            minify: false,
            external: Vec::new(),
            target: DEFAULT_TARGETS.iter().map(|t| t.to_string()).collect(),
            define: BTreeMap::new(),
            watch_ignore: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformOptions {
    pub minify: bool,
    pub target: Vec<String>,
}

/// A live bundler session that can rebuild, watch and serve
#[async_trait]
pub trait BuildContext: Send + Sync {
    async fn rebuild(&self) -> Result<BuildResult>;

    /// Build once, then rebuild on every relevant source change until disposed
    async fn watch(&self) -> Result<()>;

    /// Start (or reuse) the engine's own static server over `serve_dir`.
    /// `None` means the engine has no such server.
    async fn serve(&self, serve_dir: &Path) -> Result<Option<SocketAddr>>;

    /// Stop watching and serving. An in-flight build finishes first.
    async fn dispose(&self) -> Result<()>;
}

/// Single-file source transform
#[async_trait]
pub trait Transformer: Send + Sync {
    async fn transform(&self, source: &str, options: &TransformOptions) -> Result<String>;
}

pub trait BundlerEngine: Send + Sync {
    fn context(
        &self,
        options: BuildOptions,
        plugins: Vec<Arc<dyn Plugin>>,
    ) -> Result<Arc<dyn BuildContext>>;

    fn transformer(&self) -> Arc<dyn Transformer>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SpiceError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        ends: AtomicUsize,
        fail_with: Option<fn() -> SpiceError>,
    }

    #[async_trait]
    impl Plugin for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        async fn on_end(&self, _result: &BuildResult) -> Result<()> {
            self.ends.fetch_add(1, Ordering::SeqCst);
            match self.fail_with {
                Some(make) => Err(make()),
                None => Ok(()),
            }
        }
    }

    struct Aliasing;

    impl Plugin for Aliasing {
        fn name(&self) -> &str {
            "aliasing"
        }

        fn resolve_filter(&self) -> Vec<String> {
            vec!["react".to_string()]
        }

        fn on_resolve(&self, args: &ResolveArgs) -> Option<Resolved> {
            (args.path == "react").then(|| Resolved {
                path: args.path.clone(),
                namespace: "virtual".to_string(),
            })
        }

        fn on_load(&self, args: &LoadArgs) -> Option<Loaded> {
            (args.namespace == "virtual").then(|| Loaded {
                contents: format!("module.exports = G[{:?}]", args.path),
            })
        }
    }

    #[tokio::test]
    async fn recoverable_end_errors_do_not_stop_later_plugins() {
        let failing = Arc::new(Counting {
            ends: AtomicUsize::new(0),
            fail_with: Some(|| SpiceError::Bundler {
                message: "nope".to_string(),
            }),
        });
        let after = Arc::new(Counting {
            ends: AtomicUsize::new(0),
            fail_with: None,
        });
        let set = PluginSet::new(vec![failing.clone(), after.clone()]);

        set.end(&BuildResult::default()).await.unwrap();
        assert_eq!(failing.ends.load(Ordering::SeqCst), 1);
        assert_eq!(after.ends.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fatal_end_errors_abort_the_pass() {
        let failing = Arc::new(Counting {
            ends: AtomicUsize::new(0),
            fail_with: Some(|| SpiceError::TemplateNotFound {
                path: PathBuf::from("wrapper.js"),
            }),
        });
        let after = Arc::new(Counting {
            ends: AtomicUsize::new(0),
            fail_with: None,
        });
        let set = PluginSet::new(vec![failing, after.clone()]);

        assert!(set.end(&BuildResult::default()).await.is_err());
        assert_eq!(after.ends.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn virtual_module_goes_through_resolve_then_load() {
        let set = PluginSet::new(vec![Arc::new(Aliasing)]);
        assert_eq!(set.resolve_filters(), vec!["react"]);
        assert_eq!(
            set.virtual_module("react").unwrap().contents,
            "module.exports = G[\"react\"]"
        );
        assert!(set.virtual_module("lodash").is_none());
    }

    #[test]
    fn output_file_roles() {
        let js = OutputFile::new("/out/app.js", "x");
        let css = OutputFile::new("/out/app.css", "y");
        assert!(js.is_script() && !js.is_stylesheet());
        assert!(css.is_stylesheet() && !css.is_script());
        assert_eq!(css.file_name(), "app.css");
    }
}
