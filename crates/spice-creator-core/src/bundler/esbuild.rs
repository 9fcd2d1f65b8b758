//! Engine adapter for the `esbuild` executable.
//!
//! Each rebuild runs esbuild once into a scratch directory and reads the
//! outputs back into memory, so nothing reaches the real output directory
//! without going through the plugins. Resolve/load hooks are realised as
//! generated shim modules passed with `--alias`.

use std::collections::HashSet;
use std::net::{SocketAddr, TcpListener};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use super::{
    BuildContext, BuildMessage, BuildOptions, BuildResult, BundlerEngine, OutputFile, Plugin,
    PluginSet, TransformOptions, Transformer,
};
use crate::error::{Result, SpiceError};

pub const ESBUILD_BIN_ENV: &str = "ESBUILD_BIN";

const DEFAULT_BIN: &str = "esbuild";
const WATCH_DEBOUNCE: Duration = Duration::from_millis(100);
const SERVE_READY_ATTEMPTS: u32 = 50;
const SERVE_READY_INTERVAL: Duration = Duration::from_millis(50);

/// Directory names whose changes never trigger a rebuild
const IGNORED_DIRS: &[&str] = &["node_modules", ".git", ".spicetify", "dist"];

/// esbuild executable wrapper
#[derive(Debug, Clone)]
pub struct Esbuild {
    bin: PathBuf,
}

impl Esbuild {
    pub fn new(bin: PathBuf) -> Self {
        Self { bin }
    }

    /// Find esbuild: `$ESBUILD_BIN`, the project's `node_modules/.bin`, then `PATH`
    pub fn locate(root: &Path) -> Result<Self> {
        if let Ok(bin) = std::env::var(ESBUILD_BIN_ENV) {
            return Ok(Self::new(PathBuf::from(bin)));
        }

        let local = root.join("node_modules").join(".bin").join(DEFAULT_BIN);
        if local.exists() {
            return Ok(Self::new(local));
        }

        which::which(DEFAULT_BIN)
            .map(Self::new)
            .map_err(|e| SpiceError::Bundler {
                message: format!("esbuild executable not found ({})", e),
            })
    }

    pub fn bin(&self) -> &Path {
        &self.bin
    }
}

impl BundlerEngine for Esbuild {
    fn context(
        &self,
        options: BuildOptions,
        plugins: Vec<Arc<dyn Plugin>>,
    ) -> Result<Arc<dyn BuildContext>> {
        let scratch = tempfile::Builder::new().prefix("spice-build-").tempdir()?;
        Ok(Arc::new(EsbuildContext {
            inner: Arc::new(Inner {
                bin: self.bin.clone(),
                options,
                plugins: PluginSet::new(plugins),
                scratch,
                build_lock: Mutex::new(()),
                watch_task: Mutex::new(None),
                delegate: Mutex::new(None),
                cancel: CancellationToken::new(),
            }),
        }))
    }

    fn transformer(&self) -> Arc<dyn Transformer> {
        Arc::new(self.clone())
    }
}

#[async_trait]
impl Transformer for Esbuild {
    async fn transform(&self, source: &str, options: &TransformOptions) -> Result<String> {
        let mut cmd = Command::new(&self.bin);
        cmd.kill_on_drop(true)
            .arg("--loader=jsx")
            .arg("--log-level=error")
            .arg("--color=false");
        if options.minify {
            cmd.arg("--minify");
        }
        if !options.target.is_empty() {
            cmd.arg(format!("--target={}", options.target.join(",")));
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| SpiceError::Bundler {
            message: format!("Failed to spawn esbuild: {}", e),
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(source.as_bytes()).await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(SpiceError::Bundler {
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

struct DelegateServer {
    // Kept so the server dies with the context (`kill_on_drop`).
    _child: Child,
    addr: SocketAddr,
}

struct Inner {
    bin: PathBuf,
    options: BuildOptions,
    plugins: PluginSet,
    scratch: TempDir,
    build_lock: Mutex<()>,
    watch_task: Mutex<Option<JoinHandle<()>>>,
    delegate: Mutex<Option<DelegateServer>>,
    cancel: CancellationToken,
}

pub struct EsbuildContext {
    inner: Arc<Inner>,
}

impl Inner {
    fn out_dir(&self) -> PathBuf {
        self.scratch.path().join("out")
    }

    fn metafile(&self) -> PathBuf {
        self.scratch.path().join("meta.json")
    }

    /// Materialise every claimed specifier as a shim file, returning the
    /// `--alias` arguments and the specifiers handled this way
    async fn write_shims(&self) -> Result<(Vec<String>, HashSet<String>)> {
        let shim_dir = self.scratch.path().join("shims");
        tokio::fs::create_dir_all(&shim_dir).await?;

        let mut args = Vec::new();
        let mut aliased = HashSet::new();
        for specifier in self.plugins.resolve_filters() {
            let Some(loaded) = self.plugins.virtual_module(&specifier) else {
                continue;
            };
            let file_name = format!("{}.js", shim_file_stem(&specifier));
            let shim_path = shim_dir.join(file_name);
            tokio::fs::write(&shim_path, loaded.contents).await?;
            args.push(format!("--alias:{}={}", specifier, shim_path.display()));
            aliased.insert(specifier);
        }
        Ok((args, aliased))
    }

    fn build_command(&self, alias_args: Vec<String>, aliased: &HashSet<String>) -> Command {
        let opts = &self.options;
        let mut cmd = Command::new(&self.bin);
        cmd.current_dir(&opts.root)
            .kill_on_drop(true)
            .args(&opts.entry_points)
            .arg("--bundle")
            .arg("--format=esm")
            .arg("--platform=browser")
            .arg("--tree-shaking=true")
            .arg("--jsx=transform")
            .arg("--log-level=error")
            .arg("--color=false")
            .arg(format!("--outdir={}", self.out_dir().display()))
            .arg(format!("--metafile={}", self.metafile().display()));

        if opts.minify {
            cmd.arg("--minify");
        }
        if !opts.target.is_empty() {
            cmd.arg(format!("--target={}", opts.target.join(",")));
        }
        for external in opts.external.iter().filter(|e| !aliased.contains(*e)) {
            cmd.arg(format!("--external:{}", external));
        }
        for (key, value) in &opts.define {
            cmd.arg(format!("--define:{}={}", key, value));
        }
        cmd.args(alias_args);
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        cmd
    }

    async fn rebuild(&self) -> Result<BuildResult> {
        let _guard = self.build_lock.lock().await;

        self.plugins.start().await?;

        let out_dir = self.out_dir();
        if out_dir.exists() {
            tokio::fs::remove_dir_all(&out_dir).await?;
        }
        tokio::fs::create_dir_all(&out_dir).await?;

        let (alias_args, aliased) = self.write_shims().await?;
        let output = self
            .build_command(alias_args, &aliased)
            .output()
            .await
            .map_err(|e| SpiceError::Bundler {
                message: format!("Failed to spawn esbuild: {}", e),
            })?;

        let result = if output.status.success() {
            BuildResult {
                errors: Vec::new(),
                warnings: Vec::new(),
                output_files: self.collect_outputs()?,
                input_count: self.read_input_count().await,
            }
        } else {
            BuildResult {
                errors: parse_messages(&String::from_utf8_lossy(&output.stderr)),
                ..Default::default()
            }
        };

        self.plugins.end(&result).await?;
        Ok(result)
    }

    /// Read scratch outputs, re-rooted under the configured output directory
    fn collect_outputs(&self) -> Result<Vec<OutputFile>> {
        let out_dir = self.out_dir();
        let mut files = Vec::new();
        for entry in WalkDir::new(&out_dir).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(&out_dir)
                .unwrap_or(entry.path())
                .to_path_buf();
            let contents = std::fs::read(entry.path())?;
            files.push(OutputFile::new(self.options.out_dir.join(relative), contents));
        }
        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(files)
    }

    async fn read_input_count(&self) -> Option<usize> {
        let content = tokio::fs::read_to_string(self.metafile()).await.ok()?;
        let meta: serde_json::Value = serde_json::from_str(&content).ok()?;
        meta.get("inputs")
            .and_then(|inputs| inputs.as_object())
            .map(|inputs| inputs.len())
    }

    fn is_ignored(&self, path: &Path) -> bool {
        if self
            .options
            .watch_ignore
            .iter()
            .any(|ignored| path.starts_with(ignored))
        {
            return true;
        }
        path.strip_prefix(&self.options.root)
            .unwrap_or(path)
            .components()
            .any(|c| IGNORED_DIRS.contains(&c.as_os_str().to_string_lossy().as_ref()))
    }

    async fn watch_loop(
        self: Arc<Self>,
        _watcher: RecommendedWatcher,
        mut raw_rx: mpsc::UnboundedReceiver<notify::Result<Event>>,
    ) {
        loop {
            tokio::select! {
                biased;

                () = self.cancel.cancelled() => {
                    debug!("watch cancelled");
                    return;
                }

                event = raw_rx.recv() => {
                    match event {
                        Some(Ok(ev)) => {
                            if ev.paths.iter().all(|p| self.is_ignored(p)) {
                                continue;
                            }
                        }
                        Some(Err(e)) => {
                            warn!(error = %e, "filesystem watcher error");
                            continue;
                        }
                        None => return,
                    }

                    // Coalesce the burst of events an editor save produces.
                    tokio::time::sleep(WATCH_DEBOUNCE).await;
                    while raw_rx.try_recv().is_ok() {}

                    if let Err(e) = self.rebuild().await {
                        error!(error = %e, "rebuild failed");
                        if e.is_fatal() {
                            return;
                        }
                    }
                }
            }
        }
    }
}

#[async_trait]
impl BuildContext for EsbuildContext {
    async fn rebuild(&self) -> Result<BuildResult> {
        self.inner.rebuild().await
    }

    async fn watch(&self) -> Result<()> {
        let mut task = self.inner.watch_task.lock().await;
        if task.is_some() {
            return Ok(());
        }

        if let Err(e) = self.inner.rebuild().await {
            if e.is_fatal() {
                return Err(e);
            }
            error!(error = %e, "initial build failed");
        }

        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = raw_tx.send(res);
            },
            notify::Config::default(),
        )?;
        watcher.watch(&self.inner.options.root, RecursiveMode::Recursive)?;
        info!(root = %self.inner.options.root.display(), "watching sources");

        let inner = Arc::clone(&self.inner);
        *task = Some(tokio::spawn(inner.watch_loop(watcher, raw_rx)));
        Ok(())
    }

    async fn serve(&self, serve_dir: &Path) -> Result<Option<SocketAddr>> {
        let mut delegate = self.inner.delegate.lock().await;
        if let Some(server) = delegate.as_ref() {
            return Ok(Some(server.addr));
        }

        let addr = free_local_addr()?;
        let child = Command::new(&self.inner.bin)
            .arg(format!("--serve={}", addr))
            .arg(format!("--servedir={}", serve_dir.display()))
            .arg("--log-level=error")
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SpiceError::Bundler {
                message: format!("Failed to start esbuild server: {}", e),
            })?;

        for _ in 0..SERVE_READY_ATTEMPTS {
            if tokio::net::TcpStream::connect(addr).await.is_ok() {
                debug!(%addr, "esbuild server ready");
                *delegate = Some(DelegateServer {
                    _child: child,
                    addr,
                });
                return Ok(Some(addr));
            }
            tokio::time::sleep(SERVE_READY_INTERVAL).await;
        }

        Err(SpiceError::Bundler {
            message: format!("esbuild server did not come up on {}", addr),
        })
    }

    async fn dispose(&self) -> Result<()> {
        self.inner.cancel.cancel();
        if let Some(handle) = self.inner.watch_task.lock().await.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "watch task ended abnormally");
            }
        }
        self.inner.delegate.lock().await.take();
        Ok(())
    }
}

fn free_local_addr() -> Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?)
}

fn shim_file_stem(specifier: &str) -> String {
    specifier
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Pull `[ERROR]` blocks out of esbuild's stderr
fn parse_messages(stderr: &str) -> Vec<BuildMessage> {
    let mut messages = Vec::new();
    let mut lines = stderr.lines().peekable();

    while let Some(line) = lines.next() {
        let Some(idx) = line.find("[ERROR]") else {
            continue;
        };
        let text = line[idx + "[ERROR]".len()..].trim().to_string();

        let mut location = None;
        while let Some(next) = lines.peek() {
            let trimmed = next.trim();
            if trimmed.is_empty() {
                lines.next();
                continue;
            }
            if trimmed.contains(':') && !trimmed.contains("[ERROR]") && location.is_none() {
                location = Some(trimmed.to_string());
                lines.next();
            }
            break;
        }

        messages.push(BuildMessage { text, location });
    }

    if messages.is_empty() && !stderr.trim().is_empty() {
        messages.push(BuildMessage::new(stderr.trim()));
    }
    if messages.is_empty() {
        messages.push(BuildMessage::new("esbuild exited with an error"));
    }
    messages
}
