//! One build session: the pipeline, its context and everything it holds
//! on to in the host.
//!
//! A session is created per configuration. Reloading the configuration
//! means [`Session::shutdown`] on the old one, awaited, then
//! [`Session::start`] with the new one.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::artifact::{BuildCache, SharedCache};
use crate::assets::{assets_dir, load_template, LIVE_RELOAD_TEMPLATE, WRAPPER_TEMPLATE};
use crate::bundler::{BuildContext, BuildOptions, BuildResult, BundlerEngine, Plugin};
use crate::config::{Config, TemplateKind};
use crate::error::Result;
use crate::host::{
    ApplyOptions, HostConfigSnapshot, HostControl, HostCoordinator, HostTarget, ThemeOverride,
};
use crate::live_reload::{render_helper, LiveReloadHelper};
use crate::plugins::{
    Dispatch, ExternalGlobal, HostApply, LoaderWrap, LoaderWrapOptions, Reporter,
};
use crate::server::{DevServer, LandingPage};

/// Build directory used by `dev`, relative to the project root
pub const DEV_OUT_DIR: &str = ".spicetify/build";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildMode {
    /// Single build, then exit
    Once,
    /// Rebuild on source changes
    Watch,
    /// Watch, serve and live-reload
    Dev,
}

impl BuildMode {
    pub fn is_watching(&self) -> bool {
        !matches!(self, BuildMode::Once)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    pub mode: BuildMode,
    pub minify: bool,
    /// Mirror artifacts into the host's extension/theme directory
    pub copy: bool,
    pub apply: ApplyOptions,
}

impl SessionOptions {
    /// `build` command defaults. Watch mode never minifies.
    pub fn build(watch: bool, minify: bool, apply: bool, copy: bool) -> Self {
        Self {
            mode: if watch { BuildMode::Watch } else { BuildMode::Once },
            minify: minify && !watch,
            copy,
            apply: ApplyOptions {
                apply,
                apply_once: false,
                remove: false,
            },
        }
    }

    /// `dev` command defaults
    pub fn dev() -> Self {
        Self {
            mode: BuildMode::Dev,
            minify: false,
            copy: true,
            apply: ApplyOptions {
                apply: true,
                apply_once: true,
                remove: true,
            },
        }
    }

    fn wants_host(&self) -> bool {
        self.copy || self.apply.apply || self.mode == BuildMode::Dev
    }
}

pub struct Session {
    config: Config,
    options: SessionOptions,
    out_dir: PathBuf,
    cache: SharedCache,
    context: Arc<dyn BuildContext>,
    coordinator: Arc<HostCoordinator>,
    server: Option<Arc<DevServer>>,
    helper: Option<LiveReloadHelper>,
    closed: AtomicBool,
}

impl Session {
    /// Assemble the pipeline and the build context.
    ///
    /// A missing wrapper template is fatal. An unreachable host only
    /// disables copying into host directories.
    pub async fn start(
        config: Config,
        options: SessionOptions,
        engine: Arc<dyn BundlerEngine>,
        host: Arc<dyn HostControl>,
        server: Option<Arc<DevServer>>,
    ) -> Result<Self> {
        let assets = assets_dir();
        let wrapper_template = load_template(&assets, WRAPPER_TEMPLATE)?;
        let helper_template = match options.mode {
            BuildMode::Dev => Some(load_template(&assets, LIVE_RELOAD_TEMPLATE)?),
            _ => None,
        };

        let snapshot = if options.wants_host() {
            read_snapshot(Arc::clone(&host)).await
        } else {
            None
        };

        let out_dir = match options.mode {
            BuildMode::Dev => config.root.join(DEV_OUT_DIR),
            _ => config.out_dir.clone(),
        };
        let minify = config.bundler.minify.unwrap_or(options.minify);
        let output_files = match options.mode {
            BuildMode::Dev => config.output_files().with_served_stylesheet(),
            _ => config.output_files(),
        };
        let cache = BuildCache::shared();

        let mut build_options =
            BuildOptions::new(&config.root, config.template.entry_points(), out_dir.clone());
        build_options.minify = minify;
        build_options.external = config.bundler.external.clone();
        if !config.bundler.target.is_empty() {
            build_options.target = config.bundler.target.clone();
        }
        build_options.define = config.bundler.define.clone();
        build_options.watch_ignore = vec![out_dir.clone(), config.root.join(".spicetify")];

        let transformer = engine.transformer();
        let loader = LoaderWrap::new(
            LoaderWrapOptions {
                name: config.name.clone(),
                version: config.version.clone(),
                kind: config.template_kind(),
                output_files: output_files.clone(),
                minify,
                target: build_options.target.clone(),
                dev: options.mode == BuildMode::Dev,
            },
            &wrapper_template,
            transformer.as_ref(),
            Arc::clone(&cache),
        )
        .await?;

        let host_dir = match (&snapshot, options.copy) {
            (Some(snapshot), true) => Some(host_dir(&config, snapshot)),
            _ => None,
        };
        let mut dispatch = Dispatch::new(Arc::clone(&cache), out_dir.clone(), host_dir);
        if let Some(server) = &server {
            dispatch = dispatch.with_notifier(Arc::new(server.clients()));
        }

        let coordinator = Arc::new(HostCoordinator::new(
            Arc::clone(&host),
            HostTarget::from_config(&config),
            options.apply,
            snapshot.as_ref(),
        ));

        let plugins: Vec<Arc<dyn Plugin>> = vec![
            Arc::new(ExternalGlobal::host_defaults()),
            Arc::new(loader),
            Arc::new(dispatch),
            Arc::new(HostApply::new(Arc::clone(&coordinator), Arc::clone(&cache))),
            Arc::new(Reporter::new(Arc::clone(&cache), &config.root, &out_dir)),
        ];
        debug!(plugins = plugins.len(), out_dir = %out_dir.display(), "pipeline assembled");

        let context = engine.context(build_options, plugins)?;

        let mut helper = None;
        if let (Some(server), Some(template)) = (&server, helper_template) {
            server
                .set_landing(LandingPage::new(
                    &config.name,
                    &config.version,
                    config.template_kind(),
                    output_files.clone(),
                ))
                .await;
            server.set_context(Arc::clone(&context)).await;

            match &snapshot {
                Some(snapshot) => {
                    let rendered =
                        render_helper(&template, &server.url(), &server.push_url(), &output_files)?;
                    match LiveReloadHelper::install(
                        Arc::clone(&host),
                        &snapshot.extensions_dir(),
                        &rendered,
                    )
                    .await
                    {
                        Ok(installed) => helper = Some(installed),
                        Err(e) => warn!(error = %e, "live reload helper not installed"),
                    }
                }
                None => warn!("host unavailable, live reload helper not installed"),
            }
        }

        info!(
            project = %config.name,
            version = %config.version,
            kind = %config.template_kind(),
            mode = ?options.mode,
            "session started"
        );

        Ok(Self {
            config,
            options,
            out_dir,
            cache,
            context,
            coordinator,
            server,
            helper,
            closed: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn out_dir(&self) -> &std::path::Path {
        &self.out_dir
    }

    pub fn cache(&self) -> SharedCache {
        Arc::clone(&self.cache)
    }

    pub fn coordinator(&self) -> &HostCoordinator {
        &self.coordinator
    }

    pub fn has_live_reload(&self) -> bool {
        self.helper.is_some()
    }

    /// Run the session's build. A one-shot build returns its result and
    /// keeps whatever it applied in the host; watching modes return `None`
    /// once the watcher is running.
    pub async fn run(&self) -> Result<Option<BuildResult>> {
        match self.options.mode {
            BuildMode::Once => {
                let result = self.context.rebuild().await?;
                self.coordinator.commit();
                Ok(Some(result))
            }
            BuildMode::Watch | BuildMode::Dev => {
                self.context.watch().await?;
                Ok(None)
            }
        }
    }

    /// Tear down in order: stop building, detach from the server, remove
    /// the helper, restore the host. Runs once; errors are logged.
    pub async fn shutdown(&self) {
        self.close(false).await;
    }

    /// [`Session::shutdown`] for a configuration reload: the active theme
    /// stays in place and its override is handed back for the next session
    /// to [`Session::adopt_theme`].
    pub async fn shutdown_for_reload(&self) -> Option<Arc<ThemeOverride>> {
        self.close(true).await
    }

    /// Take over the theme override of the session this one replaces
    pub async fn adopt_theme(&self, guard: Arc<ThemeOverride>) {
        self.coordinator.adopt(guard).await;
    }

    async fn close(&self, hand_over: bool) -> Option<Arc<ThemeOverride>> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return None;
        }
        debug!(project = %self.config.name, "shutting down session");

        if let Err(e) = self.context.dispose().await {
            warn!(error = %e, "failed to dispose build context");
        }
        if let Some(server) = &self.server {
            server.clear_context().await;
        }
        if let Some(helper) = &self.helper {
            helper.uninstall().await;
        }
        if hand_over {
            return self.coordinator.hand_over();
        }
        if self.coordinator.rollback().await {
            info!("previous theme restored");
        }
        None
    }
}

/// Where copied artifacts go in the host's data directory
fn host_dir(config: &Config, snapshot: &HostConfigSnapshot) -> PathBuf {
    match config.template_kind() {
        TemplateKind::Extension => snapshot.extensions_dir(),
        TemplateKind::Theme => snapshot.theme_dir(&config.host_identifier()),
    }
}

async fn read_snapshot(host: Arc<dyn HostControl>) -> Option<HostConfigSnapshot> {
    match tokio::task::spawn_blocking(move || host.snapshot()).await {
        Ok(Ok(snapshot)) => Some(snapshot),
        Ok(Err(e)) => {
            warn!(error = %e, "cannot read host config, host directories disabled");
            None
        }
        Err(e) => {
            warn!(error = %e, "host config task failed");
            None
        }
    }
}
