//! Session start/run under a termination signal.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use spice_creator_core::{
    BuildResult, BundlerEngine, Config, DevServer, HostControl, Session, SessionOptions,
    SpiceError, ThemeOverride,
};

/// Token cancelled on Ctrl+C or SIGTERM. The handlers are in place when
/// this returns, so nothing that touches the host runs without them.
pub fn install_shutdown_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match (
            signal(SignalKind::interrupt()),
            signal(SignalKind::terminate()),
        ) {
            (Ok(mut interrupt), Ok(mut terminate)) => {
                tokio::spawn(async move {
                    tokio::select! {
                        _ = interrupt.recv() => {}
                        _ = terminate.recv() => {}
                    }
                    trigger.cancel();
                });
            }
            (Err(e), _) | (_, Err(e)) => {
                error!(error = %e, "cannot listen for termination signals");
                tokio::spawn(async move {
                    let _ = tokio::signal::ctrl_c().await;
                    trigger.cancel();
                });
            }
        }
    }

    #[cfg(not(unix))]
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        trigger.cancel();
    });

    token
}

/// How [`launch`] ended
pub enum Launch {
    /// Started and ran; the caller owns the session
    Ran(Session, Option<BuildResult>),
    /// Start or run failed. Anything already done in the host is undone.
    Failed(SpiceError),
    /// Termination was requested. Anything already done in the host is undone.
    Interrupted,
}

/// Start and run one session, giving up as soon as `shutdown` fires.
///
/// `carried` is the theme override of the session this one replaces. It is
/// adopted by the new session, or released when the new one never runs.
pub async fn launch(
    config: Config,
    options: SessionOptions,
    engine: &Arc<dyn BundlerEngine>,
    host: &Arc<dyn HostControl>,
    server: &Option<Arc<DevServer>>,
    carried: Option<Arc<ThemeOverride>>,
    shutdown: &CancellationToken,
) -> Launch {
    let started = tokio::select! {
        biased;
        () = shutdown.cancelled() => None,
        started = Session::start(
            config,
            options,
            Arc::clone(engine),
            Arc::clone(host),
            server.clone(),
        ) => Some(started),
    };
    let session = match started {
        Some(Ok(session)) => session,
        Some(Err(e)) => {
            release_theme(carried).await;
            return Launch::Failed(e);
        }
        None => {
            release_theme(carried).await;
            return Launch::Interrupted;
        }
    };
    if let Some(guard) = carried {
        session.adopt_theme(guard).await;
    }

    let outcome = tokio::select! {
        biased;
        () = shutdown.cancelled() => None,
        outcome = session.run() => Some(outcome),
    };
    match outcome {
        Some(Ok(result)) => Launch::Ran(session, result),
        Some(Err(e)) => {
            session.shutdown().await;
            Launch::Failed(e)
        }
        None => {
            session.shutdown().await;
            Launch::Interrupted
        }
    }
}

/// Put back a theme no session is going to own
pub async fn release_theme(carried: Option<Arc<ThemeOverride>>) {
    if let Some(guard) = carried {
        if let Err(e) = guard.release().await {
            warn!(error = %e, "failed to restore previous theme");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use spice_creator_core::host::HostOutput;
    use spice_creator_core::{
        BuildContext, BuildOptions, OutputFile, Plugin, PluginSet, Result, TransformOptions,
        Transformer,
    };
    use tempfile::TempDir;

    #[derive(Default)]
    struct FakeHost {
        calls: Mutex<Vec<Vec<String>>>,
        config_path: PathBuf,
        userdata: PathBuf,
    }

    impl FakeHost {
        fn count(&self, args: &[&str]) -> usize {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|call| call.iter().map(String::as_str).eq(args.iter().copied()))
                .count()
        }
    }

    impl HostControl for FakeHost {
        fn run(&self, args: &[&str]) -> Result<HostOutput> {
            self.calls
                .lock()
                .unwrap()
                .push(args.iter().map(|a| a.to_string()).collect());
            let stdout = match args {
                ["path", "-c"] => self.config_path.display().to_string(),
                ["path", "userdata"] => self.userdata.display().to_string(),
                _ => String::new(),
            };
            Ok(HostOutput {
                stdout,
                ..Default::default()
            })
        }
    }

    /// Registers with the host, then builds forever
    struct StallingEngine;

    struct StallingContext {
        plugins: PluginSet,
    }

    #[async_trait]
    impl BuildContext for StallingContext {
        async fn rebuild(&self) -> Result<BuildResult> {
            self.plugins.start().await?;
            std::future::pending().await
        }

        async fn watch(&self) -> Result<()> {
            self.rebuild().await.map(|_| ())
        }

        async fn serve(&self, _serve_dir: &Path) -> Result<Option<SocketAddr>> {
            Ok(None)
        }

        async fn dispose(&self) -> Result<()> {
            Ok(())
        }
    }

    struct Passthrough;

    #[async_trait]
    impl Transformer for Passthrough {
        async fn transform(&self, source: &str, _options: &TransformOptions) -> Result<String> {
            Ok(source.to_string())
        }
    }

    impl BundlerEngine for StallingEngine {
        fn context(
            &self,
            _options: BuildOptions,
            plugins: Vec<Arc<dyn Plugin>>,
        ) -> Result<Arc<dyn BuildContext>> {
            Ok(Arc::new(StallingContext {
                plugins: PluginSet::new(plugins),
            }))
        }

        fn transformer(&self) -> Arc<dyn Transformer> {
            Arc::new(Passthrough)
        }
    }

    fn theme_project(tmp: &TempDir) -> Config {
        Config::from_toml(
            r#"
                name = "Dark Glass"
                template = "theme"
                entry = { js = "src/app.tsx", css = "src/app.css" }
            "#,
            tmp.path(),
        )
        .unwrap()
    }

    fn host(tmp: &TempDir) -> Arc<FakeHost> {
        let ini = tmp.path().join("config-xpui.ini");
        std::fs::write(&ini, "[Setting]\ncurrent_theme = Sleek\n").unwrap();
        Arc::new(FakeHost {
            config_path: ini,
            userdata: tmp.path().join("userdata"),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn termination_during_build_restores_theme() {
        let tmp = TempDir::new().unwrap();
        let fake = host(&tmp);
        let host: Arc<dyn HostControl> = fake.clone();
        let engine: Arc<dyn BundlerEngine> = Arc::new(StallingEngine);
        let shutdown = CancellationToken::new();

        let watcher = {
            let fake = fake.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                for _ in 0..500 {
                    if fake.count(&["config", "current_theme", "dark-glass"]) == 1 {
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                shutdown.cancel();
            })
        };

        let outcome = launch(
            theme_project(&tmp),
            SessionOptions::build(true, false, true, false),
            &engine,
            &host,
            &None,
            None,
            &shutdown,
        )
        .await;
        watcher.await.unwrap();

        assert!(matches!(outcome, Launch::Interrupted));
        assert_eq!(fake.count(&["config", "current_theme", "dark-glass"]), 1);
        assert_eq!(fake.count(&["config", "current_theme", "Sleek"]), 1);
    }

    #[tokio::test]
    async fn cancelled_launch_releases_carried_theme() {
        let tmp = TempDir::new().unwrap();
        let fake = host(&tmp);
        let host: Arc<dyn HostControl> = fake.clone();
        let engine: Arc<dyn BundlerEngine> = Arc::new(StallingEngine);
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let carried = Arc::new(ThemeOverride::acquire(host.clone(), "Sleek"));
        let outcome = launch(
            theme_project(&tmp),
            SessionOptions::build(true, false, true, false),
            &engine,
            &host,
            &None,
            Some(carried),
            &shutdown,
        )
        .await;

        assert!(matches!(outcome, Launch::Interrupted));
        assert_eq!(fake.count(&["config", "current_theme", "dark-glass"]), 0);
        assert_eq!(fake.count(&["config", "current_theme", "Sleek"]), 1);
    }
}
