//! Browser-side live-reload helper.
//!
//! During `dev` a small extension is installed into the host. It loads the
//! artifacts from the dev server and listens on the push channel.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::artifact::OutputFileSet;
use crate::assets::substitute;
use crate::error::Result;
use crate::host::{run_host, HostControl};
use crate::server::FILES_PREFIX;

/// Extension file name the helper is installed as
pub const HELPER_FILE: &str = "sc-live-reload-helper.js";

/// Fill the helper template with the dev server's addresses
pub fn render_helper(
    template: &str,
    server_url: &str,
    push_url: &str,
    files: &OutputFileSet,
) -> Result<String> {
    let js_path = format!("{}{}", FILES_PREFIX, files.js);
    let css_path = files.css.as_ref().map(|css| format!("{}{}", FILES_PREFIX, css));

    let markers = [
        ("__SPICE_SERVER_URL__", serde_json::to_string(server_url)?),
        ("__SPICE_HOT_URL__", serde_json::to_string(push_url)?),
        ("__SPICE_JS_PATH__", serde_json::to_string(&js_path)?),
        ("__SPICE_CSS_PATH__", serde_json::to_string(&css_path)?),
    ];
    Ok(substitute(template, &markers))
}

/// Installed helper; removed from the host on [`LiveReloadHelper::uninstall`].
/// Dropping it un-removed falls back to a blocking removal.
pub struct LiveReloadHelper {
    host: Arc<dyn HostControl>,
    path: PathBuf,
    removed: AtomicBool,
}

impl LiveReloadHelper {
    /// Write the helper into the extension directory, register it and apply
    pub async fn install(
        host: Arc<dyn HostControl>,
        extensions_dir: &Path,
        rendered: &str,
    ) -> Result<Self> {
        debug!("preparing live reload helper");
        tokio::fs::create_dir_all(extensions_dir).await?;
        let path = extensions_dir.join(HELPER_FILE);
        tokio::fs::write(&path, rendered).await?;

        let register = run_host(Arc::clone(&host), helper_args(false)).await?;
        register.check(&["config", "extensions", HELPER_FILE])?;
        let applied = run_host(Arc::clone(&host), vec!["apply".to_string()]).await?;
        applied.check(&["apply"])?;

        info!(path = %path.display(), "live reload helper installed");
        Ok(Self {
            host,
            path,
            removed: AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Unregister the helper and apply. Best effort, runs once.
    pub async fn uninstall(&self) {
        if self.removed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("removing live reload helper");
        for args in [helper_args(true), vec!["apply".to_string()]] {
            match run_host(Arc::clone(&self.host), args.clone()).await {
                Ok(output) if output.success() => {}
                Ok(output) => warn!(args = %args.join(" "), stderr = %output.stderr.trim(), "helper cleanup failed"),
                Err(e) => warn!(error = %e, "helper cleanup failed"),
            }
        }
    }
}

impl Drop for LiveReloadHelper {
    fn drop(&mut self) {
        if self.removed.swap(true, Ordering::SeqCst) {
            return;
        }
        warn!("live reload helper dropped without uninstall, removing synchronously");
        for args in [helper_args(true), vec!["apply".to_string()]] {
            let args: Vec<&str> = args.iter().map(String::as_str).collect();
            if let Err(e) = self.host.run(&args) {
                warn!(error = %e, "helper cleanup failed");
            }
        }
    }
}

fn helper_args(remove: bool) -> Vec<String> {
    let name = if remove {
        format!("{}-", HELPER_FILE)
    } else {
        HELPER_FILE.to_string()
    };
    vec!["config".to_string(), "extensions".to_string(), name]
}
