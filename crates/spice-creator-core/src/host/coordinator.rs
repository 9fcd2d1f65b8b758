use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, error, info, warn};

use super::{run_host, run_host_holding, HostConfigSnapshot, HostControl, HostOutput};
use crate::config::{Config, TemplateKind};
use crate::error::{Result, SpiceError};

/// Apply state of one build session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostState {
    Idle,
    Applying,
    Applied,
    RolledBack,
}

/// What the host knows this project as
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostTarget {
    pub identifier: String,
    pub kind: TemplateKind,
}

impl HostTarget {
    pub fn from_config(config: &Config) -> Self {
        Self {
            identifier: config.host_identifier(),
            kind: config.template_kind(),
        }
    }

    /// Identifier with the host's removal suffix when `remove` is set
    pub fn config_value(&self, remove: bool) -> String {
        if remove {
            format!("{}-", self.identifier)
        } else {
            self.identifier.clone()
        }
    }

    fn config_key(&self) -> &'static str {
        match self.kind {
            TemplateKind::Extension => "extensions",
            TemplateKind::Theme => "current_theme",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyOptions {
    /// Register the project and run the host's apply action
    pub apply: bool,
    /// Apply at most once per session
    pub apply_once: bool,
    /// Register with the removal suffix instead
    pub remove: bool,
}

/// Scoped ownership of the host's active theme.
///
/// Holds the theme that was active before this session changed it and puts
/// it back on [`ThemeOverride::release`]. A guard dropped unreleased
/// restores synchronously as a last resort.
pub struct ThemeOverride {
    host: Arc<dyn HostControl>,
    previous: String,
    released: AtomicBool,
}

impl ThemeOverride {
    pub fn acquire(host: Arc<dyn HostControl>, previous: impl Into<String>) -> Self {
        Self {
            host,
            previous: previous.into(),
            released: AtomicBool::new(false),
        }
    }

    pub fn previous(&self) -> &str {
        &self.previous
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Give up the restore: the new theme stays active after the guard goes
    pub fn disarm(&self) {
        self.released.store(true, Ordering::SeqCst);
    }

    fn restore_args(&self) -> [&str; 3] {
        ["config", "current_theme", self.previous.as_str()]
    }

    /// Restore the previous theme. Only the first call reaches the host.
    pub async fn release(&self) -> Result<()> {
        if self.released.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        info!(theme = %self.previous, "restoring previous theme");
        let args = self.restore_args();
        let owned = args.iter().map(|a| a.to_string()).collect();
        run_host(Arc::clone(&self.host), owned).await?.check(&args)?;
        Ok(())
    }
}

impl Drop for ThemeOverride {
    fn drop(&mut self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        warn!(theme = %self.previous, "theme override dropped without release, restoring synchronously");
        let args = self.restore_args();
        if let Err(e) = self.host.run(&args).and_then(|output| output.check(&args)) {
            warn!(error = %e, "failed to restore previous theme");
        }
    }
}

struct CoordinatorState {
    state: HostState,
    applied_once: bool,
    theme_override: Option<Arc<ThemeOverride>>,
}

/// Registers the build with the host and applies it after builds that
/// changed something
pub struct HostCoordinator {
    host: Arc<dyn HostControl>,
    target: HostTarget,
    options: ApplyOptions,
    previous_theme: Option<String>,
    inner: Mutex<CoordinatorState>,
    /// Held for the whole lifetime of each host command
    serial: Arc<tokio::sync::Mutex<()>>,
}

impl HostCoordinator {
    pub fn new(
        host: Arc<dyn HostControl>,
        target: HostTarget,
        options: ApplyOptions,
        snapshot: Option<&HostConfigSnapshot>,
    ) -> Self {
        let previous_theme = snapshot
            .filter(|_| target.kind == TemplateKind::Theme)
            .map(|s| s.current_theme.clone());

        Self {
            host,
            target,
            options,
            previous_theme,
            inner: Mutex::new(CoordinatorState {
                state: HostState::Idle,
                applied_once: false,
                theme_override: None,
            }),
            serial: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Run a host command after every earlier one has exited. The slot stays
    /// taken until the command exits, even if this future is dropped.
    async fn run_serial(&self, args: Vec<String>) -> Result<HostOutput> {
        let slot = Arc::clone(&self.serial).lock_owned().await;
        run_host_holding(Arc::clone(&self.host), args, slot).await
    }

    fn lock(&self) -> MutexGuard<'_, CoordinatorState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> HostState {
        self.lock().state
    }

    pub fn options(&self) -> ApplyOptions {
        self.options
    }

    pub fn target(&self) -> &HostTarget {
        &self.target
    }

    /// Whether this session currently owns the active theme
    pub fn overrides_theme(&self) -> bool {
        self.lock().theme_override.is_some()
    }

    /// Build-start step: point the host config at this project.
    ///
    /// Theme ownership is taken before the host is touched, so an
    /// interrupted registration is still rolled back.
    pub async fn register(&self) {
        if !self.options.apply {
            return;
        }

        let args = vec![
            "config".to_string(),
            self.target.config_key().to_string(),
            self.target.config_value(self.options.remove),
        ];
        let acquired = self.take_theme_ownership();

        match self.run_serial(args.clone()).await {
            Ok(output) if output.success() => {
                debug!(args = %args.join(" "), "registered with host");
            }
            Ok(output) => {
                warn!(args = %args.join(" "), stderr = %output.stderr.trim(), "host config update failed");
                self.drop_theme_ownership(acquired);
            }
            Err(e) => {
                warn!(error = %e, "host config update failed");
                self.drop_theme_ownership(acquired);
            }
        }
    }

    /// Returns whether a new override was taken
    fn take_theme_ownership(&self) -> bool {
        if !self.owns_theme() {
            return false;
        }
        let Some(previous) = self.previous_theme.as_ref() else {
            return false;
        };

        let mut inner = self.lock();
        if inner.theme_override.is_some() {
            return false;
        }
        inner.theme_override = Some(Arc::new(ThemeOverride::acquire(
            Arc::clone(&self.host),
            previous.clone(),
        )));
        true
    }

    /// The host never switched themes: forget the override without restoring
    fn drop_theme_ownership(&self, acquired: bool) {
        if !acquired {
            return;
        }
        if let Some(guard) = self.lock().theme_override.take() {
            guard.disarm();
        }
    }

    fn owns_theme(&self) -> bool {
        self.options.apply && !self.options.remove && self.target.kind == TemplateKind::Theme
    }

    /// Build-end step: run the host's apply action when allowed.
    ///
    /// Returns whether apply ran and succeeded. Failures are logged and
    /// leave the state short of `Applied` so the next build retries.
    pub async fn apply_changes(&self, changed: bool) -> bool {
        if !self.options.apply || !changed {
            return false;
        }

        {
            let mut inner = self.lock();
            if self.options.apply_once && inner.applied_once {
                return false;
            }
            inner.state = HostState::Applying;
        }

        let result = self.run_serial(vec!["apply".to_string()]).await;

        let mut inner = self.lock();
        match result {
            Ok(output) if output.success() => {
                inner.state = HostState::Applied;
                inner.applied_once = true;
                true
            }
            Ok(output) => {
                inner.state = HostState::Idle;
                let err = SpiceError::HostCommand {
                    args: "apply".to_string(),
                    status: output.status,
                    stderr: output.stderr.trim().to_string(),
                };
                error!(error = %err, "spicetify apply failed");
                false
            }
            Err(e) => {
                inner.state = HostState::Idle;
                error!(error = %e, "spicetify apply failed");
                false
            }
        }
    }

    /// Keep the current host state past the end of the session
    pub fn commit(&self) {
        if let Some(guard) = self.lock().theme_override.take() {
            debug!(theme = %guard.previous(), "keeping applied theme");
            guard.disarm();
        }
    }

    /// Hand the theme override to the session that replaces this one,
    /// leaving the host as it is
    pub fn hand_over(&self) -> Option<Arc<ThemeOverride>> {
        self.lock().theme_override.take()
    }

    /// Take over an override handed on by a previous session. The previous
    /// theme is restored right away if this session does not own the theme.
    pub async fn adopt(&self, guard: Arc<ThemeOverride>) {
        let rejected = if self.owns_theme() {
            let mut inner = self.lock();
            if inner.theme_override.is_none() {
                debug!(theme = %guard.previous(), "adopted theme override");
                inner.theme_override = Some(guard);
                None
            } else {
                Some(guard)
            }
        } else {
            Some(guard)
        };

        if let Some(guard) = rejected {
            let _slot = self.serial.lock().await;
            if let Err(e) = guard.release().await {
                warn!(error = %e, "failed to restore previous theme");
            }
        }
    }

    /// Put back the theme this session replaced, if any.
    ///
    /// Waits for host commands still in flight. Best effort: failures are
    /// logged and reported as `false`.
    pub async fn rollback(&self) -> bool {
        let guard = self.lock().theme_override.take();
        let Some(guard) = guard else {
            return false;
        };

        let _slot = self.serial.lock().await;
        match guard.release().await {
            Ok(()) => {
                self.lock().state = HostState::RolledBack;
                true
            }
            Err(e) => {
                warn!(error = %e, "failed to restore previous theme");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::testing::RecordingHost;
    use std::path::PathBuf;

    fn theme_snapshot(current: &str) -> HostConfigSnapshot {
        HostConfigSnapshot {
            current_theme: current.to_string(),
            userdata: PathBuf::from("/data"),
            ..Default::default()
        }
    }

    fn extension_target() -> HostTarget {
        HostTarget {
            identifier: "my-app.js".to_string(),
            kind: TemplateKind::Extension,
        }
    }

    fn theme_target() -> HostTarget {
        HostTarget {
            identifier: "dark-glass".to_string(),
            kind: TemplateKind::Theme,
        }
    }

    #[tokio::test]
    async fn test_register_extension() {
        let host = Arc::new(RecordingHost::default());
        let options = ApplyOptions {
            apply: true,
            ..Default::default()
        };
        let coordinator = HostCoordinator::new(host.clone(), extension_target(), options, None);

        coordinator.register().await;
        assert_eq!(host.count(&["config", "extensions", "my-app.js"]), 1);
        assert!(!coordinator.overrides_theme());
    }

    #[tokio::test]
    async fn test_register_with_remove_suffix() {
        let host = Arc::new(RecordingHost::default());
        let options = ApplyOptions {
            apply: true,
            apply_once: true,
            remove: true,
        };
        let coordinator = HostCoordinator::new(
            host.clone(),
            theme_target(),
            options,
            Some(&theme_snapshot("Sleek")),
        );

        coordinator.register().await;
        assert_eq!(host.count(&["config", "current_theme", "dark-glass-"]), 1);
        assert!(!coordinator.overrides_theme());
    }

    #[tokio::test]
    async fn test_no_host_calls_without_apply() {
        let host = Arc::new(RecordingHost::default());
        let coordinator =
            HostCoordinator::new(host.clone(), extension_target(), ApplyOptions::default(), None);

        coordinator.register().await;
        assert!(!coordinator.apply_changes(true).await);
        assert!(host.calls().is_empty());
        assert_eq!(coordinator.state(), HostState::Idle);
    }

    #[tokio::test]
    async fn test_apply_once_applies_at_most_once() {
        let host = Arc::new(RecordingHost::default());
        let options = ApplyOptions {
            apply: true,
            apply_once: true,
            remove: false,
        };
        let coordinator = HostCoordinator::new(host.clone(), extension_target(), options, None);

        assert!(coordinator.apply_changes(true).await);
        assert!(!coordinator.apply_changes(true).await);
        assert_eq!(host.count(&["apply"]), 1);
        assert_eq!(coordinator.state(), HostState::Applied);
    }

    #[tokio::test]
    async fn test_unchanged_build_does_not_apply() {
        let host = Arc::new(RecordingHost::default());
        let options = ApplyOptions {
            apply: true,
            ..Default::default()
        };
        let coordinator = HostCoordinator::new(host.clone(), extension_target(), options, None);

        assert!(!coordinator.apply_changes(false).await);
        assert_eq!(host.count(&["apply"]), 0);
    }

    #[tokio::test]
    async fn test_failed_apply_is_retried_on_next_build() {
        let host = Arc::new(RecordingHost::default());
        host.apply_statuses.lock().unwrap().push_back(1);
        let options = ApplyOptions {
            apply: true,
            apply_once: true,
            remove: false,
        };
        let coordinator = HostCoordinator::new(host.clone(), extension_target(), options, None);

        assert!(!coordinator.apply_changes(true).await);
        assert_ne!(coordinator.state(), HostState::Applied);

        assert!(coordinator.apply_changes(true).await);
        assert_eq!(coordinator.state(), HostState::Applied);
        assert_eq!(host.count(&["apply"]), 2);
    }

    #[tokio::test]
    async fn test_theme_rollback_restores_previous_theme() {
        let host = Arc::new(RecordingHost::default());
        let options = ApplyOptions {
            apply: true,
            ..Default::default()
        };
        let coordinator = HostCoordinator::new(
            host.clone(),
            theme_target(),
            options,
            Some(&theme_snapshot("Sleek")),
        );

        coordinator.register().await;
        assert!(coordinator.overrides_theme());

        assert!(coordinator.rollback().await);
        assert_eq!(coordinator.state(), HostState::RolledBack);
        assert_eq!(host.count(&["config", "current_theme", "Sleek"]), 1);

        assert!(!coordinator.rollback().await);
        assert_eq!(host.count(&["config", "current_theme", "Sleek"]), 1);
    }

    #[tokio::test]
    async fn committed_theme_is_not_restored() {
        let host = Arc::new(RecordingHost::default());
        let options = ApplyOptions {
            apply: true,
            ..Default::default()
        };
        let coordinator = HostCoordinator::new(
            host.clone(),
            theme_target(),
            options,
            Some(&theme_snapshot("Sleek")),
        );

        coordinator.register().await;
        coordinator.commit();
        assert!(!coordinator.overrides_theme());
        assert!(!coordinator.rollback().await);
        drop(coordinator);
        assert_eq!(host.count(&["config", "current_theme", "Sleek"]), 0);
    }

    #[tokio::test]
    async fn test_theme_override_releases_once() {
        let host = Arc::new(RecordingHost::default());
        let guard = ThemeOverride::acquire(host.clone(), "Sleek");
        assert_eq!(guard.previous(), "Sleek");

        guard.release().await.unwrap();
        guard.release().await.unwrap();
        assert!(guard.is_released());
        drop(guard);
        assert_eq!(host.count(&["config", "current_theme", "Sleek"]), 1);
    }

    #[test]
    fn unreleased_override_restores_on_drop() {
        let host = Arc::new(RecordingHost::default());
        {
            let _guard = ThemeOverride::acquire(host.clone(), "Other");
        }
        assert_eq!(host.count(&["config", "current_theme", "Other"]), 1);

        let disarmed = ThemeOverride::acquire(host.clone(), "Kept");
        disarmed.disarm();
        drop(disarmed);
        assert_eq!(host.count(&["config", "current_theme", "Kept"]), 0);
    }

    /// Holds `config current_theme dark-glass` until the gate opens
    struct GatedHost {
        inner: RecordingHost,
        gate: Mutex<std::sync::mpsc::Receiver<()>>,
    }

    impl HostControl for GatedHost {
        fn run(&self, args: &[&str]) -> Result<HostOutput> {
            if args == ["config", "current_theme", "dark-glass"] {
                let _ = self.gate.lock().unwrap().recv();
            }
            self.inner.run(args)
        }
    }

    #[tokio::test]
    async fn interrupted_registration_is_rolled_back_after_it_lands() {
        let (open, gate) = std::sync::mpsc::channel();
        let host = Arc::new(GatedHost {
            inner: RecordingHost::default(),
            gate: Mutex::new(gate),
        });
        let options = ApplyOptions {
            apply: true,
            ..Default::default()
        };
        let coordinator = HostCoordinator::new(
            host.clone(),
            theme_target(),
            options,
            Some(&theme_snapshot("Sleek")),
        );

        let mut register = Box::pin(coordinator.register());
        assert!(futures::poll!(register.as_mut()).is_pending());
        drop(register);
        assert!(coordinator.overrides_theme());

        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            let _ = open.send(());
        });
        assert!(coordinator.rollback().await);

        let calls = host.inner.calls();
        assert_eq!(
            calls,
            vec![
                vec!["config", "current_theme", "dark-glass"],
                vec!["config", "current_theme", "Sleek"],
            ]
        );
    }

    #[tokio::test]
    async fn theme_survives_hand_over_between_sessions() {
        let host = Arc::new(RecordingHost::default());
        let options = ApplyOptions {
            apply: true,
            ..Default::default()
        };
        let first = HostCoordinator::new(
            host.clone(),
            theme_target(),
            options,
            Some(&theme_snapshot("Sleek")),
        );
        first.register().await;
        let guard = first.hand_over().unwrap();
        assert!(!first.rollback().await);

        // the host now reports this project's theme as current
        let second = HostCoordinator::new(
            host.clone(),
            theme_target(),
            options,
            Some(&theme_snapshot("dark-glass")),
        );
        second.adopt(guard).await;
        second.register().await;
        assert_eq!(host.count(&["config", "current_theme", "Sleek"]), 0);

        assert!(second.rollback().await);
        assert_eq!(host.count(&["config", "current_theme", "Sleek"]), 1);
        assert_eq!(host.count(&["config", "current_theme", "dark-glass"]), 2);
    }

    #[tokio::test]
    async fn adopting_without_a_theme_restores_it() {
        let host = Arc::new(RecordingHost::default());
        let options = ApplyOptions {
            apply: true,
            ..Default::default()
        };
        let coordinator = HostCoordinator::new(host.clone(), extension_target(), options, None);

        coordinator
            .adopt(Arc::new(ThemeOverride::acquire(host.clone(), "Sleek")))
            .await;
        assert!(!coordinator.overrides_theme());
        assert_eq!(host.count(&["config", "current_theme", "Sleek"]), 1);
    }
}
