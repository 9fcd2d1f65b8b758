//! Host application control.
//!
//! Everything the pipeline does to Spicetify goes through [`HostControl`],
//! so tests can swap the real executable for a scripted fake.

mod cli;
mod config;
mod coordinator;

pub use cli::{SpicetifyCli, HOST_BIN_ENVS};
pub use config::{parse_ini, HostConfigSnapshot, IniDocument};
pub use coordinator::{ApplyOptions, HostCoordinator, HostState, HostTarget, ThemeOverride};

use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{Result, SpiceError};

/// Captured result of one host invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl HostOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }

    /// Turn a non-zero status into [`SpiceError::HostCommand`]
    pub fn check(self, args: &[&str]) -> Result<Self> {
        if self.success() {
            return Ok(self);
        }
        Err(SpiceError::HostCommand {
            args: args.join(" "),
            status: self.status,
            stderr: self.stderr.trim().to_string(),
        })
    }
}

/// Command interface of the host application
pub trait HostControl: Send + Sync {
    /// Run the host with `args`, capturing status and both streams.
    ///
    /// Only a missing or unexecutable binary is an `Err`; a non-zero exit
    /// is reported through [`HostOutput::status`].
    fn run(&self, args: &[&str]) -> Result<HostOutput>;

    /// Path of the host's own config file (`path -c`)
    fn config_path(&self) -> Result<PathBuf> {
        let args = ["path", "-c"];
        let output = self.run(&args)?.check(&args)?;
        Ok(PathBuf::from(output.stdout.trim()))
    }

    /// User data root (`path userdata`)
    fn userdata_dir(&self) -> Result<PathBuf> {
        let args = ["path", "userdata"];
        let output = self.run(&args)?.check(&args)?;
        Ok(PathBuf::from(output.stdout.trim()))
    }

    /// Read the host configuration and data paths once
    fn snapshot(&self) -> Result<HostConfigSnapshot> {
        let config_path = self.config_path()?;
        let content =
            std::fs::read_to_string(&config_path).map_err(|e| SpiceError::HostConfig {
                message: format!("{}: {}", config_path.display(), e),
            })?;
        let userdata = self.userdata_dir()?;
        Ok(HostConfigSnapshot::from_ini(&content, config_path, userdata))
    }
}

/// Run a host command off the async executor
pub async fn run_host(host: Arc<dyn HostControl>, args: Vec<String>) -> Result<HostOutput> {
    run_host_holding(host, args, ()).await
}

/// [`run_host`], keeping `held` alive until the command has exited even
/// when the caller stops waiting for it
pub async fn run_host_holding<T: Send + 'static>(
    host: Arc<dyn HostControl>,
    args: Vec<String>,
    held: T,
) -> Result<HostOutput> {
    tokio::task::spawn_blocking(move || {
        let _held = held;
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        host.run(&args)
    })
    .await
    .map_err(|e| SpiceError::HostConfig {
        message: format!("host task failed: {}", e),
    })?
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;

    /// Scripted host that records every invocation
    #[derive(Default)]
    pub struct RecordingHost {
        pub calls: Mutex<Vec<Vec<String>>>,
        /// Statuses handed out in order to `apply` calls, then 0
        pub apply_statuses: Mutex<VecDeque<i32>>,
        pub config_path: Option<PathBuf>,
        pub userdata: Option<PathBuf>,
    }

    impl RecordingHost {
        pub fn calls(&self) -> Vec<Vec<String>> {
            self.calls.lock().unwrap().clone()
        }

        pub fn count(&self, args: &[&str]) -> usize {
            self.calls()
                .iter()
                .filter(|call| call.iter().map(String::as_str).eq(args.iter().copied()))
                .count()
        }
    }

    impl HostControl for RecordingHost {
        fn run(&self, args: &[&str]) -> Result<HostOutput> {
            self.calls
                .lock()
                .unwrap()
                .push(args.iter().map(|a| a.to_string()).collect());

            let (status, stdout) = match args {
                ["apply"] => (
                    self.apply_statuses.lock().unwrap().pop_front().unwrap_or(0),
                    String::new(),
                ),
                ["path", "-c"] => (
                    0,
                    self.config_path
                        .as_ref()
                        .map(|p| p.display().to_string())
                        .unwrap_or_default(),
                ),
                ["path", "userdata"] => (
                    0,
                    self.userdata
                        .as_ref()
                        .map(|p| p.display().to_string())
                        .unwrap_or_default(),
                ),
                _ => (0, String::new()),
            };

            Ok(HostOutput {
                status,
                stdout,
                stderr: if status == 0 {
                    String::new()
                } else {
                    "apply failed".to_string()
                },
            })
        }
    }
}
