use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::debug;

use super::{HostControl, HostOutput};
use crate::error::{Result, SpiceError};

/// Environment variables consulted for the host binary, in order
pub const HOST_BIN_ENVS: &[&str] = &["SPICETIFY_BIN", "SPICE_BIN"];

const DEFAULT_BIN: &str = "spicetify";

// ============================================================================
// Spicetify CLI
// ============================================================================

/// The real `spicetify` executable
#[derive(Debug, Clone)]
pub struct SpicetifyCli {
    bin: PathBuf,
}

impl SpicetifyCli {
    pub fn new(bin: impl Into<PathBuf>) -> Self {
        Self { bin: bin.into() }
    }

    /// Resolve the binary from the environment or `PATH`.
    ///
    /// # Errors
    /// * `HostNotFound` - the binary cannot be located
    pub fn locate() -> Result<Self> {
        let bin = HOST_BIN_ENVS
            .iter()
            .find_map(|key| std::env::var(key).ok().filter(|v| !v.is_empty()))
            .unwrap_or_else(|| DEFAULT_BIN.to_string());

        let resolved = which::which(&bin).map_err(|_| SpiceError::HostNotFound { bin })?;
        Ok(Self::new(resolved))
    }

    pub fn bin(&self) -> &Path {
        &self.bin
    }
}

impl HostControl for SpicetifyCli {
    fn run(&self, args: &[&str]) -> Result<HostOutput> {
        debug!(args = %args.join(" "), "spicetify");

        let output = Command::new(&self.bin)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|_| SpiceError::HostNotFound {
                bin: self.bin.display().to_string(),
            })?;

        Ok(HostOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
