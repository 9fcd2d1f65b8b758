use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SpiceError {
    #[error("Wrapper template not found at: {path}")]
    TemplateNotFound { path: PathBuf },

    #[error("Spicetify binary could not be executed: {bin}")]
    HostNotFound { bin: String },

    #[error("spicetify {args} exited with status {status}: {stderr}")]
    HostCommand {
        args: String,
        status: i32,
        stderr: String,
    },

    #[error("Failed to read Spicetify config: {message}")]
    HostConfig { message: String },

    #[error("Failed to parse config file {path}: {message}")]
    ConfigParse { path: PathBuf, message: String },

    #[error("Invalid configuration: {message}")]
    ConfigInvalid { message: String },

    #[error("No {kind} entry found (looked in ./, src/ and their app.* files)")]
    EntryNotFound { kind: &'static str },

    #[error("Bundler error: {message}")]
    Bundler { message: String },

    #[error("Dev server error: {message}")]
    Server { message: String },

    #[error("File watcher error: {0}")]
    Watch(#[from] notify::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, SpiceError>;

impl SpiceError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::TemplateNotFound { .. } => 2,
            Self::HostNotFound { .. } => 3,
            Self::ConfigParse { .. } | Self::ConfigInvalid { .. } | Self::EntryNotFound { .. } => 4,
            _ => 1,
        }
    }

    /// Errors that must stop the process instead of waiting for the next build.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::TemplateNotFound { .. } | Self::HostNotFound { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_errors_have_distinct_exit_codes() {
        let template = SpiceError::TemplateNotFound {
            path: PathBuf::from("assets/wrapper.js"),
        };
        let host = SpiceError::HostNotFound {
            bin: "spicetify".to_string(),
        };
        assert!(template.is_fatal());
        assert!(host.is_fatal());
        assert_eq!(template.exit_code(), 2);
        assert_eq!(host.exit_code(), 3);
    }

    #[test]
    fn host_command_failure_is_recoverable() {
        let err = SpiceError::HostCommand {
            args: "apply".to_string(),
            status: 1,
            stderr: "boom".to_string(),
        };
        assert!(!err.is_fatal());
        assert_eq!(err.exit_code(), 1);
        assert!(err.to_string().contains("boom"));
    }
}
