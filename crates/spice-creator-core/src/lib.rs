pub mod artifact;
pub mod assets;
pub mod bundler;
pub mod config;
pub mod error;
pub mod hash;
pub mod host;
pub mod live_reload;
pub mod logging;
pub mod plugins;
pub mod server;
pub mod session;
pub mod slug;
pub mod watch;

pub use artifact::{ArtifactRecord, BuildCache, OutputFileSet, SharedCache};
pub use bundler::esbuild::Esbuild;
pub use bundler::{
    BuildContext, BuildMessage, BuildOptions, BuildResult, BundlerEngine, OutputFile, Plugin,
    PluginSet, TransformOptions, Transformer,
};
pub use config::{BundlerOptions, Config, ServerConfig, Template, TemplateKind, DEFAULT_PORT};
pub use error::{Result, SpiceError};
pub use host::{
    ApplyOptions, HostConfigSnapshot, HostControl, HostCoordinator, HostState, HostTarget,
    SpicetifyCli, ThemeOverride,
};
pub use logging::{setup_logging, Verbosity};
pub use session::{BuildMode, Session, SessionOptions, DEV_OUT_DIR};
pub use watch::{ConfigEvent, ConfigWatcher};

// Dev server
pub use server::{ClientSet, DevServer, LandingPage, ServerOptions};
