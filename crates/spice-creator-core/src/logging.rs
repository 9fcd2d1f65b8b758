use tracing_subscriber::EnvFilter;

/// Environment variable overriding the computed filter
pub const LOG_ENV: &str = "SPICE_LOG";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    Quiet,
    #[default]
    Normal,
    Verbose,
}

impl Verbosity {
    pub fn from_flags(verbose: bool, quiet: bool) -> Self {
        match (verbose, quiet) {
            (true, _) => Verbosity::Verbose,
            (false, true) => Verbosity::Quiet,
            (false, false) => Verbosity::Normal,
        }
    }

    pub fn directive(&self) -> &'static str {
        match self {
            Verbosity::Quiet => "error",
            Verbosity::Normal => "warn,spice_creator_core=info,spice=info",
            Verbosity::Verbose => "info,spice_creator_core=debug,spice=debug",
        }
    }
}

pub fn build_filter(verbosity: Verbosity) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(verbosity.directive()))
}

/// Install the global subscriber. Logs go to stderr so build reports on
/// stdout stay readable. A second call is a no-op.
pub fn setup_logging(verbosity: Verbosity) {
    let _ = tracing_subscriber::fmt()
        .compact()
        .without_time()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_env_filter(build_filter(verbosity))
        .try_init();
}
