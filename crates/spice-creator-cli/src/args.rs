use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "spice")]
#[command(about = "Build and live-reload Spicetify extensions and themes")]
#[command(version)]
pub struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Quiet output (errors only)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Project directory (default: current directory)
    #[arg(long, global = true, env = "SPICE_PROJECT_DIR")]
    pub project: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
#[allow(clippy::enum_variant_names)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build the project
    Build {
        /// Rebuild on source changes
        #[arg(short, long)]
        watch: bool,

        /// Skip minification
        #[arg(long)]
        no_minify: bool,

        /// Register the build with Spicetify and apply it
        #[arg(short, long)]
        apply: bool,

        /// Don't copy artifacts into the Spicetify data directory
        #[arg(long)]
        no_copy: bool,
    },

    /// Watch, serve and live-reload inside Spotify
    Dev {
        /// Dev server port (default: from spice.toml, then 54321)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}
