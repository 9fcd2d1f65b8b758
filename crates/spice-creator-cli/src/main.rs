use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{CommandFactory, Parser};
use clap_complete::generate;
use colored::Colorize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use spice_creator_core::server::{DevServer, LandingPage, ServerOptions};
use spice_creator_core::watch::{ConfigEvent, ConfigWatcher, DEFAULT_DEBOUNCE};
use spice_creator_core::{
    setup_logging, BundlerEngine, Config, Esbuild, HostControl, Result, SessionOptions,
    SpicetifyCli, Verbosity, DEV_OUT_DIR,
};

mod args;
mod lifecycle;
use args::{Cli, Commands, Shell};
use lifecycle::{install_shutdown_handler, launch, release_theme, Launch};

/// Exit status after a termination signal cut a build short
const INTERRUPTED: u8 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_logging(Verbosity::from_flags(cli.verbose, cli.quiet));
    let shutdown = install_shutdown_handler();

    let root = resolve_project_dir(cli.project);

    let result = match cli.command {
        Some(Commands::Build {
            watch,
            no_minify,
            apply,
            no_copy,
        }) => {
            let options = SessionOptions::build(watch, !no_minify, apply, !no_copy);
            handle_build(&root, options, &shutdown).await
        }
        Some(Commands::Dev { port }) => handle_dev(&root, port, &shutdown).await,
        Some(Commands::Completions { shell }) => {
            handle_completions(shell);
            Ok(ExitCode::SUCCESS)
        }
        None => {
            Cli::command().print_help().ok();
            Ok(ExitCode::SUCCESS)
        }
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {}", "[ERROR]".red().bold(), e);
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

fn handle_completions(shell: Shell) {
    let mut cmd = Cli::command();
    let shell = match shell {
        Shell::Bash => clap_complete::Shell::Bash,
        Shell::Zsh => clap_complete::Shell::Zsh,
        Shell::Fish => clap_complete::Shell::Fish,
        Shell::PowerShell => clap_complete::Shell::PowerShell,
        Shell::Elvish => clap_complete::Shell::Elvish,
    };
    generate(shell, &mut cmd, "spice", &mut io::stdout());
}

fn resolve_project_dir(cli_project: Option<PathBuf>) -> PathBuf {
    cli_project
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Host and engine executables, both required before anything runs
fn locate_tools(root: &Path) -> Result<(Arc<dyn HostControl>, Arc<dyn BundlerEngine>)> {
    let host = SpicetifyCli::locate()?;
    info!(bin = %host.bin().display(), "using spicetify");
    let engine = Esbuild::locate(root)?;
    info!(bin = %engine.bin().display(), "using esbuild");
    Ok((Arc::new(host), Arc::new(engine)))
}

async fn handle_build(
    root: &Path,
    options: SessionOptions,
    shutdown: &CancellationToken,
) -> Result<ExitCode> {
    let (host, engine) = locate_tools(root)?;
    let config = Config::load(root)?;

    if options.mode.is_watching() {
        run_watching(root, config, options, engine, host, None, shutdown).await?;
        return Ok(ExitCode::SUCCESS);
    }

    match launch(config, options, &engine, &host, &None, None, shutdown).await {
        Launch::Ran(session, result) => {
            session.shutdown().await;
            match result {
                Some(result) if !result.succeeded() => Ok(ExitCode::FAILURE),
                _ => Ok(ExitCode::SUCCESS),
            }
        }
        Launch::Failed(e) => Err(e),
        Launch::Interrupted => {
            println!("\n{}", "Build interrupted".yellow());
            Ok(ExitCode::from(INTERRUPTED))
        }
    }
}

async fn handle_dev(
    root: &Path,
    port: Option<u16>,
    shutdown: &CancellationToken,
) -> Result<ExitCode> {
    let (host, engine) = locate_tools(root)?;
    let config = Config::load(root)?;

    let serve_dir = config
        .server
        .serve_dir
        .as_ref()
        .map(|dir| root.join(dir))
        .unwrap_or_else(|| root.join(DEV_OUT_DIR));
    let landing = LandingPage::new(
        &config.name,
        &config.version,
        config.template_kind(),
        config.output_files().with_served_stylesheet(),
    );
    let server = Arc::new(
        DevServer::bind(ServerOptions::new(
            port.unwrap_or(config.server.port),
            serve_dir,
            landing,
        ))
        .await?,
    );
    println!(
        "{} Dev server running at {}",
        "→".cyan(),
        server.url().bold()
    );

    let outcome = run_watching(
        root,
        config,
        SessionOptions::dev(),
        engine,
        host,
        Some(Arc::clone(&server)),
        shutdown,
    )
    .await;
    server.stop().await;
    outcome.map(|()| ExitCode::SUCCESS)
}

/// Keep a session alive until Ctrl+C/SIGTERM, replacing it whenever the
/// project config changes. The old session is always shut down before the
/// next one starts; an applied theme is handed across instead of restored.
async fn run_watching(
    root: &Path,
    config: Config,
    options: SessionOptions,
    engine: Arc<dyn BundlerEngine>,
    host: Arc<dyn HostControl>,
    server: Option<Arc<DevServer>>,
    shutdown: &CancellationToken,
) -> Result<()> {
    let first = match launch(config, options, &engine, &host, &server, None, shutdown).await {
        Launch::Ran(session, _) => session,
        Launch::Failed(e) => return Err(e),
        Launch::Interrupted => {
            println!("\n{}", "Shutting down...".yellow());
            return Ok(());
        }
    };

    let (watcher, mut events) = match ConfigWatcher::new(root, DEFAULT_DEBOUNCE) {
        Ok(watching) => watching,
        Err(e) => {
            first.shutdown().await;
            return Err(e);
        }
    };
    let watcher_task = tokio::spawn(watcher.run());
    println!("{}", "Watching for changes...".dimmed());

    let mut current = Some(first);
    let mut outcome = Ok(());
    loop {
        let event = tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            event = events.recv() => event,
        };

        match event {
            Some(ConfigEvent::Changed) => {
                info!("project config changed, restarting session");
                let carried = match current.take() {
                    Some(old) => old.shutdown_for_reload().await,
                    None => None,
                };
                let config = match Config::load(root) {
                    Ok(config) => config,
                    Err(e) => {
                        release_theme(carried).await;
                        eprintln!("{} {}", "[ERROR]".red().bold(), e);
                        warn!("waiting for the next config change");
                        continue;
                    }
                };
                match launch(config, options, &engine, &host, &server, carried, shutdown).await {
                    Launch::Ran(session, _) => current = Some(session),
                    Launch::Failed(e) if e.is_fatal() => {
                        outcome = Err(e);
                        break;
                    }
                    Launch::Failed(e) => {
                        eprintln!("{} {}", "[ERROR]".red().bold(), e);
                        warn!("waiting for the next config change");
                    }
                    Launch::Interrupted => break,
                }
            }
            Some(ConfigEvent::Error(message)) => warn!(%message, "config watcher error"),
            None => break,
        }
    }

    if shutdown.is_cancelled() {
        println!("\n{}", "Shutting down...".yellow());
    }
    if let Some(session) = current.take() {
        session.shutdown().await;
    }
    watcher_task.abort();
    outcome
}
