/// Toggle Excluded Files:
/// Editors hide files matched by `files.exclude` and, optionally, everything
/// `.gitignore` covers. Most of the time that is what I want, but every so
/// often I need to see one of those files without editing my settings by
/// hand and then remembering to put them back. This tool flips the
/// exclusions off in one step and restores the exact previous settings in
/// the next, even across restarts.
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use toggle_excluded_files::builders::commands::{Command, ConsoleModePicker};
use toggle_excluded_files::builders::reporter::{ConsoleReporter, StatusReporter};
use toggle_excluded_files::core::config::ToggleMode;
use toggle_excluded_files::utils;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "toggle-excluded-files")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Toggle files.exclude and .gitignore exclusions of an editor workspace")]
struct Cli {
    /// Workspace root (defaults to the current directory)
    #[arg(long, global = true)]
    workspace: Option<PathBuf>,

    /// User settings file (defaults to the editor's settings.json)
    #[arg(long, global = true)]
    user_settings: Option<PathBuf>,

    /// Log what is happening to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show excluded files if they are hidden, hide them again otherwise
    Toggle,
    /// Show excluded files
    Show,
    /// Restore the saved exclusions
    Restore,
    /// Choose which exclusions are toggled (prompts when MODE is omitted)
    SetMode {
        /// files, gitignore or both
        mode: Option<ToggleMode>,
    },
    /// Print the current toggle state
    Status,
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let workspace = match cli.workspace {
        Some(path) => path,
        None => std::env::current_dir().context("Failed to read the current directory")?,
    };
    let mut context = utils::open_workspace(&workspace, cli.user_settings).await?;
    let picker = ConsoleModePicker;

    match cli.command {
        Commands::Toggle => context.run(Command::Toggle, &picker).await?,
        Commands::Show => context.run(Command::Show, &picker).await?,
        Commands::Restore => context.run(Command::Restore, &picker).await?,
        Commands::SetMode { mode: Some(mode) } => {
            context.commands.set_mode_to(mode).await?;
            context.dispatch_pending_events().await;
        }
        Commands::SetMode { mode: None } => context.run(Command::SetMode, &picker).await?,
        Commands::Status => {}
    }

    println!("{}", ConsoleReporter::new().render(&context.status()));
    Ok(())
}
