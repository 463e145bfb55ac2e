//! docbuild CLI tool.

use clap::{Args, Parser, Subcommand};
use docbuild_config::{SystemConfig, default_config_path};
use docbuild_core::exit::FatalError;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod client;
mod commands;
mod output;

#[derive(Parser)]
#[command(name = "docbuild")]
#[command(about = "Documentation build orchestrator", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the system configuration
    #[arg(long, global = true, env = "DOCBUILD_CONFIG")]
    config: Option<PathBuf>,

    /// More output (-v info, -vv debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// Where the daemon's API server listens. Defaults come from the configuration.
#[derive(Args, Clone, Default)]
pub struct ServerArgs {
    /// API server host
    #[arg(long)]
    host: Option<String>,

    /// API server port
    #[arg(long)]
    port: Option<u16>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the build daemon in the foreground
    Daemon {
        /// Record environment ids in build info
        #[arg(long)]
        debug: bool,
    },
    /// Show running and scheduled builds
    Status {
        #[command(flatten)]
        server: ServerArgs,
    },
    /// Trigger builds for projects or DC files
    Trigger {
        #[command(flatten)]
        server: ServerArgs,
        /// Project to build (repeatable)
        #[arg(short, long = "project")]
        projects: Vec<String>,
        /// DC file to build (repeatable)
        #[arg(short, long = "dc-file")]
        dc_files: Vec<String>,
    },
    /// List projects and their DC files
    Projects {
        #[command(flatten)]
        server: ServerArgs,
    },
    /// Show the most recent failure log of a DC file
    Log {
        #[command(flatten)]
        server: ServerArgs,
        /// DC file name
        dc_file: String,
        /// Output format (html, single_html, pdf)
        format: String,
    },
    /// Manage bearer tokens
    Token {
        #[command(subcommand)]
        command: TokenCommands,
    },
    /// Read or change configuration properties
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Validate a project registry
    Validate {
        /// Registry file (default: the configured one)
        path: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum TokenCommands {
    /// Print this client's token, creating one if needed
    Show,
    /// Replace this client's token
    Regenerate,
    /// Allow a token to trigger builds on this daemon
    Authorize { token: String },
    /// Revoke a token
    Deauthorize { token: String },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print a property
    Get { key: String },
    /// Set a property
    Set { key: String, value: String },
    /// List all property names
    List,
}

fn init_tracing(verbose: u8, default: &str) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        1 => EnvFilter::new("info"),
        _ => EnvFilter::new("debug"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();
    let is_daemon = matches!(cli.command, Commands::Daemon { .. });
    init_tracing(cli.verbose, if is_daemon { "info" } else { "warn" });

    if let Err(code) = run(cli) {
        std::process::exit(code);
    }
}

fn run(cli: Cli) -> Result<(), i32> {
    let config_path = cli.config.unwrap_or_else(default_config_path);
    let config = SystemConfig::load(&config_path).map_err(|e| {
        let fatal = e.into_system_fatal();
        eprintln!("Error: {}", fatal);
        fatal.code()
    })?;

    let result = match cli.command {
        Commands::Daemon { debug } => return commands::daemon::run(config, debug),
        Commands::Status { server } => commands::remote::status(&config, &server),
        Commands::Trigger {
            server,
            projects,
            dc_files,
        } => commands::remote::trigger(&config, &server, projects, dc_files),
        Commands::Projects { server } => commands::remote::projects(&config, &server),
        Commands::Log {
            server,
            dc_file,
            format,
        } => commands::remote::log(&config, &server, &dc_file, &format),
        Commands::Token { command } => match command {
            TokenCommands::Show => commands::token::show(&config),
            TokenCommands::Regenerate => commands::token::regenerate(&config),
            TokenCommands::Authorize { token } => commands::token::authorize(&config, &token),
            TokenCommands::Deauthorize { token } => commands::token::deauthorize(&config, &token),
        },
        Commands::Config { command } => match command {
            ConfigCommands::Get { key } => commands::config::get(&config, &key),
            ConfigCommands::Set { key, value } => commands::config::set(&config_path, &key, &value),
            ConfigCommands::List => commands::config::list(&config),
        },
        Commands::Validate { path } => commands::validate::run(&config, path),
    };

    result.map_err(|e| {
        eprintln!("Error: {:#}", e);
        e.downcast_ref::<FatalError>().map(FatalError::code).unwrap_or(1)
    })
}
