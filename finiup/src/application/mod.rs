pub mod handlers;

use crate::presentation::cli::{Cli, Commands, TokenCommands};
use clap::Parser;
use fini_core::error::Result;
use tracing_subscriber::EnvFilter;

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("FINI_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let settings = handlers::settings_from_args(&cli.global);
    match cli.command {
        Commands::Upload { root, name } => handlers::handle_upload(settings, root, name),
        Commands::Scan { root } => handlers::handle_scan(&settings, root),
        Commands::Pack { dir, out } => handlers::handle_pack(dir, out),
        Commands::List { archive } => handlers::handle_list(archive),
        Commands::Manifest => handlers::handle_manifest(&settings),
        Commands::Token(cmd) => match cmd {
            TokenCommands::Set { token } => handlers::handle_token_set(&settings, &token),
            TokenCommands::Clear => handlers::handle_token_clear(&settings),
            TokenCommands::Status => handlers::handle_token_status(&settings),
        },
    }
}
