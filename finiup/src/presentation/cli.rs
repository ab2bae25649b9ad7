use clap::{Args, Parser, Subcommand};
use fini_core::settings::{DEFAULT_ENDPOINT, DEFAULT_MAX_RETRIES, SizePolicy};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about = "finiup: pack directories and push them to a blob store", long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Clone, Debug)]
pub struct GlobalArgs {
    /// Blob store base URL
    #[arg(long, global = true, env = "FINI_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
    pub endpoint: String,

    /// Where the manifest, activity log and credentials live
    #[arg(long, global = true, env = "FINI_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Retries per chunk after the first attempt
    #[arg(long, global = true, env = "FINI_MAX_RETRIES", default_value_t = DEFAULT_MAX_RETRIES)]
    pub max_retries: u32,

    /// Upload chunk size in bytes
    #[arg(long, global = true)]
    pub chunk_size: Option<usize>,

    /// How subdirectory sizes are measured: shallow | recursive
    #[arg(long, global = true, default_value = "shallow")]
    pub size_policy: SizePolicy,

    /// Keep uploading remaining subdirectories after a failure
    #[arg(long, global = true)]
    pub continue_on_error: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Upload every subdirectory of ROOT, recording CIDs in the manifest
    Upload {
        root: PathBuf,
        /// Directory name used as the manifest key (defaults to ROOT's file name)
        #[arg(long)]
        name: Option<String>,
    },

    /// Print the subdirectories of ROOT with their sizes as JSON
    Scan { root: PathBuf },

    /// Write the archive for one directory to OUT and print its root CID
    Pack { dir: PathBuf, out: PathBuf },

    /// List roots and blocks of an archive file
    List { archive: PathBuf },

    /// Print the manifest
    Manifest,

    #[command(subcommand)]
    /// Manage the stored API token
    Token(TokenCommands),
}

#[derive(Subcommand)]
pub enum TokenCommands {
    /// Store a token
    Set { token: String },
    /// Remove the stored token
    Clear,
    /// Report whether a token is stored
    Status,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_takes_root_and_optional_name() {
        let cli = Cli::try_parse_from(["finiup", "upload", "/data/R", "--name", "Renamed"]).unwrap();
        match cli.command {
            Commands::Upload { root, name } => {
                assert_eq!(root, PathBuf::from("/data/R"));
                assert_eq!(name.as_deref(), Some("Renamed"));
            }
            _ => panic!("expected upload"),
        }
        assert_eq!(cli.global.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(cli.global.size_policy, SizePolicy::Shallow);
        assert!(!cli.global.continue_on_error);
    }

    #[test]
    fn global_flags_parse_after_the_subcommand() {
        let cli = Cli::try_parse_from([
            "finiup",
            "scan",
            "/x",
            "--size-policy",
            "recursive",
            "--max-retries",
            "3",
            "--continue-on-error",
        ])
        .unwrap();
        assert_eq!(cli.global.size_policy, SizePolicy::Recursive);
        assert_eq!(cli.global.max_retries, 3);
        assert!(cli.global.continue_on_error);
    }

    #[test]
    fn unknown_size_policy_is_rejected() {
        assert!(Cli::try_parse_from(["finiup", "scan", "/x", "--size-policy", "deep"]).is_err());
    }

    #[test]
    fn token_subcommands() {
        let cli = Cli::try_parse_from(["finiup", "token", "set", "abc"]).unwrap();
        assert!(matches!(cli.command, Commands::Token(TokenCommands::Set { token }) if token == "abc"));
        let cli = Cli::try_parse_from(["finiup", "token", "status"]).unwrap();
        assert!(matches!(cli.command, Commands::Token(TokenCommands::Status)));
    }
}
