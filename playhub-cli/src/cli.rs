use clap::{Parser, Subcommand};
use std::path::PathBuf;

use playhub_core::Runner;

#[derive(Parser, Debug)]
#[command(version, about = "playhub game launcher")]
pub struct Args {
    /// Keep config, cache and logs under this directory instead of the user's profile
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    #[command(subcommand)]
    pub cmd: Cmd,
}

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// Launch a game and wait for it to exit
    Launch {
        app_name: String,
        #[arg(long)]
        runner: Runner,
        /// Game executable
        #[arg(long)]
        exe: PathBuf,
        /// Run the executable directly instead of through Wine/Proton
        #[arg(long)]
        native: bool,
    },
    /// Move an installed game to another folder
    Move {
        app_name: String,
        #[arg(long)]
        runner: Runner,
        /// Current install folder
        #[arg(long)]
        from: PathBuf,
        /// New parent folder
        #[arg(long)]
        to: PathBuf,
    },
    /// Download a file with segmented transfer
    Download { url: String, dest: PathBuf },
    /// Unpack a .tar.gz / .tar.xz archive
    Extract {
        archive: PathBuf,
        dest: PathBuf,
        #[arg(long, default_value_t = 0)]
        strip: usize,
        /// Use the in-process extractor even when system tar is available
        #[arg(long)]
        library: bool,
    },
    /// Manage Wine and Proton builds
    Wine {
        #[command(subcommand)]
        cmd: WineCmd,
    },
}

#[derive(Subcommand, Debug)]
pub enum WineCmd {
    /// List installed builds
    List,
    /// List builds available for download
    Releases,
    /// Download and install a build by name
    Install { version: String },
    /// Make sure a game has a usable build
    Check { app_name: String },
}
