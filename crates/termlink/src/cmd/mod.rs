use std::path::PathBuf;

use clap::{Args, Subcommand};

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod listen;
pub mod send;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Listen for a peer and print received packages.
    Listen(ListenArgs),
    /// Connect to a server and send a single package.
    Send(SendArgs),
    /// Show version information.
    Version,
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Listen(args) => listen::run(args, format),
        Command::Send(args) => send::run(args, format),
        Command::Version => version::run(),
    }
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    /// Port to listen on (0 picks an ephemeral port).
    pub port: u16,
    /// Exit after receiving N packages.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Server host name or IP.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Package name tag.
    #[arg(long, short = 'n')]
    pub name: String,
    /// Send a single-string package.
    #[arg(long, conflicts_with_all = ["int", "file", "list"])]
    pub string: Option<String>,
    /// Send a single-int32 package.
    #[arg(long, conflicts_with_all = ["string", "file", "list"])]
    pub int: Option<i32>,
    /// Send the file's contents as a bytes package.
    #[arg(long, conflicts_with_all = ["string", "int", "list"])]
    pub file: Option<PathBuf>,
    /// Send a string-list package (comma-separated).
    #[arg(long, value_delimiter = ',', conflicts_with_all = ["string", "int", "file"])]
    pub list: Option<Vec<String>>,
    /// Wait for one response package and print it.
    #[arg(long)]
    pub wait: bool,
}
