use crate::{agent::config::ConnectArgs, local::LocalArgs};
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "phrasehunt-agent",
    version,
    about = "Scans blocks of a BIP39 phrase search, for a coordinator or on its own"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Join a coordinator and work on the blocks it hands out.
    Connect(ConnectArgs),
    /// Search the whole space locally with a resumable checkpoint.
    Local(LocalArgs),
}
