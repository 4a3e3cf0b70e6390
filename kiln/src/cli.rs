// kiln/src/cli.rs
//! Defines the command-line argument structure using clap.
use clap::{ArgAction, Parser, Subcommand};
use colored::Colorize;
use kiln_common::error::Result;
use kiln_common::Config;

pub mod fetch;
pub mod info;
pub mod install;

use crate::cli::fetch::FetchArgs;
use crate::cli::info::Info;
use crate::cli::install::InstallArgs;
use crate::cli::test::TestArgs;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, name = "kiln", bin_name = "kiln")]
#[command(propagate_version = true)]
pub struct CliArgs {
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Fetch, patch, build and install a formula
    Install(InstallArgs),
    /// Download and verify a formula's source, patches and resources
    Fetch(FetchArgs),
    /// Show what a formula declares
    Info(Info),
    /// Run a formula's test against its installed keg
    Test(TestArgs),
}

impl Command {
    pub async fn run(&self, config: &Config) -> Result<()> {
        match self {
            Self::Install(command) => command.run(config).await,
            Self::Fetch(command) => command.run(config).await,
            Self::Info(command) => command.run(config).await,
            Self::Test(command) => command.run(config).await,
        }
    }
}

/// Prints a `==>` progress line.
pub(crate) fn ohai(message: &str) {
    println!("{}{}", "==> ".bold().blue(), message.bold());
}
