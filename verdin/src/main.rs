mod commands;

use std::io::Write;

use clap::Parser;
use human_panic::setup_panic;

use crate::commands::*;

#[derive(Parser, Debug)]
#[clap(version, author)]
pub struct Opts {
    #[clap(subcommand)]
    pub subcmd: SubCommand,
}

#[derive(Parser, Debug)]
pub enum SubCommand {
    /// Recovers a working copy: replays the journal logs an
    /// interrupted operation left behind, and releases stale locks
    Cleanup(Cleanup),

    /// Shows where an update of the given path would root its
    /// editor
    Target(Target),
}

fn main() {
    setup_panic!();
    env_logger::init();
    let opts = Opts::parse();
    let result = match opts.subcmd {
        SubCommand::Cleanup(c) => c.run(),
        SubCommand::Target(t) => t.run(),
    };
    if let Err(e) = result {
        writeln!(std::io::stderr(), "Error: {}", e).unwrap_or(());
        std::process::exit(1);
    }
}
