mod client;
mod errors;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::error;

use client::IFTerminalClient;
use errors::IFtError;

/// Terminal client for the zmcore Z-machine interpreter: plays classic
/// Interactive Fiction story files like Zork.
#[derive(Parser, Debug)]
#[command(name = "zmterm")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// The input .z3 story file to play.
    story: PathBuf,

    /// Disable name highlighting in narrative text.
    #[arg(long)]
    no_highlight: bool,

    /// Suppress all ANSI styling, including the status bar.
    #[arg(long)]
    plain: bool,

    /// Seed the random-number generator deterministically.
    #[arg(long)]
    seed: Option<u64>,

    /// Directory save/restore snapshots are written to and read from.
    #[arg(long)]
    save_dir: Option<PathBuf>,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let seed = cli.seed.unwrap_or(0);

    let mut client = match IFTerminalClient::with_story_file(&cli.story, seed, cli.plain, cli.no_highlight, cli.save_dir) {
        Ok(client) => client,
        Err(e @ IFtError::Io(_)) => {
            error!("failed to load story file: {}", e);
            return ExitCode::from(2);
        }
        Err(e @ IFtError::Zm(_)) => {
            error!("failed to load story file: {}", e);
            return ExitCode::from(1);
        }
    };

    match client.run() {
        Ok(()) => ExitCode::from(0),
        Err(e) => {
            error!("{}", e);
            ExitCode::from(1)
        }
    }
}
