mod ansi;
mod audio;
mod cache;
mod checksum;
mod decode;
mod player;
mod probe;
mod term;
mod transcode;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::player::Player;

#[derive(Debug, Parser)]
#[command(name = "tvp")]
#[command(about = "Terminal Video Player", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Play a video as character art, with audio.
    Play {
        /// The video source file.
        #[arg(default_value = "./test.mp4")]
        source: PathBuf,
        /// Where transcoded frames and extracted audio are cached.
        #[arg(long, default_value = "./cache")]
        cache_dir: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Play { source, cache_dir } => run_play(&source, &cache_dir),
    }
}

fn run_play(source: &Path, cache_dir: &Path) -> Result<()> {
    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&interrupted);
    ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))
        .context("failed to install interrupt handler")?;

    let player = Player::new(source, cache_dir)?;
    let summary = player.run(&interrupted)?;

    // Interrupted and completed sessions both exit 0; the terminal state is
    // already restored either way.
    if summary.interrupted {
        println!("Interrupted. Exiting...");
    } else {
        println!("Exiting...");
    }
    Ok(())
}
