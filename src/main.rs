use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use zlibcat::zlib::Decoder;

/// Decompress a zlib stream and write the raw bytes to standard output
#[derive(Parser, Debug)]
#[command(disable_help_flag = true, disable_version_flag = true)]
struct Args {
    /// File holding one complete zlib stream; may start with `-`
    #[arg(allow_hyphen_values = true)]
    file: PathBuf,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let input = fs::read(&args.file).with_context(|| format!("read {}", args.file.display()))?;
    let mut decoder = Decoder::new(&input);
    let output = decoder.decode().context("decompress zlib stream")?;

    let mut stdout = io::stdout().lock();
    stdout.write_all(&output)?;
    stdout.flush()?;

    Ok(())
}
