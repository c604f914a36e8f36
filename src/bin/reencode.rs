use anyhow::Result;
use clap::Parser;
use mailprep::table::reencode_to_windows_1252;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

/// Convert delimited files to Windows-1252 for the print vendor, keeping
/// each original as `<name>_original.<ext>`.
#[derive(Parser, Debug)]
#[command(name = "reencode", version)]
struct Args {
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

fn run(args: Args) -> Result<()> {
    for f in &args.files {
        let (backup, replaced) = reencode_to_windows_1252(f)?;
        info!(file = %f.display(), backup = %backup.display(), replaced, "done");
    }
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt().with_env_filter("info").init();
    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
