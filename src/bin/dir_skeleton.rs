use clap::Parser;
use mailprep::jobs::copy_dir_skeleton;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

/// Copy a folder's directory structure, without any files.
#[derive(Parser, Debug)]
#[command(name = "dir_skeleton", version)]
struct Args {
    src: PathBuf,
    dest: PathBuf,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt().with_env_filter("info").init();
    let args = Args::parse();
    match copy_dir_skeleton(&args.src, &args.dest) {
        Ok(n) => {
            info!(created = n, dest = %args.dest.display(), "skeleton ready");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
