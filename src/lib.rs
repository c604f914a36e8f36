// src/lib.rs
pub mod archive;
pub mod config;
pub mod error;
pub mod handoff;
pub mod history;
pub mod jobs;
pub mod process;
pub mod prompt;
pub mod schema;
pub mod staging;
pub mod table;

#[cfg(test)]
pub(crate) fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, FmtSubscriber};
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,mailprep=debug")),
        )
        .with_test_writer()
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}
