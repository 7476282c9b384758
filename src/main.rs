//
// main.rs
// dicom-deid
//
// Tokio entry point: sets up logging, then hands off execution to the CLI layer.
//
// Thales Matheus Mendonça Santos - November 2025

use dicom_deid::cli;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    cli::run().await
}
