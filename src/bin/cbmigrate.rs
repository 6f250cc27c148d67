//! cbmigrate command-line entry point

use cbmigrate::cli::{self, io, Cli};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse_args();
    match cli::run(cli).await {
        Ok(value) => {
            if let Err(e) = io::write_response(value) {
                eprintln!("Failed to write output: {}", e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            let _ = io::write_error(e.kind(), &e.to_string());
            std::process::exit(1);
        }
    }
}
