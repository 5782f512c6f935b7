/// Cadence CLI
///
/// Runs and checks JSON program files and prints the effective configuration.
use cadence_core::cli;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    if let Err(e) = cli::run_cli().await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
