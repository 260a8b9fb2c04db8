use clap::Parser;
use labmachine_server::StateDir;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "labmachine-server", about = "labmachine remote state protocol v1 server")]
struct Cli {
    /// Port to listen on.
    #[arg(long, default_value_t = 8322)]
    port: u16,

    /// Directory to store state documents in.
    #[arg(long, default_value = "./labmachine-state")]
    data_dir: PathBuf,

    /// Bearer token clients must present.
    #[arg(long, env = "LABMACHINE_SERVER_TOKEN")]
    token: Option<String>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if let Err(e) = std::fs::create_dir_all(&cli.data_dir) {
        error!("failed to create data directory {}: {e}", cli.data_dir.display());
        return ExitCode::FAILURE;
    }

    let addr = format!("0.0.0.0:{}", cli.port);
    info!("starting labmachine-server on {addr}");
    info!("data directory: {}", cli.data_dir.display());
    if cli.token.is_some() {
        info!("bearer token authentication enabled");
    }

    let store = Arc::new(StateDir::new(cli.data_dir).with_token(cli.token));
    match labmachine_server::run_server(&store, &addr) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("server error: {e}");
            ExitCode::FAILURE
        }
    }
}
