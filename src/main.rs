use std::process::ExitCode;
use steg_walkthrough::Config;
use tracing::error;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    // stdout carries the walkthrough report, logs go to stderr
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    // Load configuration from CLI and/or config file
    let config = match Config::load() {
        Ok(config) => config,
        Err(error) => {
            error!("Invalid configuration: {error:#}");
            return ExitCode::from(2);
        }
    };

    match steg_walkthrough::run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!("{error:#}");
            ExitCode::FAILURE
        }
    }
}
