// src/main.rs

use std::process::ExitCode;

use ferryman::errors::FerrymanError;
use ferryman::{cli, logging, run};

#[tokio::main]
async fn main() -> ExitCode {
    match run_main().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("ferryman error: {err:#}");
            exit_code_for(&err)
        }
    }
}

async fn run_main() -> anyhow::Result<()> {
    let args = cli::parse();
    logging::init_logging(args.log_level)?;
    run(args).await
}

/// 2 for rejected input (bad record or config), 1 for everything else.
fn exit_code_for(err: &anyhow::Error) -> ExitCode {
    match err.downcast_ref::<FerrymanError>() {
        Some(FerrymanError::Validation(_) | FerrymanError::ConfigError(_)) => ExitCode::from(2),
        _ => ExitCode::FAILURE,
    }
}
