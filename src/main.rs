use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use ledgerload_lib::config::{self, HarnessSettings, RunMode};
use ledgerload_lib::harness::{self, RunOutcome};

#[derive(Parser, Debug)]
#[command(name = "ledgerload")]
#[command(about = "Load generator and verifier for a document store", long_about = None)]
struct Args {
    /// Settings file (PascalCase JSON).
    #[arg(long, default_value = config::DEFAULT_SETTINGS_FILE)]
    settings: PathBuf,
    /// Tracing filter used when RUST_LOG is not set.
    #[arg(long)]
    log_filter: Option<String>,
    /// Override the mode from the settings file (raven, memory, file).
    #[arg(long)]
    mode: Option<RunMode>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    ledgerload_lib::init_tracing(args.log_filter.as_deref());
    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);

    let mut settings = match HarnessSettings::load(&args.settings) {
        Ok(settings) => settings,
        Err(e) => {
            tracing::error!(error = %e, "Cannot load settings");
            return ExitCode::FAILURE;
        }
    };
    if let Some(mode) = args.mode {
        settings.mode = mode;
    }

    match harness::run(&settings).await {
        Ok(RunOutcome::Store { failure: Some(_), .. }) => ExitCode::FAILURE,
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Run failed");
            ExitCode::FAILURE
        }
    }
}
