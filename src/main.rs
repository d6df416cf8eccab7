use anyhow::Result;
use clap::Parser;
use log::{error, info, LevelFilter};
use std::collections::HashMap;

use borgpilot::borg::ProcessExecutor;
use borgpilot::cli::{Cli, Commands};
use borgpilot::core::config::Settings;
use borgpilot::jobs::{show_latest_logs, Pipeline};

/// Exit code for failures of borgpilot itself (settings, lock, validation)
const EXIT_INTERNAL: i32 = 2;

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let cli = Cli::parse();

    // Initialize logger
    let log_level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::new().filter_level(log_level).init();

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            EXIT_INTERNAL
        }
    };

    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    // Non-UTF-8 variables cannot name a repository or directory we use
    let env: HashMap<String, String> = std::env::vars_os()
        .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)))
        .collect();
    let settings = Settings::load(&env)?;
    let options = cli.options();

    match cli.command {
        Commands::Log { command } => {
            let stdout = std::io::stdout();
            show_latest_logs(&settings, command, &options, &mut stdout.lock())?;
            Ok(0)
        }
        other => {
            let Some(command) = other.borg_command() else {
                return Ok(0);
            };
            let pipeline = Pipeline::new(settings, ProcessExecutor::new(options.verbose));
            let report = pipeline.run(command, &options).await?;

            let code = report.exit_code();
            if code == 0 {
                info!("borg {} completed on {} repositories", command, report.targets.len());
            }
            Ok(code)
        }
    }
}
