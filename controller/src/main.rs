//! autodeploy - Entry Point
//!
//! Renders application templates into a GitOps repository and drives each
//! deployment through creation, update and deletion.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

use anyhow::Context;
use autodeploy::app::options::AppOptions;
use autodeploy::app::run::run;
use autodeploy::filesys::file::File;
use autodeploy::logs::{init_logging, LogOptions};
use autodeploy::storage::layout::StorageLayout;
use autodeploy::storage::settings::Settings;
use autodeploy::utils::version_info;

use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    let version = version_info();
    if cli_args.contains_key("version") {
        println!("{}", serde_json::to_string_pretty(&version)?);
        return Ok(());
    }

    let layout = match cli_args.get("base-dir") {
        Some(base_dir) => StorageLayout::new(base_dir),
        None => StorageLayout::default(),
    };

    // Retrieve the settings file
    let settings_file = match cli_args.get("settings") {
        Some(path) => File::new(PathBuf::from(path)),
        None => layout.settings_file(),
    };
    let settings = settings_file
        .read_json::<Settings>()
        .await
        .with_context(|| format!("reading settings from {}", settings_file.path().display()))?;

    // Initialize logging
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        json_format: settings.log_json,
        log_dir: settings.log_dir.clone(),
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            println!("Failed to initialize logging: {e}");
            None
        }
    };

    info!("Running autodeploy {}", version);
    let options = AppOptions::new(settings, layout);
    if let Err(e) = run(options, await_shutdown_signal()).await {
        error!("Failed to run the controller: {e}");
        return Err(e.into());
    }
    Ok(())
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                _ => {
                    error!("Unable to install signal handlers, falling back to Ctrl+C");
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Ctrl+C received, shutting down...");
    }
}
