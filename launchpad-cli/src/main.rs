use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod blueprint;
mod cli;
mod commands;
mod config;

use cli::{Args, Command};

/// Initialize tracing with two outputs:
/// 1. Console output (stdout) - stage progress as it happens
/// 2. File output (~/.launchpad/launchpad.log) - full history across runs
///
/// With JSON output the console layer moves to stderr so stdout stays parseable.
fn initialize_tracing(json_output: bool) -> Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::fmt::writer::BoxMakeWriter;
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "warn,\
         launchpad_cli=info,\
         launchpad_orchestrations=info,\
         launchpad_loadtest=info"
            .into()
    });

    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    let launchpad_dir = PathBuf::from(home).join(".launchpad");
    std::fs::create_dir_all(&launchpad_dir).ok();

    let file_appender = tracing_appender::rolling::never(&launchpad_dir, "launchpad.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // Dropping the guard stops file logging
    std::mem::forget(guard);

    let file_layer = fmt::layer().with_writer(file_writer).with_ansi(false);

    let stdout_layer = fmt::layer()
        .compact()
        .with_target(false)
        .without_time()
        .with_writer(if json_output {
            BoxMakeWriter::new(std::io::stderr)
        } else {
            BoxMakeWriter::new(std::io::stdout)
        });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    let args = Args::parse();

    initialize_tracing(args.command.json_output())?;

    match args.command {
        Command::Deploy(deploy) => commands::deploy::run_deploy(deploy).await,
        Command::Plan(deploy) => commands::plan::run_plan(deploy).await,
        Command::Loadtest(load) => commands::loadtest::run_loadtest(load).await,
        Command::Config => commands::config::run_config().await,
    }
}
