use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

mod commands;
mod config;
mod http_client;

use config::Settings;

#[derive(Parser)]
#[command(
    name = "scanboot",
    version,
    about = "Provision a Java runtime and the scanner engine, then run the analysis"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Define a scanner property (repeatable)
    #[arg(
        short = 'D',
        long = "define",
        value_name = "KEY=VALUE",
        value_parser = parse_define,
        global = true
    )]
    defines: Vec<(String, String)>,

    /// Enable debug logging
    #[arg(short = 'X', long, global = true)]
    debug: bool,

    /// TOML config file (defaults to $SCANBOOT_CONFIG)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve, provision and launch the scanner engine (default)
    Run,
    /// Print the resolved server endpoint (JSON)
    Endpoint {
        #[arg(long)]
        pretty: bool,
    },
    /// Provision the JRE and engine and print their locations (JSON)
    Provision {
        #[arg(long)]
        pretty: bool,
    },
}

fn parse_define(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err("property key cannot be empty".into());
    }
    Ok((key.to_string(), value.to_string()))
}

fn init_tracing(debug: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if debug { "debug" } else { "info" }));
    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

async fn dispatch(cli: Cli) -> Result<i32> {
    let settings = Settings::assemble(cli.config.as_deref(), &cli.defines, |key| {
        std::env::var(key).ok()
    })?;
    init_tracing(cli.debug || settings.verbose());

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => commands::run::execute(&settings).await,
        Commands::Endpoint { pretty } => commands::endpoint::execute(&settings, pretty),
        Commands::Provision { pretty } => commands::provision::execute(&settings, pretty).await,
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let code = match dispatch(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("ERROR: {err:#}");
            1
        }
    };
    std::process::exit(code);
}
