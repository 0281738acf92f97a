mod options;

use clap::{ArgAction, Parser, Subcommand};
use example_apiserver::install_recorder;
use example_core::VersionInfo;
use options::{build_scheme, LogFormat, ServeOptions};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "example-service", about = "ExampleService aggregated API server")]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace). RUST_LOG takes precedence.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the API server
    Serve(ServeOptions),
    /// Print version information
    Version,
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Version => {
            print!("{}", version_report());
            Ok(())
        }
        Commands::Serve(options) => {
            init_tracing(cli.verbose, cli.log_format);
            run_serve(options).await
        }
    }
}

fn version_report() -> String {
    VersionInfo::get().report()
}

fn default_filter(verbose: u8) -> &'static str {
    match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

fn init_tracing(verbose: u8, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(verbose)));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Run the API server until ctrl-c
async fn run_serve(options: ServeOptions) -> miette::Result<()> {
    let options = options.complete();
    options.validate()?;

    info!("Starting ExampleService {}", VersionInfo::get().version);

    let metrics = install_recorder(&options.metrics_namespace)?;
    let scheme = Arc::new(build_scheme()?);
    let server = options
        .config(scheme, Some(metrics))
        .complete()?
        .new_server()?;

    let token = CancellationToken::new();
    let server_token = token.clone();
    let mut server_handle = tokio::spawn(async move { server.run(server_token).await });

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.map_err(|e| miette::miette!("Failed to listen for ctrl-c: {}", e))?;
            info!("Shutting down gracefully...");
            token.cancel();
        }
        result = &mut server_handle => {
            return match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => {
                    error!("API server error: {}", e);
                    Err(e.into())
                }
                Err(e) => Err(miette::miette!("API server task failed: {}", e)),
            };
        }
    }

    match server_handle.await {
        Ok(result) => result?,
        Err(e) => return Err(miette::miette!("API server task failed: {}", e)),
    }

    info!("Shutdown complete");
    Ok(())
}
