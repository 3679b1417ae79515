#![warn(clippy::all)]

use std::path::PathBuf;

use clap::Parser;
use photo_pipeline::app::App;
use photo_pipeline::config::{load_config, LogFormat};
use photo_pipeline::shutdown::Shutdown;
use photo_pipeline::task_monitor::TaskMonitor;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[clap(version, about)]
struct Args {
    /// Path to the configuration file; environment variables prefixed with
    /// PIPELINE__ override it.
    #[clap(short, long, env = "PIPELINE_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;

    let fmt = tracing_subscriber::fmt().with_env_filter(
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    );
    match config.service.log_format {
        LogFormat::Compact => fmt.compact().init(),
        LogFormat::Pretty => fmt.pretty().init(),
        LogFormat::Json => fmt.json().init(),
    }

    let shutdown = Shutdown::spawn(
        config.app.shutdown_timeout,
        config.app.shutdown_delay,
    );

    let app = App::new(config).await?;
    TaskMonitor::init(app, shutdown.clone()).await;

    info!("Pipeline started, waiting for shutdown signal");
    shutdown.await_shutdown_begin().await;

    // Give cancelled tasks a chance to reach an await point before exiting.
    shutdown.await_shutdown_delay().await;

    Ok(())
}
