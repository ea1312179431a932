use capture_pipeline::{setup_logging, Cli, CliRunner, Config};
use clap::Parser;
use tokio::signal;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Cli::parse();

    setup_logging(args.verbose)?;

    info!("starting capture-pipeline v{}", env!("CARGO_PKG_VERSION"));

    if let Some(port) = args.metrics_port {
        capture_pipeline::PrometheusExporter::new(port).install()?;
    }

    let config = load_config(&args).await?;
    let runner = CliRunner::new(config, &args).await?;

    let result = tokio::select! {
        result = runner.run(args.command) => result,
        _ = shutdown_signal() => {
            info!("received shutdown signal");
            Ok(())
        }
    };

    runner.service.shutdown().await;

    if let Err(e) = result {
        error!("command failed: {e}");
        std::process::exit(1);
    }

    info!("capture-pipeline stopped");
    Ok(())
}

async fn load_config(args: &Cli) -> Result<Config, Box<dyn std::error::Error>> {
    let config = if let Some(config_path) = &args.config {
        let content = tokio::fs::read_to_string(config_path).await?;
        serde_json::from_str(&content)?
    } else {
        Config::default()
    };
    Ok(config)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
