use anyhow::Result;
use axum::serve;
use catalog_hub::api;
use catalog_hub_core::{ApplicationConfiguration, Router};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "catalog-hub")]
#[command(about = "Serves catalogs of typed things as access-controlled JSON")]
struct Cli {
    /// Application configuration file
    #[arg(short, long, default_value = "configuration.json")]
    config: PathBuf,

    /// Listen address, overriding the configured port
    #[arg(short, long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let configuration = ApplicationConfiguration::from_file(&cli.config)?;
    let addr = cli
        .listen
        .unwrap_or_else(|| format!("0.0.0.0:{}", configuration.port));

    let databases = Arc::new(Router::from_configuration(configuration)?);
    let app = api::router(databases).layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on {addr}");
    serve(listener, app).await?;
    Ok(())
}
