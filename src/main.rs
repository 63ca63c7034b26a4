use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use digit_ocr::TesseractOcr;
use portal_driver::ChromiumFactory;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;

use ims_attendance::config::AppConfig;
use ims_attendance::server::{self, AppState};

#[derive(Debug, Parser)]
#[command(
    name = "ims-attendance",
    about = "Attendance scraper service for the IMS student portal"
)]
struct Cli {
    /// Port to listen on; falls back to $PORT, then 3000.
    #[arg(long)]
    port: Option<u16>,

    /// Portal base URL override.
    #[arg(long)]
    base_url: Option<Url>,

    /// Chrome/Chromium executable; autodetected when omitted.
    #[arg(long)]
    chrome_path: Option<PathBuf>,

    /// Run the browser with a visible window.
    #[arg(long)]
    headful: bool,

    /// Default log level when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let mut config = AppConfig::default();
    if let Some(base_url) = cli.base_url {
        config.base_url = base_url;
    }
    if let Some(chrome_path) = cli.chrome_path {
        config.browser.executable = chrome_path;
    }
    if cli.headful {
        config.browser.headless = false;
    }

    let port = cli
        .port
        .or_else(|| std::env::var("PORT").ok().and_then(|v| v.parse().ok()))
        .unwrap_or(3000);

    let state = AppState {
        factory: Arc::new(ChromiumFactory::new(config.browser.clone())),
        recognizer: Arc::new(TesseractOcr::new(config.ocr.clone())),
        config: Arc::new(config),
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(target: "server", %addr, "listening");

    axum::serve(listener, server::router(state))
        .await
        .context("server terminated")?;
    Ok(())
}

fn init_tracing(level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.to_string())),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
