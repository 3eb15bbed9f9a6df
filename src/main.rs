//! sserve: serve a directory over HTTPS.
//!
//! This is the application entry point. It parses the command line, loads the
//! optional TOML file, initializes tracing, resolves the layered configuration
//! and hands off to the server. Any startup failure is logged once and turned
//! into a non-zero exit code.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sserve::config::{
    FileConfig, IssuerKind, LoggingConfig, Overrides, ServerConfig, DEFAULT_LOG_FILTER,
};
use sserve::StartupError;

/// Serve a directory over HTTPS with a locally trusted certificate
#[derive(Parser, Debug)]
#[command(name = "sserve", version, about)]
struct Args {
    /// Directory to serve
    root: Option<PathBuf>,

    /// HTTPS port
    #[arg(long)]
    port: Option<u16>,

    /// Redirect plain HTTP to HTTPS
    #[arg(long, require_equals = true, num_args = 0..=1, default_missing_value = "true")]
    redirect: Option<bool>,

    /// Port of the HTTP redirector
    #[arg(long)]
    redirect_port: Option<u16>,

    /// Minify CSS, HTML, SVG, JavaScript, JSON and XML responses
    #[arg(long, require_equals = true, num_args = 0..=1, default_missing_value = "true")]
    minify: Option<bool>,

    /// Gzip responses for clients that accept it
    #[arg(long, require_equals = true, num_args = 0..=1, default_missing_value = "true")]
    compression: Option<bool>,

    /// Existing certificate to use instead of a provisioned one (requires --key)
    #[arg(long)]
    cert: Option<PathBuf>,

    /// Private key for --cert
    #[arg(long)]
    key: Option<PathBuf>,

    /// Directory holding the provisioned certificate
    #[arg(long)]
    cert_dir: Option<PathBuf>,

    /// How to provision a missing certificate
    #[arg(long, value_enum)]
    issuer: Option<IssuerKind>,

    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level filter (e.g., "sserve=debug,tower_http=info")
    #[arg(short, long)]
    log_level: Option<String>,
}

impl Args {
    fn overrides(&self) -> Overrides {
        Overrides {
            root: self.root.clone(),
            port: self.port,
            redirect: self.redirect,
            redirect_port: self.redirect_port,
            minify: self.minify,
            compression: self.compression,
            cert_path: self.cert.clone(),
            key_path: self.key.clone(),
            cert_dir: self.cert_dir.clone(),
            issuer: self.issuer,
        }
    }
}

fn init_tracing(log_level: Option<String>, logging: &LoggingConfig) {
    // Priority: CLI > env > default
    let log_filter = log_level
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

    let registry =
        tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::new(&log_filter));

    if logging.is_json() {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn start(args: Args, file: FileConfig) -> Result<(), StartupError> {
    let config = ServerConfig::resolve(file, args.overrides())?;
    tracing::info!(
        root = %config.root.display(),
        port = config.port,
        redirect = config.redirect,
        minify = config.minify,
        compression = config.compression,
        "Loaded configuration"
    );
    sserve::run(config).await
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let file = match &args.config {
        Some(path) => FileConfig::load(path),
        None => Ok(FileConfig::default()),
    };
    let logging = file
        .as_ref()
        .map(|file| file.logging.clone())
        .unwrap_or_default();
    init_tracing(args.log_level.clone(), &logging);

    let result = match file {
        Ok(file) => start(args, file).await,
        Err(e) => Err(e.into()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Startup failed");
            ExitCode::FAILURE
        }
    }
}
