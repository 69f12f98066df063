use std::net::SocketAddr;
use std::process::ExitCode;

use clap::Parser;
use thiserror::Error;
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use facegate_config::{ConfigError, ResolvedConfig};
use facegate_core::faces::{
    EncodingCache, EncodingStore, FaceEncodingBackend, FaceService, FsEncodingStore,
    RedisEncodingCache, ServicePolicy,
};
use facegate_core::ServiceError;
use facegate_server::{serve, AppState};

#[derive(Parser, Debug)]
#[command(name = "facegate-server", about = "Biometric face verification service", version)]
struct Cli {
    /// Listen port (overrides the config file and $FACEGATE_PORT)
    #[arg(long)]
    port: Option<u16>,

    /// Listen host
    #[arg(long)]
    host: Option<String>,

    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Debug, Error)]
enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error("invalid listen address {value}: {message}")]
    Addr { value: String, message: String },

    #[error("server I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(not(feature = "dlib"))]
    #[error("built without a face extraction backend (dlib feature disabled)")]
    NoBackend,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), StartupError> {
    let loaded = facegate_config::load_resolved_config()?;
    let config = loaded.resolved;
    info!(
        source = %facegate_config::config_source_display(loaded.source.as_deref()),
        "configuration loaded"
    );

    let backend = build_backend(&config)?;
    let cache = build_cache(&config);
    let store = EncodingStore::new(
        Box::new(FsEncodingStore::new(config.data_dir.clone())),
        cache,
        config.cache_ttl,
    );
    let policy = ServicePolicy {
        tolerance: config.tolerance,
        model: config.model.clone(),
        enroll_jitters: config.enroll_jitters,
        verify_jitters: config.verify_jitters,
    };
    let service = FaceService::new(store, backend, policy);

    let host = cli.host.unwrap_or(config.host);
    let port = cli.port.unwrap_or(config.port);
    let addr: SocketAddr =
        format!("{host}:{port}")
            .parse()
            .map_err(|err: std::net::AddrParseError| StartupError::Addr {
                value: format!("{host}:{port}"),
                message: err.to_string(),
            })?;

    info!(
        %addr,
        tolerance = config.tolerance,
        model = %config.model,
        "starting face verification service"
    );
    serve(addr, AppState::new(service)).await?;
    Ok(())
}

#[cfg(feature = "dlib")]
fn build_backend(
    config: &ResolvedConfig,
) -> Result<Box<dyn FaceEncodingBackend + Send + Sync>, StartupError> {
    use facegate_core::faces::{resolve_model_paths, DlibBackend};

    let paths = resolve_model_paths(
        config.landmark_model.clone(),
        config.encoder_model.clone(),
    )?;
    Ok(Box::new(DlibBackend::new(&paths)?))
}

#[cfg(not(feature = "dlib"))]
fn build_backend(
    _config: &ResolvedConfig,
) -> Result<Box<dyn FaceEncodingBackend + Send + Sync>, StartupError> {
    Err(StartupError::NoBackend)
}

fn build_cache(config: &ResolvedConfig) -> Option<Box<dyn EncodingCache + Send + Sync>> {
    let settings = config.cache.as_ref()?;
    match RedisEncodingCache::connect(
        &settings.host,
        settings.port,
        settings.password.as_deref(),
        settings.db,
    ) {
        Ok(cache) => {
            match cache.ping() {
                Ok(()) => {
                    info!(host = %settings.host, port = settings.port, "connected to encoding cache")
                }
                Err(err) => warn!(
                    host = %settings.host,
                    error = %err,
                    "encoding cache unreachable; operations continue durable-only"
                ),
            }
            Some(Box::new(cache))
        }
        Err(err) => {
            warn!(error = %err, "invalid cache configuration, caching disabled");
            None
        }
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let fmt_layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(env_filter);

    let registry = tracing_subscriber::registry().with(fmt_layer);
    if tracing::subscriber::set_global_default(registry).is_err() {
        // Already initialised (tests).
    }
}
