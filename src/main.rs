//! cuda-platform: CUDA device capability resolver.
//!
//! Reports the compute capability of logical GPUs from the command line or
//! over HTTP. Honours `CUDA_VISIBLE_DEVICES` and never creates a CUDA context.

use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;

use cuda_platform::config::{Cli, Command, Config, StubCluster};
use cuda_platform::gpu::stub::StubLibrary;
use cuda_platform::platform::{detect_platform, CudaPlatform, Platform};
use cuda_platform::server::device_api::{build_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments.
    let cli = Cli::parse();

    // Initialize tracing/logging.
    let filter = if cli.verbose {
        "cuda_platform=debug,tower_http=debug"
    } else {
        "cuda_platform=info,tower_http=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    info!("cuda-platform v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration.
    let config = Config::load(&cli.config)?;

    info!(
        cache_capacity = config.capability.cache_capacity,
        visible_devices_env = %config.capability.visible_devices_env,
        "Configuration loaded"
    );

    let platform: Arc<dyn Platform> = match cli.stub {
        Some(cluster) => {
            let library = match cluster {
                StubCluster::Molly => StubLibrary::molly(),
                StubCluster::Wintermute => StubLibrary::wintermute(),
            };
            info!(cluster = ?cluster, "Using stub management library");
            let platform: Arc<dyn Platform> =
                Arc::new(CudaPlatform::new(library, config.capability.clone())?);
            platform
        }
        None => detect_platform(&config.capability),
    };

    match cli.command {
        Command::Capability { device, json } => {
            let cap = platform.get_device_capability(device)?;
            if json {
                println!("{}", serde_json::to_string(&cap)?);
            } else {
                println!("{cap}");
            }
        }
        Command::Resolve { device } => {
            println!("{}", platform.physical_device_id(device)?);
        }
        Command::Serve { listen } => {
            let state = Arc::new(AppState {
                platform,
                start_time: Instant::now(),
            });

            // Build the HTTP router.
            let app = build_router(state);

            // Start the server.
            let listen_addr = listen.unwrap_or(config.server.listen);
            info!(addr = %listen_addr, "Starting server");

            let listener = TcpListener::bind(&listen_addr).await?;
            info!("Listening on {listen_addr}");

            axum::serve(listener, app).await?;
        }
    }

    Ok(())
}
