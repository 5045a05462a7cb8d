mod debug;
mod services;

use clap::Parser;
use procri_image::ImageRegistry;
use procri_runtime::RuntimeService;
use procri_store::DiskStore;
use procri_streaming::StreamingBridge;
use services::{ImageServiceGrpc, RuntimeServiceGrpc};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::UnixListener;
use tokio::signal;
use tokio_stream::wrappers::UnixListenerStream;
use tonic::transport::Server;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "procri", version)]
#[command(about = "CRI shim that runs pod containers as plain host processes")]
struct Cli {
    /// Port used for streaming
    #[arg(long, default_value_t = 8099)]
    streaming_port: u16,

    /// The socket to listen on, e.g. /var/run/procri.sock
    #[arg(long, default_value = "/var/run/procri.sock")]
    listen: PathBuf,

    /// Directory for persisting data
    #[arg(long, default_value = "/tmp/procri-data.noindex")]
    data_store: PathBuf,

    /// Raise log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let default_directive = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_directive)),
        )
        .init();

    tracing::debug!("creating data store at base path {:?}", cli.data_store);
    create_data_store_root(&cli.data_store)?;

    let ip_address = procri_runtime::host_ip_address();
    let streaming_addr = format!("{}:{}", ip_address, cli.streaming_port);
    tracing::info!("streaming requests will be served on {}", streaming_addr);
    let streaming = Arc::new(StreamingBridge::new(&streaming_addr));

    let image_store = DiskStore::new(cli.data_store.join("imageservice")).await?;
    let image_registry = Arc::new(ImageRegistry::new(image_store));

    let runtime_store = DiskStore::new(cli.data_store.join("runtimeService")).await?;
    let runtime = Arc::new(
        RuntimeService::new(
            streaming,
            ip_address,
            runtime_store,
            env!("CARGO_PKG_VERSION").to_string(),
        )
        .await?,
    );

    if std::env::var("PPROF_DEBUG").is_ok_and(|v| !v.is_empty()) {
        tokio::spawn(debug::serve_pprof());
    }

    // A previous instance may have left its socket behind.
    match std::fs::remove_file(&cli.listen) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::error!("unlinking {}: {}", cli.listen.display(), e);
            return Err(e.into());
        }
    }

    tracing::info!("starting gRPC server at {}", cli.listen.display());
    let listener = UnixListener::bind(&cli.listen)?;
    let incoming = UnixListenerStream::new(listener);

    Server::builder()
        .add_service(procri_core::RuntimeServiceServer::new(
            RuntimeServiceGrpc::new(runtime),
        ))
        .add_service(procri_core::ImageServiceServer::new(ImageServiceGrpc::new(
            image_registry,
        )))
        .serve_with_incoming_shutdown(incoming, async {
            signal::ctrl_c()
                .await
                .expect("failed to listen for ctrl-c");
            tracing::info!("received shutdown signal, stopping server");
        })
        .await?;

    Ok(())
}

fn create_data_store_root(path: &PathBuf) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o755)
        .create(path)
}
