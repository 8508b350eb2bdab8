use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use ferry_transfer::{Storage, TracingLogger, TransferConfig, TransferError, TransferLogger, run_sender};

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ferry_server=debug,ferry_transfer=info".into()),
        )
        .init();

    // Config
    let host = std::env::var("FERRY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("FERRY_PORT")
        .unwrap_or_else(|_| "12345".into())
        .parse()
        .context("FERRY_PORT must be a port number")?;
    let serve_dir: PathBuf = std::env::var("FERRY_SERVE_DIR")
        .unwrap_or_else(|_| ".".into())
        .into();
    let config = TransferConfig::from_env()?;

    let storage = Storage::new(serve_dir).await?;
    let logger: Arc<dyn TransferLogger> = Arc::new(TracingLogger);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    info!("Ferry server listening on {}", addr);
    info!(
        "Chunk size: {} bytes, step timeout: {:?}",
        config.chunk_size, config.step_timeout
    );

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.cancel();
        }
    });

    // One session at a time: the next connection waits in the backlog.
    while let Some((stream, peer)) = accept_next(&listener, &shutdown).await {
        info!("Connection established with {}", peer);
        if let Err(e) = tune_socket(&stream) {
            warn!("Could not set socket options for {}: {}", peer, e);
        }

        match run_sender(stream, &storage, &config, shutdown.child_token(), logger.clone()).await {
            Ok(sent) => info!(
                "File transfer complete: {} ({} bytes, {} chunks) to {}",
                sent.identifier, sent.total_bytes, sent.manifest.chunk_count, peer
            ),
            Err(TransferError::ResourceNotFound { identifier }) => {
                warn!("{} requested missing file {:?}", peer, identifier)
            }
            Err(e) => warn!("Transfer to {} failed: {}", peer, e),
        }
    }

    info!("Ferry server stopped");
    Ok(())
}

/// Wait for the next connection, or `None` once shutdown is requested.
async fn accept_next(
    listener: &TcpListener,
    shutdown: &CancellationToken,
) -> Option<(TcpStream, SocketAddr)> {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return None,
            accepted = listener.accept() => match accepted {
                Ok(conn) => return Some(conn),
                Err(e) => {
                    error!("Accept error: {}", e);
                    // Brief backoff so a persistent error (EMFILE) doesn't spin.
                    tokio::select! {
                        _ = shutdown.cancelled() => return None,
                        _ = tokio::time::sleep(ACCEPT_BACKOFF) => {}
                    }
                }
            },
        }
    }
}

/// Lock-step exchanges send many small frames; don't let Nagle hold them back.
fn tune_socket(stream: &TcpStream) -> std::io::Result<()> {
    let sock_ref = socket2::SockRef::from(stream);
    sock_ref.set_nodelay(true)?;
    sock_ref.set_keepalive(true)?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
