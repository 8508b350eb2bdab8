use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use ferry_transfer::{Storage, TracingLogger, TransferConfig, TransferError, run_receiver};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ferry_client=info,ferry_transfer=info".into()),
        )
        .init();

    // Config
    let server = std::env::var("FERRY_SERVER").unwrap_or_else(|_| "127.0.0.1:12345".into());
    let output_dir: PathBuf = std::env::var("FERRY_OUTPUT_DIR")
        .unwrap_or_else(|_| ".".into())
        .into();
    let identifier = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "sample.txt".into());
    let config = TransferConfig::from_env()?;

    let storage = Storage::new(output_dir).await?;

    let stream = TcpStream::connect(&server)
        .await
        .with_context(|| format!("connecting to {}", server))?;
    stream.set_nodelay(true)?;
    info!("Connected to {}, requesting {:?}", server, identifier);

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received Ctrl+C, aborting transfer...");
                cancel.cancel();
            }
        }
    });

    let outcome = run_receiver(
        stream,
        &identifier,
        &storage,
        &config,
        cancel,
        Arc::new(TracingLogger),
    )
    .await;

    match outcome {
        Ok(received) => {
            info!(
                "Transfer successful, checksum matched: {} ({} bytes, {} chunks) -> {}",
                received.identifier,
                received.total_bytes,
                received.manifest.chunk_count,
                received.output_path.display()
            );
            Ok(())
        }
        Err(TransferError::ChecksumMismatch {
            expected,
            actual,
            output,
        }) => {
            error!(
                "Transfer failed, checksum mismatch: expected {} got {} (output left at {})",
                expected,
                actual,
                output.display()
            );
            std::process::exit(1);
        }
        Err(e) => {
            error!("Transfer failed: {}", e);
            std::process::exit(1);
        }
    }
}
