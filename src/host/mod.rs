pub mod dispatch;
pub mod framing;
pub mod protocol;

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{error, info};

use crate::config::Config;
use self::dispatch::Host;
use self::framing::{read_frame, write_frame};

/// Serve the native-messaging protocol over arbitrary streams.
///
/// Requests are handled strictly in order; each frame produces exactly one
/// response frame. Returns `Ok` on clean peer disconnect and an error on a
/// framing violation (oversized or truncated frame), which tears the
/// process down so the extension reconnects.
pub async fn serve<R, W>(host: &mut Host, mut input: R, mut output: W) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        let frame = match read_frame(&mut input).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                info!("peer disconnected");
                return Ok(());
            }
            Err(e) => {
                error!(error = %e, "framing violation, terminating");
                return Err(e.into());
            }
        };
        let response = host.handle(&frame).await;
        let body = serde_json::to_vec(&response).context("response serialization")?;
        write_frame(&mut output, &body).await?;
    }
}

/// Run the host loop on stdin/stdout until disconnect or signal.
/// SIGINT/SIGTERM clear the session and exit cleanly.
pub async fn run(config: Config) -> Result<()> {
    let mut host = Host::new(&config);
    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();

    tokio::select! {
        res = serve(&mut host, stdin, stdout) => {
            host.shutdown();
            res
        }
        _ = wait_for_signal() => {
            info!("signal received, clearing session");
            host.shutdown();
            Ok(())
        }
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut term = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(_) => return std::future::pending::<()>().await,
    };
    let mut int = match signal(SignalKind::interrupt()) {
        Ok(s) => s,
        Err(_) => return std::future::pending::<()>().await,
    };
    tokio::select! {
        _ = term.recv() => {}
        _ = int.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
