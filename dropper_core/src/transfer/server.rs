use anyhow::{Result, anyhow};
use quinn::{Connection, Endpoint, RecvStream, SendStream};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use super::constants::FLUSH_TIMEOUT;
use super::protocol::{DropMsg, FrameSink, recv_msg, send_msg};
use crate::error::TransferError;
use crate::session::TransferSession;

/// Serve `session` on `endpoint` until its completion signal fires, then wait
/// for in-flight streams, close the endpoint and drain it.
pub async fn run_server(endpoint: Endpoint, session: Arc<TransferSession>) -> Result<()> {
    if let Ok(addr) = endpoint.local_addr() {
        info!("serving {} on {}", session.source().display(), addr);
    }

    let tracker = TaskTracker::new();
    let completion = session.completion().clone();

    loop {
        let incoming = tokio::select! {
            _ = completion.wait() => break,
            incoming = endpoint.accept() => match incoming {
                Some(incoming) => incoming,
                None => break,
            },
        };

        let session = session.clone();
        let streams = tracker.clone();
        tracker.spawn(async move {
            match incoming.await {
                Ok(connection) => handle_connection(connection, session, streams).await,
                Err(e) => warn!("QUIC connection error: {}", e),
            }
        });
    }

    tracker.close();
    tracker.wait().await;

    endpoint.close(0u32.into(), b"drop complete");
    endpoint.wait_idle().await;
    info!("server stopped");
    Ok(())
}

async fn handle_connection(connection: Connection, session: Arc<TransferSession>, tracker: TaskTracker) {
    let remote_addr = connection.remote_address();
    debug!("connection from {}", remote_addr);

    loop {
        let (send, recv) = tokio::select! {
            _ = session.completion().wait() => break,
            stream = connection.accept_bi() => match stream {
                Ok(stream) => stream,
                Err(e) => {
                    debug!("connection from {} ended: {}", remote_addr, e);
                    break;
                }
            },
        };

        let session = session.clone();
        tracker.spawn(async move {
            if let Err(e) = handle_stream(send, recv, &session, remote_addr).await {
                warn!("stream from {} failed: {:#}", remote_addr, e);
            }
        });
    }
}

async fn handle_stream(
    mut send: SendStream,
    mut recv: RecvStream,
    session: &TransferSession,
    remote_addr: SocketAddr,
) -> Result<()> {
    let msg = tokio::select! {
        _ = session.completion().wait() => return Ok(()),
        msg = recv_msg(&mut recv) => msg?,
    };

    match msg {
        DropMsg::Ping => {
            debug!("ping from {}", remote_addr);
            send_msg(&mut send, &DropMsg::Pong).await?;
        }
        DropMsg::GetFile { drop_code } => {
            info!("file requested by {}", remote_addr);
            let mut sink = FrameSink::new(&mut send);
            match session.serve(&drop_code, &mut sink).await {
                Ok(_) => {}
                // the stream itself is gone, nobody to tell
                Err(TransferError::SinkFailure(e)) => return Err(e.into()),
                Err(e) => send_msg(&mut send, &DropMsg::error_for(&e)).await?,
            }
        }
        other => return Err(anyhow!("unexpected first message: {:?}", other)),
    }

    send.finish()?;
    // Give the requester a moment to read everything before the endpoint closes
    let _ = tokio::time::timeout(FLUSH_TIMEOUT, send.stopped()).await;
    Ok(())
}
