use quinn::{Connection, Endpoint};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use super::protocol::{DropMsg, FrameStream, recv_msg, send_msg};
use super::receiver::ChunkedTransferReceiver;
use crate::error::{TransferError, TransportError};

/// Unary liveness check on a fresh stream.
pub async fn ping(connection: &Connection) -> Result<(), TransportError> {
    let (mut send, mut recv) = connection.open_bi().await?;
    send_msg(&mut send, &DropMsg::Ping).await?;
    send.finish()?;

    match recv_msg(&mut recv).await? {
        DropMsg::Pong => Ok(()),
        other => Err(TransportError::UnexpectedMessage(format!("{:?}", other))),
    }
}

async fn connect_and_ping(endpoint: &Endpoint, addr: SocketAddr) -> Result<Connection, TransportError> {
    let connection = endpoint.connect(addr, "localhost")?.await?;
    ping(&connection).await?;
    Ok(connection)
}

/// Ask the drop at `addr` for its file and save it under `destination_dir`.
///
/// Dialing and the ping must both finish within `ping_timeout`; the transfer
/// itself is not bounded.
pub async fn fetch_file(
    endpoint: &Endpoint,
    addr: SocketAddr,
    code: &str,
    receiver: &ChunkedTransferReceiver,
    destination_dir: &Path,
    ping_timeout: Duration,
) -> Result<PathBuf, TransferError> {
    let connection = match tokio::time::timeout(ping_timeout, connect_and_ping(endpoint, addr)).await {
        Ok(Ok(connection)) => connection,
        Ok(Err(e)) => {
            debug!("can't reach {}: {}", addr, e);
            return Err(TransferError::PeerUnreachable { addr });
        }
        Err(_) => {
            debug!("no answer from {} within {:?}", addr, ping_timeout);
            return Err(TransferError::PeerUnreachable { addr });
        }
    };
    info!("connected to {}", addr);

    let result = request(&connection, code, receiver, destination_dir).await;
    connection.close(0u32.into(), b"done");
    result
}

async fn request(
    connection: &Connection,
    code: &str,
    receiver: &ChunkedTransferReceiver,
    destination_dir: &Path,
) -> Result<PathBuf, TransferError> {
    let (mut send, recv) = connection
        .open_bi()
        .await
        .map_err(|e| TransferError::SinkFailure(e.into()))?;

    let msg = DropMsg::GetFile {
        drop_code: code.to_string(),
    };
    send_msg(&mut send, &msg)
        .await
        .map_err(TransferError::SinkFailure)?;
    send.finish()
        .map_err(|e| TransferError::SinkFailure(e.into()))?;

    let mut stream = FrameStream::new(recv);
    receiver.receive_and_save(&mut stream, destination_dir).await
}
