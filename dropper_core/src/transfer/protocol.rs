//! Wire protocol: length-prefixed `bincode` frames on one bidirectional stream.
//!
//! ```text
//! requester                     offering side
//!   Ping            ------>
//!                   <------     Pong
//!   GetFile{code}   ------>
//!                   <------     Header{metadata} | Error{InvalidCode}
//!                   <------     Chunk ... Chunk
//!                   <------     End | Error
//! ```

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::constants::MAX_FRAME_LEN;
use super::metadata::ChunkMetadata;
use crate::error::{MetadataError, TransferError, TransportError};

const INTERNAL_ERROR_MESSAGE: &str = "offering side failed to send the file";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    InvalidCode,
    AlreadyRequested,
    Internal,
}

/// Protocol messages between requester and offering side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DropMsg {
    Ping,
    Pong,
    GetFile { drop_code: String },
    Header { metadata: HashMap<String, String> },
    Chunk(Bytes),
    End,
    Error { kind: ErrorKind, message: String },
}

impl DropMsg {
    /// What the requester is told when serving its request failed. Local
    /// details (paths, os errors) stay on the offering side.
    pub fn error_for(err: &TransferError) -> Self {
        let (kind, message) = match err {
            TransferError::InvalidPairingCode => (ErrorKind::InvalidCode, err.to_string()),
            TransferError::AlreadyRequested => (ErrorKind::AlreadyRequested, err.to_string()),
            _ => (ErrorKind::Internal, INTERNAL_ERROR_MESSAGE.to_string()),
        };
        DropMsg::Error { kind, message }
    }

    fn into_transfer_error(kind: ErrorKind, message: String) -> TransferError {
        match kind {
            ErrorKind::InvalidCode => TransferError::InvalidPairingCode,
            ErrorKind::AlreadyRequested => TransferError::AlreadyRequested,
            ErrorKind::Internal => TransferError::Remote(message),
        }
    }
}

/// Send a protocol message
pub async fn send_msg<W>(send: &mut W, msg: &DropMsg) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    let payload = bincode::serialize(msg)?;
    if payload.len() > MAX_FRAME_LEN {
        return Err(TransportError::FrameTooLarge(payload.len()));
    }
    let len = (payload.len() as u32).to_be_bytes();
    send.write_all(&len).await?;
    send.write_all(&payload).await?;
    Ok(())
}

/// Receive a protocol message
pub async fn recv_msg<R>(recv: &mut R) -> Result<DropMsg, TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    recv.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(TransportError::FrameTooLarge(len));
    }

    let mut buf = vec![0u8; len];
    recv.read_exact(&mut buf).await?;

    Ok(bincode::deserialize(&buf)?)
}

/// Where the sender puts a transfer: the header once, then chunks in order.
pub trait ChunkSink {
    fn send_metadata(
        &mut self,
        metadata: ChunkMetadata,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn send_chunk(&mut self, chunk: Bytes) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Signal end-of-data after the last chunk.
    fn finish(&mut self) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// What the receiver reads a transfer from.
pub trait ChunkStream {
    /// The raw header. Called once, before the first `next_chunk`.
    fn metadata(
        &mut self,
    ) -> impl Future<Output = Result<HashMap<String, String>, TransferError>> + Send;

    /// The next chunk, or `None` once the sender signalled end-of-data.
    fn next_chunk(&mut self) -> impl Future<Output = Result<Option<Bytes>, TransferError>> + Send;
}

/// `ChunkSink` writing `DropMsg` frames.
pub struct FrameSink<W> {
    inner: W,
}

impl<W> FrameSink<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }
}

impl<W> ChunkSink for FrameSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn send_metadata(&mut self, metadata: ChunkMetadata) -> Result<(), TransportError> {
        let msg = DropMsg::Header {
            metadata: metadata.into_map(),
        };
        send_msg(&mut self.inner, &msg).await
    }

    async fn send_chunk(&mut self, chunk: Bytes) -> Result<(), TransportError> {
        send_msg(&mut self.inner, &DropMsg::Chunk(chunk)).await
    }

    async fn finish(&mut self) -> Result<(), TransportError> {
        send_msg(&mut self.inner, &DropMsg::End).await?;
        self.inner.flush().await?;
        Ok(())
    }
}

/// `ChunkStream` reading `DropMsg` frames.
pub struct FrameStream<R> {
    inner: R,
}

impl<R> FrameStream<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }
}

impl<R> ChunkStream for FrameStream<R>
where
    R: AsyncRead + Unpin + Send,
{
    async fn metadata(&mut self) -> Result<HashMap<String, String>, TransferError> {
        match recv_msg(&mut self.inner).await {
            Ok(DropMsg::Header { metadata }) => Ok(metadata),
            Ok(DropMsg::Error { kind, message }) => Err(DropMsg::into_transfer_error(kind, message)),
            Ok(other) => {
                tracing::debug!("expected header, got {:?}", other);
                Err(MetadataError::Unavailable.into())
            }
            Err(e) => {
                tracing::debug!("can't read header: {}", e);
                Err(MetadataError::Unavailable.into())
            }
        }
    }

    async fn next_chunk(&mut self) -> Result<Option<Bytes>, TransferError> {
        match recv_msg(&mut self.inner).await {
            Ok(DropMsg::Chunk(chunk)) => Ok(Some(chunk)),
            Ok(DropMsg::End) => Ok(None),
            Ok(DropMsg::Error { kind, message }) => Err(DropMsg::into_transfer_error(kind, message)),
            Ok(other) => Err(TransferError::ReceiveFailure(
                TransportError::UnexpectedMessage(format!("{:?}", other)),
            )),
            Err(e) => Err(TransferError::ReceiveFailure(e)),
        }
    }
}
