//! Error types shared by the sending and receiving halves of a drop.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

use crate::cipher::CipherError;

/// Failures of the framed transport underneath a transfer.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("stream i/o failed: {0}")]
    Io(#[from] io::Error),

    #[error("can't encode or decode frame: {0}")]
    Codec(#[from] bincode::Error),

    #[error("frame of {0} bytes exceeds the protocol limit")]
    FrameTooLarge(usize),

    #[error("unexpected message: {0}")]
    UnexpectedMessage(String),

    #[error("can't finish stream: {0}")]
    Finish(#[from] quinn::ClosedStream),

    #[error("can't connect: {0}")]
    Connect(#[from] quinn::ConnectError),

    #[error("connection lost: {0}")]
    Connection(#[from] quinn::ConnectionError),
}

/// Problems with the header that precedes the first chunk.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MetadataError {
    #[error("incorrect meta")]
    Unavailable,

    #[error("no filename in meta")]
    MissingFilename,

    #[error("no iv in meta")]
    MissingIv,

    #[error("can't decode iv")]
    InvalidIv,
}

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("drop code is incorrect")]
    InvalidPairingCode,

    #[error("file already requested")]
    AlreadyRequested,

    #[error("can't open file {}: {source}", path.display())]
    SourceUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("can't read chunk: {0}")]
    SourceRead(#[source] io::Error),

    #[error("can't send chunk: {0}")]
    SinkFailure(#[source] TransportError),

    #[error("can't receive chunk: {0}")]
    ReceiveFailure(#[source] TransportError),

    #[error(transparent)]
    IncorrectMetadata(#[from] MetadataError),

    #[error("can't write {}: {source}", path.display())]
    DestinationWriteFailure {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Cipher(#[from] CipherError),

    #[error("no drop answering at {addr}")]
    PeerUnreachable { addr: SocketAddr },

    #[error("remote side failed: {0}")]
    Remote(String),
}

impl TransferError {
    pub(crate) fn destination(path: impl Into<PathBuf>, source: io::Error) -> Self {
        TransferError::DestinationWriteFailure {
            path: path.into(),
            source,
        }
    }
}
