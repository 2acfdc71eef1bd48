//! Chunked file transfer over QUIC.
//!
//! - `sender` / `receiver`: the two halves of one transfer, written against
//!   the `ChunkSink` / `ChunkStream` traits in `protocol`
//! - `quic`: endpoints with self-signed certificates
//! - `server` / `client`: the offering and requesting sides on top of QUIC

pub mod client;
pub mod constants;
pub mod metadata;
pub mod protocol;
pub mod quic;
pub mod receiver;
pub mod sender;
pub mod server;
pub mod utils;

pub use client::{fetch_file, ping};
pub use constants::{DEFAULT_CHUNK_SIZE, PING_TIMEOUT, TRANSFER_PORT};
pub use metadata::ChunkMetadata;
pub use protocol::{ChunkSink, ChunkStream, DropMsg, FrameSink, FrameStream};
pub use quic::{make_client_endpoint, make_server_endpoint};
pub use receiver::ChunkedTransferReceiver;
pub use sender::{ChunkedTransferSender, LatchState, TransferReport};
pub use server::run_server;
