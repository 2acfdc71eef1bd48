use bytes::{Bytes, BytesMut};
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, warn};

use super::constants::MAX_CHUNK_SIZE;
use super::metadata::ChunkMetadata;
use super::protocol::ChunkSink;
use super::utils::sanitize_file_name;
use crate::cipher::StreamCipherCodec;
use crate::error::TransferError;

const UNSTARTED: u8 = 0;
const IN_PROGRESS: u8 = 1;
const DONE: u8 = 2;

/// Where the single permitted send stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatchState {
    Unstarted,
    InProgress,
    Done,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferReport {
    pub bytes: u64,
    pub chunks: u64,
}

/// Streams one source as chunks, at most once over its whole lifetime.
#[derive(Debug)]
pub struct ChunkedTransferSender {
    chunk_size: NonZeroUsize,
    cipher: Mutex<Option<StreamCipherCodec>>,
    state: AtomicU8,
}

/// Moves the latch to `Done` however the send ends, including cancellation.
struct LatchRelease<'a>(&'a AtomicU8);

impl Drop for LatchRelease<'_> {
    fn drop(&mut self) {
        self.0.store(DONE, Ordering::Release);
    }
}

impl ChunkedTransferSender {
    /// `chunk_size` is clamped to `MAX_CHUNK_SIZE` so every chunk fits in a frame.
    pub fn new(chunk_size: NonZeroUsize, cipher: Option<StreamCipherCodec>) -> Self {
        let chunk_size = NonZeroUsize::new(chunk_size.get().min(MAX_CHUNK_SIZE)).unwrap_or(chunk_size);
        Self {
            chunk_size,
            cipher: Mutex::new(cipher),
            state: AtomicU8::new(UNSTARTED),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size.get()
    }

    pub fn is_encrypted(&self) -> bool {
        self.cipher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn state(&self) -> LatchState {
        match self.state.load(Ordering::Acquire) {
            UNSTARTED => LatchState::Unstarted,
            IN_PROGRESS => LatchState::InProgress,
            _ => LatchState::Done,
        }
    }

    /// Send `source` to `sink`. Only the first call ever does any work; every
    /// other call, concurrent or later, gets `AlreadyRequested` straight away.
    pub async fn send_once<S>(&self, source: &Path, sink: &mut S) -> Result<TransferReport, TransferError>
    where
        S: ChunkSink + Send,
    {
        if self
            .state
            .compare_exchange(UNSTARTED, IN_PROGRESS, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("file already requested");
            return Err(TransferError::AlreadyRequested);
        }
        let _release = LatchRelease(&self.state);
        debug!("sending {} in chunks of {} bytes", source.display(), self.chunk_size());

        let cipher = self
            .cipher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let file = File::open(source)
            .await
            .map_err(|e| TransferError::SourceUnavailable {
                path: source.to_path_buf(),
                source: e,
            })?;

        let filename = source
            .file_name()
            .map(|n| sanitize_file_name(&n.to_string_lossy()))
            .unwrap_or_else(|| sanitize_file_name(""));
        let mut metadata = ChunkMetadata::new(filename);
        if let Some(codec) = &cipher {
            metadata = metadata.with_iv(codec.encoded_iv());
        }

        self.stream_chunks(file, metadata, cipher, sink).await
    }

    async fn stream_chunks<R, S>(
        &self,
        mut reader: R,
        metadata: ChunkMetadata,
        mut cipher: Option<StreamCipherCodec>,
        sink: &mut S,
    ) -> Result<TransferReport, TransferError>
    where
        R: AsyncRead + Unpin,
        S: ChunkSink + Send,
    {
        sink.send_metadata(metadata)
            .await
            .map_err(TransferError::SinkFailure)?;

        let chunk_size = self.chunk_size.get();
        let mut report = TransferReport::default();

        loop {
            let mut buf = BytesMut::zeroed(chunk_size);
            let n = read_chunk(&mut reader, &mut buf)
                .await
                .map_err(TransferError::SourceRead)?;
            if n == 0 {
                break;
            }
            buf.truncate(n);

            if let Some(codec) = cipher.as_mut() {
                codec.apply(&mut buf);
            }

            let chunk: Bytes = buf.freeze();
            sink.send_chunk(chunk)
                .await
                .map_err(TransferError::SinkFailure)?;

            report.bytes += n as u64;
            report.chunks += 1;
            debug!("sent chunk {} ({} bytes)", report.chunks, n);

            if n < chunk_size {
                break;
            }
        }

        sink.finish().await.map_err(TransferError::SinkFailure)?;
        Ok(report)
    }
}

/// Fill `buf` from `reader`, stopping early only at end-of-source.
async fn read_chunk<R>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
