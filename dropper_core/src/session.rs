//! One drop: a pairing authority, a source artifact and a single-fire
//! completion signal that tells the server when to stop.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::TransferError;
use crate::pairing::{PairingCode, PairingCodeAuthority, PairingError};
use crate::transfer::protocol::ChunkSink;
use crate::transfer::sender::{ChunkedTransferSender, TransferReport};

/// Fires at most once. Clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct CompletionSignal {
    fired: Arc<AtomicBool>,
    token: CancellationToken,
}

impl CompletionSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` only for the call that actually fired the signal.
    pub fn fire(&self) -> bool {
        if self
            .fired
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        self.token.cancel();
        true
    }

    pub fn is_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    /// Resolves once fired, immediately if that already happened.
    pub async fn wait(&self) {
        self.token.cancelled().await
    }
}

#[derive(Debug)]
pub struct TransferSession {
    authority: PairingCodeAuthority,
    source: PathBuf,
    sender: ChunkedTransferSender,
    completion: CompletionSignal,
}

impl TransferSession {
    pub fn new(source: impl Into<PathBuf>, sender: ChunkedTransferSender) -> Self {
        Self {
            authority: PairingCodeAuthority::new(),
            source: source.into(),
            sender,
            completion: CompletionSignal::new(),
        }
    }

    /// Issue the code for this host's outbound address.
    pub fn issue_code(&self) -> Result<PairingCode, PairingError> {
        self.authority.issue_code()
    }

    pub fn issue_code_for(&self, ip: Ipv4Addr) -> PairingCode {
        self.authority.issue_code_for(ip)
    }

    pub fn completion(&self) -> &CompletionSignal {
        &self.completion
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Answer one get-file request.
    ///
    /// A wrong code leaves the session untouched. Any request carrying the
    /// right code fires the completion signal once `send_once` returns,
    /// whatever its outcome.
    pub async fn serve<S>(&self, presented: &str, sink: &mut S) -> Result<TransferReport, TransferError>
    where
        S: ChunkSink + Send,
    {
        if !self.authority.validate_code(presented) {
            warn!("rejected drop code {:?}", presented);
            return Err(TransferError::InvalidPairingCode);
        }

        let result = self.sender.send_once(&self.source, sink).await;
        match &result {
            Ok(report) => info!(
                "sent {} ({} bytes in {} chunks)",
                self.source.display(),
                report.bytes,
                report.chunks
            ),
            Err(TransferError::AlreadyRequested) => {}
            Err(e) => error!("transfer of {} failed: {}", self.source.display(), e),
        }

        if self.completion.fire() {
            info!("drop session complete");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::transfer::metadata::ChunkMetadata;
    use bytes::Bytes;
    use std::num::NonZeroUsize;
    use std::time::Duration;

    #[derive(Default)]
    struct CountingSink {
        chunks: usize,
        finished: bool,
    }

    impl ChunkSink for CountingSink {
        async fn send_metadata(&mut self, _metadata: ChunkMetadata) -> Result<(), TransportError> {
            Ok(())
        }

        async fn send_chunk(&mut self, _chunk: Bytes) -> Result<(), TransportError> {
            self.chunks += 1;
            Ok(())
        }

        async fn finish(&mut self) -> Result<(), TransportError> {
            self.finished = true;
            Ok(())
        }
    }

    fn session_for(dir: &Path, content: &[u8]) -> TransferSession {
        let path = dir.join("payload.bin");
        std::fs::write(&path, content).unwrap();
        let sender = ChunkedTransferSender::new(NonZeroUsize::new(4).unwrap(), None);
        TransferSession::new(path, sender)
    }

    #[tokio::test]
    async fn test_signal_fires_once() {
        let signal = CompletionSignal::new();
        assert!(!signal.is_fired());
        assert!(signal.fire());
        assert!(!signal.fire());
        assert!(signal.is_fired());

        // already fired: resolves immediately
        tokio::time::timeout(Duration::from_millis(100), signal.wait())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_wakes_clones() {
        let signal = CompletionSignal::new();
        let waiter = signal.clone();
        let handle = tokio::spawn(async move { waiter.wait().await });

        signal.fire();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_wrong_code_then_right_code() {
        let dir = tempfile::tempdir().unwrap();
        let session = session_for(dir.path(), b"0123456789");
        let code = session.issue_code_for(Ipv4Addr::new(192, 168, 1, 73));
        let secret = &code.as_str()[2..];
        let wrong = if secret == "10" { "7311" } else { "7310" };

        let mut sink = CountingSink::default();
        let err = session.serve(wrong, &mut sink).await.unwrap_err();
        assert!(matches!(err, TransferError::InvalidPairingCode));
        assert_eq!(sink.chunks, 0);
        assert!(!session.completion().is_fired());

        let report = session.serve(code.as_str(), &mut sink).await.unwrap();
        assert_eq!(report.bytes, 10);
        assert_eq!(sink.chunks, 3);
        assert!(sink.finished);
        assert!(session.completion().is_fired());
    }

    #[tokio::test]
    async fn test_second_valid_request_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let session = session_for(dir.path(), b"abc");
        let code = session.issue_code_for(Ipv4Addr::new(10, 0, 0, 5));

        let mut first = CountingSink::default();
        session.serve(code.as_str(), &mut first).await.unwrap();

        let mut second = CountingSink::default();
        let err = session.serve(code.as_str(), &mut second).await.unwrap_err();
        assert!(matches!(err, TransferError::AlreadyRequested));
        assert_eq!(second.chunks, 0);
    }

    #[tokio::test]
    async fn test_failed_send_still_completes() {
        let dir = tempfile::tempdir().unwrap();
        let sender = ChunkedTransferSender::new(NonZeroUsize::new(4).unwrap(), None);
        let session = TransferSession::new(dir.path().join("gone.bin"), sender);
        let code = session.issue_code_for(Ipv4Addr::new(10, 0, 0, 5));

        let err = session
            .serve(code.as_str(), &mut CountingSink::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::SourceUnavailable { .. }));
        assert!(session.completion().is_fired());
    }

    #[tokio::test]
    async fn test_never_served_never_fires() {
        let dir = tempfile::tempdir().unwrap();
        let session = session_for(dir.path(), b"abc");
        session.issue_code_for(Ipv4Addr::new(10, 0, 0, 5));

        let waited = tokio::time::timeout(Duration::from_millis(50), session.completion().wait()).await;
        assert!(waited.is_err());
        assert!(!session.completion().is_fired());
    }
}
