use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::metadata::ChunkMetadata;
use super::protocol::ChunkStream;
use super::utils::{format_transfer_speed, open_partial_file, partial_file_name, sanitize_file_name};
use crate::cipher::{EncryptionKey, StreamCipherCodec};
use crate::error::{MetadataError, TransferError};

/// Rebuilds a dropped file from its chunks.
///
/// The download goes to a hidden `.<name>.part` sibling and is renamed onto
/// its final name only after end-of-data; any failure removes the partial
/// file, so the final name never holds a truncated artifact.
#[derive(Debug, Clone, Default)]
pub struct ChunkedTransferReceiver {
    key: Option<EncryptionKey>,
}

impl ChunkedTransferReceiver {
    pub fn new(key: Option<EncryptionKey>) -> Self {
        Self { key }
    }

    /// Receive a whole transfer into `destination_dir`, returning the path of
    /// the saved file. An existing file with the same name is replaced.
    pub async fn receive_and_save<S>(
        &self,
        source: &mut S,
        destination_dir: &Path,
    ) -> Result<PathBuf, TransferError>
    where
        S: ChunkStream + Send,
    {
        let raw = source.metadata().await?;
        let metadata = ChunkMetadata::from_map(&raw, self.key.is_some())?;

        let mut decoder = match (&self.key, &metadata.iv) {
            (Some(key), Some(iv)) => Some(
                StreamCipherCodec::from_encoded_iv(key, iv).map_err(|e| {
                    debug!("rejecting iv: {}", e);
                    MetadataError::InvalidIv
                })?,
            ),
            _ => None,
        };

        let file_name = sanitize_file_name(&metadata.filename);
        let final_path = destination_dir.join(&file_name);
        let partial_path = destination_dir.join(partial_file_name(&file_name));

        tokio::fs::create_dir_all(destination_dir)
            .await
            .map_err(|e| TransferError::destination(destination_dir, e))?;
        let mut file = open_partial_file(&partial_path)
            .await
            .map_err(|e| TransferError::destination(&partial_path, e))?;

        info!("receiving {}", file_name);
        let start_time = Instant::now();

        let received = match write_chunks(source, &mut file, decoder.as_mut(), &partial_path).await {
            Ok(received) => received,
            Err(e) => {
                drop(file);
                discard(&partial_path).await;
                return Err(e);
            }
        };

        drop(file);
        if let Err(e) = tokio::fs::rename(&partial_path, &final_path).await {
            discard(&partial_path).await;
            return Err(TransferError::destination(&final_path, e));
        }

        info!(
            "saved {} ({} bytes, {})",
            final_path.display(),
            received,
            format_transfer_speed(received, start_time.elapsed().as_secs_f64())
        );
        Ok(final_path)
    }
}

async fn write_chunks<S>(
    source: &mut S,
    file: &mut File,
    mut decoder: Option<&mut StreamCipherCodec>,
    path: &Path,
) -> Result<u64, TransferError>
where
    S: ChunkStream + Send,
{
    let mut received: u64 = 0;

    while let Some(chunk) = source.next_chunk().await? {
        let n = chunk.len();
        let written = match decoder.as_deref_mut() {
            Some(codec) => {
                let mut plain = chunk.to_vec();
                codec.apply(&mut plain);
                file.write_all(&plain).await
            }
            None => file.write_all(&chunk).await,
        };
        written.map_err(|e| TransferError::destination(path, e))?;

        received += n as u64;
        debug!("wrote chunk ({} bytes, {} total)", n, received);
    }

    file.flush()
        .await
        .map_err(|e| TransferError::destination(path, e))?;
    file.sync_all()
        .await
        .map_err(|e| TransferError::destination(path, e))?;
    Ok(received)
}

async fn discard(partial_path: &Path) {
    if let Err(e) = tokio::fs::remove_file(partial_path).await {
        warn!("can't remove partial file {}: {}", partial_path.display(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::IV_LEN;
    use crate::transfer::metadata::{FILENAME_KEY, IV_KEY};
    use bytes::Bytes;
    use std::collections::HashMap;
    use std::collections::VecDeque;

    /// Scripted stream: a header, then chunks, then either end-of-data or an error.
    struct ScriptedStream {
        metadata: Option<HashMap<String, String>>,
        chunks: VecDeque<Bytes>,
        fail_after_chunks: bool,
    }

    impl ScriptedStream {
        fn new(metadata: HashMap<String, String>, chunks: &[&[u8]]) -> Self {
            Self {
                metadata: Some(metadata),
                chunks: chunks.iter().map(|c| Bytes::copy_from_slice(c)).collect(),
                fail_after_chunks: false,
            }
        }

        fn failing(mut self) -> Self {
            self.fail_after_chunks = true;
            self
        }
    }

    impl ChunkStream for ScriptedStream {
        async fn metadata(&mut self) -> Result<HashMap<String, String>, TransferError> {
            self.metadata
                .take()
                .ok_or(TransferError::IncorrectMetadata(MetadataError::Unavailable))
        }

        async fn next_chunk(&mut self) -> Result<Option<Bytes>, TransferError> {
            match self.chunks.pop_front() {
                Some(chunk) => Ok(Some(chunk)),
                None if self.fail_after_chunks => Err(TransferError::ReceiveFailure(
                    std::io::Error::from(std::io::ErrorKind::ConnectionReset).into(),
                )),
                None => Ok(None),
            }
        }
    }

    fn header(filename: &str) -> HashMap<String, String> {
        HashMap::from([(FILENAME_KEY.to_string(), filename.to_string())])
    }

    fn entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_saves_chunks_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut stream = ScriptedStream::new(header("notes.txt"), &[b"hello ", b"lan ", b"drop"]);

        let saved = ChunkedTransferReceiver::default()
            .receive_and_save(&mut stream, dir.path())
            .await
            .unwrap();

        assert_eq!(saved, dir.path().join("notes.txt"));
        assert_eq!(std::fs::read(&saved).unwrap(), b"hello lan drop");
        assert_eq!(entries(dir.path()), vec!["notes.txt"]);
    }

    #[tokio::test]
    async fn test_missing_filename_creates_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut stream = ScriptedStream::new(HashMap::new(), &[b"data"]);

        let err = ChunkedTransferReceiver::default()
            .receive_and_save(&mut stream, dir.path())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            TransferError::IncorrectMetadata(MetadataError::MissingFilename)
        ));
        assert!(entries(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_missing_iv_with_key_creates_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let key: EncryptionKey = "0123456789abcdef".parse().unwrap();
        let mut stream = ScriptedStream::new(header("a.bin"), &[b"data"]);

        let err = ChunkedTransferReceiver::new(Some(key))
            .receive_and_save(&mut stream, dir.path())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            TransferError::IncorrectMetadata(MetadataError::MissingIv)
        ));
        assert!(entries(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_undecodable_iv_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let key: EncryptionKey = "0123456789abcdef".parse().unwrap();
        let mut metadata = header("a.bin");
        metadata.insert(IV_KEY.to_string(), "AAAA".to_string());
        let mut stream = ScriptedStream::new(metadata, &[]);

        let err = ChunkedTransferReceiver::new(Some(key))
            .receive_and_save(&mut stream, dir.path())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            TransferError::IncorrectMetadata(MetadataError::InvalidIv)
        ));
        assert!(entries(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_failure_midway_leaves_no_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let mut stream = ScriptedStream::new(header("movie.mkv"), &[b"part one", b"part two"]).failing();

        let err = ChunkedTransferReceiver::default()
            .receive_and_save(&mut stream, dir.path())
            .await
            .unwrap_err();

        assert!(matches!(err, TransferError::ReceiveFailure(_)));
        assert!(!dir.path().join("movie.mkv").exists());
        assert!(entries(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_failure_keeps_previous_file_intact() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("doc.txt"), b"old version").unwrap();
        let mut stream = ScriptedStream::new(header("doc.txt"), &[b"new"]).failing();

        ChunkedTransferReceiver::default()
            .receive_and_save(&mut stream, dir.path())
            .await
            .unwrap_err();

        assert_eq!(std::fs::read(dir.path().join("doc.txt")).unwrap(), b"old version");
    }

    #[tokio::test]
    async fn test_unwritable_destination_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not_a_dir");
        std::fs::write(&blocker, b"plain file").unwrap();
        let mut stream = ScriptedStream::new(header("a.txt"), &[b"data"]);

        let err = ChunkedTransferReceiver::default()
            .receive_and_save(&mut stream, &blocker.join("inbox"))
            .await
            .unwrap_err();

        assert!(matches!(err, TransferError::DestinationWriteFailure { .. }));
        assert_eq!(entries(dir.path()), vec!["not_a_dir"]);
    }

    #[tokio::test]
    async fn test_failed_final_write_removes_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        // A non-empty directory squatting on the final name makes the rename fail
        std::fs::create_dir(dir.path().join("doc.txt")).unwrap();
        std::fs::write(dir.path().join("doc.txt").join("keep"), b"x").unwrap();
        let mut stream = ScriptedStream::new(header("doc.txt"), &[b"first ", b"second"]);

        let err = ChunkedTransferReceiver::default()
            .receive_and_save(&mut stream, dir.path())
            .await
            .unwrap_err();

        match err {
            TransferError::DestinationWriteFailure { path, .. } => {
                assert_eq!(path, dir.path().join("doc.txt"))
            }
            other => panic!("expected a destination failure, got {other:?}"),
        }
        assert_eq!(entries(dir.path()), vec!["doc.txt"]);
        assert!(dir.path().join("doc.txt").is_dir());
    }

    #[tokio::test]
    async fn test_existing_file_is_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("doc.txt"), b"old version, much longer").unwrap();
        let mut stream = ScriptedStream::new(header("doc.txt"), &[b"new"]);

        ChunkedTransferReceiver::default()
            .receive_and_save(&mut stream, dir.path())
            .await
            .unwrap();

        assert_eq!(std::fs::read(dir.path().join("doc.txt")).unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_hostile_filename_stays_inside_destination() {
        let root = tempfile::tempdir().unwrap();
        let dest = root.path().join("downloads");
        let mut stream = ScriptedStream::new(header("../../escape.sh"), &[b"#!/bin/sh"]);

        let saved = ChunkedTransferReceiver::default()
            .receive_and_save(&mut stream, &dest)
            .await
            .unwrap();

        assert_eq!(saved, dest.join("escape.sh"));
        assert!(!root.path().join("escape.sh").exists());
    }

    #[tokio::test]
    async fn test_decrypts_in_arrival_order() {
        let dir = tempfile::tempdir().unwrap();
        let key: EncryptionKey = "0123456789abcdef0123456789abcdef".parse().unwrap();
        let mut encoder = StreamCipherCodec::new(&key, [5u8; IV_LEN]).unwrap();

        let mut first = b"first-".to_vec();
        let mut second = b"second".to_vec();
        encoder.apply(&mut first);
        encoder.apply(&mut second);

        let mut metadata = header("enc.bin");
        metadata.insert(IV_KEY.to_string(), encoder.encoded_iv());
        let mut stream = ScriptedStream::new(metadata, &[&first, &second]);

        let saved = ChunkedTransferReceiver::new(Some(key))
            .receive_and_save(&mut stream, dir.path())
            .await
            .unwrap();

        assert_eq!(std::fs::read(saved).unwrap(), b"first-second");
    }
}
