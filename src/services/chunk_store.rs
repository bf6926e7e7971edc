//! src/services/chunk_store.rs
//!
//! ChunkStore — durable staging for in-flight chunked uploads plus the
//! assembler that reconstructs the original file once every chunk has
//! arrived. Chunks land on disk under `staging_dir/{session_id}/chunk_NNNNNN`
//! and assembled files under `uploads_dir`. Assembly happens at most once per
//! session, guarded by an atomic rename of the session directory.

use bytes::Bytes;
use chrono::Utc;
use futures::{Stream, StreamExt, pin_mut};
use md5::Context;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::{AsyncReadExt, AsyncWriteExt},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Largest chunk the server accepts in one request.
pub const MAX_CHUNK_SIZE: usize = 50 * 1024 * 1024;

const CHUNK_FILE_PREFIX: &str = "chunk_";
const MAX_SESSION_ID_LEN: usize = 128;
const MAX_TOTAL_CHUNKS: usize = 10_000;
const COPY_BUF_SIZE: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum ChunkStoreError {
    #[error("chunk exceeds the maximum size of {limit} bytes")]
    ChunkTooLarge { limit: usize },
    #[error("chunk index {index} is out of range for {total} chunks")]
    InvalidIndex { index: usize, total: usize },
    #[error("total chunk count {0} is invalid")]
    InvalidTotal(usize),
    #[error("invalid upload session id")]
    InvalidSessionId,
    #[error("invalid filename")]
    InvalidFilename,
    #[error("assembly failed: {source}")]
    AssemblyFailed {
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type ChunkResult<T> = Result<T, ChunkStoreError>;

/// The reconstructed file, handed to the caller. The caller owns the file on
/// disk and is responsible for removing it after use.
#[derive(Debug)]
pub struct AssembledUpload {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub filename: String,
    pub etag: String,
}

/// Outcome of accepting one chunk.
#[derive(Debug)]
pub enum ChunkPutOutcome {
    /// More chunks are still expected for this session.
    Progress { received: usize, total: usize },
    /// This chunk completed the session and assembly succeeded.
    Complete(AssembledUpload),
}

/// Filenames are untrusted; reject traversal and control characters.
pub fn ensure_filename_safe(filename: &str) -> ChunkResult<()> {
    if filename.is_empty() || filename.len() > 255 {
        return Err(ChunkStoreError::InvalidFilename);
    }
    if filename.contains("..") || filename.contains('/') || filename.contains('\\') {
        return Err(ChunkStoreError::InvalidFilename);
    }
    if filename.bytes().any(|b| b.is_ascii_control()) {
        return Err(ChunkStoreError::InvalidFilename);
    }
    Ok(())
}

/// Staging area for chunked uploads, partitioned by session id. Sessions
/// never contend with each other; within a session, distinct chunk indices
/// write to distinct files and the claim rename serializes assembly.
#[derive(Clone, Debug)]
pub struct ChunkStore {
    staging_dir: PathBuf,
    uploads_dir: PathBuf,
    max_chunk_size: usize,
}

impl ChunkStore {
    pub fn new(
        staging_dir: impl Into<PathBuf>,
        uploads_dir: impl Into<PathBuf>,
        max_chunk_size: usize,
    ) -> Self {
        Self {
            staging_dir: staging_dir.into(),
            uploads_dir: uploads_dir.into(),
            max_chunk_size,
        }
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Session ids are client-generated and opaque, but they become directory
    /// names, so restrict them to a filesystem-safe charset.
    fn ensure_session_id_safe(session_id: &str) -> ChunkResult<()> {
        if session_id.is_empty() || session_id.len() > MAX_SESSION_ID_LEN {
            return Err(ChunkStoreError::InvalidSessionId);
        }
        if !session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ChunkStoreError::InvalidSessionId);
        }
        Ok(())
    }

    fn session_dir(&self, session_id: &str) -> PathBuf {
        self.staging_dir.join(session_id)
    }

    /// Zero-padded so lexicographic sort equals numeric order.
    fn chunk_file_name(index: usize) -> String {
        format!("{}{:06}", CHUNK_FILE_PREFIX, index)
    }

    /// Accept one chunk for a session, streaming it to the staging area.
    ///
    /// Re-sent chunks at the same index overwrite (last write wins). After
    /// the chunk is staged, the count of staged chunks is compared against
    /// `total_chunks`; when all chunks are present this request performs the
    /// assembly, unless a concurrent request claimed it first.
    pub async fn put_chunk<S>(
        &self,
        session_id: &str,
        index: usize,
        total_chunks: usize,
        filename: &str,
        stream: S,
    ) -> ChunkResult<ChunkPutOutcome>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        Self::ensure_session_id_safe(session_id)?;
        ensure_filename_safe(filename)?;
        if total_chunks == 0 || total_chunks > MAX_TOTAL_CHUNKS {
            return Err(ChunkStoreError::InvalidTotal(total_chunks));
        }
        if index >= total_chunks {
            return Err(ChunkStoreError::InvalidIndex {
                index,
                total: total_chunks,
            });
        }

        let session_dir = self.session_dir(session_id);
        fs::create_dir_all(&session_dir).await?;

        // Stage into a temp file first so an oversized or failed chunk never
        // becomes visible at its index.
        let tmp_path = session_dir.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;
        let mut written: usize = 0;
        pin_mut!(stream);
        while let Some(piece_res) = stream.next().await {
            let piece = match piece_res {
                Ok(piece) => piece,
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(ChunkStoreError::Io(err));
                }
            };
            written += piece.len();
            if written > self.max_chunk_size {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(ChunkStoreError::ChunkTooLarge {
                    limit: self.max_chunk_size,
                });
            }
            if let Err(err) = file.write_all(&piece).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(ChunkStoreError::Io(err));
            }
        }
        if let Err(err) = file.flush().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(ChunkStoreError::Io(err));
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(ChunkStoreError::Io(err));
        }
        drop(file);

        let chunk_path = session_dir.join(Self::chunk_file_name(index));
        match fs::rename(&tmp_path, &chunk_path).await {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {
                // The session dir vanished under us: a concurrent request
                // claimed the session for assembly. Nothing left to do here.
                let _ = fs::remove_file(&tmp_path).await;
                return Ok(ChunkPutOutcome::Progress {
                    received: total_chunks,
                    total: total_chunks,
                });
            }
            Err(err) => {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(ChunkStoreError::Io(err));
            }
        }

        debug!(
            session_id,
            index, total_chunks, written, "staged chunk"
        );

        let received = match self.count_chunks(&session_dir).await {
            Ok(n) => n,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Ok(ChunkPutOutcome::Progress {
                    received: total_chunks,
                    total: total_chunks,
                });
            }
            Err(err) => return Err(ChunkStoreError::Io(err)),
        };

        if received < total_chunks {
            return Ok(ChunkPutOutcome::Progress {
                received,
                total: total_chunks,
            });
        }

        // All chunks present. Claim the session atomically: exactly one
        // request wins the rename; losers observe NotFound and report
        // progress while the winner assembles.
        let claim_dir = self.staging_dir.join(format!("{}.assembling", session_id));
        match fs::rename(&session_dir, &claim_dir).await {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Ok(ChunkPutOutcome::Progress {
                    received: total_chunks,
                    total: total_chunks,
                });
            }
            Err(err) => return Err(ChunkStoreError::Io(err)),
        }

        match self.assemble(&claim_dir, total_chunks, filename).await {
            Ok(assembled) => {
                if let Err(err) = fs::remove_dir_all(&claim_dir).await {
                    debug!(
                        "failed to remove staging dir {}: {}",
                        claim_dir.display(),
                        err
                    );
                }
                info!(
                    session_id,
                    path = %assembled.path.display(),
                    size_bytes = assembled.size_bytes,
                    "assembly complete"
                );
                Ok(ChunkPutOutcome::Complete(assembled))
            }
            Err(err) => {
                // Release the claim so the session stays assemble-able on a
                // retried final chunk.
                if let Err(restore_err) = fs::rename(&claim_dir, &session_dir).await {
                    warn!(
                        session_id,
                        "could not restore staging dir after failed assembly: {}", restore_err
                    );
                }
                Err(ChunkStoreError::AssemblyFailed { source: err })
            }
        }
    }

    async fn count_chunks(&self, session_dir: &Path) -> io::Result<usize> {
        let mut entries = fs::read_dir(session_dir).await?;
        let mut count = 0;
        while let Some(entry) = entries.next_entry().await? {
            if entry
                .file_name()
                .to_string_lossy()
                .starts_with(CHUNK_FILE_PREFIX)
            {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Concatenate the staged chunks in index order into a fresh output file.
    ///
    /// Streams each chunk through a fixed buffer rather than loading the
    /// whole upload into memory, computing an md5 etag along the way. The
    /// final size is read back from disk metadata, not summed from chunk
    /// sizes, so a short write surfaces here instead of downstream.
    async fn assemble(
        &self,
        claim_dir: &Path,
        total_chunks: usize,
        filename: &str,
    ) -> io::Result<AssembledUpload> {
        let mut chunk_names: Vec<String> = Vec::new();
        let mut entries = fs::read_dir(claim_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(CHUNK_FILE_PREFIX) {
                chunk_names.push(name);
            }
        }
        chunk_names.sort();
        if chunk_names.len() != total_chunks {
            return Err(io::Error::new(
                ErrorKind::InvalidData,
                format!(
                    "expected {} chunks, found {}",
                    total_chunks,
                    chunk_names.len()
                ),
            ));
        }

        fs::create_dir_all(&self.uploads_dir).await?;
        let timestamp = Utc::now().format("%Y-%m-%d_%H-%M-%S");
        let out_name = format!("{}_{}", timestamp, filename);
        let out_path = self.uploads_dir.join(&out_name);
        let tmp_path = self.uploads_dir.join(format!(".tmp-{}", Uuid::new_v4()));

        let result = self
            .write_assembled(claim_dir, &chunk_names, &tmp_path)
            .await;
        let etag = match result {
            Ok(etag) => etag,
            Err(err) => {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(err);
            }
        };

        if let Err(err) = fs::rename(&tmp_path, &out_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(&out_path).await?;
                fs::rename(&tmp_path, &out_path).await?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(err);
            }
        }

        let size_bytes = fs::metadata(&out_path).await?.len();

        Ok(AssembledUpload {
            path: out_path,
            size_bytes,
            filename: filename.to_string(),
            etag,
        })
    }

    async fn write_assembled(
        &self,
        claim_dir: &Path,
        chunk_names: &[String],
        tmp_path: &Path,
    ) -> io::Result<String> {
        let mut out = File::create(tmp_path).await?;
        let mut digest = Context::new();
        let mut buf = vec![0u8; COPY_BUF_SIZE];
        for name in chunk_names {
            let mut chunk = File::open(claim_dir.join(name)).await?;
            loop {
                let n = chunk.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                digest.consume(&buf[..n]);
                out.write_all(&buf[..n]).await?;
            }
        }
        out.flush().await?;
        out.sync_all().await?;
        Ok(format!("{:x}", digest.compute()))
    }

    /// Remove staging directories untouched for longer than `max_age`.
    ///
    /// Abandoned sessions have no explicit cancellation path, so a periodic
    /// sweep keeps the staging area from growing without bound. Returns the
    /// number of sessions removed.
    pub async fn reap_stale_sessions(&self, max_age: Duration) -> io::Result<usize> {
        let mut entries = match fs::read_dir(&self.staging_dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err),
        };

        let now = SystemTime::now();
        let mut reaped = 0;
        while let Some(entry) = entries.next_entry().await? {
            let meta = match entry.metadata().await {
                Ok(meta) => meta,
                Err(_) => continue,
            };
            if !meta.is_dir() {
                continue;
            }
            let modified = match meta.modified() {
                Ok(modified) => modified,
                Err(_) => continue,
            };
            let age = match now.duration_since(modified) {
                Ok(age) => age,
                Err(_) => continue,
            };
            if age > max_age {
                match fs::remove_dir_all(entry.path()).await {
                    Ok(()) => {
                        info!(
                            session = %entry.file_name().to_string_lossy(),
                            age_secs = age.as_secs(),
                            "reaped stale upload session"
                        );
                        reaped += 1;
                    }
                    Err(err) => {
                        debug!(
                            "failed to reap session {}: {}",
                            entry.path().display(),
                            err
                        );
                    }
                }
            }
        }
        Ok(reaped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    const MB: usize = 1024 * 1024;

    fn store(dir: &TempDir, max_chunk_size: usize) -> ChunkStore {
        ChunkStore::new(
            dir.path().join("staging"),
            dir.path().join("uploads"),
            max_chunk_size,
        )
    }

    fn one_shot(data: Vec<u8>) -> impl Stream<Item = io::Result<Bytes>> {
        futures::stream::iter(vec![Ok(Bytes::from(data))])
    }

    async fn put(
        store: &ChunkStore,
        session: &str,
        index: usize,
        total: usize,
        data: Vec<u8>,
    ) -> ChunkResult<ChunkPutOutcome> {
        store
            .put_chunk(session, index, total, "audio.webm", one_shot(data))
            .await
    }

    #[tokio::test]
    async fn assembles_out_of_order_chunks_in_index_order() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, 16);

        for (index, data) in [(2usize, b"ccc"), (0, b"aaa"), (1, b"bbb")] {
            let outcome = put(&store, "sess-1", index, 3, data.to_vec()).await.unwrap();
            match (index, outcome) {
                (2, ChunkPutOutcome::Progress { received, total }) => {
                    assert_eq!((received, total), (1, 3));
                }
                (0, ChunkPutOutcome::Progress { received, total }) => {
                    assert_eq!((received, total), (2, 3));
                }
                (1, ChunkPutOutcome::Complete(assembled)) => {
                    let bytes = std::fs::read(&assembled.path).unwrap();
                    assert_eq!(bytes, b"aaabbbccc");
                    assert_eq!(assembled.size_bytes, 9);
                }
                (index, other) => panic!("unexpected outcome for chunk {index}: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn twelve_megabyte_upload_in_three_chunks() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, 4 * MB);

        let chunk = |fill: u8| vec![fill; 4 * MB];
        match put(&store, "big", 2, 3, chunk(2)).await.unwrap() {
            ChunkPutOutcome::Progress { received, total } => assert_eq!((received, total), (1, 3)),
            other => panic!("unexpected: {other:?}"),
        }
        match put(&store, "big", 0, 3, chunk(0)).await.unwrap() {
            ChunkPutOutcome::Progress { received, total } => assert_eq!((received, total), (2, 3)),
            other => panic!("unexpected: {other:?}"),
        }
        match put(&store, "big", 1, 3, chunk(1)).await.unwrap() {
            ChunkPutOutcome::Complete(assembled) => {
                assert_eq!(assembled.size_bytes, 12 * MB as u64);
                let bytes = std::fs::read(&assembled.path).unwrap();
                assert!(bytes[..4 * MB].iter().all(|&b| b == 0));
                assert!(bytes[4 * MB..8 * MB].iter().all(|&b| b == 1));
                assert!(bytes[8 * MB..].iter().all(|&b| b == 2));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn resent_chunk_overwrites_previous_bytes() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, 16);

        put(&store, "dup", 0, 2, b"old".to_vec()).await.unwrap();
        put(&store, "dup", 0, 2, b"new".to_vec()).await.unwrap();
        match put(&store, "dup", 1, 2, b"-end".to_vec()).await.unwrap() {
            ChunkPutOutcome::Complete(assembled) => {
                assert_eq!(std::fs::read(&assembled.path).unwrap(), b"new-end");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn oversized_chunk_is_rejected_without_staging() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, 8);

        let err = put(&store, "fat", 0, 2, vec![0u8; 9]).await.unwrap_err();
        assert!(matches!(err, ChunkStoreError::ChunkTooLarge { limit: 8 }));

        // Nothing visible at the chunk's index, and no stray temp file.
        let session_dir = dir.path().join("staging").join("fat");
        let leftovers: Vec<_> = std::fs::read_dir(&session_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert!(leftovers.is_empty(), "unexpected files: {leftovers:?}");
    }

    #[tokio::test]
    async fn out_of_range_index_is_rejected() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, 16);

        let err = put(&store, "oob", 3, 3, b"x".to_vec()).await.unwrap_err();
        assert!(matches!(
            err,
            ChunkStoreError::InvalidIndex { index: 3, total: 3 }
        ));
    }

    #[tokio::test]
    async fn traversal_session_id_is_rejected() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, 16);

        let err = put(&store, "../evil", 0, 1, b"x".to_vec()).await.unwrap_err();
        assert!(matches!(err, ChunkStoreError::InvalidSessionId));
    }

    #[tokio::test]
    async fn concurrent_final_chunks_assemble_exactly_once() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(store(&dir, 16));

        put(&store, "race", 0, 2, b"head".to_vec()).await.unwrap();

        let a = {
            let store = store.clone();
            tokio::spawn(async move { put(&store, "race", 1, 2, b"tail".to_vec()).await })
        };
        let b = {
            let store = store.clone();
            tokio::spawn(async move { put(&store, "race", 1, 2, b"tail".to_vec()).await })
        };
        let (a, b) = (a.await.unwrap().unwrap(), b.await.unwrap().unwrap());

        let completions = [&a, &b]
            .iter()
            .filter(|o| matches!(o, ChunkPutOutcome::Complete(_)))
            .count();
        assert_eq!(completions, 1, "got {a:?} and {b:?}");

        for outcome in [a, b] {
            match outcome {
                ChunkPutOutcome::Complete(assembled) => {
                    assert_eq!(std::fs::read(&assembled.path).unwrap(), b"headtail");
                }
                // The loser either saw the claim or re-staged after the
                // winner finished; both are progress, never an error.
                ChunkPutOutcome::Progress { total, .. } => assert_eq!(total, 2),
            }
        }
        // The claim directory never outlives assembly.
        assert!(!dir.path().join("staging").join("race.assembling").exists());
    }

    #[tokio::test]
    async fn reaper_removes_only_stale_sessions() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, 16);

        put(&store, "fresh", 0, 2, b"x".to_vec()).await.unwrap();
        let reaped = store.reap_stale_sessions(Duration::from_secs(3600)).await.unwrap();
        assert_eq!(reaped, 0);
        assert!(dir.path().join("staging").join("fresh").exists());

        let reaped = store.reap_stale_sessions(Duration::ZERO).await.unwrap();
        assert_eq!(reaped, 1);
        assert!(!dir.path().join("staging").join("fresh").exists());
    }
}
