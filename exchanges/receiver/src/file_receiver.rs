//! Chunked, out-of-order, hash-verified file reception (C8).
//!
//! Each file in the accepted manifest gets one entry in the reception
//! map, keyed by `file_id`, guarded by its own `Mutex` so concurrent
//! chunks for different files never contend on a shared lock. Chunks are
//! written at their advertised byte offset, so arrival order doesn't
//! matter; a sequence number already seen is a no-op rewrite, not an
//! error, since the peer channel offers no delivery guarantees beyond
//! "eventually, maybe more than once".

use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use lan_file_sharer_common::{
    error::{Result, SessionError},
    path_safety::resolve_output_path,
};
use lan_file_sharer_protocol::Chunk;
use sha2::{Digest, Sha256};
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
    sync::Mutex,
};
use tracing::{debug, info, warn};

/// Progress notification emitted after each chunk is durably written.
#[derive(Clone, Debug)]
pub struct FileProgressEvent {
    pub file_id: String,
    pub file_name: String,
    pub received_bytes: u64,
    pub total_size: u64,
}

/// Emitted once a file's hash has been verified successfully.
#[derive(Clone, Debug)]
pub struct FileCompletedEvent {
    pub file_id: String,
    pub file_name: String,
}

/// Emitted if a file cannot be completed (hash mismatch, path escape, I/O).
#[derive(Clone, Debug)]
pub struct FileFailedEvent {
    pub file_id: String,
    pub file_name: String,
    pub error: SessionError,
}

/// Terminal, session-level event: emitted once the caller-supplied expected
/// file count has been reached by completed files (§4.8). Never fires if
/// the expected count is never set.
#[derive(Clone, Debug)]
pub struct TransferFinishedEvent {
    pub completed_files: usize,
}

/// Observer interface for reception progress. Implementors must be
/// `Send + Sync`; callbacks may be invoked from different chunk-writing
/// tasks concurrently.
pub trait FileReceiverSubscriber: Send + Sync {
    fn get_id(&self) -> String;
    fn notify_progress(&self, event: FileProgressEvent) {
        let _ = event;
    }
    fn notify_completed(&self, event: FileCompletedEvent) {
        let _ = event;
    }
    fn notify_failed(&self, event: FileFailedEvent) {
        let _ = event;
    }
    fn notify_transfer_finished(&self, event: TransferFinishedEvent) {
        let _ = event;
    }
}

struct FileState {
    file: File,
    path: PathBuf,
    file_name: String,
    total_size: u64,
    expected_sha256_hex: String,
    received_bytes: u64,
    seen_sequences: HashSet<u64>,
    finished: bool,
}

/// Reconstructs files from chunks, verifies their hash on completion, and
/// notifies subscribers of progress, completion, and failure.
pub struct FileReceiver {
    output_dir: PathBuf,
    files: Mutex<HashMap<String, Arc<Mutex<FileState>>>>,
    subscribers: Arc<std::sync::RwLock<HashMap<String, Arc<dyn FileReceiverSubscriber>>>>,
    /// Number of files the caller expects this session to deliver, if known.
    /// Set once per session via [`FileReceiver::set_expected_file_count`];
    /// `None` means no terminal event is ever emitted.
    expected_file_count: std::sync::Mutex<Option<usize>>,
    completed_file_count: AtomicUsize,
}

impl FileReceiver {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            files: Mutex::new(HashMap::new()),
            subscribers: Arc::new(std::sync::RwLock::new(HashMap::new())),
            expected_file_count: std::sync::Mutex::new(None),
            completed_file_count: AtomicUsize::new(0),
        }
    }

    /// Records how many files this session is expected to deliver. Once
    /// that many files have completed verification, a terminal
    /// [`TransferFinishedEvent`] is emitted (§4.8). Call once per session,
    /// before chunks start arriving.
    pub fn set_expected_file_count(&self, count: usize) {
        *self.expected_file_count.lock().unwrap() = Some(count);
        self.completed_file_count.store(0, Ordering::SeqCst);
    }

    pub fn subscribe(&self, subscriber: Arc<dyn FileReceiverSubscriber>) {
        self.subscribers
            .write()
            .unwrap()
            .insert(subscriber.get_id(), subscriber);
    }

    pub fn unsubscribe(&self, subscriber_id: &str) {
        self.subscribers.write().unwrap().remove(subscriber_id);
    }

    /// Registers one file from the accepted manifest, preallocating its
    /// output file at its final size. Must be called before any chunk for
    /// `file_id` arrives.
    pub async fn register_file(
        &self,
        file_id: &str,
        file_name: &str,
        total_size: u64,
        expected_sha256_hex: String,
    ) -> Result<()> {
        if !self.output_dir.exists() {
            tokio::fs::create_dir_all(&self.output_dir)
                .await
                .map_err(|e| SessionError::Transport(e.to_string()))?;
        }

        let path = resolve_output_path(&self.output_dir, file_name)?;

        let file = File::create(&path)
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))?;
        file.set_len(total_size)
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))?;

        info!(file_id, file_name, total_size, "registering file for reception");
        self.files.lock().await.insert(
            file_id.to_string(),
            Arc::new(Mutex::new(FileState {
                file,
                path,
                file_name: file_name.to_string(),
                total_size,
                expected_sha256_hex,
                received_bytes: 0,
                seen_sequences: HashSet::new(),
                finished: false,
            })),
        );
        Ok(())
    }

    /// Writes one chunk at its advertised offset. Triggers hash
    /// verification once every byte of the file has been written.
    pub async fn write_chunk(&self, chunk: Chunk) -> Result<()> {
        let entry = {
            let files = self.files.lock().await;
            files.get(&chunk.file_id).cloned()
        };

        let Some(entry) = entry else {
            return Err(SessionError::ProtocolError(format!(
                "chunk for unregistered file `{}`",
                chunk.file_id
            )));
        };

        let mut state = entry.lock().await;
        if state.finished {
            debug!(file_id = %chunk.file_id, "chunk for already-finished file, ignoring");
            return Ok(());
        }

        if !state.seen_sequences.insert(chunk.sequence_no) {
            debug!(
                file_id = %chunk.file_id,
                sequence_no = chunk.sequence_no,
                "duplicate chunk, skipping write"
            );
            return Ok(());
        }

        state
            .file
            .seek(std::io::SeekFrom::Start(chunk.offset))
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))?;
        state
            .file
            .write_all(&chunk.data)
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))?;

        if let Err(e) = state.file.sync_data().await {
            warn!(file_id = %chunk.file_id, error = %e, "fsync failed, continuing");
        }

        state.received_bytes += chunk.data.len() as u64;

        self.notify_progress(FileProgressEvent {
            file_id: chunk.file_id.clone(),
            file_name: state.file_name.clone(),
            received_bytes: state.received_bytes,
            total_size: state.total_size,
        });

        if state.received_bytes >= state.total_size {
            state.file.flush().await.map_err(|e| SessionError::Transport(e.to_string()))?;
            state.finished = true;
            let file_id = chunk.file_id.clone();
            let file_name = state.file_name.clone();
            let path = state.path.clone();
            let expected = state.expected_sha256_hex.clone();
            drop(state);
            self.verify_and_finish(file_id, file_name, path, expected).await?;
        }

        Ok(())
    }

    async fn verify_and_finish(
        &self,
        file_id: String,
        file_name: String,
        path: PathBuf,
        expected_sha256_hex: String,
    ) -> Result<()> {
        info!(file_id = %file_id, "verifying integrity of file: {}", file_name);
        match hash_file(&path).await {
            Ok(actual) if actual == expected_sha256_hex => {
                info!(file_id = %file_id, "file verified successfully: {}", file_name);
                self.notify_completed(FileCompletedEvent {
                    file_id: file_id.clone(),
                    file_name: file_name.clone(),
                });
                info!(file_id = %file_id, "file reception completed: {}", file_name);
                self.mark_file_completed();
                Ok(())
            }
            Ok(_) => {
                warn!(file_id = %file_id, "hash mismatch for file: {}", file_name);
                let _ = tokio::fs::remove_file(&path).await;
                self.notify_failed(FileFailedEvent {
                    file_id,
                    file_name: file_name.clone(),
                    error: SessionError::HashMismatch(file_name.clone()),
                });
                Err(SessionError::HashMismatch(file_name))
            }
            Err(e) => {
                warn!(file_id = %file_id, error = %e, "failed to verify file");
                let _ = tokio::fs::remove_file(&path).await;
                self.notify_failed(FileFailedEvent {
                    file_id,
                    file_name,
                    error: e.clone(),
                });
                Err(e)
            }
        }
    }

    /// Bumps the completed-file counter and, once it reaches the expected
    /// count set via [`FileReceiver::set_expected_file_count`], emits the
    /// terminal [`TransferFinishedEvent`].
    fn mark_file_completed(&self) {
        let completed = self.completed_file_count.fetch_add(1, Ordering::SeqCst) + 1;
        let expected = *self.expected_file_count.lock().unwrap();
        if expected == Some(completed) {
            info!(completed_files = completed, "all expected files received, transfer finished");
            self.notify_transfer_finished(TransferFinishedEvent { completed_files: completed });
        }
    }

    /// Removes partially-written output for any file that never reached
    /// completion (session cancelled or the sender disconnected early).
    pub async fn cleanup_incomplete(&self) {
        let files = self.files.lock().await;
        for (file_id, entry) in files.iter() {
            let state = entry.lock().await;
            if !state.finished {
                warn!(file_id, "cleaning up incomplete file: {}", state.file_name);
                let _ = tokio::fs::remove_file(&state.path).await;
            }
        }
    }

    fn notify_progress(&self, event: FileProgressEvent) {
        for subscriber in self.subscribers.read().unwrap().values() {
            subscriber.notify_progress(event.clone());
        }
    }

    fn notify_completed(&self, event: FileCompletedEvent) {
        for subscriber in self.subscribers.read().unwrap().values() {
            subscriber.notify_completed(event.clone());
        }
    }

    fn notify_failed(&self, event: FileFailedEvent) {
        for subscriber in self.subscribers.read().unwrap().values() {
            subscriber.notify_failed(event.clone());
        }
    }

    fn notify_transfer_finished(&self, event: TransferFinishedEvent) {
        for subscriber in self.subscribers.read().unwrap().values() {
            subscriber.notify_transfer_finished(event.clone());
        }
    }
}

async fn hash_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)
        .await
        .map_err(|e| SessionError::Transport(e.to_string()))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file
            .read(&mut buf)
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct RecordingSubscriber {
        id: String,
        progress: StdMutex<Vec<FileProgressEvent>>,
        completed: StdMutex<Vec<FileCompletedEvent>>,
        failed: StdMutex<Vec<FileFailedEvent>>,
        finished: StdMutex<Vec<TransferFinishedEvent>>,
    }

    impl RecordingSubscriber {
        fn new(id: &str) -> Self {
            Self {
                id: id.into(),
                progress: StdMutex::new(Vec::new()),
                completed: StdMutex::new(Vec::new()),
                failed: StdMutex::new(Vec::new()),
                finished: StdMutex::new(Vec::new()),
            }
        }
    }

    impl FileReceiverSubscriber for RecordingSubscriber {
        fn get_id(&self) -> String {
            self.id.clone()
        }
        fn notify_progress(&self, event: FileProgressEvent) {
            self.progress.lock().unwrap().push(event);
        }
        fn notify_completed(&self, event: FileCompletedEvent) {
            self.completed.lock().unwrap().push(event);
        }
        fn notify_failed(&self, event: FileFailedEvent) {
            self.failed.lock().unwrap().push(event);
        }
        fn notify_transfer_finished(&self, event: TransferFinishedEvent) {
            self.finished.lock().unwrap().push(event);
        }
    }

    fn sha256_hex(data: &[u8]) -> String {
        hex::encode(Sha256::digest(data))
    }

    #[tokio::test]
    async fn single_chunk_file_verifies_successfully() {
        let dir = tempfile::tempdir().unwrap();
        let receiver = FileReceiver::new(dir.path());
        let subscriber = Arc::new(RecordingSubscriber::new("sub"));
        receiver.subscribe(subscriber.clone());

        let content = b"hello world".to_vec();
        let hash = sha256_hex(&content);

        receiver
            .register_file("f1", "hello.txt", content.len() as u64, hash)
            .await
            .unwrap();

        receiver
            .write_chunk(Chunk {
                file_id: "f1".into(),
                file_name: "hello.txt".into(),
                sequence_no: 0,
                offset: 0,
                data: content.clone(),
                total_size: content.len() as u64,
                expected_sha256_hex: sha256_hex(&content),
            })
            .await
            .unwrap();

        assert_eq!(subscriber.completed.lock().unwrap().len(), 1);
        let written = tokio::fs::read(dir.path().join("hello.txt")).await.unwrap();
        assert_eq!(written, content);
    }

    #[tokio::test]
    async fn out_of_order_chunks_reassemble_correctly() {
        let dir = tempfile::tempdir().unwrap();
        let receiver = FileReceiver::new(dir.path());

        let content: Vec<u8> = (0..1024u32).map(|i| (i % 256) as u8).collect();
        let hash = sha256_hex(&content);
        receiver
            .register_file("f2", "data.bin", content.len() as u64, hash)
            .await
            .unwrap();

        let chunk_size = 256usize;
        let chunks: Vec<_> = content.chunks(chunk_size).enumerate().collect();
        for (seq, data) in chunks.into_iter().rev() {
            receiver
                .write_chunk(Chunk {
                    file_id: "f2".into(),
                    file_name: "data.bin".into(),
                    sequence_no: seq as u64,
                    offset: (seq * chunk_size) as u64,
                    data: data.to_vec(),
                    total_size: content.len() as u64,
                    expected_sha256_hex: String::new(),
                })
                .await
                .unwrap();
        }

        let written = tokio::fs::read(dir.path().join("data.bin")).await.unwrap();
        assert_eq!(written, content);
    }

    #[tokio::test]
    async fn duplicate_sequence_writes_once() {
        let dir = tempfile::tempdir().unwrap();
        let receiver = FileReceiver::new(dir.path());

        let content = vec![7u8; 1024];
        let hash = sha256_hex(&content);
        receiver
            .register_file("f3", "dup.bin", content.len() as u64, hash)
            .await
            .unwrap();

        for _ in 0..2 {
            receiver
                .write_chunk(Chunk {
                    file_id: "f3".into(),
                    file_name: "dup.bin".into(),
                    sequence_no: 2,
                    offset: 512,
                    data: vec![7u8; 256],
                    total_size: content.len() as u64,
                    expected_sha256_hex: String::new(),
                })
                .await
                .unwrap();
        }

        let received = {
            let files = receiver.files.lock().await;
            files.get("f3").unwrap().lock().await.received_bytes
        };
        assert_eq!(received, 256);
    }

    #[tokio::test]
    async fn hash_mismatch_removes_file_and_notifies_failure() {
        let dir = tempfile::tempdir().unwrap();
        let receiver = FileReceiver::new(dir.path());
        let subscriber = Arc::new(RecordingSubscriber::new("sub"));
        receiver.subscribe(subscriber.clone());

        let content = b"actual content".to_vec();
        receiver
            .register_file("f4", "bad.txt", content.len() as u64, "0".repeat(64))
            .await
            .unwrap();

        let result = receiver
            .write_chunk(Chunk {
                file_id: "f4".into(),
                file_name: "bad.txt".into(),
                sequence_no: 0,
                offset: 0,
                data: content.clone(),
                total_size: content.len() as u64,
                expected_sha256_hex: String::new(),
            })
            .await;

        assert!(matches!(result, Err(SessionError::HashMismatch(_))));
        assert_eq!(subscriber.failed.lock().unwrap().len(), 1);
        assert!(!dir.path().join("bad.txt").exists());
    }

    #[tokio::test]
    async fn transfer_finished_fires_once_expected_count_reached() {
        let dir = tempfile::tempdir().unwrap();
        let receiver = FileReceiver::new(dir.path());
        let subscriber = Arc::new(RecordingSubscriber::new("sub"));
        receiver.subscribe(subscriber.clone());
        receiver.set_expected_file_count(2);

        for (id, name) in [("f6", "a.txt"), ("f7", "b.txt")] {
            let content = format!("content for {name}").into_bytes();
            let hash = sha256_hex(&content);
            receiver
                .register_file(id, name, content.len() as u64, hash)
                .await
                .unwrap();
            receiver
                .write_chunk(Chunk {
                    file_id: id.into(),
                    file_name: name.into(),
                    sequence_no: 0,
                    offset: 0,
                    data: content.clone(),
                    total_size: content.len() as u64,
                    expected_sha256_hex: String::new(),
                })
                .await
                .unwrap();
        }

        assert_eq!(subscriber.finished.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn traversal_attempt_in_file_name_lands_inside_output_dir() {
        let dir = tempfile::tempdir().unwrap();
        let receiver = FileReceiver::new(dir.path());

        let content = b"hello world".to_vec();
        let hash = sha256_hex(&content);
        receiver
            .register_file("f5", "../../etc/passwd", content.len() as u64, hash)
            .await
            .unwrap();

        receiver
            .write_chunk(Chunk {
                file_id: "f5".into(),
                file_name: "../../etc/passwd".into(),
                sequence_no: 0,
                offset: 0,
                data: content.clone(),
                total_size: content.len() as u64,
                expected_sha256_hex: String::new(),
            })
            .await
            .unwrap();

        let confined = dir.path().canonicalize().unwrap().join("passwd");
        assert!(confined.exists());
        assert_eq!(tokio::fs::read(&confined).await.unwrap(), content);
    }
}
