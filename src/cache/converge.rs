// Copyright (c) 2018 Weihang Lo
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The converger: a single authority for file-producing operations.
//!
//! With the converger active every stat, read, mkdir, write and hash is
//! sent as a message to one authority task, which applies it through the
//! local primitives (and their single-flight registries) and posts the
//! result back to the caller. Across the whole node there is then at most
//! one in-flight producer for any destination path.
//!
//! Replies are deliberately lossy: stats reduce to size, an HTTP-date
//! string and a file flag; errors reduce to absence. Callers only ever
//! decide "did it fail?" and "is this a file?" — detail is logged on the
//! authority side before it is stripped.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use crate::cache::disk::{Disk, Meta};
use crate::cache::hash::HashAlgo;
use crate::cache::{OpError, OpResult};
use crate::http::encoding::Group;

/// The operations a worker may ask the authority to perform.
#[derive(Debug)]
pub enum FileOp {
    GetStats { path: PathBuf },
    GetFileContent { path: PathBuf },
    MkDir { root: PathBuf, file: PathBuf },
    WriteFile { path: PathBuf, content: Bytes },
    WriteStream { source: PathBuf, target: PathBuf, group: Group },
    GetHash { path: PathBuf, algo: HashAlgo },
}

impl FileOp {
    fn action(&self) -> &'static str {
        match self {
            FileOp::GetStats { .. } => "getStats",
            FileOp::GetFileContent { .. } => "getFileContent",
            FileOp::MkDir { .. } => "mkDir",
            FileOp::WriteFile { .. } => "writeFile",
            FileOp::WriteStream { .. } => "writeStream",
            FileOp::GetHash { .. } => "getHash",
        }
    }
}

/// Stat result as it crosses the authority boundary.
#[derive(Clone, Debug)]
pub struct WireStats {
    pub size: u64,
    pub last_modified: String,
    pub file: bool,
}

impl WireStats {
    fn from_meta(meta: Meta) -> Self {
        WireStats {
            size: meta.size,
            last_modified: httpdate::fmt_http_date(meta.mtime),
            file: meta.is_file,
        }
    }

    fn into_meta(self) -> Meta {
        Meta {
            size: self.size,
            mtime: httpdate::parse_http_date(&self.last_modified)
                .unwrap_or(SystemTime::UNIX_EPOCH),
            is_file: self.file,
        }
    }
}

#[derive(Debug)]
enum Reply {
    Stats(Option<WireStats>),
    Content(Option<Bytes>),
    Done(bool),
    Hash(Option<String>),
}

struct Envelope {
    id: u64,
    op: FileOp,
    reply: oneshot::Sender<Reply>,
}

enum Mode {
    Passthrough(Arc<Disk>),
    Funnel {
        tx: mpsc::UnboundedSender<Envelope>,
        seq: AtomicU64,
    },
}

pub struct Converger {
    mode: Mode,
}

impl Converger {
    /// A converger that applies every operation directly through the
    /// local primitives. The state machine above is unchanged either way.
    pub fn passthrough(disk: Arc<Disk>) -> Self {
        Converger {
            mode: Mode::Passthrough(disk),
        }
    }

    /// Spawn the authority task and return a converger that forwards
    /// every operation to it.
    pub fn spawn(disk: Arc<Disk>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();
        tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                // Apply concurrently; coalescing happens inside the disk
                // primitives' own registries.
                let disk = disk.clone();
                tokio::spawn(async move {
                    let Envelope { id, op, reply } = envelope;
                    let _ = reply.send(apply(&disk, id, op).await);
                });
            }
        });
        Converger {
            mode: Mode::Funnel {
                tx,
                seq: AtomicU64::new(0),
            },
        }
    }

    async fn forward(&self, op: FileOp) -> OpResult<Reply> {
        match &self.mode {
            Mode::Funnel { tx, seq } => {
                let (reply_tx, reply_rx) = oneshot::channel();
                let envelope = Envelope {
                    id: seq.fetch_add(1, Ordering::Relaxed),
                    op,
                    reply: reply_tx,
                };
                tx.send(envelope)
                    .map_err(|_| OpError::opaque("authority unavailable"))?;
                reply_rx
                    .await
                    .map_err(|_| OpError::opaque("authority dropped the request"))
            }
            Mode::Passthrough(_) => Err(OpError::opaque("nothing to forward to")),
        }
    }

    pub async fn stat(&self, path: &Path) -> OpResult<Meta> {
        match &self.mode {
            Mode::Passthrough(disk) => disk.stat(path).await,
            Mode::Funnel { .. } => {
                let op = FileOp::GetStats {
                    path: path.to_owned(),
                };
                match self.forward(op).await? {
                    Reply::Stats(Some(stats)) => Ok(stats.into_meta()),
                    Reply::Stats(None) => Err(OpError::opaque("stat failed upstream")),
                    _ => Err(OpError::opaque("mismatched reply")),
                }
            }
        }
    }

    pub async fn read_file(&self, path: &Path) -> OpResult<Bytes> {
        match &self.mode {
            Mode::Passthrough(disk) => disk.read_file(path).await,
            Mode::Funnel { .. } => {
                let op = FileOp::GetFileContent {
                    path: path.to_owned(),
                };
                match self.forward(op).await? {
                    Reply::Content(Some(content)) => Ok(content),
                    Reply::Content(None) => Err(OpError::opaque("read failed upstream")),
                    _ => Err(OpError::opaque("mismatched reply")),
                }
            }
        }
    }

    pub async fn mkdir_all(&self, root: &Path, file: &Path) -> OpResult<()> {
        match &self.mode {
            Mode::Passthrough(disk) => disk.mkdir_all(root, file).await,
            Mode::Funnel { .. } => {
                let op = FileOp::MkDir {
                    root: root.to_owned(),
                    file: file.to_owned(),
                };
                self.done(op, "mkdir failed upstream").await
            }
        }
    }

    pub async fn write_file(&self, path: &Path, content: Bytes) -> OpResult<()> {
        match &self.mode {
            Mode::Passthrough(disk) => disk.write_file(path, content).await,
            Mode::Funnel { .. } => {
                let op = FileOp::WriteFile {
                    path: path.to_owned(),
                    content,
                };
                self.done(op, "write failed upstream").await
            }
        }
    }

    pub async fn write_stream(&self, source: &Path, target: &Path, group: Group) -> OpResult<()> {
        match &self.mode {
            Mode::Passthrough(disk) => disk.write_stream(source, target, group).await,
            Mode::Funnel { .. } => {
                let op = FileOp::WriteStream {
                    source: source.to_owned(),
                    target: target.to_owned(),
                    group,
                };
                self.done(op, "compression failed upstream").await
            }
        }
    }

    pub async fn hash(&self, path: &Path, algo: HashAlgo) -> OpResult<String> {
        match &self.mode {
            Mode::Passthrough(_) => Ok(algo.digest_file(path).await?),
            Mode::Funnel { .. } => {
                let op = FileOp::GetHash {
                    path: path.to_owned(),
                    algo,
                };
                match self.forward(op).await? {
                    Reply::Hash(Some(digest)) => Ok(digest),
                    Reply::Hash(None) => Err(OpError::opaque("hash failed upstream")),
                    _ => Err(OpError::opaque("mismatched reply")),
                }
            }
        }
    }

    async fn done(&self, op: FileOp, failure: &str) -> OpResult<()> {
        match self.forward(op).await? {
            Reply::Done(true) => Ok(()),
            Reply::Done(false) => Err(OpError::opaque(failure)),
            _ => Err(OpError::opaque("mismatched reply")),
        }
    }
}

/// Apply an operation on the authority side and reduce the result to its
/// wire form, logging the detail that the reduction strips.
async fn apply(disk: &Disk, id: u64, op: FileOp) -> Reply {
    let action = op.action();
    match op {
        FileOp::GetStats { path } => {
            Reply::Stats(log_err(id, action, &path, disk.stat(&path).await).map(WireStats::from_meta))
        }
        FileOp::GetFileContent { path } => {
            Reply::Content(log_err(id, action, &path, disk.read_file(&path).await))
        }
        FileOp::MkDir { root, file } => {
            Reply::Done(log_err(id, action, &file, disk.mkdir_all(&root, &file).await).is_some())
        }
        FileOp::WriteFile { path, content } => {
            Reply::Done(log_err(id, action, &path, disk.write_file(&path, content).await).is_some())
        }
        FileOp::WriteStream { source, target, group } => Reply::Done(
            log_err(id, action, &target, disk.write_stream(&source, &target, group).await)
                .is_some(),
        ),
        FileOp::GetHash { path, algo } => Reply::Hash(log_err(
            id,
            action,
            &path,
            algo.digest_file(&path).await.map_err(OpError::from),
        )),
    }
}

fn log_err<T>(id: u64, action: &str, path: &Path, result: OpResult<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err) => {
            eprintln!("converge #{}: {} {}: {}", id, action, path.display(), err);
            None
        }
    }
}

#[cfg(test)]
mod t {
    use async_compression::Level;

    use super::*;

    const CONTENT: &[u8] = b"the quick brown fox jumps over the lazy dog";

    fn passthrough() -> Converger {
        Converger::passthrough(Arc::new(Disk::new(Level::Default)))
    }

    fn funneled() -> Converger {
        Converger::spawn(Arc::new(Disk::new(Level::Default)))
    }

    #[tokio::test]
    async fn passthrough_stat_matches_disk() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, CONTENT).unwrap();
        let meta = passthrough().stat(&file).await.unwrap();
        assert!(meta.is_file);
        assert_eq!(meta.size, CONTENT.len() as u64);
    }

    #[tokio::test]
    async fn funneled_stat_survives_the_wire() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, CONTENT).unwrap();

        let meta = funneled().stat(&file).await.unwrap();
        assert!(meta.is_file);
        assert_eq!(meta.size, CONTENT.len() as u64);
        // HTTP-dates carry whole seconds only.
        let actual = std::fs::metadata(&file).unwrap().modified().unwrap();
        let drift = actual
            .duration_since(meta.mtime)
            .unwrap_or_default()
            .as_secs();
        assert!(drift <= 1);
    }

    #[tokio::test]
    async fn funneled_errors_reduce_to_absence() {
        let dir = tempfile::tempdir().unwrap();
        let err = funneled()
            .stat(&dir.path().join("missing"))
            .await
            .unwrap_err();
        // Only the fact of failure crosses the boundary.
        assert_eq!(err.to_string(), "stat failed upstream");
    }

    #[tokio::test]
    async fn funneled_materialization_flow() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a.txt");
        std::fs::write(&source, CONTENT).unwrap();
        let target = dir.path().join("deep/in/the/tree/a.txt.gzip");

        let converger = funneled();
        converger.mkdir_all(dir.path(), &target).await.unwrap();
        converger
            .write_stream(&source, &target, Group::Gzip)
            .await
            .unwrap();
        let meta = converger.stat(&target).await.unwrap();
        assert!(meta.is_file);

        let digest = converger.hash(&target, HashAlgo::Sha256).await.unwrap();
        let direct = HashAlgo::Sha256.digest_file(&target).await.unwrap();
        assert_eq!(digest, direct);

        converger
            .write_file(&dir.path().join("sidecar"), Bytes::from(digest))
            .await
            .unwrap();
        let read_back = converger.read_file(&dir.path().join("sidecar")).await.unwrap();
        assert_eq!(read_back, direct.as_bytes());
    }

    #[test]
    fn wire_stats_round_trip_to_the_second() {
        let now = SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1_700_000_000);
        let meta = Meta {
            size: 42,
            mtime: now,
            is_file: true,
        };
        let back = WireStats::from_meta(meta).into_meta();
        assert_eq!(back.size, 42);
        assert!(back.is_file);
        assert_eq!(back.mtime, now);
    }
}
