// Copyright (c) 2018 Weihang Lo
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Filesystem primitives.
//!
//! Thin wrappers over `tokio::fs`. The read-side primitives (stat, file
//! read, directory creation) are coalesced through a single-flight
//! registry keyed by the target path, so N concurrent callers for the
//! same path cost one syscall. The write-side primitives are guarded by
//! the per-request channel instead: only a channel leader ever produces.

use std::io;
use std::path::Path;
use std::time::SystemTime;

use async_compression::tokio::write::{DeflateEncoder, GzipEncoder};
use async_compression::Level;
use bytes::Bytes;
use tokio::fs;
use tokio::io::{AsyncWriteExt, BufReader, BufWriter};

use crate::cache::flight::Flight;
use crate::cache::{OpError, OpResult};
use crate::http::encoding::Group;

/// The slice of file metadata the cache cares about.
#[derive(Clone, Copy, Debug)]
pub struct Meta {
    pub size: u64,
    pub mtime: SystemTime,
    pub is_file: bool,
}

pub struct Disk {
    level: Level,
    stats: Flight<OpResult<Meta>>,
    reads: Flight<OpResult<Bytes>>,
    mkdirs: Flight<OpResult<()>>,
}

impl Disk {
    pub fn new(level: Level) -> Self {
        Disk {
            level,
            stats: Flight::new(),
            reads: Flight::new(),
            mkdirs: Flight::new(),
        }
    }

    pub async fn stat(&self, path: &Path) -> OpResult<Meta> {
        let key = path.to_string_lossy().into_owned();
        let path = path.to_owned();
        self.stats
            .run(&key, || async move {
                let meta = fs::metadata(&path).await?;
                let mtime = meta.modified()?;
                Ok(Meta {
                    size: meta.len(),
                    mtime,
                    is_file: meta.is_file(),
                })
            })
            .await
    }

    /// Read a whole file into memory. Only used for sidecar contents,
    /// which are a few dozen bytes.
    pub async fn read_file(&self, path: &Path) -> OpResult<Bytes> {
        let key = path.to_string_lossy().into_owned();
        let path = path.to_owned();
        self.reads
            .run(&key, || async move {
                let content = fs::read(&path).await?;
                Ok(Bytes::from(content))
            })
            .await
    }

    /// Ensure every directory between `root` (assumed to exist) and the
    /// parent of `file`, component by component. "Already exists" is
    /// success; each component creation is itself single-flighted.
    pub async fn mkdir_all(&self, root: &Path, file: &Path) -> OpResult<()> {
        let parent = match file.parent() {
            Some(parent) if parent != root => parent,
            _ => return Ok(()),
        };
        let rel = parent
            .strip_prefix(root)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "file not under root"))?;

        let mut dir = root.to_path_buf();
        for component in rel.components() {
            dir.push(component);
            let key = dir.to_string_lossy().into_owned();
            let dir = dir.clone();
            self.mkdirs
                .run(&key, || async move {
                    match fs::create_dir(&dir).await {
                        Ok(()) => Ok(()),
                        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Ok(()),
                        Err(err) => Err(err.into()),
                    }
                })
                .await?;
        }
        Ok(())
    }

    /// Create or truncate `path` with the given contents.
    pub async fn write_file(&self, path: &Path, content: Bytes) -> OpResult<()> {
        fs::write(path, &content).await?;
        Ok(())
    }

    /// Stream `source` through the group's codec at the configured level
    /// into `target`.
    pub async fn write_stream(&self, source: &Path, target: &Path, group: Group) -> OpResult<()> {
        let src = fs::File::open(source).await?;
        let dst = fs::File::create(target).await?;
        let mut reader = BufReader::new(src);
        match group {
            Group::Gzip => {
                let mut encoder = GzipEncoder::with_quality(BufWriter::new(dst), self.level);
                tokio::io::copy(&mut reader, &mut encoder).await?;
                encoder.shutdown().await?;
            }
            Group::Deflate => {
                let mut encoder = DeflateEncoder::with_quality(BufWriter::new(dst), self.level);
                tokio::io::copy(&mut reader, &mut encoder).await?;
                encoder.shutdown().await?;
            }
            Group::Raw => {
                return Err(OpError::from(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "raw group has no derived artifact",
                )))
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod t {
    use std::io::Read;

    use flate2::read::{DeflateDecoder, GzDecoder};

    use super::*;

    const CONTENT: &[u8] = b"tiny bodies compress poorly, so repeat: tiny tiny tiny tiny tiny";

    fn disk() -> Disk {
        Disk::new(Level::Default)
    }

    #[tokio::test]
    async fn stat_reports_files_and_directories() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, CONTENT).unwrap();

        let meta = disk().stat(&file).await.unwrap();
        assert!(meta.is_file);
        assert_eq!(meta.size, CONTENT.len() as u64);

        let meta = disk().stat(dir.path()).await.unwrap();
        assert!(!meta.is_file);

        let err = disk().stat(&dir.path().join("missing")).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn read_file_returns_contents() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("sidecar");
        std::fs::write(&file, "cafebabe").unwrap();
        let bytes = disk().read_file(&file).await.unwrap();
        assert_eq!(&bytes[..], b"cafebabe");
    }

    #[tokio::test]
    async fn mkdir_all_creates_each_component() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a/b/c/artifact.gzip");
        let disk = disk();
        disk.mkdir_all(dir.path(), &file).await.unwrap();
        assert!(dir.path().join("a/b/c").is_dir());
        // Existing components are fine.
        disk.mkdir_all(dir.path(), &file).await.unwrap();
        // A file directly under the root needs nothing.
        disk.mkdir_all(dir.path(), &dir.path().join("top.txt"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn write_stream_gzip_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a.txt");
        let target = dir.path().join("a.txt.gzip");
        std::fs::write(&source, CONTENT).unwrap();

        disk().write_stream(&source, &target, Group::Gzip).await.unwrap();

        let mut decoded = Vec::new();
        GzDecoder::new(std::fs::File::open(&target).unwrap())
            .read_to_end(&mut decoded)
            .unwrap();
        assert_eq!(decoded, CONTENT);
    }

    #[tokio::test]
    async fn write_stream_deflate_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a.txt");
        let target = dir.path().join("a.txt.deflate");
        std::fs::write(&source, CONTENT).unwrap();

        disk()
            .write_stream(&source, &target, Group::Deflate)
            .await
            .unwrap();

        let mut decoded = Vec::new();
        DeflateDecoder::new(std::fs::File::open(&target).unwrap())
            .read_to_end(&mut decoded)
            .unwrap();
        assert_eq!(decoded, CONTENT);
    }

    #[tokio::test]
    async fn write_stream_fails_on_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let err = disk()
            .write_stream(
                &dir.path().join("missing"),
                &dir.path().join("out.gzip"),
                Group::Gzip,
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn write_stream_rejects_raw() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a.txt");
        std::fs::write(&source, CONTENT).unwrap();
        let err = disk()
            .write_stream(&source, &dir.path().join("a.txt.raw"), Group::Raw)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn write_file_creates_and_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sidecar");
        let disk = disk();
        disk.write_file(&path, Bytes::from_static(b"0123456789"))
            .await
            .unwrap();
        disk.write_file(&path, Bytes::from_static(b"abc")).await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"abc");
    }
}
