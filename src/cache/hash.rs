// Copyright (c) 2018 Weihang Lo
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Streaming content hashing for ETag sidecars.

use std::io;
use std::path::Path;

use digest::DynDigest;
use tokio::fs;
use tokio::io::AsyncReadExt;

const CHUNK: usize = 64 * 1024;

/// Digest algorithms a sidecar can be produced with, strongest first.
///
/// An operator-supplied name that matches none of these falls back to the
/// strongest supported algorithm rather than failing; every variant here is
/// compiled in, so resolution always succeeds.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HashAlgo {
    Sha512,
    Sha384,
    Sha256,
    Sha224,
    Sha1,
    Md5,
}

impl HashAlgo {
    /// Parse an algorithm name as operators write them.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "sha512" => Some(HashAlgo::Sha512),
            "sha384" => Some(HashAlgo::Sha384),
            "sha256" => Some(HashAlgo::Sha256),
            "sha224" => Some(HashAlgo::Sha224),
            "sha1" => Some(HashAlgo::Sha1),
            "md5" => Some(HashAlgo::Md5),
            _ => None,
        }
    }

    /// Resolve an operator-supplied name, falling back to the strongest
    /// supported algorithm when the name is unrecognized.
    pub fn resolve(name: &str) -> Self {
        HashAlgo::parse(name).unwrap_or(HashAlgo::Sha512)
    }

    /// The name used as the sidecar filename suffix.
    pub fn name(self) -> &'static str {
        match self {
            HashAlgo::Sha512 => "sha512",
            HashAlgo::Sha384 => "sha384",
            HashAlgo::Sha256 => "sha256",
            HashAlgo::Sha224 => "sha224",
            HashAlgo::Sha1 => "sha1",
            HashAlgo::Md5 => "md5",
        }
    }

    fn hasher(self) -> Box<dyn DynDigest + Send> {
        match self {
            HashAlgo::Sha512 => Box::new(sha2::Sha512::default()),
            HashAlgo::Sha384 => Box::new(sha2::Sha384::default()),
            HashAlgo::Sha256 => Box::new(sha2::Sha256::default()),
            HashAlgo::Sha224 => Box::new(sha2::Sha224::default()),
            HashAlgo::Sha1 => Box::new(sha1::Sha1::default()),
            HashAlgo::Md5 => Box::new(md5::Md5::default()),
        }
    }

    /// Stream the file at `path` through the digest and return the
    /// lowercase-hex result.
    pub async fn digest_file(self, path: &Path) -> io::Result<String> {
        let mut file = fs::File::open(path).await?;
        let mut hasher = self.hasher();
        let mut buf = vec![0u8; CHUNK];
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hex::encode(hasher.finalize()))
    }
}
