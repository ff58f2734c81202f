// Copyright (c) 2018 Weihang Lo
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::collections::HashSet;
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use async_compression::Level;
use clap::ArgMatches;

use crate::cache::hash::HashAlgo;
use crate::http::encoding::{self, DEFAULT_COMPRESS_EXTS};
use crate::BoxResult;

/// 404 bodies, one per negotiable content type.
#[derive(Clone, Debug)]
pub struct NotFoundBodies {
    pub html: String,
    pub json: String,
    pub text: String,
}

impl Default for NotFoundBodies {
    fn default() -> Self {
        NotFoundBodies {
            html: "Not Found".to_owned(),
            json: r#"{"error":"Not found"}"#.to_owned(),
            text: "Not Found".to_owned(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Args {
    pub address: String,
    pub port: u16,
    /// Read-only asset root.
    pub source: PathBuf,
    /// Derivative cache root. Append-only; operators wipe it out-of-band.
    pub dest: PathBuf,
    /// Compression level; `None` disables the compression path entirely.
    pub compression: Option<Level>,
    /// Normalized compressible extension set. Empty when compression is
    /// disabled, so group selection falls through to raw.
    pub compress_exts: HashSet<String>,
    /// ETag validator algorithm; `None` disables conditional requests.
    pub etag: Option<HashAlgo>,
    pub max_age: u64,
    pub auto_index: bool,
    /// Funnel file operations through the authority task.
    pub converge: bool,
    pub cors: Option<String>,
    pub not_found: NotFoundBodies,
    pub log: bool,
}

impl Default for Args {
    fn default() -> Self {
        Args {
            address: "127.0.0.1".to_owned(),
            port: 5000,
            source: PathBuf::from("."),
            dest: PathBuf::from("."),
            compression: None,
            compress_exts: HashSet::new(),
            etag: Some(HashAlgo::Sha256),
            max_age: 30_672_000,
            auto_index: true,
            converge: true,
            cors: None,
            not_found: NotFoundBodies::default(),
            log: true,
        }
    }
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse(matches: ArgMatches) -> BoxResult<Args> {
        let address = matches.value_of("address").unwrap_or_default().to_owned();
        let port = match matches.value_of_t::<u16>("port") {
            Ok(port) => port,
            Err(err) => bail!("error: invalid port: {}", err),
        };
        let max_age = match matches.value_of_t::<u64>("cache") {
            Ok(seconds) => seconds,
            Err(err) => bail!("error: invalid cache seconds: {}", err),
        };

        let source = Args::parse_path(matches.value_of("source").unwrap_or_default())?;
        let dest = Args::parse_path(matches.value_of("dest").unwrap_or_default())?;
        if source == dest {
            eprintln!(
                "warning: source and dest are the same directory; \
                 derivative artifacts will sit next to the assets"
            );
        }

        let compression = matches.value_of("compression").map(encoding::parse_level);
        let compress_exts = match (&compression, matches.value_of("compress")) {
            (Some(_), Some(list)) => encoding::normalize_exts(list.split(',')),
            (Some(_), None) => encoding::normalize_exts(DEFAULT_COMPRESS_EXTS),
            (None, _) => HashSet::new(),
        };

        let etag = Args::parse_etag(matches.value_of("etag").unwrap_or_default());
        let auto_index = !matches.is_present("no-auto-index");
        let converge = !matches.is_present("no-converge");
        let cors = matches.value_of("cors").map(str::to_owned);

        let mut not_found = NotFoundBodies::default();
        if let Some(body) = matches.value_of("404-html") {
            not_found.html = body.to_owned();
        }
        if let Some(body) = matches.value_of("404-json") {
            not_found.json = body.to_owned();
        }
        if let Some(body) = matches.value_of("404-text") {
            not_found.text = body.to_owned();
        }

        let log = !matches.is_present("no-log");

        Ok(Args {
            address,
            port,
            source,
            dest,
            compression,
            compress_exts,
            etag,
            max_age,
            auto_index,
            converge,
            cors,
            not_found,
            log,
        })
    }

    /// Turn on the compression path with the default extension list when
    /// no explicit one is set.
    pub fn with_compression(mut self, level: Level) -> Self {
        self.compression = Some(level);
        if self.compress_exts.is_empty() {
            self.compress_exts = encoding::normalize_exts(DEFAULT_COMPRESS_EXTS);
        }
        self
    }

    /// `false`-like values disable the validator, `true`-like values mean
    /// sha256, anything else names an algorithm.
    fn parse_etag(value: &str) -> Option<HashAlgo> {
        match value {
            "false" | "off" | "no" | "0" => None,
            "" | "true" | "on" | "yes" | "1" => Some(HashAlgo::Sha256),
            name => Some(HashAlgo::resolve(name)),
        }
    }

    /// Validate and canonicalize a directory argument. `~`-prefixed paths
    /// expand against `$HOME`.
    fn parse_path(path: &str) -> BoxResult<PathBuf> {
        let path = Args::expand_home(path);
        if !path.is_dir() {
            bail!("error: directory \"{}\" doesn't exist", path.display());
        }

        (if path.is_absolute() {
            path.canonicalize()
        } else {
            env::current_dir().map(|p| p.join(&path))
        })
        .and_then(|p| p.canonicalize())
        .or_else(|err| {
            bail!(
                "error: failed to access path \"{}\": {}",
                path.display(),
                err,
            )
        })
    }

    fn expand_home(path: &str) -> PathBuf {
        match path.strip_prefix('~') {
            Some(rest) => match env::var_os("HOME") {
                Some(home) => PathBuf::from(home).join(rest.trim_start_matches('/')),
                None => PathBuf::from(path),
            },
            None => PathBuf::from(path),
        }
    }

    /// Construct socket address from arguments.
    pub fn address(&self) -> BoxResult<SocketAddr> {
        format!("{}:{}", self.address, self.port)
            .parse()
            .or_else(|err| {
                bail!(
                    "error: invalid address {}:{} : {}",
                    self.address,
                    self.port,
                    err,
                )
            })
    }
}
