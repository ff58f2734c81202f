// Copyright (c) 2018 Weihang Lo
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Encoding-group selection.
//!
//! Every request lands in exactly one group: `raw`, `gzip` or `deflate`.
//! The group decides which on-disk artifact is served and is part of the
//! key that coalesces concurrent requests.

use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use async_compression::Level;

/// Extensions compressed by default when compression is enabled but no
/// explicit list is configured.
pub const DEFAULT_COMPRESS_EXTS: [&str; 10] = [
    "js", "css", "txt", "html", "svg", "md", "htm", "xml", "json", "yml",
];

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Group {
    Raw,
    Gzip,
    Deflate,
}

impl Group {
    /// The group name as used in channel keys, artifact suffixes and the
    /// `Content-Encoding` header.
    pub fn name(self) -> &'static str {
        match self {
            Group::Raw => "raw",
            Group::Gzip => "gzip",
            Group::Deflate => "deflate",
        }
    }

    pub fn is_raw(self) -> bool {
        matches!(self, Group::Raw)
    }
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Normalize an operator-supplied extension list: `"txt"` and `".txt"`
/// are the same entry.
pub fn normalize_exts<I, S>(exts: I) -> HashSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    exts.into_iter()
        .map(|ext| ext.as_ref().trim_start_matches('.').to_owned())
        .filter(|ext| !ext.is_empty())
        .collect()
}

/// Pick the encoding group for a request.
///
/// A compressible extension prefers `gzip` when the client advertises it,
/// then `deflate`, then falls through to `raw`. `Accept-Encoding` is
/// matched by substring presence; quality values are ignored.
pub fn select_group(
    compressible: &HashSet<String>,
    url: &str,
    accept_encoding: Option<&str>,
) -> Group {
    let ext = Path::new(url).extension().and_then(|ext| ext.to_str());
    let compressible = ext.map_or(false, |ext| compressible.contains(ext));
    if !compressible {
        return Group::Raw;
    }
    match accept_encoding {
        Some(accepts) if accepts.contains("gzip") => Group::Gzip,
        Some(accepts) if accepts.contains("deflate") => Group::Deflate,
        _ => Group::Raw,
    }
}

/// Resolve an operator-supplied compression level.
///
/// `"best" | "speed" | "no" | "default"` map to the corresponding level;
/// an integer is taken literally; anything else means the default.
pub fn parse_level(value: &str) -> Level {
    match value {
        "best" => Level::Best,
        "speed" => Level::Fastest,
        "no" => Level::Precise(0),
        "default" => Level::Default,
        other => match other.parse::<u32>() {
            Ok(n) => Level::Precise(n),
            Err(_) => Level::Default,
        },
    }
}
