// Copyright (c) 2018 Weihang Lo
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Request-URL sanitizing.
//!
//! The cleaned URL is the asset's identity: it keys the request channel
//! and maps 1:1 to a relative path under both the source and destination
//! roots.

use std::path::{Component, Path, PathBuf};

/// A sanitized request target.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Sanitized {
    /// Cleaned URL: query stripped, directory requests rewritten to their
    /// index document. Used for the channel key and MIME lookup.
    pub url: String,
    /// The same target as a relative filesystem path.
    pub rel: PathBuf,
}

/// Sanitize a raw request URL.
///
/// 1. Strip everything from the first `?` onward.
/// 2. Append `index.html` to a trailing `/` when auto-index is enabled.
/// 3. Reject what is still a directory request, and any path that could
///    climb out of the root (`..`) or replace it when joined (rooted or
///    drive-prefixed components).
/// 4. Translate separators on platforms where `/` is not the separator.
pub fn sanitize(raw: &str, auto_index: bool) -> Option<Sanitized> {
    let path = match raw.find('?') {
        Some(at) => &raw[..at],
        None => raw,
    };
    let mut url = path.to_owned();
    if url.ends_with('/') && auto_index {
        url.push_str("index.html");
    }
    if url.ends_with('/') {
        return None;
    }

    let rel = url.trim_start_matches('/');
    let rel = if cfg!(windows) {
        PathBuf::from(rel.replace('/', "\\"))
    } else {
        PathBuf::from(rel)
    };
    if escapes_root(&rel) {
        return None;
    }

    Some(Sanitized { url, rel })
}

/// A relative path is safe to join onto a root only when every component
/// is a plain name: `..` climbs out, and a prefix or root component would
/// make `Path::join` discard the root altogether.
fn escapes_root(rel: &Path) -> bool {
    rel.components()
        .any(|component| !matches!(component, Component::Normal(_) | Component::CurDir))
}

#[cfg(test)]
mod t {
    use super::*;

    #[test]
    fn query_string_is_stripped() {
        let out = sanitize("/a/b.txt?version=3&x", true).unwrap();
        assert_eq!(out.url, "/a/b.txt");
        assert_eq!(out.rel, PathBuf::from("a/b.txt"));
    }

    #[test]
    fn trailing_slash_rewrites_to_index() {
        let out = sanitize("/", true).unwrap();
        assert_eq!(out.url, "/index.html");
        assert_eq!(out.rel, PathBuf::from("index.html"));

        let out = sanitize("/docs/", true).unwrap();
        assert_eq!(out.url, "/docs/index.html");
        assert_eq!(out.rel, PathBuf::from("docs/index.html"));
    }

    #[test]
    fn directory_requests_are_rejected_without_auto_index() {
        assert_eq!(sanitize("/", false), None);
        assert_eq!(sanitize("/docs/", false), None);
        assert_eq!(sanitize("/docs/?x=1", false), None);
    }

    #[test]
    fn parent_components_are_rejected() {
        assert_eq!(sanitize("/../etc/passwd", true), None);
        assert_eq!(sanitize("/a/../../b.txt", true), None);
    }

    #[cfg(windows)]
    #[test]
    fn rooted_and_prefixed_components_are_rejected() {
        // Joining either of these onto the source root would replace it.
        assert_eq!(sanitize("/C:/windows/win.ini", true), None);
        assert_eq!(sanitize(r"/\\server\share\x.txt", true), None);
    }

    #[test]
    fn plain_paths_pass_through() {
        let out = sanitize("/hello.txt", false).unwrap();
        assert_eq!(out.url, "/hello.txt");
        assert_eq!(out.rel, PathBuf::from("hello.txt"));
    }
}
