// Copyright (c) 2018 Weihang Lo
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The derivative-cache engine: single-flight coalescing, filesystem
//! primitives, content hashing and the converger that funnels all
//! file-producing operations through one authority task.

pub mod converge;
pub mod disk;
pub mod flight;
pub mod hash;

use std::error::Error;
use std::fmt;
use std::io;
use std::sync::Arc;

/// Failure of a cache operation.
///
/// Cloneable so a single failure can fan out to every waiter coalesced on
/// the same key. The underlying `io::Error` is kept for logging and the
/// `on_error` hook; control flow only ever asks "did it fail?".
#[derive(Clone, Debug)]
pub struct OpError(Arc<io::Error>);

pub type OpResult<T> = Result<T, OpError>;

impl OpError {
    /// An error that carries nothing but the fact of failure, for results
    /// that crossed a boundary which strips error detail.
    pub fn opaque(what: &str) -> Self {
        OpError(Arc::new(io::Error::new(io::ErrorKind::Other, what.to_owned())))
    }

    pub fn kind(&self) -> io::ErrorKind {
        self.0.kind()
    }
}

impl fmt::Display for OpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self.0.as_ref(), f)
    }
}

impl Error for OpError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(self.0.as_ref())
    }
}

impl From<io::Error> for OpError {
    fn from(err: io::Error) -> Self {
        OpError(Arc::new(err))
    }
}
