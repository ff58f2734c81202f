// Copyright (c) 2018 Weihang Lo
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Single-flight registry.
//!
//! Concurrent callers register under a string key; the first caller per
//! key becomes the leader and performs the work, every later caller
//! attaches as a follower and receives a clone of the leader's result.
//! Entries live only from the first registration to `finish`, so a key
//! coalesces in-flight work and nothing else.

use std::collections::HashMap;
use std::future::Future;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::cache::{OpError, OpResult};

/// What `add` hands back: the leader runs the operation, a follower waits
/// on its receiver for the leader's broadcast.
pub enum Ticket<T> {
    Leader,
    Follower(oneshot::Receiver<T>),
}

pub struct Flight<T> {
    pending: Mutex<HashMap<String, Vec<oneshot::Sender<T>>>>,
}

impl<T: Clone> Flight<T> {
    pub fn new() -> Self {
        Flight {
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Register a caller under `key`. Returns `Ticket::Leader` exactly for
    /// the first caller of an episode; that caller must eventually call
    /// [`finish`](Self::finish).
    pub fn add(&self, key: &str) -> Ticket<T> {
        let mut pending = self.pending.lock();
        match pending.get_mut(key) {
            Some(waiters) => {
                let (tx, rx) = oneshot::channel();
                waiters.push(tx);
                Ticket::Follower(rx)
            }
            None => {
                pending.insert(key.to_owned(), Vec::new());
                Ticket::Leader
            }
        }
    }

    /// Attach one more waiter to an open episode. The caller must be
    /// holding the episode open, i.e. a leader attaching itself before
    /// handing the work off.
    pub fn attach(&self, key: &str) -> oneshot::Receiver<T> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().entry(key.to_owned()).or_default().push(tx);
        rx
    }

    /// Detach every waiter registered under `key` and deliver `value` to
    /// each, in insertion order. Returns how many waiters were attached.
    pub fn finish(&self, key: &str, value: T) -> usize {
        let waiters = self.pending.lock().remove(key).unwrap_or_default();
        let held = waiters.len();
        for waiter in waiters {
            // A waiter that hung up just doesn't get the result.
            let _ = waiter.send(value.clone());
        }
        held
    }
}

impl<V: Clone> Flight<OpResult<V>> {
    /// Coalesce `op` under `key`: the leader executes it and publishes the
    /// result, followers await the broadcast without touching `op`.
    pub async fn run<F, Fut>(&self, key: &str, op: F) -> OpResult<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = OpResult<V>>,
    {
        match self.add(key) {
            Ticket::Leader => {
                let value = op().await;
                self.finish(key, value.clone());
                value
            }
            Ticket::Follower(rx) => rx
                .await
                .unwrap_or_else(|_| Err(OpError::opaque("leader abandoned the flight"))),
        }
    }
}

#[cfg(test)]
mod t {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    #[test]
    fn first_caller_leads() {
        let flight: Flight<OpResult<u32>> = Flight::new();
        assert!(matches!(flight.add("k"), Ticket::Leader));
        assert!(matches!(flight.add("k"), Ticket::Follower(_)));
        assert!(matches!(flight.add("other"), Ticket::Leader));
    }

    #[test]
    fn finish_detaches_the_episode() {
        let flight: Flight<OpResult<u32>> = Flight::new();
        assert!(matches!(flight.add("k"), Ticket::Leader));
        assert!(matches!(flight.add("k"), Ticket::Follower(_)));
        assert_eq!(flight.finish("k", Ok(1)), 1);
        // A fresh episode begins once the previous one finished.
        assert!(matches!(flight.add("k"), Ticket::Leader));
        assert_eq!(flight.finish("k", Ok(2)), 0);
    }

    #[tokio::test]
    async fn a_leader_can_attach_itself() {
        let flight: Flight<OpResult<u32>> = Flight::new();
        assert!(matches!(flight.add("k"), Ticket::Leader));
        let rx = flight.attach("k");
        assert_eq!(flight.finish("k", Ok(9)), 1);
        assert_eq!(rx.await.unwrap().unwrap(), 9);
    }

    #[tokio::test]
    async fn followers_receive_the_leaders_value() {
        let flight: Arc<Flight<OpResult<u32>>> = Arc::new(Flight::new());
        assert!(matches!(flight.add("k"), Ticket::Leader));

        let ran = Arc::new(AtomicUsize::new(0));
        let mut followers = Vec::new();
        for _ in 0..3 {
            let flight = flight.clone();
            let ran = ran.clone();
            followers.push(tokio::spawn(async move {
                flight
                    .run("k", || async move {
                        ran.fetch_add(1, Ordering::SeqCst);
                        Ok(0)
                    })
                    .await
            }));
        }

        // Wait until all three have attached, then publish.
        loop {
            if flight.pending.lock().get("k").map(Vec::len) == Some(3) {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(flight.finish("k", Ok(42)), 3);

        for follower in followers {
            assert_eq!(follower.await.unwrap().unwrap(), 42);
        }
        // No follower ever executed the operation.
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn uncontended_run_executes_once() {
        let flight: Flight<OpResult<u32>> = Flight::new();
        let out = flight.run("k", || async { Ok(7) }).await;
        assert_eq!(out.unwrap(), 7);
        // The episode is over; the next run leads again.
        let out = flight.run("k", || async { Ok(8) }).await;
        assert_eq!(out.unwrap(), 8);
    }

    #[tokio::test]
    async fn errors_fan_out_like_values() {
        let flight: Arc<Flight<OpResult<u32>>> = Arc::new(Flight::new());
        assert!(matches!(flight.add("k"), Ticket::Leader));
        let follower = {
            let flight = flight.clone();
            tokio::spawn(async move { flight.run("k", || async { Ok(0) }).await })
        };
        loop {
            if flight.pending.lock().get("k").map(Vec::len) == Some(1) {
                break;
            }
            tokio::task::yield_now().await;
        }
        flight.finish("k", Err(OpError::opaque("boom")));
        assert!(follower.await.unwrap().is_err());
    }
}
