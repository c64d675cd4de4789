//! Bounded, ordered, concurrency-safe segment buffer.
//!
//! A [`SegmentTree`] is both a min-`seq` priority queue and a flow-control
//! valve:
//! - Segments always leave in ascending `seq` order, whatever the insertion
//!   order.
//! - The tree never holds more than `capacity` segments.  A blocking insert
//!   into a full tree suspends until a delete frees a slot; nothing is dropped
//!   and nothing grows.
//! - [`SegmentTree::remaining`] is the advertised receive window.
//!
//! Every operation takes `&self`, so one tree is shared between application
//! calls and the session loops through an `Arc`.  The blocking variants are
//! cancellation safe: dropping the future while it waits leaves the tree
//! untouched, which lets callers race them against a cancellation token in
//! `tokio::select!`.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use tokio::sync::Notify;

use crate::error::{Error, Result};
use crate::segment::Segment;

#[derive(Debug)]
pub struct SegmentTree {
    capacity: usize,
    segments: Mutex<BTreeMap<u32, Segment>>,
    /// Signalled after every successful insert.
    readable: Notify,
    /// Signalled after every successful delete.
    writable: Notify,
}

impl SegmentTree {
    /// Create an empty tree that holds at most `capacity` segments.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            segments: Mutex::new(BTreeMap::new()),
            readable: Notify::new(),
            writable: Notify::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Unused capacity at the time of the call.
    pub fn remaining(&self) -> usize {
        self.capacity.saturating_sub(self.lock().len())
    }

    /// Insert without waiting.
    ///
    /// Returns `Ok(false)` if a segment with the same `seq` is already held
    /// (the new one is discarded), and hands the segment back as `Err` when
    /// the tree is full.
    pub fn try_insert(&self, seg: Segment) -> std::result::Result<bool, Segment> {
        let mut segments = self.lock();
        if segments.contains_key(&seg.seq()) {
            return Ok(false);
        }
        if segments.len() >= self.capacity {
            return Err(seg);
        }
        segments.insert(seg.seq(), seg);
        drop(segments);
        self.readable.notify_one();
        Ok(true)
    }

    /// Insert, suspending while the tree is full.
    ///
    /// Returns `false` only for a duplicate `seq`.
    pub async fn insert_blocking(&self, seg: Segment) -> bool {
        let mut seg = seg;
        loop {
            // Register interest before checking so a delete that lands
            // between the check and the await is not missed.
            let writable = self.writable.notified();
            match self.try_insert(seg) {
                Ok(inserted) => return inserted,
                Err(back) => seg = back,
            }
            writable.await;
        }
    }

    /// Remove and return the minimum-`seq` segment, or [`Error::Empty`].
    pub fn delete_min(&self) -> Result<Segment> {
        let seg = self.lock().pop_first().map(|(_, seg)| seg);
        match seg {
            Some(seg) => {
                self.writable.notify_one();
                Ok(seg)
            }
            None => Err(Error::Empty),
        }
    }

    /// Remove the minimum-`seq` segment, suspending while the tree is empty.
    pub async fn delete_min_blocking(&self) -> Segment {
        loop {
            let readable = self.readable.notified();
            if let Ok(seg) = self.delete_min() {
                return seg;
            }
            readable.await;
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<u32, Segment>> {
        // The map is never left half-updated, so a poisoned lock is still usable.
        self.segments.lock().unwrap_or_else(|e| e.into_inner())
    }
}
