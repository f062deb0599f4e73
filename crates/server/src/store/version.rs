// Copyright 2015-2023 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Versions and version handles.
//!
//! Every committed version is identified by a monotonically increasing
//! serial. Readers attach the latest committed version and observe its state
//! for the lifetime of the handle; at most one writable version exists at a
//! time, and its serial is `current + 1`. Publication swaps the current
//! version pointer under the db lock; rollback unlinks everything the writer
//! installed.
//!
//! Version bookkeeping (what changed, what was shadowed, what was resigned)
//! lives behind a per-version lock, separate from the header chains it
//! describes.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use alder_proto::rr::Nsec3Param;
use parking_lot::RwLock;

use crate::store::node::{HeaderId, NodeId};

/// Bookkeeping guarded by the version lock.
#[derive(Default)]
pub(crate) struct VersionState {
    /// NSEC3 parameters in force, when the zone is NSEC3-signed
    pub(crate) nsec3: Option<Nsec3Param>,
    /// the zone is signed and serves denial proofs
    pub(crate) secure: bool,
    /// record count visible in this version
    pub(crate) records: u64,
    /// transfer-size estimate in bytes
    pub(crate) xfr_size: u64,
    /// headers installed by this writer
    pub(crate) changed: Vec<(NodeId, HeaderId)>,
    /// headers whose resign key this writer touched
    pub(crate) resigned: Vec<(NodeId, HeaderId)>,
    /// glue lists published while this version was current
    pub(crate) glue_pushed: Vec<(NodeId, HeaderId)>,
    /// headers this writer shadowed; freed once no older version survives
    pub(crate) cleanup: Vec<(NodeId, HeaderId)>,
}

impl VersionState {
    /// Copies the snapshot fields a new writer inherits from current.
    pub(crate) fn inherit(&self) -> Self {
        Self {
            nsec3: self.nsec3.clone(),
            secure: self.secure,
            records: self.records,
            xfr_size: self.xfr_size,
            ..Self::default()
        }
    }
}

pub(crate) struct VersionInner {
    pub(crate) serial: u32,
    writer: AtomicBool,
    refs: AtomicU32,
    pub(crate) state: RwLock<VersionState>,
}

impl VersionInner {
    pub(crate) fn new(serial: u32, writer: bool, state: VersionState) -> Self {
        Self {
            serial,
            writer: AtomicBool::new(writer),
            refs: AtomicU32::new(0),
            state: RwLock::new(state),
        }
    }

    pub(crate) fn is_writer(&self) -> bool {
        self.writer.load(Ordering::Acquire)
    }

    /// Flips the version read-only; called once at publication.
    pub(crate) fn mark_committed(&self) {
        self.writer.store(false, Ordering::Release);
    }

    pub(crate) fn attach(&self) {
        self.refs.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn detach(&self) {
        let prev = self.refs.fetch_sub(1, Ordering::Relaxed);
        debug_assert!(prev > 0, "version reference count underflow");
    }

    pub(crate) fn refs(&self) -> u32 {
        self.refs.load(Ordering::Relaxed)
    }
}

/// A reference-counted attachment to one version of a zone database.
///
/// Cloning attaches another reader reference; dropping detaches. A reader's
/// view is fixed at attach time: later commits do not affect it. Writable
/// handles must be returned through `ZoneDb::close_version` so the writer
/// either publishes or rolls back; simply dropping a writable handle leaks
/// the open version.
pub struct VersionHandle {
    pub(crate) db_id: u64,
    pub(crate) inner: Arc<VersionInner>,
}

impl VersionHandle {
    pub(crate) fn new(db_id: u64, inner: Arc<VersionInner>) -> Self {
        inner.attach();
        Self { db_id, inner }
    }

    /// The serial of the attached version.
    pub fn serial(&self) -> u32 {
        self.inner.serial
    }

    /// True for the open writable version.
    pub fn is_writer(&self) -> bool {
        self.inner.is_writer()
    }
}

impl Clone for VersionHandle {
    fn clone(&self) -> Self {
        self.inner.attach();
        Self {
            db_id: self.db_id,
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Drop for VersionHandle {
    fn drop(&mut self) {
        self.inner.detach();
    }
}

impl std::fmt::Debug for VersionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionHandle")
            .field("serial", &self.inner.serial)
            .field("writer", &self.inner.is_writer())
            .finish()
    }
}

/// The committed history plus the open writer, guarded by the db lock.
pub(crate) struct VersionList {
    /// committed versions in serial order; the back is current
    pub(crate) committed: VecDeque<Arc<VersionInner>>,
    pub(crate) open_writer: Option<Arc<VersionInner>>,
}

impl VersionList {
    /// Starts the history at serial 1, the version the zone load writes.
    pub(crate) fn new() -> Self {
        let initial = Arc::new(VersionInner::new(1, false, VersionState::default()));
        let mut committed = VecDeque::new();
        committed.push_back(initial);
        Self {
            committed,
            open_writer: None,
        }
    }

    pub(crate) fn current(&self) -> &Arc<VersionInner> {
        self.committed.back().expect("history is never empty")
    }
}
