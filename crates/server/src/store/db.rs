// Copyright 2015-2023 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The zone database object and its operation surface.
//!
//! Locking, outermost first: the db lock (attribute bits, version list), the
//! tree lock (topology), the node-lock partitions (header chains, reference
//! counts), and per-version state locks. Operations touching several
//! partitions take them one at a time in ascending index order.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use alder_proto::rr::{Name, Nsec3Param, RdataSlab, TypePair};
use bitflags::bitflags;
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::store::find::FoundRdataset;
use crate::store::load::{AddOutcome, RdatasetMeta};
use crate::store::node::{
    HeaderAttrs, HeaderId, Node, NodeArena, NodeId, NodeNsec, Partition, RdatasetHeader,
};
use crate::store::version::{VersionHandle, VersionInner, VersionList};

bitflags! {
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub(crate) struct DbAttrs: u8 {
        const LOADING = 0x01;
        const LOADED  = 0x02;
    }
}

/// Tunables of one zone database.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct ZoneDbConfig {
    /// node-lock partition count; rounded up to a power of two
    pub partitions: usize,
    /// budget of distinct rdataset types at one owner name
    pub max_types_per_name: usize,
    /// budget of records in one rdataset
    pub max_records_per_type: usize,
}

impl Default for ZoneDbConfig {
    fn default() -> Self {
        Self {
            partitions: 8,
            max_types_per_name: 100,
            max_records_per_type: 100_000,
        }
    }
}

/// The three parallel tries and the node arena, guarded by the tree lock.
pub(crate) struct TreeSet {
    pub(crate) nodes: NodeArena,
    pub(crate) main: crate::store::tree::NameTrie,
    /// twins of nodes holding NSEC records, accelerating closest-NSEC search
    pub(crate) nsec: crate::store::tree::NameTrie,
    /// hashed owner names of an NSEC3 chain
    pub(crate) nsec3: crate::store::tree::NameTrie,
    pub(crate) origin_node: NodeId,
}

/// Record count and transfer size of one version.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ZoneSize {
    /// records visible in the version
    pub records: u64,
    /// estimated transfer size in bytes
    pub bytes: u64,
}

/// The earliest re-signing deadline across all partitions.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SigningTime {
    /// owner of the rdataset due for re-signing
    pub name: Name,
    /// which rdataset it is
    pub type_pair: TypePair,
    /// the deadline
    pub resign: u32,
    /// tiebreak bit between deadlines in the same second
    pub resign_lsb: bool,
}

pub(crate) struct DbState {
    pub(crate) attrs: DbAttrs,
    pub(crate) versions: VersionList,
}

/// A versioned, in-memory authoritative zone database.
pub struct ZoneDb {
    pub(crate) id: u64,
    pub(crate) origin: Name,
    pub(crate) config: ZoneDbConfig,
    pub(crate) state: Mutex<DbState>,
    pub(crate) tree: RwLock<TreeSet>,
    pub(crate) partitions: Box<[RwLock<Partition>]>,
    glue_hits: AtomicU64,
    glue_misses: AtomicU64,
    glue_stats: AtomicBool,
}

static NEXT_DB_ID: AtomicU64 = AtomicU64::new(1);

impl ZoneDb {
    /// Creates an empty database for the zone rooted at `origin`.
    ///
    /// The origin node is materialized immediately and pinned for the life of
    /// the database.
    pub fn new(origin: Name, config: ZoneDbConfig) -> Self {
        let partition_count = config.partitions.next_power_of_two().clamp(1, 64);
        let partitions = (0..partition_count)
            .map(|_| RwLock::new(Partition::default()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        let mut nodes = NodeArena::default();
        let mut main = crate::store::tree::NameTrie::new();
        let origin_node = nodes.insert(Node::new(
            origin.clone(),
            locknum_of(&origin, partition_count),
        ));
        nodes.get(origin_node).ref_inc();
        main.insert(&origin, origin_node)
            .expect("empty trie accepts the origin");

        Self {
            id: NEXT_DB_ID.fetch_add(1, Ordering::Relaxed),
            origin,
            config: ZoneDbConfig {
                partitions: partition_count,
                ..config
            },
            state: Mutex::new(DbState {
                attrs: DbAttrs::empty(),
                versions: VersionList::new(),
            }),
            tree: RwLock::new(TreeSet {
                nodes,
                main,
                nsec: crate::store::tree::NameTrie::new(),
                nsec3: crate::store::tree::NameTrie::new(),
                origin_node,
            }),
            partitions,
            glue_hits: AtomicU64::new(0),
            glue_misses: AtomicU64::new(0),
            glue_stats: AtomicBool::new(false),
        }
    }

    /// The zone origin.
    pub fn origin(&self) -> &Name {
        &self.origin
    }

    /// The node of the zone origin.
    pub fn origin_node(&self) -> NodeId {
        self.tree.read().origin_node
    }

    /// Count of live nodes across all trees.
    pub fn node_count(&self) -> usize {
        self.tree.read().nodes.len()
    }

    /// The owner name of a node.
    pub fn node_name(&self, node: NodeId) -> Name {
        self.tree.read().nodes.get(node).name.clone()
    }

    pub(crate) fn check_version(&self, version: &VersionHandle) -> Result<(), StoreError> {
        if version.db_id != self.id {
            return Err(StoreError::VersionMismatch);
        }
        Ok(())
    }

    pub(crate) fn check_in_zone(&self, name: &Name) -> Result<(), StoreError> {
        if !name.is_subdomain_of(&self.origin) {
            return Err(StoreError::OutOfZone {
                name: name.clone(),
                origin: self.origin.clone(),
            });
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // version management
    // ------------------------------------------------------------------

    /// Attaches the latest committed version.
    pub fn current_version(&self) -> VersionHandle {
        let state = self.state.lock();
        VersionHandle::new(self.id, Arc::clone(state.versions.current()))
    }

    /// Opens the writable version at `current + 1`.
    ///
    /// Fails while another writer is outstanding.
    pub fn new_version(&self) -> Result<VersionHandle, StoreError> {
        let mut state = self.state.lock();
        if state.versions.open_writer.is_some() {
            return Err(StoreError::WriterOutstanding);
        }
        let current = state.versions.current();
        let inherited = current.state.read().inherit();
        let writer = Arc::new(VersionInner::new(current.serial + 1, true, inherited));
        state.versions.open_writer = Some(Arc::clone(&writer));
        debug!(serial = writer.serial, "opened writable version");
        Ok(VersionHandle::new(self.id, writer))
    }

    /// Closes a version handle.
    ///
    /// Readers detach; a writer publishes its edits when `commit` is true and
    /// rolls them back otherwise. Either way, versions that no reader can see
    /// any longer are retired and their shadowed headers reclaimed.
    pub fn close_version(&self, version: VersionHandle, commit: bool) -> Result<(), StoreError> {
        self.check_version(&version)?;
        let is_writer = version.is_writer();
        let inner = Arc::clone(&version.inner);
        drop(version);

        let mut state = self.state.lock();
        if is_writer {
            let open = state
                .versions
                .open_writer
                .take()
                .ok_or(StoreError::VersionMismatch)?;
            debug_assert!(Arc::ptr_eq(&open, &inner), "writer handle mismatch");
            if commit {
                self.commit_writer(&mut state, open);
            } else {
                self.rollback_writer(open);
            }
        }
        self.retire_versions(&mut state);
        Ok(())
    }

    fn commit_writer(&self, state: &mut DbState, writer: Arc<VersionInner>) {
        let changed = {
            let mut vs = writer.state.write();
            vs.glue_pushed.clear();
            vs.changed.split_off(0)
        };

        // enroll freshly committed RESIGN headers in their partition heaps
        let tree = self.tree.read();
        for &(node_id, header_id) in &changed {
            let node = tree.nodes.get(node_id);
            let mut part = self.partitions[node.locknum].write();
            let header = part.headers.get(header_id);
            if header.attrs.contains(HeaderAttrs::RESIGN) && header.heap_index == 0 {
                part.heap_insert(header_id);
            }
        }
        drop(tree);

        writer.mark_committed();
        debug!(serial = writer.serial, changes = changed.len(), "committed version");
        state.versions.committed.push_back(writer);
    }

    fn rollback_writer(&self, writer: Arc<VersionInner>) {
        let mut vs = writer.state.write();
        let changed = vs.changed.split_off(0);
        vs.cleanup.clear();
        vs.glue_pushed.clear();
        drop(vs);

        let tree = self.tree.read();
        for (node_id, header_id) in changed {
            let node = tree.nodes.get(node_id);
            let mut part = self.partitions[node.locknum].write();
            part.heap_remove(header_id);
            part.headers.get_mut(header_id).attrs |= HeaderAttrs::IGNORE;
            unlink_top(&mut part, node, header_id);
        }
        debug!(serial = writer.serial, "rolled back version");
    }

    /// Pops committed versions no reader can reach and frees the header
    /// chains only they could see.
    fn retire_versions(&self, state: &mut DbState) {
        while state.versions.committed.len() >= 2
            && state.versions.committed[0].refs() == 0
        {
            let retired = state
                .versions
                .committed
                .pop_front()
                .expect("length checked");
            debug!(serial = retired.serial, "retired version");

            // with everything older gone, the new front's shadowed headers
            // are unreachable
            let front = Arc::clone(state.versions.committed.front().expect("length checked"));
            let cleanup = front.state.write().cleanup.split_off(0);
            if cleanup.is_empty() {
                continue;
            }
            let tree = self.tree.read();
            for (node_id, header_id) in cleanup {
                let node = tree.nodes.get(node_id);
                let mut part = self.partitions[node.locknum].write();
                free_down_tail(&mut part, header_id);
            }
        }
    }

    // ------------------------------------------------------------------
    // node access
    // ------------------------------------------------------------------

    /// Finds the node of `name`, optionally creating it.
    ///
    /// Creation applies wildcard magic: every wildcard prefix between origin
    /// and `name` flags its parent and materializes the empty wildcard node.
    pub fn find_node(&self, name: &Name, create: bool) -> Result<Option<NodeId>, StoreError> {
        self.check_in_zone(name)?;
        if let Some(id) = self.tree.read().main.get(name) {
            return Ok(Some(id));
        }
        if !create {
            return Ok(None);
        }
        let mut tree = self.tree.write();
        let id = self.ensure_main_node(&mut tree, name)?;
        Ok(Some(id))
    }

    /// Pins a node against deletion.
    pub fn attach_node(&self, node: NodeId) {
        self.tree.read().nodes.get(node).ref_inc();
    }

    /// Releases a pin; a node with no references and no data is deleted.
    pub fn detach_node(&self, node: NodeId) {
        {
            let tree = self.tree.read();
            let n = tree.nodes.get(node);
            if n.ref_dec() > 0 || n.data_head().is_some() {
                return;
            }
            if node == tree.origin_node {
                return;
            }
        }

        // re-check under the write lock; a racing attach or insert wins
        let mut tree = self.tree.write();
        if node == tree.origin_node {
            return;
        }
        let (name, nsec) = {
            let n = tree.nodes.get(node);
            if n.refs() > 0 || n.data_head().is_some() {
                return;
            }
            (n.name.clone(), n.nsec())
        };
        match nsec {
            NodeNsec::Nsec3 => {
                tree.nsec3.remove(&name);
            }
            NodeNsec::HasNsec => {
                tree.nsec.remove(&name);
                tree.main.remove(&name);
            }
            NodeNsec::Normal => {
                tree.main.remove(&name);
            }
        }
        tree.nodes.remove(node);
        debug!(%name, "deleted empty node");
    }

    /// Holds the node's partition against header mutation while the guard
    /// lives.
    pub fn lock_node(&self, node: NodeId) -> NodeLock<'_> {
        let locknum = self.tree.read().nodes.get(node).locknum;
        NodeLock {
            _guard: self.partitions[locknum].read(),
        }
    }

    /// Creates (or finds) a main-tree node, applying wildcard magic.
    pub(crate) fn ensure_main_node(
        &self,
        tree: &mut TreeSet,
        name: &Name,
    ) -> Result<NodeId, StoreError> {
        let origin_labels = self.origin.num_labels() as usize;
        for k in (origin_labels + 1)..=(name.num_labels() as usize) {
            let prefix = name.trim_to(k);
            if !prefix.is_wildcard() {
                continue;
            }
            let parent = prefix.parent().expect("wildcard names have a parent");
            let parent_id = match tree.main.get(&parent) {
                Some(id) => id,
                None => self.create_node(tree, &parent, crate::store::tree::WhichTree::Main),
            };
            tree.nodes.get(parent_id).set_wild(true);
            tree.nodes.get(parent_id).set_find_callback(true);
            if tree.main.get(&prefix).is_none() {
                self.create_node(tree, &prefix, crate::store::tree::WhichTree::Main);
            }
        }

        Ok(match tree.main.get(name) {
            Some(id) => id,
            None => self.create_node(tree, name, crate::store::tree::WhichTree::Main),
        })
    }

    /// Creates (or finds) a node in the NSEC3 tree.
    pub(crate) fn ensure_nsec3_node(
        &self,
        tree: &mut TreeSet,
        name: &Name,
    ) -> Result<NodeId, StoreError> {
        if let Some(id) = tree.nsec3.get(name) {
            return Ok(id);
        }
        let id = self.create_node(tree, name, crate::store::tree::WhichTree::Nsec3);
        tree.nodes.get(id).set_nsec(NodeNsec::Nsec3);
        Ok(id)
    }

    /// Twins a main-tree node into the NSEC auxiliary tree.
    pub(crate) fn ensure_nsec_twin(&self, tree: &mut TreeSet, name: &Name, node: NodeId) {
        match tree.nsec.insert(name, node) {
            Ok(()) => tree.nodes.get(node).set_nsec(NodeNsec::HasNsec),
            Err(existing) => {
                // recoverable: a twin from an earlier add is reused
                warn!(%name, "NSEC twin already exists");
                debug_assert_eq!(existing, node);
            }
        }
    }

    fn create_node(
        &self,
        tree: &mut TreeSet,
        name: &Name,
        which: crate::store::tree::WhichTree,
    ) -> NodeId {
        let id = tree.nodes.insert(Node::new(
            name.clone(),
            locknum_of(name, self.partitions.len()),
        ));
        let trie = match which {
            crate::store::tree::WhichTree::Main => &mut tree.main,
            crate::store::tree::WhichTree::Nsec3 => &mut tree.nsec3,
        };
        trie.insert(name, id).expect("checked absent before create");
        id
    }

    // ------------------------------------------------------------------
    // rdataset operations
    // ------------------------------------------------------------------

    /// Adds (or merges) a rdataset at `node` under a writable version.
    pub fn add_rdataset(
        &self,
        node: NodeId,
        version: &VersionHandle,
        type_pair: TypePair,
        meta: &RdatasetMeta,
        slab: RdataSlab,
        merge: bool,
    ) -> Result<AddOutcome, StoreError> {
        self.check_version(version)?;
        if !version.is_writer() {
            return Err(StoreError::ReadOnlyVersion);
        }
        if slab.record_count() > self.config.max_records_per_type {
            return Err(StoreError::Range("too many records in one rdataset"));
        }
        let tree = self.tree.read();
        let tnode = tree.nodes.get(node);
        let mut part = self.partitions[tnode.locknum].write();
        self.install_rdataset(
            tnode,
            node,
            &mut part,
            &version.inner,
            type_pair,
            meta,
            Arc::new(slab),
            merge,
        )
        .map(|(outcome, _)| outcome)
    }

    /// Removes `slab`'s records from the visible rdataset of `type_pair`.
    ///
    /// Installs the difference, or a nonexistence marker when every record
    /// goes. `Ok(false)` reports there was nothing to subtract from.
    pub fn subtract_rdataset(
        &self,
        node: NodeId,
        version: &VersionHandle,
        type_pair: TypePair,
        slab: &RdataSlab,
    ) -> Result<bool, StoreError> {
        self.check_version(version)?;
        if !version.is_writer() {
            return Err(StoreError::ReadOnlyVersion);
        }
        let serial = version.serial();
        let tree = self.tree.read();
        let tnode = tree.nodes.get(node);
        let mut part = self.partitions[tnode.locknum].write();

        let Some(visible) = part.visible_type(tnode, type_pair, serial) else {
            return Ok(false);
        };
        let remaining = part
            .headers
            .get(visible)
            .slab
            .as_ref()
            .expect("visible headers have data")
            .subtract(slab)?;

        let meta = {
            let h = part.headers.get(visible);
            RdatasetMeta {
                ttl: h.ttl,
                trust: h.trust,
                resign: None,
            }
        };
        match remaining {
            Some(kept) => {
                let _ = self.install_rdataset(
                    tnode,
                    node,
                    &mut part,
                    &version.inner,
                    type_pair,
                    &meta,
                    Arc::new(kept),
                    false,
                )?;
            }
            None => {
                self.install_tombstone(tnode, node, &mut part, &version.inner, type_pair)?;
            }
        }
        Ok(true)
    }

    /// Marks `type_pair` nonexistent at `node` from this version on.
    pub fn delete_rdataset(
        &self,
        node: NodeId,
        version: &VersionHandle,
        type_pair: TypePair,
    ) -> Result<bool, StoreError> {
        self.check_version(version)?;
        if !version.is_writer() {
            return Err(StoreError::ReadOnlyVersion);
        }
        let serial = version.serial();
        let tree = self.tree.read();
        let tnode = tree.nodes.get(node);
        let mut part = self.partitions[tnode.locknum].write();
        if part.visible_type(tnode, type_pair, serial).is_none() {
            return Ok(false);
        }
        self.install_tombstone(tnode, node, &mut part, &version.inner, type_pair)?;
        Ok(true)
    }

    /// Deletes every rdataset visible at `node`.
    pub fn delete_data(&self, node: NodeId, version: &VersionHandle) -> Result<usize, StoreError> {
        self.check_version(version)?;
        if !version.is_writer() {
            return Err(StoreError::ReadOnlyVersion);
        }
        let serial = version.serial();
        let tree = self.tree.read();
        let tnode = tree.nodes.get(node);
        let mut part = self.partitions[tnode.locknum].write();

        let types = part
            .iter_types(tnode)
            .filter(|&id| part.visible(id, serial).is_some())
            .map(|id| part.headers.get(id).type_pair)
            .collect::<Vec<_>>();
        for &type_pair in &types {
            self.install_tombstone(tnode, node, &mut part, &version.inner, type_pair)?;
        }
        Ok(types.len())
    }

    /// The version-visible rdataset of `type_pair` at `node`.
    pub fn find_rdataset(
        &self,
        node: NodeId,
        version: &VersionHandle,
        type_pair: TypePair,
    ) -> Result<Option<FoundRdataset>, StoreError> {
        self.check_version(version)?;
        let serial = version.serial();
        let tree = self.tree.read();
        let tnode = tree.nodes.get(node);
        let part = self.partitions[tnode.locknum].read();
        Ok(part
            .visible_type(tnode, type_pair, serial)
            .map(|id| FoundRdataset::from_header(&part, id)))
    }

    /// Installs a header at the writer's serial, shadowing the previous head
    /// of the type's chain.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn install_rdataset(
        &self,
        tnode: &Node,
        node: NodeId,
        part: &mut Partition,
        version: &Arc<VersionInner>,
        type_pair: TypePair,
        meta: &RdatasetMeta,
        mut slab: Arc<RdataSlab>,
        merge: bool,
    ) -> Result<(AddOutcome, HeaderId), StoreError> {
        let serial = version.serial;
        let top = part.find_type(tnode, type_pair);
        let mut outcome = AddOutcome::Added;

        if let Some(top_id) = top {
            let top_header = part.headers.get(top_id);
            if top_header.serial == serial {
                // this writer already wrote the type; rewrite its header in
                // place rather than growing the down chain
                if merge && !top_header.is_nonexistent() {
                    let existing = top_header.slab.as_ref().expect("positive header");
                    match existing.merge(&slab)? {
                        alder_proto::rr::MergeOutcome::Unchanged => {
                            return Ok((AddOutcome::Unchanged, top_id));
                        }
                        alder_proto::rr::MergeOutcome::Merged(merged) => {
                            slab = Arc::new(merged);
                            outcome = AddOutcome::Merged;
                        }
                    }
                }
                self.adjust_size(version, &slab, top_header.slab.as_deref());
                let was_enrolled = top_header.heap_index != 0;
                {
                    let header = part.headers.get_mut(top_id);
                    header.ttl = meta.ttl;
                    header.trust = meta.trust;
                    header.slab = Some(slab);
                    header.attrs.remove(HeaderAttrs::NONEXISTENT);
                    header.glue = once_cell::sync::OnceCell::new();
                    apply_resign(header, meta);
                }
                if was_enrolled {
                    // the rewrite may have moved the resign key
                    part.heap_remove(top_id);
                    if part.headers.get(top_id).attrs.contains(HeaderAttrs::RESIGN) {
                        part.heap_insert(top_id);
                    }
                }
                return Ok((outcome, top_id));
            }

            if merge {
                if let Some(visible) = part.visible(top_id, serial) {
                    let existing = part
                        .headers
                        .get(visible)
                        .slab
                        .as_ref()
                        .expect("visible headers have data");
                    match existing.merge(&slab)? {
                        alder_proto::rr::MergeOutcome::Unchanged => {
                            return Ok((AddOutcome::Unchanged, visible));
                        }
                        alder_proto::rr::MergeOutcome::Merged(merged) => {
                            slab = Arc::new(merged);
                            outcome = AddOutcome::Merged;
                        }
                    }
                }
            }

            let old_visible = part.visible(top_id, serial).map(|id| {
                part.headers
                    .get(id)
                    .slab
                    .as_deref()
                    .expect("visible headers have data")
                    .record_count() as u64
            });
            self.adjust_size_counts(version, &slab, old_visible);

            let mut header =
                RdatasetHeader::new(node, type_pair, serial, meta.ttl, meta.trust, Some(slab));
            header.down = Some(top_id);
            header.next = part.headers.get(top_id).next;
            apply_resign(&mut header, meta);
            let new_id = part.headers.insert(header);
            replace_sibling(part, tnode, top_id, new_id);

            let mut vs = version.state.write();
            vs.changed.push((node, new_id));
            vs.cleanup.push((node, new_id));
            return Ok((outcome, new_id));
        }

        // first header of this type at the node
        let types_here = part.iter_types(tnode).count();
        if types_here >= self.config.max_types_per_name {
            return Err(StoreError::Range("too many rdataset types at one name"));
        }
        self.adjust_size_counts(version, &slab, None);

        let mut header =
            RdatasetHeader::new(node, type_pair, serial, meta.ttl, meta.trust, Some(slab));
        header.next = tnode.data_head();
        apply_resign(&mut header, meta);
        let new_id = part.headers.insert(header);
        tnode.set_data_head(Some(new_id));
        version.state.write().changed.push((node, new_id));
        Ok((outcome, new_id))
    }

    fn install_tombstone(
        &self,
        tnode: &Node,
        node: NodeId,
        part: &mut Partition,
        version: &Arc<VersionInner>,
        type_pair: TypePair,
    ) -> Result<(), StoreError> {
        let serial = version.serial;
        let top = part.find_type(tnode, type_pair);

        if let Some(top_id) = top {
            let top_header = part.headers.get(top_id);
            let removed = part
                .visible(top_id, serial)
                .map(|id| {
                    part.headers
                        .get(id)
                        .slab
                        .as_deref()
                        .expect("visible headers have data")
                        .record_count() as u64
                })
                .unwrap_or(0);
            {
                let mut vs = version.state.write();
                vs.records = vs.records.saturating_sub(removed);
            }

            if top_header.serial == serial {
                let header = part.headers.get_mut(top_id);
                header.slab = None;
                header.attrs.insert(HeaderAttrs::NONEXISTENT);
                header.attrs.remove(HeaderAttrs::RESIGN);
                header.glue = once_cell::sync::OnceCell::new();
                let id = top_id;
                part.heap_remove(id);
                return Ok(());
            }

            let mut header =
                RdatasetHeader::new(node, type_pair, serial, 0, crate::store::TrustLevel::None, None);
            header.down = Some(top_id);
            header.next = part.headers.get(top_id).next;
            let new_id = part.headers.insert(header);
            replace_sibling(part, tnode, top_id, new_id);
            let mut vs = version.state.write();
            vs.changed.push((node, new_id));
            vs.cleanup.push((node, new_id));
        }
        Ok(())
    }

    fn adjust_size(&self, version: &Arc<VersionInner>, new: &RdataSlab, old: Option<&RdataSlab>) {
        self.adjust_size_counts(version, new, old.map(|s| s.record_count() as u64));
    }

    fn adjust_size_counts(
        &self,
        version: &Arc<VersionInner>,
        new: &RdataSlab,
        old_records: Option<u64>,
    ) {
        let mut vs = version.state.write();
        vs.records = vs.records.saturating_sub(old_records.unwrap_or(0))
            + new.record_count() as u64;
        vs.xfr_size += new.size() as u64;
    }

    // ------------------------------------------------------------------
    // metadata
    // ------------------------------------------------------------------

    /// True when the version serves a signed zone.
    pub fn is_secure(&self, version: &VersionHandle) -> Result<bool, StoreError> {
        self.check_version(version)?;
        Ok(version.inner.state.read().secure)
    }

    /// The NSEC3 parameters in force, if the zone is NSEC3-signed.
    pub fn nsec3_parameters(
        &self,
        version: &VersionHandle,
    ) -> Result<Option<Nsec3Param>, StoreError> {
        self.check_version(version)?;
        Ok(version.inner.state.read().nsec3.clone())
    }

    /// Record count and transfer size of the version.
    pub fn get_size(&self, version: &VersionHandle) -> Result<ZoneSize, StoreError> {
        self.check_version(version)?;
        let vs = version.inner.state.read();
        Ok(ZoneSize {
            records: vs.records,
            bytes: vs.xfr_size,
        })
    }

    // ------------------------------------------------------------------
    // signing-time maintenance
    // ------------------------------------------------------------------

    /// Changes the re-sign deadline of the version-visible rdataset.
    ///
    /// `None` withdraws the rdataset from the heap. The stored key is only
    /// perturbed when the deadline actually moves, so the heap invariant is
    /// preserved by construction.
    pub fn set_signing_time(
        &self,
        node: NodeId,
        version: &VersionHandle,
        type_pair: TypePair,
        when: Option<(u32, bool)>,
    ) -> Result<bool, StoreError> {
        self.check_version(version)?;
        let serial = version.serial();
        let tree = self.tree.read();
        let tnode = tree.nodes.get(node);
        let mut part = self.partitions[tnode.locknum].write();
        let Some(id) = part.visible_type(tnode, type_pair, serial) else {
            return Ok(false);
        };

        let (enrolled, old_key) = {
            let h = part.headers.get(id);
            (h.heap_index != 0, (h.resign, h.resign_lsb))
        };
        match when {
            None => {
                let header = part.headers.get_mut(id);
                header.attrs.remove(HeaderAttrs::RESIGN);
                header.resign = 0;
                header.resign_lsb = false;
                part.heap_remove(id);
            }
            Some((resign, lsb)) => {
                {
                    let header = part.headers.get_mut(id);
                    header.attrs.insert(HeaderAttrs::RESIGN);
                    header.resign = resign;
                    header.resign_lsb = lsb;
                }
                if !enrolled {
                    part.heap_insert(id);
                } else if (resign, lsb) < old_key {
                    part.heap_decreased(id);
                } else if (resign, lsb) > old_key {
                    part.heap_increased(id);
                }
                if version.is_writer() {
                    version.inner.state.write().resigned.push((node, id));
                }
            }
        }
        Ok(true)
    }

    /// The earliest re-sign deadline across every partition.
    ///
    /// Partition locks are taken one at a time in ascending order; the
    /// winning entry is copied out.
    pub fn get_signing_time(&self) -> Option<SigningTime> {
        let tree = self.tree.read();
        let mut best: Option<SigningTime> = None;
        for partition in self.partitions.iter() {
            let part = partition.read();
            let Some(root) = part.heap_root() else {
                continue;
            };
            let header = part.headers.get(root);
            let candidate_key = (header.resign, header.resign_lsb);
            if best
                .as_ref()
                .is_some_and(|b| (b.resign, b.resign_lsb) <= candidate_key)
            {
                continue;
            }
            best = Some(SigningTime {
                name: tree.nodes.get(header.node).name.clone(),
                type_pair: header.type_pair,
                resign: header.resign,
                resign_lsb: header.resign_lsb,
            });
        }
        best
    }

    // ------------------------------------------------------------------
    // glue-cache statistics
    // ------------------------------------------------------------------

    /// Enables or disables glue-cache hit/miss accounting.
    pub fn set_gluecache_stats(&self, enabled: bool) {
        self.glue_stats.store(enabled, Ordering::Relaxed);
    }

    /// Accumulated glue-cache (hits, misses).
    pub fn gluecache_stats(&self) -> (u64, u64) {
        (
            self.glue_hits.load(Ordering::Relaxed),
            self.glue_misses.load(Ordering::Relaxed),
        )
    }

    pub(crate) fn count_glue(&self, hit: bool) {
        if !self.glue_stats.load(Ordering::Relaxed) {
            return;
        }
        if hit {
            self.glue_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.glue_misses.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Read guard pinning one node's partition, see [`ZoneDb::lock_node`].
pub struct NodeLock<'a> {
    _guard: RwLockReadGuard<'a, Partition>,
}

fn locknum_of(name: &Name, partitions: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    name.hash(&mut hasher);
    (hasher.finish() as usize) & (partitions - 1)
}

fn apply_resign(header: &mut RdatasetHeader, meta: &RdatasetMeta) {
    if let Some((resign, lsb)) = meta.resign {
        header.attrs.insert(HeaderAttrs::RESIGN);
        header.resign = resign;
        header.resign_lsb = lsb;
    }
}

/// Swaps `old` for `new` in the node's sibling list.
fn replace_sibling(part: &mut Partition, node: &Node, old: HeaderId, new: HeaderId) {
    if node.data_head() == Some(old) {
        node.set_data_head(Some(new));
        return;
    }
    let mut cur = node.data_head();
    while let Some(id) = cur {
        if part.headers.get(id).next == Some(old) {
            part.headers.get_mut(id).next = Some(new);
            return;
        }
        cur = part.headers.get(id).next;
    }
    debug_assert!(false, "sibling list does not contain the replaced header");
}

/// Unlinks a top-of-chain header, promoting its `down` successor, and frees
/// it.
fn unlink_top(part: &mut Partition, node: &Node, header_id: HeaderId) {
    let down = part.headers.get(header_id).down;
    let next = part.headers.get(header_id).next;
    if let Some(d) = down {
        part.headers.get_mut(d).next = next;
    }
    let replacement = down.or(next);

    if node.data_head() == Some(header_id) {
        node.set_data_head(match down {
            Some(d) => Some(d),
            None => next,
        });
    } else {
        let mut cur = node.data_head();
        while let Some(id) = cur {
            if part.headers.get(id).next == Some(header_id) {
                part.headers.get_mut(id).next = match down {
                    Some(d) => Some(d),
                    None => next,
                };
                break;
            }
            cur = part.headers.get(id).next;
        }
        debug_assert!(replacement.is_none() || cur.is_some() || node.data_head().is_some());
    }
    part.headers.remove(header_id);
}

/// Frees the shadowed tail below a committed header.
fn free_down_tail(part: &mut Partition, header_id: HeaderId) {
    let mut cur = part.headers.get_mut(header_id).down.take();
    while let Some(id) = cur {
        part.heap_remove(id);
        let freed = part.headers.remove(id);
        cur = freed.down;
    }
}
