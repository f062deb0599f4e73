// Copyright 2015-2023 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Nodes and their multi-version rdataset header chains.
//!
//! One node exists per distinct owner name in the tree. Its rdatasets hang
//! off a singly linked list of headers: siblings of distinct type via `next`,
//! and per type a `down` chain of shadowed headers in strictly decreasing
//! serial order. A reader attached to version `v` takes the first entry of a
//! type's chain with `serial <= v` that is not ignored.
//!
//! Nodes live in an arena guarded by the tree lock; headers live in
//! per-partition arenas guarded by that partition's node lock. Node fields
//! that mutate under a partition lock rather than the tree lock are atomics.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering};

use alder_proto::rr::{Name, RdataSlab, TypePair};
use bitflags::bitflags;
use once_cell::sync::OnceCell;

use crate::store::TrustLevel;
use crate::store::glue::GlueList;

/// Identifies a node in the zone tree arena.
///
/// Node ids stay valid as long as the node is referenced or holds data in any
/// live version.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct NodeId(pub(crate) u32);

/// Identifies a header within the arena of the partition that owns its node.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub(crate) struct HeaderId(pub(crate) u32);

bitflags! {
    /// Attribute bits of an rdataset header.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub(crate) struct HeaderAttrs: u16 {
        /// marks "this type does not exist" at the header's serial
        const NONEXISTENT = 0x0001;
        /// installed by a rolled-back writer; invisible at every serial
        const IGNORE      = 0x0002;
        /// kept only for statistics, no longer served
        const ANCIENT     = 0x0004;
        /// enrolled in the partition resign heap
        const RESIGN      = 0x0008;
        /// counted in rdataset statistics
        const STATCOUNT   = 0x0010;
    }
}

/// NSEC relationship of a node.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub(crate) enum NodeNsec {
    /// plain data node
    Normal = 0,
    /// has an NSEC rdataset and a twin in the auxiliary tree
    HasNsec = 1,
    /// lives in the NSEC3 tree
    Nsec3 = 2,
}

impl From<u8> for NodeNsec {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::HasNsec,
            2 => Self::Nsec3,
            _ => Self::Normal,
        }
    }
}

/// One owner name's container in the tree.
pub(crate) struct Node {
    pub(crate) name: Name,
    /// which node-lock partition covers this node
    pub(crate) locknum: usize,
    /// head of the header list, stored as `HeaderId + 1`; 0 when empty
    data: AtomicU32,
    wild: AtomicBool,
    find_callback: AtomicBool,
    nsec: AtomicU8,
    refs: AtomicU32,
}

impl Node {
    pub(crate) fn new(name: Name, locknum: usize) -> Self {
        Self {
            name,
            locknum,
            data: AtomicU32::new(0),
            wild: AtomicBool::new(false),
            find_callback: AtomicBool::new(false),
            nsec: AtomicU8::new(NodeNsec::Normal as u8),
            refs: AtomicU32::new(0),
        }
    }

    /// First header on the list; mutated only under the partition write lock.
    pub(crate) fn data_head(&self) -> Option<HeaderId> {
        match self.data.load(Ordering::Acquire) {
            0 => None,
            n => Some(HeaderId(n - 1)),
        }
    }

    pub(crate) fn set_data_head(&self, head: Option<HeaderId>) {
        self.data
            .store(head.map_or(0, |id| id.0 + 1), Ordering::Release);
    }

    pub(crate) fn wild(&self) -> bool {
        self.wild.load(Ordering::Relaxed)
    }

    pub(crate) fn set_wild(&self, wild: bool) {
        self.wild.store(wild, Ordering::Relaxed);
    }

    pub(crate) fn find_callback(&self) -> bool {
        self.find_callback.load(Ordering::Relaxed)
    }

    pub(crate) fn set_find_callback(&self, enabled: bool) {
        self.find_callback.store(enabled, Ordering::Relaxed);
    }

    pub(crate) fn nsec(&self) -> NodeNsec {
        NodeNsec::from(self.nsec.load(Ordering::Relaxed))
    }

    pub(crate) fn set_nsec(&self, nsec: NodeNsec) {
        self.nsec.store(nsec as u8, Ordering::Relaxed);
    }

    pub(crate) fn ref_inc(&self) {
        self.refs.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the remaining count.
    pub(crate) fn ref_dec(&self) -> u32 {
        let prev = self.refs.fetch_sub(1, Ordering::Relaxed);
        debug_assert!(prev > 0, "node reference count underflow");
        prev - 1
    }

    pub(crate) fn refs(&self) -> u32 {
        self.refs.load(Ordering::Relaxed)
    }
}

/// The record-of-record about one rdataset slab at a node.
pub(crate) struct RdatasetHeader {
    pub(crate) type_pair: TypePair,
    pub(crate) ttl: u32,
    pub(crate) trust: TrustLevel,
    pub(crate) attrs: HeaderAttrs,
    /// the writer version that installed this header
    pub(crate) serial: u32,
    /// the older header this one shadows, same type
    pub(crate) down: Option<HeaderId>,
    /// sibling header of a different type at the same node
    pub(crate) next: Option<HeaderId>,
    pub(crate) node: NodeId,
    /// `None` exactly when NONEXISTENT
    pub(crate) slab: Option<Arc<RdataSlab>>,
    /// 1-based slot in the partition resign heap; 0 when not enrolled
    pub(crate) heap_index: usize,
    pub(crate) resign: u32,
    pub(crate) resign_lsb: bool,
    /// lazily computed additional-section cache, NS rdatasets only
    pub(crate) glue: OnceCell<Arc<GlueList>>,
}

impl RdatasetHeader {
    pub(crate) fn new(
        node: NodeId,
        type_pair: TypePair,
        serial: u32,
        ttl: u32,
        trust: TrustLevel,
        slab: Option<Arc<RdataSlab>>,
    ) -> Self {
        let mut attrs = HeaderAttrs::empty();
        if slab.is_none() {
            attrs |= HeaderAttrs::NONEXISTENT;
        }
        Self {
            type_pair,
            ttl,
            trust,
            attrs,
            serial,
            down: None,
            next: None,
            node,
            slab,
            heap_index: 0,
            resign: 0,
            resign_lsb: false,
            glue: OnceCell::new(),
        }
    }

    /// Visible to a reader at `serial`: committed at or before it, not rolled
    /// back.
    pub(crate) fn visible_at(&self, serial: u32) -> bool {
        self.serial <= serial && !self.attrs.contains(HeaderAttrs::IGNORE)
    }

    pub(crate) fn is_nonexistent(&self) -> bool {
        self.attrs.contains(HeaderAttrs::NONEXISTENT)
    }
}

/// A typed arena of headers with slot reuse.
#[derive(Default)]
pub(crate) struct HeaderArena {
    slots: Vec<Option<RdatasetHeader>>,
    free: Vec<u32>,
}

impl HeaderArena {
    pub(crate) fn insert(&mut self, header: RdatasetHeader) -> HeaderId {
        if let Some(idx) = self.free.pop() {
            self.slots[idx as usize] = Some(header);
            return HeaderId(idx);
        }
        self.slots.push(Some(header));
        HeaderId((self.slots.len() - 1) as u32)
    }

    pub(crate) fn remove(&mut self, id: HeaderId) -> RdatasetHeader {
        let header = self.slots[id.0 as usize]
            .take()
            .expect("removing a freed header");
        self.free.push(id.0);
        header
    }

    pub(crate) fn get(&self, id: HeaderId) -> &RdatasetHeader {
        self.slots[id.0 as usize]
            .as_ref()
            .expect("referencing a freed header")
    }

    pub(crate) fn get_mut(&mut self, id: HeaderId) -> &mut RdatasetHeader {
        self.slots[id.0 as usize]
            .as_mut()
            .expect("referencing a freed header")
    }
}

/// One node-lock partition: the headers of every node with this `locknum`,
/// plus the partition's share of the resign heap.
#[derive(Default)]
pub(crate) struct Partition {
    pub(crate) headers: HeaderArena,
    /// min-heap of RESIGN-attributed headers, managed in `resign.rs`
    pub(crate) heap: Vec<HeaderId>,
}

impl Partition {
    /// Walks the sibling list for the first header of `type_pair`.
    pub(crate) fn find_type(&self, node: &Node, type_pair: TypePair) -> Option<HeaderId> {
        let mut cur = node.data_head();
        while let Some(id) = cur {
            let header = self.headers.get(id);
            if header.type_pair == type_pair {
                return Some(id);
            }
            cur = header.next;
        }
        None
    }

    /// Resolves the entry of a `down` chain visible at `serial`.
    ///
    /// `None` means the type does not exist at that version, either because
    /// no entry is old enough or because a NONEXISTENT marker terminates it.
    pub(crate) fn visible(&self, top: HeaderId, serial: u32) -> Option<HeaderId> {
        let mut cur = Some(top);
        while let Some(id) = cur {
            let header = self.headers.get(id);
            if header.visible_at(serial) {
                if header.is_nonexistent() {
                    return None;
                }
                return Some(id);
            }
            cur = header.down;
        }
        None
    }

    /// The version-visible header of `type_pair` at `node`, if any.
    pub(crate) fn visible_type(
        &self,
        node: &Node,
        type_pair: TypePair,
        serial: u32,
    ) -> Option<HeaderId> {
        self.find_type(node, type_pair)
            .and_then(|id| self.visible(id, serial))
    }

    /// True when any positive rdataset is visible at `serial`.
    pub(crate) fn node_active(&self, node: &Node, serial: u32) -> bool {
        self.iter_types(node)
            .any(|id| self.visible(id, serial).is_some())
    }

    /// Iterates the sibling list, one header per stored type.
    pub(crate) fn iter_types<'a>(&'a self, node: &Node) -> TypeIter<'a> {
        TypeIter {
            partition: self,
            cur: node.data_head(),
        }
    }
}

pub(crate) struct TypeIter<'a> {
    partition: &'a Partition,
    cur: Option<HeaderId>,
}

impl Iterator for TypeIter<'_> {
    type Item = HeaderId;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.cur?;
        self.cur = self.partition.headers.get(id).next;
        Some(id)
    }
}

/// The arena of all nodes, guarded by the tree lock.
#[derive(Default)]
pub(crate) struct NodeArena {
    slots: Vec<Option<Node>>,
    free: Vec<u32>,
    live: usize,
}

impl NodeArena {
    pub(crate) fn insert(&mut self, node: Node) -> NodeId {
        self.live += 1;
        if let Some(idx) = self.free.pop() {
            self.slots[idx as usize] = Some(node);
            return NodeId(idx);
        }
        self.slots.push(Some(node));
        NodeId((self.slots.len() - 1) as u32)
    }

    pub(crate) fn remove(&mut self, id: NodeId) -> Node {
        let node = self.slots[id.0 as usize]
            .take()
            .expect("removing a freed node");
        self.free.push(id.0);
        self.live -= 1;
        node
    }

    pub(crate) fn get(&self, id: NodeId) -> &Node {
        self.slots[id.0 as usize]
            .as_ref()
            .expect("referencing a freed node")
    }

    pub(crate) fn len(&self) -> usize {
        self.live
    }
}

#[cfg(test)]
mod tests {
    use alder_proto::rr::{RecordType, SlabBuilder};

    use super::*;

    fn slab(rdata: &[u8]) -> Arc<RdataSlab> {
        let mut builder = SlabBuilder::new();
        builder.push(rdata).unwrap();
        Arc::new(builder.build().unwrap())
    }

    #[test]
    fn test_down_chain_visibility() {
        let node = Node::new(Name::from_ascii("a.example.").unwrap(), 0);
        let mut partition = Partition::default();
        let tp = TypePair::new(RecordType::A);

        // serial 1 then serial 3 shadowing it
        let old = partition.headers.insert(RdatasetHeader::new(
            NodeId(0),
            tp,
            1,
            300,
            TrustLevel::Ultimate,
            Some(slab(b"old")),
        ));
        let mut newer =
            RdatasetHeader::new(NodeId(0), tp, 3, 300, TrustLevel::Ultimate, Some(slab(b"new")));
        newer.down = Some(old);
        let top = partition.headers.insert(newer);
        node.set_data_head(Some(top));

        assert_eq!(partition.visible_type(&node, tp, 1), Some(old));
        assert_eq!(partition.visible_type(&node, tp, 2), Some(old));
        assert_eq!(partition.visible_type(&node, tp, 3), Some(top));
        assert_eq!(partition.visible_type(&node, tp, 9), Some(top));
        assert_eq!(partition.visible_type(&node, tp, 0), None);
    }

    #[test]
    fn test_nonexistent_terminates_chain() {
        let node = Node::new(Name::from_ascii("a.example.").unwrap(), 0);
        let mut partition = Partition::default();
        let tp = TypePair::new(RecordType::TXT);

        let old = partition.headers.insert(RdatasetHeader::new(
            NodeId(0),
            tp,
            1,
            300,
            TrustLevel::Ultimate,
            Some(slab(b"txt")),
        ));
        let mut tombstone =
            RdatasetHeader::new(NodeId(0), tp, 2, 0, TrustLevel::Ultimate, None);
        tombstone.down = Some(old);
        let top = partition.headers.insert(tombstone);
        node.set_data_head(Some(top));

        assert_eq!(partition.visible_type(&node, tp, 1), Some(old));
        assert_eq!(partition.visible_type(&node, tp, 2), None);
        assert!(!partition.node_active(&node, 2));
        assert!(partition.node_active(&node, 1));
    }

    #[test]
    fn test_ignored_headers_are_skipped() {
        let node = Node::new(Name::from_ascii("a.example.").unwrap(), 0);
        let mut partition = Partition::default();
        let tp = TypePair::new(RecordType::A);

        let old = partition.headers.insert(RdatasetHeader::new(
            NodeId(0),
            tp,
            1,
            300,
            TrustLevel::Ultimate,
            Some(slab(b"old")),
        ));
        let mut rolled =
            RdatasetHeader::new(NodeId(0), tp, 2, 300, TrustLevel::Ultimate, Some(slab(b"new")));
        rolled.down = Some(old);
        rolled.attrs |= HeaderAttrs::IGNORE;
        let top = partition.headers.insert(rolled);
        node.set_data_head(Some(top));

        assert_eq!(partition.visible_type(&node, tp, 2), Some(old));
    }
}
