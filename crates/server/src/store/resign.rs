// Copyright 2015-2023 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The per-partition resign heaps.
//!
//! Each node-lock partition owns an independent min-heap of RESIGN-attributed
//! headers, ordered by `(resign, resign_lsb)` so the earliest deadline sits
//! at the root. Every header tracks its 1-based heap slot; slot 0 means not
//! enrolled. The heap is only touched under the owning partition's write
//! lock, and keys are only perturbed through the operations here, which
//! restore the heap invariant before returning.

use crate::store::node::{HeaderId, Partition};

impl Partition {
    fn heap_less(&self, a: HeaderId, b: HeaderId) -> bool {
        let ha = self.headers.get(a);
        let hb = self.headers.get(b);
        (ha.resign, ha.resign_lsb) < (hb.resign, hb.resign_lsb)
    }

    fn heap_swap(&mut self, i: usize, j: usize) {
        self.heap.swap(i, j);
        let a = self.heap[i];
        let b = self.heap[j];
        self.headers.get_mut(a).heap_index = i + 1;
        self.headers.get_mut(b).heap_index = j + 1;
    }

    fn sift_up(&mut self, mut idx: usize) {
        while idx > 0 {
            let parent = (idx - 1) / 2;
            if !self.heap_less(self.heap[idx], self.heap[parent]) {
                break;
            }
            self.heap_swap(idx, parent);
            idx = parent;
        }
    }

    fn sift_down(&mut self, mut idx: usize) {
        loop {
            let mut least = idx;
            for child in [2 * idx + 1, 2 * idx + 2] {
                if child < self.heap.len() && self.heap_less(self.heap[child], self.heap[least]) {
                    least = child;
                }
            }
            if least == idx {
                return;
            }
            self.heap_swap(idx, least);
            idx = least;
        }
    }

    /// Enrolls `id`; must not already be in the heap.
    pub(crate) fn heap_insert(&mut self, id: HeaderId) {
        debug_assert_eq!(self.headers.get(id).heap_index, 0, "double enrollment");
        self.heap.push(id);
        let idx = self.heap.len() - 1;
        self.headers.get_mut(id).heap_index = idx + 1;
        self.sift_up(idx);
    }

    /// Removes `id` if enrolled.
    pub(crate) fn heap_remove(&mut self, id: HeaderId) {
        let slot = self.headers.get(id).heap_index;
        if slot == 0 {
            return;
        }
        let idx = slot - 1;
        self.headers.get_mut(id).heap_index = 0;

        let last = self.heap.pop().expect("enrolled header implies entries");
        if last == id {
            return;
        }
        self.heap[idx] = last;
        self.headers.get_mut(last).heap_index = idx + 1;
        self.sift_down(idx);
        self.sift_up(idx);
    }

    /// Restores the invariant after `id`'s key moved earlier.
    pub(crate) fn heap_decreased(&mut self, id: HeaderId) {
        let slot = self.headers.get(id).heap_index;
        debug_assert_ne!(slot, 0, "key change on unenrolled header");
        self.sift_up(slot - 1);
    }

    /// Restores the invariant after `id`'s key moved later.
    pub(crate) fn heap_increased(&mut self, id: HeaderId) {
        let slot = self.headers.get(id).heap_index;
        debug_assert_ne!(slot, 0, "key change on unenrolled header");
        self.sift_down(slot - 1);
    }

    /// The earliest-deadline header of this partition.
    pub(crate) fn heap_root(&self) -> Option<HeaderId> {
        self.heap.first().copied()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use alder_proto::rr::{RecordType, SlabBuilder, TypePair};

    use super::*;
    use crate::store::TrustLevel;
    use crate::store::node::{HeaderAttrs, NodeId, RdatasetHeader};

    fn header(partition: &mut Partition, resign: u32, lsb: bool) -> HeaderId {
        let mut builder = SlabBuilder::new();
        builder.push(b"rdata").unwrap();
        let mut h = RdatasetHeader::new(
            NodeId(0),
            TypePair::new(RecordType::A),
            1,
            300,
            TrustLevel::Ultimate,
            Some(Arc::new(builder.build().unwrap())),
        );
        h.attrs |= HeaderAttrs::RESIGN;
        h.resign = resign;
        h.resign_lsb = lsb;
        partition.headers.insert(h)
    }

    fn drain(partition: &mut Partition) -> Vec<(u32, bool)> {
        let mut order = vec![];
        while let Some(root) = partition.heap_root() {
            let h = partition.headers.get(root);
            order.push((h.resign, h.resign_lsb));
            partition.heap_remove(root);
        }
        order
    }

    #[test]
    fn test_earliest_first() {
        let mut partition = Partition::default();
        for (resign, lsb) in [(50, false), (10, true), (10, false), (99, false), (3, false)] {
            let id = header(&mut partition, resign, lsb);
            partition.heap_insert(id);
        }
        assert_eq!(
            drain(&mut partition),
            vec![(3, false), (10, false), (10, true), (50, false), (99, false)]
        );
    }

    #[test]
    fn test_key_changes_keep_invariant() {
        let mut partition = Partition::default();
        let ids = (0..6)
            .map(|i| {
                let id = header(&mut partition, 100 + i, false);
                partition.heap_insert(id);
                id
            })
            .collect::<Vec<_>>();

        partition.headers.get_mut(ids[5]).resign = 1;
        partition.heap_decreased(ids[5]);
        assert_eq!(partition.heap_root(), Some(ids[5]));

        partition.headers.get_mut(ids[5]).resign = 999;
        partition.heap_increased(ids[5]);
        assert_eq!(partition.heap_root(), Some(ids[0]));

        partition.heap_remove(ids[0]);
        assert_eq!(partition.heap_root(), Some(ids[1]));
        assert_eq!(partition.headers.get(ids[0]).heap_index, 0);

        // removing an unenrolled header is a no-op
        partition.heap_remove(ids[0]);
    }
}
