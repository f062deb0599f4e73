// Copyright 2015-2023 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The lookup engine.
//!
//! `find` walks the name tree once, collecting the ancestor chain, and then
//! applies the authoritative answer rules in order: the topmost zone cut or
//! DNAME above the query wins; otherwise wildcard synthesis may apply at a
//! partial match; otherwise existence is denied, with the covering NSEC (or
//! NSEC3, in the hashed tree) attached for signed zones. Negative outcomes
//! are ordinary answers here, not errors; only a self-contradictory database
//! surfaces as [`StoreError::BadDb`].

use std::sync::Arc;

use alder_proto::rr::{Name, Nsec3Param, RdataSlab, RecordType, TypePair};
use bitflags::bitflags;
use tracing::debug;

use crate::error::StoreError;
use crate::store::TrustLevel;
use crate::store::db::{TreeSet, ZoneDb};
use crate::store::node::{HeaderId, NodeId, Partition};
use crate::store::tree::{TrieIter, TrieLookup};
use crate::store::version::VersionHandle;

bitflags! {
    /// Option flags of [`ZoneDb::find`].
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct FindOptions: u32 {
        /// answer below zone cuts with glue instead of referring
        const GLUE_OK     = 0x0001;
        /// suppress wildcard synthesis
        const NO_WILD     = 0x0002;
        /// search the NSEC3 tree of hashed owner names
        const FORCE_NSEC3 = 0x0004;
    }
}

/// How a lookup concluded. All of these are answers, not failures.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FindOutcome {
    /// the requested rdataset was found
    Success,
    /// a CNAME at the query name answers instead of the requested type
    Cname,
    /// a DNAME above the query name redirects the subtree
    Dname,
    /// the query is below a zone cut; the NS rdataset of the cut is returned
    Delegation,
    /// the data exists but sits below a zone cut, returned for glue purposes
    Glue,
    /// an ANY query landed on a zone cut
    ZoneCut,
    /// the name does not exist in the version
    NxDomain,
    /// the name exists but the type does not
    NxRrset,
    /// the name is an empty non-terminal
    EmptyName,
    /// the name does not exist, but a wildcard match existed in an earlier
    /// version
    EmptyWild,
    /// no exact node; the deepest existing ancestor is returned
    PartialMatch,
}

/// One version-visible rdataset handed out of the store.
#[derive(Clone, Debug)]
pub struct FoundRdataset {
    /// the type (and covered type) of the rdataset
    pub type_pair: TypePair,
    /// time to live
    pub ttl: u32,
    /// trust of the data
    pub trust: TrustLevel,
    /// the packed records
    pub slab: Arc<RdataSlab>,
}

impl FoundRdataset {
    pub(crate) fn from_header(part: &Partition, id: HeaderId) -> Self {
        let h = part.headers.get(id);
        Self {
            type_pair: h.type_pair,
            ttl: h.ttl,
            trust: h.trust,
            slab: Arc::clone(h.slab.as_ref().expect("visible headers have data")),
        }
    }
}

/// The answer of [`ZoneDb::find`].
#[derive(Clone, Debug)]
pub struct FindAnswer {
    /// how the lookup concluded
    pub outcome: FindOutcome,
    /// the name the answer belongs to: the owner, the cut, or the denial
    /// proof's owner
    pub name: Option<Name>,
    /// the node the answer belongs to
    pub node: Option<NodeId>,
    /// the primary rdataset
    pub rdataset: Option<FoundRdataset>,
    /// the signature covering `rdataset`
    pub sig: Option<FoundRdataset>,
    /// the answer was synthesized from a wildcard
    pub wildcard: bool,
}

impl FindAnswer {
    fn negative(outcome: FindOutcome) -> Self {
        Self {
            outcome,
            name: None,
            node: None,
            rdataset: None,
            sig: None,
            wildcard: false,
        }
    }
}

/// Iterator over every version-visible rdataset at a node.
pub struct AllRdatasets {
    inner: std::vec::IntoIter<FoundRdataset>,
}

impl Iterator for AllRdatasets {
    type Item = FoundRdataset;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}

struct Cut {
    node: NodeId,
    name: Name,
    dname: bool,
    rdataset: FoundRdataset,
    sig: Option<FoundRdataset>,
}

/// What the header scan at the query node collected.
#[derive(Default)]
struct Scan {
    any_visible: bool,
    found: Option<FoundRdataset>,
    found_sig: Option<FoundRdataset>,
    cname: Option<FoundRdataset>,
    cname_sig: Option<FoundRdataset>,
    nsec: Option<FoundRdataset>,
    nsec_sig: Option<FoundRdataset>,
    ns: Option<FoundRdataset>,
    ns_sig: Option<FoundRdataset>,
}

struct SearchCtx<'a> {
    db: &'a ZoneDb,
    tree: &'a TreeSet,
    serial: u32,
    secure: bool,
    nsec3: Option<Nsec3Param>,
    options: FindOptions,
    rtype: RecordType,
    qname: &'a Name,
}

impl ZoneDb {
    /// Looks up `name` and `rtype` in the given version.
    ///
    /// The contract, in order: the topmost DNAME or non-apex NS above the
    /// query wins ([`FindOutcome::Dname`] / [`FindOutcome::Delegation`],
    /// unless glue is acceptable); a partial match may synthesize a wildcard
    /// answer; denials in signed zones carry the proving NSEC. `RRSIG` is not
    /// a valid query type here; signatures ride along with what they cover.
    pub fn find(
        &self,
        name: &Name,
        rtype: RecordType,
        version: &VersionHandle,
        options: FindOptions,
    ) -> Result<FindAnswer, StoreError> {
        debug_assert_ne!(rtype, RecordType::RRSIG, "signatures are not directly queryable");
        self.check_version(version)?;
        if !name.is_subdomain_of(&self.origin) {
            return Err(StoreError::OutOfZone {
                name: name.clone(),
                origin: self.origin.clone(),
            });
        }

        let (secure, nsec3) = {
            let vs = version.inner.state.read();
            (vs.secure, vs.nsec3.clone())
        };
        let tree = self.tree.read();
        let ctx = SearchCtx {
            db: self,
            tree: &tree,
            serial: version.serial(),
            secure,
            nsec3,
            options,
            rtype,
            qname: name,
        };
        ctx.run()
    }

    /// Finds the deepest existing node at or above `name`.
    pub fn find_node_deepest(&self, name: &Name) -> Result<(FindOutcome, NodeId), StoreError> {
        if !name.is_subdomain_of(&self.origin) {
            return Err(StoreError::OutOfZone {
                name: name.clone(),
                origin: self.origin.clone(),
            });
        }
        let tree = self.tree.read();
        let lookup = tree.main.lookup(name);
        let node = lookup.deepest().unwrap_or(tree.origin_node);
        let outcome = if lookup.exact {
            FindOutcome::Success
        } else {
            FindOutcome::PartialMatch
        };
        Ok((outcome, node))
    }

    /// Every rdataset visible at `node` in the version.
    pub fn all_rdatasets(
        &self,
        node: NodeId,
        version: &VersionHandle,
    ) -> Result<AllRdatasets, StoreError> {
        self.check_version(version)?;
        let serial = version.serial();
        let tree = self.tree.read();
        let tnode = tree.nodes.get(node);
        let part = self.partitions[tnode.locknum].read();
        let collected = part
            .iter_types(tnode)
            .filter_map(|top| part.visible(top, serial))
            .map(|id| FoundRdataset::from_header(&part, id))
            .collect::<Vec<_>>();
        Ok(AllRdatasets {
            inner: collected.into_iter(),
        })
    }
}

impl SearchCtx<'_> {
    fn force_nsec3(&self) -> bool {
        self.options.contains(FindOptions::FORCE_NSEC3)
    }

    fn trie(&self) -> &crate::store::tree::NameTrie {
        if self.force_nsec3() {
            &self.tree.nsec3
        } else {
            &self.tree.main
        }
    }

    fn run(&self) -> Result<FindAnswer, StoreError> {
        let mut lookup = self.trie().lookup(self.qname);

        loop {
            // ancestor zone-cut scan; Q itself is promoted separately
            let cut = if self.force_nsec3() {
                None
            } else {
                let upto = lookup.chain.len() - usize::from(lookup.exact);
                self.scan_ancestor_cuts(&lookup.chain[..upto])
            };

            if let Some(cut) = &cut {
                if cut.dname {
                    debug!(qname = %self.qname, owner = %cut.name, "DNAME above query");
                    return Ok(FindAnswer {
                        outcome: FindOutcome::Dname,
                        name: Some(cut.name.clone()),
                        node: Some(cut.node),
                        rdataset: Some(cut.rdataset.clone()),
                        sig: cut.sig.clone(),
                        wildcard: false,
                    });
                }
                if !self.options.contains(FindOptions::GLUE_OK) {
                    return Ok(FindAnswer {
                        outcome: FindOutcome::Delegation,
                        name: Some(cut.name.clone()),
                        node: Some(cut.node),
                        rdataset: Some(cut.rdataset.clone()),
                        sig: cut.sig.clone(),
                        wildcard: false,
                    });
                }
            }
            let under_cut = cut.is_some();

            if !lookup.exact {
                return self.find_partial(&lookup, under_cut);
            }

            let qnode = lookup.deepest().expect("exact lookups carry their node");
            let scan = self.scan_node(qnode);

            // an invisible node, or an NSEC3 chain from other parameters,
            // does not exist in this version
            if !scan.any_visible || self.nsec3_mismatch(&scan) {
                lookup.exact = false;
                lookup.chain.pop();
                continue;
            }

            return self.classify(qnode, self.qname.clone(), false, under_cut, scan, &lookup);
        }
    }

    /// Walks the chain root-most first; the topmost cut wins and stops the
    /// scan. NS at the zone origin is not a cut.
    fn scan_ancestor_cuts(&self, ancestors: &[NodeId]) -> Option<Cut> {
        for &anc in ancestors {
            let node = self.tree.nodes.get(anc);
            if !node.find_callback() {
                continue;
            }
            let part = self.db.partitions[node.locknum].read();
            if anc != self.tree.origin_node {
                if let Some(ns) =
                    part.visible_type(node, TypePair::new(RecordType::NS), self.serial)
                {
                    let sig = part
                        .visible_type(node, TypePair::rrsig(RecordType::NS), self.serial)
                        .map(|id| FoundRdataset::from_header(&part, id));
                    return Some(Cut {
                        node: anc,
                        name: node.name.clone(),
                        dname: false,
                        rdataset: FoundRdataset::from_header(&part, ns),
                        sig,
                    });
                }
            }
            if let Some(dname) =
                part.visible_type(node, TypePair::new(RecordType::DNAME), self.serial)
            {
                let sig = part
                    .visible_type(node, TypePair::rrsig(RecordType::DNAME), self.serial)
                    .map(|id| FoundRdataset::from_header(&part, id));
                return Some(Cut {
                    node: anc,
                    name: node.name.clone(),
                    dname: true,
                    rdataset: FoundRdataset::from_header(&part, dname),
                    sig,
                });
            }
        }
        None
    }

    /// The header scan at the query node (or the wildcard standing in for
    /// it), collecting everything later steps may need in one pass.
    fn scan_node(&self, node_id: NodeId) -> Scan {
        let node = self.tree.nodes.get(node_id);
        let part = self.db.partitions[node.locknum].read();
        let mut scan = Scan::default();

        let want = TypePair::new(self.rtype);
        // CNAME cannot stand in for the types that prove or sign existence
        let cname_ok = !matches!(self.rtype, RecordType::KEY | RecordType::NSEC);

        for top in part.iter_types(node) {
            let Some(vis) = part.visible(top, self.serial) else {
                continue;
            };
            scan.any_visible = true;
            let tp = part.headers.get(vis).type_pair;
            let rd = || FoundRdataset::from_header(&part, vis);

            if tp == want && self.rtype != RecordType::ANY {
                scan.found = Some(rd());
            } else if tp == TypePair::new(RecordType::CNAME) && cname_ok {
                scan.cname = Some(rd());
            } else if tp == TypePair::rrsig(self.rtype) {
                scan.found_sig = Some(rd());
            } else if tp == TypePair::rrsig(RecordType::CNAME) {
                scan.cname_sig = Some(rd());
            } else if tp == TypePair::new(RecordType::NSEC) {
                scan.nsec = Some(rd());
            } else if tp == TypePair::rrsig(RecordType::NSEC) {
                scan.nsec_sig = Some(rd());
            }

            if tp == TypePair::new(RecordType::NS) {
                scan.ns = Some(rd());
            } else if tp == TypePair::rrsig(RecordType::NS) {
                scan.ns_sig = Some(rd());
            }
        }
        scan
    }

    /// An NSEC3 node whose parameters disagree with the version's is part of
    /// a chain being replaced; it does not exist for this version.
    fn nsec3_mismatch(&self, scan: &Scan) -> bool {
        if !self.force_nsec3() || self.rtype != RecordType::NSEC3 {
            return false;
        }
        let Some(found) = &scan.found else {
            return false;
        };
        let Some(params) = &self.nsec3 else {
            return true;
        };
        let Some(rdata) = found.slab.get(0) else {
            return true;
        };
        // hash(1) flags(1) iterations(2) salt_len(1) salt
        if rdata.len() < 5 {
            return true;
        }
        let salt_len = rdata[4] as usize;
        rdata[0] != params.hash_algorithm
            || u16::from_be_bytes([rdata[2], rdata[3]]) != params.iterations
            || rdata.get(5..5 + salt_len) != Some(params.salt.as_slice())
    }

    /// Steps 5 and 6: zone-cut promotion at the node, then classification.
    fn classify(
        &self,
        node_id: NodeId,
        fname: Name,
        wildcard: bool,
        under_ancestor_cut: bool,
        scan: Scan,
        lookup: &TrieLookup,
    ) -> Result<FindAnswer, StoreError> {
        let at_cut = !self.force_nsec3()
            && node_id != self.tree.origin_node
            && scan.ns.is_some();

        if at_cut
            && !self.options.contains(FindOptions::GLUE_OK)
            && !matches!(self.rtype, RecordType::NSEC | RecordType::KEY)
        {
            return Ok(FindAnswer {
                outcome: FindOutcome::Delegation,
                name: Some(fname),
                node: Some(node_id),
                rdataset: scan.ns,
                sig: scan.ns_sig,
                wildcard,
            });
        }
        let under_cut = under_ancestor_cut || at_cut;

        if self.rtype == RecordType::ANY {
            let outcome = if under_cut {
                FindOutcome::ZoneCut
            } else {
                FindOutcome::Success
            };
            return Ok(FindAnswer {
                outcome,
                name: Some(fname),
                node: Some(node_id),
                rdataset: None,
                sig: None,
                wildcard,
            });
        }

        if let Some(found) = scan.found {
            let outcome = if !under_cut
                || (at_cut && matches!(self.rtype, RecordType::NSEC | RecordType::KEY))
            {
                FindOutcome::Success
            } else {
                FindOutcome::Glue
            };
            return Ok(FindAnswer {
                outcome,
                name: Some(fname),
                node: Some(node_id),
                rdataset: Some(found),
                sig: scan.found_sig,
                wildcard,
            });
        }

        if let Some(cname) = scan.cname {
            return Ok(FindAnswer {
                outcome: FindOutcome::Cname,
                name: Some(fname),
                node: Some(node_id),
                rdataset: Some(cname),
                sig: scan.cname_sig,
                wildcard,
            });
        }

        // no data of the type: NXRRSET, carrying the node's own NSEC proof
        // in signed zones
        let mut answer = FindAnswer {
            outcome: FindOutcome::NxRrset,
            name: Some(fname),
            node: Some(node_id),
            rdataset: None,
            sig: None,
            wildcard,
        };
        if self.secure && !self.force_nsec3() {
            if let (Some(nsec), sig) = (scan.nsec, scan.nsec_sig) {
                answer.rdataset = Some(nsec);
                answer.sig = sig;
            } else if !self.tree.nsec.is_empty() {
                let (node, name, nsec, sig) = self.closest_nsec(&lookup.key)?;
                answer.name = Some(name);
                answer.node = Some(node);
                answer.rdataset = Some(nsec);
                answer.sig = Some(sig);
            }
        }
        Ok(answer)
    }

    /// The partial-match branch: wildcard synthesis, empty non-terminal
    /// detection, then denial.
    fn find_partial(
        &self,
        lookup: &TrieLookup,
        under_cut: bool,
    ) -> Result<FindAnswer, StoreError> {
        let mut empty_wild = false;

        // wildcard search is disabled beneath a recorded zonecut
        if !under_cut && !self.force_nsec3() && !self.options.contains(FindOptions::NO_WILD) {
            for &anc in lookup.chain.iter().rev() {
                let anc_node = self.tree.nodes.get(anc);
                if !anc_node.wild() {
                    continue;
                }
                if self.node_active(anc) {
                    continue;
                }
                let wname = anc_node.name.prepend_label(b"*")?;
                let Some(wnode) = self.tree.main.get(&wname) else {
                    continue;
                };
                if !self.node_active(wnode) {
                    // a wildcard match existed in some other version
                    empty_wild = true;
                    continue;
                }
                if self.wildcard_blocked(&lookup.key, &anc_node.name) {
                    break;
                }
                debug!(qname = %self.qname, wildcard = %wname, "wildcard match");
                let scan = self.scan_node(wnode);
                return self.classify(wnode, self.qname.clone(), true, false, scan, lookup);
            }
        }

        // empty non-terminal: the next active name in order is beneath Q
        let mut iter = TrieIter::new(self.trie(), lookup.key.clone());
        while let Some(next) = iter.next() {
            if !self.node_active(next) {
                continue;
            }
            if self.tree.nodes.get(next).name.is_subdomain_of(self.qname) {
                return Ok(FindAnswer {
                    outcome: FindOutcome::EmptyName,
                    name: Some(self.qname.clone()),
                    node: None,
                    rdataset: None,
                    sig: None,
                    wildcard: false,
                });
            }
            break;
        }

        let outcome = if empty_wild {
            FindOutcome::EmptyWild
        } else {
            FindOutcome::NxDomain
        };
        if !self.secure {
            return Ok(FindAnswer::negative(outcome));
        }

        if self.force_nsec3() {
            let (node, name, nsec3, sig) = self.closest_nsec3(&lookup.key)?;
            return Ok(FindAnswer {
                outcome,
                name: Some(name),
                node: Some(node),
                rdataset: Some(nsec3),
                sig: Some(sig),
                wildcard: false,
            });
        }
        if self.tree.nsec.is_empty() {
            // an NSEC3-signed zone proves denials through the hashed tree
            return Ok(FindAnswer::negative(outcome));
        }
        let (node, name, nsec, sig) = self.closest_nsec(&lookup.key)?;
        Ok(FindAnswer {
            outcome,
            name: Some(name),
            node: Some(node),
            rdataset: Some(nsec),
            sig: Some(sig),
            wildcard: false,
        })
    }

    /// Walks the NSEC auxiliary tree backwards for the proof covering the
    /// denied name. Exhaustion means the zone data contradicts itself.
    fn closest_nsec(
        &self,
        key: &[u8],
    ) -> Result<(NodeId, Name, FoundRdataset, FoundRdataset), StoreError> {
        let mut iter = TrieIter::new(&self.tree.nsec, key.to_vec());
        while let Some(candidate) = iter.prev() {
            let node = self.tree.nodes.get(candidate);
            let part = self.db.partitions[node.locknum].read();
            let nsec = part.visible_type(node, TypePair::new(RecordType::NSEC), self.serial);
            let sig = part.visible_type(node, TypePair::rrsig(RecordType::NSEC), self.serial);
            if let (Some(nsec), Some(sig)) = (nsec, sig) {
                return Ok((
                    candidate,
                    node.name.clone(),
                    FoundRdataset::from_header(&part, nsec),
                    FoundRdataset::from_header(&part, sig),
                ));
            }
        }
        Err(StoreError::BadDb("no NSEC covers the denied name"))
    }

    /// As [`Self::closest_nsec`], in the hashed tree, wrapping from the first
    /// entry to the last.
    fn closest_nsec3(
        &self,
        key: &[u8],
    ) -> Result<(NodeId, Name, FoundRdataset, FoundRdataset), StoreError> {
        let mut iter = TrieIter::new(&self.tree.nsec3, key.to_vec());
        let mut wrapped = false;
        let mut remaining = self.tree.nsec3.len() + 1;
        while remaining > 0 {
            remaining -= 1;
            let Some((candidate, wrap)) = iter.prev_wrapping() else {
                break;
            };
            if wrap {
                if wrapped {
                    break;
                }
                wrapped = true;
            }
            let node = self.tree.nodes.get(candidate);
            let part = self.db.partitions[node.locknum].read();
            let nsec3 = part.visible_type(node, TypePair::new(RecordType::NSEC3), self.serial);
            let sig = part.visible_type(node, TypePair::rrsig(RecordType::NSEC3), self.serial);
            if let (Some(nsec3), Some(sig)) = (nsec3, sig) {
                return Ok((
                    candidate,
                    node.name.clone(),
                    FoundRdataset::from_header(&part, nsec3),
                    FoundRdataset::from_header(&part, sig),
                ));
            }
        }
        Err(StoreError::BadDb("no NSEC3 covers the denied name"))
    }

    /// A wildcard match is invalid when an active name sits strictly between
    /// the wildcard's parent and the query; the tree neighbors of the query
    /// betray such a name.
    fn wildcard_blocked(&self, qkey: &[u8], wparent: &Name) -> bool {
        let mut iter = TrieIter::new(&self.tree.main, qkey.to_vec());
        let before = self.next_active(&mut iter, false);
        let mut iter = TrieIter::new(&self.tree.main, qkey.to_vec());
        let after = self.next_active(&mut iter, true);

        for neighbor in [before, after].into_iter().flatten() {
            let nname = &self.tree.nodes.get(neighbor).name;
            if blocks_wildcard(nname, self.qname, wparent) {
                return true;
            }
        }
        false
    }

    fn next_active(&self, iter: &mut TrieIter<'_>, forward: bool) -> Option<NodeId> {
        loop {
            let candidate = if forward { iter.next() } else { iter.prev() }?;
            if self.node_active(candidate) {
                return Some(candidate);
            }
        }
    }

    fn node_active(&self, node_id: NodeId) -> bool {
        let node = self.tree.nodes.get(node_id);
        let part = self.db.partitions[node.locknum].read();
        part.node_active(node, self.serial)
    }
}

/// True when `neighbor` proves an active name between `wparent` and the
/// query: it is a subdomain of some ancestor-or-self of `qname` strictly
/// below `wparent`.
fn blocks_wildcard(neighbor: &Name, qname: &Name, wparent: &Name) -> bool {
    let q_labels = qname.num_labels() as usize;
    let wp_labels = wparent.num_labels() as usize;
    for k in (wp_labels + 1)..=q_labels {
        if neighbor.is_subdomain_of(&qname.trim_to(k)) {
            return true;
        }
    }
    false
}
