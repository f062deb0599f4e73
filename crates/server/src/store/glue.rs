// Copyright 2015-2023 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The glue cache.
//!
//! Rendering a referral wants the A and AAAA rdatasets of every NS target in
//! the additional section. Those lookups are memoized per NS header: the
//! first consumer computes the list and publishes it through a set-once cell
//! with release semantics, later consumers clone the shared list. An empty
//! list is itself the negative answer ("looked up, found none"). The cache
//! dies with its header, so any structural change to the delegation
//! invalidates it; readers still holding the list keep it alive until they
//! are done with it.

use std::sync::Arc;

use alder_proto::rr::{Name, RData, RecordType, TypePair};
use tracing::debug;

use crate::error::StoreError;
use crate::store::db::ZoneDb;
use crate::store::find::{FindOptions, FindOutcome, FoundRdataset};
use crate::store::node::NodeId;
use crate::store::version::VersionHandle;

/// The additional-section addresses of one NS target.
#[derive(Clone, Debug)]
pub struct GlueEntry {
    /// the NS target host
    pub name: Name,
    /// its A rdataset, if the zone has one
    pub a: Option<FoundRdataset>,
    /// signature over the A rdataset
    pub a_sig: Option<FoundRdataset>,
    /// its AAAA rdataset, if the zone has one
    pub aaaa: Option<FoundRdataset>,
    /// signature over the AAAA rdataset
    pub aaaa_sig: Option<FoundRdataset>,
    /// the target is in bailiwick: below the delegation owner, so resolvers
    /// cannot chase it without this glue
    pub required: bool,
}

/// The memoized additional-section list of one NS rdataset.
///
/// An empty list records that the lookup ran and found nothing.
#[derive(Debug, Default)]
pub struct GlueList {
    entries: Vec<GlueEntry>,
}

impl GlueList {
    /// The cached entries.
    pub fn entries(&self) -> &[GlueEntry] {
        &self.entries
    }
}

impl ZoneDb {
    /// Appends the glue for the NS rdataset at `node` to `out`.
    ///
    /// Returns false when the node has no visible NS rdataset. The first
    /// in-bailiwick entry is moved to the front of the appended range so a
    /// renderer honors it even under truncation.
    pub fn add_glue(
        &self,
        node: NodeId,
        version: &VersionHandle,
        out: &mut Vec<GlueEntry>,
    ) -> Result<bool, StoreError> {
        self.check_version(version)?;
        let serial = version.serial();

        let (ns_header, cached, ns_slab, owner) = {
            let tree = self.tree.read();
            let tnode = tree.nodes.get(node);
            let part = self.partitions[tnode.locknum].read();
            let Some(ns) = part.visible_type(tnode, TypePair::new(RecordType::NS), serial) else {
                return Ok(false);
            };
            let header = part.headers.get(ns);
            (
                ns,
                header.glue.get().cloned(),
                Arc::clone(header.slab.as_ref().expect("visible headers have data")),
                tnode.name.clone(),
            )
        };

        if let Some(list) = cached {
            self.count_glue(true);
            append_glue(out, &list);
            return Ok(true);
        }
        self.count_glue(false);

        // compute outside every lock; the lookups take their own
        let mut entries = Vec::new();
        for rdata in ns_slab.iter() {
            let Ok(RData::Ns(target)) = RData::parse(RecordType::NS, rdata) else {
                continue;
            };
            if !target.is_subdomain_of(&self.origin) {
                // out-of-zone servers have no glue here
                continue;
            }
            let (a, a_sig) = self.glue_address(&target, RecordType::A, version)?;
            let (aaaa, aaaa_sig) = self.glue_address(&target, RecordType::AAAA, version)?;
            if a.is_none() && aaaa.is_none() {
                continue;
            }
            entries.push(GlueEntry {
                required: target.is_subdomain_of(&owner),
                name: target,
                a,
                a_sig,
                aaaa,
                aaaa_sig,
            });
        }
        debug!(owner = %owner, targets = entries.len(), "computed glue list");
        let list = Arc::new(GlueList { entries });

        // publish, unless the delegation changed underneath us; first writer
        // wins and later computations adopt the published list
        {
            let tree = self.tree.read();
            let tnode = tree.nodes.get(node);
            let part = self.partitions[tnode.locknum].read();
            if part.visible_type(tnode, TypePair::new(RecordType::NS), serial) == Some(ns_header) {
                let header = part.headers.get(ns_header);
                let published = header.glue.get_or_init(|| Arc::clone(&list));
                let published = Arc::clone(published);
                drop(part);
                version.inner.state.write().glue_pushed.push((node, ns_header));
                append_glue(out, &published);
                return Ok(true);
            }
        }
        append_glue(out, &list);
        Ok(true)
    }

    fn glue_address(
        &self,
        target: &Name,
        rtype: RecordType,
        version: &VersionHandle,
    ) -> Result<(Option<FoundRdataset>, Option<FoundRdataset>), StoreError> {
        let answer = self.find(target, rtype, version, FindOptions::GLUE_OK)?;
        Ok(match answer.outcome {
            FindOutcome::Success | FindOutcome::Glue => (answer.rdataset, answer.sig),
            _ => (None, None),
        })
    }
}

fn append_glue(out: &mut Vec<GlueEntry>, list: &GlueList) {
    let start = out.len();
    out.extend(list.entries.iter().cloned());
    if let Some(pos) = out[start..].iter().position(|e| e.required) {
        if pos > 0 {
            let entry = out.remove(start + pos);
            out.insert(start, entry);
        }
    }
}
