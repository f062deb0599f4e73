// Copyright 2015-2023 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The load pipeline.
//!
//! A zone loads exactly once: `begin_load` gates entry, each rdataset flows
//! through [`LoadGuard::add_rdataset`] into version serial 1, and `end_load`
//! seals the zone, deriving the secure bit and NSEC3 parameters from what
//! arrived at the origin. The loader enforces the structural rules the rest
//! of the store relies on: SOA only at the apex, no NS or NSEC3 at wildcard
//! owners, wildcard magic on the ancestors of every wildcard owner, and the
//! NSEC/NSEC3 auxiliary trees kept in step with the main tree.

use std::sync::Arc;

use alder_proto::rr::{Name, RData, RdataSlab, RecordType, TypePair};
use data_encoding::HEXLOWER;
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::store::TrustLevel;
use crate::store::db::{DbAttrs, ZoneDb};
use crate::store::node::HeaderAttrs;

/// Per-rdataset metadata supplied alongside the slab.
#[derive(Clone, Debug)]
pub struct RdatasetMeta {
    /// time to live of the rdataset
    pub ttl: u32,
    /// trust of the data; loaded zones are [`TrustLevel::Ultimate`]
    pub trust: TrustLevel,
    /// re-sign deadline and tiebreak bit, for signed zones under maintenance
    pub resign: Option<(u32, bool)>,
}

impl RdatasetMeta {
    /// Metadata of a plain authoritative rdataset.
    pub fn authoritative(ttl: u32) -> Self {
        Self {
            ttl,
            trust: TrustLevel::Ultimate,
            resign: None,
        }
    }
}

/// What an add accomplished.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AddOutcome {
    /// a new rdataset (or replacement) was installed
    Added,
    /// the records were merged into an existing rdataset
    Merged,
    /// the rdataset was already present, byte for byte
    Unchanged,
}

/// An exclusive handle over a zone load in progress.
///
/// Dropping the guard without calling [`LoadGuard::end_load`] abandons the
/// load and releases the gate.
pub struct LoadGuard<'a> {
    db: &'a ZoneDb,
    done: bool,
}

impl ZoneDb {
    /// Gates the one-time zone load.
    pub fn begin_load(&self) -> Result<LoadGuard<'_>, StoreError> {
        let mut state = self.state.lock();
        if state.attrs.contains(DbAttrs::LOADING) {
            return Err(StoreError::AlreadyLoading("in progress"));
        }
        if state.attrs.contains(DbAttrs::LOADED) {
            return Err(StoreError::AlreadyLoading("complete"));
        }
        state.attrs.insert(DbAttrs::LOADING);
        debug!(origin = %self.origin, "zone load started");
        Ok(LoadGuard {
            db: self,
            done: false,
        })
    }
}

impl LoadGuard<'_> {
    /// Ingests one rdataset.
    pub fn add_rdataset(
        &mut self,
        name: &Name,
        type_pair: TypePair,
        meta: &RdatasetMeta,
        slab: RdataSlab,
    ) -> Result<AddOutcome, StoreError> {
        let db = self.db;
        db.check_in_zone(name)?;

        let rtype = type_pair.rtype();
        if rtype == RecordType::SOA && name != &db.origin {
            return Err(StoreError::NotZoneTop(name.clone()));
        }
        if name.is_wildcard() {
            if rtype == RecordType::NS {
                return Err(StoreError::InvalidNs(name.clone()));
            }
            if rtype == RecordType::NSEC3 {
                return Err(StoreError::InvalidNsec3(name.clone()));
            }
        }
        if slab.record_count() > db.config.max_records_per_type {
            return Err(StoreError::Range("too many records in one rdataset"));
        }

        let version = {
            let state = db.state.lock();
            Arc::clone(state.versions.current())
        };

        let nsec3_tree = rtype == RecordType::NSEC3 || type_pair.covers() == RecordType::NSEC3;
        let mut tree = db.tree.write();
        let node_id = if nsec3_tree {
            db.ensure_nsec3_node(&mut tree, name)?
        } else {
            db.ensure_main_node(&mut tree, name)?
        };
        if rtype == RecordType::NSEC {
            db.ensure_nsec_twin(&mut tree, name, node_id);
        }

        let node = tree.nodes.get(node_id);
        if (rtype == RecordType::NS && name != &db.origin) || rtype == RecordType::DNAME {
            node.set_find_callback(true);
        }

        let mut part = db.partitions[node.locknum].write();
        let (outcome, header) = db.install_rdataset(
            node,
            node_id,
            &mut part,
            &version,
            type_pair,
            meta,
            Arc::new(slab),
            true,
        )?;

        // loads enroll in the resign heap directly; there is no commit step
        // to do it for them
        if part.headers.get(header).attrs.contains(HeaderAttrs::RESIGN)
            && part.headers.get(header).heap_index == 0
        {
            part.heap_insert(header);
        }
        Ok(outcome)
    }

    /// Seals the load: the zone becomes servable, and the secure bit and
    /// NSEC3 parameters are derived from the origin's rdatasets.
    pub fn end_load(mut self) -> Result<(), StoreError> {
        self.done = true;
        let db = self.db;

        let version = {
            let state = db.state.lock();
            Arc::clone(state.versions.current())
        };
        let serial = version.serial;

        let (has_zone_key, nsec3_rdata) = {
            let tree = db.tree.read();
            let origin = tree.nodes.get(tree.origin_node);
            let part = db.partitions[origin.locknum].read();
            let has_key = part
                .visible_type(origin, TypePair::new(RecordType::DNSKEY), serial)
                .is_some();
            let nsec3 = part
                .visible_type(origin, TypePair::new(RecordType::NSEC3PARAM), serial)
                .and_then(|id| {
                    let header = part.headers.get(id);
                    header
                        .slab
                        .as_ref()
                        .and_then(|slab| slab.get(0).map(<[u8]>::to_vec))
                });
            (has_key, nsec3)
        };

        {
            let mut vs = version.state.write();
            vs.secure = has_zone_key;
            if let Some(rdata) = nsec3_rdata {
                if let RData::Nsec3Param(param) = RData::parse(RecordType::NSEC3PARAM, &rdata)? {
                    debug!(
                        iterations = param.iterations,
                        salt = %HEXLOWER.encode(&param.salt),
                        "NSEC3 chain parameters at the apex"
                    );
                    vs.nsec3 = Some(param);
                }
            }
        }

        let mut state = db.state.lock();
        state.attrs.remove(DbAttrs::LOADING);
        state.attrs.insert(DbAttrs::LOADED);
        info!(origin = %db.origin, secure = has_zone_key, "zone load complete");
        Ok(())
    }
}

impl Drop for LoadGuard<'_> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        warn!(origin = %self.db.origin, "zone load abandoned");
        self.db.state.lock().attrs.remove(DbAttrs::LOADING);
    }
}
