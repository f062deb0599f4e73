// Copyright 2015-2023 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Version management, update operations, glue caching, and resign
//! scheduling.

use std::net::Ipv4Addr;
use std::str::FromStr;

use alder_proto::rr::{Name, RData, RdataSlab, RecordType, SlabBuilder, Soa, TypePair};
use alder_server::StoreError;
use alder_server::store::{
    AddOutcome, FindOptions, FindOutcome, RdatasetMeta, ZoneDb, ZoneDbConfig,
};
use test_support::subscribe;

fn name(s: &str) -> Name {
    Name::from_str(s).unwrap()
}

fn a_slab(last_octet: u8) -> RdataSlab {
    let mut builder = SlabBuilder::new();
    builder
        .push(&RData::A(Ipv4Addr::new(192, 0, 2, last_octet)).to_wire())
        .unwrap();
    builder.build().unwrap()
}

fn a_slab_many(octets: &[u8]) -> RdataSlab {
    let mut builder = SlabBuilder::new();
    for &o in octets {
        builder
            .push(&RData::A(Ipv4Addr::new(192, 0, 2, o)).to_wire())
            .unwrap();
    }
    builder.build().unwrap()
}

fn loaded_zone() -> ZoneDb {
    let db = ZoneDb::new(name("example."), ZoneDbConfig::default());
    let mut load = db.begin_load().unwrap();
    load.add_rdataset(
        &name("example."),
        TypePair::new(RecordType::SOA),
        &RdatasetMeta::authoritative(3600),
        {
            let mut builder = SlabBuilder::new();
            builder
                .push(
                    &RData::Soa(Soa {
                        mname: name("ns1.example."),
                        rname: name("hostmaster.example."),
                        serial: 1,
                        refresh: 7200,
                        retry: 3600,
                        expire: 1209600,
                        minimum: 300,
                    })
                    .to_wire(),
                )
                .unwrap();
            builder.build().unwrap()
        },
    )
    .unwrap();
    load.add_rdataset(
        &name("host.example."),
        TypePair::new(RecordType::A),
        &RdatasetMeta::authoritative(300),
        a_slab(1),
    )
    .unwrap();
    load.end_load().unwrap();
    db
}

fn a_of(db: &ZoneDb, version: &alder_server::store::VersionHandle) -> Option<Vec<u8>> {
    let answer = db
        .find(
            &name("host.example."),
            RecordType::A,
            version,
            FindOptions::empty(),
        )
        .unwrap();
    match answer.outcome {
        FindOutcome::Success => Some(answer.rdataset.unwrap().slab.get(0).unwrap().to_vec()),
        _ => None,
    }
}

#[test]
fn test_load_gate() {
    subscribe();
    let db = loaded_zone();
    // a second load is refused
    assert!(matches!(
        db.begin_load().err(),
        Some(StoreError::AlreadyLoading("complete"))
    ));
}

#[test]
fn test_load_validation() {
    subscribe();
    let db = ZoneDb::new(name("example."), ZoneDbConfig::default());
    let mut load = db.begin_load().unwrap();

    assert!(matches!(
        load.add_rdataset(
            &name("sub.example."),
            TypePair::new(RecordType::SOA),
            &RdatasetMeta::authoritative(3600),
            a_slab(1),
        ),
        Err(StoreError::NotZoneTop(_))
    ));
    assert!(matches!(
        load.add_rdataset(
            &name("*.example."),
            TypePair::new(RecordType::NS),
            &RdatasetMeta::authoritative(300),
            a_slab(1),
        ),
        Err(StoreError::InvalidNs(_))
    ));
    assert!(matches!(
        load.add_rdataset(
            &name("*.example."),
            TypePair::new(RecordType::NSEC3),
            &RdatasetMeta::authoritative(300),
            a_slab(1),
        ),
        Err(StoreError::InvalidNsec3(_))
    ));
    assert!(matches!(
        load.add_rdataset(
            &name("www.elsewhere."),
            TypePair::new(RecordType::A),
            &RdatasetMeta::authoritative(300),
            a_slab(1),
        ),
        Err(StoreError::OutOfZone { .. })
    ));

    // identical re-add reports unchanged
    load.add_rdataset(
        &name("host.example."),
        TypePair::new(RecordType::A),
        &RdatasetMeta::authoritative(300),
        a_slab(1),
    )
    .unwrap();
    assert_eq!(
        load.add_rdataset(
            &name("host.example."),
            TypePair::new(RecordType::A),
            &RdatasetMeta::authoritative(300),
            a_slab(1),
        )
        .unwrap(),
        AddOutcome::Unchanged
    );
}

#[test]
fn test_reader_snapshot_isolation() {
    subscribe();
    let db = loaded_zone();
    let old_reader = db.current_version();
    let before = a_of(&db, &old_reader).unwrap();

    let writer = db.new_version().unwrap();
    assert_eq!(writer.serial(), old_reader.serial() + 1);
    // a second writer is refused while the first is outstanding
    assert!(matches!(
        db.new_version().err(),
        Some(StoreError::WriterOutstanding)
    ));

    let node = db.find_node(&name("host.example."), false).unwrap().unwrap();
    db.add_rdataset(
        node,
        &writer,
        TypePair::new(RecordType::A),
        &RdatasetMeta::authoritative(300),
        a_slab(2),
        false,
    )
    .unwrap();

    // the open writer's edits are invisible to the attached reader
    assert_eq!(a_of(&db, &old_reader).unwrap(), before);

    db.close_version(writer, true).unwrap();

    // still invisible: the reader's view was fixed at attach time
    assert_eq!(a_of(&db, &old_reader).unwrap(), before);

    // a fresh reader sees the committed rewrite
    let new_reader = db.current_version();
    assert_ne!(a_of(&db, &new_reader).unwrap(), before);

    db.close_version(old_reader, false).unwrap();
    db.close_version(new_reader, false).unwrap();
}

#[test]
fn test_rollback_discards_edits() {
    subscribe();
    let db = loaded_zone();

    let writer = db.new_version().unwrap();
    let node = db.find_node(&name("new.example."), true).unwrap().unwrap();
    db.add_rdataset(
        node,
        &writer,
        TypePair::new(RecordType::A),
        &RdatasetMeta::authoritative(300),
        a_slab(9),
        false,
    )
    .unwrap();
    db.close_version(writer, false).unwrap();

    let version = db.current_version();
    let answer = db
        .find(
            &name("new.example."),
            RecordType::A,
            &version,
            FindOptions::empty(),
        )
        .unwrap();
    assert_eq!(answer.outcome, FindOutcome::NxDomain);

    // the writer slot is free again
    let writer = db.new_version().unwrap();
    db.close_version(writer, false).unwrap();
}

#[test]
fn test_writes_require_writer_version() {
    subscribe();
    let db = loaded_zone();
    let reader = db.current_version();
    let node = db.find_node(&name("host.example."), false).unwrap().unwrap();
    assert!(matches!(
        db.add_rdataset(
            node,
            &reader,
            TypePair::new(RecordType::A),
            &RdatasetMeta::authoritative(300),
            a_slab(2),
            false,
        ),
        Err(StoreError::ReadOnlyVersion)
    ));

    // a handle from another database is refused outright
    let other = loaded_zone();
    let foreign = other.current_version();
    assert!(matches!(
        db.find(
            &name("host.example."),
            RecordType::A,
            &foreign,
            FindOptions::empty()
        ),
        Err(StoreError::VersionMismatch)
    ));
}

#[test]
fn test_merge_subtract_delete() {
    subscribe();
    let db = loaded_zone();
    let node = db.find_node(&name("host.example."), false).unwrap().unwrap();

    let writer = db.new_version().unwrap();
    assert_eq!(
        db.add_rdataset(
            node,
            &writer,
            TypePair::new(RecordType::A),
            &RdatasetMeta::authoritative(300),
            a_slab_many(&[1, 2]),
            true,
        )
        .unwrap(),
        AddOutcome::Merged
    );
    db.close_version(writer, true).unwrap();

    let version = db.current_version();
    let found = db
        .find_rdataset(node, &version, TypePair::new(RecordType::A))
        .unwrap()
        .unwrap();
    assert_eq!(found.slab.record_count(), 2);

    // subtract one record, then delete the rest
    let writer = db.new_version().unwrap();
    assert!(db
        .subtract_rdataset(node, &writer, TypePair::new(RecordType::A), &a_slab(1))
        .unwrap());
    db.close_version(writer, true).unwrap();

    let version = db.current_version();
    let found = db
        .find_rdataset(node, &version, TypePair::new(RecordType::A))
        .unwrap()
        .unwrap();
    assert_eq!(found.slab.record_count(), 1);

    let writer = db.new_version().unwrap();
    assert!(db
        .delete_rdataset(node, &writer, TypePair::new(RecordType::A))
        .unwrap());
    db.close_version(writer, true).unwrap();

    let version = db.current_version();
    assert!(db
        .find_rdataset(node, &version, TypePair::new(RecordType::A))
        .unwrap()
        .is_none());
    let answer = db
        .find(
            &name("host.example."),
            RecordType::A,
            &version,
            FindOptions::empty(),
        )
        .unwrap();
    assert_eq!(answer.outcome, FindOutcome::NxDomain);
}

#[test]
fn test_glue_cache_memoizes() {
    subscribe();
    let db = ZoneDb::new(name("example."), ZoneDbConfig::default());
    let mut load = db.begin_load().unwrap();
    load.add_rdataset(
        &name("sub.example."),
        TypePair::new(RecordType::NS),
        &RdatasetMeta::authoritative(86400),
        {
            let mut builder = SlabBuilder::new();
            builder
                .push(&RData::Ns(name("ns1.sub.example.")).to_wire())
                .unwrap();
            builder
                .push(&RData::Ns(name("ns.other.")).to_wire())
                .unwrap();
            builder.build().unwrap()
        },
    )
    .unwrap();
    load.add_rdataset(
        &name("ns1.sub.example."),
        TypePair::new(RecordType::A),
        &RdatasetMeta::authoritative(300),
        a_slab(53),
    )
    .unwrap();
    load.end_load().unwrap();

    db.set_gluecache_stats(true);
    let version = db.current_version();
    let node = db.find_node(&name("sub.example."), false).unwrap().unwrap();

    let mut additional = Vec::new();
    assert!(db.add_glue(node, &version, &mut additional).unwrap());
    // out-of-zone targets contribute nothing; the in-bailiwick one leads
    assert_eq!(additional.len(), 1);
    assert_eq!(additional[0].name, name("ns1.sub.example."));
    assert!(additional[0].required);
    assert!(additional[0].a.is_some());
    assert!(additional[0].aaaa.is_none());

    let mut again = Vec::new();
    assert!(db.add_glue(node, &version, &mut again).unwrap());
    assert_eq!(again.len(), 1);
    assert_eq!(db.gluecache_stats(), (1, 1));
}

#[test]
fn test_signing_time_schedule() {
    subscribe();
    let db = ZoneDb::new(name("example."), ZoneDbConfig::default());
    let mut load = db.begin_load().unwrap();
    for (owner, resign) in [("a.example.", 500u32), ("b.example.", 100), ("c.example.", 900)] {
        load.add_rdataset(
            &name(owner),
            TypePair::new(RecordType::A),
            &RdatasetMeta {
                ttl: 300,
                trust: alder_server::store::TrustLevel::Ultimate,
                resign: Some((resign, false)),
            },
            a_slab(1),
        )
        .unwrap();
    }
    load.end_load().unwrap();

    let earliest = db.get_signing_time().unwrap();
    assert_eq!(earliest.name, name("b.example."));
    assert_eq!(earliest.resign, 100);

    // move the earliest deadline later; the next one surfaces
    let version = db.current_version();
    let node = db.find_node(&name("b.example."), false).unwrap().unwrap();
    assert!(db
        .set_signing_time(node, &version, TypePair::new(RecordType::A), Some((2000, false)))
        .unwrap());
    assert_eq!(db.get_signing_time().unwrap().name, name("a.example."));

    // withdraw the rest and the schedule empties
    for owner in ["a.example.", "b.example.", "c.example."] {
        let node = db.find_node(&name(owner), false).unwrap().unwrap();
        db.set_signing_time(node, &version, TypePair::new(RecordType::A), None)
            .unwrap();
    }
    assert!(db.get_signing_time().is_none());
}

#[test]
fn test_zone_size_and_node_count() {
    subscribe();
    let db = loaded_zone();
    let version = db.current_version();
    let size = db.get_size(&version).unwrap();
    assert_eq!(size.records, 2);
    assert!(size.bytes > 0);
    // origin + host
    assert_eq!(db.node_count(), 2);
    assert!(!db.is_secure(&version).unwrap());
}
