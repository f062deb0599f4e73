// Copyright 2015-2023 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! End-to-end lookup behavior of the zone store.

use std::net::Ipv4Addr;
use std::str::FromStr;

use alder_proto::rr::{Name, RData, RdataSlab, RecordType, SlabBuilder, TypePair};
use alder_server::store::{
    FindOptions, FindOutcome, RdatasetMeta, ZoneDb, ZoneDbConfig,
};
use test_support::subscribe;

fn name(s: &str) -> Name {
    Name::from_str(s).unwrap()
}

fn slab_of(rdatas: &[RData]) -> RdataSlab {
    let mut builder = SlabBuilder::new();
    for rdata in rdatas {
        builder.push(&rdata.to_wire()).unwrap();
    }
    builder.build().unwrap()
}

fn raw_slab(rdatas: &[&[u8]]) -> RdataSlab {
    let mut builder = SlabBuilder::new();
    for rdata in rdatas {
        builder.push(rdata).unwrap();
    }
    builder.build().unwrap()
}

fn soa_rdata(origin: &str) -> RData {
    RData::Soa(alder_proto::rr::Soa {
        mname: name(&format!("ns1.{origin}")),
        rname: name(&format!("hostmaster.{origin}")),
        serial: 2024010101,
        refresh: 7200,
        retry: 3600,
        expire: 1209600,
        minimum: 300,
    })
}

struct ZoneBuilder {
    db: ZoneDb,
}

impl ZoneBuilder {
    fn new(origin: &str) -> Self {
        Self {
            db: ZoneDb::new(name(origin), ZoneDbConfig::default()),
        }
    }

    fn build(self, records: &[(&str, TypePair, RdataSlab)]) -> ZoneDb {
        let mut load = self.db.begin_load().unwrap();
        for (owner, type_pair, slab) in records {
            load.add_rdataset(
                &name(owner),
                *type_pair,
                &RdatasetMeta::authoritative(300),
                slab.clone(),
            )
            .unwrap();
        }
        load.end_load().unwrap();
        self.db
    }
}

fn example_zone() -> ZoneDb {
    ZoneBuilder::new("example.").build(&[
        (
            "example.",
            TypePair::new(RecordType::SOA),
            slab_of(&[soa_rdata("example.")]),
        ),
        (
            "example.",
            TypePair::new(RecordType::NS),
            slab_of(&[RData::Ns(name("ns1.example."))]),
        ),
        (
            "ns1.example.",
            TypePair::new(RecordType::A),
            slab_of(&[RData::A(Ipv4Addr::new(192, 0, 2, 1))]),
        ),
    ])
}

#[test]
fn test_apex_ns_is_authoritative() {
    subscribe();
    let db = example_zone();
    let version = db.current_version();

    let answer = db
        .find(
            &name("ns1.example."),
            RecordType::A,
            &version,
            FindOptions::empty(),
        )
        .unwrap();
    assert_eq!(answer.outcome, FindOutcome::Success);
    let rdataset = answer.rdataset.unwrap();
    assert_eq!(
        RData::parse(RecordType::A, rdataset.slab.get(0).unwrap()).unwrap(),
        RData::A(Ipv4Addr::new(192, 0, 2, 1))
    );

    // NS at the zone origin is an authoritative answer, not a referral
    let answer = db
        .find(
            &name("example."),
            RecordType::NS,
            &version,
            FindOptions::empty(),
        )
        .unwrap();
    assert_eq!(answer.outcome, FindOutcome::Success);
}

#[test]
fn test_delegation_below_cut() {
    subscribe();
    let db = ZoneBuilder::new("example.").build(&[
        (
            "example.",
            TypePair::new(RecordType::SOA),
            slab_of(&[soa_rdata("example.")]),
        ),
        (
            "sub.example.",
            TypePair::new(RecordType::NS),
            slab_of(&[RData::Ns(name("ns.other."))]),
        ),
    ]);
    let version = db.current_version();

    let answer = db
        .find(
            &name("foo.sub.example."),
            RecordType::A,
            &version,
            FindOptions::empty(),
        )
        .unwrap();
    assert_eq!(answer.outcome, FindOutcome::Delegation);
    assert_eq!(answer.name.unwrap(), name("sub.example."));
    let ns = answer.rdataset.unwrap();
    assert_eq!(
        RData::parse(RecordType::NS, ns.slab.get(0).unwrap()).unwrap(),
        RData::Ns(name("ns.other."))
    );

    // the cut node itself refers as well for ordinary types
    let answer = db
        .find(
            &name("sub.example."),
            RecordType::A,
            &version,
            FindOptions::empty(),
        )
        .unwrap();
    assert_eq!(answer.outcome, FindOutcome::Delegation);
}

#[test]
fn test_wildcard_match_and_blocking() {
    subscribe();
    let db = ZoneBuilder::new("example.").build(&[
        (
            "example.",
            TypePair::new(RecordType::SOA),
            slab_of(&[soa_rdata("example.")]),
        ),
        (
            "*.wild.example.",
            TypePair::new(RecordType::TXT),
            raw_slab(&[b"\x03hit"]),
        ),
    ]);
    let version = db.current_version();

    let answer = db
        .find(
            &name("a.wild.example."),
            RecordType::TXT,
            &version,
            FindOptions::empty(),
        )
        .unwrap();
    assert_eq!(answer.outcome, FindOutcome::Success);
    assert!(answer.wildcard);
    assert_eq!(answer.name.unwrap(), name("a.wild.example."));
    assert_eq!(answer.rdataset.unwrap().slab.get(0).unwrap(), b"\x03hit");

    // NO_WILD suppresses the synthesis
    let answer = db
        .find(
            &name("a.wild.example."),
            RecordType::TXT,
            &version,
            FindOptions::NO_WILD,
        )
        .unwrap();
    assert_eq!(answer.outcome, FindOutcome::NxDomain);

    // a specific name takes over from the wildcard, and blocks it beneath
    let writer = db.new_version().unwrap();
    let node = db.find_node(&name("b.wild.example."), true).unwrap().unwrap();
    db.add_rdataset(
        node,
        &writer,
        TypePair::new(RecordType::TXT),
        &RdatasetMeta::authoritative(300),
        raw_slab(&[b"\x08specific"]),
        false,
    )
    .unwrap();
    db.close_version(writer, true).unwrap();

    let version = db.current_version();
    let answer = db
        .find(
            &name("b.wild.example."),
            RecordType::TXT,
            &version,
            FindOptions::empty(),
        )
        .unwrap();
    assert_eq!(answer.outcome, FindOutcome::Success);
    assert!(!answer.wildcard);
    assert_eq!(answer.rdataset.unwrap().slab.get(0).unwrap(), b"\x08specific");

    let answer = db
        .find(
            &name("a.b.wild.example."),
            RecordType::TXT,
            &version,
            FindOptions::empty(),
        )
        .unwrap();
    assert_eq!(answer.outcome, FindOutcome::NxDomain);
}

#[test]
fn test_dname_redirect() {
    subscribe();
    let db = ZoneBuilder::new("example.").build(&[
        (
            "example.",
            TypePair::new(RecordType::SOA),
            slab_of(&[soa_rdata("example.")]),
        ),
        (
            "a.example.",
            TypePair::new(RecordType::DNAME),
            slab_of(&[RData::Dname(name("z.example."))]),
        ),
    ]);
    let version = db.current_version();

    let answer = db
        .find(
            &name("x.a.example."),
            RecordType::A,
            &version,
            FindOptions::empty(),
        )
        .unwrap();
    assert_eq!(answer.outcome, FindOutcome::Dname);
    assert_eq!(answer.name.unwrap(), name("a.example."));
    assert_eq!(
        RData::parse(RecordType::DNAME, answer.rdataset.unwrap().slab.get(0).unwrap()).unwrap(),
        RData::Dname(name("z.example."))
    );

    // the DNAME owner itself answers its own types normally
    let answer = db
        .find(
            &name("a.example."),
            RecordType::DNAME,
            &version,
            FindOptions::empty(),
        )
        .unwrap();
    assert_eq!(answer.outcome, FindOutcome::Success);
}

#[test]
fn test_nsec_denial_in_signed_zone() {
    subscribe();
    // NSEC chain: example. -> a.example. -> c.example. -> example.
    let db = ZoneBuilder::new("example.").build(&[
        (
            "example.",
            TypePair::new(RecordType::SOA),
            slab_of(&[soa_rdata("example.")]),
        ),
        (
            "example.",
            TypePair::new(RecordType::DNSKEY),
            raw_slab(&[b"\x01\x01\x03\x08fakekey"]),
        ),
        (
            "example.",
            TypePair::new(RecordType::NSEC),
            raw_slab(&[b"\x01a\x07example\x00\x00\x01\x40"]),
        ),
        (
            "example.",
            TypePair::rrsig(RecordType::NSEC),
            raw_slab(&[b"fake signature apex"]),
        ),
        (
            "a.example.",
            TypePair::new(RecordType::A),
            slab_of(&[RData::A(Ipv4Addr::new(192, 0, 2, 10))]),
        ),
        (
            "a.example.",
            TypePair::new(RecordType::NSEC),
            raw_slab(&[b"\x01c\x07example\x00\x00\x01\x40"]),
        ),
        (
            "a.example.",
            TypePair::rrsig(RecordType::NSEC),
            raw_slab(&[b"fake signature a"]),
        ),
        (
            "c.example.",
            TypePair::new(RecordType::A),
            slab_of(&[RData::A(Ipv4Addr::new(192, 0, 2, 12))]),
        ),
        (
            "c.example.",
            TypePair::new(RecordType::NSEC),
            raw_slab(&[b"\x07example\x00\x00\x01\x40"]),
        ),
        (
            "c.example.",
            TypePair::rrsig(RecordType::NSEC),
            raw_slab(&[b"fake signature c"]),
        ),
    ]);
    let version = db.current_version();
    assert!(db.is_secure(&version).unwrap());

    let answer = db
        .find(
            &name("b.example."),
            RecordType::A,
            &version,
            FindOptions::empty(),
        )
        .unwrap();
    assert_eq!(answer.outcome, FindOutcome::NxDomain);

    // the covering NSEC is the one owned by the predecessor, a.example.
    assert_eq!(answer.name.unwrap(), name("a.example."));
    let nsec = answer.rdataset.unwrap();
    assert_eq!(nsec.type_pair, TypePair::new(RecordType::NSEC));
    let sig = answer.sig.unwrap();
    assert_eq!(sig.type_pair, TypePair::rrsig(RecordType::NSEC));
}

#[test]
fn test_empty_nonterminal() {
    subscribe();
    let db = ZoneBuilder::new("example.").build(&[
        (
            "example.",
            TypePair::new(RecordType::SOA),
            slab_of(&[soa_rdata("example.")]),
        ),
        (
            "a.b.example.",
            TypePair::new(RecordType::TXT),
            raw_slab(&[b"\x04deep"]),
        ),
    ]);
    let version = db.current_version();

    let answer = db
        .find(
            &name("b.example."),
            RecordType::TXT,
            &version,
            FindOptions::empty(),
        )
        .unwrap();
    assert_eq!(answer.outcome, FindOutcome::EmptyName);

    let answer = db
        .find(
            &name("c.example."),
            RecordType::TXT,
            &version,
            FindOptions::empty(),
        )
        .unwrap();
    assert_eq!(answer.outcome, FindOutcome::NxDomain);
}

#[test]
fn test_cname_answers_other_types() {
    subscribe();
    let db = ZoneBuilder::new("example.").build(&[
        (
            "example.",
            TypePair::new(RecordType::SOA),
            slab_of(&[soa_rdata("example.")]),
        ),
        (
            "alias.example.",
            TypePair::new(RecordType::CNAME),
            slab_of(&[RData::Cname(name("target.example."))]),
        ),
    ]);
    let version = db.current_version();

    let answer = db
        .find(
            &name("alias.example."),
            RecordType::A,
            &version,
            FindOptions::empty(),
        )
        .unwrap();
    assert_eq!(answer.outcome, FindOutcome::Cname);
    assert_eq!(
        RData::parse(RecordType::CNAME, answer.rdataset.unwrap().slab.get(0).unwrap()).unwrap(),
        RData::Cname(name("target.example."))
    );

    // a CNAME query gets the CNAME itself
    let answer = db
        .find(
            &name("alias.example."),
            RecordType::CNAME,
            &version,
            FindOptions::empty(),
        )
        .unwrap();
    assert_eq!(answer.outcome, FindOutcome::Success);
}

#[test]
fn test_nxrrset_and_any() {
    subscribe();
    let db = example_zone();
    let version = db.current_version();

    let answer = db
        .find(
            &name("ns1.example."),
            RecordType::TXT,
            &version,
            FindOptions::empty(),
        )
        .unwrap();
    assert_eq!(answer.outcome, FindOutcome::NxRrset);

    let answer = db
        .find(
            &name("ns1.example."),
            RecordType::ANY,
            &version,
            FindOptions::empty(),
        )
        .unwrap();
    assert_eq!(answer.outcome, FindOutcome::Success);
    assert!(answer.rdataset.is_none());

    let node = db.find_node(&name("ns1.example."), false).unwrap().unwrap();
    let types = db
        .all_rdatasets(node, &version)
        .unwrap()
        .map(|r| r.type_pair)
        .collect::<Vec<_>>();
    assert_eq!(types, vec![TypePair::new(RecordType::A)]);
}

#[test]
fn test_glue_under_delegation() {
    subscribe();
    let db = ZoneBuilder::new("example.").build(&[
        (
            "example.",
            TypePair::new(RecordType::SOA),
            slab_of(&[soa_rdata("example.")]),
        ),
        (
            "sub.example.",
            TypePair::new(RecordType::NS),
            slab_of(&[RData::Ns(name("ns1.sub.example."))]),
        ),
        (
            "ns1.sub.example.",
            TypePair::new(RecordType::A),
            slab_of(&[RData::A(Ipv4Addr::new(192, 0, 2, 53))]),
        ),
    ]);
    let version = db.current_version();

    // without GLUE_OK the address under the cut refers
    let answer = db
        .find(
            &name("ns1.sub.example."),
            RecordType::A,
            &version,
            FindOptions::empty(),
        )
        .unwrap();
    assert_eq!(answer.outcome, FindOutcome::Delegation);

    // with GLUE_OK it is handed out as glue
    let answer = db
        .find(
            &name("ns1.sub.example."),
            RecordType::A,
            &version,
            FindOptions::GLUE_OK,
        )
        .unwrap();
    assert_eq!(answer.outcome, FindOutcome::Glue);
    assert!(answer.rdataset.is_some());
}

#[test]
fn test_out_of_zone_is_rejected() {
    subscribe();
    let db = example_zone();
    let version = db.current_version();
    assert!(db
        .find(
            &name("www.elsewhere."),
            RecordType::A,
            &version,
            FindOptions::empty(),
        )
        .is_err());
}

#[test]
fn test_find_node_deepest() {
    subscribe();
    let db = example_zone();

    let (outcome, node) = db.find_node_deepest(&name("ns1.example.")).unwrap();
    assert_eq!(outcome, FindOutcome::Success);
    assert_eq!(db.node_name(node), name("ns1.example."));

    let (outcome, node) = db.find_node_deepest(&name("deep.under.ns1.example.")).unwrap();
    assert_eq!(outcome, FindOutcome::PartialMatch);
    assert_eq!(db.node_name(node), name("ns1.example."));
}
