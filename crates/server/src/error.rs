// Copyright 2015-2023 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Error types for the zone store.
//!
//! Negative lookup answers (no such name, no such type, delegations and the
//! like) are not errors; they are [`crate::store::FindOutcome`] values. The
//! variants here are the failures that abort an operation.

use alder_proto::rr::Name;
use alder_proto::ProtoError;
use thiserror::Error;

/// Failures surfaced by zone store operations.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[non_exhaustive]
pub enum StoreError {
    /// SOA records are only accepted at the zone origin
    #[error("SOA record not at zone top: {0}")]
    NotZoneTop(Name),

    /// NS records cannot be owned by a wildcard name
    #[error("NS record at invalid wildcard owner: {0}")]
    InvalidNs(Name),

    /// NSEC3 records cannot be owned by a wildcard name
    #[error("NSEC3 record at invalid wildcard owner: {0}")]
    InvalidNsec3(Name),

    /// The database contradicts itself; the zone should not be served
    #[error("zone database is corrupt: {0}")]
    BadDb(&'static str),

    /// The name is not at or below the zone origin
    #[error("name {name} is outside zone {origin}")]
    OutOfZone {
        /// the offending name
        name: Name,
        /// the zone origin
        origin: Name,
    },

    /// A load is already in progress, or the zone is already loaded
    #[error("zone load already {0}")]
    AlreadyLoading(&'static str),

    /// Only one writable version may be outstanding
    #[error("a writable version is already open")]
    WriterOutstanding,

    /// A version handle from a different database was supplied
    #[error("version handle does not belong to this database")]
    VersionMismatch,

    /// The operation needs a writable version
    #[error("operation requires a writable version")]
    ReadOnlyVersion,

    /// A configured budget was exceeded
    #[error("zone data exceeds budget: {0}")]
    Range(&'static str),

    /// An error bubbled up from the wire-format layer
    #[error("proto error: {0}")]
    Proto(#[from] ProtoError),
}
