// Copyright 2015-2023 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The versioned zone store.
//!
//! [`ZoneDb`] is the in-memory database backing one authoritative zone. It is
//! organized as three parallel name tries (the main tree, an NSEC auxiliary
//! tree, and an NSEC3 tree) over a shared node arena; each node carries its
//! rdatasets as multi-version header chains so that readers attached to a
//! committed version never observe a writer's in-progress edits.

mod db;
mod find;
mod glue;
mod load;
mod node;
mod resign;
mod tree;
mod version;

pub use db::{NodeLock, SigningTime, ZoneDb, ZoneDbConfig, ZoneSize};
pub use find::{AllRdatasets, FindAnswer, FindOptions, FindOutcome, FoundRdataset};
pub use glue::{GlueEntry, GlueList};
pub use load::{AddOutcome, LoadGuard, RdatasetMeta};
pub use node::NodeId;
pub use version::VersionHandle;

/// How believable the data of an rdataset is, lowest to highest.
///
/// The store records trust once per rdataset; it never mixes records of
/// different trust in one slab.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[repr(u8)]
pub enum TrustLevel {
    /// No trust established
    None = 0,
    /// Data whose validation is still pending
    Pending,
    /// Learned from the additional section of a response
    Additional,
    /// Glue from a referral
    Glue,
    /// From the answer section of a response
    Answer,
    /// From the authority section of a response
    Authority,
    /// Locally authoritative data, e.g. a loaded zone
    Ultimate,
}
