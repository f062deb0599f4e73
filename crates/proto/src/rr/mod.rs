// Copyright 2015-2023 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Resource record related components, e.g. `Name` aka label, record type, and the
//! packed rdata slab encoding used by the zone store.

mod name;
mod rdata;
mod record_type;
mod slab;

pub use name::{LabelIter, Name};
pub use rdata::{Nsec3Param, RData, Soa};
pub use record_type::{RecordType, TypePair};
pub use slab::{MergeOutcome, RdataSlab, SlabBuilder, SlabIter};
