// Copyright 2015-2023 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Wire-level primitives for Alder DNS.
//!
//! This is the foundational crate for the Alder DNS projects. It contains the
//! pieces the zone store consumes but does not own: wire-format domain names
//! with DNSSEC canonical ordering, the packed rdata slab encoding used for
//! rdataset storage, typed views over the handful of rdata formats the store
//! itself must interpret, and the PROXY protocol v2 codec used to classify
//! inbound connections before any DNS traffic is processed.

#![warn(missing_docs)]

pub mod error;
pub mod proxy;
pub mod rr;

pub use error::{ProtoError, ProtoErrorKind};
