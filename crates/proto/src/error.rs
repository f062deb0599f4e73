// Copyright 2015-2023 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Error types for the crate

use std::fmt;

use thiserror::Error;

use crate::rr::RecordType;

/// The kind of an error.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProtoErrorKind {
    /// A label exceeded the 63 octet maximum
    #[error("label bytes exceed 63: {0}")]
    LabelBytesTooLong(usize),

    /// A name exceeded the 255 octet maximum
    #[error("name bytes exceed 255: {0}")]
    DomainNameTooLong(usize),

    /// An empty label was encountered in the middle of a name
    #[error("malformed label: {0}")]
    MalformedLabel(String),

    /// The rdata did not contain enough bytes for its declared type
    #[error("rdata too short for {rtype}: have {have}, need {need}")]
    RdataTooShort {
        /// the record type being decoded
        rtype: RecordType,
        /// bytes available
        have: usize,
        /// bytes required
        need: usize,
    },

    /// Trailing bytes followed an otherwise complete rdata
    #[error("trailing bytes after {0} rdata")]
    TrailingRdataBytes(RecordType),

    /// A slab would exceed the per-rdataset record budget
    #[error("too many records for one rdataset: {0}")]
    TooManyRecords(usize),

    /// A single record exceeded the slab record length budget
    #[error("record too large for slab storage: {0}")]
    RecordTooLarge(usize),

    /// An unspecific error message
    #[error("{0}")]
    Message(&'static str),
}

/// The error type for errors that get returned in the crate
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProtoError {
    kind: ProtoErrorKind,
}

impl ProtoError {
    /// Get the kind of the error
    pub fn kind(&self) -> &ProtoErrorKind {
        &self.kind
    }
}

impl fmt::Display for ProtoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.kind, f)
    }
}

impl std::error::Error for ProtoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}

impl From<ProtoErrorKind> for ProtoError {
    fn from(kind: ProtoErrorKind) -> Self {
        Self { kind }
    }
}

impl From<&'static str> for ProtoError {
    fn from(msg: &'static str) -> Self {
        ProtoErrorKind::Message(msg).into()
    }
}
