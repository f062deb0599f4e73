// Copyright 2015-2023 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! record type definitions

use std::fmt;

/// The type of the resource record.
///
/// [RFC 1035](https://tools.ietf.org/html/rfc1035), DOMAIN NAMES - IMPLEMENTATION AND SPECIFICATION, November 1987
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[non_exhaustive]
pub enum RecordType {
    /// RFC 1035 IPv4 Address record
    A,
    /// RFC 3596 IPv6 address record
    AAAA,
    /// RFC 1035 All cached records, aka `*`
    ANY,
    /// RFC 1035 Canonical name record
    CNAME,
    /// RFC 6672 Delegation name record
    DNAME,
    /// RFC 4034 DNS Key record: RRSIG RR sets are signed by a matching DNSKEY
    DNSKEY,
    /// RFC 4034 Delegation signer
    DS,
    /// RFC 2535 (and RFC 2930) Key record
    KEY,
    /// RFC 1035 Name server record
    NS,
    /// RFC 4034 Next secure record
    NSEC,
    /// RFC 5155 NSEC record version 3
    NSEC3,
    /// RFC 5155 NSEC3 parameters
    NSEC3PARAM,
    /// RFC 4034 DNSSEC signature
    RRSIG,
    /// RFC 1035 Start of [a zone of] authority record
    SOA,
    /// RFC 2782 Service locator
    SRV,
    /// RFC 1035 Text record
    TXT,
    /// The zero type, used as the "no covered type" marker
    ZERO,
    /// Unknown or not yet supported record type
    Unknown(u16),
}

impl RecordType {
    /// Returns true for the DNSSEC types maintained by the signing machinery.
    pub fn is_dnssec(self) -> bool {
        matches!(
            self,
            Self::DNSKEY | Self::DS | Self::KEY | Self::NSEC | Self::NSEC3 | Self::RRSIG
        )
    }
}

impl From<u16> for RecordType {
    fn from(value: u16) -> Self {
        match value {
            0 => Self::ZERO,
            1 => Self::A,
            2 => Self::NS,
            5 => Self::CNAME,
            6 => Self::SOA,
            16 => Self::TXT,
            25 => Self::KEY,
            28 => Self::AAAA,
            33 => Self::SRV,
            39 => Self::DNAME,
            43 => Self::DS,
            46 => Self::RRSIG,
            47 => Self::NSEC,
            48 => Self::DNSKEY,
            50 => Self::NSEC3,
            51 => Self::NSEC3PARAM,
            255 => Self::ANY,
            _ => Self::Unknown(value),
        }
    }
}

impl From<RecordType> for u16 {
    fn from(rtype: RecordType) -> Self {
        match rtype {
            RecordType::ZERO => 0,
            RecordType::A => 1,
            RecordType::NS => 2,
            RecordType::CNAME => 5,
            RecordType::SOA => 6,
            RecordType::TXT => 16,
            RecordType::KEY => 25,
            RecordType::AAAA => 28,
            RecordType::SRV => 33,
            RecordType::DNAME => 39,
            RecordType::DS => 43,
            RecordType::RRSIG => 46,
            RecordType::NSEC => 47,
            RecordType::DNSKEY => 48,
            RecordType::NSEC3 => 50,
            RecordType::NSEC3PARAM => 51,
            RecordType::ANY => 255,
            RecordType::Unknown(value) => value,
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::A => "A",
            Self::AAAA => "AAAA",
            Self::ANY => "ANY",
            Self::CNAME => "CNAME",
            Self::DNAME => "DNAME",
            Self::DNSKEY => "DNSKEY",
            Self::DS => "DS",
            Self::KEY => "KEY",
            Self::NS => "NS",
            Self::NSEC => "NSEC",
            Self::NSEC3 => "NSEC3",
            Self::NSEC3PARAM => "NSEC3PARAM",
            Self::RRSIG => "RRSIG",
            Self::SOA => "SOA",
            Self::SRV => "SRV",
            Self::TXT => "TXT",
            Self::ZERO => "ZERO",
            Self::Unknown(value) => return write!(f, "TYPE{value}"),
        };
        f.write_str(s)
    }
}

/// A rdataset type key: the base record type plus, for `RRSIG`, the type the
/// signature covers.
///
/// Every rdataset stored at a node is keyed by one of these; the covered type
/// is `ZERO` for everything except signatures.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct TypePair {
    rtype: RecordType,
    covers: RecordType,
}

impl TypePair {
    /// A plain, non-signature type.
    pub fn new(rtype: RecordType) -> Self {
        debug_assert_ne!(rtype, RecordType::RRSIG, "signatures need a covered type");
        Self {
            rtype,
            covers: RecordType::ZERO,
        }
    }

    /// A signature rdataset covering `covers`.
    pub fn rrsig(covers: RecordType) -> Self {
        Self {
            rtype: RecordType::RRSIG,
            covers,
        }
    }

    /// The base record type.
    pub fn rtype(self) -> RecordType {
        self.rtype
    }

    /// The covered type; `ZERO` unless this is a signature.
    pub fn covers(self) -> RecordType {
        self.covers
    }

    /// Returns true if this is a signature rdataset.
    pub fn is_sig(self) -> bool {
        self.rtype == RecordType::RRSIG
    }

    /// The key of the signature rdataset covering this type.
    pub fn sig(self) -> Self {
        Self::rrsig(self.rtype)
    }
}

impl From<RecordType> for TypePair {
    fn from(rtype: RecordType) -> Self {
        Self::new(rtype)
    }
}

impl fmt::Display for TypePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_sig() {
            write!(f, "RRSIG({})", self.covers)
        } else {
            fmt::Display::fmt(&self.rtype, f)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_u16_round_trip() {
        for value in 0..260 {
            let rtype = RecordType::from(value);
            assert_eq!(u16::from(rtype), value);
        }
    }

    #[test]
    fn test_type_pair() {
        let a = TypePair::new(RecordType::A);
        assert_eq!(a.covers(), RecordType::ZERO);
        assert!(!a.is_sig());

        let sig = a.sig();
        assert!(sig.is_sig());
        assert_eq!(sig.covers(), RecordType::A);
        assert_eq!(sig.to_string(), "RRSIG(A)");
        assert_ne!(sig, TypePair::rrsig(RecordType::NS));
    }
}
