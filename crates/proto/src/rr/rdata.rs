// Copyright 2015-2023 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Typed views over the rdata formats the zone store must interpret.
//!
//! The store keeps rdata as opaque slab bytes; only a handful of types ever
//! need decoding inside the store itself: delegation and alias targets (NS,
//! CNAME, DNAME), glue addresses (A, AAAA), the NSEC3 parameter record, and
//! the SOA fields consulted at the zone apex. Everything else stays `Raw`.

use std::net::{Ipv4Addr, Ipv6Addr};

use enum_as_inner::EnumAsInner;

use crate::error::{ProtoError, ProtoErrorKind};
use crate::rr::{Name, RecordType};

/// A decoded view of one record's rdata.
#[derive(Clone, Debug, Eq, PartialEq, EnumAsInner)]
pub enum RData {
    /// IPv4 address
    A(Ipv4Addr),
    /// IPv6 address
    Aaaa(Ipv6Addr),
    /// Alias target
    Cname(Name),
    /// Subtree redirection target
    Dname(Name),
    /// Name server host name
    Ns(Name),
    /// NSEC3 parameters at the zone apex
    Nsec3Param(Nsec3Param),
    /// Start of authority
    Soa(Soa),
    /// Any type the store treats as opaque
    Raw(Vec<u8>),
}

impl RData {
    /// Decodes `rdata` according to `rtype`.
    ///
    /// Types the store does not interpret come back as [`RData::Raw`].
    pub fn parse(rtype: RecordType, rdata: &[u8]) -> Result<Self, ProtoError> {
        Ok(match rtype {
            RecordType::A => Self::A(Ipv4Addr::from(read_array::<4>(rtype, rdata)?)),
            RecordType::AAAA => Self::Aaaa(Ipv6Addr::from(read_array::<16>(rtype, rdata)?)),
            RecordType::CNAME => Self::Cname(read_name_rdata(rtype, rdata)?),
            RecordType::DNAME => Self::Dname(read_name_rdata(rtype, rdata)?),
            RecordType::NS => Self::Ns(read_name_rdata(rtype, rdata)?),
            RecordType::NSEC3PARAM => Self::Nsec3Param(Nsec3Param::parse(rdata)?),
            RecordType::SOA => Self::Soa(Soa::parse(rdata)?),
            _ => Self::Raw(rdata.to_vec()),
        })
    }

    /// Encodes the view back into raw rdata bytes.
    pub fn to_wire(&self) -> Vec<u8> {
        match self {
            Self::A(addr) => addr.octets().to_vec(),
            Self::Aaaa(addr) => addr.octets().to_vec(),
            Self::Cname(name) | Self::Dname(name) | Self::Ns(name) => name.to_wire(),
            Self::Nsec3Param(param) => param.to_wire(),
            Self::Soa(soa) => soa.to_wire(),
            Self::Raw(bytes) => bytes.clone(),
        }
    }
}

fn read_array<const N: usize>(rtype: RecordType, rdata: &[u8]) -> Result<[u8; N], ProtoError> {
    let bytes: [u8; N] = rdata.try_into().map_err(|_| ProtoErrorKind::RdataTooShort {
        rtype,
        have: rdata.len(),
        need: N,
    })?;
    Ok(bytes)
}

fn read_name_rdata(rtype: RecordType, rdata: &[u8]) -> Result<Name, ProtoError> {
    let (name, used) = Name::from_wire(rdata)?;
    if used != rdata.len() {
        return Err(ProtoErrorKind::TrailingRdataBytes(rtype).into());
    }
    Ok(name)
}

/// NSEC3PARAM rdata, RFC 5155 section 4.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Nsec3Param {
    /// The hash algorithm (1 = SHA-1)
    pub hash_algorithm: u8,
    /// Flags; the opt-out bit is not meaningful in NSEC3PARAM
    pub flags: u8,
    /// Additional hash iterations
    pub iterations: u16,
    /// The salt mixed into each hash
    pub salt: Vec<u8>,
}

impl Nsec3Param {
    fn parse(rdata: &[u8]) -> Result<Self, ProtoError> {
        let too_short = |need| ProtoErrorKind::RdataTooShort {
            rtype: RecordType::NSEC3PARAM,
            have: rdata.len(),
            need,
        };
        if rdata.len() < 5 {
            return Err(too_short(5).into());
        }
        let salt_len = rdata[4] as usize;
        let salt = rdata
            .get(5..5 + salt_len)
            .ok_or_else(|| too_short(5 + salt_len))?
            .to_vec();
        if rdata.len() != 5 + salt_len {
            return Err(ProtoErrorKind::TrailingRdataBytes(RecordType::NSEC3PARAM).into());
        }
        Ok(Self {
            hash_algorithm: rdata[0],
            flags: rdata[1],
            iterations: u16::from_be_bytes([rdata[2], rdata[3]]),
            salt,
        })
    }

    fn to_wire(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(5 + self.salt.len());
        buf.push(self.hash_algorithm);
        buf.push(self.flags);
        buf.extend_from_slice(&self.iterations.to_be_bytes());
        buf.push(self.salt.len() as u8);
        buf.extend_from_slice(&self.salt);
        buf
    }
}

/// SOA rdata, RFC 1035 section 3.3.13.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Soa {
    /// Primary master name
    pub mname: Name,
    /// Responsible mailbox, encoded as a name
    pub rname: Name,
    /// Zone serial number
    pub serial: u32,
    /// Secondary refresh interval
    pub refresh: u32,
    /// Failed refresh retry interval
    pub retry: u32,
    /// Expiry of zone data on secondaries
    pub expire: u32,
    /// Negative caching TTL, RFC 2308
    pub minimum: u32,
}

impl Soa {
    fn parse(rdata: &[u8]) -> Result<Self, ProtoError> {
        let (mname, used_m) = Name::from_wire(rdata)?;
        let (rname, used_r) = Name::from_wire(&rdata[used_m..])?;
        let fixed = &rdata[used_m + used_r..];
        if fixed.len() != 20 {
            return Err(ProtoErrorKind::RdataTooShort {
                rtype: RecordType::SOA,
                have: rdata.len(),
                need: used_m + used_r + 20,
            }
            .into());
        }
        let field = |i: usize| u32::from_be_bytes([fixed[i], fixed[i + 1], fixed[i + 2], fixed[i + 3]]);
        Ok(Self {
            mname,
            rname,
            serial: field(0),
            refresh: field(4),
            retry: field(8),
            expire: field(12),
            minimum: field(16),
        })
    }

    fn to_wire(&self) -> Vec<u8> {
        let mut buf = self.mname.to_wire();
        buf.extend_from_slice(&self.rname.to_wire());
        for v in [self.serial, self.refresh, self.retry, self.expire, self.minimum] {
            buf.extend_from_slice(&v.to_be_bytes());
        }
        buf
    }
}
