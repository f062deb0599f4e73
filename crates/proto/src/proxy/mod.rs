// Copyright 2015-2023 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! PROXY protocol v2 codec.
//!
//! Inbound connections relayed through a load balancer carry a binary header
//! describing the original endpoints before any DNS traffic. The parser here
//! is a resumable state machine: bytes may arrive in arbitrary fragments, and
//! the registered callback fires exactly once per push, either with
//! [`ProxyEvent::NeedMore`] or with the completed (or failed) parse.
//!
//! The emitter is the inverse, building a header into a buffer with TLVs
//! appended incrementally while the length field is patched in place.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddrV4, SocketAddrV6};

use bytes::{Bytes, BytesMut};
use thiserror::Error;
use tracing::debug;

/// The 12 octet signature every PROXYv2 header begins with.
pub const PROXY_V2_SIGNATURE: [u8; 12] = [
    0x0d, 0x0a, 0x0d, 0x0a, 0x00, 0x0d, 0x0a, 0x51, 0x55, 0x49, 0x54, 0x0a,
];

/// Octets of signature, version/command, family/transport, and length.
const FIXED_HEADER_LEN: usize = 16;

/// Offset of the big-endian length field within the header.
const LEN_OFFSET: usize = 14;

const UNIX_PATH_LEN: usize = 108;

/// Errors produced while decoding or emitting a PROXYv2 header.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
#[non_exhaustive]
pub enum ProxyError {
    /// Structurally malformed input
    #[error("unexpected PROXYv2 data: {0}")]
    Unexpected(&'static str),

    /// A declared length exceeds a configured or structural bound
    #[error("PROXYv2 value out of range: {0}")]
    Range(&'static str),

    /// The emitted header would exceed the configured maximum size
    #[error("no space in PROXYv2 header: {0}")]
    NoSpace(&'static str),
}

/// The command carried in a PROXYv2 header.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProxyCommand {
    /// The connection was established by the proxy itself, e.g. a health check
    Local,
    /// The connection is relayed on behalf of the addresses in the header
    Proxy,
}

/// The transport protocol of the proxied connection.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SockType {
    /// Unspecified transport
    Unspec,
    /// SOCK_STREAM, i.e. TCP or a TLS-wrapped stream
    Stream,
    /// SOCK_DGRAM, i.e. UDP
    Dgram,
}

/// The source and destination endpoints, keyed by address family.
///
/// `Unspec` is also used for `LOCAL` commands, whose address block the
/// receiver must ignore.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ProxyAddrs {
    /// AF_UNSPEC: no addresses available
    Unspec,
    /// AF_INET source and destination
    Inet {
        /// original source
        src: SocketAddrV4,
        /// original destination
        dst: SocketAddrV4,
    },
    /// AF_INET6 source and destination
    Inet6 {
        /// original source
        src: SocketAddrV6,
        /// original destination
        dst: SocketAddrV6,
    },
    /// AF_UNIX socket paths, at most 108 octets each, trailing NULs stripped
    Unix {
        /// original source path
        src: Vec<u8>,
        /// original destination path
        dst: Vec<u8>,
    },
}

impl ProxyAddrs {
    fn family(&self) -> u8 {
        match self {
            Self::Unspec => 0,
            Self::Inet { .. } => 1,
            Self::Inet6 { .. } => 2,
            Self::Unix { .. } => 3,
        }
    }
}

fn addr_block_len(family: u8) -> usize {
    match family {
        1 => 12,
        2 => 36,
        3 => 2 * UNIX_PATH_LEN,
        _ => 0,
    }
}

/// A completed PROXYv2 parse.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProxyHeader {
    /// LOCAL or PROXY
    pub command: ProxyCommand,
    /// Transport of the proxied connection
    pub sock_type: SockType,
    /// Decoded endpoints; `Unspec` for AF_UNSPEC and for LOCAL commands
    pub addrs: ProxyAddrs,
    /// The committed TLV region; iterate with [`ProxyHeader::tlvs`]
    pub tlv_region: Bytes,
    /// Bytes that followed the header, not part of it
    pub extra: Bytes,
}

impl ProxyHeader {
    /// Iterates the TLVs of the committed region.
    pub fn tlvs(&self) -> TlvIter<'_> {
        TlvIter {
            data: &self.tlv_region,
        }
    }
}

/// What a call to [`ProxyV2Parser::push`] reported.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ProxyEvent {
    /// The header is incomplete; push more bytes
    NeedMore,
    /// The byte stream is not a valid PROXYv2 header
    Failed(ProxyError),
    /// The header parsed; the connection may proceed
    Complete(ProxyHeader),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum State {
    Signature,
    VerCmd,
    ProtoFam,
    Len,
    Addrs,
    Tlvs,
    Done,
    Failed,
}

/// A resumable PROXYv2 header parser.
///
/// One parser serves one connection. Fragments are accumulated until the
/// header completes; afterwards [`ProxyHeader::extra`] returns whatever
/// trailed the header so the connection handler can replay it.
pub struct ProxyV2Parser {
    state: State,
    buf: BytesMut,
    max_size: u16,
    command: ProxyCommand,
    sock_type: SockType,
    family: u8,
    total_len: usize,
    callback: Option<Box<dyn FnMut(ProxyEvent) + Send>>,
}

impl fmt::Debug for ProxyV2Parser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyV2Parser")
            .field("state", &self.state)
            .field("buffered", &self.buf.len())
            .finish()
    }
}

impl ProxyV2Parser {
    /// Creates a parser delivering results to `callback`.
    ///
    /// `max_size` bounds the declared header length (the two length octets);
    /// anything larger fails with [`ProxyError::Range`].
    pub fn new(max_size: u16, callback: Box<dyn FnMut(ProxyEvent) + Send>) -> Self {
        Self {
            state: State::Signature,
            buf: BytesMut::new(),
            max_size,
            command: ProxyCommand::Local,
            sock_type: SockType::Unspec,
            family: 0,
            total_len: 0,
            callback: Some(callback),
        }
    }

    /// Returns true once a push has completed (or failed) the parse.
    pub fn is_done(&self) -> bool {
        matches!(self.state, State::Done | State::Failed)
    }

    /// Feeds bytes into the state machine.
    ///
    /// The callback fires exactly once per call. Pushing from within the
    /// callback is a programming error and panics.
    pub fn push(&mut self, data: &[u8]) {
        let mut callback = self
            .callback
            .take()
            .expect("recursive push into PROXYv2 parser");
        self.buf.extend_from_slice(data);
        let event = self.advance();
        callback(event);
        self.callback = Some(callback);
    }

    /// How many bytes the current state is waiting for.
    fn expect_data(&self) -> usize {
        match self.state {
            State::Signature => PROXY_V2_SIGNATURE.len(),
            State::VerCmd => 13,
            State::ProtoFam => 14,
            State::Len => FIXED_HEADER_LEN,
            State::Addrs => FIXED_HEADER_LEN + addr_block_len(self.family),
            State::Tlvs => self.total_len,
            State::Done | State::Failed => 0,
        }
    }

    fn fail(&mut self, err: ProxyError) -> ProxyEvent {
        debug!(%err, "PROXYv2 parse failed");
        self.state = State::Failed;
        ProxyEvent::Failed(err)
    }

    fn advance(&mut self) -> ProxyEvent {
        loop {
            match self.state {
                State::Done | State::Failed => {
                    return self.fail(ProxyError::Unexpected("push after parse completion"));
                }
                _ if self.buf.len() < self.expect_data() => return ProxyEvent::NeedMore,
                State::Signature => {
                    if self.buf[..12] != PROXY_V2_SIGNATURE {
                        return self.fail(ProxyError::Unexpected("bad PROXYv2 signature"));
                    }
                    self.state = State::VerCmd;
                }
                State::VerCmd => {
                    let b = self.buf[12];
                    if b >> 4 != 2 {
                        return self.fail(ProxyError::Unexpected("unsupported PROXY version"));
                    }
                    self.command = match b & 0x0f {
                        0 => ProxyCommand::Local,
                        1 => ProxyCommand::Proxy,
                        _ => return self.fail(ProxyError::Unexpected("unknown PROXY command")),
                    };
                    self.state = State::ProtoFam;
                }
                State::ProtoFam => {
                    let b = self.buf[13];
                    self.family = b >> 4;
                    if self.family > 3 {
                        return self.fail(ProxyError::Unexpected("unknown address family"));
                    }
                    self.sock_type = match b & 0x0f {
                        0 => SockType::Unspec,
                        1 => SockType::Stream,
                        2 => SockType::Dgram,
                        _ => return self.fail(ProxyError::Unexpected("unknown transport")),
                    };
                    self.state = State::Len;
                }
                State::Len => {
                    let declared =
                        u16::from_be_bytes([self.buf[LEN_OFFSET], self.buf[LEN_OFFSET + 1]]);
                    if declared > self.max_size {
                        return self.fail(ProxyError::Range("declared length exceeds max_size"));
                    }
                    if (declared as usize) < addr_block_len(self.family) {
                        return self.fail(ProxyError::Unexpected("length below address block"));
                    }
                    self.total_len = FIXED_HEADER_LEN + declared as usize;
                    self.state = State::Addrs;
                }
                State::Addrs => {
                    self.state = State::Tlvs;
                }
                State::Tlvs => {
                    return self.complete();
                }
            }
        }
    }

    fn complete(&mut self) -> ProxyEvent {
        let header_bytes = self.buf.split_to(self.total_len).freeze();
        let extra = self.buf.split().freeze();
        let addrs = match self.command {
            // the receiver must ignore the address block of a LOCAL header
            ProxyCommand::Local => ProxyAddrs::Unspec,
            ProxyCommand::Proxy => parse_addrs(self.family, &header_bytes[FIXED_HEADER_LEN..]),
        };
        let tlv_start = FIXED_HEADER_LEN + addr_block_len(self.family);
        self.state = State::Done;
        debug!(
            command = ?self.command,
            sock_type = ?self.sock_type,
            len = self.total_len,
            "PROXYv2 header complete"
        );
        ProxyEvent::Complete(ProxyHeader {
            command: self.command,
            sock_type: self.sock_type,
            addrs,
            tlv_region: header_bytes.slice(tlv_start..self.total_len),
            extra,
        })
    }
}

fn parse_addrs(family: u8, block: &[u8]) -> ProxyAddrs {
    match family {
        1 => {
            let src_ip = Ipv4Addr::new(block[0], block[1], block[2], block[3]);
            let dst_ip = Ipv4Addr::new(block[4], block[5], block[6], block[7]);
            let src_port = u16::from_be_bytes([block[8], block[9]]);
            let dst_port = u16::from_be_bytes([block[10], block[11]]);
            ProxyAddrs::Inet {
                src: SocketAddrV4::new(src_ip, src_port),
                dst: SocketAddrV4::new(dst_ip, dst_port),
            }
        }
        2 => {
            let mut src_octets = [0u8; 16];
            let mut dst_octets = [0u8; 16];
            src_octets.copy_from_slice(&block[0..16]);
            dst_octets.copy_from_slice(&block[16..32]);
            let src_port = u16::from_be_bytes([block[32], block[33]]);
            let dst_port = u16::from_be_bytes([block[34], block[35]]);
            ProxyAddrs::Inet6 {
                src: SocketAddrV6::new(Ipv6Addr::from(src_octets), src_port, 0, 0),
                dst: SocketAddrV6::new(Ipv6Addr::from(dst_octets), dst_port, 0, 0),
            }
        }
        3 => {
            let strip = |path: &[u8]| {
                let end = path.iter().rposition(|&b| b != 0).map_or(0, |p| p + 1);
                path[..end].to_vec()
            };
            ProxyAddrs::Unix {
                src: strip(&block[..UNIX_PATH_LEN]),
                dst: strip(&block[UNIX_PATH_LEN..2 * UNIX_PATH_LEN]),
            }
        }
        _ => ProxyAddrs::Unspec,
    }
}

/// The registered PROXYv2 TLV types, RFC-less but de facto standardized by
/// the HAProxy protocol document.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum TlvType {
    /// 0x01: application layer protocol negotiation value
    Alpn,
    /// 0x02: the authority (host name) the client connected to
    Authority,
    /// 0x03: CRC32c checksum of the header
    Crc32c,
    /// 0x04: padding
    Noop,
    /// 0x05: opaque connection id
    UniqueId,
    /// 0x20: TLS information, carrying sub-TLVs
    Tls,
    /// 0x21: TLS version string (sub-TLV)
    TlsVersion,
    /// 0x22: client certificate common name (sub-TLV)
    TlsCn,
    /// 0x23: cipher name (sub-TLV)
    TlsCipher,
    /// 0x24: signature algorithm (sub-TLV)
    TlsSigAlg,
    /// 0x25: key algorithm (sub-TLV)
    TlsKeyAlg,
    /// 0x30: namespace token
    Netns,
    /// Anything else
    Unknown(u8),
}

impl From<u8> for TlvType {
    fn from(value: u8) -> Self {
        match value {
            0x01 => Self::Alpn,
            0x02 => Self::Authority,
            0x03 => Self::Crc32c,
            0x04 => Self::Noop,
            0x05 => Self::UniqueId,
            0x20 => Self::Tls,
            0x21 => Self::TlsVersion,
            0x22 => Self::TlsCn,
            0x23 => Self::TlsCipher,
            0x24 => Self::TlsSigAlg,
            0x25 => Self::TlsKeyAlg,
            0x30 => Self::Netns,
            other => Self::Unknown(other),
        }
    }
}

impl From<TlvType> for u8 {
    fn from(t: TlvType) -> Self {
        match t {
            TlvType::Alpn => 0x01,
            TlvType::Authority => 0x02,
            TlvType::Crc32c => 0x03,
            TlvType::Noop => 0x04,
            TlvType::UniqueId => 0x05,
            TlvType::Tls => 0x20,
            TlvType::TlsVersion => 0x21,
            TlvType::TlsCn => 0x22,
            TlvType::TlsCipher => 0x23,
            TlvType::TlsSigAlg => 0x24,
            TlvType::TlsKeyAlg => 0x25,
            TlvType::Netns => 0x30,
            TlvType::Unknown(other) => other,
        }
    }
}

/// One TLV of a committed header region.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Tlv<'a> {
    /// The TLV type octet, decoded
    pub tlv_type: TlvType,
    /// The value bytes
    pub value: &'a [u8],
}

impl<'a> Tlv<'a> {
    /// Decodes this TLV as TLS information; only valid for [`TlvType::Tls`].
    pub fn tls(&self) -> Result<TlsTlv<'a>, ProxyError> {
        if self.tlv_type != TlvType::Tls {
            return Err(ProxyError::Unexpected("not a TLS TLV"));
        }
        TlsTlv::parse(self.value)
    }
}

/// A stateless iterator over a TLV region.
///
/// Structural errors surface as `Err` items; iteration stops after an error.
pub struct TlvIter<'a> {
    data: &'a [u8],
}

impl<'a> Iterator for TlvIter<'a> {
    type Item = Result<Tlv<'a>, ProxyError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.data.is_empty() {
            return None;
        }
        if self.data.len() < 3 {
            self.data = &[];
            return Some(Err(ProxyError::Range("truncated TLV header")));
        }
        let tlv_type = TlvType::from(self.data[0]);
        let len = u16::from_be_bytes([self.data[1], self.data[2]]) as usize;
        let Some(value) = self.data.get(3..3 + len) else {
            self.data = &[];
            return Some(Err(ProxyError::Range("TLV value overflows region")));
        };
        self.data = &self.data[3 + len..];
        Some(Ok(Tlv { tlv_type, value }))
    }
}

/// The decoded TLS TLV: client bits, verification result, and sub-TLVs.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TlsTlv<'a> {
    /// PP2_CLIENT_* bits
    pub client: u8,
    /// Zero when the client presented a verified certificate
    pub verify: u32,
    subs: &'a [u8],
}

impl<'a> TlsTlv<'a> {
    fn parse(value: &'a [u8]) -> Result<Self, ProxyError> {
        if value.len() < 5 {
            return Err(ProxyError::Range("truncated TLS TLV"));
        }
        Ok(Self {
            client: value[0],
            verify: u32::from_be_bytes([value[1], value[2], value[3], value[4]]),
            subs: &value[5..],
        })
    }

    /// Iterates the sub-TLVs; same wire shape as top-level TLVs.
    pub fn sub_tlvs(&self) -> TlvIter<'a> {
        TlvIter { data: self.subs }
    }
}

/// Builds a PROXYv2 header, the inverse of the parser.
///
/// TLVs are appended incrementally; each append patches the length field in
/// place so the buffer is valid after every call.
pub struct ProxyV2Emitter {
    buf: BytesMut,
    max_size: u16,
}

impl ProxyV2Emitter {
    /// Starts a header for the given command, transport, and endpoints.
    pub fn new(
        command: ProxyCommand,
        sock_type: SockType,
        addrs: &ProxyAddrs,
        max_size: u16,
    ) -> Result<Self, ProxyError> {
        let family = addrs.family();
        let addr_len = addr_block_len(family);
        if addr_len > max_size as usize {
            return Err(ProxyError::NoSpace("address block exceeds max_size"));
        }

        let mut buf = BytesMut::with_capacity(FIXED_HEADER_LEN + addr_len);
        buf.extend_from_slice(&PROXY_V2_SIGNATURE);
        buf.extend_from_slice(&[
            0x20 | match command {
                ProxyCommand::Local => 0,
                ProxyCommand::Proxy => 1,
            },
            family << 4
                | match sock_type {
                    SockType::Unspec => 0,
                    SockType::Stream => 1,
                    SockType::Dgram => 2,
                },
        ]);
        buf.extend_from_slice(&(addr_len as u16).to_be_bytes());

        match addrs {
            ProxyAddrs::Unspec => {}
            ProxyAddrs::Inet { src, dst } => {
                buf.extend_from_slice(&src.ip().octets());
                buf.extend_from_slice(&dst.ip().octets());
                buf.extend_from_slice(&src.port().to_be_bytes());
                buf.extend_from_slice(&dst.port().to_be_bytes());
            }
            ProxyAddrs::Inet6 { src, dst } => {
                buf.extend_from_slice(&src.ip().octets());
                buf.extend_from_slice(&dst.ip().octets());
                buf.extend_from_slice(&src.port().to_be_bytes());
                buf.extend_from_slice(&dst.port().to_be_bytes());
            }
            ProxyAddrs::Unix { src, dst } => {
                for path in [src, dst] {
                    if path.len() > UNIX_PATH_LEN {
                        return Err(ProxyError::Range("unix path exceeds 108 octets"));
                    }
                    buf.extend_from_slice(path);
                    buf.resize(buf.len() + UNIX_PATH_LEN - path.len(), 0);
                }
            }
        }

        Ok(Self { buf, max_size })
    }

    fn declared_len(&self) -> u16 {
        u16::from_be_bytes([self.buf[LEN_OFFSET], self.buf[LEN_OFFSET + 1]])
    }

    /// Appends one TLV, patching the header length in place.
    pub fn append_tlv(&mut self, tlv_type: TlvType, value: &[u8]) -> Result<(), ProxyError> {
        if value.len() > u16::MAX as usize {
            return Err(ProxyError::Range("TLV value exceeds 65535 octets"));
        }
        let new_len = self.declared_len() as usize + 3 + value.len();
        if new_len > self.max_size as usize {
            return Err(ProxyError::NoSpace("TLV would exceed max_size"));
        }

        self.buf.extend_from_slice(&[u8::from(tlv_type)]);
        self.buf.extend_from_slice(&(value.len() as u16).to_be_bytes());
        self.buf.extend_from_slice(value);
        self.buf[LEN_OFFSET..LEN_OFFSET + 2].copy_from_slice(&(new_len as u16).to_be_bytes());
        Ok(())
    }

    /// Freezes the finished header.
    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}
