// Copyright 2015-2023 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Domain name associated types, i.e. `Name`

use std::cmp::Ordering;
use std::fmt::{self, Write};
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use tinyvec::TinyVec;

use crate::error::{ProtoError, ProtoErrorKind};

const MAX_LABEL_LENGTH: usize = 63;
const MAX_NAME_LENGTH: usize = 255;

/// A domain name, stored as a sequence of labels.
///
/// All names are absolute. The root label is implicit: the root name holds no
/// labels at all. Label octets are stored with their original case; every
/// comparison (equality, hashing, ordering) is case-insensitive on ASCII, per
/// RFC 1035 and RFC 4034 section 6.1.
#[derive(Clone, Default, Eq)]
pub struct Name {
    label_data: TinyVec<[u8; 32]>,
    label_ends: TinyVec<[u8; 24]>,
}

impl Name {
    /// Creates the root name, i.e. `.`
    pub fn root() -> Self {
        Self::default()
    }

    /// Returns true if this is the root name
    pub fn is_root(&self) -> bool {
        self.label_ends.is_empty()
    }

    /// Returns true if the leftmost label is the single octet `*`
    pub fn is_wildcard(&self) -> bool {
        self.label(0).map_or(false, |l| l == b"*")
    }

    /// Number of labels, not counting the implicit root label.
    pub fn num_labels(&self) -> u8 {
        self.label_ends.len() as u8
    }

    /// The length of the name in wire format, counting the root label.
    pub fn len(&self) -> usize {
        self.label_data.len() + self.label_ends.len() + 1
    }

    /// Always false: the root name still occupies one octet on the wire.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Returns the label at `idx`, leftmost label first.
    pub fn label(&self, idx: usize) -> Option<&[u8]> {
        if idx >= self.label_ends.len() {
            return None;
        }
        let start = if idx == 0 {
            0
        } else {
            self.label_ends[idx - 1] as usize
        };
        Some(&self.label_data[start..self.label_ends[idx] as usize])
    }

    /// Iterates the labels, leftmost label first.
    pub fn iter_labels(&self) -> LabelIter<'_> {
        LabelIter { name: self, idx: 0 }
    }

    /// Creates a name from the given labels, leftmost first.
    pub fn from_labels<I, L>(labels: I) -> Result<Self, ProtoError>
    where
        I: IntoIterator<Item = L>,
        L: AsRef<[u8]>,
    {
        let mut name = Self::root();
        for label in labels {
            name.push_label(label.as_ref())?;
        }
        Ok(name)
    }

    /// Parses a name from presentation format, e.g. `ns1.example.com.`
    ///
    /// A trailing dot is accepted but not required; the name is absolute
    /// either way. `.` alone parses to the root name.
    pub fn from_ascii(name: &str) -> Result<Self, ProtoError> {
        if name.is_empty() || name == "." {
            return Ok(Self::root());
        }

        let name = name.strip_suffix('.').unwrap_or(name);
        let mut this = Self::root();
        for label in name.split('.') {
            if label.is_empty() {
                return Err(ProtoErrorKind::MalformedLabel(name.to_string()).into());
            }
            this.push_label(label.as_bytes())?;
        }
        Ok(this)
    }

    /// Reads an uncompressed wire-format name from the front of `buf`.
    ///
    /// Returns the name and the number of octets consumed. Compression
    /// pointers are rejected; rdata-embedded names in zone storage are always
    /// uncompressed.
    pub fn from_wire(buf: &[u8]) -> Result<(Self, usize), ProtoError> {
        let mut this = Self::root();
        let mut pos = 0;
        loop {
            let len = *buf
                .get(pos)
                .ok_or(ProtoErrorKind::Message("truncated wire-format name"))?
                as usize;
            pos += 1;
            if len == 0 {
                return Ok((this, pos));
            }
            if len > MAX_LABEL_LENGTH {
                return Err(ProtoErrorKind::Message("compression pointer in stored name").into());
            }
            let label = buf
                .get(pos..pos + len)
                .ok_or(ProtoErrorKind::Message("truncated wire-format name"))?;
            this.push_label(label)?;
            pos += len;
        }
    }

    /// Writes the name in uncompressed wire format, root label included.
    pub fn to_wire(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.len());
        for label in self.iter_labels() {
            buf.push(label.len() as u8);
            buf.extend_from_slice(label);
        }
        buf.push(0);
        buf
    }

    fn push_label(&mut self, label: &[u8]) -> Result<(), ProtoError> {
        if label.is_empty() || label.len() > MAX_LABEL_LENGTH {
            return Err(ProtoErrorKind::LabelBytesTooLong(label.len()).into());
        }
        let new_len = self.len() + label.len() + 1;
        if new_len > MAX_NAME_LENGTH {
            return Err(ProtoErrorKind::DomainNameTooLong(new_len).into());
        }
        self.label_data.extend_from_slice(label);
        self.label_ends.push(self.label_data.len() as u8);
        Ok(())
    }

    /// Returns a new name with `label` prepended, e.g. turning `example.com.`
    /// into `www.example.com.`
    pub fn prepend_label(&self, label: &[u8]) -> Result<Self, ProtoError> {
        let mut name = Self::root();
        name.push_label(label)?;
        for l in self.iter_labels() {
            name.push_label(l)?;
        }
        Ok(name)
    }

    /// Appends `suffix`, e.g. `www` + `example.com.` = `www.example.com.`
    pub fn append_name(&self, suffix: &Self) -> Result<Self, ProtoError> {
        let mut name = self.clone();
        for l in suffix.iter_labels() {
            name.push_label(l)?;
        }
        Ok(name)
    }

    /// The name with the leftmost label removed, or `None` at the root.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        Some(self.trim_to(self.label_ends.len() - 1))
    }

    /// Keeps the rightmost `num_labels` labels, dropping the rest.
    ///
    /// `trim_to(0)` is the root name; `trim_to(n)` for `n >= num_labels()` is
    /// a plain clone.
    pub fn trim_to(&self, num_labels: usize) -> Self {
        let total = self.label_ends.len();
        if num_labels >= total {
            return self.clone();
        }
        let skip = total - num_labels;
        let mut name = Self::root();
        for l in self.iter_labels().skip(skip) {
            name.push_label(l).expect("trimmed name cannot grow");
        }
        name
    }

    /// Returns true when `self` is equal to or a descendant of `other`, i.e.
    /// `other`'s labels are a suffix of `self`'s labels.
    ///
    /// Every name is a subdomain of the root, and of itself.
    pub fn is_subdomain_of(&self, other: &Self) -> bool {
        let mine = self.label_ends.len();
        let theirs = other.label_ends.len();
        if theirs > mine {
            return false;
        }
        for k in 1..=theirs {
            let a = self.label(mine - k).expect("label bounds checked");
            let b = other.label(theirs - k).expect("label bounds checked");
            if !a.eq_ignore_ascii_case(b) {
                return false;
            }
        }
        true
    }

    /// DNSSEC canonical ordering, RFC 4034 section 6.1: compare labels
    /// rightmost first, case-insensitively, with absent labels sorting first.
    pub fn cmp_canonical(&self, other: &Self) -> Ordering {
        let mine = self.label_ends.len();
        let theirs = other.label_ends.len();
        for k in 1..=mine.min(theirs) {
            let a = self.label(mine - k).expect("label bounds checked");
            let b = other.label(theirs - k).expect("label bounds checked");
            match cmp_label(a, b) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        mine.cmp(&theirs)
    }
}

fn cmp_label(a: &[u8], b: &[u8]) -> Ordering {
    for (x, y) in a.iter().zip(b.iter()) {
        match x.to_ascii_lowercase().cmp(&y.to_ascii_lowercase()) {
            Ordering::Equal => continue,
            ord => return ord,
        }
    }
    a.len().cmp(&b.len())
}

impl PartialEq for Name {
    fn eq(&self, other: &Self) -> bool {
        if self.label_ends != other.label_ends {
            return false;
        }
        self.label_data.eq_ignore_ascii_case(&other.label_data)
    }
}

impl Hash for Name {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for label in self.iter_labels() {
            state.write_u8(label.len() as u8);
            for b in label {
                state.write_u8(b.to_ascii_lowercase());
            }
        }
    }
}

impl Ord for Name {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cmp_canonical(other)
    }
}

impl PartialOrd for Name {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl FromStr for Name {
    type Err = ProtoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_ascii(s)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            return f.write_char('.');
        }
        for label in self.iter_labels() {
            for &b in label {
                match b {
                    b'.' | b'\\' => write!(f, "\\{}", b as char)?,
                    0x20..=0x7e => f.write_char(b as char)?,
                    _ => write!(f, "\\{b:03}")?,
                }
            }
            f.write_char('.')?;
        }
        Ok(())
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Name(\"{self}\")")
    }
}

/// An iterator over the labels of a [`Name`], leftmost label first.
pub struct LabelIter<'a> {
    name: &'a Name,
    idx: usize,
}

impl<'a> Iterator for LabelIter<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        let label = self.name.label(self.idx)?;
        self.idx += 1;
        Some(label)
    }
}
