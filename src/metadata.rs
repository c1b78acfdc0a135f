// Copyright (C) 2025 FZI Forschungszentrum Informatik
// SPDX-License-Identifier: Apache-2.0
//! Trace metadata model
//!
//! This module provides the immutable type model describing the layout of
//! packets and event records: [data types][types], [integer ranges][range]
//! and the [trace type roots][trace]. The model is produced by an external
//! metadata frontend and is consumed read-only by the
//! [procedure builder][crate::proc::build]. It is assumed to be validated;
//! this crate asserts but does not diagnose.

pub mod range;
pub mod trace;
pub mod types;


use core::fmt;

use alloc::string::String;
use alloc::vec::Vec;

/// Standard position of a root structure type within a trace
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Scope {
    PacketHeader,
    PacketContext,
    EventRecordHeader,
    EventRecordCommonContext,
    EventRecordSpecificContext,
    EventRecordPayload,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PacketHeader => write!(f, "packet header"),
            Self::PacketContext => write!(f, "packet context"),
            Self::EventRecordHeader => write!(f, "event record header"),
            Self::EventRecordCommonContext => write!(f, "event record common context"),
            Self::EventRecordSpecificContext => write!(f, "event record specific context"),
            Self::EventRecordPayload => write!(f, "event record payload"),
        }
    }
}

/// Byte order of a fixed-length field
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ByteOrder {
    Big,
    Little,
}

/// Role of an unsigned integer field
///
/// Roles attach trace-level semantics to otherwise plain unsigned integer
/// fields. The [builder][crate::proc::build] turns each role into the
/// corresponding state-updating instruction.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum UIntRole {
    /// The packet magic number (`0xC1FC1FC1`)
    PktMagicNumber,
    /// The data stream type ID
    DstId,
    /// The data stream (instance) ID
    DsId,
    /// The expected total length of the packet, in bits
    PktTotalLen,
    /// The expected content length of the packet, in bits
    PktContentLen,
    /// The packet sequence number
    PktSeqNum,
    /// Snapshot of the discarded event record counter
    DiscErCounterSnap,
    /// A default clock timestamp
    DefClkTs,
    /// The default clock value at the end of the packet
    PktEndDefClkTs,
    /// The event record type ID
    ErtId,
}

/// Set of [`UIntRole`]s carried by one field
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct UIntRoles(u16);

impl UIntRoles {
    /// Create an empty role set
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Create a role set containing a single role
    pub const fn only(role: UIntRole) -> Self {
        Self::empty().with(role)
    }

    /// Add a role to this set
    pub const fn with(self, role: UIntRole) -> Self {
        Self(self.0 | 1 << role as u16)
    }

    /// Check whether this set contains the given role
    pub const fn contains(self, role: UIntRole) -> bool {
        self.0 & 1 << role as u16 != 0
    }

    /// Check whether this set is empty
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl FromIterator<UIntRole> for UIntRoles {
    fn from_iter<I: IntoIterator<Item = UIntRole>>(iter: I) -> Self {
        iter.into_iter().fold(Self::empty(), Self::with)
    }
}

/// Symbolic location of a previously decoded field
///
/// A data location identifies the field providing the length of a
/// dynamic-length type or the selector of a variant/optional type. An
/// absolute location is rooted at a [`Scope`]; a relative location is
/// resolved against the lexical ancestor chain at build time. Path elements
/// name structure members.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DataLocation {
    origin: Option<Scope>,
    path: Vec<String>,
}

impl DataLocation {
    /// Create an absolute data location rooted at the given scope
    pub fn abs<I>(scope: Scope, path: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        Self {
            origin: Some(scope),
            path: path.into_iter().map(Into::into).collect(),
        }
    }

    /// Create a relative data location
    pub fn rel<I>(path: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        Self {
            origin: None,
            path: path.into_iter().map(Into::into).collect(),
        }
    }

    /// Retrieve the root scope of an absolute location
    pub fn scope(&self) -> Option<Scope> {
        self.origin
    }

    /// Retrieve the path elements
    pub fn path(&self) -> &[String] {
        &self.path
    }
}

impl fmt::Display for DataLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(scope) = self.origin {
            write!(f, "{scope}")?;
        } else {
            write!(f, "<rel>")?;
        }
        self.path.iter().try_for_each(|p| write!(f, "/`{p}`"))
    }
}
