// Copyright (C) 2025 FZI Forschungszentrum Informatik
// SPDX-License-Identifier: Apache-2.0
//! Trace type roots
//!
//! A [`TraceType`] aggregates the root structure types of every
//! [scope][super::Scope] for every data stream type and event record type,
//! plus trace-wide properties such as the expected metadata stream UUID.

use alloc::string::String;
use alloc::vec::Vec;

use super::types::StructType;

/// A clock type
///
/// Describes the default clock of a data stream type. Timestamp fields
/// update the current value of that clock while decoding.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ClockType {
    /// Frequency (Hz)
    pub freq: u64,
    pub name: Option<String>,
}

/// An event record type
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EventRecordType {
    pub id: u64,
    pub spec_ctx: Option<StructType>,
    pub payload: Option<StructType>,
}

/// A data stream type
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DataStreamType {
    pub id: u64,
    pub pkt_ctx: Option<StructType>,
    pub er_header: Option<StructType>,
    pub er_common_ctx: Option<StructType>,
    pub def_clk: Option<ClockType>,
    pub erts: Vec<EventRecordType>,
}

impl DataStreamType {
    /// Retrieve the event record type with the given ID
    pub fn ert(&self, id: u64) -> Option<&EventRecordType> {
        self.erts.iter().find(|e| e.id == id)
    }
}

/// A trace type
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TraceType {
    pub pkt_header: Option<StructType>,
    /// Expected metadata stream UUID, checked while decoding if present
    pub uuid: Option<[u8; 16]>,
    pub dsts: Vec<DataStreamType>,
}

impl TraceType {
    /// Retrieve the data stream type with the given ID
    pub fn dst(&self, id: u64) -> Option<&DataStreamType> {
        self.dsts.iter().find(|d| d.id == id)
    }
}
