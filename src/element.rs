// Copyright (C) 2025 FZI Forschungszentrum Informatik
// SPDX-License-Identifier: Apache-2.0
//! Decoding elements
//!
//! A decoding [`Element`] is one event emitted by the
//! [virtual machine][crate::vm]: a decoded scalar field, a structural
//! boundary (begin/end of a structure, array, string, BLOB, variant,
//! optional, scope or packet) or a trace metadata update. Elements are
//! emitted in the exact document order defined by the procedure:
//! depth-first, left to right, arrays expanded length times.
//!
//! Scalar elements reference their [`DataType`]; substring and BLOB
//! section elements borrow their bytes from the buffer fed to the machine.

use crate::metadata::types::DataType;
use crate::metadata::Scope;

/// A decoding element
///
/// The `'t` lifetime is the trace type's, the `'d` lifetime the fed
/// buffer's.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Element<'t, 'd> {
    /// Beginning of a packet
    PktBegin,
    /// End of a packet, past any padding
    PktEnd,
    /// Beginning of a scope
    ScopeBegin(Scope),
    /// End of a scope
    ScopeEnd(Scope),
    /// The validated packet magic number
    PktMagicNumber(u32),
    /// The 16 metadata stream UUID bytes, emitted after the end element of
    /// the carrying array/BLOB
    MetadataStreamUuid([u8; 16]),
    /// Data stream information, available once the packet context was
    /// decoded
    DsInfo(DataStreamInfo),
    /// Packet information, available once the packet context was decoded
    PktInfo(PacketInfo),
    /// Event record information, available once the event record type is
    /// known
    ErInfo(EventRecordInfo),
    /// The default clock value after an update
    DefClkVal(u64),
    StructBegin,
    StructEnd,
    /// Beginning of a static-length array of `len` elements
    SlArrayBegin { len: u64 },
    SlArrayEnd,
    /// Beginning of a dynamic-length array of `len` elements
    DlArrayBegin { len: u64 },
    DlArrayEnd,
    /// Fixed-length bit array field
    FlBitArray { val: u64, dt: &'t DataType },
    /// Fixed-length boolean field
    FlBool { val: bool, dt: &'t DataType },
    /// Fixed-length signed integer or enumeration field
    FlSInt { val: i64, dt: &'t DataType },
    /// Fixed-length unsigned integer or enumeration field
    FlUInt { val: u64, dt: &'t DataType },
    /// Fixed-length floating point number field (32-bit values are
    /// widened losslessly)
    FlFloat { val: f64, dt: &'t DataType },
    /// Variable-length signed integer or enumeration field
    VlSInt { val: i64, dt: &'t DataType },
    /// Variable-length unsigned integer or enumeration field
    VlUInt { val: u64, dt: &'t DataType },
    /// Beginning of a null-terminated string
    NtStrBegin,
    /// End of a null-terminated string; the terminator was consumed but
    /// not emitted
    NtStrEnd,
    /// Beginning of a static-length string of at most `max_len` bytes
    SlStrBegin { max_len: u64 },
    SlStrEnd,
    /// Beginning of a dynamic-length string of at most `max_len` bytes
    DlStrBegin { max_len: u64 },
    DlStrEnd,
    /// String content bytes
    ///
    /// Emitted in chunks delimited by buffer boundaries. Never empty and
    /// never contains the null terminator; for counted strings, bytes past
    /// the first null are consumed but not emitted.
    SubstrBytes(&'d [u8]),
    /// Beginning of a static-length BLOB of `len` bytes
    SlBlobBegin { len: u64 },
    SlBlobEnd,
    /// Beginning of a dynamic-length BLOB of `len` bytes
    DlBlobBegin { len: u64 },
    DlBlobEnd,
    /// BLOB content bytes, emitted in chunks delimited by buffer
    /// boundaries; never empty
    BlobSectionBytes(&'d [u8]),
    /// Beginning of a variant; `opt_index` is the index of the selected
    /// option
    VarBegin { opt_index: usize },
    VarEnd,
    /// Beginning of an optional; the contained data follows only if
    /// `present`
    OptBegin { present: bool },
    OptEnd,
}

impl Element<'_, '_> {
    /// Check whether this element begins a compound or packet
    pub fn is_begin(&self) -> bool {
        matches!(
            self,
            Self::PktBegin
                | Self::ScopeBegin(_)
                | Self::StructBegin
                | Self::SlArrayBegin { .. }
                | Self::DlArrayBegin { .. }
                | Self::NtStrBegin
                | Self::SlStrBegin { .. }
                | Self::DlStrBegin { .. }
                | Self::SlBlobBegin { .. }
                | Self::DlBlobBegin { .. }
                | Self::VarBegin { .. }
                | Self::OptBegin { .. }
        )
    }

    /// Check whether this element ends a compound or packet
    pub fn is_end(&self) -> bool {
        matches!(
            self,
            Self::PktEnd
                | Self::ScopeEnd(_)
                | Self::StructEnd
                | Self::SlArrayEnd
                | Self::DlArrayEnd
                | Self::NtStrEnd
                | Self::SlStrEnd
                | Self::DlStrEnd
                | Self::SlBlobEnd
                | Self::DlBlobEnd
                | Self::VarEnd
                | Self::OptEnd
        )
    }
}

/// Data stream information of the current packet
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct DataStreamInfo {
    /// ID of the data stream type
    pub dst_id: u64,
    /// ID of the data stream (instance), if the packet carries one
    pub ds_id: Option<u64>,
}

/// Information of the current packet
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct PacketInfo {
    /// Expected total length (bits), if the packet carries one
    pub total_len: Option<u64>,
    /// Expected content length (bits), if the packet carries one
    pub content_len: Option<u64>,
    /// Sequence number, if the packet carries one
    pub seq_num: Option<u64>,
    /// Discarded event record counter snapshot, if the packet carries one
    pub disc_er_counter_snap: Option<u64>,
    /// Default clock value at the end of the packet, if the packet
    /// carries one
    pub end_def_clk_val: Option<u64>,
}

/// Information of the current event record
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct EventRecordInfo {
    /// ID of the event record type
    pub ert_id: u64,
}
