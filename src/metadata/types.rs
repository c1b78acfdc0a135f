// Copyright (C) 2025 FZI Forschungszentrum Informatik
// SPDX-License-Identifier: Apache-2.0
//! Data type tree
//!
//! A [`DataType`] describes the layout of one data item: a scalar
//! (fixed-length bit array/integer/boolean/float, variable-length integer),
//! a string, a BLOB, or a compound (structure, array, variant, optional).
//! The naming follows the trace format's own abbreviations: `Fl` for
//! fixed-length, `Vl` for variable-length, `Sl` for static-length, `Dl` for
//! dynamic-length and `Nt` for null-terminated.
//!
//! The tree is immutable and assumed validated: alignments are powers of
//! two, fixed lengths are within 1 to 64 bits, member names are unique
//! within a structure and variant option ranges are pairwise disjoint.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;

use super::range::IntegerRangeSet;
use super::{ByteOrder, DataLocation, UIntRoles};

/// Named mappings of an enumeration type
pub type EnumMappings<T> = Vec<(String, IntegerRangeSet<T>)>;

/// Fixed-length bit array type
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FlBitArrayType {
    /// Alignment (bits, power of two)
    pub align: u32,
    /// Length (bits, 1 to 64)
    pub len: u32,
    pub bo: ByteOrder,
}

/// Fixed-length boolean type
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FlBoolType {
    pub align: u32,
    pub len: u32,
    pub bo: ByteOrder,
}

/// Fixed-length signed integer type
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FlSIntType {
    pub align: u32,
    pub len: u32,
    pub bo: ByteOrder,
    /// Whether values are character codes of some text encoding
    pub has_encoding: bool,
}

/// Fixed-length unsigned integer type
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FlUIntType {
    pub align: u32,
    pub len: u32,
    pub bo: ByteOrder,
    pub has_encoding: bool,
    pub roles: UIntRoles,
}

/// Fixed-length signed enumeration type
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FlSEnumType {
    pub int: FlSIntType,
    pub mappings: EnumMappings<i64>,
}

/// Fixed-length unsigned enumeration type
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FlUEnumType {
    pub int: FlUIntType,
    pub mappings: EnumMappings<u64>,
}

/// Fixed-length floating point number type (32 or 64 bits)
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FlFloatType {
    pub align: u32,
    pub len: u32,
    pub bo: ByteOrder,
}

/// Variable-length signed integer type (LEB128)
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VlSIntType {}

/// Variable-length unsigned integer type (LEB128)
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VlUIntType {
    pub roles: UIntRoles,
}

/// Variable-length signed enumeration type
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VlSEnumType {
    pub mappings: EnumMappings<i64>,
}

/// Variable-length unsigned enumeration type
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VlUEnumType {
    pub int: VlUIntType,
    pub mappings: EnumMappings<u64>,
}

/// Null-terminated string type (byte-aligned)
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NtStrType {}

/// Static-length string type
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SlStrType {
    /// Maximum length (bytes)
    pub len: u64,
}

/// Dynamic-length string type
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DlStrType {
    /// Location of the field providing the maximum length (bytes)
    pub len_loc: DataLocation,
}

/// Static-length array type
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SlArrayType {
    /// Number of elements
    pub len: u64,
    pub elem: Box<DataType>,
    /// Whether this array holds the 16 metadata stream UUID bytes
    pub is_metadata_stream_uuid: bool,
}

/// Dynamic-length array type
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DlArrayType {
    /// Location of the field providing the number of elements
    pub len_loc: DataLocation,
    pub elem: Box<DataType>,
}

/// Static-length BLOB type
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SlBlobType {
    /// Length (bytes)
    pub len: u64,
    /// Whether this BLOB holds the 16 metadata stream UUID bytes
    pub is_metadata_stream_uuid: bool,
}

/// Dynamic-length BLOB type
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DlBlobType {
    /// Location of the field providing the length (bytes)
    pub len_loc: DataLocation,
}

/// Structure member: a name and a type
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StructMemberType {
    pub name: String,
    pub dt: DataType,
}

impl StructMemberType {
    /// Create a new structure member
    pub fn new(name: impl Into<String>, dt: DataType) -> Self {
        Self {
            name: name.into(),
            dt,
        }
    }
}

/// Structure type: an ordered sequence of named members
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StructType {
    /// Minimum alignment (bits, power of two)
    pub min_align: u32,
    pub members: Vec<StructMemberType>,
}

impl StructType {
    /// Create a new structure type with the given members
    pub fn new<I: IntoIterator<Item = StructMemberType>>(members: I) -> Self {
        Self {
            min_align: 1,
            members: members.into_iter().collect(),
        }
    }

    /// Retrieve the member with the given name
    pub fn member(&self, name: &str) -> Option<&StructMemberType> {
        self.members.iter().find(|m| m.name == name)
    }

    /// Retrieve the effective alignment of this structure
    ///
    /// This is the maximum of the minimum alignment and the alignments of
    /// all members.
    pub fn align(&self) -> u32 {
        self.members
            .iter()
            .map(|m| m.dt.align())
            .fold(self.min_align.max(1), u32::max)
    }
}

/// Option of a variant type
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VarOptType<T> {
    pub name: Option<String>,
    /// Selector values for which this option is chosen
    pub ranges: IntegerRangeSet<T>,
    pub dt: DataType,
}

/// Variant type with an unsigned integer selector
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VarUSelType {
    pub sel_loc: DataLocation,
    pub opts: Vec<VarOptType<u64>>,
}

/// Variant type with a signed integer selector
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VarSSelType {
    pub sel_loc: DataLocation,
    pub opts: Vec<VarOptType<i64>>,
}

/// Optional type with a boolean selector
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OptBoolType {
    pub sel_loc: DataLocation,
    pub dt: Box<DataType>,
}

/// Optional type with an unsigned integer selector
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OptUSelType {
    pub sel_loc: DataLocation,
    /// Selector values for which the data is present
    pub ranges: IntegerRangeSet<u64>,
    pub dt: Box<DataType>,
}

/// Optional type with a signed integer selector
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OptSSelType {
    pub sel_loc: DataLocation,
    pub ranges: IntegerRangeSet<i64>,
    pub dt: Box<DataType>,
}

/// A data type
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DataType {
    FlBitArray(FlBitArrayType),
    FlBool(FlBoolType),
    FlSInt(FlSIntType),
    FlUInt(FlUIntType),
    FlSEnum(FlSEnumType),
    FlUEnum(FlUEnumType),
    FlFloat(FlFloatType),
    VlSInt(VlSIntType),
    VlUInt(VlUIntType),
    VlSEnum(VlSEnumType),
    VlUEnum(VlUEnumType),
    NtStr(NtStrType),
    SlStr(SlStrType),
    DlStr(DlStrType),
    SlArray(SlArrayType),
    DlArray(DlArrayType),
    SlBlob(SlBlobType),
    DlBlob(DlBlobType),
    Struct(StructType),
    VarUSel(VarUSelType),
    VarSSel(VarSSelType),
    OptBool(OptBoolType),
    OptUSel(OptUSelType),
    OptSSel(OptSSelType),
}

impl DataType {
    /// Retrieve the alignment of the first bit of data of this type
    ///
    /// Variable-length integers, strings and BLOBs are byte-aligned.
    /// Variants and optionals align their contained data only.
    pub fn align(&self) -> u32 {
        match self {
            Self::FlBitArray(t) => t.align,
            Self::FlBool(t) => t.align,
            Self::FlSInt(t) => t.align,
            Self::FlUInt(t) => t.align,
            Self::FlSEnum(t) => t.int.align,
            Self::FlUEnum(t) => t.int.align,
            Self::FlFloat(t) => t.align,
            Self::VlSInt(_) | Self::VlUInt(_) | Self::VlSEnum(_) | Self::VlUEnum(_) => 8,
            Self::NtStr(_) | Self::SlStr(_) | Self::DlStr(_) => 8,
            Self::SlBlob(_) | Self::DlBlob(_) => 8,
            Self::SlArray(t) => t.elem.align(),
            Self::DlArray(t) => t.elem.align(),
            Self::Struct(t) => t.align(),
            Self::VarUSel(_) | Self::VarSSel(_) => 1,
            Self::OptBool(_) | Self::OptUSel(_) | Self::OptSSel(_) => 1,
        }
    }

    /// Retrieve the roles if this is an unsigned integer type
    pub fn uint_roles(&self) -> UIntRoles {
        match self {
            Self::FlUInt(t) => t.roles,
            Self::FlUEnum(t) => t.int.roles,
            Self::VlUInt(t) => t.roles,
            Self::VlUEnum(t) => t.int.roles,
            _ => UIntRoles::empty(),
        }
    }

    /// Check whether this type is an integer or boolean type
    ///
    /// These are the types a [data location][DataLocation] may refer to.
    pub fn is_int_or_bool(&self) -> bool {
        matches!(
            self,
            Self::FlBool(_)
                | Self::FlSInt(_)
                | Self::FlUInt(_)
                | Self::FlSEnum(_)
                | Self::FlUEnum(_)
                | Self::VlSInt(_)
                | Self::VlUInt(_)
                | Self::VlSEnum(_)
                | Self::VlUEnum(_)
        )
    }

    /// Retrieve the byte string profile of an array element type
    ///
    /// An array whose element type is an 8-bit, byte-aligned integer with a
    /// text encoding is decoded as a string. Returns whether this type
    /// matches that profile.
    pub fn is_byte_str_elem(&self) -> bool {
        match self {
            Self::FlSInt(t) => t.has_encoding && t.align == 8 && t.len == 8,
            Self::FlUInt(t) => t.has_encoding && t.align == 8 && t.len == 8,
            _ => false,
        }
    }

    /// Check whether this type is an 8-bit unsigned integer type
    pub fn is_u8(&self) -> bool {
        matches!(self, Self::FlUInt(t) if t.align == 8 && t.len == 8)
    }
}
