// Copyright (C) 2025 FZI Forschungszentrum Informatik
// SPDX-License-Identifier: Apache-2.0
//! Decoding error types

use core::fmt;

/// A decoding error
///
/// Every error carries the packet-absolute bit offset at which it was
/// detected. Errors are final: after reporting one, the virtual machine
/// only continues after a [`reset`][super::Vm::reset].
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Error {
    kind: ErrorKind,
    offset: u64,
}

impl Error {
    pub(super) fn new(kind: ErrorKind, offset: u64) -> Self {
        Self { kind, offset }
    }

    /// Retrieve the kind of this error
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// Retrieve the packet-absolute bit offset at which decoding failed
    pub fn offset_bits(&self) -> u64 {
        self.offset
    }
}

impl core::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at bit {}", self.kind, self.offset)
    }
}

/// Kinds of decoding errors
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum ErrorKind {
    /// The packet header magic number is not `0xC1FC1FC1`
    MagicMismatch { val: u64 },
    /// The decoded data stream type ID has no known data stream type
    UnknownDst { id: u64 },
    /// The decoded event record type ID has no known event record type
    UnknownErt { id: u64 },
    /// No variant option's selector ranges contain the selector value
    UnknownVarUSel { val: u64 },
    /// No variant option's selector ranges contain the selector value
    UnknownVarSSel { val: i64 },
    /// The expected packet content length exceeds the total length
    OversizedPktContent { content: u64, total: u64 },
    /// Decoding requires more bits than the packet content allows
    PrematurePktEnd { needed: u64, content: u64 },
    /// A variable-length integer exceeds 9 bytes
    BadVlInt,
    /// The decoded metadata stream UUID differs from the expected one
    MetadataStreamUuidMismatch { expected: [u8; 16], got: [u8; 16] },
    /// The input ended in the middle of a field
    EndOfStream,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MagicMismatch { val } => {
                write!(f, "Bad packet magic number {val:#010x}")
            }
            Self::UnknownDst { id } => write!(f, "Unknown data stream type ID {id}"),
            Self::UnknownErt { id } => write!(f, "Unknown event record type ID {id}"),
            Self::UnknownVarUSel { val } => write!(f, "No variant option for selector value {val}"),
            Self::UnknownVarSSel { val } => write!(f, "No variant option for selector value {val}"),
            Self::OversizedPktContent { content, total } => write!(
                f,
                "Packet content length ({content} bits) exceeds total length ({total} bits)"
            ),
            Self::PrematurePktEnd { needed, content } => write!(
                f,
                "Decoding needs {needed} bits but the packet content ends at {content}"
            ),
            Self::BadVlInt => write!(f, "Malformed variable-length integer"),
            Self::MetadataStreamUuidMismatch { .. } => {
                write!(f, "Metadata stream UUID mismatch")
            }
            Self::EndOfStream => write!(f, "Input ended in the middle of a field"),
        }
    }
}
