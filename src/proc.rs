// Copyright (C) 2025 FZI Forschungszentrum Informatik
// SPDX-License-Identifier: Apache-2.0
//! Decoding procedures
//!
//! A [`Proc`] is a flat sequence of [instructions][Instr], the unit the
//! [virtual machine][crate::vm] executes. Compound read instructions own a
//! sub-procedure; every sub-procedure ends with its matching `EndRead…`
//! instruction, which emits the corresponding end element and pops the
//! execution frame.
//!
//! The top-level container is a [`PktProc`], holding the trace preamble
//! procedure and one [`DsPktProc`] per data stream type, which in turn
//! holds one [`ErProc`] per event record type. Procedures are built once
//! by the [builder][build] and then only read, so they may be shared
//! freely between virtual machines.

pub mod build;


use core::fmt;

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use crate::metadata::range::IntegerRangeSet;
use crate::metadata::trace::{DataStreamType, EventRecordType, TraceType};
use crate::metadata::types::DataType;
use crate::metadata::{ByteOrder, Scope};

/// Load strategy of a fixed-length read instruction
///
/// Pre-selected by the [builder][build] from the field's alignment, length
/// and byte order so the hot loop never re-derives it per element: fields
/// which start on a byte boundary and span exactly 8, 16, 32 or 64 bits
/// use a single word load, everything else goes through generic bit
/// extraction.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FlLoad {
    /// Generic bit extraction, most significant bits first
    Be,
    /// Generic bit extraction, least significant bits first
    Le,
    /// Byte-aligned 8-bit load
    A8,
    /// Byte-aligned 16-bit big-endian load
    A16Be,
    /// Byte-aligned 16-bit little-endian load
    A16Le,
    A32Be,
    A32Le,
    A64Be,
    A64Le,
}

impl FlLoad {
    /// Select the load strategy for a field
    pub fn select(align: u32, len: u32, bo: ByteOrder) -> Self {
        use ByteOrder::*;

        if align % 8 == 0 {
            match (len, bo) {
                (8, _) => return Self::A8,
                (16, Big) => return Self::A16Be,
                (16, Little) => return Self::A16Le,
                (32, Big) => return Self::A32Be,
                (32, Little) => return Self::A32Le,
                (64, Big) => return Self::A64Be,
                (64, Little) => return Self::A64Le,
                _ => (),
            }
        }
        match bo {
            Big => Self::Be,
            Little => Self::Le,
        }
    }
}

/// Payload of a fixed-length read instruction
#[derive(Clone, Debug)]
pub struct ReadFl<'t> {
    /// Alignment (bits) applied before reading
    pub align: u32,
    /// Length (bits)
    pub len: u32,
    pub load: FlLoad,
    /// Type of the decoded field, carried into the emitted element
    pub dt: &'t DataType,
}

/// Payload of a variable-length (LEB128) integer read instruction
#[derive(Copy, Clone, Debug)]
pub struct ReadVl<'t> {
    pub dt: &'t DataType,
}

/// Payload of a null-terminated string read instruction
#[derive(Copy, Clone, Debug)]
pub struct ReadNtStr<'t> {
    pub dt: &'t DataType,
}

/// Payload of a static-length string read instruction
#[derive(Copy, Clone, Debug)]
pub struct BeginReadSlStr<'t> {
    /// Maximum length (bytes)
    pub len: u64,
    pub dt: &'t DataType,
}

/// Payload of a dynamic-length string read instruction
#[derive(Copy, Clone, Debug)]
pub struct BeginReadDlStr<'t> {
    /// Saved-value slot holding the maximum length (bytes)
    pub len_slot: usize,
    pub dt: &'t DataType,
}

/// Payload of a static-length BLOB read instruction
#[derive(Copy, Clone, Debug)]
pub struct BeginReadSlBlob<'t> {
    /// Length (bytes)
    pub len: u64,
    pub dt: &'t DataType,
}

/// Payload of a dynamic-length BLOB read instruction
#[derive(Copy, Clone, Debug)]
pub struct BeginReadDlBlob<'t> {
    /// Saved-value slot holding the length (bytes)
    pub len_slot: usize,
    pub dt: &'t DataType,
}

/// Payload of a structure read instruction
#[derive(Clone, Debug)]
pub struct BeginReadStruct<'t> {
    pub align: u32,
    pub proc: Proc<'t>,
}

/// Payload of a scope read instruction
#[derive(Clone, Debug)]
pub struct BeginReadScope<'t> {
    pub scope: Scope,
    pub align: u32,
    pub proc: Proc<'t>,
}

/// Payload of a static-length array read instruction
#[derive(Clone, Debug)]
pub struct BeginReadSlArray<'t> {
    pub align: u32,
    /// Number of elements
    pub len: u64,
    pub proc: Proc<'t>,
}

/// Payload of a dynamic-length array read instruction
#[derive(Clone, Debug)]
pub struct BeginReadDlArray<'t> {
    pub align: u32,
    /// Saved-value slot holding the number of elements
    pub len_slot: usize,
    pub proc: Proc<'t>,
}

/// Option of a variant read instruction
#[derive(Clone, Debug)]
pub struct VarOptProc<'t, T> {
    /// Selector values choosing this option
    pub ranges: &'t IntegerRangeSet<T>,
    pub proc: Proc<'t>,
}

/// Payload of a variant read instruction
#[derive(Clone, Debug)]
pub struct BeginReadVar<'t, T> {
    /// Saved-value slot holding the selector
    pub sel_slot: usize,
    pub opts: Vec<VarOptProc<'t, T>>,
}

impl<'t, T: Copy + Ord> BeginReadVar<'t, T> {
    /// Find the option whose selector ranges contain the given value
    pub fn opt_for(&self, val: T) -> Option<(usize, &VarOptProc<'t, T>)> {
        self.opts
            .iter()
            .enumerate()
            .find(|(_, o)| o.ranges.contains(val))
    }
}

/// Payload of a boolean-selected optional read instruction
#[derive(Clone, Debug)]
pub struct BeginReadOptBool<'t> {
    /// Saved-value slot holding the selector
    pub sel_slot: usize,
    pub proc: Proc<'t>,
}

/// Payload of an integer-selected optional read instruction
#[derive(Clone, Debug)]
pub struct BeginReadOptInt<'t, T> {
    /// Saved-value slot holding the selector
    pub sel_slot: usize,
    /// Selector values for which the data is present
    pub ranges: &'t IntegerRangeSet<T>,
    pub proc: Proc<'t>,
}

/// A procedure instruction
///
/// `Read…` instructions decode one data item and emit one element.
/// `BeginRead…` instructions owning a sub-procedure push an execution
/// frame; the matching `EndRead…` instruction, always the last one of the
/// sub-procedure, pops it. `Set…`, `SaveVal` and `UpdateDefClkVal…`
/// instructions operate on the last decoded value. The `End…Proc`
/// sentinels drive the packet-level state machine.
#[derive(Clone, Debug)]
pub enum Instr<'t> {
    ReadFlBitArray(ReadFl<'t>),
    ReadFlBool(ReadFl<'t>),
    ReadFlSInt(ReadFl<'t>),
    ReadFlUInt(ReadFl<'t>),
    ReadFlSEnum(ReadFl<'t>),
    ReadFlUEnum(ReadFl<'t>),
    ReadFlFloat(ReadFl<'t>),
    ReadVlSInt(ReadVl<'t>),
    ReadVlUInt(ReadVl<'t>),
    ReadVlSEnum(ReadVl<'t>),
    ReadVlUEnum(ReadVl<'t>),
    ReadNtStr(ReadNtStr<'t>),
    BeginReadSlStr(BeginReadSlStr<'t>),
    EndReadSlStr,
    BeginReadDlStr(BeginReadDlStr<'t>),
    EndReadDlStr,
    BeginReadSlBlob(BeginReadSlBlob<'t>),
    EndReadSlBlob,
    BeginReadSlUuidBlob(BeginReadSlBlob<'t>),
    EndReadSlUuidBlob,
    BeginReadDlBlob(BeginReadDlBlob<'t>),
    EndReadDlBlob,
    BeginReadStruct(BeginReadStruct<'t>),
    EndReadStruct,
    BeginReadScope(BeginReadScope<'t>),
    EndReadScope(Scope),
    BeginReadSlArray(BeginReadSlArray<'t>),
    EndReadSlArray,
    BeginReadSlUuidArray(BeginReadSlArray<'t>),
    EndReadSlUuidArray,
    BeginReadDlArray(BeginReadDlArray<'t>),
    EndReadDlArray,
    BeginReadVarUSel(BeginReadVar<'t, u64>),
    EndReadVarUSel,
    BeginReadVarSSel(BeginReadVar<'t, i64>),
    EndReadVarSSel,
    BeginReadOptBool(BeginReadOptBool<'t>),
    EndReadOptBool,
    BeginReadOptUSel(BeginReadOptInt<'t, u64>),
    EndReadOptUSel,
    BeginReadOptSSel(BeginReadOptInt<'t, i64>),
    EndReadOptSSel,
    /// Decrement the remaining element count of the current array frame
    ///
    /// Placed just before an array's `EndRead…` instruction as a trade-off
    /// between checking for an array on every compound end and paying one
    /// extra instruction per element.
    DecrRemainingElems,
    /// Save the last decoded value to the given saved-value slot
    SaveVal(usize),
    /// Use the last decoded value as the current type ID
    SetCurId,
    /// Use the last decoded value as the data stream (instance) ID
    SetDsId,
    /// Use the last decoded value as the packet sequence number
    SetPktSeqNum,
    /// Use the last decoded value as the discarded event record counter
    /// snapshot
    SetPktDiscErCounterSnap,
    /// Use the last decoded value as the expected packet total length
    /// (bits)
    SetPktTotalLen,
    /// Use the last decoded value as the expected packet content length
    /// (bits)
    SetPktContentLen,
    /// Validate the last decoded value as the packet magic number
    SetPktMagicNumber,
    /// Use the last decoded value as the packet end clock value
    SetPktEndDefClkVal,
    /// Set the default clock from the last decoded variable-length value
    UpdateDefClkVal,
    /// Update the default clock from a fixed-length value of the given
    /// length (bits), carrying into the untouched upper bits on wrap
    UpdateDefClkValFl(u32),
    /// Select the current data stream type, from the fixed ID if present,
    /// from the current ID otherwise
    SetDst(Option<u64>),
    /// Select the current event record type, from the fixed ID if present,
    /// from the current ID otherwise
    SetErt(Option<u64>),
    /// Emit the data stream info element
    SetDsInfo,
    /// Emit the packet info element
    SetPktInfo,
    /// Emit the event record info element
    SetErInfo,
    /// End of the trace packet preamble procedure
    EndPktPreambleProc,
    /// End of the data stream packet preamble procedure
    EndDsPktPreambleProc,
    /// End of the data stream event record preamble procedure
    EndDsErPreambleProc,
    /// End of an event record procedure
    EndErProc,
}

impl Instr<'_> {
    fn name(&self) -> &'static str {
        match self {
            Self::ReadFlBitArray(_) => "read-fl-bit-array",
            Self::ReadFlBool(_) => "read-fl-bool",
            Self::ReadFlSInt(_) => "read-fl-sint",
            Self::ReadFlUInt(_) => "read-fl-uint",
            Self::ReadFlSEnum(_) => "read-fl-senum",
            Self::ReadFlUEnum(_) => "read-fl-uenum",
            Self::ReadFlFloat(_) => "read-fl-float",
            Self::ReadVlSInt(_) => "read-vl-sint",
            Self::ReadVlUInt(_) => "read-vl-uint",
            Self::ReadVlSEnum(_) => "read-vl-senum",
            Self::ReadVlUEnum(_) => "read-vl-uenum",
            Self::ReadNtStr(_) => "read-nt-str",
            Self::BeginReadSlStr(_) => "begin-read-sl-str",
            Self::EndReadSlStr => "end-read-sl-str",
            Self::BeginReadDlStr(_) => "begin-read-dl-str",
            Self::EndReadDlStr => "end-read-dl-str",
            Self::BeginReadSlBlob(_) => "begin-read-sl-blob",
            Self::EndReadSlBlob => "end-read-sl-blob",
            Self::BeginReadSlUuidBlob(_) => "begin-read-sl-uuid-blob",
            Self::EndReadSlUuidBlob => "end-read-sl-uuid-blob",
            Self::BeginReadDlBlob(_) => "begin-read-dl-blob",
            Self::EndReadDlBlob => "end-read-dl-blob",
            Self::BeginReadStruct(_) => "begin-read-struct",
            Self::EndReadStruct => "end-read-struct",
            Self::BeginReadScope(_) => "begin-read-scope",
            Self::EndReadScope(_) => "end-read-scope",
            Self::BeginReadSlArray(_) => "begin-read-sl-array",
            Self::EndReadSlArray => "end-read-sl-array",
            Self::BeginReadSlUuidArray(_) => "begin-read-sl-uuid-array",
            Self::EndReadSlUuidArray => "end-read-sl-uuid-array",
            Self::BeginReadDlArray(_) => "begin-read-dl-array",
            Self::EndReadDlArray => "end-read-dl-array",
            Self::BeginReadVarUSel(_) => "begin-read-var-usel",
            Self::EndReadVarUSel => "end-read-var-usel",
            Self::BeginReadVarSSel(_) => "begin-read-var-ssel",
            Self::EndReadVarSSel => "end-read-var-ssel",
            Self::BeginReadOptBool(_) => "begin-read-opt-bool",
            Self::EndReadOptBool => "end-read-opt-bool",
            Self::BeginReadOptUSel(_) => "begin-read-opt-usel",
            Self::EndReadOptUSel => "end-read-opt-usel",
            Self::BeginReadOptSSel(_) => "begin-read-opt-ssel",
            Self::EndReadOptSSel => "end-read-opt-ssel",
            Self::DecrRemainingElems => "decr-remaining-elems",
            Self::SaveVal(_) => "save-val",
            Self::SetCurId => "set-cur-id",
            Self::SetDsId => "set-ds-id",
            Self::SetPktSeqNum => "set-pkt-seq-num",
            Self::SetPktDiscErCounterSnap => "set-pkt-disc-er-counter-snap",
            Self::SetPktTotalLen => "set-pkt-total-len",
            Self::SetPktContentLen => "set-pkt-content-len",
            Self::SetPktMagicNumber => "set-pkt-magic-number",
            Self::SetPktEndDefClkVal => "set-pkt-end-def-clk-val",
            Self::UpdateDefClkVal => "update-def-clk-val",
            Self::UpdateDefClkValFl(_) => "update-def-clk-val-fl",
            Self::SetDst(_) => "set-dst",
            Self::SetErt(_) => "set-ert",
            Self::SetDsInfo => "set-ds-info",
            Self::SetPktInfo => "set-pkt-info",
            Self::SetErInfo => "set-er-info",
            Self::EndPktPreambleProc => "end-pkt-preamble-proc",
            Self::EndDsPktPreambleProc => "end-ds-pkt-preamble-proc",
            Self::EndDsErPreambleProc => "end-ds-er-preamble-proc",
            Self::EndErProc => "end-er-proc",
        }
    }

    fn fmt_indented(&self, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
        for _ in 0..indent {
            write!(f, "  ")?;
        }
        write!(f, "{}", self.name())?;
        match self {
            Self::ReadFlBitArray(r)
            | Self::ReadFlBool(r)
            | Self::ReadFlSInt(r)
            | Self::ReadFlUInt(r)
            | Self::ReadFlSEnum(r)
            | Self::ReadFlUEnum(r)
            | Self::ReadFlFloat(r) => writeln!(f, " align={} len={} {:?}", r.align, r.len, r.load),
            Self::BeginReadSlStr(s) => writeln!(f, " len={}", s.len),
            Self::BeginReadDlStr(s) => writeln!(f, " len-slot={}", s.len_slot),
            Self::BeginReadSlBlob(b) | Self::BeginReadSlUuidBlob(b) => writeln!(f, " len={}", b.len),
            Self::BeginReadDlBlob(b) => writeln!(f, " len-slot={}", b.len_slot),
            Self::BeginReadStruct(s) => {
                writeln!(f, " align={}", s.align)?;
                s.proc.fmt_indented(f, indent + 1)
            }
            Self::BeginReadScope(s) => {
                writeln!(f, " scope={} align={}", s.scope, s.align)?;
                s.proc.fmt_indented(f, indent + 1)
            }
            Self::BeginReadSlArray(a) | Self::BeginReadSlUuidArray(a) => {
                writeln!(f, " len={}", a.len)?;
                a.proc.fmt_indented(f, indent + 1)
            }
            Self::BeginReadDlArray(a) => {
                writeln!(f, " len-slot={}", a.len_slot)?;
                a.proc.fmt_indented(f, indent + 1)
            }
            Self::BeginReadVarUSel(v) => fmt_var(f, indent, v.sel_slot, &v.opts),
            Self::BeginReadVarSSel(v) => fmt_var(f, indent, v.sel_slot, &v.opts),
            Self::BeginReadOptBool(o) => {
                writeln!(f, " sel-slot={}", o.sel_slot)?;
                o.proc.fmt_indented(f, indent + 1)
            }
            Self::BeginReadOptUSel(o) => {
                writeln!(f, " sel-slot={}", o.sel_slot)?;
                o.proc.fmt_indented(f, indent + 1)
            }
            Self::BeginReadOptSSel(o) => {
                writeln!(f, " sel-slot={}", o.sel_slot)?;
                o.proc.fmt_indented(f, indent + 1)
            }
            Self::SaveVal(slot) => writeln!(f, " slot={slot}"),
            Self::UpdateDefClkValFl(len) => writeln!(f, " len={len}"),
            Self::SetDst(Some(id)) | Self::SetErt(Some(id)) => writeln!(f, " fixed-id={id}"),
            Self::EndReadScope(scope) => writeln!(f, " scope={scope}"),
            _ => writeln!(f),
        }
    }
}

fn fmt_var<T: fmt::Debug>(
    f: &mut fmt::Formatter<'_>,
    indent: usize,
    sel_slot: usize,
    opts: &[VarOptProc<'_, T>],
) -> fmt::Result {
    writeln!(f, " sel-slot={sel_slot}")?;
    for opt in opts {
        for _ in 0..indent + 1 {
            write!(f, "  ")?;
        }
        writeln!(f, "<opt> {:?}", opt.ranges.ranges())?;
        opt.proc.fmt_indented(f, indent + 2)?;
    }
    Ok(())
}

/// A procedure: an ordered sequence of instructions
#[derive(Clone, Debug, Default)]
pub struct Proc<'t> {
    instrs: Vec<Instr<'t>>,
}

impl<'t> Proc<'t> {
    /// Create a new, empty procedure
    pub fn new() -> Self {
        Default::default()
    }

    /// Append an instruction
    pub fn push(&mut self, instr: Instr<'t>) {
        self.instrs.push(instr);
    }

    /// Retrieve the instructions
    pub fn instrs(&self) -> &[Instr<'t>] {
        &self.instrs
    }

    /// Retrieve the number of instructions
    pub fn len(&self) -> usize {
        self.instrs.len()
    }

    /// Check whether this procedure is empty
    pub fn is_empty(&self) -> bool {
        self.instrs.is_empty()
    }

    fn fmt_indented(&self, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
        self.instrs
            .iter()
            .try_for_each(|i| i.fmt_indented(f, indent))
    }
}

impl fmt::Display for Proc<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_indented(f, 0)
    }
}

/// Procedure of one event record type
#[derive(Clone, Debug)]
pub struct ErProc<'t> {
    ert: &'t EventRecordType,
    proc: Proc<'t>,
}

impl<'t> ErProc<'t> {
    /// Retrieve the event record type
    pub fn ert(&self) -> &'t EventRecordType {
        self.ert
    }

    /// Retrieve the procedure
    pub fn proc(&self) -> &Proc<'t> {
        &self.proc
    }
}

/// Packet procedure for any data stream of a given type
///
/// Event record procedures are stored twice: a dense vector for the
/// typically contiguous IDs and a sparse map for outliers. Lookup queries
/// the vector first.
#[derive(Clone, Debug)]
pub struct DsPktProc<'t> {
    dst: &'t DataStreamType,
    pkt_preamble: Proc<'t>,
    er_preamble: Proc<'t>,
    er_dense: Vec<Option<ErProc<'t>>>,
    er_sparse: BTreeMap<u64, ErProc<'t>>,
}

impl<'t> DsPktProc<'t> {
    /// Retrieve the data stream type
    pub fn dst(&self) -> &'t DataStreamType {
        self.dst
    }

    /// Retrieve the packet preamble procedure
    pub fn pkt_preamble(&self) -> &Proc<'t> {
        &self.pkt_preamble
    }

    /// Retrieve the event record preamble procedure
    pub fn er_preamble(&self) -> &Proc<'t> {
        &self.er_preamble
    }

    /// Retrieve the procedure of the event record type with the given ID
    pub fn er_proc(&self, id: u64) -> Option<&ErProc<'t>> {
        usize::try_from(id)
            .ok()
            .and_then(|id| self.er_dense.get(id))
            .and_then(Option::as_ref)
            .or_else(|| self.er_sparse.get(&id))
    }

    /// Retrieve the number of event record procedures
    pub fn er_procs_count(&self) -> usize {
        self.er_dense.iter().flatten().count() + self.er_sparse.len()
    }
}

/// Packet procedure of a whole trace type
///
/// This is the output of [`build::build_pkt_proc`] and the input of
/// [`Vm::new`][crate::vm::Vm::new]. It is immutable and may be shared
/// between any number of virtual machines.
#[derive(Clone, Debug)]
pub struct PktProc<'t> {
    trace: &'t TraceType,
    preamble: Proc<'t>,
    ds_procs: BTreeMap<u64, DsPktProc<'t>>,
    saved_vals_count: usize,
}

impl<'t> PktProc<'t> {
    /// Retrieve the trace type
    pub fn trace(&self) -> &'t TraceType {
        self.trace
    }

    /// Retrieve the trace preamble procedure
    pub fn preamble(&self) -> &Proc<'t> {
        &self.preamble
    }

    /// Retrieve the packet procedure of the data stream type with the
    /// given ID
    pub fn ds_proc(&self, id: u64) -> Option<&DsPktProc<'t>> {
        self.ds_procs.get(&id)
    }

    /// Retrieve the number of saved-value slots a virtual machine needs
    pub fn saved_vals_count(&self) -> usize {
        self.saved_vals_count
    }
}

impl fmt::Display for PktProc<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "<preamble>")?;
        self.preamble.fmt_indented(f, 1)?;
        for (id, ds) in &self.ds_procs {
            writeln!(f, "<ds {id}> <pkt preamble>")?;
            ds.pkt_preamble.fmt_indented(f, 1)?;
            writeln!(f, "<ds {id}> <er preamble>")?;
            ds.er_preamble.fmt_indented(f, 1)?;
            for er in ds.er_dense.iter().flatten() {
                writeln!(f, "<ds {id}> <er {}>", er.ert.id)?;
                er.proc.fmt_indented(f, 1)?;
            }
            for er in ds.er_sparse.values() {
                writeln!(f, "<ds {id}> <er {}>", er.ert.id)?;
                er.proc.fmt_indented(f, 1)?;
            }
        }
        Ok(())
    }
}
