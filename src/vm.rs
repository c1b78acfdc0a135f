// Copyright (C) 2025 FZI Forschungszentrum Informatik
// SPDX-License-Identifier: Apache-2.0
//! Virtual machine
//!
//! This module provides the [`Vm`], which executes a [`PktProc`] against a
//! caller-fed byte stream and produces decoding [`Element`]s in document
//! order.
//!
//! A machine is driven by alternating [`feed`][Vm::feed] and
//! [`next`][Vm::next]: `next` returns the next element, or
//! [`Status::NeedMoreData`] whenever the current buffer is exhausted
//! mid-decoding, upon which the caller feeds the following chunk and calls
//! `next` again. Feeding an empty buffer marks the end of the stream.
//! The element sequence is independent of how the input is split.
//!
//! One machine decodes one packet sequence. Multiple machines may share
//! one immutable [`PktProc`] to decode independent streams in parallel.

mod cursor;

pub mod error;

#[cfg(test)]
mod tests;

pub use error::Error;

use alloc::vec::Vec;

use crate::element::{DataStreamInfo, Element, EventRecordInfo, PacketInfo};
use crate::proc::{
    BeginReadDlArray, BeginReadSlArray, DsPktProc, ErProc, FlLoad, Instr, PktProc, Proc,
};

use cursor::Cursor;
use error::ErrorKind;

/// The packet magic number
pub const PKT_MAGIC_NUMBER: u32 = 0xC1FC_1FC1;

/// Result of one [`Vm::next`] call
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Status<'t, 'd> {
    /// The next decoding element
    Element(Element<'t, 'd>),
    /// The current buffer is exhausted; feed the next one
    NeedMoreData,
    /// The stream ended at a packet boundary
    End,
}

/// A virtual machine decoding one packet sequence
///
/// Created via [`Vm::new`] from a built [`PktProc`]. The `'t` lifetime is
/// the trace type's, the `'d` lifetime the fed buffer's.
///
/// # Example
///
/// ```
/// use ctf_stream::metadata::trace::TraceType;
/// use ctf_stream::proc::build::build_pkt_proc;
/// use ctf_stream::vm::{Status, Vm};
///
/// let trace = TraceType::default();
/// let pkt_proc = build_pkt_proc(&trace);
/// let mut vm = Vm::new(&pkt_proc);
/// vm.feed(&[]);
/// assert_eq!(vm.next(), Ok(Status::End));
/// ```
#[derive(Clone, Debug)]
pub struct Vm<'t, 'd> {
    pkt_proc: &'t PktProc<'t>,
    cursor: Cursor<'d>,
    state: State,
    frames: Vec<Frame<'t>>,
    saved: Vec<Option<SavedVal>>,
    last: LastVal,
    progress: Progress,
    pending: Option<Element<'t, 'd>>,
    uuid: Option<UuidAcc>,
    cur_dst: Option<&'t DsPktProc<'t>>,
    cur_ert: Option<&'t ErProc<'t>>,
    cur_id: u64,
    ds_id: Option<u64>,
    pkt_seq_num: Option<u64>,
    disc_er_snap: Option<u64>,
    total_len: Option<u64>,
    content_len: Option<u64>,
    end_clk: Option<u64>,
    def_clk: u64,
}

impl<'t, 'd> Vm<'t, 'd> {
    /// Create a new machine executing the given packet procedure
    pub fn new(pkt_proc: &'t PktProc<'t>) -> Self {
        Self {
            pkt_proc,
            cursor: Cursor::new(),
            state: State::PktBegin,
            frames: Vec::new(),
            saved: alloc::vec![None; pkt_proc.saved_vals_count()],
            last: LastVal::None,
            progress: Progress::None,
            pending: None,
            uuid: None,
            cur_dst: None,
            cur_ert: None,
            cur_id: 0,
            ds_id: None,
            pkt_seq_num: None,
            disc_er_snap: None,
            total_len: None,
            content_len: None,
            end_clk: None,
            def_clk: 0,
        }
    }

    /// Supply the next input buffer
    ///
    /// Must only be called initially or after [`next`][Self::next]
    /// returned [`Status::NeedMoreData`]; the previous buffer is fully
    /// consumed at that point. An empty buffer marks the end of the
    /// stream.
    pub fn feed(&mut self, data: &'d [u8]) {
        self.cursor.feed(data);
    }

    /// Retrieve the packet-absolute offset of the next bit to decode
    pub fn bit_offset(&self) -> u64 {
        self.cursor.bit_offset()
    }

    /// Rewind to awaiting a new packet
    ///
    /// Discards any buffered input, the end-of-stream marker and all
    /// per-packet state. This is the only permissible continuation after
    /// an error.
    pub fn reset(&mut self) {
        self.cursor = Cursor::new();
        self.state = State::PktBegin;
        self.frames.clear();
        self.pending = None;
        self.def_clk = 0;
        self.clear_pkt_state();
    }

    /// Decode up to the next element
    ///
    /// Returns the next decoding [`Element`], [`Status::NeedMoreData`] if
    /// the input is exhausted mid-packet, or [`Status::End`] if the ended
    /// stream is exhausted at a packet boundary.
    pub fn next(&mut self) -> Result<Status<'t, 'd>, Error> {
        if let Some(el) = self.pending.take() {
            return Ok(Status::Element(el));
        }

        loop {
            match self.state {
                State::PktBegin => {
                    if self.cursor.is_drained() {
                        return if self.cursor.ended() {
                            Ok(Status::End)
                        } else {
                            Ok(Status::NeedMoreData)
                        };
                    }
                    self.clear_pkt_state();
                    self.cursor.begin_pkt();
                    self.frames.push(Frame::new(self.pkt_proc.preamble()));
                    self.state = State::PktPreamble;
                    return Ok(Status::Element(Element::PktBegin));
                }
                State::PktPreamble | State::DsPktPreamble | State::ErPreamble | State::Er => {
                    if let Some(status) = self.step()? {
                        return Ok(status);
                    }
                }
                State::ErLoop => {
                    debug_assert!(self.frames.is_empty());
                    if let Some(content) = self.effective_content_len() {
                        if self.cursor.bit_offset() >= content {
                            self.state = State::SkipPadding;
                            continue;
                        }
                    } else if self.cursor.is_drained() {
                        if !self.cursor.ended() {
                            return Ok(Status::NeedMoreData);
                        }
                        self.state = State::SkipPadding;
                        continue;
                    }
                    match self.cur_dst {
                        Some(dst) => {
                            self.frames.push(Frame::new(dst.er_preamble()));
                            self.state = State::ErPreamble;
                        }
                        None => self.state = State::SkipPadding,
                    }
                }
                State::SkipPadding => {
                    match self.effective_total_len() {
                        Some(total) => {
                            let left = total.saturating_sub(self.cursor.bit_offset());
                            if left > 0 {
                                self.cursor.skip_bits(left);
                                if self.cursor.bit_offset() < total {
                                    return if self.cursor.ended() {
                                        Err(self.err(ErrorKind::EndOfStream))
                                    } else {
                                        Ok(Status::NeedMoreData)
                                    };
                                }
                            }
                        }
                        None => {
                            // no framing: the packet extends to the end of
                            // the stream
                            self.cursor.skip_bits(u64::MAX);
                            if !self.cursor.ended() {
                                return Ok(Status::NeedMoreData);
                            }
                        }
                    }
                    self.state = State::PktEnd;
                }
                State::PktEnd => {
                    self.state = State::PktBegin;
                    return Ok(Status::Element(Element::PktEnd));
                }
            }
        }
    }

    /// Execute instructions until one produces a status
    ///
    /// Returns [`None`] when a sentinel instruction transitioned the
    /// packet-level state instead.
    fn step(&mut self) -> Result<Option<Status<'t, 'd>>, Error> {
        loop {
            let (instrs, ip) = {
                let frame = self.frames.last().expect("an execution frame is active");
                (frame.instrs, frame.ip)
            };

            let status = match &instrs[ip] {
                Instr::ReadFlBitArray(r) => {
                    let Some(val) = self.read_fl(r.align, r.len, r.load)? else {
                        return Ok(Some(Status::NeedMoreData));
                    };
                    self.last = LastVal::U(val);
                    self.emit(Element::FlBitArray { val, dt: r.dt })
                }
                Instr::ReadFlBool(r) => {
                    let Some(val) = self.read_fl(r.align, r.len, r.load)? else {
                        return Ok(Some(Status::NeedMoreData));
                    };
                    let val = val != 0;
                    self.last = LastVal::Bool(val);
                    self.emit(Element::FlBool { val, dt: r.dt })
                }
                Instr::ReadFlSInt(r) | Instr::ReadFlSEnum(r) => {
                    let Some(val) = self.read_fl(r.align, r.len, r.load)? else {
                        return Ok(Some(Status::NeedMoreData));
                    };
                    let val = sign_extend(val, r.len);
                    self.last = LastVal::S(val);
                    self.emit(Element::FlSInt { val, dt: r.dt })
                }
                Instr::ReadFlUInt(r) | Instr::ReadFlUEnum(r) => {
                    let Some(val) = self.read_fl(r.align, r.len, r.load)? else {
                        return Ok(Some(Status::NeedMoreData));
                    };
                    self.last = LastVal::U(val);
                    if let Some(acc) = &mut self.uuid {
                        acc.push(val as u8);
                    }
                    self.emit(Element::FlUInt { val, dt: r.dt })
                }
                Instr::ReadFlFloat(r) => {
                    let Some(bits) = self.read_fl(r.align, r.len, r.load)? else {
                        return Ok(Some(Status::NeedMoreData));
                    };
                    let val = match r.len {
                        32 => f64::from(f32::from_bits(bits as u32)),
                        _ => f64::from_bits(bits),
                    };
                    self.last = LastVal::F(val);
                    self.emit(Element::FlFloat { val, dt: r.dt })
                }
                Instr::ReadVlSInt(r) | Instr::ReadVlSEnum(r) => self.read_vl(true, r.dt)?,
                Instr::ReadVlUInt(r) | Instr::ReadVlUEnum(r) => self.read_vl(false, r.dt)?,
                Instr::ReadNtStr(_) => self.read_nt_str()?,
                Instr::BeginReadSlStr(s) => {
                    self.counted_str(s.len, Element::SlStrBegin { max_len: s.len })?
                }
                Instr::BeginReadDlStr(s) => {
                    let len = self.saved(s.len_slot).to_u64();
                    self.counted_str(len, Element::DlStrBegin { max_len: len })?
                }
                Instr::EndReadSlStr => {
                    self.advance_ip();
                    self.emit(Element::SlStrEnd)
                }
                Instr::EndReadDlStr => {
                    self.advance_ip();
                    self.emit(Element::DlStrEnd)
                }
                Instr::BeginReadSlBlob(b) => {
                    self.blob(b.len, Element::SlBlobBegin { len: b.len }, false)?
                }
                Instr::BeginReadSlUuidBlob(b) => {
                    self.blob(b.len, Element::SlBlobBegin { len: b.len }, true)?
                }
                Instr::BeginReadDlBlob(b) => {
                    let len = self.saved(b.len_slot).to_u64();
                    self.blob(len, Element::DlBlobBegin { len }, false)?
                }
                Instr::EndReadSlBlob => {
                    self.advance_ip();
                    self.emit(Element::SlBlobEnd)
                }
                Instr::EndReadSlUuidBlob => {
                    self.advance_ip();
                    self.finish_uuid()?;
                    self.emit(Element::SlBlobEnd)
                }
                Instr::EndReadDlBlob => {
                    self.advance_ip();
                    self.emit(Element::DlBlobEnd)
                }
                Instr::BeginReadStruct(s) => {
                    if !self.align_field(s.align)? {
                        return Ok(Some(Status::NeedMoreData));
                    }
                    self.advance_ip();
                    self.frames.push(Frame::new(&s.proc));
                    self.emit(Element::StructBegin)
                }
                Instr::EndReadStruct => {
                    self.frames.pop();
                    self.emit(Element::StructEnd)
                }
                Instr::BeginReadScope(s) => {
                    if !self.align_field(s.align)? {
                        return Ok(Some(Status::NeedMoreData));
                    }
                    self.advance_ip();
                    self.frames.push(Frame::new(&s.proc));
                    self.emit(Element::ScopeBegin(s.scope))
                }
                Instr::EndReadScope(scope) => {
                    let scope = *scope;
                    self.frames.pop();
                    self.emit(Element::ScopeEnd(scope))
                }
                Instr::BeginReadSlArray(a) => {
                    self.array(a, a.len, Element::SlArrayBegin { len: a.len }, false)?
                }
                Instr::BeginReadSlUuidArray(a) => {
                    self.array(a, a.len, Element::SlArrayBegin { len: a.len }, true)?
                }
                Instr::BeginReadDlArray(a) => {
                    let BeginReadDlArray {
                        align,
                        len_slot,
                        proc,
                    } = a;
                    let len = self.saved(*len_slot).to_u64();
                    self.dl_array(*align, proc, len)?
                }
                Instr::EndReadSlArray => {
                    self.frames.pop();
                    self.emit(Element::SlArrayEnd)
                }
                Instr::EndReadSlUuidArray => {
                    self.frames.pop();
                    self.finish_uuid()?;
                    self.emit(Element::SlArrayEnd)
                }
                Instr::EndReadDlArray => {
                    self.frames.pop();
                    self.emit(Element::DlArrayEnd)
                }
                Instr::DecrRemainingElems => {
                    let frame = self.frames.last_mut().expect("an execution frame is active");
                    frame.remaining -= 1;
                    if frame.remaining > 0 {
                        frame.ip = 0;
                    } else {
                        frame.ip += 1;
                    }
                    None
                }
                Instr::BeginReadVarUSel(v) => {
                    let val = self.saved(v.sel_slot).to_u64();
                    let Some((opt_index, opt)) = v.opt_for(val) else {
                        return Err(self.err(ErrorKind::UnknownVarUSel { val }));
                    };
                    self.advance_ip();
                    self.frames.push(Frame::new(&opt.proc));
                    self.emit(Element::VarBegin { opt_index })
                }
                Instr::BeginReadVarSSel(v) => {
                    let val = self.saved(v.sel_slot).to_i64();
                    let Some((opt_index, opt)) = v.opt_for(val) else {
                        return Err(self.err(ErrorKind::UnknownVarSSel { val }));
                    };
                    self.advance_ip();
                    self.frames.push(Frame::new(&opt.proc));
                    self.emit(Element::VarBegin { opt_index })
                }
                Instr::EndReadVarUSel | Instr::EndReadVarSSel => {
                    self.frames.pop();
                    self.emit(Element::VarEnd)
                }
                Instr::BeginReadOptBool(o) => {
                    let present = self.saved(o.sel_slot).to_bool();
                    self.opt(&o.proc, present)
                }
                Instr::BeginReadOptUSel(o) => {
                    let present = o.ranges.contains(self.saved(o.sel_slot).to_u64());
                    self.opt(&o.proc, present)
                }
                Instr::BeginReadOptSSel(o) => {
                    let present = o.ranges.contains(self.saved(o.sel_slot).to_i64());
                    self.opt(&o.proc, present)
                }
                Instr::EndReadOptBool | Instr::EndReadOptUSel | Instr::EndReadOptSSel => {
                    self.frames.pop();
                    self.emit(Element::OptEnd)
                }
                Instr::SaveVal(slot) => {
                    self.saved[*slot] = Some(self.last.to_saved());
                    self.advance_ip();
                    None
                }
                Instr::SetCurId => {
                    self.cur_id = self.last.as_u64();
                    self.advance_ip();
                    None
                }
                Instr::SetDsId => {
                    self.ds_id = Some(self.last.as_u64());
                    self.advance_ip();
                    None
                }
                Instr::SetPktSeqNum => {
                    self.pkt_seq_num = Some(self.last.as_u64());
                    self.advance_ip();
                    None
                }
                Instr::SetPktDiscErCounterSnap => {
                    self.disc_er_snap = Some(self.last.as_u64());
                    self.advance_ip();
                    None
                }
                Instr::SetPktTotalLen => {
                    let total = self.last.as_u64();
                    if let Some(content) = self.content_len {
                        if content > total {
                            return Err(self.err(ErrorKind::OversizedPktContent { content, total }));
                        }
                    }
                    self.total_len = Some(total);
                    self.advance_ip();
                    None
                }
                Instr::SetPktContentLen => {
                    let content = self.last.as_u64();
                    if let Some(total) = self.total_len {
                        if content > total {
                            return Err(self.err(ErrorKind::OversizedPktContent { content, total }));
                        }
                    }
                    self.content_len = Some(content);
                    self.advance_ip();
                    None
                }
                Instr::SetPktMagicNumber => {
                    let val = self.last.as_u64();
                    if val != u64::from(PKT_MAGIC_NUMBER) {
                        return Err(self.err(ErrorKind::MagicMismatch { val }));
                    }
                    self.advance_ip();
                    self.emit(Element::PktMagicNumber(PKT_MAGIC_NUMBER))
                }
                Instr::SetPktEndDefClkVal => {
                    self.end_clk = Some(self.last.as_u64());
                    self.advance_ip();
                    None
                }
                Instr::UpdateDefClkVal => {
                    self.def_clk = self.last.as_u64();
                    self.advance_ip();
                    self.emit(Element::DefClkVal(self.def_clk))
                }
                Instr::UpdateDefClkValFl(len) => {
                    self.update_def_clk_fl(*len);
                    self.advance_ip();
                    self.emit(Element::DefClkVal(self.def_clk))
                }
                Instr::SetDst(fixed_id) => {
                    let id = fixed_id.unwrap_or(self.cur_id);
                    let Some(dst) = self.pkt_proc.ds_proc(id) else {
                        return Err(self.err(ErrorKind::UnknownDst { id }));
                    };
                    self.cur_dst = Some(dst);
                    self.advance_ip();
                    None
                }
                Instr::SetErt(fixed_id) => {
                    let id = fixed_id.unwrap_or(self.cur_id);
                    let dst = self.cur_dst.expect("data stream type selected");
                    let Some(ert) = dst.er_proc(id) else {
                        return Err(self.err(ErrorKind::UnknownErt { id }));
                    };
                    self.cur_ert = Some(ert);
                    self.advance_ip();
                    None
                }
                Instr::SetDsInfo => {
                    let dst_id = self.cur_dst.expect("data stream type selected").dst().id;
                    self.advance_ip();
                    self.emit(Element::DsInfo(DataStreamInfo {
                        dst_id,
                        ds_id: self.ds_id,
                    }))
                }
                Instr::SetPktInfo => {
                    self.advance_ip();
                    self.emit(Element::PktInfo(PacketInfo {
                        total_len: self.total_len,
                        content_len: self.content_len,
                        seq_num: self.pkt_seq_num,
                        disc_er_counter_snap: self.disc_er_snap,
                        end_def_clk_val: self.end_clk,
                    }))
                }
                Instr::SetErInfo => {
                    let ert_id = self.cur_ert.expect("event record type selected").ert().id;
                    self.advance_ip();
                    self.emit(Element::ErInfo(EventRecordInfo { ert_id }))
                }
                Instr::EndPktPreambleProc => {
                    self.frames.pop();
                    match self.cur_dst {
                        Some(dst) => {
                            self.frames.push(Frame::new(dst.pkt_preamble()));
                            self.state = State::DsPktPreamble;
                        }
                        None => self.state = State::ErLoop,
                    }
                    return Ok(None);
                }
                Instr::EndDsPktPreambleProc => {
                    self.frames.pop();
                    self.state = State::ErLoop;
                    return Ok(None);
                }
                Instr::EndDsErPreambleProc => {
                    self.frames.pop();
                    let Some(ert) = self.cur_ert else {
                        return Err(self.err(ErrorKind::UnknownErt { id: self.cur_id }));
                    };
                    self.frames.push(Frame::new(ert.proc()));
                    self.state = State::Er;
                    return Ok(None);
                }
                Instr::EndErProc => {
                    self.frames.pop();
                    self.cur_ert = None;
                    self.state = State::ErLoop;
                    return Ok(None);
                }
            };

            if let Some(status) = status {
                return Ok(Some(status));
            }
        }
    }

    fn emit(&self, el: Element<'t, 'd>) -> Option<Status<'t, 'd>> {
        Some(Status::Element(el))
    }

    fn advance_ip(&mut self) {
        self.frames.last_mut().expect("an execution frame is active").ip += 1;
    }

    fn err(&self, kind: ErrorKind) -> Error {
        Error::new(kind, self.cursor.bit_offset())
    }

    fn saved(&self, slot: usize) -> SavedVal {
        self.saved[slot].expect("saved value populated before use")
    }

    fn effective_content_len(&self) -> Option<u64> {
        self.content_len.or(self.total_len)
    }

    fn effective_total_len(&self) -> Option<u64> {
        self.total_len.or(self.content_len)
    }

    fn clear_pkt_state(&mut self) {
        self.frames.clear();
        self.saved.iter_mut().for_each(|slot| *slot = None);
        self.last = LastVal::None;
        self.progress = Progress::None;
        self.uuid = None;
        self.cur_dst = None;
        self.cur_ert = None;
        self.cur_id = 0;
        self.ds_id = None;
        self.pkt_seq_num = None;
        self.disc_er_snap = None;
        self.total_len = None;
        self.content_len = None;
        self.end_clk = None;
    }

    /// Check that `bits` bits starting at `pos` fit the packet content
    fn check_content_at(&self, pos: u64, bits: u64) -> Result<(), Error> {
        if let Some(content) = self.effective_content_len() {
            let needed = pos.saturating_add(bits);
            if needed > content {
                return Err(self.err(ErrorKind::PrematurePktEnd { needed, content }));
            }
        }
        Ok(())
    }

    fn align_target(&self, align: u32) -> u64 {
        self.cursor
            .bit_offset()
            .next_multiple_of(u64::from(align.max(1)))
    }

    /// Align the cursor, returning whether the boundary was reached
    fn align_field(&mut self, align: u32) -> Result<bool, Error> {
        self.check_content_at(self.align_target(align), 0)?;
        if self.cursor.align_to(align) {
            Ok(true)
        } else if self.cursor.ended() {
            Err(self.err(ErrorKind::EndOfStream))
        } else {
            Ok(false)
        }
    }

    /// Align and read a fixed-length field
    ///
    /// Returns [`None`] when more data is required.
    fn read_fl(&mut self, align: u32, len: u32, load: FlLoad) -> Result<Option<u64>, Error> {
        self.check_content_at(self.align_target(align), u64::from(len))?;
        if !self.align_field(align)? {
            return Ok(None);
        }
        match self.cursor.read_fl(len, load) {
            Some(val) => Ok(Some(val)),
            None if self.cursor.ended() => Err(self.err(ErrorKind::EndOfStream)),
            None => Ok(None),
        }
    }

    fn suspend(&self) -> Result<Option<Status<'t, 'd>>, Error> {
        if self.cursor.ended() {
            Err(self.err(ErrorKind::EndOfStream))
        } else {
            Ok(Some(Status::NeedMoreData))
        }
    }

    /// Read a variable-length (LEB128) integer
    fn read_vl(
        &mut self,
        signed: bool,
        dt: &'t crate::metadata::types::DataType,
    ) -> Result<Option<Status<'t, 'd>>, Error> {
        if !matches!(self.progress, Progress::VlInt { .. }) {
            self.check_content_at(self.align_target(8), 8)?;
            if !self.align_field(8)? {
                return Ok(Some(Status::NeedMoreData));
            }
            self.progress = Progress::VlInt {
                val: 0,
                shift: 0,
                nbytes: 0,
            };
        }
        let Progress::VlInt {
            mut val,
            mut shift,
            mut nbytes,
        } = self.progress
        else {
            unreachable!()
        };

        loop {
            self.check_content_at(self.cursor.bit_offset(), 8)?;
            let Some(byte) = self.cursor.take_byte() else {
                self.progress = Progress::VlInt { val, shift, nbytes };
                return self.suspend();
            };
            nbytes += 1;
            if nbytes > 9 {
                return Err(self.err(ErrorKind::BadVlInt));
            }
            val |= u64::from(byte & 0x7f) << shift;
            shift += 7;
            if byte & 0x80 != 0 {
                continue;
            }

            self.progress = Progress::None;
            self.advance_ip();
            let el = if signed {
                // the most significant data bit of the final byte carries
                // the sign
                let mut val = val;
                if byte & 0x40 != 0 && shift < 64 {
                    val |= !0 << shift;
                }
                let val = val as i64;
                self.last = LastVal::S(val);
                Element::VlSInt { val, dt }
            } else {
                self.last = LastVal::U(val);
                Element::VlUInt { val, dt }
            };
            return Ok(Some(Status::Element(el)));
        }
    }

    /// Read a null-terminated string
    fn read_nt_str(&mut self) -> Result<Option<Status<'t, 'd>>, Error> {
        if !matches!(self.progress, Progress::NtStr) {
            // at least the terminator must fit the content
            self.check_content_at(self.align_target(8), 8)?;
            if !self.align_field(8)? {
                return Ok(Some(Status::NeedMoreData));
            }
            self.progress = Progress::NtStr;
            return Ok(Some(Status::Element(Element::NtStrBegin)));
        }

        let avail = self.cursor.byte_slice();
        if avail.is_empty() {
            return self.suspend();
        }
        self.check_content_at(self.cursor.bit_offset(), 8)?;
        let limit = match self.effective_content_len() {
            Some(content) => {
                let left = (content - self.cursor.bit_offset()) / 8;
                avail.len().min(usize::try_from(left).unwrap_or(usize::MAX))
            }
            None => avail.len(),
        };
        let chunk = &avail[..limit];

        match chunk.iter().position(|byte| *byte == 0) {
            Some(0) => {
                self.cursor.consume_bytes(1);
                self.progress = Progress::None;
                self.advance_ip();
                Ok(Some(Status::Element(Element::NtStrEnd)))
            }
            Some(pos) => {
                self.cursor.consume_bytes(pos + 1);
                self.progress = Progress::None;
                self.advance_ip();
                self.pending = Some(Element::NtStrEnd);
                Ok(Some(Status::Element(Element::SubstrBytes(&chunk[..pos]))))
            }
            None if chunk.is_empty() => Err(self.err(ErrorKind::PrematurePktEnd {
                needed: self.cursor.bit_offset() + 8,
                content: self.effective_content_len().unwrap_or(0),
            })),
            None => {
                self.cursor.consume_bytes(chunk.len());
                Ok(Some(Status::Element(Element::SubstrBytes(chunk))))
            }
        }
    }

    /// Read a counted (static- or dynamic-length) string
    ///
    /// Exactly `len` bytes are consumed; content stops at the first null
    /// byte, the remainder is consumed silently.
    fn counted_str(
        &mut self,
        len: u64,
        begin: Element<'t, 'd>,
    ) -> Result<Option<Status<'t, 'd>>, Error> {
        if !matches!(self.progress, Progress::Str { .. }) {
            self.check_content_at(self.align_target(8), len.saturating_mul(8))?;
            if !self.align_field(8)? {
                return Ok(Some(Status::NeedMoreData));
            }
            self.progress = Progress::Str {
                left: len,
                in_content: true,
            };
            return Ok(Some(Status::Element(begin)));
        }
        let Progress::Str { left, in_content } = self.progress else {
            unreachable!()
        };

        if left == 0 {
            self.progress = Progress::None;
            self.advance_ip();
            return Ok(None);
        }

        let avail = self.cursor.byte_slice();
        if avail.is_empty() {
            return self.suspend();
        }
        let take = avail.len().min(usize::try_from(left).unwrap_or(usize::MAX));
        let chunk = &avail[..take];
        self.cursor.consume_bytes(take);
        let left = left - take as u64;

        if !in_content {
            self.progress = Progress::Str { left, in_content };
            return Ok(None);
        }
        match chunk.iter().position(|byte| *byte == 0) {
            Some(0) => {
                self.progress = Progress::Str {
                    left,
                    in_content: false,
                };
                Ok(None)
            }
            Some(pos) => {
                self.progress = Progress::Str {
                    left,
                    in_content: false,
                };
                Ok(Some(Status::Element(Element::SubstrBytes(&chunk[..pos]))))
            }
            None => {
                self.progress = Progress::Str { left, in_content };
                Ok(Some(Status::Element(Element::SubstrBytes(chunk))))
            }
        }
    }

    /// Read a BLOB of `len` bytes, emitting sections as they are available
    fn blob(
        &mut self,
        len: u64,
        begin: Element<'t, 'd>,
        uuid: bool,
    ) -> Result<Option<Status<'t, 'd>>, Error> {
        if !matches!(self.progress, Progress::Blob { .. }) {
            self.check_content_at(self.align_target(8), len.saturating_mul(8))?;
            if !self.align_field(8)? {
                return Ok(Some(Status::NeedMoreData));
            }
            self.progress = Progress::Blob { left: len };
            if uuid {
                self.uuid = Some(UuidAcc::default());
            }
            return Ok(Some(Status::Element(begin)));
        }
        let Progress::Blob { left } = self.progress else {
            unreachable!()
        };

        if left == 0 {
            self.progress = Progress::None;
            self.advance_ip();
            return Ok(None);
        }

        let avail = self.cursor.byte_slice();
        if avail.is_empty() {
            return self.suspend();
        }
        let take = avail.len().min(usize::try_from(left).unwrap_or(usize::MAX));
        let chunk = &avail[..take];
        self.cursor.consume_bytes(take);
        self.progress = Progress::Blob {
            left: left - take as u64,
        };
        if let Some(acc) = &mut self.uuid {
            chunk.iter().for_each(|byte| acc.push(*byte));
        }
        Ok(Some(Status::Element(Element::BlobSectionBytes(chunk))))
    }

    fn array(
        &mut self,
        a: &'t BeginReadSlArray<'t>,
        len: u64,
        begin: Element<'t, 'd>,
        uuid: bool,
    ) -> Result<Option<Status<'t, 'd>>, Error> {
        if !self.align_field(a.align)? {
            return Ok(Some(Status::NeedMoreData));
        }
        self.advance_ip();
        if uuid {
            self.uuid = Some(UuidAcc::default());
        }
        self.frames.push(Frame::for_iters(&a.proc, len));
        Ok(Some(Status::Element(begin)))
    }

    fn dl_array(
        &mut self,
        align: u32,
        proc: &'t Proc<'t>,
        len: u64,
    ) -> Result<Option<Status<'t, 'd>>, Error> {
        if !self.align_field(align)? {
            return Ok(Some(Status::NeedMoreData));
        }
        self.advance_ip();
        self.frames.push(Frame::for_iters(proc, len));
        Ok(Some(Status::Element(Element::DlArrayBegin { len })))
    }

    fn opt(&mut self, proc: &'t Proc<'t>, present: bool) -> Option<Status<'t, 'd>> {
        self.advance_ip();
        let mut frame = Frame::new(proc);
        if !present {
            frame.ip = proc.len() - 1;
        }
        self.frames.push(frame);
        self.emit(Element::OptBegin { present })
    }

    /// Validate the accumulated metadata stream UUID and queue its element
    fn finish_uuid(&mut self) -> Result<(), Error> {
        let acc = self.uuid.take().expect("UUID accumulation active");
        debug_assert_eq!(usize::from(acc.len), acc.buf.len());
        if let Some(expected) = self.pkt_proc.trace().uuid {
            if expected != acc.buf {
                return Err(self.err(ErrorKind::MetadataStreamUuidMismatch {
                    expected,
                    got: acc.buf,
                }));
            }
        }
        self.pending = Some(Element::MetadataStreamUuid(acc.buf));
        Ok(())
    }

    /// Update the default clock from a fixed-length value of `len` bits
    ///
    /// The low `len` bits are replaced; the untouched upper bits gain a
    /// carry when the new low part wrapped around.
    fn update_def_clk_fl(&mut self, len: u32) {
        let val = self.last.as_u64();
        if len >= 64 {
            self.def_clk = val;
            return;
        }
        let mask = (1u64 << len) - 1;
        let new_low = val & mask;
        let mut high = self.def_clk & !mask;
        if new_low < self.def_clk & mask {
            high = high.wrapping_add(mask + 1);
        }
        self.def_clk = high | new_low;
    }
}

/// Packet-level decoding state
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum State {
    /// Awaiting the first byte of a packet
    PktBegin,
    /// Executing the trace packet preamble procedure
    PktPreamble,
    /// Executing the data stream packet preamble procedure
    DsPktPreamble,
    /// Deciding between the next event record and the end of content
    ErLoop,
    /// Executing the event record preamble procedure
    ErPreamble,
    /// Executing an event record procedure
    Er,
    /// Consuming padding between content end and packet end
    SkipPadding,
    /// Emitting the packet end element
    PktEnd,
}

/// One execution frame: a procedure and an instruction pointer
#[derive(Copy, Clone, Debug)]
struct Frame<'t> {
    instrs: &'t [Instr<'t>],
    ip: usize,
    /// Remaining iterations of an array frame
    remaining: u64,
}

impl<'t> Frame<'t> {
    fn new(proc: &'t Proc<'t>) -> Self {
        Self {
            instrs: proc.instrs(),
            ip: 0,
            remaining: 0,
        }
    }

    /// Frame for an array body of `len` iterations
    ///
    /// A zero-length array enters directly at the trailing `EndRead…`
    /// instruction.
    fn for_iters(proc: &'t Proc<'t>, len: u64) -> Self {
        Self {
            instrs: proc.instrs(),
            ip: if len == 0 { proc.len() - 1 } else { 0 },
            remaining: len,
        }
    }
}

/// State of a partially decoded field, persisted across suspensions
///
/// Fixed-length fields need no entry here: their partial bytes live in
/// the cursor's stash. Alignment skipping is recomputed on resumption.
#[derive(Copy, Clone, Debug)]
enum Progress {
    None,
    /// Variable-length integer accumulation
    VlInt { val: u64, shift: u32, nbytes: u8 },
    /// Null-terminated string scanning
    NtStr,
    /// Counted string: `left` bytes to consume; `in_content` until the
    /// first null byte was seen
    Str { left: u64, in_content: bool },
    /// BLOB: `left` bytes to consume
    Blob { left: u64 },
}

/// A value in a saved-value slot
#[derive(Copy, Clone, Debug)]
enum SavedVal {
    U(u64),
    S(i64),
    Bool(bool),
}

impl SavedVal {
    fn to_u64(self) -> u64 {
        match self {
            Self::U(val) => val,
            Self::S(val) => val as u64,
            Self::Bool(val) => val.into(),
        }
    }

    fn to_i64(self) -> i64 {
        match self {
            Self::U(val) => val as i64,
            Self::S(val) => val,
            Self::Bool(val) => val.into(),
        }
    }

    fn to_bool(self) -> bool {
        match self {
            Self::U(val) => val != 0,
            Self::S(val) => val != 0,
            Self::Bool(val) => val,
        }
    }
}

/// The last decoded scalar
#[derive(Copy, Clone, Debug)]
enum LastVal {
    None,
    U(u64),
    S(i64),
    Bool(bool),
    F(f64),
}

impl LastVal {
    fn as_u64(&self) -> u64 {
        match self {
            Self::U(val) => *val,
            Self::S(val) => *val as u64,
            Self::Bool(val) => (*val).into(),
            _ => unreachable!("unsigned integer decoded before use"),
        }
    }

    fn to_saved(self) -> SavedVal {
        match self {
            Self::U(val) => SavedVal::U(val),
            Self::S(val) => SavedVal::S(val),
            Self::Bool(val) => SavedVal::Bool(val),
            _ => unreachable!("integer or boolean decoded before save"),
        }
    }
}

/// Accumulator for the 16 metadata stream UUID bytes
#[derive(Copy, Clone, Debug, Default)]
struct UuidAcc {
    buf: [u8; 16],
    len: u8,
}

impl UuidAcc {
    fn push(&mut self, byte: u8) {
        if usize::from(self.len) < self.buf.len() {
            self.buf[usize::from(self.len)] = byte;
            self.len += 1;
        }
    }
}

/// Sign-extend the low `len` bits of `val`
fn sign_extend(val: u64, len: u32) -> i64 {
    if len < 64 && val & 1 << (len - 1) != 0 {
        (val | !0 << len) as i64
    } else {
        val as i64
    }
}
