// Copyright (C) 2025 FZI Forschungszentrum Informatik
// SPDX-License-Identifier: Apache-2.0
//! Procedure builder
//!
//! Lowers a validated [`TraceType`] into a [`PktProc`] in two walks over
//! each scope root:
//!
//! 1. A collection walk resolves the data location of every dependent type
//!    (dynamic-length array/string/BLOB, variant, optional) to an absolute
//!    `(scope, path)` pair and assigns it a saved-value slot. Slots are
//!    pooled: one source field feeds any number of dependents through the
//!    same slot. Relative locations are resolved against the lexical
//!    member-name stack by searching the ancestor levels for the first
//!    path element.
//! 2. A lowering walk emits the instructions, injecting `SaveVal` right
//!    after each source read, role-driven `Set…` instructions after their
//!    carrying field, and the string/UUID structural specialisations.
//!
//! The input model is validated by the metadata frontend; this builder
//! asserts its preconditions but never fails at runtime.

use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use crate::metadata::trace::{DataStreamType, TraceType};
use crate::metadata::types::{DataType, EnumMappings, StructType};
use crate::metadata::{DataLocation, Scope, UIntRole};

use super::{
    BeginReadDlArray, BeginReadDlBlob, BeginReadDlStr, BeginReadOptBool, BeginReadOptInt,
    BeginReadScope, BeginReadSlArray, BeginReadSlBlob, BeginReadSlStr, BeginReadStruct,
    BeginReadVar, DsPktProc, ErProc, FlLoad, Instr, PktProc, Proc, ReadFl, ReadNtStr, ReadVl,
    VarOptProc,
};

/// Build the packet procedure of the given trace type
///
/// This is the single cold entry point of the compile stage. The returned
/// [`PktProc`] borrows the trace type and is immutable afterwards;
/// [`PktProc::saved_vals_count`] reports how many saved-value slots a
/// virtual machine executing it needs.
pub fn build_pkt_proc(trace: &TraceType) -> PktProc<'_> {
    let mut builder = Builder {
        slots: BTreeMap::new(),
    };

    if let Some(root) = &trace.pkt_header {
        builder.collect_root(Scope::PacketHeader, root, None, None);
    }
    for dst in &trace.dsts {
        if let Some(root) = &dst.pkt_ctx {
            builder.collect_root(Scope::PacketContext, root, Some(dst.id), None);
        }
        if let Some(root) = &dst.er_header {
            builder.collect_root(Scope::EventRecordHeader, root, Some(dst.id), None);
        }
        if let Some(root) = &dst.er_common_ctx {
            builder.collect_root(Scope::EventRecordCommonContext, root, Some(dst.id), None);
        }
        for ert in &dst.erts {
            if let Some(root) = &ert.spec_ctx {
                builder.collect_root(
                    Scope::EventRecordSpecificContext,
                    root,
                    Some(dst.id),
                    Some(ert.id),
                );
            }
            if let Some(root) = &ert.payload {
                builder.collect_root(Scope::EventRecordPayload, root, Some(dst.id), Some(ert.id));
            }
        }
    }

    let mut preamble = Proc::new();
    if let Some(root) = &trace.pkt_header {
        builder.lower_root(Scope::PacketHeader, root, None, None, &mut preamble);
    }
    if !trace.dsts.is_empty() {
        let unique = (trace.dsts.len() == 1
            && !struct_has_role(trace.pkt_header.as_ref(), UIntRole::DstId))
        .then(|| trace.dsts[0].id);
        preamble.push(Instr::SetDst(unique));
    }
    preamble.push(Instr::EndPktPreambleProc);

    let ds_procs = trace
        .dsts
        .iter()
        .map(|dst| (dst.id, builder.build_ds_pkt_proc(dst)))
        .collect();

    PktProc {
        trace,
        preamble,
        ds_procs,
        saved_vals_count: builder.slots.len(),
    }
}

/// Sharing level of a saved-value source field
///
/// A source field in the packet header is read once per packet for all
/// data stream types; one in the packet context or event record
/// header/common context once per its data stream type; one in the
/// specific context or payload once per its event record type. Slots are
/// pooled within one level.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
enum Level {
    Trace,
    Ds(u64),
    Er(u64, u64),
}

#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
struct SlotKey {
    level: Level,
    scope: Scope,
    path: Vec<String>,
}

/// Per-root walk context
struct RootCtx<'t> {
    scope: Scope,
    dst_id: Option<u64>,
    ert_id: Option<u64>,
    /// Lexical member-name stack: one entry per structure level, each
    /// holding the names seen so far at that level (the last one is the
    /// member currently being descended)
    names: Vec<Vec<&'t str>>,
}

impl RootCtx<'_> {
    fn new(scope: Scope, dst_id: Option<u64>, ert_id: Option<u64>) -> Self {
        Self {
            scope,
            dst_id,
            ert_id,
            names: Vec::new(),
        }
    }

    /// Sharing level of a field in the given scope, seen from this root
    fn level_for(&self, scope: Scope) -> Level {
        use Scope::*;

        let dst = || self.dst_id.expect("scope requires a data stream type");
        match scope {
            PacketHeader => Level::Trace,
            PacketContext | EventRecordHeader | EventRecordCommonContext => Level::Ds(dst()),
            EventRecordSpecificContext | EventRecordPayload => {
                Level::Er(dst(), self.ert_id.expect("scope requires an event record type"))
            }
        }
    }

    /// Path of the member currently being descended
    fn cur_path(&self) -> Vec<String> {
        self.names
            .iter()
            .map(|level| {
                level
                    .last()
                    .expect("member name pushed before descending")
                    .to_string()
            })
            .collect()
    }

    /// Resolve a data location to an absolute `(scope, path)` pair
    ///
    /// A relative location is resolved by searching the ancestor levels,
    /// deepest first, for one containing the first path element, then
    /// prefixing the location with the member chain leading there.
    fn resolve(&self, loc: &DataLocation) -> (Scope, Vec<String>) {
        if let Some(scope) = loc.scope() {
            return (scope, loc.path().to_vec());
        }

        let first = loc
            .path()
            .first()
            .expect("empty data location path")
            .as_str();
        let found = self
            .names
            .iter()
            .rposition(|level| level.iter().any(|name| *name == first))
            .expect("relative data location target exists");

        let mut path: Vec<String> = self.names[..found]
            .iter()
            .map(|level| {
                level
                    .last()
                    .expect("member name pushed before descending")
                    .to_string()
            })
            .collect();
        path.extend(loc.path().iter().cloned());
        (self.scope, path)
    }
}

struct Builder {
    slots: BTreeMap<SlotKey, usize>,
}

impl Builder {
    fn collect_root(
        &mut self,
        scope: Scope,
        root: &StructType,
        dst_id: Option<u64>,
        ert_id: Option<u64>,
    ) {
        let mut ctx = RootCtx::new(scope, dst_id, ert_id);
        self.collect_struct(root, &mut ctx);
    }

    fn collect_struct<'t>(&mut self, st: &'t StructType, ctx: &mut RootCtx<'t>) {
        ctx.names.push(Vec::new());
        for member in &st.members {
            ctx.names
                .last_mut()
                .expect("level pushed above")
                .push(&member.name);
            self.collect(&member.dt, ctx);
        }
        ctx.names.pop();
    }

    fn collect<'t>(&mut self, dt: &'t DataType, ctx: &mut RootCtx<'t>) {
        match dt {
            DataType::Struct(st) => self.collect_struct(st, ctx),
            DataType::SlArray(a) => self.collect(&a.elem, ctx),
            DataType::DlArray(a) => {
                self.register(&a.len_loc, ctx);
                self.collect(&a.elem, ctx);
            }
            DataType::DlStr(s) => self.register(&s.len_loc, ctx),
            DataType::DlBlob(b) => self.register(&b.len_loc, ctx),
            DataType::VarUSel(v) => {
                self.register(&v.sel_loc, ctx);
                v.opts.iter().for_each(|o| self.collect(&o.dt, ctx));
            }
            DataType::VarSSel(v) => {
                self.register(&v.sel_loc, ctx);
                v.opts.iter().for_each(|o| self.collect(&o.dt, ctx));
            }
            DataType::OptBool(o) => {
                self.register(&o.sel_loc, ctx);
                self.collect(&o.dt, ctx);
            }
            DataType::OptUSel(o) => {
                self.register(&o.sel_loc, ctx);
                self.collect(&o.dt, ctx);
            }
            DataType::OptSSel(o) => {
                self.register(&o.sel_loc, ctx);
                self.collect(&o.dt, ctx);
            }
            _ => (),
        }
    }

    fn register(&mut self, loc: &DataLocation, ctx: &RootCtx<'_>) {
        let (scope, path) = ctx.resolve(loc);
        let key = SlotKey {
            level: ctx.level_for(scope),
            scope,
            path,
        };
        let next = self.slots.len();
        self.slots.entry(key).or_insert(next);
    }

    /// Slot of the field currently being lowered, if some dependent needs
    /// its value
    fn source_slot(&self, ctx: &RootCtx<'_>) -> Option<usize> {
        let key = SlotKey {
            level: ctx.level_for(ctx.scope),
            scope: ctx.scope,
            path: ctx.cur_path(),
        };
        self.slots.get(&key).copied()
    }

    /// Slot assigned to a dependent's data location
    fn dep_slot(&self, loc: &DataLocation, ctx: &RootCtx<'_>) -> usize {
        let (scope, path) = ctx.resolve(loc);
        let key = SlotKey {
            level: ctx.level_for(scope),
            scope,
            path,
        };
        *self
            .slots
            .get(&key)
            .expect("dependent location registered during collection")
    }

    fn build_ds_pkt_proc<'t>(&self, dst: &'t DataStreamType) -> DsPktProc<'t> {
        let mut pkt_preamble = Proc::new();
        if let Some(root) = &dst.pkt_ctx {
            self.lower_root(
                Scope::PacketContext,
                root,
                Some(dst.id),
                None,
                &mut pkt_preamble,
            );
        }
        pkt_preamble.push(Instr::SetDsInfo);
        pkt_preamble.push(Instr::SetPktInfo);
        pkt_preamble.push(Instr::EndDsPktPreambleProc);

        let mut er_preamble = Proc::new();
        if let Some(root) = &dst.er_header {
            self.lower_root(
                Scope::EventRecordHeader,
                root,
                Some(dst.id),
                None,
                &mut er_preamble,
            );
        }
        if !dst.erts.is_empty() {
            let unique = (dst.erts.len() == 1
                && !struct_has_role(dst.er_header.as_ref(), UIntRole::ErtId))
            .then(|| dst.erts[0].id);
            er_preamble.push(Instr::SetErt(unique));
            er_preamble.push(Instr::SetErInfo);
        }
        if let Some(root) = &dst.er_common_ctx {
            self.lower_root(
                Scope::EventRecordCommonContext,
                root,
                Some(dst.id),
                None,
                &mut er_preamble,
            );
        }
        er_preamble.push(Instr::EndDsErPreambleProc);

        // event record type IDs are typically contiguous from zero; a
        // bounded dense vector serves those, a map the outliers
        let dense_cap = dst.erts.len().saturating_mul(2);
        let dense_len = dst
            .erts
            .iter()
            .filter_map(|e| usize::try_from(e.id).ok().filter(|id| *id < dense_cap))
            .map(|id| id + 1)
            .max()
            .unwrap_or(0);
        let mut er_dense: Vec<Option<ErProc<'t>>> = (0..dense_len).map(|_| None).collect();
        let mut er_sparse = BTreeMap::new();

        for ert in &dst.erts {
            let mut proc = Proc::new();
            if let Some(root) = &ert.spec_ctx {
                self.lower_root(
                    Scope::EventRecordSpecificContext,
                    root,
                    Some(dst.id),
                    Some(ert.id),
                    &mut proc,
                );
            }
            if let Some(root) = &ert.payload {
                self.lower_root(
                    Scope::EventRecordPayload,
                    root,
                    Some(dst.id),
                    Some(ert.id),
                    &mut proc,
                );
            }
            proc.push(Instr::EndErProc);

            let er_proc = ErProc { ert, proc };
            match usize::try_from(ert.id).ok().filter(|id| *id < dense_cap) {
                Some(id) => er_dense[id] = Some(er_proc),
                None => {
                    er_sparse.insert(ert.id, er_proc);
                }
            }
        }

        DsPktProc {
            dst,
            pkt_preamble,
            er_preamble,
            er_dense,
            er_sparse,
        }
    }

    fn lower_root<'t>(
        &self,
        scope: Scope,
        root: &'t StructType,
        dst_id: Option<u64>,
        ert_id: Option<u64>,
        out: &mut Proc<'t>,
    ) {
        let mut ctx = RootCtx::new(scope, dst_id, ert_id);
        let mut proc = Proc::new();
        self.lower_struct_body(root, &mut ctx, &mut proc);
        proc.push(Instr::EndReadScope(scope));
        out.push(Instr::BeginReadScope(BeginReadScope {
            scope,
            align: root.align(),
            proc,
        }));
    }

    fn lower_struct_body<'t>(&self, st: &'t StructType, ctx: &mut RootCtx<'t>, out: &mut Proc<'t>) {
        let mut proc = Proc::new();
        ctx.names.push(Vec::new());
        for member in &st.members {
            ctx.names
                .last_mut()
                .expect("level pushed above")
                .push(&member.name);
            self.lower_dt(&member.dt, ctx, &mut proc);
        }
        ctx.names.pop();
        proc.push(Instr::EndReadStruct);
        out.push(Instr::BeginReadStruct(BeginReadStruct {
            align: st.align(),
            proc,
        }));
    }

    fn lower_dt<'t>(&self, dt: &'t DataType, ctx: &mut RootCtx<'t>, out: &mut Proc<'t>) {
        match dt {
            DataType::FlBitArray(t) => {
                out.push(Instr::ReadFlBitArray(read_fl(t.align, t.len, t.bo, dt)));
            }
            DataType::FlBool(t) => {
                out.push(Instr::ReadFlBool(read_fl(t.align, t.len, t.bo, dt)));
                self.push_save(ctx, out);
            }
            DataType::FlSInt(t) => {
                out.push(Instr::ReadFlSInt(read_fl(t.align, t.len, t.bo, dt)));
                self.push_save(ctx, out);
            }
            DataType::FlUInt(t) => {
                out.push(Instr::ReadFlUInt(read_fl(t.align, t.len, t.bo, dt)));
                self.push_save(ctx, out);
                push_uint_roles(dt, Some(t.len), out);
            }
            DataType::FlSEnum(t) => {
                debug_assert!(!enum_mappings_overlap(&t.mappings));
                out.push(Instr::ReadFlSEnum(read_fl(t.int.align, t.int.len, t.int.bo, dt)));
                self.push_save(ctx, out);
            }
            DataType::FlUEnum(t) => {
                debug_assert!(!enum_mappings_overlap(&t.mappings));
                out.push(Instr::ReadFlUEnum(read_fl(t.int.align, t.int.len, t.int.bo, dt)));
                self.push_save(ctx, out);
                push_uint_roles(dt, Some(t.int.len), out);
            }
            DataType::FlFloat(t) => {
                out.push(Instr::ReadFlFloat(read_fl(t.align, t.len, t.bo, dt)));
            }
            DataType::VlSInt(_) => {
                out.push(Instr::ReadVlSInt(ReadVl { dt }));
                self.push_save(ctx, out);
            }
            DataType::VlUInt(_) => {
                out.push(Instr::ReadVlUInt(ReadVl { dt }));
                self.push_save(ctx, out);
                push_uint_roles(dt, None, out);
            }
            DataType::VlSEnum(t) => {
                debug_assert!(!enum_mappings_overlap(&t.mappings));
                out.push(Instr::ReadVlSEnum(ReadVl { dt }));
                self.push_save(ctx, out);
            }
            DataType::VlUEnum(t) => {
                debug_assert!(!enum_mappings_overlap(&t.mappings));
                out.push(Instr::ReadVlUEnum(ReadVl { dt }));
                self.push_save(ctx, out);
                push_uint_roles(dt, None, out);
            }
            DataType::NtStr(_) => out.push(Instr::ReadNtStr(ReadNtStr { dt })),
            DataType::SlStr(s) => {
                out.push(Instr::BeginReadSlStr(BeginReadSlStr { len: s.len, dt }));
                out.push(Instr::EndReadSlStr);
            }
            DataType::DlStr(s) => {
                let len_slot = self.dep_slot(&s.len_loc, ctx);
                out.push(Instr::BeginReadDlStr(BeginReadDlStr { len_slot, dt }));
                out.push(Instr::EndReadDlStr);
            }
            DataType::SlBlob(b) => {
                let instr = BeginReadSlBlob { len: b.len, dt };
                if b.is_metadata_stream_uuid && b.len == 16 {
                    out.push(Instr::BeginReadSlUuidBlob(instr));
                    out.push(Instr::EndReadSlUuidBlob);
                } else {
                    out.push(Instr::BeginReadSlBlob(instr));
                    out.push(Instr::EndReadSlBlob);
                }
            }
            DataType::DlBlob(b) => {
                let len_slot = self.dep_slot(&b.len_loc, ctx);
                out.push(Instr::BeginReadDlBlob(BeginReadDlBlob { len_slot, dt }));
                out.push(Instr::EndReadDlBlob);
            }
            DataType::SlArray(a) => {
                // an array of encoded bytes is really a string
                if a.elem.is_byte_str_elem() {
                    out.push(Instr::BeginReadSlStr(BeginReadSlStr { len: a.len, dt }));
                    out.push(Instr::EndReadSlStr);
                    return;
                }

                let uuid = a.is_metadata_stream_uuid && a.len == 16 && a.elem.is_u8();
                let mut proc = Proc::new();
                self.lower_dt(&a.elem, ctx, &mut proc);
                proc.push(Instr::DecrRemainingElems);
                proc.push(if uuid {
                    Instr::EndReadSlUuidArray
                } else {
                    Instr::EndReadSlArray
                });
                let instr = BeginReadSlArray {
                    align: a.elem.align(),
                    len: a.len,
                    proc,
                };
                out.push(if uuid {
                    Instr::BeginReadSlUuidArray(instr)
                } else {
                    Instr::BeginReadSlArray(instr)
                });
            }
            DataType::DlArray(a) => {
                let len_slot = self.dep_slot(&a.len_loc, ctx);
                if a.elem.is_byte_str_elem() {
                    out.push(Instr::BeginReadDlStr(BeginReadDlStr { len_slot, dt }));
                    out.push(Instr::EndReadDlStr);
                    return;
                }

                let mut proc = Proc::new();
                self.lower_dt(&a.elem, ctx, &mut proc);
                proc.push(Instr::DecrRemainingElems);
                proc.push(Instr::EndReadDlArray);
                out.push(Instr::BeginReadDlArray(BeginReadDlArray {
                    align: a.elem.align(),
                    len_slot,
                    proc,
                }));
            }
            DataType::Struct(st) => self.lower_struct_body(st, ctx, out),
            DataType::VarUSel(v) => {
                debug_assert!(opt_ranges_disjoint(v.opts.iter().map(|o| &o.ranges)));
                let sel_slot = self.dep_slot(&v.sel_loc, ctx);
                let opts = v
                    .opts
                    .iter()
                    .map(|o| {
                        let mut proc = Proc::new();
                        self.lower_dt(&o.dt, ctx, &mut proc);
                        proc.push(Instr::EndReadVarUSel);
                        VarOptProc {
                            ranges: &o.ranges,
                            proc,
                        }
                    })
                    .collect();
                out.push(Instr::BeginReadVarUSel(BeginReadVar { sel_slot, opts }));
            }
            DataType::VarSSel(v) => {
                debug_assert!(opt_ranges_disjoint(v.opts.iter().map(|o| &o.ranges)));
                let sel_slot = self.dep_slot(&v.sel_loc, ctx);
                let opts = v
                    .opts
                    .iter()
                    .map(|o| {
                        let mut proc = Proc::new();
                        self.lower_dt(&o.dt, ctx, &mut proc);
                        proc.push(Instr::EndReadVarSSel);
                        VarOptProc {
                            ranges: &o.ranges,
                            proc,
                        }
                    })
                    .collect();
                out.push(Instr::BeginReadVarSSel(BeginReadVar { sel_slot, opts }));
            }
            DataType::OptBool(o) => {
                let sel_slot = self.dep_slot(&o.sel_loc, ctx);
                let mut proc = Proc::new();
                self.lower_dt(&o.dt, ctx, &mut proc);
                proc.push(Instr::EndReadOptBool);
                out.push(Instr::BeginReadOptBool(BeginReadOptBool { sel_slot, proc }));
            }
            DataType::OptUSel(o) => {
                let sel_slot = self.dep_slot(&o.sel_loc, ctx);
                let mut proc = Proc::new();
                self.lower_dt(&o.dt, ctx, &mut proc);
                proc.push(Instr::EndReadOptUSel);
                out.push(Instr::BeginReadOptUSel(BeginReadOptInt {
                    sel_slot,
                    ranges: &o.ranges,
                    proc,
                }));
            }
            DataType::OptSSel(o) => {
                let sel_slot = self.dep_slot(&o.sel_loc, ctx);
                let mut proc = Proc::new();
                self.lower_dt(&o.dt, ctx, &mut proc);
                proc.push(Instr::EndReadOptSSel);
                out.push(Instr::BeginReadOptSSel(BeginReadOptInt {
                    sel_slot,
                    ranges: &o.ranges,
                    proc,
                }));
            }
        }
    }

    fn push_save(&self, ctx: &RootCtx<'_>, out: &mut Proc<'_>) {
        if let Some(slot) = self.source_slot(ctx) {
            out.push(Instr::SaveVal(slot));
        }
    }
}

fn read_fl<'t>(align: u32, len: u32, bo: crate::metadata::ByteOrder, dt: &'t DataType) -> ReadFl<'t> {
    debug_assert!(align.is_power_of_two());
    debug_assert!((1..=64).contains(&len));
    ReadFl {
        align,
        len,
        load: FlLoad::select(align, len, bo),
        dt,
    }
}

/// Emit the state-updating instructions for the roles of an unsigned
/// integer field, `len` being its length for fixed-length fields
fn push_uint_roles(dt: &DataType, len: Option<u32>, out: &mut Proc<'_>) {
    use UIntRole::*;

    let roles = dt.uint_roles();
    if roles.is_empty() {
        return;
    }
    if roles.contains(DstId) || roles.contains(ErtId) {
        out.push(Instr::SetCurId);
    }
    if roles.contains(DsId) {
        out.push(Instr::SetDsId);
    }
    if roles.contains(PktMagicNumber) {
        out.push(Instr::SetPktMagicNumber);
    }
    if roles.contains(PktTotalLen) {
        out.push(Instr::SetPktTotalLen);
    }
    if roles.contains(PktContentLen) {
        out.push(Instr::SetPktContentLen);
    }
    if roles.contains(PktSeqNum) {
        out.push(Instr::SetPktSeqNum);
    }
    if roles.contains(DiscErCounterSnap) {
        out.push(Instr::SetPktDiscErCounterSnap);
    }
    if roles.contains(DefClkTs) {
        out.push(match len {
            Some(len) => Instr::UpdateDefClkValFl(len),
            None => Instr::UpdateDefClkVal,
        });
    }
    if roles.contains(PktEndDefClkTs) {
        out.push(Instr::SetPktEndDefClkVal);
    }
}

/// Check whether any unsigned integer field of the structure carries the
/// given role
fn struct_has_role(st: Option<&StructType>, role: UIntRole) -> bool {
    fn dt_has_role(dt: &DataType, role: UIntRole) -> bool {
        match dt {
            DataType::Struct(st) => st.members.iter().any(|m| dt_has_role(&m.dt, role)),
            _ => dt.uint_roles().contains(role),
        }
    }

    st.is_some_and(|st| st.members.iter().any(|m| dt_has_role(&m.dt, role)))
}

fn enum_mappings_overlap<T: Copy + Ord>(mappings: &EnumMappings<T>) -> bool {
    mappings.iter().enumerate().any(|(i, (_, a))| {
        mappings[i + 1..]
            .iter()
            .any(|(_, b)| a.intersects(b))
    })
}

fn opt_ranges_disjoint<'a, T, I>(mut ranges: I) -> bool
where
    T: Copy + Ord + 'a,
    I: Iterator<Item = &'a crate::metadata::range::IntegerRangeSet<T>> + Clone,
{
    loop {
        let Some(set) = ranges.next() else {
            return true;
        };
        if ranges.clone().any(|other| set.intersects(other)) {
            return false;
        }
    }
}
