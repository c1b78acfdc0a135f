// Copyright (C) 2025 FZI Forschungszentrum Informatik
// SPDX-License-Identifier: Apache-2.0

use alloc::format;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use crate::element::{Element, PacketInfo};
use crate::metadata::range::IntegerRangeSet;
use crate::metadata::trace::{DataStreamType, EventRecordType, TraceType};
use crate::metadata::types::*;
use crate::metadata::{ByteOrder, DataLocation, Scope, UIntRole, UIntRoles};
use crate::proc::build::build_pkt_proc;
use crate::proc::PktProc;

use super::error::ErrorKind;
use super::{Error, Status, Vm};

fn fl_uint(align: u32, len: u32, bo: ByteOrder) -> DataType {
    DataType::FlUInt(FlUIntType {
        align,
        len,
        bo,
        has_encoding: false,
        roles: UIntRoles::empty(),
    })
}

fn fl_uint_role(align: u32, len: u32, bo: ByteOrder, role: UIntRole) -> DataType {
    DataType::FlUInt(FlUIntType {
        align,
        len,
        bo,
        has_encoding: false,
        roles: UIntRoles::only(role),
    })
}

fn u8t() -> DataType {
    fl_uint(8, 8, ByteOrder::Little)
}

fn strukt<const N: usize>(members: [(&str, DataType); N]) -> StructType {
    StructType::new(members.map(|(name, dt)| StructMemberType::new(name, dt)))
}

/// Trace type with a single data stream type and a single event record
/// type of the given payload
fn payload_trace(payload: StructType) -> TraceType {
    TraceType {
        pkt_header: None,
        uuid: None,
        dsts: alloc::vec![DataStreamType {
            id: 0,
            erts: alloc::vec![EventRecordType {
                id: 0,
                spec_ctx: None,
                payload: Some(payload),
            }],
            ..Default::default()
        }],
    }
}

/// Run a machine over the given chunks until the stream ends
fn drive<'t>(
    pkt_proc: &'t PktProc<'t>,
    chunks: &[&'static [u8]],
) -> Result<Vec<Element<'t, 'static>>, Error> {
    let mut vm = Vm::new(pkt_proc);
    let mut chunks = chunks.iter();
    let mut out = Vec::new();
    loop {
        match vm.next()? {
            Status::Element(el) => out.push(el),
            Status::NeedMoreData => vm.feed(chunks.next().copied().unwrap_or(&[])),
            Status::End => return Ok(out),
        }
    }
}

/// Compact rendering of an element sequence, merging adjacent
/// substring/BLOB section chunks so the result is split-independent
fn briefs(els: &[Element<'_, '_>]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut text = None::<String>;
    let mut blob = None::<usize>;

    for el in els {
        match el {
            Element::SubstrBytes(bytes) => {
                let chunk = core::str::from_utf8(bytes).unwrap_or("<bin>");
                text.get_or_insert_with(String::new).push_str(chunk);
                continue;
            }
            Element::BlobSectionBytes(bytes) => {
                *blob.get_or_insert(0) += bytes.len();
                continue;
            }
            _ => (),
        }
        if let Some(text) = text.take() {
            out.push(format!("substr({text})"));
        }
        if let Some(blob) = blob.take() {
            out.push(format!("blob-bytes({blob})"));
        }
        out.push(brief(el));
    }
    if let Some(text) = text.take() {
        out.push(format!("substr({text})"));
    }
    if let Some(blob) = blob.take() {
        out.push(format!("blob-bytes({blob})"));
    }
    out
}

fn brief(el: &Element<'_, '_>) -> String {
    match el {
        Element::PktBegin => "pkt".into(),
        Element::PktEnd => "/pkt".into(),
        Element::ScopeBegin(scope) => format!("scope({scope})"),
        Element::ScopeEnd(_) => "/scope".into(),
        Element::PktMagicNumber(_) => "magic".into(),
        Element::MetadataStreamUuid(_) => "uuid".into(),
        Element::DsInfo(info) => format!("ds-info({})", info.dst_id),
        Element::PktInfo(_) => "pkt-info".into(),
        Element::ErInfo(info) => format!("er-info({})", info.ert_id),
        Element::DefClkVal(val) => format!("clk({val:#x})"),
        Element::StructBegin => "struct".into(),
        Element::StructEnd => "/struct".into(),
        Element::SlArrayBegin { len } => format!("sl-array({len})"),
        Element::SlArrayEnd => "/sl-array".into(),
        Element::DlArrayBegin { len } => format!("dl-array({len})"),
        Element::DlArrayEnd => "/dl-array".into(),
        Element::FlBitArray { val, .. } => format!("bits({val:#x})"),
        Element::FlBool { val, .. } => format!("bool({val})"),
        Element::FlSInt { val, .. } => format!("sint({val})"),
        Element::FlUInt { val, .. } => format!("uint({val:#x})"),
        Element::FlFloat { val, .. } => format!("float({val})"),
        Element::VlSInt { val, .. } => format!("vl-sint({val})"),
        Element::VlUInt { val, .. } => format!("vl-uint({val:#x})"),
        Element::NtStrBegin => "nt-str".into(),
        Element::NtStrEnd => "/nt-str".into(),
        Element::SlStrBegin { max_len } => format!("sl-str({max_len})"),
        Element::SlStrEnd => "/sl-str".into(),
        Element::DlStrBegin { max_len } => format!("dl-str({max_len})"),
        Element::DlStrEnd => "/dl-str".into(),
        Element::SubstrBytes(_) | Element::BlobSectionBytes(_) => unreachable!("merged above"),
        Element::SlBlobBegin { len } => format!("sl-blob({len})"),
        Element::SlBlobEnd => "/sl-blob".into(),
        Element::DlBlobBegin { len } => format!("dl-blob({len})"),
        Element::DlBlobEnd => "/dl-blob".into(),
        Element::VarBegin { opt_index } => format!("var({opt_index})"),
        Element::VarEnd => "/var".into(),
        Element::OptBegin { present } => format!("opt({present})"),
        Element::OptEnd => "/opt".into(),
    }
}

fn assert_els(actual: &[Element<'_, '_>], expected: &[&str]) {
    let actual = briefs(actual);
    let expected: Vec<String> = expected.iter().map(|s| s.to_string()).collect();
    assert_eq!(actual, expected);
}

macro_rules! element_test {
    ($n:ident, $trace:expr, $chunks:expr, $expected:expr) => {
        #[test]
        fn $n() {
            let trace = $trace;
            let pkt_proc = build_pkt_proc(&trace);
            let els = drive(&pkt_proc, $chunks).unwrap();
            assert_els(&els, $expected);
        }
    };
}

fn magic_trace() -> TraceType {
    TraceType {
        pkt_header: Some(strukt([(
            "magic",
            fl_uint_role(32, 32, ByteOrder::Big, UIntRole::PktMagicNumber),
        )])),
        uuid: None,
        dsts: Vec::new(),
    }
}

element_test!(
    magic_header_packet,
    magic_trace(),
    &[b"\xc1\xfc\x1f\xc1"],
    &[
        "pkt",
        "scope(packet header)",
        "struct",
        "uint(0xc1fc1fc1)",
        "magic",
        "/struct",
        "/scope",
        "/pkt",
    ]
);

#[test]
fn magic_mismatch() {
    let trace = magic_trace();
    let proc = build_pkt_proc(&trace);
    let err = drive(&proc, &[b"\x00\x00\x00\x01"]).unwrap_err();
    assert_eq!(err.kind(), &ErrorKind::MagicMismatch { val: 1 });
    assert_eq!(err.offset_bits(), 32);
}

fn dl_array_trace() -> TraceType {
    let mut trace = payload_trace(strukt([(
        "arr",
        DataType::DlArray(DlArrayType {
            len_loc: DataLocation::abs(Scope::PacketContext, ["len"]),
            elem: u8t().into(),
        }),
    )]));
    trace.dsts[0].pkt_ctx = Some(strukt([("len", u8t())]));
    trace
}

const DL_ARRAY_ELS: &[&str] = &[
    "pkt",
    "scope(packet context)",
    "struct",
    "uint(0x3)",
    "/struct",
    "/scope",
    "ds-info(0)",
    "pkt-info",
    "er-info(0)",
    "scope(event record payload)",
    "struct",
    "dl-array(3)",
    "uint(0x41)",
    "uint(0x42)",
    "uint(0x43)",
    "/dl-array",
    "/struct",
    "/scope",
    "/pkt",
];

element_test!(
    dl_array_of_bytes,
    dl_array_trace(),
    &[b"\x03\x41\x42\x43"],
    DL_ARRAY_ELS
);

element_test!(
    dl_array_one_byte_feeds,
    dl_array_trace(),
    &[b"\x03", b"\x41", b"\x42", b"\x43"],
    DL_ARRAY_ELS
);

#[test]
fn zero_len_dl_array() {
    let mut trace = payload_trace(strukt([
        (
            "arr",
            DataType::DlArray(DlArrayType {
                len_loc: DataLocation::abs(Scope::PacketContext, ["len"]),
                elem: u8t().into(),
            }),
        ),
        ("t", u8t()),
    ]));
    trace.dsts[0].pkt_ctx = Some(strukt([("len", u8t())]));
    let proc = build_pkt_proc(&trace);

    let els = drive(&proc, &[b"\x00\x99"]).unwrap();
    let b = briefs(&els);
    let pos = b.iter().position(|s| s == "dl-array(0)").unwrap();
    // no element reads in between
    assert_eq!(b[pos + 1], "/dl-array");
    assert_eq!(b[pos + 2], "uint(0x99)");
}

fn variant_trace() -> TraceType {
    payload_trace(strukt([
        ("tag", u8t()),
        (
            "v",
            DataType::VarUSel(VarUSelType {
                sel_loc: DataLocation::rel(["tag"]),
                opts: alloc::vec![
                    VarOptType {
                        name: Some("a".into()),
                        ranges: IntegerRangeSet::from([(0u64, 5)]),
                        dt: u8t(),
                    },
                    VarOptType {
                        name: Some("b".into()),
                        ranges: IntegerRangeSet::from([(6u64, 10)]),
                        dt: fl_uint(16, 16, ByteOrder::Little),
                    },
                ],
            }),
        ),
    ]))
}

#[test]
fn variant_dispatch() {
    let trace = variant_trace();
    let proc = build_pkt_proc(&trace);
    // selector 7 falls in the second option's ranges
    let els = drive(&proc, &[b"\x07\x00\x2a\x00"]).unwrap();
    let b = briefs(&els);
    let pos = b.iter().position(|s| s == "var(1)").unwrap();
    assert_eq!(b[pos + 1], "uint(0x2a)");
    assert_eq!(b[pos + 2], "/var");
}

#[test]
fn variant_unknown_selector() {
    let trace = variant_trace();
    let proc = build_pkt_proc(&trace);
    let err = drive(&proc, &[b"\xff\x00"]).unwrap_err();
    assert_eq!(err.kind(), &ErrorKind::UnknownVarUSel { val: 255 });
}

#[test]
fn leb128_unsigned() {
    let trace = payload_trace(strukt([("n", DataType::VlUInt(VlUIntType::default()))]));
    let proc = build_pkt_proc(&trace);
    let els = drive(&proc, &[b"\xe5\x8e\x26"]).unwrap();
    assert!(briefs(&els).contains(&"vl-uint(0x98765)".to_string()));
}

#[test]
fn leb128_signed() {
    let trace = payload_trace(strukt([
        ("a", DataType::VlSInt(VlSIntType::default())),
        ("b", DataType::VlSInt(VlSIntType::default())),
    ]));
    let proc = build_pkt_proc(&trace);
    let els = drive(&proc, &[b"\x7f\xff\x7f"]).unwrap();
    let b = briefs(&els);
    assert!(b.contains(&"vl-sint(-1)".to_string()));
    // two encodings of -1, different lengths
    assert_eq!(b.iter().filter(|s| *s == "vl-sint(-1)").count(), 2);
}

#[test]
fn leb128_too_long() {
    let trace = payload_trace(strukt([("n", DataType::VlUInt(VlUIntType::default()))]));
    let proc = build_pkt_proc(&trace);
    let err = drive(&proc, &[&[0x80; 10]]).unwrap_err();
    assert_eq!(err.kind(), &ErrorKind::BadVlInt);
}

#[test]
fn nt_string() {
    let trace = payload_trace(strukt([
        ("s", DataType::NtStr(NtStrType::default())),
        ("t", u8t()),
    ]));
    let proc = build_pkt_proc(&trace);
    let els = drive(&proc, &[b"hello\x00\x21"]).unwrap();
    let b = briefs(&els);
    let pos = b.iter().position(|s| s == "nt-str").unwrap();
    assert_eq!(b[pos + 1], "substr(hello)");
    assert_eq!(b[pos + 2], "/nt-str");
    // the cursor is at the byte following the terminator
    assert_eq!(b[pos + 3], "uint(0x21)");
}

#[test]
fn empty_nt_string() {
    let trace = payload_trace(strukt([("s", DataType::NtStr(NtStrType::default()))]));
    let proc = build_pkt_proc(&trace);
    let els = drive(&proc, &[b"\x00"]).unwrap();
    let b = briefs(&els);
    let pos = b.iter().position(|s| s == "nt-str").unwrap();
    assert_eq!(b[pos + 1], "/nt-str");
}

#[test]
fn counted_string_stops_at_null() {
    let trace = payload_trace(strukt([
        ("s", DataType::SlStr(SlStrType { len: 5 })),
        ("t", u8t()),
    ]));
    let proc = build_pkt_proc(&trace);
    let els = drive(&proc, &[b"ab\x00xy\x99"]).unwrap();
    let b = briefs(&els);
    let pos = b.iter().position(|s| s == "sl-str(5)").unwrap();
    assert_eq!(b[pos + 1], "substr(ab)");
    assert_eq!(b[pos + 2], "/sl-str");
    // all five bytes were consumed
    assert_eq!(b[pos + 3], "uint(0x99)");
}

#[test]
fn optional_bool_selector() {
    let payload = || {
        strukt([
            (
                "b",
                DataType::FlBool(FlBoolType {
                    align: 8,
                    len: 8,
                    bo: ByteOrder::Little,
                }),
            ),
            (
                "o",
                DataType::OptBool(OptBoolType {
                    sel_loc: DataLocation::rel(["b"]),
                    dt: u8t().into(),
                }),
            ),
        ])
    };

    let trace = payload_trace(payload());
    let proc = build_pkt_proc(&trace);

    let els = drive(&proc, &[b"\x01\x55"]).unwrap();
    let b = briefs(&els);
    let pos = b.iter().position(|s| s == "opt(true)").unwrap();
    assert_eq!(b[pos + 1], "uint(0x55)");
    assert_eq!(b[pos + 2], "/opt");

    let els = drive(&proc, &[b"\x00"]).unwrap();
    let b = briefs(&els);
    let pos = b.iter().position(|s| s == "opt(false)").unwrap();
    // no contained elements
    assert_eq!(b[pos + 1], "/opt");
}

#[test]
fn optional_int_selector() {
    let trace = payload_trace(strukt([
        ("k", u8t()),
        (
            "o",
            DataType::OptUSel(OptUSelType {
                sel_loc: DataLocation::rel(["k"]),
                ranges: IntegerRangeSet::from([(1u64, 3)]),
                dt: u8t().into(),
            }),
        ),
    ]));
    let proc = build_pkt_proc(&trace);

    let els = drive(&proc, &[b"\x02\x55"]).unwrap();
    assert!(briefs(&els).contains(&"opt(true)".to_string()));

    let els = drive(&proc, &[b"\x09"]).unwrap();
    assert!(briefs(&els).contains(&"opt(false)".to_string()));
}

fn framed_trace() -> TraceType {
    TraceType {
        pkt_header: None,
        uuid: None,
        dsts: alloc::vec![DataStreamType {
            id: 0,
            pkt_ctx: Some(strukt([
                (
                    "pkt_size",
                    fl_uint_role(8, 16, ByteOrder::Little, UIntRole::PktTotalLen),
                ),
                (
                    "content_size",
                    fl_uint_role(8, 16, ByteOrder::Little, UIntRole::PktContentLen),
                ),
            ])),
            ..Default::default()
        }],
    }
}

#[test]
fn packet_lens_and_padding() {
    let trace = framed_trace();
    let proc = build_pkt_proc(&trace);
    // two 6-byte packets: 48 bits total, 32 bits content, 2 padding bytes
    let els = drive(&proc, &[b"\x30\x00\x20\x00\xaa\xbb\x30\x00\x20\x00\xcc\xdd"]).unwrap();

    let b = briefs(&els);
    assert_eq!(b.iter().filter(|s| *s == "pkt").count(), 2);
    assert_eq!(b.iter().filter(|s| *s == "/pkt").count(), 2);

    let info = els
        .iter()
        .find_map(|el| match el {
            Element::PktInfo(info) => Some(*info),
            _ => None,
        })
        .unwrap();
    assert_eq!(
        info,
        PacketInfo {
            total_len: Some(48),
            content_len: Some(32),
            seq_num: None,
            disc_er_counter_snap: None,
            end_def_clk_val: None,
        }
    );
}

#[test]
fn oversized_content() {
    let trace = framed_trace();
    let proc = build_pkt_proc(&trace);
    let err = drive(&proc, &[b"\x20\x00\x40\x00"]).unwrap_err();
    assert_eq!(
        err.kind(),
        &ErrorKind::OversizedPktContent {
            content: 64,
            total: 32
        }
    );
}

#[test]
fn premature_packet_end() {
    let mut trace = payload_trace(strukt([("x", fl_uint(8, 32, ByteOrder::Little))]));
    trace.dsts[0].pkt_ctx = Some(strukt([(
        "content_size",
        fl_uint_role(8, 16, ByteOrder::Little, UIntRole::PktContentLen),
    )]));
    let proc = build_pkt_proc(&trace);
    // a content of 36 bits cannot hold the context and the payload field
    let err = drive(&proc, &[b"\x24\x00"]).unwrap_err();
    assert_eq!(
        err.kind(),
        &ErrorKind::PrematurePktEnd {
            needed: 48,
            content: 36
        }
    );
    assert_eq!(err.offset_bits(), 16);
}

#[test]
fn content_len_of_zero_is_an_empty_packet() {
    let mut trace = framed_trace();
    trace.dsts[0].pkt_ctx = Some(strukt([(
        "content_size",
        fl_uint_role(8, 16, ByteOrder::Little, UIntRole::PktContentLen),
    )]));
    let proc = build_pkt_proc(&trace);
    let els = drive(&proc, &[b"\x00\x00"]).unwrap();
    let b = briefs(&els);
    assert_eq!(b.first().unwrap(), "pkt");
    assert_eq!(b.last().unwrap(), "/pkt");
}

#[test]
fn uuid_check() {
    let expected: [u8; 16] = core::array::from_fn(|i| i as u8);
    let trace = TraceType {
        pkt_header: Some(strukt([(
            "uuid",
            DataType::SlBlob(SlBlobType {
                len: 16,
                is_metadata_stream_uuid: true,
            }),
        )])),
        uuid: Some(expected),
        dsts: Vec::new(),
    };
    let proc = build_pkt_proc(&trace);

    let els = drive(&proc, &[&[0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15]]).unwrap();
    assert_els(
        &els,
        &[
            "pkt",
            "scope(packet header)",
            "struct",
            "sl-blob(16)",
            "blob-bytes(16)",
            "/sl-blob",
            "uuid",
            "/struct",
            "/scope",
            "/pkt",
        ],
    );

    let mut got = expected;
    got[5] = 0xff;
    let err = drive(&proc, &[&[0, 1, 2, 3, 4, 0xff, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15]])
        .unwrap_err();
    assert_eq!(
        err.kind(),
        &ErrorKind::MetadataStreamUuidMismatch { expected, got }
    );
}

#[test]
fn default_clock_updates_and_wraps() {
    let trace = TraceType {
        pkt_header: None,
        uuid: None,
        dsts: alloc::vec![DataStreamType {
            id: 0,
            er_header: Some(strukt([(
                "ts",
                fl_uint_role(8, 8, ByteOrder::Little, UIntRole::DefClkTs),
            )])),
            erts: alloc::vec![EventRecordType {
                id: 0,
                spec_ctx: None,
                payload: None,
            }],
            ..Default::default()
        }],
    };
    let proc = build_pkt_proc(&trace);
    // the second timestamp wraps the 8-bit clock low part
    let els = drive(&proc, &[b"\xc8\x0a"]).unwrap();
    let b = briefs(&els);
    assert!(b.contains(&"clk(0xc8)".to_string()));
    assert!(b.contains(&"clk(0x10a)".to_string()));
}

#[test]
fn bit_fields_big_endian() {
    let trace = payload_trace(strukt([
        ("a", fl_uint(1, 3, ByteOrder::Big)),
        ("b", fl_uint(1, 5, ByteOrder::Big)),
    ]));
    let proc = build_pkt_proc(&trace);
    let els = drive(&proc, &[b"\xac"]).unwrap();
    let b = briefs(&els);
    assert!(b.contains(&"uint(0x5)".to_string()));
    assert!(b.contains(&"uint(0xc)".to_string()));
}

#[test]
fn bit_fields_little_endian_straddling() {
    let trace = payload_trace(strukt([
        ("a", fl_uint(1, 4, ByteOrder::Little)),
        ("b", fl_uint(1, 32, ByteOrder::Little)),
        ("c", fl_uint(1, 4, ByteOrder::Little)),
    ]));
    let proc = build_pkt_proc(&trace);
    let expected = ["uint(0x1)", "uint(0x98765432)", "uint(0xa)"];

    let els = drive(&proc, &[b"\x21\x43\x65\x87\xa9"]).unwrap();
    let b = briefs(&els);
    expected
        .iter()
        .for_each(|e| assert!(b.contains(&e.to_string())));

    // the same field values must decode from single-byte feeds
    let els = drive(&proc, &[b"\x21", b"\x43", b"\x65", b"\x87", b"\xa9"]).unwrap();
    let b = briefs(&els);
    expected
        .iter()
        .for_each(|e| assert!(b.contains(&e.to_string())));
}

#[test]
fn wide_field_across_feeds() {
    let trace = payload_trace(strukt([("x", fl_uint(8, 64, ByteOrder::Big))]));
    let proc = build_pkt_proc(&trace);
    let chunks: [&'static [u8]; 8] = [
        b"\x01", b"\x02", b"\x03", b"\x04", b"\x05", b"\x06", b"\x07", b"\x08",
    ];
    let els = drive(&proc, &chunks).unwrap();
    assert!(briefs(&els).contains(&"uint(0x102030405060708)".to_string()));
}

#[test]
fn struct_member_alignment_padding() {
    let trace = payload_trace(strukt([
        ("a", u8t()),
        ("b", fl_uint(32, 32, ByteOrder::Little)),
    ]));
    let proc = build_pkt_proc(&trace);
    let els = drive(&proc, &[b"\x01\xff\xff\xff\x44\x33\x22\x11"]).unwrap();
    let b = briefs(&els);
    assert!(b.contains(&"uint(0x1)".to_string()));
    assert!(b.contains(&"uint(0x11223344)".to_string()));
}

#[test]
fn signed_and_float_fields() {
    let trace = payload_trace(strukt([
        (
            "s",
            DataType::FlSInt(FlSIntType {
                align: 8,
                len: 8,
                bo: ByteOrder::Little,
                has_encoding: false,
            }),
        ),
        (
            "f",
            DataType::FlFloat(FlFloatType {
                align: 32,
                len: 32,
                bo: ByteOrder::Little,
            }),
        ),
    ]));
    let proc = build_pkt_proc(&trace);
    // -1, then 1.5f32 (0x3FC00000), with 3 bytes of alignment padding
    let els = drive(&proc, &[b"\xff\x00\x00\x00\x00\x00\xc0\x3f"]).unwrap();
    let b = briefs(&els);
    assert!(b.contains(&"sint(-1)".to_string()));
    assert!(b.contains(&"float(1.5)".to_string()));
}

/// A packet exercising strings, variable-length integers, dynamic arrays
/// and trailing fields at once
fn composite_trace() -> TraceType {
    let mut trace = payload_trace(strukt([
        ("name", DataType::NtStr(NtStrType::default())),
        ("n", DataType::VlUInt(VlUIntType::default())),
        (
            "arr",
            DataType::DlArray(DlArrayType {
                len_loc: DataLocation::abs(Scope::PacketContext, ["len"]),
                elem: fl_uint(16, 16, ByteOrder::Big).into(),
            }),
        ),
        ("tail", u8t()),
    ]));
    trace.dsts[0].pkt_ctx = Some(strukt([("len", u8t())]));
    trace
}

// the payload scope is 16-bit aligned (the array element alignment), so
// one padding byte follows the packet context
const COMPOSITE_BYTES: &[u8] = b"\x02\x00hi\x00\xe5\x8e\x26\x00\x01\x00\x02\xff";

#[test]
fn incremental_feed_is_split_invariant() {
    let trace = composite_trace();
    let proc = build_pkt_proc(&trace);

    let reference = briefs(&drive(&proc, &[COMPOSITE_BYTES]).unwrap());
    assert!(reference.contains(&"substr(hi)".to_string()));
    assert!(reference.contains(&"vl-uint(0x98765)".to_string()));
    assert!(reference.contains(&"dl-array(2)".to_string()));

    // a leading empty chunk would mark the end of the stream, so split
    // points start at one
    for split in 1..=COMPOSITE_BYTES.len() {
        let chunks = [&COMPOSITE_BYTES[..split], &COMPOSITE_BYTES[split..]];
        let els = drive(&proc, &chunks).unwrap();
        assert_eq!(briefs(&els), reference, "split at byte {split}");
    }

    let single_bytes: Vec<&'static [u8]> = (0..COMPOSITE_BYTES.len())
        .map(|i| &COMPOSITE_BYTES[i..i + 1])
        .collect();
    let els = drive(&proc, &single_bytes).unwrap();
    assert_eq!(briefs(&els), reference);
}

#[test]
fn begin_end_elements_balance() {
    let trace = composite_trace();
    let proc = build_pkt_proc(&trace);
    let els = drive(&proc, &[COMPOSITE_BYTES]).unwrap();

    let mut depth = 0usize;
    for el in &els {
        if el.is_begin() {
            depth += 1;
        } else if el.is_end() {
            depth = depth.checked_sub(1).expect("balanced ends");
        }
    }
    assert_eq!(depth, 0);
}

#[test]
fn reset_recovers_after_error() {
    let trace = magic_trace();
    let proc = build_pkt_proc(&trace);
    let mut vm = Vm::new(&proc);

    vm.feed(b"\x00\x00\x00\x00");
    let err = loop {
        match vm.next() {
            Ok(_) => (),
            Err(err) => break err,
        }
    };
    assert!(matches!(err.kind(), ErrorKind::MagicMismatch { .. }));

    vm.reset();
    vm.feed(b"\xc1\xfc\x1f\xc1");
    let mut seen_magic = false;
    loop {
        match vm.next().unwrap() {
            Status::Element(Element::PktMagicNumber(_)) => seen_magic = true,
            Status::Element(_) => (),
            Status::NeedMoreData => vm.feed(&[]),
            Status::End => break,
        }
    }
    assert!(seen_magic);
}

#[test]
fn end_of_stream_mid_field() {
    let trace = payload_trace(strukt([("x", fl_uint(8, 32, ByteOrder::Big))]));
    let proc = build_pkt_proc(&trace);
    let err = drive(&proc, &[b"\x01\x02"]).unwrap_err();
    assert_eq!(err.kind(), &ErrorKind::EndOfStream);
}

#[test]
fn empty_stream_ends_immediately() {
    let trace = TraceType::default();
    let proc = build_pkt_proc(&trace);
    let els = drive(&proc, &[]).unwrap();
    assert!(els.is_empty());
}
