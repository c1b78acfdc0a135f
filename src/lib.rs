// Copyright (C) 2025 FZI Forschungszentrum Informatik
// SPDX-License-Identifier: Apache-2.0
//! # Decoder for CTF binary packet streams
//!
//! This library decodes [Common Trace Format][ctf] (CTF) binary data
//! streams into an ordered stream of typed decoding
//! [`Element`][element::Element]s, without materialising packets into a
//! tree and with bit-level alignment semantics.
//!
//! Decoding is a two-stage, compile-then-execute pipeline:
//!
//! 1. The [procedure builder][proc::build] lowers a validated
//!    [trace type model][metadata] into a flat
//!    [packet procedure][proc::PktProc], resolving every symbolic data
//!    location (dynamic lengths, variant and optional selectors) to a
//!    saved-value slot index.
//! 2. A [virtual machine][vm::Vm] executes that procedure bit by bit
//!    against caller-fed input buffers, emitting one element per decoded
//!    field or structural boundary.
//!
//! The machine suspends with [`Status::NeedMoreData`][vm::Status] whenever
//! it would read past the current buffer, so input may arrive in chunks of
//! any size; the element sequence is independent of how the input is
//! split. The built procedure is immutable and may be shared between any
//! number of machines decoding independent streams.
//!
//! Parsing the textual metadata into the type model is the job of an
//! external frontend and out of scope here, as are output trees and
//! random access.
//!
//! # Crate features
//!
//! * `serde`: enables (de)serialization of the [`metadata`] type model via
//!   [`serde`]
//!
//! # no_std
//!
//! This crate does not depend on `std` (it requires `alloc`) and is thus
//! suitable for `no_std` environments.
//!
//! # Example
//!
//! The following example decodes a packet consisting of a lone packet
//! header with a magic number field.
//!
//! ```
//! use ctf_stream::metadata::trace::TraceType;
//! use ctf_stream::metadata::types::{DataType, FlUIntType, StructMemberType, StructType};
//! use ctf_stream::metadata::{ByteOrder, UIntRole, UIntRoles};
//! use ctf_stream::proc::build::build_pkt_proc;
//! use ctf_stream::vm::{Status, Vm};
//!
//! let trace = TraceType {
//!     pkt_header: Some(StructType::new([StructMemberType::new(
//!         "magic",
//!         DataType::FlUInt(FlUIntType {
//!             align: 32,
//!             len: 32,
//!             bo: ByteOrder::Big,
//!             has_encoding: false,
//!             roles: UIntRoles::only(UIntRole::PktMagicNumber),
//!         }),
//!     )])),
//!     uuid: None,
//!     dsts: Vec::new(),
//! };
//!
//! let pkt_proc = build_pkt_proc(&trace);
//! let mut vm = Vm::new(&pkt_proc);
//! vm.feed(b"\xc1\xfc\x1f\xc1");
//! loop {
//!     match vm.next().unwrap() {
//!         Status::Element(el) => println!("{el:?}"),
//!         Status::NeedMoreData => vm.feed(&[]),
//!         Status::End => break,
//!     }
//! }
//! ```
//!
//! [ctf]: <https://diamon.org/ctf/>
#![no_std]

extern crate alloc;

pub mod element;
pub mod metadata;
pub mod proc;
pub mod vm;
