//! # Opcode Identity & Stream Decoding
//!
//! The payload ships its program as two artifacts inside ordinary-looking
//! script text:
//!
//! 1. a **compressed opcode stream** — a base64 blob plus a sparse insertion
//!    vector of `(position, value)` pairs spliced in during decode, and
//! 2. a **dispatch table** — an array of handler functions whose order is
//!    freshly shuffled on every delivery.
//!
//! This module owns both ends of that scheme. [`Op`] names the 58 canonical
//! operations in the fixed fingerprint order; [`OP_FEATS`] holds the MD5
//! digest of each reference handler's canonical syntax (see
//! [`crate::stxhash`]), which is how a shuffled local table is mapped back
//! onto [`Op`]s. [`decode_opcodes`] reverses the stream compression.
//!
//! ## Decoded stream format
//! The stream is a sequence of *integers*, not bytes: spliced-in values can
//! exceed 255 (jump targets, wide immediates). Positions index the output
//! sequence, so each insertion shifts everything after it.
//!
//! [`ChaosStack`] bundles the decoded stream with the recovered opcode map
//! and entry program counter; calling it spins up a fresh VM against a
//! window, mirroring how the payload's own stack object is invoked.

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine as _;
use once_cell::sync::Lazy;
use std::rc::Rc;

use crate::error::VmError;
use crate::value::{ObjRef, Value};

/// The 58 canonical operations, in fingerprint-table order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op {
    Getattr,
    Inst,
    Stepout,
    Geq,
    Copy,
    Inv,
    ArrPopleft,
    Grwinattr,
    Zstr,
    Clear,
    Eq,
    VmFactory,
    Assign,
    Typeof,
    Outcall,
    New,
    InstArr,
    Stop,
    Swap,
    CheckErr,
    Throw,
    Contains,
    Setattr,
    Add,
    N2list,
    Chobj,
    Getobj,
    Refeq,
    Stepin,
    Group,
    Wincall,
    Drop,
    Undefined,
    Jump,
    Mul,
    Je,
    Ge,
    Rshift,
    Mod,
    Delattr,
    False,
    GetGlobal,
    Bitor,
    Sub,
    Xor,
    Grobj,
    NewAttr,
    True,
    Getobj2,
    Bitand,
    Urshift,
    Realloc,
    Tolist,
    Div,
    Grgetattr,
    Lshift,
    Null,
    Concat,
}

impl Op {
    /// All operations in canonical order; `ALL[i]` is the operation whose
    /// reference fingerprint is `OP_FEATS[i]`.
    pub const ALL: [Op; 58] = [
        Op::Getattr,
        Op::Inst,
        Op::Stepout,
        Op::Geq,
        Op::Copy,
        Op::Inv,
        Op::ArrPopleft,
        Op::Grwinattr,
        Op::Zstr,
        Op::Clear,
        Op::Eq,
        Op::VmFactory,
        Op::Assign,
        Op::Typeof,
        Op::Outcall,
        Op::New,
        Op::InstArr,
        Op::Stop,
        Op::Swap,
        Op::CheckErr,
        Op::Throw,
        Op::Contains,
        Op::Setattr,
        Op::Add,
        Op::N2list,
        Op::Chobj,
        Op::Getobj,
        Op::Refeq,
        Op::Stepin,
        Op::Group,
        Op::Wincall,
        Op::Drop,
        Op::Undefined,
        Op::Jump,
        Op::Mul,
        Op::Je,
        Op::Ge,
        Op::Rshift,
        Op::Mod,
        Op::Delattr,
        Op::False,
        Op::GetGlobal,
        Op::Bitor,
        Op::Sub,
        Op::Xor,
        Op::Grobj,
        Op::NewAttr,
        Op::True,
        Op::Getobj2,
        Op::Bitand,
        Op::Urshift,
        Op::Realloc,
        Op::Tolist,
        Op::Div,
        Op::Grgetattr,
        Op::Lshift,
        Op::Null,
        Op::Concat,
    ];
}

/// MD5 fingerprints of the reference handlers' canonical syntax, one per
/// [`Op::ALL`] entry. Reproduced verbatim; regenerating them requires a
/// reference payload and the exact canonicalizer in [`crate::stxhash`].
#[rustfmt::skip]
pub const OP_FEATS: [&str; 58] = [
    "5ceb04a17d2ccd243a3cd8d43d58412f", "2c64a078cb8c4b856fdc70a609852c84",
    "22baa62b15474dc170105ea16907be4f", "a0d2ef60799df6195af8233faf1d4405",
    "821662fd6eed2bc7baf4ec9cf305ed3d", "86bfa469c728aef498dc0b31acca50d5",
    "a171259d3583f1d528c527cca37181c6", "2e457be74b78687bda17467657427c44",
    "36daeb76f0369182d47bc0854cd62f3e", "7861d746f3115dc52985788bad85f9f4",
    "d5582f0d77825e3dd4b5de1b58c4367c", "cad016c2b4b99c28c26ab19975ee0ed9",
    "85aeeab3938f54b19b45f3e95802c185", "46be5ad0b74da7c1025e229ee1b86443",
    "ba98404956c3877209b59858a84090e9", "f117180b06547c4efbcb2bd2b2164849",
    "19d1047281ae4901d0e08885458ceb5a", "e6803eb42dc05fc3e04283902865287c",
    "0f935762ce5225379c0f4b8b20698026", "854175af0e5ea31a14afd3b34a8faa80",
    "2732918292df330ac7462015dff8969c", "d378d1594b18890e237b5d472818e309",
    "26df6ca6775d9d0d1b524e4fe7ef1d51", "35bbb1a74b0380e46a199abe999bf303",
    "a8ed98953190027b3dad5ccb0f3f73be", "c2b8e8732ecf925e116f1017a4fcfebf",
    "acaa0c50323b6fd6e8b9b9395f4ad30b", "9557e2616caac44899f6612e32fa5cd2",
    "9a3f40351dbad181dc027c596f23df4c", "021111bd795ea2b9b7e44275fcda3fe5",
    "728702d0440f2d3a5c425d736fd6b2a6", "dacd0c2abe15333ad9d5aaf9e550da71",
    "7211294be669b58b0f3da4940a35dcce", "d8b6e1a347e3a17c7719e92a799a0820",
    "a14cc4c1bd40951d1052c2c4c8353d13", "18f2d14a9d67ef3504777a3be8ff7532",
    "ac70343d82c97644522ed31a98649989", "e41fa5e46c2d94d4d7b54437e71f5862",
    "9c7676e1872be2fb9bf02aaefa78e066", "a9e27183565a9854cf6e593b2572beec",
    "4509710e44dc7c0bae5b39ee74b188c5", "57270c2716f715468eaf0429965cf123",
    "61663d46238a47351f4ff7e24326360c", "3b20fb198a1f87da243bf27aadb19805",
    "9c28d03d5a01e0360e830168b47ec0da", "2d1bb184a9a54c223b38ac23340bdd23",
    "1691f2ef2945d750f686ceefda8ee5be", "a7c235198def717b198ceb39d993ede9",
    "80db3dff6284dfb62b88c7629af22afd", "d2d4c0d054580286a463d79d0881644a",
    "e66f61b8e3792cb44c2ae0be71173d45", "0bbd3879b0867fa76722b7ca001cb338",
    "96d30e9496fccd6a9ddcf45a35316e45", "af29f37ff067adb9398e5b9b42b8f7b7",
    "50cd82d43ac8eaa4ff4017509272f65b", "c00fc6652cacebbf04dc3958a058150c",
    "2598bc9255deafbb48adf287d5d3b12a", "13274e03e106918b096bc5fd4c5423ba",
];

static FEAT_INDEX: Lazy<HashMap<&'static str, Op>> = Lazy::new(|| {
    OP_FEATS
        .iter()
        .zip(Op::ALL.iter())
        .map(|(feat, op)| (*feat, *op))
        .collect()
});

/// Look up the canonical operation for a handler fingerprint.
pub fn op_for_fingerprint(md5_hex: &str) -> Option<Op> {
    FEAT_INDEX.get(md5_hex).copied()
}

/// Mapping from a payload's local opcode byte to its canonical operation.
pub type OpMap = HashMap<i64, Op>;

/// Decode the payload's compressed opcode representation.
///
/// `b64` is the raw byte stream; `insertions` is consumed pairwise as
/// `(position, value)`, where positions index the *output* sequence. The
/// walk emits pending insertions before each source byte and drains the
/// remainder after the source is exhausted. Insertion values are kept as
/// full integers since jump targets routinely exceed one byte.
pub fn decode_opcodes(b64: &str, insertions: &[i64]) -> Result<Vec<i64>, VmError> {
    let data = STANDARD_NO_PAD
        .decode(b64.trim_end_matches('='))
        .map_err(|e| VmError::Parse(format!("opcode stream is not base64: {}", e)))?;

    // Two never-matching sentinels let the loop run without an emptiness
    // check, matching the reference decoder.
    const NEVER: i64 = i64::MIN;
    let mut pairs = insertions.iter().copied().chain([NEVER, NEVER]);
    let mut next = || (pairs.next().unwrap_or(NEVER), pairs.next().unwrap_or(NEVER));

    let mut out: Vec<i64> = Vec::with_capacity(data.len() + insertions.len() / 2);
    let mut k: i64 = 0;
    let (mut pos, mut val) = next();

    for byte in data {
        while k == pos {
            out.push(val);
            k += 1;
            (pos, val) = next();
        }
        out.push(byte as i64);
        k += 1;
    }
    while k == pos {
        out.push(val);
        k += 1;
        (pos, val) = next();
    }

    Ok(out)
}

/// A parsed payload program: the decoded opcode stream, the recovered
/// local-to-canonical opcode map, and the entry program counter.
///
/// Calling [`ChaosStack::run`] constructs a fresh VM instance each time and
/// runs it to completion, leaving whatever the payload built (typically the
/// `TDC` object) on the supplied window.
#[derive(Debug)]
pub struct ChaosStack {
    pub opmap: Rc<OpMap>,
    pub opcode: Rc<Vec<i64>>,
    pub pc_start: usize,
}

impl ChaosStack {
    pub fn new(opmap: OpMap, opcode: Vec<i64>, pc_start: usize) -> Self {
        ChaosStack {
            opmap: Rc::new(opmap),
            opcode: Rc::new(opcode),
            pc_start,
        }
    }

    /// Run the program against `window`. Returns the outermost invocation's
    /// result (the stack tail); callers usually ignore it and read
    /// `window.TDC` instead.
    pub fn run(&self, window: &ObjRef) -> Result<Value, VmError> {
        crate::vm::Vm::outer(
            self.pc_start,
            Rc::clone(&self.opcode),
            Rc::clone(&self.opmap),
            Rc::clone(window),
        )
        .run()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD;

    fn b64(bytes: &[u8]) -> String {
        STANDARD.encode(bytes)
    }

    #[test]
    fn decode_without_insertions_is_identity() {
        let s = b64(&[1, 2, 3, 250]);
        assert_eq!(decode_opcodes(&s, &[]).unwrap(), vec![1, 2, 3, 250]);
    }

    #[test]
    fn decode_splices_at_head_middle_and_tail() {
        let s = b64(&[10, 20]);
        // head
        assert_eq!(decode_opcodes(&s, &[0, 99]).unwrap(), vec![99, 10, 20]);
        // middle
        assert_eq!(decode_opcodes(&s, &[1, 99]).unwrap(), vec![10, 99, 20]);
        // tail, past the end of the byte sequence
        assert_eq!(decode_opcodes(&s, &[2, 99]).unwrap(), vec![10, 20, 99]);
    }

    #[test]
    fn decode_handles_consecutive_insertions_and_wide_values() {
        let s = b64(&[7]);
        assert_eq!(
            decode_opcodes(&s, &[0, 300, 1, 70000]).unwrap(),
            vec![300, 70000, 7]
        );
    }

    #[test]
    fn decode_tolerates_stripped_padding() {
        let s = STANDARD.encode([1u8, 2]);
        assert!(s.ends_with('='));
        assert_eq!(decode_opcodes(&s, &[]).unwrap(), vec![1, 2]);
    }

    #[test]
    fn fingerprint_table_is_complete_and_unique() {
        assert_eq!(OP_FEATS.len(), 58);
        let set: std::collections::HashSet<_> = OP_FEATS.iter().collect();
        assert_eq!(set.len(), 58);
        assert_eq!(op_for_fingerprint(OP_FEATS[0]), Some(Op::Getattr));
        assert_eq!(op_for_fingerprint(OP_FEATS[57]), Some(Op::Concat));
        assert_eq!(op_for_fingerprint("ffffffffffffffffffffffffffffffff"), None);
    }
}
