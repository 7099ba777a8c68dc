//! RV64 guest instruction model of the RVX binary translator.
//!
//! Covers the base integer set plus the M, A, F, D and Zicsr extensions.
//! Compressed encodings are not part of the supported set; they decode as
//! undecodable two-byte ranges which the lifter marks unreachable.

mod decode;
mod mnemonic;
pub mod reg;

pub use decode::{decode, DecodedInst, Decoder, Rv64Decoder};
pub use mnemonic::Mnem;
