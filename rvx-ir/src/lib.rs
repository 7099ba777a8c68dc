//! Typed SSA intermediate representation of the RVX binary translator.
//!
//! The IR models a guest program as basic blocks of single-assignment
//! variables. Loads and stores are serialized through a memory-token chain,
//! guest registers travel between blocks through static mappers, and every
//! block ends in one or more control-flow operations.

mod block;
mod cfop;
mod eval;
mod ir;
mod op;
pub mod optimizer;
mod types;
mod value;
pub mod verify;

pub use block::{BasicBlock, BlockGenInfo, InputLoc};
pub use cfop::{CfInfo, CfLifterInfo, CfOp, CmpKind};
pub use eval::{
    eval_binary_op, eval_div, eval_morphing_op, eval_unary_op, typed_equal, typed_narrow,
    typed_sext,
};
pub use ir::{Ir, StaticMapper, FP_START_IDX, MAPPED_STATICS, MEM_IDX, STATIC_COUNT, ZERO_IDX};
pub use op::{OpKind, Operation, Rounding, RoundingMode};
pub use types::Type;
pub use value::{
    BlockId, GenInfo, Imm, LifterInfo, Location, SsaVar, StaticId, VarId, VarInfo,
};
