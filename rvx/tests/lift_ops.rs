//! Per-opcode lifting contracts: the exact operation chains behind the
//! instruction families.

mod common;

use common::*;
use rvx::lifter::Lifter;
use rvx::Config;
use rvx_ir::{BasicBlock, Ir, OpKind, VarId};

fn lift(words: &[u32]) -> Ir {
    let prog = GuestBuilder::new().insts(words).build();
    let mut ir = Ir::new();
    let config = Config::default();
    let mut lifter = Lifter::new(&mut ir, &config);
    lifter.lift(&prog).expect("lifting failed");
    rvx_ir::verify::assert_valid(&ir);
    ir
}

fn code_block(ir: &Ir) -> &BasicBlock {
    ir.block(ir.block_starting_at(BASE).expect("no block at the entry"))
}

fn ops_of(block: &BasicBlock) -> Vec<OpKind> {
    block
        .order
        .iter()
        .filter_map(|&v| block.var(v).op().map(|o| o.kind))
        .collect()
}

fn producer(block: &BasicBlock, v: VarId) -> OpKind {
    block.var(v).op().expect("expected an operation").kind
}

/// 32-bit arithmetic narrows, operates, and sign-extends back to 64 bits.
#[test]
fn addw_sign_extends_its_result() {
    // addw a2, a0, a1 : 0x00b5_063b
    let ir = lift(&[0x00b5_063b, jalr(0, 1, 0)]);
    let block = code_block(&ir);

    let ops = ops_of(block);
    let add_pos = ops.iter().position(|&k| k == OpKind::Add).expect("no add");
    assert_eq!(ops[add_pos + 1], OpKind::SignExtend);

    // the value bound to a2 is the extension, typed i64
    let a2 = block
        .order
        .iter()
        .rev()
        .find(|&&v| block.var(v).lifter.static_id == Some(rvx_ir::StaticId(12)))
        .copied()
        .unwrap();
    assert_eq!(producer(block, a2), OpKind::SignExtend);
    assert_eq!(block.var(a2).ty, rvx_ir::Type::I64);
}

/// Register shifts mask the count before shifting.
#[test]
fn sll_masks_the_shift_amount() {
    // sll a0, a0, a1 : 0x00b5_1533
    let ir = lift(&[0x00b5_1533, jalr(0, 1, 0)]);
    let block = code_block(&ir);
    let ops = ops_of(block);
    let shl_pos = ops.iter().position(|&k| k == OpKind::Shl).expect("no shl");
    assert!(ops[..shl_pos].contains(&OpKind::And), "missing the 0x3f mask");

    let mask_imm = block.order.iter().any(|&v| {
        block.var(v).imm().map_or(false, |i| i.val == 0x3f)
    });
    assert!(mask_imm);
}

#[test]
fn slt_selects_one_or_zero() {
    // slt a0, a0, a1 : 0x00b5_2533
    let ir = lift(&[0x00b5_2533, jalr(0, 1, 0)]);
    let block = code_block(&ir);
    let slt = block
        .order
        .iter()
        .find(|&&v| block.var(v).op().map(|o| o.kind) == Some(OpKind::Slt))
        .copied()
        .expect("no slt");
    let op = block.var(slt).op().unwrap();
    let v1 = block.var(op.inputs[2].unwrap()).imm().unwrap();
    let v2 = block.var(op.inputs[3].unwrap()).imm().unwrap();
    assert_eq!((v1.val, v2.val), (1, 0));
}

#[test]
fn auipc_is_base_relative() {
    // auipc a0, 0x1 at BASE
    let ir = lift(&[0x0000_1517, jalr(0, 1, 0)]);
    let block = code_block(&ir);
    let add = block
        .order
        .iter()
        .find(|&&v| block.var(v).op().map(|o| o.kind) == Some(OpKind::Add))
        .copied()
        .expect("no add");
    let op = block.var(add).op().unwrap();
    let ip = block.var(op.inputs[0].unwrap()).imm().unwrap();
    assert!(ip.binary_relative, "the instruction address must be base-relative");
    // relativized against the load base in the post-pass
    assert_eq!(ip.val, 0);
    let off = block.var(op.inputs[1].unwrap()).imm().unwrap();
    assert_eq!(off.val, 0x1000);
}

/// Sub-word loads extend; byte loads zero- or sign-extend by opcode.
#[test]
fn narrow_loads_extend_to_64_bits() {
    // lb a1, 0(a0): 0x0005_0583 ; lbu a2, 0(a0): 0x0005_4603
    let ir = lift(&[0x0005_0583, 0x0005_4603, jalr(0, 1, 0)]);
    let block = code_block(&ir);
    let ops = ops_of(block);
    assert!(ops.contains(&OpKind::SignExtend));
    assert!(ops.contains(&OpKind::ZeroExtend));
    assert_eq!(ops.iter().filter(|&&k| k == OpKind::Load).count(), 2);
}

/// Sub-word stores narrow the value with a cast first.
#[test]
fn narrow_stores_cast_the_value() {
    // sb a1, 0(a0): 0x00b5_0023
    let ir = lift(&[0x00b5_0023, jalr(0, 1, 0)]);
    let block = code_block(&ir);
    let store = block
        .order
        .iter()
        .find(|&&v| block.var(v).op().map(|o| o.kind) == Some(OpKind::Store))
        .copied()
        .expect("no store");
    let op = block.var(store).op().unwrap();
    assert_eq!(op.access_type, Some(rvx_ir::Type::I8));
    assert_eq!(producer(block, op.inputs[1].unwrap()), OpKind::Cast);
}

/// Sign injection is pure bit surgery.
#[test]
fn fsgnj_lowers_to_bitwise_ops() {
    // fsgnjn.d fa0, fa1, fa2 : 0x22c5_9553
    let ir = lift(&[0x22c5_9553, jalr(0, 1, 0)]);
    let block = code_block(&ir);
    let ops = ops_of(block);
    assert!(ops.contains(&OpKind::And));
    assert!(ops.contains(&OpKind::Xor));
    assert!(ops.contains(&OpKind::Or));
    assert!(!ops.contains(&OpKind::Fmul));
}

/// The remainder forms populate the second divider output.
#[test]
fn rem_uses_the_remainder_slot() {
    // rem a0, a0, a1 : 0x02b5_6533
    let ir = lift(&[0x02b5_6533, jalr(0, 1, 0)]);
    let block = code_block(&ir);
    let div = block
        .order
        .iter()
        .find(|&&v| block.var(v).op().map(|o| o.kind) == Some(OpKind::Div))
        .copied()
        .expect("no div");
    let op = block.var(div).op().unwrap();
    assert!(op.outputs[0].is_none());
    assert_eq!(op.outputs[1], Some(div));
}

/// Atomic add lowers to load, add, store on one token chain.
#[test]
fn amoadd_is_load_op_store() {
    // amoadd.w a2, a1, (a0) : 0x00b5_262f
    let ir = lift(&[0x00b5_262f, jalr(0, 1, 0)]);
    let block = code_block(&ir);
    let ops = ops_of(block);
    let load = ops.iter().position(|&k| k == OpKind::Load).expect("no load");
    let store = ops.iter().position(|&k| k == OpKind::Store).expect("no store");
    // the combining add sits between the load and the store (address
    // computations contribute their own adds around them)
    let add_between = ops[load..store].contains(&OpKind::Add);
    assert!(load < store && add_between);
}
