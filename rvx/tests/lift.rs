mod common;

use common::*;
use rvx::lifter::Lifter;
use rvx::Config;
use rvx_ir::{optimizer, verify::verify, CfInfo, CmpKind, Ir, OpKind, StaticId, VarInfo};

fn lift(prog: &rvx::loader::Program) -> Ir {
    let mut ir = Ir::new();
    let config = Config::default();
    let mut lifter = Lifter::new(&mut ir, &config);
    lifter.lift(prog).expect("lifting failed");
    ir
}

fn assert_valid(ir: &Ir) {
    if let Err(errors) = verify(ir) {
        for e in &errors {
            eprintln!("{e}");
        }
        panic!("IR verification failed");
    }
}

#[test]
fn lifts_linear_arithmetic() {
    let prog = GuestBuilder::new()
        .insts(&[addi(10, 0, 5), addi(11, 10, 3), jalr(0, 1, 0)])
        .build();
    let ir = lift(&prog);
    assert_valid(&ir);

    // dummy, the code block and the synthetic entry
    let code = ir.block_starting_at(BASE).expect("no block at the entry address");
    let block = ir.block(code);
    assert!(block.var_count() > 64, "expected statics inputs plus lifted values");
    assert!(matches!(block.cf_ops[0].info, CfInfo::IJump { .. }));

    // the entry block sets up the stack and hands over every static
    let entry = ir.entry_block.unwrap();
    let entry_block = ir.block(entry);
    let has_setup = entry_block
        .order
        .iter()
        .any(|&v| matches!(entry_block.var(v).op().map(|o| o.kind), Some(OpKind::SetupStack)));
    assert!(has_setup);
    assert_eq!(entry_block.cf_ops[0].target_input_count(), 64);
}

#[test]
fn addi_from_zero_is_an_immediate() {
    let prog = GuestBuilder::new().insts(&[addi(10, 0, 5), jalr(0, 1, 0)]).build();
    let ir = lift(&prog);
    let code = ir.block_starting_at(BASE).unwrap();
    let block = ir.block(code);
    let imm_of_five = block.order.iter().any(|&v| match &block.var(v).info {
        VarInfo::Imm(imm) => imm.val == 5 && block.var(v).lifter.static_id == Some(StaticId(10)),
        _ => false,
    });
    assert!(imm_of_five, "li must lower to a plain immediate bound to a0");
}

#[test]
fn branch_produces_cjump_and_fallthrough() {
    let prog = GuestBuilder::new()
        .insts(&[beq(10, 11, 8), addi(10, 10, 1), jalr(0, 1, 0)])
        .build();
    let ir = lift(&prog);
    assert_valid(&ir);

    let head = ir.block_starting_at(BASE).unwrap();
    let block = ir.block(head);
    assert_eq!(block.cf_ops.len(), 2);
    assert!(matches!(block.cf_ops[0].info, CfInfo::CJump { cmp: CmpKind::Eq, .. }));
    assert!(matches!(block.cf_ops[1].info, CfInfo::Jump { .. }));

    let taken = ir.block_starting_at(BASE + 8).expect("branch target block missing");
    let fall = ir.block_starting_at(BASE + 4).expect("fall-through block missing");
    assert_eq!(block.cf_ops[0].target(), Some(taken));
    assert_eq!(block.cf_ops[1].target(), Some(fall));
    assert!(ir.block(taken).predecessors.contains(&head));
    assert!(ir.block(fall).predecessors.contains(&head));
}

#[test]
fn backward_branch_splits_the_open_block() {
    let prog = GuestBuilder::new()
        .insts(&[addi(10, 0, 0), addi(10, 10, 1), bne(10, 11, -4), jalr(0, 1, 0)])
        .build();
    let ir = lift(&prog);
    assert_valid(&ir);

    let head = ir.block_starting_at(BASE).expect("first half missing");
    let tail = ir.block_starting_at(BASE + 4).expect("second half missing");

    // the first half ends in exactly the connecting jump
    let head_block = ir.block(head);
    assert_eq!(head_block.cf_ops.len(), 1);
    assert_eq!(head_block.cf_ops[0].target(), Some(tail));

    // the loop edge targets the split-off half
    let tail_block = ir.block(tail);
    assert!(matches!(tail_block.cf_ops[0].info, CfInfo::CJump { .. }));
    assert_eq!(tail_block.cf_ops[0].target(), Some(tail));
    assert!(tail_block.predecessors.contains(&tail));
    assert!(tail_block.predecessors.contains(&head));
}

#[test]
fn ecall_lifts_to_a_syscall() {
    let prog = GuestBuilder::new()
        .insts(&[addi(17, 0, 64), ecall(), jalr(0, 1, 0)])
        .build();
    let ir = lift(&prog);
    assert_valid(&ir);

    let head = ir.block_starting_at(BASE).unwrap();
    let block = ir.block(head);
    match &block.cf_ops[0].info {
        CfInfo::Syscall { continuation, static_mapping, .. } => {
            assert_eq!(static_mapping, &[StaticId(10), StaticId(11)]);
            let cont = continuation.expect("syscall continuation missing");
            assert_eq!(ir.block(cont).virt_start_addr, BASE + 8);
        }
        other => panic!("expected a syscall cf-op, got {other:?}"),
    }
    assert_eq!(block.cf_ops[0].input_vars().count(), 7);
}

#[test]
fn stores_and_loads_share_one_token_chain() {
    let prog = GuestBuilder::new()
        .insts(&[sd(10, 2, 0), ld(11, 2, 0), jalr(0, 1, 0)])
        .build();
    let ir = lift(&prog);
    assert_valid(&ir);

    let block = ir.block(ir.block_starting_at(BASE).unwrap());
    let store = block
        .order
        .iter()
        .find(|&&v| block.var(v).op().map(|o| o.kind) == Some(OpKind::Store))
        .copied()
        .expect("store missing");
    let load = block
        .order
        .iter()
        .find(|&&v| block.var(v).op().map(|o| o.kind) == Some(OpKind::Load))
        .copied()
        .expect("load missing");
    // the load consumes the token the store produced
    assert_eq!(block.var(load).op().unwrap().inputs[1], Some(store));
}

#[test]
fn jal_into_the_link_register_becomes_a_call() {
    let prog = GuestBuilder::new()
        .insts(&[jal(1, 8), addi(10, 10, 1), jalr(0, 1, 0)])
        .build();
    let ir = lift(&prog);
    assert_valid(&ir);

    let head = ir.block_starting_at(BASE).unwrap();
    match &ir.block(head).cf_ops[0].info {
        CfInfo::Call { target, continuation, .. } => {
            let target = target.expect("call target unresolved");
            assert_eq!(ir.block(target).virt_start_addr, BASE + 8);
            let cont = continuation.expect("call continuation unresolved");
            assert_eq!(ir.block(cont).virt_start_addr, BASE + 4);
            assert!(ir.block(cont).gen.call_cont_block);
            assert!(ir.block(target).gen.call_target);
        }
        other => panic!("expected a call cf-op, got {other:?}"),
    }
}

#[test]
fn fp_instructions_lift_and_verify() {
    let prog = GuestBuilder::new()
        .insts(&[
            0x0005_2507, // flw fa0, 0(a0)
            0x02b5_7553, // fadd.d fa0, fa0, fa1
            0xe005_1553, // fclass.s a0, fa0
            0x0005_3587, // fld fa1, 0(a0)
            jalr(0, 1, 0),
        ])
        .build();
    let ir = lift(&prog);
    assert_valid(&ir);
}

#[test]
fn optimizer_keeps_lifted_programs_valid() {
    let prog = GuestBuilder::new()
        .insts(&[
            addi(10, 0, 5),
            addi(10, 10, 0),
            addi(11, 10, 3),
            add(12, 10, 11),
            sub(12, 12, 10),
            mul(13, 12, 11),
            divu(14, 13, 11),
            beq(12, 13, 8),
            addi(10, 10, 1),
            jalr(0, 1, 0),
        ])
        .build();
    let mut ir = lift(&prog);
    assert_valid(&ir);

    // folding may expose new duplicates for the next dedup round, so the
    // pipeline settles within two rounds and is a no-op afterwards
    optimizer::optimize(&mut ir, rvx_ir::optimizer::Passes::all_passes());
    assert_valid(&ir);
    optimizer::optimize(&mut ir, rvx_ir::optimizer::Passes::all_passes());
    assert_valid(&ir);

    let settled = format!("{ir}");
    optimizer::optimize(&mut ir, rvx_ir::optimizer::Passes::all_passes());
    assert_valid(&ir);
    assert_eq!(settled, format!("{ir}"));
}

#[test]
fn undecodable_ranges_become_unreachable_blocks() {
    let prog = GuestBuilder::new()
        .insts(&[addi(10, 0, 1), 0x0000_0000 /* invalid */, addi(10, 10, 1)])
        .build();
    let ir = lift(&prog);
    assert_valid(&ir);
    let head = ir.block_starting_at(BASE).unwrap();
    assert!(ir.block(head).cf_ops[0].is_unreachable());
}
