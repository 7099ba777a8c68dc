//! Generator tests over hand-built IRs: the emitted assembly module must
//! contain the expected lowering for each control-flow kind and the core
//! instruction selections.

use rvx::generator::Generator;
use rvx::{Config, GenFlags};
use rvx_ir::{
    CfInfo, CmpKind, Ir, OpKind, Operation, StaticId, Type, VarId, MEM_IDX,
};

fn compile(ir: &mut Ir, config: &Config) -> String {
    let mut out = Vec::new();
    Generator::new(ir, config, None).compile(&mut out).expect("code generation failed");
    String::from_utf8(out).expect("generator produced non-utf8 output")
}

fn fresh_ir() -> Ir {
    let mut ir = Ir::new();
    ir.install_guest_statics();
    ir.setup_bb_addr_range(0x1000, 0x1100);
    ir
}

#[test]
fn return_block_writes_statics_and_rets() {
    let mut ir = fresh_ir();
    let b = ir.add_basic_block(0x1000, "");
    let bb = ir.block_mut(b);
    let a = bb.new_imm(13, 0x1000, false);
    let c = bb.new_imm(29, 0x1000, false);
    let sum = bb.emit(Type::I64, 0x1000, OpKind::Add, &[a, c]);
    let cf = bb.push_cf_op(CfInfo::Return { mapping: vec![] }, 0x1000, 0);
    bb.add_cf_target_input(cf, sum, StaticId(10));
    ir.entry_block = Some(b);

    let asm = compile(&mut ir, &Config::default());
    assert!(asm.contains("_start:"));
    assert!(asm.contains("call copy_stack"));
    assert!(asm.contains("mov [init_stack_ptr], rax"));
    assert!(asm.contains("mov [s10], "));
    assert!(asm.contains("ret"));
    assert!(asm.contains("ijump_lookup:"));
    assert!(asm.contains("s65: .quad 0"), "the reserved overflow static must exist");
}

#[test]
fn division_uses_the_divider_convention() {
    let mut ir = fresh_ir();
    let b = ir.add_basic_block(0x1000, "");
    let x = ir.add_var_from_static(b, StaticId(5), 0x1000);
    let y = ir.add_var_from_static(b, StaticId(6), 0x1000);
    let bb = ir.block_mut(b);
    let q = bb.new_var(Type::I64, 0x1000);
    let mut op = Operation::with_inputs(OpKind::Div, &[x, y]);
    op.outputs = [Some(q), None, None];
    bb.attach_op(q, op);
    let cf = bb.push_cf_op(CfInfo::Return { mapping: vec![] }, 0x1000, 0);
    bb.add_cf_target_input(cf, q, StaticId(5));
    ir.entry_block = Some(b);

    let asm = compile(&mut ir, &Config::default());
    assert!(asm.contains("cqo"));
    assert!(asm.contains("idiv"));
}

#[test]
fn syscalls_marshal_the_sysv_registers() {
    let mut ir = fresh_ir();
    let b = ir.add_basic_block(0x1000, "");
    let cont = ir.add_basic_block(0x1004, "");
    ir.block_mut(cont).push_cf_op(CfInfo::Unreachable, 0x1004, 0);

    let inputs: Vec<VarId> =
        (0..7).map(|i| ir.block_mut(b).new_imm(i, 0x1000, false)).collect();
    let cf = ir.add_cf_op(
        b,
        CfInfo::Syscall {
            continuation: Some(cont),
            continuation_mapping: vec![],
            static_mapping: vec![StaticId(10), StaticId(11)],
        },
        0x1000,
        0x1004,
    );
    ir.block_mut(b).set_cf_inputs(cf, &inputs);
    ir.entry_block = Some(b);

    let asm = compile(&mut ir, &Config::default());
    assert!(asm.contains("call syscall_impl"));
    assert!(asm.contains("mov [s10], rax"));
    assert!(asm.contains("mov [s11], rdx"));
    assert!(asm.contains(&format!("jmp b{}", cont.0)));
    for reg in ["rdi", "rsi", "rdx", "rcx", "r8", "r9"] {
        assert!(asm.contains(&format!("mov {reg}, ")), "syscall argument {reg} not loaded");
    }
}

#[test]
fn cjump_emits_compare_and_conditional_jump() {
    let mut ir = fresh_ir();
    let b = ir.add_basic_block(0x1000, "");
    let taken = ir.add_basic_block(0x1010, "");
    let fall = ir.add_basic_block(0x1020, "");
    for target in [taken, fall] {
        ir.add_var_from_static(target, StaticId(5), 0x1010);
        ir.block_mut(target).push_cf_op(CfInfo::Return { mapping: vec![] }, 0x1010, 0);
    }

    let x = ir.add_var_from_static(b, StaticId(5), 0x1000);
    let limit = ir.block_mut(b).new_imm(100, 0x1000, false);
    let cj = ir.add_cf_op(
        b,
        CfInfo::CJump { target: Some(taken), target_inputs: vec![], cmp: CmpKind::Slt },
        0x1000,
        0x1010,
    );
    ir.block_mut(b).set_cf_inputs(cj, &[x, limit]);
    ir.block_mut(b).add_cf_target_input(cj, x, StaticId(5));
    let j = ir.add_cf_op(
        b,
        CfInfo::Jump { target: Some(fall), target_inputs: vec![] },
        0x1000,
        0x1020,
    );
    ir.block_mut(b).add_cf_target_input(j, x, StaticId(5));
    ir.entry_block = Some(b);

    let asm = compile(&mut ir, &Config::default());
    assert!(asm.contains("cmp "));
    assert!(asm.contains("jl ") || asm.contains("jge "), "signed branch missing");
}

#[test]
fn address_add_fuses_into_the_load() {
    let mut ir = fresh_ir();
    let b = ir.add_basic_block(0x1000, "");
    let base = ir.add_var_from_static(b, StaticId(5), 0x1000);
    let mt = ir.add_var_from_static(b, MEM_IDX, 0x1000);
    let bb = ir.block_mut(b);
    let off = bb.new_imm(16, 0x1000, false);
    let addr = bb.emit(Type::I64, 0x1000, OpKind::Add, &[base, off]);
    let val = bb.new_var(Type::I64, 0x1000);
    let mut op = Operation::with_inputs(OpKind::Load, &[addr, mt]);
    op.access_type = Some(Type::I64);
    bb.attach_op(val, op);
    let cf = bb.push_cf_op(CfInfo::Return { mapping: vec![] }, 0x1000, 0);
    bb.add_cf_target_input(cf, val, StaticId(5));
    ir.entry_block = Some(b);

    let asm = compile(&mut ir, &Config::default());
    assert!(asm.contains("+ 16]"), "expected a fused address operand:\n{asm}");

    // without fusion the add stays separate
    let mut ir = fresh_ir();
    let b = ir.add_basic_block(0x1000, "");
    let base = ir.add_var_from_static(b, StaticId(5), 0x1000);
    let mt = ir.add_var_from_static(b, MEM_IDX, 0x1000);
    let bb = ir.block_mut(b);
    let off = bb.new_imm(16, 0x1000, false);
    let addr = bb.emit(Type::I64, 0x1000, OpKind::Add, &[base, off]);
    let val = bb.new_var(Type::I64, 0x1000);
    let mut op = Operation::with_inputs(OpKind::Load, &[addr, mt]);
    op.access_type = Some(Type::I64);
    bb.attach_op(val, op);
    let cf = bb.push_cf_op(CfInfo::Return { mapping: vec![] }, 0x1000, 0);
    bb.add_cf_target_input(cf, val, StaticId(5));
    ir.entry_block = Some(b);

    let mut config = Config::default();
    config.gen_flags.remove(GenFlags::MERGE_OP);
    let asm = compile(&mut ir, &config);
    assert!(asm.contains("add "), "unfused form must keep the add:\n{asm}");
}

#[test]
fn unreachable_blocks_panic_with_a_message() {
    let mut ir = fresh_ir();
    let b = ir.add_basic_block(0x1000, "");
    ir.block_mut(b).push_cf_op(CfInfo::Unreachable, 0x1000, 0);
    ir.entry_block = Some(b);

    let asm = compile(&mut ir, &Config::default());
    assert!(asm.contains(&format!("err_unreachable_b{}", b.0)));
    assert!(asm.contains("jmp panic"));
    assert!(asm.contains("Reached unreachable code"));
}

#[test]
fn ijump_dispatches_through_the_lookup_table() {
    let mut ir = fresh_ir();
    let b = ir.add_basic_block(0x1000, "");
    let dest = ir.add_var_from_static(b, StaticId(1), 0x1000);
    let cf = ir.add_cf_op(b, CfInfo::IJump { mapping: vec![], targets: vec![] }, 0x1000, 0);
    ir.block_mut(b).set_cf_inputs(cf, &[dest]);
    ir.entry_block = Some(b);

    let asm = compile(&mut ir, &Config::default());
    assert!(asm.contains("ijump_lookup_end - ijump_lookup"));
    assert!(asm.contains(&format!("err_unresolved_ijump_b{}", b.0)));
    assert!(asm.contains("shr "), "table index must be halved");
}

#[test]
fn chd_lookup_emits_the_hash_table() {
    let mut ir = fresh_ir();
    let b = ir.add_basic_block(0x1000, "");
    let v = ir.add_var_from_static(b, StaticId(5), 0x1000);
    let cf = ir.block_mut(b).push_cf_op(CfInfo::Return { mapping: vec![] }, 0x1000, 0);
    ir.block_mut(b).add_cf_target_input(cf, v, StaticId(5));
    ir.entry_block = Some(b);

    let mut config = Config::default();
    config.gen_flags |= GenFlags::CHD_IJUMP;
    let asm = compile(&mut ir, &config);
    assert!(asm.contains("ijump_hash_table:"));
    assert!(asm.contains("ijump_hash_function_idxs:"));
    assert!(asm.contains("call spookey_hash"));
}

/// In CHD mode every dynamic dispatch site must reach the hash stub; the
/// dense table and its bounds are not emitted at all.
#[test]
fn chd_ijump_dispatches_through_the_stub() {
    let mut ir = fresh_ir();
    let b = ir.add_basic_block(0x1000, "");
    let dest = ir.add_var_from_static(b, StaticId(1), 0x1000);
    let cf = ir.add_cf_op(b, CfInfo::IJump { mapping: vec![], targets: vec![] }, 0x1000, 0);
    ir.block_mut(b).set_cf_inputs(cf, &[dest]);
    ir.entry_block = Some(b);

    let mut config = Config::default();
    config.gen_flags |= GenFlags::CHD_IJUMP;
    let asm = compile(&mut ir, &config);
    assert!(asm.contains("mov rbx, "), "the stub takes the guest address in rbx:\n{asm}");
    assert!(asm.contains("jmp ijump_lookup"), "dispatch must reach the stub:\n{asm}");
    assert!(asm.contains("ijump_lookup:"), "the jump stub must be emitted");
    assert!(asm.contains("jmp [ijump_hash_table + rbx + 8]"));
    assert!(
        !asm.contains("ijump_lookup_end"),
        "the dense table must not be referenced in CHD mode:\n{asm}"
    );
}

#[test]
fn chd_icall_dispatches_through_the_call_stub() {
    let mut ir = fresh_ir();
    let b = ir.add_basic_block(0x1000, "");
    let cont = ir.add_basic_block(0x1004, "");
    ir.block_mut(cont).push_cf_op(CfInfo::Unreachable, 0x1004, 0);

    let dest = ir.add_var_from_static(b, StaticId(1), 0x1000);
    let cf = ir.add_cf_op(
        b,
        CfInfo::ICall { continuation: Some(cont), mapping: vec![], targets: vec![] },
        0x1000,
        0,
    );
    ir.block_mut(b).set_cf_inputs(cf, &[dest]);
    ir.entry_block = Some(b);

    let mut config = Config::default();
    config.gen_flags |= GenFlags::CHD_IJUMP;
    let asm = compile(&mut ir, &config);
    assert!(asm.contains("call icall_lookup"), "icall must reach the call stub:\n{asm}");
    assert!(asm.contains("icall_lookup:"), "the call stub must be emitted");
    assert!(asm.contains("call [ijump_hash_table + rbx + 8]"));
    assert!(asm.contains(&format!("jmp b{}", cont.0)), "continuation after the call");
    assert!(!asm.contains("ijump_lookup_end"));
}

#[test]
fn bmi2_shifts_use_shlx() {
    let mut ir = fresh_ir();
    let b = ir.add_basic_block(0x1000, "");
    let x = ir.add_var_from_static(b, StaticId(5), 0x1000);
    let n = ir.add_var_from_static(b, StaticId(6), 0x1000);
    let bb = ir.block_mut(b);
    let shifted = bb.emit(Type::I64, 0x1000, OpKind::Shl, &[x, n]);
    let cf = bb.push_cf_op(CfInfo::Return { mapping: vec![] }, 0x1000, 0);
    bb.add_cf_target_input(cf, shifted, StaticId(5));
    ir.entry_block = Some(b);

    let mut config = Config::default();
    config.gen_flags |= GenFlags::ARCH_BMI2;
    let asm = compile(&mut ir, &config);
    assert!(asm.contains("shlx "));

    // without BMI2 the count travels through cl
    let mut ir = fresh_ir();
    let b = ir.add_basic_block(0x1000, "");
    let x = ir.add_var_from_static(b, StaticId(5), 0x1000);
    let n = ir.add_var_from_static(b, StaticId(6), 0x1000);
    let bb = ir.block_mut(b);
    let shifted = bb.emit(Type::I64, 0x1000, OpKind::Shl, &[x, n]);
    let cf = bb.push_cf_op(CfInfo::Return { mapping: vec![] }, 0x1000, 0);
    bb.add_cf_target_input(cf, shifted, StaticId(5));
    ir.entry_block = Some(b);

    let asm = compile(&mut ir, &Config::default());
    assert!(asm.contains("shl "));
    assert!(asm.contains(", cl"));
}
