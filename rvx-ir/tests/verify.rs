//! The verifier must reject structurally broken IR: the pipeline relies on
//! it to turn subtle corruption into loud failures.

use rvx_ir::{
    verify::{verify, VerifierError},
    CfInfo, Ir, OpKind, Operation, StaticId, Type,
};

fn has<F: Fn(&VerifierError) -> bool>(errors: &[VerifierError], pred: F) -> bool {
    errors.iter().any(pred)
}

#[test]
fn accepts_a_well_formed_block() {
    let mut ir = Ir::new();
    ir.install_guest_statics();
    let b = ir.add_basic_block(0x100, "");
    let x = ir.add_var_from_static(b, StaticId(5), 0x100);
    let bb = ir.block_mut(b);
    let one = bb.new_imm(1, 0x100, false);
    let sum = bb.emit(Type::I64, 0x100, OpKind::Add, &[x, one]);
    let cf = bb.push_cf_op(CfInfo::Return { mapping: vec![] }, 0x100, 0);
    bb.add_cf_target_input(cf, sum, StaticId(5));
    assert!(verify(&ir).is_ok());
}

#[test]
fn rejects_use_before_definition() {
    let mut ir = Ir::new();
    let b = ir.add_basic_block(0x100, "");
    let bb = ir.block_mut(b);
    let one = bb.new_imm(1, 0x100, false);
    let sum = bb.emit(Type::I64, 0x100, OpKind::Add, &[one, one]);
    bb.push_cf_op(CfInfo::Unreachable, 0x100, 0);
    // move the consumer in front of its operand
    bb.order.swap(0, 1);
    let _ = sum;

    let errors = verify(&ir).unwrap_err();
    assert!(has(&errors, |e| matches!(e, VerifierError::UseBeforeDef { .. })));
}

#[test]
fn rejects_reference_count_drift() {
    let mut ir = Ir::new();
    let b = ir.add_basic_block(0x100, "");
    let bb = ir.block_mut(b);
    let one = bb.new_imm(1, 0x100, false);
    bb.emit(Type::I64, 0x100, OpKind::Not, &[one]);
    bb.push_cf_op(CfInfo::Unreachable, 0x100, 0);
    bb.inc_ref(one); // stray owner

    let errors = verify(&ir).unwrap_err();
    assert!(has(&errors, |e| matches!(e, VerifierError::RefCountMismatch { .. })));
}

#[test]
fn rejects_target_input_arity_mismatch() {
    let mut ir = Ir::new();
    ir.install_guest_statics();
    let b = ir.add_basic_block(0x100, "");
    let b2 = ir.add_basic_block(0x200, "");
    ir.add_var_from_static(b2, StaticId(5), 0x200);
    ir.add_var_from_static(b2, StaticId(6), 0x200);
    ir.block_mut(b2).push_cf_op(CfInfo::Unreachable, 0x200, 0);

    let x = ir.add_var_from_static(b, StaticId(5), 0x100);
    let cf = ir.add_cf_op(
        b,
        CfInfo::Jump { target: Some(b2), target_inputs: vec![] },
        0x100,
        0x200,
    );
    // only one of the two expected inputs
    ir.block_mut(b).add_cf_target_input(cf, x, StaticId(5));

    let errors = verify(&ir).unwrap_err();
    assert!(has(&errors, |e| matches!(e, VerifierError::TargetInputArity { .. })));
}

#[test]
fn rejects_missing_graph_edges() {
    let mut ir = Ir::new();
    ir.install_guest_statics();
    let b = ir.add_basic_block(0x100, "");
    let b2 = ir.add_basic_block(0x200, "");
    ir.block_mut(b2).push_cf_op(CfInfo::Unreachable, 0x200, 0);
    let cf = ir.add_cf_op(
        b,
        CfInfo::Jump { target: Some(b2), target_inputs: vec![] },
        0x100,
        0x200,
    );
    let _ = cf;
    // corrupt the predecessor list
    ir.block_mut(b2).predecessors.clear();

    let errors = verify(&ir).unwrap_err();
    assert!(has(&errors, |e| matches!(e, VerifierError::GraphEdgeMissing { .. })));
}

#[test]
fn rejects_shared_memory_tokens() {
    let mut ir = Ir::new();
    ir.install_guest_statics();
    let b = ir.add_basic_block(0x100, "");
    let mt = ir.add_var_from_static(b, rvx_ir::MEM_IDX, 0x100);
    let bb = ir.block_mut(b);
    let addr = bb.new_imm(0x1000, 0x100, false);

    // two loads off the same token
    for _ in 0..2 {
        let dst = bb.new_var(Type::I64, 0x100);
        bb.attach_op(dst, Operation::with_inputs(OpKind::Load, &[addr, mt]));
    }
    bb.push_cf_op(CfInfo::Unreachable, 0x100, 0);

    let errors = verify(&ir).unwrap_err();
    assert!(has(&errors, |e| matches!(e, VerifierError::MemoryTokenShared { .. })));
}

#[test]
fn rejects_backwards_morphs() {
    let mut ir = Ir::new();
    let b = ir.add_basic_block(0x100, "");
    let bb = ir.block_mut(b);
    let wide = bb.new_var(Type::I64, 0x100);
    bb.attach_op(wide, Operation::with_inputs(OpKind::SetupStack, &[]));
    // sign_extend must widen; this narrows
    let narrow = bb.new_var(Type::I16, 0x100);
    bb.attach_op(narrow, Operation::with_inputs(OpKind::SignExtend, &[wide]));
    bb.push_cf_op(CfInfo::Unreachable, 0x100, 0);

    let errors = verify(&ir).unwrap_err();
    assert!(has(&errors, |e| matches!(e, VerifierError::MorphDirection { .. })));
}

#[test]
fn rejects_divisions_without_outputs() {
    let mut ir = Ir::new();
    let b = ir.add_basic_block(0x100, "");
    let bb = ir.block_mut(b);
    let a = bb.new_imm(10, 0x100, false);
    let c = bb.new_imm(3, 0x100, false);
    let q = bb.new_var(Type::I64, 0x100);
    let mut op = Operation::with_inputs(OpKind::Div, &[a, c]);
    op.outputs = [Some(q), None, None];
    bb.attach_op(q, op);
    bb.push_cf_op(CfInfo::Unreachable, 0x100, 0);
    assert!(verify(&ir).is_ok());

    // null out the only output behind the verifier's back
    ir.block_mut(b).var_mut(q).op_mut().unwrap().outputs = [None, None, None];
    let errors = verify(&ir).unwrap_err();
    assert!(has(&errors, |e| matches!(e, VerifierError::DivWithoutOutput { .. })));
}
