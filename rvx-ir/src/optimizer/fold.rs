use super::Rewriter;
use crate::block::BasicBlock;
use crate::eval::{eval_binary_op, eval_div, eval_morphing_op, eval_unary_op, typed_equal, typed_narrow};
use crate::ir::Ir;
use crate::op::{OpKind, Operation, Rounding};
use crate::types::Type;
use crate::value::{Imm, VarId, VarInfo};

/// Constant folding and algebraic simplification.
///
/// Within each block, operation inputs are first rewritten to their latest
/// equivalents, then immediates are folded through the reference evaluator,
/// algebraic identities collapse single-immediate operations, and chained
/// add/sub operations with one immediate each combine into one.
pub fn const_fold(ir: &mut Ir) {
    for block in &mut ir.blocks {
        process_block(block);
    }
}

fn can_handle(types: &[Type]) -> bool {
    types.iter().all(|t| t.is_integer() || *t == Type::Imm)
}

/// The definitive non-imm type an operation works at.
fn resolve_op_type(block: &BasicBlock, op: &Operation) -> Type {
    let mut seen: Vec<Type> = Vec::new();
    for v in op.input_vars().chain(op.output_vars()) {
        let ty = block.var(v).ty;
        if ty != Type::Imm && !seen.contains(&ty) {
            seen.push(ty);
        }
    }
    match seen.len() {
        0 => {
            tracing::warn!("could not resolve a definitive non-imm operation type");
            Type::I64
        }
        1 => seen[0],
        _ => {
            tracing::warn!("type conflict in operation, using the widest type");
            seen.into_iter().max_by_key(|t| t.bits()).unwrap()
        }
    }
}

/// Turn an operation-defined variable into an immediate, releasing the
/// references its operation held.
fn replace_with_imm(block: &mut BasicBlock, vid: VarId, value: u64, binary_relative: bool) {
    let info = block.take_info(vid);
    if let VarInfo::Op(op) = info {
        for input in op.input_vars().collect::<Vec<_>>() {
            block.dec_ref(input);
        }
        if let Some(Rounding::Dynamic(rm)) = op.rounding {
            block.dec_ref(rm);
        }
    }
    block.var_mut(vid).info = VarInfo::Imm(Imm { val: value as i64, binary_relative });
}

/// Signed addend contribution of an add/sub with a single immediate operand,
/// plus the non-immediate operand. `None` when the shape does not combine.
fn addend_of(block: &BasicBlock, op: &Operation) -> Option<(VarId, i64, bool)> {
    if !matches!(op.kind, OpKind::Add | OpKind::Sub) {
        return None;
    }
    let a = op.inputs[0]?;
    let b = op.inputs[1]?;
    let (ia, ib) = (block.var(a).imm(), block.var(b).imm());
    match (ia, ib) {
        (None, Some(imm)) => {
            let val = if op.kind == OpKind::Sub { imm.val.wrapping_neg() } else { imm.val };
            // negating a base-relative offset leaves the relative regime
            if op.kind == OpKind::Sub && imm.binary_relative {
                return None;
            }
            Some((a, val, imm.binary_relative))
        }
        (Some(imm), None) if op.kind == OpKind::Add => Some((b, imm.val, imm.binary_relative)),
        _ => None,
    }
}

struct FoldPass {
    rw: Rewriter,
}

impl FoldPass {
    fn binary(&mut self, block: &mut BasicBlock, vid: VarId, idx: &mut usize) {
        let op = block.var(vid).op().expect("binary fold on non-op").clone();
        let (a, b) = (op.inputs[0].unwrap(), op.inputs[1].unwrap());
        if !can_handle(&[block.var(a).ty, block.var(b).ty]) {
            return;
        }
        let ty = resolve_op_type(block, &op);
        let (ia, ib) = (block.var(a).imm(), block.var(b).imm());

        if let (Some(ia), Some(ib)) = (ia, ib) {
            // evaluating base-relative immediates only makes sense for
            // `a + rel b`, `rel a + b` and `rel a - b`
            if ia.binary_relative && ib.binary_relative {
                return;
            }
            let bin_rel = ia.binary_relative || ib.binary_relative;
            if bin_rel {
                match op.kind {
                    OpKind::Add => {}
                    OpKind::Sub if ia.binary_relative => {}
                    _ => return,
                }
            }
            let result = eval_binary_op(op.kind, ty, ia.val as u64, ib.val as u64);
            replace_with_imm(block, vid, result, bin_rel);
            return;
        }

        let other_is_op = if ia.is_some() {
            if ia.unwrap().binary_relative {
                return;
            }
            block.var(b).is_operation()
        } else if ib.is_some() {
            if ib.unwrap().binary_relative {
                return;
            }
            block.var(a).is_operation()
        } else {
            return;
        };
        if other_is_op {
            self.combine_add_chain(block, vid, idx);
        }

        // inputs may have changed; re-read before simplifying
        let op = block.var(vid).op().unwrap();
        let kind = op.kind;
        let (a, b) = (op.inputs[0].unwrap(), op.inputs[1].unwrap());
        if let Some(imm) = block.var(a).imm() {
            if !imm.binary_relative {
                self.simplify_imm_left(block, vid, kind, ty, imm.val as u64, b);
            }
        } else if let Some(imm) = block.var(b).imm() {
            if !imm.binary_relative {
                self.simplify_imm_right(block, vid, kind, ty, imm.val as u64, a);
            }
        }
    }

    /// `(x + c1) + c2` and friends collapse into a single `x + c`.
    fn combine_add_chain(&mut self, block: &mut BasicBlock, vid: VarId, idx: &mut usize) {
        let op = block.var(vid).op().unwrap().clone();
        let Some((_, cur_addend_src, _)) = addend_of(block, &op) else { return };
        let (prev_var, cur_imm_id) = {
            let a = op.inputs[0].unwrap();
            let b = op.inputs[1].unwrap();
            if block.var(a).is_operation() { (a, b) } else { (b, a) }
        };
        let prev_op = block.var(prev_var).op().unwrap().clone();
        let Some((base, prev_addend, prev_rel)) = addend_of(block, &prev_op) else { return };
        let ty = resolve_op_type(block, &op);

        let combined = eval_binary_op(
            OpKind::Add,
            ty,
            prev_addend as u64,
            cur_addend_src as u64,
        );

        // insert the combined immediate right before the current variable
        let imm = block.new_imm(combined as i64, block.var(vid).lifter.assign_addr, prev_rel);
        let last = block.order.pop().unwrap();
        debug_assert_eq!(last, imm);
        block.order.insert(*idx, imm);
        *idx += 1;

        block.inc_ref(base);
        block.inc_ref(imm);
        block.dec_ref(prev_var);
        block.dec_ref(cur_imm_id);
        let op = block.var_mut(vid).op_mut().unwrap();
        op.kind = OpKind::Add;
        op.inputs[0] = Some(base);
        op.inputs[1] = Some(imm);
    }

    fn simplify_commutative(
        &mut self,
        block: &mut BasicBlock,
        vid: VarId,
        kind: OpKind,
        ty: Type,
        imm: u64,
        other: VarId,
    ) {
        match kind {
            OpKind::Add | OpKind::Xor => {
                if typed_equal(ty, imm, 0) {
                    self.rw.replace(vid, other);
                }
            }
            OpKind::And => {
                if typed_equal(ty, imm, u64::MAX) {
                    self.rw.replace(vid, other);
                } else if typed_equal(ty, imm, 0) {
                    replace_with_imm(block, vid, 0, false);
                }
            }
            OpKind::Or => {
                if typed_equal(ty, imm, u64::MAX) {
                    replace_with_imm(block, vid, typed_narrow(ty, u64::MAX), false);
                } else if typed_equal(ty, imm, 0) {
                    self.rw.replace(vid, other);
                }
            }
            _ => {}
        }
    }

    fn simplify_imm_left(
        &mut self,
        block: &mut BasicBlock,
        vid: VarId,
        kind: OpKind,
        ty: Type,
        imm: u64,
        other: VarId,
    ) {
        if kind.is_commutative() {
            self.simplify_commutative(block, vid, kind, ty, imm, other);
            return;
        }
        if matches!(kind, OpKind::Shl | OpKind::Shr | OpKind::Sar) && typed_equal(ty, imm, 0) {
            replace_with_imm(block, vid, 0, false);
        }
    }

    fn simplify_imm_right(
        &mut self,
        block: &mut BasicBlock,
        vid: VarId,
        kind: OpKind,
        ty: Type,
        imm: u64,
        other: VarId,
    ) {
        if kind.is_commutative() {
            self.simplify_commutative(block, vid, kind, ty, imm, other);
            return;
        }
        match kind {
            OpKind::Sub | OpKind::Shl | OpKind::Shr | OpKind::Sar => {
                if typed_equal(ty, imm, 0) {
                    self.rw.replace(vid, other);
                }
            }
            _ => {}
        }
    }

    fn morph(&mut self, block: &mut BasicBlock, vid: VarId) {
        let op = block.var(vid).op().unwrap();
        let kind = op.kind;
        let input = op.inputs[0].unwrap();
        if !can_handle(&[block.var(input).ty]) {
            return;
        }
        let out_ty = block.var(vid).ty;
        let mut in_ty = block.var(input).ty;

        if let Some(imm) = block.var(input).imm() {
            if in_ty == Type::Imm {
                in_ty = out_ty;
            }
            if imm.binary_relative {
                return;
            }
            let result = eval_morphing_op(kind, in_ty, out_ty, imm.val as u64);
            replace_with_imm(block, vid, result, false);
        } else if in_ty == out_ty {
            self.rw.replace(vid, input);
        }
    }

    fn division(&mut self, block: &mut BasicBlock, vid: VarId) {
        let op = block.var(vid).op().unwrap().clone();
        let (a, b) = (op.inputs[0].unwrap(), op.inputs[1].unwrap());
        if !can_handle(&[block.var(a).ty, block.var(b).ty]) {
            return;
        }
        let quotient_live = op.outputs[0].is_some();
        let remainder_live = op.outputs[1].is_some();
        if quotient_live && remainder_live {
            // both outputs live; folding would need two replacements
            return;
        }
        if let (Some(ia), Some(ib)) = (block.var(a).imm(), block.var(b).imm()) {
            if ia.binary_relative || ib.binary_relative {
                return;
            }
            let ty = resolve_op_type(block, &op);
            let (q, r) = eval_div(op.kind, ty, ia.val as u64, ib.val as u64);
            let result = if quotient_live { q } else { r };
            replace_with_imm(block, vid, result, false);
        }
    }
}

fn process_block(block: &mut BasicBlock) {
    let mut pass = FoldPass { rw: Rewriter::default() };

    let mut idx = 0;
    while idx < block.order.len() {
        let vid = block.order[idx];
        if !block.var(vid).is_operation() {
            idx += 1;
            continue;
        }
        pass.rw.apply_to_op(block, vid);

        let kind = block.var(vid).op().unwrap().kind;
        if kind.is_binary() {
            pass.binary(block, vid, &mut idx);
        } else if kind.is_unary() {
            let op = block.var(vid).op().unwrap();
            let input = op.inputs[0].unwrap();
            if can_handle(&[block.var(input).ty]) {
                if let Some(imm) = block.var(input).imm() {
                    if !imm.binary_relative {
                        let ty = resolve_op_type(block, block.var(vid).op().unwrap());
                        let result = eval_unary_op(kind, ty, imm.val as u64);
                        replace_with_imm(block, vid, result, false);
                    }
                }
            }
        } else if kind.is_morph() {
            pass.morph(block, vid);
        } else if kind.is_div() {
            pass.division(block, vid);
        }
        idx += 1;
    }

    pass.rw.apply_to_all_cf(block);

    // codegen expects every immediate to carry the placeholder type
    for i in 0..block.order.len() {
        let vid = block.order[i];
        if block.var(vid).is_immediate() {
            block.var_mut(vid).ty = Type::Imm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfop::CfInfo;
    use crate::value::StaticId;
    use crate::verify::verify;

    #[test]
    fn folds_immediate_add() {
        let mut ir = Ir::new();
        let b = ir.add_basic_block(0x100, "");
        let bb = ir.block_mut(b);
        let a = bb.new_imm(13, 0, false);
        let c = bb.new_imm(24, 0, false);
        let sum = bb.emit(Type::I32, 0, OpKind::Add, &[a, c]);
        bb.push_cf_op(CfInfo::Unreachable, 0, 0);

        const_fold(&mut ir);
        assert!(verify(&ir).is_ok());
        assert_eq!(ir.block(b).var(sum).imm().unwrap().val, 37);
    }

    #[test]
    fn folds_through_morphs() {
        let mut ir = Ir::new();
        let b = ir.add_basic_block(0x100, "");
        let bb = ir.block_mut(b);
        let a = bb.new_imm(-5, 0, false);
        let c = bb.new_imm(2, 0, false);
        let sum = bb.emit(Type::I16, 0, OpKind::Add, &[a, c]);
        let ext = bb.emit(Type::I32, 0, OpKind::SignExtend, &[sum]);
        bb.push_cf_op(CfInfo::Unreachable, 0, 0);

        const_fold(&mut ir);
        assert!(verify(&ir).is_ok());
        assert_eq!(ir.block(b).var(sum).imm().unwrap().val, (-3i64 as u16) as i64);
        assert_eq!(ir.block(b).var(ext).imm().unwrap().val, (-3i64 as u32) as i64);
    }

    #[test]
    fn add_zero_forwards_the_operand() {
        let mut ir = Ir::new();
        ir.install_guest_statics();
        let b = ir.add_basic_block(0x100, "");
        let b2 = ir.add_basic_block(0x200, "");
        let a = ir.add_var_from_static(b, StaticId(5), 0);
        let cf = ir.add_cf_op(
            b,
            CfInfo::Jump { target: Some(b2), target_inputs: vec![] },
            0,
            0x200,
        );
        let bb = ir.block_mut(b);
        let zero = bb.new_imm(0, 0, false);
        let sum = bb.emit(Type::I64, 0, OpKind::Add, &[a, zero]);
        bb.add_cf_target_input(cf, sum, StaticId(5));
        ir.add_var_from_static(b2, StaticId(5), 0x200);
        ir.block_mut(b2).push_cf_op(CfInfo::Unreachable, 0x200, 0);

        const_fold(&mut ir);
        assert!(verify(&ir).is_ok());
        let cf_inputs = ir.block(b).cf_ops[0].target_input_vars();
        assert_eq!(cf_inputs, vec![a]);
    }

    #[test]
    fn combines_chained_adds() {
        let mut ir = Ir::new();
        ir.install_guest_statics();
        let b = ir.add_basic_block(0x100, "");
        let x = ir.add_var_from_static(b, StaticId(6), 0);
        let bb = ir.block_mut(b);
        let c1 = bb.new_imm(100, 0, false);
        let first = bb.emit(Type::I64, 0, OpKind::Add, &[x, c1]);
        let c2 = bb.new_imm(-30, 0, false);
        let second = bb.emit(Type::I64, 0, OpKind::Sub, &[first, c2]);
        let cf = bb.push_cf_op(CfInfo::Return { mapping: vec![] }, 0, 0);
        bb.add_cf_target_input(cf, second, StaticId(6));

        const_fold(&mut ir);
        assert!(verify(&ir).is_ok());
        let bb = ir.block(b);
        let op = bb.var(second).op().unwrap();
        assert_eq!(op.kind, OpKind::Add);
        assert_eq!(op.inputs[0], Some(x));
        assert_eq!(bb.var(op.inputs[1].unwrap()).imm().unwrap().val, 130);
    }

    #[test]
    fn folding_is_idempotent() {
        let mut ir = Ir::new();
        let b = ir.add_basic_block(0x100, "");
        let bb = ir.block_mut(b);
        let a = bb.new_imm(1, 0, false);
        let c = bb.new_imm(2, 0, false);
        let s = bb.emit(Type::I64, 0, OpKind::Add, &[a, c]);
        let n = bb.emit(Type::I64, 0, OpKind::Not, &[s]);
        let cf = bb.push_cf_op(CfInfo::Return { mapping: vec![] }, 0, 0);
        bb.add_cf_target_input(cf, n, StaticId(1));

        const_fold(&mut ir);
        let first: Vec<i64> =
            ir.block(b).order.iter().filter_map(|&v| ir.block(b).var(v).imm().map(|i| i.val)).collect();
        const_fold(&mut ir);
        let second: Vec<i64> =
            ir.block(b).order.iter().filter_map(|&v| ir.block(b).var(v).imm().map(|i| i.val)).collect();
        assert_eq!(first, second);
        assert!(verify(&ir).is_ok());
    }

    #[test]
    fn relative_immediates_keep_their_regime() {
        let mut ir = Ir::new();
        let b = ir.add_basic_block(0x100, "");
        let bb = ir.block_mut(b);
        let base = bb.new_imm(0x1000, 0, true);
        let off = bb.new_imm(8, 0, false);
        let sum = bb.emit(Type::I64, 0, OpKind::Add, &[base, off]);
        // rel - rel must not fold
        let other = bb.new_imm(0x2000, 0, true);
        let diff = bb.emit(Type::I64, 0, OpKind::Xor, &[base, other]);
        let cf = bb.push_cf_op(CfInfo::Return { mapping: vec![] }, 0, 0);
        bb.add_cf_target_input(cf, sum, StaticId(1));
        bb.add_cf_target_input(cf, diff, StaticId(2));

        const_fold(&mut ir);
        assert!(verify(&ir).is_ok());
        let bb = ir.block(b);
        let folded = bb.var(sum).imm().unwrap();
        assert_eq!(folded.val, 0x1008);
        assert!(folded.binary_relative);
        assert!(bb.var(diff).is_operation(), "rel xor rel must stay an operation");
    }
}
