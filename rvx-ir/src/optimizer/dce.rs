use crate::ir::Ir;
use crate::op::OpKind;
use crate::value::VarInfo;

/// Dead-code elimination.
///
/// Removes variables with a zero reference count, except block inputs and
/// stores (which have an observable effect through the memory-token chain).
/// A single reverse scan per block handles cascades: releasing a dead value
/// can make its operands dead in the same pass.
pub fn dce(ir: &mut Ir) {
    for block in &mut ir.blocks {
        let mut i = block.order.len();
        while i > 0 {
            i -= 1;
            let vid = block.order[i];
            let var = block.var(vid);
            if var.ref_count > 0 || var.is_static() {
                continue;
            }
            if let VarInfo::Op(op) = &var.info {
                if op.kind == OpKind::Store {
                    continue;
                }
            }
            block.remove_var(vid);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfop::CfInfo;
    use crate::ir::Ir;
    use crate::op::OpKind;
    use crate::types::Type;
    use crate::verify::verify;

    #[test]
    fn removes_unused_chains_in_one_pass() {
        let mut ir = Ir::new();
        let b = ir.add_basic_block(0x100, "");
        let bb = ir.block_mut(b);
        let a = bb.new_imm(1, 0, false);
        let c = bb.new_imm(2, 0, false);
        let sum = bb.emit(Type::I64, 0, OpKind::Add, &[a, c]);
        let _unused = bb.emit(Type::I64, 0, OpKind::Add, &[sum, sum]);
        bb.push_cf_op(CfInfo::Unreachable, 0, 0);

        assert!(verify(&ir).is_ok());
        dce(&mut ir);
        assert!(verify(&ir).is_ok());
        assert_eq!(ir.block(b).var_count(), 0);
    }

    #[test]
    fn keeps_referenced_values_and_stores() {
        let mut ir = Ir::new();
        ir.install_guest_statics();
        let b = ir.add_basic_block(0x100, "");
        let mt = ir.add_var_from_static(b, crate::ir::MEM_IDX, 0);
        let bb = ir.block_mut(b);
        let addr = bb.new_imm(0x1000, 0, false);
        let val = bb.new_imm(7, 0, false);
        let mt2 = bb.new_var(Type::Mt, 0);
        bb.attach_op(mt2, crate::op::Operation::with_inputs(OpKind::Store, &[addr, val, mt]));

        dce(&mut ir);
        // the store stays although nothing references its token
        assert_eq!(ir.block(b).var_count(), 4);

        dce(&mut ir);
        assert_eq!(ir.block(b).var_count(), 4, "dce must be idempotent");
    }
}
