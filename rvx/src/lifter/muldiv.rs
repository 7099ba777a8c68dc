use super::{Lifter, RegMap};
use rvx_ir::{BlockId, OpKind, Operation, Type};
use rvx_isa::DecodedInst;

impl Lifter<'_> {
    pub(super) fn lift_mul(
        &mut self,
        bb: BlockId,
        inst: &DecodedInst,
        map: &mut RegMap,
        ip: u64,
        kind: OpKind,
        op_size: Type,
    ) {
        let (rs1, rs2) = self.muldiv_operands(bb, inst, map, ip, op_size);
        let mut dst = self.ir.block_mut(bb).emit(op_size, ip, kind, &[rs1, rs2]);
        if op_size == Type::I32 {
            dst = self.ir.block_mut(bb).emit(Type::I64, ip, OpKind::SignExtend, &[dst]);
        }
        self.write_to_mapping(bb, map, dst, inst.rd, false);
    }

    /// DIV/REM family: a single `div`/`udiv` with only the requested output
    /// slot populated.
    pub(super) fn lift_div(
        &mut self,
        bb: BlockId,
        inst: &DecodedInst,
        map: &mut RegMap,
        ip: u64,
        signed: bool,
        remainder: bool,
        op_size: Type,
    ) {
        let (rs1, rs2) = self.muldiv_operands(bb, inst, map, ip, op_size);
        let kind = if signed { OpKind::Div } else { OpKind::Udiv };

        let block = self.ir.block_mut(bb);
        let mut dst = block.new_var(op_size, ip);
        let mut op = Operation::with_inputs(kind, &[rs1, rs2]);
        if remainder {
            op.outputs = [None, Some(dst), None];
        } else {
            op.outputs = [Some(dst), None, None];
        }
        block.attach_op(dst, op);

        if op_size == Type::I32 {
            dst = self.ir.block_mut(bb).emit(Type::I64, ip, OpKind::SignExtend, &[dst]);
        }
        self.write_to_mapping(bb, map, dst, inst.rd, false);
    }

    fn muldiv_operands(
        &mut self,
        bb: BlockId,
        inst: &DecodedInst,
        map: &mut RegMap,
        ip: u64,
        op_size: Type,
    ) -> (rvx_ir::VarId, rvx_ir::VarId) {
        let mut rs1 = self.get_from_mapping(bb, map, inst.rs1, ip, false);
        let mut rs2 = self.get_from_mapping(bb, map, inst.rs2, ip, false);
        if self.ir.block(bb).var(rs1).ty != op_size {
            if let Some(cast) = self.convert_type(bb, ip, rs1, op_size) {
                rs1 = cast;
            } else {
                tracing::debug!(mnem = %inst.mnem, "operand size mismatch on rs1");
            }
        }
        if self.ir.block(bb).var(rs2).ty != op_size {
            if let Some(cast) = self.convert_type(bb, ip, rs2, op_size) {
                rs2 = cast;
            } else {
                tracing::debug!(mnem = %inst.mnem, "operand size mismatch on rs2");
            }
        }
        (rs1, rs2)
    }
}
