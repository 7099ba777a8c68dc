use super::{Lifter, RegMap};
use rvx_ir::{BlockId, OpKind, Type, VarId};
use rvx_isa::DecodedInst;

impl Lifter<'_> {
    fn lift_shift_shared(
        &mut self,
        bb: BlockId,
        inst: &DecodedInst,
        map: &mut RegMap,
        ip: u64,
        kind: OpKind,
        op_size: Type,
        amount: VarId,
    ) {
        let mut source = self.get_from_mapping(bb, map, inst.rs1, ip, false);
        if self.ir.block(bb).var(source).ty != op_size {
            source = self.ir.block_mut(bb).emit(op_size, ip, OpKind::Cast, &[source]);
        }

        let mut result = self.ir.block_mut(bb).emit(op_size, ip, kind, &[source, amount]);
        if op_size == Type::I32 {
            result = self.ir.block_mut(bb).emit(Type::I64, ip, OpKind::SignExtend, &[result]);
        }
        self.write_to_mapping(bb, map, result, inst.rd, false);
    }

    /// Register shifts mask the count to the operand width first.
    pub(super) fn lift_shift(
        &mut self,
        bb: BlockId,
        inst: &DecodedInst,
        map: &mut RegMap,
        ip: u64,
        kind: OpKind,
        op_size: Type,
    ) {
        let mask_val = if op_size == Type::I32 { 0x1f } else { 0x3f };
        let mask = self.load_imm(bb, mask_val, ip, false);
        let rs2 = self.get_from_mapping(bb, map, inst.rs2, ip, false);
        let masked = self.ir.block_mut(bb).emit(op_size, ip, OpKind::And, &[rs2, mask]);
        self.lift_shift_shared(bb, inst, map, ip, kind, op_size, masked);
    }

    pub(super) fn lift_shift_imm(
        &mut self,
        bb: BlockId,
        inst: &DecodedInst,
        map: &mut RegMap,
        ip: u64,
        kind: OpKind,
        op_size: Type,
    ) {
        let mask = if op_size == Type::I32 { 0x1f } else { 0x3f };
        let amount = self.load_imm(bb, inst.imm & mask, ip, false);
        self.lift_shift_shared(bb, inst, map, ip, kind, op_size, amount);
    }
}
