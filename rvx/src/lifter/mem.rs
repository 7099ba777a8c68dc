use super::{Lifter, RegMap};
use rvx_ir::{BlockId, OpKind, Operation, Type, MEM_IDX};
use rvx_isa::DecodedInst;

impl Lifter<'_> {
    /// Loads: `addr = rs1 + imm`, a `load` consuming the memory token, then
    /// an extension to 64 bits for sub-word accesses.
    pub(super) fn lift_load(
        &mut self,
        bb: BlockId,
        inst: &DecodedInst,
        map: &mut RegMap,
        ip: u64,
        op_size: Type,
        sign_extend: bool,
    ) {
        let offset = self.load_imm(bb, inst.imm, ip, false);
        let rs1 = self.get_from_mapping(bb, map, inst.rs1, ip, false);
        let addr = self.ir.block_mut(bb).emit(Type::I64, ip, OpKind::Add, &[rs1, offset]);

        let token = self.memory_token(map);
        let block = self.ir.block_mut(bb);
        let mut dst = block.new_var(op_size, ip);
        let mut op = Operation::with_inputs(OpKind::Load, &[addr, token]);
        op.access_type = Some(op_size);
        block.attach_op(dst, op);

        if op_size != Type::I64 {
            let kind = if sign_extend { OpKind::SignExtend } else { OpKind::ZeroExtend };
            dst = self.ir.block_mut(bb).emit(Type::I64, ip, kind, &[dst]);
        }
        self.write_to_mapping(bb, map, dst, inst.rd, false);
    }

    /// Stores narrow the value first and advance the memory-token chain.
    pub(super) fn lift_store(
        &mut self,
        bb: BlockId,
        inst: &DecodedInst,
        map: &mut RegMap,
        ip: u64,
        op_size: Type,
    ) {
        let offset = self.load_imm(bb, inst.imm, ip, false);
        let rs1 = self.get_from_mapping(bb, map, inst.rs1, ip, false);
        let addr = self.ir.block_mut(bb).emit(Type::I64, ip, OpKind::Add, &[rs1, offset]);

        let rs2 = self.get_from_mapping(bb, map, inst.rs2, ip, false);
        let value = if op_size != Type::I64 && self.ir.block(bb).var(rs2).ty != op_size {
            self.shrink_var(bb, rs2, ip, op_size)
        } else {
            rs2
        };

        let token = self.memory_token(map);
        let block = self.ir.block_mut(bb);
        let new_token = block.new_var(Type::Mt, ip);
        let mut op = Operation::with_inputs(OpKind::Store, &[addr, value, token]);
        op.access_type = Some(op_size);
        block.attach_op(new_token, op);
        block.var_mut(new_token).lifter.static_id = Some(MEM_IDX);

        map[MEM_IDX.index()] = Some(new_token);
    }
}
