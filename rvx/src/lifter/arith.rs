use super::{Lifter, RegMap};
use rvx_ir::{BlockId, OpKind, Type};
use rvx_isa::DecodedInst;

impl Lifter<'_> {
    /// Register-register arithmetic/logic. 32-bit forms operate on narrowed
    /// operands and sign-extend their result back to 64 bits.
    pub(super) fn lift_arith(
        &mut self,
        bb: BlockId,
        inst: &DecodedInst,
        map: &mut RegMap,
        ip: u64,
        kind: OpKind,
        op_size: Type,
    ) {
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

        let mut dst = self.ir.block_mut(bb).emit(op_size, ip, kind, &[rs1, rs2]);
        if op_size == Type::I32 {
            dst = self.ir.block_mut(bb).emit(Type::I64, ip, OpKind::SignExtend, &[dst]);
        }
        self.write_to_mapping(bb, map, dst, inst.rd, false);
    }

    /// Register-immediate arithmetic/logic. `addi rd, x0, imm` lowers to a
    /// plain immediate in rd.
    pub(super) fn lift_arith_imm(
        &mut self,
        bb: BlockId,
        inst: &DecodedInst,
        map: &mut RegMap,
        ip: u64,
        kind: OpKind,
        op_size: Type,
    ) {
        let imm = self.load_imm(bb, inst.imm, ip, false);

        if inst.rs1 == 0 && kind == OpKind::Add {
            self.write_to_mapping(bb, map, imm, inst.rd, false);
            return;
        }

        let mut rs1 = self.get_from_mapping(bb, map, inst.rs1, ip, false);
        let rs1_ty = self.ir.block(bb).var(rs1).ty;
        if rs1_ty != op_size && rs1_ty != Type::Imm {
            if let Some(cast) = self.convert_type(bb, ip, rs1, op_size) {
                rs1 = cast;
            } else {
                tracing::debug!(mnem = %inst.mnem, "operand size mismatch on rs1");
            }
        }

        let mut dst = self.ir.block_mut(bb).emit(op_size, ip, kind, &[rs1, imm]);
        if op_size == Type::I32 {
            dst = self.ir.block_mut(bb).emit(Type::I64, ip, OpKind::SignExtend, &[dst]);
        }
        self.write_to_mapping(bb, map, dst, inst.rd, false);
    }

    /// SLT/SLTU and their immediate forms: a select of 1 or 0.
    pub(super) fn lift_slt(
        &mut self,
        bb: BlockId,
        inst: &DecodedInst,
        map: &mut RegMap,
        ip: u64,
        unsigned: bool,
        with_imm: bool,
    ) {
        let rs1 = self.get_from_mapping(bb, map, inst.rs1, ip, false);
        let rs2 = if with_imm {
            self.load_imm(bb, inst.imm, ip, false)
        } else {
            self.get_from_mapping(bb, map, inst.rs2, ip, false)
        };
        let one = self.load_imm(bb, 1, ip, false);
        let zero = self.load_imm(bb, 0, ip, false);

        let kind = if unsigned { OpKind::Sltu } else { OpKind::Slt };
        let dst = self.ir.block_mut(bb).emit(Type::I64, ip, kind, &[rs1, rs2, one, zero]);
        self.write_to_mapping(bb, map, dst, inst.rd, false);
    }

    pub(super) fn lift_lui(&mut self, bb: BlockId, inst: &DecodedInst, map: &mut RegMap, ip: u64) {
        let imm = self.load_imm(bb, inst.imm, ip, false);
        self.write_to_mapping(bb, map, imm, inst.rd, false);
    }

    /// AUIPC: instruction address (base-relative) plus the U-immediate.
    pub(super) fn lift_auipc(&mut self, bb: BlockId, inst: &DecodedInst, map: &mut RegMap, ip: u64) {
        let imm = self.load_imm(bb, inst.imm, ip, false);
        let ip_imm = self.load_imm(bb, ip as i64, ip, true);
        let dst = self.ir.block_mut(bb).emit(Type::I64, ip, OpKind::Add, &[ip_imm, imm]);
        self.write_to_mapping(bb, map, dst, inst.rd, false);
    }
}
