use super::{Lifter, RegMap};
use rvx_ir::{BlockId, OpKind, Operation, Rounding, RoundingMode, Type, MEM_IDX, VarId};
use rvx_isa::{DecodedInst, Mnem};

/// Map the instruction's rounding-mode field; the dynamic mode reads fcsr,
/// which is untracked, so it falls back to round-to-nearest.
fn rounding_of(inst: &DecodedInst) -> RoundingMode {
    match inst.rm {
        1 => RoundingMode::Zero,
        2 => RoundingMode::Down,
        3 => RoundingMode::Up,
        _ => RoundingMode::Nearest,
    }
}

impl Lifter<'_> {
    /// FP register read; the f64 statics carry zero-extended f32 values, so
    /// single-precision consumers narrow first (and f32 values widen back
    /// when a double-precision operation reads them).
    fn fp_operand(&mut self, bb: BlockId, map: &RegMap, reg: u8, ip: u64, op_size: Type) -> VarId {
        let var = self.get_from_mapping(bb, map, reg, ip, true);
        let cur = self.ir.block(bb).var(var).ty;
        if cur == op_size {
            return var;
        }
        let kind = if cur.bits() < op_size.bits() { OpKind::ZeroExtend } else { OpKind::Cast };
        self.ir.block_mut(bb).emit(op_size, ip, kind, &[var])
    }

    pub(super) fn lift_fp_load(
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

        let token = self.memory_token(map);
        let block = self.ir.block_mut(bb);
        let dst = block.new_var(op_size, ip);
        let mut op = Operation::with_inputs(OpKind::Load, &[addr, token]);
        op.access_type = Some(op_size);
        block.attach_op(dst, op);

        self.write_to_mapping(bb, map, dst, inst.rd, true);
    }

    pub(super) fn lift_fp_store(
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

        let value = self.fp_operand(bb, map, inst.rs2, ip, op_size);

        let token = self.memory_token(map);
        let block = self.ir.block_mut(bb);
        let new_token = block.new_var(Type::Mt, ip);
        let mut op = Operation::with_inputs(OpKind::Store, &[addr, value, token]);
        op.access_type = Some(op_size);
        block.attach_op(new_token, op);
        block.var_mut(new_token).lifter.static_id = Some(MEM_IDX);
        map[MEM_IDX.index()] = Some(new_token);
    }

    pub(super) fn lift_fp_arith(
        &mut self,
        bb: BlockId,
        inst: &DecodedInst,
        map: &mut RegMap,
        ip: u64,
        kind: OpKind,
        op_size: Type,
    ) {
        let rs1 = self.fp_operand(bb, map, inst.rs1, ip, op_size);
        let rs2 = self.fp_operand(bb, map, inst.rs2, ip, op_size);
        let block = self.ir.block_mut(bb);
        let dst = block.new_var(op_size, ip);
        let mut op = Operation::with_inputs(kind, &[rs1, rs2]);
        op.rounding = Some(Rounding::Mode(rounding_of(inst)));
        block.attach_op(dst, op);
        self.write_to_mapping(bb, map, dst, inst.rd, true);
    }

    pub(super) fn lift_fsqrt(
        &mut self,
        bb: BlockId,
        inst: &DecodedInst,
        map: &mut RegMap,
        ip: u64,
        op_size: Type,
    ) {
        let rs1 = self.fp_operand(bb, map, inst.rs1, ip, op_size);
        let block = self.ir.block_mut(bb);
        let dst = block.new_var(op_size, ip);
        let mut op = Operation::with_inputs(OpKind::Fsqrt, &[rs1]);
        op.rounding = Some(Rounding::Mode(rounding_of(inst)));
        block.attach_op(dst, op);
        self.write_to_mapping(bb, map, dst, inst.rd, true);
    }

    pub(super) fn lift_fp_fma(
        &mut self,
        bb: BlockId,
        inst: &DecodedInst,
        map: &mut RegMap,
        ip: u64,
        kind: OpKind,
        op_size: Type,
    ) {
        let rs1 = self.fp_operand(bb, map, inst.rs1, ip, op_size);
        let rs2 = self.fp_operand(bb, map, inst.rs2, ip, op_size);
        let rs3 = self.fp_operand(bb, map, inst.rs3, ip, op_size);
        let block = self.ir.block_mut(bb);
        let dst = block.new_var(op_size, ip);
        let mut op = Operation::with_inputs(kind, &[rs1, rs2, rs3]);
        op.rounding = Some(Rounding::Mode(rounding_of(inst)));
        block.attach_op(dst, op);
        self.write_to_mapping(bb, map, dst, inst.rd, true);
    }

    /// Sign injection lowers to bitwise operations on the raw encoding.
    pub(super) fn lift_fsgnj(
        &mut self,
        bb: BlockId,
        inst: &DecodedInst,
        map: &mut RegMap,
        ip: u64,
        op_size: Type,
    ) {
        let sign_mask_val =
            if op_size == Type::F32 { 0x8000_0000u64 } else { 0x8000_0000_0000_0000u64 };
        let body_mask_val =
            if op_size == Type::F32 { 0x7fff_ffffu64 } else { 0x7fff_ffff_ffff_ffffu64 };
        let sign_mask = self.load_imm(bb, sign_mask_val as i64, ip, false);
        let body_mask = self.load_imm(bb, body_mask_val as i64, ip, false);

        let rs1 = self.fp_operand(bb, map, inst.rs1, ip, op_size);
        let rs2 = self.fp_operand(bb, map, inst.rs2, ip, op_size);

        let sign_rs2 = self.ir.block_mut(bb).emit(op_size, ip, OpKind::And, &[rs2, sign_mask]);

        let new_sign = match inst.mnem {
            Mnem::FsgnjS | Mnem::FsgnjD => sign_rs2,
            Mnem::FsgnjnS | Mnem::FsgnjnD => {
                self.ir.block_mut(bb).emit(op_size, ip, OpKind::Xor, &[sign_rs2, sign_mask])
            }
            Mnem::FsgnjxS | Mnem::FsgnjxD => {
                let sign_rs1 =
                    self.ir.block_mut(bb).emit(op_size, ip, OpKind::And, &[rs1, sign_mask]);
                self.ir.block_mut(bb).emit(op_size, ip, OpKind::Xor, &[sign_rs1, sign_rs2])
            }
            _ => unreachable!(),
        };

        let body = self.ir.block_mut(bb).emit(op_size, ip, OpKind::And, &[rs1, body_mask]);
        let result = self.ir.block_mut(bb).emit(op_size, ip, OpKind::Or, &[body, new_sign]);
        self.write_to_mapping(bb, map, result, inst.rd, true);
    }

    /// FP compares produce a 0/1 integer in rd.
    pub(super) fn lift_fp_compare(
        &mut self,
        bb: BlockId,
        inst: &DecodedInst,
        map: &mut RegMap,
        ip: u64,
        kind: OpKind,
        op_size: Type,
    ) {
        let rs1 = self.fp_operand(bb, map, inst.rs1, ip, op_size);
        let rs2 = self.fp_operand(bb, map, inst.rs2, ip, op_size);
        let dst = self.ir.block_mut(bb).emit(Type::I64, ip, kind, &[rs1, rs2]);
        self.write_to_mapping(bb, map, dst, inst.rd, false);
    }

    /// FCVT family plus the single/double conversions.
    pub(super) fn lift_fp_convert(
        &mut self,
        bb: BlockId,
        inst: &DecodedInst,
        map: &mut RegMap,
        ip: u64,
        from: Type,
        to: Type,
        signed: bool,
    ) {
        let src = if from.is_float() {
            self.fp_operand(bb, map, inst.rs1, ip, from)
        } else {
            let var = self.get_from_mapping(bb, map, inst.rs1, ip, false);
            if from == Type::I32 {
                self.convert_type(bb, ip, var, Type::I32).unwrap_or(var)
            } else {
                var
            }
        };

        let kind = if signed { OpKind::Convert } else { OpKind::Uconvert };
        let block = self.ir.block_mut(bb);
        let mut dst = block.new_var(to, ip);
        let mut op = Operation::with_inputs(kind, &[src]);
        op.rounding = Some(Rounding::Mode(rounding_of(inst)));
        block.attach_op(dst, op);

        if to.is_float() {
            self.write_to_mapping(bb, map, dst, inst.rd, true);
        } else {
            if to == Type::I32 {
                dst = self.ir.block_mut(bb).emit(Type::I64, ip, OpKind::SignExtend, &[dst]);
            }
            self.write_to_mapping(bb, map, dst, inst.rd, false);
        }
    }

    /// FMV bit moves are casts between same-width integer and float types.
    pub(super) fn lift_fmv(&mut self, bb: BlockId, inst: &DecodedInst, map: &mut RegMap, ip: u64) {
        match inst.mnem {
            Mnem::FmvXW => {
                let f = self.fp_operand(bb, map, inst.rs1, ip, Type::F32);
                let bits = self.ir.block_mut(bb).emit(Type::I32, ip, OpKind::Cast, &[f]);
                let dst = self.ir.block_mut(bb).emit(Type::I64, ip, OpKind::SignExtend, &[bits]);
                self.write_to_mapping(bb, map, dst, inst.rd, false);
            }
            Mnem::FmvXD => {
                let f = self.fp_operand(bb, map, inst.rs1, ip, Type::F64);
                let dst = self.ir.block_mut(bb).emit(Type::I64, ip, OpKind::Cast, &[f]);
                self.write_to_mapping(bb, map, dst, inst.rd, false);
            }
            Mnem::FmvWX => {
                let x = self.get_from_mapping(bb, map, inst.rs1, ip, false);
                let narrow = self.ir.block_mut(bb).emit(Type::I32, ip, OpKind::Cast, &[x]);
                let dst = self.ir.block_mut(bb).emit(Type::F32, ip, OpKind::Cast, &[narrow]);
                self.write_to_mapping(bb, map, dst, inst.rd, true);
            }
            Mnem::FmvDX => {
                let x = self.get_from_mapping(bb, map, inst.rs1, ip, false);
                let dst = self.ir.block_mut(bb).emit(Type::F64, ip, OpKind::Cast, &[x]);
                self.write_to_mapping(bb, map, dst, inst.rd, true);
            }
            _ => unreachable!(),
        }
    }

    /// FCLASS: the ten-bit classification mask computed from the raw
    /// encoding with integer operations and selects.
    pub(super) fn lift_fclass(
        &mut self,
        bb: BlockId,
        inst: &DecodedInst,
        map: &mut RegMap,
        ip: u64,
        op_size: Type,
    ) {
        let (exp_bits, frac_bits, exp_max) = match op_size {
            Type::F32 => (8i64, 23i64, 0xffi64),
            Type::F64 => (11, 52, 0x7ff),
            _ => unreachable!(),
        };

        let f = self.fp_operand(bb, map, inst.rs1, ip, op_size);
        let int_ty = if op_size == Type::F32 { Type::I32 } else { Type::I64 };
        let mut bits = self.ir.block_mut(bb).emit(int_ty, ip, OpKind::Cast, &[f]);
        if int_ty == Type::I32 {
            bits = self.ir.block_mut(bb).emit(Type::I64, ip, OpKind::ZeroExtend, &[bits]);
        }

        let one = self.load_imm(bb, 1, ip, false);
        let zero = self.load_imm(bb, 0, ip, false);

        let sign_sh = self.load_imm(bb, exp_bits + frac_bits, ip, false);
        let sign = self.ir.block_mut(bb).emit(Type::I64, ip, OpKind::Shr, &[bits, sign_sh]);

        let exp_sh = self.load_imm(bb, frac_bits, ip, false);
        let exp_mask = self.load_imm(bb, exp_max, ip, false);
        let shifted = self.ir.block_mut(bb).emit(Type::I64, ip, OpKind::Shr, &[bits, exp_sh]);
        let exp = self.ir.block_mut(bb).emit(Type::I64, ip, OpKind::And, &[shifted, exp_mask]);

        let frac_mask = self.load_imm(bb, (1i64 << frac_bits) - 1, ip, false);
        let frac = self.ir.block_mut(bb).emit(Type::I64, ip, OpKind::And, &[bits, frac_mask]);

        let exp_max_imm = self.load_imm(bb, exp_max, ip, false);
        let is_exp_max =
            self.ir.block_mut(bb).emit(Type::I64, ip, OpKind::Seq, &[exp, exp_max_imm, one, zero]);
        let is_exp_zero =
            self.ir.block_mut(bb).emit(Type::I64, ip, OpKind::Seq, &[exp, zero, one, zero]);
        let is_frac_zero =
            self.ir.block_mut(bb).emit(Type::I64, ip, OpKind::Seq, &[frac, zero, one, zero]);
        let frac_nonzero =
            self.ir.block_mut(bb).emit(Type::I64, ip, OpKind::Xor, &[is_frac_zero, one]);
        let is_neg = self.ir.block_mut(bb).emit(Type::I64, ip, OpKind::Seq, &[sign, one, one, zero]);

        let quiet_sh = self.load_imm(bb, frac_bits - 1, ip, false);
        let quiet = self.ir.block_mut(bb).emit(Type::I64, ip, OpKind::Shr, &[frac, quiet_sh]);

        let select = |this: &mut Self, pred: rvx_ir::VarId, a: i64, b: i64| {
            let va = this.load_imm(bb, a, ip, false);
            let vb = this.load_imm(bb, b, ip, false);
            this.ir.block_mut(bb).emit(Type::I64, ip, OpKind::Seq, &[pred, one, va, vb])
        };

        // infinities: 0x1 negative, 0x80 positive
        let inf_val = select(self, is_neg, 0x1, 0x80);
        let inf_pred =
            self.ir.block_mut(bb).emit(Type::I64, ip, OpKind::And, &[is_exp_max, is_frac_zero]);
        let inf_term =
            self.ir.block_mut(bb).emit(Type::I64, ip, OpKind::Seq, &[inf_pred, one, inf_val, zero]);

        // NaNs: 0x200 quiet, 0x100 signaling
        let nan_val = select(self, quiet, 0x200, 0x100);
        let nan_pred =
            self.ir.block_mut(bb).emit(Type::I64, ip, OpKind::And, &[is_exp_max, frac_nonzero]);
        let nan_term =
            self.ir.block_mut(bb).emit(Type::I64, ip, OpKind::Seq, &[nan_pred, one, nan_val, zero]);

        // zeros: 0x8 negative, 0x10 positive
        let zero_val = select(self, is_neg, 0x8, 0x10);
        let zero_pred =
            self.ir.block_mut(bb).emit(Type::I64, ip, OpKind::And, &[is_exp_zero, is_frac_zero]);
        let zero_term = self
            .ir
            .block_mut(bb)
            .emit(Type::I64, ip, OpKind::Seq, &[zero_pred, one, zero_val, zero]);

        // subnormals: 0x4 negative, 0x20 positive
        let sub_val = select(self, is_neg, 0x4, 0x20);
        let sub_pred =
            self.ir.block_mut(bb).emit(Type::I64, ip, OpKind::And, &[is_exp_zero, frac_nonzero]);
        let sub_term =
            self.ir.block_mut(bb).emit(Type::I64, ip, OpKind::Seq, &[sub_pred, one, sub_val, zero]);

        // normals: 0x2 negative, 0x40 positive
        let not_exp_zero =
            self.ir.block_mut(bb).emit(Type::I64, ip, OpKind::Xor, &[is_exp_zero, one]);
        let not_exp_max =
            self.ir.block_mut(bb).emit(Type::I64, ip, OpKind::Xor, &[is_exp_max, one]);
        let norm_val = select(self, is_neg, 0x2, 0x40);
        let norm_pred =
            self.ir.block_mut(bb).emit(Type::I64, ip, OpKind::And, &[not_exp_zero, not_exp_max]);
        let norm_term = self
            .ir
            .block_mut(bb)
            .emit(Type::I64, ip, OpKind::Seq, &[norm_pred, one, norm_val, zero]);

        let mut result = self.ir.block_mut(bb).emit(Type::I64, ip, OpKind::Or, &[inf_term, nan_term]);
        result = self.ir.block_mut(bb).emit(Type::I64, ip, OpKind::Or, &[result, zero_term]);
        result = self.ir.block_mut(bb).emit(Type::I64, ip, OpKind::Or, &[result, sub_term]);
        result = self.ir.block_mut(bb).emit(Type::I64, ip, OpKind::Or, &[result, norm_term]);
        self.write_to_mapping(bb, map, result, inst.rd, false);
    }
}
