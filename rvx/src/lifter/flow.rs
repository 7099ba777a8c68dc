use super::{Lifter, RegMap};
use rvx_ir::{BlockId, CfInfo, CmpKind, OpKind, StaticId, Type};
use rvx_isa::{reg, DecodedInst, Mnem};

impl Lifter<'_> {
    /// Conditional branches become a `cjump` plus a fall-through `jump`.
    /// BNE/BGE/BGEU reverse the legs of BEQ/BLT/BLTU instead of carrying
    /// their own comparison kinds.
    pub(super) fn lift_branch(
        &mut self,
        bb: BlockId,
        inst: &DecodedInst,
        map: &mut RegMap,
        ip: u64,
        next_addr: u64,
    ) {
        let jmp_imm = self.load_imm(bb, inst.imm, ip, false);
        let ip_imm = self.load_imm(bb, ip as i64, ip, true);
        let jmp_addr = self.ir.block_mut(bb).emit(Type::I64, ip, OpKind::Add, &[ip_imm, jmp_imm]);

        let (cmp, reverse) = match inst.mnem {
            Mnem::Beq => (CmpKind::Eq, false),
            Mnem::Bne => (CmpKind::Eq, true),
            Mnem::Blt => (CmpKind::Slt, false),
            Mnem::Bge => (CmpKind::Slt, true),
            Mnem::Bltu => (CmpKind::Lt, false),
            Mnem::Bgeu => (CmpKind::Lt, true),
            _ => unreachable!(),
        };

        let encoded_addr = (ip as i64 + inst.imm) as u64;
        let next_addr_var = self.load_imm(bb, next_addr as i64, ip, true);

        // leg taken when the condition holds, and the other one
        let (taken_addr, taken_var, fall_addr, fall_var) = if reverse {
            (next_addr, next_addr_var, encoded_addr, jmp_addr)
        } else {
            (encoded_addr, jmp_addr, next_addr, next_addr_var)
        };

        let rs1 = self.get_from_mapping(bb, map, inst.rs1, ip, false);
        let rs2 = self.get_from_mapping(bb, map, inst.rs2, ip, false);

        let cjump = self.ir.add_cf_op(
            bb,
            CfInfo::CJump { target: None, target_inputs: vec![], cmp },
            ip,
            taken_addr,
        );
        self.ir.block_mut(bb).set_cf_inputs(cjump, &[rs1, rs2, taken_var]);

        let fall = self.ir.add_cf_op(
            bb,
            CfInfo::Jump { target: None, target_inputs: vec![] },
            ip,
            fall_addr,
        );
        self.ir.block_mut(bb).set_cf_inputs(fall, &[fall_var]);
    }

    /// JAL: a direct jump, or a call when the destination is a link
    /// register (so the allocator can wire a continuation block).
    pub(super) fn lift_jal(
        &mut self,
        bb: BlockId,
        inst: &DecodedInst,
        map: &mut RegMap,
        ip: u64,
        next_addr: u64,
    ) {
        let jmp_imm = self.load_imm(bb, inst.imm, ip, false);
        let ip_imm = self.load_imm(bb, ip as i64, ip, true);
        let sum = self.ir.block_mut(bb).emit(Type::I64, ip, OpKind::Add, &[ip_imm, jmp_imm]);

        if inst.rd != reg::ZERO {
            let ret_addr = self.load_imm(bb, next_addr as i64, ip, true);
            self.write_to_mapping(bb, map, ret_addr, inst.rd, false);
        }

        let target_addr = (ip as i64 + inst.imm) as u64;
        let info = if reg::is_link_register(inst.rd) {
            CfInfo::Call {
                target: None,
                target_inputs: vec![],
                continuation: None,
                continuation_mapping: vec![],
            }
        } else {
            CfInfo::Jump { target: None, target_inputs: vec![] }
        };
        let cf = self.ir.add_cf_op(bb, info, ip, target_addr);
        self.ir.block_mut(bb).set_cf_inputs(cf, &[sum]);
    }

    /// JALR: indirect jump through `(rs1 + imm) & ~1`; an indirect call when
    /// rd is a link register.
    pub(super) fn lift_jalr(
        &mut self,
        bb: BlockId,
        inst: &DecodedInst,
        map: &mut RegMap,
        ip: u64,
        next_addr: u64,
    ) {
        let imm = self.load_imm(bb, inst.imm, ip, false);
        let base = self.get_from_mapping(bb, map, inst.rs1, ip, false);
        let sum = self.ir.block_mut(bb).emit(Type::I64, ip, OpKind::Add, &[base, imm]);

        // valid instruction addresses are two-byte aligned
        let mask = self.load_imm(bb, -2, ip, false);
        let jump_addr = self.ir.block_mut(bb).emit(Type::I64, ip, OpKind::And, &[sum, mask]);

        let info = if reg::is_link_register(inst.rd) {
            CfInfo::ICall { continuation: None, mapping: vec![], targets: vec![] }
        } else {
            CfInfo::IJump { mapping: vec![], targets: vec![] }
        };
        let cf = self.ir.add_cf_op(bb, info, ip, 0);
        self.ir.block_mut(bb).set_cf_inputs(cf, &[jump_addr]);

        if inst.rd != reg::ZERO {
            let ret_addr = self.load_imm(bb, next_addr as i64, ip, false);
            self.write_to_mapping(bb, map, ret_addr, inst.rd, false);
        }
    }

    /// ECALL: a `syscall` cf-op fed by a7 and a0..a5; the results land in
    /// the statics of a0 and a1.
    pub(super) fn lift_ecall(&mut self, bb: BlockId, map: &mut RegMap, ip: u64, next_addr: u64) {
        let inputs: Vec<_> = [reg::A7, 10, 11, 12, 13, 14, 15]
            .iter()
            .map(|&r| self.get_from_mapping(bb, map, r, ip, false))
            .collect();

        let cf = self.ir.add_cf_op(
            bb,
            CfInfo::Syscall {
                continuation: None,
                continuation_mapping: vec![],
                static_mapping: vec![StaticId(reg::A0 as u16), StaticId(reg::A1 as u16)],
            },
            ip,
            next_addr,
        );
        self.ir.block_mut(bb).set_cf_inputs(cf, &inputs);
    }
}
