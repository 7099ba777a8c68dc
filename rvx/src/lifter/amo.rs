//! Atomics lower to plain load-op-store sequences. The translator targets
//! single-threaded guests; the host will not reorder across the lowered
//! sequence.

use super::{Lifter, RegMap};
use rvx_ir::{BlockId, OpKind, Type, VarId};
use rvx_isa::DecodedInst;

impl Lifter<'_> {
    fn amo_load_to_rd(
        &mut self,
        bb: BlockId,
        inst: &DecodedInst,
        map: &mut RegMap,
        ip: u64,
        op_size: Type,
    ) {
        let mut inner = *inst;
        inner.imm = 0;
        self.lift_load(bb, &inner, map, ip, op_size, true);
    }

    fn amo_store_to_rs1(
        &mut self,
        bb: BlockId,
        inst: &DecodedInst,
        map: &mut RegMap,
        ip: u64,
        op_size: Type,
        value: VarId,
    ) {
        let mut inner = *inst;
        inner.imm = 0;
        // stage the value in the rs2 slot for the plain store path
        let saved = self.get_from_mapping(bb, map, inner.rs2, ip, false);
        self.write_to_mapping(bb, map, value, inner.rs2, false);
        self.lift_store(bb, &inner, map, ip, op_size);
        self.write_to_mapping(bb, map, saved, inner.rs2, false);
    }

    pub(super) fn lift_amo_load_reserve(
        &mut self,
        bb: BlockId,
        inst: &DecodedInst,
        map: &mut RegMap,
        ip: u64,
        op_size: Type,
    ) {
        self.amo_load_to_rd(bb, inst, map, ip, op_size);
    }

    pub(super) fn lift_amo_store_conditional(
        &mut self,
        bb: BlockId,
        inst: &DecodedInst,
        map: &mut RegMap,
        ip: u64,
        op_size: Type,
    ) {
        let value = self.get_from_mapping(bb, map, inst.rs2, ip, false);
        self.amo_store_to_rs1(bb, inst, map, ip, op_size, value);

        // without real atomics the store always succeeds
        let success = self.ir.block_mut(bb).new_imm(0, ip, false);
        self.write_to_mapping(bb, map, success, inst.rd, false);
    }

    pub(super) fn lift_amo_swap(
        &mut self,
        bb: BlockId,
        inst: &DecodedInst,
        map: &mut RegMap,
        ip: u64,
        op_size: Type,
    ) {
        // read rs2 first: when rs2 == rd the load below would clobber it
        let value = self.get_from_mapping(bb, map, inst.rs2, ip, false);
        self.amo_load_to_rd(bb, inst, map, ip, op_size);
        self.amo_store_to_rs1(bb, inst, map, ip, op_size, value);
    }

    pub(super) fn lift_amo_binary(
        &mut self,
        bb: BlockId,
        inst: &DecodedInst,
        map: &mut RegMap,
        ip: u64,
        op_size: Type,
        kind: OpKind,
    ) {
        let rhs = self.get_from_mapping(bb, map, inst.rs2, ip, false);
        self.amo_load_to_rd(bb, inst, map, ip, op_size);
        let loaded = self.get_from_mapping(bb, map, inst.rd, ip, false);

        let result = self.ir.block_mut(bb).emit(Type::I64, ip, kind, &[loaded, rhs]);
        self.amo_store_to_rs1(bb, inst, map, ip, op_size, result);
    }
}
