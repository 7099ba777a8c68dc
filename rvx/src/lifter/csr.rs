//! Zicsr lowering. The only CSRs user code touches in practice are the FP
//! status registers, which this translator does not track (conversions carry
//! their rounding mode explicitly). CSR reads therefore lower to zero and
//! writes are dropped.

use super::{Lifter, RegMap};
use rvx_ir::BlockId;
use rvx_isa::DecodedInst;

impl Lifter<'_> {
    fn csr_read(&mut self, bb: BlockId, inst: &DecodedInst, map: &mut RegMap, ip: u64) {
        if inst.rd != 0 {
            tracing::debug!(
                csr = inst.imm,
                addr = format_args!("{ip:#x}"),
                "csr read lowers to zero"
            );
            let zero = self.ir.block_mut(bb).new_imm(0, ip, false);
            self.write_to_mapping(bb, map, zero, inst.rd, false);
        }
    }

    pub(super) fn lift_csr_read_write(
        &mut self,
        bb: BlockId,
        inst: &DecodedInst,
        map: &mut RegMap,
        ip: u64,
        _with_imm: bool,
    ) {
        self.csr_read(bb, inst, map, ip);
    }

    pub(super) fn lift_csr_read_set(
        &mut self,
        bb: BlockId,
        inst: &DecodedInst,
        map: &mut RegMap,
        ip: u64,
        _with_imm: bool,
    ) {
        self.csr_read(bb, inst, map, ip);
    }

    pub(super) fn lift_csr_read_clear(
        &mut self,
        bb: BlockId,
        inst: &DecodedInst,
        map: &mut RegMap,
        ip: u64,
        _with_imm: bool,
    ) {
        self.csr_read(bb, inst, map, ip);
    }
}
