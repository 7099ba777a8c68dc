//! Jump-table recognition.
//!
//! Compilers emit switch dispatch as `x <- add base, index; y <- load x;
//! jalr x0, 0(y)`. Peeling the and/add/sign-extend wrapping off the jump
//! operand exposes the load; the table base is the LUI+ADDI pair feeding the
//! load address, and a guarding `cjump` in the preceding block may bound the
//! table. Every in-range 4-byte slot contributes a block entry.

use super::Lifter;
use crate::loader::Program;
use rvx_ir::{BlockId, CfInfo, OpKind, VarId, VarInfo};
use rvx_isa::{reg, DecodedInst};

const ADDR_STEP: u64 = 4;

impl Lifter<'_> {
    /// Detect the jump-table pattern on an `ijump`/`icall` being sealed.
    /// On success the needs-block bitmap is marked for each table slot and
    /// the cf-op's jump address records the first entry.
    pub(super) fn detect_jump_table(
        &mut self,
        prog: &Program,
        bb: BlockId,
        cf_idx: usize,
        inst: &DecodedInst,
    ) -> bool {
        {
            let cf = &self.ir.block(bb).cf_ops[cf_idx];
            if !matches!(cf.info, CfInfo::IJump { .. } | CfInfo::ICall { .. }) {
                return false;
            }
        }
        if reg::is_link_register(inst.rs1) || inst.imm != 0 {
            return false;
        }

        let block = self.ir.block(bb);
        let Some(masked) = block.cf_ops[cf_idx].inputs[0] else { return false };

        // reverse the `and -2` alignment mask
        let Some(sum) = op_input(block, masked, OpKind::And, 0) else { return false };
        // reverse the `add base, 0` of the jalr lowering
        let Some(mut loaded) = op_input(block, sum, OpKind::Add, 0) else { return false };
        // an optional sign extension of the loaded slot
        if let Some(inner) = op_input(block, loaded, OpKind::SignExtend, 0) {
            loaded = inner;
        }
        let Some(load_op) = block.var(loaded).op() else { return false };
        if load_op.kind != OpKind::Load {
            return false;
        }
        let Some(table_addr) = load_op.inputs[0] else { return false };
        let Some(table_op) = block.var(table_addr).op() else { return false };
        if table_op.kind != OpKind::Add {
            return false;
        }

        // one operand chain carries the LUI+ADDI pair loading the base
        let mut queue: Vec<VarId> = table_op.input_vars().collect();
        let mut jt_start: u64 = 0;
        while let Some(next) = queue.pop() {
            let VarInfo::Op(op) = &block.var(next).info else { continue };
            if op.kind == OpKind::Add {
                if let (Some(a), Some(b)) = (op.inputs[0], op.inputs[1]) {
                    if let (Some(lui), Some(addi)) = (block.var(a).imm(), block.var(b).imm()) {
                        jt_start = (addi.val as u64 & 0xfff) | (lui.val as u64 & 0xffff_f000);
                        break;
                    }
                }
            }
            queue.extend(op.input_vars());
        }
        if jt_start == 0 {
            return false;
        }

        // a guarded cjump right before this block may bound the table
        let mut jt_end: u64 = 0;
        if let Some(pred) = self.find_block(self.ir.block(bb).virt_start_addr.wrapping_sub(4)) {
            let pred_block = self.ir.block(pred);
            if let Some(cf) = pred_block.cf_ops.first() {
                if matches!(cf.info, CfInfo::CJump { .. }) {
                    for input in cf.input_vars() {
                        if let Some(imm) = pred_block.var(input).imm() {
                            if !imm.binary_relative && imm.val >= 0 {
                                jt_end = jt_start + ADDR_STEP * imm.val as u64;
                                break;
                            }
                        }
                    }
                }
            }
        }

        let mut first_target = 0u64;
        let mut slot = jt_start;
        loop {
            if jt_end != 0 && slot >= jt_end {
                break;
            }
            let Some(value) = prog.read_le(slot, ADDR_STEP) else { break };
            if !self.ir.in_bb_range(value) {
                break;
            }
            if first_target == 0 {
                first_target = value;
            }
            self.mark_needs_bb(value);
            slot += ADDR_STEP;
        }

        self.ir.block_mut(bb).cf_ops[cf_idx].lifter.jump_addr = first_target;
        true
    }
}

/// The `slot`-th input of `var`'s operation, when the operation has the
/// given kind.
fn op_input(
    block: &rvx_ir::BasicBlock,
    var: VarId,
    kind: OpKind,
    slot: usize,
) -> Option<VarId> {
    let op = block.var(var).op()?;
    (op.kind == kind).then(|| op.inputs[slot])?
}
