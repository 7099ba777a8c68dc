//! Optimizer passes over the IR.
//!
//! Three passes run in a fixed order: immediate deduplication, constant
//! folding, dead-code elimination. Each pass is idempotent and keeps the IR
//! verifiable.

mod dce;
mod dedup;
mod fold;

pub use dce::dce;
pub use dedup::dedup_imm;
pub use fold::const_fold;

use crate::block::BasicBlock;
use crate::ir::Ir;
use crate::op::Rounding;
use crate::value::VarId;
use hashbrown::HashMap;

bitflags::bitflags! {
    /// Selectable optimizer passes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Passes: u32 {
        const DEDUP_IMM = 1 << 0;
        const CONST_FOLD = 1 << 1;
        const DCE = 1 << 2;
    }
}

impl Passes {
    pub fn all_passes() -> Self {
        Passes::DEDUP_IMM | Passes::CONST_FOLD | Passes::DCE
    }
}

/// Run the selected passes in their fixed order.
pub fn optimize(ir: &mut Ir, passes: Passes) {
    if passes.contains(Passes::DEDUP_IMM) {
        dedup_imm(ir);
    }
    if passes.contains(Passes::CONST_FOLD) {
        const_fold(ir);
    }
    if passes.contains(Passes::DCE) {
        dce(ir);
    }
}

/// Tracks per-block old -> new variable replacements and rewrites owning
/// references in operations and cf-ops, keeping reference counts accurate.
#[derive(Default)]
pub(crate) struct Rewriter {
    map: HashMap<VarId, VarId>,
}

impl Rewriter {
    pub fn clear(&mut self) {
        self.map.clear();
    }

    pub fn replace(&mut self, old: VarId, new: VarId) {
        self.map.insert(old, new);
    }

    /// Final replacement of `var`, following replacement chains.
    pub fn resolve(&self, var: VarId) -> Option<VarId> {
        let mut cur = *self.map.get(&var)?;
        while let Some(&next) = self.map.get(&cur) {
            cur = next;
        }
        Some(cur)
    }

    /// Rewrite the operation inputs of `vid` in place.
    pub fn apply_to_op(&self, block: &mut BasicBlock, vid: VarId) {
        let Some(op) = block.var(vid).op() else { return };
        let mut changes: Vec<(usize, VarId, VarId)> = Vec::new();
        for (slot, input) in op.inputs.iter().enumerate() {
            if let Some(old) = input {
                if let Some(new) = self.resolve(*old) {
                    changes.push((slot, *old, new));
                }
            }
        }
        let rounding_change = match op.rounding {
            Some(Rounding::Dynamic(rm)) => self.resolve(rm).map(|new| (rm, new)),
            _ => None,
        };
        for (slot, old, new) in changes {
            block.dec_ref(old);
            block.inc_ref(new);
            block.var_mut(vid).op_mut().expect("operation vanished").inputs[slot] = Some(new);
        }
        if let Some((old, new)) = rounding_change {
            block.dec_ref(old);
            block.inc_ref(new);
            block.var_mut(vid).op_mut().expect("operation vanished").rounding =
                Some(Rounding::Dynamic(new));
        }
    }

    /// Rewrite a cf-op's inputs and target-input/mapping references.
    pub fn apply_to_cf(&self, block: &mut BasicBlock, cf_idx: usize) {
        use crate::cfop::CfInfo;

        let mut ref_changes: Vec<(VarId, VarId)> = Vec::new();
        {
            let cf = &block.cf_ops[cf_idx];
            for input in cf.input_vars() {
                if let Some(new) = self.resolve(input) {
                    ref_changes.push((input, new));
                }
            }
            for var in cf.target_input_vars() {
                if let Some(new) = self.resolve(var) {
                    ref_changes.push((var, new));
                }
            }
        }
        for (old, new) in &ref_changes {
            block.dec_ref(*old);
            block.inc_ref(*new);
        }

        let resolve = |v: &mut VarId| {
            if let Some(new) = self.resolve(*v) {
                *v = new;
            }
        };
        let cf = &mut block.cf_ops[cf_idx];
        for slot in cf.inputs.iter_mut().flatten() {
            resolve(slot);
        }
        match &mut cf.info {
            CfInfo::Jump { target_inputs, .. }
            | CfInfo::CJump { target_inputs, .. }
            | CfInfo::Call { target_inputs, .. } => target_inputs.iter_mut().for_each(resolve),
            CfInfo::Syscall { continuation_mapping, .. } => {
                continuation_mapping.iter_mut().for_each(|(v, _)| resolve(v))
            }
            CfInfo::ICall { mapping, .. }
            | CfInfo::IJump { mapping, .. }
            | CfInfo::Return { mapping } => mapping.iter_mut().for_each(|(v, _)| resolve(v)),
            CfInfo::Unreachable => {}
        }
    }

    pub fn apply_to_all_cf(&self, block: &mut BasicBlock) {
        for cf_idx in 0..block.cf_ops.len() {
            self.apply_to_cf(block, cf_idx);
        }
    }
}
