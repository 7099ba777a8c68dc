//! Indirect-jump target resolution by backward symbolic evaluation.
//!
//! The address operand of an `ijump`/`icall` is walked backwards through its
//! defining operations. Block inputs continue the walk in predecessor blocks
//! through their cf-op target mappings, bounded by a search depth and a
//! visited set to stay clear of cycles.

use super::Lifter;
use crate::loader::Program;
use hashbrown::HashSet;
use rvx_ir::{BlockId, CfInfo, OpKind, StaticId, Type, VarId, VarInfo};

/// Predecessor BFS depth bound.
const MAX_ADDRESS_SEARCH_DEPTH: usize = 500;
/// Bound on the input-value tuple product during symbolic evaluation.
const MAX_VALUE_COMBINATIONS: usize = 256;

/// A value reference during backtracking: the variable plus the block whose
/// arena owns it.
type Ref = (BlockId, VarId);

impl Lifter<'_> {
    /// Resolve every indirect jump and call: discover candidate target
    /// addresses, split blocks at the discovered entries and record the
    /// targets on the cf-ops. Splitting appends blocks (possibly carrying
    /// moved indirect jumps), so the scan runs over the growing list.
    pub(super) fn resolve_ijumps(&mut self, _prog: &Program) {
        let mut idx = 0;
        while idx < self.ir.blocks.len() {
            let bid = BlockId(idx as u32);
            idx += 1;
            for cf_idx in 0..self.ir.block(bid).cf_ops.len() {
                if matches!(
                    self.ir.block(bid).cf_ops[cf_idx].info,
                    CfInfo::IJump { .. } | CfInfo::ICall { .. }
                ) {
                    self.resolve_one(bid, cf_idx);
                }
            }
        }
    }

    fn resolve_one(&mut self, bid: BlockId, cf_idx: usize) {
        let addrs = self.backtrace_jump_addrs(bid, cf_idx);
        if addrs.is_empty() {
            tracing::debug!(
                block = %bid,
                "address backtracking found no targets, leaving indirect jump to the \
                 runtime lookup"
            );
            return;
        }
        for addr in addrs {
            let addr = addr as u64;
            if !self.ir.in_bb_range(addr) {
                continue;
            }
            let Some(found) = self.find_block(addr) else {
                tracing::debug!(
                    addr = format_args!("{addr:#x}"),
                    "no basic block at a backtracked indirect-jump target"
                );
                continue;
            };
            let target = if self.ir.block(found).virt_start_addr != addr {
                let second = self.split_block(found, addr);
                if found == bid {
                    // the split moved this very cf-op into the new tail; the
                    // outer scan revisits it there
                    return;
                }
                second
            } else {
                found
            };

            let cf = &mut self.ir.block_mut(bid).cf_ops[cf_idx];
            if cf.lifter.jump_addr == 0 {
                cf.lifter.jump_addr = addr;
            }
            match &mut cf.info {
                CfInfo::IJump { targets, .. } | CfInfo::ICall { targets, .. } => {
                    if !targets.contains(&target) {
                        targets.push(target);
                    }
                }
                _ => unreachable!(),
            }
            self.ir.link_blocks(bid, target);
        }
    }

    pub(crate) fn backtrace_jump_addrs(&self, bid: BlockId, cf_idx: usize) -> HashSet<i64> {
        let cf = &self.ir.block(bid).cf_ops[cf_idx];
        debug_assert!(matches!(cf.info, CfInfo::IJump { .. } | CfInfo::ICall { .. }));
        let Some(dst) = cf.inputs[0] else { return HashSet::new() };
        let mut parsed: Vec<Ref> = Vec::new();
        self.var_values((bid, dst), &mut parsed)
    }

    /// All values `var` may evaluate to, across predecessors.
    fn var_values(&self, var: Ref, parsed: &mut Vec<Ref>) -> HashSet<i64> {
        let mut values = HashSet::new();
        let (bid, vid) = var;

        let sources: Vec<Ref> = match &self.ir.block(bid).var(vid).info {
            VarInfo::Static(s) => {
                let preds = self.last_static_assignments(*s, bid);
                if preds.is_empty() {
                    tracing::debug!(
                        block = %bid,
                        "no predecessor assignment found for a static during backtracking"
                    );
                    return values;
                }
                preds
            }
            _ => vec![var],
        };

        for (src_bid, src_vid) in sources {
            let var = self.ir.block(src_bid).var(src_vid);
            match &var.info {
                VarInfo::Imm(imm) => {
                    // past relativization the value is an offset into the
                    // guest image
                    let val = if imm.binary_relative {
                        imm.val.wrapping_add(self.ir.base_addr as i64)
                    } else {
                        imm.val
                    };
                    values.insert(val);
                }
                VarInfo::Static(_) => {
                    // a fresh static input of a predecessor; keep walking
                    let mut inner = self.var_values((src_bid, src_vid), parsed);
                    values.extend(inner.drain());
                }
                VarInfo::Uninit => {
                    tracing::debug!("uninitialized variable during backtracking, skipping branch");
                }
                VarInfo::Op(op) => {
                    self.eval_op_values(src_bid, src_vid, op.kind, parsed, &mut values);
                }
            }
        }
        values
    }

    fn eval_op_values(
        &self,
        bid: BlockId,
        vid: VarId,
        kind: OpKind,
        parsed: &mut Vec<Ref>,
        values: &mut HashSet<i64>,
    ) {
        let op = self.ir.block(bid).var(vid).op().unwrap();

        let out_ty = self.ir.block(bid).var(vid).ty;
        let unary: Option<fn(i64) -> i64> = match kind {
            OpKind::Not => Some(|a| !a),
            _ => None,
        };
        let binary: Option<fn(i64, i64) -> i64> = match kind {
            OpKind::Add => Some(i64::wrapping_add),
            OpKind::Sub => Some(i64::wrapping_sub),
            OpKind::Shl => Some(|a, b| a.wrapping_shl(b as u32)),
            OpKind::Or => Some(|a, b| a | b),
            OpKind::And => Some(|a, b| a & b),
            OpKind::Xor => Some(|a, b| a ^ b),
            _ => None,
        };

        match kind {
            OpKind::SignExtend => {
                let in_ty = op.inputs[0].map(|v| self.ir.block(bid).var(v).ty);
                if in_ty != Some(Type::I32) || out_ty != Type::I64 {
                    tracing::debug!(
                        "unsupported sign extension during backtracking (only i32 -> i64)"
                    );
                    return;
                }
                for combo in self.input_combinations(bid, vid, parsed) {
                    values.insert(combo[0] as i32 as i64);
                }
            }
            OpKind::Cast => {
                for combo in self.input_combinations(bid, vid, parsed) {
                    let v = match out_ty {
                        Type::I64 => combo[0],
                        Type::I32 => combo[0] as i32 as i64,
                        Type::I16 => combo[0] as i16 as i64,
                        Type::I8 => combo[0] as i8 as i64,
                        _ => {
                            tracing::debug!("invalid cast target during backtracking");
                            return;
                        }
                    };
                    values.insert(v);
                }
            }
            _ if unary.is_some() => {
                let f = unary.unwrap();
                for combo in self.input_combinations(bid, vid, parsed) {
                    values.insert(f(combo[0]));
                }
            }
            _ if binary.is_some() => {
                let f = binary.unwrap();
                for combo in self.input_combinations(bid, vid, parsed) {
                    values.insert(f(combo[0], combo[1]));
                }
            }
            _ => {
                tracing::debug!(%kind, "jump target cannot be computed through this operation");
            }
        }
    }

    /// Resolve every input of `vid`'s operation and enumerate the (bounded)
    /// product of their value sets.
    fn input_combinations(&self, bid: BlockId, vid: VarId, parsed: &mut Vec<Ref>) -> Vec<[i64; 4]> {
        let inputs: Vec<Option<VarId>> =
            self.ir.block(bid).var(vid).op().unwrap().inputs.to_vec();

        let mut possibilities: [Vec<i64>; 4] = Default::default();
        for (slot, input) in inputs.iter().enumerate() {
            let Some(input) = input else { break };
            let key = (bid, *input);
            if parsed.contains(&key) {
                // recursion guard; a revisited variable contributes nothing
                break;
            }
            parsed.push(key);
            possibilities[slot] = self.var_values(key, parsed).into_iter().collect();
            if possibilities[slot].is_empty() {
                // inputs resolve left to right; a hole ends the walk
                break;
            }
        }

        let mut combos: Vec<[i64; 4]> = vec![[0; 4]];
        for (slot, vals) in possibilities.iter().enumerate() {
            if vals.is_empty() {
                if slot == 0 {
                    return Vec::new();
                }
                break;
            }
            let mut next = Vec::new();
            for combo in &combos {
                for &v in vals {
                    let mut c = *combo;
                    c[slot] = v;
                    next.push(c);
                    if next.len() > MAX_VALUE_COMBINATIONS {
                        tracing::debug!("value combination bound reached during backtracking");
                        return next;
                    }
                }
            }
            combos = next;
        }
        combos
    }

    /// Search predecessor cf-ops for the values last written to static `s`
    /// on an edge into `start`.
    fn last_static_assignments(&self, s: StaticId, start: BlockId) -> Vec<Ref> {
        let full = self.config_full_backtracking();
        let mut found: Vec<Ref> = Vec::new();
        let mut found_set: HashSet<Ref> = HashSet::new();
        let mut visited: HashSet<BlockId> = HashSet::new();
        visited.insert(start);

        // (predecessor, block it reaches, depth)
        let mut queue: Vec<(BlockId, BlockId, usize)> = self
            .ir
            .block(start)
            .predecessors
            .iter()
            .map(|&p| (p, start, 0))
            .collect();

        let mut index = 0;
        while index < queue.len() {
            let (pred, desired, depth) = queue[index];
            index += 1;
            if depth > MAX_ADDRESS_SEARCH_DEPTH || visited.contains(&pred) {
                continue;
            }
            visited.insert(pred);
            for &pp in &self.ir.block(pred).predecessors {
                queue.push((pp, pred, depth + 1));
            }

            for cf in &self.ir.block(pred).cf_ops {
                match &cf.info {
                    CfInfo::IJump { mapping, targets } | CfInfo::ICall { mapping, targets, .. }
                        if targets.contains(&desired) =>
                    {
                        for &(var, static_idx) in mapping {
                            if static_idx != s {
                                continue;
                            }
                            let v = self.ir.block(pred).var(var);
                            if !v.is_static() && found_set.insert((pred, var)) {
                                found.push((pred, var));
                                if !full {
                                    break;
                                }
                            }
                        }
                    }
                    CfInfo::Syscall { .. } if cf.target() == Some(desired) => {
                        // syscalls clobber the result registers
                        if s == StaticId(rvx_isa::reg::A0 as u16)
                            || s == StaticId(rvx_isa::reg::A1 as u16)
                        {
                            continue;
                        }
                        self.collect_static_sources(pred, cf, s, full, &mut found, &mut found_set);
                    }
                    _ if cf.target() == Some(desired) => {
                        self.collect_static_sources(pred, cf, s, full, &mut found, &mut found_set);
                    }
                    _ => {}
                }
                if !full && !found.is_empty() {
                    break;
                }
            }
            if !full && !found.is_empty() {
                break;
            }
        }

        if full || found.is_empty() {
            found
        } else {
            found.truncate(1);
            found
        }
    }

    fn collect_static_sources(
        &self,
        pred: BlockId,
        cf: &rvx_ir::CfOp,
        s: StaticId,
        full: bool,
        found: &mut Vec<Ref>,
        found_set: &mut HashSet<Ref>,
    ) {
        for var in cf.target_input_vars() {
            let v = self.ir.block(pred).var(var);
            if v.is_static() || v.lifter.static_id != Some(s) {
                continue;
            }
            if found_set.insert((pred, var)) {
                found.push((pred, var));
                if !full {
                    return;
                }
            }
        }
    }

    fn config_full_backtracking(&self) -> bool {
        self.config.full_backtracking
    }
}
