use super::{Lifter, RegMap};
use hashbrown::HashMap;
use rvx_ir::{
    BlockId, CfInfo, OpKind, Rounding, StaticId, Type, VarId, VarInfo, MAPPED_STATICS, ZERO_IDX,
};

impl Lifter<'_> {
    /// Split `bb` at guest address `addr`, producing a second block that
    /// takes over the tail: all variables assigned at or after `addr`, the
    /// control-flow ops and the successors. The first half keeps the head
    /// and ends in a fresh jump carrying the register map at the split
    /// point; the second half reads its inputs from statics.
    pub(crate) fn split_block(&mut self, bb: BlockId, addr: u64) -> BlockId {
        debug_assert!(self.ir.block(bb).virt_start_addr < addr);

        // partition the definition order by assignment address
        let (pre_vars, post_vars): (Vec<VarId>, Vec<VarId>) = {
            let block = self.ir.block(bb);
            let mut pre = Vec::new();
            let mut post = Vec::new();
            for &v in &block.order {
                if block.var(v).lifter.assign_addr < addr {
                    pre.push(v);
                } else {
                    post.push(v);
                }
            }
            (pre, post)
        };
        assert!(!pre_vars.is_empty(), "split point before the first assignment");

        // register map at the split point: last definition per static wins
        let mut map: RegMap = [None; MAPPED_STATICS];
        for &v in &pre_vars {
            if let Some(s) = self.ir.block(bb).var(v).lifter.static_id {
                map[s.index()] = Some(v);
            }
        }
        map[ZERO_IDX.index()] = None;
        self.zero_extend_all_f32(bb, &mut map, addr);
        let pre_end_addr = self.ir.block(bb).var(*pre_vars.last().unwrap()).lifter.assign_addr;

        let new_bb = self.ir.add_basic_block(addr, "");

        // move control flow, successors and the address range
        let cf_ops = std::mem::take(&mut self.ir.block_mut(bb).cf_ops);
        let successors = std::mem::take(&mut self.ir.block_mut(bb).successors);
        for &succ in &successors {
            let preds = &mut self.ir.block_mut(succ).predecessors;
            preds.retain(|&p| p != bb);
            if !preds.contains(&new_bb) {
                preds.push(new_bb);
            }
        }
        self.ir.block_mut(new_bb).cf_ops = cf_ops;
        self.ir.block_mut(new_bb).successors = successors;
        let old_end = self.ir.block(bb).virt_end_addr;
        self.ir.block_mut(new_bb).virt_end_addr = old_end;
        self.ir.block_mut(bb).virt_end_addr = pre_end_addr;

        self.retarget_predecessors(bb, new_bb);

        // jumps out of the moved tail back into its own range
        for cf_idx in 0..self.ir.block(new_bb).cf_ops.len() {
            let cf = &self.ir.block(new_bb).cf_ops[cf_idx];
            let jmp = cf.lifter.jump_addr;
            if jmp == 0
                || matches!(
                    cf.info,
                    CfInfo::IJump { .. } | CfInfo::ICall { .. } | CfInfo::Return { .. }
                )
            {
                continue;
            }
            if jmp >= addr && jmp <= old_end && cf.target().is_some() {
                let old_target = cf.target();
                if old_target != Some(new_bb) {
                    if let Some(old_target) = old_target {
                        self.ir.unlink_blocks(new_bb, old_target);
                    }
                    self.ir.block_mut(new_bb).cf_ops[cf_idx].set_target(Some(new_bb));
                    self.ir.link_blocks(new_bb, new_bb);
                }
            }
        }

        // seal the first half with a jump carrying the split-point map
        let jump = self.ir.add_cf_op(
            bb,
            CfInfo::Jump { target: Some(new_bb), target_inputs: vec![] },
            pre_end_addr,
            addr,
        );
        for (s, entry) in map.iter().enumerate() {
            if let Some(var) = entry {
                self.ir.block_mut(bb).add_cf_target_input(jump, *var, StaticId(s as u16));
            }
        }

        // fresh inputs of the second half
        let mut new_map: RegMap = [None; MAPPED_STATICS];
        for s in 0..MAPPED_STATICS {
            new_map[s] = if s == ZERO_IDX.index() {
                None
            } else {
                Some(self.ir.add_var_from_static(new_bb, StaticId(s as u16), addr))
            };
        }

        let remap = self.move_tail_vars(bb, new_bb, addr, &post_vars, &mut new_map);
        self.fixup_moved_cf_ops(bb, new_bb, &remap, &new_map);

        // drop the moved tail from the first half; every reference has been
        // rewritten, so the counts must have reached zero
        for &old in &post_vars {
            self.ir.block_mut(bb).remove_var(old);
        }

        new_bb
    }

    /// Predecessor cf-ops whose jump address landed in the moved range now
    /// target the second half.
    fn retarget_predecessors(&mut self, bb: BlockId, new_bb: BlockId) {
        let new_start = self.ir.block(new_bb).virt_start_addr;
        let new_end = self.ir.block(new_bb).virt_end_addr;
        let preds = self.ir.block(bb).predecessors.clone();
        for pred in preds {
            for cf_idx in 0..self.ir.block(pred).cf_ops.len() {
                let cf = &self.ir.block(pred).cf_ops[cf_idx];
                let jmp = cf.lifter.jump_addr;
                if jmp == 0
                    || matches!(
                        cf.info,
                        CfInfo::IJump { .. } | CfInfo::ICall { .. } | CfInfo::Return { .. }
                    )
                {
                    continue;
                }
                if jmp < new_start || jmp > new_end || cf.target() != Some(bb) {
                    continue;
                }
                self.ir.retarget_cf_op(pred, cf_idx, new_bb);
            }
        }
    }

    /// Copy the tail variables into the second block, rewriting references
    /// to first-half values into the fresh static inputs. Returns the
    /// old-id -> new-id map.
    fn move_tail_vars(
        &mut self,
        bb: BlockId,
        new_bb: BlockId,
        addr: u64,
        post_vars: &[VarId],
        new_map: &mut RegMap,
    ) -> HashMap<VarId, VarId> {
        let mut remap: HashMap<VarId, VarId> = HashMap::new();

        // first create the slots so output back-pointers can be remapped
        for &old in post_vars {
            let (ty, lifter) = {
                let var = self.ir.block(bb).var(old);
                (var.ty, var.lifter)
            };
            let new = self.ir.block_mut(new_bb).new_var(ty, lifter.assign_addr);
            self.ir.block_mut(new_bb).var_mut(new).lifter = lifter;
            remap.insert(old, new);
        }

        for &old in post_vars {
            let new = remap[&old];
            let info = self.ir.block_mut(bb).take_info(old);
            match info {
                VarInfo::Uninit => {}
                VarInfo::Imm(imm) => {
                    self.ir.block_mut(new_bb).var_mut(new).info = VarInfo::Imm(imm);
                }
                VarInfo::Static(s) => {
                    panic!("from-static variable {old} (@{s}) found past the split point");
                }
                VarInfo::Op(mut op) => {
                    let single_precision = self.ir.block(new_bb).var(new).ty == Type::F32;
                    for slot in 0..op.inputs.len() {
                        let Some(input) = op.inputs[slot] else { continue };
                        self.ir.block_mut(bb).dec_ref(input);
                        op.inputs[slot] =
                            Some(self.tail_replacement(bb, new_bb, addr, &remap, new_map, input, single_precision));
                    }
                    for out in op.outputs.iter_mut().flatten() {
                        *out = remap[out];
                    }
                    if let Some(Rounding::Dynamic(rm)) = op.rounding {
                        self.ir.block_mut(bb).dec_ref(rm);
                        let repl =
                            self.tail_replacement(bb, new_bb, addr, &remap, new_map, rm, false);
                        op.rounding = Some(Rounding::Dynamic(repl));
                    }
                    self.ir.block_mut(new_bb).attach_op(new, op);
                }
            }

            if let Some(s) = self.ir.block(new_bb).var(new).lifter.static_id {
                if s != ZERO_IDX {
                    new_map[s.index()] = Some(new);
                }
            }
        }

        remap
    }

    /// Replacement for a reference held by moved code: the moved copy of a
    /// tail value, or the static input carrying a first-half value.
    fn tail_replacement(
        &mut self,
        bb: BlockId,
        new_bb: BlockId,
        addr: u64,
        remap: &HashMap<VarId, VarId>,
        new_map: &mut RegMap,
        old: VarId,
        single_precision: bool,
    ) -> VarId {
        if let Some(&moved) = remap.get(&old) {
            return moved;
        }
        let static_id = self
            .ir
            .block(bb)
            .var(old)
            .lifter
            .static_id
            .expect("first-half value crosses the split without a static slot");
        let repl = new_map[static_id.index()].expect("split register map missing a static");
        if single_precision && self.ir.block(bb).var(old).ty == Type::F32 {
            let casted = self.ir.block_mut(new_bb).emit(Type::F32, addr, OpKind::Cast, &[repl]);
            new_map[static_id.index()] = Some(casted);
            return casted;
        }
        repl
    }

    /// Rewrite the moved cf-ops onto the fresh variables and rebuild their
    /// target inputs from the new register map.
    fn fixup_moved_cf_ops(
        &mut self,
        bb: BlockId,
        new_bb: BlockId,
        remap: &HashMap<VarId, VarId>,
        new_map: &RegMap,
    ) {
        for cf_idx in 0..self.ir.block(new_bb).cf_ops.len() {
            for slot in 0..7 {
                let Some(old) = self.ir.block(new_bb).cf_ops[cf_idx].inputs[slot] else {
                    continue;
                };
                self.ir.block_mut(bb).dec_ref(old);
                let new = match remap.get(&old) {
                    Some(&moved) => moved,
                    None => {
                        let s = self
                            .ir
                            .block(bb)
                            .var(old)
                            .lifter
                            .static_id
                            .expect("cf-op input crosses the split without a static slot");
                        new_map[s.index()].expect("split register map missing a static")
                    }
                };
                self.ir.block_mut(new_bb).inc_ref(new);
                self.ir.block_mut(new_bb).cf_ops[cf_idx].inputs[slot] = Some(new);
            }

            if self.ir.block(new_bb).cf_ops[cf_idx].is_unreachable() {
                continue;
            }

            // drop the payload references (counted in the first half's
            // arena) and rebuild from the new map
            let payload = self.ir.block(new_bb).cf_ops[cf_idx].target_input_vars();
            for var in payload {
                self.ir.block_mut(bb).dec_ref(var);
            }
            match &mut self.ir.block_mut(new_bb).cf_ops[cf_idx].info {
                CfInfo::Jump { target_inputs, .. }
                | CfInfo::CJump { target_inputs, .. }
                | CfInfo::Call { target_inputs, .. } => target_inputs.clear(),
                CfInfo::Syscall { continuation_mapping, .. } => continuation_mapping.clear(),
                CfInfo::ICall { mapping, .. }
                | CfInfo::IJump { mapping, .. }
                | CfInfo::Return { mapping } => mapping.clear(),
                CfInfo::Unreachable => {}
            }
            for (s, entry) in new_map.iter().enumerate() {
                if let Some(var) = entry {
                    self.ir.block_mut(new_bb).add_cf_target_input(cf_idx, *var, StaticId(s as u16));
                }
            }
        }
    }
}
