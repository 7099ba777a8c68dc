//! The lifter: walks decoded guest instructions and populates the IR.
//!
//! A single linear sweep over the program view opens and seals basic blocks,
//! guided by a needs-block bitmap over the guest address range. Discovered
//! jump targets inside already-lifted blocks trigger block splitting; a
//! post-pass resolves leftover targets, wires call continuations, runs the
//! indirect-jump resolver and synthesizes the stack-setup entry block.

mod amo;
mod arith;
pub(crate) mod backtrack;
mod csr;
mod float;
mod flow;
mod jump_table;
mod mem;
mod muldiv;
mod shift;
mod split;

use crate::config::Config;
use crate::loader::{Payload, Program};
use rvx_ir::{
    BlockId, CfInfo, Ir, OpKind, StaticId, Type, VarId, FP_START_IDX, MAPPED_STATICS, MEM_IDX,
    ZERO_IDX,
};
use rvx_isa::{reg, DecodedInst, Mnem};

/// Register map of the sweep: static id -> variable currently holding the
/// value. Entry 0 (the zero register) is always `None`.
pub type RegMap = [Option<VarId>; MAPPED_STATICS];

pub struct Lifter<'a> {
    pub ir: &'a mut Ir,
    config: &'a Config,
    dummy: BlockId,
    needs_bb_start: Vec<bool>,
}

impl<'a> Lifter<'a> {
    pub fn new(ir: &'a mut Ir, config: &'a Config) -> Self {
        let dummy = ir.add_basic_block(0, "dummy");
        Lifter { ir, config, dummy, needs_bb_start: Vec::new() }
    }

    pub fn lift(&mut self, prog: &Program) -> crate::error::Result<()> {
        assert!(prog.elf.base_addr <= prog.elf.load_end_addr);
        self.ir.base_addr = prog.elf.base_addr;
        self.ir.load_size = prog.elf.load_end_addr - prog.elf.base_addr;
        self.ir.phdr_off = prog.elf.phdr_offset;
        self.ir.phdr_size = prog.elf.phdr_size;
        self.ir.phdr_num = prog.elf.phdr_num;
        self.ir.p_entry_addr = prog.elf.entry;

        let first = *prog.addrs.first().expect("empty program");
        let last = *prog.addrs.last().unwrap();
        self.ir.setup_bb_addr_range(first, last);
        self.needs_bb_start = vec![false; ((last - first) / 2 + 1) as usize];
        self.mark_needs_bb(prog.elf.entry);

        self.ir.install_guest_statics();

        self.sweep(prog);

        let entry = self
            .ir
            .block_starting_at(prog.elf.entry)
            .ok_or(crate::error::Error::EntryUnreachable(prog.elf.entry))?;
        self.ir.entry_block = Some(entry);

        self.postprocess(prog);
        Ok(())
    }

    fn mark_needs_bb(&mut self, addr: u64) {
        if self.ir.in_bb_range(addr) {
            let slot = ((addr - self.ir.virt_bb_start_addr) / 2) as usize;
            self.needs_bb_start[slot] = true;
        }
    }

    fn needs_bb(&self, addr: u64) -> bool {
        if !self.ir.in_bb_range(addr) {
            return false;
        }
        self.needs_bb_start[((addr - self.ir.virt_bb_start_addr) / 2) as usize]
    }

    /// Linear sweep over the program view.
    fn sweep(&mut self, prog: &Program) {
        let mut cur_bb: Option<BlockId> = None;
        let mut map: RegMap = [None; MAPPED_STATICS];

        for (i, &addr) in prog.addrs.iter().enumerate() {
            let inst = match &prog.data[i] {
                Payload::Inst(inst) if inst.mnem != Mnem::Invalid => *inst,
                _ => {
                    // data bytes or undecodable ranges close the open block
                    if let Some(bb) = cur_bb.take() {
                        self.ir.add_cf_op(bb, CfInfo::Unreachable, addr, 0);
                        self.ir.block_mut(bb).virt_end_addr = addr;
                    }
                    continue;
                }
            };

            if cur_bb.is_some() && self.needs_bb(addr) {
                let prev_addr = prog.addrs[i - 1];
                cur_bb = Some(self.open_block(cur_bb, &mut map, prev_addr, addr));
            }
            if cur_bb.is_none() {
                cur_bb = Some(self.open_block(None, &mut map, 0, addr));
            }
            let bb = cur_bb.unwrap();

            let next_addr = addr + inst.size as u64;
            self.parse_instruction(bb, &inst, &mut map, addr, next_addr);

            if !self.ir.block(bb).cf_ops.is_empty() {
                self.seal_block(prog, bb, &inst, &mut map, addr, next_addr);
                cur_bb = None;
            }
        }
    }

    /// Close `prev` (if any) with a fall-through jump carrying the register
    /// map and open a fresh block at `addr`.
    fn open_block(
        &mut self,
        prev: Option<BlockId>,
        map: &mut RegMap,
        prev_addr: u64,
        addr: u64,
    ) -> BlockId {
        let new_bb = self.ir.add_basic_block(addr, "");

        if let Some(prev) = prev {
            self.zero_extend_all_f32(prev, map, prev_addr);
            let cf = self.ir.add_cf_op(
                prev,
                CfInfo::Jump { target: Some(new_bb), target_inputs: vec![] },
                prev_addr,
                addr,
            );
            for (s, entry) in map.iter().enumerate() {
                if let Some(var) = entry {
                    self.ir.block_mut(prev).add_cf_target_input(cf, *var, StaticId(s as u16));
                }
            }
            self.ir.block_mut(prev).virt_end_addr = prev_addr;
        }

        for s in 0..MAPPED_STATICS {
            map[s] = if s == ZERO_IDX.index() {
                None
            } else {
                Some(self.ir.add_var_from_static(new_bb, StaticId(s as u16), addr))
            };
        }
        new_bb
    }

    /// f32 values must be widened into the f64 statics before leaving a
    /// block.
    fn zero_extend_all_f32(&mut self, bb: BlockId, map: &mut RegMap, addr: u64) {
        for s in FP_START_IDX.index()..MAPPED_STATICS {
            let Some(var) = map[s] else { continue };
            if self.ir.block(bb).var(var).ty == Type::F32 {
                let wide = self.ir.block_mut(bb).emit(Type::F64, addr, OpKind::ZeroExtend, &[var]);
                self.ir.block_mut(bb).var_mut(wide).lifter.static_id = Some(StaticId(s as u16));
                map[s] = Some(wide);
            }
        }
    }

    fn fill_target_inputs(&mut self, bb: BlockId, cf_idx: usize, map: &RegMap) {
        for (s, entry) in map.iter().enumerate() {
            if let Some(var) = entry {
                self.ir.block_mut(bb).add_cf_target_input(cf_idx, *var, StaticId(s as u16));
            }
        }
    }

    /// Block containing `addr`, in the sense the sweep uses: a sealed block
    /// whose range covers the address, or a still-open block starting there.
    fn find_block(&self, addr: u64) -> Option<BlockId> {
        if addr == 0 {
            return None;
        }
        if let Some(id) = self.ir.block_starting_at(addr) {
            return Some(id);
        }
        self.ir
            .blocks
            .iter()
            .find(|b| {
                b.virt_start_addr != 0
                    && b.virt_end_addr != 0
                    && b.virt_start_addr <= addr
                    && b.virt_end_addr >= addr
            })
            .map(|b| b.id)
    }

    /// Seal a block whose cf-ops were just emitted: resolve jump targets,
    /// fill target inputs, schedule splits and continuation blocks.
    fn seal_block(
        &mut self,
        prog: &Program,
        bb: BlockId,
        inst: &DecodedInst,
        map: &mut RegMap,
        addr: u64,
        next_addr: u64,
    ) {
        let mut bb = bb;
        self.ir.block_mut(bb).virt_end_addr = addr;

        for cf_idx in 0..self.ir.block(bb).cf_ops.len() {
            let cf = &self.ir.block(bb).cf_ops[cf_idx];
            match cf.info {
                CfInfo::Unreachable => continue,
                CfInfo::Return { .. } => {
                    if self.ir.block(bb).cf_ops[cf_idx].target_input_count() == 0 {
                        self.fill_target_inputs(bb, cf_idx, map);
                    }
                    continue;
                }
                _ => {}
            }

            let is_jump_table = self.detect_jump_table(prog, bb, cf_idx, inst);
            let jmp_addr = self.ir.block(bb).cf_ops[cf_idx].lifter.jump_addr;
            let next_bb = if is_jump_table || jmp_addr == 0 {
                Some(self.dummy)
            } else {
                self.find_block(jmp_addr)
            };

            if self.ir.block(bb).cf_ops[cf_idx].target_input_count() == 0 {
                self.zero_extend_all_f32(bb, map, addr);
                self.fill_target_inputs(bb, cf_idx, map);
            }

            let is_call = matches!(
                self.ir.block(bb).cf_ops[cf_idx].info,
                CfInfo::Call { .. } | CfInfo::ICall { .. }
            );
            if is_call {
                match self.find_block(next_addr) {
                    None => self.mark_needs_bb(next_addr),
                    Some(cont) => {
                        if self.ir.block(cont).virt_start_addr != next_addr {
                            self.split_block(cont, next_addr);
                        }
                    }
                }
            }

            match next_bb {
                Some(next) if next != self.dummy => {
                    match self.ir.block(bb).cf_ops[cf_idx].target() {
                        None => self.ir.retarget_cf_op(bb, cf_idx, next),
                        Some(t) => debug_assert_eq!(t, next),
                    }
                    if self.ir.block(next).virt_start_addr != jmp_addr {
                        let second = self.split_block(next, jmp_addr);
                        if next == bb {
                            // a backward jump into the block being sealed;
                            // its cf-ops now live in the second half
                            bb = second;
                        }
                    }
                }
                _ => {
                    self.mark_needs_bb(jmp_addr);
                }
            }
        }
    }

    /// Post-sweep fixups; see the module docs.
    fn postprocess(&mut self, prog: &Program) {
        // resolving a target can split an earlier block, appending its moved
        // tail to the block list; the index loop picks those up again
        let mut idx = 0;
        while idx < self.ir.blocks.len() {
            let bid = BlockId(idx as u32);
            idx += 1;
            for cf_idx in 0..self.ir.block(bid).cf_ops.len() {
                let cf = &self.ir.block(bid).cf_ops[cf_idx];
                if matches!(cf.info, CfInfo::Unreachable | CfInfo::Return { .. }) {
                    continue;
                }
                let instr_addr = cf.lifter.instr_addr;
                let jump_addr = cf.lifter.jump_addr;
                let is_call = matches!(cf.info, CfInfo::Call { .. } | CfInfo::ICall { .. });

                if is_call && instr_addr != 0 {
                    self.wire_continuation(bid, cf_idx, instr_addr);
                }

                if matches!(
                    self.ir.block(bid).cf_ops[cf_idx].info,
                    CfInfo::IJump { .. } | CfInfo::ICall { .. }
                ) {
                    // handled by the resolver after every split settled
                    continue;
                }

                let cur_target = self.ir.block(bid).cf_ops[cf_idx].target();
                if let Some(t) = cur_target {
                    if t != self.dummy {
                        if matches!(self.ir.block(bid).cf_ops[cf_idx].info, CfInfo::Call { .. }) {
                            self.ir.block_mut(t).gen.call_target = true;
                        }
                        continue;
                    }
                }

                match self.find_block(jump_addr) {
                    Some(target) => {
                        if let Some(old) = cur_target {
                            self.ir.unlink_blocks(bid, old);
                        }
                        let target = if self.ir.block(target).virt_start_addr != jump_addr {
                            self.split_block(target, jump_addr)
                        } else {
                            target
                        };
                        self.ir.block_mut(bid).cf_ops[cf_idx].set_target(None);
                        self.ir.retarget_cf_op(bid, cf_idx, target);
                        if matches!(self.ir.block(bid).cf_ops[cf_idx].info, CfInfo::Call { .. }) {
                            self.ir.block_mut(target).gen.call_target = true;
                        }
                    }
                    None => {
                        tracing::debug!(
                            block = %bid,
                            addr = format_args!("{jump_addr:#x}"),
                            "no target block, rewriting cf-op to unreachable"
                        );
                        if let Some(old) = cur_target {
                            self.ir.unlink_blocks(bid, old);
                        }
                        self.ir.block_mut(bid).make_cf_unreachable(cf_idx);
                    }
                }
            }
        }

        // drop everything still routed through the dummy block
        let dummy_preds = self.ir.block(self.dummy).predecessors.clone();
        for pred in dummy_preds {
            for cf_idx in 0..self.ir.block(pred).cf_ops.len() {
                let cf = &self.ir.block(pred).cf_ops[cf_idx];
                if cf.target() == Some(self.dummy) && !matches!(cf.info, CfInfo::Syscall { .. }) {
                    self.ir.block_mut(pred).make_cf_unreachable(cf_idx);
                    self.ir.unlink_blocks(pred, self.dummy);
                }
            }
        }
        self.ir.block_mut(self.dummy).predecessors.clear();

        // make binary-relative immediates actually relative
        let base = self.ir.base_addr;
        for block in &mut self.ir.blocks {
            for i in 0..block.order.len() {
                let vid = block.order[i];
                if let rvx_ir::VarInfo::Imm(imm) = &mut block.var_mut(vid).info {
                    if imm.binary_relative {
                        imm.val = imm.val.wrapping_sub(base as i64);
                    }
                }
            }
        }

        self.resolve_ijumps(prog);

        self.split_pending();

        self.synthesize_entry();
    }

    fn wire_continuation(&mut self, bid: BlockId, cf_idx: usize, instr_addr: u64) {
        let found = self
            .find_block(instr_addr + 4)
            .map(|c| (c, instr_addr + 4))
            .or_else(|| self.find_block(instr_addr + 2).map(|c| (c, instr_addr + 2)));
        let cont = match found {
            Some((c, addr)) if self.ir.block(c).virt_start_addr == addr => c,
            Some((c, addr)) => self.split_block(c, addr),
            None => {
                let c = self.ir.add_basic_block(instr_addr + 4, "");
                self.ir.block_mut(c).virt_end_addr = instr_addr + 4;
                self.ir.add_cf_op(c, CfInfo::Unreachable, instr_addr + 4, 0);
                c
            }
        };
        match &mut self.ir.block_mut(bid).cf_ops[cf_idx].info {
            CfInfo::Call { continuation, .. } | CfInfo::ICall { continuation, .. } => {
                *continuation = Some(cont)
            }
            _ => unreachable!(),
        }
        self.ir.link_blocks(bid, cont);
        self.ir.block_mut(cont).gen.call_cont_block = true;
    }

    /// Second splitting pass: block entries discovered late (jump tables,
    /// backtracked ijump targets) that landed inside existing blocks.
    fn split_pending(&mut self) {
        for slot in 0..self.needs_bb_start.len() {
            if !self.needs_bb_start[slot] {
                continue;
            }
            let addr = self.ir.virt_bb_start_addr + 2 * slot as u64;
            if self.ir.block_starting_at(addr).is_some() {
                continue;
            }
            if let Some(inside) = self.find_block(addr) {
                if self.ir.block(inside).virt_start_addr != addr {
                    self.split_block(inside, addr);
                }
            }
        }
    }

    /// Prepend the synthetic entry: `setup_stack` into the stack-pointer
    /// static, then a jump into the original entry with all statics.
    fn synthesize_entry(&mut self) {
        let program_entry = self.ir.entry_block.expect("entry block unset");
        let entry = self.ir.add_basic_block(0, "___STACK_ENTRY");
        let cf = self.ir.add_cf_op(
            entry,
            CfInfo::Jump { target: Some(program_entry), target_inputs: vec![] },
            0,
            self.ir.block(program_entry).virt_start_addr,
        );
        for s in 1..MAPPED_STATICS {
            let var = if s == reg::SP as usize {
                let block = self.ir.block_mut(entry);
                let var = block.emit(Type::I64, 0, OpKind::SetupStack, &[]);
                block.var_mut(var).lifter.static_id = Some(StaticId(s as u16));
                var
            } else {
                self.ir.add_var_from_static(entry, StaticId(s as u16), 0)
            };
            self.ir.block_mut(entry).add_cf_target_input(cf, var, StaticId(s as u16));
        }
        self.ir.entry_block = Some(entry);
    }

    // ---- shared lifting helpers -------------------------------------------

    pub(crate) fn load_imm(&mut self, bb: BlockId, val: i64, ip: u64, binary_relative: bool) -> VarId {
        self.ir.block_mut(bb).new_imm(val, ip, binary_relative)
    }

    pub(crate) fn get_from_mapping(
        &mut self,
        bb: BlockId,
        map: &RegMap,
        reg: u8,
        ip: u64,
        fp: bool,
    ) -> VarId {
        if !fp && reg == reg::ZERO {
            return self.ir.block_mut(bb).new_imm(0, ip, false);
        }
        let idx = if fp { FP_START_IDX.index() + reg as usize } else { reg as usize };
        map[idx].expect("register map entry missing")
    }

    pub(crate) fn write_to_mapping(
        &mut self,
        bb: BlockId,
        map: &mut RegMap,
        var: VarId,
        reg: u8,
        fp: bool,
    ) {
        if !fp && reg == reg::ZERO {
            return;
        }
        let idx = if fp { FP_START_IDX.index() + reg as usize } else { reg as usize };
        self.ir.block_mut(bb).var_mut(var).lifter.static_id = Some(StaticId(idx as u16));
        map[idx] = Some(var);
    }

    pub(crate) fn memory_token(&self, map: &RegMap) -> VarId {
        map[MEM_IDX.index()].expect("memory token missing from register map")
    }

    /// Narrowing cast helper.
    pub(crate) fn shrink_var(&mut self, bb: BlockId, var: VarId, ip: u64, ty: Type) -> VarId {
        self.ir.block_mut(bb).emit(ty, ip, OpKind::Cast, &[var])
    }

    /// Bring `var` to `ty`, inserting a cast or sign-extension as needed.
    pub(crate) fn convert_type(
        &mut self,
        bb: BlockId,
        ip: u64,
        var: VarId,
        ty: Type,
    ) -> Option<VarId> {
        let cur = self.ir.block(bb).var(var).ty;
        if cur == ty || cur == Type::Imm {
            return Some(var);
        }
        let kind = match Type::cast_dir(cur, ty)? {
            1 => OpKind::SignExtend,
            _ => OpKind::Cast,
        };
        Some(self.ir.block_mut(bb).emit(ty, ip, kind, &[var]))
    }

    /// Per-opcode dispatch.
    fn parse_instruction(
        &mut self,
        bb: BlockId,
        inst: &DecodedInst,
        map: &mut RegMap,
        ip: u64,
        next_addr: u64,
    ) {
        use OpKind::*;
        match inst.mnem {
            Mnem::Invalid => unreachable!("invalid instructions close blocks in the sweep"),

            Mnem::Lb => self.lift_load(bb, inst, map, ip, Type::I8, true),
            Mnem::Lh => self.lift_load(bb, inst, map, ip, Type::I16, true),
            Mnem::Lw => self.lift_load(bb, inst, map, ip, Type::I32, true),
            Mnem::Ld => self.lift_load(bb, inst, map, ip, Type::I64, true),
            Mnem::Lbu => self.lift_load(bb, inst, map, ip, Type::I8, false),
            Mnem::Lhu => self.lift_load(bb, inst, map, ip, Type::I16, false),
            Mnem::Lwu => self.lift_load(bb, inst, map, ip, Type::I32, false),

            Mnem::Sb => self.lift_store(bb, inst, map, ip, Type::I8),
            Mnem::Sh => self.lift_store(bb, inst, map, ip, Type::I16),
            Mnem::Sw => self.lift_store(bb, inst, map, ip, Type::I32),
            Mnem::Sd => self.lift_store(bb, inst, map, ip, Type::I64),

            Mnem::Add => self.lift_arith(bb, inst, map, ip, Add, Type::I64),
            Mnem::Addw => self.lift_arith(bb, inst, map, ip, Add, Type::I32),
            Mnem::Sub => self.lift_arith(bb, inst, map, ip, Sub, Type::I64),
            Mnem::Subw => self.lift_arith(bb, inst, map, ip, Sub, Type::I32),
            Mnem::And => self.lift_arith(bb, inst, map, ip, OpKind::And, Type::I64),
            Mnem::Or => self.lift_arith(bb, inst, map, ip, OpKind::Or, Type::I64),
            Mnem::Xor => self.lift_arith(bb, inst, map, ip, OpKind::Xor, Type::I64),
            Mnem::Addi => self.lift_arith_imm(bb, inst, map, ip, Add, Type::I64),
            Mnem::Addiw => self.lift_arith_imm(bb, inst, map, ip, Add, Type::I32),
            Mnem::Andi => self.lift_arith_imm(bb, inst, map, ip, OpKind::And, Type::I64),
            Mnem::Ori => self.lift_arith_imm(bb, inst, map, ip, OpKind::Or, Type::I64),
            Mnem::Xori => self.lift_arith_imm(bb, inst, map, ip, OpKind::Xor, Type::I64),

            Mnem::Mul => self.lift_mul(bb, inst, map, ip, MulL, Type::I64),
            Mnem::Mulh => self.lift_mul(bb, inst, map, ip, SsmulH, Type::I64),
            Mnem::Mulhsu => self.lift_mul(bb, inst, map, ip, SumulH, Type::I64),
            Mnem::Mulhu => self.lift_mul(bb, inst, map, ip, UumulH, Type::I64),
            Mnem::Mulw => self.lift_mul(bb, inst, map, ip, MulL, Type::I32),

            Mnem::Div => self.lift_div(bb, inst, map, ip, true, false, Type::I64),
            Mnem::Divu => self.lift_div(bb, inst, map, ip, false, false, Type::I64),
            Mnem::Divw => self.lift_div(bb, inst, map, ip, true, false, Type::I32),
            Mnem::Divuw => self.lift_div(bb, inst, map, ip, false, false, Type::I32),
            Mnem::Rem => self.lift_div(bb, inst, map, ip, true, true, Type::I64),
            Mnem::Remu => self.lift_div(bb, inst, map, ip, false, true, Type::I64),
            Mnem::Remw => self.lift_div(bb, inst, map, ip, true, true, Type::I32),
            Mnem::Remuw => self.lift_div(bb, inst, map, ip, false, true, Type::I32),

            Mnem::Sll => self.lift_shift(bb, inst, map, ip, Shl, Type::I64),
            Mnem::Sllw => self.lift_shift(bb, inst, map, ip, Shl, Type::I32),
            Mnem::Srl => self.lift_shift(bb, inst, map, ip, Shr, Type::I64),
            Mnem::Srlw => self.lift_shift(bb, inst, map, ip, Shr, Type::I32),
            Mnem::Sra => self.lift_shift(bb, inst, map, ip, Sar, Type::I64),
            Mnem::Sraw => self.lift_shift(bb, inst, map, ip, Sar, Type::I32),
            Mnem::Slli => self.lift_shift_imm(bb, inst, map, ip, Shl, Type::I64),
            Mnem::Slliw => self.lift_shift_imm(bb, inst, map, ip, Shl, Type::I32),
            Mnem::Srli => self.lift_shift_imm(bb, inst, map, ip, Shr, Type::I64),
            Mnem::Srliw => self.lift_shift_imm(bb, inst, map, ip, Shr, Type::I32),
            Mnem::Srai => self.lift_shift_imm(bb, inst, map, ip, Sar, Type::I64),
            Mnem::Sraiw => self.lift_shift_imm(bb, inst, map, ip, Sar, Type::I32),

            Mnem::Slti => self.lift_slt(bb, inst, map, ip, false, true),
            Mnem::Sltiu => self.lift_slt(bb, inst, map, ip, true, true),
            Mnem::Slt => self.lift_slt(bb, inst, map, ip, false, false),
            Mnem::Sltu => self.lift_slt(bb, inst, map, ip, true, false),

            Mnem::Lui => self.lift_lui(bb, inst, map, ip),
            Mnem::Auipc => self.lift_auipc(bb, inst, map, ip),

            Mnem::Jal => self.lift_jal(bb, inst, map, ip, next_addr),
            Mnem::Jalr => self.lift_jalr(bb, inst, map, ip, next_addr),
            Mnem::Beq | Mnem::Bne | Mnem::Blt | Mnem::Bge | Mnem::Bltu | Mnem::Bgeu => {
                self.lift_branch(bb, inst, map, ip, next_addr)
            }
            Mnem::Ecall | Mnem::Ebreak => self.lift_ecall(bb, map, ip, next_addr),

            Mnem::Fence | Mnem::FenceI => {
                tracing::debug!(addr = format_args!("{ip:#x}"), "skipping fence instruction");
            }

            Mnem::Csrrw => self.lift_csr_read_write(bb, inst, map, ip, false),
            Mnem::Csrrwi => self.lift_csr_read_write(bb, inst, map, ip, true),
            Mnem::Csrrs => self.lift_csr_read_set(bb, inst, map, ip, false),
            Mnem::Csrrsi => self.lift_csr_read_set(bb, inst, map, ip, true),
            Mnem::Csrrc => self.lift_csr_read_clear(bb, inst, map, ip, false),
            Mnem::Csrrci => self.lift_csr_read_clear(bb, inst, map, ip, true),

            Mnem::LrW => self.lift_amo_load_reserve(bb, inst, map, ip, Type::I32),
            Mnem::LrD => self.lift_amo_load_reserve(bb, inst, map, ip, Type::I64),
            Mnem::ScW => self.lift_amo_store_conditional(bb, inst, map, ip, Type::I32),
            Mnem::ScD => self.lift_amo_store_conditional(bb, inst, map, ip, Type::I64),
            Mnem::AmoSwapW => self.lift_amo_swap(bb, inst, map, ip, Type::I32),
            Mnem::AmoSwapD => self.lift_amo_swap(bb, inst, map, ip, Type::I64),
            Mnem::AmoAddW => self.lift_amo_binary(bb, inst, map, ip, Type::I32, Add),
            Mnem::AmoAddD => self.lift_amo_binary(bb, inst, map, ip, Type::I64, Add),
            Mnem::AmoXorW => self.lift_amo_binary(bb, inst, map, ip, Type::I32, OpKind::Xor),
            Mnem::AmoXorD => self.lift_amo_binary(bb, inst, map, ip, Type::I64, OpKind::Xor),
            Mnem::AmoAndW => self.lift_amo_binary(bb, inst, map, ip, Type::I32, OpKind::And),
            Mnem::AmoAndD => self.lift_amo_binary(bb, inst, map, ip, Type::I64, OpKind::And),
            Mnem::AmoOrW => self.lift_amo_binary(bb, inst, map, ip, Type::I32, OpKind::Or),
            Mnem::AmoOrD => self.lift_amo_binary(bb, inst, map, ip, Type::I64, OpKind::Or),
            Mnem::AmoMinW => self.lift_amo_binary(bb, inst, map, ip, Type::I32, Min),
            Mnem::AmoMinD => self.lift_amo_binary(bb, inst, map, ip, Type::I64, Min),
            Mnem::AmoMaxW => self.lift_amo_binary(bb, inst, map, ip, Type::I32, Max),
            Mnem::AmoMaxD => self.lift_amo_binary(bb, inst, map, ip, Type::I64, Max),
            Mnem::AmoMinuW => self.lift_amo_binary(bb, inst, map, ip, Type::I32, Umin),
            Mnem::AmoMinuD => self.lift_amo_binary(bb, inst, map, ip, Type::I64, Umin),
            Mnem::AmoMaxuW => self.lift_amo_binary(bb, inst, map, ip, Type::I32, Umax),
            Mnem::AmoMaxuD => self.lift_amo_binary(bb, inst, map, ip, Type::I64, Umax),

            Mnem::Flw => self.lift_fp_load(bb, inst, map, ip, Type::F32),
            Mnem::Fld => self.lift_fp_load(bb, inst, map, ip, Type::F64),
            Mnem::Fsw => self.lift_fp_store(bb, inst, map, ip, Type::F32),
            Mnem::Fsd => self.lift_fp_store(bb, inst, map, ip, Type::F64),

            Mnem::FaddS => self.lift_fp_arith(bb, inst, map, ip, Add, Type::F32),
            Mnem::FaddD => self.lift_fp_arith(bb, inst, map, ip, Add, Type::F64),
            Mnem::FsubS => self.lift_fp_arith(bb, inst, map, ip, Sub, Type::F32),
            Mnem::FsubD => self.lift_fp_arith(bb, inst, map, ip, Sub, Type::F64),
            Mnem::FmulS => self.lift_fp_arith(bb, inst, map, ip, Fmul, Type::F32),
            Mnem::FmulD => self.lift_fp_arith(bb, inst, map, ip, Fmul, Type::F64),
            Mnem::FdivS => self.lift_fp_arith(bb, inst, map, ip, Fdiv, Type::F32),
            Mnem::FdivD => self.lift_fp_arith(bb, inst, map, ip, Fdiv, Type::F64),
            Mnem::FsqrtS => self.lift_fsqrt(bb, inst, map, ip, Type::F32),
            Mnem::FsqrtD => self.lift_fsqrt(bb, inst, map, ip, Type::F64),
            Mnem::FminS => self.lift_fp_arith(bb, inst, map, ip, Fmin, Type::F32),
            Mnem::FminD => self.lift_fp_arith(bb, inst, map, ip, Fmin, Type::F64),
            Mnem::FmaxS => self.lift_fp_arith(bb, inst, map, ip, Fmax, Type::F32),
            Mnem::FmaxD => self.lift_fp_arith(bb, inst, map, ip, Fmax, Type::F64),

            Mnem::FmaddS => self.lift_fp_fma(bb, inst, map, ip, Ffmadd, Type::F32),
            Mnem::FmaddD => self.lift_fp_fma(bb, inst, map, ip, Ffmadd, Type::F64),
            Mnem::FmsubS => self.lift_fp_fma(bb, inst, map, ip, Ffmsub, Type::F32),
            Mnem::FmsubD => self.lift_fp_fma(bb, inst, map, ip, Ffmsub, Type::F64),
            Mnem::FnmaddS => self.lift_fp_fma(bb, inst, map, ip, Ffnmadd, Type::F32),
            Mnem::FnmaddD => self.lift_fp_fma(bb, inst, map, ip, Ffnmadd, Type::F64),
            Mnem::FnmsubS => self.lift_fp_fma(bb, inst, map, ip, Ffnmsub, Type::F32),
            Mnem::FnmsubD => self.lift_fp_fma(bb, inst, map, ip, Ffnmsub, Type::F64),

            Mnem::FsgnjS | Mnem::FsgnjnS | Mnem::FsgnjxS => {
                self.lift_fsgnj(bb, inst, map, ip, Type::F32)
            }
            Mnem::FsgnjD | Mnem::FsgnjnD | Mnem::FsgnjxD => {
                self.lift_fsgnj(bb, inst, map, ip, Type::F64)
            }

            Mnem::FeqS => self.lift_fp_compare(bb, inst, map, ip, Feq, Type::F32),
            Mnem::FeqD => self.lift_fp_compare(bb, inst, map, ip, Feq, Type::F64),
            Mnem::FltS => self.lift_fp_compare(bb, inst, map, ip, Flt, Type::F32),
            Mnem::FltD => self.lift_fp_compare(bb, inst, map, ip, Flt, Type::F64),
            Mnem::FleS => self.lift_fp_compare(bb, inst, map, ip, Fle, Type::F32),
            Mnem::FleD => self.lift_fp_compare(bb, inst, map, ip, Fle, Type::F64),

            Mnem::FcvtWS => self.lift_fp_convert(bb, inst, map, ip, Type::F32, Type::I32, true),
            Mnem::FcvtWuS => self.lift_fp_convert(bb, inst, map, ip, Type::F32, Type::I32, false),
            Mnem::FcvtLS => self.lift_fp_convert(bb, inst, map, ip, Type::F32, Type::I64, true),
            Mnem::FcvtLuS => self.lift_fp_convert(bb, inst, map, ip, Type::F32, Type::I64, false),
            Mnem::FcvtSW => self.lift_fp_convert(bb, inst, map, ip, Type::I32, Type::F32, true),
            Mnem::FcvtSWu => self.lift_fp_convert(bb, inst, map, ip, Type::I32, Type::F32, false),
            Mnem::FcvtSL => self.lift_fp_convert(bb, inst, map, ip, Type::I64, Type::F32, true),
            Mnem::FcvtSLu => self.lift_fp_convert(bb, inst, map, ip, Type::I64, Type::F32, false),
            Mnem::FcvtWD => self.lift_fp_convert(bb, inst, map, ip, Type::F64, Type::I32, true),
            Mnem::FcvtWuD => self.lift_fp_convert(bb, inst, map, ip, Type::F64, Type::I32, false),
            Mnem::FcvtLD => self.lift_fp_convert(bb, inst, map, ip, Type::F64, Type::I64, true),
            Mnem::FcvtLuD => self.lift_fp_convert(bb, inst, map, ip, Type::F64, Type::I64, false),
            Mnem::FcvtDW => self.lift_fp_convert(bb, inst, map, ip, Type::I32, Type::F64, true),
            Mnem::FcvtDWu => self.lift_fp_convert(bb, inst, map, ip, Type::I32, Type::F64, false),
            Mnem::FcvtDL => self.lift_fp_convert(bb, inst, map, ip, Type::I64, Type::F64, true),
            Mnem::FcvtDLu => self.lift_fp_convert(bb, inst, map, ip, Type::I64, Type::F64, false),
            Mnem::FcvtSD => self.lift_fp_convert(bb, inst, map, ip, Type::F64, Type::F32, true),
            Mnem::FcvtDS => self.lift_fp_convert(bb, inst, map, ip, Type::F32, Type::F64, true),

            Mnem::FmvXW | Mnem::FmvXD | Mnem::FmvWX | Mnem::FmvDX => {
                self.lift_fmv(bb, inst, map, ip)
            }
            Mnem::FclassS => self.lift_fclass(bb, inst, map, ip, Type::F32),
            Mnem::FclassD => self.lift_fclass(bb, inst, map, ip, Type::F64),
        }
    }
}
