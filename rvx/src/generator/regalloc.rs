//! Multi-block register allocator and instruction selector.
//!
//! Blocks reached by a single chain of direct transfers share register state
//! inside one superblock: values travel between them in registers or stack
//! slots, and only the superblock entry ("top level") reads every input from
//! the statics. Allocation is greedy with farthest-next-use eviction; spilled
//! values land in the superblock's stack frame, immediates are rematerialized
//! instead of spilled.

use super::{ErrType, GenCtx};
use crate::config::GenFlags;
use rvx_ir::{
    BlockId, CfInfo, CmpKind, InputLoc, Location, OpKind, Operation, Rounding, RoundingMode,
    StaticId, Type, VarId, VarInfo,
};
use std::fmt::Write as _;
use std::io::Write as _;

pub(crate) const REG_COUNT: usize = 14;

/// Allocatable general-purpose register, an index into the name table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Reg(pub u8);

pub(crate) const REG_A: Reg = Reg(0);
pub(crate) const REG_B: Reg = Reg(1);
pub(crate) const REG_C: Reg = Reg(2);
pub(crate) const REG_D: Reg = Reg(3);

static REG_NAMES: [[&str; 4]; REG_COUNT] = [
    ["rax", "eax", "ax", "al"],
    ["rbx", "ebx", "bx", "bl"],
    ["rcx", "ecx", "cx", "cl"],
    ["rdx", "edx", "dx", "dl"],
    ["rdi", "edi", "di", "dil"],
    ["rsi", "esi", "si", "sil"],
    ["r8", "r8d", "r8w", "r8b"],
    ["r9", "r9d", "r9w", "r9b"],
    ["r10", "r10d", "r10w", "r10b"],
    ["r11", "r11d", "r11w", "r11b"],
    ["r12", "r12d", "r12w", "r12b"],
    ["r13", "r13d", "r13w", "r13b"],
    ["r14", "r14d", "r14w", "r14b"],
    ["r15", "r15d", "r15w", "r15b"],
];

/// System V argument registers used for the syscall helper call.
static CALL_REGS: [Reg; 6] = [Reg(4), Reg(5), Reg(3), Reg(2), Reg(6), Reg(7)];

static_assertions::const_assert_eq!(REG_NAMES.len(), REG_COUNT);

fn width_idx(ty: Type) -> usize {
    match ty {
        Type::I64 | Type::Imm | Type::F64 => 0,
        Type::I32 | Type::F32 => 1,
        Type::I16 => 2,
        Type::I8 => 3,
        Type::Mt => panic!("memory token reached the register allocator"),
    }
}

pub(crate) fn reg_name(reg: Reg, ty: Type) -> &'static str {
    REG_NAMES[reg.0 as usize][width_idx(ty)]
}

fn reg64(reg: Reg) -> &'static str {
    REG_NAMES[reg.0 as usize][0]
}

fn mem_size(ty: Type) -> &'static str {
    match width_idx(ty) {
        0 => "qword ptr",
        1 => "dword ptr",
        2 => "word ptr",
        _ => "byte ptr",
    }
}

/// Fits the sign-extended 32-bit immediate field of most instructions.
fn imm_fits_i32(val: i64) -> bool {
    val as u64 != 0x8000_0000_0000_0000 && val.unsigned_abs() <= 0x7fff_ffff
}

#[derive(Debug, Clone, Copy, Default)]
struct RegState {
    var: Option<VarId>,
    alloc_time: u32,
}

#[derive(Debug, Clone, Copy)]
struct StackSlot {
    free: bool,
    #[allow(dead_code)]
    var: Option<VarId>,
}

struct AssembledBlock {
    bb: BlockId,
    assembly: String,
    reg_map: [RegState; REG_COUNT],
    stack_map: Vec<StackSlot>,
}

pub(crate) struct RegAlloc<'a, 'b> {
    pub ctx: &'a mut GenCtx<'b>,
    asm_buf: String,
    cur_bb: BlockId,
    reg_map: [RegState; REG_COUNT],
    stack_map: Vec<StackSlot>,
    assembled: Vec<AssembledBlock>,
    translation_blocks: Vec<(BlockId, String)>,
    /// Superblock lead each compiled block belongs to; transfers between
    /// superblocks go through the statics and the target's entry thunk.
    superblock_of: hashbrown::HashMap<BlockId, BlockId>,
}

macro_rules! asm {
    ($s:expr, $($t:tt)*) => {{
        let _ = writeln!($s.asm_buf, $($t)*);
    }};
}

impl<'a, 'b> RegAlloc<'a, 'b> {
    pub fn new(ctx: &'a mut GenCtx<'b>) -> Self {
        RegAlloc {
            ctx,
            asm_buf: String::new(),
            cur_bb: BlockId(0),
            reg_map: Default::default(),
            stack_map: Vec::new(),
            assembled: Vec::new(),
            translation_blocks: Vec::new(),
            superblock_of: hashbrown::HashMap::new(),
        }
    }

    fn merge_ops(&self) -> bool {
        self.ctx.config.gen_flags.contains(GenFlags::MERGE_OP)
    }

    fn bmi2(&self) -> bool {
        self.ctx.config.gen_flags.contains(GenFlags::ARCH_BMI2)
    }

    /// Identity writes (a static moved onto itself) can be skipped as long
    /// as cf-op mappings never swap two statics, which lifted code does not
    /// produce.
    fn skip_identity_statics(&self) -> bool {
        self.ctx.config.gen_flags.contains(GenFlags::UNUSED_STATIC)
    }

    // ---- var/gen accessors -------------------------------------------------

    fn vty(&self, v: VarId) -> Type {
        self.ctx.ir.block(self.cur_bb).var(v).ty
    }

    fn vimm(&self, v: VarId) -> Option<rvx_ir::Imm> {
        self.ctx.ir.block(self.cur_bb).var(v).imm()
    }

    fn vloc(&self, v: VarId) -> Location {
        self.ctx.ir.block(self.cur_bb).var(v).gen.location
    }

    fn vgen(&self, v: VarId) -> &rvx_ir::GenInfo {
        &self.ctx.ir.block(self.cur_bb).var(v).gen
    }

    fn vgen_mut(&mut self, v: VarId) -> &mut rvx_ir::GenInfo {
        &mut self.ctx.ir.block_mut(self.cur_bb).var_mut(v).gen
    }

    fn last_use(&self, v: VarId) -> u32 {
        self.vgen(v).last_use_time
    }

    /// Operand type of a two-source operation; immediates defer to the other
    /// side.
    fn choose_type(&self, a: VarId, b: VarId) -> Type {
        let (ta, tb) = (self.vty(a), self.vty(b));
        match (ta == Type::Imm, tb == Type::Imm) {
            (true, true) => Type::I64,
            (true, false) => tb,
            _ => ta,
        }
    }

    // ---- driver ------------------------------------------------------------

    pub fn compile_blocks(&mut self, out: &mut dyn std::io::Write) -> std::io::Result<()> {
        for pass in 0..2 {
            for idx in 0..self.ctx.ir.blocks.len() {
                let bid = BlockId(idx as u32);
                {
                    let block = self.ctx.ir.block(bid);
                    if block.gen.compiled || (block.cf_ops.is_empty() && block.order.is_empty()) {
                        continue;
                    }
                }
                if pass == 0 && !self.is_top_level(bid) {
                    continue;
                }
                if pass == 1 {
                    // circular superblocks never look top-level; force the
                    // lowest-id member to lead
                    self.ctx.ir.block_mut(bid).gen.manual_top_level = true;
                }
                self.seed_static_inputs(bid);
                if !self.ctx.ir.block(bid).gen.input_map_setup {
                    self.generate_input_map(bid);
                }
                self.compile_superblock(bid, out)?;
            }
        }
        Ok(())
    }

    fn is_top_level(&self, bid: BlockId) -> bool {
        let block = self.ctx.ir.block(bid);
        if block.gen.manual_top_level {
            return true;
        }
        block.predecessors.iter().all(|&p| p == bid)
    }

    /// Bind every block input to its static slot.
    fn seed_static_inputs(&mut self, bid: BlockId) {
        for i in 0..self.ctx.ir.block(bid).inputs.len() {
            let input = self.ctx.ir.block(bid).inputs[i];
            let s = self
                .ctx
                .ir
                .block(bid)
                .var(input)
                .static_idx()
                .expect("block input without a static binding");
            self.ctx.ir.block_mut(bid).var_mut(input).gen.location = Location::Static(s);
        }
    }

    fn compile_superblock(
        &mut self,
        first: BlockId,
        out: &mut dyn std::io::Write,
    ) -> std::io::Result<()> {
        self.assembled.clear();
        self.translation_blocks.clear();
        let mut max_stack = 0usize;

        let mut pending = vec![first];
        while let Some(bb) = pending.pop() {
            if self.ctx.ir.block(bb).gen.compiled {
                continue;
            }
            self.superblock_of.insert(bb, first);
            self.compile_one(bb, bb == first, &mut max_stack);
            for cf_idx in 0..self.ctx.ir.block(bb).cf_ops.len() {
                if let Some(target) = self.ctx.ir.block(bb).cf_ops[cf_idx].target() {
                    if !self.ctx.ir.block(target).gen.compiled {
                        pending.push(target);
                    }
                }
            }
        }

        // room for cf-op spills on top of the deepest frame
        max_stack += self.ctx.ir.statics.len();
        max_stack = (max_stack + 15) & !15;

        let first_block = self.ctx.ir.block(first);
        writeln!(out, "b{}:", first.0)?;
        writeln!(out, "sub rsp, {}", max_stack * 8)?;
        writeln!(
            out,
            "# multi-block allocation\n# virt start: {:#x}\n# virt end: {:#x}",
            first_block.virt_start_addr, first_block.virt_end_addr
        )?;

        for i in 0..self.assembled.len() {
            let assembly = std::mem::take(&mut self.assembled[i].assembly);
            out.write_all(assembly.as_bytes())?;
            self.cur_bb = self.assembled[i].bb;
            self.reg_map = self.assembled[i].reg_map;
            self.stack_map = self.assembled[i].stack_map.clone();
            self.asm_buf.clear();
            self.compile_cf_ops(self.assembled[i].bb, max_stack);
            out.write_all(self.asm_buf.as_bytes())?;
            self.asm_buf.clear();
        }
        self.assembled.clear();

        for (bid, body) in std::mem::take(&mut self.translation_blocks) {
            writeln!(out, "b{}:", bid.0)?;
            writeln!(out, "sub rsp, {}", max_stack * 8)?;
            writeln!(out, "# translation block")?;
            out.write_all(body.as_bytes())?;
        }
        writeln!(out)?;
        Ok(())
    }

    fn compile_one(&mut self, bb: BlockId, first: bool, max_stack: &mut usize) {
        self.cur_bb = bb;
        self.reg_map = Default::default();
        self.stack_map.clear();

        if !self.ctx.ir.block(bb).gen.input_map_setup {
            // syscall continuations and call targets enter through statics
            self.seed_static_inputs(bb);
            self.set_bb_inputs_from_static(bb);
        }

        // seed the allocation state from the input locations
        for i in 0..self.ctx.ir.block(bb).inputs.len() {
            let input = self.ctx.ir.block(bb).inputs[i];
            match self.ctx.ir.block(bb).var(input).gen.location {
                Location::Reg(r) => {
                    self.reg_map[r as usize] = RegState { var: Some(input), alloc_time: 0 };
                }
                Location::StackFrame => {
                    let slot = self.ctx.ir.block(bb).var(input).gen.stack_slot as usize;
                    if self.stack_map.len() <= slot {
                        self.stack_map.resize(slot + 1, StackSlot { free: true, var: None });
                    }
                    self.stack_map[slot] = StackSlot { free: false, var: Some(input) };
                }
                _ => {}
            }
        }

        if !first {
            self.generate_translation_block(bb);
            asm!(self, "b{}_reg_alloc:", bb.0);
            let block = self.ctx.ir.block(bb);
            asm!(
                self,
                "# virt start: {:#x}\n# virt end: {:#x}",
                block.virt_start_addr,
                block.virt_end_addr
            );
        }

        self.init_time_of_use(bb);
        self.compile_vars(bb);
        self.prepare_cf_ops(bb);

        *max_stack = (*max_stack).max(self.stack_map.len());
        self.ctx.ir.block_mut(bb).gen.compiled = true;
        self.assembled.push(AssembledBlock {
            bb,
            assembly: std::mem::take(&mut self.asm_buf),
            reg_map: self.reg_map,
            stack_map: std::mem::take(&mut self.stack_map),
        });
    }

    // ---- liveness ----------------------------------------------------------

    /// Use positions: operands of the i-th variable at i, cf-op inputs at
    /// `|vars|`, payload mappings afterwards in write order.
    fn init_time_of_use(&mut self, bb: BlockId) {
        for i in 0..self.ctx.ir.block(bb).order.len() {
            let vid = self.ctx.ir.block(bb).order[i];
            let gen = self.vgen_mut(vid);
            gen.uses.clear();
            gen.last_use_time = 0;
            gen.already_generated = false;
            gen.allocated_to_input = false;
        }

        for i in 0..self.ctx.ir.block(bb).order.len() {
            let vid = self.ctx.ir.block(bb).order[i];
            let inputs: Vec<VarId> = match self.ctx.ir.block(bb).var(vid).op() {
                Some(op) => op.input_vars().collect(),
                None => continue,
            };
            for input in inputs {
                let gen = self.vgen_mut(input);
                gen.last_use_time = i as u32;
                gen.uses.push(i as u32);
            }
        }

        let base_time = self.ctx.ir.block(bb).order.len() as u32;
        for cf_idx in 0..self.ctx.ir.block(bb).cf_ops.len() {
            let inputs: Vec<VarId> =
                self.ctx.ir.block(bb).cf_ops[cf_idx].input_vars().collect();
            for input in inputs {
                let gen = self.vgen_mut(input);
                gen.last_use_time = gen.last_use_time.max(base_time);
                gen.uses.push(base_time);
            }
            let payload = self.ctx.ir.block(bb).cf_ops[cf_idx].target_input_vars();
            for (i, var) in payload.into_iter().enumerate() {
                let t = base_time + 1 + i as u32;
                let gen = self.vgen_mut(var);
                gen.last_use_time = gen.last_use_time.max(t);
                gen.uses.push(t);
            }
        }
    }

    // ---- register file management -----------------------------------------

    fn set_var_to_reg(&mut self, cur_time: u32, var: VarId, reg: Reg) {
        self.reg_map[reg.0 as usize] = RegState { var: Some(var), alloc_time: cur_time };
        let gen = self.vgen_mut(var);
        gen.location = Location::Reg(reg.0);
    }

    fn allocate_stack_slot(&mut self, var: VarId) -> usize {
        let slot = match self.stack_map.iter().position(|s| s.free) {
            Some(i) => i,
            None => {
                self.stack_map.push(StackSlot { free: true, var: None });
                self.stack_map.len() - 1
            }
        };
        self.stack_map[slot] = StackSlot { free: false, var: Some(var) };
        slot
    }

    /// Write the register's value to the stack unless it is already saved
    /// (or a rematerializable immediate, unless `imm_to_stack`).
    fn save_reg(&mut self, reg: Reg, imm_to_stack: bool) {
        let Some(var) = self.reg_map[reg.0 as usize].var else { return };
        if self.vgen(var).saved_in_stack {
            return;
        }
        if self.vimm(var).is_some() && !imm_to_stack {
            return;
        }
        let slot = self.allocate_stack_slot(var);
        let ty = self.vty(var);
        asm!(self, "mov [rsp + 8 * {slot}], {}", reg_name(reg, if ty == Type::Imm { Type::I64 } else { ty }));
        let gen = self.vgen_mut(var);
        gen.saved_in_stack = true;
        gen.stack_slot = slot as u32;
    }

    /// Drop the register's binding, demoting the variable to its backing
    /// location.
    fn clear_reg(&mut self, cur_time: u32, reg: Reg, imm_to_stack: bool) {
        let Some(var) = self.reg_map[reg.0 as usize].var else { return };
        let is_imm = self.vimm(var).is_some();
        let gen = self.vgen_mut(var);
        if is_imm && !imm_to_stack {
            gen.location = Location::NotCalculated;
        } else if gen.saved_in_stack {
            gen.location = Location::StackFrame;
        } else {
            debug_assert!(gen.last_use_time <= cur_time, "dropping a live unspilled value");
            gen.location = Location::NotCalculated;
        }
        self.reg_map[reg.0 as usize].var = None;
    }

    /// Pick a register: free, else holding a dead value, else evicting the
    /// value whose next use lies farthest in the future.
    fn alloc_reg(&mut self, cur_time: u32, only: Option<Reg>, avoid: &[Reg], spill_imms: bool) -> Reg {
        if let Some(only) = only {
            if self.reg_map[only.0 as usize].var.is_some() {
                self.save_reg(only, spill_imms);
                self.clear_reg(cur_time, only, spill_imms);
            }
            self.reg_map[only.0 as usize].alloc_time = cur_time;
            return only;
        }

        let usable = |i: usize| !avoid.iter().any(|r| r.0 as usize == i);

        for i in 0..REG_COUNT {
            if usable(i) && self.reg_map[i].var.is_none() {
                self.reg_map[i].alloc_time = cur_time;
                return Reg(i as u8);
            }
        }
        for i in 0..REG_COUNT {
            if !usable(i) {
                continue;
            }
            let var = self.reg_map[i].var.unwrap();
            if self.last_use(var) < cur_time {
                let reg = Reg(i as u8);
                self.clear_reg(cur_time, reg, spill_imms);
                self.reg_map[i].alloc_time = cur_time;
                return reg;
            }
        }

        // evict the value with the farthest next use
        let mut best: Option<(Reg, u32)> = None;
        for i in 0..REG_COUNT {
            if !usable(i) {
                continue;
            }
            let var = self.reg_map[i].var.unwrap();
            let next_use = match self.vgen(var).next_use_after(cur_time.wrapping_sub(1)) {
                Some(u) if u == cur_time => continue, // needed right now
                Some(u) => u,
                None => continue,
            };
            if best.map_or(true, |(_, b)| next_use > b) {
                best = Some((Reg(i as u8), next_use));
            }
        }
        let (reg, _) = best.expect("no evictable register");
        self.save_reg(reg, spill_imms);
        self.clear_reg(cur_time, reg, spill_imms);
        self.reg_map[reg.0 as usize].alloc_time = cur_time;
        reg
    }

    /// Materialize `var` in a register, preferring its current one.
    fn load_val_in_reg(
        &mut self,
        cur_time: u32,
        var: VarId,
        only: Option<Reg>,
        avoid: &[Reg],
        spill_imms: bool,
    ) -> Reg {
        if let Location::Reg(r) = self.vloc(var) {
            let cur = Reg(r);
            if avoid.contains(&cur) {
                let new_reg = self.alloc_reg(cur_time, None, avoid, spill_imms);
                asm!(self, "mov {}, {}", reg64(new_reg), reg64(cur));
                self.reg_map[cur.0 as usize].var = None;
                self.set_var_to_reg(cur_time, var, new_reg);
                return new_reg;
            }
            match only {
                None => return cur,
                Some(only) if only == cur => return cur,
                Some(only) => {
                    if let Some(other) = self.reg_map[only.0 as usize].var {
                        if self.last_use(other) >= cur_time {
                            self.save_reg(only, spill_imms);
                        }
                    }
                    self.clear_reg(cur_time, only, spill_imms);
                    asm!(self, "mov {}, {}", reg64(only), reg64(cur));
                    self.reg_map[cur.0 as usize].var = None;
                    self.set_var_to_reg(cur_time, var, only);
                    return only;
                }
            }
        }

        let reg = self.alloc_reg(cur_time, only, avoid, spill_imms);
        match self.vloc(var) {
            Location::NotCalculated => {
                let imm = self
                    .vimm(var)
                    .expect("a computed value lost its location");
                if imm.binary_relative {
                    asm!(self, "lea {}, [binary + {}]", reg64(reg), imm.val);
                } else {
                    asm!(self, "mov {}, {}", reg64(reg), imm.val);
                }
            }
            Location::Static(s) => {
                let ty = self.vty(var);
                asm!(self, "mov {}, [s{}]", reg_name(reg, norm_ty(ty)), s.0);
            }
            Location::StackFrame => {
                let slot = self.vgen(var).stack_slot;
                let ty = self.vty(var);
                asm!(self, "mov {}, [rsp + 8 * {slot}]", reg_name(reg, norm_ty(ty)));
            }
            Location::Reg(_) => unreachable!(),
        }
        self.set_var_to_reg(cur_time, var, reg);
        reg
    }

    fn load_reg(&mut self, cur_time: u32, var: VarId) -> Reg {
        self.load_val_in_reg(cur_time, var, None, &[], false)
    }
}

/// Statics and stack slots are 8-byte; partial-width values are read and
/// written at full width through the placeholder type.
fn norm_ty(ty: Type) -> Type {
    match ty {
        Type::Imm => Type::I64,
        t => t,
    }
}

// ---- instruction selection -------------------------------------------------

impl RegAlloc<'_, '_> {
    fn compile_vars(&mut self, bb: BlockId) {
        for var_idx in 0..self.ctx.ir.block(bb).order.len() {
            let vid = self.ctx.ir.block(bb).order[var_idx];
            let cur_time = var_idx as u32;

            {
                let block = self.ctx.ir.block(bb);
                let _ = writeln!(self.asm_buf, "# {}", block.var(vid));
            }

            if self.vgen(vid).already_generated {
                continue;
            }
            let Some(op) = self.ctx.ir.block(bb).var(vid).op().cloned() else {
                // immediates, statics and plain outputs materialize on demand
                continue;
            };

            match op.kind {
                OpKind::Add
                | OpKind::Sub
                | OpKind::Shl
                | OpKind::Shr
                | OpKind::Sar
                | OpKind::Or
                | OpKind::And
                | OpKind::Xor
                | OpKind::Umax
                | OpKind::Umin
                | OpKind::Max
                | OpKind::Min
                | OpKind::MulL
                | OpKind::SsmulH
                | OpKind::UumulH
                | OpKind::SumulH
                | OpKind::Div
                | OpKind::Udiv => {
                    if self.vty(vid).is_float()
                        && matches!(op.kind, OpKind::Add | OpKind::Sub)
                    {
                        self.compile_fp_binary(cur_time, vid, &op);
                    } else {
                        self.compile_int_binary(bb, cur_time, var_idx, vid, &op);
                    }
                }
                OpKind::Load => self.compile_load(cur_time, vid, &op),
                OpKind::Store => self.compile_store(cur_time, &op),
                OpKind::Not => self.compile_not(cur_time, vid, &op),
                OpKind::Slt | OpKind::Sltu | OpKind::Sle | OpKind::Seq => {
                    self.compile_select(cur_time, vid, &op)
                }
                OpKind::Cast | OpKind::SignExtend | OpKind::ZeroExtend => {
                    self.compile_morph(cur_time, vid, &op)
                }
                OpKind::SetupStack => {
                    let dst = op.outputs[0].unwrap();
                    let reg = self.alloc_reg(cur_time, None, &[], false);
                    asm!(self, "mov {}, [init_stack_ptr]", reg64(reg));
                    self.set_var_to_reg(cur_time, dst, reg);
                }
                OpKind::Fmul | OpKind::Fdiv | OpKind::Fmin | OpKind::Fmax => {
                    self.compile_fp_binary(cur_time, vid, &op)
                }
                OpKind::Fsqrt => self.compile_fp_unary(cur_time, vid, &op),
                OpKind::Ffmadd | OpKind::Ffmsub | OpKind::Ffnmadd | OpKind::Ffnmsub => {
                    self.compile_fp_fma(cur_time, vid, &op)
                }
                OpKind::Flt | OpKind::Fle | OpKind::Feq => {
                    self.compile_fp_compare(cur_time, vid, &op)
                }
                OpKind::Convert | OpKind::Uconvert => {
                    self.compile_fp_convert(bb, var_idx, cur_time, vid, &op)
                }
            }
        }
    }

    /// Integer two-source operations, including the divider and multiplier
    /// register conventions and the immediate-operand forms.
    fn compile_int_binary(
        &mut self,
        bb: BlockId,
        cur_time: u32,
        var_idx: usize,
        vid: VarId,
        op: &Operation,
    ) {
        let in1 = op.inputs[0].unwrap();
        let in2 = op.inputs[1].unwrap();
        let dst = op.outputs[0];

        let imm2 = self.vimm(in2).filter(|i| !i.binary_relative);
        let is_muldiv = matches!(
            op.kind,
            OpKind::SsmulH | OpKind::UumulH | OpKind::SumulH | OpKind::Div | OpKind::Udiv
        );

        if let (Some(imm), false) = (imm2, is_muldiv) {
            // op reg, imm form
            let in1_reg = self.load_reg(cur_time, in1);
            let ty = self.choose_type(in1, in2);
            let in1_name = reg_name(in1_reg, ty);

            // add may produce into a fresh register via lea
            let dst_reg = if op.kind != OpKind::Add || self.last_use(in1) == cur_time {
                in1_reg
            } else {
                self.find_expendable(cur_time).unwrap_or(in1_reg)
            };

            if let Some(cur) = self.reg_map[dst_reg.0 as usize].var {
                if self.last_use(cur) > cur_time && cur != in1 {
                    self.save_reg(dst_reg, false);
                }
            }

            if self.merge_ops() && self.try_merge_imm_add(bb, cur_time, var_idx, vid, op, in1_reg, dst_reg, imm.val) {
                return;
            }

            if dst_reg == in1_reg && self.last_use(in1) > cur_time {
                self.save_reg(in1_reg, false);
            }

            let dst_name = reg_name(dst_reg, ty);
            match op.kind {
                OpKind::Add => {
                    if dst_reg == in1_reg {
                        self.op_with_imm32(cur_time, "add", in1_name, imm.val, ty);
                    } else if imm_fits_i32(imm.val) {
                        asm!(self, "lea {dst_name}, [{in1_name} + {}]", imm.val);
                    } else {
                        let imm_reg = self.alloc_reg(cur_time, None, &[in1_reg, dst_reg], false);
                        asm!(self, "mov {}, {}", reg64(imm_reg), imm.val);
                        asm!(self, "lea {dst_name}, [{in1_name} + {}]", reg_name(imm_reg, ty));
                    }
                }
                OpKind::Sub => self.op_with_imm32(cur_time, "sub", in1_name, imm.val, ty),
                OpKind::Or => self.op_with_imm32(cur_time, "or", in1_name, imm.val, ty),
                OpKind::And => self.op_with_imm32(cur_time, "and", in1_name, imm.val, ty),
                OpKind::Xor => self.op_with_imm32(cur_time, "xor", in1_name, imm.val, ty),
                OpKind::Shl => asm!(self, "shl {in1_name}, {}", imm.val),
                OpKind::Shr => asm!(self, "shr {in1_name}, {}", imm.val),
                OpKind::Sar => asm!(self, "sar {in1_name}, {}", imm.val),
                OpKind::MulL => self.op_with_imm32(cur_time, "imul", in1_name, imm.val, ty),
                OpKind::Umax | OpKind::Umin | OpKind::Max | OpKind::Min => {
                    let (jcc, label) = match op.kind {
                        OpKind::Umax => ("jae", "max"),
                        OpKind::Umin => ("jbe", "min"),
                        OpKind::Max => ("jge", "smax"),
                        _ => ("jle", "smin"),
                    };
                    self.op_with_imm32(cur_time, "cmp", in1_name, imm.val, ty);
                    asm!(self, "{jcc} b{}_{}_{label}", bb.0, var_idx);
                    asm!(self, "mov {in1_name}, {}", imm.val);
                    asm!(self, "b{}_{}_{label}:", bb.0, var_idx);
                }
                _ => unreachable!(),
            }

            let result_reg = if op.kind == OpKind::Add { dst_reg } else { in1_reg };
            self.clear_reg(cur_time, result_reg, false);
            self.set_var_to_reg(cur_time, dst.unwrap(), result_reg);
            return;
        }

        // register-register (and the multiplier/divider) forms
        let (in1_reg, in2_reg);
        match op.kind {
            OpKind::SsmulH | OpKind::UumulH | OpKind::SumulH => {
                in1_reg = self.load_val_in_reg(cur_time, in1, Some(REG_A), &[], false);
                in2_reg = self.load_val_in_reg(cur_time, in2, None, &[REG_A, REG_D], false);
                if let Some(var) = self.reg_map[REG_D.0 as usize].var {
                    if self.last_use(var) > cur_time {
                        self.save_reg(REG_D, false);
                    }
                }
                self.clear_reg(cur_time, REG_D, false);
            }
            OpKind::Div | OpKind::Udiv => {
                in1_reg = self.load_val_in_reg(cur_time, in1, Some(REG_A), &[], false);
                in2_reg = self.load_val_in_reg(cur_time, in2, None, &[REG_A, REG_D], false);
                if let Some(var) = self.reg_map[REG_D.0 as usize].var {
                    if self.last_use(var) > cur_time {
                        self.save_reg(REG_D, false);
                    }
                }
                self.clear_reg(cur_time, REG_D, false);
                if op.kind == OpKind::Div {
                    match self.choose_type(in1, in2) {
                        Type::I32 => asm!(self, "cdq"),
                        _ => asm!(self, "cqo"),
                    }
                } else {
                    asm!(self, "xor edx, edx");
                }
            }
            OpKind::Shl | OpKind::Shr | OpKind::Sar => {
                let wide = matches!(self.vty(in1), Type::I64 | Type::I32 | Type::Imm);
                if self.bmi2() && wide {
                    in2_reg = self.load_reg(cur_time, in2);
                } else {
                    in2_reg = self.load_val_in_reg(cur_time, in2, Some(REG_C), &[], false);
                }
                in1_reg = self.load_reg(cur_time, in1);
            }
            _ => {
                in1_reg = self.load_reg(cur_time, in1);
                in2_reg = self.load_reg(cur_time, in2);
            }
        }

        let ty = self.choose_type(in1, in2);
        let in1_name = reg_name(in1_reg, ty);
        let in2_name = reg_name(in2_reg, ty);

        if self.last_use(in1) > cur_time {
            self.save_reg(in1_reg, false);
        }

        match op.kind {
            OpKind::Add => asm!(self, "add {in1_name}, {in2_name}"),
            OpKind::Sub => asm!(self, "sub {in1_name}, {in2_name}"),
            OpKind::Or => asm!(self, "or {in1_name}, {in2_name}"),
            OpKind::And => asm!(self, "and {in1_name}, {in2_name}"),
            OpKind::Xor => asm!(self, "xor {in1_name}, {in2_name}"),
            OpKind::Shl | OpKind::Shr | OpKind::Sar => {
                let mnem = match op.kind {
                    OpKind::Shl => "shl",
                    OpKind::Shr => "shr",
                    _ => "sar",
                };
                let wide = matches!(self.vty(in1), Type::I64 | Type::I32 | Type::Imm);
                if self.bmi2() && wide {
                    asm!(self, "{mnem}x {in1_name}, {in1_name}, {in2_name}");
                } else {
                    asm!(self, "{mnem} {in1_name}, cl");
                }
            }
            OpKind::Umax => {
                asm!(self, "cmp {in1_name}, {in2_name}");
                asm!(self, "cmovb {in1_name}, {in2_name}");
            }
            OpKind::Umin => {
                asm!(self, "cmp {in1_name}, {in2_name}");
                asm!(self, "cmova {in1_name}, {in2_name}");
            }
            OpKind::Max => {
                asm!(self, "cmp {in1_name}, {in2_name}");
                asm!(self, "cmovl {in1_name}, {in2_name}");
            }
            OpKind::Min => {
                asm!(self, "cmp {in1_name}, {in2_name}");
                asm!(self, "cmovg {in1_name}, {in2_name}");
            }
            OpKind::MulL => asm!(self, "imul {in1_name}, {in2_name}"),
            OpKind::SsmulH => asm!(self, "imul {in2_name}"),
            OpKind::UumulH => asm!(self, "mul {in2_name}"),
            OpKind::SumulH => {
                // mulhsu(a, b) = mulhu(a, b) - (a < 0 ? b : 0)
                let tmp = self.alloc_reg(cur_time, None, &[in1_reg, in2_reg, REG_D], false);
                let tmp_name = reg_name(tmp, ty);
                asm!(self, "mov {tmp_name}, {in1_name}");
                asm!(self, "sar {tmp_name}, {}", ty.bits() - 1);
                asm!(self, "and {tmp_name}, {in2_name}");
                asm!(self, "mul {in2_name}");
                asm!(self, "sub {}, {tmp_name}", reg_name(REG_D, ty));
            }
            OpKind::Div | OpKind::Udiv => {
                let mnem = if op.kind == OpKind::Div { "idiv" } else { "div" };
                asm!(self, "{mnem} {in2_name}");
            }
            _ => unreachable!(),
        }

        match op.kind {
            OpKind::SsmulH | OpKind::UumulH | OpKind::SumulH => {
                // the low half clobbers rax, the high half lands in rdx
                self.clear_reg(cur_time, in1_reg, false);
                if let Some(d) = op.outputs[0] {
                    self.set_var_to_reg(cur_time, d, REG_D);
                }
            }
            OpKind::Div | OpKind::Udiv => {
                self.clear_reg(cur_time, in1_reg, false);
                if let Some(q) = op.outputs[0] {
                    self.set_var_to_reg(cur_time, q, REG_A);
                }
                if let Some(r) = op.outputs[1] {
                    self.set_var_to_reg(cur_time, r, REG_D);
                }
            }
            _ => {
                self.clear_reg(cur_time, in1_reg, false);
                self.set_var_to_reg(cur_time, op.outputs[0].unwrap(), in1_reg);
            }
        }
    }

    /// A free register or one holding a dead value, if any.
    fn find_expendable(&self, cur_time: u32) -> Option<Reg> {
        for i in 0..REG_COUNT {
            match self.reg_map[i].var {
                None => return Some(Reg(i as u8)),
                Some(var) if self.last_use(var) < cur_time => return Some(Reg(i as u8)),
                _ => {}
            }
        }
        None
    }

    fn op_with_imm32(&mut self, cur_time: u32, mnem: &str, dst_name: &str, val: i64, ty: Type) {
        if imm_fits_i32(val) {
            asm!(self, "{mnem} {dst_name}, {val}");
        } else {
            let imm_reg = self.alloc_reg(cur_time, None, &[], false);
            asm!(self, "mov {}, {val}", reg64(imm_reg));
            asm!(self, "{mnem} {dst_name}, {}", reg_name(imm_reg, ty));
        }
    }

    /// Fusion of `add base, imm` with a following load/store (and an
    /// optional extension or narrowing cast): one addressed mov.
    #[allow(clippy::too_many_arguments)]
    fn try_merge_imm_add(
        &mut self,
        bb: BlockId,
        cur_time: u32,
        var_idx: usize,
        vid: VarId,
        op: &Operation,
        in1_reg: Reg,
        dst_reg: Reg,
        imm_val: i64,
    ) -> bool {
        let order_len = self.ctx.ir.block(bb).order.len();
        let dst = match op.outputs[0] {
            Some(d) => d,
            None => return false,
        };
        if self.ctx.ir.block(bb).var(dst).ref_count != 1 || var_idx + 1 >= order_len {
            return false;
        }
        if !imm_fits_i32(imm_val) {
            return false;
        }
        let in1_name = reg64(in1_reg);

        if op.kind == OpKind::And && self.bmi2() {
            return self.try_merge_shiftx(bb, cur_time, var_idx, vid, op, in1_reg, dst_reg, imm_val);
        }
        if op.kind != OpKind::Add {
            return false;
        }

        let next_vid = self.ctx.ir.block(bb).order[var_idx + 1];
        let Some(next_op) = self.ctx.ir.block(bb).var(next_vid).op().cloned() else {
            return false;
        };

        if next_op.kind == OpKind::Load && next_op.inputs[0] == Some(dst) {
            let load_dst = next_op.outputs[0].unwrap();
            let load_ty = self.vty(load_dst);

            // look one further for an extension to merge into the mov
            if self.ctx.ir.block(bb).var(load_dst).ref_count == 1 && var_idx + 2 < order_len {
                let ext_vid = self.ctx.ir.block(bb).order[var_idx + 2];
                if let Some(ext_op) = self.ctx.ir.block(bb).var(ext_vid).op().cloned() {
                    if ext_op.inputs[0] == Some(load_dst)
                        && matches!(ext_op.kind, OpKind::ZeroExtend | OpKind::SignExtend)
                    {
                        let ext_dst = ext_op.outputs[0].unwrap();
                        let ext_ty = self.vty(ext_dst);
                        match (ext_op.kind, load_ty) {
                            (OpKind::ZeroExtend, Type::I32) => {
                                asm!(self, "mov {}, [{in1_name} + {imm_val}]",
                                    REG_NAMES[dst_reg.0 as usize][1]);
                            }
                            (OpKind::ZeroExtend, _) => {
                                asm!(self, "movzx {}, {} [{in1_name} + {imm_val}]",
                                    reg_name(dst_reg, ext_ty), mem_size(load_ty));
                            }
                            (OpKind::SignExtend, Type::I32) => {
                                asm!(self, "movsxd {}, {} [{in1_name} + {imm_val}]",
                                    reg_name(dst_reg, ext_ty), mem_size(load_ty));
                            }
                            (OpKind::SignExtend, _) => {
                                asm!(self, "movsx {}, {} [{in1_name} + {imm_val}]",
                                    reg_name(dst_reg, ext_ty), mem_size(load_ty));
                            }
                            _ => unreachable!(),
                        }
                        self.clear_reg(cur_time, dst_reg, false);
                        self.set_var_to_reg(cur_time, ext_dst, dst_reg);
                        self.vgen_mut(load_dst).already_generated = true;
                        self.vgen_mut(ext_dst).already_generated = true;
                        self.vgen_mut(vid).already_generated = true;
                        return true;
                    }
                }
            }

            asm!(self, "mov {}, [{in1_name} + {imm_val}]", reg_name(dst_reg, load_ty));
            self.clear_reg(cur_time, dst_reg, false);
            self.set_var_to_reg(cur_time, load_dst, dst_reg);
            self.vgen_mut(load_dst).already_generated = true;
            self.vgen_mut(vid).already_generated = true;
            return true;
        }

        if next_op.kind == OpKind::Cast
            && self.ctx.ir.block(bb).var(next_op.outputs[0].unwrap()).ref_count == 1
            && var_idx + 2 < order_len
        {
            // add / cast / store of the casted value
            let cast_dst = next_op.outputs[0].unwrap();
            let store_vid = self.ctx.ir.block(bb).order[var_idx + 2];
            if let Some(store_op) = self.ctx.ir.block(bb).var(store_vid).op().cloned() {
                if store_op.kind == OpKind::Store
                    && store_op.inputs[0] == Some(dst)
                    && store_op.inputs[1] == Some(cast_dst)
                {
                    let src = next_op.inputs[0].unwrap();
                    let src_reg = self.load_reg(cur_time, src);
                    asm!(self, "mov [{in1_name} + {imm_val}], {}",
                        reg_name(src_reg, self.vty(cast_dst)));
                    self.vgen_mut(cast_dst).already_generated = true;
                    self.vgen_mut(store_vid).already_generated = true;
                    self.vgen_mut(vid).already_generated = true;
                    return true;
                }
            }
        }

        if next_op.kind == OpKind::Store && next_op.inputs[0] == Some(dst) {
            let src = next_op.inputs[1].unwrap();
            let src_reg = self.load_reg(cur_time, src);
            let width = next_op.access_type.unwrap_or_else(|| self.vty(src));
            asm!(self, "mov [{in1_name} + {imm_val}], {}", reg_name(src_reg, width));
            self.vgen_mut(next_op.outputs[0].unwrap()).already_generated = true;
            self.vgen_mut(vid).already_generated = true;
            return true;
        }

        false
    }

    /// BMI2 fusion: the `and 31/63` masking idiom followed by a shift
    /// becomes a single shlx/shrx/sarx.
    #[allow(clippy::too_many_arguments)]
    fn try_merge_shiftx(
        &mut self,
        bb: BlockId,
        cur_time: u32,
        var_idx: usize,
        vid: VarId,
        op: &Operation,
        in1_reg: Reg,
        dst_reg: Reg,
        imm_val: i64,
    ) -> bool {
        let order_len = self.ctx.ir.block(bb).order.len();
        let dst = op.outputs[0].unwrap();

        let shift_mnem = |kind: OpKind| match kind {
            OpKind::Shl => Some("shlx"),
            OpKind::Shr => Some("shrx"),
            OpKind::Sar => Some("sarx"),
            _ => None,
        };

        if imm_val == 0x1f && var_idx + 2 < order_len {
            // and; cast to i32; shift
            let cast_vid = self.ctx.ir.block(bb).order[var_idx + 1];
            let shift_vid = self.ctx.ir.block(bb).order[var_idx + 2];
            let cast_ok = {
                let cast = self.ctx.ir.block(bb).var(cast_vid);
                cast.ref_count == 1
                    && cast.ty == Type::I32
                    && cast.op().map_or(false, |o| o.kind == OpKind::Cast)
            };
            if cast_ok {
                if let Some(shift_op) = self.ctx.ir.block(bb).var(shift_vid).op().cloned() {
                    if let Some(mnem) = shift_mnem(shift_op.kind) {
                        if shift_op.inputs[0] == Some(cast_vid) && shift_op.inputs[1] == Some(dst) {
                            let cast_src =
                                self.ctx.ir.block(bb).var(cast_vid).op().unwrap().inputs[0].unwrap();
                            let val_reg = self.load_reg(cur_time, cast_src);
                            asm!(self, "{mnem} {}, {}, {}",
                                REG_NAMES[dst_reg.0 as usize][1],
                                REG_NAMES[val_reg.0 as usize][1],
                                REG_NAMES[in1_reg.0 as usize][1]);
                            self.clear_reg(cur_time, dst_reg, false);
                            self.set_var_to_reg(cur_time, shift_vid, dst_reg);
                            self.vgen_mut(cast_vid).already_generated = true;
                            self.vgen_mut(shift_vid).already_generated = true;
                            self.vgen_mut(vid).already_generated = true;
                            return true;
                        }
                    }
                }
            }
        } else if imm_val == 0x3f && var_idx + 1 < order_len {
            let shift_vid = self.ctx.ir.block(bb).order[var_idx + 1];
            if let Some(shift_op) = self.ctx.ir.block(bb).var(shift_vid).op().cloned() {
                if let Some(mnem) = shift_mnem(shift_op.kind) {
                    if shift_op.inputs[1] == Some(dst)
                        && self.vty(shift_op.inputs[0].unwrap()) == Type::I64
                    {
                        let val_reg = self.load_reg(cur_time, shift_op.inputs[0].unwrap());
                        asm!(self, "{mnem} {}, {}, {}",
                            reg64(dst_reg), reg64(val_reg), reg64(in1_reg));
                        self.clear_reg(cur_time, dst_reg, false);
                        self.set_var_to_reg(cur_time, shift_vid, dst_reg);
                        self.vgen_mut(shift_vid).already_generated = true;
                        self.vgen_mut(vid).already_generated = true;
                        return true;
                    }
                }
            }
        }
        false
    }

    fn compile_load(&mut self, cur_time: u32, vid: VarId, op: &Operation) {
        let addr = op.inputs[0].unwrap();
        let dst = op.outputs[0].unwrap();
        let addr_reg = self.load_reg(cur_time, addr);
        if self.last_use(addr) > cur_time {
            self.save_reg(addr_reg, false);
        }
        let ty = op.access_type.unwrap_or_else(|| self.vty(dst));
        asm!(self, "mov {}, [{}]", reg_name(addr_reg, ty), reg64(addr_reg));
        self.clear_reg(cur_time, addr_reg, false);
        self.set_var_to_reg(cur_time, dst, addr_reg);
        let _ = vid;
    }

    fn compile_store(&mut self, cur_time: u32, op: &Operation) {
        let addr = op.inputs[0].unwrap();
        let val = op.inputs[1].unwrap();
        let addr_reg = self.load_reg(cur_time, addr);
        let val_reg = self.load_reg(cur_time, val);
        let width = op.access_type.unwrap_or_else(|| self.vty(val));
        asm!(self, "mov [{}], {}", reg64(addr_reg), reg_name(val_reg, width));
    }

    fn compile_not(&mut self, cur_time: u32, vid: VarId, op: &Operation) {
        let val = op.inputs[0].unwrap();
        let dst = op.outputs[0].unwrap();
        let val_reg = self.load_reg(cur_time, val);
        if self.last_use(val) > cur_time {
            self.save_reg(val_reg, false);
        }
        let ty = if self.vimm(val).is_some() { Type::I64 } else { self.vty(val) };
        asm!(self, "not {}", reg_name(val_reg, ty));
        self.clear_reg(cur_time, val_reg, false);
        self.set_var_to_reg(cur_time, dst, val_reg);
        let _ = vid;
    }

    /// slt/sltu/sle/seq: a flag-setting compare plus either a setcc (for the
    /// canonical 1/0 select) or a cmov pair.
    fn compile_select(&mut self, cur_time: u32, vid: VarId, op: &Operation) {
        let cmp1 = op.inputs[0].unwrap();
        let cmp2 = op.inputs[1].unwrap();
        let val1 = op.inputs[2].unwrap();
        let val2 = op.inputs[3].unwrap();
        let dst = op.outputs[0].unwrap();

        let (set_cc, cmov_true, cmov_false) = match op.kind {
            OpKind::Slt => ("setl", "cmovl", "cmovge"),
            OpKind::Sltu => ("setb", "cmovb", "cmovae"),
            OpKind::Sle => ("setle", "cmovle", "cmovg"),
            OpKind::Seq => ("sete", "cmove", "cmovne"),
            _ => unreachable!(),
        };

        let cmp1_reg = self.load_reg(cur_time, cmp1);
        if self.last_use(cmp1) > cur_time {
            self.save_reg(cmp1_reg, false);
        }

        let canonical = match (self.vimm(val1), self.vimm(val2)) {
            (Some(a), Some(b)) => {
                a.val == 1 && !a.binary_relative && b.val == 0 && !b.binary_relative
            }
            _ => false,
        };

        if canonical {
            self.emit_cmp(cur_time, cmp1, cmp1_reg, cmp2);
            let keep_upper = match self.vimm(cmp1) {
                Some(imm) => !imm.binary_relative && (0..=255).contains(&imm.val),
                None => false,
            };
            if !keep_upper {
                asm!(self, "mov {}, 0", reg64(cmp1_reg));
            }
            asm!(self, "{set_cc} {}", REG_NAMES[cmp1_reg.0 as usize][3]);
            self.clear_reg(cur_time, cmp1_reg, false);
            self.set_var_to_reg(cur_time, dst, cmp1_reg);
            return;
        }

        let val1_reg = self.load_reg(cur_time, val1);
        let val2_reg = self.load_reg(cur_time, val2);
        self.emit_cmp(cur_time, cmp1, cmp1_reg, cmp2);
        let dty = self.vty(dst);
        asm!(self, "{cmov_true} {}, {}", reg_name(cmp1_reg, dty), reg_name(val1_reg, dty));
        asm!(self, "{cmov_false} {}, {}", reg_name(cmp1_reg, dty), reg_name(val2_reg, dty));
        self.clear_reg(cur_time, cmp1_reg, false);
        self.set_var_to_reg(cur_time, dst, cmp1_reg);
        let _ = vid;
    }

    fn emit_cmp(&mut self, cur_time: u32, cmp1: VarId, cmp1_reg: Reg, cmp2: VarId) {
        let small_imm = self.vimm(cmp2).filter(|i| !i.binary_relative && imm_fits_i32(i.val));
        if let Some(imm) = small_imm {
            let ty = if self.vimm(cmp1).is_some() { Type::I64 } else { self.vty(cmp1) };
            asm!(self, "cmp {}, {}", reg_name(cmp1_reg, ty), imm.val);
        } else {
            let cmp2_reg = self.load_reg(cur_time, cmp2);
            let ty = self.choose_type(cmp1, cmp2);
            asm!(self, "cmp {}, {}", reg_name(cmp1_reg, ty), reg_name(cmp2_reg, ty));
        }
    }

    fn compile_morph(&mut self, cur_time: u32, vid: VarId, op: &Operation) {
        let input = op.inputs[0].unwrap();
        let output = op.outputs[0].unwrap();
        let out_ty = self.vty(output);

        if let Some(imm) = self.vimm(input).filter(|i| !i.binary_relative) {
            let val = match out_ty {
                Type::I64 | Type::F64 => imm.val,
                Type::I32 | Type::F32 => imm.val & 0xffff_ffff,
                Type::I16 => imm.val & 0xffff,
                Type::I8 => imm.val & 0xff,
                _ => panic!("morph into an unsupported type"),
            };
            let dst_reg = self.alloc_reg(cur_time, None, &[], false);
            asm!(self, "mov {}, {val}", reg_name(dst_reg, out_ty));
            self.set_var_to_reg(cur_time, output, dst_reg);
            return;
        }

        let in_ty = self.vty(input);
        let reg = self.load_reg(cur_time, input);
        if self.last_use(input) > cur_time {
            self.save_reg(reg, false);
        }

        if op.kind == OpKind::SignExtend {
            if in_ty == Type::I32 && matches!(out_ty, Type::I64) {
                asm!(self, "movsxd {}, {}", reg_name(reg, out_ty), reg_name(reg, in_ty));
            } else {
                asm!(self, "movsx {}, {}", reg_name(reg, out_ty), reg_name(reg, in_ty));
            }
        } else if in_ty != out_ty {
            // casts and zero extensions only need the upper bits cleared
            let narrow = if out_ty.bits() < in_ty.bits() { out_ty } else { in_ty };
            match narrow.bits() {
                32 => asm!(self, "mov {}, {0}", REG_NAMES[reg.0 as usize][1]),
                16 => asm!(self, "and {}, 0xFFFF", reg64(reg)),
                8 => asm!(self, "and {}, 0xFF", reg64(reg)),
                _ => {}
            }
        }

        self.clear_reg(cur_time, reg, false);
        self.set_var_to_reg(cur_time, output, reg);
        let _ = vid;
    }
}

// ---- floating point --------------------------------------------------------
//
// Float values live in the same 8-byte locations as integers and are staged
// through general-purpose registers; the SSE registers xmm0..xmm2 serve as
// scratch for the actual arithmetic.

impl RegAlloc<'_, '_> {
    fn fp_suffix(ty: Type) -> &'static str {
        if ty == Type::F32 {
            "ss"
        } else {
            "sd"
        }
    }

    fn fp_mov(ty: Type) -> &'static str {
        if ty == Type::F32 {
            "movd"
        } else {
            "movq"
        }
    }

    fn compile_fp_binary(&mut self, cur_time: u32, vid: VarId, op: &Operation) {
        let in1 = op.inputs[0].unwrap();
        let in2 = op.inputs[1].unwrap();
        let dst = op.outputs[0].unwrap();
        let ty = self.vty(dst);
        let (sfx, mv) = (Self::fp_suffix(ty), Self::fp_mov(ty));

        let in1_reg = self.load_reg(cur_time, in1);
        let in2_reg = self.load_reg(cur_time, in2);
        asm!(self, "{mv} xmm0, {}", reg_name(in1_reg, ty));
        asm!(self, "{mv} xmm1, {}", reg_name(in2_reg, ty));
        let mnem = match op.kind {
            OpKind::Add => "add",
            OpKind::Sub => "sub",
            OpKind::Fmul => "mul",
            OpKind::Fdiv => "div",
            OpKind::Fmin => "min",
            OpKind::Fmax => "max",
            _ => unreachable!(),
        };
        asm!(self, "{mnem}{sfx} xmm0, xmm1");

        let dst_reg = self.alloc_reg(cur_time, None, &[in1_reg, in2_reg], false);
        asm!(self, "{mv} {}, xmm0", reg_name(dst_reg, ty));
        self.set_var_to_reg(cur_time, dst, dst_reg);
        let _ = vid;
    }

    fn compile_fp_unary(&mut self, cur_time: u32, vid: VarId, op: &Operation) {
        let in1 = op.inputs[0].unwrap();
        let dst = op.outputs[0].unwrap();
        let ty = self.vty(dst);
        let (sfx, mv) = (Self::fp_suffix(ty), Self::fp_mov(ty));

        let in1_reg = self.load_reg(cur_time, in1);
        asm!(self, "{mv} xmm0, {}", reg_name(in1_reg, ty));
        asm!(self, "sqrt{sfx} xmm0, xmm0");
        let dst_reg = self.alloc_reg(cur_time, None, &[in1_reg], false);
        asm!(self, "{mv} {}, xmm0", reg_name(dst_reg, ty));
        self.set_var_to_reg(cur_time, dst, dst_reg);
        let _ = vid;
    }

    fn compile_fp_fma(&mut self, cur_time: u32, vid: VarId, op: &Operation) {
        let a = op.inputs[0].unwrap();
        let b = op.inputs[1].unwrap();
        let c = op.inputs[2].unwrap();
        let dst = op.outputs[0].unwrap();
        let ty = self.vty(dst);
        let (sfx, mv) = (Self::fp_suffix(ty), Self::fp_mov(ty));

        let a_reg = self.load_reg(cur_time, a);
        let b_reg = self.load_reg(cur_time, b);
        asm!(self, "{mv} xmm0, {}", reg_name(a_reg, ty));
        asm!(self, "{mv} xmm1, {}", reg_name(b_reg, ty));
        asm!(self, "mul{sfx} xmm0, xmm1");
        let c_reg = self.load_reg(cur_time, c);
        asm!(self, "{mv} xmm1, {}", reg_name(c_reg, ty));

        // result register; the sign flip of the negated forms happens on the
        // integer side
        let mut result_in_xmm1 = false;
        let mut negate = false;
        match op.kind {
            OpKind::Ffmadd => asm!(self, "add{sfx} xmm0, xmm1"),
            OpKind::Ffmsub => asm!(self, "sub{sfx} xmm0, xmm1"),
            OpKind::Ffnmadd => {
                // c - a*b
                asm!(self, "sub{sfx} xmm1, xmm0");
                result_in_xmm1 = true;
            }
            OpKind::Ffnmsub => {
                // -(a*b + c)
                asm!(self, "add{sfx} xmm0, xmm1");
                negate = true;
            }
            _ => unreachable!(),
        }

        let dst_reg = self.alloc_reg(cur_time, None, &[a_reg, b_reg, c_reg], false);
        let xmm = if result_in_xmm1 { "xmm1" } else { "xmm0" };
        asm!(self, "{mv} {}, {xmm}", reg_name(dst_reg, ty));
        if negate {
            asm!(self, "btc {}, {}", reg_name(dst_reg, ty), ty.bits() - 1);
        }
        self.set_var_to_reg(cur_time, dst, dst_reg);
        let _ = vid;
    }

    /// flt/fle/feq with IEEE unordered semantics: unordered compares yield 0.
    fn compile_fp_compare(&mut self, cur_time: u32, vid: VarId, op: &Operation) {
        let a = op.inputs[0].unwrap();
        let b = op.inputs[1].unwrap();
        let dst = op.outputs[0].unwrap();
        let ty = self.vty(a);
        let (sfx, mv) = (Self::fp_suffix(ty), Self::fp_mov(ty));

        let a_reg = self.load_reg(cur_time, a);
        let b_reg = self.load_reg(cur_time, b);
        asm!(self, "{mv} xmm0, {}", reg_name(a_reg, ty));
        asm!(self, "{mv} xmm1, {}", reg_name(b_reg, ty));

        let dst_reg = self.alloc_reg(cur_time, None, &[a_reg, b_reg], false);
        match op.kind {
            OpKind::Flt => {
                // a < b  <=>  b above a; unordered clears CF=0? no: sets all,
                // so `seta` is false on NaN as required
                asm!(self, "comi{sfx} xmm1, xmm0");
                asm!(self, "mov {}, 0", reg64(dst_reg));
                asm!(self, "seta {}", REG_NAMES[dst_reg.0 as usize][3]);
            }
            OpKind::Fle => {
                asm!(self, "comi{sfx} xmm1, xmm0");
                asm!(self, "mov {}, 0", reg64(dst_reg));
                asm!(self, "setae {}", REG_NAMES[dst_reg.0 as usize][3]);
            }
            OpKind::Feq => {
                let tmp = self.alloc_reg(cur_time, None, &[a_reg, b_reg, dst_reg], false);
                asm!(self, "ucomi{sfx} xmm0, xmm1");
                asm!(self, "mov {}, 0", reg64(dst_reg));
                asm!(self, "mov {}, 0", reg64(tmp));
                asm!(self, "sete {}", REG_NAMES[dst_reg.0 as usize][3]);
                asm!(self, "setnp {}", REG_NAMES[tmp.0 as usize][3]);
                asm!(self, "and {}, {}", reg64(dst_reg), reg64(tmp));
            }
            _ => unreachable!(),
        }
        self.set_var_to_reg(cur_time, dst, dst_reg);
        let _ = vid;
    }

    fn compile_fp_convert(
        &mut self,
        bb: BlockId,
        var_idx: usize,
        cur_time: u32,
        vid: VarId,
        op: &Operation,
    ) {
        let src = op.inputs[0].unwrap();
        let dst = op.outputs[0].unwrap();
        let from = {
            let ty = self.vty(src);
            if ty == Type::Imm {
                Type::I64
            } else {
                ty
            }
        };
        let to = self.vty(dst);
        let rounding = match op.rounding {
            Some(Rounding::Mode(m)) => m,
            _ => RoundingMode::Nearest,
        };
        let unsigned = op.kind == OpKind::Uconvert;

        let src_reg = self.load_reg(cur_time, src);
        let src_name = reg_name(src_reg, from);

        match (from.is_float(), to.is_float()) {
            (false, true) => {
                // integer -> float
                let cvt = if to == Type::F32 { "cvtsi2ss" } else { "cvtsi2sd" };
                if unsigned && from == Type::I32 {
                    // zero-extended 32-bit values convert exactly
                    asm!(self, "mov {0}, {0}", REG_NAMES[src_reg.0 as usize][1]);
                    asm!(self, "{cvt} xmm0, {}", reg64(src_reg));
                } else if unsigned {
                    // u64: halve-and-round for the high range; the source
                    // register is consumed by the adjustment
                    if self.last_use(src) > cur_time {
                        self.save_reg(src_reg, false);
                    }
                    let tmp = self.alloc_reg(cur_time, None, &[src_reg], false);
                    asm!(self, "test {}, {}", reg64(src_reg), reg64(src_reg));
                    asm!(self, "js b{}_{}_ucvt", bb.0, var_idx);
                    asm!(self, "{cvt} xmm0, {}", reg64(src_reg));
                    asm!(self, "jmp b{}_{}_ucvt_done", bb.0, var_idx);
                    asm!(self, "b{}_{}_ucvt:", bb.0, var_idx);
                    asm!(self, "mov {}, {}", reg64(tmp), reg64(src_reg));
                    asm!(self, "shr {}, 1", reg64(tmp));
                    asm!(self, "and {}, 1", reg64(src_reg));
                    asm!(self, "or {}, {}", reg64(tmp), reg64(src_reg));
                    asm!(self, "{cvt} xmm0, {}", reg64(tmp));
                    asm!(self, "add{} xmm0, xmm0", Self::fp_suffix(to));
                    asm!(self, "b{}_{}_ucvt_done:", bb.0, var_idx);
                    self.clear_reg(cur_time, src_reg, false);
                } else {
                    let name = if from == Type::I32 {
                        REG_NAMES[src_reg.0 as usize][1]
                    } else {
                        reg64(src_reg)
                    };
                    asm!(self, "{cvt} xmm0, {name}");
                }
                let dst_reg = self.alloc_reg(cur_time, None, &[src_reg], false);
                asm!(self, "{} {}, xmm0", Self::fp_mov(to), reg_name(dst_reg, to));
                self.set_var_to_reg(cur_time, dst, dst_reg);
            }
            (true, false) => {
                // float -> integer
                let sfx = Self::fp_suffix(from);
                asm!(self, "{} xmm0, {src_name}", Self::fp_mov(from));
                match rounding {
                    RoundingMode::Zero => {}
                    RoundingMode::Nearest => {}
                    RoundingMode::Down => asm!(self, "round{sfx} xmm0, xmm0, 1"),
                    RoundingMode::Up => asm!(self, "round{sfx} xmm0, xmm0, 2"),
                }
                let cvt = match rounding {
                    RoundingMode::Nearest => {
                        if from == Type::F32 {
                            "cvtss2si"
                        } else {
                            "cvtsd2si"
                        }
                    }
                    _ => {
                        if from == Type::F32 {
                            "cvttss2si"
                        } else {
                            "cvttsd2si"
                        }
                    }
                };
                let dst_reg = self.alloc_reg(cur_time, None, &[src_reg], false);
                let dst_name = if to == Type::I32 {
                    REG_NAMES[dst_reg.0 as usize][1]
                } else {
                    reg64(dst_reg)
                };
                asm!(self, "{cvt} {dst_name}, xmm0");
                self.set_var_to_reg(cur_time, dst, dst_reg);
            }
            (true, true) => {
                // precision change
                let (mv_in, cvt, mv_out) = if from == Type::F32 {
                    ("movd", "cvtss2sd", "movq")
                } else {
                    ("movq", "cvtsd2ss", "movd")
                };
                asm!(self, "{mv_in} xmm0, {src_name}");
                asm!(self, "{cvt} xmm0, xmm0");
                let dst_reg = self.alloc_reg(cur_time, None, &[src_reg], false);
                asm!(self, "{mv_out} {}, xmm0", reg_name(dst_reg, to));
                self.set_var_to_reg(cur_time, dst, dst_reg);
            }
            (false, false) => panic!("integer-to-integer convert reached the allocator"),
        }
        let _ = vid;
    }
}

// ---- control-flow lowering -------------------------------------------------

impl RegAlloc<'_, '_> {
    /// Assign input maps to targets that do not have one yet, so this
    /// block's cf-ops know where to place the values.
    fn prepare_cf_ops(&mut self, bb: BlockId) {
        for cf_idx in 0..self.ctx.ir.block(bb).cf_ops.len() {
            let Some(target) = self.ctx.ir.block(bb).cf_ops[cf_idx].target() else { continue };
            if self.ctx.ir.block(target).gen.input_map_setup {
                continue;
            }
            match &self.ctx.ir.block(bb).cf_ops[cf_idx].info {
                CfInfo::Jump { target_inputs, .. } | CfInfo::CJump { target_inputs, .. } => {
                    let inputs = target_inputs.clone();
                    self.set_bb_inputs(target, &inputs);
                }
                CfInfo::Syscall { .. } | CfInfo::Call { .. } => {
                    // entered through statics (clobbered registers / ret)
                    self.seed_target_statics(target);
                }
                _ => {}
            }
        }
    }

    fn seed_target_statics(&mut self, target: BlockId) {
        for i in 0..self.ctx.ir.block(target).inputs.len() {
            let input = self.ctx.ir.block(target).inputs[i];
            let s = self
                .ctx
                .ir
                .block(target)
                .var(input)
                .static_idx()
                .expect("block input without a static binding");
            self.ctx.ir.block_mut(target).var_mut(input).gen.location = Location::Static(s);
        }
        self.set_bb_inputs_from_static(target);
    }

    fn set_bb_inputs_from_static(&mut self, target: BlockId) {
        let mut input_map = Vec::new();
        for i in 0..self.ctx.ir.block(target).inputs.len() {
            let input = self.ctx.ir.block(target).inputs[i];
            let s = self
                .ctx
                .ir
                .block(target)
                .var(input)
                .static_idx()
                .expect("block input without a static binding");
            self.ctx.ir.block_mut(target).var_mut(input).gen.location = Location::Static(s);
            input_map.push(InputLoc::Static(s));
        }
        let gen = &mut self.ctx.ir.block_mut(target).gen;
        gen.input_map = input_map;
        gen.input_map_setup = true;
    }

    /// Hand the current locations of the outgoing values to the target as
    /// its input map. A value feeding several inputs gets a fresh stack slot
    /// per extra use.
    fn set_bb_inputs(&mut self, target: BlockId, inputs: &[VarId]) {
        let cur_time = self.ctx.ir.block(self.cur_bb).order.len() as u32;

        for &input in inputs {
            if self.vty(input) == Type::Mt {
                continue;
            }
            if self.vloc(input) == Location::NotCalculated {
                debug_assert!(self.vimm(input).is_some());
                self.load_val_in_reg(cur_time, input, None, &[], true);
            }
        }

        assert_eq!(self.ctx.ir.block(target).inputs.len(), inputs.len());
        if self.is_top_level(target) {
            self.seed_target_statics(target);
            return;
        }

        for &input in inputs {
            self.vgen_mut(input).allocated_to_input = false;
        }

        for i in 0..inputs.len() {
            let input = inputs[i];
            let target_var = self.ctx.ir.block(target).inputs[i];
            if self.vty(input) == Type::Mt {
                continue;
            }

            if self.vgen(input).allocated_to_input {
                // already handed out once; give this use its own stack slot
                let slot = self.allocate_stack_slot(input);
                if let Location::Reg(r) = self.vloc(input) {
                    asm!(self, "mov [rsp + 8 * {slot}], {}", reg64(Reg(r)));
                } else {
                    let reg = self.load_val_in_reg(cur_time, input, None, &[], true);
                    asm!(self, "mov [rsp + 8 * {slot}], {}", reg64(reg));
                }
                if !self.vgen(input).saved_in_stack {
                    let gen = self.vgen_mut(input);
                    gen.saved_in_stack = true;
                    gen.stack_slot = slot as u32;
                }
                let tgen = &mut self.ctx.ir.block_mut(target).var_mut(target_var).gen;
                tgen.location = Location::StackFrame;
                tgen.saved_in_stack = true;
                tgen.stack_slot = slot as u32;
                continue;
            }

            debug_assert!(self.vloc(input) != Location::NotCalculated);
            self.vgen_mut(input).allocated_to_input = true;
            let loc = self.vloc(input);
            let slot = self.vgen(input).stack_slot;
            let tgen = &mut self.ctx.ir.block_mut(target).var_mut(target_var).gen;
            tgen.location = loc;
            if loc == Location::StackFrame {
                tgen.saved_in_stack = true;
                tgen.stack_slot = slot;
            }
        }

        self.generate_input_map(target);
    }

    fn generate_input_map(&mut self, bb: BlockId) {
        let mut input_map = Vec::new();
        for i in 0..self.ctx.ir.block(bb).inputs.len() {
            let input = self.ctx.ir.block(bb).inputs[i];
            let var = self.ctx.ir.block(bb).var(input);
            if var.ty == Type::Mt {
                // the token has no runtime representation
                input_map.push(InputLoc::Static(rvx_ir::MEM_IDX));
                continue;
            }
            input_map.push(match var.gen.location {
                Location::Reg(r) => InputLoc::Reg(r),
                Location::StackFrame => InputLoc::Stack(var.gen.stack_slot),
                Location::Static(s) => InputLoc::Static(s),
                Location::NotCalculated => {
                    panic!("uncomputed value handed to a block input")
                }
            });
        }
        let gen = &mut self.ctx.ir.block_mut(bb).gen;
        gen.input_map = input_map;
        gen.input_map_setup = true;
    }

    /// Entry thunk for a merged block: moves the statics into the locations
    /// the block's input map expects, then joins the allocated body.
    fn generate_translation_block(&mut self, bb: BlockId) {
        let mut buf = std::mem::take(&mut self.asm_buf);

        let mut rax_src: Option<StaticId> = None;
        for i in 0..self.ctx.ir.block(bb).inputs.len() {
            let input = self.ctx.ir.block(bb).inputs[i];
            if self.ctx.ir.block(bb).var(input).ty == Type::Mt {
                continue;
            }
            let src = self
                .ctx
                .ir
                .block(bb)
                .var(input)
                .static_idx()
                .expect("translation block input without a static");
            match self.ctx.ir.block(bb).gen.input_map[i] {
                InputLoc::Reg(r) if Reg(r) == REG_A => rax_src = Some(src),
                InputLoc::Reg(r) => asm!(self, "mov {}, [s{}]", reg64(Reg(r)), src.0),
                InputLoc::Stack(slot) => {
                    asm!(self, "mov rax, [s{}]", src.0);
                    asm!(self, "mov [rsp + 8 * {slot}], rax");
                }
                InputLoc::Static(dst) => {
                    if dst != src {
                        asm!(self, "mov rax, [s{}]", src.0);
                        asm!(self, "mov [s{}], rax", dst.0);
                    }
                }
            }
        }
        if let Some(src) = rax_src {
            asm!(self, "mov rax, [s{}]", src.0);
        }
        asm!(self, "jmp b{}_reg_alloc", bb.0);

        std::mem::swap(&mut buf, &mut self.asm_buf);
        self.translation_blocks.push((bb, buf));
    }

    /// Move the outgoing values into the target's input locations. Order is
    /// statics, then stack slots, then registers, each in a conflict-check /
    /// rematerialize / write sequence.
    fn write_target_inputs(&mut self, target: BlockId, cur_time: u32, inputs: &[VarId]) {
        assert!(self.ctx.ir.block(target).gen.input_map_setup);
        assert_eq!(self.ctx.ir.block(target).gen.input_map.len(), inputs.len());
        let input_map = self.ctx.ir.block(target).gen.input_map.clone();

        // input stack slots must not be recycled while writing
        for loc in &input_map {
            if let InputLoc::Stack(slot) = loc {
                let slot = *slot as usize;
                if self.stack_map.len() <= slot {
                    self.stack_map.resize(slot + 1, StackSlot { free: true, var: None });
                }
                self.stack_map[slot].free = false;
            }
        }

        // rebuild use times in write order
        for &input in inputs {
            let gen = self.vgen_mut(input);
            gen.last_use_time = 0;
            gen.uses.clear();
        }
        let mut t = cur_time + 1;
        for filter in [0, 1, 2] {
            for (i, &input) in inputs.iter().enumerate() {
                let matches_phase = match input_map[i] {
                    InputLoc::Static(_) => filter == 0,
                    InputLoc::Stack(_) => filter == 1,
                    InputLoc::Reg(_) => filter == 2,
                };
                if !matches_phase {
                    continue;
                }
                let gen = self.vgen_mut(input);
                gen.last_use_time = t;
                gen.uses.push(t);
                t += 1;
            }
        }

        // statics that are both a source and another value's destination get
        // lifted into registers first
        for (i, &input) in inputs.iter().enumerate() {
            if self.vty(input) == Type::Mt {
                continue;
            }
            let Location::Static(cur) = self.vloc(input) else { continue };
            let conflict = input_map.iter().enumerate().any(|(j, loc)| {
                j != i && matches!(loc, InputLoc::Static(s) if *s == cur)
            });
            if conflict {
                self.load_val_in_reg(cur_time, input, None, &[], true);
            }
        }

        // same for stack slots
        for (i, &input) in inputs.iter().enumerate() {
            if !self.vgen(input).saved_in_stack {
                continue;
            }
            let own = self.vgen(input).stack_slot;
            let conflict = input_map.iter().enumerate().any(|(j, loc)| {
                j != i && matches!(loc, InputLoc::Stack(s) if *s == own)
            });
            if conflict {
                let reg = self.load_val_in_reg(cur_time, input, None, &[], true);
                self.vgen_mut(input).saved_in_stack = false;
                self.save_reg(reg, true);
            }
        }

        let mut t = cur_time + 1;
        // statics
        for (i, &input) in inputs.iter().enumerate() {
            let InputLoc::Static(dst) = input_map[i] else { continue };
            if self.vty(input) == Type::Mt {
                t += 1;
                continue;
            }
            if self.skip_identity_statics() && self.vloc(input) == Location::Static(dst) {
                t += 1;
                continue;
            }
            let reg = self.load_val_in_reg(t, input, None, &[], true);
            asm!(self, "mov [s{}], {}", dst.0, reg64(reg));
            t += 1;
        }
        // stack slots
        for (i, &input) in inputs.iter().enumerate() {
            let InputLoc::Stack(slot) = input_map[i] else { continue };
            if self.vgen(input).saved_in_stack && self.vgen(input).stack_slot == slot {
                t += 1;
                continue;
            }
            let reg = self.load_val_in_reg(t, input, None, &[], true);
            asm!(self, "mov [rsp + 8 * {slot}], {}", reg64(reg));
            t += 1;
        }
        // registers
        for (i, &input) in inputs.iter().enumerate() {
            let InputLoc::Reg(r) = input_map[i] else { continue };
            let dst = Reg(r);
            if let Location::Reg(cur) = self.vloc(input) {
                if Reg(cur) == dst {
                    t += 1;
                    continue;
                }
                if let Some(other) = self.reg_map[dst.0 as usize].var {
                    if self.last_use(other) > t {
                        self.save_reg(dst, true);
                    }
                }
                self.clear_reg(t, dst, true);
                asm!(self, "mov {}, {}", reg64(dst), reg64(Reg(cur)));
                self.reg_map[dst.0 as usize] = RegState { var: Some(input), alloc_time: t };
            } else {
                self.load_val_in_reg(t, input, Some(dst), &[], true);
            }
            t += 1;
        }
    }

    /// Write mapping pairs straight into their statics: registers first,
    /// then everything else through a scratch register.
    fn write_static_mapping(&mut self, cur_time: u32, mapping: &[(VarId, StaticId)]) {
        let mut written = vec![false; mapping.len()];

        // lift conflicting static-resident sources into registers
        for (i, &(var, dst)) in mapping.iter().enumerate() {
            if self.vty(var) == Type::Mt {
                written[i] = true;
                continue;
            }
            let Location::Static(cur) = self.vloc(var) else { continue };
            if cur == dst && self.skip_identity_statics() {
                written[i] = true;
                continue;
            }
            self.load_val_in_reg(cur_time, var, None, &[], true);
        }

        for (i, &(var, dst)) in mapping.iter().enumerate() {
            if written[i] {
                continue;
            }
            if let Location::Reg(r) = self.vloc(var) {
                asm!(self, "mov [s{}], {}", dst.0, reg64(Reg(r)));
                written[i] = true;
            }
        }

        for (i, &(var, dst)) in mapping.iter().enumerate() {
            if written[i] {
                continue;
            }
            let reg = self.load_val_in_reg(cur_time, var, None, &[], true);
            asm!(self, "mov [s{}], {}", dst.0, reg64(reg));
        }
    }

    fn compile_cf_ops(&mut self, bb: BlockId, max_stack: usize) {
        let mut reg_map_bak = self.reg_map;
        let mut stack_map_bak = self.stack_map.clone();
        let mut gen_bak: Vec<rvx_ir::GenInfo> = {
            let block = self.ctx.ir.block(bb);
            block.order.iter().map(|&v| block.var(v).gen.clone()).collect()
        };

        let cf_count = self.ctx.ir.block(bb).cf_ops.len();
        for cf_idx in 0..cf_count {
            let cur_time = self.ctx.ir.block(bb).order.len() as u32;
            if cf_idx != 0 {
                self.reg_map = reg_map_bak;
                self.stack_map = stack_map_bak.clone();
                for (i, gen) in gen_bak.iter().enumerate() {
                    let vid = self.ctx.ir.block(bb).order[i];
                    self.ctx.ir.block_mut(bb).var_mut(vid).gen = gen.clone();
                }
            }
            asm!(self, "b{}_reg_alloc_cf{}:", bb.0, cf_idx);

            let target = self.ctx.ir.block(bb).cf_ops[cf_idx].target();
            let target_top_level = target.map_or(false, |t| self.is_top_level(t));

            let info = self.ctx.ir.block(bb).cf_ops[cf_idx].info.clone();
            match info {
                CfInfo::Jump { target, target_inputs } => {
                    let target = target.expect("unresolved jump survived the post-pass");
                    if self.crosses_superblock(bb, target, target_top_level) {
                        let pairs = self.static_pairs_for(target, &target_inputs);
                        self.write_static_mapping(cur_time, &pairs);
                        asm!(self, "add rsp, {}", max_stack * 8);
                        asm!(self, "jmp b{}", target.0);
                    } else {
                        self.write_target_inputs(target, cur_time, &target_inputs);
                        if target_top_level {
                            asm!(self, "add rsp, {}", max_stack * 8);
                            asm!(self, "jmp b{}", target.0);
                        } else {
                            asm!(self, "jmp b{}_reg_alloc", target.0);
                        }
                    }
                }
                CfInfo::CJump { target, target_inputs, cmp } => {
                    let target = target.expect("unresolved cjump survived the post-pass");
                    let cmp1 = self.ctx.ir.block(bb).cf_ops[cf_idx].inputs[0].unwrap();
                    let cmp2 = self.ctx.ir.block(bb).cf_ops[cf_idx].inputs[1].unwrap();
                    let cmp1_reg = self.load_reg(cur_time, cmp1);
                    self.emit_cmp(cur_time, cmp1, cmp1_reg, cmp2);

                    // the fall-through op continues from the post-compare
                    // state, so the compare is not redone
                    reg_map_bak = self.reg_map;
                    stack_map_bak = self.stack_map.clone();
                    gen_bak = {
                        let block = self.ctx.ir.block(bb);
                        block.order.iter().map(|&v| block.var(v).gen.clone()).collect()
                    };

                    let crossing = self.crosses_superblock(bb, target, target_top_level);
                    let mut transfer = String::new();
                    std::mem::swap(&mut transfer, &mut self.asm_buf);
                    if crossing {
                        let pairs = self.static_pairs_for(target, &target_inputs);
                        self.write_static_mapping(cur_time, &pairs);
                    } else {
                        self.write_target_inputs(target, cur_time, &target_inputs);
                    }
                    std::mem::swap(&mut transfer, &mut self.asm_buf);

                    if !target_top_level && !crossing && transfer.is_empty() {
                        asm!(self, "{} b{}_reg_alloc", jcc(cmp), target.0);
                        continue;
                    }
                    asm!(self, "{} b{}_reg_alloc_cf{}", jcc_inverse(cmp), bb.0, cf_idx + 1);
                    self.asm_buf.push_str(&transfer);
                    if target_top_level || crossing {
                        asm!(self, "add rsp, {}", max_stack * 8);
                        asm!(self, "jmp b{}", target.0);
                    } else {
                        asm!(self, "jmp b{}_reg_alloc", target.0);
                    }
                }
                CfInfo::Call { target, target_inputs, continuation, .. } => {
                    let target = target.expect("unresolved call survived the post-pass");
                    let continuation =
                        continuation.expect("call without a continuation block");
                    // call targets read every input from the statics
                    let pairs: Vec<(VarId, StaticId)> = {
                        let tgt = self.ctx.ir.block(target);
                        target_inputs
                            .iter()
                            .zip(&tgt.inputs)
                            .map(|(&v, &tv)| (v, tgt.var(tv).static_idx().unwrap()))
                            .collect()
                    };
                    self.write_static_mapping(cur_time, &pairs);
                    asm!(self, "add rsp, {}", max_stack * 8);
                    asm!(self, "call b{}", target.0);
                    asm!(self, "jmp b{}", continuation.0);
                }
                CfInfo::ICall { continuation, mapping, .. } => {
                    let continuation =
                        continuation.expect("indirect call without a continuation block");
                    self.write_static_mapping(cur_time, &mapping);
                    let t = cur_time + 1 + mapping.len() as u32;
                    let dst_var = self.ctx.ir.block(bb).cf_ops[cf_idx].inputs[0].unwrap();
                    let dst = self.load_val_in_reg(t, dst_var, None, &[], true);
                    let tmp = self.dense_dispatch_scratch(bb, t, dst);
                    asm!(self, "add rsp, {}", max_stack * 8);
                    self.emit_ijump_dispatch(bb, dst, tmp, true, Some(continuation));
                }
                CfInfo::IJump { mapping, .. } => {
                    self.write_static_mapping(cur_time, &mapping);
                    let t = cur_time + 1 + mapping.len() as u32;
                    let dst_var = self.ctx.ir.block(bb).cf_ops[cf_idx].inputs[0].unwrap();
                    let dst = self.load_val_in_reg(t, dst_var, None, &[], true);
                    let tmp = self.dense_dispatch_scratch(bb, t, dst);
                    asm!(self, "add rsp, {}", max_stack * 8);
                    self.emit_ijump_dispatch(bb, dst, tmp, false, None);
                }
                CfInfo::Return { mapping } => {
                    self.write_static_mapping(cur_time, &mapping);
                    asm!(self, "add rsp, {}", max_stack * 8);
                    asm!(self, "ret");
                }
                CfInfo::Unreachable => {
                    self.ctx.err_msgs.push((ErrType::Unreachable, bb));
                    asm!(self, "lea rdi, [rip + err_unreachable_b{}]", bb.0);
                    asm!(self, "jmp panic");
                }
                CfInfo::Syscall { continuation, continuation_mapping, static_mapping } => {
                    let continuation =
                        continuation.expect("syscall without a continuation block");
                    self.write_static_mapping(cur_time, &continuation_mapping);

                    for (i, &reg) in CALL_REGS.iter().enumerate() {
                        let Some(var) = self.ctx.ir.block(bb).cf_ops[cf_idx].inputs[i] else {
                            break;
                        };
                        if self.vty(var) == Type::Mt {
                            continue;
                        }
                        if let Some(other) = self.reg_map[reg.0 as usize].var {
                            if self.last_use(other) >= cur_time {
                                self.save_reg(reg, true);
                            }
                        }
                        self.load_val_in_reg(cur_time, var, Some(reg), &[], true);
                    }
                    match self.ctx.ir.block(bb).cf_ops[cf_idx].inputs[6] {
                        None => asm!(self, "sub rsp, 16"),
                        Some(arg6) => {
                            if let Some(other) = self.reg_map[REG_A.0 as usize].var {
                                if self.last_use(other) >= cur_time {
                                    self.save_reg(REG_A, true);
                                }
                            }
                            self.load_val_in_reg(cur_time, arg6, Some(REG_A), &[], true);
                            asm!(self, "sub rsp, 8");
                            asm!(self, "push rax");
                        }
                    }
                    asm!(self, "call syscall_impl");
                    if let Some(s) = static_mapping.first() {
                        asm!(self, "mov [s{}], rax", s.0);
                    }
                    if let Some(s) = static_mapping.get(1) {
                        asm!(self, "mov [s{}], rdx", s.0);
                    }
                    asm!(self, "add rsp, {}", max_stack * 8 + 16);
                    asm!(self, "jmp b{}", continuation.0);
                }
            }
        }
    }

    /// A direct transfer into a block compiled under another superblock
    /// lead must not assume this frame's layout; it travels through the
    /// statics and the target's `bN` entry thunk instead.
    fn crosses_superblock(&self, bb: BlockId, target: BlockId, target_top_level: bool) -> bool {
        if target_top_level {
            return false;
        }
        match (self.superblock_of.get(&bb), self.superblock_of.get(&target)) {
            (Some(a), Some(b)) => a != b,
            _ => false,
        }
    }

    /// Pair each outgoing value with the static slot of the corresponding
    /// target input.
    fn static_pairs_for(&self, target: BlockId, inputs: &[VarId]) -> Vec<(VarId, StaticId)> {
        let tgt = self.ctx.ir.block(target);
        inputs
            .iter()
            .zip(&tgt.inputs)
            .map(|(&v, &tv)| (v, tgt.var(tv).static_idx().expect("non-static block input")))
            .collect()
    }

    /// Scratch register and panic message of the dense dispatch sequence.
    /// The CHD stub needs neither, so nothing is allocated in that mode.
    fn dense_dispatch_scratch(&mut self, bb: BlockId, cur_time: u32, dst: Reg) -> Option<Reg> {
        if self.ctx.use_chd {
            return None;
        }
        let tmp = self.alloc_reg(cur_time, None, &[dst], true);
        self.ctx.err_msgs.push((ErrType::UnresolvedIJump, bb));
        Some(tmp)
    }

    /// The dispatch of a dynamic transfer. With the dense table, index it by
    /// half the offset from the block base, verify the entry and jump (or
    /// call) through it; a miss funnels into the per-block panic stub. With
    /// the CHD table, hand the guest address to the lookup stub in `rbx`.
    fn emit_ijump_dispatch(
        &mut self,
        bb: BlockId,
        dst: Reg,
        tmp: Option<Reg>,
        is_call: bool,
        continuation: Option<BlockId>,
    ) {
        let dst_name = reg64(dst);
        let Some(tmp) = tmp else {
            if dst != REG_B {
                asm!(self, "mov rbx, {dst_name}");
            }
            if is_call {
                asm!(self, "call icall_lookup");
                asm!(self, "jmp b{}", continuation.unwrap().0);
            } else {
                asm!(self, "jmp ijump_lookup");
            }
            return;
        };

        let tmp_name = reg64(tmp);
        asm!(self, "sub {dst_name}, {}", self.ctx.ir.virt_bb_start_addr);
        asm!(self, "shr {dst_name}, 1");
        asm!(self, "cmp {dst_name}, (ijump_lookup_end - ijump_lookup) / 4");
        asm!(self, "jae 7f");
        asm!(self, "lea {tmp_name}, [rip + ijump_lookup]");
        asm!(self, "mov {}, [{tmp_name} + 4 * {dst_name}]", REG_NAMES[tmp.0 as usize][1]);
        asm!(self, "test {tmp_name}, {tmp_name}");
        asm!(self, "je 7f");
        if is_call {
            asm!(self, "call {tmp_name}");
            asm!(self, "jmp b{}", continuation.unwrap().0);
        } else {
            asm!(self, "jmp {tmp_name}");
        }
        asm!(self, "7:");
        asm!(self, "lea rdi, [rip + err_unresolved_ijump_b{}]", bb.0);
        asm!(self, "jmp panic");
    }
}

fn jcc(cmp: CmpKind) -> &'static str {
    match cmp {
        CmpKind::Eq => "je",
        CmpKind::Neq => "jne",
        CmpKind::Lt => "jb",
        CmpKind::Gt => "ja",
        CmpKind::Slt => "jl",
        CmpKind::Sgt => "jg",
    }
}

fn jcc_inverse(cmp: CmpKind) -> &'static str {
    match cmp {
        CmpKind::Eq => "jne",
        CmpKind::Neq => "je",
        CmpKind::Lt => "jae",
        CmpKind::Gt => "jbe",
        CmpKind::Slt => "jge",
        CmpKind::Sgt => "jle",
    }
}
