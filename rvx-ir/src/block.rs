use crate::cfop::{CfInfo, CfOp};
use crate::op::{OpKind, Operation, Rounding};
use crate::types::Type;
use crate::value::{BlockId, Imm, LifterInfo, SsaVar, StaticId, VarId, VarInfo};
use core::fmt;

/// Where a block expects one of its inputs when entered from a merged
/// predecessor; top-level blocks take all inputs from statics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputLoc {
    Reg(u8),
    Stack(u32),
    Static(StaticId),
}

/// Codegen-side metadata of a basic block.
#[derive(Debug, Clone, Default)]
pub struct BlockGenInfo {
    pub compiled: bool,
    pub input_map_setup: bool,
    pub input_map: Vec<InputLoc>,
    /// Block is the target of a call and must be entered through statics.
    pub call_target: bool,
    /// Block is a call continuation; `ret` transfers into it.
    pub call_cont_block: bool,
    pub manual_top_level: bool,
}

/// A basic block: an arena of SSA variables in definition order, terminated
/// by one or more control-flow operations.
#[derive(Debug)]
pub struct BasicBlock {
    pub id: BlockId,
    pub virt_start_addr: u64,
    /// Address of the last instruction belonging to this block; 0 while the
    /// block is still open.
    pub virt_end_addr: u64,
    pub debug_name: String,
    vars: Vec<SsaVar>,
    /// Live variables in definition order. Arena slots of removed variables
    /// stay behind as tombstones so `VarId`s remain stable.
    pub order: Vec<VarId>,
    /// Block parameters; every entry is a `from-static` variable.
    pub inputs: Vec<VarId>,
    pub cf_ops: Vec<CfOp>,
    pub predecessors: Vec<BlockId>,
    pub successors: Vec<BlockId>,
    pub gen: BlockGenInfo,
}

impl BasicBlock {
    pub fn new(id: BlockId, virt_start_addr: u64, debug_name: impl Into<String>) -> Self {
        BasicBlock {
            id,
            virt_start_addr,
            virt_end_addr: 0,
            debug_name: debug_name.into(),
            vars: Vec::new(),
            order: Vec::new(),
            inputs: Vec::new(),
            cf_ops: Vec::new(),
            predecessors: Vec::new(),
            successors: Vec::new(),
            gen: BlockGenInfo::default(),
        }
    }

    pub fn var(&self, id: VarId) -> &SsaVar {
        &self.vars[id.index()]
    }

    pub fn var_mut(&mut self, id: VarId) -> &mut SsaVar {
        &mut self.vars[id.index()]
    }

    pub fn var_count(&self) -> usize {
        self.order.len()
    }

    pub fn inc_ref(&mut self, id: VarId) {
        self.vars[id.index()].ref_count += 1;
    }

    pub fn dec_ref(&mut self, id: VarId) {
        let var = &mut self.vars[id.index()];
        debug_assert!(var.ref_count > 0, "reference count underflow on {id}");
        var.ref_count -= 1;
    }

    fn push_var(&mut self, ty: Type, info: VarInfo, assign_addr: u64) -> VarId {
        let id = VarId(u32::try_from(self.vars.len()).expect("block arena overflow"));
        self.vars.push(SsaVar {
            id,
            ty,
            info,
            ref_count: 0,
            lifter: LifterInfo { assign_addr, static_id: None },
            gen: Default::default(),
        });
        self.order.push(id);
        id
    }

    /// Create an uninitialized variable; an operation is attached later.
    pub fn new_var(&mut self, ty: Type, assign_addr: u64) -> VarId {
        self.push_var(ty, VarInfo::Uninit, assign_addr)
    }

    pub fn new_imm(&mut self, val: i64, assign_addr: u64, binary_relative: bool) -> VarId {
        self.push_var(Type::Imm, VarInfo::Imm(Imm { val, binary_relative }), assign_addr)
    }

    /// Create a block input bound to the given static slot.
    pub fn new_input(&mut self, static_idx: StaticId, ty: Type, assign_addr: u64) -> VarId {
        let id = self.push_var(ty, VarInfo::Static(static_idx), assign_addr);
        self.vars[id.index()].lifter.static_id = Some(static_idx);
        self.inputs.push(id);
        id
    }

    /// Attach an operation to `dst`, taking ownership of the input
    /// references. `dst` must appear among the operation's outputs; when the
    /// operation has no outputs yet, `dst` becomes the first.
    pub fn attach_op(&mut self, dst: VarId, mut op: Operation) {
        assert!(
            matches!(self.vars[dst.index()].info, VarInfo::Uninit),
            "variable {dst} already has a producer"
        );
        if op.outputs.iter().all(Option::is_none) {
            op.outputs[0] = Some(dst);
        }
        assert!(op.outputs.contains(&Some(dst)), "{dst} is not an output of its operation");
        for input in op.input_vars().collect::<Vec<_>>() {
            self.inc_ref(input);
        }
        if let Some(Rounding::Dynamic(rm)) = op.rounding {
            self.inc_ref(rm);
        }
        self.vars[dst.index()].info = VarInfo::Op(op);
    }

    /// Create a variable defined by `kind` over `inputs`.
    pub fn emit(&mut self, ty: Type, assign_addr: u64, kind: OpKind, inputs: &[VarId]) -> VarId {
        let dst = self.new_var(ty, assign_addr);
        self.attach_op(dst, Operation::with_inputs(kind, inputs));
        dst
    }

    /// Detach and return a variable's provenance, leaving it uninitialized.
    /// Reference counts of the operation inputs are not touched; the caller
    /// re-attaches or releases them.
    pub fn take_info(&mut self, id: VarId) -> VarInfo {
        core::mem::take(&mut self.vars[id.index()].info)
    }

    /// Remove a dead variable from the definition order, releasing the
    /// references its operation holds. Panics if the variable is still
    /// referenced.
    pub fn remove_var(&mut self, id: VarId) {
        assert_eq!(self.vars[id.index()].ref_count, 0, "removing referenced variable {id}");
        let info = core::mem::take(&mut self.vars[id.index()].info);
        if let VarInfo::Op(op) = info {
            for input in op.input_vars().collect::<Vec<_>>() {
                self.dec_ref(input);
            }
            if let Some(Rounding::Dynamic(rm)) = op.rounding {
                self.dec_ref(rm);
            }
        }
        self.order.retain(|&v| v != id);
    }

    /// Append a control-flow op; predecessor/successor bookkeeping is done by
    /// the IR container.
    pub fn push_cf_op(&mut self, info: CfInfo, instr_addr: u64, jump_addr: u64) -> usize {
        let mut op = CfOp::new(info);
        op.lifter.instr_addr = instr_addr;
        op.lifter.jump_addr = jump_addr;
        self.cf_ops.push(op);
        self.cf_ops.len() - 1
    }

    pub fn set_cf_inputs(&mut self, cf_idx: usize, inputs: &[VarId]) {
        assert!(inputs.len() <= 7, "cf-ops take at most 7 inputs");
        assert!(
            self.cf_ops[cf_idx].inputs.iter().all(Option::is_none),
            "cf-op inputs already set"
        );
        for (slot, &var) in inputs.iter().enumerate() {
            self.cf_ops[cf_idx].inputs[slot] = Some(var);
        }
        for &var in inputs {
            self.inc_ref(var);
        }
    }

    /// Add a target input (or mapping entry) to the cf-op, annotating the
    /// variable with the static slot it travels through.
    pub fn add_cf_target_input(&mut self, cf_idx: usize, var: VarId, static_idx: StaticId) {
        self.inc_ref(var);
        self.vars[var.index()].lifter.static_id = Some(static_idx);
        match &mut self.cf_ops[cf_idx].info {
            CfInfo::Jump { target_inputs, .. }
            | CfInfo::CJump { target_inputs, .. }
            | CfInfo::Call { target_inputs, .. } => target_inputs.push(var),
            CfInfo::Syscall { continuation_mapping, .. } => {
                continuation_mapping.push((var, static_idx))
            }
            CfInfo::ICall { mapping, .. }
            | CfInfo::IJump { mapping, .. }
            | CfInfo::Return { mapping } => mapping.push((var, static_idx)),
            CfInfo::Unreachable => panic!("unreachable cf-op takes no target inputs"),
        }
    }

    pub fn clear_cf_target_inputs(&mut self, cf_idx: usize) {
        let vars = self.cf_ops[cf_idx].target_input_vars();
        for var in vars {
            self.dec_ref(var);
        }
        match &mut self.cf_ops[cf_idx].info {
            CfInfo::Jump { target_inputs, .. }
            | CfInfo::CJump { target_inputs, .. }
            | CfInfo::Call { target_inputs, .. } => target_inputs.clear(),
            CfInfo::Syscall { continuation_mapping, .. } => continuation_mapping.clear(),
            CfInfo::ICall { mapping, .. }
            | CfInfo::IJump { mapping, .. }
            | CfInfo::Return { mapping } => mapping.clear(),
            CfInfo::Unreachable => {}
        }
    }

    /// Rewrite a cf-op into `unreachable`, dropping all payload references.
    pub fn make_cf_unreachable(&mut self, cf_idx: usize) {
        self.clear_cf_target_inputs(cf_idx);
        for slot in 0..self.cf_ops[cf_idx].inputs.len() {
            if let Some(var) = self.cf_ops[cf_idx].inputs[slot].take() {
                self.dec_ref(var);
            }
        }
        self.cf_ops[cf_idx].info = CfInfo::Unreachable;
    }
}

impl fmt::Display for BasicBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "block {}(", self.id)?;
        for (i, input) in self.inputs.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", self.var(*input))?;
        }
        writeln!(f, ") <= {:?} {{", self.predecessors)?;
        for &v in &self.order {
            writeln!(f, "  {} ({})", self.var(v), self.var(v).ref_count)?;
        }
        write!(f, "}} => [")?;
        for (i, cf) in self.cf_ops.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match &cf.info {
                CfInfo::Jump { target, .. } => write!(f, "jump {target:?}")?,
                CfInfo::CJump { target, cmp, .. } => write!(f, "cjump.{cmp} {target:?}")?,
                CfInfo::Call { target, .. } => write!(f, "call {target:?}")?,
                CfInfo::ICall { .. } => write!(f, "icall")?,
                CfInfo::IJump { .. } => write!(f, "ijump")?,
                CfInfo::Return { .. } => write!(f, "return")?,
                CfInfo::Unreachable => write!(f, "unreachable")?,
                CfInfo::Syscall { .. } => write!(f, "syscall")?,
            }
        }
        write!(f, "]")
    }
}
