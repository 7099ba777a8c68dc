use crate::value::{BlockId, StaticId, VarId};

/// Comparison kind of a conditional jump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum CmpKind {
    Eq,
    Neq,
    /// Unsigned less-than.
    Lt,
    /// Unsigned greater-than.
    Gt,
    /// Signed less-than.
    Slt,
    /// Signed greater-than.
    Sgt,
}

/// Kind-specific payload of a control-flow operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CfInfo {
    Jump {
        target: Option<BlockId>,
        /// Parallel to the target block's `inputs`.
        target_inputs: Vec<VarId>,
    },
    CJump {
        target: Option<BlockId>,
        target_inputs: Vec<VarId>,
        cmp: CmpKind,
    },
    Call {
        target: Option<BlockId>,
        target_inputs: Vec<VarId>,
        continuation: Option<BlockId>,
        continuation_mapping: Vec<(VarId, StaticId)>,
    },
    ICall {
        continuation: Option<BlockId>,
        mapping: Vec<(VarId, StaticId)>,
        /// Targets discovered by the indirect-jump resolver.
        targets: Vec<BlockId>,
    },
    IJump {
        mapping: Vec<(VarId, StaticId)>,
        targets: Vec<BlockId>,
    },
    Return {
        mapping: Vec<(VarId, StaticId)>,
    },
    Unreachable,
    Syscall {
        continuation: Option<BlockId>,
        continuation_mapping: Vec<(VarId, StaticId)>,
        /// Statics receiving the syscall return values (at most two).
        static_mapping: Vec<StaticId>,
    },
}

/// Lifter-side metadata of a control-flow operation.
#[derive(Debug, Clone, Copy, Default)]
pub struct CfLifterInfo {
    /// Address of the guest instruction that produced this op.
    pub instr_addr: u64,
    /// Resolved or computed jump target address, 0 when unknown.
    pub jump_addr: u64,
}

/// A control-flow operation terminating a basic block. Inputs are owning
/// references, like operation inputs.
#[derive(Debug, Clone)]
pub struct CfOp {
    pub inputs: [Option<VarId>; 7],
    pub info: CfInfo,
    pub lifter: CfLifterInfo,
}

impl CfOp {
    pub fn new(info: CfInfo) -> Self {
        CfOp { inputs: [None; 7], info, lifter: CfLifterInfo::default() }
    }

    pub fn is_unreachable(&self) -> bool {
        matches!(self.info, CfInfo::Unreachable)
    }

    /// The direct jump/continuation target of this op, mirroring the notion
    /// the lifter uses when wiring the block graph.
    pub fn target(&self) -> Option<BlockId> {
        match &self.info {
            CfInfo::Jump { target, .. }
            | CfInfo::CJump { target, .. }
            | CfInfo::Call { target, .. } => *target,
            CfInfo::Syscall { continuation, .. } => *continuation,
            CfInfo::ICall { .. }
            | CfInfo::IJump { .. }
            | CfInfo::Return { .. }
            | CfInfo::Unreachable => None,
        }
    }

    pub fn set_target(&mut self, new_target: Option<BlockId>) {
        match &mut self.info {
            CfInfo::Jump { target, .. }
            | CfInfo::CJump { target, .. }
            | CfInfo::Call { target, .. } => *target = new_target,
            CfInfo::Syscall { continuation, .. } => *continuation = new_target,
            _ => panic!("cf-op kind has no direct target"),
        }
    }

    /// Variables handed to the successor, regardless of the payload shape.
    pub fn target_input_vars(&self) -> Vec<VarId> {
        match &self.info {
            CfInfo::Jump { target_inputs, .. }
            | CfInfo::CJump { target_inputs, .. }
            | CfInfo::Call { target_inputs, .. } => target_inputs.clone(),
            CfInfo::Syscall { continuation_mapping, .. } => {
                continuation_mapping.iter().map(|(v, _)| *v).collect()
            }
            CfInfo::ICall { mapping, .. }
            | CfInfo::IJump { mapping, .. }
            | CfInfo::Return { mapping } => mapping.iter().map(|(v, _)| *v).collect(),
            CfInfo::Unreachable => Vec::new(),
        }
    }

    pub fn target_input_count(&self) -> usize {
        match &self.info {
            CfInfo::Jump { target_inputs, .. }
            | CfInfo::CJump { target_inputs, .. }
            | CfInfo::Call { target_inputs, .. } => target_inputs.len(),
            CfInfo::Syscall { continuation_mapping, .. } => continuation_mapping.len(),
            CfInfo::ICall { mapping, .. }
            | CfInfo::IJump { mapping, .. }
            | CfInfo::Return { mapping } => mapping.len(),
            CfInfo::Unreachable => 0,
        }
    }

    pub fn input_vars(&self) -> impl Iterator<Item = VarId> + '_ {
        self.inputs.iter().flatten().copied()
    }

    /// Every owning variable reference in this op: inputs plus all
    /// target-input/mapping entries.
    pub fn referenced_vars(&self) -> Vec<VarId> {
        let mut vars: Vec<VarId> = self.input_vars().collect();
        vars.extend(self.target_input_vars());
        vars
    }
}
