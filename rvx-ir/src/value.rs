use crate::op::Operation;
use crate::types::Type;
use core::fmt;

/// Index of an SSA variable inside its basic block's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
#[display(fmt = "v{}", _0)]
pub struct VarId(pub u32);

impl VarId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Index of a basic block inside the IR's block vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
#[display(fmt = "b{}", _0)]
pub struct BlockId(pub u32);

impl BlockId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Index of a static mapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
#[display(fmt = "s{}", _0)]
pub struct StaticId(pub u16);

impl StaticId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// An immediate payload. When `binary_relative` is set the value is an offset
/// from the guest's load base and is relocated at emission time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Imm {
    pub val: i64,
    pub binary_relative: bool,
}

impl Imm {
    pub fn new(val: i64) -> Self {
        Imm { val, binary_relative: false }
    }

    pub fn relative(val: i64) -> Self {
        Imm { val, binary_relative: true }
    }
}

/// Provenance of an SSA variable, exactly one variant per variable.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum VarInfo {
    #[default]
    Uninit,
    Imm(Imm),
    /// Block input: the value arrives through the named static slot.
    Static(StaticId),
    Op(Operation),
}

/// Lifter-side metadata of a variable.
#[derive(Debug, Clone, Copy, Default)]
pub struct LifterInfo {
    /// Guest virtual address at which the value was produced.
    pub assign_addr: u64,
    /// Static slot the value originated from or is destined for.
    pub static_id: Option<StaticId>,
}

/// Current materialization of a variable during code generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Location {
    /// Recomputable on demand (immediates, evicted statics).
    #[default]
    NotCalculated,
    Reg(u8),
    /// In the block's stack frame; the slot lives in `GenInfo::stack_slot`.
    StackFrame,
    Static(StaticId),
}

/// Codegen-side metadata of a variable.
#[derive(Debug, Clone, Default)]
pub struct GenInfo {
    pub location: Location,
    pub saved_in_stack: bool,
    pub stack_slot: u32,
    /// Use positions within the owning block (see the liveness pre-pass).
    pub uses: Vec<u32>,
    pub last_use_time: u32,
    /// Set when the value was emitted as part of a fused instruction.
    pub already_generated: bool,
    /// Set while wiring block inputs so a value is not handed out twice.
    pub allocated_to_input: bool,
}

impl GenInfo {
    pub fn reset(&mut self) {
        *self = GenInfo::default();
    }

    /// Next use strictly after `time`, if any.
    pub fn next_use_after(&self, time: u32) -> Option<u32> {
        self.uses.iter().copied().find(|&u| u > time)
    }
}

/// An SSA variable: produced exactly once, owned by its block's arena.
#[derive(Debug, Clone)]
pub struct SsaVar {
    pub id: VarId,
    pub ty: Type,
    pub info: VarInfo,
    /// Number of owning references (operation inputs, cf-op inputs and
    /// target mappings) currently pointing at this variable.
    pub ref_count: u16,
    pub lifter: LifterInfo,
    pub gen: GenInfo,
}

impl SsaVar {
    pub fn is_immediate(&self) -> bool {
        matches!(self.info, VarInfo::Imm(_))
    }

    pub fn is_static(&self) -> bool {
        matches!(self.info, VarInfo::Static(_))
    }

    pub fn is_operation(&self) -> bool {
        matches!(self.info, VarInfo::Op(_))
    }

    pub fn imm(&self) -> Option<Imm> {
        match self.info {
            VarInfo::Imm(imm) => Some(imm),
            _ => None,
        }
    }

    pub fn static_idx(&self) -> Option<StaticId> {
        match self.info {
            VarInfo::Static(idx) => Some(idx),
            _ => None,
        }
    }

    pub fn op(&self) -> Option<&Operation> {
        match &self.info {
            VarInfo::Op(op) => Some(op),
            _ => None,
        }
    }

    pub fn op_mut(&mut self) -> Option<&mut Operation> {
        match &mut self.info {
            VarInfo::Op(op) => Some(op),
            _ => None,
        }
    }
}

impl fmt::Display for SsaVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.ty, self.id)?;
        match &self.info {
            VarInfo::Uninit => Ok(()),
            VarInfo::Imm(imm) => {
                write!(f, " <- immediate {}", imm.val)?;
                if imm.binary_relative {
                    write!(f, " (bin-rel)")?;
                }
                Ok(())
            }
            VarInfo::Static(idx) => write!(f, " <- @{idx}"),
            VarInfo::Op(op) => {
                write!(f, " <- {}", op.kind)?;
                for (i, input) in op.input_vars().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, " {input}")?;
                }
                Ok(())
            }
        }
    }
}
