use crate::value::VarId;

/// The closed set of IR operations.
///
/// All integer arithmetic is two's-complement modulo `2^width`. Shift amounts
/// must already be masked by the producer (`0x1f` for i32, `0x3f` for i64).
/// `SignExtend`/`ZeroExtend` may only widen, `Cast` may only narrow or
/// reinterpret bit-identical float/integer values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumCount)]
#[strum(serialize_all = "snake_case")]
pub enum OpKind {
    /// `load addr, mt -> val`
    Load,
    /// `store addr, val, mt -> mt'`
    Store,
    Add,
    /// `sub a, b` computes `a - b`.
    Sub,
    /// Lower half of the product.
    MulL,
    /// Upper half of the signed*signed product.
    SsmulH,
    /// Upper half of the unsigned*unsigned product.
    UumulH,
    /// Upper half of the signed*unsigned product.
    SumulH,
    /// Signed division; outputs are quotient and remainder, at least one set.
    Div,
    /// Unsigned division; outputs are quotient and remainder.
    Udiv,
    Shl,
    /// Logical right shift.
    Shr,
    /// Arithmetic right shift.
    Sar,
    Or,
    And,
    Xor,
    Not,
    /// Narrowing cast, or a same-width float/integer bit reinterpretation.
    Cast,
    /// `slt a, b, v1, v2` yields `v1` if `a < b` (signed), else `v2`.
    Slt,
    /// Unsigned variant of `Slt`.
    Sltu,
    /// `sle a, b, v1, v2` yields `v1` if `a <= b` (signed), else `v2`.
    Sle,
    /// `seq a, b, v1, v2` yields `v1` if `a == b`, else `v2`.
    Seq,
    SignExtend,
    ZeroExtend,
    /// Produces the initial guest stack pointer from the runtime.
    SetupStack,
    Umax,
    Umin,
    /// Signed maximum.
    Max,
    /// Signed minimum.
    Min,
    Fmul,
    Fdiv,
    Fsqrt,
    /// `d = a * b + c`
    Ffmadd,
    /// `d = a * b - c`
    Ffmsub,
    /// `d = -(a * b) + c`
    Ffnmadd,
    /// `d = -(a * b) - c`
    Ffnmsub,
    Fmin,
    Fmax,
    /// `flt a, b` yields 1 if `a < b`, else 0 (integer result).
    Flt,
    Fle,
    Feq,
    /// Signed integer <-> float or single <-> double conversion.
    Convert,
    /// Unsigned integer <-> float conversion.
    Uconvert,
}

impl OpKind {
    pub fn is_binary(self) -> bool {
        matches!(
            self,
            OpKind::Add
                | OpKind::Sub
                | OpKind::MulL
                | OpKind::SsmulH
                | OpKind::UumulH
                | OpKind::SumulH
                | OpKind::Shl
                | OpKind::Shr
                | OpKind::Sar
                | OpKind::Or
                | OpKind::And
                | OpKind::Xor
        )
    }

    pub fn is_unary(self) -> bool {
        matches!(self, OpKind::Not)
    }

    pub fn is_morph(self) -> bool {
        matches!(self, OpKind::Cast | OpKind::SignExtend | OpKind::ZeroExtend)
    }

    pub fn is_div(self) -> bool {
        matches!(self, OpKind::Div | OpKind::Udiv)
    }

    pub fn is_commutative(self) -> bool {
        matches!(self, OpKind::Add | OpKind::And | OpKind::Or | OpKind::Xor)
    }
}

/// IEEE-754 rounding mode attached to float conversions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RoundingMode {
    /// Round towards zero.
    Zero,
    /// Round to nearest, ties to even.
    #[default]
    Nearest,
    /// Round towards negative infinity.
    Down,
    /// Round towards positive infinity.
    Up,
}

/// Rounding information of an operation: either a fixed mode or a variable
/// holding the dynamic mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rounding {
    Mode(RoundingMode),
    Dynamic(VarId),
}

/// A typed instruction. Inputs are owning references (they contribute to the
/// reference count of the referenced variable); outputs are back-pointers to
/// variables whose `info` owns this operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub kind: OpKind,
    pub inputs: [Option<VarId>; 4],
    pub outputs: [Option<VarId>; 3],
    pub rounding: Option<Rounding>,
    /// Memory width of the access for `Load`/`Store`, tracked for codegen.
    pub access_type: Option<crate::Type>,
}

impl Operation {
    pub fn new(kind: OpKind) -> Self {
        Operation {
            kind,
            inputs: [None; 4],
            outputs: [None; 3],
            rounding: None,
            access_type: None,
        }
    }

    pub fn with_inputs(kind: OpKind, inputs: &[VarId]) -> Self {
        assert!(inputs.len() <= 4, "operations take at most 4 inputs");
        let mut op = Operation::new(kind);
        for (slot, var) in op.inputs.iter_mut().zip(inputs) {
            *slot = Some(*var);
        }
        op
    }

    pub fn input_vars(&self) -> impl Iterator<Item = VarId> + '_ {
        self.inputs.iter().flatten().copied()
    }

    pub fn output_vars(&self) -> impl Iterator<Item = VarId> + '_ {
        self.outputs.iter().flatten().copied()
    }
}
