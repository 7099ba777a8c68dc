//! Structural verifier for the IR invariants.
//!
//! Verification failures indicate translator bugs; pipeline code asserts on
//! them, while tests inspect the returned diagnostics.

use crate::cfop::CfInfo;
use crate::ir::Ir;
use crate::op::OpKind;
use crate::types::Type;
use crate::value::{BlockId, VarId, VarInfo};
use hashbrown::{HashMap, HashSet};

#[derive(Debug, thiserror::Error)]
pub enum VerifierError {
    #[error("{block}: {var} uses {input} before its definition")]
    UseBeforeDef { block: BlockId, var: VarId, input: VarId },
    #[error("{block}: input {var} is not a from-static variable")]
    InputNotStatic { block: BlockId, var: VarId },
    #[error("{from_block} -> {target}: {got} target inputs, target declares {expected} inputs")]
    TargetInputArity { from_block: BlockId, target: BlockId, got: usize, expected: usize },
    #[error("{from_block} -> {target}: target input {index} travels through {got:?}, input expects {expected:?}")]
    TargetInputStatic {
        from_block: BlockId,
        target: BlockId,
        index: usize,
        got: Option<crate::value::StaticId>,
        expected: Option<crate::value::StaticId>,
    },
    #[error("{from_block} targets {target} but the graph edge is missing")]
    GraphEdgeMissing { from_block: BlockId, target: BlockId },
    #[error("{block}: memory token {var} has {consumers} consumers")]
    MemoryTokenShared { block: BlockId, var: VarId, consumers: usize },
    #[error("{block}: {var} consumes non-token {input} as its memory token")]
    NotAMemoryToken { block: BlockId, var: VarId, input: VarId },
    #[error("{block}: division {var} has no live output")]
    DivWithoutOutput { block: BlockId, var: VarId },
    #[error("{block}: {var} has ref count {stored} but {observed} owning references exist")]
    RefCountMismatch { block: BlockId, var: VarId, stored: u16, observed: usize },
    #[error("{block}: morph {var} has invalid direction {from} -> {to}")]
    MorphDirection { block: BlockId, var: VarId, from: Type, to: Type },
}

pub fn verify(ir: &Ir) -> Result<(), Vec<VerifierError>> {
    let mut errors = Vec::new();

    for block in &ir.blocks {
        let bid = block.id;
        let mut defined: HashSet<VarId> = HashSet::new();
        let mut observed_refs: HashMap<VarId, usize> = HashMap::new();
        let mut mt_consumers: HashMap<VarId, usize> = HashMap::new();

        for &input in &block.inputs {
            if !block.var(input).is_static() {
                errors.push(VerifierError::InputNotStatic { block: bid, var: input });
            }
        }

        for &vid in &block.order {
            let var = block.var(vid);
            if let VarInfo::Op(op) = &var.info {
                for input in op.input_vars() {
                    if !defined.contains(&input) {
                        errors.push(VerifierError::UseBeforeDef { block: bid, var: vid, input });
                    }
                    *observed_refs.entry(input).or_default() += 1;
                }
                if let Some(crate::op::Rounding::Dynamic(rm)) = op.rounding {
                    *observed_refs.entry(rm).or_default() += 1;
                }

                match op.kind {
                    OpKind::Load => {
                        check_token(block, vid, op.inputs[1], &mut mt_consumers, &mut errors);
                    }
                    OpKind::Store => {
                        check_token(block, vid, op.inputs[2], &mut mt_consumers, &mut errors);
                    }
                    OpKind::Div | OpKind::Udiv => {
                        if op.outputs.iter().flatten().count() == 0 {
                            errors.push(VerifierError::DivWithoutOutput { block: bid, var: vid });
                        }
                    }
                    kind if kind.is_morph() => {
                        let from = op.inputs[0].map(|v| block.var(v).ty).unwrap_or(var.ty);
                        let to = var.ty;
                        let bad = if from == Type::Imm || to == Type::Imm {
                            false
                        } else {
                            match Type::cast_dir(from, to) {
                                None => true,
                                Some(dir) => match kind {
                                    OpKind::Cast => dir > 0,
                                    _ => dir < 0,
                                },
                            }
                        };
                        if bad {
                            errors.push(VerifierError::MorphDirection { block: bid, var: vid, from, to });
                        }
                    }
                    _ => {}
                }
            }
            defined.insert(vid);
        }

        for cf in &block.cf_ops {
            for input in cf.input_vars() {
                *observed_refs.entry(input).or_default() += 1;
            }
            for var in cf.target_input_vars() {
                *observed_refs.entry(var).or_default() += 1;
            }
        }

        for &vid in &block.order {
            let stored = block.var(vid).ref_count;
            let observed = observed_refs.get(&vid).copied().unwrap_or(0);
            if stored as usize != observed {
                errors.push(VerifierError::RefCountMismatch { block: bid, var: vid, stored, observed });
            }
        }

        for (&var, &consumers) in &mt_consumers {
            if consumers > 1 {
                errors.push(VerifierError::MemoryTokenShared { block: bid, var, consumers });
            }
        }
    }

    // block graph consistency and target-input agreement
    for block in &ir.blocks {
        for cf in &block.cf_ops {
            let Some(target) = cf.target() else { continue };
            let tgt = ir.block(target);
            if !tgt.predecessors.contains(&block.id) || !block.successors.contains(&target) {
                errors.push(VerifierError::GraphEdgeMissing { from_block: block.id, target });
            }

            // syscalls write their continuation through statics; arity against
            // the target's declared inputs only applies to direct transfers
            if matches!(cf.info, CfInfo::Syscall { .. }) {
                continue;
            }
            let inputs = cf.target_input_vars();
            if inputs.is_empty() {
                // unresolved op awaiting the post-pass
                continue;
            }
            if inputs.len() != tgt.inputs.len() {
                errors.push(VerifierError::TargetInputArity {
                    from_block: block.id,
                    target,
                    got: inputs.len(),
                    expected: tgt.inputs.len(),
                });
                continue;
            }
            for (i, (&src, &tin)) in inputs.iter().zip(&tgt.inputs).enumerate() {
                // a deduplicated value may sit at several positions; its
                // annotation is only authoritative when the position is unique
                if inputs.iter().filter(|&&v| v == src).count() != 1 {
                    continue;
                }
                let got = block.var(src).lifter.static_id;
                let expected = tgt.var(tin).static_idx();
                if got.is_some() && got != expected {
                    errors.push(VerifierError::TargetInputStatic {
                        from_block: block.id,
                        target,
                        index: i,
                        got,
                        expected,
                    });
                }
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_token(
    block: &crate::block::BasicBlock,
    var: VarId,
    token: Option<VarId>,
    consumers: &mut HashMap<VarId, usize>,
    errors: &mut Vec<VerifierError>,
) {
    match token {
        Some(token) if block.var(token).ty == Type::Mt => {
            *consumers.entry(token).or_default() += 1;
        }
        Some(token) => {
            errors.push(VerifierError::NotAMemoryToken { block: block.id, var, input: token });
        }
        None => {
            errors.push(VerifierError::NotAMemoryToken { block: block.id, var, input: var });
        }
    }
}

/// Panic with the collected diagnostics; used by pipeline stages where a
/// verification failure is an internal bug.
pub fn assert_valid(ir: &Ir) {
    if let Err(errors) = verify(ir) {
        for err in &errors {
            tracing::error!("verifier: {err}");
        }
        panic!("IR verification failed with {} error(s): {}", errors.len(), errors[0]);
    }
}
