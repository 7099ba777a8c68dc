use super::Rewriter;
use crate::block::BasicBlock;
use crate::ir::Ir;
use crate::op::{OpKind, Rounding, RoundingMode};
use crate::types::Type;
use crate::value::{VarId, VarInfo};
use hashbrown::HashMap;

/// Canonical identity of a variable for deduplication purposes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Key {
    Imm { ty: Type, val: i64, binary_relative: bool },
    Static { ty: Type, idx: u16 },
    Op {
        ty: Type,
        kind: OpKind,
        inputs: [Option<u32>; 4],
        out_mask: u8,
        rounding: Option<RoundingKey>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum RoundingKey {
    Mode(RoundingMode),
    Dynamic(u32),
}

fn key_of(block: &BasicBlock, vid: VarId, rw: &Rewriter) -> Option<Key> {
    let var = block.var(vid);
    match &var.info {
        VarInfo::Imm(imm) => Some(Key::Imm {
            ty: var.ty,
            val: imm.val,
            binary_relative: imm.binary_relative,
        }),
        VarInfo::Static(idx) => Some(Key::Static { ty: var.ty, idx: idx.0 }),
        VarInfo::Op(op) => {
            // loads and stores carry hidden memory-token ordering
            if matches!(op.kind, OpKind::Load | OpKind::Store) {
                return None;
            }
            let mut inputs = [None; 4];
            for (slot, input) in op.inputs.iter().enumerate() {
                inputs[slot] = input.map(|v| rw.resolve(v).unwrap_or(v).0);
            }
            let mut out_mask = 0u8;
            for (i, out) in op.outputs.iter().enumerate() {
                if out.is_some() {
                    out_mask |= 1 << i;
                }
            }
            let rounding = op.rounding.map(|r| match r {
                Rounding::Mode(m) => RoundingKey::Mode(m),
                Rounding::Dynamic(v) => RoundingKey::Dynamic(rw.resolve(v).unwrap_or(v).0),
            });
            Some(Key::Op { ty: var.ty, kind: op.kind, inputs, out_mask, rounding })
        }
        VarInfo::Uninit => panic!("uninitialized variable {vid} in optimizer"),
    }
}

/// Deduplicate identical values within each block.
///
/// Two variables are equal iff their provenance matches: equal immediates,
/// equal static indices, or the same operation kind over pointwise-identical
/// inputs with matching output positions and rounding info.
pub fn dedup_imm(ir: &mut Ir) {
    let mut rw = Rewriter::default();

    for block in &mut ir.blocks {
        rw.clear();
        let mut seen: HashMap<Key, VarId> = HashMap::new();
        let mut duplicates: Vec<VarId> = Vec::new();

        for idx in 0..block.order.len() {
            let vid = block.order[idx];
            if block.var(vid).is_operation() {
                rw.apply_to_op(block, vid);
            }
            let Some(key) = key_of(block, vid, &rw) else { continue };
            match seen.get(&key) {
                Some(&canonical) => {
                    rw.replace(vid, canonical);
                    duplicates.push(vid);
                }
                None => {
                    seen.insert(key, vid);
                }
            }
        }

        rw.apply_to_all_cf(block);

        for vid in duplicates {
            block.remove_var(vid);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfop::CfInfo;
    use crate::verify::verify;

    fn imm_block(ir: &mut Ir) -> crate::value::BlockId {
        let b = ir.add_basic_block(0x100, "");
        let bb = ir.block_mut(b);
        let a = bb.new_imm(42, 0, false);
        let c = bb.new_imm(42, 0, false);
        let d = bb.new_imm(42, 0, true); // binary-relative, not a duplicate
        let sum1 = bb.emit(Type::I64, 4, OpKind::Add, &[a, c]);
        let sum2 = bb.emit(Type::I64, 4, OpKind::Add, &[c, d]);
        let total = bb.emit(Type::I64, 8, OpKind::Add, &[sum1, sum2]);
        let cf = bb.push_cf_op(CfInfo::Return { mapping: vec![] }, 8, 0);
        bb.add_cf_target_input(cf, total, crate::value::StaticId(10));
        b
    }

    #[test]
    fn merges_equal_immediates_and_ops() {
        let mut ir = Ir::new();
        ir.install_guest_statics();
        let b = imm_block(&mut ir);
        assert!(verify(&ir).is_ok());

        dedup_imm(&mut ir);
        assert!(verify(&ir).is_ok());
        // one of the two equal immediates is gone, the relative one stays
        assert_eq!(ir.block(b).var_count(), 5);

        let before = ir.block(b).var_count();
        dedup_imm(&mut ir);
        assert_eq!(ir.block(b).var_count(), before, "dedup must be idempotent");
        assert!(verify(&ir).is_ok());
    }

    #[test]
    fn identical_op_chains_collapse() {
        let mut ir = Ir::new();
        let b = ir.add_basic_block(0x100, "");
        let bb = ir.block_mut(b);
        let a = bb.new_imm(1, 0, false);
        let x = bb.emit(Type::I64, 0, OpKind::Not, &[a]);
        let y = bb.emit(Type::I64, 0, OpKind::Not, &[a]);
        let z = bb.emit(Type::I64, 0, OpKind::Xor, &[x, y]);
        let cf = bb.push_cf_op(CfInfo::Return { mapping: vec![] }, 0, 0);
        bb.add_cf_target_input(cf, z, crate::value::StaticId(1));

        dedup_imm(&mut ir);
        assert!(verify(&ir).is_ok());
        let bb = ir.block(b);
        assert_eq!(bb.var_count(), 3);
        // z now xors the surviving `not` with itself
        let z_op = bb.var(z).op().unwrap();
        assert_eq!(z_op.inputs[0], z_op.inputs[1]);
    }
}
