use crate::block::BasicBlock;
use crate::cfop::CfInfo;
use crate::types::Type;
use crate::value::{BlockId, StaticId, VarId};
use core::fmt;

/// Static slot of the guest zero register; never mapped, a zero immediate
/// substitutes for reads.
pub const ZERO_IDX: StaticId = StaticId(0);
/// Static slot of the memory token.
pub const MEM_IDX: StaticId = StaticId(32);
/// First static slot of the guest floating-point register file.
pub const FP_START_IDX: StaticId = StaticId(33);
/// Number of statics participating in the lifter's register map
/// (x0..x31, the memory token, f0..f31).
pub const MAPPED_STATICS: usize = 65;
/// Total static table size including the reserved overflow slot.
pub const STATIC_COUNT: usize = 66;

static_assertions::const_assert_eq!(MAPPED_STATICS, FP_START_IDX.0 as usize + 32);

/// A named, typed memory slot with a stable index. Codegen reads and writes
/// `[sN]` directly from the index.
#[derive(Debug, Clone)]
pub struct StaticMapper {
    pub name: String,
    pub ty: Type,
}

/// The whole-program container: static table, basic blocks, entry block and
/// ELF metadata carried through from the loader.
#[derive(Debug, Default)]
pub struct Ir {
    pub statics: Vec<StaticMapper>,
    pub blocks: Vec<BasicBlock>,
    pub entry_block: Option<BlockId>,

    /// Base load address of the guest image.
    pub base_addr: u64,
    /// Size of the loadable image.
    pub load_size: u64,
    pub phdr_off: u64,
    pub phdr_size: u64,
    pub phdr_num: u64,
    /// Guest entry virtual address from the ELF header.
    pub p_entry_addr: u64,

    /// Guest address range that may contain basic blocks, and a per-2-byte
    /// pointer table mapping start addresses to blocks.
    pub virt_bb_start_addr: u64,
    pub virt_bb_end_addr: u64,
    bb_ptrs: Vec<Option<BlockId>>,
}

impl Ir {
    pub fn new() -> Self {
        Ir::default()
    }

    pub fn add_static(&mut self, name: impl Into<String>, ty: Type) -> StaticId {
        let id = StaticId(u16::try_from(self.statics.len()).expect("static table overflow"));
        self.statics.push(StaticMapper { name: name.into(), ty });
        id
    }

    /// Install the fixed guest static table: 32 integer registers, the
    /// memory token, 32 floating-point registers and a reserved overflow
    /// slot. Must be called exactly once, before lifting.
    pub fn install_guest_statics(&mut self) {
        assert!(self.statics.is_empty(), "static table installed twice");
        for i in 0..32 {
            self.add_static(format!("x{i}"), Type::I64);
        }
        self.add_static("mem", Type::Mt);
        for i in 0..32 {
            self.add_static(format!("f{i}"), Type::F64);
        }
        self.add_static("ovf", Type::I64);
        debug_assert_eq!(self.statics.len(), STATIC_COUNT);
    }

    /// Set up the per-2-byte block-start pointer table for the given guest
    /// address range.
    pub fn setup_bb_addr_range(&mut self, start: u64, end: u64) {
        assert!(start <= end);
        self.virt_bb_start_addr = start;
        self.virt_bb_end_addr = end;
        self.bb_ptrs = vec![None; ((end - start) / 2 + 1) as usize];
    }

    pub fn in_bb_range(&self, addr: u64) -> bool {
        addr >= self.virt_bb_start_addr && addr <= self.virt_bb_end_addr
    }

    pub fn add_basic_block(&mut self, virt_start_addr: u64, name: impl Into<String>) -> BlockId {
        let id = BlockId(u32::try_from(self.blocks.len()).expect("block table overflow"));
        self.blocks.push(BasicBlock::new(id, virt_start_addr, name));
        if virt_start_addr != 0 && self.in_bb_range(virt_start_addr) {
            let slot = ((virt_start_addr - self.virt_bb_start_addr) / 2) as usize;
            self.bb_ptrs[slot] = Some(id);
        }
        id
    }

    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.index()]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut BasicBlock {
        &mut self.blocks[id.index()]
    }

    /// Block starting exactly at `addr`, through the pointer table.
    pub fn block_starting_at(&self, addr: u64) -> Option<BlockId> {
        if addr == 0 || !self.in_bb_range(addr) {
            return None;
        }
        self.bb_ptrs[((addr - self.virt_bb_start_addr) / 2) as usize]
    }

    /// Re-register a block under its (possibly changed) start address.
    pub fn index_block_start(&mut self, id: BlockId) {
        let addr = self.blocks[id.index()].virt_start_addr;
        if addr != 0 && self.in_bb_range(addr) {
            let slot = ((addr - self.virt_bb_start_addr) / 2) as usize;
            self.bb_ptrs[slot] = Some(id);
        }
    }

    /// Create a from-static variable in `block`, typed from the static table.
    pub fn add_var_from_static(
        &mut self,
        block: BlockId,
        static_idx: StaticId,
        assign_addr: u64,
    ) -> VarId {
        let ty = self.statics[static_idx.index()].ty;
        self.blocks[block.index()].new_input(static_idx, ty, assign_addr)
    }

    /// Append a control-flow op to `source`, wiring the predecessor and
    /// successor lists when the payload names a target. Returns the op's
    /// index within the source block.
    pub fn add_cf_op(
        &mut self,
        source: BlockId,
        info: CfInfo,
        instr_addr: u64,
        jump_addr: u64,
    ) -> usize {
        let target = match &info {
            CfInfo::Jump { target, .. }
            | CfInfo::CJump { target, .. }
            | CfInfo::Call { target, .. } => *target,
            CfInfo::Syscall { continuation, .. } => *continuation,
            _ => None,
        };
        let idx = self.blocks[source.index()].push_cf_op(info, instr_addr, jump_addr);
        if let Some(target) = target {
            self.link_blocks(source, target);
        }
        idx
    }

    pub fn link_blocks(&mut self, source: BlockId, target: BlockId) {
        if !self.blocks[source.index()].successors.contains(&target) {
            self.blocks[source.index()].successors.push(target);
        }
        if !self.blocks[target.index()].predecessors.contains(&source) {
            self.blocks[target.index()].predecessors.push(source);
        }
    }

    pub fn unlink_blocks(&mut self, source: BlockId, target: BlockId) {
        self.blocks[source.index()].successors.retain(|&b| b != target);
        self.blocks[target.index()].predecessors.retain(|&b| b != source);
    }

    /// Point a resolved cf-op at a concrete target, maintaining the graph.
    pub fn retarget_cf_op(&mut self, source: BlockId, cf_idx: usize, new_target: BlockId) {
        let old = self.blocks[source.index()].cf_ops[cf_idx].target();
        if old == Some(new_target) {
            return;
        }
        if let Some(old) = old {
            // only unlink when no sibling cf-op still targets the old block
            let still_used = self.blocks[source.index()]
                .cf_ops
                .iter()
                .enumerate()
                .any(|(i, cf)| i != cf_idx && cf.target() == Some(old));
            if !still_used {
                self.unlink_blocks(source, old);
            }
        }
        self.blocks[source.index()].cf_ops[cf_idx].set_target(Some(new_target));
        self.link_blocks(source, new_target);
    }
}

impl fmt::Display for Ir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, s) in self.statics.iter().enumerate() {
            writeln!(f, "static {} @{} ({})", s.ty, i, s.name)?;
        }
        for block in &self.blocks {
            writeln!(f, "{block}")?;
        }
        Ok(())
    }
}
