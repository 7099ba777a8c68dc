use rvx_ir::optimizer::Passes;

bitflags::bitflags! {
    /// Code-generation toggles.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct GenFlags: u32 {
        /// Skip cf-op writes that would move a static onto itself.
        const UNUSED_STATIC = 1 << 0;
        /// Fuse address-add/load/store and extension sequences.
        const MERGE_OP = 1 << 1;
        /// Use shlx/shrx/sarx instead of forcing counts into cl.
        const ARCH_BMI2 = 1 << 2;
        /// Emit the CHD perfect-hash ijump table instead of the dense table.
        const CHD_IJUMP = 1 << 3;
    }
}

/// Pipeline configuration; passed explicitly, no module-level state.
#[derive(Debug, Clone)]
pub struct Config {
    /// Verify the IR after lifting and between optimizer passes.
    pub debug: bool,
    /// Collect every value a static may hold during indirect-jump
    /// backtracking instead of stopping at the first hit per predecessor.
    pub full_backtracking: bool,
    pub passes: Passes,
    pub gen_flags: GenFlags,
    /// Whole-table CHD rebuild attempts before falling back to the dense
    /// ijump table.
    pub chd_max_attempts: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            debug: false,
            full_backtracking: false,
            passes: Passes::all_passes(),
            gen_flags: GenFlags::UNUSED_STATIC | GenFlags::MERGE_OP,
            chd_max_attempts: 8,
        }
    }
}
