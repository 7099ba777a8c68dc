//! Contract of the emitted object and the runtime helper.
//!
//! The generator produces an assembly module; assembling it and laying out
//! the final relocatable object is the job of an external writer. These
//! constants pin down the section and symbol names both sides agree on.

/// Full copy of the loadable guest image, mapped at the guest base address.
pub const SEC_ORIG_BINARY: &str = ".orig_binary";
/// Emitted code; starts with the `_start` thunk.
pub const SEC_TTEXT: &str = ".ttext";
/// Statics table, parameter-passing area, translator stack, saved stack
/// pointer.
pub const SEC_TBSS: &str = ".tbss";
/// Dense or CHD indirect-jump table.
pub const SEC_IJUMPS: &str = ".ijumps";
/// Program-header info words and error messages.
pub const SEC_RODATA: &str = ".rodata";

/// Size of the parameter-passing scratch area.
pub const PARAM_AREA_SIZE: usize = 128;
/// Size of the translator stack.
pub const TRANS_STACK_SIZE: usize = 2 * 1024 * 1024;

/// Imports the emitted code requires from the runtime helper:
///
/// - `syscall_impl(id, a0..a5)`: RISC-V syscall dispatch, passthrough or
///   emulated.
/// - `panic(msg)`: prints `PANIC: <msg>` to stderr, exits with status 1.
/// - `copy_stack(in_sp, out_stack_top)`: rewrites argc/argv/envp/auxv onto
///   the translator stack and returns the new guest stack pointer.
/// - `spookey_hash(out, key)`: the CHD lookup hash, used only when the
///   perfect-hash table is emitted.
/// - `unresolved_ijump(addr)`: diagnostic sink of the CHD miss path.
pub const RUNTIME_IMPORTS: [&str; 5] =
    ["syscall_impl", "panic", "copy_stack", "spookey_hash", "unresolved_ijump"];

/// Symbols the object exports for the runtime and the linker script:
/// per-block labels `bbN`, `_start`, the statics `sN`, plus the layout
/// markers below.
pub const LAYOUT_EXPORTS: [&str; 12] = [
    "orig_binary_vaddr",
    "orig_binary_size",
    "ttext_start",
    "tbss_start",
    "ijump_table_start",
    "rodata_start",
    "helper_start",
    "phdr_off",
    "phdr_size",
    "phdr_num",
    "init_stack_ptr",
    "trans_stack",
];
