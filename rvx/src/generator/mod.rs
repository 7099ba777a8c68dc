//! x86-64 code generation: emits an assembly module (GAS, Intel syntax)
//! wrapping the translated blocks, the statics, the entry thunk, the
//! indirect-jump lookup and the diagnostic data.

pub mod hashing;
pub mod object;
mod regalloc;

use crate::config::{Config, GenFlags};
use crate::error::{Error, Result};
use hashing::HashtableBuilder;
use regalloc::RegAlloc;
use rvx_ir::{BlockId, Ir};
use std::io::Write;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrType {
    Unreachable,
    UnresolvedIJump,
}

pub(crate) struct GenCtx<'a> {
    pub ir: &'a mut Ir,
    pub config: &'a Config,
    pub err_msgs: Vec<(ErrType, BlockId)>,
    /// Effective lookup choice. Decided before any dispatch site is
    /// emitted, since a failed CHD construction falls back to the dense
    /// table and the dispatch sequences differ.
    pub use_chd: bool,
}

pub struct Generator<'a> {
    ctx: GenCtx<'a>,
    /// Path of the guest binary included verbatim as the `binary` blob.
    binary_filepath: Option<String>,
}

impl<'a> Generator<'a> {
    pub fn new(ir: &'a mut Ir, config: &'a Config, binary_filepath: Option<String>) -> Self {
        Generator {
            ctx: GenCtx { ir, config, err_msgs: Vec::new(), use_chd: false },
            binary_filepath,
        }
    }

    pub fn compile(&mut self, out: &mut dyn Write) -> Result<()> {
        let chd_builder = self.build_chd_table();
        self.ctx.use_chd = chd_builder.is_some();

        writeln!(out, ".intel_syntax noprefix\n")?;

        writeln!(out, ".data")?;
        if let Some(path) = &self.binary_filepath {
            writeln!(out, "binary: .incbin \"{path}\"")?;
        }
        self.compile_statics(out)?;

        writeln!(out, ".bss")?;
        writeln!(out, "param_passing:")?;
        writeln!(out, ".space {}", object::PARAM_AREA_SIZE)?;
        writeln!(out, ".type param_passing,STT_OBJECT")?;
        writeln!(out, ".size param_passing,$-param_passing")?;
        writeln!(out, ".align 16")?;
        writeln!(out, "stack_space:")?;
        writeln!(out, ".space {}", object::TRANS_STACK_SIZE)?;
        writeln!(out, "stack_space_end:")?;
        writeln!(out, ".type stack_space,STT_OBJECT")?;
        writeln!(out, ".size stack_space,$-stack_space")?;
        writeln!(out, "init_stack_ptr: .quad 0")?;

        writeln!(out, "\n.text")?;
        RegAlloc::new(&mut self.ctx).compile_blocks(out)?;
        self.compile_entry(out)?;
        self.compile_ijump_lookup(out, chd_builder)?;

        writeln!(out, "\n.section .rodata")?;
        self.compile_phdr_info(out)?;
        self.compile_err_msgs(out)?;
        Ok(())
    }

    fn compile_statics(&mut self, out: &mut dyn Write) -> Result<()> {
        for (i, s) in self.ctx.ir.statics.iter().enumerate() {
            // every slot is 8 bytes wide regardless of its IR type
            writeln!(out, "s{i}: .quad 0 # {}", s.name)?;
        }
        Ok(())
    }

    fn compile_entry(&mut self, out: &mut dyn Write) -> Result<()> {
        let entry = self.ctx.ir.entry_block.expect("pipeline produced no entry block");
        writeln!(out, ".global _start")?;
        writeln!(out, "_start:")?;
        writeln!(out, "mov rbx, offset param_passing")?;
        writeln!(out, "mov rdi, rsp")?;
        writeln!(out, "mov rsi, offset stack_space_end")?;
        writeln!(out, "call copy_stack")?;
        writeln!(out, "mov [init_stack_ptr], rax")?;
        writeln!(out, "jmp b{}", entry.0)?;
        writeln!(out, ".type _start,STT_FUNC")?;
        writeln!(out, ".size _start,$-_start")?;
        Ok(())
    }

    fn compile_phdr_info(&mut self, out: &mut dyn Write) -> Result<()> {
        writeln!(out, ".global phdr_off\nphdr_off: .8byte {:#x}", self.ctx.ir.phdr_off)?;
        writeln!(out, ".global phdr_size\nphdr_size: .8byte {:#x}", self.ctx.ir.phdr_size)?;
        writeln!(out, ".global phdr_num\nphdr_num: .8byte {:#x}", self.ctx.ir.phdr_num)?;
        Ok(())
    }

    fn compile_err_msgs(&mut self, out: &mut dyn Write) -> Result<()> {
        let msgs = std::mem::take(&mut self.ctx.err_msgs);
        for (kind, block) in msgs {
            match kind {
                ErrType::Unreachable => writeln!(
                    out,
                    "err_unreachable_b{0}: .ascii \"Reached unreachable code in block {0}\\n\\0\"",
                    block.0
                )?,
                ErrType::UnresolvedIJump => writeln!(
                    out,
                    "err_unresolved_ijump_b{0}: .ascii \"Unresolved indirect jump in block {0}\\n\\0\"",
                    block.0
                )?,
            }
        }
        Ok(())
    }

    /// Attempt the CHD construction when it is requested, relaxing the load
    /// factor by 10% per retry. `None` (and the dense fallback) after the
    /// configured number of attempts.
    fn build_chd_table(&self) -> Option<HashtableBuilder> {
        if !self.ctx.config.gen_flags.contains(GenFlags::CHD_IJUMP) {
            return None;
        }
        let keys: Vec<u64> = self
            .ctx
            .ir
            .blocks
            .iter()
            .filter(|b| {
                b.virt_start_addr != 0 && !(b.cf_ops.is_empty() && b.order.is_empty())
            })
            .map(|b| b.virt_start_addr)
            .collect();

        let mut builder = HashtableBuilder::new();
        builder.fill(keys);
        let mut attempts = 0u32;
        while !builder.build() {
            attempts += 1;
            if attempts >= self.ctx.config.chd_max_attempts {
                tracing::warn!(
                    error = %Error::HashTableBuild { attempts },
                    "falling back to the dense table"
                );
                return None;
            }
            builder.relax();
        }
        Some(builder)
    }

    /// The guest-address to code-entry mapping for dynamic transfers: either
    /// the dense per-2-byte table or the CHD perfect-hash table.
    fn compile_ijump_lookup(
        &mut self,
        out: &mut dyn Write,
        chd_builder: Option<HashtableBuilder>,
    ) -> Result<()> {
        writeln!(out, "\n.section .ijumps")?;
        match chd_builder {
            Some(builder) => self.compile_chd_lookup(out, &builder),
            None => self.compile_dense_lookup(out),
        }
    }

    fn compile_dense_lookup(&mut self, out: &mut dyn Write) -> Result<()> {
        writeln!(out, "ijump_lookup:")?;
        let start = self.ctx.ir.virt_bb_start_addr;
        let end = self.ctx.ir.virt_bb_end_addr;
        let mut addr = start;
        while addr <= end {
            match self.ctx.ir.block_starting_at(addr) {
                Some(bid) if self.ctx.ir.block(bid).gen.compiled => {
                    writeln!(out, ".4byte b{}", bid.0)?
                }
                _ => writeln!(out, ".4byte 0")?,
            }
            addr += 2;
        }
        writeln!(out, "ijump_lookup_end:")?;
        Ok(())
    }

    fn compile_chd_lookup(
        &mut self,
        out: &mut dyn Write,
        builder: &HashtableBuilder,
    ) -> Result<()> {
        writeln!(out, ".global ijump_hash_table")?;
        writeln!(out, "ijump_hash_table:")?;
        for &key in &builder.hash_table {
            writeln!(out, ".8byte {key:#x}")?;
            match self.ctx.ir.block_starting_at(key) {
                Some(bid) => writeln!(out, ".8byte b{}", bid.0)?,
                None => writeln!(out, ".8byte unresolved_ijump")?,
            }
        }
        writeln!(out, ".global ijump_hash_function_idxs")?;
        writeln!(out, "ijump_hash_function_idxs:")?;
        for idx in &builder.hash_idxs {
            writeln!(out, ".word {idx}")?;
        }
        writeln!(out, ".global ijump_hash_bucket_number")?;
        writeln!(out, "ijump_hash_bucket_number:\n.quad {}", builder.bucket_number)?;
        writeln!(out, ".global ijump_hash_table_size")?;
        writeln!(out, "ijump_hash_table_size:\n.quad {}", builder.hash_table_size)?;

        // dispatch sites reach these stubs; one per transfer kind
        writeln!(out, "\n.text")?;
        self.print_chd_stub(out, builder, false)?;
        self.print_chd_stub(out, builder, true)?;
        Ok(())
    }

    /// The lookup stub every dynamic dispatch site reaches in CHD mode:
    /// hash the guest address (handed over in rbx), locate the slot, verify
    /// the stored key and transfer through the entry. The call variant
    /// returns to its dispatch site so the continuation jump runs.
    fn print_chd_stub(
        &mut self,
        out: &mut dyn Write,
        builder: &HashtableBuilder,
        is_call: bool,
    ) -> Result<()> {
        if is_call {
            writeln!(out, "icall_lookup:")?;
        } else {
            writeln!(out, "ijump_lookup:")?;
        }
        writeln!(out, "push rax\npush rdx\npush rdi\npush rsi\npush rcx")?;
        writeln!(out, "sub rsp, 32")?;
        writeln!(out, "mov rsi, rbx")?;
        writeln!(out, "mov rdi, rsp")?;
        writeln!(out, "call spookey_hash")?;
        // bucket displacement index
        writeln!(out, "mov rsi, [rsp]")?;
        writeln!(out, "shl rsi, 1")?;
        writeln!(out, "xor rax, rax")?;
        writeln!(out, "mov ax, [rsi + ijump_hash_function_idxs]")?;
        // d0 and d1
        writeln!(out, "xor rdx, rdx")?;
        writeln!(out, "mov rdi, {}", builder.hash_table_size)?;
        writeln!(out, "div rdi")?;
        writeln!(out, "mov rcx, rdx")?;
        // slot = (h1 + d0 * h2 + d1) % table_size
        writeln!(out, "mov rsi, [rsp + 16]")?;
        writeln!(out, "mul rsi")?;
        writeln!(out, "add rax, rcx")?;
        writeln!(out, "add rax, [rsp + 8]")?;
        writeln!(out, "div rdi")?;
        writeln!(out, "mov rax, rdx")?;
        writeln!(out, "add rsp, 32")?;
        writeln!(out, "pop r9\npop rsi\npop rdi")?;
        writeln!(out, "shl rax, 4")?;
        writeln!(out, "mov rdx, [ijump_hash_table + rax]")?;
        writeln!(out, "cmp rdx, rbx")?;
        writeln!(out, "pop rdx")?;
        writeln!(out, "jne 8f")?;
        writeln!(out, "mov rbx, rax\npop rax")?;
        if is_call {
            writeln!(out, "call [ijump_hash_table + rbx + 8]")?;
            writeln!(out, "ret")?;
        } else {
            writeln!(out, "jmp [ijump_hash_table + rbx + 8]")?;
        }
        writeln!(out, "8:\nmov rdi, rbx\njmp unresolved_ijump")?;
        Ok(())
    }
}
