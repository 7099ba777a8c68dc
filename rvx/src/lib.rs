//! RVX: static binary translation from RV64 ELF executables to x86-64.
//!
//! The pipeline decodes the guest once, lifts it into a typed SSA IR,
//! optimizes, and register-allocates it down to an x86-64 assembly module
//! that links against a small runtime helper. See `rvx-ir` for the IR data
//! model and `rvx-isa` for the guest instruction model.

mod config;
mod error;
pub mod generator;
pub mod lifter;
pub mod loader;

pub use config::{Config, GenFlags};
pub use error::{Error, Result};

use generator::Generator;
use lifter::Lifter;
use loader::{ElfImage, Program};
use rvx_ir::optimizer;
use rvx_ir::Ir;
use rvx_isa::Decoder;
use std::io::Write;
use std::path::Path;

/// Run the whole pipeline: load, lift, optimize and generate.
///
/// `binary_path` is re-read by the assembler for the `.incbin` of the guest
/// image; the assembly module is written to `out`.
pub fn translate(
    binary_path: &Path,
    decoder: &dyn Decoder,
    config: &Config,
    out: &mut dyn Write,
) -> Result<()> {
    let image = ElfImage::open(binary_path)?;
    let program = Program::load(image, decoder);

    let mut ir = Ir::new();
    let mut lifter = Lifter::new(&mut ir, config);
    lifter.lift(&program)?;
    if config.debug {
        rvx_ir::verify::assert_valid(&ir);
    }

    optimizer::optimize(&mut ir, config.passes);
    if config.debug {
        rvx_ir::verify::assert_valid(&ir);
    }

    let path = binary_path.to_string_lossy().into_owned();
    Generator::new(&mut ir, config, Some(path)).compile(out)
}
