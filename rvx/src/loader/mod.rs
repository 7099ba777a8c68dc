//! Guest program loading.
//!
//! ELF parsing itself is delegated to `xmas-elf`; this module validates the
//! input against the supported profile and materializes the flat
//! address-to-payload view the lifter walks.

mod elf;
mod program;

pub use elf::{ElfImage, Section, Segment};
pub use program::{Payload, Program};
