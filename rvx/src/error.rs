/// Errors surfaced by the translation pipeline.
///
/// Internal inconsistencies (verifier failures, type confusion that reaches
/// the allocator) are bugs and panic with context instead of appearing here.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("cannot read input file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid ELF file: {0}")]
    InvalidElf(String),

    #[error("unsupported ELF file: {0}")]
    UnsupportedElf(String),

    #[error("dynamically linked executables are not supported ({0})")]
    DynamicExecutable(&'static str),

    #[error("the guest image contains no loadable segments")]
    NoLoadableSegments,

    #[error("no basic block could be created at the guest entry point {0:#x}")]
    EntryUnreachable(u64),

    #[error("CHD hash table construction failed after {attempts} attempts")]
    HashTableBuild { attempts: u32 },
}

pub type Result<T> = std::result::Result<T, Error>;
