use crate::error::{Error, Result};
use xmas_elf::program::Type as PhType;
use xmas_elf::sections::SectionHeader;
use xmas_elf::ElfFile;

const EI_CLASS: usize = 4;
const EI_DATA: usize = 5;
const EI_OSABI: usize = 7;
const ELFCLASS64: u8 = 2;
const ELFDATA2LSB: u8 = 1;
const ELFOSABI_SYSV: u8 = 0;
const ELFOSABI_LINUX: u8 = 3;
const EM_RISCV: u16 = 243;
const EM_NONE: u16 = 0;

const SHF_WRITE: u64 = 0x1;
const SHF_ALLOC: u64 = 0x2;
const SHF_EXECINSTR: u64 = 0x4;

/// A loadable region of the guest image.
#[derive(Debug, Clone, Copy)]
pub struct Segment {
    pub vaddr: u64,
    pub file_offset: u64,
    pub file_size: u64,
    pub mem_size: u64,
    pub executable: bool,
    pub writable: bool,
}

/// A section carrying code or data.
#[derive(Debug, Clone, Copy)]
pub struct Section {
    pub addr: u64,
    pub file_offset: u64,
    pub size: u64,
    pub executable: bool,
}

/// The validated guest image: raw file bytes plus the metadata the pipeline
/// needs. Only static RV64 System V executables pass validation.
#[derive(Debug)]
pub struct ElfImage {
    pub data: Vec<u8>,
    pub entry: u64,
    pub base_addr: u64,
    pub load_end_addr: u64,
    pub phdr_offset: u64,
    pub phdr_size: u64,
    pub phdr_num: u64,
    pub segments: Vec<Segment>,
    pub sections: Vec<Section>,
}

impl ElfImage {
    pub fn open(path: &std::path::Path) -> Result<ElfImage> {
        let data = std::fs::read(path)?;
        ElfImage::parse(data)
    }

    pub fn parse(data: Vec<u8>) -> Result<ElfImage> {
        let elf = ElfFile::new(&data).map_err(|e| Error::InvalidElf(e.to_string()))?;

        if data.len() <= EI_OSABI {
            return Err(Error::InvalidElf("truncated identification".into()));
        }
        if data[EI_CLASS] != ELFCLASS64 {
            return Err(Error::UnsupportedElf("only 64-bit ELF files are supported".into()));
        }
        if data[EI_DATA] != ELFDATA2LSB {
            return Err(Error::UnsupportedElf("only little-endian ELF files are supported".into()));
        }
        if !matches!(data[EI_OSABI], ELFOSABI_SYSV | ELFOSABI_LINUX) {
            return Err(Error::UnsupportedElf("only System V / Linux ABI files are supported".into()));
        }
        // the machine field sits behind the identification block
        let machine = u16::from_le_bytes([data[0x12], data[0x13]]);
        if machine != EM_RISCV && machine != EM_NONE {
            return Err(Error::UnsupportedElf("only RISC-V executables are supported".into()));
        }
        if elf.header.pt2.type_().as_type() != xmas_elf::header::Type::Executable {
            return Err(Error::UnsupportedElf("only ET_EXEC executables are supported".into()));
        }

        let mut segments = Vec::new();
        let mut base_addr = u64::MAX;
        let mut load_end_addr = 0u64;
        for ph in elf.program_iter() {
            match ph.get_type() {
                Ok(PhType::Interp) => return Err(Error::DynamicExecutable("PT_INTERP present")),
                Ok(PhType::Dynamic) => return Err(Error::DynamicExecutable("PT_DYNAMIC present")),
                Ok(PhType::Load) => {
                    let seg = Segment {
                        vaddr: ph.virtual_addr(),
                        file_offset: ph.offset(),
                        file_size: ph.file_size(),
                        mem_size: ph.mem_size(),
                        executable: ph.flags().is_execute(),
                        writable: ph.flags().is_write(),
                    };
                    base_addr = base_addr.min(seg.vaddr);
                    load_end_addr = load_end_addr.max(seg.vaddr + seg.mem_size);
                    segments.push(seg);
                }
                _ => {}
            }
        }
        if segments.is_empty() {
            return Err(Error::NoLoadableSegments);
        }

        let mut sections = Vec::new();
        for sh in elf.section_iter() {
            if !is_loadable_progbits(&sh) {
                continue;
            }
            sections.push(Section {
                addr: sh.address(),
                file_offset: sh.offset(),
                size: sh.size(),
                executable: sh.flags() & SHF_EXECINSTR != 0,
            });
        }

        let entry = elf.header.pt2.entry_point();
        let phdr_offset = elf.header.pt2.ph_offset();
        let phdr_size = elf.header.pt2.ph_entry_size() as u64;
        let phdr_num = elf.header.pt2.ph_count() as u64;

        Ok(ElfImage {
            data,
            entry,
            base_addr,
            load_end_addr,
            phdr_offset,
            phdr_size,
            phdr_num,
            segments,
            sections,
        })
    }

    /// The loadable image bytes, padded to the in-memory layout. This is
    /// what the object writer places into `.orig_binary`.
    pub fn loadable_image(&self) -> Vec<u8> {
        let size = (self.load_end_addr - self.base_addr) as usize;
        let mut image = vec![0u8; size];
        for seg in &self.segments {
            let dst = (seg.vaddr - self.base_addr) as usize;
            let len = seg.file_size as usize;
            let src = seg.file_offset as usize;
            image[dst..dst + len].copy_from_slice(&self.data[src..src + len]);
        }
        image
    }
}

fn is_loadable_progbits(sh: &SectionHeader<'_>) -> bool {
    matches!(sh.get_type(), Ok(xmas_elf::sections::ShType::ProgBits))
        && sh.flags() & (SHF_ALLOC | SHF_WRITE) != 0
        && sh.flags() & SHF_ALLOC != 0
}
