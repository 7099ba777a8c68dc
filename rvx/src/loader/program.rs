use super::elf::ElfImage;
use rvx_isa::{DecodedInst, Decoder};
use std::collections::BTreeMap;

/// Per-address payload of the guest memory view.
#[derive(Debug, Clone, Copy)]
pub enum Payload {
    /// A decoded instruction starting at this address.
    Inst(DecodedInst),
    /// One byte of a data region.
    Byte(u8),
    /// A two-byte range that failed to decode.
    Unreachable,
}

/// Flat view of the guest program: a sorted vector of virtual addresses with
/// one payload each, built by walking the loadable image.
#[derive(Debug)]
pub struct Program {
    pub elf: ElfImage,
    pub addrs: Vec<u64>,
    pub data: Vec<Payload>,
    by_addr: BTreeMap<u64, usize>,
}

impl Program {
    /// Materialize the image: executable regions into decoded instructions,
    /// data regions into raw bytes. Prefers section information when the
    /// file carries it, otherwise falls back to the program headers.
    pub fn load(elf: ElfImage, decoder: &dyn Decoder) -> Program {
        let mut memory: BTreeMap<u64, Payload> = BTreeMap::new();

        if elf.sections.is_empty() {
            for seg in &elf.segments {
                let bytes =
                    &elf.data[seg.file_offset as usize..(seg.file_offset + seg.file_size) as usize];
                if seg.executable {
                    load_instrs(&mut memory, bytes, seg.vaddr, decoder);
                } else {
                    load_data(&mut memory, bytes, seg.vaddr);
                }
            }
        } else {
            for sec in &elf.sections {
                let bytes =
                    &elf.data[sec.file_offset as usize..(sec.file_offset + sec.size) as usize];
                if sec.executable {
                    load_instrs(&mut memory, bytes, sec.addr, decoder);
                } else {
                    load_data(&mut memory, bytes, sec.addr);
                }
            }
        }

        Program::from_payloads(elf, memory)
    }

    /// Assemble a program view from explicit per-address payloads.
    pub fn from_payloads(elf: ElfImage, memory: BTreeMap<u64, Payload>) -> Program {
        let mut addrs = Vec::with_capacity(memory.len());
        let mut data = Vec::with_capacity(memory.len());
        let mut by_addr = BTreeMap::new();
        for (addr, payload) in memory {
            by_addr.insert(addr, addrs.len());
            addrs.push(addr);
            data.push(payload);
        }
        Program { elf, addrs, data, by_addr }
    }

    pub fn payload_at(&self, addr: u64) -> Option<&Payload> {
        self.by_addr.get(&addr).map(|&i| &self.data[i])
    }

    /// Read a little-endian value of `len` bytes from the data view.
    /// Returns `None` when any byte of the range is not a data byte.
    pub fn read_le(&self, addr: u64, len: u64) -> Option<u64> {
        let mut value = 0u64;
        for i in 0..len {
            match self.payload_at(addr + i)? {
                Payload::Byte(b) => value |= (*b as u64) << (i * 8),
                _ => return None,
            }
        }
        Some(value)
    }
}

fn load_instrs(
    memory: &mut BTreeMap<u64, Payload>,
    bytes: &[u8],
    start_addr: u64,
    decoder: &dyn Decoder,
) {
    let mut off = 0usize;
    while off < bytes.len() {
        match decoder.decode(&bytes[off..]) {
            Some(inst) => {
                memory.insert(start_addr + off as u64, Payload::Inst(inst));
                off += inst.size as usize;
            }
            None => {
                tracing::debug!(
                    addr = format_args!("{:#x}", start_addr + off as u64),
                    "undecodable bytes, marking two-byte range unreachable"
                );
                memory.insert(start_addr + off as u64, Payload::Unreachable);
                off += 2;
            }
        }
    }
}

fn load_data(memory: &mut BTreeMap<u64, Payload>, bytes: &[u8], start_addr: u64) {
    for (i, &b) in bytes.iter().enumerate() {
        memory.insert(start_addr + i as u64, Payload::Byte(b));
    }
}
