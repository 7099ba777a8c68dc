//! Shared helpers: a hand-assembled guest image builder used by the lifter
//! and pipeline tests.
#![allow(dead_code)]

use rvx::loader::{ElfImage, Payload, Program};
use rvx_isa::{decode, DecodedInst};
use std::collections::BTreeMap;

pub const BASE: u64 = 0x1_0000;

/// A tiny guest image under construction.
pub struct GuestBuilder {
    words: Vec<u32>,
    data: Vec<(u64, Vec<u8>)>,
}

impl GuestBuilder {
    pub fn new() -> Self {
        GuestBuilder { words: Vec::new(), data: Vec::new() }
    }

    pub fn inst(&mut self, word: u32) -> &mut Self {
        self.words.push(word);
        self
    }

    pub fn insts(&mut self, words: &[u32]) -> &mut Self {
        self.words.extend_from_slice(words);
        self
    }

    pub fn data_at(&mut self, addr: u64, bytes: &[u8]) -> &mut Self {
        self.data.push((addr, bytes.to_vec()));
        self
    }

    /// Build the program view, entry at the first instruction.
    pub fn build(&self) -> Program {
        let mut memory: BTreeMap<u64, Payload> = BTreeMap::new();
        let mut addr = BASE;
        for &word in &self.words {
            let inst: Option<DecodedInst> = decode(&word.to_le_bytes());
            match inst {
                Some(inst) => {
                    memory.insert(addr, Payload::Inst(inst));
                    addr += inst.size as u64;
                }
                None => {
                    memory.insert(addr, Payload::Unreachable);
                    addr += 2;
                }
            }
        }
        let mut end = addr;
        for (addr, bytes) in &self.data {
            for (i, &b) in bytes.iter().enumerate() {
                memory.insert(addr + i as u64, Payload::Byte(b));
            }
            end = end.max(addr + bytes.len() as u64);
        }

        let elf = ElfImage {
            data: Vec::new(),
            entry: BASE,
            base_addr: BASE,
            load_end_addr: end,
            phdr_offset: 0x40,
            phdr_size: 56,
            phdr_num: 1,
            segments: Vec::new(),
            sections: Vec::new(),
        };
        Program::from_payloads(elf, memory)
    }
}

// A few raw encodings the tests assemble programs from.

/// `addi rd, rs1, imm`
pub fn addi(rd: u8, rs1: u8, imm: i32) -> u32 {
    i_type(0x13, rd, 0, rs1, imm)
}

/// `add rd, rs1, rs2`
pub fn add(rd: u8, rs1: u8, rs2: u8) -> u32 {
    r_type(0x33, rd, 0, rs1, rs2, 0)
}

/// `sub rd, rs1, rs2`
pub fn sub(rd: u8, rs1: u8, rs2: u8) -> u32 {
    r_type(0x33, rd, 0, rs1, rs2, 0x20)
}

/// `mul rd, rs1, rs2`
pub fn mul(rd: u8, rs1: u8, rs2: u8) -> u32 {
    r_type(0x33, rd, 0, rs1, rs2, 0x01)
}

/// `divu rd, rs1, rs2`
pub fn divu(rd: u8, rs1: u8, rs2: u8) -> u32 {
    r_type(0x33, rd, 5, rs1, rs2, 0x01)
}

/// `ld rd, imm(rs1)`
pub fn ld(rd: u8, rs1: u8, imm: i32) -> u32 {
    i_type(0x03, rd, 3, rs1, imm)
}

/// `sd rs2, imm(rs1)`
pub fn sd(rs2: u8, rs1: u8, imm: i32) -> u32 {
    s_type(0x23, 3, rs1, rs2, imm)
}

/// `beq rs1, rs2, off`
pub fn beq(rs1: u8, rs2: u8, off: i32) -> u32 {
    b_type(0x63, 0, rs1, rs2, off)
}

/// `bne rs1, rs2, off`
pub fn bne(rs1: u8, rs2: u8, off: i32) -> u32 {
    b_type(0x63, 1, rs1, rs2, off)
}

/// `jal rd, off`
pub fn jal(rd: u8, off: i32) -> u32 {
    let off = off as u32;
    let imm = ((off >> 20) & 1) << 31
        | ((off >> 1) & 0x3ff) << 21
        | ((off >> 11) & 1) << 20
        | ((off >> 12) & 0xff) << 12;
    imm | (rd as u32) << 7 | 0x6f
}

/// `jalr rd, imm(rs1)`
pub fn jalr(rd: u8, rs1: u8, imm: i32) -> u32 {
    i_type(0x67, rd, 0, rs1, imm)
}

/// `lui rd, imm20`
pub fn lui(rd: u8, imm20: u32) -> u32 {
    (imm20 << 12) | (rd as u32) << 7 | 0x37
}

pub fn ecall() -> u32 {
    0x0000_0073
}

fn r_type(opcode: u32, rd: u8, funct3: u32, rs1: u8, rs2: u8, funct7: u32) -> u32 {
    funct7 << 25
        | (rs2 as u32) << 20
        | (rs1 as u32) << 15
        | funct3 << 12
        | (rd as u32) << 7
        | opcode
}

fn i_type(opcode: u32, rd: u8, funct3: u32, rs1: u8, imm: i32) -> u32 {
    ((imm as u32) & 0xfff) << 20 | (rs1 as u32) << 15 | funct3 << 12 | (rd as u32) << 7 | opcode
}

fn s_type(opcode: u32, funct3: u32, rs1: u8, rs2: u8, imm: i32) -> u32 {
    let imm = imm as u32;
    ((imm >> 5) & 0x7f) << 25
        | (rs2 as u32) << 20
        | (rs1 as u32) << 15
        | funct3 << 12
        | (imm & 0x1f) << 7
        | opcode
}

fn b_type(opcode: u32, funct3: u32, rs1: u8, rs2: u8, off: i32) -> u32 {
    let off = off as u32;
    ((off >> 12) & 1) << 31
        | ((off >> 5) & 0x3f) << 25
        | (rs2 as u32) << 20
        | (rs1 as u32) << 15
        | funct3 << 12
        | ((off >> 1) & 0xf) << 8
        | ((off >> 11) & 1) << 7
        | opcode
}
