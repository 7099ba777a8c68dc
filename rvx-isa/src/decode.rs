use crate::mnemonic::Mnem;

/// A decoded guest instruction.
///
/// `imm` holds the sign-extended immediate (or the CSR number for Zicsr
/// instructions), `rm` the raw rounding-mode field of floating-point
/// instructions, `size` the encoding length in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedInst {
    pub mnem: Mnem,
    pub rd: u8,
    pub rs1: u8,
    pub rs2: u8,
    pub rs3: u8,
    pub imm: i64,
    pub rm: u8,
    pub size: u8,
}

impl DecodedInst {
    fn new(mnem: Mnem) -> Self {
        DecodedInst { mnem, rd: 0, rs1: 0, rs2: 0, rs3: 0, imm: 0, rm: 0, size: 4 }
    }
}

/// The disassembly contract: bytes in, decoded record out. `None` marks an
/// undecodable two-byte range.
pub trait Decoder {
    fn decode(&self, bytes: &[u8]) -> Option<DecodedInst>;
}

/// Decoder for the uncompressed RV64 base encodings.
#[derive(Debug, Default, Clone, Copy)]
pub struct Rv64Decoder;

impl Decoder for Rv64Decoder {
    fn decode(&self, bytes: &[u8]) -> Option<DecodedInst> {
        decode(bytes)
    }
}

fn sext(value: u64, bits: u32) -> i64 {
    let shift = 64 - bits;
    ((value << shift) as i64) >> shift
}

fn imm_i(inst: u32) -> i64 {
    sext((inst >> 20) as u64, 12)
}

fn imm_s(inst: u32) -> i64 {
    sext((((inst >> 25) << 5) | ((inst >> 7) & 0x1f)) as u64, 12)
}

fn imm_b(inst: u32) -> i64 {
    let imm = ((inst >> 31) & 1) << 12
        | ((inst >> 7) & 1) << 11
        | ((inst >> 25) & 0x3f) << 5
        | ((inst >> 8) & 0xf) << 1;
    sext(imm as u64, 13)
}

fn imm_u(inst: u32) -> i64 {
    (inst & 0xffff_f000) as i32 as i64
}

fn imm_j(inst: u32) -> i64 {
    let imm = ((inst >> 31) & 1) << 20
        | ((inst >> 12) & 0xff) << 12
        | ((inst >> 20) & 1) << 11
        | ((inst >> 21) & 0x3ff) << 1;
    sext(imm as u64, 21)
}

/// Decode one instruction at the start of `bytes`.
pub fn decode(bytes: &[u8]) -> Option<DecodedInst> {
    if bytes.len() < 2 {
        return None;
    }
    // compressed or truncated encodings are outside the supported set
    if bytes[0] & 0b11 != 0b11 || bytes.len() < 4 {
        return None;
    }
    let inst = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);

    let opcode = inst & 0x7f;
    let rd = ((inst >> 7) & 0x1f) as u8;
    let funct3 = (inst >> 12) & 0x7;
    let rs1 = ((inst >> 15) & 0x1f) as u8;
    let rs2 = ((inst >> 20) & 0x1f) as u8;
    let funct7 = (inst >> 25) & 0x7f;
    let rs3 = ((inst >> 27) & 0x1f) as u8;

    let mut out = DecodedInst::new(Mnem::Invalid);
    out.rd = rd;
    out.rs1 = rs1;
    out.rs2 = rs2;

    match opcode {
        0x37 => {
            out.mnem = Mnem::Lui;
            out.imm = imm_u(inst);
        }
        0x17 => {
            out.mnem = Mnem::Auipc;
            out.imm = imm_u(inst);
        }
        0x6f => {
            out.mnem = Mnem::Jal;
            out.imm = imm_j(inst);
        }
        0x67 if funct3 == 0 => {
            out.mnem = Mnem::Jalr;
            out.imm = imm_i(inst);
        }
        0x63 => {
            out.mnem = match funct3 {
                0 => Mnem::Beq,
                1 => Mnem::Bne,
                4 => Mnem::Blt,
                5 => Mnem::Bge,
                6 => Mnem::Bltu,
                7 => Mnem::Bgeu,
                _ => return None,
            };
            out.imm = imm_b(inst);
        }
        0x03 => {
            out.mnem = match funct3 {
                0 => Mnem::Lb,
                1 => Mnem::Lh,
                2 => Mnem::Lw,
                3 => Mnem::Ld,
                4 => Mnem::Lbu,
                5 => Mnem::Lhu,
                6 => Mnem::Lwu,
                _ => return None,
            };
            out.imm = imm_i(inst);
        }
        0x23 => {
            out.mnem = match funct3 {
                0 => Mnem::Sb,
                1 => Mnem::Sh,
                2 => Mnem::Sw,
                3 => Mnem::Sd,
                _ => return None,
            };
            out.imm = imm_s(inst);
        }
        0x13 => {
            out.imm = imm_i(inst);
            out.mnem = match funct3 {
                0 => Mnem::Addi,
                2 => Mnem::Slti,
                3 => Mnem::Sltiu,
                4 => Mnem::Xori,
                6 => Mnem::Ori,
                7 => Mnem::Andi,
                1 if funct7 >> 1 == 0 => {
                    out.imm = (rs2 as i64) | (((funct7 & 1) as i64) << 5);
                    Mnem::Slli
                }
                5 if funct7 >> 1 == 0 => {
                    out.imm = (rs2 as i64) | (((funct7 & 1) as i64) << 5);
                    Mnem::Srli
                }
                5 if funct7 >> 1 == 0x10 => {
                    out.imm = (rs2 as i64) | (((funct7 & 1) as i64) << 5);
                    Mnem::Srai
                }
                _ => return None,
            };
        }
        0x1b => {
            out.imm = imm_i(inst);
            out.mnem = match funct3 {
                0 => Mnem::Addiw,
                1 if funct7 == 0 => {
                    out.imm = rs2 as i64;
                    Mnem::Slliw
                }
                5 if funct7 == 0 => {
                    out.imm = rs2 as i64;
                    Mnem::Srliw
                }
                5 if funct7 == 0x20 => {
                    out.imm = rs2 as i64;
                    Mnem::Sraiw
                }
                _ => return None,
            };
        }
        0x33 => {
            out.mnem = match (funct7, funct3) {
                (0x01, 0) => Mnem::Mul,
                (0x01, 1) => Mnem::Mulh,
                (0x01, 2) => Mnem::Mulhsu,
                (0x01, 3) => Mnem::Mulhu,
                (0x01, 4) => Mnem::Div,
                (0x01, 5) => Mnem::Divu,
                (0x01, 6) => Mnem::Rem,
                (0x01, 7) => Mnem::Remu,
                (0x00, 0) => Mnem::Add,
                (0x20, 0) => Mnem::Sub,
                (0x00, 1) => Mnem::Sll,
                (0x00, 2) => Mnem::Slt,
                (0x00, 3) => Mnem::Sltu,
                (0x00, 4) => Mnem::Xor,
                (0x00, 5) => Mnem::Srl,
                (0x20, 5) => Mnem::Sra,
                (0x00, 6) => Mnem::Or,
                (0x00, 7) => Mnem::And,
                _ => return None,
            };
        }
        0x3b => {
            out.mnem = match (funct7, funct3) {
                (0x01, 0) => Mnem::Mulw,
                (0x01, 4) => Mnem::Divw,
                (0x01, 5) => Mnem::Divuw,
                (0x01, 6) => Mnem::Remw,
                (0x01, 7) => Mnem::Remuw,
                (0x00, 0) => Mnem::Addw,
                (0x20, 0) => Mnem::Subw,
                (0x00, 1) => Mnem::Sllw,
                (0x00, 5) => Mnem::Srlw,
                (0x20, 5) => Mnem::Sraw,
                _ => return None,
            };
        }
        0x0f => {
            out.mnem = match funct3 {
                0 => Mnem::Fence,
                1 => Mnem::FenceI,
                _ => return None,
            };
        }
        0x73 => {
            out.mnem = match funct3 {
                0 => match inst >> 20 {
                    0 => Mnem::Ecall,
                    1 => Mnem::Ebreak,
                    _ => return None,
                },
                1 => Mnem::Csrrw,
                2 => Mnem::Csrrs,
                3 => Mnem::Csrrc,
                5 => Mnem::Csrrwi,
                6 => Mnem::Csrrsi,
                7 => Mnem::Csrrci,
                _ => return None,
            };
            if funct3 != 0 {
                out.imm = (inst >> 20) as i64;
            }
        }
        0x2f => {
            let width_d = match funct3 {
                2 => false,
                3 => true,
                _ => return None,
            };
            let pick = |w: Mnem, d: Mnem| if width_d { d } else { w };
            out.mnem = match rs3 {
                0x02 if rs2 == 0 => pick(Mnem::LrW, Mnem::LrD),
                0x03 => pick(Mnem::ScW, Mnem::ScD),
                0x01 => pick(Mnem::AmoSwapW, Mnem::AmoSwapD),
                0x00 => pick(Mnem::AmoAddW, Mnem::AmoAddD),
                0x04 => pick(Mnem::AmoXorW, Mnem::AmoXorD),
                0x0c => pick(Mnem::AmoAndW, Mnem::AmoAndD),
                0x08 => pick(Mnem::AmoOrW, Mnem::AmoOrD),
                0x10 => pick(Mnem::AmoMinW, Mnem::AmoMinD),
                0x14 => pick(Mnem::AmoMaxW, Mnem::AmoMaxD),
                0x18 => pick(Mnem::AmoMinuW, Mnem::AmoMinuD),
                0x1c => pick(Mnem::AmoMaxuW, Mnem::AmoMaxuD),
                _ => return None,
            };
        }
        0x07 => {
            out.mnem = match funct3 {
                2 => Mnem::Flw,
                3 => Mnem::Fld,
                _ => return None,
            };
            out.imm = imm_i(inst);
        }
        0x27 => {
            out.mnem = match funct3 {
                2 => Mnem::Fsw,
                3 => Mnem::Fsd,
                _ => return None,
            };
            out.imm = imm_s(inst);
        }
        0x43 | 0x47 | 0x4b | 0x4f => {
            out.rs3 = rs3;
            out.rm = funct3 as u8;
            let double = match funct7 & 0x3 {
                0 => false,
                1 => true,
                _ => return None,
            };
            out.mnem = match (opcode, double) {
                (0x43, false) => Mnem::FmaddS,
                (0x43, true) => Mnem::FmaddD,
                (0x47, false) => Mnem::FmsubS,
                (0x47, true) => Mnem::FmsubD,
                (0x4b, false) => Mnem::FnmsubS,
                (0x4b, true) => Mnem::FnmsubD,
                (0x4f, false) => Mnem::FnmaddS,
                (0x4f, true) => Mnem::FnmaddD,
                _ => unreachable!(),
            };
        }
        0x53 => {
            out.rm = funct3 as u8;
            out.mnem = match funct7 {
                0x00 => Mnem::FaddS,
                0x01 => Mnem::FaddD,
                0x04 => Mnem::FsubS,
                0x05 => Mnem::FsubD,
                0x08 => Mnem::FmulS,
                0x09 => Mnem::FmulD,
                0x0c => Mnem::FdivS,
                0x0d => Mnem::FdivD,
                0x2c if rs2 == 0 => Mnem::FsqrtS,
                0x2d if rs2 == 0 => Mnem::FsqrtD,
                0x10 => match funct3 {
                    0 => Mnem::FsgnjS,
                    1 => Mnem::FsgnjnS,
                    2 => Mnem::FsgnjxS,
                    _ => return None,
                },
                0x11 => match funct3 {
                    0 => Mnem::FsgnjD,
                    1 => Mnem::FsgnjnD,
                    2 => Mnem::FsgnjxD,
                    _ => return None,
                },
                0x14 => match funct3 {
                    0 => Mnem::FminS,
                    1 => Mnem::FmaxS,
                    _ => return None,
                },
                0x15 => match funct3 {
                    0 => Mnem::FminD,
                    1 => Mnem::FmaxD,
                    _ => return None,
                },
                0x20 if rs2 == 1 => Mnem::FcvtSD,
                0x21 if rs2 == 0 => Mnem::FcvtDS,
                0x50 => match funct3 {
                    0 => Mnem::FleS,
                    1 => Mnem::FltS,
                    2 => Mnem::FeqS,
                    _ => return None,
                },
                0x51 => match funct3 {
                    0 => Mnem::FleD,
                    1 => Mnem::FltD,
                    2 => Mnem::FeqD,
                    _ => return None,
                },
                0x60 => match rs2 {
                    0 => Mnem::FcvtWS,
                    1 => Mnem::FcvtWuS,
                    2 => Mnem::FcvtLS,
                    3 => Mnem::FcvtLuS,
                    _ => return None,
                },
                0x61 => match rs2 {
                    0 => Mnem::FcvtWD,
                    1 => Mnem::FcvtWuD,
                    2 => Mnem::FcvtLD,
                    3 => Mnem::FcvtLuD,
                    _ => return None,
                },
                0x68 => match rs2 {
                    0 => Mnem::FcvtSW,
                    1 => Mnem::FcvtSWu,
                    2 => Mnem::FcvtSL,
                    3 => Mnem::FcvtSLu,
                    _ => return None,
                },
                0x69 => match rs2 {
                    0 => Mnem::FcvtDW,
                    1 => Mnem::FcvtDWu,
                    2 => Mnem::FcvtDL,
                    3 => Mnem::FcvtDLu,
                    _ => return None,
                },
                0x70 if rs2 == 0 && funct3 == 0 => Mnem::FmvXW,
                0x70 if rs2 == 0 && funct3 == 1 => Mnem::FclassS,
                0x71 if rs2 == 0 && funct3 == 0 => Mnem::FmvXD,
                0x71 if rs2 == 0 && funct3 == 1 => Mnem::FclassD,
                0x78 if rs2 == 0 && funct3 == 0 => Mnem::FmvWX,
                0x79 if rs2 == 0 && funct3 == 0 => Mnem::FmvDX,
                _ => return None,
            };
        }
        _ => return None,
    }

    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0x0000_0513, Mnem::Addi, 10, 0, 0)] // li a0, 0
    #[case(0x0015_0513, Mnem::Addi, 10, 10, 1)] // addi a0, a0, 1
    #[case(0x40b5_0533, Mnem::Sub, 10, 10, 0)] // sub a0, a0, a1
    #[case(0x02b5_0533, Mnem::Mul, 10, 10, 0)] // mul a0, a0, a1
    fn decodes_alu(#[case] raw: u32, #[case] mnem: Mnem, #[case] rd: u8, #[case] rs1: u8, #[case] imm: i64) {
        let inst = decode(&raw.to_le_bytes()).unwrap();
        assert_eq!(inst.mnem, mnem);
        assert_eq!(inst.rd, rd);
        assert_eq!(inst.rs1, rs1);
        if matches!(mnem, Mnem::Addi) {
            assert_eq!(inst.imm, imm);
        }
        assert_eq!(inst.size, 4);
    }

    #[test]
    fn decodes_branches_and_jumps() {
        // beq a0, a1, +16
        let inst = decode(&0x00b5_0863u32.to_le_bytes()).unwrap();
        assert_eq!(inst.mnem, Mnem::Beq);
        assert_eq!(inst.imm, 16);

        // jal ra, -4
        let inst = decode(&0xffdf_f0efu32.to_le_bytes()).unwrap();
        assert_eq!(inst.mnem, Mnem::Jal);
        assert_eq!(inst.rd, 1);
        assert_eq!(inst.imm, -4);

        // jalr zero, 0(ra)
        let inst = decode(&0x0000_8067u32.to_le_bytes()).unwrap();
        assert_eq!(inst.mnem, Mnem::Jalr);
        assert_eq!(inst.rd, 0);
        assert_eq!(inst.rs1, 1);
    }

    #[test]
    fn decodes_memory_and_system() {
        // ld a0, 8(sp)
        let inst = decode(&0x0081_3503u32.to_le_bytes()).unwrap();
        assert_eq!(inst.mnem, Mnem::Ld);
        assert_eq!(inst.imm, 8);

        // sd a0, -8(sp)
        let inst = decode(&0xfea1_3c23u32.to_le_bytes()).unwrap();
        assert_eq!(inst.mnem, Mnem::Sd);
        assert_eq!(inst.imm, -8);

        // ecall
        assert_eq!(decode(&0x0000_0073u32.to_le_bytes()).unwrap().mnem, Mnem::Ecall);
    }

    #[test]
    fn decodes_shift_immediates() {
        // slli a0, a0, 63
        let inst = decode(&0x03f5_1513u32.to_le_bytes()).unwrap();
        assert_eq!(inst.mnem, Mnem::Slli);
        assert_eq!(inst.imm, 63);

        // srai a0, a0, 3
        let inst = decode(&0x4035_5513u32.to_le_bytes()).unwrap();
        assert_eq!(inst.mnem, Mnem::Srai);
        assert_eq!(inst.imm, 3);
    }

    #[test]
    fn decodes_fp() {
        // fadd.d fa0, fa0, fa1
        let inst = decode(&0x02b5_7553u32.to_le_bytes()).unwrap();
        assert_eq!(inst.mnem, Mnem::FaddD);
        assert_eq!(inst.rm, 7);

        // fclass.s a0, fa0
        let inst = decode(&0xe005_1553u32.to_le_bytes()).unwrap();
        assert_eq!(inst.mnem, Mnem::FclassS);
    }

    #[test]
    fn rejects_compressed_and_short_input() {
        assert!(decode(&[0x01, 0x00]).is_none()); // c.nop
        assert!(decode(&[0x13]).is_none());
        assert!(decode(&[]).is_none());
    }
}
