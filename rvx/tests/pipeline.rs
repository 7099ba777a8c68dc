//! Whole-pipeline smoke test: a handcrafted static RV64 executable goes in,
//! an assembly module comes out.

use rvx::{Config, GenFlags};
use rvx_isa::Rv64Decoder;

/// A minimal ET_EXEC image with one R+X PT_LOAD segment holding `code`.
fn minimal_elf(code: &[u8]) -> Vec<u8> {
    let code_off = 0x40 + 0x38;
    let mut f = vec![0u8; code_off + code.len()];
    f[0..4].copy_from_slice(&[0x7f, b'E', b'L', b'F']);
    f[4] = 2;
    f[5] = 1;
    f[6] = 1;
    f[0x10..0x12].copy_from_slice(&2u16.to_le_bytes());
    f[0x12..0x14].copy_from_slice(&243u16.to_le_bytes());
    f[0x14..0x18].copy_from_slice(&1u32.to_le_bytes());
    f[0x18..0x20].copy_from_slice(&0x10000u64.to_le_bytes());
    f[0x20..0x28].copy_from_slice(&0x40u64.to_le_bytes());
    f[0x34..0x36].copy_from_slice(&64u16.to_le_bytes());
    f[0x36..0x38].copy_from_slice(&0x38u16.to_le_bytes());
    f[0x38..0x3a].copy_from_slice(&1u16.to_le_bytes());
    f[0x40..0x44].copy_from_slice(&1u32.to_le_bytes()); // PT_LOAD
    f[0x44..0x48].copy_from_slice(&5u32.to_le_bytes()); // R+X
    f[0x48..0x50].copy_from_slice(&(code_off as u64).to_le_bytes());
    f[0x50..0x58].copy_from_slice(&0x10000u64.to_le_bytes());
    f[0x60..0x68].copy_from_slice(&(code.len() as u64).to_le_bytes());
    f[0x68..0x70].copy_from_slice(&(code.len() as u64).to_le_bytes());
    f[0x70..0x78].copy_from_slice(&0x1000u64.to_le_bytes());
    f[code_off..].copy_from_slice(code);
    f
}

fn guest_program() -> Vec<u8> {
    // a small exit-with-sum guest:
    //   li   a0, 5
    //   li   a1, 7
    //   add  a0, a0, a1
    //   li   a7, 93        (exit)
    //   ecall
    //   jalr zero, 0(ra)   (not reached)
    let words: [u32; 6] = [
        0x0050_0513, 0x0070_0593, 0x00b5_0533, 0x05d0_0893, 0x0000_0073, 0x0000_8067,
    ];
    words.iter().flat_map(|w| w.to_le_bytes()).collect()
}

#[test]
fn translates_a_minimal_guest() {
    let elf = minimal_elf(&guest_program());
    let path = std::env::temp_dir().join(format!("rvx-pipeline-{}.elf", std::process::id()));
    std::fs::write(&path, &elf).unwrap();

    let mut out = Vec::new();
    let config = Config::default();
    rvx::translate(&path, &Rv64Decoder, &config, &mut out).expect("translation failed");
    let asm = String::from_utf8(out).unwrap();
    std::fs::remove_file(&path).ok();

    assert!(asm.starts_with(".intel_syntax noprefix"));
    assert!(asm.contains("_start:"));
    assert!(asm.contains(".incbin"));
    assert!(asm.contains("call syscall_impl"));
    assert!(asm.contains("ijump_lookup:"));
    assert!(asm.contains("phdr_off:"));
    // the statics table is complete
    for s in [0usize, 31, 32, 64, 65] {
        assert!(asm.contains(&format!("s{s}: .quad 0")));
    }
}

#[test]
fn debug_mode_verifies_between_stages() {
    let elf = minimal_elf(&guest_program());
    let path = std::env::temp_dir().join(format!("rvx-pipeline-dbg-{}.elf", std::process::id()));
    std::fs::write(&path, &elf).unwrap();

    let mut out = Vec::new();
    let mut config = Config::default();
    config.debug = true;
    config.gen_flags |= GenFlags::CHD_IJUMP;
    rvx::translate(&path, &Rv64Decoder, &config, &mut out).expect("translation failed");
    std::fs::remove_file(&path).ok();

    let asm = String::from_utf8(out).unwrap();
    assert!(asm.contains("ijump_hash_table:"));
    // the guest's return-style jalr is an unresolved indirect jump; its
    // dispatch must go through the hash stub, not the dense table
    assert!(asm.contains("jmp ijump_lookup"));
    assert!(!asm.contains("ijump_lookup_end"));
}
