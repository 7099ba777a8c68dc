//! Input validation against the supported ELF profile, over handcrafted
//! minimal images.

use rvx::loader::ElfImage;
use rvx::Error;

const EM_RISCV: u16 = 243;
const PT_LOAD: u32 = 1;
const PT_DYNAMIC: u32 = 2;
const PT_INTERP: u32 = 3;

struct ElfSpec {
    class: u8,
    endian: u8,
    osabi: u8,
    etype: u16,
    machine: u16,
    phdr_types: Vec<u32>,
}

impl Default for ElfSpec {
    fn default() -> Self {
        ElfSpec {
            class: 2,
            endian: 1,
            osabi: 0,
            etype: 2, // ET_EXEC
            machine: EM_RISCV,
            phdr_types: vec![PT_LOAD],
        }
    }
}

fn build_elf(spec: &ElfSpec, code: &[u8]) -> Vec<u8> {
    let phnum = spec.phdr_types.len();
    let code_off = 0x40 + 0x38 * phnum;
    let mut f = vec![0u8; code_off + code.len()];

    f[0..4].copy_from_slice(&[0x7f, b'E', b'L', b'F']);
    f[4] = spec.class;
    f[5] = spec.endian;
    f[6] = 1; // EV_CURRENT
    f[7] = spec.osabi;
    f[0x10..0x12].copy_from_slice(&spec.etype.to_le_bytes());
    f[0x12..0x14].copy_from_slice(&spec.machine.to_le_bytes());
    f[0x14..0x18].copy_from_slice(&1u32.to_le_bytes()); // e_version
    f[0x18..0x20].copy_from_slice(&0x10000u64.to_le_bytes()); // e_entry
    f[0x20..0x28].copy_from_slice(&0x40u64.to_le_bytes()); // e_phoff
    f[0x34..0x36].copy_from_slice(&64u16.to_le_bytes()); // e_ehsize
    f[0x36..0x38].copy_from_slice(&0x38u16.to_le_bytes()); // e_phentsize
    f[0x38..0x3a].copy_from_slice(&(phnum as u16).to_le_bytes());

    for (i, &ptype) in spec.phdr_types.iter().enumerate() {
        let off = 0x40 + 0x38 * i;
        f[off..off + 4].copy_from_slice(&ptype.to_le_bytes());
        f[off + 4..off + 8].copy_from_slice(&5u32.to_le_bytes()); // R+X
        f[off + 8..off + 16].copy_from_slice(&(code_off as u64).to_le_bytes());
        f[off + 16..off + 24].copy_from_slice(&0x10000u64.to_le_bytes()); // vaddr
        f[off + 32..off + 40].copy_from_slice(&(code.len() as u64).to_le_bytes());
        f[off + 40..off + 48].copy_from_slice(&(code.len() as u64).to_le_bytes());
        f[off + 48..off + 56].copy_from_slice(&0x1000u64.to_le_bytes());
    }

    f[code_off..].copy_from_slice(code);
    f
}

// li a0, 42 ; jalr zero, 0(ra)
const CODE: [u8; 8] = [0x13, 0x05, 0xa0, 0x02, 0x67, 0x80, 0x00, 0x00];

#[test]
fn accepts_a_static_riscv_executable() {
    let image = ElfImage::parse(build_elf(&ElfSpec::default(), &CODE)).expect("valid image");
    assert_eq!(image.entry, 0x10000);
    assert_eq!(image.base_addr, 0x10000);
    assert_eq!(image.load_end_addr, 0x10000 + CODE.len() as u64);
    assert_eq!(image.segments.len(), 1);
    assert!(image.segments[0].executable);
    assert_eq!(image.loadable_image(), CODE.to_vec());
}

#[test]
fn accepts_the_unknown_machine() {
    let spec = ElfSpec { machine: 0, ..Default::default() };
    assert!(ElfImage::parse(build_elf(&spec, &CODE)).is_ok());
}

#[test]
fn rejects_foreign_machines() {
    let spec = ElfSpec { machine: 62, ..Default::default() }; // EM_X86_64
    assert!(matches!(
        ElfImage::parse(build_elf(&spec, &CODE)),
        Err(Error::UnsupportedElf(_))
    ));
}

#[test]
fn rejects_non_executables() {
    let spec = ElfSpec { etype: 3, ..Default::default() }; // ET_DYN
    assert!(matches!(
        ElfImage::parse(build_elf(&spec, &CODE)),
        Err(Error::UnsupportedElf(_))
    ));
}

#[test]
fn rejects_dynamic_linking() {
    let spec = ElfSpec { phdr_types: vec![PT_LOAD, PT_INTERP], ..Default::default() };
    assert!(matches!(
        ElfImage::parse(build_elf(&spec, &CODE)),
        Err(Error::DynamicExecutable(_))
    ));

    let spec = ElfSpec { phdr_types: vec![PT_LOAD, PT_DYNAMIC], ..Default::default() };
    assert!(matches!(
        ElfImage::parse(build_elf(&spec, &CODE)),
        Err(Error::DynamicExecutable(_))
    ));
}

#[rstest::rstest]
#[case::elf32(ElfSpec { class: 1, ..Default::default() })]
#[case::big_endian(ElfSpec { endian: 2, ..Default::default() })]
#[case::foreign_abi(ElfSpec { osabi: 9, ..Default::default() })]
fn rejects_unsupported_profiles(#[case] spec: ElfSpec) {
    assert!(ElfImage::parse(build_elf(&spec, &CODE)).is_err());
}

#[test]
fn rejects_garbage() {
    assert!(ElfImage::parse(vec![0x7f, b'E', b'L']).is_err());
    assert!(ElfImage::parse(b"not an elf file at all".to_vec()).is_err());
}
