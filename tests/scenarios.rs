// End-to-end scenarios run against a fully assembled Cpu.

use s370_core::psw::Ccr;
use s370_core::{Configuration, Emulator};

fn emulator_at(ia: u32) -> Emulator {
    let mut emu = Emulator::new(Configuration::ipl_default());
    emu.cpu.psw.ia = ia;
    emu
}

#[test]
fn ar_with_overflow_traps_through_program_new_psw() {
    let mut emu = emulator_at(0x400);
    emu.cpu.psw.set_program_mask_bit(s370_core::psw::ProgMaskBit::FixedOverflow, true);
    emu.load_ipl_image(&[0x1A, 0x12], 0x400).unwrap();
    emu.cpu.regs.set_gpr(1, 0x7fff_ffff);
    emu.cpu.regs.set_gpr(2, 0x0000_0001);

    let mut new_psw = s370_core::psw::Psw::new();
    new_psw.ia = 0x600;
    for (i, b) in new_psw.to_bytes().iter().enumerate() {
        emu.cpu.mal.store_byte_raw(s370_core::interrupt::low_storage::PROGRAM_NEW + i, *b);
    }

    assert!(emu.cpu.step());
    assert_eq!(emu.cpu.regs.gpr(1), 0x8000_0000);
    assert_eq!(emu.cpu.psw.ia, 0x600);

    let mut old_bytes = [0u8; 8];
    for (i, b) in old_bytes.iter_mut().enumerate() {
        *b = emu.cpu.mal.load_byte_raw(s370_core::interrupt::low_storage::PROGRAM_OLD + i);
    }
    let old = s370_core::psw::Psw::from_bytes(old_bytes);
    assert_eq!(old.ia, 0x402);
    assert_eq!(old.interruption_code, 0x0008);
}

#[test]
fn bal_saves_ilc_cc_progmask_ia_into_r1() {
    let mut emu = emulator_at(0x400);
    emu.cpu.psw.ilc = 2;
    emu.cpu.psw.cc = 3;
    emu.cpu.psw.program_mask = 0xA;
    emu.cpu.regs.set_gpr(3, 0x1200_0000);
    emu.cpu.regs.set_gpr(4, 0x0000_5600);
    // BAL R1, 0x78(R3,R4) -> opcode 0x45, R1=1, X2=3, B2=4, D2=0x078
    emu.load_ipl_image(&[0x45, 0x13, 0x40, 0x78], 0x400).unwrap();

    assert!(emu.cpu.step());
    assert_eq!(emu.cpu.regs.gpr(1), 0xBA00_0404);
    assert_eq!(emu.cpu.psw.ia, 0x00_5678);
}

#[test]
fn ap_scenario_matches_spec_example() {
    let mut emu = emulator_at(0x200);
    emu.load_ipl_image(&[0x00, 0x00, 0x00, 0x2C], 0x100).unwrap();
    emu.load_ipl_image(&[0x00, 0x00, 0x3C, 0x00], 0x200).unwrap();
    // AP 0x103(1),0x202(1) -> opcode 0xFA, L1=0,L2=0, B1=D1=0x103 minus base... use B=0
    emu.load_ipl_image(&[0xFA, 0x00, 0x01, 0x03, 0x02, 0x02], 0x300).unwrap();
    emu.cpu.psw.ia = 0x300;

    assert!(emu.cpu.step());
    let mut out = [0u8; 4];
    for (i, b) in out.iter_mut().enumerate() {
        *b = emu.cpu.mal.load_byte_raw(0x100 + i);
    }
    assert_eq!(out, [0x00, 0x00, 0x00, 0x5C]);
    assert_eq!(emu.cpu.psw.cc, Ccr::POSITIVE.0);
}

#[test]
fn cvb_scenario_matches_spec_example() {
    let mut emu = emulator_at(0x1000);
    emu.load_ipl_image(&[0x00, 0x00, 0x00, 0x00, 0x00, 0x25, 0x59, 0x4F], 0x1000).unwrap();
    // CVB R7, 0x1000 -> opcode 0x4F, R1=7, X2=0, B2=0, D2=0x000
    emu.load_ipl_image(&[0x4F, 0x70, 0x10, 0x00], 0x2000).unwrap();
    emu.cpu.psw.ia = 0x2000;

    assert!(emu.cpu.step());
    assert_eq!(emu.cpu.regs.gpr(7), 25594);
}

#[test]
fn lpsw_scenario_matches_spec_example() {
    let mut emu = emulator_at(0x2000);
    emu.load_ipl_image(&[0xE1, 0x34, 0x56, 0x78, 0x9A, 0x00, 0x34, 0x50], 0x110).unwrap();
    // LPSW 0x110 -> opcode 0x82, B2=0, D2=0x110
    emu.load_ipl_image(&[0x82, 0x00, 0x01, 0x10], 0x2000).unwrap();
    emu.cpu.psw.ia = 0x2000;

    assert!(emu.cpu.step());
    assert_eq!(emu.cpu.psw.system_mask, 0xE0);
    assert_eq!(emu.cpu.psw.storage_key, 3);
    assert!(emu.cpu.psw.ec_mode);
    assert_eq!(emu.cpu.psw.program_mask, 0xA);
    assert_eq!(emu.cpu.psw.ia, 0x003450);
}

#[test]
fn mp_scenario_matches_spec_example() {
    let mut emu = emulator_at(0x400);
    // packed 0125 as a 5-byte field (L1=4 -> operand length 5)
    emu.load_ipl_image(&[0x00, 0x00, 0x00, 0x12, 0x5C], 0x100).unwrap();
    // packed 752 as a 2-byte field (L2=1 -> operand length 2)
    emu.load_ipl_image(&[0x75, 0x2C], 0x500).unwrap();
    // MP 0x100(5),0x500(2) -> opcode 0xFC, L1=4,L2=1, B1=B2=0
    emu.load_ipl_image(&[0xFC, 0x41, 0x01, 0x00, 0x05, 0x00], 0x400).unwrap();

    let cc_before = emu.cpu.psw.cc;
    assert!(emu.cpu.step());
    let mut out = [0u8; 5];
    for (i, b) in out.iter_mut().enumerate() {
        *b = emu.cpu.mal.load_byte_raw(0x100 + i);
    }
    assert_eq!(out, [0x00, 0x00, 0x94, 0x00, 0x0C]);
    assert_eq!(emu.cpu.psw.cc, cc_before);
}

#[test]
fn ed_scenario_matches_spec_example() {
    let mut emu = emulator_at(0x3000);
    // Editing pattern: fill, 2 digit-selects, comma, 3 digit-selects,
    // period, significance-start, digit-select, 3 trailing fill literals
    // (13 bytes, 7 digit-consuming slots matching the source's 7 digits).
    // The significance-starter sits right after the period so the first
    // digit past the decimal point always shows.
    emu.load_ipl_image(
        &[0x40, 0x20, 0x20, 0x6B, 0x20, 0x20, 0x20, 0x4B, 0x21, 0x20, 0x40, 0x40, 0x40],
        0x1000,
    )
    .unwrap();
    // Source: packed 0257426+ (0x02,0x57,0x42,0x6C).
    emu.load_ipl_image(&[0x02, 0x57, 0x42, 0x6C], 0x1200).unwrap();
    emu.cpu.regs.set_gpr(12, 0x1000);
    emu.cpu.regs.set_gpr(11, 0x1000);
    // ED 0(13,r12),0x200(r11) -> opcode 0xDE, L1=12, B1=12,D1=0, B2=11,D2=0x200
    emu.load_ipl_image(&[0xDE, 0x0C, 0xC0, 0x00, 0xB2, 0x00, 0x00, 0x00], 0x3000).unwrap();

    assert!(emu.cpu.step());
    let mut out = [0u8; 13];
    for (i, b) in out.iter_mut().enumerate() {
        *b = emu.cpu.mal.load_byte_raw(0x1000 + i);
    }
    assert_eq!(
        out,
        [0x40, 0x40, 0xF2, 0x6B, 0xF5, 0xF7, 0xF4, 0x4B, 0xF2, 0xF6, 0x40, 0x40, 0x40]
    );
    assert_eq!(emu.cpu.psw.cc, Ccr::POSITIVE.0);
}

#[test]
fn every_successful_instruction_advances_ia_by_ilc_times_two() {
    let mut emu = emulator_at(0x400);
    emu.load_ipl_image(&[0x1A, 0x12], 0x400).unwrap();
    emu.cpu.regs.set_gpr(1, 1);
    emu.cpu.regs.set_gpr(2, 1);
    let before = emu.cpu.psw.ia;
    assert!(emu.cpu.step());
    assert_eq!(emu.cpu.psw.ia, before + 2);
}
