// Instruction Dispatcher & Stepper (§4.6). Fetches 2/4/6-byte
// instructions, decodes into a StepInfo, and vectors to one handler per
// opcode. The 256-entry table is a match-arm chain grouped by format rather
// than a generated switch or macro table.

use crate::decimal::Decimal;
use crate::fixed;
use crate::float;
use crate::interrupt::Irc;
use crate::psw::Psw;
use crate::step::{Format, StepInfo};
use crate::Cpu;

fn format_of(opcode: u8) -> Format {
    match opcode {
        // 0x00-0x1F: integer RR. 0x20-0x3F: floating RR (§4.4).
        0x00..=0x3F => Format::Rr,
        0x80..=0x8F | 0xAC..=0xAD | 0xB6..=0xBB | 0xBE..=0xBF => Format::Rs,
        0x40..=0x7F => Format::Rx,
        0x90..=0x9F => Format::Si,
        0xD0..=0xD9 | 0xDC..=0xDF => Format::SsOneLength,
        0xF0..=0xFF => Format::SsTwoLength,
        _ => Format::Rx,
    }
}

/// Halfwords consumed for a given format (§4.6), used to compute ILC.
pub fn halfwords_for(format: Format) -> u8 {
    match format {
        Format::Rr => 1,
        Format::Rx | Format::Rs | Format::Si => 2,
        Format::SsOneLength | Format::SsTwoLength => 3,
    }
}

/// Privileged opcodes that raise `privilege` outside supervisor state
/// (§4.6).
fn is_privileged(opcode: u8) -> bool {
    matches!(opcode, 0x08 | 0x09 | 0x82 | 0xB6 | 0xB7 | 0x9C | 0x9D | 0x9E | 0x9F | 0x83 | 0x80 | 0xAC | 0xAD | 0x27 | 0xB1 | 0xB2 | 0xAE)
}

/// Decodes the instruction at `cpu.psw.ia` into a `StepInfo`, without
/// executing it. Returns the descriptor and the total byte length consumed.
pub fn fetch_and_decode(cpu: &mut Cpu) -> Result<(StepInfo, u32), Irc> {
    let ia = cpu.psw.ia as usize;
    let key = cpu.psw.storage_key;
    let opcode = (cpu.mal.read_half(ia, key, true)? >> 8) as u8;
    let format = format_of(opcode);
    let mut step = StepInfo::new(opcode);
    step.ilc = halfwords_for(format);

    match format {
        Format::Rr => {
            let byte2 = cpu.mal.read_half(ia, key, true)? as u8;
            step.r1 = byte2 >> 4;
            step.r2 = byte2 & 0xf;
        }
        Format::Rx => {
            let word = cpu.mal.read_full(ia, key, true)?;
            step.r1 = ((word >> 20) & 0xf) as u8;
            step.x2 = ((word >> 16) & 0xf) as u8;
            step.b2 = ((word >> 12) & 0xf) as u8;
            step.d2 = (word & 0xfff) as u16;
            let base = if step.b2 != 0 { cpu.regs.gpr(step.b2) } else { 0 };
            let index = if step.x2 != 0 { cpu.regs.gpr(step.x2) } else { 0 };
            step.address2 = (base.wrapping_add(index).wrapping_add(step.d2 as u32)) & 0x00ff_ffff;
        }
        Format::Rs => {
            let word = cpu.mal.read_full(ia, key, true)?;
            step.r1 = ((word >> 20) & 0xf) as u8;
            step.r3 = ((word >> 16) & 0xf) as u8;
            step.b2 = ((word >> 12) & 0xf) as u8;
            step.d2 = (word & 0xfff) as u16;
            let base = if step.b2 != 0 { cpu.regs.gpr(step.b2) } else { 0 };
            step.address2 = (base.wrapping_add(step.d2 as u32)) & 0x00ff_ffff;
        }
        Format::Si => {
            let word = cpu.mal.read_full(ia, key, true)?;
            step.i2 = ((word >> 16) & 0xff) as u8;
            step.b1 = ((word >> 12) & 0xf) as u8;
            step.d1 = (word & 0xfff) as u16;
            let base = if step.b1 != 0 { cpu.regs.gpr(step.b1) } else { 0 };
            step.address1 = (base.wrapping_add(step.d1 as u32)) & 0x00ff_ffff;
        }
        Format::SsOneLength => {
            let word = cpu.mal.read_full(ia, key, true)?;
            step.length1 = ((word >> 16) & 0xff) as u8;
            let b1 = ((word >> 12) & 0xf) as u8;
            let d1 = (word & 0xfff) as u16;
            let word2 = cpu.mal.read_full(ia + 4, key, true)?;
            let b2 = ((word2 >> 28) & 0xf) as u8;
            let d2 = ((word2 >> 16) & 0xfff) as u16;
            step.b1 = b1;
            step.d1 = d1;
            step.b2 = b2;
            step.d2 = d2;
            let base1 = if b1 != 0 { cpu.regs.gpr(b1) } else { 0 };
            let base2 = if b2 != 0 { cpu.regs.gpr(b2) } else { 0 };
            step.address1 = (base1.wrapping_add(d1 as u32)) & 0x00ff_ffff;
            step.address2 = (base2.wrapping_add(d2 as u32)) & 0x00ff_ffff;
        }
        Format::SsTwoLength => {
            let word = cpu.mal.read_full(ia, key, true)?;
            step.length1 = ((word >> 20) & 0xf) as u8;
            step.length2 = ((word >> 16) & 0xf) as u8;
            let b1 = ((word >> 12) & 0xf) as u8;
            let d1 = (word & 0xfff) as u16;
            let word2 = cpu.mal.read_full(ia + 4, key, true)?;
            let b2 = ((word2 >> 28) & 0xf) as u8;
            let d2 = ((word2 >> 16) & 0xfff) as u16;
            step.b1 = b1;
            step.d1 = d1;
            step.b2 = b2;
            step.d2 = d2;
            let base1 = if b1 != 0 { cpu.regs.gpr(b1) } else { 0 };
            let base2 = if b2 != 0 { cpu.regs.gpr(b2) } else { 0 };
            step.address1 = (base1.wrapping_add(d1 as u32)) & 0x00ff_ffff;
            step.address2 = (base2.wrapping_add(d2 as u32)) & 0x00ff_ffff;
        }
    }

    if is_privileged(opcode) && cpu.psw.problem_state {
        return Err(Irc::Privilege);
    }

    let length = step.ilc as u32 * 2;
    Ok((step, length))
}

/// Executes one decoded instruction. The bulk of the match arms are thin
/// adapters into `fixed`/`float`/`decimal`; branch-family opcodes are the
/// only ones that touch `psw.ia` directly (everything else lets the stepper
/// advance IA by ILC*2 on success).
pub fn execute(cpu: &mut Cpu, step: &StepInfo) -> Irc {
    match step.opcode {
        // AR, SR: RR binary add/subtract.
        0x1A => fixed::add(&mut cpu.psw, &mut cpu.regs, step.r1, cpu.regs.gpr(step.r2) as i32),
        0x1B => fixed::subtract(&mut cpu.psw, &mut cpu.regs, step.r1, cpu.regs.gpr(step.r2) as i32),
        // CR: RR compare.
        0x19 => fixed::compare(&mut cpu.psw, cpu.regs.gpr(step.r1) as i32, cpu.regs.gpr(step.r2) as i32),
        // CLR: RR logical compare.
        0x15 => fixed::compare_logical(&mut cpu.psw, cpu.regs.gpr(step.r1), cpu.regs.gpr(step.r2)),
        // LPR/LCR/LNR/LTR: RR sign manipulation (LTR wired further below).
        0x10 => fixed::load_positive(&mut cpu.psw, &mut cpu.regs, step.r1, cpu.regs.gpr(step.r2) as i32),
        0x13 => fixed::load_complement(&mut cpu.psw, &mut cpu.regs, step.r1, cpu.regs.gpr(step.r2) as i32),
        0x11 => fixed::load_negative(&mut cpu.psw, &mut cpu.regs, step.r1, cpu.regs.gpr(step.r2) as i32),
        // SSK/ISK: RR storage-key set/insert, addressed by R2's low 24 bits
        // rounded down to the enclosing key block.
        0x08 => {
            let addr = (cpu.regs.gpr(step.r2) as usize) & !(crate::memory::KEY_BLOCK_SIZE - 1);
            let key = (cpu.regs.gpr(step.r1) & 0xfe) as u8;
            match cpu.mal.put_storage_key(addr, key) {
                Ok(()) => Irc::None,
                Err(irc) => irc,
            }
        }
        0x09 => {
            let addr = (cpu.regs.gpr(step.r2) as usize) & !(crate::memory::KEY_BLOCK_SIZE - 1);
            match cpu.mal.get_storage_key(addr) {
                Ok(key) => {
                    cpu.regs.set_gpr(step.r1, (cpu.regs.gpr(step.r1) & 0xffff_ff00) | key as u32);
                    Irc::None
                }
                Err(irc) => irc,
            }
        }
        // MR, DR: RR multiply/divide.
        0x1C => fixed::multiply(&mut cpu.regs, step.r1, cpu.regs.gpr(step.r1 + 1) as i32, cpu.regs.gpr(step.r2) as i32),
        0x1D => fixed::divide(&mut cpu.regs, step.r1, cpu.regs.gpr(step.r2) as i32),
        // A, S, C, CL, AH, SH: RX binary ops against a storage operand.
        0x5A | 0x5B | 0x59 | 0x55 | 0x4A | 0x4B => {
            execute_rx_binary(cpu, step)
        }
        // M, D: RX multiply/divide against a storage operand.
        0x5C => {
            let (operand2, irc) = load_operand_full(cpu, step);
            if irc != Irc::None {
                return irc;
            }
            fixed::multiply(&mut cpu.regs, step.r1, cpu.regs.gpr(step.r1 + 1) as i32, operand2 as i32)
        }
        0x5D => {
            let (operand2, irc) = load_operand_full(cpu, step);
            if irc != Irc::None {
                return irc;
            }
            fixed::divide(&mut cpu.regs, step.r1, operand2 as i32)
        }
        // BCR/BALR/BASR/BCTR: RR branch family.
        0x07 => execute_bcr(cpu, step),
        0x05 => execute_balr(cpu, step),
        0x0D => execute_basr(cpu, step),
        0x06 => execute_bctr(cpu, step),
        // BC/BAL/BAS/BCT: RX branch family (address2 already resolved).
        0x47 => execute_bc(cpu, step),
        0x45 => execute_bal(cpu, step),
        0x4D => execute_bas(cpu, step),
        0x46 => execute_bct(cpu, step),
        // BXH/BXLE: RS branch-on-index family.
        0x86 => execute_bxh(cpu, step, true),
        0x87 => execute_bxh(cpu, step, false),
        // Shift family (RS form, count is address2's low bits).
        0x8B => execute_shift(cpu, step, ShiftKind::LeftArithmetic),
        0x8A => execute_shift(cpu, step, ShiftKind::RightArithmetic),
        0x89 => execute_shift(cpu, step, ShiftKind::LeftLogical),
        0x88 => execute_shift(cpu, step, ShiftKind::RightLogical),
        // ICM/STCM: RS insert/store under mask.
        0xBF => execute_icm(cpu, step),
        // LPSW: loads the full PSW from a doubleword at address1 (SI-shaped
        // address already resolved to address1 by the decoder, §4.7).
        0x82 => execute_lpsw(cpu, step),
        // SSM/STNSM/STOSM: system-mask-only mutation (§4.7).
        0x80 => execute_ssm(cpu, step),
        0xAC => execute_stnsm(cpu, step),
        0xAD => execute_stosm(cpu, step),
        // AP/SP/ZAP/CP: SS-form packed decimal.
        0xFA => execute_decimal_addsub(cpu, step, false),
        0xFB => execute_decimal_addsub(cpu, step, true),
        0xF8 => execute_zap(cpu, step),
        0xF9 => execute_cp(cpu, step),
        0xFC => execute_mp(cpu, step),
        0xFD => execute_dp(cpu, step),
        // CVB/CVD: RX decimal/binary conversion.
        0x4F => execute_cvb(cpu, step),
        0x4E => execute_cvd(cpu, step),
        // ED/EDMK: SS-form editing.
        0xDE => execute_edit(cpu, step, false),
        0xDF => execute_edit(cpu, step, true),
        // PACK/UNPK/MVO/SRP: SS-form decimal reformatting.
        0xF2 => execute_pack(cpu, step),
        0xF3 => execute_unpk(cpu, step),
        0xF1 => execute_mvo(cpu, step),
        0xF0 => execute_srp(cpu, step),
        // LR: RR load register.
        0x18 => {
            cpu.regs.set_gpr(step.r1, cpu.regs.gpr(step.r2));
            Irc::None
        }
        // LTR: RR load-and-test.
        0x12 => fixed::load_and_test(&mut cpu.psw, &mut cpu.regs, step.r1, cpu.regs.gpr(step.r2) as i32),
        // NR/OR/XR: RR logical.
        0x14 => fixed::and(&mut cpu.psw, &mut cpu.regs, step.r1, cpu.regs.gpr(step.r2)),
        0x16 => fixed::or(&mut cpu.psw, &mut cpu.regs, step.r1, cpu.regs.gpr(step.r2)),
        0x17 => fixed::xor(&mut cpu.psw, &mut cpu.regs, step.r1, cpu.regs.gpr(step.r2)),
        // SPM: RR set program mask (and CC) from R1.
        0x04 => {
            let v = cpu.regs.gpr(step.r1);
            cpu.psw.program_mask = ((v >> 24) & 0xf) as u8;
            cpu.psw.cc = ((v >> 28) & 0x3) as u8;
            Irc::None
        }
        // L/ST: RX load/store full word.
        0x58 => {
            let (v, irc) = load_operand_full(cpu, step);
            if irc != Irc::None {
                return irc;
            }
            cpu.regs.set_gpr(step.r1, v);
            Irc::None
        }
        0x50 => match cpu.mal.write_full(step.address2 as usize, cpu.regs.gpr(step.r1), cpu.psw.storage_key) {
            Ok(()) => Irc::None,
            Err(irc) => irc,
        },
        // LH/STH: RX load/store halfword (sign-extended on load).
        0x48 => match cpu.mal.read_half(step.address2 as usize, cpu.psw.storage_key, false) {
            Ok(v) => {
                cpu.regs.set_gpr(step.r1, (v as i16) as i32 as u32);
                Irc::None
            }
            Err(irc) => irc,
        },
        0x40 => match cpu.mal.write_half(step.address2 as usize, cpu.regs.gpr(step.r1) as u16, cpu.psw.storage_key) {
            Ok(()) => Irc::None,
            Err(irc) => irc,
        },
        // LA: RX load address (no storage access, the effective address
        // itself is the loaded value).
        0x41 => {
            cpu.regs.set_gpr(step.r1, step.address2);
            Irc::None
        }
        // IC/STC: RX insert/store character.
        0x43 => match cpu.mal.read_byte(step.address2 as usize, cpu.psw.storage_key) {
            Ok(b) => {
                cpu.regs.set_gpr(step.r1, (cpu.regs.gpr(step.r1) & 0xffff_ff00) | b as u32);
                Irc::None
            }
            Err(irc) => irc,
        },
        0x42 => match cpu.mal.write_byte(step.address2 as usize, cpu.regs.gpr(step.r1) as u8, cpu.psw.storage_key) {
            Ok(()) => Irc::None,
            Err(irc) => irc,
        },
        // N/O/X: RX logical against a storage operand.
        0x54 | 0x56 | 0x57 => {
            let (operand2, irc) = load_operand_full(cpu, step);
            if irc != Irc::None {
                return irc;
            }
            match step.opcode {
                0x54 => fixed::and(&mut cpu.psw, &mut cpu.regs, step.r1, operand2),
                0x56 => fixed::or(&mut cpu.psw, &mut cpu.regs, step.r1, operand2),
                0x57 => fixed::xor(&mut cpu.psw, &mut cpu.regs, step.r1, operand2),
                _ => unreachable!(),
            }
        }
        // TM/MVI/CLI/NI/OI/XI: SI-form immediate ops against one storage byte.
        0x91 => match cpu.mal.read_byte(step.address1 as usize, cpu.psw.storage_key) {
            Ok(b) => fixed::test_under_mask(&mut cpu.psw, b, step.i2),
            Err(irc) => irc,
        },
        0x92 => match cpu.mal.write_byte(step.address1 as usize, step.i2, cpu.psw.storage_key) {
            Ok(()) => Irc::None,
            Err(irc) => irc,
        },
        0x95 => match cpu.mal.read_byte(step.address1 as usize, cpu.psw.storage_key) {
            Ok(b) => fixed::compare_logical(&mut cpu.psw, b as u32, step.i2 as u32),
            Err(irc) => irc,
        },
        0x94 | 0x96 | 0x97 => execute_si_logical(cpu, step),
        // TS: SI-form test-and-set.
        0x93 => match cpu.mal.read_byte(step.address1 as usize, 0) {
            Ok(b) => {
                cpu.psw.set_cc(fixed::test_and_set_cc(b));
                match cpu.mal.write_byte(step.address1 as usize, 0xff, 0) {
                    Ok(()) => Irc::None,
                    Err(irc) => irc,
                }
            }
            Err(irc) => irc,
        },
        // CS/CDS: RS-form compare-and-swap.
        0xBA => execute_cs(cpu, step),
        // LCTL/STCTL: RS-form control-register load/store over R1..=R3.
        0xB7 => execute_lctl(cpu, step),
        0xB6 => execute_stctl(cpu, step),
        // MVCL/CLCL: RR-form long move/compare (§4.3).
        0x0E => execute_mvcl(cpu, step),
        0x0F => execute_clcl(cpu, step),
        // MVC/CLC/NC/OC/XC: SS-form storage-to-storage byte ops.
        0xD2 => execute_mvc(cpu, step),
        0xD5 => execute_clc(cpu, step),
        0xD4 | 0xD6 | 0xD7 => execute_ss_logical(cpu, step),
        // TR/TRT: SS-form translate / translate-and-test.
        0xDC => execute_tr(cpu, step),
        0xDD => execute_trt(cpu, step),
        // SIO/TIO/HIO/TCH: SI-form channel-program primitives, delegated to
        // the IoSubsystem boundary (§6).
        0x9C => {
            let cc = cpu.io.start_io(step.address1 as u16);
            cpu.psw.set_cc(crate::psw::Ccr(cc & 0x3));
            Irc::None
        }
        0x9D => {
            let cc = cpu.io.test_io(step.address1 as u16);
            cpu.psw.set_cc(crate::psw::Ccr(cc & 0x3));
            Irc::None
        }
        0x9E => {
            let cc = cpu.io.halt_io(step.address1 as u16);
            cpu.psw.set_cc(crate::psw::Ccr(cc & 0x3));
            Irc::None
        }
        0x9F => {
            let cc = cpu.io.test_channel((step.address1 & 0xff) as u8);
            cpu.psw.set_cc(crate::psw::Ccr(cc & 0x3));
            Irc::None
        }
        // Floating-point RR/RX family (§4.4).
        0x20..=0x3F => execute_float_rr(cpu, step),
        0x60..=0x7F => execute_float_rx(cpu, step),
        // PTLB/SPT/SPKA/STIDP/RRB (all share the 0xB2 prefix byte at this
        // dispatcher's one-byte granularity), SIGP, DIAG: privileged, but
        // this core models no timer/TLB/multiprocessing state for them to
        // act on, so the operational body is a no-op beyond the privilege
        // check itself.
        0xB2 | 0xAE | 0x83 => execute_privileged_noop(cpu),
        _ => Irc::Operation,
    }
}

fn execute_privileged_noop(cpu: &mut Cpu) -> Irc {
    if cpu.psw.problem_state {
        Irc::Privilege
    } else {
        Irc::None
    }
}

fn load_operand_full(cpu: &mut Cpu, step: &StepInfo) -> (u32, Irc) {
    match cpu.mal.read_full(step.address2 as usize, cpu.psw.storage_key, false) {
        Ok(v) => (v, Irc::None),
        Err(irc) => (0, irc),
    }
}

fn execute_rx_binary(cpu: &mut Cpu, step: &StepInfo) -> Irc {
    let (operand2, irc) = load_operand_full(cpu, step);
    if irc != Irc::None {
        return irc;
    }
    match step.opcode {
        0x5A => fixed::add(&mut cpu.psw, &mut cpu.regs, step.r1, operand2 as i32),
        0x5B => fixed::subtract(&mut cpu.psw, &mut cpu.regs, step.r1, operand2 as i32),
        0x59 => fixed::compare(&mut cpu.psw, cpu.regs.gpr(step.r1) as i32, operand2 as i32),
        0x55 => fixed::compare_logical(&mut cpu.psw, cpu.regs.gpr(step.r1), operand2),
        0x4A => fixed::add_halfword(&mut cpu.psw, &mut cpu.regs, step.r1, operand2 as i16),
        0x4B => fixed::subtract_halfword(&mut cpu.psw, &mut cpu.regs, step.r1, operand2 as i16),
        _ => Irc::Operation,
    }
}

fn execute_bcr(cpu: &mut Cpu, step: &StepInfo) -> Irc {
    if step.r2 != 0 && fixed::branch_condition_met(step.r1, cpu.psw.cc) {
        cpu.psw.ia = cpu.regs.gpr(step.r2) & 0x00ff_ffff;
        cpu.branch_taken = true;
    }
    Irc::None
}

fn execute_balr(cpu: &mut Cpu, step: &StepInfo) -> Irc {
    let link = fixed::branch_and_link(&cpu.psw);
    cpu.regs.set_gpr(step.r1, link);
    if step.r2 != 0 {
        cpu.psw.ia = cpu.regs.gpr(step.r2) & 0x00ff_ffff;
        cpu.branch_taken = true;
    }
    Irc::None
}

fn execute_basr(cpu: &mut Cpu, step: &StepInfo) -> Irc {
    cpu.regs.set_gpr(step.r1, cpu.psw.ia & 0x00ff_ffff);
    if step.r2 != 0 {
        cpu.psw.ia = cpu.regs.gpr(step.r2) & 0x00ff_ffff;
        cpu.branch_taken = true;
    }
    Irc::None
}

fn execute_bctr(cpu: &mut Cpu, step: &StepInfo) -> Irc {
    if fixed::branch_on_count(&mut cpu.regs, step.r1) && step.r2 != 0 {
        cpu.psw.ia = cpu.regs.gpr(step.r2) & 0x00ff_ffff;
        cpu.branch_taken = true;
    }
    Irc::None
}

fn execute_bc(cpu: &mut Cpu, step: &StepInfo) -> Irc {
    if fixed::branch_condition_met(step.r1, cpu.psw.cc) {
        cpu.psw.ia = step.address2;
        cpu.branch_taken = true;
    }
    Irc::None
}

fn execute_bal(cpu: &mut Cpu, step: &StepInfo) -> Irc {
    let link = fixed::branch_and_link(&cpu.psw);
    cpu.regs.set_gpr(step.r1, link);
    cpu.psw.ia = step.address2;
    cpu.branch_taken = true;
    Irc::None
}

fn execute_bas(cpu: &mut Cpu, step: &StepInfo) -> Irc {
    cpu.regs.set_gpr(step.r1, cpu.psw.ia & 0x00ff_ffff);
    cpu.psw.ia = step.address2;
    cpu.branch_taken = true;
    Irc::None
}

fn execute_bct(cpu: &mut Cpu, step: &StepInfo) -> Irc {
    if fixed::branch_on_count(&mut cpu.regs, step.r1) {
        cpu.psw.ia = step.address2;
        cpu.branch_taken = true;
    }
    Irc::None
}

fn execute_bxh(cpu: &mut Cpu, step: &StepInfo, high: bool) -> Irc {
    if fixed::branch_on_index(&mut cpu.regs, step.r1, step.r3, high) {
        cpu.psw.ia = step.address2;
        cpu.branch_taken = true;
    }
    Irc::None
}

enum ShiftKind {
    LeftArithmetic,
    RightArithmetic,
    LeftLogical,
    RightLogical,
}

fn execute_shift(cpu: &mut Cpu, step: &StepInfo, kind: ShiftKind) -> Irc {
    let count = step.address2 & 0x3f;
    let value = cpu.regs.gpr(step.r1);
    match kind {
        ShiftKind::LeftArithmetic => {
            let (result, irc) = fixed::shift_left_arithmetic(&mut cpu.psw, value as i32 as i64, count, 32);
            cpu.regs.set_gpr(step.r1, result as u32);
            irc
        }
        ShiftKind::RightArithmetic => {
            let result = fixed::shift_right_arithmetic(&mut cpu.psw, value as i32 as i64, count, 32);
            cpu.regs.set_gpr(step.r1, result as u32);
            Irc::None
        }
        ShiftKind::LeftLogical => {
            cpu.regs.set_gpr(step.r1, fixed::shift_left_logical(value as u64, count, 32) as u32);
            Irc::None
        }
        ShiftKind::RightLogical => {
            cpu.regs.set_gpr(step.r1, fixed::shift_right_logical(value as u64, count, 32) as u32);
            Irc::None
        }
    }
}

fn execute_icm(cpu: &mut Cpu, step: &StepInfo) -> Irc {
    let mut bytes = Vec::new();
    for shift in (0..4).rev() {
        if step.r2 & (1 << shift) != 0 {
            let offset = 3 - shift;
            match cpu.mal.read_byte((step.address2 + offset) as usize, cpu.psw.storage_key) {
                Ok(b) => bytes.push(b),
                Err(irc) => return irc,
            }
        }
    }
    fixed::insert_under_mask(&mut cpu.psw, &mut cpu.regs, step.r1, step.r2, &bytes)
}

fn execute_lpsw(cpu: &mut Cpu, step: &StepInfo) -> Irc {
    let mut bytes = [0u8; 8];
    for (i, b) in bytes.iter_mut().enumerate() {
        match cpu.mal.read_byte(step.address1 as usize + i, cpu.psw.storage_key) {
            Ok(v) => *b = v,
            Err(irc) => return irc,
        }
    }
    cpu.psw = crate::psw::Psw::from_bytes(bytes);
    cpu.branch_taken = true;
    Irc::None
}

fn execute_ssm(cpu: &mut Cpu, step: &StepInfo) -> Irc {
    match cpu.mal.read_byte(step.address1 as usize, 0) {
        Ok(b) => {
            cpu.psw.system_mask = b & 0xfe;
            Irc::None
        }
        Err(irc) => irc,
    }
}

fn execute_stnsm(cpu: &mut Cpu, step: &StepInfo) -> Irc {
    cpu.psw.system_mask &= step.i2 & 0xfe;
    Irc::None
}

fn execute_stosm(cpu: &mut Cpu, step: &StepInfo) -> Irc {
    cpu.psw.system_mask |= step.i2 & 0xfe;
    Irc::None
}

fn read_decimal(cpu: &mut Cpu, address: u32, len_bytes: usize) -> Result<Decimal, Irc> {
    let mut bytes = vec![0u8; len_bytes];
    for (i, b) in bytes.iter_mut().enumerate() {
        *b = cpu.mal.read_byte(address as usize + i, cpu.psw.storage_key)?;
    }
    Decimal::load(&bytes)
}

fn write_decimal(cpu: &mut Cpu, address: u32, value: &Decimal, len_bytes: usize) -> Result<(), Irc> {
    let bytes = value.store(len_bytes);
    for (i, b) in bytes.iter().enumerate() {
        cpu.mal.write_byte(address as usize + i, *b, cpu.psw.storage_key)?;
    }
    Ok(())
}

fn execute_decimal_addsub(cpu: &mut Cpu, step: &StepInfo, subtract: bool) -> Irc {
    let len1 = step.length1 as usize + 1;
    let len2 = step.length2 as usize + 1;
    let op1 = match read_decimal(cpu, step.address1, len1) {
        Ok(v) => v,
        Err(irc) => return irc,
    };
    let op2 = match read_decimal(cpu, step.address2, len2) {
        Ok(v) => v,
        Err(irc) => return irc,
    };
    let (result, irc) = if subtract {
        crate::decimal::subtract(&mut cpu.psw, &op1, &op2, op1.len)
    } else {
        crate::decimal::add(&mut cpu.psw, &op1, &op2, op1.len)
    };
    if let Err(e) = write_decimal(cpu, step.address1, &result, len1) {
        return e;
    }
    irc
}

fn execute_zap(cpu: &mut Cpu, step: &StepInfo) -> Irc {
    let len1 = step.length1 as usize + 1;
    let len2 = step.length2 as usize + 1;
    let op2 = match read_decimal(cpu, step.address2, len2) {
        Ok(v) => v,
        Err(irc) => return irc,
    };
    let (result, irc) = crate::decimal::zero_and_add(&mut cpu.psw, &op2, len1 * 2 - 1);
    if let Err(e) = write_decimal(cpu, step.address1, &result, len1) {
        return e;
    }
    irc
}

fn execute_cp(cpu: &mut Cpu, step: &StepInfo) -> Irc {
    let len1 = step.length1 as usize + 1;
    let len2 = step.length2 as usize + 1;
    let op1 = match read_decimal(cpu, step.address1, len1) {
        Ok(v) => v,
        Err(irc) => return irc,
    };
    let op2 = match read_decimal(cpu, step.address2, len2) {
        Ok(v) => v,
        Err(irc) => return irc,
    };
    cpu.psw.set_cc(crate::decimal::compare(&op1, &op2));
    Irc::None
}

fn execute_mp(cpu: &mut Cpu, step: &StepInfo) -> Irc {
    let l1 = step.length1 as usize + 1;
    let l2 = step.length2 as usize + 1;
    let op1 = match read_decimal(cpu, step.address1, l1) {
        Ok(v) => v,
        Err(irc) => return irc,
    };
    let op2 = match read_decimal(cpu, step.address2, l2) {
        Ok(v) => v,
        Err(irc) => return irc,
    };
    match crate::decimal::multiply(&op1, &op2, l1, l2) {
        Ok(result) => match write_decimal(cpu, step.address1, &result, l1) {
            Ok(()) => Irc::None,
            Err(irc) => irc,
        },
        Err(irc) => irc,
    }
}

fn execute_dp(cpu: &mut Cpu, step: &StepInfo) -> Irc {
    let l1 = step.length1 as usize + 1;
    let l2 = step.length2 as usize + 1;
    let dividend = match read_decimal(cpu, step.address1, l1) {
        Ok(v) => v,
        Err(irc) => return irc,
    };
    let divisor = match read_decimal(cpu, step.address2, l2) {
        Ok(v) => v,
        Err(irc) => return irc,
    };
    match crate::decimal::divide(&dividend, &divisor, l1, l2) {
        Ok((quotient, remainder)) => {
            let quotient_bytes = l1 - l2;
            if let Err(irc) = write_decimal(cpu, step.address1 + l2 as u32, &quotient, quotient_bytes) {
                return irc;
            }
            if let Err(irc) = write_decimal(cpu, step.address1, &remainder, l2) {
                return irc;
            }
            Irc::None
        }
        Err(irc) => irc,
    }
}

fn execute_cvb(cpu: &mut Cpu, step: &StepInfo) -> Irc {
    let mut bytes = [0u8; 8];
    for (i, b) in bytes.iter_mut().enumerate() {
        match cpu.mal.read_byte(step.address2 as usize + i, cpu.psw.storage_key) {
            Ok(v) => *b = v,
            Err(irc) => return irc,
        }
    }
    match crate::decimal::convert_to_binary(bytes) {
        Ok(value) => {
            cpu.regs.set_gpr(step.r1, value as u32);
            Irc::None
        }
        Err(irc) => irc,
    }
}

fn execute_cvd(cpu: &mut Cpu, step: &StepInfo) -> Irc {
    let bytes = crate::decimal::convert_to_decimal(cpu.regs.gpr(step.r1) as i32);
    for (i, b) in bytes.iter().enumerate() {
        if let Err(irc) = cpu.mal.write_byte(step.address2 as usize + i, *b, cpu.psw.storage_key) {
            return irc;
        }
    }
    Irc::None
}

fn execute_edit(cpu: &mut Cpu, step: &StepInfo, mark: bool) -> Irc {
    let pattern_len = step.length1 as usize + 1;
    let mut pattern = vec![0u8; pattern_len];
    for (i, b) in pattern.iter_mut().enumerate() {
        match cpu.mal.read_byte(step.address1 as usize + i, cpu.psw.storage_key) {
            Ok(v) => *b = v,
            Err(irc) => return irc,
        }
    }
    let source_len = pattern.iter().filter(|&&b| b == 0x20 || b == 0x21).count().max(1);
    let source_bytes = (source_len + 1) / 2;
    let source = match read_decimal(cpu, step.address2, source_bytes) {
        Ok(v) => v,
        Err(irc) => return irc,
    };
    let result = crate::decimal::edit::edit(&pattern, &source, step.address2, mark);
    for (i, b) in result.output.iter().enumerate() {
        if let Err(irc) = cpu.mal.write_byte(step.address1 as usize + i, *b, cpu.psw.storage_key) {
            return irc;
        }
    }
    if mark {
        if let Some(addr) = result.first_significant_address {
            cpu.regs.set_gpr(step.r1, (cpu.regs.gpr(step.r1) & 0xff00_0000) | (addr & 0x00ff_ffff));
        }
    }
    cpu.psw.set_cc(result.cc);
    Irc::None
}

fn read_bytes(cpu: &mut Cpu, address: u32, len: usize) -> Result<Vec<u8>, Irc> {
    let mut out = vec![0u8; len];
    for (i, b) in out.iter_mut().enumerate() {
        *b = cpu.mal.read_byte(address as usize + i, cpu.psw.storage_key)?;
    }
    Ok(out)
}

fn write_bytes(cpu: &mut Cpu, address: u32, bytes: &[u8]) -> Result<(), Irc> {
    for (i, b) in bytes.iter().enumerate() {
        cpu.mal.write_byte(address as usize + i, *b, cpu.psw.storage_key)?;
    }
    Ok(())
}

fn execute_pack(cpu: &mut Cpu, step: &StepInfo) -> Irc {
    let l1 = step.length1 as usize + 1;
    let l2 = step.length2 as usize + 1;
    let zoned = match read_bytes(cpu, step.address2, l2) {
        Ok(v) => v,
        Err(irc) => return irc,
    };
    let packed = crate::decimal::pack(&zoned);
    match write_bytes(cpu, step.address1, &packed.store(l1)) {
        Ok(()) => Irc::None,
        Err(irc) => irc,
    }
}

fn execute_unpk(cpu: &mut Cpu, step: &StepInfo) -> Irc {
    let l1 = step.length1 as usize + 1;
    let l2 = step.length2 as usize + 1;
    let packed = match read_decimal(cpu, step.address2, l2) {
        Ok(v) => v,
        Err(irc) => return irc,
    };
    let zoned = crate::decimal::unpack(&packed, l1);
    match write_bytes(cpu, step.address1, &zoned) {
        Ok(()) => Irc::None,
        Err(irc) => irc,
    }
}

fn execute_mvo(cpu: &mut Cpu, step: &StepInfo) -> Irc {
    let l1 = step.length1 as usize + 1;
    let l2 = step.length2 as usize + 1;
    let op1 = match read_bytes(cpu, step.address1, l1) {
        Ok(v) => v,
        Err(irc) => return irc,
    };
    let op2 = match read_bytes(cpu, step.address2, l2) {
        Ok(v) => v,
        Err(irc) => return irc,
    };
    let result = crate::decimal::move_with_offset(&op1, &op2);
    match write_bytes(cpu, step.address1, &result) {
        Ok(()) => Irc::None,
        Err(irc) => irc,
    }
}

/// SRP (§4.5): the shift count is a signed 6-bit value carried in the
/// second operand's address field low bits (D2, with B2 normally 0), not a
/// real storage address; the rounding digit arrives via `i2`'s low nibble.
fn execute_srp(cpu: &mut Cpu, step: &StepInfo) -> Irc {
    let l1 = step.length1 as usize + 1;
    let raw = (step.address2 & 0x3f) as u8;
    let shift = ((raw << 2) as i8) >> 2; // sign-extend the low 6 bits
    let round_digit = step.i2 & 0xf;
    let value = match read_decimal(cpu, step.address1, l1) {
        Ok(v) => v,
        Err(irc) => return irc,
    };
    let (result, irc) = crate::decimal::shift_and_round(&mut cpu.psw, &value, shift, round_digit);
    if let Err(e) = write_decimal(cpu, step.address1, &result, l1) {
        return e;
    }
    irc
}

fn execute_si_logical(cpu: &mut Cpu, step: &StepInfo) -> Irc {
    let b = match cpu.mal.read_byte(step.address1 as usize, cpu.psw.storage_key) {
        Ok(v) => v,
        Err(irc) => return irc,
    };
    let result = match step.opcode {
        0x94 => b & step.i2,
        0x96 => b | step.i2,
        0x97 => b ^ step.i2,
        _ => unreachable!(),
    };
    if let Err(irc) = cpu.mal.write_byte(step.address1 as usize, result, cpu.psw.storage_key) {
        return irc;
    }
    cpu.psw.set_cc(if result == 0 { crate::psw::Ccr::ZERO } else { crate::psw::Ccr::NEGATIVE });
    Irc::None
}

fn execute_cs(cpu: &mut Cpu, step: &StepInfo) -> Irc {
    let stored = match cpu.mal.read_full(step.address2 as usize, cpu.psw.storage_key, false) {
        Ok(v) => v,
        Err(irc) => return irc,
    };
    let (new_value, cc) = fixed::compare_and_swap(cpu.regs.gpr(step.r1), cpu.regs.gpr(step.r3), stored);
    if cc == crate::psw::Ccr::ZERO {
        if let Err(irc) = cpu.mal.write_full(step.address2 as usize, new_value, cpu.psw.storage_key) {
            return irc;
        }
    } else {
        cpu.regs.set_gpr(step.r1, new_value);
    }
    cpu.psw.set_cc(cc);
    Irc::None
}

fn execute_lctl(cpu: &mut Cpu, step: &StepInfo) -> Irc {
    let mut r = step.r1;
    let mut addr = step.address2;
    loop {
        match cpu.mal.read_full(addr as usize, cpu.psw.storage_key, false) {
            Ok(v) => cpu.regs.set_cr(r, v),
            Err(irc) => return irc,
        }
        if r == step.r3 {
            break;
        }
        r = (r + 1) & 0xf;
        addr = addr.wrapping_add(4);
    }
    cpu.mal.invalidate_translation();
    Irc::None
}

fn execute_stctl(cpu: &mut Cpu, step: &StepInfo) -> Irc {
    let mut r = step.r1;
    let mut addr = step.address2;
    loop {
        if let Err(irc) = cpu.mal.write_full(addr as usize, cpu.regs.cr(r), cpu.psw.storage_key) {
            return irc;
        }
        if r == step.r3 {
            break;
        }
        r = (r + 1) & 0xf;
        addr = addr.wrapping_add(4);
    }
    Irc::None
}

fn execute_mvcl(cpu: &mut Cpu, step: &StepInfo) -> Irc {
    let mut dst = match fixed::decode_long_operand(&cpu.regs, step.r1) {
        Ok(v) => v,
        Err(irc) => return irc,
    };
    let mut src = match fixed::decode_long_operand(&cpu.regs, step.r2) {
        Ok(v) => v,
        Err(irc) => return irc,
    };
    if fixed::mvcl_destructive_overlap(&dst, &src) {
        cpu.psw.set_cc(fixed::move_long_cc(fixed::LongOpOutcome::DestructiveOverlap));
        return Irc::None;
    }
    let outcome = if dst.length == src.length {
        fixed::LongOpOutcome::Equal
    } else if dst.length < src.length {
        fixed::LongOpOutcome::Operand1Shorter
    } else {
        fixed::LongOpOutcome::Operand1Longer
    };
    while dst.length > 0 {
        let byte = if src.length > 0 {
            match cpu.mal.read_byte(src.address as usize, cpu.psw.storage_key) {
                Ok(b) => b,
                Err(irc) => {
                    fixed_write_back(cpu, step, &dst, &src);
                    return irc;
                }
            }
        } else {
            src.pad
        };
        if let Err(irc) = cpu.mal.write_byte(dst.address as usize, byte, cpu.psw.storage_key) {
            fixed_write_back(cpu, step, &dst, &src);
            return irc;
        }
        dst.address = dst.address.wrapping_add(1) & 0x00ff_ffff;
        dst.length -= 1;
        if src.length > 0 {
            src.address = src.address.wrapping_add(1) & 0x00ff_ffff;
            src.length -= 1;
        }
    }
    fixed_write_back(cpu, step, &dst, &src);
    cpu.psw.set_cc(fixed::move_long_cc(outcome));
    Irc::None
}

fn fixed_write_back(cpu: &mut Cpu, step: &StepInfo, dst: &fixed::LongOperand, src: &fixed::LongOperand) {
    cpu.regs.set_gpr(step.r1, dst.address);
    cpu.regs.set_gpr(step.r1 + 1, ((dst.pad as u32) << 24) | dst.length);
    cpu.regs.set_gpr(step.r2, src.address);
    cpu.regs.set_gpr(step.r2 + 1, ((src.pad as u32) << 24) | src.length);
}

fn execute_clcl(cpu: &mut Cpu, step: &StepInfo) -> Irc {
    let mut a = match fixed::decode_long_operand(&cpu.regs, step.r1) {
        Ok(v) => v,
        Err(irc) => return irc,
    };
    let mut b = match fixed::decode_long_operand(&cpu.regs, step.r2) {
        Ok(v) => v,
        Err(irc) => return irc,
    };
    let mut cc = crate::psw::Ccr::ZERO;
    while a.length > 0 || b.length > 0 {
        let byte_a = if a.length > 0 {
            match cpu.mal.read_byte(a.address as usize, cpu.psw.storage_key) {
                Ok(v) => v,
                Err(irc) => return irc,
            }
        } else {
            a.pad
        };
        let byte_b = if b.length > 0 {
            match cpu.mal.read_byte(b.address as usize, cpu.psw.storage_key) {
                Ok(v) => v,
                Err(irc) => return irc,
            }
        } else {
            b.pad
        };
        if byte_a != byte_b {
            cc = if byte_a < byte_b { crate::psw::Ccr::NEGATIVE } else { crate::psw::Ccr::POSITIVE };
            break;
        }
        if a.length > 0 {
            a.address = a.address.wrapping_add(1) & 0x00ff_ffff;
            a.length -= 1;
        }
        if b.length > 0 {
            b.address = b.address.wrapping_add(1) & 0x00ff_ffff;
            b.length -= 1;
        }
    }
    cpu.regs.set_gpr(step.r1, a.address);
    cpu.regs.set_gpr(step.r1 + 1, ((a.pad as u32) << 24) | a.length);
    cpu.regs.set_gpr(step.r2, b.address);
    cpu.regs.set_gpr(step.r2 + 1, ((b.pad as u32) << 24) | b.length);
    cpu.psw.set_cc(cc);
    Irc::None
}

fn execute_mvc(cpu: &mut Cpu, step: &StepInfo) -> Irc {
    let len = step.length1 as usize + 1;
    if let Err(irc) = cpu.mal.test_access(step.address1 as usize, len, true) {
        return irc;
    }
    let bytes = match read_bytes(cpu, step.address2, len) {
        Ok(v) => v,
        Err(irc) => return irc,
    };
    match write_bytes(cpu, step.address1, &bytes) {
        Ok(()) => Irc::None,
        Err(irc) => irc,
    }
}

fn execute_clc(cpu: &mut Cpu, step: &StepInfo) -> Irc {
    let len = step.length1 as usize + 1;
    let a = match read_bytes(cpu, step.address1, len) {
        Ok(v) => v,
        Err(irc) => return irc,
    };
    let b = match read_bytes(cpu, step.address2, len) {
        Ok(v) => v,
        Err(irc) => return irc,
    };
    cpu.psw.set_cc(match a.cmp(&b) {
        std::cmp::Ordering::Equal => crate::psw::Ccr::ZERO,
        std::cmp::Ordering::Less => crate::psw::Ccr::NEGATIVE,
        std::cmp::Ordering::Greater => crate::psw::Ccr::POSITIVE,
    });
    Irc::None
}

fn execute_ss_logical(cpu: &mut Cpu, step: &StepInfo) -> Irc {
    let len = step.length1 as usize + 1;
    let a = match read_bytes(cpu, step.address1, len) {
        Ok(v) => v,
        Err(irc) => return irc,
    };
    let b = match read_bytes(cpu, step.address2, len) {
        Ok(v) => v,
        Err(irc) => return irc,
    };
    let mut any_nonzero = false;
    let result: Vec<u8> = a
        .iter()
        .zip(b.iter())
        .map(|(&x, &y)| {
            let r = match step.opcode {
                0xD4 => x & y,
                0xD6 => x | y,
                0xD7 => x ^ y,
                _ => unreachable!(),
            };
            if r != 0 {
                any_nonzero = true;
            }
            r
        })
        .collect();
    if let Err(irc) = write_bytes(cpu, step.address1, &result) {
        return irc;
    }
    cpu.psw.set_cc(if any_nonzero { crate::psw::Ccr::NEGATIVE } else { crate::psw::Ccr::ZERO });
    Irc::None
}

fn execute_tr(cpu: &mut Cpu, step: &StepInfo) -> Irc {
    let len = step.length1 as usize + 1;
    let mut source = match read_bytes(cpu, step.address1, len) {
        Ok(v) => v,
        Err(irc) => return irc,
    };
    for byte in source.iter_mut() {
        *byte = match cpu.mal.read_byte(step.address2 as usize + *byte as usize, cpu.psw.storage_key) {
            Ok(v) => v,
            Err(irc) => return irc,
        };
    }
    match write_bytes(cpu, step.address1, &source) {
        Ok(()) => Irc::None,
        Err(irc) => irc,
    }
}

fn execute_trt(cpu: &mut Cpu, step: &StepInfo) -> Irc {
    let len = step.length1 as usize + 1;
    let source = match read_bytes(cpu, step.address1, len) {
        Ok(v) => v,
        Err(irc) => return irc,
    };
    for (i, &byte) in source.iter().enumerate() {
        let function = match cpu.mal.read_byte(step.address2 as usize + byte as usize, cpu.psw.storage_key) {
            Ok(v) => v,
            Err(irc) => return irc,
        };
        if function != 0 {
            cpu.regs.set_gpr(step.r1, (cpu.regs.gpr(step.r1) & 0xff00_0000) | ((step.address1 + i as u32) & 0x00ff_ffff));
            cpu.regs.set_gpr(step.r2, (cpu.regs.gpr(step.r2) & 0xffff_ff00) | function as u32);
            cpu.psw.set_cc(if i == len - 1 { crate::psw::Ccr::OVERFLOW } else { crate::psw::Ccr::NEGATIVE });
            return Irc::None;
        }
    }
    cpu.psw.set_cc(crate::psw::Ccr::ZERO);
    Irc::None
}

fn float_short(cpu: &Cpu, r: u8) -> Result<float::HexFloat, Irc> {
    Ok(float::unpack32(cpu.regs.fpr_short(r)?))
}

fn float_long(cpu: &Cpu, r: u8) -> Result<float::HexFloat, Irc> {
    Ok(float::unpack64(cpu.regs.fpr(r)?))
}

fn set_float_short(cpu: &mut Cpu, r: u8, value: &float::HexFloat) -> Result<(), Irc> {
    cpu.regs.set_fpr_short(r, float::pack32(value))
}

fn set_float_long(cpu: &mut Cpu, r: u8, value: &float::HexFloat) -> Result<(), Irc> {
    cpu.regs.set_fpr(r, float::pack64(value))
}

/// Applies one binary arithmetic op to a decoded pair of operands, sharing
/// short/long dispatch logic between the RR and RX float opcode families.
fn apply_float_binary(psw: &mut Psw, opcode: u8, a: float::HexFloat, b: float::HexFloat) -> (float::HexFloat, Irc) {
    match opcode {
        // AE/AER/AD/ADR: normalized add. SE/SER/SD/SDR: normalized subtract.
        0x7A | 0x3A | 0x6A | 0x2A => float::add(psw, a, b, false, false),
        0x7B | 0x3B | 0x6B | 0x2B => float::add(psw, a, b, true, false),
        // AU/AUR/AW/AWR: unnormalized add. SU/SUR/SW/SWR: unnormalized subtract.
        0x7E | 0x3E | 0x6E | 0x2E => float::add(psw, a, b, false, true),
        0x7F | 0x3F | 0x6F | 0x2F => float::add(psw, a, b, true, true),
        // ME/MER/MD/MDR: multiply.
        0x7C | 0x3C | 0x6C | 0x2C => (float::multiply(a, b), Irc::None),
        // DE/DER/DD/DDR: divide.
        0x7D | 0x3D | 0x6D | 0x2D => match float::divide(a, b) {
            Ok(v) => (v, Irc::None),
            Err(e) => (a, e),
        },
        // CE/CER/CD/CDR: compare (never stores; caller discards the value).
        0x79 | 0x39 | 0x69 | 0x29 => {
            let irc = float::compare(psw, a, b);
            (a, irc)
        }
        _ => (a, Irc::Operation),
    }
}

fn is_float_compare(opcode: u8) -> bool {
    matches!(opcode, 0x79 | 0x39 | 0x69 | 0x29)
}

fn is_float_long(opcode: u8) -> bool {
    matches!(opcode, 0x20..=0x2F | 0x60..=0x6F)
}

/// RR-format floating-point family (§4.4): LPDR/LNDR/LCDR/LTDR/LPER/LNER/
/// LCER/LTER manipulate only the sign; LDR/LER are raw register copies;
/// HDR/HER halve; LRDR/LRER round; AxR/SxR/MxR/DxR are the arithmetic pairs.
fn execute_float_rr(cpu: &mut Cpu, step: &StepInfo) -> Irc {
    let long = is_float_long(step.opcode);
    match step.opcode {
        // LPDR/LPER, LNDR/LNER, LCDR/LCER, LTDR/LTER: sign-only family.
        0x20 | 0x30 | 0x21 | 0x31 | 0x23 | 0x33 | 0x22 | 0x32 => {
            let value = if long { float_long(cpu, step.r2) } else { float_short(cpu, step.r2) };
            let value = match value {
                Ok(v) => v,
                Err(irc) => return irc,
            };
            let result = match step.opcode {
                0x20 | 0x30 => float::load_positive(&mut cpu.psw, value),
                0x21 | 0x31 => float::load_negative(&mut cpu.psw, value),
                0x23 | 0x33 => float::load_complement(&mut cpu.psw, value),
                _ => float::load_test(&mut cpu.psw, value),
            };
            let stored = if long { set_float_long(cpu, step.r1, &result) } else { set_float_short(cpu, step.r1, &result) };
            match stored {
                Ok(()) => Irc::None,
                Err(irc) => irc,
            }
        }
        // LDR/LER: raw register copy, no normalization.
        0x28 => match cpu.regs.fpr(step.r2) {
            Ok(v) => match cpu.regs.set_fpr(step.r1, v) {
                Ok(()) => Irc::None,
                Err(irc) => irc,
            },
            Err(irc) => irc,
        },
        0x38 => match cpu.regs.fpr_short(step.r2) {
            Ok(v) => match cpu.regs.set_fpr_short(step.r1, v) {
                Ok(()) => Irc::None,
                Err(irc) => irc,
            },
            Err(irc) => irc,
        },
        // HDR/HER: halve.
        0x24 | 0x34 => {
            let value = if long { float_long(cpu, step.r2) } else { float_short(cpu, step.r2) };
            let value = match value {
                Ok(v) => v,
                Err(irc) => return irc,
            };
            let result = float::halve(value);
            let stored = if long { set_float_long(cpu, step.r1, &result) } else { set_float_short(cpu, step.r1, &result) };
            match stored {
                Ok(()) => Irc::None,
                Err(irc) => irc,
            }
        }
        // LRDR/LRER: load rounded.
        0x25 | 0x35 => {
            let value = if long { float_long(cpu, step.r2) } else { float_short(cpu, step.r2) };
            let value = match value {
                Ok(v) => v,
                Err(irc) => return irc,
            };
            let target_digits = if long { float::HexFloat::long() } else { float::HexFloat::short() };
            let (result, irc) = float::load_rounded(value, target_digits);
            let stored = if long { set_float_long(cpu, step.r1, &result) } else { set_float_short(cpu, step.r1, &result) };
            if let Err(e) = stored {
                return e;
            }
            irc
        }
        // Extended (128-bit) register-pair ops: AXR/SXR/MXR (§4.4).
        0x36 | 0x37 | 0x26 => execute_float_extended_rr(cpu, step),
        // Arithmetic pairs share one handler keyed by precision.
        _ => {
            let a = if long { float_long(cpu, step.r1) } else { float_short(cpu, step.r1) };
            let a = match a {
                Ok(v) => v,
                Err(irc) => return irc,
            };
            let b = if long { float_long(cpu, step.r2) } else { float_short(cpu, step.r2) };
            let b = match b {
                Ok(v) => v,
                Err(irc) => return irc,
            };
            let (result, irc) = apply_float_binary(&mut cpu.psw, step.opcode, a, b);
            if is_float_compare(step.opcode) {
                return irc;
            }
            let stored = if long { set_float_long(cpu, step.r1, &result) } else { set_float_short(cpu, step.r1, &result) };
            if let Err(e) = stored {
                return e;
            }
            irc
        }
    }
}

fn execute_float_extended_rr(cpu: &mut Cpu, step: &StepInfo) -> Irc {
    let a = match cpu.regs.fpr_extended(step.r1) {
        Ok((hi, lo)) => float::unpack_extended(hi, lo),
        Err(irc) => return irc,
    };
    let b = match cpu.regs.fpr_extended(step.r2) {
        Ok((hi, lo)) => float::unpack_extended(hi, lo),
        Err(irc) => return irc,
    };
    let result = match step.opcode {
        0x36 => float::add_extended(&mut cpu.psw, a, b, false).0,
        0x37 => float::add_extended(&mut cpu.psw, a, b, true).0,
        0x26 => float::multiply_extended(a, b),
        _ => unreachable!(),
    };
    let (hi, lo) = float::pack_extended(&result);
    match cpu.regs.set_fpr_extended(step.r1, hi, lo) {
        Ok(()) => Irc::None,
        Err(irc) => irc,
    }
}

/// RX-format floating-point family (§4.4): operand2 is a storage word/
/// doubleword rather than a register.
fn execute_float_rx(cpu: &mut Cpu, step: &StepInfo) -> Irc {
    let long = is_float_long(step.opcode);
    match step.opcode {
        // STE/STD: store, no normalization.
        0x70 => match cpu.regs.fpr_short(step.r1) {
            Ok(v) => match cpu.mal.write_full(step.address2 as usize, v, cpu.psw.storage_key) {
                Ok(()) => Irc::None,
                Err(irc) => irc,
            },
            Err(irc) => irc,
        },
        0x60 => {
            let v = match cpu.regs.fpr(step.r1) {
                Ok(v) => v,
                Err(irc) => return irc,
            };
            let bytes = v.to_be_bytes();
            let hi = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            let lo = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
            if let Err(irc) = cpu.mal.write_full(step.address2 as usize, hi, cpu.psw.storage_key) {
                return irc;
            }
            match cpu.mal.write_full(step.address2 as usize + 4, lo, cpu.psw.storage_key) {
                Ok(()) => Irc::None,
                Err(irc) => irc,
            }
        }
        // LE/LD: load, no normalization.
        0x78 => match cpu.mal.read_full(step.address2 as usize, cpu.psw.storage_key, false) {
            Ok(v) => match cpu.regs.set_fpr_short(step.r1, v) {
                Ok(()) => Irc::None,
                Err(irc) => irc,
            },
            Err(irc) => irc,
        },
        0x68 => {
            let hi = match cpu.mal.read_full(step.address2 as usize, cpu.psw.storage_key, false) {
                Ok(v) => v,
                Err(irc) => return irc,
            };
            let lo = match cpu.mal.read_full(step.address2 as usize + 4, cpu.psw.storage_key, false) {
                Ok(v) => v,
                Err(irc) => return irc,
            };
            let value = ((hi as u64) << 32) | lo as u64;
            match cpu.regs.set_fpr(step.r1, value) {
                Ok(()) => Irc::None,
                Err(irc) => irc,
            }
        }
        _ => {
            let a = if long { float_long(cpu, step.r1) } else { float_short(cpu, step.r1) };
            let a = match a {
                Ok(v) => v,
                Err(irc) => return irc,
            };
            let b = if long {
                let hi = match cpu.mal.read_full(step.address2 as usize, cpu.psw.storage_key, false) {
                    Ok(v) => v,
                    Err(irc) => return irc,
                };
                let lo = match cpu.mal.read_full(step.address2 as usize + 4, cpu.psw.storage_key, false) {
                    Ok(v) => v,
                    Err(irc) => return irc,
                };
                float::unpack64(((hi as u64) << 32) | lo as u64)
            } else {
                match cpu.mal.read_full(step.address2 as usize, cpu.psw.storage_key, false) {
                    Ok(v) => float::unpack32(v),
                    Err(irc) => return irc,
                }
            };
            let (result, irc) = apply_float_binary(&mut cpu.psw, step.opcode, a, b);
            if is_float_compare(step.opcode) {
                return irc;
            }
            let stored = if long { set_float_long(cpu, step.r1, &result) } else { set_float_short(cpu, step.r1, &result) };
            if let Err(e) = stored {
                return e;
            }
            irc
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Ram;

    fn test_cpu() -> Cpu {
        Cpu::new(crate::memory::Mal::new(Ram::new(64 * 1024)))
    }

    #[test]
    fn format_groups_match_spec_lengths() {
        assert_eq!(halfwords_for(format_of(0x1A)), 1); // AR
        assert_eq!(halfwords_for(format_of(0x5A)), 2); // A
        assert_eq!(halfwords_for(format_of(0xFA)), 3); // AP
    }

    #[test]
    fn pack_then_unpack_roundtrips_zoned_value() {
        let mut cpu = test_cpu();
        for (i, b) in [0xF1u8, 0xF2, 0xC7].iter().enumerate() {
            cpu.mal.write_byte(0x300 + i, *b, 0).unwrap();
        }
        let mut pack_step = StepInfo::new(0xF2);
        pack_step.address1 = 0x200;
        pack_step.address2 = 0x300;
        pack_step.length1 = 1; // 2-byte packed destination
        pack_step.length2 = 2; // 3-byte zoned source
        assert_eq!(execute_pack(&mut cpu, &pack_step), Irc::None);
        let mut packed = [0u8; 2];
        for (i, b) in packed.iter_mut().enumerate() {
            *b = cpu.mal.read_byte(0x200 + i, 0).unwrap();
        }
        assert_eq!(packed, [0x12, 0x7C]);

        let mut unpack_step = StepInfo::new(0xF3);
        unpack_step.address1 = 0x400;
        unpack_step.address2 = 0x200;
        unpack_step.length1 = 2; // 3-byte zoned destination
        unpack_step.length2 = 1; // 2-byte packed source
        assert_eq!(execute_unpk(&mut cpu, &unpack_step), Irc::None);
        let mut zoned = [0u8; 3];
        for (i, b) in zoned.iter_mut().enumerate() {
            *b = cpu.mal.read_byte(0x400 + i, 0).unwrap();
        }
        assert_eq!(zoned, [0xF1, 0xF2, 0xC7]);
    }

    #[test]
    fn mvo_preserves_operand1_sign_and_shifts_operand2_nibbles() {
        let mut cpu = test_cpu();
        for (i, b) in [0x12u8, 0x34, 0x5C].iter().enumerate() {
            cpu.mal.write_byte(0x100 + i, *b, 0).unwrap();
        }
        for (i, b) in [0x23u8, 0x4D].iter().enumerate() {
            cpu.mal.write_byte(0x200 + i, *b, 0).unwrap();
        }
        let mut step = StepInfo::new(0xF1);
        step.address1 = 0x100;
        step.address2 = 0x200;
        step.length1 = 2;
        step.length2 = 1;
        assert_eq!(execute_mvo(&mut cpu, &step), Irc::None);
        let mut out = [0u8; 3];
        for (i, b) in out.iter_mut().enumerate() {
            *b = cpu.mal.read_byte(0x100 + i, 0).unwrap();
        }
        assert_eq!(out, [0x02, 0x34, 0xDC]);
    }

    #[test]
    fn ni_clears_masked_bits_and_sets_cc() {
        let mut cpu = test_cpu();
        cpu.mal.write_byte(0x100, 0xFF, 0).unwrap();
        let mut step = StepInfo::new(0x94);
        step.address1 = 0x100;
        step.i2 = 0x0F;
        assert_eq!(execute_si_logical(&mut cpu, &step), Irc::None);
        assert_eq!(cpu.mal.read_byte(0x100, 0).unwrap(), 0x0F);
        assert_eq!(cpu.psw.cc, crate::psw::Ccr::NEGATIVE.0);
    }

    #[test]
    fn cs_swaps_on_match_and_reports_mismatch_in_r1() {
        let mut cpu = test_cpu();
        cpu.mal.write_full(0x100, 0x0000_0005, 0).unwrap();
        cpu.regs.set_gpr(1, 0x0000_0005);
        cpu.regs.set_gpr(3, 0x0000_0009);
        let mut step = StepInfo::new(0xBA);
        step.r1 = 1;
        step.r3 = 3;
        step.address2 = 0x100;
        assert_eq!(execute_cs(&mut cpu, &step), Irc::None);
        assert_eq!(cpu.mal.read_full(0x100, 0, false).unwrap(), 0x0000_0009);
        assert_eq!(cpu.psw.cc, crate::psw::Ccr::ZERO.0);

        // Storage no longer matches R1's stale compare value: CS reports the
        // current storage contents back in R1 instead of swapping.
        cpu.regs.set_gpr(1, 0x0000_0005);
        assert_eq!(execute_cs(&mut cpu, &step), Irc::None);
        assert_eq!(cpu.regs.gpr(1), 0x0000_0009);
        assert_eq!(cpu.psw.cc, crate::psw::Ccr::NEGATIVE.0);
    }

    #[test]
    fn lctl_stctl_roundtrip_control_registers() {
        let mut cpu = test_cpu();
        cpu.regs.set_cr(4, 0x1111_1111);
        cpu.regs.set_cr(5, 0x2222_2222);
        cpu.regs.set_cr(6, 0x3333_3333);
        let mut store_step = StepInfo::new(0xB6);
        store_step.r1 = 4;
        store_step.r3 = 6;
        store_step.address2 = 0x300;
        assert_eq!(execute_stctl(&mut cpu, &store_step), Irc::None);

        cpu.regs.set_cr(4, 0);
        cpu.regs.set_cr(5, 0);
        cpu.regs.set_cr(6, 0);
        let mut load_step = StepInfo::new(0xB7);
        load_step.r1 = 4;
        load_step.r3 = 6;
        load_step.address2 = 0x300;
        assert_eq!(execute_lctl(&mut cpu, &load_step), Irc::None);
        assert_eq!(cpu.regs.cr(4), 0x1111_1111);
        assert_eq!(cpu.regs.cr(5), 0x2222_2222);
        assert_eq!(cpu.regs.cr(6), 0x3333_3333);
    }

    #[test]
    fn mvc_copies_bytes_leaving_source_unchanged() {
        let mut cpu = test_cpu();
        for (i, b) in [0xAAu8, 0xBB, 0xCC, 0xDD].iter().enumerate() {
            cpu.mal.write_byte(0x100 + i, *b, 0).unwrap();
        }
        let mut step = StepInfo::new(0xD2);
        step.address1 = 0x200;
        step.address2 = 0x100;
        step.length1 = 3;
        assert_eq!(execute_mvc(&mut cpu, &step), Irc::None);
        for i in 0..4 {
            assert_eq!(cpu.mal.read_byte(0x200 + i, 0).unwrap(), cpu.mal.read_byte(0x100 + i, 0).unwrap());
        }
    }

    #[test]
    fn tr_translates_each_byte_through_table() {
        let mut cpu = test_cpu();
        for i in 0..256u32 {
            cpu.mal.write_byte(0x1000 + i as usize, i as u8, 0).unwrap();
        }
        cpu.mal.write_byte(0x1000 + 0x41, 0xC1, 0).unwrap();
        cpu.mal.write_byte(0x2000, 0x41, 0).unwrap();
        cpu.mal.write_byte(0x2001, 0x42, 0).unwrap();
        let mut step = StepInfo::new(0xDC);
        step.address1 = 0x2000;
        step.address2 = 0x1000;
        step.length1 = 1;
        assert_eq!(execute_tr(&mut cpu, &step), Irc::None);
        assert_eq!(cpu.mal.read_byte(0x2000, 0).unwrap(), 0xC1);
        assert_eq!(cpu.mal.read_byte(0x2001, 0).unwrap(), 0x42);
    }

    #[test]
    fn ssk_isk_roundtrip_storage_key() {
        let mut cpu = test_cpu();
        cpu.regs.set_gpr(2, 0x4000);
        cpu.regs.set_gpr(1, 0x50);
        let mut ssk_step = StepInfo::new(0x08);
        ssk_step.r1 = 1;
        ssk_step.r2 = 2;
        assert_eq!(execute(&mut cpu, &ssk_step), Irc::None);

        cpu.regs.set_gpr(1, 0);
        let mut isk_step = StepInfo::new(0x09);
        isk_step.r1 = 1;
        isk_step.r2 = 2;
        assert_eq!(execute(&mut cpu, &isk_step), Irc::None);
        assert_eq!(cpu.regs.gpr(1) & 0xfe, 0x50);
    }

    #[test]
    fn ler_copies_short_float_register_unchanged() {
        let mut cpu = test_cpu();
        cpu.regs.set_fpr_short(2, 0x4110_0000).unwrap();
        let mut step = StepInfo::new(0x38);
        step.r1 = 4;
        step.r2 = 2;
        assert_eq!(execute_float_rr(&mut cpu, &step), Irc::None);
        assert_eq!(cpu.regs.fpr_short(4).unwrap(), 0x4110_0000);
    }
}
