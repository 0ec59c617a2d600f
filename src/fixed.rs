// Binary Fixed-Point Unit (§4.3). Each operation takes the pieces of a
// StepInfo it actually needs plus the register file and PSW, and returns an
// `Irc` — zero means "complete, advance PSW" (§9 design note: the
// interruption code IS the architectural quantity, not a side channel).

use crate::interrupt::Irc;
use crate::psw::{Ccr, Psw};
use crate::registers::Registers;

fn set_cc_sign(psw: &mut Psw, value: i32) {
    psw.set_cc(if value == 0 {
        Ccr::ZERO
    } else if value < 0 {
        Ccr::NEGATIVE
    } else {
        Ccr::POSITIVE
    });
}

/// AR/SR/AH/SH and their logical/halfword siblings share this core: 32-bit
/// two's-complement add, overflow when both operand signs match and differ
/// from the result's (§4.3 "Add / Sub / AddH / SubH").
fn add_signed(psw: &mut Psw, a: i32, b: i32) -> (i32, Irc) {
    let (result, overflowed) = a.overflowing_add(b);
    if overflowed {
        psw.set_cc(Ccr::OVERFLOW);
        if psw.program_mask_set(crate::psw::ProgMaskBit::FixedOverflow) {
            return (result, Irc::FixedOverflow);
        }
    } else {
        set_cc_sign(psw, result);
    }
    (result, Irc::None)
}

pub fn add(psw: &mut Psw, regs: &mut Registers, r1: u8, operand2: i32) -> Irc {
    let (result, irc) = add_signed(psw, regs.gpr(r1) as i32, operand2);
    regs.set_gpr(r1, result as u32);
    irc
}

pub fn subtract(psw: &mut Psw, regs: &mut Registers, r1: u8, operand2: i32) -> Irc {
    let (result, irc) = add_signed(psw, regs.gpr(r1) as i32, operand2.wrapping_neg());
    regs.set_gpr(r1, result as u32);
    irc
}

/// AddH/SubH: operand2 is a sign-extended halfword from storage, otherwise
/// identical to Add/Sub (§4.3).
pub fn add_halfword(psw: &mut Psw, regs: &mut Registers, r1: u8, operand2: i16) -> Irc {
    add(psw, regs, r1, operand2 as i32)
}

pub fn subtract_halfword(psw: &mut Psw, regs: &mut Registers, r1: u8, operand2: i16) -> Irc {
    subtract(psw, regs, r1, operand2 as i32)
}

/// AddL/SubL (logical): unsigned add, carry-out feeds CC (§4.3
/// "CC ∈ {0 zero-no-carry, 1 nonzero-no-carry, 2 zero-carry, 3 nonzero-carry}").
pub fn add_logical(psw: &mut Psw, regs: &mut Registers, r1: u8, operand2: u32) -> Irc {
    let a = regs.gpr(r1);
    let (result, carry) = a.overflowing_add(operand2);
    regs.set_gpr(r1, result);
    psw.set_cc(match (result == 0, carry) {
        (true, false) => Ccr::ZERO,
        (false, false) => Ccr::NEGATIVE,
        (true, true) => Ccr::POSITIVE,
        (false, true) => Ccr::OVERFLOW,
    });
    Irc::None
}

pub fn subtract_logical(psw: &mut Psw, regs: &mut Registers, r1: u8, operand2: u32) -> Irc {
    add_logical(psw, regs, r1, (!operand2).wrapping_add(1))
}

/// Compare/CompareL (§4.3): CC=0 equal, 1 operand1<operand2, 2 operand1>operand2.
pub fn compare(psw: &mut Psw, operand1: i32, operand2: i32) -> Irc {
    psw.set_cc(match operand1.cmp(&operand2) {
        std::cmp::Ordering::Equal => Ccr::ZERO,
        std::cmp::Ordering::Less => Ccr::NEGATIVE,
        std::cmp::Ordering::Greater => Ccr::POSITIVE,
    });
    Irc::None
}

pub fn compare_logical(psw: &mut Psw, operand1: u32, operand2: u32) -> Irc {
    psw.set_cc(match operand1.cmp(&operand2) {
        std::cmp::Ordering::Equal => Ccr::ZERO,
        std::cmp::Ordering::Less => Ccr::NEGATIVE,
        std::cmp::Ordering::Greater => Ccr::POSITIVE,
    });
    Irc::None
}

/// Multiply (§4.3): R1 must be even; signed 32x32->64, product in (R1,R1+1).
/// No overflow exception on this architecture.
pub fn multiply(regs: &mut Registers, r1: u8, multiplicand: i32, multiplier: i32) -> Irc {
    if r1 % 2 != 0 {
        return Irc::Specification;
    }
    let product = (multiplicand as i64).wrapping_mul(multiplier as i64);
    let hi = (product >> 32) as u32;
    let lo = product as u32;
    let _ = regs.set_gpr_pair(r1, hi, lo);
    Irc::None
}

/// Divide (§4.3): (R1,R1+1) / divisor -> quotient in R1+1, remainder in R1.
/// Divisor zero, or a quotient that does not fit signed 32-bit, traps
/// `fixed-divide` with operands left unchanged.
pub fn divide(regs: &mut Registers, r1: u8, divisor: i32) -> Irc {
    if r1 % 2 != 0 {
        return Irc::Specification;
    }
    if divisor == 0 {
        return Irc::FixedDivide;
    }
    let (hi, lo) = match regs.gpr_pair(r1) {
        Ok(pair) => pair,
        Err(irc) => return irc,
    };
    let dividend = ((hi as i64) << 32) | (lo as i64 & 0xffff_ffff);
    let quotient = dividend / divisor as i64;
    let remainder = dividend % divisor as i64;
    if quotient > i32::MAX as i64 || quotient < i32::MIN as i64 {
        return Irc::FixedDivide;
    }
    let _ = regs.set_gpr_pair(r1, remainder as u32, quotient as u32);
    Irc::None
}

/// LPR/LCR/LNR (§4.3): load positive/complement/negative. The minimum
/// 32-bit signed value has no positive counterpart, so that case sets CC=3
/// and, if FIXOVER is set, traps.
fn load_with_sign(psw: &mut Psw, regs: &mut Registers, r1: u8, value: i32, negate: bool, force_negative: bool) -> Irc {
    let transformed = if force_negative {
        -(value.abs())
    } else if negate {
        value.wrapping_neg()
    } else {
        value.abs()
    };
    regs.set_gpr(r1, transformed as u32);
    if value == i32::MIN && !force_negative {
        psw.set_cc(Ccr::OVERFLOW);
        if psw.program_mask_set(crate::psw::ProgMaskBit::FixedOverflow) {
            return Irc::FixedOverflow;
        }
        return Irc::None;
    }
    set_cc_sign(psw, transformed);
    Irc::None
}

pub fn load_positive(psw: &mut Psw, regs: &mut Registers, r1: u8, value: i32) -> Irc {
    load_with_sign(psw, regs, r1, value, false, false)
}

pub fn load_complement(psw: &mut Psw, regs: &mut Registers, r1: u8, value: i32) -> Irc {
    load_with_sign(psw, regs, r1, value, true, false)
}

pub fn load_negative(psw: &mut Psw, regs: &mut Registers, r1: u8, value: i32) -> Irc {
    load_with_sign(psw, regs, r1, value, false, true)
}

/// Shift-arithmetic family (SLA/SRA/SLDA/SRDA, §4.3): the sign bit is never
/// altered; left shifts set CC=3 overflow if a bit unlike the sign was
/// shifted out. `bits` is the word width (32 single, 64 double).
pub fn shift_left_arithmetic(psw: &mut Psw, value: i64, count: u32, bits: u32) -> (i64, Irc) {
    let sign_mask: i64 = 1 << (bits - 1);
    let sign = value & sign_mask;
    let mut overflow = false;
    let mut v = value;
    for _ in 0..count {
        let top_two = v & (sign_mask | (sign_mask >> 1));
        if top_two != 0 && top_two != (sign_mask | (sign_mask >> 1)) {
            overflow = true;
        }
        v = (v << 1) & ((1i64 << bits) - 1);
    }
    v = (v & !sign_mask) | sign;
    let signed = sign_extend(v, bits);
    set_cc_sign(psw, signed.clamp(i32::MIN as i64, i32::MAX as i64) as i32);
    if overflow {
        psw.set_cc(Ccr::OVERFLOW);
        return (signed, Irc::FixedOverflow);
    }
    (signed, Irc::None)
}

fn sign_extend(value: i64, bits: u32) -> i64 {
    let shift = 64 - bits;
    (value << shift) >> shift
}

pub fn shift_right_arithmetic(psw: &mut Psw, value: i64, count: u32, bits: u32) -> i64 {
    let shifted = if count >= bits {
        if value < 0 { -1 } else { 0 }
    } else {
        value >> count
    };
    let signed = sign_extend(shifted, bits);
    set_cc_sign(psw, signed.clamp(i32::MIN as i64, i32::MAX as i64) as i32);
    signed
}

/// Shift-logical family (SLL/SRL/SLDL/SRDL, §4.3): shift counts beyond the
/// register width produce zero; no CC is set by the logical shifts.
pub fn shift_left_logical(value: u64, count: u32, bits: u32) -> u64 {
    if count >= bits {
        0
    } else {
        (value << count) & ((1u64 << bits) - 1)
    }
}

pub fn shift_right_logical(value: u64, count: u32, bits: u32) -> u64 {
    if count >= bits {
        0
    } else {
        value >> count
    }
}

/// Branch-family condition test (§4.3): branches when bit `8 >> CC` of the
/// mask is set.
pub fn branch_condition_met(mask: u8, cc: u8) -> bool {
    mask & (8u8 >> cc) != 0
}

/// BAL/BALR: save ILC:CC:progMask:IA into R1, branch unconditionally.
pub fn branch_and_link(psw: &Psw) -> u32 {
    ((psw.ilc as u32 & 0x3) << 30) | ((psw.cc as u32 & 0x3) << 28) | ((psw.program_mask as u32 & 0xf) << 24) | (psw.ia & 0x00ff_ffff)
}

/// BCT: decrement R1, branch if the result is nonzero.
pub fn branch_on_count(regs: &mut Registers, r1: u8) -> bool {
    let decremented = (regs.gpr(r1) as i32).wrapping_sub(1);
    regs.set_gpr(r1, decremented as u32);
    decremented != 0
}

/// BXH/BXLE: add R3 to R1, compare against the odd register of the (R3,R3|1)
/// pair; branch per the opcode's comparison sense.
pub fn branch_on_index(regs: &mut Registers, r1: u8, r3: u8, high: bool) -> bool {
    let incremented = (regs.gpr(r1) as i32).wrapping_add(regs.gpr(r3) as i32);
    regs.set_gpr(r1, incremented as u32);
    let compare_reg = r3 | 1;
    let limit = regs.gpr(compare_reg) as i32;
    if high {
        incremented > limit
    } else {
        incremented <= limit
    }
}

/// ICM/STCM (§4.3): the mask selects which bytes of R1 participate; CC is 0
/// if all selected bytes are zero, 1 if the MSB of the first selected byte is
/// set, 2 otherwise.
pub fn insert_under_mask(psw: &mut Psw, regs: &mut Registers, r1: u8, mask: u8, bytes: &[u8]) -> Irc {
    let mut result = regs.gpr(r1);
    let mut byte_iter = bytes.iter();
    let mut first_selected: Option<u8> = None;
    let mut all_zero = true;
    for shift in (0..4).rev() {
        if mask & (1 << shift) != 0 {
            if let Some(&b) = byte_iter.next() {
                if first_selected.is_none() {
                    first_selected = Some(b);
                }
                if b != 0 {
                    all_zero = false;
                }
                let bit_shift = shift * 8;
                result = (result & !(0xffu32 << bit_shift)) | ((b as u32) << bit_shift);
            }
        }
    }
    regs.set_gpr(r1, result);
    psw.set_cc(match first_selected {
        None => Ccr::ZERO,
        Some(_) if all_zero => Ccr::ZERO,
        Some(b) if b & 0x80 != 0 => Ccr::NEGATIVE,
        Some(_) => Ccr::POSITIVE,
    });
    Irc::None
}

/// Overlap/length outcome for MVCL/CLCL (§4.3).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LongOpOutcome {
    Equal,
    Operand1Shorter,
    Operand1Longer,
    DestructiveOverlap,
}

pub fn move_long_cc(outcome: LongOpOutcome) -> Ccr {
    match outcome {
        LongOpOutcome::Equal => Ccr::ZERO,
        LongOpOutcome::Operand1Shorter => Ccr::NEGATIVE,
        LongOpOutcome::Operand1Longer => Ccr::POSITIVE,
        LongOpOutcome::DestructiveOverlap => Ccr::OVERFLOW,
    }
}

/// One operand of an MVCL/CLCL register pair (§4.3): address in the even
/// register's low 24 bits, length in the odd register's low 24 bits, pad
/// byte in the odd register's top 8 bits.
#[derive(Copy, Clone, Debug)]
pub struct LongOperand {
    pub address: u32,
    pub length: u32,
    pub pad: u8,
}

pub fn decode_long_operand(regs: &Registers, r: u8) -> Result<LongOperand, Irc> {
    if r % 2 != 0 {
        return Err(Irc::Specification);
    }
    let address = regs.gpr(r) & 0x00ff_ffff;
    let len_reg = regs.gpr(r + 1);
    Ok(LongOperand { address, length: len_reg & 0x00ff_ffff, pad: (len_reg >> 24) as u8 })
}

/// Destructive-overlap test for MVCL (§4.3): operand1 overlaps operand2 and
/// starts at a higher address, so a forward byte-at-a-time copy would read
/// already-overwritten source bytes.
pub fn mvcl_destructive_overlap(dst: &LongOperand, src: &LongOperand) -> bool {
    if dst.length == 0 || src.length == 0 {
        return false;
    }
    let len = dst.length.min(src.length) as u64;
    let d0 = dst.address as u64;
    let d1 = d0 + len;
    let s0 = src.address as u64;
    let s1 = s0 + len;
    dst.address > src.address && d0 < s1 && s0 < d1
}

/// AND/OR/XOR (N/NR/O/OR/X/XR, §4.3-adjacent logical family): bitwise op,
/// CC=0 if the result is all-zero, else CC=1 (the architecture never uses
/// CC 2/3 for these).
fn set_cc_logical(psw: &mut Psw, result: u32) {
    psw.set_cc(if result == 0 { Ccr::ZERO } else { Ccr::NEGATIVE });
}

pub fn and(psw: &mut Psw, regs: &mut Registers, r1: u8, operand2: u32) -> Irc {
    let result = regs.gpr(r1) & operand2;
    regs.set_gpr(r1, result);
    set_cc_logical(psw, result);
    Irc::None
}

pub fn or(psw: &mut Psw, regs: &mut Registers, r1: u8, operand2: u32) -> Irc {
    let result = regs.gpr(r1) | operand2;
    regs.set_gpr(r1, result);
    set_cc_logical(psw, result);
    Irc::None
}

pub fn xor(psw: &mut Psw, regs: &mut Registers, r1: u8, operand2: u32) -> Irc {
    let result = regs.gpr(r1) ^ operand2;
    regs.set_gpr(r1, result);
    set_cc_logical(psw, result);
    Irc::None
}

/// TM (Test under Mask, §4.3-adjacent): CC=0 if no masked bit is set, 1 if
/// some but not all masked bits are set, 3 if all masked bits are set; CC=0
/// when the mask itself is zero.
pub fn test_under_mask(psw: &mut Psw, value: u8, mask: u8) -> Irc {
    let selected = value & mask;
    psw.set_cc(if mask == 0 || selected == 0 {
        Ccr::ZERO
    } else if selected == mask {
        Ccr::OVERFLOW
    } else {
        Ccr::NEGATIVE
    });
    Irc::None
}

/// LTR (Load and Test Register): loads R1 from the operand (like LR) and
/// sets CC from its sign, distinct from LPR/LCR/LNR which also transform
/// the value.
pub fn load_and_test(psw: &mut Psw, regs: &mut Registers, r1: u8, value: i32) -> Irc {
    regs.set_gpr(r1, value as u32);
    set_cc_sign(psw, value);
    Irc::None
}

/// TS (Test and Set, §5): reads a byte, sets all its bits to 1, and reports
/// whether the sampled high-order bit was already 1 — the architecture's
/// indivisible read-modify-write primitive for multiprocessor locking.
pub fn test_and_set_cc(old_byte: u8) -> Ccr {
    if old_byte & 0x80 != 0 { Ccr::POSITIVE } else { Ccr::ZERO }
}

/// CS/CDS (Compare and Swap / Compare Double and Swap, §5): if the storage
/// word(s) equal the compare value, replace with the new value and report
/// equal; otherwise leave storage untouched, load the actual value back
/// into the compare register, and report unequal. Returns `(stored, cc)`.
pub fn compare_and_swap(compare: u32, replacement: u32, stored: u32) -> (u32, Ccr) {
    if compare == stored {
        (replacement, Ccr::ZERO)
    } else {
        (stored, Ccr::NEGATIVE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_overflow_traps_when_program_mask_set() {
        let mut psw = Psw::new();
        psw.set_program_mask_bit(crate::psw::ProgMaskBit::FixedOverflow, true);
        let mut regs = Registers::new();
        regs.set_gpr(1, 0x7fff_ffff);
        let irc = add(&mut psw, &mut regs, 1, 1);
        assert_eq!(irc, Irc::FixedOverflow);
        assert_eq!(regs.gpr(1), 0x8000_0000);
        assert_eq!(psw.cc, Ccr::OVERFLOW.0);
    }

    #[test]
    fn add_overflow_without_mask_just_sets_cc() {
        let mut psw = Psw::new();
        let mut regs = Registers::new();
        regs.set_gpr(1, 0x7fff_ffff);
        let irc = add(&mut psw, &mut regs, 1, 1);
        assert_eq!(irc, Irc::None);
        assert_eq!(psw.cc, Ccr::OVERFLOW.0);
    }

    #[test]
    fn divide_by_zero_traps() {
        let mut regs = Registers::new();
        regs.set_gpr_pair(6, 0, 10).unwrap();
        assert_eq!(divide(&mut regs, 6, 0), Irc::FixedDivide);
    }

    #[test]
    fn divide_places_quotient_and_remainder() {
        let mut regs = Registers::new();
        regs.set_gpr_pair(6, 0, 17).unwrap();
        assert_eq!(divide(&mut regs, 6, 5), Irc::None);
        assert_eq!(regs.gpr_pair(6).unwrap(), (2, 3));
    }

    #[test]
    fn load_complement_of_min_value_overflows() {
        let mut psw = Psw::new();
        let mut regs = Registers::new();
        let irc = load_complement(&mut psw, &mut regs, 1, i32::MIN);
        assert_eq!(irc, Irc::None);
        assert_eq!(psw.cc, Ccr::OVERFLOW.0);
        assert_eq!(regs.gpr(1), i32::MIN as u32);
    }

    #[test]
    fn branch_condition_matches_mask_bit() {
        assert!(branch_condition_met(0b1000, 0));
        assert!(!branch_condition_met(0b0100, 0));
        assert!(branch_condition_met(0b0001, 3));
    }

    #[test]
    fn insert_under_mask_sets_cc_from_first_selected_byte() {
        let mut psw = Psw::new();
        let mut regs = Registers::new();
        regs.set_gpr(1, 0);
        let irc = insert_under_mask(&mut psw, &mut regs, 1, 0b1100, &[0x80, 0x01]);
        assert_eq!(irc, Irc::None);
        assert_eq!(psw.cc, Ccr::NEGATIVE.0);
        assert_eq!(regs.gpr(1), 0x8001_0000);
    }
}
