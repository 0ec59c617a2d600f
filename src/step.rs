// Per-instruction descriptor (§3 "StepInfo descriptor"). Transient: the
// dispatcher fills one per fetched instruction and hands it to a unit
// handler, which never reaches back into the instruction stream itself.

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Format {
    Rr,
    Rx,
    Rs,
    Si,
    SsOneLength,
    SsTwoLength,
}

#[derive(Clone, Debug, Default)]
pub struct StepInfo {
    pub opcode: u8,
    pub r1: u8,
    /// R2 for RR forms, or the 4-bit mask field for mask-branch/ICM forms.
    pub r2: u8,
    pub r3: u8,
    pub x2: u8,
    pub b1: u8,
    pub b2: u8,
    pub d1: u16,
    pub d2: u16,
    pub i2: u8,
    pub length1: u8,
    pub length2: u8,
    pub address1: u32,
    pub address2: u32,
    pub src1: u32,
    pub src2: u32,
    pub fsrc1: u64,
    pub fsrc2: u64,
    pub ilc: u8,
}

impl StepInfo {
    pub fn new(opcode: u8) -> Self {
        StepInfo { opcode, ..Default::default() }
    }
}
