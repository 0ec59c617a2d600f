// Translation Service (§4.2): virtual-to-physical mapping through a
// 256-entry TLB and a pluggable page-table walker. The walk itself is named
// in §1 as a collaborator ("different architecture levels — 360/67 vs
// 370 — can plug in"), so it lives behind the `PageTableWalker` trait rather
// than being inlined here.

use crate::interrupt::Irc;
use crate::memory::{AddressTranslator, MemoryStore};
use crate::registers::Registers;

pub const TLB_ENTRIES: usize = 256;
const PAGE_SHIFT: u32 = 11; // 2 KiB pages
const PAGE_SIZE: usize = 1 << PAGE_SHIFT;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TlbEntry {
    pub tag: u32,
    pub frame: u32,
    pub valid: bool,
}

impl Default for TlbEntry {
    fn default() -> Self {
        TlbEntry { tag: 0, frame: 0, valid: false }
    }
}

/// 256 entries keyed by the low bits of the virtual page number (§3 "TLB").
pub struct Tlb {
    entries: [TlbEntry; TLB_ENTRIES],
}

impl Tlb {
    pub fn new() -> Self {
        Tlb { entries: [TlbEntry::default(); TLB_ENTRIES] }
    }

    fn slot(vpn: u32) -> usize {
        (vpn as usize) & (TLB_ENTRIES - 1)
    }

    /// Side-effect-free lookup (§4.2 invariant).
    pub fn lookup(&self, vpn: u32) -> Option<u32> {
        let e = &self.entries[Self::slot(vpn)];
        if e.valid && e.tag == vpn { Some(e.frame) } else { None }
    }

    /// Installation is write-only: it always replaces whatever occupied the
    /// slot, there is no collision chaining (§4.2).
    pub fn install(&mut self, vpn: u32, frame: u32) {
        self.entries[Self::slot(vpn)] = TlbEntry { tag: vpn, frame, valid: true };
    }

    /// There is no per-entry invalidate in the core instruction set observed
    /// (§4.2): STNSM/STOSM/LCTL changes purge everything.
    pub fn invalidate_all(&mut self) {
        for e in self.entries.iter_mut() {
            e.valid = false;
        }
    }
}

impl Default for Tlb {
    fn default() -> Self {
        Self::new()
    }
}

/// Segment/page table geometry, derived from control registers 0 and 1 on
/// real hardware; kept explicit here so a walker can be constructed without
/// reaching back into `Registers`.
#[derive(Copy, Clone, Debug)]
pub struct TranslationParams {
    pub segment_table_origin: u32,
    pub segment_table_length: u32,
    pub page_table_length: u32,
}

impl TranslationParams {
    pub fn from_control_registers(cr: &Registers) -> Self {
        let cr0 = cr.cr(0);
        let cr1 = cr.cr(1);
        TranslationParams {
            segment_table_origin: cr1 & 0x00ff_fff8,
            segment_table_length: cr1 & 0xff,
            page_table_length: (cr0 >> 4) & 0xf,
        }
    }
}

/// The page-table walk proper (§4.2 algorithm steps 1-4). A default
/// implementation following the 370 two-level table; a 360/67 variant can
/// implement the same trait without MAL or the TLB knowing the difference.
pub trait PageTableWalker {
    fn walk(&self, store: &dyn MemoryStore, params: &TranslationParams, va: usize) -> Result<u32, Irc>;
}

/// Standard S/370 two-level walk: segment table entry points to a page table,
/// page table entry supplies the frame number.
pub struct StandardWalker;

struct VirtualAddressParts {
    segment_index: u32,
    page_index: u32,
}

fn split(va: usize) -> VirtualAddressParts {
    VirtualAddressParts {
        segment_index: ((va >> 20) & 0xff) as u32,
        page_index: ((va >> PAGE_SHIFT) & 0xff) as u32,
    }
}

impl PageTableWalker for StandardWalker {
    fn walk(&self, store: &dyn MemoryStore, params: &TranslationParams, va: usize) -> Result<u32, Irc> {
        let parts = split(va);
        if parts.segment_index > params.segment_table_length {
            return Err(Irc::SegmentTranslation);
        }
        let ste_addr = (params.segment_table_origin as usize) + (parts.segment_index as usize) * 4;
        let ste = store.get_memory(ste_addr & !0x3);
        const STE_INVALID: u32 = 0x8000_0000;
        if ste & STE_INVALID != 0 {
            return Err(Irc::SegmentTranslation);
        }
        let page_table_origin = ste & 0x00ff_fffc;
        let page_table_length = ste & 0xf;
        if parts.page_index > page_table_length {
            return Err(Irc::SegmentTranslation);
        }
        let pte_addr = (page_table_origin as usize) + (parts.page_index as usize) * 2;
        let word = store.get_memory(pte_addr & !0x3);
        let shift = if pte_addr & 0x2 == 0 { 16 } else { 0 };
        let pte = ((word >> shift) & 0xffff) as u16;
        const PTE_INVALID: u16 = 0x0004;
        const PTE_MBZ: u16 = 0x0003;
        if pte & PTE_INVALID != 0 {
            return Err(Irc::PageTranslation);
        }
        if pte & PTE_MBZ != 0 {
            return Err(Irc::TranslationSpecification);
        }
        Ok((pte >> 4) as u32)
    }
}

/// Owns the TLB and delegates misses to a `PageTableWalker` (§4.2). Wired
/// into `Mal` through the `AddressTranslator` trait so MAL never sees the
/// walker directly.
pub struct TranslationService {
    tlb: Tlb,
    walker: Box<dyn PageTableWalker>,
    params: TranslationParams,
}

impl TranslationService {
    pub fn new(walker: Box<dyn PageTableWalker>, params: TranslationParams) -> Self {
        TranslationService { tlb: Tlb::new(), walker, params }
    }

    pub fn set_params(&mut self, params: TranslationParams) {
        self.params = params;
        self.tlb.invalidate_all();
    }

    pub fn invalidate(&mut self) {
        self.tlb.invalidate_all();
    }

    pub fn translate_with(&mut self, store: &dyn MemoryStore, va: usize) -> Result<usize, Irc> {
        let parts = split(va);
        let vpn = (parts.segment_index << 8) | parts.page_index;
        let offset = va & (PAGE_SIZE - 1);
        if let Some(frame) = self.tlb.lookup(vpn) {
            return Ok((frame as usize) * PAGE_SIZE + offset);
        }
        let frame = self.walker.walk(store, &self.params, va)?;
        self.tlb.install(vpn, frame);
        Ok((frame as usize) * PAGE_SIZE + offset)
    }
}

/// Adapter so `Mal` can hold a `TranslationService` behind the
/// `AddressTranslator` object-safe trait without MAL depending on
/// `MemoryStore` twice. The service is handed a reference to the same
/// physical store MAL itself owns via `bind`.
pub struct BoundTranslator<'s> {
    service: &'s mut TranslationService,
    store: &'s dyn MemoryStore,
}

impl<'s> BoundTranslator<'s> {
    pub fn new(service: &'s mut TranslationService, store: &'s dyn MemoryStore) -> Self {
        BoundTranslator { service, store }
    }
}

impl<'s> AddressTranslator for BoundTranslator<'s> {
    fn translate(&mut self, va: usize, _for_write: bool) -> Result<usize, Irc> {
        self.service.translate_with(self.store, va)
    }

    fn invalidate(&mut self) {
        self.service.invalidate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Ram;

    #[test]
    fn tlb_hit_matches_walk_result() {
        let mut tlb = Tlb::new();
        assert_eq!(tlb.lookup(5), None);
        tlb.install(5, 0x42);
        assert_eq!(tlb.lookup(5), Some(0x42));
    }

    #[test]
    fn invalidate_all_clears_every_entry() {
        let mut tlb = Tlb::new();
        tlb.install(1, 1);
        tlb.install(2, 2);
        tlb.invalidate_all();
        assert_eq!(tlb.lookup(1), None);
        assert_eq!(tlb.lookup(2), None);
    }

    #[test]
    fn standard_walk_faults_on_segment_index_overflow() {
        let store = Ram::new(1 << 16);
        let params = TranslationParams { segment_table_origin: 0, segment_table_length: 0, page_table_length: 0 };
        let walker = StandardWalker;
        let result = walker.walk(&store, &params, 0x0020_0000);
        assert_eq!(result, Err(Irc::SegmentTranslation));
    }
}
