//! An in-memory dump for exercising the reconstruction pipeline.
//!
//! Plays the role of a parsed crash dump: physical pages live in a map
//! keyed by physical address, and mappings are installed by writing real
//! page-table entries into bump-allocated directory pages. Pages can be
//! removed afterwards to simulate sparse dumps.

// Not every test crate uses every helper.
#![allow(dead_code)]

use clairvoyance_paging::{Page, PageTableEntry, PhysicalAddress, VirtualAddress};
use clairvoyance_space::{DumpKind, PhysicalMemory};
use std::collections::BTreeMap;

/// Default root PML4 physical address used by the tests.
pub const DIRECTORY_BASE: u64 = 0x1000;

/// First physical page handed out for directory tables.
const TABLE_POOL_BASE: u64 = 0x10_0000;

pub struct SyntheticDump {
    pages: BTreeMap<u64, Box<Page>>,
    directory_base: u64,
    kind: DumpKind,
    next_table: u64,
}

/// A present leaf/link entry with the given permission bits.
pub fn entry(user: bool, write: bool, nx: bool) -> PageTableEntry {
    PageTableEntry::new()
        .with_present(true)
        .with_user_accessible(user)
        .with_write(write)
        .with_no_execute(nx)
}

impl SyntheticDump {
    pub fn new() -> Self {
        let mut dump = Self {
            pages: BTreeMap::new(),
            directory_base: DIRECTORY_BASE,
            kind: DumpKind::Full,
            next_table: TABLE_POOL_BASE,
        };
        dump.pages
            .insert(DIRECTORY_BASE, Box::new([0u8; 4096]));
        dump
    }

    #[must_use]
    pub fn with_kind(mut self, kind: DumpKind) -> Self {
        self.kind = kind;
        self
    }

    /// Map one 4 KiB page; intermediate tables are created permissive
    /// (user, writable, executable) so the leaf decides the fold.
    pub fn map_4k(&mut self, va: u64, pfn: u64, leaf: PageTableEntry) {
        let va = VirtualAddress::from_bits(va);
        let pdpt = self.ensure_table(self.directory_base, va.pml4());
        let pd = self.ensure_table(pdpt, va.pdpt());
        let pt = self.ensure_table(pd, va.pd());
        self.write_entry(pt, va.pt(), leaf.with_page_frame_number(pfn));
    }

    /// Map one 2 MiB page (`PS=1` on the PDE).
    pub fn map_2m(&mut self, va: u64, pfn: u64, leaf: PageTableEntry) {
        let va = VirtualAddress::from_bits(va);
        let pdpt = self.ensure_table(self.directory_base, va.pml4());
        let pd = self.ensure_table(pdpt, va.pdpt());
        self.write_entry(
            pd,
            va.pd(),
            leaf.with_large_page(true).with_page_frame_number(pfn),
        );
    }

    /// Map one 1 GiB page (`PS=1` on the PDPTE).
    pub fn map_1g(&mut self, va: u64, pfn: u64, leaf: PageTableEntry) {
        let va = VirtualAddress::from_bits(va);
        let pdpt = self.ensure_table(self.directory_base, va.pml4());
        self.write_entry(
            pdpt,
            va.pdpt(),
            leaf.with_large_page(true).with_page_frame_number(pfn),
        );
    }

    /// Drop a physical page, simulating a dump that does not contain it.
    pub fn remove_page(&mut self, pa: u64) {
        self.pages.remove(&pa);
    }

    /// Physical base of the child table a present entry links to.
    pub fn child_of(&self, table_pa: u64, index: u16) -> u64 {
        self.read_entry(table_pa, index).page_frame_base().as_u64()
    }

    pub fn read_entry(&self, table_pa: u64, index: u16) -> PageTableEntry {
        let page = &self.pages[&table_pa];
        let off = usize::from(index) * 8;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&page[off..off + 8]);
        PageTableEntry::from_bits(u64::from_le_bytes(raw))
    }

    pub fn write_entry(&mut self, table_pa: u64, index: u16, entry: PageTableEntry) {
        let page = self.pages.get_mut(&table_pa).expect("table page exists");
        let off = usize::from(index) * 8;
        page[off..off + 8].copy_from_slice(&entry.into_bits().to_le_bytes());
    }

    /// Follow the link at `table_pa[index]`, creating the child table (and
    /// a permissive link entry) if the slot is empty.
    fn ensure_table(&mut self, table_pa: u64, index: u16) -> u64 {
        let existing = self.read_entry(table_pa, index);
        if existing.present() {
            return existing.page_frame_base().as_u64();
        }
        let child = self.next_table;
        self.next_table += 0x1000;
        self.pages.insert(child, Box::new([0u8; 4096]));
        self.write_entry(
            table_pa,
            index,
            entry(true, true, false).with_page_frame_number(child >> 12),
        );
        child
    }
}

impl PhysicalMemory for SyntheticDump {
    fn physical_page(&self, pa: PhysicalAddress) -> Option<&Page> {
        self.pages.get(&pa.as_u64()).map(Box::as_ref)
    }

    fn directory_table_base(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.directory_base)
    }

    fn dump_kind(&self) -> DumpKind {
        self.kind
    }
}
