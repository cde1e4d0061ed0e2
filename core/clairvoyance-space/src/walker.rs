//! Lazy, in-order enumeration of present leaf mappings.
//!
//! [`PageTableWalker`] is an explicit cursor object over the four-level
//! hierarchy rooted at a directory base. Each [`Iterator::next`] call
//! resumes where the previous one stopped: after yielding a leaf at some
//! level the cursor there advances by one, and whenever a higher-level
//! cursor moves onto a new entry the lower cursors restart at slot 0 of the
//! new child table. That shape lets the consumer apply backpressure; the
//! walker never materializes the hierarchy.
//!
//! A present entry whose child table is not contained in the dump (sparse
//! or kernel-only dumps) produces one `warn!` diagnostic and skips the
//! parent entry; the walk itself never aborts.

use crate::{PhysicalMemory, SpaceError};
use clairvoyance_paging::{
    ENTRIES_PER_TABLE, Page, PageKind, PageTableEntry, PhysicalAddress, VirtualAddress,
};
use log::{debug, warn};

/// One decoded leaf mapping.
///
/// Entries above the leaf hold the actual path the walk took; for a
/// [`Huge`](PageKind::Huge) leaf the `pde`/`pte` fields are zero, for a
/// [`Large`](PageKind::Large) leaf the `pte` fields are zero. The
/// `*_address` fields are the absolute physical addresses of the entry
/// slots themselves (directory base + index × 8 and so on), kept for
/// debugging and round-tripping.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LeafMapping {
    pub pml4e: PageTableEntry,
    pub pml4e_address: PhysicalAddress,
    pub pdpte: PageTableEntry,
    pub pdpte_address: PhysicalAddress,
    pub pde: PageTableEntry,
    pub pde_address: PhysicalAddress,
    pub pte: PageTableEntry,
    pub pte_address: PhysicalAddress,
    /// Lowest physical address covered: leaf PFN × 4096.
    pub physical_base: PhysicalAddress,
    /// Lowest virtual address covered, canonical.
    pub virtual_base: VirtualAddress,
    pub kind: PageKind,
}

/// Decode the 8-byte entry at `index` of a directory page.
fn entry_at(page: &Page, index: u16) -> PageTableEntry {
    let offset = usize::from(index) * 8;
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&page[offset..offset + 8]);
    PageTableEntry::from_bits(u64::from_le_bytes(raw))
}

/// Scan position inside one 512-entry directory page.
struct TableCursor<'a> {
    table: &'a Page,
    base: PhysicalAddress,
    next: u16,
}

impl<'a> TableCursor<'a> {
    const fn new(table: &'a Page, base: PhysicalAddress) -> Self {
        Self {
            table,
            base,
            next: 0,
        }
    }

    /// Advance to the next present entry, skipping `Present=0` slots.
    fn next_present(&mut self) -> Option<(u16, PageTableEntry)> {
        while self.next < ENTRIES_PER_TABLE {
            let index = self.next;
            self.next += 1;
            let entry = entry_at(self.table, index);
            if entry.present() {
                return Some((index, entry));
            }
        }
        None
    }

    /// Absolute physical address of the entry slot at `index`.
    fn entry_address(&self, index: u16) -> PhysicalAddress {
        self.base + u64::from(index) * 8
    }
}

/// A parent entry remembered while the walk is inside its child table.
#[derive(Copy, Clone)]
struct PathEntry {
    entry: PageTableEntry,
    address: PhysicalAddress,
    index: u16,
}

impl PathEntry {
    const fn empty() -> Self {
        Self {
            entry: PageTableEntry::new(),
            address: PhysicalAddress::zero(),
            index: 0,
        }
    }
}

/// Lazy iterator over the present leaves of one page-table hierarchy.
///
/// Leaves come out strictly in ascending [`LeafMapping::virtual_base`]
/// order, tied to the lexicographic order of the four walk indices. The
/// walker borrows the dump's page lookup for its lifetime and holds at most
/// four page views at a time, one per level.
pub struct PageTableWalker<'a, M: PhysicalMemory + ?Sized> {
    memory: &'a M,
    pml4: TableCursor<'a>,
    pdpt: Option<TableCursor<'a>>,
    pd: Option<TableCursor<'a>>,
    pt: Option<TableCursor<'a>>,
    pml4e: PathEntry,
    pdpte: PathEntry,
    pde: PathEntry,
}

impl<'a, M: PhysicalMemory + ?Sized> PageTableWalker<'a, M> {
    /// Open the hierarchy rooted at `directory_base`.
    ///
    /// ### Errors
    /// - [`SpaceError::RootMissing`] when the dump does not contain the
    ///   root PML4 page.
    pub fn new(memory: &'a M, directory_base: PhysicalAddress) -> Result<Self, SpaceError> {
        let root = memory
            .physical_page(directory_base)
            .ok_or(SpaceError::RootMissing(directory_base))?;
        Ok(Self {
            memory,
            pml4: TableCursor::new(root, directory_base),
            pdpt: None,
            pd: None,
            pt: None,
            pml4e: PathEntry::empty(),
            pdpte: PathEntry::empty(),
            pde: PathEntry::empty(),
        })
    }

    /// Fetch the child table a present entry links to, or log and signal a
    /// skip when the dump lacks it.
    fn child_table(&self, level: &str, entry: PageTableEntry) -> Option<TableCursor<'a>> {
        let base = entry.page_frame_base();
        match self.memory.physical_page(base) {
            Some(table) => {
                debug!("descending into the {level} at {base}");
                Some(TableCursor::new(table, base))
            }
            None => {
                warn!("{level} page {base} is not contained in the dump; skipping its parent entry");
                None
            }
        }
    }

    fn huge_leaf(&self, index: u16, entry: PageTableEntry, address: PhysicalAddress) -> LeafMapping {
        LeafMapping {
            pml4e: self.pml4e.entry,
            pml4e_address: self.pml4e.address,
            pdpte: entry,
            pdpte_address: address,
            pde: PageTableEntry::new(),
            pde_address: PhysicalAddress::zero(),
            pte: PageTableEntry::new(),
            pte_address: PhysicalAddress::zero(),
            physical_base: entry.page_frame_base(),
            virtual_base: VirtualAddress::from_indices(self.pml4e.index, index, 0, 0),
            kind: PageKind::Huge,
        }
    }

    fn large_leaf(&self, index: u16, entry: PageTableEntry, address: PhysicalAddress) -> LeafMapping {
        LeafMapping {
            pml4e: self.pml4e.entry,
            pml4e_address: self.pml4e.address,
            pdpte: self.pdpte.entry,
            pdpte_address: self.pdpte.address,
            pde: entry,
            pde_address: address,
            pte: PageTableEntry::new(),
            pte_address: PhysicalAddress::zero(),
            physical_base: entry.page_frame_base(),
            virtual_base: VirtualAddress::from_indices(self.pml4e.index, self.pdpte.index, index, 0),
            kind: PageKind::Large,
        }
    }

    fn normal_leaf(
        &self,
        index: u16,
        entry: PageTableEntry,
        address: PhysicalAddress,
    ) -> LeafMapping {
        LeafMapping {
            pml4e: self.pml4e.entry,
            pml4e_address: self.pml4e.address,
            pdpte: self.pdpte.entry,
            pdpte_address: self.pdpte.address,
            pde: self.pde.entry,
            pde_address: self.pde.address,
            pte: entry,
            pte_address: address,
            physical_base: entry.page_frame_base(),
            virtual_base: VirtualAddress::from_indices(
                self.pml4e.index,
                self.pdpte.index,
                self.pde.index,
                index,
            ),
            kind: PageKind::Normal,
        }
    }
}

impl<M: PhysicalMemory + ?Sized> Iterator for PageTableWalker<'_, M> {
    type Item = LeafMapping;

    fn next(&mut self) -> Option<LeafMapping> {
        loop {
            // Deepest level first: resume inside the current PT, if any.
            if let Some(pt) = self.pt.as_mut() {
                if let Some((index, entry)) = pt.next_present() {
                    let address = pt.entry_address(index);
                    return Some(self.normal_leaf(index, entry, address));
                }
                self.pt = None;
                continue;
            }

            if let Some(pd) = self.pd.as_mut() {
                if let Some((index, entry)) = pd.next_present() {
                    let address = pd.entry_address(index);
                    if entry.large_page() {
                        return Some(self.large_leaf(index, entry, address));
                    }
                    if let Some(child) = self.child_table("PT", entry) {
                        self.pde = PathEntry {
                            entry,
                            address,
                            index,
                        };
                        self.pt = Some(child);
                    }
                    continue;
                }
                self.pd = None;
                continue;
            }

            if let Some(pdpt) = self.pdpt.as_mut() {
                if let Some((index, entry)) = pdpt.next_present() {
                    let address = pdpt.entry_address(index);
                    if entry.large_page() {
                        return Some(self.huge_leaf(index, entry, address));
                    }
                    if let Some(child) = self.child_table("PD", entry) {
                        self.pdpte = PathEntry {
                            entry,
                            address,
                            index,
                        };
                        self.pd = Some(child);
                    }
                    continue;
                }
                self.pdpt = None;
                continue;
            }

            // PS is reserved on PML4 entries; never a leaf at this level.
            let (index, entry) = self.pml4.next_present()?;
            let address = self.pml4.entry_address(index);
            if let Some(child) = self.child_table("PDPT", entry) {
                self.pml4e = PathEntry {
                    entry,
                    address,
                    index,
                };
                self.pdpt = Some(child);
            }
        }
    }
}
