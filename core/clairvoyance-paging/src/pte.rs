use crate::addresses::PhysicalAddress;
use bitfield_struct::bitfield;

/// A 64-bit x86-64 page-table entry, decoded from dump bytes.
///
/// One view covers all four levels (PML4E / PDPTE / PDE / PTE): the fields
/// are hardware positions, and which of them are meaningful depends on the
/// level the walk reads the entry at. In particular:
///
/// - [`large_page`](Self::large_page) (PS, bit 7) selects a 1 GiB leaf on a
///   PDPTE and a 2 MiB leaf on a PDE. It is **reserved on PML4 entries**
///   and must not be interpreted there; on a PTE, bit 7 is PAT.
/// - [`dirty`](Self::dirty) is meaningful on leaf entries only.
/// - Permission bits ([`write`](Self::write),
///   [`user_accessible`](Self::user_accessible),
///   [`no_execute`](Self::no_execute)) combine across the walk: access
///   takes the minimum of U and W over the levels used and the maximum of
///   NX.
///
/// The raw word is preserved verbatim; the accessors are views, so
/// `PageTableEntry::from_bits(x).into_bits() == x` for every `x`.
///
/// Reference: AMD APM / Intel SDM paging structures (x86-64).
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct PageTableEntry {
    /// **Present** (bit 0): valid entry if set.
    ///
    /// When clear, the entry is not present and every other field is
    /// software-defined; the walk treats such entries as absent.
    pub present: bool,

    /// **Writable** (bit 1): write permission.
    ///
    /// Intersects with the other levels' write bits along the walk.
    pub write: bool,

    /// **User/Supervisor** (bit 2): allow user-mode access if set.
    ///
    /// If clear anywhere along the walk, the mapping is supervisor-only.
    pub user_accessible: bool,

    /// **Page Write-Through** (PWT, bit 3): write-through caching policy.
    pub write_through: bool,

    /// **Page Cache Disable** (PCD, bit 4): disable caching if set.
    pub cache_disable: bool,

    /// **Accessed** (A, bit 5): set by the CPU on first access.
    pub accessed: bool,

    /// **Dirty** (D, bit 6): set by the CPU on first write (leaf only).
    pub dirty: bool,

    /// **Page Size** (PS, bit 7): large-leaf selector on PDPTE/PDE.
    ///
    /// Reserved on PML4 entries; PAT on 4 KiB PTEs. The walker only
    /// consults this bit at the PDPT and PD levels.
    pub large_page: bool,

    /// **OS-available** (bits 8..11): not interpreted by hardware.
    ///
    /// Covers the Global bit position (bit 8), which an offline walk has no
    /// use for.
    #[bits(4)]
    pub available: u8,

    /// **Page frame number** (bits 12..47): physical page index.
    ///
    /// Physical address = PFN × 4096; see
    /// [`page_frame_base`](Self::page_frame_base).
    #[bits(36)]
    pub page_frame_number: u64,

    /// Reserved for hardware (bits 48..51): must be 0.
    #[bits(4)]
    pub reserved_for_hardware: u8,

    /// Reserved for software (bits 52..62): not interpreted by hardware.
    #[bits(11)]
    pub reserved_for_software: u16,

    /// **No-Execute** (NX, bit 63 / XD on Intel).
    ///
    /// When set, instruction fetch is disallowed through this entry
    /// (permission union applies across the walk).
    pub no_execute: bool,
}

impl PageTableEntry {
    /// Physical base address encoded by the entry: PFN × 4096.
    ///
    /// - **Non-leaf**: next-level table base (4 KiB-aligned).
    /// - **Leaf**: page base. Super-page bases keep their low PFN bits
    ///   clear, so the same product applies at every level.
    #[inline]
    #[must_use]
    pub const fn page_frame_base(self) -> PhysicalAddress {
        PhysicalAddress::new(self.page_frame_number() << 12)
    }
}
