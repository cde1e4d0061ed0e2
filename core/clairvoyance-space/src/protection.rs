//! Folding per-level permission bits into one effective class.
//!
//! Hardware access checks take the minimum of the User and Write bits
//! across the walk and the maximum of No-Execute. Folding the up-to-four
//! entries of a [`LeafMapping`] accordingly yields one of eight effective
//! permissions; the ninth class, [`Protection::None`], marks gap filler
//! pixels and is never produced by the fold itself.

use crate::walker::LeafMapping;
use clairvoyance_paging::PageKind;
use core::fmt;

/// Effective access protection of one 4 KiB pixel.
///
/// The discriminants are the stable wire encoding used by the record
/// format; they must not be reordered.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Protection {
    /// Gap filler: no mapping behind this pixel.
    None = 0,
    UserRead = 1,
    UserReadExec = 2,
    UserReadWrite = 3,
    UserReadWriteExec = 4,
    KernelRead = 5,
    KernelReadExec = 6,
    KernelReadWrite = 7,
    KernelReadWriteExec = 8,
}

impl Protection {
    /// Effective protection of a leaf, folded over the levels its walk
    /// actually used.
    ///
    /// A level is used iff the level above it is not marking a super-page:
    /// PML4E and PDPTE always participate, the PDE only below a
    /// non-[`Huge`](PageKind::Huge) leaf, the PTE only for
    /// [`Normal`](PageKind::Normal) leaves.
    #[must_use]
    pub fn fold(leaf: &LeafMapping) -> Self {
        let mut user = leaf.pml4e.user_accessible() && leaf.pdpte.user_accessible();
        let mut write = leaf.pml4e.write() && leaf.pdpte.write();
        let mut no_execute = leaf.pml4e.no_execute() || leaf.pdpte.no_execute();

        if !matches!(leaf.kind, PageKind::Huge) {
            user &= leaf.pde.user_accessible();
            write &= leaf.pde.write();
            no_execute |= leaf.pde.no_execute();
        }
        if matches!(leaf.kind, PageKind::Normal) {
            user &= leaf.pte.user_accessible();
            write &= leaf.pte.write();
            no_execute |= leaf.pte.no_execute();
        }

        Self::from_flags(user, write, !no_execute)
    }

    /// Map `(user, writable, executable)` to the matching non-`None` class.
    #[must_use]
    pub const fn from_flags(user: bool, write: bool, execute: bool) -> Self {
        match (user, write, execute) {
            (true, false, false) => Self::UserRead,
            (true, false, true) => Self::UserReadExec,
            (true, true, false) => Self::UserReadWrite,
            (true, true, true) => Self::UserReadWriteExec,
            (false, false, false) => Self::KernelRead,
            (false, false, true) => Self::KernelReadExec,
            (false, true, false) => Self::KernelReadWrite,
            (false, true, true) => Self::KernelReadWriteExec,
        }
    }

    /// Stable wire ordinal, `0..=8`.
    #[inline]
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Inverse of [`as_u8`](Self::as_u8); `None` for values above 8.
    #[must_use]
    pub const fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::None),
            1 => Some(Self::UserRead),
            2 => Some(Self::UserReadExec),
            3 => Some(Self::UserReadWrite),
            4 => Some(Self::UserReadWriteExec),
            5 => Some(Self::KernelRead),
            6 => Some(Self::KernelReadExec),
            7 => Some(Self::KernelReadWrite),
            8 => Some(Self::KernelReadWriteExec),
            _ => None,
        }
    }
}

impl fmt::Display for Protection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "-",
            Self::UserRead => "UR",
            Self::UserReadExec => "URX",
            Self::UserReadWrite => "URW",
            Self::UserReadWriteExec => "URWX",
            Self::KernelRead => "KR",
            Self::KernelReadExec => "KRX",
            Self::KernelReadWrite => "KRW",
            Self::KernelReadWriteExec => "KRWX",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::walker::LeafMapping;
    use clairvoyance_paging::{PageKind, PageTableEntry, PhysicalAddress, VirtualAddress};

    fn entry(user: bool, write: bool, nx: bool) -> PageTableEntry {
        PageTableEntry::new()
            .with_present(true)
            .with_user_accessible(user)
            .with_write(write)
            .with_no_execute(nx)
    }

    fn leaf(kind: PageKind, entries: [PageTableEntry; 4]) -> LeafMapping {
        let [pml4e, pdpte, pde, pte] = entries;
        LeafMapping {
            pml4e,
            pml4e_address: PhysicalAddress::zero(),
            pdpte,
            pdpte_address: PhysicalAddress::zero(),
            pde,
            pde_address: PhysicalAddress::zero(),
            pte,
            pte_address: PhysicalAddress::zero(),
            physical_base: PhysicalAddress::zero(),
            virtual_base: VirtualAddress::new(),
            kind,
        }
    }

    #[test]
    fn uniform_paths_fold_to_themselves() {
        let open = entry(true, true, false);
        let l = leaf(PageKind::Normal, [open, open, open, open]);
        assert_eq!(Protection::fold(&l), Protection::UserReadWriteExec);

        let locked = entry(false, false, true);
        let l = leaf(PageKind::Normal, [locked, locked, locked, locked]);
        assert_eq!(Protection::fold(&l), Protection::KernelRead);
    }

    #[test]
    fn any_supervisor_level_makes_it_kernel() {
        let open = entry(true, true, false);
        let kernel = entry(false, true, false);
        for slot in 0..4 {
            let mut entries = [open; 4];
            entries[slot] = kernel;
            let l = leaf(PageKind::Normal, entries);
            assert_eq!(
                Protection::fold(&l),
                Protection::KernelReadWriteExec,
                "supervisor bit at level {slot}"
            );
        }
    }

    #[test]
    fn any_nx_level_strips_exec() {
        let open = entry(true, true, false);
        let nx = entry(true, true, true);
        for slot in 0..4 {
            let mut entries = [open; 4];
            entries[slot] = nx;
            let l = leaf(PageKind::Normal, entries);
            assert_eq!(Protection::fold(&l), Protection::UserReadWrite);
        }
    }

    #[test]
    fn any_readonly_level_strips_write() {
        let open = entry(true, true, false);
        let ro = entry(true, false, false);
        for slot in 0..4 {
            let mut entries = [open; 4];
            entries[slot] = ro;
            let l = leaf(PageKind::Normal, entries);
            assert_eq!(Protection::fold(&l), Protection::UserReadExec);
        }
    }

    #[test]
    fn super_pages_ignore_deeper_levels() {
        let open = entry(true, true, false);
        let poison = entry(false, false, true);

        // Huge: only PML4E and PDPTE participate.
        let l = leaf(PageKind::Huge, [open, open, poison, poison]);
        assert_eq!(Protection::fold(&l), Protection::UserReadWriteExec);

        // Large: PTE is not consulted.
        let l = leaf(PageKind::Large, [open, open, open, poison]);
        assert_eq!(Protection::fold(&l), Protection::UserReadWriteExec);
    }

    #[test]
    fn ordinals_are_stable() {
        for v in 0..=8 {
            assert_eq!(Protection::from_u8(v).unwrap().as_u8(), v);
        }
        assert_eq!(Protection::from_u8(9), None);
        assert_eq!(Protection::UserReadWriteExec.as_u8(), 4);
        assert_eq!(Protection::KernelReadWrite.as_u8(), 7);
    }
}
