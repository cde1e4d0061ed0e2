//! Flattening the leaf stream into a tape and its region table.
//!
//! The tape is one [`Protection`] value per 4 KiB virtual page, indexed by
//! Hilbert distance. Regions track maximal runs of consecutive pages whose
//! distances are contiguous, so a viewer can map any distance back to a
//! virtual address with one subtraction.
//!
//! Holes between leaves are filled with [`Protection::None`] pixels up to
//! [`MAX_GAP_PIXELS`]; a hole larger than that closes the current region
//! and opens a new one at the next leaf. Nothing is emitted before the
//! first leaf or after the last, so an address space that starts with a
//! gap starts its first region at the first present page.

use crate::protection::Protection;
use crate::walker::LeafMapping;
use clairvoyance_paging::{PAGE_SIZE, VirtualAddress};
use log::warn;

/// Upper bound on filler pixels spent on a single gap.
pub const MAX_GAP_PIXELS: u64 = 10_000;

/// A maximal run of consecutive 4 KiB pages with contiguous distances.
///
/// A region's first distance is the previous region's `end_distance`
/// (region 0 starts at 0); `end_distance` is exclusive. For a distance `d`
/// inside the region, the virtual address is
/// `virtual_base + (d - start) × 4096`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Region {
    pub virtual_base: VirtualAddress,
    pub end_distance: u64,
}

/// The finished tape plus its region table.
///
/// Built once per run and immutable afterwards. Regions partition
/// `[0, tape.len())` exactly.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AddressSpaceMap {
    pub tape: Vec<Protection>,
    pub regions: Vec<Region>,
}

impl AddressSpaceMap {
    /// Drive a leaf stream to exhaustion and build the map from it.
    ///
    /// The stream is consumed lazily, one leaf at a time; nothing is
    /// buffered beyond the growing tape itself.
    #[must_use]
    pub fn assemble(leaves: impl IntoIterator<Item = LeafMapping>) -> Self {
        let mut builder = TapeBuilder::new();
        for leaf in leaves {
            builder.push(&leaf);
        }
        builder.finish()
    }

    /// Number of pixels on the tape.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.tape.len() as u64
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tape.is_empty()
    }

    /// Reverse-map a tape distance to the virtual address of its page.
    ///
    /// This is the viewer-side lookup: filler pixels resolve too, since
    /// their addresses inside a region are as meaningful as mapped ones.
    /// Returns `None` past the end of the tape.
    #[must_use]
    pub fn virtual_address_at(&self, distance: u64) -> Option<VirtualAddress> {
        if distance >= self.len() {
            return None;
        }
        let i = self
            .regions
            .partition_point(|region| region.end_distance <= distance);
        let region = self.regions.get(i)?;
        let start = i
            .checked_sub(1)
            .and_then(|prev| self.regions.get(prev))
            .map_or(0, |prev| prev.end_distance);
        Some(VirtualAddress::from_bits(
            region.virtual_base.as_u64() + (distance - start) * PAGE_SIZE,
        ))
    }
}

/// Streaming assembler for [`AddressSpaceMap`].
///
/// Feed leaves in ascending virtual-address order (the walker's output
/// order), then call [`finish`](Self::finish).
#[derive(Default)]
pub struct TapeBuilder {
    tape: Vec<Protection>,
    regions: Vec<Region>,
    /// Virtual address of the last pixel appended; `None` before the
    /// first leaf so a leading hole produces no filler.
    last_va: Option<u64>,
    /// Base of the currently open region, if any.
    region_base: Option<u64>,
}

impl TapeBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one leaf: close any hole before it, then expand it into
    /// per-page pixels of its folded protection.
    pub fn push(&mut self, leaf: &LeafMapping) {
        let protection = Protection::fold(leaf);
        let va = leaf.virtual_base.as_u64();
        debug_assert!(self.last_va.is_none_or(|last| va > last));

        if let Some(last) = self.last_va {
            let expected = last + PAGE_SIZE;
            if va != expected {
                self.fill_gap(expected, va);
            }
        }
        if self.region_base.is_none() {
            self.region_base = Some(va);
        }

        let pages = leaf.kind.pages();
        #[allow(clippy::cast_possible_truncation)]
        self.tape
            .extend(core::iter::repeat_n(protection, pages as usize));
        self.last_va = Some(va + (pages - 1) * PAGE_SIZE);
    }

    /// Close the final region and hand out the finished map.
    #[must_use]
    pub fn finish(mut self) -> AddressSpaceMap {
        self.close_region();
        AddressSpaceMap {
            tape: self.tape,
            regions: self.regions,
        }
    }

    /// Represent the hole `[from, to)` with filler pixels, bounded by
    /// [`MAX_GAP_PIXELS`]. An overflowing hole ends the current region;
    /// the caller then starts the next region at the upcoming leaf.
    fn fill_gap(&mut self, from: u64, to: u64) {
        let pages = (to - from) / PAGE_SIZE;
        let filled = pages.min(MAX_GAP_PIXELS);
        #[allow(clippy::cast_possible_truncation)]
        self.tape
            .extend(core::iter::repeat_n(Protection::None, filled as usize));
        self.last_va = Some(from + (filled - 1) * PAGE_SIZE);

        if pages > MAX_GAP_PIXELS {
            warn!(
                "gap of {pages} pages at {from:#018x}..{to:#018x} exceeds {MAX_GAP_PIXELS} filler pixels; closing the region"
            );
            self.close_region();
        }
    }

    fn close_region(&mut self) {
        if let Some(base) = self.region_base.take() {
            self.regions.push(Region {
                virtual_base: VirtualAddress::from_bits(base),
                end_distance: self.tape.len() as u64,
            });
        }
    }
}
