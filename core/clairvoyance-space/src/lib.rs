//! # Address-Space Reconstruction
//!
//! Rebuilds the full x86-64 virtual address space of a process from a crash
//! dump's physical memory view and flattens it into a record a viewer can
//! render with a Hilbert curve.
//!
//! ## Pipeline
//!
//! ```text
//! dump ──► PageTableWalker ──► LeafMapping stream ──► TapeBuilder ──► record
//!              (walker)          (ascending VA)      (tape+regions)  (emitter)
//! ```
//!
//! - [`walker::PageTableWalker`] lazily enumerates every present leaf
//!   mapping under a directory base, in ascending virtual-address order,
//!   tolerating directory pages the dump does not contain.
//! - [`protection::Protection`] folds the permission bits along each walk
//!   path into one of nine effective classes.
//! - [`tape::TapeBuilder`] expands super-pages into 4 KiB pixels, fills
//!   bounded holes, and tracks contiguous virtual runs as
//!   [`tape::Region`]s.
//! - [`record`] serializes the result into the line-oriented text format
//!   the viewer consumes, and parses it back for reverse lookups.
//!
//! The dump itself stays behind the [`PhysicalMemory`] trait: the core
//! borrows 4 KiB page views and never copies or writes page data. A whole
//! run is single-threaded and streaming; memory use is bounded by the tape
//! plus a handful of page-sized borrows.

pub mod protection;
pub mod record;
pub mod tape;
pub mod walker;

use clairvoyance_paging::PhysicalAddress;
pub use clairvoyance_paging::{PAGE_SIZE, Page};

use crate::tape::AddressSpaceMap;
use crate::walker::PageTableWalker;

/// Read-only physical-memory view a crash dump exposes to the walker.
///
/// Implementations hand out stable borrows of 4 KiB pages for their own
/// lifetime; sparse dumps return `None` for pages they do not contain.
pub trait PhysicalMemory {
    /// The 4 KiB page at physical address `pa`, if the dump contains it.
    ///
    /// `pa` is expected to be page-aligned; this is how page-table links
    /// and the directory base address pages.
    fn physical_page(&self, pa: PhysicalAddress) -> Option<&Page>;

    /// The dump's declared root PML4 physical address (the CR3 analogue).
    fn directory_table_base(&self) -> PhysicalAddress;

    /// What flavor of dump this is. Informational; non-[`Full`](DumpKind::Full)
    /// dumps may hide mappings.
    fn dump_kind(&self) -> DumpKind;
}

/// Flavor of the dump backing a [`PhysicalMemory`] view.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DumpKind {
    /// Complete physical memory.
    Full,
    /// Kernel-only memory; user pages are typically absent.
    Kernel,
    /// Bitmap dump; sparse physical coverage.
    Bmp,
}

impl core::fmt::Display for DumpKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            Self::Full => "full",
            Self::Kernel => "kernel",
            Self::Bmp => "bitmap",
        };
        f.write_str(name)
    }
}

/// Fatal reconstruction failures.
///
/// Interior missing pages and oversized gaps are recovered locally (one
/// diagnostic line each) and never surface here.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SpaceError {
    /// The requested directory base has no mapped PML4 page; the walk
    /// cannot start.
    #[error("no physical page is mapped at directory base {0}")]
    RootMissing(PhysicalAddress),
}

/// Walk the hierarchy rooted at `directory_base` and flatten it into a
/// tape-and-regions map, streaming leaf by leaf.
///
/// ### Errors
/// - [`SpaceError::RootMissing`] when the dump does not contain the root
///   PML4 page.
pub fn reconstruct<M: PhysicalMemory + ?Sized>(
    memory: &M,
    directory_base: PhysicalAddress,
) -> Result<AddressSpaceMap, SpaceError> {
    let walker = PageTableWalker::new(memory, directory_base)?;
    Ok(AddressSpaceMap::assemble(walker))
}
