//! Adapter between the dump parser and the reconstruction core.
//!
//! [`DumpView`] reads the parsed dump's physical pages through the
//! [`PhysicalMemory`] trait. The page index is built once up front.

use clairvoyance_paging::{Page, PhysicalAddress};
use clairvoyance_space::{DumpKind, PhysicalMemory};
use kdmp_parser::{Gxa, KernelDumpParser};
use std::collections::HashMap;

/// Map key for a guest physical address; `Gxa` carries the raw accessor.
fn page_key(gpa: impl Gxa) -> u64 {
    gpa.u64()
}

/// Physical-memory view over a parsed kernel crash dump.
pub struct DumpView {
    pages: HashMap<u64, Page>,
    directory_table_base: PhysicalAddress,
    kind: DumpKind,
}

impl DumpView {
    #[must_use]
    pub fn new(parser: &KernelDumpParser) -> Self {
        let mut pages = HashMap::new();
        for (gpa, _) in parser.physmem() {
            let mut page: Page = [0u8; 4096];
            if parser.phys_read_exact(gpa, &mut page).is_ok() {
                pages.insert(page_key(gpa), page);
            }
        }

        // The header's DTB can carry PCID bits in its low 12 bits.
        let dtb = parser.headers().directory_table_base & !0xFFF;

        let kind = match parser.dump_type() {
            kdmp_parser::DumpType::Full => DumpKind::Full,
            kdmp_parser::DumpType::Bmp => DumpKind::Bmp,
            _ => DumpKind::Kernel,
        };

        Self {
            pages,
            directory_table_base: PhysicalAddress::new(dtb),
            kind,
        }
    }

    /// Number of physical pages the dump contains.
    #[must_use]
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }
}

impl PhysicalMemory for DumpView {
    fn physical_page(&self, pa: PhysicalAddress) -> Option<&Page> {
        self.pages.get(&pa.as_u64())
    }

    fn directory_table_base(&self) -> PhysicalAddress {
        self.directory_table_base
    }

    fn dump_kind(&self) -> DumpKind {
        self.kind
    }
}
