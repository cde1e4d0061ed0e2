//! The record file: serialization, parsing, and pixel lookups.
//!
//! The record is ASCII text, one token per line:
//!
//! ```text
//! <width> <height>     canvas header, both 2^order, order = ⌊log2(len)⌋/2
//! 0x<hex>              region header: the region's VirtualBase
//! <hex>                protection ordinal of the next pixel (no 0x prefix)
//! ```
//!
//! Region headers appear exactly at their start distance; pixel lines
//! advance the distance by one. The viewer paints pixel `d` at
//! `coord_of(order, d)` and leaves the canvas beyond the tape unpainted,
//! so re-parsing a record reproduces the `(tape, regions)` pair exactly.

use crate::protection::Protection;
use crate::tape::{AddressSpaceMap, Region};
use clairvoyance_hilbert::{MAX_ORDER, distance_of};
use clairvoyance_paging::VirtualAddress;
use std::io::{self, BufRead, Write};

/// Curve order for a tape of `len` pixels: `⌊log2(len)⌋ / 2`.
///
/// Up to three quarters of the canvas can stay unpainted when `len` is not
/// a power of four; the viewer only paints `len` pixels in curve order.
#[must_use]
pub fn curve_order(len: u64) -> u32 {
    len.max(1).ilog2() / 2
}

/// Serialize a map into the record format.
///
/// ### Errors
/// Forwards the first I/O error the writer reports.
pub fn write_record<W: Write>(map: &AddressSpaceMap, out: &mut W) -> io::Result<()> {
    let side = 1u64 << curve_order(map.len());
    writeln!(out, "{side} {side}")?;

    let mut regions = map.regions.iter();
    let mut next_start = 0u64;
    let mut next_region = regions.next();
    for (distance, protection) in map.tape.iter().enumerate() {
        if let Some(region) = next_region {
            if distance as u64 == next_start {
                writeln!(out, "0x{:x}", region.virtual_base.as_u64())?;
                next_start = region.end_distance;
                next_region = regions.next();
            }
        }
        writeln!(out, "{:x}", protection.as_u8())?;
    }
    Ok(())
}

/// A record read back from disk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedRecord {
    pub width: u64,
    pub height: u64,
    pub map: AddressSpaceMap,
}

impl ParsedRecord {
    /// Virtual address of the pixel at `(x, y)`, if that pixel is painted.
    ///
    /// Composes the Hilbert codec with the region table; `None` for
    /// coordinates past the tape or on a canvas too large for the codec.
    #[must_use]
    pub fn virtual_address_of_pixel(&self, x: u32, y: u32) -> Option<VirtualAddress> {
        if u64::from(x) >= self.width || u64::from(y) >= self.width {
            return None;
        }
        let distance = if self.width <= 1 {
            0
        } else {
            let order = self.width.ilog2();
            if order > MAX_ORDER {
                return None;
            }
            u64::from(distance_of(order, x, y))
        };
        self.map.virtual_address_at(distance)
    }
}

/// Failures while reading a record back.
#[derive(Debug, thiserror::Error)]
pub enum RecordParseError {
    #[error("record is empty")]
    MissingHeader,
    #[error("malformed canvas header {0:?}")]
    MalformedHeader(String),
    #[error("malformed region header {0:?}")]
    MalformedRegion(String),
    #[error("malformed protection value {0:?}")]
    MalformedProtection(String),
    #[error("protection ordinal {0} is out of range")]
    ProtectionOutOfRange(u8),
    #[error("pixel at distance {0} precedes any region header")]
    PixelBeforeRegion(u64),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Parse a record produced by [`write_record`].
///
/// ### Errors
/// Any malformed line, out-of-range protection ordinal, pixel without a
/// preceding region header, or reader I/O failure.
pub fn parse_record<R: BufRead>(input: R) -> Result<ParsedRecord, RecordParseError> {
    let mut lines = input.lines();
    let header = lines.next().ok_or(RecordParseError::MissingHeader)??;
    let mut dims = header.split_ascii_whitespace();
    let width = parse_dim(&mut dims, &header)?;
    let height = parse_dim(&mut dims, &header)?;
    if dims.next().is_some() {
        return Err(RecordParseError::MalformedHeader(header));
    }

    let mut tape = Vec::new();
    let mut regions: Vec<Region> = Vec::new();
    let mut open_region: Option<u64> = None;
    for line in lines {
        let line = line?;
        if let Some(hex) = line.strip_prefix("0x") {
            let base = u64::from_str_radix(hex, 16)
                .map_err(|_| RecordParseError::MalformedRegion(line.clone()))?;
            close_region(&mut regions, &mut open_region, tape.len() as u64);
            open_region = Some(base);
        } else {
            let ordinal = u8::from_str_radix(&line, 16)
                .map_err(|_| RecordParseError::MalformedProtection(line.clone()))?;
            let protection = Protection::from_u8(ordinal)
                .ok_or(RecordParseError::ProtectionOutOfRange(ordinal))?;
            if open_region.is_none() {
                return Err(RecordParseError::PixelBeforeRegion(tape.len() as u64));
            }
            tape.push(protection);
        }
    }
    close_region(&mut regions, &mut open_region, tape.len() as u64);

    Ok(ParsedRecord {
        width,
        height,
        map: AddressSpaceMap { tape, regions },
    })
}

fn parse_dim<'a>(
    dims: &mut impl Iterator<Item = &'a str>,
    header: &str,
) -> Result<u64, RecordParseError> {
    dims.next()
        .and_then(|token| token.parse().ok())
        .ok_or_else(|| RecordParseError::MalformedHeader(header.to_owned()))
}

fn close_region(regions: &mut Vec<Region>, open: &mut Option<u64>, end_distance: u64) {
    if let Some(base) = open.take() {
        regions.push(Region {
            virtual_base: VirtualAddress::from_bits(base),
            end_distance,
        });
    }
}
