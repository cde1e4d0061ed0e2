//! Reconstruct a process's virtual address space from a Windows kernel
//! crash dump and emit the record the viewer renders.
//!
//! ```text
//! clairvoyance <dump-path> [<directory-base>]
//! ```
//!
//! The record lands in the current working directory as
//! `<dump-stem>-<directory-base-hex>.clairvoyance`.

mod dump;

use crate::dump::DumpView;
use clairvoyance_paging::PhysicalAddress;
use clairvoyance_space::record::{curve_order, write_record};
use clairvoyance_space::{DumpKind, PhysicalMemory, SpaceError, reconstruct};
use clap::Parser;
use kdmp_parser::KernelDumpParser;
use log::{error, info, warn};
use simplelog::{ColorChoice, Config, LevelFilter, TermLogger, TerminalMode};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

#[derive(Parser)]
#[command(about = "Map a crash dump's virtual address space onto a Hilbert curve")]
struct Args {
    /// Kernel crash dump to reconstruct (full dumps give complete pictures).
    dump_path: PathBuf,

    /// Directory base (root PML4 physical address) to walk instead of the
    /// dump's own; decimal, or hex with a 0x prefix.
    #[arg(value_parser = parse_directory_base)]
    directory_base: Option<u64>,
}

fn parse_directory_base(value: &str) -> Result<u64, String> {
    let parsed = value.strip_prefix("0x").map_or_else(
        || value.parse(),
        |hex| u64::from_str_radix(hex, 16),
    );
    parsed.map_err(|_| format!("`{value}` is not a 64-bit integer"))
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("failed to parse dump {path:?}: {reason:?}")]
    DumpOpen {
        path: PathBuf,
        reason: kdmp_parser::KdmpParserError,
    },
    #[error(transparent)]
    Space(#[from] SpaceError),
    #[error("failed to write record {path:?}: {reason}")]
    Write { path: PathBuf, reason: io::Error },
}

/// Record file name: `<dump-stem>-<directory-base-hex>.clairvoyance`.
fn record_name(dump_path: &Path, directory_base: PhysicalAddress) -> PathBuf {
    let stem = dump_path
        .file_stem()
        .map_or_else(|| "dump".into(), |s| s.to_string_lossy());
    PathBuf::from(format!(
        "{stem}-{:x}.clairvoyance",
        directory_base.as_u64()
    ))
}

fn run(args: &Args) -> Result<(), CliError> {
    let parser = KernelDumpParser::new(&args.dump_path).map_err(|reason| CliError::DumpOpen {
        path: args.dump_path.clone(),
        reason,
    })?;
    let view = DumpView::new(&parser);
    if view.dump_kind() != DumpKind::Full {
        warn!(
            "{} dump: not all physical memory is present, some mappings may be invisible",
            view.dump_kind()
        );
    }

    let directory_base = args
        .directory_base
        .map_or_else(|| view.directory_table_base(), PhysicalAddress::new);
    info!(
        "walking the hierarchy rooted at {directory_base} across {} physical pages",
        view.page_count()
    );

    let started = Instant::now();
    let map = reconstruct(&view, directory_base)?;

    let path = record_name(&args.dump_path, directory_base);
    let write = |path: &Path| -> io::Result<()> {
        let mut out = BufWriter::new(File::create(path)?);
        write_record(&map, &mut out)?;
        out.flush()
    };
    write(&path).map_err(|reason| CliError::Write {
        path: path.clone(),
        reason,
    })?;

    let side = 1u64 << curve_order(map.len());
    info!(
        "emitted {} pixels in {} regions on a {side}x{side} canvas to {} in {:.2?}",
        map.len(),
        map.regions.len(),
        path.display(),
        started.elapsed()
    );
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    let _ = TermLogger::init(
        LevelFilter::Info,
        Config::default(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    );

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_base_accepts_hex_and_decimal() {
        assert_eq!(parse_directory_base("0x1ab000"), Ok(0x1A_B000));
        assert_eq!(parse_directory_base("4096"), Ok(4096));
        assert!(parse_directory_base("0xzz").is_err());
        assert!(parse_directory_base("page").is_err());
    }

    #[test]
    fn record_name_is_stem_plus_base() {
        let name = record_name(
            Path::new("/tmp/mem.dmp"),
            PhysicalAddress::new(0x1A_D000),
        );
        assert_eq!(name, PathBuf::from("mem-1ad000.clairvoyance"));
    }
}
