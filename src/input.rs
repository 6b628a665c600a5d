//! File plumbing.
//!
//! The upstream staging step may hand this stage plain-text, gzip, or BGZF
//! (bgzip) files depending on where in the pipeline a chromosome's slice was
//! cut; all three are read transparently. BGZF is detected from the gzip
//! magic bytes plus the `BC` extra subfield and routed through
//! `noodles::bgzf`, standard gzip falls back to `flate2::MultiGzDecoder`.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Check if a file appears to be BGZF format by examining the header.
fn is_bgzf_file(path: &Path) -> bool {
    if let Ok(mut file) = File::open(path) {
        let mut header = [0u8; 18];
        if file.read_exact(&mut header).is_ok() {
            // gzip magic (0x1f 0x8b)
            if header[0] != 0x1f || header[1] != 0x8b {
                return false;
            }
            // FEXTRA flag (bit 2 of FLG byte at position 3)
            if header[3] & 0x04 == 0 {
                return false;
            }
            // "BC" subfield at position 12-13
            if header[12] == b'B' && header[13] == b'C' {
                return true;
            }
        }
    }
    false
}

/// Open a file and return a buffered reader, handling compression
/// transparently.
pub fn get_reader(path: &Path) -> Result<Box<dyn BufRead>> {
    let is_gz = path.extension().map(|ext| ext == "gz").unwrap_or(false);

    if is_gz {
        if is_bgzf_file(path) {
            let file = File::open(path)
                .with_context(|| format!("Failed to open BGZF file: {:?}", path))?;
            let bgzf_reader = noodles::bgzf::Reader::new(file);
            Ok(Box::new(BufReader::new(bgzf_reader)))
        } else {
            let file = File::open(path)
                .with_context(|| format!("Failed to open gzip file: {:?}", path))?;
            use flate2::read::MultiGzDecoder;
            Ok(Box::new(BufReader::new(MultiGzDecoder::new(file))))
        }
    } else {
        let file =
            File::open(path).with_context(|| format!("Failed to open file: {:?}", path))?;
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Create a buffered output file.
pub fn create_writer(path: &Path) -> Result<Box<dyn Write>> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create output file: {:?}", path))?;
    Ok(Box::new(BufWriter::new(file)))
}
