//! Segment file framing: headers carrying the writer's format parameters
//! and CRC32 footers.
//!
//! Readers reproduce the exact `index_interval` / `skip_interval` /
//! `max_skip_levels` a segment was written with from its header, never from
//! external configuration. Any mismatch in magic, version, or checksum is a
//! corruption error, fatal for the affected file.

use crate::directory::{IndexInput, IndexOutput};
use crate::error::{Result, VellumError};

/// Magic bytes at the start of every segment file.
pub const MAGIC: u32 = 0x564C_4D31; // "VLM1"

/// Current file format version.
pub const FORMAT_VERSION: u32 = 1;

/// Format parameters persisted in every segment file header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileHeader {
    pub version: u32,
    pub index_interval: u32,
    pub skip_interval: u32,
    pub max_skip_levels: u32,
}

impl FileHeader {
    pub fn new(index_interval: u32, skip_interval: u32, max_skip_levels: u32) -> Self {
        Self {
            version: FORMAT_VERSION,
            index_interval,
            skip_interval,
            max_skip_levels,
        }
    }
}

pub fn write_header(out: &mut IndexOutput, header: &FileHeader) {
    out.write_u32(MAGIC);
    out.write_u32(header.version);
    out.write_u32(header.index_interval);
    out.write_u32(header.skip_interval);
    out.write_u32(header.max_skip_levels);
}

pub fn read_header(input: &mut IndexInput) -> Result<FileHeader> {
    let magic = input.read_u32()?;
    if magic != MAGIC {
        return Err(VellumError::corrupt(
            input.name(),
            format!("bad magic {:#010x}, expected {:#010x}", magic, MAGIC),
        ));
    }
    let version = input.read_u32()?;
    if version != FORMAT_VERSION {
        return Err(VellumError::corrupt(
            input.name(),
            format!("unsupported format version {}", version),
        ));
    }
    Ok(FileHeader {
        version,
        index_interval: input.read_u32()?,
        skip_interval: input.read_u32()?,
        max_skip_levels: input.read_u32()?,
    })
}

/// Append a CRC32 of everything written so far.
pub fn write_footer(out: &mut IndexOutput) {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(out.as_bytes());
    let crc = hasher.finalize();
    out.write_u32(crc);
}

/// Verify the trailing CRC32 and return the offset where the data region
/// ends (i.e. where the footer begins).
pub fn verify_footer(input: &IndexInput) -> Result<u64> {
    let total = input.as_bytes().len();
    if total < 4 {
        return Err(VellumError::corrupt(input.name(), "file too short for footer"));
    }
    let data_end = total - 4;
    let stored = u32::from_le_bytes([
        input.as_bytes()[data_end],
        input.as_bytes()[data_end + 1],
        input.as_bytes()[data_end + 2],
        input.as_bytes()[data_end + 3],
    ]);
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&input.as_bytes()[..data_end]);
    let actual = hasher.finalize();
    if stored != actual {
        return Err(VellumError::corrupt(
            input.name(),
            format!("checksum mismatch: stored {:#010x}, actual {:#010x}", stored, actual),
        ));
    }
    Ok(data_end as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn output() -> IndexOutput {
        IndexOutput::new("t.tis".to_string(), false)
    }

    fn input_of(out: IndexOutput) -> IndexInput {
        let (name, buf) = out.into_parts();
        IndexInput::new(name, Arc::new(buf))
    }

    #[test]
    fn test_header_round_trip() {
        let mut out = output();
        let header = FileHeader::new(128, 16, 10);
        write_header(&mut out, &header);
        let mut input = input_of(out);
        assert_eq!(read_header(&mut input).unwrap(), header);
    }

    #[test]
    fn test_bad_magic_is_corruption() {
        let mut out = output();
        out.write_u32(0xDEADBEEF);
        out.write_u32(FORMAT_VERSION);
        let mut input = input_of(out);
        assert!(matches!(
            read_header(&mut input).unwrap_err(),
            VellumError::Corruption { .. }
        ));
    }

    #[test]
    fn test_footer_detects_flipped_bit() {
        let mut out = output();
        write_header(&mut out, &FileHeader::new(128, 16, 10));
        out.write_vlong(999);
        write_footer(&mut out);

        let (name, mut buf) = out.into_parts();
        let input = IndexInput::new(name.clone(), Arc::new(buf.clone()));
        assert!(verify_footer(&input).is_ok());

        buf[8] ^= 0x01;
        let corrupt = IndexInput::new(name, Arc::new(buf));
        assert!(matches!(
            verify_footer(&corrupt).unwrap_err(),
            VellumError::Corruption { .. }
        ));
    }
}
