//! Interleaved multi-level skip list over a term's postings.
//!
//! Level 0 holds one entry every `skip_interval` documents; level k one
//! entry every `skip_interval^(k+1)`. Each entry records the last document
//! of the skipped span and the resume offset into the term's doc stream
//! (relative to the stream start). Entries at level > 0 also record the
//! child-level resume offset so a reader can descend.
//!
//! On disk the levels are written top-down, each prefixed with its byte
//! length, after a leading level count.

use crate::directory::{IndexInput, IndexOutput};
use crate::error::{Result, VellumError};

/// How many levels a skip list for `doc_freq` documents carries.
pub fn num_skip_levels(doc_freq: u32, skip_interval: u32, max_levels: u32) -> u32 {
    let mut levels = 1;
    let mut df = doc_freq / skip_interval;
    while levels < max_levels && df >= skip_interval {
        levels += 1;
        df /= skip_interval;
    }
    levels
}

/// Buffers skip entries while a term's postings are being written.
pub struct SkipListWriter {
    skip_interval: u32,
    num_levels: u32,
    buffers: Vec<LevelBuffer>,
}

struct LevelBuffer {
    bytes: Vec<u8>,
    last_doc: u32,
    last_ptr: u64,
}

impl LevelBuffer {
    fn new() -> Self {
        Self {
            bytes: Vec::new(),
            last_doc: 0,
            last_ptr: 0,
        }
    }

    fn write_vlong(&mut self, mut v: u64) {
        loop {
            let byte = (v & 0x7F) as u8;
            v >>= 7;
            if v == 0 {
                self.bytes.push(byte);
                break;
            }
            self.bytes.push(byte | 0x80);
        }
    }
}

impl SkipListWriter {
    /// `doc_freq` is the final document frequency of the term, known up
    /// front by both flush (buffer counts) and merge (computed first).
    pub fn new(skip_interval: u32, max_levels: u32, doc_freq: u32) -> Self {
        let num_levels = num_skip_levels(doc_freq, skip_interval, max_levels);
        Self {
            skip_interval,
            num_levels,
            buffers: (0..num_levels).map(|_| LevelBuffer::new()).collect(),
        }
    }

    /// Record a skip point. `doc` is the last document written so far,
    /// `stream_pos` the current offset in the term's doc stream, and
    /// `doc_count` the number of documents written (a multiple of
    /// `skip_interval`).
    pub fn buffer_skip(&mut self, doc: u32, stream_pos: u64, doc_count: u32) {
        debug_assert!(doc_count % self.skip_interval == 0);

        // How many levels this skip point reaches.
        let mut entry_levels = 1;
        let mut n = doc_count / self.skip_interval;
        while entry_levels < self.num_levels && n % self.skip_interval == 0 {
            entry_levels += 1;
            n /= self.skip_interval;
        }

        // Lower levels first so a parent can point past its child's entry
        // for the same skip point.
        let mut child_pos = 0u64;
        for level in 0..entry_levels as usize {
            let doc_delta = doc - self.buffers[level].last_doc;
            let ptr_delta = stream_pos - self.buffers[level].last_ptr;
            let buf = &mut self.buffers[level];
            buf.write_vlong(doc_delta as u64);
            buf.write_vlong(ptr_delta);
            if level > 0 {
                buf.write_vlong(child_pos);
            }
            buf.last_doc = doc;
            buf.last_ptr = stream_pos;
            child_pos = self.buffers[level].bytes.len() as u64;
        }
    }

    /// Emit the buffered levels, top-down. Returns the number of bytes
    /// written (zero when no skip point was ever buffered).
    pub fn write_to(&self, out: &mut IndexOutput) -> u64 {
        if self.buffers.iter().all(|b| b.bytes.is_empty()) {
            return 0;
        }
        let start = out.position();
        out.write_vint(self.num_levels);
        for level in (0..self.num_levels as usize).rev() {
            let bytes = &self.buffers[level].bytes;
            out.write_vlong(bytes.len() as u64);
            out.write_bytes(bytes);
        }
        out.position() - start
    }
}

/// Result of a skip: resume the doc stream at `stream_pos` with `doc` as
/// the delta base, `num_skipped` documents already consumed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SkipResult {
    pub doc: u32,
    pub stream_pos: u64,
    pub num_skipped: u32,
}

#[derive(Clone)]
struct LevelCursor {
    bytes: Vec<u8>,
    pos: usize,
    last_doc: u32,
    last_ptr: u64,
    num_skipped: u32,
    /// Next buffered entry, if any.
    next: Option<(u32, u64, u64)>,
}

impl LevelCursor {
    fn read_vlong(&mut self, file: &str) -> Result<u64> {
        let mut result: u64 = 0;
        let mut shift = 0;
        loop {
            let byte = *self
                .bytes
                .get(self.pos)
                .ok_or_else(|| VellumError::corrupt(file, "truncated skip entry"))?;
            self.pos += 1;
            result |= ((byte & 0x7F) as u64) << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
            if shift > 63 {
                return Err(VellumError::corrupt(file, "skip vlong too large"));
            }
        }
    }

    fn fill(&mut self, level: usize, file: &str) -> Result<()> {
        if self.next.is_some() || self.pos >= self.bytes.len() {
            return Ok(());
        }
        let doc_delta = self.read_vlong(file)? as u32;
        let ptr_delta = self.read_vlong(file)?;
        let child = if level > 0 { self.read_vlong(file)? } else { 0 };
        self.next = Some((self.last_doc + doc_delta, self.last_ptr + ptr_delta, child));
        Ok(())
    }
}

/// Reads a term's skip data and answers forward-seek queries.
///
/// Stateful and forward-only, like the postings iterator it serves.
#[derive(Clone)]
pub struct SkipListReader {
    skip_interval: u32,
    file: String,
    /// Index 0 = bottom level.
    levels: Vec<LevelCursor>,
}

impl SkipListReader {
    /// Load skip data from `input` positioned at the term's skip pointer.
    pub fn read_from(input: &mut IndexInput, skip_interval: u32, max_levels: u32) -> Result<Self> {
        let num_levels = input.read_vint()?;
        if num_levels == 0 || num_levels > max_levels {
            return Err(VellumError::corrupt(
                input.name(),
                format!("invalid skip level count {}", num_levels),
            ));
        }
        let mut levels = vec![
            LevelCursor {
                bytes: Vec::new(),
                pos: 0,
                last_doc: 0,
                last_ptr: 0,
                num_skipped: 0,
                next: None,
            };
            num_levels as usize
        ];
        // Stored top-down.
        for level in (0..num_levels as usize).rev() {
            let len = input.read_vlong()? as usize;
            levels[level].bytes = input.read_bytes(len)?;
        }
        Ok(Self {
            skip_interval,
            file: input.name().to_string(),
            levels,
        })
    }

    /// Documents covered by one entry at `level`.
    fn span(&self, level: usize) -> u32 {
        self.skip_interval.pow(level as u32 + 1)
    }

    /// Advance over every skip entry whose last document is below `target`
    /// and report where to resume the doc stream.
    pub fn skip_to(&mut self, target: u32) -> Result<SkipResult> {
        for level in (0..self.levels.len()).rev() {
            loop {
                self.levels[level].fill(level, &self.file)?;
                let Some((doc, ptr, child)) = self.levels[level].next else {
                    break;
                };
                if doc >= target {
                    break;
                }
                // Consume: everything up to `doc` is below the target.
                let span = self.span(level);
                let cursor = &mut self.levels[level];
                cursor.last_doc = doc;
                cursor.last_ptr = ptr;
                cursor.num_skipped += span;
                cursor.next = None;

                if level > 0 {
                    // Seed the child with this entry's resume point.
                    let (last_doc, last_ptr, num_skipped) =
                        (doc, ptr, self.levels[level].num_skipped);
                    let child_cursor = &mut self.levels[level - 1];
                    child_cursor.pos = child as usize;
                    child_cursor.last_doc = last_doc;
                    child_cursor.last_ptr = last_ptr;
                    child_cursor.num_skipped = num_skipped;
                    child_cursor.next = None;
                }
            }
        }
        let bottom = &self.levels[0];
        Ok(SkipResult {
            doc: bottom.last_doc,
            stream_pos: bottom.last_ptr,
            num_skipped: bottom.num_skipped,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn build_skip(doc_freq: u32, skip_interval: u32, max_levels: u32) -> SkipListReader {
        // Docs are 0, 2, 4, ...; stream position grows 3 bytes per doc.
        let mut writer = SkipListWriter::new(skip_interval, max_levels, doc_freq);
        for count in 1..=doc_freq {
            if count % skip_interval == 0 {
                let last_doc = (count - 1) * 2;
                writer.buffer_skip(last_doc, count as u64 * 3, count);
            }
        }
        let mut out = IndexOutput::new("s.pst".to_string(), false);
        let written = writer.write_to(&mut out);
        assert!(written > 0);
        let (name, buf) = out.into_parts();
        let mut input = IndexInput::new(name, Arc::new(buf));
        SkipListReader::read_from(&mut input, skip_interval, max_levels).unwrap()
    }

    #[test]
    fn test_num_skip_levels() {
        assert_eq!(num_skip_levels(15, 16, 10), 1);
        assert_eq!(num_skip_levels(16, 16, 10), 1);
        assert_eq!(num_skip_levels(255, 16, 10), 1);
        assert_eq!(num_skip_levels(256, 16, 10), 2);
        assert_eq!(num_skip_levels(4096, 16, 10), 3);
        assert_eq!(num_skip_levels(4096, 16, 2), 2);
    }

    #[test]
    fn test_skip_to_matches_manual_count() {
        let skip_interval = 4;
        let doc_freq = 64; // two levels at interval 4
        let mut reader = build_skip(doc_freq, skip_interval, 10);

        // Target doc 50 (doc ids are even, doc id = 2 * ordinal).
        let result = reader.skip_to(50).unwrap();
        // Every consumed entry ends below 50, so all skipped docs are < 50.
        assert!(result.doc < 50);
        assert_eq!(result.num_skipped % skip_interval, 0);
        // The skipped prefix must reach as close as the entry grid allows:
        // the next skip entry must not also be below the target.
        let next_entry_last_doc = (result.num_skipped + skip_interval - 1) * 2;
        assert!(next_entry_last_doc >= 50);
        // Stream position corresponds to the skipped doc count.
        assert_eq!(result.stream_pos, result.num_skipped as u64 * 3);
    }

    #[test]
    fn test_skip_to_past_end() {
        let mut reader = build_skip(32, 4, 10);
        let result = reader.skip_to(u32::MAX).unwrap();
        // All entries consumed.
        assert_eq!(result.num_skipped, 32);
        assert_eq!(result.doc, 62);
    }

    #[test]
    fn test_skip_to_before_first_entry() {
        let mut reader = build_skip(32, 4, 10);
        let result = reader.skip_to(0).unwrap();
        assert_eq!(result, SkipResult::default());
    }

    #[test]
    fn test_monotone_reuse() {
        let mut reader = build_skip(256, 4, 10);
        let first = reader.skip_to(100).unwrap();
        let second = reader.skip_to(300).unwrap();
        assert!(second.num_skipped >= first.num_skipped);
        assert!(second.doc < 300);
        let next_entry_last_doc = (second.num_skipped + 4 - 1) * 2;
        assert!(next_entry_last_doc >= 300);
    }

    #[test]
    fn test_empty_when_below_interval() {
        let writer = SkipListWriter::new(16, 10, 10);
        let mut out = IndexOutput::new("s.pst".to_string(), false);
        assert_eq!(writer.write_to(&mut out), 0);
    }
}
