//! Postings format: delta-encoded doc ids with per-document frequency,
//! plus per-term skip data for sub-linear forward seeking.
//!
//! Doc stream encoding per document: `vlong((delta << 1) | (freq == 1))`
//! with the shift done in 64 bits so the whole doc-id range encodes,
//! followed by `vlong(freq)` only when the frequency is not 1. Terms whose
//! document frequency reaches `skip_interval` carry a multi-level skip list
//! after their doc stream in the same file.

use crate::directory::{IndexInput, IndexOutput};
use crate::error::{Result, VellumError};
use crate::segment::codec::FileHeader;
use crate::segment::skiplist::{SkipListReader, SkipListWriter};
use crate::segment::types::{DocId, TermInfo};

/// Writes the postings of one segment, term by term.
///
/// Terms must be finished in dictionary order; within a term, documents
/// must be added with strictly increasing doc ids.
pub struct PostingsWriter {
    skip_interval: u32,
    max_skip_levels: u32,
    /// Doc stream of the term currently being written.
    stream: Vec<u8>,
    skip: Option<SkipListWriter>,
    last_doc: u32,
    count: u32,
    doc_freq: u32,
}

impl PostingsWriter {
    pub fn new(skip_interval: u32, max_skip_levels: u32) -> Self {
        Self {
            skip_interval,
            max_skip_levels,
            stream: Vec::new(),
            skip: None,
            last_doc: 0,
            count: 0,
            doc_freq: 0,
        }
    }

    /// Begin a term whose final document frequency is `doc_freq`.
    pub fn start_term(&mut self, doc_freq: u32) {
        self.stream.clear();
        self.skip = (doc_freq >= self.skip_interval)
            .then(|| SkipListWriter::new(self.skip_interval, self.max_skip_levels, doc_freq));
        self.last_doc = 0;
        self.count = 0;
        self.doc_freq = doc_freq;
    }

    /// Add one document occurrence. Ids must be strictly increasing.
    pub fn add_doc(&mut self, doc: DocId, freq: u32) {
        debug_assert!(self.count == 0 || doc.0 > self.last_doc);
        debug_assert!(freq > 0);

        let delta = doc.0 - if self.count == 0 { 0 } else { self.last_doc };
        // Deltas above 2^31 must not lose their top bit in the shift.
        let shifted = ((delta as u64) << 1) | u64::from(freq == 1);
        write_vlong(&mut self.stream, shifted);
        if freq != 1 {
            write_vlong(&mut self.stream, freq as u64);
        }

        self.last_doc = doc.0;
        self.count += 1;

        if let Some(skip) = &mut self.skip {
            if self.count % self.skip_interval == 0 {
                skip.buffer_skip(self.last_doc, self.stream.len() as u64, self.count);
            }
        }
    }

    /// Flush the term's doc stream and skip data to `out`, returning its
    /// immutable [`TermInfo`].
    pub fn finish_term(&mut self, out: &mut IndexOutput) -> TermInfo {
        debug_assert_eq!(self.count, self.doc_freq, "doc_freq mismatch at finish");

        let postings_ptr = out.position();
        out.write_bytes(&self.stream);

        let skip_ptr = match &self.skip {
            Some(skip) => {
                let pos = out.position();
                if skip.write_to(out) > 0 {
                    pos
                } else {
                    0
                }
            }
            None => 0,
        };

        TermInfo {
            doc_freq: self.doc_freq,
            postings_ptr,
            skip_ptr,
        }
    }
}

fn write_vlong(buf: &mut Vec<u8>, mut v: u64) {
    loop {
        let byte = (v & 0x7F) as u8;
        v >>= 7;
        if v == 0 {
            buf.push(byte);
            break;
        }
        buf.push(byte | 0x80);
    }
}

/// Single-pass iterator over one term's postings.
///
/// `freq` is valid only for the doc most recently returned by `next_doc`
/// or `skip_to`. The iterator is owned by exactly one consumer at a time;
/// cloning duplicates the cursor over the shared file buffer.
#[derive(Clone)]
pub struct PostingsIterator {
    input: IndexInput,
    header: FileHeader,
    postings_ptr: u64,
    skip_ptr: u64,
    doc_freq: u32,
    /// Documents decoded so far.
    read: u32,
    doc: u32,
    freq: u32,
    skip: Option<SkipListReader>,
}

impl PostingsIterator {
    /// `input` must be a cursor over the segment's postings file; `header`
    /// its parsed header (the writer's format parameters).
    pub fn new(input: IndexInput, header: FileHeader, info: TermInfo) -> Result<Self> {
        let mut iter = Self {
            input,
            header,
            postings_ptr: info.postings_ptr,
            skip_ptr: info.skip_ptr,
            doc_freq: info.doc_freq,
            read: 0,
            doc: 0,
            freq: 0,
            skip: None,
        };
        iter.input.seek(info.postings_ptr)?;
        Ok(iter)
    }

    pub fn doc_freq(&self) -> u32 {
        self.doc_freq
    }

    /// Frequency of the most recently returned document.
    pub fn freq(&self) -> u32 {
        self.freq
    }

    /// Decode the next document, or `None` at the end of the postings.
    pub fn next_doc(&mut self) -> Result<Option<DocId>> {
        if self.read == self.doc_freq {
            return Ok(None);
        }
        let shifted = self.input.read_vlong()?;
        if shifted >> 1 > u32::MAX as u64 {
            return Err(VellumError::corrupt(self.input.name(), "doc delta overflow"));
        }
        let delta = (shifted >> 1) as u32;
        self.doc = if self.read == 0 { delta } else { self.doc + delta };
        self.freq = if shifted & 1 == 1 {
            1
        } else {
            let f = self.input.read_vlong()? as u32;
            if f == 0 {
                return Err(VellumError::corrupt(self.input.name(), "zero term frequency"));
            }
            f
        };
        self.read += 1;
        Ok(Some(DocId(self.doc)))
    }

    /// Advance to the first document with id >= `target`, using skip data
    /// where it helps, then a linear scan of the remaining base postings.
    pub fn skip_to(&mut self, target: DocId) -> Result<Option<DocId>> {
        if self.read > 0 && self.doc >= target.0 {
            return Ok(Some(DocId(self.doc)));
        }

        if self.skip_ptr != 0 {
            if self.skip.is_none() {
                let mut skip_input = self.input.clone();
                skip_input.seek(self.skip_ptr)?;
                self.skip = Some(SkipListReader::read_from(
                    &mut skip_input,
                    self.header.skip_interval,
                    self.header.max_skip_levels,
                )?);
            }
            if let Some(skip) = &mut self.skip {
                let result = skip.skip_to(target.0)?;
                // Only jump if it moves the cursor forward.
                if result.num_skipped > self.read {
                    self.input.seek(self.postings_ptr + result.stream_pos)?;
                    self.read = result.num_skipped;
                    self.doc = result.doc;
                }
            }
        }

        while let Some(doc) = self.next_doc()? {
            if doc.0 >= target.0 {
                return Ok(Some(doc));
            }
        }
        Ok(None)
    }
}
