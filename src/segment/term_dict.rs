//! Term dictionary: a sorted, prefix-compressed stream of
//! `(term, TermInfo)` entries plus an in-memory sampled index.
//!
//! Every `index_interval`-th entry restarts prefix compression with a full
//! key and absolute pointers, and is mirrored into the `.tii` sidecar file
//! together with its byte offset in the `.tis` stream. A reader loads the
//! sidecar (optionally thinned by `index_divisor`), binary-searches it for
//! the greatest sample at or below the wanted term, seeks the main stream
//! to that sample, and scans forward.
//!
//! Lookups retain their scan cursor: in-order lookups that stay within the
//! current index block skip the binary search and continue the scan, which
//! makes ordered enumeration (e.g. during a merge) O(1) amortized per term.

use crate::directory::{Directory, IndexInput};
use crate::error::{Result, VellumError};
use crate::segment::codec::{self, FileHeader};
use crate::segment::types::{dict_file, dict_index_file, SegmentId, Term, TermInfo};

/// Fixed byte size of the segment file header (see `codec::write_header`).
const HEADER_LEN: u64 = 20;
/// The u64 count slot written right after the header.
const COUNT_SLOT: u64 = HEADER_LEN;

fn common_prefix(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

/// Streams sorted dictionary entries into the `.tis`/`.tii` outputs.
///
/// Both outputs must already carry a file header and a zeroed u64 count
/// slot; `finish` patches the counts in. Terms must be added in strictly
/// increasing key order.
pub struct TermDictionaryWriter {
    index_interval: u32,
    skip_interval: u32,
    count: u64,
    sample_count: u64,
    prev_key: Vec<u8>,
    prev_postings_ptr: u64,
}

impl TermDictionaryWriter {
    pub fn new(index_interval: u32, skip_interval: u32) -> Self {
        Self {
            index_interval,
            skip_interval,
            count: 0,
            sample_count: 0,
            prev_key: Vec::new(),
            prev_postings_ptr: 0,
        }
    }

    pub fn add(
        &mut self,
        tis: &mut crate::directory::IndexOutput,
        tii: &mut crate::directory::IndexOutput,
        term: &Term,
        info: TermInfo,
    ) -> Result<()> {
        let key = term.to_key();
        if self.count > 0 && key <= self.prev_key {
            return Err(VellumError::corrupt(
                tis.name(),
                format!("terms out of order at entry {}", self.count),
            ));
        }

        let at_index_point = self.count % self.index_interval as u64 == 0;
        if at_index_point {
            let offset = tis.position();
            tii.write_vint(key.len() as u32);
            tii.write_bytes(&key);
            tii.write_vint(info.doc_freq);
            tii.write_vlong(info.postings_ptr);
            tii.write_vlong(info.skip_ptr);
            tii.write_vlong(offset);
            self.sample_count += 1;
        }

        // Index points restart compression so a scan can begin there.
        let prefix = if at_index_point {
            0
        } else {
            common_prefix(&self.prev_key, &key)
        };
        tis.write_vint(prefix as u32);
        tis.write_vint((key.len() - prefix) as u32);
        tis.write_bytes(&key[prefix..]);
        tis.write_vint(info.doc_freq);
        if at_index_point {
            tis.write_vlong(info.postings_ptr);
        } else {
            tis.write_vlong(info.postings_ptr - self.prev_postings_ptr);
        }
        if info.doc_freq >= self.skip_interval {
            tis.write_vlong(info.skip_ptr - info.postings_ptr);
        }

        self.prev_key = key;
        self.prev_postings_ptr = info.postings_ptr;
        self.count += 1;
        Ok(())
    }

    pub fn term_count(&self) -> u64 {
        self.count
    }

    /// Patch the entry counts into both count slots.
    pub fn finish(
        self,
        tis: &mut crate::directory::IndexOutput,
        tii: &mut crate::directory::IndexOutput,
    ) {
        tis.patch_u64(COUNT_SLOT, self.count);
        tii.patch_u64(COUNT_SLOT, self.sample_count);
    }
}

/// One sampled index entry held in memory.
#[derive(Clone, Debug)]
struct Sample {
    key: Vec<u8>,
    info: TermInfo,
    /// Byte offset of the full-key entry in the `.tis` stream.
    offset: u64,
    /// Dictionary ordinal of that entry.
    ordinal: u64,
}

/// Decode cursor over the `.tis` entry stream.
#[derive(Clone)]
struct TermCursor {
    input: IndexInput,
    data_end: u64,
    index_interval: u32,
    skip_interval: u32,
    term_count: u64,
    /// Ordinal of the next entry to decode.
    ordinal: u64,
    key: Vec<u8>,
    info: TermInfo,
    /// Whether `key`/`info` hold the most recently decoded entry.
    valid: bool,
}

impl TermCursor {
    /// Position the cursor at a sampled entry.
    fn seek_sample(&mut self, sample: &Sample) -> Result<()> {
        self.input.seek(sample.offset)?;
        self.ordinal = sample.ordinal;
        self.key.clear();
        self.info = TermInfo::default();
        self.valid = false;
        Ok(())
    }

    /// Decode the next entry, or `None` past the last one.
    fn next(&mut self) -> Result<bool> {
        if self.ordinal >= self.term_count {
            self.valid = false;
            return Ok(false);
        }
        if self.input.position() >= self.data_end {
            return Err(VellumError::corrupt(
                self.input.name(),
                format!("dictionary truncated at entry {}", self.ordinal),
            ));
        }
        let at_index_point = self.ordinal % self.index_interval as u64 == 0;

        let prefix = self.input.read_vint()? as usize;
        let suffix_len = self.input.read_vint()? as usize;
        if prefix > self.key.len() || (at_index_point && prefix != 0) {
            return Err(VellumError::corrupt(
                self.input.name(),
                format!("bad prefix length at entry {}", self.ordinal),
            ));
        }
        self.key.truncate(prefix);
        let suffix = self.input.read_bytes(suffix_len)?;
        self.key.extend_from_slice(&suffix);

        let doc_freq = self.input.read_vint()?;
        let postings_ptr = if at_index_point {
            self.input.read_vlong()?
        } else {
            self.info.postings_ptr + self.input.read_vlong()?
        };
        let skip_ptr = if doc_freq >= self.skip_interval {
            postings_ptr + self.input.read_vlong()?
        } else {
            0
        };

        self.info = TermInfo {
            doc_freq,
            postings_ptr,
            skip_ptr,
        };
        self.ordinal += 1;
        self.valid = true;
        Ok(true)
    }
}

/// Per-segment term dictionary reader.
///
/// Not shareable across threads without external exclusion: `lookup`
/// mutates the scan cursor. Open one reader per consuming thread; they all
/// share the underlying file buffers.
pub struct TermDictionaryReader {
    header: FileHeader,
    samples: Vec<Sample>,
    cursor: TermCursor,
    /// Sample block the cursor currently scans, if any.
    current_sample: Option<usize>,
}

impl std::fmt::Debug for TermDictionaryReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TermDictionaryReader").finish_non_exhaustive()
    }
}

impl TermDictionaryReader {
    /// Open the dictionary of `segment`, thinning the sampled index by
    /// `index_divisor` (>= 1, fixed for the life of the reader).
    pub fn open(dir: &dyn Directory, segment: SegmentId, index_divisor: u32) -> Result<Self> {
        if index_divisor == 0 {
            return Err(VellumError::InvalidConfig(
                "index_divisor must be >= 1".to_string(),
            ));
        }

        let mut tis = dir.open_input(&dict_file(segment))?;
        let tis_end = codec::verify_footer(&tis)?;
        let header = codec::read_header(&mut tis)?;
        let term_count = tis.read_u64()?;

        let mut tii = dir.open_input(&dict_index_file(segment))?;
        let tii_end = codec::verify_footer(&tii)?;
        let tii_header = codec::read_header(&mut tii)?;
        if tii_header != header {
            return Err(VellumError::corrupt(
                tii.name(),
                "dictionary and index headers disagree",
            ));
        }
        let sample_count = tii.read_u64()?;

        let mut samples = Vec::new();
        for i in 0..sample_count {
            if tii.position() >= tii_end {
                return Err(VellumError::corrupt(tii.name(), "sampled index truncated"));
            }
            let key_len = tii.read_vint()? as usize;
            let key = tii.read_bytes(key_len)?;
            let info = TermInfo {
                doc_freq: tii.read_vint()?,
                postings_ptr: tii.read_vlong()?,
                skip_ptr: tii.read_vlong()?,
            };
            let offset = tii.read_vlong()?;
            // Keep every index_divisor-th sample.
            if i % index_divisor as u64 == 0 {
                samples.push(Sample {
                    key,
                    info,
                    offset,
                    ordinal: i * header.index_interval as u64,
                });
            }
        }

        let cursor = TermCursor {
            input: tis,
            data_end: tis_end,
            index_interval: header.index_interval,
            skip_interval: header.skip_interval,
            term_count,
            ordinal: term_count, // parked past the end until first seek
            key: Vec::new(),
            info: TermInfo::default(),
            valid: false,
        };

        Ok(Self {
            header,
            samples,
            cursor,
            current_sample: None,
        })
    }

    pub fn term_count(&self) -> u64 {
        self.cursor.term_count
    }

    pub fn is_empty(&self) -> bool {
        self.cursor.term_count == 0
    }

    /// Format parameters the segment was written with.
    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    /// Greatest sample <= `key`, or `None` when `key` precedes the first
    /// sample. An exact sample hit is reported separately so the caller
    /// can return it without scanning.
    fn find_sample(&self, key: &[u8]) -> Option<(usize, bool)> {
        match self.samples.binary_search_by(|s| s.key.as_slice().cmp(key)) {
            Ok(idx) => Some((idx, true)),
            Err(0) => None,
            Err(idx) => Some((idx - 1, false)),
        }
    }

    /// Look up a term's [`TermInfo`].
    pub fn lookup(&mut self, term: &Term) -> Result<Option<TermInfo>> {
        if self.is_empty() {
            return Ok(None);
        }
        let key = term.to_key();

        // In-order fast path: when the cursor already sits at or behind the
        // target inside the block that must hold it (below the next sample,
        // or past the last one), continue the scan without consulting the
        // samples at all.
        let resume = match self.current_sample {
            Some(idx) if self.cursor.valid && self.cursor.key.as_slice() <= key.as_slice() => {
                match self.samples.get(idx + 1) {
                    Some(next) => key.as_slice() < next.key.as_slice(),
                    None => true,
                }
            }
            _ => false,
        };

        if !resume {
            let Some((sample_idx, exact)) = self.find_sample(&key) else {
                return Ok(None);
            };
            if exact {
                return Ok(Some(self.samples[sample_idx].info));
            }
            self.cursor.seek_sample(&self.samples[sample_idx])?;
            self.current_sample = Some(sample_idx);
        } else if self.cursor.key == key {
            return Ok(Some(self.cursor.info));
        }

        while self.cursor.next()? {
            if self.cursor.key == key {
                return Ok(Some(self.cursor.info));
            }
            if self.cursor.key.as_slice() > key.as_slice() {
                return Ok(None);
            }
        }
        Ok(None)
    }

    /// An independent reader over the same file buffers, with a fresh
    /// lookup cursor.
    pub(crate) fn fork(&self) -> Self {
        let mut cursor = self.cursor.clone();
        cursor.ordinal = self.cursor.term_count;
        cursor.key.clear();
        cursor.info = TermInfo::default();
        cursor.valid = false;
        Self {
            header: self.header,
            samples: self.samples.clone(),
            cursor,
            current_sample: None,
        }
    }

    /// Ordered enumeration of the whole dictionary, independent of the
    /// lookup cursor.
    pub fn terms(&self) -> TermEnum {
        let mut cursor = self.cursor.clone();
        cursor.ordinal = 0;
        cursor.key.clear();
        cursor.info = TermInfo::default();
        cursor.valid = false;
        // Entry 0 sits right after the count slot.
        let start = HEADER_LEN + 8;
        TermEnum { cursor, start }
    }
}

/// Forward-only iterator over `(Term, TermInfo)` pairs in dictionary order.
pub struct TermEnum {
    cursor: TermCursor,
    start: u64,
}

impl TermEnum {
    pub fn next(&mut self) -> Result<Option<(Term, TermInfo)>> {
        if self.cursor.ordinal == 0 && !self.cursor.valid {
            self.cursor.input.seek(self.start)?;
        }
        if !self.cursor.next()? {
            return Ok(None);
        }
        let term = Term::from_key(&self.cursor.key).ok_or_else(|| {
            VellumError::corrupt(self.cursor.input.name(), "malformed term key")
        })?;
        Ok(Some((term, self.cursor.info)))
    }
}
