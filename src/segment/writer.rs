//! Seals a stream of sorted terms and their postings into an immutable
//! segment: `.tis` dictionary, `.tii` sampled index and `.pst` postings.
//!
//! The writer is incremental so both flush (draining an in-memory buffer)
//! and merge (streaming a k-way term union) feed it the same way: start a
//! term with its final doc frequency, add documents in order, finish the
//! term, repeat in dictionary order, then seal. Nothing is visible in the
//! directory until `seal` commits all three files.

use tracing::debug;

use crate::config::StorageConfig;
use crate::directory::{Directory, IndexOutput};
use crate::error::Result;
use crate::segment::codec::{self, FileHeader};
use crate::segment::postings::PostingsWriter;
use crate::segment::term_dict::TermDictionaryWriter;
use crate::segment::types::{
    dict_file, dict_index_file, postings_file, DocId, SegmentId, SegmentMeta, Term,
};

pub struct SegmentWriter<'a> {
    dir: &'a dyn Directory,
    id: SegmentId,
    tis: IndexOutput,
    tii: IndexOutput,
    pst: IndexOutput,
    dict: TermDictionaryWriter,
    postings: PostingsWriter,
    in_term: bool,
}

impl std::fmt::Debug for SegmentWriter<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentWriter")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl<'a> SegmentWriter<'a> {
    /// Reserve the segment's file names and write their headers. Fails if
    /// any of the names already exists.
    pub fn new(dir: &'a dyn Directory, id: SegmentId, config: &StorageConfig) -> Result<Self> {
        let header = FileHeader::new(
            config.index_interval,
            config.skip_interval,
            config.max_skip_levels,
        );

        let mut tis = dir.create_output(&dict_file(id))?;
        codec::write_header(&mut tis, &header);
        tis.write_u64(0); // term count, patched at seal

        let mut tii = match dir.create_output(&dict_index_file(id)) {
            Ok(out) => out,
            Err(e) => {
                dir.abort_output(tis);
                return Err(e);
            }
        };
        codec::write_header(&mut tii, &header);
        tii.write_u64(0); // sample count, patched at seal

        let mut pst = match dir.create_output(&postings_file(id)) {
            Ok(out) => out,
            Err(e) => {
                dir.abort_output(tis);
                dir.abort_output(tii);
                return Err(e);
            }
        };
        codec::write_header(&mut pst, &header);

        Ok(Self {
            dir,
            id,
            tis,
            tii,
            pst,
            dict: TermDictionaryWriter::new(config.index_interval, config.skip_interval),
            postings: PostingsWriter::new(config.skip_interval, config.max_skip_levels),
            in_term: false,
        })
    }

    pub fn id(&self) -> SegmentId {
        self.id
    }

    /// Begin a term whose final document frequency is `doc_freq`.
    pub fn start_term(&mut self, doc_freq: u32) {
        debug_assert!(!self.in_term);
        self.postings.start_term(doc_freq);
        self.in_term = true;
    }

    /// Add one document of the current term. Ids must be strictly
    /// increasing within the term.
    pub fn add_doc(&mut self, doc: DocId, freq: u32) {
        debug_assert!(self.in_term);
        self.postings.add_doc(doc, freq);
    }

    /// Flush the current term's postings and record its dictionary entry.
    /// Terms must arrive in strictly increasing key order.
    pub fn finish_term(&mut self, term: &Term) -> Result<()> {
        debug_assert!(self.in_term);
        let info = self.postings.finish_term(&mut self.pst);
        self.dict.add(&mut self.tis, &mut self.tii, term, info)?;
        self.in_term = false;
        Ok(())
    }

    /// Convenience for callers that already hold a term's full postings.
    pub fn write_term(&mut self, term: &Term, postings: &[(DocId, u32)]) -> Result<()> {
        self.start_term(postings.len() as u32);
        for &(doc, freq) in postings {
            self.add_doc(doc, freq);
        }
        self.finish_term(term)
    }

    /// Finish and atomically publish the segment's files.
    pub fn seal(mut self, doc_count: u32) -> Result<SegmentMeta> {
        debug_assert!(!self.in_term, "seal with an unfinished term");
        let term_count = self.dict.term_count();
        self.dict.finish(&mut self.tis, &mut self.tii);
        codec::write_footer(&mut self.tis);
        codec::write_footer(&mut self.tii);
        codec::write_footer(&mut self.pst);

        self.dir.commit_output(self.tis)?;
        self.dir.commit_output(self.tii)?;
        self.dir.commit_output(self.pst)?;

        debug!(
            segment = %self.id,
            doc_count,
            term_count,
            "sealed segment"
        );
        Ok(SegmentMeta::new(self.id, doc_count))
    }

    /// Discard the segment, releasing its file name reservations.
    pub fn abort(self) {
        self.dir.abort_output(self.tis);
        self.dir.abort_output(self.tii);
        self.dir.abort_output(self.pst);
    }
}
