//! Read-only view over one sealed segment.
//!
//! A reader is opened against a [`SegmentMeta`] and never observes changes
//! made after it opened: postings files are immutable and deletions are
//! published as new live-docs generations backing new reader instances.
//! `with_live_docs` derives such a narrowed view without touching the files.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::StorageConfig;
use crate::directory::{Directory, IndexInput};
use crate::error::{Result, VellumError};
use crate::segment::codec::{self, FileHeader};
use crate::segment::live_docs::LiveDocs;
use crate::segment::postings::PostingsIterator;
use crate::segment::term_dict::{TermDictionaryReader, TermEnum};
use crate::segment::types::{live_docs_file, postings_file, SegmentMeta, Term, TermInfo};

pub struct SegmentReader {
    meta: SegmentMeta,
    header: FileHeader,
    /// Guarded because lookups move a scan cursor.
    dict: Mutex<TermDictionaryReader>,
    postings_input: IndexInput,
    live: Arc<LiveDocs>,
}

impl SegmentReader {
    /// Open the segment described by `meta`. Only `config.index_divisor`
    /// affects the view; format parameters come from the file headers.
    pub fn open(dir: &dyn Directory, meta: SegmentMeta, config: &StorageConfig) -> Result<Self> {
        let dict = TermDictionaryReader::open(dir, meta.id, config.index_divisor)?;

        let mut postings_input = dir.open_input(&postings_file(meta.id))?;
        codec::verify_footer(&postings_input)?;
        let header = codec::read_header(&mut postings_input)?;
        if header != *dict.header() {
            return Err(VellumError::corrupt(
                postings_input.name(),
                "postings and dictionary headers disagree",
            ));
        }

        let live = match meta.del_generation {
            Some(generation) => {
                let name = live_docs_file(meta.id, generation);
                let mut input = dir.open_input(&name)?;
                codec::verify_footer(&input)?;
                codec::read_header(&mut input)?;
                let live = LiveDocs::read_from(&mut input)?;
                if live.doc_count() != meta.doc_count {
                    return Err(VellumError::corrupt(
                        &name,
                        format!(
                            "live docs cover {} documents, segment has {}",
                            live.doc_count(),
                            meta.doc_count
                        ),
                    ));
                }
                live
            }
            None => LiveDocs::all_live(meta.doc_count),
        };

        Ok(Self {
            meta,
            header,
            dict: Mutex::new(dict),
            postings_input,
            live: Arc::new(live),
        })
    }

    pub fn meta(&self) -> SegmentMeta {
        self.meta
    }

    /// Documents the segment was sealed with, deletions included.
    pub fn doc_count(&self) -> u32 {
        self.meta.doc_count
    }

    pub fn live_count(&self) -> u32 {
        self.live.live_count()
    }

    pub fn live_docs(&self) -> &Arc<LiveDocs> {
        &self.live
    }

    pub fn has_deletions(&self) -> bool {
        self.live.has_deletions()
    }

    pub fn term_count(&self) -> u64 {
        self.dict.lock().term_count()
    }

    /// Per-term metadata, or `None` for an absent term. The doc frequency
    /// reported here counts deleted documents; only a merge shrinks it.
    pub fn term_info(&self, term: &Term) -> Result<Option<TermInfo>> {
        self.dict.lock().lookup(term)
    }

    /// Postings iterator for `term`, or `None` for an absent term. The
    /// iterator includes deleted documents; callers filter against
    /// [`SegmentReader::live_docs`].
    pub fn postings(&self, term: &Term) -> Result<Option<PostingsIterator>> {
        let Some(info) = self.term_info(term)? else {
            return Ok(None);
        };
        Ok(Some(PostingsIterator::new(
            self.postings_input.clone(),
            self.header,
            info,
        )?))
    }

    /// Ordered enumeration of every term in the segment.
    pub fn terms(&self) -> TermEnum {
        self.dict.lock().terms()
    }

    /// A sibling view of the same files with `live` as its live-doc set.
    /// The receiver keeps serving its own view.
    pub fn with_live_docs(&self, live: LiveDocs) -> Result<Self> {
        debug_assert_eq!(live.doc_count(), self.meta.doc_count);
        Ok(Self {
            meta: self.meta,
            header: self.header,
            dict: Mutex::new(self.dict.lock().fork()),
            postings_input: self.postings_input.clone(),
            live: Arc::new(live),
        })
    }

    /// Narrowed view whose live docs were persisted as `generation`.
    pub(crate) fn with_live_docs_generation(
        &self,
        live: LiveDocs,
        generation: u64,
    ) -> Result<Self> {
        let mut next = self.with_live_docs(live)?;
        next.meta.del_generation = Some(generation);
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::RamDirectory;
    use crate::segment::types::{DocId, SegmentId};
    use crate::segment::writer::SegmentWriter;

    fn config() -> StorageConfig {
        StorageConfig {
            index_interval: 2,
            skip_interval: 4,
            ..StorageConfig::default()
        }
    }

    fn small_segment(dir: &RamDirectory) -> SegmentMeta {
        let mut writer = SegmentWriter::new(dir, SegmentId::new(0), &config()).unwrap();
        writer
            .write_term(&Term::new("body", "apple"), &[(DocId(0), 1), (DocId(3), 2)])
            .unwrap();
        writer
            .write_term(&Term::new("body", "banana"), &[(DocId(1), 1)])
            .unwrap();
        writer.seal(4).unwrap()
    }

    #[test]
    fn test_term_info_and_postings() {
        let dir = RamDirectory::new().unwrap();
        let meta = small_segment(&dir);
        let reader = SegmentReader::open(&dir, meta, &config()).unwrap();

        assert_eq!(reader.term_count(), 2);
        let info = reader.term_info(&Term::new("body", "apple")).unwrap().unwrap();
        assert_eq!(info.doc_freq, 2);

        let mut iter = reader.postings(&Term::new("body", "apple")).unwrap().unwrap();
        assert_eq!(iter.next_doc().unwrap(), Some(DocId(0)));
        assert_eq!(iter.next_doc().unwrap(), Some(DocId(3)));
        assert_eq!(iter.freq(), 2);
        assert_eq!(iter.next_doc().unwrap(), None);

        assert!(reader.term_info(&Term::new("body", "zzz")).unwrap().is_none());
    }

    #[test]
    fn test_narrowed_view_leaves_original_untouched() {
        let dir = RamDirectory::new().unwrap();
        let meta = small_segment(&dir);
        let reader = SegmentReader::open(&dir, meta, &config()).unwrap();

        let narrowed = reader
            .with_live_docs(reader.live_docs().with_deleted([DocId(3)]))
            .unwrap();

        assert_eq!(reader.live_count(), 4);
        assert!(!reader.has_deletions());
        assert_eq!(narrowed.live_count(), 3);
        assert!(narrowed.live_docs().is_deleted(DocId(3)));

        // doc_freq is unaffected by deletions until a merge rewrites it.
        let info = narrowed.term_info(&Term::new("body", "apple")).unwrap().unwrap();
        assert_eq!(info.doc_freq, 2);
    }

    #[test]
    fn test_terms_enumeration() {
        let dir = RamDirectory::new().unwrap();
        let meta = small_segment(&dir);
        let reader = SegmentReader::open(&dir, meta, &config()).unwrap();

        let mut terms = reader.terms();
        let mut seen = Vec::new();
        while let Some((term, info)) = terms.next().unwrap() {
            seen.push((String::from_utf8(term.text).unwrap(), info.doc_freq));
        }
        assert_eq!(seen, vec![("apple".to_string(), 2), ("banana".to_string(), 1)]);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = RamDirectory::new().unwrap();
        let meta = SegmentMeta::new(SegmentId::new(9), 1);
        assert!(SegmentReader::open(&dir, meta, &config()).is_err());
    }
}
