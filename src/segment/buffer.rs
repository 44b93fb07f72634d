//! In-memory postings buffer for documents not yet sealed into a segment.
//!
//! Documents get dense ids in arrival order. The buffer keys postings by
//! term in a sorted map, so draining it into a segment writer is a single
//! in-order walk with no extra sort.

use std::collections::btree_map::BTreeMap;
use std::collections::HashMap;

use roaring::RoaringBitmap;

use crate::error::Result;
use crate::segment::types::{DocId, Term};
use crate::segment::writer::SegmentWriter;

pub struct WriteBuffer {
    postings: BTreeMap<Term, Vec<(DocId, u32)>>,
    doc_count: u32,
    /// Buffered ids dropped again by a term delete; compacted away at
    /// drain so the sealed segment has a dense id space.
    removed: RoaringBitmap,
    max_docs: u32,
}

impl WriteBuffer {
    pub fn new(max_docs: u32) -> Self {
        Self {
            postings: BTreeMap::new(),
            doc_count: 0,
            removed: RoaringBitmap::new(),
            max_docs,
        }
    }

    /// Buffer one document's terms, assigning it the next dense id.
    /// Repeated occurrences of a term within the document become its
    /// frequency.
    pub fn add_document<I>(&mut self, terms: I) -> DocId
    where
        I: IntoIterator<Item = Term>,
    {
        let doc = DocId(self.doc_count);
        self.doc_count += 1;

        let mut freqs: HashMap<Term, u32> = HashMap::new();
        for term in terms {
            *freqs.entry(term).or_insert(0) += 1;
        }
        for (term, freq) in freqs {
            self.postings.entry(term).or_default().push((doc, freq));
        }
        doc
    }

    pub fn doc_count(&self) -> u32 {
        self.doc_count
    }

    pub fn term_count(&self) -> usize {
        self.postings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc_count == 0
    }

    pub fn should_flush(&self) -> bool {
        self.doc_count >= self.max_docs
    }

    /// Buffered doc ids containing `term`, for turning term deletes into
    /// buffer drops before the affected documents ever reach a segment.
    pub fn docs_with_term(&self, term: &Term) -> Vec<DocId> {
        self.postings
            .get(term)
            .map(|p| p.iter().map(|&(doc, _)| doc).collect())
            .unwrap_or_default()
    }

    /// Remove buffered documents by id. Their postings entries disappear
    /// and the ids are compacted away when the buffer drains.
    pub fn remove_docs(&mut self, docs: &[DocId]) {
        if docs.is_empty() {
            return;
        }
        self.postings.retain(|_, entries| {
            entries.retain(|(doc, _)| !docs.contains(doc));
            !entries.is_empty()
        });
        for doc in docs {
            if doc.0 < self.doc_count {
                self.removed.insert(doc.0);
            }
        }
    }

    /// Drain the buffer into `writer`, returning the number of documents
    /// written. Removed ids are compacted out, so the segment's id space
    /// is dense. The buffer is empty afterwards.
    pub fn drain_into(&mut self, writer: &mut SegmentWriter<'_>) -> Result<u32> {
        let postings = std::mem::take(&mut self.postings);
        let doc_count = std::mem::replace(&mut self.doc_count, 0);
        let removed = std::mem::take(&mut self.removed);

        for (term, entries) in &postings {
            if removed.is_empty() {
                writer.write_term(term, entries)?;
            } else {
                // rank() counts removed ids <= doc; surviving entries are
                // never themselves removed.
                let compacted: Vec<(DocId, u32)> = entries
                    .iter()
                    .map(|&(doc, freq)| (DocId(doc.0 - removed.rank(doc.0) as u32), freq))
                    .collect();
                writer.write_term(term, &compacted)?;
            }
        }
        Ok(doc_count - removed.len() as u32)
    }
}
