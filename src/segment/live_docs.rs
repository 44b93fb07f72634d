//! Live-document bitset for one segment.
//!
//! A sealed segment's postings are never rewritten; deletions only narrow
//! the set of live documents, and narrowing produces a new `LiveDocs` value
//! that backs a new logical reader view.

use roaring::RoaringBitmap;

use crate::directory::{IndexInput, IndexOutput};
use crate::error::{Result, VellumError};
use crate::segment::types::DocId;

/// Which of a segment's `doc_count` documents are still live.
#[derive(Clone, Debug)]
pub struct LiveDocs {
    doc_count: u32,
    deleted: RoaringBitmap,
}

impl LiveDocs {
    /// All documents live.
    pub fn all_live(doc_count: u32) -> Self {
        Self {
            doc_count,
            deleted: RoaringBitmap::new(),
        }
    }

    pub fn doc_count(&self) -> u32 {
        self.doc_count
    }

    pub fn live_count(&self) -> u32 {
        self.doc_count - self.deleted.len() as u32
    }

    pub fn deleted_count(&self) -> u32 {
        self.deleted.len() as u32
    }

    pub fn is_live(&self, doc: DocId) -> bool {
        doc.0 < self.doc_count && !self.deleted.contains(doc.0)
    }

    pub fn is_deleted(&self, doc: DocId) -> bool {
        self.deleted.contains(doc.0)
    }

    pub fn has_deletions(&self) -> bool {
        !self.deleted.is_empty()
    }

    /// A narrowed copy with `docs` additionally deleted. The receiver is
    /// untouched; existing readers keep their view.
    pub fn with_deleted<I: IntoIterator<Item = DocId>>(&self, docs: I) -> Self {
        let mut next = self.clone();
        for doc in docs {
            if doc.0 < next.doc_count {
                next.deleted.insert(doc.0);
            }
        }
        next
    }

    /// Position of a live document among the segment's live documents, in
    /// doc-id order. Used by merges to remap surviving documents into a
    /// contiguous target space. Deleted documents have no position.
    pub fn live_ordinal(&self, doc: DocId) -> Option<u32> {
        if !self.is_live(doc) {
            return None;
        }
        // rank() counts set bits <= doc; doc itself is not deleted here.
        let deleted_before = self.deleted.rank(doc.0) as u32;
        Some(doc.0 - deleted_before)
    }

    pub fn write_to(&self, out: &mut IndexOutput) -> Result<()> {
        out.write_u32(self.doc_count);
        let mut bytes = Vec::new();
        self.deleted
            .serialize_into(&mut bytes)
            .map_err(|e| VellumError::corrupt(out.name(), format!("bitmap encode: {}", e)))?;
        out.write_vint(bytes.len() as u32);
        out.write_bytes(&bytes);
        Ok(())
    }

    pub fn read_from(input: &mut IndexInput) -> Result<Self> {
        let doc_count = input.read_u32()?;
        let len = input.read_vint()? as usize;
        let bytes = input.read_bytes(len)?;
        let deleted = RoaringBitmap::deserialize_from(&bytes[..])
            .map_err(|e| VellumError::corrupt(input.name(), format!("bitmap decode: {}", e)))?;
        if deleted.len() > doc_count as u64 {
            return Err(VellumError::corrupt(
                input.name(),
                "more deletions than documents",
            ));
        }
        Ok(Self { doc_count, deleted })
    }
}
