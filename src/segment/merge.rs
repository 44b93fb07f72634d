//! K-way merge of sealed segments into one new segment.
//!
//! Deleted documents are dropped for good: the merged postings contain only
//! live documents, remapped into a dense target id space. Each source gets
//! a doc base equal to the sum of the live counts of the sources before it,
//! and a surviving document lands at `base + live_ordinal`. Term doc
//! frequencies shrink accordingly, and terms whose postings vanish entirely
//! are not written at all.
//!
//! Sources are never modified; on any failure the partially written target
//! files are removed and the sources remain authoritative.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::StorageConfig;
use crate::directory::Directory;
use crate::error::{Result, VellumError};
use crate::segment::reader::SegmentReader;
use crate::segment::term_dict::TermEnum;
use crate::segment::types::{
    dict_file, dict_index_file, postings_file, DocId, SegmentId, SegmentMeta, Term,
};
use crate::segment::writer::SegmentWriter;

/// A planned merge: which segments to fold into which target id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergeSpec {
    pub sources: Vec<SegmentId>,
    pub target: SegmentId,
}

impl MergeSpec {
    pub fn new(sources: Vec<SegmentId>, target: SegmentId) -> Self {
        Self { sources, target }
    }

    /// Whether two merges touch any common segment.
    pub fn overlaps(&self, other: &MergeSpec) -> bool {
        self.sources.iter().any(|id| other.sources.contains(id))
            || self.target == other.target
    }
}

pub struct SegmentMerger<'a> {
    dir: &'a dyn Directory,
    config: &'a StorageConfig,
}

impl<'a> SegmentMerger<'a> {
    pub fn new(dir: &'a dyn Directory, config: &'a StorageConfig) -> Self {
        Self { dir, config }
    }

    /// Merge `sources` into a new segment `target`. The source readers
    /// pin the exact live-doc views the merge folds in.
    pub fn merge(
        &self,
        sources: &[Arc<SegmentReader>],
        target: SegmentId,
    ) -> Result<SegmentMeta> {
        if sources.is_empty() {
            return Err(VellumError::InvalidConfig(
                "merge needs at least one source segment".to_string(),
            ));
        }

        let mut writer = SegmentWriter::new(self.dir, target, self.config)?;
        let doc_count = match Self::write_merged(&mut writer, sources) {
            Ok(count) => count,
            Err(e) => {
                writer.abort();
                self.remove_partial_target(target);
                return Err(e);
            }
        };
        match writer.seal(doc_count) {
            Ok(meta) => {
                info!(
                    target = %target,
                    sources = sources.len(),
                    doc_count,
                    "merged segments"
                );
                Ok(meta)
            }
            Err(e) => {
                self.remove_partial_target(target);
                Err(e)
            }
        }
    }

    fn write_merged(
        writer: &mut SegmentWriter<'_>,
        sources: &[Arc<SegmentReader>],
    ) -> Result<u32> {
        // Doc base per source: live documents of everything before it.
        let mut doc_bases = Vec::with_capacity(sources.len());
        let mut total_live = 0u32;
        for source in sources {
            doc_bases.push(total_live);
            total_live += source.live_count();
        }

        let mut cursors: Vec<TermEnum> = sources.iter().map(|s| s.terms()).collect();
        let mut pending: Vec<Option<Term>> = vec![None; sources.len()];
        // Min-heap over (term key, source index).
        let mut heap: BinaryHeap<Reverse<(Vec<u8>, usize)>> = BinaryHeap::new();
        for (i, cursor) in cursors.iter_mut().enumerate() {
            if let Some((term, _)) = cursor.next()? {
                heap.push(Reverse((term.to_key(), i)));
                pending[i] = Some(term);
            }
        }

        let mut merged: Vec<(DocId, u32)> = Vec::new();
        while let Some(Reverse((key, first))) = heap.pop() {
            // Gather every source positioned at this term.
            let mut holders = vec![first];
            while let Some(Reverse((next_key, _))) = heap.peek() {
                if *next_key != key {
                    break;
                }
                let Some(Reverse((_, idx))) = heap.pop() else {
                    break;
                };
                holders.push(idx);
            }
            // Source order gives ascending remapped doc ids.
            holders.sort_unstable();

            let term = pending[holders[0]]
                .take()
                .unwrap_or_else(|| unreachable!("heap entry without pending term"));

            merged.clear();
            for &idx in &holders {
                let source = &sources[idx];
                let live = source.live_docs();
                let base = doc_bases[idx];
                let Some(mut postings) = source.postings(&term)? else {
                    return Err(VellumError::corrupt(
                        dict_file(source.meta().id),
                        "enumerated term missing from dictionary",
                    ));
                };
                while let Some(doc) = postings.next_doc()? {
                    if let Some(ordinal) = live.live_ordinal(doc) {
                        merged.push((DocId(base + ordinal), postings.freq()));
                    }
                }
            }
            // A term all of whose documents were deleted vanishes.
            if !merged.is_empty() {
                writer.write_term(&term, &merged)?;
            }

            for &idx in &holders {
                if let Some((next, _)) = cursors[idx].next()? {
                    heap.push(Reverse((next.to_key(), idx)));
                    pending[idx] = Some(next);
                }
            }
        }

        Ok(total_live)
    }

    /// Best-effort removal of a failed merge's target files.
    fn remove_partial_target(&self, target: SegmentId) {
        for name in [dict_file(target), dict_index_file(target), postings_file(target)] {
            match self.dir.delete_file(&name) {
                Ok(()) | Err(VellumError::FileNotFound(_)) => {}
                Err(e) => warn!(file = %name, error = %e, "leaving partial merge file behind"),
            }
        }
    }
}
