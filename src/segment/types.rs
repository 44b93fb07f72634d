//! Core types for the segment-based index

use std::fmt;

use serde::{Deserialize, Serialize};

/// Segment identifier (monotonically increasing per index)
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SegmentId(pub u64);

impl SegmentId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "segment_{}", self.0)
    }
}

/// Dense document id local to one segment (0..doc_count)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocId(pub u32);

impl DocId {
    pub fn new(n: u32) -> Self {
        Self(n)
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }

    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A term key: field name plus term bytes, ordered by field then text.
///
/// Field names are embedded in a NUL-separated composite sort key on disk,
/// so they must not contain NUL bytes.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Term {
    pub field: String,
    pub text: Vec<u8>,
}

impl Term {
    pub fn new(field: impl Into<String>, text: impl Into<Vec<u8>>) -> Self {
        let field = field.into();
        debug_assert!(!field.contains('\0'), "field names must be NUL-free");
        Self {
            field,
            text: text.into(),
        }
    }

    /// Composite key preserving `(field, text)` lexicographic order.
    pub fn to_key(&self) -> Vec<u8> {
        let mut key = Vec::with_capacity(self.field.len() + 1 + self.text.len());
        key.extend_from_slice(self.field.as_bytes());
        key.push(0);
        key.extend_from_slice(&self.text);
        key
    }

    /// Inverse of [`Term::to_key`].
    pub fn from_key(key: &[u8]) -> Option<Self> {
        let sep = key.iter().position(|&b| b == 0)?;
        let field = std::str::from_utf8(&key[..sep]).ok()?;
        Some(Self {
            field: field.to_string(),
            text: key[sep + 1..].to_vec(),
        })
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.field, String::from_utf8_lossy(&self.text))
    }
}

/// Per-term metadata stored in the term dictionary. Immutable once written.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermInfo {
    /// Number of documents containing the term.
    pub doc_freq: u32,
    /// Offset of the term's doc/freq stream in the postings file.
    pub postings_ptr: u64,
    /// Offset of the term's skip data in the postings file; 0 = none.
    pub skip_ptr: u64,
}

/// Manifest entry describing one sealed segment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentMeta {
    pub id: SegmentId,
    /// Documents the segment was sealed with, deletions included.
    pub doc_count: u32,
    /// Generation of the live-docs file, `None` while all documents are
    /// live and no `.del` file exists.
    pub del_generation: Option<u64>,
}

impl SegmentMeta {
    pub fn new(id: SegmentId, doc_count: u32) -> Self {
        Self {
            id,
            doc_count,
            del_generation: None,
        }
    }
}

/// File name helpers. One segment is four files: term dictionary (`tis`),
/// sampled dictionary index (`tii`), postings + skip data (`pst`) and the
/// live-document bitset (`del`).
pub fn dict_file(id: SegmentId) -> String {
    format!("{}.tis", id)
}

pub fn dict_index_file(id: SegmentId) -> String {
    format!("{}.tii", id)
}

pub fn postings_file(id: SegmentId) -> String {
    format!("{}.pst", id)
}

pub fn live_docs_file(id: SegmentId, generation: u64) -> String {
    format!("{}.{}.del", id, generation)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_id() {
        let id = SegmentId::new(42);
        assert_eq!(id.next().0, 43);
        assert_eq!(format!("{}", id), "segment_42");
        assert_eq!(dict_file(id), "segment_42.tis");
        assert_eq!(postings_file(id), "segment_42.pst");
        assert_eq!(live_docs_file(id, 2), "segment_42.2.del");
    }

    #[test]
    fn test_term_ordering() {
        let a = Term::new("body", "apple".as_bytes());
        let b = Term::new("body", "banana".as_bytes());
        let c = Term::new("title", "apple".as_bytes());
        assert!(a < b);
        assert!(b < c); // field ordering dominates

        // Key ordering must agree with struct ordering.
        assert!(a.to_key() < b.to_key());
        assert!(b.to_key() < c.to_key());
    }

    #[test]
    fn test_term_key_round_trip() {
        let term = Term::new("body", "cherry".as_bytes());
        let key = term.to_key();
        assert_eq!(Term::from_key(&key).unwrap(), term);
    }
}
