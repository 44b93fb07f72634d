//! Immutable index segments: on-disk format, sealing, reading and merging.

pub mod buffer;
pub mod codec;
pub mod live_docs;
pub mod merge;
pub mod postings;
pub mod reader;
pub mod skiplist;
pub mod term_dict;
pub mod types;
pub mod writer;

pub use buffer::WriteBuffer;
pub use live_docs::LiveDocs;
pub use merge::{MergeSpec, SegmentMerger};
pub use postings::PostingsIterator;
pub use reader::SegmentReader;
pub use types::{DocId, SegmentId, SegmentMeta, Term, TermInfo};
pub use writer::SegmentWriter;
