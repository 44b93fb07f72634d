//! Segment manifest: the single authoritative list of live segments.
//!
//! The manifest is rewritten as a whole on every commit and published
//! atomically through [`Directory::commit_output`], so a crash leaves
//! either the old or the new generation on disk, never a torn one.
//! Segment files referenced by neither generation are garbage and are
//! swept when a writer next opens the index.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::directory::Directory;
use crate::error::{Result, VellumError};
use crate::segment::codec;
use crate::segment::types::{SegmentId, SegmentMeta};

/// Name of the manifest file in the index directory.
pub const MANIFEST_FILE: &str = "segments.manifest";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SegmentManifest {
    /// Manifest format version.
    pub version: u32,
    /// Incremented on every committed change.
    pub generation: u64,
    /// Next segment id to allocate.
    pub next_segment_id: SegmentId,
    /// Live segments, oldest first.
    pub segments: Vec<SegmentMeta>,
}

impl SegmentManifest {
    pub const VERSION: u32 = 1;

    pub fn new() -> Self {
        Self {
            version: Self::VERSION,
            generation: 0,
            next_segment_id: SegmentId::new(0),
            segments: Vec::new(),
        }
    }

    pub fn allocate_segment_id(&mut self) -> SegmentId {
        let id = self.next_segment_id;
        self.next_segment_id = id.next();
        id
    }

    pub fn add_segment(&mut self, meta: SegmentMeta) {
        self.segments.push(meta);
    }

    pub fn remove_segment(&mut self, id: SegmentId) -> Option<SegmentMeta> {
        let pos = self.segments.iter().position(|m| m.id == id)?;
        Some(self.segments.remove(pos))
    }

    pub fn get_segment(&self, id: SegmentId) -> Option<&SegmentMeta> {
        self.segments.iter().find(|m| m.id == id)
    }

    /// Replace a merge's source segments with its target, keeping the
    /// target at the position of the oldest source.
    pub fn apply_merge(&mut self, sources: &[SegmentId], target: SegmentMeta) -> Result<()> {
        let first = self
            .segments
            .iter()
            .position(|m| sources.contains(&m.id))
            .ok_or_else(|| {
                VellumError::MergeAborted("no merge source is live in the manifest".to_string())
            })?;
        for id in sources {
            if self.remove_segment(*id).is_none() {
                return Err(VellumError::MergeAborted(format!(
                    "merge source {} is no longer live",
                    id
                )));
            }
        }
        self.segments.insert(first.min(self.segments.len()), target);
        Ok(())
    }

    /// Record a new live-docs generation for one segment.
    pub fn set_del_generation(&mut self, id: SegmentId, generation: u64) -> Result<()> {
        let meta = self
            .segments
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| {
                VellumError::InvalidConfig(format!("segment {} not in manifest", id))
            })?;
        meta.del_generation = Some(generation);
        Ok(())
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn total_doc_count(&self) -> u64 {
        self.segments.iter().map(|m| m.doc_count as u64).sum()
    }

    /// Load the manifest, or a fresh one when none has been committed.
    pub fn load(dir: &dyn Directory) -> Result<Self> {
        if !dir.exists(MANIFEST_FILE)? {
            return Ok(Self::new());
        }
        let input = dir.open_input(MANIFEST_FILE)?;
        let data_end = codec::verify_footer(&input)? as usize;
        let manifest: Self = bincode::deserialize(&input.as_bytes()[..data_end])?;
        if manifest.version != Self::VERSION {
            return Err(VellumError::corrupt(
                MANIFEST_FILE,
                format!("unsupported manifest version {}", manifest.version),
            ));
        }
        Ok(manifest)
    }

    /// Bump the generation and atomically replace the on-disk manifest.
    pub fn commit(&mut self, dir: &dyn Directory) -> Result<()> {
        self.generation += 1;
        let bytes = bincode::serialize(self)?;
        let mut out = dir.create_output_overwrite(MANIFEST_FILE)?;
        out.write_bytes(&bytes);
        codec::write_footer(&mut out);
        dir.commit_output(out)?;
        debug!(
            generation = self.generation,
            segments = self.segments.len(),
            "committed manifest"
        );
        Ok(())
    }
}

impl Default for SegmentManifest {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::RamDirectory;

    #[test]
    fn test_allocate_and_track() {
        let mut manifest = SegmentManifest::new();
        assert!(manifest.is_empty());

        let id = manifest.allocate_segment_id();
        assert_eq!(id, SegmentId::new(0));
        assert_eq!(manifest.allocate_segment_id(), SegmentId::new(1));

        manifest.add_segment(SegmentMeta::new(id, 10));
        assert_eq!(manifest.segment_count(), 1);
        assert_eq!(manifest.total_doc_count(), 10);
        assert!(manifest.get_segment(id).is_some());
    }

    #[test]
    fn test_commit_and_load_round_trip() {
        let dir = RamDirectory::new().unwrap();
        let mut manifest = SegmentManifest::new();
        let id = manifest.allocate_segment_id();
        manifest.add_segment(SegmentMeta::new(id, 42));
        manifest.commit(&dir).unwrap();
        assert_eq!(manifest.generation, 1);

        let loaded = SegmentManifest::load(&dir).unwrap();
        assert_eq!(loaded.generation, 1);
        assert_eq!(loaded.segment_count(), 1);
        assert_eq!(loaded.get_segment(id).unwrap().doc_count, 42);

        // A second commit replaces the file, not appends.
        manifest.commit(&dir).unwrap();
        let reloaded = SegmentManifest::load(&dir).unwrap();
        assert_eq!(reloaded.generation, 2);
    }

    #[test]
    fn test_load_missing_is_fresh() {
        let dir = RamDirectory::new().unwrap();
        let manifest = SegmentManifest::load(&dir).unwrap();
        assert!(manifest.is_empty());
        assert_eq!(manifest.generation, 0);
    }

    #[test]
    fn test_apply_merge_replaces_sources() {
        let mut manifest = SegmentManifest::new();
        let a = manifest.allocate_segment_id();
        let b = manifest.allocate_segment_id();
        let c = manifest.allocate_segment_id();
        manifest.add_segment(SegmentMeta::new(a, 5));
        manifest.add_segment(SegmentMeta::new(b, 5));
        manifest.add_segment(SegmentMeta::new(c, 5));

        let target = manifest.allocate_segment_id();
        manifest
            .apply_merge(&[a, b], SegmentMeta::new(target, 10))
            .unwrap();

        let ids: Vec<SegmentId> = manifest.segments.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![target, c]);

        // A source that is no longer live fails the merge commit.
        assert!(manifest
            .apply_merge(&[a], SegmentMeta::new(SegmentId::new(9), 1))
            .is_err());
    }

    #[test]
    fn test_corrupt_manifest_rejected() {
        let dir = RamDirectory::new().unwrap();
        let mut manifest = SegmentManifest::new();
        manifest.commit(&dir).unwrap();

        let data = dir.open_input(MANIFEST_FILE).unwrap();
        let mut bytes = data.as_bytes().to_vec();
        bytes[0] ^= 0xFF;
        let mut out = dir.create_output_overwrite(MANIFEST_FILE).unwrap();
        out.write_bytes(&bytes);
        dir.commit_output(out).unwrap();

        assert!(SegmentManifest::load(&dir).is_err());
    }
}
