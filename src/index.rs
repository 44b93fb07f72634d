//! Index writer and snapshot readers.
//!
//! One writer owns an index directory at a time, enforced by the directory
//! write lock. Readers work against a copy-on-write segment list published
//! through an [`ArcSwap`]: taking a reader is a single atomic load, and a
//! taken reader keeps serving the exact segment views it saw no matter how
//! many flushes, deletes or merges commit afterwards.
//!
//! All manifest mutations (flush, delete, merge commit) serialize on one
//! mutex and follow the same order: write new files, commit the manifest,
//! publish the new segment list, then drop obsolete files. A crash between
//! steps leaves unreferenced files which the next writer open sweeps.

use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::StorageConfig;
use crate::directory::{Directory, WriteLock};
use crate::error::{Result, VellumError};
use crate::manifest::{SegmentManifest, MANIFEST_FILE};
use crate::scheduler::{LogMergeFailures, MergeFailureHandler, MergeScheduler};
use crate::segment::buffer::WriteBuffer;
use crate::segment::codec::{self, FileHeader};
use crate::segment::live_docs::LiveDocs;
use crate::segment::merge::{MergeSpec, SegmentMerger};
use crate::segment::reader::SegmentReader;
use crate::segment::types::{
    dict_file, dict_index_file, live_docs_file, postings_file, DocId, SegmentId, SegmentMeta, Term,
};
use crate::segment::writer::SegmentWriter;

/// Name of the index-wide writer lock.
pub const WRITE_LOCK_NAME: &str = "write";

type SegmentList = Vec<Arc<SegmentReader>>;

struct IndexInner {
    dir: Arc<dyn Directory>,
    config: StorageConfig,
    buffer: Mutex<WriteBuffer>,
    /// Serializes every manifest mutation and segment list swap.
    manifest: Mutex<SegmentManifest>,
    segments: ArcSwap<SegmentList>,
    _lock: WriteLock,
}

impl IndexInner {
    fn publish(&self, segments: SegmentList) {
        self.segments.store(Arc::new(segments));
    }

    fn header(&self) -> FileHeader {
        FileHeader::new(
            self.config.index_interval,
            self.config.skip_interval,
            self.config.max_skip_levels,
        )
    }

    /// Write a live-docs generation file for one segment.
    fn persist_live_docs(
        &self,
        id: SegmentId,
        generation: u64,
        live: &LiveDocs,
    ) -> Result<()> {
        let name = live_docs_file(id, generation);
        let mut out = self.dir.create_output(&name)?;
        codec::write_header(&mut out, &self.header());
        live.write_to(&mut out)?;
        codec::write_footer(&mut out);
        self.dir.commit_output(out)
    }

    /// Best-effort deletion; a file pinned by an open reader stays behind
    /// for the next sweep.
    fn discard_file(&self, name: &str) {
        match self.dir.delete_file(name) {
            Ok(()) | Err(VellumError::FileNotFound(_)) => {}
            Err(VellumError::FileInUse(_)) => {
                debug!(file = name, "obsolete file still open, deferring delete");
            }
            Err(e) => warn!(file = name, error = %e, "failed to delete obsolete file"),
        }
    }

    fn discard_segment_files(&self, meta: &SegmentMeta) {
        self.discard_file(&dict_file(meta.id));
        self.discard_file(&dict_index_file(meta.id));
        self.discard_file(&postings_file(meta.id));
        if let Some(generation) = meta.del_generation {
            self.discard_file(&live_docs_file(meta.id, generation));
        }
    }

    /// Delete every file the manifest does not reference. Runs under the
    /// write lock, so no concurrent writer is producing new files.
    fn sweep_unreferenced(&self, manifest: &SegmentManifest) -> Result<()> {
        let mut referenced: Vec<String> = vec![MANIFEST_FILE.to_string()];
        for meta in &manifest.segments {
            referenced.push(dict_file(meta.id));
            referenced.push(dict_index_file(meta.id));
            referenced.push(postings_file(meta.id));
            if let Some(generation) = meta.del_generation {
                referenced.push(live_docs_file(meta.id, generation));
            }
        }
        for name in self.dir.list_files()? {
            if !referenced.contains(&name) {
                debug!(file = %name, "sweeping unreferenced file");
                self.discard_file(&name);
            }
        }
        Ok(())
    }

    /// Run one merge end to end: write the target segment, then commit it
    /// under the manifest lock, carrying over deletions that landed on the
    /// sources while the merge was running.
    fn run_merge(&self, spec: &MergeSpec) -> Result<()> {
        // Pin the source views the merge folds in.
        let segments = self.segments.load_full();
        let mut sources: Vec<Arc<SegmentReader>> = Vec::with_capacity(spec.sources.len());
        for reader in segments.iter() {
            if spec.sources.contains(&reader.meta().id) {
                sources.push(Arc::clone(reader));
            }
        }
        if sources.len() != spec.sources.len() {
            return Err(VellumError::MergeAborted(
                "a merge source is no longer live".to_string(),
            ));
        }

        let merger = SegmentMerger::new(self.dir.as_ref(), &self.config);
        let mut target_meta = merger.merge(&sources, spec.target)?;

        let remove_target = |e: VellumError| {
            self.discard_file(&dict_file(spec.target));
            self.discard_file(&dict_index_file(spec.target));
            self.discard_file(&postings_file(spec.target));
            e
        };

        let mut manifest = self.manifest.lock();
        let current = self.segments.load_full();

        // Deletions committed against a source after the merge pinned it
        // must survive in the target: a document live in the pinned view
        // but deleted now maps to `base + live_ordinal` in the target.
        let mut carried: Vec<DocId> = Vec::new();
        let mut base = 0u32;
        for pinned in &sources {
            let id = pinned.meta().id;
            let Some(now) = current.iter().find(|r| r.meta().id == id) else {
                return Err(remove_target(VellumError::MergeAborted(format!(
                    "merge source {} disappeared before commit",
                    id
                ))));
            };
            let pinned_live = pinned.live_docs();
            let now_live = now.live_docs();
            for doc in 0..pinned.doc_count() {
                let doc = DocId(doc);
                if pinned_live.is_live(doc) && !now_live.is_live(doc) {
                    // live_ordinal is Some for every pinned-live doc
                    if let Some(ordinal) = pinned_live.live_ordinal(doc) {
                        carried.push(DocId(base + ordinal));
                    }
                }
            }
            base += pinned.live_count();
        }

        if !carried.is_empty() {
            let live = LiveDocs::all_live(target_meta.doc_count).with_deleted(carried);
            self.persist_live_docs(spec.target, 0, &live)
                .map_err(|e| {
                    self.discard_file(&live_docs_file(spec.target, 0));
                    remove_target(e)
                })?;
            target_meta.del_generation = Some(0);
        }

        let mut next = manifest.clone();
        next.apply_merge(&spec.sources, target_meta)
            .and_then(|()| next.commit(self.dir.as_ref()))
            .map_err(|e| {
                if let Some(generation) = target_meta.del_generation {
                    self.discard_file(&live_docs_file(spec.target, generation));
                }
                remove_target(e)
            })?;
        *manifest = next;

        let target_reader = Arc::new(SegmentReader::open(
            self.dir.as_ref(),
            target_meta,
            &self.config,
        )?);

        let mut old_metas = Vec::new();
        let mut next_segments: SegmentList = Vec::with_capacity(current.len());
        let mut inserted = false;
        for reader in current.iter() {
            if spec.sources.contains(&reader.meta().id) {
                old_metas.push(reader.meta());
                if !inserted {
                    next_segments.push(Arc::clone(&target_reader));
                    inserted = true;
                }
            } else {
                next_segments.push(Arc::clone(reader));
            }
        }
        self.publish(next_segments);
        drop(manifest);

        for meta in &old_metas {
            self.discard_segment_files(meta);
        }
        Ok(())
    }
}

/// The single writer of an index directory.
pub struct IndexWriter {
    inner: Arc<IndexInner>,
    scheduler: MergeScheduler,
}

impl std::fmt::Debug for IndexWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexWriter").finish_non_exhaustive()
    }
}

impl IndexWriter {
    /// Open (or create) the index in `dir`, acquiring its write lock.
    pub fn open(dir: Arc<dyn Directory>, config: StorageConfig) -> Result<Self> {
        Self::open_with_handler(dir, config, Arc::new(LogMergeFailures))
    }

    /// Like [`IndexWriter::open`] with a custom merge failure handler.
    pub fn open_with_handler(
        dir: Arc<dyn Directory>,
        config: StorageConfig,
        handler: Arc<dyn MergeFailureHandler>,
    ) -> Result<Self> {
        config.validate()?;
        let lock = dir.obtain_lock(WRITE_LOCK_NAME)?.required()?;

        let manifest = SegmentManifest::load(dir.as_ref())?;
        let mut segments: SegmentList = Vec::with_capacity(manifest.segment_count());
        for meta in &manifest.segments {
            segments.push(Arc::new(SegmentReader::open(dir.as_ref(), *meta, &config)?));
        }
        info!(
            segments = segments.len(),
            generation = manifest.generation,
            "opened index"
        );

        let inner = Arc::new(IndexInner {
            buffer: Mutex::new(WriteBuffer::new(config.buffer_max_docs)),
            manifest: Mutex::new(manifest),
            segments: ArcSwap::from_pointee(segments),
            config: config.clone(),
            dir,
            _lock: lock,
        });
        // Files left behind by a crashed writer or an aborted merge.
        inner.sweep_unreferenced(&inner.manifest.lock())?;

        let scheduler = MergeScheduler::new(config.max_concurrent_merges, handler);
        Ok(Self { inner, scheduler })
    }

    /// Buffer one document; flushes automatically once the buffer is full.
    pub fn add_document<I>(&self, terms: I) -> Result<()>
    where
        I: IntoIterator<Item = Term>,
    {
        let should_flush = {
            let mut buffer = self.inner.buffer.lock();
            buffer.add_document(terms);
            buffer.should_flush()
        };
        if should_flush {
            self.flush()?;
        }
        Ok(())
    }

    /// Delete every document containing `term`, both buffered and sealed.
    /// Sealed segments keep their files; only their live-doc sets narrow,
    /// and already open readers are unaffected. Returns the number of
    /// documents deleted.
    pub fn delete_documents(&self, term: &Term) -> Result<u64> {
        let mut deleted = 0u64;
        {
            let mut buffer = self.inner.buffer.lock();
            let hits = buffer.docs_with_term(term);
            deleted += hits.len() as u64;
            buffer.remove_docs(&hits);
        }

        let mut manifest = self.inner.manifest.lock();
        let current = self.inner.segments.load_full();
        let mut next_segments: SegmentList = Vec::with_capacity(current.len());
        let mut changed = false;
        let mut next = manifest.clone();

        for reader in current.iter() {
            let mut hits: Vec<DocId> = Vec::new();
            if let Some(mut postings) = reader.postings(term)? {
                while let Some(doc) = postings.next_doc()? {
                    if reader.live_docs().is_live(doc) {
                        hits.push(doc);
                    }
                }
            }
            if hits.is_empty() {
                next_segments.push(Arc::clone(reader));
                continue;
            }
            deleted += hits.len() as u64;

            let meta = reader.meta();
            let generation = meta.del_generation.map_or(0, |g| g + 1);
            let live = reader.live_docs().with_deleted(hits);
            self.inner.persist_live_docs(meta.id, generation, &live)?;
            next.set_del_generation(meta.id, generation)?;
            next_segments.push(Arc::new(
                reader.with_live_docs_generation(live, generation)?,
            ));
            changed = true;
        }

        if changed {
            next.commit(self.inner.dir.as_ref())?;
            // Live-docs generations superseded by this commit.
            let mut obsolete: Vec<String> = Vec::new();
            for old_meta in &manifest.segments {
                if let Some(old_gen) = old_meta.del_generation {
                    let new_gen = next
                        .get_segment(old_meta.id)
                        .and_then(|m| m.del_generation);
                    if new_gen != Some(old_gen) {
                        obsolete.push(live_docs_file(old_meta.id, old_gen));
                    }
                }
            }
            *manifest = next;
            self.inner.publish(next_segments);
            drop(manifest);
            for name in obsolete {
                self.inner.discard_file(&name);
            }
        }
        debug!(%term, deleted, "deleted documents");
        Ok(deleted)
    }

    /// Seal the write buffer into a new segment. No-op on an empty buffer.
    pub fn flush(&self) -> Result<Option<SegmentMeta>> {
        let mut buffer = self.inner.buffer.lock();
        if buffer.is_empty() {
            return Ok(None);
        }
        let mut manifest = self.inner.manifest.lock();
        let mut next = manifest.clone();
        let id = next.allocate_segment_id();

        let mut writer = SegmentWriter::new(self.inner.dir.as_ref(), id, &self.inner.config)?;
        let doc_count = match buffer.drain_into(&mut writer) {
            Ok(count) => count,
            Err(e) => {
                writer.abort();
                return Err(e);
            }
        };
        drop(buffer);
        let meta = writer.seal(doc_count)?;

        next.add_segment(meta);
        next.commit(self.inner.dir.as_ref())?;
        *manifest = next;

        let reader = Arc::new(SegmentReader::open(
            self.inner.dir.as_ref(),
            meta,
            &self.inner.config,
        )?);
        let mut segments: SegmentList = (**self.inner.segments.load()).clone();
        segments.push(reader);
        self.inner.publish(segments);
        Ok(Some(meta))
    }

    /// Run a merge synchronously on the calling thread.
    pub fn merge(&self, sources: Vec<SegmentId>) -> Result<SegmentId> {
        let target = self.inner.manifest.lock().allocate_segment_id();
        let spec = MergeSpec::new(sources, target);
        self.inner.run_merge(&spec)?;
        Ok(target)
    }

    /// Submit a merge to the background workers. Returns `false` when the
    /// merge overlaps one already in flight.
    pub fn schedule_merge(&self, sources: Vec<SegmentId>) -> bool {
        let target = self.inner.manifest.lock().allocate_segment_id();
        let spec = MergeSpec::new(sources, target);
        let inner = Arc::clone(&self.inner);
        let task_spec = spec.clone();
        self.scheduler
            .schedule(spec, move || inner.run_merge(&task_spec))
    }

    /// Snapshot reader over the current committed segments plus any
    /// segments flushed by this writer.
    pub fn reader(&self) -> IndexReader {
        IndexReader {
            segments: self.inner.segments.load_full(),
        }
    }

    /// Segment ids currently live, oldest first.
    pub fn segment_ids(&self) -> Vec<SegmentId> {
        self.inner
            .segments
            .load()
            .iter()
            .map(|r| r.meta().id)
            .collect()
    }

    /// Wait for every scheduled merge to finish.
    pub fn sync(&self) {
        self.scheduler.sync();
    }

    /// Flush remaining buffered documents, drain merges and release the
    /// write lock.
    pub fn close(mut self) -> Result<()> {
        self.flush()?;
        self.scheduler.close();
        Ok(())
    }
}

/// Point-in-time view over an index.
///
/// Cheap to clone and immune to concurrent writer activity: the underlying
/// segment views are pinned for as long as the reader lives.
#[derive(Clone)]
pub struct IndexReader {
    segments: Arc<SegmentList>,
}

impl IndexReader {
    pub fn segment_readers(&self) -> &[Arc<SegmentReader>] {
        &self.segments
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Live documents across all segments.
    pub fn live_doc_count(&self) -> u64 {
        self.segments.iter().map(|r| r.live_count() as u64).sum()
    }

    /// Number of live documents containing `term`.
    pub fn doc_freq(&self, term: &Term) -> Result<u64> {
        let mut total = 0u64;
        for reader in self.segments.iter() {
            if let Some(mut postings) = reader.postings(term)? {
                while let Some(doc) = postings.next_doc()? {
                    if reader.live_docs().is_live(doc) {
                        total += 1;
                    }
                }
            }
        }
        Ok(total)
    }
}
