use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};

use tempfile::TempDir;

use vellum::directory::{IndexInput, IndexOutput, LockManager};
use vellum::segment::postings::PostingsIterator;
use vellum::segment::SegmentWriter;
use vellum::{
    Directory, DocId, FsDirectory, IndexWriter, Result, SegmentId, SegmentReader, StorageConfig,
    Term, VellumError,
};

fn config() -> StorageConfig {
    StorageConfig {
        index_interval: 2,
        skip_interval: 4,
        buffer_max_docs: 1_000,
        ..StorageConfig::default()
    }
}

fn term(text: &str) -> Term {
    Term::new("body", text)
}

fn doc(words: &[&str]) -> Vec<Term> {
    words.iter().map(|w| term(w)).collect()
}

fn open_writer(dir: &Arc<FsDirectory>, config: StorageConfig) -> IndexWriter {
    IndexWriter::open(Arc::clone(dir) as Arc<dyn Directory>, config).unwrap()
}

fn scan_all(iter: &mut PostingsIterator) -> Vec<(u32, u32)> {
    let mut out = Vec::new();
    while let Some(d) = iter.next_doc().unwrap() {
        out.push((d.0, iter.freq()));
    }
    out
}

#[test]
fn doc_freq_survives_flush_delete_merge_cycles() {
    let tmp = TempDir::new().unwrap();
    let dir = Arc::new(FsDirectory::open(tmp.path()).unwrap());
    let writer = open_writer(&dir, config());

    // Three flush rounds, "apple" in every other document.
    for round in 0..3 {
        for i in 0..10 {
            if i % 2 == 0 {
                writer.add_document(doc(&["apple", "common"])).unwrap();
            } else {
                writer.add_document(doc(&["banana", "common"])).unwrap();
            }
        }
        writer.flush().unwrap();
        assert_eq!(
            writer.reader().doc_freq(&term("apple")).unwrap(),
            5 * (round + 1)
        );
    }

    writer.delete_documents(&term("banana")).unwrap();
    assert_eq!(writer.reader().doc_freq(&term("apple")).unwrap(), 15);
    assert_eq!(writer.reader().doc_freq(&term("banana")).unwrap(), 0);
    assert_eq!(writer.reader().doc_freq(&term("common")).unwrap(), 15);

    writer.merge(writer.segment_ids()).unwrap();
    let reader = writer.reader();
    assert_eq!(reader.segment_count(), 1);
    assert_eq!(reader.live_doc_count(), 15);
    assert_eq!(reader.doc_freq(&term("apple")).unwrap(), 15);
    // After the merge the dictionary itself reflects the deletions.
    let seg = &reader.segment_readers()[0];
    assert!(seg.term_info(&term("banana")).unwrap().is_none());
    assert_eq!(seg.term_info(&term("common")).unwrap().unwrap().doc_freq, 15);
    writer.close().unwrap();
}

#[test]
fn skip_to_agrees_with_linear_scan() {
    let tmp = TempDir::new().unwrap();
    let dir = Arc::new(FsDirectory::open(tmp.path()).unwrap());
    let writer = open_writer(&dir, config());

    // One dense term across 500 documents, enough for multi-level skips.
    for i in 0..500u32 {
        if i % 3 == 0 {
            writer.add_document(doc(&["dense", "filler"])).unwrap();
        } else {
            writer.add_document(doc(&["filler"])).unwrap();
        }
    }
    writer.flush().unwrap();

    let reader = writer.reader();
    let seg = &reader.segment_readers()[0];
    for target in [0u32, 1, 7, 99, 250, 498, 499, 600] {
        let skipped = seg
            .postings(&term("dense"))
            .unwrap()
            .unwrap()
            .skip_to(DocId(target))
            .unwrap();

        let mut scan = seg.postings(&term("dense")).unwrap().unwrap();
        let mut expected = None;
        while let Some(d) = scan.next_doc().unwrap() {
            if d.0 >= target {
                expected = Some(d);
                break;
            }
        }
        assert_eq!(skipped, expected, "target {}", target);
    }
    writer.close().unwrap();
}

#[test]
fn index_divisor_does_not_change_lookups() {
    let tmp = TempDir::new().unwrap();
    let dir = Arc::new(FsDirectory::open(tmp.path()).unwrap());
    let writer = open_writer(&dir, config());
    for i in 0..200u32 {
        writer
            .add_document(doc(&[&format!("word{:04}", i)]))
            .unwrap();
    }
    writer.flush().unwrap();
    let meta = writer.reader().segment_readers()[0].meta();
    writer.close().unwrap();

    let plain_cfg = config();
    let mut thinned_cfg = config();
    thinned_cfg.index_divisor = 4;
    let plain = SegmentReader::open(dir.as_ref(), meta, &plain_cfg).unwrap();
    let thinned = SegmentReader::open(dir.as_ref(), meta, &thinned_cfg).unwrap();

    for i in 0..200u32 {
        let t = term(&format!("word{:04}", i));
        let a = plain.term_info(&t).unwrap();
        let b = thinned.term_info(&t).unwrap();
        assert_eq!(a, b, "term {}", t);
        assert!(a.is_some());
    }
    assert!(plain.term_info(&term("zzz")).unwrap().is_none());
    assert!(thinned.term_info(&term("zzz")).unwrap().is_none());
}

#[test]
fn merge_counts_for_disjoint_and_shared_terms() {
    let tmp = TempDir::new().unwrap();
    let dir = Arc::new(FsDirectory::open(tmp.path()).unwrap());
    let writer = open_writer(&dir, config());

    writer.add_document(doc(&["apple", "only-a"])).unwrap();
    writer.flush().unwrap();
    writer.add_document(doc(&["apple", "only-b"])).unwrap();
    writer.flush().unwrap();

    writer.merge(writer.segment_ids()).unwrap();
    let reader = writer.reader();
    let seg = &reader.segment_readers()[0];
    assert_eq!(seg.term_count(), 3);
    assert_eq!(seg.term_info(&term("apple")).unwrap().unwrap().doc_freq, 2);
    assert_eq!(seg.term_info(&term("only-a")).unwrap().unwrap().doc_freq, 1);
    assert_eq!(seg.term_info(&term("only-b")).unwrap().unwrap().doc_freq, 1);

    // Doc ids remap contiguously: source order, live docs only.
    let mut iter = seg.postings(&term("apple")).unwrap().unwrap();
    assert_eq!(scan_all(&mut iter), vec![(0, 1), (1, 1)]);
    writer.close().unwrap();
}

#[test]
fn snapshot_readers_are_isolated_from_merge_commit() {
    let tmp = TempDir::new().unwrap();
    let dir = Arc::new(FsDirectory::open(tmp.path()).unwrap());
    let writer = open_writer(&dir, config());

    writer.add_document(doc(&["apple"])).unwrap();
    writer.flush().unwrap();
    writer.add_document(doc(&["banana"])).unwrap();
    writer.flush().unwrap();

    let snapshot = writer.reader();
    writer.merge(writer.segment_ids()).unwrap();
    writer.add_document(doc(&["cherry"])).unwrap();
    writer.flush().unwrap();

    // The pre-merge snapshot is frozen.
    assert_eq!(snapshot.segment_count(), 2);
    assert_eq!(snapshot.live_doc_count(), 2);
    assert_eq!(snapshot.doc_freq(&term("cherry")).unwrap(), 0);

    let fresh = writer.reader();
    assert_eq!(fresh.segment_count(), 2); // merged + new flush
    assert_eq!(fresh.live_doc_count(), 3);
    writer.close().unwrap();
}

#[test]
fn write_lock_excludes_second_writer_until_released() {
    let tmp = TempDir::new().unwrap();
    let dir = Arc::new(FsDirectory::open(tmp.path()).unwrap());

    let first = open_writer(&dir, config());
    // Same path through an independent directory instance: the lock file
    // still excludes it.
    let other = Arc::new(FsDirectory::open(tmp.path()).unwrap());
    let err =
        IndexWriter::open(Arc::clone(&other) as Arc<dyn Directory>, config()).unwrap_err();
    assert!(matches!(err, VellumError::LockHeld(_)));

    first.close().unwrap();
    let second = IndexWriter::open(other as Arc<dyn Directory>, config()).unwrap();
    second.close().unwrap();
}

#[test]
fn sampled_dictionary_worked_example() {
    // Four terms at index_interval 2: samples at "apple" and "cherry";
    // "banana" and "date" are found by scanning from their block start.
    let tmp = TempDir::new().unwrap();
    let dir = FsDirectory::open(tmp.path()).unwrap();

    let mut writer = SegmentWriter::new(&dir, SegmentId::new(0), &config()).unwrap();
    for (i, name) in ["apple", "banana", "cherry", "date"].iter().enumerate() {
        writer
            .write_term(&term(name), &[(DocId(i as u32), 1)])
            .unwrap();
    }
    let meta = writer.seal(4).unwrap();

    let reader = SegmentReader::open(&dir, meta, &config()).unwrap();
    for name in ["apple", "banana", "cherry", "date"] {
        let info = reader.term_info(&term(name)).unwrap().unwrap();
        assert_eq!(info.doc_freq, 1, "term {}", name);
    }
    assert!(reader.term_info(&term("apricot")).unwrap().is_none());
    assert!(reader.term_info(&term("elderberry")).unwrap().is_none());
}

#[test]
fn background_merges_drain_on_sync() {
    let tmp = TempDir::new().unwrap();
    let dir = Arc::new(FsDirectory::open(tmp.path()).unwrap());
    let writer = open_writer(&dir, config());

    for round in 0..4 {
        writer
            .add_document(doc(&["apple", &format!("round{}", round)]))
            .unwrap();
        writer.flush().unwrap();
    }

    let ids = writer.segment_ids();
    assert!(writer.schedule_merge(ids[..2].to_vec()));
    assert!(writer.schedule_merge(ids[2..].to_vec()));
    writer.sync();

    let reader = writer.reader();
    assert_eq!(reader.segment_count(), 2);
    assert_eq!(reader.doc_freq(&term("apple")).unwrap(), 4);
    writer.close().unwrap();
}

#[test]
fn delete_after_merge_narrows_target_and_survives_reopen() {
    let tmp = TempDir::new().unwrap();
    let dir = Arc::new(FsDirectory::open(tmp.path()).unwrap());
    let writer = open_writer(&dir, config());

    writer.add_document(doc(&["apple", "keep"])).unwrap();
    writer.add_document(doc(&["apple", "drop"])).unwrap();
    writer.flush().unwrap();

    writer.merge(writer.segment_ids()).unwrap();
    writer.delete_documents(&term("drop")).unwrap();

    let reader = writer.reader();
    assert_eq!(reader.live_doc_count(), 1);
    assert_eq!(reader.doc_freq(&term("apple")).unwrap(), 1);
    assert_eq!(reader.doc_freq(&term("keep")).unwrap(), 1);

    // And the state survives a close/reopen cycle.
    writer.close().unwrap();
    let writer = open_writer(&dir, config());
    assert_eq!(writer.reader().doc_freq(&term("apple")).unwrap(), 1);
    writer.close().unwrap();
}

/// Delegating directory that parks the first commit of one chosen file
/// until released, so a test can hold a background merge open at a
/// deterministic point.
struct HoldCommit {
    inner: Arc<FsDirectory>,
    file: String,
    reached: Mutex<Option<Sender<()>>>,
    release: Mutex<Option<Receiver<()>>>,
}

impl Directory for HoldCommit {
    fn list_files(&self) -> Result<Vec<String>> {
        self.inner.list_files()
    }

    fn exists(&self, name: &str) -> Result<bool> {
        self.inner.exists(name)
    }

    fn open_input(&self, name: &str) -> Result<IndexInput> {
        self.inner.open_input(name)
    }

    fn create_output(&self, name: &str) -> Result<IndexOutput> {
        self.inner.create_output(name)
    }

    fn create_output_overwrite(&self, name: &str) -> Result<IndexOutput> {
        self.inner.create_output_overwrite(name)
    }

    fn commit_output(&self, output: IndexOutput) -> Result<()> {
        if output.name() == self.file {
            if let Some(reached) = self.reached.lock().unwrap().take() {
                let _ = reached.send(());
            }
            if let Some(release) = self.release.lock().unwrap().take() {
                let _ = release.recv();
            }
        }
        self.inner.commit_output(output)
    }

    fn abort_output(&self, output: IndexOutput) {
        self.inner.abort_output(output)
    }

    fn delete_file(&self, name: &str) -> Result<()> {
        self.inner.delete_file(name)
    }

    fn lock_manager(&self) -> &LockManager {
        self.inner.lock_manager()
    }
}

#[test]
fn deletions_committed_during_inflight_merge_land_in_target() {
    let tmp = TempDir::new().unwrap();
    let fs = Arc::new(FsDirectory::open(tmp.path()).unwrap());
    let (reached_tx, reached_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    // The merge target is segment_2; holding its postings commit keeps the
    // merge in flight with its sources pinned.
    let gated: Arc<dyn Directory> = Arc::new(HoldCommit {
        inner: Arc::clone(&fs),
        file: "segment_2.pst".to_string(),
        reached: Mutex::new(Some(reached_tx)),
        release: Mutex::new(Some(release_rx)),
    });

    let writer = IndexWriter::open(gated, config()).unwrap();
    writer.add_document(doc(&["apple", "keep"])).unwrap();
    writer.add_document(doc(&["apple", "drop"])).unwrap();
    writer.flush().unwrap();
    writer.add_document(doc(&["apple", "keep"])).unwrap();
    writer.flush().unwrap();

    assert!(writer.schedule_merge(writer.segment_ids()));
    reached_rx.recv().unwrap();

    // The delete commits against the sources while the merge is parked.
    assert_eq!(writer.delete_documents(&term("drop")).unwrap(), 1);
    release_tx.send(()).unwrap();
    writer.sync();

    let reader = writer.reader();
    assert_eq!(reader.segment_count(), 1);
    assert_eq!(reader.live_doc_count(), 2);
    assert_eq!(reader.doc_freq(&term("drop")).unwrap(), 0);
    assert_eq!(reader.doc_freq(&term("apple")).unwrap(), 2);
    assert_eq!(reader.doc_freq(&term("keep")).unwrap(), 2);
    writer.close().unwrap();

    // The carried deletion is durable across reopen.
    let writer = open_writer(&fs, config());
    assert_eq!(writer.reader().live_doc_count(), 2);
    assert_eq!(writer.reader().doc_freq(&term("drop")).unwrap(), 0);
    writer.close().unwrap();
}
