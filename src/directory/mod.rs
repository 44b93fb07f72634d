//! Byte-addressable storage abstraction.
//!
//! A [`Directory`] is a flat namespace of immutable-once-committed files.
//! Outputs are buffered in memory and become visible atomically on
//! [`Directory::commit_output`]; inputs are positional cursors over a shared
//! read-only buffer, so cloning an input duplicates cursor state without
//! re-reading from storage.

pub mod fs;
pub mod lock;
pub mod ram;

use std::sync::Arc;

use crate::error::{Result, VellumError};

pub use fs::FsDirectory;
pub use lock::{LockManager, LockOutcome, WriteLock};
pub use ram::RamDirectory;

/// Storage abstraction the index engine runs against.
///
/// `create_output` fails if the name already exists; overwriting must be
/// requested explicitly via `create_output_overwrite`. A created output is
/// not visible to `open_input`/`list_files` until committed.
pub trait Directory: Send + Sync {
    /// List all committed file names.
    fn list_files(&self) -> Result<Vec<String>>;

    /// Check whether a committed file exists.
    fn exists(&self, name: &str) -> Result<bool>;

    /// Open a committed file for reading.
    fn open_input(&self, name: &str) -> Result<IndexInput>;

    /// Start a new file. Fails with `FileAlreadyExists` if the name is
    /// already committed or reserved by an uncommitted output.
    fn create_output(&self, name: &str) -> Result<IndexOutput>;

    /// Start a new file, replacing any committed file of the same name
    /// once the output is committed.
    fn create_output_overwrite(&self, name: &str) -> Result<IndexOutput>;

    /// Atomically publish an output created by this directory. A
    /// create-only output fails with `FileAlreadyExists` if its name was
    /// committed out of band since it was created.
    fn commit_output(&self, output: IndexOutput) -> Result<()>;

    /// Discard an uncommitted output, releasing its name reservation.
    fn abort_output(&self, output: IndexOutput);

    /// Delete a committed file. Implementations that track open handles
    /// reject deletion of a file a reader still holds open.
    fn delete_file(&self, name: &str) -> Result<()>;

    /// The lock manager bound to this directory.
    fn lock_manager(&self) -> &LockManager;

    /// Try to obtain a named exclusive lock. Non-blocking: returns a
    /// structured outcome, never waits.
    fn obtain_lock(&self, name: &str) -> Result<LockOutcome> {
        self.lock_manager().obtain(name)
    }
}

/// Tracks open input handles per file so `delete_file` can reject deleting
/// a file that is still being read.
#[derive(Debug, Default)]
pub(crate) struct HandleTracker {
    open: parking_lot::Mutex<std::collections::HashMap<String, usize>>,
}

impl HandleTracker {
    pub(crate) fn acquire(self: &Arc<Self>, name: &str) {
        *self.open.lock().entry(name.to_string()).or_insert(0) += 1;
    }

    fn release(&self, name: &str) {
        let mut open = self.open.lock();
        if let Some(count) = open.get_mut(name) {
            *count -= 1;
            if *count == 0 {
                open.remove(name);
            }
        }
    }

    pub(crate) fn is_open(&self, name: &str) -> bool {
        self.open.lock().contains_key(name)
    }
}

/// Positional reader over a shared, read-only file buffer.
///
/// Cloning is cheap and duplicates the cursor, not the data. A single
/// `IndexInput` is owned by exactly one consumer at a time.
pub struct IndexInput {
    name: String,
    data: Arc<Vec<u8>>,
    pos: usize,
    tracker: Option<Arc<HandleTracker>>,
}

impl std::fmt::Debug for IndexInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexInput")
            .field("name", &self.name)
            .field("pos", &self.pos)
            .finish_non_exhaustive()
    }
}

impl IndexInput {
    pub(crate) fn new(name: String, data: Arc<Vec<u8>>) -> Self {
        Self {
            name,
            data,
            pos: 0,
            tracker: None,
        }
    }

    pub(crate) fn with_tracker(
        name: String,
        data: Arc<Vec<u8>>,
        tracker: Arc<HandleTracker>,
    ) -> Self {
        tracker.acquire(&name);
        Self {
            name,
            data,
            pos: 0,
            tracker: Some(tracker),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn position(&self) -> u64 {
        self.pos as u64
    }

    pub fn seek(&mut self, pos: u64) -> Result<()> {
        if pos > self.data.len() as u64 {
            return Err(VellumError::corrupt(
                &self.name,
                format!("seek to {} past end of file ({})", pos, self.data.len()),
            ));
        }
        self.pos = pos as usize;
        Ok(())
    }

    fn eof(&self, wanted: usize) -> VellumError {
        VellumError::corrupt(
            &self.name,
            format!(
                "truncated read: {} bytes wanted at {} of {}",
                wanted,
                self.pos,
                self.data.len()
            ),
        )
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let b = *self.data.get(self.pos).ok_or_else(|| self.eof(1))?;
        self.pos += 1;
        Ok(b)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let bytes = self.read_slice(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let bytes = self.read_slice(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(buf))
    }

    /// Variable-length u32, low 7 bits per byte, high bit = continuation.
    pub fn read_vint(&mut self) -> Result<u32> {
        let mut result: u32 = 0;
        let mut shift = 0;
        loop {
            let byte = self.read_u8()?;
            result |= ((byte & 0x7F) as u32) << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
            if shift > 28 {
                return Err(VellumError::corrupt(&self.name, "vint too large"));
            }
        }
    }

    /// Variable-length u64.
    pub fn read_vlong(&mut self) -> Result<u64> {
        let mut result: u64 = 0;
        let mut shift = 0;
        loop {
            let byte = self.read_u8()?;
            result |= ((byte & 0x7F) as u64) << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
            if shift > 63 {
                return Err(VellumError::corrupt(&self.name, "vlong too large"));
            }
        }
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        Ok(self.read_slice(len)?.to_vec())
    }

    fn read_slice(&mut self, len: usize) -> Result<&[u8]> {
        if self.pos + len > self.data.len() {
            return Err(self.eof(len));
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    /// Raw access to the whole underlying buffer.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

impl Clone for IndexInput {
    fn clone(&self) -> Self {
        if let Some(tracker) = &self.tracker {
            tracker.acquire(&self.name);
        }
        Self {
            name: self.name.clone(),
            data: Arc::clone(&self.data),
            pos: self.pos,
            tracker: self.tracker.clone(),
        }
    }
}

impl Drop for IndexInput {
    fn drop(&mut self) {
        if let Some(tracker) = &self.tracker {
            tracker.release(&self.name);
        }
    }
}

/// Buffered writer for a new directory file.
///
/// Bytes accumulate in memory; nothing reaches storage until the output is
/// handed back to [`Directory::commit_output`], which publishes the whole
/// file atomically.
pub struct IndexOutput {
    name: String,
    buf: Vec<u8>,
    overwrite: bool,
}

impl std::fmt::Debug for IndexOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexOutput")
            .field("name", &self.name)
            .field("overwrite", &self.overwrite)
            .finish_non_exhaustive()
    }
}

impl IndexOutput {
    pub(crate) fn new(name: String, overwrite: bool) -> Self {
        Self {
            name,
            buf: Vec::new(),
            overwrite,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn overwrite(&self) -> bool {
        self.overwrite
    }

    pub fn position(&self) -> u64 {
        self.buf.len() as u64
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_vint(&mut self, v: u32) {
        self.write_vlong(v as u64);
    }

    pub fn write_vlong(&mut self, mut v: u64) {
        loop {
            let byte = (v & 0x7F) as u8;
            v >>= 7;
            if v == 0 {
                self.buf.push(byte);
                break;
            }
            self.buf.push(byte | 0x80);
        }
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Overwrite a previously written fixed-width u64 (e.g. a count slot
    /// reserved before the entries it describes were streamed out).
    pub fn patch_u64(&mut self, offset: u64, v: u64) {
        let offset = offset as usize;
        debug_assert!(offset + 8 <= self.buf.len());
        self.buf[offset..offset + 8].copy_from_slice(&v.to_le_bytes());
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub(crate) fn into_parts(self) -> (String, Vec<u8>) {
        (self.name, self.buf)
    }
}
