//! Filesystem-backed directory.

use std::collections::HashSet;
use std::fs;
use std::hash::{Hash, Hasher};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use super::lock::{LockBackend, LockManager};
use super::{Directory, HandleTracker, IndexInput, IndexOutput};
use crate::error::{Result, VellumError};

/// A [`Directory`] over a filesystem path.
///
/// Outputs are staged as `<name>.tmp` and renamed into place on commit, so a
/// committed file is always complete. Lock files live in the same directory,
/// prefixed with a hash of the canonical path so two `FsDirectory` instances
/// over the same path contend for the same names.
pub struct FsDirectory {
    path: PathBuf,
    lock_manager: LockManager,
    reserved: Mutex<HashSet<String>>,
    tracker: Option<Arc<HandleTracker>>,
}

impl FsDirectory {
    /// Open (creating if needed) a directory without open-handle tracking.
    /// Deleting a file another reader holds open is deferred to the OS.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_inner(path, false)
    }

    /// Open with open-handle tracking: deleting a file with a live
    /// [`IndexInput`] is rejected with an explicit `FileInUse` error.
    pub fn open_tracked<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_inner(path, true)
    }

    fn open_inner<P: AsRef<Path>>(path: P, tracked: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        fs::create_dir_all(&path)?;

        let canonical = fs::canonicalize(&path)?;
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        canonical.hash(&mut hasher);
        let prefix = format!("vellum-{:016x}", hasher.finish());

        let lock_manager = LockManager::new(
            prefix,
            LockBackend::LockFiles {
                dir: path.clone(),
            },
        )?;

        Ok(Self {
            path,
            lock_manager,
            reserved: Mutex::new(HashSet::new()),
            tracker: tracked.then(|| Arc::new(HandleTracker::default())),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn reserve(&self, name: &str, allow_existing: bool) -> Result<()> {
        let mut reserved = self.reserved.lock();
        if reserved.contains(name) {
            return Err(VellumError::FileAlreadyExists(name.to_string()));
        }
        if !allow_existing && self.path.join(name).exists() {
            return Err(VellumError::FileAlreadyExists(name.to_string()));
        }
        reserved.insert(name.to_string());
        Ok(())
    }

    fn is_index_file(name: &str) -> bool {
        !name.ends_with(".lock") && !name.ends_with(".tmp")
    }
}

impl Directory for FsDirectory {
    fn list_files(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    if Self::is_index_file(name) {
                        names.push(name.to_string());
                    }
                }
            }
        }
        names.sort();
        Ok(names)
    }

    fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.path.join(name).is_file())
    }

    fn open_input(&self, name: &str) -> Result<IndexInput> {
        let data = match fs::read(self.path.join(name)) {
            Ok(data) => Arc::new(data),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(VellumError::FileNotFound(name.to_string()))
            }
            Err(err) => return Err(err.into()),
        };
        Ok(match &self.tracker {
            Some(tracker) => {
                IndexInput::with_tracker(name.to_string(), data, Arc::clone(tracker))
            }
            None => IndexInput::new(name.to_string(), data),
        })
    }

    fn create_output(&self, name: &str) -> Result<IndexOutput> {
        self.reserve(name, false)?;
        Ok(IndexOutput::new(name.to_string(), false))
    }

    fn create_output_overwrite(&self, name: &str) -> Result<IndexOutput> {
        self.reserve(name, true)?;
        Ok(IndexOutput::new(name.to_string(), true))
    }

    fn commit_output(&self, output: IndexOutput) -> Result<()> {
        let overwrite = output.overwrite();
        let (name, buf) = output.into_parts();
        let tmp = self.path.join(format!("{}.tmp", name));
        let dest = self.path.join(&name);

        let result = (|| -> Result<()> {
            // A create-only output never replaces a file that appeared
            // out of band after the name was reserved.
            if !overwrite && dest.exists() {
                return Err(VellumError::FileAlreadyExists(name.clone()));
            }
            fs::write(&tmp, &buf)?;
            fs::rename(&tmp, &dest)?;
            Ok(())
        })();

        self.reserved.lock().remove(&name);
        if result.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        result
    }

    fn abort_output(&self, output: IndexOutput) {
        self.reserved.lock().remove(output.name());
    }

    fn delete_file(&self, name: &str) -> Result<()> {
        if let Some(tracker) = &self.tracker {
            if tracker.is_open(name) {
                return Err(VellumError::FileInUse(name.to_string()));
            }
        }
        match fs::remove_file(self.path.join(name)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(VellumError::FileNotFound(name.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    fn lock_manager(&self) -> &LockManager {
        &self.lock_manager
    }
}
