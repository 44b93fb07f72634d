//! In-memory directory for tests and ephemeral indexes.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;

use super::lock::{LockBackend, LockManager};
use super::{Directory, IndexInput, IndexOutput};
use crate::error::{Result, VellumError};

/// A [`Directory`] holding every file in a map.
///
/// Committed file contents are shared `Arc` buffers, so opening an input
/// never copies. In-memory directories are process-local; their locks need
/// only the in-process registry.
pub struct RamDirectory {
    files: Mutex<HashMap<String, Arc<Vec<u8>>>>,
    reserved: Mutex<HashSet<String>>,
    lock_manager: LockManager,
}

impl RamDirectory {
    pub fn new() -> Result<Self> {
        Ok(Self {
            files: Mutex::new(HashMap::new()),
            reserved: Mutex::new(HashSet::new()),
            lock_manager: LockManager::new("vellum-ram", LockBackend::InMemory)?,
        })
    }

    fn reserve(&self, name: &str, allow_existing: bool) -> Result<()> {
        let mut reserved = self.reserved.lock();
        if reserved.contains(name) {
            return Err(VellumError::FileAlreadyExists(name.to_string()));
        }
        if !allow_existing && self.files.lock().contains_key(name) {
            return Err(VellumError::FileAlreadyExists(name.to_string()));
        }
        reserved.insert(name.to_string());
        Ok(())
    }
}

impl Directory for RamDirectory {
    fn list_files(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.files.lock().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.files.lock().contains_key(name))
    }

    fn open_input(&self, name: &str) -> Result<IndexInput> {
        let files = self.files.lock();
        let data = files
            .get(name)
            .ok_or_else(|| VellumError::FileNotFound(name.to_string()))?;
        Ok(IndexInput::new(name.to_string(), Arc::clone(data)))
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
        if !overwrite && self.files.lock().contains_key(&name) {
            self.reserved.lock().remove(&name);
            return Err(VellumError::FileAlreadyExists(name));
        }
        self.files.lock().insert(name.clone(), Arc::new(buf));
        self.reserved.lock().remove(&name);
        Ok(())
    }

    fn abort_output(&self, output: IndexOutput) {
        self.reserved.lock().remove(output.name());
    }

    fn delete_file(&self, name: &str) -> Result<()> {
        match self.files.lock().remove(name) {
            Some(_) => Ok(()),
            None => Err(VellumError::FileNotFound(name.to_string())),
        }
    }

    fn lock_manager(&self) -> &LockManager {
        &self.lock_manager
    }
}
