//! Named exclusive locks scoped to one directory.
//!
//! Two layers of exclusion: a registry of held lock names owned by the
//! manager stops a second in-process acquisition, and (for filesystem
//! backends) an atomically created lock file stops other processes. Lock
//! files are named `<prefix>-n-<name>.lock` so multiple logical locks can
//! share one directory.
//!
//! `obtain` is non-blocking and returns a structured outcome; callers that
//! want retry or timeout behavior build it on top. A [`WriteLock`] releases
//! on drop, so every exit path of the owning scope gives the lock back.

use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{Result, VellumError};

/// Where lock state lives.
#[derive(Clone, Debug)]
pub enum LockBackend {
    /// In-process registry only. Used by in-memory directories, which are
    /// never shared across processes.
    InMemory,
    /// Registry plus an atomically created lock file under `dir`, giving
    /// advisory cross-process exclusion.
    LockFiles { dir: PathBuf },
}

/// Outcome of a non-blocking lock attempt.
pub enum LockOutcome {
    /// The lock was obtained; dropping the guard releases it.
    Acquired(WriteLock),
    /// Another holder (this process or another) already owns the name.
    AlreadyLocked { name: String },
}

impl LockOutcome {
    pub fn is_acquired(&self) -> bool {
        matches!(self, LockOutcome::Acquired(_))
    }

    /// Convert contention into an error for callers that cannot proceed
    /// without the lock.
    pub fn required(self) -> Result<WriteLock> {
        match self {
            LockOutcome::Acquired(lock) => Ok(lock),
            LockOutcome::AlreadyLocked { name } => Err(VellumError::LockHeld(name)),
        }
    }
}

struct LockManagerInner {
    prefix: String,
    backend: LockBackend,
    held: Mutex<HashSet<String>>,
}

impl LockManagerInner {
    fn lock_file(&self, name: &str) -> Option<PathBuf> {
        match &self.backend {
            LockBackend::InMemory => None,
            LockBackend::LockFiles { dir } => {
                Some(dir.join(format!("{}-n-{}.lock", self.prefix, name)))
            }
        }
    }
}

/// Grants and tracks the exclusive locks of one directory.
pub struct LockManager {
    inner: Arc<LockManagerInner>,
}

impl std::fmt::Debug for LockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockManager").finish_non_exhaustive()
    }
}

impl LockManager {
    /// Create a manager and self-test the backend by acquiring and releasing
    /// a throwaway lock. A storage backend that cannot lock fails here, at
    /// setup time, instead of corrupting the index later.
    pub fn new(prefix: impl Into<String>, backend: LockBackend) -> Result<Self> {
        let manager = Self {
            inner: Arc::new(LockManagerInner {
                prefix: prefix.into(),
                backend,
                held: Mutex::new(HashSet::new()),
            }),
        };

        let probe = format!("probe-{}", std::process::id());
        match manager.obtain(&probe) {
            Ok(LockOutcome::Acquired(lock)) => {
                lock.release();
                Ok(manager)
            }
            Ok(LockOutcome::AlreadyLocked { .. }) => Err(VellumError::LockSelfTest(format!(
                "probe lock '{}' reported as already held on a fresh manager",
                probe
            ))),
            Err(err) => Err(VellumError::LockSelfTest(format!(
                "cannot acquire probe lock '{}': {}",
                probe, err
            ))),
        }
    }

    /// Try to obtain `name`. Returns immediately in all cases.
    pub fn obtain(&self, name: &str) -> Result<LockOutcome> {
        {
            let mut held = self.inner.held.lock();
            if held.contains(name) {
                return Ok(LockOutcome::AlreadyLocked {
                    name: name.to_string(),
                });
            }
            // Reserve in-process before touching storage so a concurrent
            // obtain of the same name cannot race past the registry.
            held.insert(name.to_string());
        }

        if let Some(path) = self.inner.lock_file(name) {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(_) => {}
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                    self.inner.held.lock().remove(name);
                    return Ok(LockOutcome::AlreadyLocked {
                        name: name.to_string(),
                    });
                }
                Err(err) => {
                    self.inner.held.lock().remove(name);
                    return Err(err.into());
                }
            }
        }

        debug!(lock = name, "lock acquired");
        Ok(LockOutcome::Acquired(WriteLock {
            name: name.to_string(),
            manager: Arc::clone(&self.inner),
            released: AtomicBool::new(false),
        }))
    }

    /// Whether `name` is currently held through this manager.
    pub fn is_held(&self, name: &str) -> bool {
        self.inner.held.lock().contains(name)
    }
}

/// A successfully obtained exclusive lock.
///
/// At most one live `WriteLock` per name exists per manager. Released
/// explicitly or on drop; `release` is idempotent.
pub struct WriteLock {
    name: String,
    manager: Arc<LockManagerInner>,
    released: AtomicBool,
}

impl WriteLock {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Release the lock. Safe to call more than once.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        self.manager.held.lock().remove(&self.name);
        if let Some(path) = self.manager.lock_file(&self.name) {
            // A missing lock file at release time is not an error.
            let _ = std::fs::remove_file(path);
        }
        debug!(lock = %self.name, "lock released");
    }
}

impl Drop for WriteLock {
    fn drop(&mut self) {
        self.release();
    }
}
