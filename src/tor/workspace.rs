//! Temporary files owned by a launch and the hooks that remove them

use super::torrc::{delete_files_or_dirs, WrittenTorrc};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Files and directories created for one daemon launch
#[derive(Debug)]
pub struct Workspace {
    torrc: PathBuf,
    data_dir: PathBuf,
    delete_list: Vec<PathBuf>,
    cleaned: AtomicBool,
}

impl Workspace {
    pub fn new(written: WrittenTorrc) -> Self {
        Self {
            torrc: written.torrc,
            data_dir: written.data_dir,
            delete_list: written.delete_list,
            cleaned: AtomicBool::new(false),
        }
    }

    pub fn torrc(&self) -> &Path {
        &self.torrc
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.delete_list
    }

    /// Remove every temporary path
    ///
    /// Only the first call deletes anything; returns whether this call did.
    pub fn cleanup(&self) -> bool {
        if self.cleaned.swap(true, Ordering::SeqCst) {
            return false;
        }
        debug!("Removing tor workspace files: {:?}", self.delete_list);
        delete_files_or_dirs(&self.delete_list);
        true
    }

    pub fn is_cleaned(&self) -> bool {
        self.cleaned.load(Ordering::SeqCst)
    }
}

type Hook = Box<dyn FnOnce() + Send>;

/// Callbacks run once at process shutdown
#[derive(Default)]
pub struct ShutdownHooks {
    hooks: Mutex<Vec<Hook>>,
}

impl ShutdownHooks {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register<F: FnOnce() + Send + 'static>(&self, hook: F) {
        self.lock().push(Box::new(hook));
    }

    /// Register cleanup of `workspace`
    pub fn register_cleanup(&self, workspace: &Arc<Workspace>) {
        let workspace = Arc::clone(workspace);
        self.register(move || {
            workspace.cleanup();
        });
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run and forget every registered hook, returning how many ran
    pub fn run(&self) -> usize {
        let hooks = std::mem::take(&mut *self.lock());
        let count = hooks.len();
        for hook in hooks {
            hook();
        }
        count
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Hook>> {
        self.hooks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for ShutdownHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownHooks")
            .field("registered", &self.len())
            .finish()
    }
}
