use std::sync::{Mutex, MutexGuard};

use crate::workspace::{EntryView, Query, Workspace};
use crate::Error;

/// A `Workspace` behind a single lock, shared between threads.
///
/// Each call holds the lock only for its own duration. Writers go through
/// `transaction`, so a batch of changes is applied with the lock held and is
/// never observed half-done by readers.
#[derive(Debug)]
pub struct SharedWorkspace {
    workspace: Mutex<Workspace>,
}

impl From<Workspace> for SharedWorkspace {
    fn from(workspace: Workspace) -> SharedWorkspace {
        SharedWorkspace::new(workspace)
    }
}

impl SharedWorkspace {
    pub fn new(workspace: Workspace) -> SharedWorkspace {
        SharedWorkspace {
            workspace: Mutex::new(workspace),
        }
    }

    /// Lock the workspace for direct access.
    pub fn lock(&self) -> Result<MutexGuard<'_, Workspace>, Error> {
        self.workspace.lock().map_err(|_| Error::LockPoisoned)
    }

    /// Take the workspace back out of the lock.
    pub fn into_inner(self) -> Result<Workspace, Error> {
        self.workspace.into_inner().map_err(|_| Error::LockPoisoned)
    }

    /// Run `f` inside a transaction with the lock held. See
    /// `Workspace::transaction`.
    pub fn transaction<F, T>(&self, f: F) -> Result<T, Error>
    where
        F: FnOnce(&mut Workspace) -> Result<T, Error>,
    {
        self.lock()?.transaction(f)
    }

    pub fn revision(&self) -> Result<u64, Error> {
        Ok(self.lock()?.revision())
    }

    pub fn get(
        &self,
        block: &str,
        address: u64,
        length: u64,
        since: Option<u64>,
    ) -> Result<Query, Error> {
        self.lock()?.get(block, address, length, since)
    }

    pub fn get_entry(&self, block: &str, address: u64) -> Result<EntryView, Error> {
        self.lock()?.get_entry(block, address)
    }

    pub fn undo(&self) -> Result<bool, Error> {
        self.lock()?.undo()
    }

    pub fn redo(&self) -> Result<bool, Error> {
        self.lock()?.redo()
    }

    pub fn dump(&self) -> Result<String, Error> {
        self.lock()?.dump()
    }

    pub fn load(data: &str) -> Result<SharedWorkspace, Error> {
        Ok(SharedWorkspace::new(Workspace::load(data)?))
    }
}
