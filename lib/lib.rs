//! Falcon Workspace: a versioned, undoable annotation store for reverse
//! engineering raw memory.
//!
//! A `Workspace` holds named `MemoryBlock`s of raw bytes. Analyzers annotate
//! those bytes with typed `MemoryEntry`s, comments, arbitrary user-defined
//! data, and typed references between addresses. Every change happens in a
//! transaction which becomes one revision, and every revision can be undone
//! and redone.
//!
//! Analyzers which prefer to describe their changes as data can hand a json
//! array of actions to an `updater::Updater`, which applies the whole batch
//! or none of it.
//!
//! Clients watching a workspace read ranges with `Workspace::get`, passing
//! the revision of their last read to receive only what changed since.

pub mod error;
pub mod memory;
#[cfg(test)]
mod tests;
pub mod transaction;
pub mod updater;
pub mod workspace;

pub use crate::error::Error;
pub use crate::updater::{Action, Updater};
pub use crate::workspace::{SharedWorkspace, Workspace};
