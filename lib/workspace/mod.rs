//! The workspace: named memory blocks, their annotations, and the revision
//! history tying every change together.
//!
//! All changes happen inside a transaction. Each transaction is one revision,
//! and every change made inside it is recorded in the `TransactionLog` as an
//! `Operation` which can be inverted. Undo and redo replay recorded
//! operations through the same dispatch used to perform them in the first
//! place, so there is exactly one code path mutating workspace state.
//!
//! ```
//! use falcon_workspace::memory::{MemoryEntry, RefMap, Value};
//! use falcon_workspace::workspace::Workspace;
//!
//! let mut workspace = Workspace::default().with_block("data", vec![0x41, 0x42, 0x43, 0x44], 0)?;
//!
//! workspace.transaction(|workspace| {
//!     let entry = MemoryEntry::new(0, 2, "uint16", Value::Unsigned(0x4241))?;
//!     workspace.define("data", entry, &RefMap::new())
//! })?;
//!
//! let query = workspace.get("data", 0, 4, None)?;
//! assert_eq!(query.revision, 1);
//! assert_eq!(query.entries.len(), 3);
//!
//! workspace.undo()?;
//! assert_eq!(workspace.get("data", 0, 4, None)?.entries.len(), 4);
//! # Ok::<(), falcon_workspace::Error>(())
//! ```

mod options;
mod persist;
mod query;
mod shared;

pub use self::options::{Options, OptionsBuilder, DEFAULT_TYPE, UNDEFINED_TYPE};
pub use self::query::{EntryView, Query};
pub use self::shared::SharedWorkspace;

use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::memory::refs::validate_ref_type;
use crate::memory::{MemoryBlock, MemoryEntry, RefMap, UserDefined, Value};
use crate::transaction::{self, Operation, TransactionLog};
use crate::Error;

struct Checkpoint {
    blocks: BTreeMap<String, MemoryBlock>,
    log: transaction::Checkpoint,
}

/// A set of named memory blocks, their entries and references, and the
/// history of every change made to them.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Workspace {
    options: Options,
    blocks: BTreeMap<String, MemoryBlock>,
    log: TransactionLog,
    #[serde(skip)]
    in_transaction: bool,
}

impl Default for Workspace {
    fn default() -> Workspace {
        Workspace::new(Options::default())
    }
}

impl Workspace {
    /// Create a new, empty `Workspace` at revision 0.
    pub fn new(options: Options) -> Workspace {
        Workspace {
            options,
            blocks: BTreeMap::new(),
            log: TransactionLog::new(),
            in_transaction: false,
        }
    }

    /// Add a block while setting up a workspace.
    ///
    /// Unlike `create_block`, this does not create a revision and cannot be
    /// undone.
    pub fn with_block<S: Into<String>>(
        mut self,
        name: S,
        raw: Vec<u8>,
        base_address: u64,
    ) -> Result<Workspace, Error> {
        let name = name.into();
        if self.blocks.contains_key(&name) {
            return Err(Error::DuplicateBlock(name));
        }
        let revision = self.revision();
        self.blocks.insert(
            name.clone(),
            MemoryBlock::new(name, raw, base_address, revision),
        );
        Ok(self)
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// The current revision.
    pub fn revision(&self) -> u64 {
        self.log.revision()
    }

    pub fn log(&self) -> &TransactionLog {
        &self.log
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    pub fn can_undo(&self) -> bool {
        self.log.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.log.can_redo()
    }

    /// The names of every block, in order.
    pub fn block_names(&self) -> Vec<&str> {
        self.blocks.keys().map(|name| name.as_str()).collect()
    }

    /// Get a block by name.
    pub fn block(&self, name: &str) -> Result<&MemoryBlock, Error> {
        self.blocks
            .get(name)
            .ok_or_else(|| Error::UnknownBlock(name.to_string()))
    }

    fn block_mut(&mut self, name: &str) -> Result<&mut MemoryBlock, Error> {
        self.blocks
            .get_mut(name)
            .ok_or_else(|| Error::UnknownBlock(name.to_string()))
    }

    fn entry(&self, block: &str, address: u64) -> Result<&MemoryEntry, Error> {
        self.block(block)?
            .entry_at(address)
            .ok_or_else(|| Error::NotDefined {
                block: block.to_string(),
                address,
            })
    }

    fn require_transaction(&self) -> Result<(), Error> {
        if self.in_transaction {
            Ok(())
        } else {
            Err(Error::NotInTransaction)
        }
    }

    fn require_idle(&self) -> Result<(), Error> {
        if self.in_transaction {
            Err(Error::TransactionInProgress)
        } else {
            Ok(())
        }
    }

    /// Begin a transaction, creating a new revision.
    ///
    /// Transactions do not nest. If changes made before the matching
    /// `transaction_end` fail, they are left in place as a partial revision
    /// which can be undone. `Workspace::transaction` rolls back instead.
    pub fn transaction_begin(&mut self) -> Result<(), Error> {
        self.require_idle()?;
        self.log.increment(true, true);
        self.in_transaction = true;
        debug!("transaction begin, revision {}", self.revision());
        Ok(())
    }

    /// End the current transaction.
    pub fn transaction_end(&mut self) -> Result<(), Error> {
        self.require_transaction()?;
        self.in_transaction = false;
        debug!("transaction end, revision {}", self.revision());
        Ok(())
    }

    /// Run `f` inside a transaction.
    ///
    /// If `f` fails, every change it made is rolled back, the revision it
    /// created is discarded, and the error is returned.
    pub fn transaction<F, T>(&mut self, f: F) -> Result<T, Error>
    where
        F: FnOnce(&mut Workspace) -> Result<T, Error>,
    {
        self.require_idle()?;
        let checkpoint = self.checkpoint();
        self.transaction_begin()?;
        match f(self) {
            Ok(result) => {
                self.in_transaction = false;
                debug!("transaction end, revision {}", self.revision());
                Ok(result)
            }
            Err(e) => {
                warn!("rolling back revision {}: {}", self.revision(), e);
                self.rollback(checkpoint);
                Err(e)
            }
        }
    }

    fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            blocks: self.blocks.clone(),
            log: self.log.checkpoint(),
        }
    }

    fn rollback(&mut self, checkpoint: Checkpoint) {
        self.blocks = checkpoint.blocks;
        self.log.rollback(checkpoint.log);
        self.in_transaction = false;
    }

    /// Apply an operation and record it in the current revision.
    fn perform(&mut self, operation: Operation) -> Result<(), Error> {
        self.apply(&operation)?;
        self.log.add_to_current(operation);
        Ok(())
    }

    fn replay(&mut self, operations: Vec<Operation>) -> Result<(), Error> {
        for operation in operations {
            self.perform(operation)?;
        }
        Ok(())
    }

    /// Apply an operation to the workspace state, stamping everything it
    /// changes with the current revision.
    fn apply(&mut self, operation: &Operation) -> Result<(), Error> {
        trace!("apply {}", operation);
        let revision = self.revision();
        match *operation {
            Operation::Define {
                ref block,
                ref entry,
            } => self.block_mut(block)?.define(entry.clone(), revision),
            Operation::Undefine {
                ref block,
                ref entry,
            } => self
                .block_mut(block)?
                .undefine(entry, revision)
                .map(|_| ()),
            Operation::AddRefs {
                ref block,
                ref ref_type,
                from,
                ref tos,
            } => {
                let memory_block = self.block_mut(block)?;
                memory_block
                    .refs_mut()
                    .add(ref_type, from, tos.iter().cloned())?;
                touch_reference(memory_block, from, tos, revision);
                Ok(())
            }
            Operation::RemoveRefs {
                ref block,
                ref ref_type,
                from,
                ref tos,
            } => {
                let memory_block = self.block_mut(block)?;
                memory_block
                    .refs_mut()
                    .remove(ref_type, from, tos.iter().cloned())?;
                touch_reference(memory_block, from, tos, revision);
                Ok(())
            }
            Operation::SetComment {
                ref block,
                address,
                ref new,
                ..
            } => {
                let memory_block = self.block_mut(block)?;
                match memory_block.entry_mut(address) {
                    Some(entry) => entry.set_comment(new.clone()),
                    None => {
                        return Err(Error::NotDefined {
                            block: block.clone(),
                            address,
                        })
                    }
                }
                memory_block.touch(address, revision);
                Ok(())
            }
            Operation::SetUserDefined {
                ref block,
                address,
                ref new,
                ..
            } => {
                let memory_block = self.block_mut(block)?;
                match memory_block.entry_mut(address) {
                    Some(entry) => entry.set_user_defined(new.clone()),
                    None => {
                        return Err(Error::NotDefined {
                            block: block.clone(),
                            address,
                        })
                    }
                }
                memory_block.touch(address, revision);
                Ok(())
            }
            Operation::CreateBlock {
                ref name,
                base_address,
                ref raw,
            } => {
                if self.blocks.contains_key(name) {
                    return Err(Error::DuplicateBlock(name.clone()));
                }
                debug!("creating block \"{}\" ({} bytes)", name, raw.len());
                self.blocks.insert(
                    name.clone(),
                    MemoryBlock::from_shared(name.clone(), raw.clone(), base_address, revision),
                );
                Ok(())
            }
            Operation::DeleteBlock { ref name, .. } => {
                let memory_block = self.block(name)?;
                if !memory_block.entries().is_empty() || !memory_block.refs().is_empty() {
                    return Err(Error::InvalidArgument(format!(
                        "block \"{}\" still has entries",
                        name
                    )));
                }
                debug!("deleting block \"{}\"", name);
                self.blocks.remove(name);
                Ok(())
            }
        }
    }

    /// Define an entry in `block`, along with the references it makes.
    ///
    /// Any entry overlapping the new one is undefined first, along with every
    /// reference originating from it. Bytes those entries covered which the
    /// new entry does not are left undefined.
    pub fn define(&mut self, block: &str, entry: MemoryEntry, refs: &RefMap) -> Result<(), Error> {
        self.require_transaction()?;
        for ref_type in refs.keys() {
            validate_ref_type(ref_type)?;
        }
        self.block(block)?
            .check_range(entry.address(), entry.length())?;

        self.undefine_range(block, entry.address(), entry.length())?;
        let address = entry.address();
        self.perform(Operation::Define {
            block: block.to_string(),
            entry,
        })?;
        for (ref_type, tos) in refs {
            self.add_new_refs(block, ref_type, address, tos.iter().cloned())?;
        }
        Ok(())
    }

    /// Undefine every entry which covers any address in
    /// `[address, address + length)`.
    ///
    /// Entries are undefined whole, even where they extend past the range.
    /// Undefined addresses are left alone.
    pub fn undefine(&mut self, block: &str, address: u64, length: u64) -> Result<(), Error> {
        self.require_transaction()?;
        self.block(block)?.check_range(address, length)?;
        self.undefine_range(block, address, length)
    }

    fn undefine_range(&mut self, block: &str, address: u64, length: u64) -> Result<(), Error> {
        for entry in self.block(block)?.entries_in(address, length) {
            self.undefine_entry(block, entry)?;
        }
        Ok(())
    }

    fn undefine_entry(&mut self, block: &str, entry: MemoryEntry) -> Result<(), Error> {
        let outgoing: Vec<(u64, String, BTreeSet<u64>)> = self
            .block(block)?
            .refs()
            .refs_in(entry.address()..entry.end())
            .flat_map(|(from, ref_map)| {
                ref_map
                    .iter()
                    .map(move |(ref_type, tos)| (from, ref_type.clone(), tos.clone()))
            })
            .collect();

        for (from, ref_type, tos) in outgoing {
            self.perform(Operation::RemoveRefs {
                block: block.to_string(),
                ref_type,
                from,
                tos,
            })?;
        }
        self.perform(Operation::Undefine {
            block: block.to_string(),
            entry,
        })
    }

    /// Get the start address of the entry covering `address`, defining a
    /// one-byte entry of the default type over it first if there is none.
    pub fn get_or_define_default(&mut self, block: &str, address: u64) -> Result<u64, Error> {
        self.require_transaction()?;
        let memory_block = self.block(block)?;
        memory_block.check_range(address, 1)?;
        if let Some(owner) = memory_block.owner(address) {
            return Ok(owner);
        }

        let byte = memory_block.raw()[address as usize];
        let entry = MemoryEntry::new(
            address,
            1,
            self.options.default_type(),
            Value::Unsigned(byte as u64),
        )?;
        self.perform(Operation::Define {
            block: block.to_string(),
            entry,
        })?;
        Ok(address)
    }

    /// Set the comment of the entry covering `address`.
    pub fn set_comment(
        &mut self,
        block: &str,
        address: u64,
        comment: Option<String>,
    ) -> Result<(), Error> {
        self.require_transaction()?;
        let start = self.get_or_define_default(block, address)?;
        let old = self.entry(block, start)?.comment().map(|c| c.to_string());
        self.perform(Operation::SetComment {
            block: block.to_string(),
            address: start,
            old,
            new: comment,
        })
    }

    /// Replace the user-defined bag of the entry covering `address`.
    pub fn replace_user_defined(
        &mut self,
        block: &str,
        address: u64,
        user_defined: UserDefined,
    ) -> Result<(), Error> {
        self.require_transaction()?;
        let start = self.get_or_define_default(block, address)?;
        let old = self.entry(block, start)?.user_defined().clone();
        self.perform(Operation::SetUserDefined {
            block: block.to_string(),
            address: start,
            old,
            new: user_defined,
        })
    }

    /// Merge keys into the user-defined bag of the entry covering `address`.
    ///
    /// The merge is shallow: a key present in `user_defined` replaces the
    /// existing value for that key entirely.
    pub fn update_user_defined(
        &mut self,
        block: &str,
        address: u64,
        user_defined: UserDefined,
    ) -> Result<(), Error> {
        self.require_transaction()?;
        let start = self.get_or_define_default(block, address)?;
        let old = self.entry(block, start)?.user_defined().clone();
        let mut new = old.clone();
        new.extend(user_defined);
        self.perform(Operation::SetUserDefined {
            block: block.to_string(),
            address: start,
            old,
            new,
        })
    }

    /// Add references of type `ref_type` from `from` to each of `tos`.
    ///
    /// References accumulate across calls. An entry of the default type is
    /// defined at `from` if there is none.
    pub fn add_refs<I>(&mut self, block: &str, ref_type: &str, from: u64, tos: I) -> Result<(), Error>
    where
        I: IntoIterator<Item = u64>,
    {
        self.require_transaction()?;
        validate_ref_type(ref_type)?;
        self.get_or_define_default(block, from)?;
        self.add_new_refs(block, ref_type, from, tos)
    }

    fn add_new_refs<I>(&mut self, block: &str, ref_type: &str, from: u64, tos: I) -> Result<(), Error>
    where
        I: IntoIterator<Item = u64>,
    {
        let existing = self
            .block(block)?
            .refs()
            .get_refs(from)
            .remove(ref_type)
            .unwrap_or_default();
        let tos: BTreeSet<u64> = tos.into_iter().filter(|to| !existing.contains(to)).collect();
        if tos.is_empty() {
            return Ok(());
        }
        self.perform(Operation::AddRefs {
            block: block.to_string(),
            ref_type: ref_type.to_string(),
            from,
            tos,
        })
    }

    /// Remove references of type `ref_type` from `from` to each of `tos`.
    /// References which do not exist are ignored.
    pub fn remove_refs<I>(
        &mut self,
        block: &str,
        ref_type: &str,
        from: u64,
        tos: I,
    ) -> Result<(), Error>
    where
        I: IntoIterator<Item = u64>,
    {
        self.require_transaction()?;
        validate_ref_type(ref_type)?;
        self.get_or_define_default(block, from)?;
        let existing = self
            .block(block)?
            .refs()
            .get_refs(from)
            .remove(ref_type)
            .unwrap_or_default();
        let tos: BTreeSet<u64> = tos.into_iter().filter(|to| existing.contains(to)).collect();
        if tos.is_empty() {
            return Ok(());
        }
        self.perform(Operation::RemoveRefs {
            block: block.to_string(),
            ref_type: ref_type.to_string(),
            from,
            tos,
        })
    }

    /// Create a new, empty block.
    pub fn create_block<S: Into<String>>(
        &mut self,
        name: S,
        raw: Vec<u8>,
        base_address: u64,
    ) -> Result<(), Error> {
        self.require_transaction()?;
        let name = name.into();
        if self.blocks.contains_key(&name) {
            return Err(Error::DuplicateBlock(name));
        }
        self.perform(Operation::CreateBlock {
            name,
            base_address,
            raw: Arc::new(raw),
        })
    }

    /// Delete a block, undefining every entry in it first.
    pub fn delete_block(&mut self, name: &str) -> Result<(), Error> {
        self.require_transaction()?;
        let memory_block = self.block(name)?;
        let base_address = memory_block.base_address();
        let raw = memory_block.shared_raw();
        let entries: Vec<MemoryEntry> = memory_block.entries().into_iter().cloned().collect();

        for entry in entries {
            self.undefine_entry(name, entry)?;
        }
        self.perform(Operation::DeleteBlock {
            name: name.to_string(),
            base_address,
            raw,
        })
    }

    /// Read `[address, address + length)` of `block`.
    ///
    /// When `since` is given, only entries which changed after that revision
    /// are returned.
    pub fn get(
        &self,
        block: &str,
        address: u64,
        length: u64,
        since: Option<u64>,
    ) -> Result<Query, Error> {
        let undefined_type = self.options.undefined_type();
        let entries = self
            .block(block)?
            .each_in_range(address, length, since)?
            .map(|span| EntryView::from_span(&span, undefined_type))
            .collect();
        Ok(Query {
            revision: self.revision(),
            entries,
        })
    }

    /// Read the entry covering `address`, or the undefined byte at `address`.
    pub fn get_entry(&self, block: &str, address: u64) -> Result<EntryView, Error> {
        let memory_block = self.block(block)?;
        memory_block.check_range(address, 1)?;
        let start = memory_block.owner(address).unwrap_or(address);
        let span = memory_block
            .each_in_range(start, 1, None)?
            .next()
            .ok_or_else(|| Error::OutOfRange {
                block: block.to_string(),
                address,
                length: 1,
            })?;
        Ok(EntryView::from_span(&span, self.options.undefined_type()))
    }

    /// Undo the most recent undoable revision.
    ///
    /// Undoing creates a new revision. Returns false, without creating a
    /// revision, if there is nothing to undo.
    pub fn undo(&mut self) -> Result<bool, Error> {
        self.require_idle()?;
        if !self.log.can_undo() {
            debug!("nothing to undo at revision {}", self.revision());
            return Ok(false);
        }
        let checkpoint = self.checkpoint();
        let operations = self.log.prepare_undo().unwrap_or_default();
        debug!("undo, revision {}", self.revision());
        if let Err(e) = self.replay(operations) {
            warn!("undo failed at revision {}: {}", self.revision(), e);
            self.rollback(checkpoint);
            return Err(e);
        }
        Ok(true)
    }

    /// Redo the most recently undone revision.
    ///
    /// Redoing creates a new revision. Returns false, without creating a
    /// revision, if there is nothing to redo.
    pub fn redo(&mut self) -> Result<bool, Error> {
        self.require_idle()?;
        if !self.log.can_redo() {
            debug!("nothing to redo at revision {}", self.revision());
            return Ok(false);
        }
        let checkpoint = self.checkpoint();
        let operations = self.log.prepare_redo().unwrap_or_default();
        debug!("redo, revision {}", self.revision());
        if let Err(e) = self.replay(operations) {
            warn!("redo failed at revision {}: {}", self.revision(), e);
            self.rollback(checkpoint);
            return Err(e);
        }
        Ok(true)
    }
}

/// Stamp both ends of a reference so clients polling for changes see the new
/// refs and xrefs.
fn touch_reference(block: &mut MemoryBlock, from: u64, tos: &BTreeSet<u64>, revision: u64) {
    block.touch(from, revision);
    for to in tos {
        block.touch(*to, revision);
    }
}
