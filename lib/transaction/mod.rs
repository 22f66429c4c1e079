//! Revision history, undo and redo.
//!
//! Every transaction, undo and redo creates a new revision. History is never
//! erased: undoing a revision appends a new, non-undoable revision holding the
//! inverse operations, and marks the undone revision as consumed. Repeated
//! undos walk further back past revisions that were consumed or created by
//! undo itself.
//!
//! The log does not know how to apply operations. `prepare_undo` and
//! `prepare_redo` update the bookkeeping and hand back the operations the
//! owner must replay, which it then logs into the new current revision with
//! `add_to_current`.

mod operation;

pub use self::operation::Operation;

use log::trace;
use serde::{Deserialize, Serialize};

/// The operations performed at one revision.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct Record {
    undoable: bool,
    operations: Vec<Operation>,
}

impl Record {
    fn new(undoable: bool) -> Record {
        Record {
            undoable,
            operations: Vec::new(),
        }
    }

    /// Whether `undo` may still reverse this revision.
    pub fn undoable(&self) -> bool {
        self.undoable
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }
}

/// A saved position in the log, restored with `TransactionLog::rollback`.
#[derive(Clone, Debug)]
pub struct Checkpoint {
    revision: u64,
    undo_cursor: u64,
    undoable: Vec<bool>,
    redo: Vec<Record>,
}

/// A branching, append-only revision history.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct TransactionLog {
    revision: u64,
    history: Vec<Record>,
    redo: Vec<Record>,
    undo_cursor: u64,
}

impl Default for TransactionLog {
    fn default() -> TransactionLog {
        TransactionLog::new()
    }
}

impl TransactionLog {
    /// Create a new log at revision 0.
    pub fn new() -> TransactionLog {
        TransactionLog {
            revision: 0,
            history: vec![Record::new(false)],
            redo: Vec::new(),
            undo_cursor: 0,
        }
    }

    /// The current revision.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// The record for the given revision.
    pub fn record(&self, revision: u64) -> Option<&Record> {
        self.history.get(revision as usize)
    }

    /// The records waiting to be redone, most recent last.
    pub fn redo_stack(&self) -> &[Record] {
        &self.redo
    }

    /// Begin a new revision.
    ///
    /// Ordinary transactions kill the redo buffer: once new changes are made,
    /// undone revisions can no longer be redone.
    pub fn increment(&mut self, undoable: bool, kill_redo_buffer: bool) {
        self.history.push(Record::new(undoable));
        self.revision += 1;
        if kill_redo_buffer {
            self.redo.clear();
            self.undo_cursor = self.revision;
        }
        trace!(
            "revision {} (undoable={}, kill_redo_buffer={})",
            self.revision,
            undoable,
            kill_redo_buffer
        );
    }

    /// Record an operation as part of the current revision.
    pub fn add_to_current(&mut self, operation: Operation) {
        let revision = self.revision as usize;
        self.history[revision].operations.push(operation);
    }

    fn find_undoable(&self) -> Option<u64> {
        (1..=self.undo_cursor)
            .rev()
            .find(|revision| self.history[*revision as usize].undoable)
    }

    pub fn can_undo(&self) -> bool {
        self.find_undoable().is_some()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    /// Begin undoing the most recent undoable revision.
    ///
    /// A new, non-undoable revision is created and the undone revision is
    /// moved to the redo stack. Returns the operations to replay, which are
    /// the inverses of the undone operations in reverse order, or `None` if
    /// there is nothing to undo.
    pub fn prepare_undo(&mut self) -> Option<Vec<Operation>> {
        let target = self.find_undoable()?;
        self.increment(false, false);

        let record = &mut self.history[target as usize];
        record.undoable = false;
        let operations = record
            .operations
            .iter()
            .rev()
            .map(|operation| operation.invert())
            .collect();
        let record = record.clone();

        self.redo.push(record);
        self.undo_cursor = target - 1;
        trace!("undoing revision {} at revision {}", target, self.revision);
        Some(operations)
    }

    /// Begin redoing the most recently undone revision.
    ///
    /// A new, undoable revision is created. Returns the original operations
    /// in their original order, or `None` if there is nothing to redo.
    pub fn prepare_redo(&mut self) -> Option<Vec<Operation>> {
        let record = self.redo.pop()?;
        self.increment(true, false);
        self.undo_cursor = self.revision;
        trace!("redoing at revision {}", self.revision);
        Some(record.operations)
    }

    /// Save the current position of the log.
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            revision: self.revision,
            undo_cursor: self.undo_cursor,
            undoable: self.history.iter().map(|record| record.undoable).collect(),
            redo: self.redo.clone(),
        }
    }

    /// Return the log to a saved position, discarding every revision created
    /// since.
    pub fn rollback(&mut self, checkpoint: Checkpoint) {
        self.history.truncate(checkpoint.revision as usize + 1);
        for (record, undoable) in self.history.iter_mut().zip(checkpoint.undoable) {
            record.undoable = undoable;
        }
        self.revision = checkpoint.revision;
        self.undo_cursor = checkpoint.undo_cursor;
        self.redo = checkpoint.redo;
    }

    /// Check the internal consistency of the log, as after loading it from
    /// untrusted input.
    pub(crate) fn is_consistent(&self) -> bool {
        self.history.len() as u64 == self.revision + 1
            && self.undo_cursor <= self.revision
            && !self.history[0].undoable
            && self.history[0].operations.is_empty()
    }
}
