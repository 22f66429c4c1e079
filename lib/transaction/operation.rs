//! The reversible operations recorded in the transaction log.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::memory::{MemoryEntry, UserDefined};

/// One reversible change to a workspace.
///
/// The log records operations in the direction they were performed. Redo
/// replays them as they are, and undo replays their inverses.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub enum Operation {
    Define {
        block: String,
        entry: MemoryEntry,
    },
    Undefine {
        block: String,
        entry: MemoryEntry,
    },
    AddRefs {
        block: String,
        ref_type: String,
        from: u64,
        tos: BTreeSet<u64>,
    },
    RemoveRefs {
        block: String,
        ref_type: String,
        from: u64,
        tos: BTreeSet<u64>,
    },
    SetComment {
        block: String,
        address: u64,
        old: Option<String>,
        new: Option<String>,
    },
    SetUserDefined {
        block: String,
        address: u64,
        old: UserDefined,
        new: UserDefined,
    },
    CreateBlock {
        name: String,
        base_address: u64,
        #[serde(with = "crate::memory::raw")]
        raw: Arc<Vec<u8>>,
    },
    DeleteBlock {
        name: String,
        base_address: u64,
        #[serde(with = "crate::memory::raw")]
        raw: Arc<Vec<u8>>,
    },
}

impl Operation {
    /// The operation which exactly reverses this one.
    pub fn invert(&self) -> Operation {
        match self.clone() {
            Operation::Define { block, entry } => Operation::Undefine { block, entry },
            Operation::Undefine { block, entry } => Operation::Define { block, entry },
            Operation::AddRefs {
                block,
                ref_type,
                from,
                tos,
            } => Operation::RemoveRefs {
                block,
                ref_type,
                from,
                tos,
            },
            Operation::RemoveRefs {
                block,
                ref_type,
                from,
                tos,
            } => Operation::AddRefs {
                block,
                ref_type,
                from,
                tos,
            },
            Operation::SetComment {
                block,
                address,
                old,
                new,
            } => Operation::SetComment {
                block,
                address,
                old: new,
                new: old,
            },
            Operation::SetUserDefined {
                block,
                address,
                old,
                new,
            } => Operation::SetUserDefined {
                block,
                address,
                old: new,
                new: old,
            },
            Operation::CreateBlock {
                name,
                base_address,
                raw,
            } => Operation::DeleteBlock {
                name,
                base_address,
                raw,
            },
            Operation::DeleteBlock {
                name,
                base_address,
                raw,
            } => Operation::CreateBlock {
                name,
                base_address,
                raw,
            },
        }
    }

    /// The name of the block this operation applies to.
    pub fn block(&self) -> &str {
        match *self {
            Operation::Define { ref block, .. }
            | Operation::Undefine { ref block, .. }
            | Operation::AddRefs { ref block, .. }
            | Operation::RemoveRefs { ref block, .. }
            | Operation::SetComment { ref block, .. }
            | Operation::SetUserDefined { ref block, .. } => block,
            Operation::CreateBlock { ref name, .. } | Operation::DeleteBlock { ref name, .. } => {
                name
            }
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Operation::Define {
                ref block,
                ref entry,
            } => write!(f, "define {}:{}", block, entry),
            Operation::Undefine {
                ref block,
                ref entry,
            } => write!(f, "undefine {}:{}", block, entry),
            Operation::AddRefs {
                ref block,
                ref ref_type,
                from,
                ref tos,
            } => write!(f, "add_refs {}:0x{:x} {} {:?}", block, from, ref_type, tos),
            Operation::RemoveRefs {
                ref block,
                ref ref_type,
                from,
                ref tos,
            } => write!(
                f,
                "remove_refs {}:0x{:x} {} {:?}",
                block, from, ref_type, tos
            ),
            Operation::SetComment {
                ref block,
                address,
                ref new,
                ..
            } => write!(f, "set_comment {}:0x{:x} {:?}", block, address, new),
            Operation::SetUserDefined {
                ref block, address, ..
            } => write!(f, "set_user_defined {}:0x{:x}", block, address),
            Operation::CreateBlock {
                ref name, ref raw, ..
            } => write!(f, "create_block {} ({} bytes)", name, raw.len()),
            Operation::DeleteBlock {
                ref name, ref raw, ..
            } => write!(f, "delete_block {} ({} bytes)", name, raw.len()),
        }
    }
}
