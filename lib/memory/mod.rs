//! Annotated memory.
//!
//! A `MemoryBlock` is an immutable buffer of raw bytes. Analyzers and users
//! describe how those bytes should be interpreted by defining `MemoryEntry`s
//! over them, and relate entries to one another with typed references kept in
//! a `ReferenceIndex`.
//!
//! Bytes with no entry are still visible: walking a block reports each of them
//! as a single undefined byte.

pub mod block;
pub mod entry;
pub(crate) mod raw;
pub mod refs;

pub use self::block::{Cell, MemoryBlock, RangeIter, Span, PAGE_SIZE};
pub use self::entry::{MemoryEntry, UserDefined, Value};
pub use self::refs::{RefMap, ReferenceIndex};
