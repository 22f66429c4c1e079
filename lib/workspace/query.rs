//! The results of reading a workspace.

use serde::{Deserialize, Serialize};

use crate::memory::{RefMap, Span, UserDefined, Value};

/// A copy of one entry, or of one undefined byte, as seen by a client.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct EntryView {
    pub address: u64,
    #[serde(rename = "type")]
    pub type_name: String,
    pub value: Value,
    pub length: u64,
    pub user_defined: UserDefined,
    pub comment: Option<String>,
    pub raw: Vec<u8>,
    pub refs: RefMap,
    pub xrefs: RefMap,
}

impl EntryView {
    /// Build a view of a span. Undefined bytes become one-byte entries of
    /// type `undefined_type` holding the raw byte.
    pub(crate) fn from_span(span: &Span, undefined_type: &str) -> EntryView {
        match span.entry() {
            Some(entry) => EntryView {
                address: entry.address(),
                type_name: entry.type_name().to_string(),
                value: entry.value().clone(),
                length: entry.length(),
                user_defined: entry.user_defined().clone(),
                comment: entry.comment().map(|c| c.to_string()),
                raw: span.raw().to_vec(),
                refs: span.refs().clone(),
                xrefs: span.xrefs().clone(),
            },
            None => EntryView {
                address: span.address(),
                type_name: undefined_type.to_string(),
                value: Value::Unsigned(span.raw().first().cloned().unwrap_or(0) as u64),
                length: 1,
                user_defined: UserDefined::new(),
                comment: None,
                raw: span.raw().to_vec(),
                refs: RefMap::new(),
                xrefs: span.xrefs().clone(),
            },
        }
    }
}

/// The entries of a range, and the revision of the workspace when they were
/// read.
///
/// `revision` is always the current revision of the workspace, even when a
/// `since` filter left older entries out. Clients poll again with
/// `since: Some(revision)` to receive only what changed in between.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Query {
    pub revision: u64,
    pub entries: Vec<EntryView>,
}
