//! Byte-granular references between addresses, and their reverse index.
//!
//! Like the successor and predecessor maps of a directed graph, `refs` and
//! `xrefs` are two views of the same set of edges. Every edge
//! `(ref_type, from, to)` is present in both, or in neither.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::RangeBounds;

use crate::Error;

/// References grouped by reference type. Addresses in each set are sorted and
/// unique.
pub type RefMap = BTreeMap<String, BTreeSet<u64>>;

/// A bidirectional index of typed references.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct ReferenceIndex {
    refs: BTreeMap<u64, RefMap>,
    xrefs: BTreeMap<u64, RefMap>,
}

/// Ensure a reference type is a simple scalar tag.
pub fn validate_ref_type(ref_type: &str) -> Result<(), Error> {
    if ref_type.is_empty() {
        return Err(Error::InvalidReference(
            "reference type must not be empty".to_string(),
        ));
    }
    if ref_type
        .chars()
        .any(|c| c.is_whitespace() || c.is_control())
    {
        return Err(Error::InvalidReference(format!(
            "reference type {:?} must be a simple tag",
            ref_type
        )));
    }
    Ok(())
}

fn insert_edge(map: &mut BTreeMap<u64, RefMap>, key: u64, ref_type: &str, value: u64) -> bool {
    map.entry(key)
        .or_default()
        .entry(ref_type.to_string())
        .or_default()
        .insert(value)
}

fn remove_edge(map: &mut BTreeMap<u64, RefMap>, key: u64, ref_type: &str, value: u64) -> bool {
    let ref_map = match map.get_mut(&key) {
        Some(ref_map) => ref_map,
        None => return false,
    };
    let removed = match ref_map.get_mut(ref_type) {
        Some(set) => {
            let removed = set.remove(&value);
            if set.is_empty() {
                ref_map.remove(ref_type);
            }
            removed
        }
        None => false,
    };
    if ref_map.is_empty() {
        map.remove(&key);
    }
    removed
}

impl ReferenceIndex {
    pub fn new() -> ReferenceIndex {
        ReferenceIndex::default()
    }

    /// Returns true if there are no references in this index.
    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    /// Add references of type `ref_type` from `from` to every address in
    /// `tos`.
    ///
    /// References accumulate: declaring the same `(from, ref_type)` again
    /// merges the new targets into the existing ones. Returns the targets which
    /// were not already present.
    pub fn add<I>(&mut self, ref_type: &str, from: u64, tos: I) -> Result<BTreeSet<u64>, Error>
    where
        I: IntoIterator<Item = u64>,
    {
        validate_ref_type(ref_type)?;
        let mut added = BTreeSet::new();
        for to in tos {
            if insert_edge(&mut self.refs, from, ref_type, to) {
                insert_edge(&mut self.xrefs, to, ref_type, from);
                added.insert(to);
            }
        }
        Ok(added)
    }

    /// Remove references of type `ref_type` from `from` to every address in
    /// `tos`.
    ///
    /// Targets which are not present are ignored. Returns the targets which
    /// were actually removed.
    pub fn remove<I>(
        &mut self,
        ref_type: &str,
        from: u64,
        tos: I,
    ) -> Result<BTreeSet<u64>, Error>
    where
        I: IntoIterator<Item = u64>,
    {
        validate_ref_type(ref_type)?;
        let mut removed = BTreeSet::new();
        for to in tos {
            if remove_edge(&mut self.refs, from, ref_type, to) {
                let mirrored = remove_edge(&mut self.xrefs, to, ref_type, from);
                assert!(
                    mirrored,
                    "cross reference {} 0x{:x} -> 0x{:x} missing from reverse index",
                    ref_type, from, to
                );
                removed.insert(to);
            }
        }
        Ok(removed)
    }

    /// Get every reference originating at `from`.
    pub fn get_refs(&self, from: u64) -> RefMap {
        self.refs.get(&from).cloned().unwrap_or_default()
    }

    /// Get every address which references `to`.
    pub fn get_xrefs(&self, to: u64) -> RefMap {
        self.xrefs.get(&to).cloned().unwrap_or_default()
    }

    /// Iterate over the references of every source address in `range`.
    pub fn refs_in<R>(&self, range: R) -> impl Iterator<Item = (u64, &RefMap)>
    where
        R: RangeBounds<u64>,
    {
        self.refs.range(range).map(|(from, ref_map)| (*from, ref_map))
    }

    /// Iterate over the cross references of every target address in `range`.
    pub fn xrefs_in<R>(&self, range: R) -> impl Iterator<Item = (u64, &RefMap)>
    where
        R: RangeBounds<u64>,
    {
        self.xrefs.range(range).map(|(to, ref_map)| (*to, ref_map))
    }

    /// Returns true if the reverse index is exactly the mirror of the forward
    /// index.
    pub(crate) fn is_consistent(&self) -> bool {
        let mut mirror: BTreeMap<u64, RefMap> = BTreeMap::new();
        for (from, ref_map) in &self.refs {
            for (ref_type, tos) in ref_map {
                if tos.is_empty() {
                    return false;
                }
                for to in tos {
                    insert_edge(&mut mirror, *to, ref_type, *from);
                }
            }
        }
        mirror == self.xrefs
    }
}

/// Merge every reference in `other` into `into`.
pub(crate) fn merge_ref_map(into: &mut RefMap, other: &RefMap) {
    for (ref_type, addresses) in other {
        into.entry(ref_type.clone())
            .or_default()
            .extend(addresses.iter().cloned());
    }
}
