//! A named raw buffer overlaid with entries.
//!
//! Every address of the buffer has a `Cell` holding the revision at which the
//! address last changed and, if it is covered by an entry, the start address
//! of that entry. Cells live in copy-on-write pages, so cloning a block is
//! cheap and only the pages written after the clone are duplicated. Entries
//! are stored in the page holding their start address.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::memory::entry::MemoryEntry;
use crate::memory::refs::{merge_ref_map, RefMap, ReferenceIndex};
use crate::Error;

/// The number of cells in a page.
pub const PAGE_SIZE: u64 = 1024;
const PAGE_MASK: u64 = !(PAGE_SIZE - 1);

/// Ownership and revision information for one address.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Cell {
    revision: u64,
    owner: Option<u64>,
}

impl Cell {
    fn new(revision: u64) -> Cell {
        Cell {
            revision,
            owner: None,
        }
    }

    /// The revision at which this address last changed.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// The start address of the entry covering this address.
    pub fn owner(&self) -> Option<u64> {
        self.owner
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
struct Page {
    cells: Vec<Cell>,
    entries: BTreeMap<u64, MemoryEntry>,
}

impl Page {
    fn new(revision: u64) -> Page {
        Page {
            cells: vec![Cell::new(revision); PAGE_SIZE as usize],
            entries: BTreeMap::new(),
        }
    }
}

fn page_address(address: u64) -> u64 {
    address & PAGE_MASK
}

fn page_offset(address: u64) -> usize {
    (address & !PAGE_MASK) as usize
}

/// One contiguous span yielded while walking a block: either a whole entry, or
/// a single undefined byte.
#[derive(Clone, Debug)]
pub struct Span<'b> {
    address: u64,
    entry: Option<&'b MemoryEntry>,
    raw: &'b [u8],
    revision: u64,
    refs: RefMap,
    xrefs: RefMap,
}

impl<'b> Span<'b> {
    pub fn address(&self) -> u64 {
        self.address
    }

    /// The entry covering this span, or `None` for an undefined byte.
    pub fn entry(&self) -> Option<&'b MemoryEntry> {
        self.entry
    }

    /// The raw bytes beneath this span.
    pub fn raw(&self) -> &'b [u8] {
        self.raw
    }

    /// The most recent revision at which any address of this span changed.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn refs(&self) -> &RefMap {
        &self.refs
    }

    pub fn xrefs(&self) -> &RefMap {
        &self.xrefs
    }
}

/// Iterates over the spans of a range of a block. See
/// `MemoryBlock::each_in_range`.
pub struct RangeIter<'b> {
    block: &'b MemoryBlock,
    next: u64,
    end: u64,
    since: Option<u64>,
}

impl<'b> Iterator for RangeIter<'b> {
    type Item = Span<'b>;

    fn next(&mut self) -> Option<Span<'b>> {
        let block = self.block;
        while self.next < self.end {
            let (start, end, entry) = match block.entry_at(self.next) {
                Some(entry) => (entry.address(), entry.end(), Some(entry)),
                None => (self.next, self.next + 1, None),
            };
            self.next = end;

            let revision = block.last_touched(start, end);
            if let Some(since) = self.since {
                if revision <= since {
                    continue;
                }
            }

            return Some(Span {
                address: start,
                entry,
                raw: &block.raw[start as usize..end as usize],
                revision,
                refs: block.span_refs(start, end),
                xrefs: block.span_xrefs(start, end),
            });
        }
        None
    }
}

/// A named, immutable buffer of raw bytes, overlaid with non-overlapping
/// entries and the references between them.
///
/// Addresses are relative to the start of the buffer. `base_address` is where
/// the buffer lives in the address space of the program under analysis, and is
/// only carried for display.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct MemoryBlock {
    name: String,
    base_address: u64,
    #[serde(with = "crate::memory::raw")]
    raw: Arc<Vec<u8>>,
    created: u64,
    pages: FxHashMap<u64, Arc<Page>>,
    refs: Arc<ReferenceIndex>,
}

impl MemoryBlock {
    /// Create a new `MemoryBlock` with no entries. Every address is stamped
    /// with `revision`.
    pub fn new<S: Into<String>>(
        name: S,
        raw: Vec<u8>,
        base_address: u64,
        revision: u64,
    ) -> MemoryBlock {
        MemoryBlock::from_shared(name.into(), Arc::new(raw), base_address, revision)
    }

    pub(crate) fn from_shared(
        name: String,
        raw: Arc<Vec<u8>>,
        base_address: u64,
        revision: u64,
    ) -> MemoryBlock {
        MemoryBlock {
            name,
            base_address,
            raw,
            created: revision,
            pages: FxHashMap::default(),
            refs: Arc::new(ReferenceIndex::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base_address(&self) -> u64 {
        self.base_address
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub(crate) fn shared_raw(&self) -> Arc<Vec<u8>> {
        self.raw.clone()
    }

    /// The length of this block in bytes.
    pub fn len(&self) -> u64 {
        self.raw.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Ensure `[address, address + length)` lies inside this block, returning
    /// the end of the range.
    pub fn check_range(&self, address: u64, length: u64) -> Result<u64, Error> {
        address
            .checked_add(length)
            .filter(|end| *end <= self.len())
            .ok_or_else(|| Error::OutOfRange {
                block: self.name.clone(),
                address,
                length,
            })
    }

    /// Get the `Cell` for the given address.
    pub fn cell(&self, address: u64) -> Cell {
        self.pages
            .get(&page_address(address))
            .map(|page| page.cells[page_offset(address)])
            .unwrap_or_else(|| Cell::new(self.created))
    }

    fn page_mut(&mut self, address: u64) -> &mut Page {
        let created = self.created;
        let page = self
            .pages
            .entry(page_address(address))
            .or_insert_with(|| Arc::new(Page::new(created)));
        Arc::make_mut(page)
    }

    fn cell_mut(&mut self, address: u64) -> &mut Cell {
        &mut self.page_mut(address).cells[page_offset(address)]
    }

    /// The start address of the entry covering `address`, if there is one.
    pub fn owner(&self, address: u64) -> Option<u64> {
        self.cell(address).owner()
    }

    /// Get the entry covering `address`, if there is one.
    pub fn entry_at(&self, address: u64) -> Option<&MemoryEntry> {
        let start = self.owner(address)?;
        self.pages.get(&page_address(start))?.entries.get(&start)
    }

    pub(crate) fn entry_mut(&mut self, start: u64) -> Option<&mut MemoryEntry> {
        let present = self
            .pages
            .get(&page_address(start))
            .map(|page| page.entries.contains_key(&start))
            .unwrap_or(false);
        if !present {
            return None;
        }
        self.page_mut(start).entries.get_mut(&start)
    }

    /// Every entry in this block, ordered by address.
    pub fn entries(&self) -> Vec<&MemoryEntry> {
        let mut entries: Vec<&MemoryEntry> = self
            .pages
            .values()
            .flat_map(|page| page.entries.values())
            .collect();
        entries.sort_by_key(|entry| entry.address());
        entries
    }

    /// Every entry which covers at least one address in
    /// `[address, address + length)`, ordered by address.
    pub fn entries_in(&self, address: u64, length: u64) -> Vec<MemoryEntry> {
        let end = address.saturating_add(length).min(self.len());
        let mut entries = Vec::new();
        let mut next = address;
        while next < end {
            match self.entry_at(next) {
                Some(entry) => {
                    entries.push(entry.clone());
                    next = entry.end();
                }
                None => next += 1,
            }
        }
        entries
    }

    /// Define an entry, stamping every address it covers with `revision`.
    ///
    /// The caller is expected to have undefined any overlapping entries
    /// already. This fails if the entry leaves the block, or any address it
    /// covers is still owned.
    pub fn define(&mut self, entry: MemoryEntry, revision: u64) -> Result<(), Error> {
        let start = entry.address();
        let end = self.check_range(start, entry.length())?;
        if let Some(address) = (start..end).find(|address| self.owner(*address).is_some()) {
            return Err(Error::Overlap {
                block: self.name.clone(),
                address,
            });
        }

        for address in start..end {
            *self.cell_mut(address) = Cell {
                revision,
                owner: Some(start),
            };
        }
        self.page_mut(start).entries.insert(start, entry);
        Ok(())
    }

    /// Undefine an entry, stamping every address it covered with `revision`,
    /// and return the entry as it was stored.
    ///
    /// Fails if any address of `entry` is not owned by it.
    pub fn undefine(&mut self, entry: &MemoryEntry, revision: u64) -> Result<MemoryEntry, Error> {
        let start = entry.address();
        let end = self.check_range(start, entry.length())?;
        let mut not_owned = (start..end).find(|address| self.owner(*address) != Some(start));
        if not_owned.is_none() && self.entry_at(start).map(|e| e.length()) != Some(entry.length()) {
            not_owned = Some(start);
        }
        if let Some(address) = not_owned {
            return Err(Error::NotDefined {
                block: self.name.clone(),
                address,
            });
        }

        let removed = self
            .page_mut(start)
            .entries
            .remove(&start)
            .ok_or_else(|| Error::NotDefined {
                block: self.name.clone(),
                address: start,
            })?;
        for address in start..end {
            *self.cell_mut(address) = Cell {
                revision,
                owner: None,
            };
        }
        Ok(removed)
    }

    /// Stamp the entry covering `address`, or the byte at `address` if it is
    /// undefined, with `revision`. Addresses outside the block are ignored.
    pub fn touch(&mut self, address: u64, revision: u64) {
        if address >= self.len() {
            return;
        }
        let (start, end) = match self.entry_at(address) {
            Some(entry) => (entry.address(), entry.end()),
            None => (address, address + 1),
        };
        for address in start..end {
            self.cell_mut(address).revision = revision;
        }
    }

    /// The most recent revision of any address in `[start, end)`.
    pub fn last_touched(&self, start: u64, end: u64) -> u64 {
        (start..end)
            .map(|address| self.cell(address).revision())
            .max()
            .unwrap_or(self.created)
    }

    pub fn refs(&self) -> &ReferenceIndex {
        &self.refs
    }

    pub(crate) fn refs_mut(&mut self) -> &mut ReferenceIndex {
        Arc::make_mut(&mut self.refs)
    }

    /// Every reference originating inside `[start, end)`.
    pub fn span_refs(&self, start: u64, end: u64) -> RefMap {
        let mut refs = RefMap::new();
        for (_, ref_map) in self.refs.refs_in(start..end) {
            merge_ref_map(&mut refs, ref_map);
        }
        refs
    }

    /// Every entry referencing any address inside `[start, end)`.
    ///
    /// References are byte-granular, but cross references are reported at
    /// entry granularity: each referencing address is replaced by the start
    /// of the entry covering it.
    pub fn span_xrefs(&self, start: u64, end: u64) -> RefMap {
        let mut xrefs = RefMap::new();
        for (_, ref_map) in self.refs.xrefs_in(start..end) {
            for (ref_type, froms) in ref_map {
                let sources = xrefs.entry(ref_type.clone()).or_default();
                for from in froms {
                    sources.insert(self.owner(*from).unwrap_or(*from));
                }
            }
        }
        xrefs
    }

    /// Get the entry covering `address`, if any, along with the cross
    /// references to it.
    pub fn get(&self, address: u64) -> Result<(Option<&MemoryEntry>, RefMap), Error> {
        self.check_range(address, 1)?;
        let entry = self.entry_at(address);
        let xrefs = match entry {
            Some(entry) => self.span_xrefs(entry.address(), entry.end()),
            None => self.span_xrefs(address, address + 1),
        };
        Ok((entry, xrefs))
    }

    /// Walk `[address, address + length)`.
    ///
    /// One `Span` is produced for each entry touching the range, covering the
    /// whole entry even where it begins before `address`, and one for each
    /// undefined byte. When `since` is given, only spans which changed after
    /// revision `since` are produced.
    pub fn each_in_range(
        &self,
        address: u64,
        length: u64,
        since: Option<u64>,
    ) -> Result<RangeIter<'_>, Error> {
        let end = self.check_range(address, length)?;
        Ok(RangeIter {
            block: self,
            next: address,
            end,
            since,
        })
    }

    /// Check the internal consistency of this block, as after loading it from
    /// untrusted input.
    pub(crate) fn validate(&self) -> Result<(), Error> {
        let corrupt = |message: String| {
            Err(Error::CorruptState(format!(
                "block \"{}\": {}",
                self.name, message
            )))
        };

        for (page_base, page) in &self.pages {
            if page_address(*page_base) != *page_base || *page_base >= self.len() {
                return corrupt(format!("misplaced page 0x{:x}", page_base));
            }
            if page.cells.len() != PAGE_SIZE as usize {
                return corrupt(format!("page 0x{:x} has the wrong size", page_base));
            }
            for (start, entry) in &page.entries {
                if entry.address() != *start || page_address(*start) != *page_base {
                    return corrupt(format!("misplaced entry 0x{:x}", start));
                }
                if entry.length() == 0 || self.check_range(*start, entry.length()).is_err() {
                    return corrupt(format!("entry 0x{:x} leaves the block", start));
                }
                if (entry.address()..entry.end()).any(|a| self.owner(a) != Some(*start)) {
                    return corrupt(format!("entry 0x{:x} does not own its range", start));
                }
            }
            for (offset, cell) in page.cells.iter().enumerate() {
                let address = page_base + offset as u64;
                if let Some(owner) = cell.owner() {
                    let covered = self
                        .pages
                        .get(&page_address(owner))
                        .and_then(|page| page.entries.get(&owner))
                        .map(|entry| entry.contains(address))
                        .unwrap_or(false);
                    if !covered {
                        return corrupt(format!("address 0x{:x} has a dangling owner", address));
                    }
                }
            }
        }

        if !self.refs.is_consistent() {
            return corrupt("reference index is inconsistent".to_string());
        }
        if let Some((from, _)) = self
            .refs
            .refs_in(..)
            .find(|(from, _)| self.owner(*from).is_none())
        {
            return corrupt(format!("reference from undefined address 0x{:x}", from));
        }
        Ok(())
    }
}
