//! The shared B+-tree engine: page map, rebalance skeleton (split / three-way
//! split / redistribute / concatenate), and the Simple/Multi/Unique per-entry
//! policy differences layered on top of one common core. Per the design note
//! on avoiding inheritance, the three variants share this core and are
//! distinguished only by a runtime `Variant` tag plus the handful of checks
//! that actually differ (uniqueness enforcement, tombstone discipline).

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use log::{debug, warn};

use crate::buffer::{FixMode, PageId, UNDEFINED_PAGE_ID};
use crate::btree::comparator::KeyComparator;
use crate::btree::entry::Entry;
use crate::btree::header::{HeaderPage, HEADER_PAGE_LEN};
use crate::btree::page::Page;
use crate::error::{Error, ErrorCode, Result};
use crate::physical::file::AreaManageFile;

/// The header page is always the first page the allocator hands out on a
/// freshly created file (physical page 0 is the area-manage file header,
/// page 1 its first table, so the first `allocate_page` call always
/// returns page 2).
pub const TREE_HEADER_PAGE_ID: PageId = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    /// No nulls, unique keys, no tombstone.
    Simple,
    /// Per-entry null bitmap, duplicate keys allowed.
    Multi,
    /// Unique keys enforced via tombstone-guarded delete/reinsert.
    Unique,
}

pub struct TreeCore<C: KeyComparator> {
    pub file: AreaManageFile,
    pub comparator: C,
    pub variant: Variant,
    pub header: HeaderPage,
    pub page_map: HashMap<PageId, Page>,
    dirty: HashSet<PageId>,
    header_dirty: bool,
    /// Set on a companion instance created to track expunged keys pending
    /// physical vacuum; never set on a primary index. Only such an instance
    /// tolerates `expunge`/`expunge_entry` being asked to remove a key it
    /// never recorded.
    is_sub_file: bool,
    /// `Unique`'s deleted-key tracker, attached once at construction time —
    /// mirrors the original engine's `m_pExpungeFile`, a companion instance
    /// of the same file held for the tree's whole lifetime, not opened on
    /// first use. `None` for `Simple`/`Multi` and for a sub-file itself,
    /// which never nests another one.
    sub_file: Option<Box<TreeCore<C>>>,
}

impl<C: KeyComparator> TreeCore<C> {
    pub fn create(file: AreaManageFile, comparator: C, variant: Variant) -> Result<Self> {
        let mut core = Self {
            file,
            comparator,
            variant,
            header: HeaderPage::default(),
            page_map: HashMap::new(),
            dirty: HashSet::new(),
            header_dirty: true,
            is_sub_file: false,
            sub_file: None,
        };
        // Consume the header page's slot through the allocator itself so its
        // used/unused bookkeeping stays correct and the next real allocation
        // (the first root leaf) can't collide with it.
        let header_id = core.file.allocate_page(UNDEFINED_PAGE_ID, UNDEFINED_PAGE_ID)?;
        debug_assert_eq!(header_id, TREE_HEADER_PAGE_ID);
        core.flush_header()?;
        Ok(core)
    }

    pub fn mount(file: AreaManageFile, comparator: C, variant: Variant) -> Result<Self> {
        let header = {
            let mut g = file.buffer().fix(TREE_HEADER_PAGE_ID, FixMode::Read)?;
            HeaderPage::decode(g.data_mut())
        };
        Ok(Self {
            file,
            comparator,
            variant,
            header,
            page_map: HashMap::new(),
            dirty: HashSet::new(),
            header_dirty: false,
            is_sub_file: false,
            sub_file: None,
        })
    }

    /// Marks this instance as a deleted-key tracker rather than a primary
    /// index. Crate-internal: set once by the owning `BtreeFile` right after
    /// constructing the companion, before it is attached.
    pub(crate) fn mark_as_sub_file(&mut self) {
        self.is_sub_file = true;
    }

    /// Attaches an already-constructed, already-marked sub-file. Only
    /// meaningful on a `Unique` instance; callers never attach one to a
    /// sub-file itself.
    pub(crate) fn attach_sub_file(&mut self, sub: TreeCore<C>) {
        self.sub_file = Some(Box::new(sub));
    }

    fn record_in_sub_file(&mut self, key: &[u8], row_id: u64) -> Result<()> {
        if let Some(sub) = self.sub_file.as_mut() {
            sub.insert(key.to_vec(), row_id, None)?;
        }
        Ok(())
    }

    fn remove_from_sub_file(&mut self, key: &[u8]) -> Result<()> {
        if let Some(sub) = self.sub_file.as_mut() {
            sub.expunge(key)?;
        }
        Ok(())
    }

    // ---- page map plumbing --------------------------------------------

    pub fn ensure_loaded(&mut self, id: PageId) -> Result<()> {
        if id == UNDEFINED_PAGE_ID {
            return Err(Error::new(ErrorCode::BadArgument));
        }
        if self.page_map.contains_key(&id) {
            return Ok(());
        }
        let mut g = self.file.buffer().fix(id, FixMode::Read)?;
        let page = Page::decode(id, g.data_mut())?;
        self.page_map.insert(id, page);
        Ok(())
    }

    fn mark_dirty(&mut self, id: PageId) {
        self.dirty.insert(id);
    }

    fn flush_page(&mut self, id: PageId) -> Result<()> {
        if let Some(page) = self.page_map.get(&id) {
            let bytes = page.encode();
            let mut g = self.file.buffer().fix(id, FixMode::DiscardableWrite)?;
            let cap = g.data().len().min(bytes.len());
            g.data_mut()[..cap].copy_from_slice(&bytes[..cap]);
            g.commit();
        }
        Ok(())
    }

    fn flush_header(&mut self) -> Result<()> {
        let mut g = self.file.buffer().fix(TREE_HEADER_PAGE_ID, FixMode::DiscardableWrite)?;
        let mut buf = vec![0u8; HEADER_PAGE_LEN];
        self.header.encode(&mut buf);
        let cap = g.data().len().min(buf.len());
        g.data_mut()[..cap].copy_from_slice(&buf[..cap]);
        g.commit();
        Ok(())
    }

    /// Write back every page mutated since the last flush, then the header.
    pub fn flush_all_pages(&mut self) -> Result<()> {
        let ids: Vec<PageId> = self.dirty.drain().collect();
        for id in ids {
            self.flush_page(id)?;
        }
        if self.header_dirty {
            self.flush_header()?;
            self.header_dirty = false;
        }
        self.file.flush()
    }

    fn new_page(&mut self, leaf: bool, prev: PageId, next: PageId) -> Result<PageId> {
        let id = self.file.allocate_page(prev, next)?;
        let page = if leaf {
            Page::new_leaf(id, prev, next)
        } else {
            Page::new_node(id, prev, next)
        };
        self.page_map.insert(id, page);
        self.mark_dirty(id);
        Ok(id)
    }

    fn free_page(&mut self, id: PageId) -> Result<()> {
        self.file.free_page(id)?;
        self.page_map.remove(&id);
        self.dirty.remove(&id);
        Ok(())
    }

    pub fn detach(&mut self, page_id: PageId) -> Result<()> {
        self.flush_page(page_id)?;
        self.dirty.remove(&page_id);
        self.page_map.remove(&page_id);
        Ok(())
    }

    // ---- descent --------------------------------------------------------

    /// Locate the leaf that would contain `bound`, or the left/right edge
    /// leaf when no bound is given.
    pub fn get_leaf_page(&mut self, bound: Option<&[u8]>, reverse: bool) -> Result<PageId> {
        let key = match bound {
            None => {
                return Ok(if reverse {
                    self.header.rightmost_leaf_page_id
                } else {
                    self.header.leftmost_leaf_page_id
                })
            }
            Some(k) => k,
        };
        if self.header.root_page_id == UNDEFINED_PAGE_ID {
            return Ok(UNDEFINED_PAGE_ID);
        }
        let mut cur = self.header.root_page_id;
        loop {
            self.ensure_loaded(cur)?;
            let page = self.page_map.get(&cur).unwrap();
            if page.leaf {
                return Ok(cur);
            }
            let idx = page.upper_bound(key, &self.comparator).saturating_sub(1);
            cur = page.child_at(idx).ok_or_else(|| Error::new(ErrorCode::Unexpected))?;
        }
    }

    // ---- insert -----------------------------------------------------------

    pub fn insert(&mut self, key: Vec<u8>, row_id: u64, null_bitmap: Option<u8>) -> Result<()> {
        if self.header.root_page_id == UNDEFINED_PAGE_ID {
            let root_id = self.new_page(true, UNDEFINED_PAGE_ID, UNDEFINED_PAGE_ID)?;
            self.header.root_page_id = root_id;
            self.header.leftmost_leaf_page_id = root_id;
            self.header.rightmost_leaf_page_id = root_id;
            self.header_dirty = true;
        }
        let mut entry = Entry::leaf(key, row_id);
        entry.null_bitmap = null_bitmap;
        let leaf_id = self.get_leaf_page(Some(&entry.key), false)?;
        let undeleted = self.insert_entry(leaf_id, entry)?;
        self.header.insert_count += 1;
        self.header.entry_count += undeleted as u32;
        self.header_dirty = true;
        Ok(())
    }

    fn insert_entry(&mut self, page_id: PageId, mut entry: Entry) -> Result<bool> {
        self.ensure_loaded(page_id)?;

        if self.variant == Variant::Unique && self.page_map[&page_id].leaf {
            if let Some(idx) = self.page_map[&page_id].find(&entry.key, &self.comparator) {
                let tombstoned = self.page_map[&page_id].entries[idx].tombstone;
                if !tombstoned {
                    return Err(Error::new(ErrorCode::UniquenessViolation));
                }
                let key_for_sub = entry.key.clone();
                entry.tombstone = false;
                let old_first_key = self.page_map[&page_id].first_key().map(|k| k.to_vec());
                self.page_map.get_mut(&page_id).unwrap().entries[idx] = entry;
                self.mark_dirty(page_id);
                self.header.expunge_flag_count = self.header.expunge_flag_count.saturating_sub(1);
                self.header_dirty = true;
                self.remove_from_sub_file(&key_for_sub)?;
                if idx == 0 {
                    self.propagate_if_first_key_changed(page_id, old_first_key)?;
                }
                return Ok(true); // counts again as a live entry
            }
        }

        let needed = entry.encoded_len();
        let page_size = self.file.params().page_size as usize;
        let fits = self.page_map[&page_id].used_size() + needed <= page_size;
        let target_page_id = if fits {
            page_id
        } else {
            self.expand(page_id, &entry)?
        };
        self.ensure_loaded(target_page_id)?;

        let pos = self.page_map[&target_page_id].upper_bound(&entry.key, &self.comparator);
        if self.variant == Variant::Simple && pos > 0 {
            let existing_key = self.page_map[&target_page_id].entries[pos - 1].key.clone();
            if self.comparator.compare(&existing_key, &entry.key) == Ordering::Equal {
                self.comparator.integrity_check(&existing_key, &entry.key)?;
            }
        }

        let old_first_key = self.page_map[&target_page_id].first_key().map(|k| k.to_vec());
        let inserted_key = entry.key.clone();
        self.page_map.get_mut(&target_page_id).unwrap().entries.insert(pos, entry);
        self.mark_dirty(target_page_id);

        if self.header.rightmost_leaf_page_id == target_page_id
            && self.page_map[&target_page_id].last_key() == Some(inserted_key.as_slice())
        {
            self.header.max_value_insert_count += 1;
            self.header_dirty = true;
        }

        if pos == 0 {
            self.propagate_if_first_key_changed(target_page_id, old_first_key)?;
        }
        Ok(true)
    }

    /// Either rewrites the parent's existing delegate entry for `page_id`
    /// to its new first key, or — for a brand-new sibling with no delegate
    /// yet — inserts a fresh one. The single protocol used everywhere a
    /// page's first key changes.
    fn propagate_if_first_key_changed(&mut self, page_id: PageId, old_first_key: Option<Vec<u8>>) -> Result<()> {
        let new_first = match self.page_map[&page_id].first_key() {
            Some(k) => k.to_vec(),
            None => return Ok(()),
        };
        let parent_id = match self.page_map[&page_id].parent_id {
            Some(p) => p,
            None => return Ok(()),
        };
        self.ensure_loaded(parent_id)?;
        let existing_idx = self.page_map[&parent_id]
            .entries
            .iter()
            .position(|e| e.child_id() == Some(page_id));
        match existing_idx {
            Some(idx) => {
                if old_first_key.as_deref() != Some(new_first.as_slice()) {
                    let old_parent_first = self.page_map[&parent_id].first_key().map(|k| k.to_vec());
                    self.page_map.get_mut(&parent_id).unwrap().entries[idx].key = new_first;
                    self.mark_dirty(parent_id);
                    if idx == 0 {
                        self.propagate_if_first_key_changed(parent_id, old_parent_first)?;
                    }
                }
            }
            None => {
                self.insert_entry(parent_id, Entry::node(new_first, page_id))?;
            }
        }
        Ok(())
    }

    // ---- split / redistribute / concatenate -------------------------------

    fn grow_root(&mut self, page_id: PageId) -> Result<()> {
        let first_key = self.page_map[&page_id].first_key().map(|k| k.to_vec()).unwrap_or_default();
        let new_root_id = self.new_page(false, UNDEFINED_PAGE_ID, UNDEFINED_PAGE_ID)?;
        self.page_map.get_mut(&new_root_id).unwrap().entries.push(Entry::node(first_key, page_id));
        self.mark_dirty(new_root_id);
        self.page_map.get_mut(&page_id).unwrap().parent_id = Some(new_root_id);
        self.header.root_page_id = new_root_id;
        self.header.step_count += 1;
        self.header_dirty = true;
        Ok(())
    }

    fn expand(&mut self, page_id: PageId, new_entry: &Entry) -> Result<PageId> {
        self.ensure_loaded(page_id)?;
        if self.page_map[&page_id].parent_id.is_none() {
            self.grow_root(page_id)?;
        }
        let parent_id = self.page_map[&page_id].parent_id.unwrap();

        let is_rightmost_leaf_append = self.page_map[&page_id].leaf
            && self.header.rightmost_leaf_page_id == page_id
            && self
                .page_map[&page_id]
                .last_key()
                .map(|lk| self.comparator.compare(&new_entry.key, lk) == Ordering::Greater)
                .unwrap_or(true);

        if is_rightmost_leaf_append {
            let ratio = self.header.max_value_insert_ratio();
            let n = self.page_map[&page_id].entries.len();
            let split_at = if ratio >= 0.8 {
                n
            } else if ratio >= 0.4 {
                (n * 9) / 10
            } else {
                n / 2
            };
            return self.split_leaf_at(page_id, parent_id, split_at, &new_entry.key);
        }

        let (prev, next) = {
            let p = &self.page_map[&page_id];
            (p.prev, p.next)
        };
        let sibling_id = self.pick_sibling(prev, next, parent_id)?;

        match sibling_id {
            None => {
                let n = self.page_map[&page_id].entries.len();
                self.split_leaf_at(page_id, parent_id, n / 2, &new_entry.key)
            }
            Some(sib) => {
                self.ensure_loaded(sib)?;
                let page_size = self.file.params().page_size as usize;
                let sib_free = page_size.saturating_sub(self.page_map[&sib].used_size());
                if sib_free * 10 < page_size {
                    self.three_way_split(page_id, sib, parent_id, &new_entry.key)
                } else {
                    self.redistribute(page_id, sib)?;
                    Ok(self.pick_target_after_redistribute(page_id, sib, &new_entry.key))
                }
            }
        }
    }

    fn pick_sibling(&mut self, prev: PageId, next: PageId, parent_id: PageId) -> Result<Option<PageId>> {
        if prev != UNDEFINED_PAGE_ID {
            self.ensure_loaded(prev)?;
            if self.page_map[&prev].parent_id == Some(parent_id) {
                return Ok(Some(prev));
            }
        }
        if next != UNDEFINED_PAGE_ID {
            self.ensure_loaded(next)?;
            if self.page_map[&next].parent_id == Some(parent_id) {
                return Ok(Some(next));
            }
        }
        Ok(None)
    }

    fn left_right_of(&self, a: PageId, b: PageId) -> (PageId, PageId) {
        if self.page_map[&a].next == b {
            (a, b)
        } else {
            (b, a)
        }
    }

    fn split_leaf_at(&mut self, page_id: PageId, parent_id: PageId, split_at: usize, new_key: &[u8]) -> Result<PageId> {
        let old_next = self.page_map[&page_id].next;
        let leaf = self.page_map[&page_id].leaf;
        let moved = self.page_map.get_mut(&page_id).unwrap().entries.split_off(split_at);

        let right_id = self.new_page(leaf, page_id, old_next)?;
        {
            let right = self.page_map.get_mut(&right_id).unwrap();
            right.entries = moved;
            right.parent_id = Some(parent_id);
        }
        self.page_map.get_mut(&page_id).unwrap().next = right_id;
        if old_next != UNDEFINED_PAGE_ID {
            self.ensure_loaded(old_next)?;
            self.page_map.get_mut(&old_next).unwrap().prev = right_id;
            self.mark_dirty(old_next);
        }
        if self.header.rightmost_leaf_page_id == page_id {
            self.header.rightmost_leaf_page_id = right_id;
            self.header_dirty = true;
        }
        self.mark_dirty(page_id);
        self.mark_dirty(right_id);

        self.propagate_if_first_key_changed(right_id, None)?;

        let target = match self.page_map[&right_id].first_key() {
            Some(rk) => {
                if self.comparator.compare(new_key, rk) != Ordering::Less {
                    right_id
                } else {
                    page_id
                }
            }
            None => right_id,
        };
        Ok(target)
    }

    fn three_way_split(&mut self, page_id: PageId, sibling_id: PageId, parent_id: PageId, new_key: &[u8]) -> Result<PageId> {
        let (left_id, right_id) = self.left_right_of(page_id, sibling_id);
        let leaf = self.page_map[&left_id].leaf;
        let left_len = self.page_map[&left_id].entries.len();
        let right_len = self.page_map[&right_id].entries.len();
        let take_left = (left_len / 3).max(1).min(left_len);
        let take_right = (right_len / 3).max(1).min(right_len);
        let old_right_first = self.page_map[&right_id].first_key().map(|k| k.to_vec());

        let mut middle_entries = self
            .page_map
            .get_mut(&left_id)
            .unwrap()
            .entries
            .split_off(left_len - take_left);
        let right_part: Vec<Entry> = self.page_map.get_mut(&right_id).unwrap().entries.drain(0..take_right).collect();
        middle_entries.extend(right_part);

        let middle_id = self.new_page(leaf, left_id, right_id)?;
        {
            let mid = self.page_map.get_mut(&middle_id).unwrap();
            mid.entries = middle_entries;
            mid.parent_id = Some(parent_id);
        }
        self.page_map.get_mut(&left_id).unwrap().next = middle_id;
        self.page_map.get_mut(&right_id).unwrap().prev = middle_id;
        self.mark_dirty(left_id);
        self.mark_dirty(right_id);
        self.mark_dirty(middle_id);

        self.propagate_if_first_key_changed(middle_id, None)?;
        self.propagate_if_first_key_changed(right_id, old_right_first)?;

        let mid_first = self.page_map[&middle_id].first_key().map(|k| k.to_vec());
        let right_first = self.page_map[&right_id].first_key().map(|k| k.to_vec());
        let target = if mid_first.as_deref().map(|k| self.comparator.compare(new_key, k) == Ordering::Less).unwrap_or(true) {
            left_id
        } else if right_first.as_deref().map(|k| self.comparator.compare(new_key, k) != Ordering::Less).unwrap_or(false) {
            right_id
        } else {
            middle_id
        };
        Ok(target)
    }

    /// Equalizes the two pages by entry count (a documented simplification
    /// of the byte-accounted version, which also charges a small per-entry
    /// penalty for Multi's null-bitmap tail).
    fn redistribute(&mut self, page_id: PageId, sibling_id: PageId) -> Result<()> {
        let (left_id, right_id) = self.left_right_of(page_id, sibling_id);
        let old_right_first = self.page_map[&right_id].first_key().map(|k| k.to_vec());
        let mut combined: Vec<Entry> = self.page_map.get_mut(&left_id).unwrap().entries.drain(..).collect();
        combined.extend(self.page_map.get_mut(&right_id).unwrap().entries.drain(..));
        let mid = combined.len() / 2;
        let right_part = combined.split_off(mid);
        self.page_map.get_mut(&left_id).unwrap().entries = combined;
        self.page_map.get_mut(&right_id).unwrap().entries = right_part;
        self.mark_dirty(left_id);
        self.mark_dirty(right_id);
        self.propagate_if_first_key_changed(right_id, old_right_first)
    }

    fn pick_target_after_redistribute(&self, a: PageId, b: PageId, new_key: &[u8]) -> PageId {
        let (left_id, right_id) = self.left_right_of(a, b);
        match self.page_map[&right_id].first_key() {
            Some(rk) if self.comparator.compare(new_key, rk) != Ordering::Less => right_id,
            _ => left_id,
        }
    }

    fn concatenate(&mut self, page_id: PageId, sibling_id: PageId, parent_id: PageId) -> Result<()> {
        self.ensure_loaded(parent_id)?;
        let (left_id, right_id) = self.left_right_of(page_id, sibling_id);
        let right_entries: Vec<Entry> = self.page_map.get_mut(&right_id).unwrap().entries.drain(..).collect();
        self.page_map.get_mut(&left_id).unwrap().entries.extend(right_entries);
        let right_next = self.page_map[&right_id].next;
        self.page_map.get_mut(&left_id).unwrap().next = right_next;
        if right_next != UNDEFINED_PAGE_ID {
            self.ensure_loaded(right_next)?;
            self.page_map.get_mut(&right_next).unwrap().prev = left_id;
            self.mark_dirty(right_next);
        }
        if self.header.rightmost_leaf_page_id == right_id {
            self.header.rightmost_leaf_page_id = left_id;
            self.header_dirty = true;
        }
        self.mark_dirty(left_id);

        if let Some(idx) = self.page_map[&parent_id].entries.iter().position(|e| e.child_id() == Some(right_id)) {
            let old_parent_first = self.page_map[&parent_id].first_key().map(|k| k.to_vec());
            self.page_map.get_mut(&parent_id).unwrap().entries.remove(idx);
            self.mark_dirty(parent_id);
            if idx == 0 {
                self.propagate_if_first_key_changed(parent_id, old_parent_first)?;
            }
        }
        self.free_page(right_id)?;
        self.maybe_collapse_root(parent_id)
    }

    fn reduce(&mut self, page_id: PageId) -> Result<()> {
        let parent_id = match self.page_map[&page_id].parent_id {
            Some(p) => p,
            None => return Ok(()),
        };
        let (prev, next) = {
            let p = &self.page_map[&page_id];
            (p.prev, p.next)
        };
        let sibling_id = self.pick_sibling(prev, next, parent_id)?;
        let sibling_id = match sibling_id {
            Some(s) => s,
            None => return Ok(()),
        };
        let page_size = self.file.params().page_size as usize;
        let sib_free = page_size.saturating_sub(self.page_map[&sibling_id].used_size());
        if sib_free * 2 > page_size {
            self.concatenate(page_id, sibling_id, parent_id)
        } else {
            self.redistribute(page_id, sibling_id)
        }
    }

    fn maybe_collapse_root(&mut self, page_id: PageId) -> Result<()> {
        if self.header.root_page_id != page_id {
            return Ok(());
        }
        let leaf = self.page_map[&page_id].leaf;
        if leaf {
            return Ok(());
        }
        if self.page_map[&page_id].entries.len() == 1 {
            let only_child = self.page_map[&page_id].entries[0].child_id().unwrap();
            self.ensure_loaded(only_child)?;
            self.page_map.get_mut(&only_child).unwrap().parent_id = None;
            self.header.root_page_id = only_child;
            self.header.step_count = self.header.step_count.saturating_sub(1);
            self.header_dirty = true;
            self.free_page(page_id)?;
        }
        Ok(())
    }

    // ---- expunge -----------------------------------------------------------

    pub fn expunge(&mut self, key: &[u8]) -> Result<()> {
        if self.header.root_page_id == UNDEFINED_PAGE_ID {
            if self.is_sub_file {
                return Ok(());
            }
            return Err(Error::new(ErrorCode::BadArgument));
        }
        let leaf_id = self.get_leaf_page(Some(key), false)?;
        self.expunge_entry(leaf_id, key)?;
        self.header_dirty = true;
        Ok(())
    }

    fn expunge_entry(&mut self, page_id: PageId, key: &[u8]) -> Result<bool> {
        self.ensure_loaded(page_id)?;
        let idx = match self.page_map[&page_id].find(key, &self.comparator) {
            Some(i) => i,
            None if self.is_sub_file => return Ok(false),
            None => return Err(Error::new(ErrorCode::BadArgument)),
        };

        if self.variant == Variant::Unique && self.page_map[&page_id].leaf {
            let already_tombstoned = self.page_map[&page_id].entries[idx].tombstone;
            let has_null = self.page_map[&page_id].entries[idx].null_bitmap.map(|b| b != 0).unwrap_or(false);
            if !already_tombstoned && !has_null {
                let row_id = self.page_map[&page_id].entries[idx].row_id().unwrap_or(0);
                self.page_map.get_mut(&page_id).unwrap().entries[idx].tombstone = true;
                self.mark_dirty(page_id);
                self.header.expunge_flag_count += 1;
                self.header.entry_count = self.header.entry_count.saturating_sub(1);
                self.record_in_sub_file(key, row_id)?;
                return Ok(false);
            }
            if already_tombstoned {
                self.header.expunge_flag_count = self.header.expunge_flag_count.saturating_sub(1);
            } else {
                self.header.entry_count = self.header.entry_count.saturating_sub(1);
            }
        } else if self.page_map[&page_id].leaf {
            self.header.entry_count = self.header.entry_count.saturating_sub(1);
        }

        let old_first_key = self.page_map[&page_id].first_key().map(|k| k.to_vec());
        self.page_map.get_mut(&page_id).unwrap().entries.remove(idx);
        self.mark_dirty(page_id);

        if self.header.root_page_id == page_id {
            if self.page_map[&page_id].is_empty_page() {
                self.header.root_page_id = UNDEFINED_PAGE_ID;
                self.header.leftmost_leaf_page_id = UNDEFINED_PAGE_ID;
                self.header.rightmost_leaf_page_id = UNDEFINED_PAGE_ID;
                self.header_dirty = true;
                self.free_page(page_id)?;
                return Ok(false);
            }
            if idx == 0 {
                self.propagate_if_first_key_changed(page_id, old_first_key)?;
            }
            return Ok(false);
        }

        self.maybe_collapse_root(page_id)?;

        if self.page_map.contains_key(&page_id) {
            let page_size = self.file.params().page_size as usize;
            let free = page_size.saturating_sub(self.page_map[&page_id].used_size());
            let mut rebalanced = false;
            if free * 2 > page_size && self.page_map[&page_id].parent_id.is_some() {
                self.reduce(page_id)?;
                rebalanced = true;
            }
            if idx == 0 && self.page_map.contains_key(&page_id) {
                self.propagate_if_first_key_changed(page_id, old_first_key)?;
            }
            return Ok(rebalanced);
        }
        Ok(false)
    }

    // ---- vacuum (Unique) ---------------------------------------------------

    /// Physically removes tombstoned entries once `expunge_flag_count`
    /// crosses `threshold`, walking leaves left to right. Row-lock
    /// acquisition is out of scope here (no transaction manager present);
    /// `row_lockable` stands in for "the owning row's lock can be taken for
    /// `Pulse` duration," letting callers simulate lock contention in tests.
    pub fn compact(&mut self, threshold: u32, mut row_lockable: impl FnMut(u64) -> bool) -> Result<u32> {
        if self.variant != Variant::Unique || self.header.expunge_flag_count < threshold {
            return Ok(0);
        }
        let mut removed = 0u32;
        let mut cur = self.header.leftmost_leaf_page_id;
        while cur != UNDEFINED_PAGE_ID {
            self.ensure_loaded(cur)?;
            let tombstoned: Vec<(usize, u64, Vec<u8>)> = self.page_map[&cur]
                .entries
                .iter()
                .enumerate()
                .filter(|(_, e)| e.tombstone)
                .filter_map(|(i, e)| e.row_id().map(|r| (i, r, e.key.clone())))
                .collect();
            let mut removed_here = Vec::new();
            let mut removed_keys = Vec::new();
            for (idx, row_id, key) in tombstoned {
                if row_lockable(row_id) {
                    removed_here.push(idx);
                    removed_keys.push(key);
                } else {
                    debug!(target: "btree::vacuum", "row {row_id} lock unavailable, skipping");
                }
            }
            if !removed_here.is_empty() {
                let page = self.page_map.get_mut(&cur).unwrap();
                for idx in removed_here.iter().rev() {
                    page.entries.remove(*idx);
                }
                self.mark_dirty(cur);
                removed += removed_here.len() as u32;
                self.header.expunge_flag_count = self.header.expunge_flag_count.saturating_sub(removed_here.len() as u32);
                for key in &removed_keys {
                    self.remove_from_sub_file(key)?;
                }
            }
            cur = self.page_map[&cur].next;
        }
        if removed > 0 {
            debug!(target: "btree::vacuum", "compacted {removed} tombstoned entries");
            self.header_dirty = true;
        } else {
            warn!(target: "btree::vacuum", "no rows vacuumed this pass");
        }
        Ok(removed)
    }

    // ---- verification -------------------------------------------------------

    pub fn verify(&mut self) -> Result<()> {
        if self.header.root_page_id == UNDEFINED_PAGE_ID {
            return Ok(());
        }
        let root = self.header.root_page_id;
        self.ensure_loaded(root)?;
        if self.page_map[&root].prev != UNDEFINED_PAGE_ID || self.page_map[&root].next != UNDEFINED_PAGE_ID {
            return Err(Error::new(ErrorCode::IntegrityViolation));
        }
        let mut total_live = 0u32;
        let mut leftmost = None;
        let mut rightmost = None;
        self.verify_subtree(root, &mut total_live, &mut leftmost, &mut rightmost)?;
        if leftmost != Some(self.header.leftmost_leaf_page_id) || rightmost != Some(self.header.rightmost_leaf_page_id) {
            return Err(Error::new(ErrorCode::IntegrityViolation));
        }
        if total_live != self.header.entry_count {
            return Err(Error::new(ErrorCode::IntegrityViolation));
        }
        Ok(())
    }

    fn verify_subtree(
        &mut self,
        page_id: PageId,
        total_live: &mut u32,
        leftmost: &mut Option<PageId>,
        rightmost: &mut Option<PageId>,
    ) -> Result<Vec<u8>> {
        self.ensure_loaded(page_id)?;
        let leaf = self.page_map[&page_id].leaf;
        {
            let page = &self.page_map[&page_id];
            for w in page.entries.windows(2) {
                let ord = self.comparator.compare(&w[0].key, &w[1].key);
                let ok = if self.variant == Variant::Multi {
                    ord != Ordering::Greater
                } else {
                    ord == Ordering::Less
                };
                if !ok {
                    return Err(Error::new(ErrorCode::IntegrityViolation));
                }
            }
        }
        if leaf {
            if leftmost.is_none() {
                *leftmost = Some(page_id);
            }
            *rightmost = Some(page_id);
            let live = if self.variant == Variant::Unique {
                self.page_map[&page_id].entries.iter().filter(|e| !e.tombstone).count() as u32
            } else {
                self.page_map[&page_id].entries.len() as u32
            };
            *total_live += live;
            return Ok(self.page_map[&page_id].first_key().map(|k| k.to_vec()).unwrap_or_default());
        }
        let children: Vec<(Vec<u8>, PageId)> = self.page_map[&page_id]
            .entries
            .iter()
            .map(|e| (e.key.clone(), e.child_id().unwrap()))
            .collect();
        for (delegate_key, child_id) in children {
            let child_first = self.verify_subtree(child_id, total_live, leftmost, rightmost)?;
            if self.comparator.compare(&delegate_key, &child_first) != Ordering::Equal {
                return Err(Error::new(ErrorCode::IntegrityViolation));
            }
        }
        Ok(self.page_map[&page_id].first_key().map(|k| k.to_vec()).unwrap_or_default())
    }
}
