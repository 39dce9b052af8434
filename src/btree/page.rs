//! B+-tree node/leaf page: shared contract across the Simple/Multi/Unique
//! variants. Pages are decoded into an owned, in-memory `Page` on every
//! load and re-encoded on flush — the engine's own entry-pointer vector,
//! kept in lockstep with the on-disk count rather than held as long-lived
//! raw pointers into buffer-owned bytes.

use std::cmp::Ordering;

use crate::buffer::{PageId, UNDEFINED_PAGE_ID};
use crate::btree::comparator::KeyComparator;
use crate::btree::entry::Entry;
use crate::error::{Error, ErrorCode, Result};
use crate::physical::codec::{read_u16, read_u32, write_u16, write_u32};

const LEAF_BIT: u16 = 0x8000;
const COUNT_MASK: u16 = 0x7FFF;
pub const PAGE_HEADER_LEN: usize = 2 + 4 + 4;

#[derive(Debug, Clone)]
pub struct Page {
    pub page_id: PageId,
    pub leaf: bool,
    pub prev: PageId,
    pub next: PageId,
    pub parent_id: Option<PageId>,
    /// Entries in sorted order. Node entries carry delegate keys + child ids;
    /// leaf entries carry keys + row ids (Unique additionally tombstones).
    pub entries: Vec<Entry>,
    /// Offsets of each entry within the encoded body, rebuilt every decode.
    pub entry_offsets: Vec<usize>,
}

impl Page {
    pub fn new_leaf(page_id: PageId, prev: PageId, next: PageId) -> Self {
        Self {
            page_id,
            leaf: true,
            prev,
            next,
            parent_id: None,
            entries: Vec::new(),
            entry_offsets: Vec::new(),
        }
    }

    pub fn new_node(page_id: PageId, prev: PageId, next: PageId) -> Self {
        Self {
            page_id,
            leaf: false,
            prev,
            next,
            parent_id: None,
            entries: Vec::new(),
            entry_offsets: Vec::new(),
        }
    }

    pub fn decode(page_id: PageId, data: &[u8]) -> Result<Self> {
        let count_bits = read_u16(data, 0).ok_or_else(|| Error::new(ErrorCode::Corrupt))?;
        let leaf = count_bits & LEAF_BIT != 0;
        let count = (count_bits & COUNT_MASK) as usize;
        let prev = read_u32(data, 2).ok_or_else(|| Error::new(ErrorCode::Corrupt))?;
        let next = read_u32(data, 6).ok_or_else(|| Error::new(ErrorCode::Corrupt))?;
        let mut entries = Vec::with_capacity(count);
        let mut entry_offsets = Vec::with_capacity(count);
        let mut cur = PAGE_HEADER_LEN;
        for _ in 0..count {
            entry_offsets.push(cur);
            let (entry, next_off) = Entry::decode(data, cur).ok_or_else(|| Error::new(ErrorCode::Corrupt))?;
            entries.push(entry);
            cur = next_off;
        }
        Ok(Self {
            page_id,
            leaf,
            prev,
            next,
            parent_id: None,
            entries,
            entry_offsets,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![0u8; PAGE_HEADER_LEN];
        let mut count_bits = self.entries.len() as u16 & COUNT_MASK;
        if self.leaf {
            count_bits |= LEAF_BIT;
        }
        let _ = write_u16(&mut out, 0, count_bits);
        let _ = write_u32(&mut out, 2, self.prev);
        let _ = write_u32(&mut out, 6, self.next);
        for e in &self.entries {
            e.encode(&mut out);
        }
        out
    }

    pub fn used_size(&self) -> usize {
        PAGE_HEADER_LEN + self.entries.iter().map(Entry::encoded_len).sum::<usize>()
    }

    pub fn is_empty_page(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn first_key(&self) -> Option<&[u8]> {
        self.entries.first().map(|e| e.key.as_slice())
    }

    pub fn last_key(&self) -> Option<&[u8]> {
        self.entries.last().map(|e| e.key.as_slice())
    }

    /// Index of the first entry whose key is `>= k`.
    pub fn lower_bound<C: KeyComparator>(&self, k: &[u8], cmp: &C) -> usize {
        self.entries.partition_point(|e| cmp.compare(&e.key, k) == Ordering::Less)
    }

    /// Index of the first entry whose key is `> k`.
    pub fn upper_bound<C: KeyComparator>(&self, k: &[u8], cmp: &C) -> usize {
        self.entries
            .partition_point(|e| cmp.compare(&e.key, k) != Ordering::Greater)
    }

    /// Exact match, if present.
    pub fn find<C: KeyComparator>(&self, k: &[u8], cmp: &C) -> Option<usize> {
        let i = self.lower_bound(k, cmp);
        if i < self.entries.len() && cmp.compare(&self.entries[i].key, k) == Ordering::Equal {
            Some(i)
        } else {
            None
        }
    }

    pub fn child_at(&self, idx: usize) -> Option<PageId> {
        self.entries.get(idx).and_then(Entry::child_id)
    }
}

pub fn undefined_or(id: Option<PageId>) -> PageId {
    id.unwrap_or(UNDEFINED_PAGE_ID)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::comparator::BytewiseComparator;

    #[test]
    fn leaf_roundtrip_preserves_order() {
        let mut page = Page::new_leaf(3, UNDEFINED_PAGE_ID, UNDEFINED_PAGE_ID);
        page.entries.push(Entry::leaf(b"a".to_vec(), 1));
        page.entries.push(Entry::leaf(b"b".to_vec(), 2));
        let bytes = page.encode();
        let decoded = Page::decode(3, &bytes).unwrap();
        assert!(decoded.leaf);
        assert_eq!(decoded.entries.len(), 2);
        assert_eq!(decoded.entries[0].key, b"a");
        assert_eq!(decoded.entries[1].row_id(), Some(2));
    }

    #[test]
    fn bounds_and_find() {
        let cmp = BytewiseComparator;
        let mut page = Page::new_leaf(1, UNDEFINED_PAGE_ID, UNDEFINED_PAGE_ID);
        for k in [1u8, 3, 5, 7] {
            page.entries.push(Entry::leaf(vec![k], k as u64));
        }
        assert_eq!(page.lower_bound(&[4], &cmp), 2);
        assert_eq!(page.upper_bound(&[5], &cmp), 3);
        assert_eq!(page.find(&[5], &cmp), Some(2));
        assert_eq!(page.find(&[4], &cmp), None);
    }

    #[test]
    fn node_header_roundtrip() {
        let mut page = Page::new_node(9, UNDEFINED_PAGE_ID, UNDEFINED_PAGE_ID);
        page.entries.push(Entry::node(b"m".to_vec(), 44));
        let bytes = page.encode();
        let decoded = Page::decode(9, &bytes).unwrap();
        assert!(!decoded.leaf);
        assert_eq!(decoded.child_at(0), Some(44));
    }
}
