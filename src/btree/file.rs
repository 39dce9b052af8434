//! Tagged-variant B+-tree file: the inheritance hierarchy the original
//! engine used for Simple/Multi/Unique index files collapses here into one
//! enum over a shared `TreeCore`, since each variant differs only in the
//! handful of policy checks `TreeCore` already keys off `Variant`. This
//! type exists to give callers a single handle that can't accidentally be
//! constructed with a variant/comparator mismatch, and to gate vacuum to
//! the `Unique` arm where tombstones actually occur.

use std::sync::Arc;

use crate::btree::bitset;
use crate::btree::comparator::KeyComparator;
use crate::btree::cursor::{Condition, SearchCursor};
use crate::btree::tree::{TreeCore, Variant};
use crate::btree::worker::WorkerPool;
use crate::buffer::PageBuffer;
use crate::error::{Error, ErrorCode, Result};
use crate::physical::file::{AreaManageFile, CreateParams};

pub enum BtreeFile<C: KeyComparator> {
    Simple(TreeCore<C>),
    Multi(TreeCore<C>),
    Unique(TreeCore<C>),
}

impl<C: KeyComparator + Clone> BtreeFile<C> {
    /// `sub_buffer` backs the deleted-key tracker `Unique` attaches to
    /// itself at construction time; required exactly when `variant` is
    /// `Unique`, ignored otherwise.
    pub fn create(
        buffer: Arc<dyn PageBuffer>,
        params: CreateParams,
        comparator: C,
        variant: Variant,
        sub_buffer: Option<Arc<dyn PageBuffer>>,
    ) -> Result<Self> {
        let file = AreaManageFile::create(buffer, params)?;
        let mut core = TreeCore::create(file, comparator.clone(), variant)?;
        if variant == Variant::Unique {
            let sub_buf = sub_buffer.ok_or_else(|| Error::new(ErrorCode::BadArgument))?;
            let sub_file = AreaManageFile::create(sub_buf, params)?;
            let mut sub = TreeCore::create(sub_file, comparator, Variant::Unique)?;
            sub.mark_as_sub_file();
            core.attach_sub_file(sub);
        }
        Ok(Self::wrap(variant, core))
    }

    pub fn mount(
        buffer: Arc<dyn PageBuffer>,
        params: CreateParams,
        comparator: C,
        variant: Variant,
        sub_buffer: Option<Arc<dyn PageBuffer>>,
    ) -> Result<Self> {
        let file = AreaManageFile::mount(buffer, params)?;
        let mut core = TreeCore::mount(file, comparator.clone(), variant)?;
        if variant == Variant::Unique {
            let sub_buf = sub_buffer.ok_or_else(|| Error::new(ErrorCode::BadArgument))?;
            let sub_file = AreaManageFile::mount(sub_buf, params)?;
            let mut sub = TreeCore::mount(sub_file, comparator, Variant::Unique)?;
            sub.mark_as_sub_file();
            core.attach_sub_file(sub);
        }
        Ok(Self::wrap(variant, core))
    }

    fn wrap(variant: Variant, core: TreeCore<C>) -> Self {
        match variant {
            Variant::Simple => BtreeFile::Simple(core),
            Variant::Multi => BtreeFile::Multi(core),
            Variant::Unique => BtreeFile::Unique(core),
        }
    }

    fn core(&self) -> &TreeCore<C> {
        match self {
            BtreeFile::Simple(t) | BtreeFile::Multi(t) | BtreeFile::Unique(t) => t,
        }
    }

    fn core_mut(&mut self) -> &mut TreeCore<C> {
        match self {
            BtreeFile::Simple(t) | BtreeFile::Multi(t) | BtreeFile::Unique(t) => t,
        }
    }

    pub fn insert(&mut self, key: Vec<u8>, row_id: u64, null_bitmap: Option<u8>) -> Result<()> {
        self.core_mut().insert(key, row_id, null_bitmap)
    }

    pub fn expunge(&mut self, key: &[u8]) -> Result<()> {
        self.core_mut().expunge(key)
    }

    pub fn search(&mut self, condition: Condition, reverse: bool) -> Result<SearchCursor> {
        let mut cursor = SearchCursor::new();
        cursor.search(self.core_mut(), condition, reverse)?;
        Ok(cursor)
    }

    pub fn gather<W: WorkerPool>(&mut self, conditions: Vec<Condition>, pool: &W) -> Result<std::collections::HashSet<u64>> {
        bitset::gather(self.core_mut(), conditions, pool)
    }

    pub fn verify(&mut self) -> Result<()> {
        self.core_mut().verify()
    }

    pub fn flush(&mut self) -> Result<()> {
        self.core_mut().flush_all_pages()
    }

    pub fn entry_count(&self) -> u32 {
        self.core().header.entry_count
    }

    /// Only meaningful for `Unique`; a no-op for the other variants since
    /// they never set a tombstone bit.
    pub fn compact(&mut self, threshold: u32, row_lockable: impl FnMut(u64) -> bool) -> Result<u32> {
        match self {
            BtreeFile::Unique(t) => t.compact(threshold, row_lockable),
            _ => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::comparator::BytewiseComparator;
    use crate::btree::worker::SequentialWorkerPool;
    use crate::buffer::MemPageBuffer;
    use crate::error::ErrorCode;

    fn new_file(variant: Variant) -> BtreeFile<BytewiseComparator> {
        let buf: Arc<dyn PageBuffer> = Arc::new(MemPageBuffer::new(4096));
        let sub_buf: Option<Arc<dyn PageBuffer>> = if variant == Variant::Unique {
            Some(Arc::new(MemPageBuffer::new(4096)))
        } else {
            None
        };
        BtreeFile::create(buf, CreateParams::default(), BytewiseComparator, variant, sub_buf).unwrap()
    }

    #[test]
    fn append_only_grows_and_verifies() {
        let mut f = new_file(Variant::Simple);
        for i in 0u32..500 {
            f.insert(i.to_be_bytes().to_vec(), i as u64, None).unwrap();
        }
        assert_eq!(f.entry_count(), 500);
        f.verify().unwrap();
    }

    #[test]
    fn unique_tombstone_then_reinsert_roundtrips() {
        let mut f = new_file(Variant::Unique);
        f.insert(b"k".to_vec(), 1, None).unwrap();
        f.expunge(b"k").unwrap();
        assert_eq!(f.entry_count(), 0);
        f.insert(b"k".to_vec(), 2, None).unwrap();
        assert_eq!(f.entry_count(), 1);
        f.verify().unwrap();
    }

    #[test]
    fn unique_duplicate_insert_rejected() {
        let mut f = new_file(Variant::Unique);
        f.insert(b"k".to_vec(), 1, None).unwrap();
        let err = f.insert(b"k".to_vec(), 2, None).unwrap_err();
        assert_eq!(err.code(), ErrorCode::UniquenessViolation);
    }

    #[test]
    fn multi_allows_duplicate_keys() {
        let mut f = new_file(Variant::Multi);
        f.insert(b"k".to_vec(), 1, None).unwrap();
        f.insert(b"k".to_vec(), 2, None).unwrap();
        assert_eq!(f.entry_count(), 2);
    }

    #[test]
    fn gather_over_fresh_multi_index() {
        let mut f = new_file(Variant::Multi);
        for i in 0u8..10 {
            f.insert(vec![i], i as u64, None).unwrap();
        }
        let rows = f.gather(vec![Condition::all()], &SequentialWorkerPool).unwrap();
        assert_eq!(rows.len(), 10);
    }
}
