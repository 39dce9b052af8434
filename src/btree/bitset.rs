//! Parallel bitset gather: run a batch of conditions against the tree
//! concurrently, each worker scanning leaf-to-leaf and OR-merging its
//! thread-local row-id bitset into the shared result under one lock —
//! the same "several independent cursors over one read-only structure"
//! shape the search cursor already supports, just fanned out.

use std::collections::HashSet;
use std::sync::Mutex;

use crate::btree::comparator::KeyComparator;
use crate::btree::cursor::{Condition, SearchCursor};
use crate::btree::tree::TreeCore;
use crate::btree::worker::WorkerPool;
use crate::error::{Error, Result};

/// Row ids matching any of `conditions`, gathered with the given worker
/// pool. Each condition gets its own cursor; the tree itself is shared
/// behind one `Mutex` since `TreeCore`'s page map is mutated on every page
/// fault and isn't safe for two cursors to touch at once without it. A real
/// deployment backs `TreeCore` with a buffer pool whose guards are the
/// actual cross-thread synchronization point, at which point this lock can
/// narrow to just the page-fault path.
pub fn gather<C: KeyComparator, W: WorkerPool>(
    tree: &mut TreeCore<C>,
    conditions: Vec<Condition>,
    pool: &W,
) -> Result<HashSet<u64>> {
    let tree_mutex: Mutex<&mut TreeCore<C>> = Mutex::new(tree);
    let merged: Mutex<HashSet<u64>> = Mutex::new(HashSet::new());
    let first_err: Mutex<Option<Error>> = Mutex::new(None);

    pool.scoped_for_each(conditions, |condition| {
        let mut guard = tree_mutex.lock().unwrap();
        let mut cursor = SearchCursor::new();
        if let Err(e) = cursor.search(&mut *guard, condition, false) {
            let mut slot = first_err.lock().unwrap();
            if slot.is_none() {
                *slot = Some(e);
            }
            return;
        }
        let mut local = HashSet::new();
        loop {
            match cursor.fetch(&mut *guard) {
                Ok(Some((_, row_id))) => {
                    local.insert(row_id);
                }
                Ok(None) => break,
                Err(e) => {
                    let mut slot = first_err.lock().unwrap();
                    if slot.is_none() {
                        *slot = Some(e);
                    }
                    break;
                }
            }
        }
        drop(guard);
        merged.lock().unwrap().extend(local);
    });

    if let Some(e) = first_err.into_inner().unwrap() {
        return Err(e);
    }
    Ok(merged.into_inner().unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::comparator::BytewiseComparator;
    use crate::btree::tree::{TreeCore, Variant};
    use crate::btree::worker::SequentialWorkerPool;
    use crate::buffer::MemPageBuffer;
    use crate::physical::file::{AreaManageFile, CreateParams};
    use std::sync::Arc;

    #[test]
    fn gathers_disjoint_conditions() {
        let buf: Arc<dyn crate::buffer::PageBuffer> = Arc::new(MemPageBuffer::new(4096));
        let file = AreaManageFile::create(buf, CreateParams::default()).unwrap();
        let mut tree = TreeCore::create(file, BytewiseComparator, Variant::Multi).unwrap();
        for i in 0u8..20 {
            tree.insert(vec![i], i as u64, None).unwrap();
        }
        let conditions = vec![
            Condition {
                lower: Some((vec![0], true)),
                upper: Some((vec![4], true)),
            },
            Condition {
                lower: Some((vec![15], true)),
                upper: Some((vec![19], true)),
            },
        ];
        let rows = gather(&mut tree, conditions, &SequentialWorkerPool).unwrap();
        assert_eq!(rows.len(), 10);
        assert!(rows.contains(&0));
        assert!(rows.contains(&19));
    }

    #[test]
    fn unique_shaped_condition_stops_after_the_first_duplicate_key_hit() {
        let buf: Arc<dyn crate::buffer::PageBuffer> = Arc::new(MemPageBuffer::new(4096));
        let file = AreaManageFile::create(buf, CreateParams::default()).unwrap();
        let mut tree = TreeCore::create(file, BytewiseComparator, Variant::Multi).unwrap();
        tree.insert(vec![5], 100, None).unwrap();
        tree.insert(vec![5], 101, None).unwrap();
        tree.insert(vec![5], 102, None).unwrap();

        let rows = gather(&mut tree, vec![Condition::eq(vec![5])], &SequentialWorkerPool).unwrap();
        assert_eq!(rows.len(), 1, "a unique-bound condition must not collect every duplicate");
    }
}
