//! Search cursor: `Idle` → `Primed` → `Scanning` → `Exhausted`, stepping leaf
//! to leaf via each page's `next`/`prev` link. `mark`/`rewind` let a caller
//! snapshot a position and later resume from it (used by the bitset gather
//! to re-locate after a page it was sitting on gets split or concatenated
//! out from under it).

use std::cmp::Ordering;

use crate::buffer::{PageId, UNDEFINED_PAGE_ID};
use crate::btree::comparator::KeyComparator;
use crate::btree::tree::TreeCore;
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct Condition {
    pub lower: Option<(Vec<u8>, bool)>,
    pub upper: Option<(Vec<u8>, bool)>,
}

impl Condition {
    pub fn all() -> Self {
        Self { lower: None, upper: None }
    }

    pub fn eq(key: Vec<u8>) -> Self {
        Self {
            lower: Some((key.clone(), true)),
            upper: Some((key, true)),
        }
    }

    pub fn is_unique(&self) -> bool {
        matches!((&self.lower, &self.upper), (Some(lo), Some(hi)) if lo == hi && lo.1 && hi.1)
    }

    fn satisfies<C: KeyComparator>(&self, key: &[u8], cmp: &C) -> bool {
        if let Some((lo, inclusive)) = &self.lower {
            let ord = cmp.compare(key, lo);
            if ord == Ordering::Less || (!inclusive && ord == Ordering::Equal) {
                return false;
            }
        }
        if let Some((hi, inclusive)) = &self.upper {
            let ord = cmp.compare(key, hi);
            if ord == Ordering::Greater || (!inclusive && ord == Ordering::Equal) {
                return false;
            }
        }
        true
    }

    fn past_upper<C: KeyComparator>(&self, key: &[u8], cmp: &C) -> bool {
        if let Some((hi, inclusive)) = &self.upper {
            let ord = cmp.compare(key, hi);
            ord == Ordering::Greater || (!inclusive && ord == Ordering::Equal)
        } else {
            false
        }
    }

    fn past_lower<C: KeyComparator>(&self, key: &[u8], cmp: &C) -> bool {
        if let Some((lo, inclusive)) = &self.lower {
            let ord = cmp.compare(key, lo);
            ord == Ordering::Less || (!inclusive && ord == Ordering::Equal)
        } else {
            false
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Primed,
    Scanning,
    Exhausted,
}

#[derive(Debug, Clone, Copy)]
struct Position {
    leaf: PageId,
    idx: usize,
}

pub struct SearchCursor {
    state: State,
    reverse: bool,
    condition: Condition,
    pos: Option<Position>,
    mark: Option<(State, Option<Position>)>,
}

impl SearchCursor {
    pub fn new() -> Self {
        Self {
            state: State::Idle,
            reverse: false,
            condition: Condition::all(),
            pos: None,
            mark: None,
        }
    }

    pub fn search<C: KeyComparator>(&mut self, tree: &mut TreeCore<C>, condition: Condition, reverse: bool) -> Result<()> {
        self.reverse = reverse;
        let bound = if reverse {
            condition.upper.as_ref().map(|(k, _)| k.clone())
        } else {
            condition.lower.as_ref().map(|(k, _)| k.clone())
        };
        self.condition = condition;
        let leaf = tree.get_leaf_page(bound.as_deref(), reverse)?;
        if leaf == UNDEFINED_PAGE_ID {
            self.state = State::Exhausted;
            self.pos = None;
            return Ok(());
        }
        tree.ensure_loaded(leaf)?;
        let found = self.first_matching_index(tree, leaf)?;
        match found {
            Some((leaf, idx)) => {
                self.pos = Some(Position { leaf, idx });
                self.state = State::Primed;
            }
            None => {
                self.pos = None;
                self.state = State::Exhausted;
            }
        }
        Ok(())
    }

    fn first_matching_index<C: KeyComparator>(&self, tree: &mut TreeCore<C>, mut leaf: PageId) -> Result<Option<(PageId, usize)>> {
        loop {
            let entries_len = tree.page_map[&leaf].entries.len();
            let mut idx = if self.reverse { entries_len.checked_sub(1) } else if entries_len > 0 { Some(0) } else { None };
            while let Some(i) = idx {
                let key = tree.page_map[&leaf].entries[i].key.clone();
                if self.condition.satisfies(&key, &tree.comparator) {
                    return Ok(Some((leaf, i)));
                }
                if !self.reverse && self.condition.past_upper(&key, &tree.comparator) {
                    return Ok(None);
                }
                if self.reverse && self.condition.past_lower(&key, &tree.comparator) {
                    return Ok(None);
                }
                idx = if self.reverse {
                    i.checked_sub(1)
                } else if i + 1 < entries_len {
                    Some(i + 1)
                } else {
                    None
                };
            }
            let next_leaf = if self.reverse { tree.page_map[&leaf].prev } else { tree.page_map[&leaf].next };
            if next_leaf == UNDEFINED_PAGE_ID {
                return Ok(None);
            }
            tree.ensure_loaded(next_leaf)?;
            leaf = next_leaf;
        }
    }

    /// Advance to (and return) the next matching `(key, row_id)` pair,
    /// skipping tombstoned entries transparently.
    pub fn fetch<C: KeyComparator>(&mut self, tree: &mut TreeCore<C>) -> Result<Option<(Vec<u8>, u64)>> {
        loop {
            let pos = match (self.state, self.pos) {
                (State::Primed, Some(p)) => {
                    self.state = State::Scanning;
                    p
                }
                (State::Scanning, Some(p)) => match self.advance(tree, p)? {
                    Some(next) => next,
                    None => {
                        self.state = State::Exhausted;
                        self.pos = None;
                        return Ok(None);
                    }
                },
                _ => return Ok(None),
            };
            tree.ensure_loaded(pos.leaf)?;
            let entry = &tree.page_map[&pos.leaf].entries[pos.idx];
            self.pos = Some(pos);
            if entry.tombstone {
                continue;
            }
            let result = (entry.key.clone(), entry.row_id().unwrap_or(0));
            if self.condition.is_unique() {
                // a unique-bound condition matches at most one entry; stop
                // here instead of walking into the next key's duplicates.
                self.state = State::Exhausted;
                self.pos = None;
            }
            return Ok(Some(result));
        }
    }

    fn advance<C: KeyComparator>(&self, tree: &mut TreeCore<C>, pos: Position) -> Result<Option<Position>> {
        let mut leaf = pos.leaf;
        let mut idx = pos.idx;
        loop {
            let entries_len = tree.page_map[&leaf].entries.len();
            idx = if self.reverse {
                match idx.checked_sub(1) {
                    Some(i) => i,
                    None => {
                        let prev = tree.page_map[&leaf].prev;
                        if prev == UNDEFINED_PAGE_ID {
                            return Ok(None);
                        }
                        tree.ensure_loaded(prev)?;
                        leaf = prev;
                        match tree.page_map[&leaf].entries.len().checked_sub(1) {
                            Some(i) => i,
                            None => continue,
                        }
                    }
                }
            } else if idx + 1 < entries_len {
                idx + 1
            } else {
                let next = tree.page_map[&leaf].next;
                if next == UNDEFINED_PAGE_ID {
                    return Ok(None);
                }
                tree.ensure_loaded(next)?;
                leaf = next;
                if tree.page_map[&leaf].entries.is_empty() {
                    continue;
                }
                0
            };
            let key = tree.page_map[&leaf].entries[idx].key.clone();
            if !self.reverse && self.condition.past_upper(&key, &tree.comparator) {
                return Ok(None);
            }
            if self.reverse && self.condition.past_lower(&key, &tree.comparator) {
                return Ok(None);
            }
            if !self.condition.satisfies(&key, &tree.comparator) {
                continue;
            }
            return Ok(Some(Position { leaf, idx }));
        }
    }

    pub fn mark(&mut self) {
        self.mark = Some((self.state, self.pos));
    }

    pub fn rewind(&mut self) {
        if let Some((state, pos)) = self.mark.take() {
            self.state = state;
            self.pos = pos;
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.state == State::Exhausted
    }
}

impl Default for SearchCursor {
    fn default() -> Self {
        Self::new()
    }
}
