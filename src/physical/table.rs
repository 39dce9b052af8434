//! Area-manage table: per-group header describing the fullness of the
//! `PAGES_PER_TABLE` data pages immediately following it, plus the
//! per-page area-rate bitmap used for fast free-page search.

use crate::physical::bitmap::{self, RateClass, RATE_CLASS_COUNT};
use crate::physical::codec::FieldWidth;
use crate::error::{Error, ErrorCode, Result};

/// A view over one table page's bytes.
///
/// Layout: `used_page_count(width) | unused_page_count(width) |
/// per_class_unused[8](width each) | per_class_free[8](width each) |
/// rate_bitmap[pages_per_table](1 byte each)`.
pub struct AreaManageTable<'p> {
    data: &'p mut [u8],
    width: FieldWidth,
    pages_per_table: u32,
}

const LIVE_CLASSES: usize = RATE_CLASS_COUNT - 1; // excludes Unallocated

impl<'p> AreaManageTable<'p> {
    fn class_array_offset(width: FieldWidth, which: usize) -> usize {
        width.byte_len() * 2 + which * LIVE_CLASSES * width.byte_len()
    }

    pub fn bitmap_offset(width: FieldWidth) -> usize {
        Self::class_array_offset(width, 2)
    }

    pub fn header_len(width: FieldWidth, pages_per_table: u32) -> usize {
        Self::bitmap_offset(width) + pages_per_table as usize
    }

    pub fn format(data: &'p mut [u8], width: FieldWidth, pages_per_table: u32) -> Self {
        let mut t = Self {
            data,
            width,
            pages_per_table,
        };
        t.set_used_page_count(0);
        t.set_unused_page_count(pages_per_table);
        for k in 0..LIVE_CLASSES {
            t.set_class_count(0, k, 0);
            t.set_class_count(1, k, 0);
        }
        let bm_off = Self::bitmap_offset(width);
        for i in 0..pages_per_table as usize {
            t.data[bm_off + i] = 0;
        }
        t
    }

    pub fn attach(data: &'p mut [u8], width: FieldWidth, pages_per_table: u32) -> Self {
        Self {
            data,
            width,
            pages_per_table,
        }
    }

    pub fn used_page_count(&self) -> u32 {
        self.width.read(self.data, 0).unwrap_or(0)
    }

    pub fn set_used_page_count(&mut self, v: u32) {
        let _ = self.width.write(self.data, 0, v);
    }

    pub fn unused_page_count(&self) -> u32 {
        self.width.read(self.data, self.width.byte_len()).unwrap_or(0)
    }

    pub fn set_unused_page_count(&mut self, v: u32) {
        let off = self.width.byte_len();
        let _ = self.width.write(self.data, off, v);
    }

    /// `which`: 0 = unused-rate array, 1 = free-rate array. `class_index`
    /// excludes the `Unallocated` pseudo-class (0..8, i.e. `Rate0_4..=Rate80_100`).
    fn class_count(&self, which: usize, class_index: usize) -> u32 {
        let off = Self::class_array_offset(self.width, which) + class_index * self.width.byte_len();
        self.width.read(self.data, off).unwrap_or(0)
    }

    fn set_class_count(&mut self, which: usize, class_index: usize, v: u32) {
        let off = Self::class_array_offset(self.width, which) + class_index * self.width.byte_len();
        let _ = self.width.write(self.data, off, v);
    }

    pub fn unused_class_count(&self, class: RateClass) -> u32 {
        if class == RateClass::Unallocated {
            return self.pages_per_table - self.used_page_count();
        }
        self.class_count(0, class.index() - 1)
    }

    pub fn free_class_count(&self, class: RateClass) -> u32 {
        if class == RateClass::Unallocated {
            return self.pages_per_table - self.used_page_count();
        }
        self.class_count(1, class.index() - 1)
    }

    fn bump_unused_class(&mut self, class: RateClass, delta: i32) {
        if class == RateClass::Unallocated {
            return;
        }
        let cur = self.class_count(0, class.index() - 1) as i64;
        self.set_class_count(0, class.index() - 1, (cur + delta as i64).max(0) as u32);
    }

    fn bump_free_class(&mut self, class: RateClass, delta: i32) {
        if class == RateClass::Unallocated {
            return;
        }
        let cur = self.class_count(1, class.index() - 1) as i64;
        self.set_class_count(1, class.index() - 1, (cur + delta as i64).max(0) as u32);
    }

    fn bitmap_byte(&self, page_index: u32) -> u8 {
        let off = Self::bitmap_offset(self.width) + page_index as usize;
        self.data[off]
    }

    fn set_bitmap_byte(&mut self, page_index: u32, byte: u8) {
        let off = Self::bitmap_offset(self.width) + page_index as usize;
        self.data[off] = byte;
    }

    pub fn rate_classes_of(&self, page_index: u32) -> (RateClass, RateClass) {
        bitmap::from_bitmap_byte(self.bitmap_byte(page_index))
    }

    /// Record a page's allocation: it goes from `Unallocated` to its first
    /// (unused, free) classes.
    pub fn record_allocated(&mut self, page_index: u32, unused: RateClass, free: RateClass) {
        self.set_bitmap_byte(page_index, bitmap::to_bitmap_byte(unused, free));
        self.bump_unused_class(unused, 1);
        self.bump_free_class(free, 1);
        self.set_used_page_count(self.used_page_count() + 1);
        self.set_unused_page_count(self.unused_page_count() - 1);
    }

    /// Record that a page's class changed under a mutation already applied
    /// to the page body. Called under the same Discardable-Write fix as the
    /// page mutation.
    pub fn record_class_change(
        &mut self,
        page_index: u32,
        old: (RateClass, RateClass),
        new: (RateClass, RateClass),
    ) {
        if old == new {
            return;
        }
        self.set_bitmap_byte(page_index, bitmap::to_bitmap_byte(new.0, new.1));
        self.bump_unused_class(old.0, -1);
        self.bump_unused_class(new.0, 1);
        self.bump_free_class(old.1, -1);
        self.bump_free_class(new.1, 1);
    }

    /// Record that a page was returned to the free list: clears its bitmap
    /// byte and restores it to `Unallocated`.
    pub fn record_freed(&mut self, page_index: u32) {
        let (old_unused, old_free) = self.rate_classes_of(page_index);
        self.set_bitmap_byte(page_index, 0);
        self.bump_unused_class(old_unused, -1);
        self.bump_free_class(old_free, -1);
        self.set_used_page_count(self.used_page_count() - 1);
        self.set_unused_page_count(self.unused_page_count() + 1);
    }

    pub fn pages_per_table(&self) -> u32 {
        self.pages_per_table
    }

    /// True if any page managed by this table has an unused (or free, if
    /// `by_unused` is false) rate class strictly exceeding `threshold`.
    pub fn has_candidate_class(&self, threshold: RateClass, by_unused: bool) -> bool {
        let mut class = threshold.index() + 1;
        while class < RATE_CLASS_COUNT {
            let count = if by_unused {
                self.unused_class_count(RateClass::from_index(class))
            } else {
                self.free_class_count(RateClass::from_index(class))
            };
            if count > 0 {
                return true;
            }
            class += 1;
        }
        false
    }

    /// Scan the rate bitmap for a page index whose relevant class exceeds
    /// `threshold`. Returns the first candidate found, best-effort.
    pub fn find_candidate_page(&self, threshold: RateClass, by_unused: bool) -> Option<u32> {
        for i in 0..self.pages_per_table {
            let (unused, free) = self.rate_classes_of(i);
            let class = if by_unused { unused } else { free };
            if class != RateClass::Unallocated && class > threshold {
                return Some(i);
            }
        }
        None
    }

    /// Cross-check this table's per-class arrays against its own used count
    /// — an inconsistency (not repairable by rewriting this table alone) if
    /// they disagree.
    pub fn verify_self_consistent(&self) -> Result<()> {
        let mut sum_unused = 0u32;
        let mut sum_free = 0u32;
        for k in 1..RATE_CLASS_COUNT {
            sum_unused += self.unused_class_count(RateClass::from_index(k));
            sum_free += self.free_class_count(RateClass::from_index(k));
        }
        if sum_unused != self.used_page_count() || sum_free != self.used_page_count() {
            return Err(Error::new(ErrorCode::VerifyInconsistent));
        }
        Ok(())
    }
}
